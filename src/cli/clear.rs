//! CLI `clear` command: delete propositions after confirmation.

use anyhow::{bail, Result};
use std::io::Write;

use recollect::config::RecollectConfig;

/// Which propositions `clear` removes.
pub enum ClearScope {
    All,
    Context(String),
    Prefix(String),
}

impl std::fmt::Display for ClearScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "ALL propositions"),
            Self::Context(ctx) => write!(f, "propositions in context '{ctx}'"),
            Self::Prefix(prefix) => write!(f, "propositions in contexts starting with '{prefix}'"),
        }
    }
}

/// Delete propositions after the user types YES (skipped with `yes`).
pub fn clear(config: &RecollectConfig, scope: ClearScope, yes: bool) -> Result<()> {
    let db_path = config.resolved_db_path();

    if !yes {
        println!("WARNING: This will permanently delete {scope} with their mentions and vectors.");
        println!("Database: {}", db_path.display());
        print!("\nType YES to confirm: ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if input.trim() != "YES" {
            bail!("clear cancelled");
        }
    }

    let store = recollect::server::open_store(config)?;
    let deleted = match &scope {
        ClearScope::All => store.clear_all()?,
        ClearScope::Context(ctx) => store.clear_by_context(ctx)?,
        ClearScope::Prefix(prefix) => store.clear_by_context_prefix(prefix)?,
    };

    println!("Deleted {deleted} proposition(s).");
    Ok(())
}
