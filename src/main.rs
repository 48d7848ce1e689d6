mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use recollect::config::RecollectConfig;
use tracing_subscriber::EnvFilter;

use cli::clear::ClearScope;

#[derive(Parser)]
#[command(name = "recollect", version, about = "Proposition memory MCP server and admin tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the MCP server on the configured transport
    Serve {
        /// Override server.transport ("stdio" or "http")
        #[arg(long)]
        transport: Option<String>,
    },
    /// Show proposition statistics
    Stats {
        #[arg(long)]
        context: Option<String>,
    },
    /// Similarity search from the terminal
    Search {
        query: String,
        #[arg(long)]
        context: Option<String>,
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Show clusters of similar propositions
    Clusters {
        #[arg(long)]
        context: Option<String>,
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Delete propositions (all, one context, or a context prefix)
    Clear {
        #[arg(long, conflicts_with = "prefix")]
        context: Option<String>,
        #[arg(long)]
        prefix: Option<String>,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Export propositions, entities and relations as JSON
    Export {
        #[arg(long)]
        context: Option<String>,
    },
    /// Check database health
    Doctor,
    /// Re-embed every proposition with the configured model
    ReEmbed,
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the embedding model to the configured cache directory
    Download,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = RecollectConfig::load()?;

    // Log to stderr so stdout stays clean for MCP JSON-RPC.
    let filter = EnvFilter::try_new(&config.server.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve { transport } => {
            if let Some(transport) = transport {
                config.server.transport = transport;
            }
            recollect::server::serve(config).await?;
        }
        Command::Stats { context } => {
            let context = config.storage.context_or_default(context);
            cli::stats::stats(&config, context.as_deref())?
        }
        Command::Search { query, context, top_k } => {
            let context = config.storage.context_or_default(context);
            cli::search::search(&config, &query, context.as_deref(), top_k).await?
        }
        Command::Clusters { context, threshold } => {
            let context = config.storage.context_or_default(context);
            cli::clusters::clusters(&config, context.as_deref(), threshold).await?
        }
        Command::Clear { context, prefix, yes } => {
            let scope = match (context, prefix) {
                (Some(ctx), _) => ClearScope::Context(ctx),
                (None, Some(prefix)) => ClearScope::Prefix(prefix),
                (None, None) => ClearScope::All,
            };
            cli::clear::clear(&config, scope, yes)?
        }
        Command::Export { context } => {
            let context = config.storage.context_or_default(context);
            cli::export::export(&config, context.as_deref())?
        }
        Command::Doctor => cli::doctor::doctor(&config)?,
        Command::ReEmbed => cli::re_embed::re_embed(&config).await?,
        Command::Model { action } => match action {
            ModelAction::Download => cli::model_download(&config.embedding).await?,
        },
    }

    Ok(())
}
