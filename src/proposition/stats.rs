use anyhow::Result;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use super::types::PropositionStatus;

/// Response from `proposition_stats` and `recollect stats`.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_propositions: u64,
    pub by_status: BTreeMap<String, u64>,
    pub by_context: BTreeMap<String, u64>,
    pub unresolved_mentions: u64,
    pub processed_windows: u64,
    pub entities: u64,
    pub entity_relations: u64,
    pub db_size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_proposition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_proposition: Option<String>,
}

/// Compute store statistics, optionally restricted to one context.
///
/// `db_path` is used for the file size; pass `None` for in-memory databases.
pub fn proposition_stats(
    conn: &Connection,
    context_id: Option<&str>,
    db_path: Option<&Path>,
) -> Result<StatsResponse> {
    let (where_clause, param) = context_filter(context_id);

    let mut by_status: BTreeMap<String, u64> = PropositionStatus::ALL
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();
    for (status, count) in grouped_counts(conn, "status", &where_clause, param)? {
        by_status.insert(status, count);
    }
    let by_context: BTreeMap<String, u64> =
        grouped_counts(conn, "context_id", &where_clause, param)?.into_iter().collect();
    let total_propositions = by_status.values().sum();

    let unresolved_mentions: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM mentions m JOIN propositions p ON p.id = m.proposition_id \
             {where_clause} {} m.resolved_id IS NULL",
            if param.is_some() { "AND" } else { "WHERE" }
        ),
        rusqlite::params_from_iter(param.iter()),
        |row| row.get(0),
    )?;

    let (oldest, newest): (Option<i64>, Option<i64>) = conn.query_row(
        &format!("SELECT MIN(created_at), MAX(created_at) FROM propositions p {where_clause}"),
        rusqlite::params_from_iter(param.iter()),
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let to_rfc3339 = |ms: Option<i64>| {
        ms.and_then(chrono::DateTime::from_timestamp_millis)
            .map(|t| t.to_rfc3339())
    };

    let count = |table: &str| -> Result<u64> {
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), params![], |row| {
            row.get(0)
        })?;
        Ok(n as u64)
    };

    let db_size_bytes = db_path
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .unwrap_or(0);

    Ok(StatsResponse {
        total_propositions,
        by_status,
        by_context,
        unresolved_mentions: unresolved_mentions as u64,
        processed_windows: count("processed_chunks")?,
        entities: count("entities")?,
        entity_relations: count("entity_relations")?,
        db_size_bytes,
        oldest_proposition: to_rfc3339(oldest),
        newest_proposition: to_rfc3339(newest),
    })
}

fn context_filter(context_id: Option<&str>) -> (String, Option<&str>) {
    match context_id {
        Some(ctx) => ("WHERE p.context_id = ?1".to_string(), Some(ctx)),
        None => (String::new(), None),
    }
}

fn grouped_counts(
    conn: &Connection,
    column: &str,
    where_clause: &str,
    param: Option<&str>,
) -> Result<Vec<(String, u64)>> {
    let sql = format!(
        "SELECT p.{column}, COUNT(*) FROM propositions p {where_clause} GROUP BY p.{column}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(param.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
