use anyhow::Result;
use rusqlite::params;
use serde::Serialize;

use recollect::config::RecollectConfig;
use recollect::graph::NamedEntity;
use recollect::proposition::Proposition;

#[derive(Debug, Serialize)]
struct ExportedRelation {
    id: String,
    subject_id: String,
    predicate: String,
    object_id: String,
    proposition_id: Option<String>,
    confidence: f64,
    created_at: i64,
}

/// Export format: propositions with their mentions, entities and relations.
#[derive(Debug, Serialize)]
struct ExportData {
    propositions: Vec<Proposition>,
    entities: Vec<NamedEntity>,
    relations: Vec<ExportedRelation>,
}

/// Export everything as JSON to stdout, optionally only one context's propositions.
pub fn export(config: &RecollectConfig, context: Option<&str>) -> Result<()> {
    let db_path = config.resolved_db_path();
    let conn = recollect::db::open_database(&db_path)?;

    let propositions = recollect::proposition::store::export_propositions(&conn, context)?;

    let mut stmt = conn.prepare(
        "SELECT id, name, labels, description, context_id FROM entities ORDER BY created_at",
    )?;
    let entities: Vec<NamedEntity> = stmt
        .query_map(params![], |row| {
            let labels: String = row.get(2)?;
            Ok(NamedEntity {
                id: row.get(0)?,
                name: row.get(1)?,
                labels: serde_json::from_str(&labels).unwrap_or_default(),
                description: row.get(3)?,
                context_id: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT id, subject_id, predicate, object_id, proposition_id, confidence, created_at \
         FROM entity_relations ORDER BY created_at",
    )?;
    let relations: Vec<ExportedRelation> = stmt
        .query_map(params![], |row| {
            Ok(ExportedRelation {
                id: row.get(0)?,
                subject_id: row.get(1)?,
                predicate: row.get(2)?,
                object_id: row.get(3)?,
                proposition_id: row.get(4)?,
                confidence: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let data = ExportData {
        propositions,
        entities,
        relations,
    };

    let json = serde_json::to_string_pretty(&data)?;
    println!("{json}");

    eprintln!(
        "Exported {} propositions, {} entities and {} relations.",
        data.propositions.len(),
        data.entities.len(),
        data.relations.len()
    );

    Ok(())
}
