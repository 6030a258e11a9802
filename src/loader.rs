// Listings file loader: a JSON array or JSON Lines, indexed in chunks
use anyhow::{Context, Result};
use serde_json::Value;
use staysearch_core::{BatchReport, CompositeIndex, Record, Schema, SkippedRecord};
use std::path::Path;
use tracing::{info, warn};

pub const CHUNK_SIZE: usize = 100;

/// Parse raw listing objects from either file layout
pub fn parse_items(content: &str) -> Result<Vec<Value>> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('[') {
        let items: Vec<Value> =
            serde_json::from_str(trimmed).context("parsing listings JSON array")?;
        return Ok(items);
    }
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("parsing JSON line {}", n + 1))
        })
        .collect()
}

/// Convert raw items to records, collecting the ones that do not fit the schema
pub fn to_records(schema: &Schema, items: &[Value]) -> (Vec<Record>, Vec<SkippedRecord>) {
    let mut records = Vec::with_capacity(items.len());
    let mut skipped = Vec::new();
    for (pos, item) in items.iter().enumerate() {
        match Record::from_json(schema, item) {
            Ok(record) => records.push(record),
            Err(e) => skipped.push(SkippedRecord {
                id: item
                    .get(&schema.id_field)
                    .map(|v| v.to_string().trim_matches('"').to_string())
                    .unwrap_or_else(|| format!("#{}", pos)),
                reason: e.to_string(),
            }),
        }
    }
    (records, skipped)
}

pub async fn load_file(index: &CompositeIndex, path: &Path) -> Result<BatchReport> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let items = parse_items(&content)?;
    let (records, mut skipped) = to_records(index.schema(), &items);

    let mut report = BatchReport::default();
    for chunk in records.chunks(CHUNK_SIZE) {
        let chunk_report = index.index_batch(chunk.to_vec()).await?;
        report.indexed += chunk_report.indexed;
        report.skipped.extend(chunk_report.skipped);
        info!("Indexed {} listings so far", report.indexed);
    }
    report.skipped.append(&mut skipped);

    if !report.skipped.is_empty() {
        warn!("Skipped {} listings from {}", report.skipped.len(), path.display());
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use staysearch_core::AttributeKind;

    #[test]
    fn test_parse_array_and_lines() {
        let array = r#"[{"id": 1}, {"id": 2}]"#;
        assert_eq!(parse_items(array).unwrap().len(), 2);

        let lines = "{\"id\": 1}\n\n{\"id\": 2}\n{\"id\": 3}\n";
        assert_eq!(parse_items(lines).unwrap().len(), 3);

        assert!(parse_items("{\"id\": 1}\nnot json").is_err());
    }

    #[test]
    fn test_to_records_collects_failures() {
        let schema = Schema::new("listing").with_field("price", AttributeKind::Number);
        let items = parse_items(r#"[{"id": "a", "price": "$10"}, {"price": 5}, {"id": 7, "price": "lots"}]"#)
            .unwrap();
        let (records, skipped) = to_records(&schema, &items);
        assert_eq!(records.len(), 1);
        assert_eq!(skipped.len(), 2);
        assert_eq!(skipped[0].id, "#1");
        assert_eq!(skipped[1].id, "7");
    }
}
