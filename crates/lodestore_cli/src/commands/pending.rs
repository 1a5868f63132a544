//! Pending command implementation.

use super::Context;
use lodestore_sync_engine::{Query, SyncLogEntry};
use serde::Serialize;

/// Pending entities of one collection.
#[derive(Debug, Serialize)]
pub struct PendingReport {
    /// Collection name.
    pub collection: String,
    /// Cache tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Pending sync log entries.
    pub entries: Vec<SyncLogEntry>,
}

/// Collects the pending entities of a collection.
pub async fn collect(
    context: &Context,
    collection: &str,
) -> Result<PendingReport, Box<dyn std::error::Error>> {
    let store = context.store(collection, false)?;
    Ok(PendingReport {
        collection: collection.to_string(),
        tag: context.tag.clone(),
        entries: store.pending_sync_entities(&Query::new()).await?,
    })
}

/// Runs the pending command.
pub async fn run(
    context: &Context,
    collection: &str,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let report = collect(context, collection).await?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => print_text_output(&report),
    }

    Ok(())
}

fn print_text_output(report: &PendingReport) {
    println!("Pending sync entities");
    println!("=====================");
    println!();
    match &report.tag {
        Some(tag) => println!("Collection: {} (tag {tag})", report.collection),
        None => println!("Collection: {}", report.collection),
    }
    println!("Pending:    {}", report.entries.len());

    if report.entries.is_empty() {
        return;
    }
    println!();
    println!("  {:<8} Entity", "Method");
    for entry in &report.entries {
        println!("  {:<8} {}", entry.operation.method(), entry.entity_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::context;
    use lodestore_sync_engine::{StoreOptions, SyncOperation};
    use serde_json::json;

    #[tokio::test]
    async fn reports_entries_written_by_a_store() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(dir.path());

        let store = context.store("books", false).unwrap();
        let doc = json!({"title": "Dune"}).as_object().cloned().unwrap();
        store.create(doc, &StoreOptions::new()).await.unwrap();

        let report = collect(&context, "books").await.unwrap();
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].operation, SyncOperation::Create);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["entries"][0]["operation"], "POST");
        assert!(json.get("tag").is_none());
    }

    #[tokio::test]
    async fn missing_cache_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(&dir.path().join("missing"));
        assert!(collect(&context, "books").await.is_err());
    }
}
