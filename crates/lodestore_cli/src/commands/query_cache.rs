//! Query cache command implementation.

use super::Context;
use lodestore_sync_engine::QueryCacheEntry;

/// Runs the query-cache command.
pub async fn run(context: &Context, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut entries = context
        .datastore(false)?
        .query_cache_entries(context.tag.as_deref())
        .await?;
    entries.sort_by(|a, b| {
        (&a.collection_name, &a.query).cmp(&(&b.collection_name, &b.query))
    });

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => print_text_output(&entries),
    }

    Ok(())
}

fn print_text_output(entries: &[QueryCacheEntry]) {
    println!("Query cache");
    println!("===========");
    println!();
    if entries.is_empty() {
        println!("No queries pulled yet.");
        return;
    }
    println!("  {:<20} {:<22} Query", "Collection", "Last request");
    for entry in entries {
        let query = if entry.query.is_empty() {
            "(all)"
        } else {
            entry.query.as_str()
        };
        println!(
            "  {:<20} {:<22} {}",
            entry.collection_name, entry.last_request, query
        );
    }
}
