//! Clear-sync command implementation.

use super::Context;
use lodestore_sync_engine::Query;

/// Runs the clear-sync command.
///
/// Refuses to run unless `confirmed`; discarded edits can't be recovered.
pub async fn run(
    context: &Context,
    collection: &str,
    confirmed: bool,
) -> Result<usize, Box<dyn std::error::Error>> {
    if !confirmed {
        return Err(format!(
            "Refusing to discard pending entities of {collection} without --yes"
        )
        .into());
    }

    let store = context.store(collection, false)?;
    let removed = store.clear_sync(&Query::new()).await?;
    tracing::warn!(collection, removed, "discarded pending sync entities");
    println!("Discarded {removed} pending entities from {collection}");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::context;
    use lodestore_sync_engine::StoreOptions;
    use serde_json::json;

    #[tokio::test]
    async fn requires_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let context = context(dir.path());
        let store = context.store("books", false).unwrap();
        let doc = json!({"title": "Dune"}).as_object().cloned().unwrap();
        store.create(doc, &StoreOptions::new()).await.unwrap();

        assert!(run(&context, "books", false).await.is_err());
        assert_eq!(store.pending_sync_count(&Query::new()).await.unwrap(), 1);

        assert_eq!(run(&context, "books", true).await.unwrap(), 1);
        assert_eq!(store.pending_sync_count(&Query::new()).await.unwrap(), 0);
    }
}
