//! Push, pull and sync command implementations.

use super::Context;
use lodestore_sync_engine::{PushResult, Query, StoreOptions};

/// Flags of the pull command.
#[derive(Debug, Clone, Copy, Default)]
pub struct PullOptions {
    /// Use delta-set pulls.
    pub delta: bool,
    /// Use auto-pagination.
    pub paginate: bool,
    /// Page size override.
    pub page_size: Option<usize>,
    /// Push pending entities first.
    pub push_first: bool,
}

impl PullOptions {
    fn to_store_options(self) -> StoreOptions {
        let mut options = StoreOptions::new()
            .with_delta_set(self.delta)
            .with_auto_pagination(self.paginate)
            .with_push_first(self.push_first);
        if let Some(size) = self.page_size {
            options = options.with_page_size(size);
        }
        options
    }
}

/// Runs the push command.
pub async fn push(context: &Context, collection: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = context.store(collection, true)?;
    let results = store.push(&Query::new(), &StoreOptions::new()).await?;
    print_push_results(&results);

    let failed = results.iter().filter(|r| !r.is_success()).count();
    if failed > 0 {
        return Err(format!("{failed} entities failed to push").into());
    }
    Ok(())
}

/// Runs the pull command.
pub async fn pull(
    context: &Context,
    collection: &str,
    options: PullOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = context.store(collection, true)?;
    let received = store
        .pull(&Query::new(), &options.to_store_options())
        .await?;
    println!("Pulled {received} entities into {collection}");
    Ok(())
}

/// Runs the sync command.
pub async fn sync(context: &Context, collection: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = context.store(collection, true)?;
    let outcome = store.sync(&Query::new(), &StoreOptions::new()).await?;
    print_push_results(&outcome.push);
    let received = outcome.pull?;
    println!("Pulled {received} entities into {collection}");
    Ok(())
}

fn print_push_results(results: &[PushResult]) {
    let failed = results.iter().filter(|r| !r.is_success()).count();
    println!(
        "Pushed {} of {} entities",
        results.len() - failed,
        results.len()
    );
    for result in results {
        if let Some(error) = &result.error {
            println!("  {:<8} {}: {error}", result.operation.method(), result.id);
        }
    }
}
