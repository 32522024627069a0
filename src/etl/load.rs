//! Loader trait for writing data to destinations

use crate::error::Result;
use crate::run_log::RunLog;
use async_trait::async_trait;

/// Loader trait for loading data to one or more destinations
///
/// Returns the number of rows successfully loaded.
///
/// # Example
/// ```no_run
/// use async_trait::async_trait;
/// use etl_pipeline::etl::Loader;
/// use etl_pipeline::error::Result;
/// use etl_pipeline::run_log::RunLog;
///
/// struct Discard;
///
/// #[async_trait]
/// impl Loader for Discard {
///     type Item = Vec<String>;
///
///     async fn load(&self, item: Self::Item, _log: &RunLog) -> Result<usize> {
///         Ok(item.len())
///     }
/// }
/// ```
#[async_trait]
pub trait Loader: Send + Sync {
    /// The type of item to load
    type Item: Send;

    /// Load an item to the destination
    ///
    /// # Errors
    /// Returns an error if a sink is unreachable or rejects part of the data
    async fn load(&self, item: Self::Item, log: &RunLog) -> Result<usize>;
}
