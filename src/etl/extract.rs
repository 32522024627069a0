//! Extractor trait for reading raw sources into memory

use crate::error::Result;
use crate::run_log::RunLog;

/// Extractor trait for extracting data from a source
///
/// Implementors define how to turn sources such as local files or remote
/// objects into in-memory items. Progress and skipped inputs are reported
/// through the run-scoped [`RunLog`].
///
/// # Example
/// ```no_run
/// use etl_pipeline::etl::Extractor;
/// use etl_pipeline::error::Result;
/// use etl_pipeline::run_log::RunLog;
///
/// struct Numbers(Vec<i32>);
///
/// impl Extractor for Numbers {
///     type Item = i32;
///
///     async fn extract(&self, log: &RunLog) -> Result<Vec<Self::Item>> {
///         log.info("extract", format!("{} numbers", self.0.len()));
///         Ok(self.0.clone())
///     }
/// }
/// ```
pub trait Extractor: Send + Sync {
    /// The type of items extracted
    type Item: Send;

    /// Extract items from the source, preserving source order
    ///
    /// # Errors
    /// Returns an error if a source cannot be read or has an unsupported format
    fn extract(
        &self,
        log: &RunLog,
    ) -> impl std::future::Future<Output = Result<Vec<Self::Item>>> + Send;
}
