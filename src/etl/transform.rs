//! Transformer trait for pure data transformation

use crate::error::Result;

/// Transformer trait for transforming data items
///
/// Implementations must be deterministic: the same input and configuration
/// always produce the same output.
pub trait Transformer: Send + Sync {
    /// Input item type
    type Input: Send;

    /// Output item type after transformation
    type Output: Send;

    /// Transform a single item
    ///
    /// # Errors
    /// Returns an error only for failures that invalidate the whole item;
    /// per-row problems are reported in the output instead.
    fn transform(&self, input: Self::Input) -> Result<Self::Output>;
}
