//! Content retrieval contract.

use super::types::SourceRecord;
use crate::error::RetrievalError;
use async_trait::async_trait;
use std::collections::BTreeSet;

/// Fetches documents for a query.
///
/// Implementations must tolerate being called concurrently up to the gate's
/// capacity. Returning an empty list and returning an error are handled the
/// same way by the explorer: the branch contributes nothing.
#[async_trait]
pub trait ContentRetriever: Send + Sync {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<SourceRecord>, RetrievalError>;
}

/// Keep only records whose URL is not yet in `visited` (and not repeated
/// within the batch), recording each admitted URL. Excerpts are capped at
/// `max_excerpt_chars`.
pub fn admit_new_sources(
    records: Vec<SourceRecord>,
    visited: &mut BTreeSet<String>,
    max_excerpt_chars: usize,
) -> Vec<SourceRecord> {
    records
        .into_iter()
        .filter(|r| !r.url.trim().is_empty())
        .filter(|r| visited.insert(r.url.clone()))
        .map(|r| r.truncated(max_excerpt_chars))
        .collect()
}
