//! Root-level context aggregation.
//!
//! Collapses duplicate learnings (normalized exact match and word-boundary
//! containment), keeps discovery order, and trims the rendered context to a
//! word budget by dropping whole trailing learnings.

use super::types::{AggregatedResult, Learning, SourceRecord};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

/// Canonical form used to compare learnings and queries: NFKC, lowercase,
/// single spaces, trailing sentence punctuation removed.
pub fn normalize_text(text: &str) -> String {
    let folded: String = text.nfkc().collect::<String>().to_lowercase();
    let collapsed = folded.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches(|c: char| matches!(c, '.' | '!' | ';' | ',') || c.is_whitespace())
        .to_string()
}

/// Whole-word containment: "rust is fast" contains "is fast" but "concatenate"
/// does not contain "cat".
fn contains_phrase(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    format!(" {haystack} ").contains(&format!(" {needle} "))
}

/// Collapse duplicates while preserving discovery order.
///
/// Exact duplicates (after normalization) keep the first occurrence. When one
/// learning's text is contained in another's, the longer one survives in the
/// position of whichever was discovered first.
pub fn dedup_learnings<L>(learnings: &[L]) -> Vec<L>
where
    L: AsRef<Learning> + Clone,
{
    let mut kept: Vec<(String, L)> = Vec::with_capacity(learnings.len());

    for learning in learnings {
        let key = learning.as_ref().normalized();
        if key.is_empty() {
            continue;
        }
        if kept.iter().any(|(k, _)| contains_phrase(k, &key)) {
            continue;
        }

        let absorbed: Vec<usize> = kept
            .iter()
            .enumerate()
            .filter(|(_, (k, _))| contains_phrase(&key, k))
            .map(|(i, _)| i)
            .collect();

        match absorbed.first() {
            Some(&first) => {
                kept[first] = (key, learning.clone());
                for &idx in absorbed.iter().skip(1).rev() {
                    kept.remove(idx);
                }
            }
            None => kept.push((key, learning.clone())),
        }
    }

    kept.into_iter().map(|(_, l)| l).collect()
}

/// Longest prefix of `learnings` whose total word count fits in `word_budget`.
///
/// Learnings are never split; a learning that does not fit ends the prefix.
/// Applying this to its own output returns the same list.
pub fn trim_to_budget<L>(learnings: &[L], word_budget: usize) -> Vec<L>
where
    L: AsRef<Learning> + Clone,
{
    let mut used = 0;
    let mut trimmed = Vec::new();
    for learning in learnings {
        let words = learning.as_ref().word_count();
        if used + words > word_budget {
            break;
        }
        used += words;
        trimmed.push(learning.clone());
    }
    trimmed
}

/// Render learnings as context text, one learning per line.
pub fn render_context<L: AsRef<Learning>>(learnings: &[L]) -> String {
    learnings
        .iter()
        .map(|l| l.as_ref().text.trim())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Total word count of a rendered context.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Finalizes the root result for the report writer.
#[derive(Debug, Clone)]
pub struct ContextAggregator {
    word_budget: usize,
}

impl ContextAggregator {
    pub fn new(word_budget: usize) -> Self {
        Self { word_budget }
    }

    pub fn word_budget(&self) -> usize {
        self.word_budget
    }

    /// Dedup learnings and sources, then render the budgeted `context_text`.
    ///
    /// `learnings` keeps every distinct learning; only `context_text` is
    /// subject to the word budget.
    pub fn finalize(&self, mut result: AggregatedResult) -> AggregatedResult {
        let before = result.learnings.len();
        result.learnings = dedup_learnings(&result.learnings);
        result.sources = dedup_sources(result.sources);

        let in_budget = trim_to_budget(&result.learnings, self.word_budget);
        result.context_text = render_context(&in_budget);

        debug!(
            learnings_in = before,
            learnings_kept = result.learnings.len(),
            learnings_in_context = in_budget.len(),
            context_words = word_count(&result.context_text),
            word_budget = self.word_budget,
            "Context aggregated"
        );
        result
    }
}

fn dedup_sources(sources: Vec<Arc<SourceRecord>>) -> Vec<Arc<SourceRecord>> {
    let mut seen = HashSet::new();
    sources
        .into_iter()
        .filter(|s| seen.insert(s.url.clone()))
        .collect()
}
