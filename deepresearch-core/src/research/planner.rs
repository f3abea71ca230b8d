//! Sub-query planning.
//!
//! A planner turns a topic (plus what is already known) into the next batch of
//! distinct queries. Planning never fails: a backend error or an unusable
//! response yields fewer queries, possibly zero, which ends that branch.

use super::aggregator::normalize_text;
use super::types::Learning;
use crate::brain::{CompletionRequest, LlmProvider};
use async_trait::async_trait;
use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

/// Produces the next batch of sub-queries for a node.
#[async_trait]
pub trait QueryPlanner: Send + Sync {
    /// At most `breadth` distinct queries, none of which is in `visited`.
    async fn generate_queries(
        &self,
        topic: &str,
        breadth: usize,
        parent_learnings: &[Arc<Learning>],
        visited: &BTreeSet<String>,
    ) -> Vec<String>;
}

/// Keep the first `breadth` usable candidates: non-empty, not already
/// visited, and distinct from each other (compared after normalization).
pub fn select_queries<I>(candidates: I, breadth: usize, visited: &BTreeSet<String>) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let visited_keys: HashSet<String> = visited.iter().map(|q| normalize_text(q)).collect();
    let mut seen = HashSet::new();
    let mut selected = Vec::new();

    for candidate in candidates {
        if selected.len() >= breadth {
            break;
        }
        let query = candidate.trim();
        let key = normalize_text(query);
        if key.is_empty() || visited_keys.contains(&key) || !seen.insert(key) {
            continue;
        }
        selected.push(query.to_string());
    }
    selected
}

static LIST_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*(?:\d+[.)]\s*|[-*•]\s+|query:\s*)?["'`]?(?P<body>.*?)["'`]?\s*$"#)
        .expect("list marker pattern is valid")
});

/// Parse one query per line, stripping numbering, bullets, and quotes.
/// Heading-like lines ending in `:` are skipped.
pub fn parse_query_lines(response: &str) -> Vec<String> {
    response
        .lines()
        .filter_map(|line| {
            let body = LIST_MARKER
                .captures(line)
                .and_then(|c| c.name("body"))
                .map(|m| m.as_str().trim())?;
            if body.is_empty() || body.ends_with(':') {
                None
            } else {
                Some(body.to_string())
            }
        })
        .collect()
}

/// Planner backed by an [`LlmProvider`].
pub struct LlmQueryPlanner {
    provider: Arc<dyn LlmProvider>,
    /// Most recent learnings included in the prompt.
    max_prompt_learnings: usize,
}

impl LlmQueryPlanner {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            max_prompt_learnings: 20,
        }
    }

    pub fn with_max_prompt_learnings(mut self, max: usize) -> Self {
        self.max_prompt_learnings = max;
        self
    }

    fn build_prompt(
        &self,
        topic: &str,
        breadth: usize,
        parent_learnings: &[Arc<Learning>],
        visited: &BTreeSet<String>,
    ) -> String {
        let mut prompt = format!(
            "Research topic:\n{topic}\n\n\
             Write up to {breadth} distinct search queries that would uncover new \
             information on this topic. Output one query per line and nothing else.\n"
        );

        let skip = parent_learnings
            .len()
            .saturating_sub(self.max_prompt_learnings);
        if parent_learnings.len() > skip {
            prompt.push_str("\nAlready known:\n");
            for learning in &parent_learnings[skip..] {
                prompt.push_str(&format!("- {}\n", learning.text));
            }
        }

        if !visited.is_empty() {
            prompt.push_str("\nDo not repeat these queries:\n");
            for query in visited {
                prompt.push_str(&format!("- {query}\n"));
            }
        }
        prompt
    }
}

#[async_trait]
impl QueryPlanner for LlmQueryPlanner {
    async fn generate_queries(
        &self,
        topic: &str,
        breadth: usize,
        parent_learnings: &[Arc<Learning>],
        visited: &BTreeSet<String>,
    ) -> Vec<String> {
        if breadth == 0 {
            return Vec::new();
        }
        let request = CompletionRequest::new(
            "You plan web research. You write short, specific search queries.",
            self.build_prompt(topic, breadth, parent_learnings, visited),
        )
        .with_temperature(0.7);

        match self.provider.complete(request).await {
            Ok(text) => {
                let candidates = parse_query_lines(&text);
                let queries = select_queries(candidates, breadth, visited);
                debug!(
                    model = self.provider.model_name(),
                    requested = breadth,
                    planned = queries.len(),
                    "Queries planned"
                );
                queries
            }
            Err(e) => {
                warn!(
                    model = self.provider.model_name(),
                    error = %e,
                    "Query planning failed; branch ends here"
                );
                Vec::new()
            }
        }
    }
}
