//! Learning extraction contract and its LLM-backed adapter.

use super::aggregator::dedup_learnings;
use super::types::{Learning, SourceRecord};
use crate::brain::{CompletionRequest, LlmProvider};
use crate::error::ExtractionError;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Facts and follow-up questions extracted for one query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub learnings: Vec<Learning>,
    pub follow_up_questions: Vec<String>,
}

impl Extraction {
    /// Collapse near-duplicate learnings and keep at most `max_learnings`.
    pub fn normalized(mut self, max_learnings: usize) -> Self {
        self.learnings = dedup_learnings(&self.learnings);
        self.learnings.truncate(max_learnings);
        self.follow_up_questions.retain(|q| !q.trim().is_empty());
        self
    }
}

/// Extracts learnings and follow-up questions from retrieved documents.
///
/// Implementations must return at most `max_learnings` learnings with
/// near-duplicates already collapsed, and should attribute each learning to
/// a source URL when possible.
#[async_trait]
pub trait LearningExtractor: Send + Sync {
    async fn extract(
        &self,
        query: &str,
        documents: &[SourceRecord],
        max_learnings: usize,
    ) -> Result<Extraction, ExtractionError>;
}

/// Parse the line protocol used by [`LlmLearningExtractor`]:
///
/// ```text
/// LEARNING: <fact> | SOURCE: <url>
/// FOLLOW_UP: <question>
/// ```
///
/// Other lines are ignored. A learning without `SOURCE` is attributed to the
/// only document when exactly one was supplied.
pub fn parse_extraction(
    text: &str,
    documents: &[SourceRecord],
    max_learnings: usize,
) -> Result<Extraction, ExtractionError> {
    let sole_source = match documents {
        [only] => Some(only.url.clone()),
        _ => None,
    };

    let mut extraction = Extraction::default();
    for line in text.lines() {
        let trimmed = line.trim().trim_start_matches(['-', '*']).trim();

        if let Some(rest) = trimmed.strip_prefix("LEARNING:") {
            let (fact, source) = match rest.split_once("| SOURCE:") {
                Some((fact, url)) => (fact.trim(), Some(url.trim().to_string())),
                None => (rest.trim(), None),
            };
            if fact.is_empty() {
                continue;
            }
            let source = source
                .filter(|url| !url.is_empty())
                .or_else(|| sole_source.clone());
            extraction.learnings.push(Learning {
                text: fact.to_string(),
                source_url: source,
            });
        } else if let Some(rest) = trimmed.strip_prefix("FOLLOW_UP:") {
            let question = rest.trim();
            if !question.is_empty() {
                extraction.follow_up_questions.push(question.to_string());
            }
        }
    }

    if extraction.learnings.is_empty()
        && extraction.follow_up_questions.is_empty()
        && !text.trim().is_empty()
    {
        return Err(ExtractionError::MalformedResponse {
            message: format!(
                "no LEARNING or FOLLOW_UP lines in {} byte response",
                text.len()
            ),
        });
    }

    Ok(extraction.normalized(max_learnings))
}

/// Extractor backed by an [`LlmProvider`].
pub struct LlmLearningExtractor {
    provider: Arc<dyn LlmProvider>,
    /// Per-document character cap inside the prompt.
    max_document_chars: usize,
    max_follow_ups: usize,
}

impl LlmLearningExtractor {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            max_document_chars: 6_000,
            max_follow_ups: 3,
        }
    }

    pub fn with_max_document_chars(mut self, max: usize) -> Self {
        self.max_document_chars = max;
        self
    }

    pub fn with_max_follow_ups(mut self, max: usize) -> Self {
        self.max_follow_ups = max;
        self
    }

    fn build_prompt(&self, query: &str, documents: &[SourceRecord], max_learnings: usize) -> String {
        let mut prompt = format!(
            "Search query: {query}\n\n\
             From the documents below, extract up to {max_learnings} concise, \
             information-dense learnings and up to {} follow-up questions worth \
             researching next.\n\
             Answer with one item per line, using exactly these formats:\n\
             LEARNING: <fact> | SOURCE: <url>\n\
             FOLLOW_UP: <question>\n",
            self.max_follow_ups
        );
        for (i, doc) in documents.iter().enumerate() {
            let excerpt: String = doc
                .content_excerpt
                .chars()
                .take(self.max_document_chars)
                .collect();
            prompt.push_str(&format!(
                "\n--- Document {} ---\nURL: {}\nTitle: {}\n{}\n",
                i + 1,
                doc.url,
                doc.title,
                excerpt
            ));
        }
        prompt
    }
}

#[async_trait]
impl LearningExtractor for LlmLearningExtractor {
    async fn extract(
        &self,
        query: &str,
        documents: &[SourceRecord],
        max_learnings: usize,
    ) -> Result<Extraction, ExtractionError> {
        let request = CompletionRequest::new(
            "You are a research analyst. You only state facts supported by the documents.",
            self.build_prompt(query, documents, max_learnings),
        )
        .with_temperature(0.2);

        let text = self.provider.complete(request).await?;
        let mut extraction = parse_extraction(&text, documents, max_learnings)?;
        extraction.follow_up_questions.truncate(self.max_follow_ups);

        debug!(
            model = self.provider.model_name(),
            query,
            learnings = extraction.learnings.len(),
            follow_ups = extraction.follow_up_questions.len(),
            "Learnings extracted"
        );
        Ok(extraction)
    }
}
