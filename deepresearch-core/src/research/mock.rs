//! Deterministic in-memory collaborators.
//!
//! These stand in for real search and LLM backends so the scheduling engine
//! can be exercised without network access. They are public so downstream
//! crates can drive the engine in their own tests.

use super::extractor::{Extraction, LearningExtractor};
use super::planner::{QueryPlanner, select_queries};
use super::progress::ProgressObserver;
use super::retriever::ContentRetriever;
use super::types::{Learning, ResearchProgress, SourceRecord};
use crate::error::{ExtractionError, RetrievalError};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Turn a query into a URL-safe slug.
pub fn slug(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

/// Planner with per-topic scripted answers.
///
/// Topics without a script get `breadth` generated queries of the form
/// `"<first line of topic> / <n>"`, unless generation is disabled, in which
/// case they get none. Every answer goes through [`select_queries`].
pub struct ScriptedPlanner {
    scripts: HashMap<String, Vec<String>>,
    generate: bool,
    panicking: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedPlanner {
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            generate: true,
            panicking: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Only scripted topics produce queries.
    pub fn scripted_only() -> Self {
        Self {
            generate: false,
            ..Self::new()
        }
    }

    pub fn with_queries(mut self, topic: &str, queries: &[&str]) -> Self {
        self.scripts.insert(
            topic.to_string(),
            queries.iter().map(|q| q.to_string()).collect(),
        );
        self
    }

    /// Panic when asked to plan `topic`.
    pub fn panic_on(mut self, topic: &str) -> Self {
        self.panicking.insert(topic.to_string());
        self
    }

    /// Topics the planner has been asked about, in call order.
    pub fn topics(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

impl Default for ScriptedPlanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryPlanner for ScriptedPlanner {
    async fn generate_queries(
        &self,
        topic: &str,
        breadth: usize,
        _parent_learnings: &[Arc<Learning>],
        visited: &BTreeSet<String>,
    ) -> Vec<String> {
        lock(&self.calls).push(topic.to_string());
        if self.panicking.contains(topic) {
            panic!("scripted panic while planning '{}'", topic.lines().next().unwrap_or(topic));
        }

        let candidates = match self.scripts.get(topic) {
            Some(queries) => queries.clone(),
            None if self.generate => {
                let head = topic.lines().next().unwrap_or(topic);
                (1..=breadth).map(|i| format!("{head} / {i}")).collect()
            }
            None => Vec::new(),
        };
        select_queries(candidates, breadth, visited)
    }
}

// ---------------------------------------------------------------------------
// Retriever
// ---------------------------------------------------------------------------

/// Retriever serving fixed documents per query.
///
/// Unscripted queries get one generated document whose URL is derived from
/// the query. Tracks how many calls are running at once.
pub struct MockRetriever {
    documents: HashMap<String, Vec<SourceRecord>>,
    failing: HashSet<String>,
    latency: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MockRetriever {
    pub fn new() -> Self {
        Self {
            documents: HashMap::new(),
            failing: HashSet::new(),
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_documents(mut self, query: &str, documents: Vec<SourceRecord>) -> Self {
        self.documents.insert(query.to_string(), documents);
        self
    }

    pub fn fail_on(mut self, query: &str) -> Self {
        self.failing.insert(query.to_string());
        self
    }

    /// Simulated time each call takes (uses `tokio::time`, so paused clocks work).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn document_for(query: &str) -> SourceRecord {
        let slug = slug(query);
        SourceRecord::new(
            format!("https://mock.test/{slug}"),
            format!("About {query}"),
            format!("Reference material covering {query}."),
        )
    }
}

impl Default for MockRetriever {
    fn default() -> Self {
        Self::new()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContentRetriever for MockRetriever {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<SourceRecord>, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.failing.contains(query) {
            return Err(RetrievalError::Backend {
                message: format!("scripted failure for '{query}'"),
            });
        }

        let mut documents = self
            .documents
            .get(query)
            .cloned()
            .unwrap_or_else(|| vec![Self::document_for(query)]);
        documents.truncate(k);
        Ok(documents)
    }
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// Extractor producing one learning per document.
///
/// Each learning reads `"Finding on <query> from <url>"` and is attributed to
/// that document. Follow-ups are scripted per query or generated
/// (`default_follow_ups` of them, `"<query> follow-up <n>"`).
pub struct MockExtractor {
    follow_ups: HashMap<String, Vec<String>>,
    learnings: HashMap<String, Vec<Learning>>,
    default_follow_ups: usize,
    failing: HashSet<String>,
    panicking: HashSet<String>,
    latency: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self {
            follow_ups: HashMap::new(),
            learnings: HashMap::new(),
            default_follow_ups: 0,
            failing: HashSet::new(),
            panicking: HashSet::new(),
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_default_follow_ups(mut self, count: usize) -> Self {
        self.default_follow_ups = count;
        self
    }

    pub fn with_follow_ups(mut self, query: &str, follow_ups: &[&str]) -> Self {
        self.follow_ups.insert(
            query.to_string(),
            follow_ups.iter().map(|f| f.to_string()).collect(),
        );
        self
    }

    pub fn with_learnings(mut self, query: &str, learnings: Vec<Learning>) -> Self {
        self.learnings.insert(query.to_string(), learnings);
        self
    }

    pub fn fail_on(mut self, query: &str) -> Self {
        self.failing.insert(query.to_string());
        self
    }

    /// Panic while extracting `query`, to exercise branch isolation.
    pub fn panic_on(mut self, query: &str) -> Self {
        self.panicking.insert(query.to_string());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Default for MockExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LearningExtractor for MockExtractor {
    async fn extract(
        &self,
        query: &str,
        documents: &[SourceRecord],
        max_learnings: usize,
    ) -> Result<Extraction, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.panicking.contains(query) {
            panic!("scripted panic while extracting '{query}'");
        }
        if self.failing.contains(query) {
            return Err(ExtractionError::Backend {
                message: format!("scripted failure for '{query}'"),
            });
        }

        let learnings = match self.learnings.get(query) {
            Some(scripted) => scripted.clone(),
            None => documents
                .iter()
                .map(|d| Learning::with_source(format!("Finding on {query} from {}", d.url), &d.url))
                .collect(),
        };
        let follow_up_questions = match self.follow_ups.get(query) {
            Some(scripted) => scripted.clone(),
            None => (1..=self.default_follow_ups)
                .map(|i| format!("{query} follow-up {i}"))
                .collect(),
        };

        Ok(Extraction {
            learnings,
            follow_up_questions,
        }
        .normalized(max_learnings))
    }
}

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

/// Observer that keeps every snapshot it receives.
#[derive(Default)]
pub struct RecordingObserver {
    snapshots: Mutex<Vec<ResearchProgress>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<ResearchProgress> {
        lock(&self.snapshots).clone()
    }

    pub fn last(&self) -> Option<ResearchProgress> {
        lock(&self.snapshots).last().cloned()
    }
}

impl ProgressObserver for RecordingObserver {
    fn on_progress(&self, progress: ResearchProgress) {
        lock(&self.snapshots).push(progress);
    }
}
