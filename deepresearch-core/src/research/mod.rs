//! Recursive deep research engine.
//!
//! A traversal explores a tree of search queries:
//! 1. **Plan** - the [`QueryPlanner`] proposes up to `breadth` unseen queries
//! 2. **Retrieve** - the [`ContentRetriever`] fetches documents, skipping visited URLs
//! 3. **Extract** - the [`LearningExtractor`] distills learnings and follow-up questions
//! 4. **Recurse** - follow-ups seed a child node with reduced breadth and depth
//! 5. **Aggregate** - the [`ContextAggregator`] deduplicates and trims to a word budget
//!
//! Retrieval and extraction across the whole tree share one
//! [`ConcurrencyGate`]. Progress snapshots flow to a [`ProgressObserver`].

pub mod aggregator;
pub mod engine;
pub mod explorer;
pub mod extractor;
pub mod gate;
pub mod mock;
pub mod planner;
pub mod progress;
pub mod retriever;
pub mod types;

pub use aggregator::ContextAggregator;
pub use engine::{DeepResearcher, ReportWriter, ResearchOutcome};
pub use explorer::{TraversalContext, TreeExplorer};
pub use extractor::{Extraction, LearningExtractor, LlmLearningExtractor};
pub use gate::{ConcurrencyGate, GatePermit};
pub use planner::{LlmQueryPlanner, QueryPlanner};
pub use progress::{NoOpProgressObserver, ProgressObserver, ProgressTracker};
pub use retriever::ContentRetriever;
pub use types::{
    AggregatedResult, Learning, ResearchNode, ResearchProgress, SourceRecord, TraversalStats,
};
