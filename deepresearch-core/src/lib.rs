//! # DeepResearch Core
//!
//! Recursive, breadth- and depth-bounded research over pluggable search and
//! LLM backends. Provides the traversal engine, the shared concurrency gate,
//! progress reporting, learning aggregation, configuration, and tracing setup.

pub mod brain;
pub mod config;
pub mod error;
pub mod research;
pub mod telemetry;

// Re-export commonly used types at the crate root.
pub use brain::{CompletionRequest, LlmProvider, MockLlmProvider};
pub use config::{BreadthPolicy, ResearchConfig, TelemetryConfig, load_config};
pub use error::{
    ConfigError, ExtractionError, LlmError, ResearchError, Result, RetrievalError,
};
pub use research::{
    AggregatedResult, ContentRetriever, DeepResearcher, Learning, LearningExtractor,
    ProgressObserver, QueryPlanner, ReportWriter, ResearchOutcome, ResearchProgress,
    SourceRecord, TraversalStats,
};
pub use telemetry::{TelemetryError, init_tracing};
