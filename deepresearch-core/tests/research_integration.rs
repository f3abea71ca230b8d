//! Integration tests for the deep research engine.
//!
//! These drive `DeepResearcher` end-to-end with the in-memory doubles from
//! `research::mock`, covering tree shape, failure isolation, the concurrency
//! bound, cancellation, progress reporting, and context trimming.

use deepresearch_core::brain::MockLlmProvider;
use deepresearch_core::config::ResearchConfig;
use deepresearch_core::error::{ConfigError, ResearchError};
use deepresearch_core::research::mock::{
    MockExtractor, MockRetriever, RecordingObserver, ScriptedPlanner,
};
use deepresearch_core::research::types::follow_up_topic;
use deepresearch_core::research::{
    DeepResearcher, Learning, LlmLearningExtractor, LlmQueryPlanner, ProgressObserver,
    ResearchProgress, SourceRecord,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn config(breadth: usize, depth: usize, concurrency: usize) -> ResearchConfig {
    ResearchConfig {
        breadth,
        depth,
        concurrency,
        ..Default::default()
    }
}

fn researcher(
    config: ResearchConfig,
    planner: ScriptedPlanner,
    retriever: MockRetriever,
    extractor: MockExtractor,
) -> DeepResearcher {
    DeepResearcher::new(
        config,
        Arc::new(planner),
        Arc::new(retriever),
        Arc::new(extractor),
    )
    .unwrap()
}

/// `count` distinct words, none shared with other prefixes.
fn words(prefix: &str, count: usize) -> String {
    (0..count)
        .map(|i| format!("{prefix}{i}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[tokio::test]
async fn test_two_queries_one_level() {
    let planner = ScriptedPlanner::scripted_only().with_queries("topic", &["a", "b"]);
    let engine = researcher(
        config(2, 1, 2),
        planner,
        MockRetriever::new(),
        MockExtractor::new(),
    );

    let outcome = engine.run("topic").await.unwrap();
    let result = &outcome.result;

    assert_eq!(result.learnings.len(), 2);
    assert_eq!(result.sources.len(), 2);
    assert_eq!(result.stats.max_depth_reached, 1);
    assert_eq!(result.stats.completed_queries, 2);
    assert_eq!(result.visited_urls.len(), 2);
    assert!(result.visited_urls.contains("https://mock.test/a"));
    assert!(result.visited_urls.contains("https://mock.test/b"));
}

#[tokio::test]
async fn test_failed_retrieval_is_contained() {
    let retriever = MockRetriever::new().fail_on("topic / 2");
    let extractor = MockExtractor::new().with_default_follow_ups(1);
    let engine = researcher(config(3, 2, 4), ScriptedPlanner::new(), retriever, extractor);

    let outcome = engine.run("topic").await.unwrap();
    let stats = outcome.result.stats;

    // Two surviving level-1 branches each expand into two level-2 queries.
    assert_eq!(stats.completed_queries, 3 + 2 * 2);
    assert_eq!(stats.failed_queries, 1);
    assert_eq!(stats.retrieval_failures, 1);
    assert_eq!(stats.max_depth_reached, 2);
    assert_eq!(outcome.result.learnings.len(), 2 + 4);
    assert!(
        outcome
            .result
            .learnings
            .iter()
            .all(|l| !l.text.contains("topic / 2 "))
    );
    assert_eq!(outcome.progress.completed_queries, 7);
    assert!(outcome.progress.total_queries >= outcome.progress.completed_queries);
}

#[tokio::test]
async fn test_context_keeps_whole_learnings_under_budget() {
    let planner = ScriptedPlanner::scripted_only().with_queries("topic", &["q"]);
    let extractor = MockExtractor::new().with_learnings(
        "q",
        vec![
            Learning::new(words("alpha", 30)),
            Learning::new(words("beta", 15)),
            Learning::new(words("gamma", 20)),
        ],
    );
    let engine = researcher(
        ResearchConfig {
            context_word_budget: 50,
            ..config(1, 1, 1)
        },
        planner,
        MockRetriever::new(),
        extractor,
    );

    let outcome = engine.run("topic").await.unwrap();
    let context = &outcome.result.context_text;

    assert_eq!(context.split_whitespace().count(), 45);
    assert!(context.contains("alpha29"));
    assert!(context.contains("beta14"));
    assert!(!context.contains("gamma"));
    // All distinct learnings are still reported.
    assert_eq!(outcome.result.learnings.len(), 3);
}

#[tokio::test]
async fn test_panicking_branch_does_not_cancel_siblings() {
    let extractor = MockExtractor::new().panic_on("topic / 2");
    let engine = researcher(
        config(4, 1, 2),
        ScriptedPlanner::new(),
        MockRetriever::new(),
        extractor,
    );

    let outcome = engine.run("topic").await.unwrap();
    let stats = outcome.result.stats;

    assert_eq!(stats.completed_queries, 4);
    assert_eq!(stats.panicked_branches, 1);
    assert_eq!(outcome.result.learnings.len(), 3);
}

#[tokio::test]
async fn test_panicking_child_planner_does_not_abort_traversal() {
    let child_topic = follow_up_topic("topic / 2", &["topic / 2 follow-up 1".to_string()]);
    let extractor = MockExtractor::new().with_default_follow_ups(1);
    let engine = researcher(
        config(3, 2, 2),
        ScriptedPlanner::new().panic_on(&child_topic),
        MockRetriever::new(),
        extractor,
    );

    let outcome = engine.run("topic").await.unwrap();
    let stats = outcome.result.stats;

    assert_eq!(stats.panicked_branches, 1);
    assert_eq!(stats.completed_queries, 3 + 2 * 2);
    // Level-1 learnings from all three branches plus four from the siblings' children.
    assert_eq!(outcome.result.learnings.len(), 7);
    assert_eq!(outcome.progress.completed_queries, 7);
}

#[tokio::test]
async fn test_panicking_observer_does_not_abort_traversal() {
    let observer: Arc<dyn ProgressObserver> = Arc::new(|p: ResearchProgress| {
        if p.current_query.as_deref() == Some("topic / 2") {
            panic!("observer failure");
        }
    });
    let engine = researcher(
        config(3, 1, 2),
        ScriptedPlanner::new(),
        MockRetriever::new(),
        MockExtractor::new(),
    )
    .with_observer(observer);

    let outcome = engine.run("topic").await.unwrap();

    assert_eq!(outcome.result.stats.completed_queries, 3);
    assert_eq!(outcome.result.stats.panicked_branches, 0);
    assert_eq!(outcome.result.learnings.len(), 3);
    assert_eq!(outcome.progress.completed_queries, 3);
}

#[tokio::test]
async fn test_extraction_failure_stops_branch_only() {
    let extractor = MockExtractor::new()
        .with_default_follow_ups(2)
        .fail_on("topic / 1");
    let engine = researcher(
        config(2, 2, 2),
        ScriptedPlanner::new(),
        MockRetriever::new(),
        extractor,
    );

    let outcome = engine.run("topic").await.unwrap();
    let stats = outcome.result.stats;

    // "topic / 1" fails and never expands; "topic / 2" expands into one child.
    assert_eq!(stats.extraction_failures, 1);
    assert_eq!(stats.completed_queries, 2 + 1);
    assert_eq!(outcome.result.learnings.len(), 2);
    assert!(
        outcome
            .result
            .learnings
            .iter()
            .all(|l| l.text.starts_with("Finding on topic / 2"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_gate_bounds_simultaneous_units() {
    let retriever = Arc::new(MockRetriever::new().with_latency(Duration::from_millis(100)));
    let extractor = Arc::new(
        MockExtractor::new()
            .with_default_follow_ups(1)
            .with_latency(Duration::from_millis(50)),
    );
    let engine = DeepResearcher::new(
        config(6, 3, 2),
        Arc::new(ScriptedPlanner::new()),
        retriever.clone(),
        extractor.clone(),
    )
    .unwrap();

    let outcome = engine.run("topic").await.unwrap();

    // The gate slot spans retrieval and extraction together.
    assert_eq!(outcome.peak_in_flight, 2);
    assert_eq!(retriever.peak_in_flight(), 2);
    assert!(extractor.peak_in_flight() <= 2);
    // 6 + 6 * 3 + 18 * 2 units, all retrieved and extracted through the gate.
    assert_eq!(retriever.calls(), 60);
    assert_eq!(extractor.calls(), 60);
    assert_eq!(outcome.result.stats.completed_queries, 60);
}

#[tokio::test(start_paused = true)]
async fn test_single_slot_serializes_whole_units() {
    let retriever = Arc::new(MockRetriever::new().with_latency(Duration::from_millis(30)));
    let extractor = Arc::new(MockExtractor::new().with_latency(Duration::from_millis(70)));
    let engine = DeepResearcher::new(
        config(5, 1, 1),
        Arc::new(ScriptedPlanner::new()),
        retriever.clone(),
        extractor.clone(),
    )
    .unwrap();

    let started = tokio::time::Instant::now();
    let outcome = engine.run("topic").await.unwrap();

    assert_eq!(outcome.peak_in_flight, 1);
    assert_eq!(retriever.peak_in_flight(), 1);
    assert_eq!(extractor.peak_in_flight(), 1);
    // No retrieval overlaps another unit's extraction.
    assert!(started.elapsed() >= Duration::from_millis(5 * 100));
    assert_eq!(outcome.result.learnings.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_returns_partial_result() {
    let retriever = MockRetriever::new().with_latency(Duration::from_millis(100));
    let extractor = MockExtractor::new().with_default_follow_ups(1);
    let engine = researcher(config(4, 2, 1), ScriptedPlanner::new(), retriever, extractor);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.cancel();
    });

    let outcome = engine
        .run_with_cancellation("topic", cancel)
        .await
        .unwrap();
    let stats = outcome.result.stats;

    assert!(outcome.cancelled);
    // Unit 1 finished before the signal; unit 2 was in flight and finished.
    assert_eq!(stats.completed_queries, 2);
    assert_eq!(outcome.result.learnings.len(), 2);
    // Units 3 and 4, plus the two children planned by unit 1, never ran.
    assert_eq!(stats.skipped_queries, 4);
    assert_eq!(outcome.progress.completed_queries, 2);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let engine = researcher(
        config(3, 2, 2),
        ScriptedPlanner::new(),
        MockRetriever::new(),
        MockExtractor::new(),
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = engine.run_with_cancellation("topic", cancel).await.unwrap();
    assert!(outcome.cancelled);
    assert!(outcome.result.is_empty());
    assert_eq!(outcome.result.stats.completed_queries, 0);
}

#[tokio::test]
async fn test_observer_sees_consistent_snapshots() {
    let observer = Arc::new(RecordingObserver::new());
    let extractor = MockExtractor::new().with_default_follow_ups(3);
    let engine = researcher(
        config(2, 3, 2),
        ScriptedPlanner::new(),
        MockRetriever::new(),
        extractor,
    )
    .with_observer(observer.clone());

    let outcome = engine.run("topic").await.unwrap();
    let snapshots = observer.snapshots();

    assert!(!snapshots.is_empty());
    for snapshot in &snapshots {
        assert!(snapshot.completed_queries <= snapshot.total_queries);
        assert_eq!(snapshot.total_depth, 3);
        assert_eq!(snapshot.total_breadth, 2);
    }
    let completed: Vec<usize> = snapshots.iter().map(|s| s.completed_queries).collect();
    assert!(completed.windows(2).all(|w| w[0] <= w[1]));

    let last = observer.last().unwrap();
    assert_eq!(last, outcome.progress);
    assert_eq!(
        last.completed_queries,
        outcome.result.stats.completed_queries
    );
    // 2 + 2 * 1 + 2 * 1 with halving breadth 2 -> 1 -> 1.
    assert_eq!(last.completed_queries, 6);
}

#[tokio::test]
async fn test_shared_urls_are_extracted_once() {
    let shared = SourceRecord::new("https://shared.test/doc", "Shared", "Same page");
    let retriever = MockRetriever::new()
        .with_documents("x", vec![shared.clone()])
        .with_documents("y", vec![shared]);
    let planner = ScriptedPlanner::scripted_only()
        .with_queries("topic", &["x"])
        .with_queries("x\nFollow-up directions:\n- y", &["y"]);
    let extractor = MockExtractor::new().with_follow_ups("x", &["y"]);
    let engine = researcher(config(1, 2, 1), planner, retriever, extractor);

    let outcome = engine.run("topic").await.unwrap();

    assert_eq!(outcome.result.stats.completed_queries, 2);
    assert_eq!(outcome.result.sources.len(), 1);
    assert_eq!(outcome.result.learnings.len(), 1);
}

#[tokio::test]
async fn test_llm_backed_adapters_end_to_end() {
    let planner_llm = Arc::new(MockLlmProvider::new());
    planner_llm.queue_response("1. \"tokio scheduler\"\n2. tokio scheduler\n3. async io drivers");
    let extractor_llm = Arc::new(MockLlmProvider::with_response(
        "LEARNING: Tokio schedules tasks with work stealing\nFOLLOW_UP: How is fairness handled?",
    ));

    let engine = DeepResearcher::new(
        config(3, 1, 2),
        Arc::new(LlmQueryPlanner::new(planner_llm.clone())),
        Arc::new(MockRetriever::new()),
        Arc::new(LlmLearningExtractor::new(extractor_llm.clone())),
    )
    .unwrap();

    let outcome = engine.run("tokio internals").await.unwrap();

    // The duplicate query is dropped; both extractions yield the same fact.
    assert_eq!(outcome.result.stats.completed_queries, 2);
    assert_eq!(outcome.result.sources.len(), 2);
    assert_eq!(outcome.result.learnings.len(), 1);
    assert_eq!(planner_llm.requests().len(), 1);
    assert_eq!(extractor_llm.requests().len(), 2);
}

#[test]
fn test_invalid_configuration_is_fatal() {
    for (field, cfg) in [
        ("breadth", config(0, 1, 1)),
        ("depth", config(1, 0, 1)),
        ("concurrency", config(1, 1, 0)),
    ] {
        let err = DeepResearcher::new(
            cfg,
            Arc::new(ScriptedPlanner::new()),
            Arc::new(MockRetriever::new()),
            Arc::new(MockExtractor::new()),
        )
        .err()
        .unwrap();
        assert!(
            matches!(err, ConfigError::Invalid { field: ref f, .. } if f == field),
            "unexpected error for {field}: {err}"
        );
    }
}

#[tokio::test]
async fn test_blank_topic_is_rejected() {
    let engine = researcher(
        config(1, 1, 1),
        ScriptedPlanner::new(),
        MockRetriever::new(),
        MockExtractor::new(),
    );
    let err = engine.run("\n\t ").await.unwrap_err();
    assert!(matches!(err, ResearchError::Config(ConfigError::Invalid { .. })));
}
