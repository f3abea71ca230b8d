//! Configuration system for the research engine.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> explicit overrides. Configuration is
//! loaded from `~/.config/deepresearch/config.toml` and/or
//! `.deepresearch/config.toml` in the workspace directory.

use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How the breadth shrinks from one recursion level to the next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreadthPolicy {
    /// Halve the breadth at each level (rounding up, never below 1).
    #[default]
    Halve,
    /// Keep the root breadth at every level.
    Constant,
}

impl BreadthPolicy {
    /// Breadth to use one level below a node explored with `breadth`.
    pub fn next(self, breadth: usize) -> usize {
        match self {
            BreadthPolicy::Halve => breadth.div_ceil(2).max(1),
            BreadthPolicy::Constant => breadth.max(1),
        }
    }
}

/// Tuning knobs for a single deep research traversal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    /// Number of sibling sub-queries planned at the root level.
    pub breadth: usize,
    /// Number of recursive levels, including the root level.
    pub depth: usize,
    /// Maximum number of retrieval/extraction units running at once.
    pub concurrency: usize,
    /// Upper bound on learnings the extractor may return per query.
    pub max_learnings_per_node: usize,
    /// Word budget for the aggregated context handed to the writer.
    pub context_word_budget: usize,
    /// Number of documents requested from the retriever per query.
    pub documents_per_query: usize,
    /// Breadth reduction applied when recursing.
    pub breadth_policy: BreadthPolicy,
    /// Timeout for each retrieval and each extraction call. `0` disables it.
    pub unit_timeout_secs: u64,
    /// Source excerpts longer than this are cut at a character boundary.
    pub max_excerpt_chars: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            breadth: 4,
            depth: 2,
            concurrency: 4,
            max_learnings_per_node: 5,
            context_word_budget: 25_000,
            documents_per_query: 5,
            breadth_policy: BreadthPolicy::Halve,
            unit_timeout_secs: 120,
            max_excerpt_chars: 4_000,
        }
    }
}

impl ResearchConfig {
    /// Reject configurations that cannot drive a traversal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("breadth", self.breadth),
            ("depth", self.depth),
            ("concurrency", self.concurrency),
            ("max_learnings_per_node", self.max_learnings_per_node),
            ("context_word_budget", self.context_word_budget),
            ("documents_per_query", self.documents_per_query),
        ];
        for (field, value) in required {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be at least 1"));
            }
        }
        Ok(())
    }

    /// Breadth declared for each level, root first.
    pub fn level_breadths(&self) -> Vec<usize> {
        let mut breadth = self.breadth;
        let mut levels = Vec::with_capacity(self.depth);
        for _ in 0..self.depth {
            levels.push(breadth);
            breadth = self.breadth_policy.next(breadth);
        }
        levels
    }

    /// Pre-traversal estimate of the number of queries: the sum of the
    /// declared breadth per level.
    pub fn estimated_total_queries(&self) -> usize {
        self.level_breadths().iter().sum()
    }

    pub fn unit_timeout(&self) -> Option<std::time::Duration> {
        (self.unit_timeout_secs > 0).then(|| std::time::Duration::from_secs(self.unit_timeout_secs))
    }
}

/// Logging setup used by [`crate::telemetry::init_tracing`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive for the human-readable stderr layer.
    pub filter: String,
    /// Directory for daily-rotated JSON logs. Disabled when `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_log_dir: Option<PathBuf>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json_log_dir: None,
        }
    }
}

/// Load configuration with layered merging, then validate it.
///
/// Order (later wins): built-in defaults, user-level `config.toml`,
/// workspace `.deepresearch/config.toml`, `DEEPRESEARCH_*` environment
/// variables, explicit overrides.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&ResearchConfig>,
) -> Result<ResearchConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(ResearchConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("dev", "deepresearch", "deepresearch")
    {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".deepresearch").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // DEEPRESEARCH_BREADTH, DEEPRESEARCH_CONCURRENCY, ...
    figment = figment.merge(Env::prefixed("DEEPRESEARCH_"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: ResearchConfig = figment.extract()?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ResearchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.breadth_policy, BreadthPolicy::Halve);
    }

    #[test]
    fn test_validate_rejects_zero_fields() {
        for field in ["breadth", "depth", "concurrency"] {
            let mut config = ResearchConfig::default();
            match field {
                "breadth" => config.breadth = 0,
                "depth" => config.depth = 0,
                _ => config.concurrency = 0,
            }
            let err = config.validate().unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { field: ref f, .. } if f == field),
                "unexpected error for {field}: {err}"
            );
        }
    }

    #[test]
    fn test_breadth_policy_next() {
        assert_eq!(BreadthPolicy::Halve.next(4), 2);
        assert_eq!(BreadthPolicy::Halve.next(3), 2);
        assert_eq!(BreadthPolicy::Halve.next(1), 1);
        assert_eq!(BreadthPolicy::Constant.next(3), 3);
    }

    #[test]
    fn test_estimated_total_queries() {
        let config = ResearchConfig {
            breadth: 4,
            depth: 3,
            ..Default::default()
        };
        assert_eq!(config.level_breadths(), vec![4, 2, 1]);
        assert_eq!(config.estimated_total_queries(), 7);

        let constant = ResearchConfig {
            breadth: 3,
            depth: 2,
            breadth_policy: BreadthPolicy::Constant,
            ..Default::default()
        };
        assert_eq!(constant.estimated_total_queries(), 6);
    }

    #[test]
    fn test_unit_timeout_zero_disables() {
        let config = ResearchConfig {
            unit_timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.unit_timeout().is_none());
    }

    #[test]
    fn test_load_config_with_overrides() {
        let overrides = ResearchConfig {
            breadth: 7,
            concurrency: 2,
            ..Default::default()
        };
        let config = load_config(None, Some(&overrides)).unwrap();
        assert_eq!(config.breadth, 7);
        assert_eq!(config.concurrency, 2);
    }

    #[test]
    fn test_load_config_from_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join(".deepresearch");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("config.toml"),
            r#"
breadth = 6
depth = 3
breadth_policy = "constant"
context_word_budget = 800
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.breadth, 6);
        assert_eq!(config.depth, 3);
        assert_eq!(config.breadth_policy, BreadthPolicy::Constant);
        assert_eq!(config.context_word_budget, 800);
        assert_eq!(config.documents_per_query, 5);
    }

    #[test]
    fn test_load_config_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join(".deepresearch");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join("config.toml"), "concurrency = 0\n").unwrap();

        let err = load_config(Some(dir.path()), None).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
