//! Engine configuration.
//!
//! Every section has a `Default` carrying the production values and accepts
//! partial JSON (`#[serde(default)]`), so a config file only needs to name
//! what it overrides.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GroundError, GroundResult, ValidationError};

/// Result cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry lifetime in seconds.
    pub ttl_secs: u64,
    /// Maximum entries before FIFO eviction.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            max_entries: 256,
        }
    }
}

impl CacheConfig {
    /// Entry lifetime.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Execution engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Maximum sub-queries per batch.
    pub max_batch_size: usize,
    /// Timeout for each data-service call, in milliseconds.
    pub rpc_timeout_ms: u64,
    /// Row limit for `search` when the sub-query names none.
    pub default_search_limit: usize,
    /// Largest row limit a sub-query may request.
    pub max_search_limit: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 5,
            rpc_timeout_ms: 5_000,
            default_search_limit: 20,
            max_search_limit: 200,
        }
    }
}

impl ExecutionConfig {
    /// Per-call timeout.
    #[must_use]
    pub const fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

/// Comparison engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparisonConfig {
    /// `|percent|` below this is reported as flat (0.01 = 1%).
    pub flat_threshold: f64,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            flat_threshold: 0.01,
        }
    }
}

/// Insight generator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightConfig {
    /// Share of the total above which the top group is a concentration risk.
    pub concentration_share: f64,
    /// `|percent|` above which a comparison is a notable swing.
    pub swing_threshold: f64,
    /// Cap on insights returned.
    pub max_insights: usize,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            concentration_share: 0.40,
            swing_threshold: 0.20,
            max_insights: 8,
        }
    }
}

/// Grounding validator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundingConfig {
    /// Minimum share of a candidate's significant tokens found in one
    /// ground-truth name for a fuzzy match.
    pub min_token_overlap: f64,
    /// Relative tolerance when matching amounts (0.005 = 0.5%).
    pub amount_tolerance: f64,
    /// Groups listed in a repaired answer.
    pub max_repaired_entries: usize,
}

impl Default for GroundingConfig {
    fn default() -> Self {
        Self {
            min_token_overlap: 0.5,
            amount_tolerance: 0.005,
            max_repaired_entries: 10,
        }
    }
}

/// Drafting pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Tool invocations allowed before the drafter must answer.
    pub max_tool_rounds: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { max_tool_rounds: 3 }
    }
}

/// Complete engine configuration.
///
/// # Examples
///
/// ```
/// use groundql::EngineConfig;
///
/// let config = EngineConfig::from_json_str(r#"{"cache": {"ttl_secs": 60}}"#).unwrap();
/// assert_eq!(config.cache.ttl_secs, 60);
/// assert_eq!(config.cache.max_entries, 256);
/// assert_eq!(config.execution.max_batch_size, 5);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Result cache limits.
    pub cache: CacheConfig,
    /// Batch and data-service limits.
    pub execution: ExecutionConfig,
    /// Period-over-period settings.
    pub comparison: ComparisonConfig,
    /// Insight thresholds.
    pub insights: InsightConfig,
    /// Answer validation thresholds.
    pub grounding: GroundingConfig,
    /// Drafting loop limits.
    pub pipeline: PipelineConfig,
}

impl EngineConfig {
    /// Parses and validates a JSON config.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` on malformed JSON or out-of-range values.
    pub fn from_json_str(json: &str) -> GroundResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            field: "<root>".to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the file cannot be read, otherwise as
    /// [`EngineConfig::from_json_str`].
    pub fn from_path(path: impl AsRef<Path>) -> GroundResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| GroundError::internal(format!("failed to read config {}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns the first out-of-range field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        require(self.cache.max_entries > 0, "cache.max_entries", "must be at least 1")?;
        require(self.cache.ttl_secs > 0, "cache.ttl_secs", "must be at least 1")?;
        require(
            (1..=5).contains(&self.execution.max_batch_size),
            "execution.max_batch_size",
            "must be between 1 and 5",
        )?;
        require(self.execution.rpc_timeout_ms > 0, "execution.rpc_timeout_ms", "must be positive")?;
        require(
            self.execution.default_search_limit > 0
                && self.execution.default_search_limit <= self.execution.max_search_limit,
            "execution.default_search_limit",
            "must be between 1 and max_search_limit",
        )?;
        require(
            is_fraction(self.comparison.flat_threshold),
            "comparison.flat_threshold",
            "must be within [0, 1)",
        )?;
        require(
            self.insights.concentration_share > 0.0 && self.insights.concentration_share < 1.0,
            "insights.concentration_share",
            "must be within (0, 1)",
        )?;
        require(
            self.insights.swing_threshold > 0.0 && self.insights.swing_threshold.is_finite(),
            "insights.swing_threshold",
            "must be positive",
        )?;
        require(
            self.grounding.min_token_overlap > 0.0 && self.grounding.min_token_overlap <= 1.0,
            "grounding.min_token_overlap",
            "must be within (0, 1]",
        )?;
        require(
            is_fraction(self.grounding.amount_tolerance),
            "grounding.amount_tolerance",
            "must be within [0, 1)",
        )?;
        require(
            self.grounding.max_repaired_entries > 0,
            "grounding.max_repaired_entries",
            "must be at least 1",
        )?;
        require(self.pipeline.max_tool_rounds > 0, "pipeline.max_tool_rounds", "must be at least 1")?;
        Ok(())
    }
}

fn is_fraction(v: f64) -> bool {
    (0.0..1.0).contains(&v)
}

fn require(ok: bool, field: &str, reason: &str) -> Result<(), ValidationError> {
    if ok {
        Ok(())
    } else {
        Err(ValidationError::InvalidConfig {
            field: field.to_string(),
            reason: reason.to_string(),
        })
    }
}
