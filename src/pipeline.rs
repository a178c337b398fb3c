//! Request orchestration.
//!
//! One user question flows through: drafter → tool invocation(s) → execution
//! engine → comparison → insights → drafter → grounding validation. The
//! pipeline owns no state across requests beyond the engine's shared cache.

use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::comparison::ComparisonEngine;
use crate::config::{EngineConfig, PipelineConfig};
use crate::engine::ExecutionEngine;
use crate::error::{DrafterError, GroundError, GroundResult};
use crate::grounding::GroundingValidator;
use crate::insight::{chart_data, InsightGenerator};
use crate::llm::{parse_tool_arguments, AnswerDrafter, Draft, DraftPrompt, ToolDeclaration};
use crate::query::QueryBatch;
use crate::result::{ToolResult, ValidationVerdict};

/// The final answer to a user question.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineAnswer {
    /// Text to show the user: the validated draft or the repaired answer.
    pub text: String,
    /// The drafter's own final text, when it produced one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft: Option<String>,
    /// Present when the answer was backed by retrieved data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<ValidationVerdict>,
    /// Every tool result of the conversation, combined.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,
    /// Tool invocations the drafter made, rejected ones included.
    pub tool_rounds: usize,
    /// True if the drafter failed and the answer was rebuilt from data.
    pub fallback: bool,
}

/// Runs questions end to end.
pub struct AnalyticsPipeline {
    engine: ExecutionEngine,
    comparison: ComparisonEngine,
    insights: InsightGenerator,
    validator: GroundingValidator,
    drafter: Arc<dyn AnswerDrafter>,
    config: PipelineConfig,
}

impl std::fmt::Debug for AnalyticsPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyticsPipeline")
            .field("engine", &self.engine)
            .field("drafter", &self.drafter.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AnalyticsPipeline {
    /// Wires the pipeline stages from one configuration.
    #[must_use]
    pub fn new(engine: ExecutionEngine, drafter: Arc<dyn AnswerDrafter>, config: &EngineConfig) -> Self {
        Self {
            engine,
            comparison: ComparisonEngine::new(config.comparison.clone()),
            insights: InsightGenerator::new(config.insights.clone()),
            validator: GroundingValidator::new(config.grounding.clone()),
            drafter,
            config: config.pipeline.clone(),
        }
    }

    /// The execution engine, for cache inspection.
    #[must_use]
    pub const fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    /// The grounding validator in use.
    #[must_use]
    pub const fn validator(&self) -> &GroundingValidator {
        &self.validator
    }

    /// Executes one tool invocation and assembles its result.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed batch. Sub-query failures
    /// are reported inside the result.
    #[instrument(skip(self, batch), fields(sub_queries = batch.queries.len()))]
    pub async fn execute_tool(&self, batch: &QueryBatch, now: NaiveDateTime) -> GroundResult<ToolResult> {
        let started = Instant::now();
        let outcome = self.engine.execute_batch(batch, now).await?;
        let comparisons = self.comparison.compare_batch(&self.engine, &outcome).await;
        let insights = if batch.include_insights {
            self.insights.generate(&outcome.results, &outcome.metrics, &comparisons)
        } else {
            Vec::new()
        };
        let charts = chart_data(&outcome.metrics, &comparisons);

        let successes: Vec<_> = outcome.results.iter().filter(|r| r.result.success).collect();
        let listing = successes.iter().find(|r| !r.operation.is_metric());
        let first_metric = outcome.metrics.first();
        let error = successes.is_empty().then(|| {
            outcome
                .results
                .iter()
                .map(|r| format!("{}: {}", r.id, r.result.error.as_deref().unwrap_or("failed")))
                .collect::<Vec<_>>()
                .join("; ")
        });

        let result = ToolResult {
            request_id: uuid::Uuid::new_v4(),
            success: !successes.is_empty(),
            data: listing.and_then(|r| r.result.records.clone()),
            count: first_metric
                .map(|m| m.count)
                .or_else(|| listing.and_then(|r| r.result.count)),
            total: first_metric.and_then(|m| m.total),
            grouped: first_metric
                .filter(|m| !m.grouped.is_empty())
                .map(|m| m.grouped.clone()),
            state_warning: outcome.results.iter().find_map(|r| r.result.state_warning.clone()),
            cached: !successes.is_empty() && successes.iter().all(|r| r.result.cached),
            comparison: comparisons.first().cloned(),
            comparisons: if comparisons.len() > 1 { comparisons } else { Vec::new() },
            metrics: outcome.metrics,
            results: outcome.results,
            insights,
            chart_data: charts,
            execution_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            query_metadata: outcome.metadata,
            error,
        };
        info!(
            request_id = %result.request_id,
            success = result.success,
            comparisons = result.all_comparisons().count(),
            insights = result.insights.len(),
            cached = result.cached,
            execution_ms = result.execution_ms,
            "tool result assembled"
        );
        Ok(result)
    }

    /// Answers `question`, validating the final draft against everything
    /// the conversation retrieved.
    ///
    /// # Errors
    ///
    /// Returns a drafter error only when no data had been retrieved yet;
    /// after a successful retrieval a failing drafter is replaced by the
    /// repaired answer.
    #[instrument(skip(self, question), fields(question_len = question.len()))]
    pub async fn answer(&self, question: &str, now: NaiveDateTime) -> GroundResult<PipelineAnswer> {
        let tool = ToolDeclaration::query_tool(self.engine.config().max_batch_size);
        let mut prompt = DraftPrompt::new(question);
        let mut retrieved: Vec<ToolResult> = Vec::new();
        let mut rounds = 0;

        loop {
            let draft = match self.drafter.draft(&prompt, &tool).await {
                Ok(draft) => draft,
                Err(err) => return self.fall_back(err, retrieved, rounds),
            };
            match draft {
                Draft::Text(text) => return Ok(self.finish(text, question, retrieved, rounds)),
                Draft::ToolCall { name, arguments } => {
                    if rounds >= self.config.max_tool_rounds {
                        let err = DrafterError::RoundLimit {
                            limit: self.config.max_tool_rounds,
                        };
                        return self.fall_back(err, retrieved, rounds);
                    }
                    rounds += 1;
                    prompt.push_tool_call(&name, &arguments);
                    if name != tool.name {
                        warn!(tool = %name, "drafter called an unknown tool");
                        prompt.push_tool_error(&format!("unknown tool '{name}', use '{}'", tool.name));
                        continue;
                    }
                    let batch = match parse_tool_arguments(&arguments) {
                        Ok(batch) => batch,
                        Err(err) => {
                            warn!(error = %err, "malformed tool arguments");
                            prompt.push_tool_error(&err.to_string());
                            continue;
                        }
                    };
                    match self.execute_tool(&batch, now).await {
                        Ok(result) => {
                            prompt.push_tool_result(&result.to_json());
                            retrieved.push(result);
                        }
                        Err(err) if err.is_validation() => {
                            warn!(error = %err, "tool batch rejected");
                            prompt.push_tool_error(&err.to_string());
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
        }
    }

    fn finish(
        &self,
        draft: String,
        question: &str,
        retrieved: Vec<ToolResult>,
        rounds: usize,
    ) -> PipelineAnswer {
        let combined = combine(retrieved);
        let verdict = combined
            .as_ref()
            .map(|result| self.validator.validate(&draft, result, question));
        let text = verdict
            .as_ref()
            .map_or_else(|| draft.clone(), |v| v.final_answer(&draft).to_string());
        info!(
            rounds,
            grounded = verdict.as_ref().map_or(true, |v| v.is_clean),
            "answer produced"
        );
        PipelineAnswer {
            text,
            draft: Some(draft),
            verdict,
            tool_result: combined,
            tool_rounds: rounds,
            fallback: false,
        }
    }

    fn fall_back(
        &self,
        err: DrafterError,
        retrieved: Vec<ToolResult>,
        rounds: usize,
    ) -> GroundResult<PipelineAnswer> {
        let Some(combined) = combine(retrieved).filter(|r| r.succeeded() > 0) else {
            return Err(GroundError::from(err));
        };
        warn!(error = %err, rounds, "drafter failed after retrieval, answering from data");
        Ok(PipelineAnswer {
            text: self.validator.repair(&combined),
            draft: None,
            verdict: None,
            tool_result: Some(combined),
            tool_rounds: rounds,
            fallback: true,
        })
    }
}

/// Folds every tool result of a conversation into one, so a final answer
/// may cite any of them. The first result's request id and top-level
/// mirrors are kept.
fn combine(results: Vec<ToolResult>) -> Option<ToolResult> {
    let mut iter = results.into_iter();
    let mut combined = iter.next()?;
    let mut comparisons: Vec<_> = combined.all_comparisons().cloned().collect();
    for next in iter {
        comparisons.extend(next.all_comparisons().cloned());
        combined.success |= next.success;
        combined.cached &= next.cached;
        combined.execution_ms += next.execution_ms;
        if combined.data.is_none() {
            combined.data = next.data;
        } else if let (Some(data), Some(more)) = (combined.data.as_mut(), next.data) {
            data.extend(more);
        }
        if combined.count.is_none() {
            combined.count = next.count;
            combined.total = next.total;
            combined.grouped = next.grouped;
        }
        if combined.state_warning.is_none() {
            combined.state_warning = next.state_warning;
        }
        if combined.error.is_none() {
            combined.error = next.error;
        }
        combined.metrics.extend(next.metrics);
        combined.results.extend(next.results);
        combined.insights.extend(next.insights);
        combined.chart_data.extend(next.chart_data);
        combined.query_metadata.extend(next.query_metadata);
    }
    combined.comparison = comparisons.first().cloned();
    combined.comparisons = if comparisons.len() > 1 { comparisons } else { Vec::new() };
    Some(combined)
}
