//! # GroundQL - Grounded Analytics over ERP Data Services
//!
//! GroundQL sits between a language-model agent and an ERP's read API. The
//! agent proposes a batch of structured sub-queries with natural-language
//! filters; GroundQL translates, executes, merges and compares them, and then
//! checks the agent's drafted answer against the numbers it actually
//! retrieved before the answer reaches a user.
//!
//! ## Core Concepts
//!
//! - **Domain filter**: a structured predicate list built from phrases such as
//!   "overdue invoices last month"
//! - **Sub-query**: one read (search, count, aggregate, ...) against an entity
//! - **Batch**: up to five sub-queries executed concurrently, merged per metric
//! - **Grounding**: every name, amount and period in an answer must trace back
//!   to retrieved data, or the answer is rebuilt from that data
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use groundql::{
//!     AnalyticsPipeline, EngineConfig, EntityRegistry, ExecutionEngine, InMemoryDataService, ResultCache,
//! };
//!
//! let config = EngineConfig::from_path("groundql.json")?;
//! let engine = ExecutionEngine::new(
//!     Arc::new(EntityRegistry::odoo()),
//!     Arc::new(InMemoryDataService::new()),
//!     Arc::new(ResultCache::new(&config.cache)),
//!     config.execution.clone(),
//! );
//! let pipeline = AnalyticsPipeline::new(engine, drafter, &config);
//! let answer = pipeline.answer("sales by customer this month", now).await?;
//! println!("{}", answer.text);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod config;
pub mod error;
pub mod query;
pub mod result;
pub mod schema;
pub mod time;
pub mod value;

// Translation, caching and data access
pub mod cache;
pub mod filter;
pub mod service;

// Execution and enrichment
pub mod comparison;
pub mod engine;
pub mod insight;

// Answer drafting and validation
pub mod grounding;
pub mod llm;
pub mod pipeline;

// Re-export primary types at crate root for convenience
pub use cache::{CacheKey, CacheStats, ResultCache};
pub use config::EngineConfig;
pub use error::{DrafterError, ExecutionError, GroundError, GroundResult, ServiceError, ValidationError};
pub use filter::{DomainFilter, FilterTranslator, Operator, Predicate, Translation};
pub use query::{CompareMode, ExplicitDateRange, Operation, QueryBatch, SubQuerySpec};
pub use result::{
    ComparisonResult, GroupBucket, Grouped, Insight, MergedMetric, QueryResult, SubQueryResult, ToolResult,
    ValidationVerdict,
};
pub use schema::{EntityRegistry, EntitySchema};
pub use time::DateWindow;
pub use value::Value;

pub use comparison::ComparisonEngine;
pub use engine::{BatchOutcome, ExecutionEngine};
pub use grounding::GroundingValidator;
pub use insight::InsightGenerator;
pub use llm::{AnswerDrafter, Draft, DraftPrompt, ToolDeclaration};
pub use pipeline::{AnalyticsPipeline, PipelineAnswer};
pub use service::{DataService, InMemoryDataService};
