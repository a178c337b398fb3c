//! The answer-drafting capability.
//!
//! The language model is an untrusted collaborator behind one narrow call:
//! given the conversation so far and the single tool it may invoke, it
//! returns either final text or a tool invocation. Everything it returns is
//! validated before use.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::DrafterError;
use crate::query::QueryBatch;

/// Name of the query tool offered to the drafter.
pub const QUERY_TOOL_NAME: &str = "query_erp";

const SYSTEM_PROMPT: &str = "You answer business questions about ERP data. \
Call the query_erp tool to retrieve figures; never estimate them. \
Only mention names, amounts and periods that appear in the tool result. \
When a result is zero, say 0 explicitly. \
If the tool result carries a stateWarning, mention it.";

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Standing instructions.
    System,
    /// The person asking.
    User,
    /// The drafter itself.
    Assistant,
    /// Tool results and tool errors.
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// A message in the drafting conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who wrote it.
    pub role: Role,
    /// Plain text, or JSON for tool traffic.
    pub content: String,
}

/// The conversation handed to the drafter on each round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DraftPrompt {
    /// Messages in conversation order.
    pub messages: Vec<Message>,
}

impl DraftPrompt {
    /// A fresh conversation for `question`.
    #[must_use]
    pub fn new(question: &str) -> Self {
        Self {
            messages: vec![
                Message {
                    role: Role::System,
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: Role::User,
                    content: question.to_string(),
                },
            ],
        }
    }

    /// The user's question.
    #[must_use]
    pub fn question(&self) -> &str {
        self.messages
            .iter()
            .find(|m| m.role == Role::User)
            .map_or("", |m| m.content.as_str())
    }

    /// Records the drafter's tool invocation.
    pub fn push_tool_call(&mut self, name: &str, arguments: &serde_json::Value) {
        self.messages.push(Message {
            role: Role::Assistant,
            content: json!({ "tool": name, "arguments": arguments }).to_string(),
        });
    }

    /// Injects a tool result.
    pub fn push_tool_result(&mut self, result: &serde_json::Value) {
        self.messages.push(Message {
            role: Role::Tool,
            content: result.to_string(),
        });
    }

    /// Injects a tool error so the drafter can correct its call.
    pub fn push_tool_error(&mut self, error: &str) {
        self.messages.push(Message {
            role: Role::Tool,
            content: json!({ "success": false, "error": error }).to_string(),
        });
    }

    /// Number of tool results injected so far.
    #[must_use]
    pub fn tool_messages(&self) -> usize {
        self.messages.iter().filter(|m| m.role == Role::Tool).count()
    }
}

/// A tool the drafter may invoke, with a JSON-schema parameter description.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDeclaration {
    /// Name the drafter calls the tool by.
    pub name: String,
    /// What the tool does, for the model.
    pub description: String,
    /// JSON schema of the arguments.
    pub parameters: serde_json::Value,
}

impl ToolDeclaration {
    /// The query tool, accepting up to `max_queries` sub-queries.
    #[must_use]
    pub fn query_tool(max_queries: usize) -> Self {
        Self {
            name: QUERY_TOOL_NAME.to_string(),
            description: format!(
                "Run up to {max_queries} read-only sub-queries against the ERP in parallel. \
                 Describe filters in plain words (\"posted this month\", \"overdue\"); \
                 the engine translates them."
            ),
            parameters: json!({
                "type": "object",
                "required": ["queries"],
                "properties": {
                    "queries": {
                        "type": "array",
                        "minItems": 1,
                        "maxItems": max_queries,
                        "items": {
                            "type": "object",
                            "required": ["id", "entity", "operation"],
                            "properties": {
                                "id": { "type": "string" },
                                "entity": { "type": "string" },
                                "operation": {
                                    "type": "string",
                                    "enum": [
                                        "search", "count", "aggregate", "discover", "distinct", "inspect"
                                    ]
                                },
                                "filterText": { "type": "string" },
                                "explicitDateRange": {
                                    "type": "object",
                                    "required": ["start", "end"],
                                    "properties": {
                                        "start": { "type": "string", "format": "date" },
                                        "end": { "type": "string", "format": "date" },
                                        "label": { "type": "string" }
                                    }
                                },
                                "groupBy": { "type": "array", "items": { "type": "string" }, "maxItems": 3 },
                                "limit": { "type": "integer", "minimum": 1 },
                                "orderBy": { "type": "string" },
                                "compareMode": {
                                    "type": "string",
                                    "enum": ["month-over-month", "year-over-year"]
                                }
                            }
                        }
                    },
                    "includeComparison": { "type": "boolean" },
                    "includeInsights": { "type": "boolean" }
                }
            }),
        }
    }
}

/// What the drafter produced on one round.
#[derive(Debug, Clone, PartialEq)]
pub enum Draft {
    /// A candidate final answer.
    Text(String),
    /// A request to run a tool.
    ToolCall {
        /// Tool name.
        name: String,
        /// Raw arguments, validated by the caller.
        arguments: serde_json::Value,
    },
}

/// Parses tool arguments into a batch.
///
/// # Errors
///
/// Returns `DrafterError::MalformedToolCall` if the arguments do not
/// describe a batch.
pub fn parse_tool_arguments(arguments: &serde_json::Value) -> Result<QueryBatch, DrafterError> {
    QueryBatch::deserialize(arguments).map_err(|e| DrafterError::MalformedToolCall {
        message: e.to_string(),
    })
}

/// The language model as seen by the pipeline.
#[async_trait]
pub trait AnswerDrafter: Send + Sync {
    /// Produces the next step of the conversation.
    async fn draft(&self, prompt: &DraftPrompt, tool: &ToolDeclaration) -> Result<Draft, DrafterError>;

    /// Name for logs.
    fn name(&self) -> &str {
        "drafter"
    }
}

/// A drafter replaying a fixed script, one step per call.
///
/// Useful for tests and for replaying recorded conversations.
#[derive(Debug, Default)]
pub struct ScriptedDrafter {
    steps: Mutex<VecDeque<Result<Draft, DrafterError>>>,
    prompts: Mutex<Vec<DraftPrompt>>,
}

impl ScriptedDrafter {
    /// An empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step that returns text.
    #[must_use]
    pub fn then_text(self, text: impl Into<String>) -> Self {
        self.push(Ok(Draft::Text(text.into())))
    }

    /// Appends a step that invokes the query tool.
    #[must_use]
    pub fn then_query(self, arguments: serde_json::Value) -> Self {
        self.push(Ok(Draft::ToolCall {
            name: QUERY_TOOL_NAME.to_string(),
            arguments,
        }))
    }

    /// Appends a failing step.
    #[must_use]
    pub fn then_fail(self, error: DrafterError) -> Self {
        self.push(Err(error))
    }

    fn push(self, step: Result<Draft, DrafterError>) -> Self {
        self.steps
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(step);
        self
    }

    /// Prompts received so far, in call order.
    #[must_use]
    pub fn prompts(&self) -> Vec<DraftPrompt> {
        self.prompts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AnswerDrafter for ScriptedDrafter {
    async fn draft(&self, prompt: &DraftPrompt, _tool: &ToolDeclaration) -> Result<Draft, DrafterError> {
        self.prompts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(prompt.clone());
        self.steps
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| {
                Err(DrafterError::Unavailable {
                    message: "script exhausted".to_string(),
                })
            })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
