//! Conversation history and the compaction hook applied between agent steps.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{compact, is_already_compacted, is_compactable, row_count, CompactionConfig};

/// One entry of an agent conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Turn {
    /// Instructions or input handed to the agent
    User { content: String },
    /// The agent asked for a tool to be run
    ToolCall {
        call_id: String,
        tool: String,
        arguments: Value,
    },
    /// What the tool returned
    ToolResult {
        call_id: String,
        tool: String,
        content: Value,
    },
}

impl Turn {
    pub fn is_tool_result(&self) -> bool {
        matches!(self, Turn::ToolResult { .. })
    }
}

/// Transformation applied to the history before it is replayed to the agent
pub trait HistoryProcessor: Send + Sync {
    fn process(&self, history: Vec<Turn>) -> Vec<Turn>;
}

/// Replace every large, not-yet-compacted tool result with its compacted form.
///
/// The re-fetch key is taken from the originating tool call (its `query`
/// argument, or the full arguments when there is none).
pub fn compact_history(
    history: Vec<Turn>,
    min_rows_to_compact: usize,
    sample_size: usize,
) -> Vec<Turn> {
    let mut compacted = Vec::with_capacity(history.len());

    for (index, turn) in history.iter().enumerate() {
        let Turn::ToolResult {
            call_id,
            tool,
            content,
        } = turn
        else {
            compacted.push(turn.clone());
            continue;
        };

        if !is_compactable(content)
            || is_already_compacted(content)
            || row_count(content) < min_rows_to_compact
        {
            compacted.push(turn.clone());
            continue;
        }

        let key = originating_key(&history[..index], call_id);
        tracing::debug!(
            call_id = %call_id,
            rows = row_count(content),
            "Compacting tool result in history"
        );

        compacted.push(Turn::ToolResult {
            call_id: call_id.clone(),
            tool: tool.clone(),
            content: compact(content, &key, sample_size),
        });
    }

    compacted
}

fn originating_key(earlier: &[Turn], result_call_id: &str) -> String {
    earlier
        .iter()
        .rev()
        .find_map(|turn| match turn {
            Turn::ToolCall {
                call_id, arguments, ..
            } if call_id == result_call_id => Some(
                arguments
                    .get("query")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| arguments.to_string()),
            ),
            _ => None,
        })
        .unwrap_or_else(|| format!("call:{}", result_call_id))
}

/// [`HistoryProcessor`] that compacts tool results the agent has already seen
#[derive(Debug, Clone, Copy, Default)]
pub struct Compactor {
    config: CompactionConfig,
}

impl Compactor {
    pub fn new(config: CompactionConfig) -> Self {
        Self { config }
    }
}

impl HistoryProcessor for Compactor {
    fn process(&self, mut history: Vec<Turn>) -> Vec<Turn> {
        // Trailing tool results have not been reasoned over yet
        let fresh = if self.config.preserve_latest {
            let keep = history
                .iter()
                .rev()
                .take_while(|turn| turn.is_tool_result())
                .count();
            history.split_off(history.len() - keep)
        } else {
            Vec::new()
        };

        let mut processed = compact_history(
            history,
            self.config.min_rows_to_compact,
            self.config.sample_size,
        );
        processed.extend(fresh);
        processed
    }
}
