//! The reasoning-engine seam.
//!
//! The driver only knows [`ReasoningEngine`]: given the conversation so far it
//! returns the next [`EngineReply`]. [`LlmEngine`] implements it on top of any
//! [`LlmProvider`], extracting a tool call from the model's free-text reply
//! with [`ActionParser`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::LlmError;
use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::tools::{Action, ActionKind};

/// Tool names recognised in the `name({...})` call form.
const TOOL_NAMES: [&str; 8] = [
    "run_command",
    "run_shell",
    "read_file",
    "write_file",
    "list_directory",
    "search_in_files",
    "search",
    "log_change",
];

/// What the reasoning engine asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineReply {
    /// Execute this action next.
    Action(Action),
    /// The engine considers the work done.
    Completion { summary: String },
    /// The engine tried to call a tool but the call is unusable.
    Invalid { reason: String },
}

/// Black-box source of the next step.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    /// Propose the next step for the given history.
    ///
    /// Errors are transport or credential faults; the driver treats them as
    /// fatal and never retries.
    async fn next_action(&self, history: &[Message]) -> Result<EngineReply, LlmError>;
}

/// A tool call found in free text, before argument validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawToolCall {
    pub name: String,
    pub arguments: Value,
    pub id: Option<String>,
}

/// Extracts tool calls from model replies.
///
/// Accepted forms, tried in order:
/// 1. a JSON object with `tool`/`arguments` (or `name`/`parameters`)
/// 2. `tool_name({...})`
/// 3. a fenced ```json block
#[derive(Debug, Clone, Default)]
pub struct ActionParser;

impl ActionParser {
    pub fn new() -> Self {
        Self
    }

    /// Classify a model reply.
    pub fn parse(&self, response: &str) -> EngineReply {
        let trimmed = response.trim();
        if trimmed.is_empty() {
            return EngineReply::Invalid {
                reason: "Empty reply: respond with one tool call or a completion summary"
                    .to_string(),
            };
        }

        let Some(call) = self.extract(trimmed) else {
            return EngineReply::Completion {
                summary: trimmed.to_string(),
            };
        };

        let wire = serde_json::json!({
            "tool": call.name,
            "arguments": call.arguments,
        });
        match serde_json::from_value::<ActionKind>(wire) {
            Ok(kind) => {
                let action = match call.id {
                    Some(id) if !id.is_empty() => Action::with_id(id, kind),
                    _ => Action::new(kind),
                };
                EngineReply::Action(action)
            }
            Err(e) => EngineReply::Invalid {
                reason: format!("Invalid call to tool '{}': {}", call.name, e),
            },
        }
    }

    /// Find the first tool call in `response`, if any.
    pub fn extract(&self, response: &str) -> Option<RawToolCall> {
        self.parse_json_format(response)
            .or_else(|| self.parse_function_format(response))
            .or_else(|| self.parse_code_block_format(response))
    }

    fn parse_json_format(&self, response: &str) -> Option<RawToolCall> {
        json_objects(response)
            .into_iter()
            .filter_map(|candidate| serde_json::from_str::<Value>(candidate).ok())
            .find_map(|value| tool_call_from_value(&value))
    }

    fn parse_function_format(&self, response: &str) -> Option<RawToolCall> {
        for tool_name in TOOL_NAMES {
            let pattern = format!("{}(", tool_name);
            let Some(start) = response.find(&pattern) else {
                continue;
            };
            let remaining = &response[start + pattern.len()..];
            if let Some(args) = json_objects(remaining).first() {
                if let Ok(arguments) = serde_json::from_str::<Value>(args) {
                    return Some(RawToolCall {
                        name: tool_name.to_string(),
                        arguments,
                        id: None,
                    });
                }
            }
        }
        None
    }

    fn parse_code_block_format(&self, response: &str) -> Option<RawToolCall> {
        let start = response.find("```json")? + "```json".len();
        let remaining = &response[start..];
        let end = remaining.find("```")?;
        let value = serde_json::from_str::<Value>(remaining[..end].trim()).ok()?;
        tool_call_from_value(&value)
    }
}

fn tool_call_from_value(value: &Value) -> Option<RawToolCall> {
    let empty = || Value::Object(serde_json::Map::new());
    let id = value.get("id").and_then(|v| v.as_str()).map(str::to_string);

    if let Some(name) = value.get("tool").and_then(|v| v.as_str()) {
        return Some(RawToolCall {
            name: name.to_string(),
            arguments: value.get("arguments").cloned().unwrap_or_else(empty),
            id,
        });
    }
    if let Some(name) = value.get("name").and_then(|v| v.as_str()) {
        let arguments = value
            .get("parameters")
            .or_else(|| value.get("args"))
            .or_else(|| value.get("arguments"))?
            .clone();
        return Some(RawToolCall {
            name: name.to_string(),
            arguments,
            id,
        });
    }
    None
}

/// Top-level `{...}` spans in `text`, skipping braces inside JSON strings.
fn json_objects(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        spans.push(&text[s..=i]);
                    }
                }
            }
            _ => {}
        }
    }
    spans
}

/// Reasoning engine backed by a chat-completions model.
pub struct LlmEngine {
    provider: Arc<dyn LlmProvider>,
    model: String,
    temperature: f64,
    max_tokens: u32,
    parser: ActionParser,
}

impl LlmEngine {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.1,
            max_tokens: 8192,
            parser: ActionParser::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ReasoningEngine for LlmEngine {
    async fn next_action(&self, history: &[Message]) -> Result<EngineReply, LlmError> {
        let request = GenerationRequest::new(&self.model, history.to_vec())
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);

        let response = self.provider.generate(request).await?;
        let content = response
            .first_content()
            .ok_or_else(|| LlmError::EmptyResponse(self.model.clone()))?;

        debug!(
            model = %response.model,
            completion_tokens = response.usage.completion_tokens,
            "Engine replied"
        );
        Ok(self.parser.parse(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Choice, GenerationResponse, Usage};
    use std::sync::Mutex;

    #[test]
    fn test_parse_json_tool_call() {
        let parser = ActionParser::new();
        let reply = parser.parse(
            r#"Let me look at the build file first.
{"tool": "read_file", "arguments": {"path": "pom.xml"}, "id": "call-1"}"#,
        );
        match reply {
            EngineReply::Action(action) => {
                assert_eq!(action.id, "call-1");
                assert_eq!(
                    action.kind,
                    ActionKind::ReadFile {
                        path: "pom.xml".to_string()
                    }
                );
            }
            other => panic!("expected action, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_name_parameters_form() {
        let parser = ActionParser::new();
        let reply = parser.parse(r#"{"name": "run_shell", "parameters": {"command": "mvn -q test"}}"#);
        match reply {
            EngineReply::Action(action) => {
                assert_eq!(action.kind.name(), "run_command");
                assert!(action.id.starts_with("act-"));
            }
            other => panic!("expected action, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_function_form() {
        let parser = ActionParser::new();
        let reply = parser.parse(r#"list_directory({"path": "src", "max_depth": 2})"#);
        assert!(matches!(
            reply,
            EngineReply::Action(Action {
                kind: ActionKind::ListDirectory {
                    max_depth: Some(2),
                    ..
                },
                ..
            })
        ));
    }

    #[test]
    fn test_parse_handles_braces_inside_strings() {
        let parser = ActionParser::new();
        let reply = parser.parse(
            r#"```json
{"tool": "write_file", "arguments": {"path": "A.java", "content": "class A { String s = \"}\"; }"}}
```"#,
        );
        match reply {
            EngineReply::Action(Action {
                kind: ActionKind::WriteFile { content, .. },
                ..
            }) => assert_eq!(content, "class A { String s = \"}\"; }"),
            other => panic!("expected write_file, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_text_is_completion() {
        let parser = ActionParser::new();
        let reply = parser.parse("Migration complete. All tests pass on Java 21.");
        assert_eq!(
            reply,
            EngineReply::Completion {
                summary: "Migration complete. All tests pass on Java 21.".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_tool_and_bad_arguments_are_invalid() {
        let parser = ActionParser::new();
        assert!(matches!(
            parser.parse(r#"{"tool": "format_disk", "arguments": {}}"#),
            EngineReply::Invalid { .. }
        ));
        match parser.parse(r#"{"tool": "write_file", "arguments": {"path": "A.java"}}"#) {
            EngineReply::Invalid { reason } => assert!(reason.contains("write_file")),
            other => panic!("expected invalid, got {:?}", other),
        }
        assert!(matches!(parser.parse("   "), EngineReply::Invalid { .. }));
    }

    struct CannedProvider {
        reply: String,
        seen: Mutex<Vec<GenerationRequest>>,
    }

    #[async_trait]
    impl LlmProvider for CannedProvider {
        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            self.seen.lock().unwrap().push(request);
            Ok(GenerationResponse {
                id: "resp-1".to_string(),
                model: "test-model".to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(self.reply.clone()),
                    finish_reason: "stop".to_string(),
                }],
                usage: Usage::default(),
            })
        }
    }

    #[tokio::test]
    async fn test_llm_engine_forwards_history() {
        let provider = Arc::new(CannedProvider {
            reply: r#"{"tool": "read_file", "arguments": {"path": "pom.xml"}}"#.to_string(),
            seen: Mutex::new(Vec::new()),
        });
        let engine = LlmEngine::new(provider.clone(), "test-model").with_temperature(0.0);

        let history = vec![Message::system("sys"), Message::user("go")];
        let reply = engine.next_action(&history).await.unwrap();
        assert!(matches!(reply, EngineReply::Action(_)));

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].model, "test-model");
        assert_eq!(seen[0].messages, history);
        assert_eq!(seen[0].temperature, Some(0.0));
    }
}
