//! Generation capability: the [`Generator`] trait, the HTTP-backed
//! implementation, and strict parsers for the JSON payloads roles are
//! expected to return.
//!
//! Network conditions (5xx, timeout, connection refused) surface as
//! retryable [`GenerationError`] variants; anything the endpoint returns
//! that fails to parse is `Malformed` and is never retried.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::errors::GenerationError;
use crate::model::TaskPriority;

pub mod retry;

pub use retry::{with_retry, RetryPolicy};

/// Something that can turn a prompt into raw model output.
///
/// The trait seam exists so the engine and orchestrator can be driven by
/// a scripted generator in tests.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// OpenAI-compatible chat-completions client.
pub struct HttpGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl HttpGenerator {
    pub fn new(
        endpoint: String,
        model: String,
        api_key: String,
        timeout: std::time::Duration,
    ) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::Connect {
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            endpoint,
            model,
            api_key,
        })
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        debug!(endpoint = %self.endpoint, model = %self.model, "sending generation request");
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": [{"role": "user", "content": prompt}],
            }))
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                code: status.as_u16(),
                message,
            });
        }

        let body: ChatResponse = resp.json().await.map_err(|e| GenerationError::Malformed {
            message: format!("unparseable completion response: {}", e),
        })?;
        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| GenerationError::Malformed {
                message: "completion response contained no choices".into(),
            })
    }
}

fn classify_transport_error(err: reqwest::Error) -> GenerationError {
    if err.is_timeout() {
        GenerationError::Timeout
    } else if err.is_connect() {
        GenerationError::Connect {
            message: err.to_string(),
        }
    } else if let Some(status) = err.status() {
        GenerationError::Status {
            code: status.as_u16(),
            message: err.to_string(),
        }
    } else {
        GenerationError::Connect {
            message: err.to_string(),
        }
    }
}

/// One task as proposed by the generation endpoint, before ids and
/// ordinals are assigned.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_priority")]
    pub priority: TaskPriority,
}

fn default_priority() -> TaskPriority {
    TaskPriority::Medium
}

/// One story as proposed during backlog decomposition.
#[derive(Debug, Clone, Deserialize)]
pub struct StoryDraft {
    pub title: String,
    #[serde(default)]
    pub narrative: String,
    #[serde(default = "default_points")]
    pub points: u32,
}

fn default_points() -> u32 {
    3
}

/// One epic with its stories, as proposed during backlog decomposition.
#[derive(Debug, Clone, Deserialize)]
pub struct EpicDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub stories: Vec<StoryDraft>,
}

/// Parse a task list from raw model output: either a bare JSON array or
/// an object with a `tasks` field. Extra prose around the JSON is
/// tolerated; malformed JSON inside it is not.
pub fn parse_task_drafts(raw: &str) -> Result<Vec<TaskDraft>, GenerationError> {
    let value = extract_json(raw)?;
    let array = match &value {
        serde_json::Value::Array(items) => items.clone(),
        serde_json::Value::Object(map) => map
            .get("tasks")
            .and_then(|v| v.as_array())
            .cloned()
            .ok_or_else(|| GenerationError::Malformed {
                message: "expected a task array or an object with a 'tasks' field".into(),
            })?,
        _ => {
            return Err(GenerationError::Malformed {
                message: "expected a JSON array of tasks".into(),
            })
        }
    };
    array
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            serde_json::from_value(item).map_err(|e| GenerationError::Malformed {
                message: format!("task {} failed to parse: {}", i + 1, e),
            })
        })
        .collect()
}

/// Parse the epic/story backlog from raw model output: an object with an
/// `epics` field.
pub fn parse_backlog(raw: &str) -> Result<Vec<EpicDraft>, GenerationError> {
    let value = extract_json(raw)?;
    let epics = value
        .get("epics")
        .and_then(|v| v.as_array())
        .cloned()
        .ok_or_else(|| GenerationError::Malformed {
            message: "expected an object with an 'epics' array".into(),
        })?;
    if epics.is_empty() {
        return Err(GenerationError::Malformed {
            message: "backlog contained no epics".into(),
        });
    }
    epics
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            serde_json::from_value(item).map_err(|e| GenerationError::Malformed {
                message: format!("epic {} failed to parse: {}", i + 1, e),
            })
        })
        .collect()
}

/// Parse a typed payload from raw model output that may wrap the JSON in
/// prose.
pub fn parse_payload<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, GenerationError> {
    let value = extract_json(raw)?;
    serde_json::from_value(value).map_err(|e| GenerationError::Malformed {
        message: format!("payload failed to parse: {}", e),
    })
}

/// Extract the first complete JSON value (object or array) from text that
/// may contain prose around it.
fn extract_json(text: &str) -> Result<serde_json::Value, GenerationError> {
    let start = text
        .find(['{', '['])
        .ok_or_else(|| GenerationError::Malformed {
            message: "no JSON found in model output".into(),
        })?;
    let open = text.as_bytes()[start] as char;
    let close = if open == '{' { '}' } else { ']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    let slice = &text[start..start + i + 1];
                    return serde_json::from_str(slice).map_err(|e| GenerationError::Malformed {
                        message: format!("invalid JSON in model output: {}", e),
                    });
                }
            }
            _ => {}
        }
    }
    Err(GenerationError::Malformed {
        message: "unterminated JSON in model output".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_task_array() {
        let drafts = parse_task_drafts(
            r#"[{"title": "Add login", "description": "d", "priority": "high"}]"#,
        )
        .unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].title, "Add login");
        assert_eq!(drafts[0].priority, TaskPriority::High);
    }

    #[test]
    fn parses_wrapped_task_object_with_surrounding_prose() {
        let raw = r#"Here are the tasks:
            {"tasks": [{"title": "Set up schema"}, {"title": "Wire handler"}]}
            Let me know if you need more."#;
        let drafts = parse_task_drafts(raw).unwrap();
        assert_eq!(drafts.len(), 2);
        assert_eq!(
            drafts[0].priority,
            TaskPriority::Medium,
            "missing priority defaults to medium"
        );
    }

    #[test]
    fn malformed_task_json_is_rejected() {
        let err = parse_task_drafts(r#"[{"title": "unterminated"#).unwrap_err();
        assert!(matches!(err, GenerationError::Malformed { .. }));
        assert!(!err.is_retryable(), "malformed output must never be retried");
    }

    #[test]
    fn non_array_task_payload_is_rejected() {
        let err = parse_task_drafts(r#"{"not_tasks": true}"#).unwrap_err();
        assert!(matches!(err, GenerationError::Malformed { .. }));
    }

    #[test]
    fn parses_backlog_with_nested_stories() {
        let raw = r#"{"epics": [
            {"title": "Auth", "description": "d", "stories": [
                {"title": "Login", "narrative": "As a user", "points": 5},
                {"title": "Logout"}
            ]}
        ]}"#;
        let epics = parse_backlog(raw).unwrap();
        assert_eq!(epics.len(), 1);
        assert_eq!(epics[0].stories.len(), 2);
        assert_eq!(epics[0].stories[0].points, 5);
        assert_eq!(epics[0].stories[1].points, 3, "points default to 3");
    }

    #[test]
    fn empty_backlog_is_rejected() {
        let err = parse_backlog(r#"{"epics": []}"#).unwrap_err();
        assert!(matches!(err, GenerationError::Malformed { .. }));
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_extraction() {
        let raw = r#"noise [{"title": "Handle } in input", "description": "{\"quoted\"}"}] trailing"#;
        let drafts = parse_task_drafts(raw).unwrap();
        assert_eq!(drafts[0].title, "Handle } in input");
    }
}
