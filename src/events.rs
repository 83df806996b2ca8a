//! Parser for the agent's newline-delimited stream-json output.
//!
//! Each line is an independent JSON record with a `type` discriminator.
//! Parsing is a pure projection: one line in, one human-readable transcript
//! fragment (plus an optionally captured session id) out. Unparseable lines
//! pass through verbatim so no output is ever lost.

use serde::Deserialize;
use serde_json::Value;

/// Maximum rendered length for tool-call argument summaries.
const TOOL_ARG_PREVIEW_LEN: usize = 120;

/// Tool results at or under this many lines render in full.
const RESULT_FULL_MAX_LINES: usize = 6;

/// Lines shown before the "+N more lines" marker on long tool results.
const RESULT_PREVIEW_LINES: usize = 3;

/// One decoded progress record from the agent stream.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AgentEvent {
    /// Lifecycle record; the `init` subtype carries the session id.
    System {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    /// Assistant turn with zero or more content blocks.
    Assistant { message: StreamMessage },
    /// User turn wrapping a tool result.
    User { message: StreamMessage },
    /// Final summary record closing the stream.
    Result {
        #[serde(default)]
        result: Option<String>,
    },
}

/// Message body shared by assistant and user records.
#[derive(Debug, Deserialize)]
pub struct StreamMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

/// One content block within a message.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Free text from the assistant.
    Text { text: String },
    /// Tool invocation with a name and input fields.
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    /// Result of a prior tool invocation.
    ToolResult {
        #[serde(default)]
        content: ToolResultContent,
    },
    /// Block types this parser does not render (e.g. thinking).
    #[serde(other)]
    Other,
}

/// Tool-result content arrives either as a bare string or as text blocks.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Blocks(Vec<ToolResultBlock>),
}

impl Default for ToolResultContent {
    fn default() -> Self {
        ToolResultContent::Text(String::new())
    }
}

impl ToolResultContent {
    fn into_text(self) -> String {
        match self {
            ToolResultContent::Text(text) => text,
            ToolResultContent::Blocks(blocks) => blocks
                .into_iter()
                .map(|b| b.text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Text block inside structured tool-result content.
#[derive(Debug, Deserialize)]
pub struct ToolResultBlock {
    #[serde(default)]
    pub text: String,
}

/// Transcript fragment produced from one stream line.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LineUpdate {
    /// Text to append to the transcript. May be empty.
    pub fragment: String,
    /// Session id captured from an init record, if this line carried one.
    pub session_id: Option<String>,
}

/// Decodes one line of agent output into a transcript fragment.
///
/// Lines that do not decode as a known record are returned verbatim.
pub fn render_line(line: &str) -> LineUpdate {
    if line.trim().is_empty() {
        return LineUpdate::default();
    }

    match serde_json::from_str::<AgentEvent>(line) {
        Ok(event) => render_event(event),
        Err(_) => LineUpdate {
            fragment: format!("{}\n", line),
            session_id: None,
        },
    }
}

fn render_event(event: AgentEvent) -> LineUpdate {
    match event {
        AgentEvent::System {
            subtype,
            session_id,
        } => {
            if subtype.as_deref() == Some("init") {
                let fragment = session_id
                    .as_deref()
                    .map(|id| format!("[session {} started]\n", id))
                    .unwrap_or_default();
                LineUpdate {
                    fragment,
                    session_id,
                }
            } else {
                LineUpdate::default()
            }
        }
        AgentEvent::Assistant { message } => {
            let mut fragment = String::new();
            for block in message.content {
                match block {
                    ContentBlock::Text { text } => {
                        fragment.push_str(&text);
                        fragment.push('\n');
                    }
                    ContentBlock::ToolUse { name, input } => {
                        fragment.push_str(&summarize_tool_use(&name, &input));
                        fragment.push('\n');
                    }
                    ContentBlock::ToolResult { .. } | ContentBlock::Other => {}
                }
            }
            LineUpdate {
                fragment,
                session_id: None,
            }
        }
        AgentEvent::User { message } => {
            let mut fragment = String::new();
            for block in message.content {
                if let ContentBlock::ToolResult { content } = block {
                    fragment.push_str(&preview_tool_result(&content.into_text()));
                }
            }
            LineUpdate {
                fragment,
                session_id: None,
            }
        }
        AgentEvent::Result { result } => {
            let text = result.unwrap_or_default();
            LineUpdate {
                fragment: format!("\n--- result ---\n{}\n", text),
                session_id: None,
            }
        }
    }
}

/// Renders a compact one-line summary of a tool invocation.
fn summarize_tool_use(name: &str, input: &Value) -> String {
    // Most tools carry one field that identifies the invocation at a glance.
    const SUMMARY_KEYS: &[&str] = &[
        "command",
        "file_path",
        "path",
        "pattern",
        "query",
        "url",
        "description",
        "prompt",
    ];

    let detail = SUMMARY_KEYS
        .iter()
        .find_map(|key| input.get(key).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| match input {
            Value::Object(map) if map.is_empty() => String::new(),
            Value::Null => String::new(),
            other => other.to_string(),
        });

    let detail = truncate_chars(&detail, TOOL_ARG_PREVIEW_LEN);
    if detail.is_empty() {
        format!("[tool] {}", name)
    } else {
        format!("[tool] {}: {}", name, detail)
    }
}

/// Renders an abbreviated preview of a tool result.
///
/// Full content at six lines or fewer, otherwise the first three lines plus
/// a marker counting the remainder.
fn preview_tool_result(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= RESULT_FULL_MAX_LINES {
        let mut out = text.trim_end_matches('\n').to_string();
        out.push('\n');
        return out;
    }

    let mut out = lines[..RESULT_PREVIEW_LINES].join("\n");
    out.push_str(&format!(
        "\n... +{} more lines\n",
        lines.len() - RESULT_PREVIEW_LINES
    ));
    out
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push_str("...");
    out
}
