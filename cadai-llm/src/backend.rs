use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::catalog::ToolDefinition;
use crate::errors::LlmError;
use crate::types::{ChatMessage, ChatReply, ChatRequest, ToolCall};

pub const DEFAULT_OLLAMA_HOST: &str = "http://127.0.0.1:11434";
pub const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";

/// 聊天补全后端：一次同步请求，返回模型文本与所选工具调用。
pub trait ChatBackend {
    fn describe(&self) -> String;
    fn chat(&self, request: &ChatRequest) -> Result<ChatReply, LlmError>;
}

fn build_client(timeout: Option<Duration>) -> Result<reqwest::blocking::Client, LlmError> {
    let mut builder = reqwest::blocking::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().map_err(LlmError::Client)
}

fn normalize_endpoint(endpoint: Option<String>, default: &str) -> String {
    let mut host = endpoint
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| default.to_string());
    if !host.starts_with("http://") && !host.starts_with("https://") {
        host = format!("http://{host}");
    }
    host.trim_end_matches('/').to_string()
}

fn post_json<T: Serialize>(
    client: &reqwest::blocking::Client,
    url: &str,
    bearer: Option<&str>,
    body: &T,
) -> Result<String, LlmError> {
    let mut request = client.post(url).json(body);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }
    let response = request.send().map_err(|source| LlmError::Http {
        url: url.to_string(),
        source,
    })?;
    let status = response.status();
    let text = response.text().map_err(|source| LlmError::Http {
        url: url.to_string(),
        source,
    })?;
    if !status.is_success() {
        return Err(LlmError::Status {
            status: status.as_u16(),
            body: text,
        });
    }
    trace!(url, body = %text, "chat backend response");
    Ok(text)
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

impl WireToolCall {
    /// 参数可能是对象，也可能是 JSON 字符串（OpenAI 风格）。字符串会被解码，
    /// 其余形态原样保留，由命令分发拒绝单个调用。
    fn into_tool_call(self) -> ToolCall {
        let WireFunction { name, arguments } = self.function;
        let arguments = match arguments {
            Value::Null => Value::Object(Map::new()),
            Value::String(raw) if raw.trim().is_empty() => Value::Object(Map::new()),
            Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(decoded) => decoded,
                Err(err) => {
                    debug!(tool = %name, error = %err, "工具参数不是合法 JSON，原样保留");
                    Value::String(raw)
                }
            },
            other => other,
        };
        ToolCall { name, arguments }
    }
}

fn collect_calls(calls: Vec<WireToolCall>) -> Vec<ToolCall> {
    calls.into_iter().map(WireToolCall::into_tool_call).collect()
}

/// Ollama 原生 `/api/chat` 接口。
pub struct OllamaBackend {
    client: reqwest::blocking::Client,
    host: String,
}

#[derive(Serialize)]
struct OllamaChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    tools: &'a [ToolDefinition],
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

#[derive(Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

impl OllamaBackend {
    pub fn new(host: Option<String>, timeout: Option<Duration>) -> Result<Self, LlmError> {
        Ok(Self {
            client: build_client(timeout)?,
            host: normalize_endpoint(host, DEFAULT_OLLAMA_HOST),
        })
    }

    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }
}

impl ChatBackend for OllamaBackend {
    fn describe(&self) -> String {
        format!("ollama({})", self.host)
    }

    fn chat(&self, request: &ChatRequest) -> Result<ChatReply, LlmError> {
        let url = format!("{}/api/chat", self.host);
        debug!(url = %url, model = %request.model, "发送聊天请求");
        let body = OllamaChatBody {
            model: &request.model,
            messages: &request.messages,
            tools: &request.tools,
            stream: false,
        };
        let text = post_json(&self.client, &url, None, &body)?;
        parse_ollama_response(&text)
    }
}

pub(crate) fn parse_ollama_response(text: &str) -> Result<ChatReply, LlmError> {
    let response: OllamaChatResponse = serde_json::from_str(text)
        .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;
    Ok(ChatReply {
        content: response.message.content,
        tool_calls: collect_calls(response.message.tool_calls),
    })
}

/// OpenAI 兼容的 `/chat/completions` 接口（含各类本地推理服务）。
pub struct OpenAiBackend {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct OpenAiChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    tools: &'a [ToolDefinition],
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

impl OpenAiBackend {
    pub fn new(
        base_url: Option<String>,
        api_key: String,
        timeout: Option<Duration>,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: normalize_endpoint(base_url, DEFAULT_OPENAI_BASE),
            api_key,
        })
    }
}

impl ChatBackend for OpenAiBackend {
    fn describe(&self) -> String {
        format!("openai({})", self.base_url)
    }

    fn chat(&self, request: &ChatRequest) -> Result<ChatReply, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(url = %url, model = %request.model, "发送聊天请求");
        let body = OpenAiChatBody {
            model: &request.model,
            messages: &request.messages,
            tools: &request.tools,
        };
        let text = post_json(&self.client, &url, Some(&self.api_key), &body)?;
        parse_openai_response(&text)
    }
}

pub(crate) fn parse_openai_response(text: &str) -> Result<ChatReply, LlmError> {
    let response: OpenAiChatResponse = serde_json::from_str(text)
        .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;
    let Some(choice) = response.choices.into_iter().next() else {
        return Err(LlmError::InvalidResponse("no choices in response".to_string()));
    };
    Ok(ChatReply {
        content: choice.message.content.unwrap_or_default(),
        tool_calls: collect_calls(choice.message.tool_calls.unwrap_or_default()),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn ollama_tool_calls_are_parsed() {
        let body = json!({
            "model": "llama3",
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [
                    {"function": {"name": "draw_line", "arguments": {"start": [0, 0, 0], "end": [10, 10, 0]}}},
                    {"function": {"name": "draw_circle", "arguments": {"center": [5, 5, 0], "radius": 2}}}
                ]
            },
            "done": true
        });
        let reply = parse_ollama_response(&body.to_string()).unwrap();
        assert_eq!(reply.tool_calls.len(), 2);
        assert_eq!(reply.tool_calls[0].name, "draw_line");
        assert_eq!(reply.tool_calls[1].arguments["radius"], json!(2));
    }

    #[test]
    fn ollama_reply_without_tools_is_empty() {
        let body = json!({
            "message": {"role": "assistant", "content": "I can only draw things."},
            "done": true
        });
        let reply = parse_ollama_response(&body.to_string()).unwrap();
        assert!(reply.tool_calls.is_empty());
        assert_eq!(reply.content, "I can only draw things.");
    }

    #[test]
    fn openai_string_arguments_are_decoded() {
        let body = json!({
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "draw_point", "arguments": "{\"point\": [1, 2, 0]}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let reply = parse_openai_response(&body.to_string()).unwrap();
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].arguments["point"], json!([1, 2, 0]));
        assert!(reply.content.is_empty());
    }

    #[test]
    fn openai_null_tool_calls_mean_none() {
        let body = json!({
            "choices": [{"message": {"role": "assistant", "content": "hi", "tool_calls": null}}]
        });
        let reply = parse_openai_response(&body.to_string()).unwrap();
        assert!(reply.tool_calls.is_empty());
    }

    #[test]
    fn malformed_arguments_do_not_drop_sibling_calls() {
        let body = json!({
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [
                    {"function": {"name": "draw_line", "arguments": {"start": [0, 0, 0], "end": [10, 10, 0]}}},
                    {"function": {"name": "draw_point", "arguments": [1, 2, 0]}}
                ]
            },
            "done": true
        });
        let reply = parse_ollama_response(&body.to_string()).unwrap();
        assert_eq!(reply.tool_calls.len(), 2);
        assert_eq!(reply.tool_calls[0].arguments["end"], json!([10, 10, 0]));
        assert_eq!(reply.tool_calls[1].name, "draw_point");
        assert_eq!(reply.tool_calls[1].arguments, json!([1, 2, 0]));
    }

    #[test]
    fn undecodable_string_arguments_are_kept_verbatim() {
        let body = json!({
            "choices": [{"message": {"tool_calls": [
                {"function": {"name": "draw_point", "arguments": "[1, 2]"}},
                {"function": {"name": "draw_circle", "arguments": "{radius: 2"}},
                {"function": {"name": "draw_spline", "arguments": ""}}
            ]}}]
        });
        let reply = parse_openai_response(&body.to_string()).unwrap();
        assert_eq!(reply.tool_calls.len(), 3);
        assert_eq!(reply.tool_calls[0].arguments, json!([1, 2]));
        assert_eq!(reply.tool_calls[1].arguments, json!("{radius: 2"));
        assert_eq!(reply.tool_calls[2].arguments, json!({}));
    }

    #[test]
    fn invalid_body_is_reported() {
        assert!(matches!(
            parse_ollama_response("not json"),
            Err(LlmError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_openai_response(r#"{"choices": []}"#),
            Err(LlmError::InvalidResponse(_))
        ));
    }

    #[test]
    fn endpoints_are_normalized() {
        assert_eq!(normalize_endpoint(None, DEFAULT_OLLAMA_HOST), DEFAULT_OLLAMA_HOST);
        assert_eq!(
            normalize_endpoint(Some("localhost:11434/".to_string()), DEFAULT_OLLAMA_HOST),
            "http://localhost:11434"
        );
        assert_eq!(
            normalize_endpoint(Some("  ".to_string()), DEFAULT_OPENAI_BASE),
            DEFAULT_OPENAI_BASE
        );
        let backend = OllamaBackend::new(Some("https://gpu-box:11434".to_string()), None).unwrap();
        assert_eq!(backend.host(), "https://gpu-box:11434");
        assert_eq!(backend.describe(), "ollama(https://gpu-box:11434)");
    }
}
