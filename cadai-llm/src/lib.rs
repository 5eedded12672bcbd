pub mod backend;

pub mod errors {
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum LlmError {
        #[error("failed to build http client: {0}")]
        Client(#[source] reqwest::Error),
        #[error("failed to reach chat backend at {url}: {source}")]
        Http {
            url: String,
            #[source]
            source: reqwest::Error,
        },
        #[error("chat backend returned http {status}: {body}")]
        Status { status: u16, body: String },
        #[error("chat backend returned an invalid response: {0}")]
        InvalidResponse(String),
        #[error("api key environment variable {0} is not set")]
        MissingApiKey(String),
    }
}

pub mod types {
    use serde::{Deserialize, Serialize};
    use serde_json::Value;

    use crate::catalog::ToolDefinition;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Role {
        User,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct ChatMessage {
        pub role: Role,
        pub content: String,
    }

    impl ChatMessage {
        pub fn user(content: impl Into<String>) -> Self {
            Self {
                role: Role::User,
                content: content.into(),
            }
        }
    }

    /// 模型选择的一次工具调用。参数保持模型给出的原样（通常是对象），
    /// 由下游分发负责拒绝非法参数。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct ToolCall {
        pub name: String,
        pub arguments: Value,
    }

    /// 发往聊天补全后端的请求。
    #[derive(Debug, Clone, Serialize)]
    pub struct ChatRequest {
        pub model: String,
        pub messages: Vec<ChatMessage>,
        pub tools: Vec<ToolDefinition>,
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct ChatReply {
        pub content: String,
        pub tool_calls: Vec<ToolCall>,
    }
}

pub mod catalog {
    use serde::Serialize;
    use serde_json::{Value, json};

    /// 与调度循环可执行的命令一一对应的工具名。
    pub const TOOL_NAMES: [&str; 5] = [
        "draw_line",
        "draw_circle",
        "draw_point",
        "draw_arc",
        "draw_spline",
    ];

    #[derive(Debug, Clone, PartialEq, Serialize)]
    pub struct ToolDefinition {
        #[serde(rename = "type")]
        pub kind: &'static str,
        pub function: FunctionDefinition,
    }

    #[derive(Debug, Clone, PartialEq, Serialize)]
    pub struct FunctionDefinition {
        pub name: &'static str,
        pub description: &'static str,
        pub parameters: Value,
    }

    fn function(name: &'static str, description: &'static str, parameters: Value) -> ToolDefinition {
        ToolDefinition {
            kind: "function",
            function: FunctionDefinition {
                name,
                description,
                parameters,
            },
        }
    }

    fn point_schema() -> Value {
        json!({"type": "array", "items": {"type": "number"}, "description": "[x, y, z]"})
    }

    /// 固定的工具目录，声明名称、描述与参数类型。
    pub fn tool_catalog() -> Vec<ToolDefinition> {
        vec![
            function(
                "draw_line",
                "Draw a line in AutoCAD",
                json!({
                    "type": "object",
                    "properties": {"start": point_schema(), "end": point_schema()},
                    "required": ["start", "end"],
                }),
            ),
            function(
                "draw_circle",
                "Draw a circle in AutoCAD",
                json!({
                    "type": "object",
                    "properties": {"center": point_schema(), "radius": {"type": "number"}},
                    "required": ["center", "radius"],
                }),
            ),
            function(
                "draw_point",
                "Draw a point in AutoCAD",
                json!({
                    "type": "object",
                    "properties": {"point": point_schema()},
                    "required": ["point"],
                }),
            ),
            function(
                "draw_arc",
                "Draw an arc in AutoCAD; angles are in degrees, counter-clockwise from +X",
                json!({
                    "type": "object",
                    "properties": {
                        "center": point_schema(),
                        "radius": {"type": "number"},
                        "start_angle": {"type": "number", "description": "degrees"},
                        "end_angle": {"type": "number", "description": "degrees"},
                    },
                    "required": ["center", "radius", "start_angle", "end_angle"],
                }),
            ),
            function(
                "draw_spline",
                "Draw a spline through fit points in AutoCAD",
                json!({
                    "type": "object",
                    "properties": {
                        "points": {
                            "type": "array",
                            "items": point_schema(),
                            "description": "at least two [x, y, z] fit points",
                        },
                    },
                    "required": ["points"],
                }),
            ),
        ]
    }
}

pub mod dispatcher {
    use cadai_config::{LlmConfig, LlmProvider};
    use tracing::{debug, info};

    use crate::backend::{ChatBackend, OllamaBackend, OpenAiBackend};
    use crate::catalog::tool_catalog;
    use crate::errors::LlmError;
    use crate::types::{ChatMessage, ChatRequest, ToolCall};

    /// 将用户语句连同工具目录发送给聊天后端，原样返回模型选择的工具调用。
    pub struct PromptDispatcher {
        backend: Box<dyn ChatBackend>,
        model: String,
    }

    impl PromptDispatcher {
        pub fn new(backend: Box<dyn ChatBackend>, model: impl Into<String>) -> Self {
            Self {
                backend,
                model: model.into(),
            }
        }

        /// 依据配置选择后端（Ollama 或 OpenAI 兼容接口）。
        pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
            let endpoint = config.resolved_endpoint();
            let backend: Box<dyn ChatBackend> = match config.provider {
                LlmProvider::Ollama => Box::new(OllamaBackend::new(endpoint, config.timeout())?),
                LlmProvider::OpenAi => {
                    let api_key = std::env::var(&config.api_key_env)
                        .map_err(|_| LlmError::MissingApiKey(config.api_key_env.clone()))?;
                    Box::new(OpenAiBackend::new(endpoint, api_key, config.timeout())?)
                }
            };
            info!(backend = %backend.describe(), model = %config.model, "聊天后端已就绪");
            Ok(Self::new(backend, config.model.clone()))
        }

        #[inline]
        pub fn model(&self) -> &str {
            &self.model
        }

        pub fn backend_description(&self) -> String {
            self.backend.describe()
        }

        /// 不重试、不流式；后端错误直接向调用方传播。
        pub fn process_prompt(&self, utterance: &str) -> Result<Vec<ToolCall>, LlmError> {
            let request = ChatRequest {
                model: self.model.clone(),
                messages: vec![ChatMessage::user(utterance)],
                tools: tool_catalog(),
            };
            let reply = self.backend.chat(&request)?;
            debug!(
                tool_calls = reply.tool_calls.len(),
                content = %reply.content,
                "聊天后端已返回"
            );
            Ok(reply.tool_calls)
        }
    }

}
