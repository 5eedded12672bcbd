use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_ENV: &str = "CADAI_CONFIG";
pub const OLLAMA_HOST_ENV: &str = "OLLAMA_HOST";

const DEFAULT_PROG_IDS: [&str; 6] = [
    "AutoCAD.Application",
    "AutoCAD.Application.25",
    "AutoCAD.Application.24.1",
    "AutoCAD.Application.24",
    "AutoCAD.Application.23.1",
    "AutoCAD.Application.23",
];

/// 应用配置的根结构。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub automation: AutomationConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl AppConfig {
    /// 从显式路径加载配置。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 自动发现配置文件：优先读取环境变量 `CADAI_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os(CONFIG_ENV) {
            return Self::from_file(PathBuf::from(path));
        }

        let current_dir = env::current_dir().map_err(|source| ConfigError::Context {
            message: "获取当前工作目录失败".to_string(),
            source,
        })?;
        Self::discover_in(&current_dir)
    }

    /// 在指定目录下寻找 `config/default.toml`，缺失时返回默认配置。
    pub fn discover_in(dir: &Path) -> Result<Self, ConfigError> {
        let default_path = dir.join("config").join("default.toml");
        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }
}

/// 日志配置，支持设置默认等级。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// 自动化后端。默认在 Windows 上附加正在运行的 AutoCAD，其他平台上禁用。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutomationBackend {
    /// 通过平台自动化接口（Windows COM）附加正在运行的应用。
    Native,
    /// 进程内离线绘图会话，仅用于演示与测试。
    Offline,
    /// 不连接任何应用，所有绘图操作均为空操作。
    Disabled,
}

impl Default for AutomationBackend {
    fn default() -> Self {
        if cfg!(windows) {
            AutomationBackend::Native
        } else {
            AutomationBackend::Disabled
        }
    }
}

/// 自动化连接配置。`prog_ids` 为按优先级排列的候选标识。
#[derive(Debug, Clone, Deserialize)]
pub struct AutomationConfig {
    #[serde(default)]
    pub backend: AutomationBackend,
    #[serde(default = "AutomationConfig::default_prog_ids")]
    pub prog_ids: Vec<String>,
}

impl AutomationConfig {
    fn default_prog_ids() -> Vec<String> {
        DEFAULT_PROG_IDS.iter().map(|id| id.to_string()).collect()
    }
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            backend: AutomationBackend::default(),
            prog_ids: Self::default_prog_ids(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Ollama,
    #[serde(alias = "openai-compatible")]
    OpenAi,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    #[serde(default = "LlmConfig::default_model")]
    pub model: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "LlmConfig::default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "LlmConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl LlmConfig {
    fn default_model() -> String {
        "llama3".to_string()
    }

    fn default_api_key_env() -> String {
        "OPENAI_API_KEY".to_string()
    }

    fn default_timeout_secs() -> u64 {
        120
    }

    /// `0` 表示不设置超时。
    pub fn timeout(&self) -> Option<Duration> {
        if self.timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.timeout_secs))
        }
    }

    /// 显式配置的端点优先；Ollama 后端其次读取 `OLLAMA_HOST`。
    pub fn resolved_endpoint(&self) -> Option<String> {
        if let Some(endpoint) = self.endpoint.as_ref().filter(|e| !e.trim().is_empty()) {
            return Some(endpoint.clone());
        }
        match self.provider {
            LlmProvider::Ollama => env::var(OLLAMA_HOST_ENV)
                .ok()
                .filter(|host| !host.trim().is_empty()),
            LlmProvider::OpenAi => None,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            model: Self::default_model(),
            endpoint: None,
            api_key_env: Self::default_api_key_env(),
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "CacheConfig::default_path")]
    pub path: PathBuf,
}

impl CacheConfig {
    fn default_path() -> PathBuf {
        PathBuf::from("drawing_cache.json")
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: Self::default_path(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
}
