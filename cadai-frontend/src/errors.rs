use cadai_io::CacheError;
use cadai_llm::errors::LlmError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrontendError {
    #[error("终端读写失败: {0}")]
    Io(#[from] std::io::Error),
    #[error("无法初始化聊天后端: {0}")]
    Llm(#[from] LlmError),
    #[error("缓存操作失败: {0}")]
    Cache(#[from] CacheError),
}
