pub mod cli;
pub mod errors;
pub mod interrupt;
pub mod loader;

use std::io::{self, Write};

use cadai_config::AppConfig;
use cadai_llm::dispatcher::PromptDispatcher;
use errors::FrontendError;
use tracing::{info, warn};

use crate::cli::{Assistant, write_summary};
use crate::loader::connect_client;

fn build_assistant(config: &AppConfig) -> Result<Assistant, FrontendError> {
    let client = connect_client(&config.automation);
    let dispatcher = PromptDispatcher::from_config(&config.llm)?;
    Ok(Assistant::new(client, dispatcher, config.cache.path.clone()))
}

/// 启动交互式绘图助手，读取标准输入直到 `exit`/`quit` 或输入结束。
pub fn run_interactive(config: &AppConfig) -> Result<(), FrontendError> {
    info!("启动交互式绘图助手");
    let interrupt = match interrupt::Interrupt::install() {
        Ok(interrupt) => interrupt,
        Err(err) => {
            warn!(error = %err, "无法注册 Ctrl-C 处理器");
            interrupt::Interrupt::default()
        }
    };
    let mut assistant = build_assistant(config)?.with_interrupt(interrupt);
    let stdin = io::stdin();
    assistant.run_loop(stdin.lock(), io::stdout().lock())
}

/// 执行单条请求后退出。
pub fn run_once(config: &AppConfig, prompt: &str) -> Result<(), FrontendError> {
    info!(prompt, "执行单条请求");
    let mut assistant = build_assistant(config)?;
    let mut out = io::stdout().lock();
    assistant.handle_line(prompt, &mut out)?;
    out.flush()?;
    Ok(())
}

/// 连接后刷新一次图纸缓存并打印摘要。不需要聊天后端。
pub fn snapshot_cache(config: &AppConfig) -> Result<(), FrontendError> {
    let client = connect_client(&config.automation);
    let mut cache = cadai_io::DrawingCache::with_path(&client, config.cache.path.clone());
    let document = cache.update_cache()?;
    let mut out = io::stdout().lock();
    writeln!(out, "缓存已保存: {}", config.cache.path.display())?;
    write_summary(&mut out, document)?;
    Ok(())
}
