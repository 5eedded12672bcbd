use std::io::{BufRead, Write};
use std::path::PathBuf;

use cadai_core::cache::CacheDocument;
use cadai_engine::client::AutomationClient;
use cadai_engine::command::{CommandBus, CommandContext, CommandRequest, CommandResponse};
use cadai_io::{DrawingCache, load_cache};
use cadai_llm::dispatcher::PromptDispatcher;
use cadai_llm::types::ToolCall;
use tracing::{info, warn};

use crate::errors::FrontendError;
use crate::interrupt::Interrupt;

pub const PROMPT: &str = "[CAD AI] > ";

/// 交互循环中以 `/` 开头的内置命令。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaCommand {
    Cache,
    Summary,
    Trim,
    Raw(String),
    Help,
    Unknown(String),
}

impl MetaCommand {
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.strip_prefix('/')?;
        let (head, tail) = match rest.split_once(char::is_whitespace) {
            Some((head, tail)) => (head, tail.trim()),
            None => (rest, ""),
        };
        let command = match head.to_ascii_lowercase().as_str() {
            "cache" => MetaCommand::Cache,
            "summary" => MetaCommand::Summary,
            "trim" => MetaCommand::Trim,
            "cmd" if !tail.is_empty() => MetaCommand::Raw(tail.to_string()),
            "help" | "?" => MetaCommand::Help,
            _ => MetaCommand::Unknown(rest.to_string()),
        };
        Some(command)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Exit,
}

/// 单个工具调用的执行结果。
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub name: String,
    pub response: CommandResponse,
}

/// 绘图助手：语句 → 工具调用 → 命令分发 → 自动化客户端。
pub struct Assistant {
    client: AutomationClient,
    dispatcher: PromptDispatcher,
    bus: CommandBus,
    cache_path: PathBuf,
    interrupt: Interrupt,
}

impl Assistant {
    pub fn new(
        client: AutomationClient,
        dispatcher: PromptDispatcher,
        cache_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            dispatcher,
            bus: CommandBus::new(),
            cache_path: cache_path.into(),
            interrupt: Interrupt::default(),
        }
    }

    /// 使用外部注册的中断状态（见 [`Interrupt::install`]）。
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    #[inline]
    pub fn client(&self) -> &AutomationClient {
        &self.client
    }

    /// 逐个执行工具调用；未知命令与非法参数只影响该调用本身。
    pub fn execute_calls(&mut self, calls: &[ToolCall]) -> Vec<CallOutcome> {
        let mut context = CommandContext {
            client: &mut self.client,
        };
        calls
            .iter()
            .map(|call| {
                let request = CommandRequest::new(call.name.clone(), call.arguments.clone());
                let response = self.bus.dispatch(&request, &mut context);
                if !response.supported {
                    warn!(command = %call.name, "模型返回了不支持的命令");
                }
                CallOutcome {
                    name: call.name.clone(),
                    response,
                }
            })
            .collect()
    }

    /// 刷新缓存文件并返回新快照。
    pub fn refresh_cache(&self) -> Result<CacheDocument, FrontendError> {
        let mut cache = DrawingCache::with_path(&self.client, &self.cache_path);
        Ok(cache.update_cache()?.clone())
    }

    pub fn load_cache(&self) -> Result<CacheDocument, FrontendError> {
        Ok(load_cache(&self.cache_path)?)
    }

    /// 处理一行输入。后端与缓存错误写到输出后继续循环。
    pub fn handle_line<W: Write>(
        &mut self,
        line: &str,
        out: &mut W,
    ) -> Result<LoopControl, FrontendError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(LoopControl::Continue);
        }
        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            return Ok(LoopControl::Exit);
        }
        if let Some(meta) = MetaCommand::parse(line) {
            self.handle_meta(meta, out)?;
            return Ok(LoopControl::Continue);
        }

        writeln!(out, "正在处理请求...")?;
        let calls = match self.dispatcher.process_prompt(line) {
            Ok(calls) => calls,
            Err(err) => {
                warn!(error = %err, "聊天后端调用失败");
                writeln!(out, "错误: {err}")?;
                return Ok(LoopControl::Continue);
            }
        };
        if calls.is_empty() {
            writeln!(out, "模型未识别出任何 CAD 命令。")?;
            return Ok(LoopControl::Continue);
        }

        for call in &calls {
            writeln!(out, "执行: {}({})", call.name, call.arguments)?;
        }
        for outcome in self.execute_calls(&calls) {
            let message = outcome.response.message.as_deref().unwrap_or_default();
            if outcome.response.success {
                writeln!(out, "  ✓ {message}")?;
            } else {
                writeln!(out, "  ✗ {message}")?;
            }
        }
        Ok(LoopControl::Continue)
    }

    fn handle_meta<W: Write>(&mut self, meta: MetaCommand, out: &mut W) -> Result<(), FrontendError> {
        match meta {
            MetaCommand::Cache => match self.refresh_cache() {
                Ok(document) => {
                    writeln!(out, "缓存已保存: {}", self.cache_path.display())?;
                    write_summary(out, &document)?;
                }
                Err(err) => writeln!(out, "错误: {err}")?,
            },
            MetaCommand::Summary => match self.load_cache() {
                Ok(document) => write_summary(out, &document)?,
                Err(err) => writeln!(out, "错误: {err}")?,
            },
            MetaCommand::Trim => {
                if self.client.trim() {
                    writeln!(out, "已发送 TRIM 命令")?;
                } else {
                    writeln!(out, "TRIM 命令未发送")?;
                }
            }
            MetaCommand::Raw(command) => {
                if self.client.send_command(&command) {
                    writeln!(out, "已发送命令: {command}")?;
                } else {
                    writeln!(out, "命令未发送: {command}")?;
                }
            }
            MetaCommand::Help => write_help(out, &self.bus)?,
            MetaCommand::Unknown(raw) => {
                writeln!(out, "未知内置命令: /{raw}（输入 /help 查看帮助）")?;
            }
        }
        Ok(())
    }

    /// 读取并执行的循环，遇到 `exit`/`quit`、输入结束或中断请求时返回。
    /// 无法按 UTF-8 解码的字节以替换字符处理，不会中止循环。
    pub fn run_loop<R: BufRead, W: Write>(
        &mut self,
        mut input: R,
        mut out: W,
    ) -> Result<(), FrontendError> {
        writeln!(out, "--- AutoCAD AI Assistant ---")?;
        writeln!(
            out,
            "模型: {} ({})",
            self.dispatcher.model(),
            self.dispatcher.backend_description()
        )?;
        if !self.client.is_connected() {
            writeln!(out, "无法连接 AutoCAD，请确认应用已打开。绘图命令将不会生效。")?;
        }
        let mut buffer = Vec::new();
        while !self.interrupt.is_requested() {
            write!(out, "\n{PROMPT}")?;
            out.flush()?;
            buffer.clear();
            self.interrupt.set_waiting(true);
            let read = input.read_until(b'\n', &mut buffer);
            self.interrupt.set_waiting(false);
            if read? == 0 {
                writeln!(out)?;
                break;
            }
            let line = String::from_utf8_lossy(&buffer);
            if matches!(line, std::borrow::Cow::Owned(_)) {
                warn!("输入包含无效的 UTF-8 字节，已替换");
            }
            if self.handle_line(&line, &mut out)? == LoopControl::Exit {
                break;
            }
        }
        if self.interrupt.is_requested() {
            writeln!(out, "\n已中断，退出。")?;
        }
        info!("交互循环结束");
        Ok(())
    }
}

pub fn write_summary<W: Write>(out: &mut W, document: &CacheDocument) -> std::io::Result<()> {
    let summary = &document.summary;
    match &document.last_update {
        Some(time) => writeln!(out, "更新时间: {}", time.to_rfc3339())?,
        None => writeln!(out, "缓存尚未生成")?,
    }
    writeln!(out, "实体总数: {}", summary.total_entities)?;
    for (kind, count) in &summary.by_type {
        writeln!(out, "  - 类型 {kind}: {count}")?;
    }
    for (layer, count) in &summary.by_layer {
        writeln!(out, "  - 图层 {layer}: {count}")?;
    }
    match &summary.bounds {
        Some(bounds) => writeln!(
            out,
            "图形界限: ({:.2}, {:.2}) - ({:.2}, {:.2})",
            bounds.min[0], bounds.min[1], bounds.max[0], bounds.max[1]
        ),
        None => writeln!(out, "图形界限: 未知"),
    }
}

fn write_help<W: Write>(out: &mut W, bus: &CommandBus) -> std::io::Result<()> {
    let mut commands: Vec<&str> = bus.available_commands().copied().collect();
    commands.sort_unstable();
    writeln!(out, "直接输入自然语言描述即可绘图，支持的命令: {}", commands.join(", "))?;
    writeln!(out, "内置命令:")?;
    writeln!(out, "  /cache       刷新图纸缓存并显示摘要")?;
    writeln!(out, "  /summary     显示已保存的缓存摘要")?;
    writeln!(out, "  /trim        发送 TRIM 命令")?;
    writeln!(out, "  /cmd <命令>  发送原始命令")?;
    writeln!(out, "  exit | quit  退出")
}
