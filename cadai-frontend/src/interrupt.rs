use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
struct InterruptState {
    requested: AtomicBool,
    waiting_for_input: AtomicBool,
}

/// 中断（Ctrl-C）状态，在信号处理线程与交互循环之间共享。
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    state: Arc<InterruptState>,
}

impl Interrupt {
    /// 注册进程级 Ctrl-C 处理器。
    ///
    /// 循环停在提示符等待输入时立即结束进程；正在处理请求时只记录退出请求，
    /// 当前请求完成后循环退出。
    pub fn install() -> Result<Self, ctrlc::Error> {
        let interrupt = Self::default();
        let handler = interrupt.clone();
        ctrlc::set_handler(move || {
            if handler.request() {
                eprintln!();
                std::process::exit(0);
            }
        })?;
        Ok(interrupt)
    }

    /// 记录退出请求，返回循环此刻是否在等待输入。
    pub fn request(&self) -> bool {
        self.state.requested.store(true, Ordering::SeqCst);
        self.state.waiting_for_input.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn is_requested(&self) -> bool {
        self.state.requested.load(Ordering::SeqCst)
    }

    pub(crate) fn set_waiting(&self, waiting: bool) {
        self.state.waiting_for_input.store(waiting, Ordering::SeqCst);
    }
}
