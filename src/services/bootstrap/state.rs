//! 检查轮次的运行状态
//!
//! 同一时刻只运行一轮；运行期间的新请求合并为至多一个待执行轮次，
//! 其中任何一个请求是强制检查，待执行轮次就是强制检查。

/// 请求检查的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// 调用者负责执行本轮
    Run { force: bool },
    /// 已合并到待执行轮次
    Queued,
}

#[derive(Debug, Default)]
pub struct RunState {
    running: bool,
    pending: Option<bool>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn pending_force(&self) -> Option<bool> {
        self.pending
    }

    pub fn admit(&mut self, force: bool) -> Admission {
        if self.running {
            self.pending = Some(self.pending.unwrap_or(false) || force);
            Admission::Queued
        } else {
            self.running = true;
            Admission::Run { force }
        }
    }

    /// 一轮结束；有待执行轮次时保持运行状态并返回它的 force 标志
    pub fn finish(&mut self) -> Option<bool> {
        match self.pending.take() {
            Some(force) => Some(force),
            None => {
                self.running = false;
                None
            }
        }
    }
}
