//! 运行时安装单飞门
//!
//! 同一时刻只允许一个安装在执行；其余调用者订阅同一个结果，
//! 等待超过上限后返回 `TimeoutWaitingForInstall`，不会无限阻塞。

use crate::core::error::ProvisionError;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

type InstallResult = Result<PathBuf, ProvisionError>;

#[derive(Debug)]
enum GateState {
    Idle,
    /// 安装进行中，完成时接收端会收到 `Some(result)`
    Installing(watch::Receiver<Option<InstallResult>>),
}

#[derive(Debug)]
pub struct InstallGate {
    state: Mutex<GateState>,
}

impl Default for InstallGate {
    fn default() -> Self {
        Self::new()
    }
}

impl InstallGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Idle),
        }
    }

    /// 是否有安装正在进行
    pub async fn is_installing(&self) -> bool {
        match &*self.state.lock().await {
            GateState::Idle => false,
            GateState::Installing(rx) => rx.has_changed().is_ok(),
        }
    }

    /// 没有进行中的安装时执行 `install`，否则等待正在进行的那一个
    pub async fn run_or_wait<F, Fut>(&self, wait_timeout: Duration, install: F) -> InstallResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = InstallResult>,
    {
        let tx = {
            let mut state = self.state.lock().await;
            match &*state {
                // 发送端已释放说明上一个安装者被取消，由本调用者接手
                GateState::Installing(rx) if rx.has_changed().is_ok() => {
                    let rx = rx.clone();
                    drop(state);
                    return Self::wait(rx, wait_timeout).await;
                }
                _ => {}
            }
            let (tx, rx) = watch::channel(None);
            *state = GateState::Installing(rx);
            tx
        };

        let result = install().await;

        *self.state.lock().await = GateState::Idle;
        // 没有等待者时发送失败，忽略
        let _ = tx.send(Some(result.clone()));
        result
    }

    async fn wait(
        mut rx: watch::Receiver<Option<InstallResult>>,
        wait_timeout: Duration,
    ) -> InstallResult {
        tracing::info!(timeout_secs = wait_timeout.as_secs(), "运行时正在由其他任务安装，等待结果");
        match tokio::time::timeout(wait_timeout, rx.wait_for(Option::is_some)).await {
            Err(_) => {
                tracing::warn!("等待运行时安装超时");
                Err(ProvisionError::TimeoutWaitingForInstall {
                    waited_secs: wait_timeout.as_secs(),
                })
            }
            Ok(Err(_)) => Err(ProvisionError::InstallAbandoned),
            Ok(Ok(value)) => (*value)
                .clone()
                .unwrap_or(Err(ProvisionError::InstallAbandoned)),
        }
    }
}
