//! 引导过程对外发送的事件
//!
//! 引擎只产生带类型的事件，文案的本地化由 UI 侧根据 `key()` 完成。

use super::tool::ToolStatus;
use serde::{Deserialize, Serialize};

/// 进度事件名（供 UI 桥接层订阅）
pub const PROGRESS_EVENT: &str = "env-check://progress";
/// 检查完成事件名
pub const CHECK_DONE_EVENT: &str = "env-check://done";
/// 日志行事件名
pub const LOG_EVENT: &str = "env-check://log";

/// 引导状态机阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapPhase {
    Idle,
    Deciding,
    PathSetup,
    RuntimeCheck,
    RuntimeInstalling,
    ToolLoop,
    Done,
    Aborted,
}

impl BootstrapPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BootstrapPhase::Done | BootstrapPhase::Aborted)
    }
}

/// 进度事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub phase: BootstrapPhase,
    pub message: String,
    pub percent: Option<f32>,
}

/// 日志级别（UI 展示用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warn,
    Error,
}

/// 检查过程中的日志行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum CheckNotice {
    SkippedByPolicy,
    FirstRunDetected { root: String },
    PathAugmented { added: Vec<String> },
    RuntimeFound { path: String },
    RuntimeDownloading { url: String },
    RuntimeInstalled { path: String },
    RuntimeFailed { kind: String, error: String },
    ToolOutsideRoot { tool: String, path: String },
    ToolMissing { tool: String },
    ToolInstalled { tool: String, version: Option<String> },
    ToolInstallFailed { tool: String, error: String },
    ToolVersionUnknown { tool: String, error: String },
    ToolUpToDate { tool: String, version: String },
    ToolUpdating { tool: String, from: String, to: String },
    ToolUpdated { tool: String, version: Option<String> },
    ToolUpdateFailed { tool: String, error: String },
    LatestVersionUnavailable { tool: String, error: String },
}

impl CheckNotice {
    /// 本地化使用的稳定键
    pub fn key(&self) -> &'static str {
        match self {
            CheckNotice::SkippedByPolicy => "check.skipped",
            CheckNotice::FirstRunDetected { .. } => "check.first_run",
            CheckNotice::PathAugmented { .. } => "path.augmented",
            CheckNotice::RuntimeFound { .. } => "runtime.found",
            CheckNotice::RuntimeDownloading { .. } => "runtime.downloading",
            CheckNotice::RuntimeInstalled { .. } => "runtime.installed",
            CheckNotice::RuntimeFailed { .. } => "runtime.failed",
            CheckNotice::ToolOutsideRoot { .. } => "tool.outside_root",
            CheckNotice::ToolMissing { .. } => "tool.missing",
            CheckNotice::ToolInstalled { .. } => "tool.installed",
            CheckNotice::ToolInstallFailed { .. } => "tool.install_failed",
            CheckNotice::ToolVersionUnknown { .. } => "tool.version_unknown",
            CheckNotice::ToolUpToDate { .. } => "tool.up_to_date",
            CheckNotice::ToolUpdating { .. } => "tool.updating",
            CheckNotice::ToolUpdated { .. } => "tool.updated",
            CheckNotice::ToolUpdateFailed { .. } => "tool.update_failed",
            CheckNotice::LatestVersionUnavailable { .. } => "tool.latest_unavailable",
        }
    }

    pub fn level(&self) -> NoticeLevel {
        match self {
            CheckNotice::RuntimeFailed { .. }
            | CheckNotice::ToolInstallFailed { .. }
            | CheckNotice::ToolUpdateFailed { .. } => NoticeLevel::Error,
            CheckNotice::ToolOutsideRoot { .. }
            | CheckNotice::ToolVersionUnknown { .. }
            | CheckNotice::LatestVersionUnavailable { .. } => NoticeLevel::Warn,
            _ => NoticeLevel::Info,
        }
    }
}

/// 一轮检查的汇总
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckReport {
    pub forced: bool,
    /// 因暂停检查而跳过
    pub skipped: bool,
    /// 运行时不可用导致本轮中止
    pub aborted: bool,
    pub runtime_path: Option<String>,
    pub tools: Vec<ToolStatus>,
    /// 安装或更新失败的工具 ID
    pub failed_tools: Vec<String>,
}

/// 对外发送的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum BootstrapEvent {
    Log(CheckNotice),
    Progress(ProgressEvent),
    Phase(BootstrapPhase),
    Tool(ToolStatus),
    /// 终止事件，每轮检查（含跳过）恰好一次
    CheckDone(CheckReport),
}

impl BootstrapEvent {
    /// UI 桥接层使用的事件名
    pub fn name(&self) -> &'static str {
        match self {
            BootstrapEvent::Log(_) => LOG_EVENT,
            BootstrapEvent::Progress(_) | BootstrapEvent::Phase(_) | BootstrapEvent::Tool(_) => {
                PROGRESS_EVENT
            }
            BootstrapEvent::CheckDone(_) => CHECK_DONE_EVENT,
        }
    }
}

/// 触发请求的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOutcome {
    /// 已启动新一轮检查
    Started,
    /// 已有检查在进行，请求已合并到下一轮
    Coalesced,
}

/// 一轮检查的结局
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "report", rename_all = "snake_case")]
pub enum CheckOutcome {
    SkippedByPolicy,
    Completed(CheckReport),
    Aborted(CheckReport),
    Coalesced,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_keys_and_levels() {
        let notice = CheckNotice::ToolInstallFailed {
            tool: "codex".to_string(),
            error: "boom".to_string(),
        };
        assert_eq!(notice.key(), "tool.install_failed");
        assert_eq!(notice.level(), NoticeLevel::Error);
        assert_eq!(CheckNotice::SkippedByPolicy.level(), NoticeLevel::Info);
    }

    #[test]
    fn test_event_serialization_shape() {
        let event = BootstrapEvent::Progress(ProgressEvent {
            phase: BootstrapPhase::RuntimeInstalling,
            message: "下载中".to_string(),
            percent: Some(50.0),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "progress");
        assert_eq!(json["payload"]["phase"], "runtime_installing");
        assert_eq!(event.name(), PROGRESS_EVENT);

        let done = BootstrapEvent::CheckDone(CheckReport::default());
        assert_eq!(done.name(), CHECK_DONE_EVENT);
    }

    #[test]
    fn test_runtime_failure_notice_keeps_kind_field() {
        let event = BootstrapEvent::Log(CheckNotice::RuntimeFailed {
            kind: "network".to_string(),
            error: "connection refused".to_string(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "log");
        assert_eq!(json["payload"]["notice"], "runtime_failed");
        assert_eq!(json["payload"]["kind"], "network");

        let back: BootstrapEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_terminal_phases() {
        assert!(BootstrapPhase::Done.is_terminal());
        assert!(BootstrapPhase::Aborted.is_terminal());
        assert!(!BootstrapPhase::ToolLoop.is_terminal());
    }
}
