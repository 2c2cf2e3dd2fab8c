//! 引导引擎错误类型定义
//!
//! 使用 `thiserror` 定义探测、安装、运行时供给三类错误。
//! 所有错误均实现 `Clone`，以便单飞安装的结果可以分发给每一个等待者。

use std::path::PathBuf;
use thiserror::Error;

/// 版本探测错误（非致命：工具视为版本未知）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// 可执行文件缺失、非零退出或超时
    #[error("执行版本命令失败: {path}: {reason}")]
    ExecutionFailed { path: PathBuf, reason: String },

    /// 输出无法识别为版本号
    #[error("无法识别的版本输出: {output:?}")]
    UnrecognizedFormat { output: String },
}

/// 包安装错误（非致命：本轮放弃该工具，循环继续）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstallError {
    /// 私有根目录和系统中都找不到包管理器
    #[error("未找到包管理器 {name}")]
    PackageManagerMissing { name: String },

    /// 安装或更新命令失败（已按策略重试）
    #[error("{command} 执行失败 (exit={exit_code:?}, retried={retried}): {output}")]
    Failed {
        command: String,
        exit_code: Option<i32>,
        output: String,
        retried: bool,
    },

    /// 工具 ID 未在清单中声明
    #[error("未知的工具 ID: {0}")]
    UnknownTool(String),

    /// 安装命令成功，但私有目录中找不到可执行文件
    #[error("{tool} 安装后未在私有目录中找到")]
    NotFoundAfterInstall { tool: String },
}

/// 运行时供给错误（致命：本轮检查中止，但仍会发送完成事件）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    /// 连接失败
    #[error("下载运行时网络错误: {url}: {reason}")]
    Network { url: String, reason: String },

    /// 非 2xx 响应
    #[error("下载运行时返回 HTTP {status}: {url}")]
    HttpStatus { url: String, status: u16 },

    /// 数据流中断或长度与 Content-Length 不符
    #[error("运行时下载不完整: 已接收 {received} 字节, 预期 {expected:?}")]
    Truncated { received: u64, expected: Option<u64> },

    /// 不支持的压缩包格式
    #[error("不支持的运行时压缩包: {file_name}")]
    UnsupportedArchive { file_name: String },

    /// 解压失败
    #[error("解压运行时失败: {archive}: {reason}")]
    Extraction { archive: PathBuf, reason: String },

    /// 解压完成后仍找不到运行时
    #[error("安装后未找到运行时: {root}")]
    PostInstallMissing { root: PathBuf },

    /// 本地文件系统错误
    #[error("文件 I/O 错误: {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    /// 等待其他调用者的安装超时
    #[error("等待运行时安装超时 ({waited_secs}s)")]
    TimeoutWaitingForInstall { waited_secs: u64 },

    /// 正在执行的安装被取消，未产生结果
    #[error("运行时安装任务已中断")]
    InstallAbandoned,
}

impl ProvisionError {
    /// 从 `std::io::Error` 和路径创建 I/O 错误
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            reason: source.to_string(),
        }
    }

    /// 日志与事件中使用的分类标识
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::HttpStatus { .. } => "http_status",
            Self::Truncated { .. } => "truncated",
            Self::UnsupportedArchive { .. } => "unsupported_archive",
            Self::Extraction { .. } => "extraction",
            Self::PostInstallMissing { .. } => "post_install_missing",
            Self::Io { .. } => "io",
            Self::TimeoutWaitingForInstall { .. } => "timeout_waiting_for_install",
            Self::InstallAbandoned => "install_abandoned",
        }
    }
}

/// 在终端中启动工具失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    #[error("未知的工具 ID: {0}")]
    UnknownTool(String),

    /// 私有目录中没有该工具
    #[error("{tool} 尚未安装")]
    NotInstalled { tool: String },

    #[error("启动终端失败: {command}: {reason}")]
    Spawn { command: String, reason: String },
}

/// 用户主动发起的单工具操作错误（直接返回给调用方）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolActionError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Install(#[from] InstallError),
}
