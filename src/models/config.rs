// 引导配置结构，放在 models 以便在库和二进制之间共享
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 持久化的引导配置（~/.duckcoding/bootstrap.json）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// 暂停自动检查（手动强制检查不受影响）
    #[serde(default)]
    pub pause_checks: bool,
    /// 上一次实际执行检查的时间
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
    /// 语言区域覆盖（如 "zh-CN"），为空时读取环境变量
    #[serde(default)]
    pub locale: Option<String>,
    /// 运行时版本覆盖（如 "22.12.0"）
    #[serde(default)]
    pub runtime_version: Option<String>,
    #[serde(default)]
    pub log_config: LogConfig,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// 日志输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// 日志输出目标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Console,
    File,
    Both,
}

/// 日志配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default)]
    pub output: LogOutput,
    /// 日志目录，为空时使用 ~/.duckcoding/logs
    #[serde(default)]
    pub file_path: Option<String>,
}

/// 默认运行时版本
pub const DEFAULT_RUNTIME_VERSION: &str = "22.12.0";

/// 引擎运行参数（不持久化）
#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    /// 版本探测超时
    pub probe_timeout: Duration,
    /// 单次安装/更新命令超时
    pub install_timeout: Duration,
    /// 等待他人运行时安装的最长时间
    pub runtime_wait_timeout: Duration,
    /// 下载进度上报最小间隔
    pub progress_interval: Duration,
    /// 运行时版本
    pub runtime_version: String,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(10),
            install_timeout: Duration::from_secs(600),
            runtime_wait_timeout: Duration::from_secs(600),
            progress_interval: Duration::from_millis(250),
            runtime_version: DEFAULT_RUNTIME_VERSION.to_string(),
        }
    }
}

impl BootstrapOptions {
    /// 合并持久化配置中的覆盖项
    pub fn with_config(mut self, config: &BootstrapConfig) -> Self {
        if let Some(version) = config
            .runtime_version
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            self.runtime_version = version.trim_start_matches('v').to_string();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_from_empty_json() {
        let config: BootstrapConfig = serde_json::from_str("{}").unwrap();
        assert!(!config.pause_checks);
        assert!(config.last_checked.is_none());
        assert_eq!(config.log_config.level, LogLevel::Info);
    }

    #[test]
    fn test_options_runtime_override() {
        let config = BootstrapConfig {
            runtime_version: Some("v20.18.1".to_string()),
            ..Default::default()
        };
        let options = BootstrapOptions::default().with_config(&config);
        assert_eq!(options.runtime_version, "20.18.1");

        let blank = BootstrapConfig {
            runtime_version: Some("  ".to_string()),
            ..Default::default()
        };
        let options = BootstrapOptions::default().with_config(&blank);
        assert_eq!(options.runtime_version, DEFAULT_RUNTIME_VERSION);
    }
}
