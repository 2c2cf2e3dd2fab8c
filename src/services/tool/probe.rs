use crate::core::error::ProbeError;
use crate::services::bootstrap::path_env::child_search_path;
use crate::utils::command::CommandRunner;
use crate::utils::paths::InstallRoot;
use crate::utils::platform::PlatformPolicy;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// `<package>/<version> <platform> <runtime>`，如 "claude-code/0.2.29 darwin-arm64 node-v22.12.0"
static PACKAGE_SLASH_VERSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\S+/v?(\d+(?:\.\d+)+)(?:\s|$)").expect("invalid package version regex")
});

/// 纯版本号，如 "1.4.0" 或 "v0.13.0-preview.2"
static BARE_VERSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^v?(\d+(?:\.\d+)+(?:-[0-9A-Za-z.]+)?)$").expect("invalid bare version regex")
});

/// `<name> <version>`，如 "codex-cli 0.46.0"
static NAMED_VERSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z][\w.-]*\s+v?(\d+(?:\.\d+)+(?:-[0-9A-Za-z.]+)?)(?:\s|$)")
        .expect("invalid named version regex")
});

/// 从版本命令输出中提取版本号
///
/// 只看第一行非空输出，允许末尾有多余内容。
pub fn parse_version_output(output: &str) -> Result<String, ProbeError> {
    let unrecognized = || ProbeError::UnrecognizedFormat {
        output: output.trim().to_string(),
    };

    let line = output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(unrecognized)?;

    if let Some(caps) = PACKAGE_SLASH_VERSION.captures(line) {
        return Ok(caps[1].to_string());
    }

    let first_token = line.split_whitespace().next().unwrap_or_default();
    if let Some(caps) = BARE_VERSION.captures(first_token) {
        return Ok(caps[1].to_string());
    }

    if let Some(caps) = NAMED_VERSION.captures(line) {
        return Ok(caps[1].to_string());
    }

    Err(unrecognized())
}

/// 版本探测
#[derive(Clone)]
pub struct VersionProbe {
    runner: Arc<dyn CommandRunner>,
    policy: Arc<dyn PlatformPolicy>,
    timeout: Duration,
    /// 设置后子进程 PATH 中私有 bin 目录优先
    private_root: Option<InstallRoot>,
}

impl VersionProbe {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        policy: Arc<dyn PlatformPolicy>,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            policy,
            timeout,
            private_root: None,
        }
    }

    pub fn with_private_root(mut self, root: InstallRoot) -> Self {
        self.private_root = Some(root);
        self
    }

    /// 执行 `<path> --version` 并解析输出
    pub async fn probe(&self, path: &Path, tool_id: &str) -> Result<String, ProbeError> {
        self.probe_with_args(path, tool_id, &["--version"]).await
    }

    pub async fn probe_with_args(
        &self,
        path: &Path,
        tool_id: &str,
        args: &[&str],
    ) -> Result<String, ProbeError> {
        // 部分工具在代理环境下版本检查会报 URL 协议错误
        let mut spec = self
            .policy
            .command_for(path)
            .args(args.iter().copied())
            .timeout(self.timeout)
            .without_proxy();
        if let Some(root) = &self.private_root {
            spec = spec.env("PATH", child_search_path(self.policy.as_ref(), root));
        }

        let result = self.runner.run(&spec).await;
        if !result.success {
            let reason = if result.timed_out {
                result.stderr.clone()
            } else {
                match result.exit_code {
                    Some(code) => format!("退出码 {}: {}", code, result.combined_output()),
                    None => result.combined_output(),
                }
            };
            tracing::warn!(tool_id, path = %path.display(), reason = %reason, "版本探测执行失败");
            return Err(ProbeError::ExecutionFailed {
                path: path.to_path_buf(),
                reason,
            });
        }

        // 少数工具把版本输出到 stderr
        let output = if result.stdout.is_empty() {
            &result.stderr
        } else {
            &result.stdout
        };
        let version = parse_version_output(output)?;
        tracing::debug!(tool_id, version = %version, "版本探测成功");
        Ok(version)
    }
}
