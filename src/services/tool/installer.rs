use super::locator::ToolLocator;
use crate::core::error::InstallError;
use crate::models::{InstallMode, ToolDescriptor, UpdateStrategy};
use crate::services::bootstrap::path_env::child_search_path;
use crate::utils::command::{CommandResult, CommandRunner, CommandSpec};
use crate::utils::config::Locale;
use crate::utils::paths::AppPaths;
use crate::utils::platform::PlatformPolicy;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// 可通过清理缓存后重试一次恢复的失败特征
///
/// 大小写不敏感，在 stdout + stderr 合并输出中匹配。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrySignature {
    Eacces,
    Eperm,
    Eexist,
    Enotempty,
    Ebusy,
    PermissionDenied,
    AccessDenied,
    OperationNotPermitted,
    FileAlreadyExists,
    AlreadyExists,
}

impl RetrySignature {
    pub const ALL: [RetrySignature; 10] = [
        RetrySignature::Eacces,
        RetrySignature::Eperm,
        RetrySignature::Eexist,
        RetrySignature::Enotempty,
        RetrySignature::Ebusy,
        RetrySignature::PermissionDenied,
        RetrySignature::AccessDenied,
        RetrySignature::OperationNotPermitted,
        RetrySignature::FileAlreadyExists,
        RetrySignature::AlreadyExists,
    ];

    /// 匹配用的小写文本
    pub fn pattern(&self) -> &'static str {
        match self {
            RetrySignature::Eacces => "eacces",
            RetrySignature::Eperm => "eperm",
            RetrySignature::Eexist => "eexist",
            RetrySignature::Enotempty => "enotempty",
            RetrySignature::Ebusy => "ebusy",
            RetrySignature::PermissionDenied => "permission denied",
            RetrySignature::AccessDenied => "access is denied",
            RetrySignature::OperationNotPermitted => "operation not permitted",
            RetrySignature::FileAlreadyExists => "file already exists",
            RetrySignature::AlreadyExists => "already exists",
        }
    }

    /// 判断失败输出是否属于可重试类型
    pub fn classify(output: &str) -> Option<RetrySignature> {
        let lower = output.to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|signature| lower.contains(signature.pattern()))
    }
}

/// 包安装器
///
/// 通过包管理器把工具安装到私有前缀，缓存使用独立目录。
#[derive(Clone)]
pub struct PackageInstaller {
    runner: Arc<dyn CommandRunner>,
    policy: Arc<dyn PlatformPolicy>,
    paths: AppPaths,
    locale: Locale,
    locator: ToolLocator,
    timeout: Duration,
}

impl PackageInstaller {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        policy: Arc<dyn PlatformPolicy>,
        paths: AppPaths,
        locale: Locale,
        timeout: Duration,
    ) -> Self {
        let locator = ToolLocator::new(paths.root.clone(), policy.clone());
        Self {
            runner,
            policy,
            paths,
            locale,
            locator,
            timeout,
        }
    }

    /// 查找包管理器：私有目录优先，其次系统 PATH
    ///
    /// 包管理器本身是供给工具而不是被供给的产物，只有这里允许系统级查找。
    pub fn resolve_package_manager(&self) -> Result<PathBuf, InstallError> {
        if let Some(path) = self
            .policy
            .package_manager_candidates(self.paths.root.path())
            .into_iter()
            .find(|p| p.is_file())
        {
            return Ok(path);
        }

        let name = self.policy.package_manager_name();
        which::which(name).map_err(|e| {
            tracing::error!(name, error = %e, "未找到包管理器");
            InstallError::PackageManagerMissing {
                name: name.to_string(),
            }
        })
    }

    /// 包管理器命令的公共部分：私有缓存、镜像、私有 PATH
    fn package_manager_command(&self, npm: &Path, args: Vec<OsString>) -> CommandSpec {
        let mut spec = self
            .policy
            .command_for(npm)
            .args(args)
            .arg("--cache")
            .arg(self.paths.package_cache.as_os_str())
            .env(
                "PATH",
                child_search_path(self.policy.as_ref(), &self.paths.root),
            )
            .timeout(self.timeout);
        if let Some(registry) = self.locale.npm_registry() {
            spec = spec.arg("--registry").arg(registry);
        }
        spec
    }

    /// 安装命令：`npm install -g <pkg>@latest --prefix <root> --cache <cache> [--registry ...]`
    pub fn install_command(&self, npm: &Path, descriptor: &ToolDescriptor) -> CommandSpec {
        let package = descriptor.package_for(self.policy.os());
        self.package_manager_command(
            npm,
            vec![
                "install".into(),
                "-g".into(),
                format!("{package}@latest").into(),
                "--prefix".into(),
                self.paths.root.path().as_os_str().to_os_string(),
            ],
        )
    }

    fn cache_clean_command(&self, npm: &Path) -> CommandSpec {
        self.policy
            .command_for(npm)
            .args(["cache", "clean", "--force", "--cache"])
            .arg(self.paths.package_cache.as_os_str())
            .timeout(self.timeout)
    }

    /// 安装或更新工具
    ///
    /// 成功时不返回版本，调用方需要重新定位与探测。
    pub async fn install_or_update(
        &self,
        descriptor: &ToolDescriptor,
        mode: InstallMode,
    ) -> Result<(), InstallError> {
        if mode == InstallMode::Update {
            if let UpdateStrategy::SelfUpdateCommand(args) = descriptor.update_strategy {
                match self.self_update(descriptor, args).await {
                    Ok(()) => return Ok(()),
                    Err(e) => {
                        tracing::warn!(
                            tool_id = descriptor.id,
                            error = %e,
                            "工具自更新失败，改为通过包管理器重新安装"
                        );
                    }
                }
            }
        }

        let npm = self.resolve_package_manager()?;
        let spec = self.install_command(&npm, descriptor);
        tracing::info!(
            tool_id = descriptor.id,
            mode = ?mode,
            command = %spec.display(),
            "开始安装工具"
        );
        self.run_with_recovery(&npm, &spec).await?;
        tracing::info!(tool_id = descriptor.id, "工具安装命令执行成功");
        Ok(())
    }

    /// 执行工具自带的更新子命令
    async fn self_update(
        &self,
        descriptor: &ToolDescriptor,
        args: &[&str],
    ) -> Result<(), InstallError> {
        let located = self
            .locator
            .locate(descriptor)
            .ok_or_else(|| InstallError::Failed {
                command: descriptor.binary_names.join(" "),
                exit_code: None,
                output: "私有目录中未找到工具".to_string(),
                retried: false,
            })?;
        // 工具内部调用 npm 时同样落在私有前缀与私有缓存
        let mut spec = self
            .policy
            .command_for(&located.path)
            .args(args.iter().copied())
            .env(
                "PATH",
                child_search_path(self.policy.as_ref(), &self.paths.root),
            )
            .env("npm_config_prefix", self.paths.root.path().as_os_str())
            .env("npm_config_cache", self.paths.package_cache.as_os_str())
            .timeout(self.timeout);
        if let Some(registry) = self.locale.npm_registry() {
            spec = spec.env("npm_config_registry", registry);
        }

        tracing::info!(tool_id = descriptor.id, command = %spec.display(), "执行工具自更新");
        let result = self.runner.run(&spec).await;
        if result.success {
            Ok(())
        } else {
            Err(failure(&spec, &result, false))
        }
    }

    /// 执行命令；命中可重试特征时清理缓存并重试一次
    async fn run_with_recovery(
        &self,
        npm: &Path,
        spec: &CommandSpec,
    ) -> Result<(), InstallError> {
        let result = self.runner.run(spec).await;
        if result.success {
            return Ok(());
        }

        let signature = if result.timed_out {
            None
        } else {
            RetrySignature::classify(&result.combined_output())
        };
        let Some(signature) = signature else {
            tracing::error!(
                command = %spec.display(),
                exit_code = ?result.exit_code,
                output = %result.combined_output(),
                "安装命令失败，不可重试"
            );
            return Err(failure(spec, &result, false));
        };

        tracing::warn!(
            command = %spec.display(),
            signature = ?signature,
            "安装命令失败，清理缓存后重试一次"
        );
        let clean = self.runner.run(&self.cache_clean_command(npm)).await;
        if !clean.success {
            tracing::warn!(output = %clean.combined_output(), "清理缓存失败，继续重试");
        }

        let retry = self.runner.run(spec).await;
        if retry.success {
            tracing::info!(command = %spec.display(), "重试成功");
            Ok(())
        } else {
            tracing::error!(
                command = %spec.display(),
                exit_code = ?retry.exit_code,
                output = %retry.combined_output(),
                "重试后安装仍然失败"
            );
            Err(failure(spec, &retry, true))
        }
    }

    /// 查询 registry 中的最新版本：`npm view <pkg> version`
    pub async fn latest_version(
        &self,
        descriptor: &ToolDescriptor,
    ) -> Result<String, InstallError> {
        let npm = self.resolve_package_manager()?;
        let package = descriptor.package_for(self.policy.os());
        let spec = self
            .package_manager_command(&npm, vec!["view".into(), package.into(), "version".into()])
            .without_proxy();
        let result = self.runner.run(&spec).await;
        if !result.success {
            return Err(failure(&spec, &result, false));
        }

        result
            .stdout
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .map(|line| line.trim_matches(['\'', '"']).to_string())
            .filter(|line| {
                line.contains('.') && line.chars().next().is_some_and(|c| c.is_ascii_digit())
            })
            .ok_or_else(|| InstallError::Failed {
                command: spec.display(),
                exit_code: result.exit_code,
                output: result.stdout.clone(),
                retried: false,
            })
    }
}

fn failure(spec: &CommandSpec, result: &CommandResult, retried: bool) -> InstallError {
    InstallError::Failed {
        command: spec.display(),
        exit_code: result.exit_code,
        output: result.combined_output(),
        retried,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeRunner, TestEnv};

    fn failed(stderr: &str) -> CommandResult {
        CommandResult {
            success: false,
            stderr: stderr.to_string(),
            exit_code: Some(1),
            ..Default::default()
        }
    }

    fn ok() -> CommandResult {
        CommandResult {
            success: true,
            exit_code: Some(0),
            ..Default::default()
        }
    }

    fn codex() -> &'static ToolDescriptor {
        ToolDescriptor::by_id("codex").unwrap()
    }

    #[test]
    fn test_signature_classification() {
        assert_eq!(
            RetrySignature::classify("npm ERR! code EACCES"),
            Some(RetrySignature::Eacces)
        );
        assert_eq!(
            RetrySignature::classify("Error: Access is denied."),
            Some(RetrySignature::AccessDenied)
        );
        assert_eq!(
            RetrySignature::classify("npm ERR! EEXIST: file already exists"),
            Some(RetrySignature::Eexist)
        );
        assert_eq!(RetrySignature::classify("npm ERR! code E404"), None);
        assert_eq!(RetrySignature::classify("network timeout"), None);
    }

    #[tokio::test]
    async fn test_install_command_shape() {
        let env = TestEnv::new();
        env.seed_package_manager();
        let runner = Arc::new(FakeRunner::default());
        runner.push_response(ok());
        let installer = env.installer(runner.clone(), Locale::new("zh_CN.UTF-8"));

        installer
            .install_or_update(codex(), InstallMode::Install)
            .await
            .unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        let spec = &calls[0];
        assert!(spec.has_arg("install"));
        assert!(spec.has_arg("-g"));
        assert!(spec.has_arg("@openai/codex@latest"));
        assert!(spec.has_arg("--prefix"));
        assert!(spec.has_arg(&env.paths.root.path().to_string_lossy()));
        assert!(spec.has_arg(&env.paths.package_cache.to_string_lossy()));
        assert!(spec.has_arg("https://registry.npmmirror.com"));

        let path_value = spec
            .env
            .iter()
            .find(|(k, _)| k == "PATH")
            .map(|(_, v)| v.clone())
            .unwrap();
        let first = std::env::split_paths(&path_value).next().unwrap();
        assert_eq!(first, env.paths.root.bin_dir());
    }

    #[tokio::test]
    async fn test_retries_exactly_once_on_signature() {
        let env = TestEnv::new();
        env.seed_package_manager();
        let runner = Arc::new(FakeRunner::default());
        runner.push_response(failed("npm ERR! code EACCES"));
        runner.push_response(failed("cache clean failed"));
        runner.push_response(failed("npm ERR! code EPERM"));
        let installer = env.installer(runner.clone(), Locale::default());

        let err = installer
            .install_or_update(codex(), InstallMode::Install)
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::Failed { retried: true, .. }));

        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[1].has_arg("clean"));
        assert_eq!(calls[0], calls[2]);
        assert!(!calls[0].has_arg("--registry"));
    }

    #[tokio::test]
    async fn test_retry_success() {
        let env = TestEnv::new();
        env.seed_package_manager();
        let runner = Arc::new(FakeRunner::default());
        runner.push_response(failed("EEXIST: file already exists"));
        runner.push_response(ok());
        runner.push_response(ok());
        let installer = env.installer(runner.clone(), Locale::default());

        installer
            .install_or_update(codex(), InstallMode::Install)
            .await
            .unwrap();
        assert_eq!(runner.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_no_retry_on_other_failures() {
        let env = TestEnv::new();
        env.seed_package_manager();
        let runner = Arc::new(FakeRunner::default());
        runner.push_response(failed("npm ERR! 404 Not Found"));
        runner.push_response(ok());
        let installer = env.installer(runner.clone(), Locale::default());

        let err = installer
            .install_or_update(codex(), InstallMode::Install)
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::Failed { retried: false, .. }));
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_no_retry_on_timeout() {
        let env = TestEnv::new();
        env.seed_package_manager();
        let runner = Arc::new(FakeRunner::default());
        // 超时输出里即便出现特征文本也不重试
        let mut timed_out = CommandResult::timeout(Duration::from_secs(1));
        timed_out.stdout = "EBUSY".to_string();
        runner.push_response(timed_out);
        let installer = env.installer(runner.clone(), Locale::default());

        assert!(installer
            .install_or_update(codex(), InstallMode::Install)
            .await
            .is_err());
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_self_update_falls_back_to_reinstall() {
        let env = TestEnv::new();
        env.seed_package_manager();
        env.seed_tool("claude", "1.0.0");
        let runner = Arc::new(FakeRunner::default());
        runner.push_response(failed("update channel unavailable"));
        runner.push_response(ok());
        let installer = env.installer(runner.clone(), Locale::default());
        let claude = ToolDescriptor::by_id("claude-code").unwrap();

        installer
            .install_or_update(claude, InstallMode::Update)
            .await
            .unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].has_arg("update"));
        assert_eq!(calls[0].program_name(), "claude");
        assert!(calls[1].has_arg("@anthropic-ai/claude-code@latest"));
    }

    #[tokio::test]
    async fn test_self_update_stays_in_private_prefix() {
        let env = TestEnv::new();
        env.seed_package_manager();
        env.seed_tool("claude", "1.0.0");
        let runner = Arc::new(FakeRunner::default());
        runner.push_response(ok());
        let installer = env.installer(runner.clone(), Locale::new("zh_CN.UTF-8"));
        let claude = ToolDescriptor::by_id("claude-code").unwrap();

        installer
            .install_or_update(claude, InstallMode::Update)
            .await
            .unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        let env_value = |key: &str| {
            calls[0]
                .env
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| PathBuf::from(v))
        };
        assert_eq!(
            env_value("npm_config_prefix").as_deref(),
            Some(env.paths.root.path())
        );
        assert_eq!(
            env_value("npm_config_cache").as_deref(),
            Some(env.paths.package_cache.as_path())
        );
        assert_eq!(
            env_value("npm_config_registry"),
            Some(PathBuf::from("https://registry.npmmirror.com"))
        );
    }

    #[tokio::test]
    async fn test_latest_version_parses_last_line() {
        let env = TestEnv::new();
        env.seed_package_manager();
        let runner = Arc::new(FakeRunner::default());
        runner.push_response(CommandResult {
            success: true,
            stdout: "npm WARN config something\n0.46.0\n".to_string(),
            exit_code: Some(0),
            ..Default::default()
        });
        runner.push_response(CommandResult {
            success: true,
            stdout: "not-a-version".to_string(),
            exit_code: Some(0),
            ..Default::default()
        });
        let installer = env.installer(runner.clone(), Locale::default());

        assert_eq!(installer.latest_version(codex()).await.unwrap(), "0.46.0");
        assert!(installer.latest_version(codex()).await.is_err());
        assert!(runner.calls()[0].has_arg("view"));
    }
}
