//! 环境检查编排
//!
//! 一轮检查依次经过：决定是否执行 → 调整 PATH → 确保运行时 → 逐个检查工具，
//! 每轮（包括被跳过的）恰好发送一次 `CheckDone`。

use super::path_env::apply_search_path;
use super::state::{Admission, RunState};
use crate::core::error::{InstallError, LaunchError, ProvisionError, ToolActionError};
use crate::core::http::build_http_client;
use crate::models::{
    BootstrapEvent, BootstrapOptions, BootstrapPhase, CheckNotice, CheckOutcome, CheckReport,
    InstallMode, NoticeLevel, ProgressEvent, ToolDescriptor, ToolStatus, TriggerOutcome,
};
use crate::services::runtime::downloader::ArchiveDownloader;
use crate::services::runtime::{HttpDownloader, RuntimeProgress, RuntimeProvisioner};
use crate::services::tool::{PackageInstaller, TerminalLauncher, ToolLocator, VersionProbe};
use crate::services::version::is_newer;
use crate::utils::command::{CommandExecutor, CommandRunner};
use crate::utils::config::{Locale, SettingsStore};
use crate::utils::paths::AppPaths;
use crate::utils::platform::{current_policy, PlatformPolicy};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};

const EVENT_CAPACITY: usize = 256;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// 引导服务构建器
pub struct BootstrapServiceBuilder {
    paths: AppPaths,
    settings: Arc<dyn SettingsStore>,
    policy: Option<Arc<dyn PlatformPolicy>>,
    runner: Option<Arc<dyn CommandRunner>>,
    downloader: Option<Arc<dyn ArchiveDownloader>>,
    options: BootstrapOptions,
    locale: Locale,
    tools: Vec<ToolDescriptor>,
    system_runtime_lookup: bool,
}

impl BootstrapServiceBuilder {
    pub fn policy(mut self, policy: Arc<dyn PlatformPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn downloader(mut self, downloader: Arc<dyn ArchiveDownloader>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    pub fn options(mut self, options: BootstrapOptions) -> Self {
        self.options = options;
        self
    }

    pub fn locale(mut self, locale: Locale) -> Self {
        self.locale = locale;
        self
    }

    /// 替换受管工具列表（顺序即检查顺序）
    pub fn tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = tools;
        self
    }

    /// 是否接受系统常见位置预装的运行时
    pub fn system_runtime_lookup(mut self, enabled: bool) -> Self {
        self.system_runtime_lookup = enabled;
        self
    }

    pub fn build(self) -> anyhow::Result<BootstrapService> {
        let policy = self.policy.unwrap_or_else(current_policy);
        let runner = self
            .runner
            .unwrap_or_else(|| Arc::new(CommandExecutor::new()));
        let downloader = match self.downloader {
            Some(downloader) => downloader,
            None => Arc::new(HttpDownloader::new(
                build_http_client(CONNECT_TIMEOUT, READ_TIMEOUT)?,
                self.options.progress_interval,
            )),
        };

        let root = self.paths.root.clone();
        let mut provisioner = RuntimeProvisioner::new(
            policy.clone(),
            self.paths.clone(),
            self.locale.clone(),
            self.options.runtime_version.clone(),
            downloader,
            self.options.runtime_wait_timeout,
        );
        if !self.system_runtime_lookup {
            provisioner = provisioner.without_system_lookup();
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (phase, _) = watch::channel(BootstrapPhase::Idle);

        let inner = Inner {
            locator: ToolLocator::new(root.clone(), policy.clone()),
            probe: VersionProbe::new(runner.clone(), policy.clone(), self.options.probe_timeout)
                .with_private_root(root.clone()),
            installer: PackageInstaller::new(
                runner.clone(),
                policy.clone(),
                self.paths.clone(),
                self.locale,
                self.options.install_timeout,
            ),
            launcher: TerminalLauncher::new(runner, policy.clone(), root)
                .with_tools(self.tools.clone()),
            provisioner,
            policy,
            paths: self.paths,
            settings: self.settings,
            tools: self.tools,
            events,
            phase,
            run_state: Mutex::new(RunState::new()),
        };
        Ok(BootstrapService {
            inner: Arc::new(inner),
        })
    }
}

struct Inner {
    policy: Arc<dyn PlatformPolicy>,
    paths: AppPaths,
    settings: Arc<dyn SettingsStore>,
    locator: ToolLocator,
    probe: VersionProbe,
    installer: PackageInstaller,
    provisioner: RuntimeProvisioner,
    launcher: TerminalLauncher,
    tools: Vec<ToolDescriptor>,
    events: broadcast::Sender<BootstrapEvent>,
    phase: watch::Sender<BootstrapPhase>,
    run_state: Mutex<RunState>,
}

/// 环境引导服务
///
/// 克隆开销很小，克隆后共享同一份运行状态。
#[derive(Clone)]
pub struct BootstrapService {
    inner: Arc<Inner>,
}

impl BootstrapService {
    pub fn builder(paths: AppPaths, settings: Arc<dyn SettingsStore>) -> BootstrapServiceBuilder {
        BootstrapServiceBuilder {
            paths,
            settings,
            policy: None,
            runner: None,
            downloader: None,
            options: BootstrapOptions::default(),
            locale: Locale::default(),
            tools: ToolDescriptor::all().to_vec(),
            system_runtime_lookup: true,
        }
    }

    /// 订阅事件流
    pub fn subscribe(&self) -> broadcast::Receiver<BootstrapEvent> {
        self.inner.events.subscribe()
    }

    /// 订阅当前阶段
    pub fn subscribe_phase(&self) -> watch::Receiver<BootstrapPhase> {
        self.inner.phase.subscribe()
    }

    pub fn phase(&self) -> BootstrapPhase {
        *self.inner.phase.borrow()
    }

    pub async fn is_running(&self) -> bool {
        self.inner.run_state.lock().await.is_running()
    }

    /// 在后台启动一轮检查；已有检查在进行时合并到下一轮
    pub async fn trigger(&self, force: bool) -> TriggerOutcome {
        let admission = self.inner.run_state.lock().await.admit(force);
        match admission {
            Admission::Queued => {
                tracing::debug!(force, "检查进行中，请求已合并");
                TriggerOutcome::Coalesced
            }
            Admission::Run { force } => {
                self.inner.clone().spawn_drive(force);
                TriggerOutcome::Started
            }
        }
    }

    /// 执行一轮检查并等待结果
    ///
    /// 已有检查在进行时返回 `Coalesced`，请求并入下一轮。
    /// 检查在独立任务中执行，调用方放弃等待不会中断本轮，也不会卡住运行状态。
    pub async fn run_check(&self, force: bool) -> CheckOutcome {
        let admission = self.inner.run_state.lock().await.admit(force);
        let Admission::Run { force } = admission else {
            tracing::debug!(force, "检查进行中，请求已合并");
            return CheckOutcome::Coalesced;
        };

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let outcome = inner.run_pass(force).await;
            inner.complete_pass().await;
            outcome
        });

        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "检查任务异常退出");
                self.inner.complete_pass().await;
                CheckOutcome::Aborted(CheckReport {
                    forced: force,
                    aborted: true,
                    ..Default::default()
                })
            }
        }
    }

    /// 手动安装单个工具
    pub async fn install_tool(&self, tool_id: &str) -> Result<ToolStatus, ToolActionError> {
        self.inner.tool_action(tool_id, InstallMode::Install).await
    }

    /// 手动更新单个工具
    pub async fn update_tool(&self, tool_id: &str) -> Result<ToolStatus, ToolActionError> {
        self.inner.tool_action(tool_id, InstallMode::Update).await
    }

    pub async fn tool_status(&self, tool_id: &str) -> Result<ToolStatus, InstallError> {
        let descriptor = self.inner.descriptor(tool_id)?;
        Ok(self.inner.read_status(&descriptor).await)
    }

    pub async fn all_tool_status(&self) -> Vec<ToolStatus> {
        let mut statuses = Vec::with_capacity(self.inner.tools.len());
        for descriptor in &self.inner.tools {
            statuses.push(self.inner.read_status(descriptor).await);
        }
        statuses
    }

    /// 在系统终端中打开工具
    pub fn launch_in_terminal(&self, tool_id: &str, cwd: &Path) -> Result<PathBuf, LaunchError> {
        self.inner.launcher.launch(tool_id, cwd)
    }
}

/// 工具检查中需要汇总到报告的结果
struct ToolOutcome {
    status: ToolStatus,
    failed: bool,
}

impl Inner {
    fn spawn_drive(self: Arc<Self>, force: bool) {
        tokio::spawn(async move {
            self.drive(force).await;
        });
    }

    /// 连续执行检查，直到没有待执行轮次
    async fn drive(self: Arc<Self>, mut force: bool) {
        loop {
            self.run_pass(force).await;
            match self.run_state.lock().await.finish() {
                Some(next) => force = next,
                None => break,
            }
        }
    }

    /// 结束当前轮次；有合并进来的请求时在后台继续执行
    async fn complete_pass(self: &Arc<Self>) {
        let next = self.run_state.lock().await.finish();
        if let Some(force) = next {
            self.clone().spawn_drive(force);
        }
    }

    fn emit(&self, event: BootstrapEvent) {
        // 没有订阅者时发送失败，忽略
        let _ = self.events.send(event);
    }

    fn set_phase(&self, phase: BootstrapPhase) {
        self.phase.send_replace(phase);
        tracing::debug!(phase = ?phase, "引导阶段变更");
        self.emit(BootstrapEvent::Phase(phase));
    }

    /// 发送日志行，并同步写入 tracing
    fn notice(&self, notice: CheckNotice) {
        let key = notice.key();
        match notice.level() {
            NoticeLevel::Info => tracing::info!(key, notice = ?notice, "环境检查"),
            NoticeLevel::Warn => tracing::warn!(key, notice = ?notice, "环境检查"),
            NoticeLevel::Error => tracing::error!(key, notice = ?notice, "环境检查"),
        }
        self.emit(BootstrapEvent::Log(notice));
    }

    fn finish_pass(&self, phase: BootstrapPhase, report: &CheckReport) {
        self.set_phase(phase);
        self.emit(BootstrapEvent::CheckDone(report.clone()));
        if !report.skipped {
            if let Err(e) = self.settings.record_last_checked(Utc::now()) {
                tracing::warn!(error = ?e, "记录检查时间失败");
            }
        }
    }

    async fn run_pass(&self, force: bool) -> CheckOutcome {
        self.set_phase(BootstrapPhase::Deciding);
        let mut report = CheckReport {
            forced: force,
            ..Default::default()
        };

        // 私有根目录不存在即首次运行，无论是否暂停都执行完整检查
        if !self.paths.root.is_provisioned() {
            self.notice(CheckNotice::FirstRunDetected {
                root: self.paths.root.path().display().to_string(),
            });
            report.forced = true;
        } else if !force && self.settings.pause_checks() {
            self.notice(CheckNotice::SkippedByPolicy);
            report.skipped = true;
            self.finish_pass(BootstrapPhase::Done, &report);
            return CheckOutcome::SkippedByPolicy;
        }

        self.set_phase(BootstrapPhase::PathSetup);
        let added = apply_search_path(self.policy.as_ref(), &self.paths.root);
        if !added.is_empty() {
            self.notice(CheckNotice::PathAugmented {
                added: added.iter().map(|p| p.display().to_string()).collect(),
            });
        }

        self.set_phase(BootstrapPhase::RuntimeCheck);
        match self.check_runtime().await {
            Ok(path) => report.runtime_path = Some(path.display().to_string()),
            Err(e) => {
                self.notice(CheckNotice::RuntimeFailed {
                    kind: e.kind().to_string(),
                    error: e.to_string(),
                });
                report.aborted = true;
                self.finish_pass(BootstrapPhase::Aborted, &report);
                return CheckOutcome::Aborted(report);
            }
        }

        self.set_phase(BootstrapPhase::ToolLoop);
        for descriptor in &self.tools {
            let outcome = self.check_tool(descriptor).await;
            if outcome.failed {
                report.failed_tools.push(descriptor.id.to_string());
            }
            self.emit(BootstrapEvent::Tool(outcome.status.clone()));
            report.tools.push(outcome.status);
        }

        self.finish_pass(BootstrapPhase::Done, &report);
        CheckOutcome::Completed(report)
    }

    async fn check_runtime(&self) -> Result<PathBuf, ProvisionError> {
        if let Some(path) = self.provisioner.find_runtime() {
            self.notice(CheckNotice::RuntimeFound {
                path: path.display().to_string(),
            });
            return Ok(path);
        }

        self.set_phase(BootstrapPhase::RuntimeInstalling);
        let path = self.ensure_runtime().await?;
        self.notice(CheckNotice::RuntimeInstalled {
            path: path.display().to_string(),
        });
        Ok(path)
    }

    /// 确保运行时可用，并把下载与解压进度转成事件
    async fn ensure_runtime(&self) -> Result<PathBuf, ProvisionError> {
        self.provisioner
            .ensure_runtime(&|progress| match progress {
                RuntimeProgress::Downloading { url } => {
                    self.notice(CheckNotice::RuntimeDownloading { url })
                }
                RuntimeProgress::Download(p) => self.emit(BootstrapEvent::Progress(ProgressEvent {
                    phase: BootstrapPhase::RuntimeInstalling,
                    message: format!("下载运行时 {} 字节", p.bytes_downloaded),
                    percent: p.percent,
                })),
                RuntimeProgress::Extracting => self.emit(BootstrapEvent::Progress(ProgressEvent {
                    phase: BootstrapPhase::RuntimeInstalling,
                    message: "解压运行时".to_string(),
                    percent: None,
                })),
                RuntimeProgress::Installed { .. } => {}
            })
            .await
    }

    async fn check_tool(&self, descriptor: &ToolDescriptor) -> ToolOutcome {
        let tool = descriptor.id.to_string();

        let Some(located) = self.locator.locate(descriptor) else {
            // 系统中的同名工具不接管，只提示后在私有目录安装
            if let Some(path) = self.locator.find_outside_root(descriptor) {
                self.notice(CheckNotice::ToolOutsideRoot {
                    tool: tool.clone(),
                    path: path.display().to_string(),
                });
            }
            self.notice(CheckNotice::ToolMissing { tool: tool.clone() });
            return self.provision_tool(descriptor, InstallMode::Install).await;
        };

        let current = match self
            .probe
            .probe_with_args(&located.path, descriptor.id, descriptor.version_args)
            .await
        {
            Ok(version) => version,
            Err(e) => {
                self.notice(CheckNotice::ToolVersionUnknown {
                    tool,
                    error: e.to_string(),
                });
                return ToolOutcome {
                    status: installed_status(descriptor, &located.path, None),
                    failed: false,
                };
            }
        };
        let status = installed_status(descriptor, &located.path, Some(current.clone()));

        if !descriptor.check_updates {
            self.notice(CheckNotice::ToolUpToDate {
                tool,
                version: current,
            });
            return ToolOutcome {
                status,
                failed: false,
            };
        }

        match self.installer.latest_version(descriptor).await {
            Ok(latest) if is_newer(&latest, &current) => {
                self.notice(CheckNotice::ToolUpdating {
                    tool,
                    from: current,
                    to: latest,
                });
                let outcome = self.provision_tool(descriptor, InstallMode::Update).await;
                if outcome.failed {
                    // 更新失败时保留旧版本的状态
                    return ToolOutcome {
                        status,
                        failed: true,
                    };
                }
                outcome
            }
            Ok(_) => {
                self.notice(CheckNotice::ToolUpToDate {
                    tool,
                    version: current,
                });
                ToolOutcome {
                    status,
                    failed: false,
                }
            }
            Err(e) => {
                self.notice(CheckNotice::LatestVersionUnavailable {
                    tool,
                    error: e.to_string(),
                });
                ToolOutcome {
                    status,
                    failed: false,
                }
            }
        }
    }

    /// 安装或更新后重新定位并探测
    async fn provision_tool(&self, descriptor: &ToolDescriptor, mode: InstallMode) -> ToolOutcome {
        let tool = descriptor.id.to_string();
        let failed_notice = |error: String| match mode {
            InstallMode::Install => CheckNotice::ToolInstallFailed {
                tool: tool.clone(),
                error,
            },
            InstallMode::Update => CheckNotice::ToolUpdateFailed {
                tool: tool.clone(),
                error,
            },
        };

        if let Err(e) = self.installer.install_or_update(descriptor, mode).await {
            self.notice(failed_notice(e.to_string()));
            return ToolOutcome {
                status: ToolStatus::missing(descriptor),
                failed: true,
            };
        }

        let status = self.read_status(descriptor).await;
        if !status.installed {
            self.notice(failed_notice("安装命令成功但私有目录中未找到可执行文件".to_string()));
            return ToolOutcome {
                status,
                failed: true,
            };
        }

        let version = status.version.clone();
        self.notice(match mode {
            InstallMode::Install => CheckNotice::ToolInstalled { tool, version },
            InstallMode::Update => CheckNotice::ToolUpdated { tool, version },
        });
        ToolOutcome {
            status,
            failed: false,
        }
    }

    async fn read_status(&self, descriptor: &ToolDescriptor) -> ToolStatus {
        let Some(located) = self.locator.locate(descriptor) else {
            return ToolStatus::missing(descriptor);
        };
        let version = match self
            .probe
            .probe_with_args(&located.path, descriptor.id, descriptor.version_args)
            .await
        {
            Ok(version) => Some(version),
            Err(e) => {
                tracing::warn!(tool_id = descriptor.id, error = %e, "读取工具版本失败");
                None
            }
        };
        installed_status(descriptor, &located.path, version)
    }

    fn descriptor(&self, tool_id: &str) -> Result<ToolDescriptor, InstallError> {
        self.tools
            .iter()
            .find(|d| d.id == tool_id)
            .copied()
            .ok_or_else(|| InstallError::UnknownTool(tool_id.to_string()))
    }

    async fn tool_action(
        &self,
        tool_id: &str,
        mode: InstallMode,
    ) -> Result<ToolStatus, ToolActionError> {
        let descriptor = self.descriptor(tool_id)?;
        apply_search_path(self.policy.as_ref(), &self.paths.root);
        self.ensure_runtime().await?;

        tracing::info!(tool_id, mode = ?mode, "手动安装工具");
        self.installer.install_or_update(&descriptor, mode).await?;

        let status = self.read_status(&descriptor).await;
        if !status.installed {
            return Err(InstallError::NotFoundAfterInstall {
                tool: descriptor.name.to_string(),
            }
            .into());
        }
        self.emit(BootstrapEvent::Tool(status.clone()));
        Ok(status)
    }
}

fn installed_status(
    descriptor: &ToolDescriptor,
    path: &Path,
    version: Option<String>,
) -> ToolStatus {
    ToolStatus {
        id: descriptor.id.to_string(),
        name: descriptor.name.to_string(),
        installed: true,
        version,
        path: Some(path.display().to_string()),
    }
}
