// 单元测试共用的替身实现
use crate::core::error::ProvisionError;
use crate::models::{ToolDescriptor, DEFAULT_RUNTIME_VERSION};
use crate::services::runtime::downloader::{ArchiveDownloader, DownloadProgress, ProgressCallback};
use crate::services::runtime::RuntimeProvisioner;
use crate::services::tool::PackageInstaller;
use crate::utils::command::{CommandResult, CommandRunner, CommandSpec};
use crate::utils::config::Locale;
use crate::utils::paths::AppPaths;
use crate::utils::platform::{Arch, LinuxPolicy, OsFamily, PlatformPolicy};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// 模拟的包管理器行为
#[derive(Debug, Default)]
struct FakeNpm {
    root: PathBuf,
    latest: HashMap<String, String>,
    failing: HashSet<String>,
}

/// 命令执行替身
///
/// 优先返回预置结果；队列为空且启用了包管理器模拟时按命令内容模拟 npm 与工具行为，
/// 否则一律成功。
#[derive(Debug, Default)]
pub struct FakeRunner {
    responses: Mutex<VecDeque<CommandResult>>,
    calls: Mutex<Vec<CommandSpec>>,
    spawned: Mutex<Vec<CommandSpec>>,
    npm: Option<Mutex<FakeNpm>>,
}

fn ok_with(stdout: impl Into<String>) -> CommandResult {
    CommandResult {
        success: true,
        stdout: stdout.into(),
        exit_code: Some(0),
        ..Default::default()
    }
}

fn failed_with(stderr: impl Into<String>) -> CommandResult {
    CommandResult {
        success: false,
        stderr: stderr.into(),
        exit_code: Some(1),
        ..Default::default()
    }
}

/// 各工具 `--version` 的输出形态
pub fn version_output(binary: &str, version: &str) -> String {
    match binary {
        "claude" => format!("{version} (Claude Code)"),
        "codex" => format!("codex-cli {version}"),
        _ => version.to_string(),
    }
}

fn descriptor_for_package(package: &str) -> Option<&'static ToolDescriptor> {
    ToolDescriptor::all()
        .iter()
        .find(|d| d.package_for(OsFamily::Linux) == package)
}

fn descriptor_for_binary(binary: &str) -> Option<&'static ToolDescriptor> {
    ToolDescriptor::all()
        .iter()
        .find(|d| d.binary_names.contains(&binary))
}

impl FakeRunner {
    /// 模拟安装到 `root` 的包管理器
    pub fn npm(root: &Path) -> Self {
        FakeRunner {
            npm: Some(Mutex::new(FakeNpm {
                root: root.to_path_buf(),
                ..Default::default()
            })),
            ..Default::default()
        }
    }

    pub fn with_latest(self, package: &str, version: &str) -> Self {
        self.set_latest(package, version);
        self
    }

    pub fn failing_package(self, package: &str) -> Self {
        if let Some(npm) = &self.npm {
            npm.lock().unwrap().failing.insert(package.to_string());
        }
        self
    }

    pub fn set_latest(&self, package: &str, version: &str) {
        if let Some(npm) = &self.npm {
            npm.lock()
                .unwrap()
                .latest
                .insert(package.to_string(), version.to_string());
        }
    }

    pub fn push_response(&self, result: CommandResult) {
        self.responses.lock().unwrap().push_back(result);
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn spawned(&self) -> Vec<CommandSpec> {
        self.spawned.lock().unwrap().clone()
    }

    /// 会改动私有目录的命令（安装或自更新）
    pub fn mutating_calls(&self) -> Vec<CommandSpec> {
        self.calls()
            .into_iter()
            .filter(|c| c.has_arg("install") || c.has_arg("update"))
            .collect()
    }

    fn simulate(&self, npm: &FakeNpm, spec: &CommandSpec) -> CommandResult {
        let latest_of = |package: &str| {
            npm.latest
                .get(package)
                .cloned()
                .unwrap_or_else(|| "1.0.0".to_string())
        };

        if spec.has_arg("install") {
            let Some(package) = spec.args.iter().find_map(|a| {
                a.to_str()
                    .and_then(|s| s.strip_suffix("@latest"))
                    .map(str::to_string)
            }) else {
                return failed_with("npm ERR! missing package");
            };
            if npm.failing.contains(&package) {
                return failed_with(format!("npm ERR! 404 Not Found - {package}"));
            }
            let Some(descriptor) = descriptor_for_package(&package) else {
                return failed_with(format!("npm ERR! 404 Not Found - {package}"));
            };
            let binary = descriptor.binary_names[0];
            let bin_dir = npm.root.join("bin");
            let written = fs::create_dir_all(&bin_dir).and_then(|_| {
                fs::write(
                    bin_dir.join(binary),
                    version_output(binary, &latest_of(&package)),
                )
            });
            return match written {
                Ok(()) => ok_with("added 1 package in 1s"),
                Err(e) => failed_with(e.to_string()),
            };
        }

        if spec.has_arg("view") {
            let package = spec
                .args
                .iter()
                .skip_while(|a| *a != "view")
                .nth(1)
                .and_then(|a| a.to_str())
                .unwrap_or_default()
                .to_string();
            return ok_with(latest_of(&package));
        }

        let program = PathBuf::from(&spec.program);
        let binary = spec.program_name();
        if spec.has_arg("--version") {
            return match fs::read_to_string(&program) {
                Ok(content) => ok_with(content.trim().to_string()),
                Err(e) => failed_with(e.to_string()),
            };
        }
        if spec.has_arg("update") {
            let Some(descriptor) = descriptor_for_binary(&binary) else {
                return failed_with("unknown tool");
            };
            let version = latest_of(descriptor.package_for(OsFamily::Linux));
            return match fs::write(&program, version_output(&binary, &version)) {
                Ok(()) => ok_with(format!("Successfully updated to version {version}")),
                Err(e) => failed_with(e.to_string()),
            };
        }

        ok_with("")
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, spec: &CommandSpec) -> CommandResult {
        self.calls.lock().unwrap().push(spec.clone());
        if let Some(result) = self.responses.lock().unwrap().pop_front() {
            return result;
        }
        match &self.npm {
            Some(npm) => {
                let npm = npm.lock().unwrap();
                self.simulate(&npm, spec)
            }
            None => ok_with(""),
        }
    }

    fn spawn_detached(&self, spec: &CommandSpec) -> io::Result<()> {
        self.spawned.lock().unwrap().push(spec.clone());
        Ok(())
    }
}

/// 下载替身：把内存中的压缩包写入目标文件
pub struct FakeDownloader {
    payload: Result<Vec<u8>, ProvisionError>,
    delay: Duration,
    downloads: AtomicUsize,
}

impl FakeDownloader {
    /// 最小化的 node 压缩包（bin/node 与 bin/npm）
    pub fn node() -> Self {
        let top = format!("node-v{DEFAULT_RUNTIME_VERSION}-linux-x64");
        let node = format!("{top}/bin/node");
        let npm = format!("{top}/bin/npm");
        let manifest = format!("{top}/lib/node_modules/npm/package.json");
        Self::with_entries(&[
            (node.as_str(), "#!/bin/sh\necho v22.12.0\n"),
            (npm.as_str(), "#!/bin/sh\n"),
            (manifest.as_str(), "{}"),
        ])
    }

    pub fn with_entries(entries: &[(&str, &str)]) -> Self {
        let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_path(name).unwrap();
            header.set_size(content.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append(&header, content.as_bytes()).unwrap();
        }
        let bytes = builder.into_inner().unwrap().finish().unwrap();
        FakeDownloader {
            payload: Ok(bytes),
            delay: Duration::ZERO,
            downloads: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: ProvisionError) -> Self {
        FakeDownloader {
            payload: Err(error),
            delay: Duration::ZERO,
            downloads: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArchiveDownloader for FakeDownloader {
    async fn download(
        &self,
        _url: &str,
        dest: &Path,
        on_progress: &ProgressCallback<'_>,
    ) -> Result<u64, ProvisionError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let bytes = self.payload.clone()?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| ProvisionError::io(parent, e))?;
        }
        fs::write(dest, &bytes).map_err(|e| ProvisionError::io(dest, e))?;
        let len = bytes.len() as u64;
        on_progress(DownloadProgress::new(0, Some(len)));
        on_progress(DownloadProgress::new(len, Some(len)));
        Ok(len)
    }
}

/// 临时目录中的私有根目录与缓存目录
pub struct TestEnv {
    pub dir: TempDir,
    pub paths: AppPaths,
    pub policy: Arc<dyn PlatformPolicy>,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let paths = AppPaths::with_dirs(dir.path().join("runtime"), dir.path().join("cache"));
        TestEnv {
            dir,
            paths,
            policy: Arc::new(LinuxPolicy { arch: Arch::X64 }),
        }
    }

    fn write_bin(&self, name: &str, content: &str) -> PathBuf {
        let bin = self.paths.root.bin_dir();
        fs::create_dir_all(&bin).unwrap();
        let path = bin.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    pub fn seed_package_manager(&self) -> PathBuf {
        self.write_bin("npm", "#!/bin/sh\n")
    }

    pub fn seed_runtime(&self) -> PathBuf {
        self.write_bin("node", "#!/bin/sh\n")
    }

    /// 写入工具文件，内容即 `--version` 的输出
    pub fn seed_tool(&self, binary: &str, output: &str) -> PathBuf {
        self.write_bin(binary, output)
    }

    pub fn installer(&self, runner: Arc<FakeRunner>, locale: Locale) -> PackageInstaller {
        PackageInstaller::new(
            runner,
            self.policy.clone(),
            self.paths.clone(),
            locale,
            Duration::from_secs(5),
        )
    }

    pub fn provisioner(
        &self,
        downloader: Arc<FakeDownloader>,
        locale: Locale,
    ) -> RuntimeProvisioner {
        RuntimeProvisioner::new(
            self.policy.clone(),
            self.paths.clone(),
            locale,
            DEFAULT_RUNTIME_VERSION,
            downloader,
            Duration::from_secs(5),
        )
        .without_system_lookup()
    }
}
