//! 平台策略
//!
//! 三个平台的差异（可执行文件后缀、运行时压缩包命名、解压方式、终端启动方式）
//! 收敛到 `PlatformPolicy`，引导状态机本身只实现一次。

use super::command::CommandSpec;
use crate::core::error::ProvisionError;
use crate::services::runtime::extractor::extract_archive;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 操作系统类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsFamily {
    Linux,
    MacOs,
    Windows,
}

impl OsFamily {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            OsFamily::Windows
        } else if cfg!(target_os = "macos") {
            OsFamily::MacOs
        } else {
            OsFamily::Linux
        }
    }

    /// 运行时下载地址中使用的平台名
    pub fn dist_name(&self) -> &'static str {
        match self {
            OsFamily::Linux => "linux",
            OsFamily::MacOs => "darwin",
            OsFamily::Windows => "win",
        }
    }
}

/// CPU 架构
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X64,
    Arm64,
    Unsupported,
}

impl Arch {
    pub fn current() -> Self {
        match std::env::consts::ARCH {
            "x86_64" => Arch::X64,
            "aarch64" => Arch::Arm64,
            _ => Arch::Unsupported,
        }
    }

    pub fn dist_name(&self) -> Option<&'static str> {
        match self {
            Arch::X64 => Some("x64"),
            Arch::Arm64 => Some("arm64"),
            Arch::Unsupported => None,
        }
    }
}

/// 压缩包格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    Zip,
}

impl ArchiveFormat {
    /// 根据文件扩展名判断格式
    pub fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(ArchiveFormat::TarGz)
        } else if lower.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else {
            None
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::TarGz => "tar.gz",
            ArchiveFormat::Zip => "zip",
        }
    }
}

/// 运行时压缩包
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeArchive {
    pub file_name: String,
    pub format: ArchiveFormat,
}

/// 平台策略
pub trait PlatformPolicy: Send + Sync + fmt::Debug {
    fn os(&self) -> OsFamily;

    fn arch(&self) -> Arch;

    /// 私有可执行目录（加入 PATH，且在子进程 PATH 中优先）
    fn private_path_entries(&self, root: &Path) -> Vec<PathBuf>;

    /// 系统常规可执行目录
    fn system_path_entries(&self) -> Vec<PathBuf>;

    /// 工具在私有根目录内的候选路径，按优先级排列
    fn tool_candidates(&self, root: &Path, binary: &str, package: &str) -> Vec<PathBuf>;

    /// 运行时在私有根目录内的候选路径
    fn runtime_candidates(&self, root: &Path) -> Vec<PathBuf>;

    /// 系统中常见的运行时位置（运行时允许预装在系统中）
    fn common_runtime_locations(&self) -> Vec<PathBuf>;

    /// 包管理器在私有根目录内的候选路径
    fn package_manager_candidates(&self, root: &Path) -> Vec<PathBuf>;

    /// 包管理器名称（系统回退查找时使用）
    fn package_manager_name(&self) -> &'static str {
        "npm"
    }

    /// 运行时压缩包命名
    fn runtime_archive(&self, version: &str) -> Option<RuntimeArchive> {
        let arch = self.arch().dist_name()?;
        let format = if self.os() == OsFamily::Windows {
            ArchiveFormat::Zip
        } else {
            ArchiveFormat::TarGz
        };
        Some(RuntimeArchive {
            file_name: format!(
                "node-v{}-{}-{}.{}",
                version.trim_start_matches('v'),
                self.os().dist_name(),
                arch,
                format.extension()
            ),
            format,
        })
    }

    /// 解压运行时压缩包，去掉压缩包内带版本号的顶层目录
    fn extract_runtime(
        &self,
        archive: &Path,
        format: ArchiveFormat,
        root: &Path,
    ) -> Result<(), ProvisionError> {
        extract_archive(archive, root, format, 1)
    }

    /// 构造可执行的命令（Windows 下 .cmd/.bat 需要经由 cmd）
    fn command_for(&self, program: &Path) -> CommandSpec {
        CommandSpec::new(program.as_os_str())
    }

    /// 在新终端窗口中启动工具
    fn terminal_command(&self, tool: &Path, cwd: &Path) -> CommandSpec;
}

/// 类 Unix 平台共用的工具候选路径
fn unix_tool_candidates(root: &Path, binary: &str, package: &str) -> Vec<PathBuf> {
    vec![
        root.join("bin").join(binary),
        root.join(binary),
        root.join("lib")
            .join("node_modules")
            .join(package)
            .join("bin")
            .join(binary),
        root.join("node_modules")
            .join(package)
            .join("bin")
            .join(binary),
    ]
}

/// 终端中执行的命令行（单引号转义）
fn shell_quote(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', r"'\''"))
}

#[derive(Debug, Clone)]
pub struct LinuxPolicy {
    pub arch: Arch,
}

impl PlatformPolicy for LinuxPolicy {
    fn os(&self) -> OsFamily {
        OsFamily::Linux
    }

    fn arch(&self) -> Arch {
        self.arch
    }

    fn private_path_entries(&self, root: &Path) -> Vec<PathBuf> {
        vec![root.join("bin")]
    }

    fn system_path_entries(&self) -> Vec<PathBuf> {
        ["/usr/local/bin", "/usr/bin", "/bin"]
            .iter()
            .map(PathBuf::from)
            .collect()
    }

    fn tool_candidates(&self, root: &Path, binary: &str, package: &str) -> Vec<PathBuf> {
        unix_tool_candidates(root, binary, package)
    }

    fn runtime_candidates(&self, root: &Path) -> Vec<PathBuf> {
        vec![root.join("bin").join("node")]
    }

    fn common_runtime_locations(&self) -> Vec<PathBuf> {
        ["/usr/local/bin/node", "/usr/bin/node", "/snap/bin/node"]
            .iter()
            .map(PathBuf::from)
            .collect()
    }

    fn package_manager_candidates(&self, root: &Path) -> Vec<PathBuf> {
        vec![root.join("bin").join("npm")]
    }

    fn terminal_command(&self, tool: &Path, cwd: &Path) -> CommandSpec {
        CommandSpec::new("x-terminal-emulator")
            .arg("-e")
            .arg(tool.as_os_str())
            .current_dir(cwd)
    }
}

#[derive(Debug, Clone)]
pub struct MacPolicy {
    pub arch: Arch,
}

impl PlatformPolicy for MacPolicy {
    fn os(&self) -> OsFamily {
        OsFamily::MacOs
    }

    fn arch(&self) -> Arch {
        self.arch
    }

    fn private_path_entries(&self, root: &Path) -> Vec<PathBuf> {
        vec![root.join("bin")]
    }

    fn system_path_entries(&self) -> Vec<PathBuf> {
        ["/opt/homebrew/bin", "/usr/local/bin", "/usr/bin", "/bin"]
            .iter()
            .map(PathBuf::from)
            .collect()
    }

    fn tool_candidates(&self, root: &Path, binary: &str, package: &str) -> Vec<PathBuf> {
        unix_tool_candidates(root, binary, package)
    }

    fn runtime_candidates(&self, root: &Path) -> Vec<PathBuf> {
        vec![root.join("bin").join("node")]
    }

    fn common_runtime_locations(&self) -> Vec<PathBuf> {
        ["/opt/homebrew/bin/node", "/usr/local/bin/node"]
            .iter()
            .map(PathBuf::from)
            .collect()
    }

    fn package_manager_candidates(&self, root: &Path) -> Vec<PathBuf> {
        vec![root.join("bin").join("npm")]
    }

    fn terminal_command(&self, tool: &Path, cwd: &Path) -> CommandSpec {
        let script = format!(
            "tell application \"Terminal\" to do script \"cd {} && {}\"",
            shell_quote(cwd).replace('"', "\\\""),
            shell_quote(tool).replace('"', "\\\"")
        );
        CommandSpec::new("osascript")
            .arg("-e")
            .arg(script)
            .arg("-e")
            .arg("tell application \"Terminal\" to activate")
    }
}

#[derive(Debug, Clone)]
pub struct WindowsPolicy {
    pub arch: Arch,
}

impl WindowsPolicy {
    fn env_dir(var: &str, fallback: &str) -> PathBuf {
        std::env::var_os(var)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(fallback))
    }
}

impl PlatformPolicy for WindowsPolicy {
    fn os(&self) -> OsFamily {
        OsFamily::Windows
    }

    fn arch(&self) -> Arch {
        self.arch
    }

    fn private_path_entries(&self, root: &Path) -> Vec<PathBuf> {
        // npm 在 Windows 上把全局命令直接放在 prefix 根目录
        vec![root.to_path_buf(), root.join("bin")]
    }

    fn system_path_entries(&self) -> Vec<PathBuf> {
        let system_root = Self::env_dir("SystemRoot", r"C:\Windows");
        vec![
            system_root.join("System32"),
            system_root.clone(),
            system_root.join("System32").join("WindowsPowerShell").join("v1.0"),
        ]
    }

    fn tool_candidates(&self, root: &Path, binary: &str, package: &str) -> Vec<PathBuf> {
        vec![
            root.join(format!("{binary}.cmd")),
            root.join(format!("{binary}.exe")),
            root.join("bin").join(format!("{binary}.exe")),
            root.join("bin").join(format!("{binary}.cmd")),
            root.join("node_modules")
                .join(package)
                .join("bin")
                .join(format!("{binary}.exe")),
            root.join(binary),
        ]
    }

    fn runtime_candidates(&self, root: &Path) -> Vec<PathBuf> {
        vec![root.join("node.exe"), root.join("bin").join("node.exe")]
    }

    fn common_runtime_locations(&self) -> Vec<PathBuf> {
        let program_files = Self::env_dir("ProgramFiles", r"C:\Program Files");
        vec![program_files.join("nodejs").join("node.exe")]
    }

    fn package_manager_candidates(&self, root: &Path) -> Vec<PathBuf> {
        vec![root.join("npm.cmd"), root.join("bin").join("npm.cmd")]
    }

    fn command_for(&self, program: &Path) -> CommandSpec {
        let is_script = program
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("cmd") || ext.eq_ignore_ascii_case("bat"))
            .unwrap_or(false);
        if is_script {
            CommandSpec::new("cmd").arg("/C").arg(program.as_os_str())
        } else {
            CommandSpec::new(program.as_os_str())
        }
    }

    fn terminal_command(&self, tool: &Path, cwd: &Path) -> CommandSpec {
        // start 把第一个带引号的参数当作窗口标题
        CommandSpec::new("cmd")
            .args(["/C", "start"])
            .raw_arg("\"DuckCoding\"")
            .raw_arg(format!("\"{}\"", tool.display()))
            .current_dir(cwd)
    }
}

/// 当前平台的策略
pub fn current_policy() -> Arc<dyn PlatformPolicy> {
    policy_for(OsFamily::current(), Arch::current())
}

pub fn policy_for(os: OsFamily, arch: Arch) -> Arc<dyn PlatformPolicy> {
    match os {
        OsFamily::Linux => Arc::new(LinuxPolicy { arch }),
        OsFamily::MacOs => Arc::new(MacPolicy { arch }),
        OsFamily::Windows => Arc::new(WindowsPolicy { arch }),
    }
}
