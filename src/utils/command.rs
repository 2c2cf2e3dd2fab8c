use async_trait::async_trait;
use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

/// 需要从子进程环境中移除的代理变量
const PROXY_VARS: [&str; 6] = [
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "ALL_PROXY",
    "http_proxy",
    "https_proxy",
    "all_proxy",
];

/// 待执行的命令（直接执行程序，不经过 shell）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
    /// 原样追加在 `args` 之后的参数（Windows 上不做引号转义）
    pub raw_args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(OsString, OsString)>,
    pub env_remove: Vec<OsString>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<OsString>) -> Self {
        CommandSpec {
            program: program.into(),
            args: Vec::new(),
            raw_args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            env_remove: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// 调用方自行负责引号，cmd 的 `start` 标题等参数需要这样传
    pub fn raw_arg(mut self, arg: impl Into<OsString>) -> Self {
        self.raw_args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// 移除所有代理环境变量（部分工具在代理环境下版本检查会出错）
    pub fn without_proxy(mut self) -> Self {
        self.env_remove
            .extend(PROXY_VARS.iter().map(|v| OsString::from(*v)));
        self
    }

    /// 参数中是否包含指定值（用于日志与测试断言）
    pub fn has_arg(&self, value: &str) -> bool {
        self.args.iter().any(|a| a == OsStr::new(value))
    }

    /// 命令的可读形式
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .chain(self.raw_args.iter())
            .map(|s| s.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// 程序文件名（不含目录）
    pub fn program_name(&self) -> String {
        Path::new(&self.program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// 命令执行结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl CommandResult {
    pub fn from_output(output: Output) -> Self {
        CommandResult {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            exit_code: output.status.code(),
            timed_out: false,
        }
    }

    pub fn from_error(error: io::Error) -> Self {
        CommandResult {
            success: false,
            stdout: String::new(),
            stderr: error.to_string(),
            exit_code: None,
            timed_out: false,
        }
    }

    pub fn timeout(after: Duration) -> Self {
        CommandResult {
            success: false,
            stdout: String::new(),
            stderr: format!("命令执行超时 ({}s)", after.as_secs()),
            exit_code: None,
            timed_out: true,
        }
    }

    /// stdout 与 stderr 合并输出
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
            (false, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (true, true) => String::new(),
        }
    }
}

/// 子进程执行接口
///
/// 所有外部命令（版本探测、包管理器、工具自更新）都经由此接口执行，
/// 测试中可替换为脚本化实现。
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// 执行命令并等待结束
    async fn run(&self, spec: &CommandSpec) -> CommandResult;

    /// 启动命令后立即返回（用于在终端中打开工具）
    fn spawn_detached(&self, spec: &CommandSpec) -> io::Result<()>;
}

/// 命令执行器
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor;

impl CommandExecutor {
    pub fn new() -> Self {
        CommandExecutor
    }

    fn build(spec: &CommandSpec) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&spec.program);
        command.args(&spec.args);
        for arg in &spec.raw_args {
            #[cfg(target_os = "windows")]
            command.raw_arg(arg);
            #[cfg(not(target_os = "windows"))]
            command.arg(arg);
        }
        for key in &spec.env_remove {
            command.env_remove(key);
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        #[cfg(target_os = "windows")]
        {
            command.creation_flags(0x08000000); // CREATE_NO_WINDOW
        }
        command
    }
}

#[async_trait]
impl CommandRunner for CommandExecutor {
    async fn run(&self, spec: &CommandSpec) -> CommandResult {
        let mut command = Self::build(spec);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(command = %spec.display(), "执行命令");

        let output = command.output();
        let result = match spec.timeout {
            Some(limit) => match tokio::time::timeout(limit, output).await {
                Ok(output) => output,
                Err(_) => return CommandResult::timeout(limit),
            },
            None => output.await,
        };

        match result {
            Ok(output) => CommandResult::from_output(output),
            Err(e) => CommandResult::from_error(e),
        }
    }

    fn spawn_detached(&self, spec: &CommandSpec) -> io::Result<()> {
        let mut command = Self::build(spec);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let child = command.spawn()?;
        // 不等待终端进程结束
        drop(child);
        Ok(())
    }
}
