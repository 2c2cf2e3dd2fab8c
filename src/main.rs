//! 命令行宿主：执行一轮环境检查，把事件按 JSON 行输出到 stdout
//!
//! 用法：
//!   duckcoding-bootstrap [--force]
//!   duckcoding-bootstrap status
//!   duckcoding-bootstrap install <tool-id>
//!   duckcoding-bootstrap update <tool-id>
//!   duckcoding-bootstrap launch <tool-id>

use anyhow::Context;
use duckcoding_bootstrap::utils::config::{bootstrap_config_path, read_bootstrap_config};
use duckcoding_bootstrap::{
    init_logger, AppPaths, BootstrapEvent, BootstrapOptions, BootstrapService, CheckOutcome,
    JsonSettingsStore, Locale,
};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

enum Command {
    Check { force: bool },
    Status,
    Install(String),
    Update(String),
    Launch(String),
}

fn parse_args(args: &[String]) -> anyhow::Result<Command> {
    let tool_arg = |name: &str| {
        args.get(1)
            .cloned()
            .with_context(|| format!("{name} 需要工具 ID 参数"))
    };
    match args.first().map(String::as_str) {
        None => Ok(Command::Check { force: false }),
        Some("--force") | Some("-f") => Ok(Command::Check { force: true }),
        Some("status") => Ok(Command::Status),
        Some("install") => Ok(Command::Install(tool_arg("install")?)),
        Some("update") => Ok(Command::Update(tool_arg("update")?)),
        Some("launch") => Ok(Command::Launch(tool_arg("launch")?)),
        Some(other) => anyhow::bail!("未知参数: {other}"),
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::error!(error = ?e, "序列化输出失败"),
    }
}

async fn run(command: Command) -> anyhow::Result<bool> {
    let config_path = bootstrap_config_path()?;
    let config = read_bootstrap_config(&config_path)?;
    init_logger(&config.log_config)?;

    let service = BootstrapService::builder(
        AppPaths::detect()?,
        Arc::new(JsonSettingsStore::new(config_path)),
    )
    .locale(Locale::detect(config.locale.as_deref()))
    .options(BootstrapOptions::default().with_config(&config))
    .build()?;

    // 事件转发到 stdout，直到发送端关闭
    let mut events = service.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let done = matches!(event, BootstrapEvent::CheckDone(_));
                    print_json(&event);
                    if done {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "事件输出落后，已丢弃部分事件");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let ok = match command {
        Command::Check { force } => {
            let outcome = service.run_check(force).await;
            let _ = printer.await;
            !matches!(outcome, CheckOutcome::Aborted(_))
        }
        Command::Status => {
            printer.abort();
            print_json(&service.all_tool_status().await);
            true
        }
        Command::Install(tool_id) => {
            let result = service.install_tool(&tool_id).await;
            printer.abort();
            report_action(result)
        }
        Command::Update(tool_id) => {
            let result = service.update_tool(&tool_id).await;
            printer.abort();
            report_action(result)
        }
        Command::Launch(tool_id) => {
            printer.abort();
            let cwd = std::env::current_dir().context("无法获取当前目录")?;
            let path = service.launch_in_terminal(&tool_id, &cwd)?;
            println!("{}", path.display());
            true
        }
    };
    Ok(ok)
}

fn report_action<E: std::fmt::Display>(
    result: Result<duckcoding_bootstrap::ToolStatus, E>,
) -> bool {
    match result {
        Ok(status) => {
            print_json(&status);
            true
        }
        Err(e) => {
            eprintln!("{e}");
            false
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(2);
        }
    };

    match run(command).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
