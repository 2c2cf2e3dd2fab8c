// lib.rs - 暴露引导引擎给宿主程序（桌面端或命令行）使用

pub mod core;
pub mod models;
pub mod services;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

pub use models::*;
pub use services::{BootstrapService, BootstrapServiceBuilder};

// 重新导出常用类型
pub use anyhow::{Context, Result};

pub use core::{
    build_http_client, init_logger, update_log_level, InstallError, LaunchError, ProbeError,
    ProvisionError, ToolActionError,
};
pub use utils::{AppPaths, InstallRoot, JsonSettingsStore, Locale, SettingsStore};
