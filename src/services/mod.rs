// 服务层模块
//
// - bootstrap: 检查轮次编排与 PATH 维护
// - runtime: 运行时下载、解压与单飞安装
// - tool: 工具定位、版本探测、安装与启动
// - version: 版本号比较

pub mod bootstrap;
pub mod runtime;
pub mod tool;
pub mod version;

pub use bootstrap::{BootstrapService, BootstrapServiceBuilder};
pub use runtime::{ArchiveDownloader, HttpDownloader, RuntimeProgress, RuntimeProvisioner};
pub use tool::{PackageInstaller, TerminalLauncher, ToolLocator, VersionProbe};
pub use version::{compare_versions, is_newer};
