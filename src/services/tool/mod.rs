// 工具服务模块
//
// 私有目录内的工具定位、版本探测、安装更新与终端启动

pub mod installer;
pub mod launcher;
pub mod locator;
pub mod probe;

pub use installer::{PackageInstaller, RetrySignature};
pub use launcher::TerminalLauncher;
pub use locator::{LocatedTool, ToolLocator};
pub use probe::{parse_version_output, VersionProbe};
