// 运行时服务模块
//
// 私有运行时的查找、下载、解压与单飞安装

pub mod downloader;
pub mod extractor;
pub mod gate;
pub mod provisioner;

pub use downloader::{ArchiveDownloader, DownloadProgress, HttpDownloader};
pub use gate::InstallGate;
pub use provisioner::{RuntimeProgress, RuntimeProvisioner};
