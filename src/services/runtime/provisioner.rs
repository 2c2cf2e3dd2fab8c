use super::downloader::{ArchiveDownloader, DownloadProgress};
use super::gate::InstallGate;
use crate::core::error::ProvisionError;
use crate::utils::config::Locale;
use crate::utils::paths::AppPaths;
use crate::utils::platform::{ArchiveFormat, PlatformPolicy, RuntimeArchive};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// 运行时供给过程中的进度
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeProgress {
    Downloading { url: String },
    Download(DownloadProgress),
    Extracting,
    Installed { path: PathBuf },
}

pub type RuntimeProgressCallback<'a> = dyn Fn(RuntimeProgress) + Send + Sync + 'a;

/// 运行时供给器
///
/// 运行时允许预装在系统常见位置；都找不到时下载压缩包解压到私有根目录。
pub struct RuntimeProvisioner {
    policy: Arc<dyn PlatformPolicy>,
    paths: AppPaths,
    locale: Locale,
    version: String,
    downloader: Arc<dyn ArchiveDownloader>,
    gate: InstallGate,
    wait_timeout: Duration,
    system_lookup: bool,
}

impl RuntimeProvisioner {
    pub fn new(
        policy: Arc<dyn PlatformPolicy>,
        paths: AppPaths,
        locale: Locale,
        version: impl Into<String>,
        downloader: Arc<dyn ArchiveDownloader>,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            policy,
            paths,
            locale,
            version: version.into(),
            downloader,
            gate: InstallGate::new(),
            wait_timeout,
            system_lookup: true,
        }
    }

    /// 只在私有根目录中查找运行时
    pub fn without_system_lookup(mut self) -> Self {
        self.system_lookup = false;
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// 私有根目录中的运行时
    pub fn find_private_runtime(&self) -> Option<PathBuf> {
        self.policy
            .runtime_candidates(self.paths.root.path())
            .into_iter()
            .find(|p| p.is_file())
    }

    /// 私有根目录优先，其次系统常见位置
    pub fn find_runtime(&self) -> Option<PathBuf> {
        self.find_private_runtime().or_else(|| {
            if !self.system_lookup {
                return None;
            }
            self.policy
                .common_runtime_locations()
                .into_iter()
                .find(|p| p.is_file())
        })
    }

    /// 当前平台的压缩包与下载地址（中文区域使用镜像）
    pub fn archive_url(&self) -> Result<(RuntimeArchive, String), ProvisionError> {
        let archive = self.policy.runtime_archive(&self.version).ok_or_else(|| {
            ProvisionError::UnsupportedArchive {
                file_name: format!(
                    "node-v{}-{}-{}",
                    self.version,
                    self.policy.os().dist_name(),
                    std::env::consts::ARCH
                ),
            }
        })?;

        if ArchiveFormat::from_file_name(&archive.file_name) != Some(archive.format) {
            return Err(ProvisionError::UnsupportedArchive {
                file_name: archive.file_name,
            });
        }

        let url = format!(
            "{}/v{}/{}",
            self.locale.runtime_dist_base(),
            self.version,
            archive.file_name
        );
        url::Url::parse(&url).map_err(|e| ProvisionError::Network {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        Ok((archive, url))
    }

    /// 确保运行时可用，返回运行时可执行文件路径
    ///
    /// 并发调用只会触发一次下载与解压，其余调用者等待同一结果。
    pub async fn ensure_runtime(
        &self,
        on_progress: &RuntimeProgressCallback<'_>,
    ) -> Result<PathBuf, ProvisionError> {
        if let Some(path) = self.find_runtime() {
            tracing::debug!(path = %path.display(), "运行时已存在");
            return Ok(path);
        }

        self.gate
            .run_or_wait(self.wait_timeout, move || async move {
                // 排队期间可能已被上一个安装者装好
                if let Some(path) = self.find_private_runtime() {
                    return Ok(path);
                }
                self.install_runtime(on_progress).await
            })
            .await
    }

    async fn install_runtime(
        &self,
        on_progress: &RuntimeProgressCallback<'_>,
    ) -> Result<PathBuf, ProvisionError> {
        let (archive, url) = self.archive_url()?;
        let temp_path = self
            .paths
            .downloads
            .join(format!("{}.part", archive.file_name));

        tracing::info!(url = %url, version = %self.version, "开始供给运行时");
        on_progress(RuntimeProgress::Downloading { url: url.clone() });

        self.downloader
            .download(&url, &temp_path, &|progress| {
                on_progress(RuntimeProgress::Download(progress))
            })
            .await?;

        on_progress(RuntimeProgress::Extracting);
        let extracted =
            self.policy
                .extract_runtime(&temp_path, archive.format, self.paths.root.path());
        if let Err(e) = tokio::fs::remove_file(&temp_path).await {
            tracing::debug!(path = %temp_path.display(), error = %e, "清理临时文件失败");
        }
        extracted?;

        let path = self
            .find_private_runtime()
            .ok_or_else(|| ProvisionError::PostInstallMissing {
                root: self.paths.root.path().to_path_buf(),
            })?;
        tracing::info!(path = %path.display(), "运行时安装完成");
        on_progress(RuntimeProgress::Installed { path: path.clone() });
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeDownloader, TestEnv};
    use std::sync::Mutex;

    #[test]
    fn test_archive_url_mirrors() {
        let env = TestEnv::new();
        let downloader = Arc::new(FakeDownloader::node());

        let official = env.provisioner(downloader.clone(), Locale::new("en_US.UTF-8"));
        let (archive, url) = official.archive_url().unwrap();
        assert_eq!(archive.file_name, "node-v22.12.0-linux-x64.tar.gz");
        assert_eq!(
            url,
            "https://nodejs.org/dist/v22.12.0/node-v22.12.0-linux-x64.tar.gz"
        );

        let mirror = env.provisioner(downloader, Locale::new("zh_CN.UTF-8"));
        let (_, url) = mirror.archive_url().unwrap();
        assert_eq!(
            url,
            "https://npmmirror.com/mirrors/node/v22.12.0/node-v22.12.0-linux-x64.tar.gz"
        );
    }

    #[tokio::test]
    async fn test_ensure_runtime_downloads_and_extracts() {
        let env = TestEnv::new();
        let downloader = Arc::new(FakeDownloader::node());
        let provisioner = env.provisioner(downloader.clone(), Locale::default());
        assert!(provisioner.find_runtime().is_none());

        let events = Mutex::new(Vec::new());
        let path = provisioner
            .ensure_runtime(&|event| events.lock().unwrap().push(event))
            .await
            .unwrap();

        assert_eq!(path, env.paths.root.bin_dir().join("node"));
        assert!(env.paths.root.bin_dir().join("npm").is_file());
        assert_eq!(downloader.downloads(), 1);

        let events = events.into_inner().unwrap();
        assert!(matches!(events.first(), Some(RuntimeProgress::Downloading { .. })));
        assert!(events.contains(&RuntimeProgress::Extracting));
        assert!(matches!(events.last(), Some(RuntimeProgress::Installed { .. })));

        // 已存在时不再下载
        provisioner.ensure_runtime(&|_| {}).await.unwrap();
        assert_eq!(downloader.downloads(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_ensure_runtime_downloads_once() {
        let env = TestEnv::new();
        let downloader = Arc::new(FakeDownloader::node().with_delay(Duration::from_millis(150)));
        let provisioner = Arc::new(env.provisioner(downloader.clone(), Locale::default()));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let provisioner = provisioner.clone();
            handles.push(tokio::spawn(async move {
                provisioner.ensure_runtime(&|_| {}).await
            }));
        }

        for handle in handles {
            let path = tokio::time::timeout(Duration::from_secs(10), handle)
                .await
                .expect("caller hung")
                .unwrap()
                .unwrap();
            assert!(path.ends_with("bin/node"));
        }
        assert_eq!(downloader.downloads(), 1);
    }

    #[tokio::test]
    async fn test_archive_without_runtime_is_post_install_missing() {
        let env = TestEnv::new();
        let downloader = Arc::new(FakeDownloader::with_entries(&[(
            "node-v22.12.0-linux-x64/README.md",
            "no binaries here",
        )]));
        let provisioner = env.provisioner(downloader, Locale::default());

        let err = provisioner.ensure_runtime(&|_| {}).await.unwrap_err();
        assert_eq!(err.kind(), "post_install_missing");
    }

    #[tokio::test]
    async fn test_download_failure_propagates() {
        let env = TestEnv::new();
        let downloader = Arc::new(FakeDownloader::failing(ProvisionError::HttpStatus {
            url: "https://nodejs.org/dist".to_string(),
            status: 404,
        }));
        let provisioner = env.provisioner(downloader.clone(), Locale::default());

        let err = provisioner.ensure_runtime(&|_| {}).await.unwrap_err();
        assert!(matches!(err, ProvisionError::HttpStatus { status: 404, .. }));
        assert!(provisioner.find_private_runtime().is_none());
    }
}
