use anyhow::Context;
use std::path::{Path, PathBuf};

/// 私有安装根目录
///
/// 运行时与所有工具只会安装到此目录下，引擎不会读写任何系统级安装位置。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRoot(PathBuf);

impl InstallRoot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        InstallRoot(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.0.join("bin")
    }

    /// 路径是否位于根目录内
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.0)
    }

    /// 首次运行标记：根目录本身不存在
    pub fn is_provisioned(&self) -> bool {
        self.0.is_dir()
    }
}

/// 引擎使用的目录集合
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub root: InstallRoot,
    /// 包管理器私有缓存（与根目录及用户全局缓存都不同）
    pub package_cache: PathBuf,
    /// 运行时压缩包下载暂存目录
    pub downloads: PathBuf,
}

impl AppPaths {
    /// 默认布局：~/.duckcoding/runtime 与 <cache_dir>/duckcoding/*
    pub fn detect() -> anyhow::Result<Self> {
        let root = super::config::app_dir()?.join("runtime");
        let cache_base = dirs::cache_dir()
            .context("无法获取缓存目录")?
            .join("duckcoding");
        Ok(Self::with_dirs(root, cache_base))
    }

    /// 指定根目录与缓存目录（测试与嵌入方使用）
    pub fn with_dirs(root: impl Into<PathBuf>, cache_base: impl AsRef<Path>) -> Self {
        let cache_base = cache_base.as_ref();
        AppPaths {
            root: InstallRoot::new(root),
            package_cache: cache_base.join("npm-cache"),
            downloads: cache_base.join("downloads"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_root_containment() {
        let root = InstallRoot::new("/home/u/.duckcoding/runtime");
        assert!(root.contains(Path::new("/home/u/.duckcoding/runtime/bin/claude")));
        assert!(!root.contains(Path::new("/usr/local/bin/claude")));
        // 前缀相同但不是子目录
        assert!(!root.contains(Path::new("/home/u/.duckcoding/runtime2/bin/claude")));
    }

    #[test]
    fn test_cache_is_outside_root() {
        let dir = TempDir::new().unwrap();
        let paths = AppPaths::with_dirs(dir.path().join("runtime"), dir.path().join("cache"));
        assert!(!paths.root.contains(&paths.package_cache));
        assert!(!paths.root.contains(&paths.downloads));
        assert!(!paths.root.is_provisioned());

        std::fs::create_dir_all(paths.root.path()).unwrap();
        assert!(paths.root.is_provisioned());
    }
}
