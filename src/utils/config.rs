use crate::models::config::BootstrapConfig;
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// npm 国内镜像
pub const CHINA_NPM_REGISTRY: &str = "https://registry.npmmirror.com";
/// 运行时压缩包国内镜像
pub const CHINA_RUNTIME_MIRROR: &str = "https://npmmirror.com/mirrors/node";
/// 运行时压缩包官方地址
pub const OFFICIAL_RUNTIME_DIST: &str = "https://nodejs.org/dist";

/// DuckCoding 配置目录 (~/.duckcoding)，若不存在则创建
pub fn app_dir() -> anyhow::Result<PathBuf> {
    let home_dir = dirs::home_dir().context("无法获取用户主目录")?;
    let dir = home_dir.join(".duckcoding");
    if !dir.exists() {
        fs::create_dir_all(&dir)
            .with_context(|| format!("创建配置目录失败: {}", dir.display()))?;
    }
    Ok(dir)
}

/// 引导配置文件路径
pub fn bootstrap_config_path() -> anyhow::Result<PathBuf> {
    Ok(app_dir()?.join("bootstrap.json"))
}

/// 读取引导配置（文件不存在时返回默认值）
pub fn read_bootstrap_config(path: &Path) -> anyhow::Result<BootstrapConfig> {
    if !path.exists() {
        return Ok(BootstrapConfig::default());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("读取配置失败: {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("解析配置失败: {}", path.display()))
}

/// 写入引导配置，并在 unix 上设置 0600 权限
pub fn write_bootstrap_config(path: &Path, config: &BootstrapConfig) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("创建配置目录失败: {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(config).context("序列化配置失败")?;
    fs::write(path, json).with_context(|| format!("写入配置失败: {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)
            .with_context(|| format!("读取文件元数据失败: {}", path.display()))?
            .permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms)
            .with_context(|| format!("设置文件权限失败: {}", path.display()))?;
    }

    Ok(())
}

/// 语言区域（仅用于选择下载镜像）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locale(String);

impl Locale {
    pub fn new(tag: impl Into<String>) -> Self {
        Locale(tag.into())
    }

    /// 配置覆盖优先，其次 LC_ALL / LC_MESSAGES / LANG
    pub fn detect(config_override: Option<&str>) -> Self {
        if let Some(tag) = config_override.map(str::trim).filter(|t| !t.is_empty()) {
            return Locale::new(tag);
        }
        ["LC_ALL", "LC_MESSAGES", "LANG"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|value| !value.trim().is_empty())
            .map(Locale::new)
            .unwrap_or_else(|| Locale::new("en"))
    }

    pub fn tag(&self) -> &str {
        &self.0
    }

    /// 中文区域（zh、zh_CN.UTF-8、zh-TW ...）
    pub fn is_chinese(&self) -> bool {
        self.0.to_ascii_lowercase().starts_with("zh")
    }

    /// 包管理器使用的替代 registry
    pub fn npm_registry(&self) -> Option<&'static str> {
        self.is_chinese().then_some(CHINA_NPM_REGISTRY)
    }

    /// 运行时压缩包下载基址
    pub fn runtime_dist_base(&self) -> &'static str {
        if self.is_chinese() {
            CHINA_RUNTIME_MIRROR
        } else {
            OFFICIAL_RUNTIME_DIST
        }
    }
}

impl Default for Locale {
    fn default() -> Self {
        Locale::new("en")
    }
}

/// 持久化配置的访问接口
pub trait SettingsStore: Send + Sync {
    /// 是否暂停自动检查
    fn pause_checks(&self) -> bool;

    /// 记录最近一次实际执行检查的时间
    fn record_last_checked(&self, at: DateTime<Utc>) -> anyhow::Result<()>;
}

/// 基于 bootstrap.json 的配置存储
#[derive(Debug, Clone)]
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonSettingsStore { path: path.into() }
    }

    /// 默认位置 ~/.duckcoding/bootstrap.json
    pub fn open_default() -> anyhow::Result<Self> {
        Ok(Self::new(bootstrap_config_path()?))
    }

    pub fn load(&self) -> anyhow::Result<BootstrapConfig> {
        read_bootstrap_config(&self.path)
    }
}

impl SettingsStore for JsonSettingsStore {
    fn pause_checks(&self) -> bool {
        match self.load() {
            Ok(config) => config.pause_checks,
            Err(e) => {
                tracing::warn!(error = ?e, "读取引导配置失败，按未暂停处理");
                false
            }
        }
    }

    fn record_last_checked(&self, at: DateTime<Utc>) -> anyhow::Result<()> {
        let mut config = self.load()?;
        config.last_checked = Some(at);
        write_bootstrap_config(&self.path, &config)
    }
}

/// 内存配置（测试与嵌入方使用）
#[derive(Debug, Default)]
pub struct MemorySettings {
    inner: Mutex<BootstrapConfig>,
}

impl MemorySettings {
    pub fn new(config: BootstrapConfig) -> Self {
        MemorySettings {
            inner: Mutex::new(config),
        }
    }

    pub fn paused() -> Self {
        Self::new(BootstrapConfig {
            pause_checks: true,
            ..Default::default()
        })
    }

    pub fn last_checked(&self) -> Option<DateTime<Utc>> {
        self.inner
            .lock()
            .map(|config| config.last_checked)
            .unwrap_or(None)
    }
}

impl SettingsStore for MemorySettings {
    fn pause_checks(&self) -> bool {
        self.inner
            .lock()
            .map(|config| config.pause_checks)
            .unwrap_or(false)
    }

    fn record_last_checked(&self, at: DateTime<Utc>) -> anyhow::Result<()> {
        let mut config = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("配置锁已损坏"))?;
        config.last_checked = Some(at);
        Ok(())
    }
}
