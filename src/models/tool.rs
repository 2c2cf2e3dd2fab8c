use crate::utils::platform::OsFamily;
use serde::{Deserialize, Serialize};

/// 工具状态（每次检查重新计算，不持久化）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolStatus {
    pub id: String,
    pub name: String,
    pub installed: bool,
    pub version: Option<String>,
    pub path: Option<String>,
}

impl ToolStatus {
    pub fn missing(descriptor: &ToolDescriptor) -> Self {
        ToolStatus {
            id: descriptor.id.to_string(),
            name: descriptor.name.to_string(),
            installed: false,
            version: None,
            path: None,
        }
    }
}

/// 包标识（部分工具在不同平台使用不同的包）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageId {
    Universal(&'static str),
    PerOs {
        windows: &'static str,
        unix: &'static str,
    },
}

impl PackageId {
    pub fn resolve(&self, os: OsFamily) -> &'static str {
        match (self, os) {
            (PackageId::Universal(name), _) => name,
            (PackageId::PerOs { windows, .. }, OsFamily::Windows) => windows,
            (PackageId::PerOs { unix, .. }, _) => unix,
        }
    }
}

/// 更新策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStrategy {
    /// 通过包管理器重新安装 @latest
    Reinstall,
    /// 执行工具自带的更新子命令（如 `claude update`）
    SelfUpdateCommand(&'static [&'static str]),
}

/// 安装模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMode {
    Install,
    Update,
}

/// 工具描述（编译期固定）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolDescriptor {
    /// 逻辑名称（如 "claude-code"）
    pub id: &'static str,
    /// 显示名称
    pub name: &'static str,
    /// 候选可执行文件名，顺序即优先级
    pub binary_names: &'static [&'static str],
    pub package: PackageId,
    pub update_strategy: UpdateStrategy,
    /// 是否在检查中查询 registry 最新版本
    pub check_updates: bool,
    /// 版本子命令参数
    pub version_args: &'static [&'static str],
}

const CLAUDE_CODE: ToolDescriptor = ToolDescriptor {
    id: "claude-code",
    name: "Claude Code",
    binary_names: &["claude"],
    package: PackageId::Universal("@anthropic-ai/claude-code"),
    update_strategy: UpdateStrategy::SelfUpdateCommand(&["update"]),
    check_updates: true,
    version_args: &["--version"],
};

const CODEX: ToolDescriptor = ToolDescriptor {
    id: "codex",
    name: "CodeX",
    binary_names: &["codex"],
    package: PackageId::Universal("@openai/codex"),
    update_strategy: UpdateStrategy::Reinstall,
    check_updates: true,
    version_args: &["--version"],
};

const GEMINI_CLI: ToolDescriptor = ToolDescriptor {
    id: "gemini-cli",
    name: "Gemini CLI",
    binary_names: &["gemini"],
    package: PackageId::Universal("@google/gemini-cli"),
    update_strategy: UpdateStrategy::Reinstall,
    check_updates: true,
    version_args: &["--version"],
};

const ALL_TOOLS: [ToolDescriptor; 3] = [CLAUDE_CODE, CODEX, GEMINI_CLI];

impl ToolDescriptor {
    /// 获取所有工具（顺序即检查顺序）
    pub fn all() -> &'static [ToolDescriptor] {
        &ALL_TOOLS
    }

    /// 根据 ID 获取工具
    pub fn by_id(id: &str) -> Option<&'static ToolDescriptor> {
        ALL_TOOLS.iter().find(|t| t.id == id)
    }

    /// 当前平台的包名
    pub fn package_for(&self, os: OsFamily) -> &'static str {
        self.package.resolve(os)
    }
}
