use crate::models::ToolDescriptor;
use crate::utils::paths::InstallRoot;
use crate::utils::platform::PlatformPolicy;
use std::path::PathBuf;
use std::sync::Arc;

/// 定位结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedTool {
    /// 命中的候选路径
    pub path: PathBuf,
    /// 解析符号链接后的绝对路径
    pub resolved: PathBuf,
    /// 命中的可执行文件名
    pub binary_name: &'static str,
}

/// 工具定位器
///
/// 只在私有根目录内查找，从不搜索系统 PATH。
#[derive(Debug, Clone)]
pub struct ToolLocator {
    root: InstallRoot,
    policy: Arc<dyn PlatformPolicy>,
}

impl ToolLocator {
    pub fn new(root: InstallRoot, policy: Arc<dyn PlatformPolicy>) -> Self {
        Self { root, policy }
    }

    /// 按候选名顺序、再按位置顺序返回第一个存在的文件
    pub fn locate(&self, descriptor: &ToolDescriptor) -> Option<LocatedTool> {
        let package = descriptor.package_for(self.policy.os());

        for binary_name in descriptor.binary_names {
            for candidate in self
                .policy
                .tool_candidates(self.root.path(), binary_name, package)
            {
                if !candidate.is_file() {
                    continue;
                }
                let resolved =
                    std::fs::canonicalize(&candidate).unwrap_or_else(|_| candidate.clone());
                tracing::debug!(
                    tool_id = descriptor.id,
                    path = %candidate.display(),
                    "在私有目录中找到工具"
                );
                return Some(LocatedTool {
                    path: candidate,
                    resolved,
                    binary_name,
                });
            }
        }
        None
    }

    /// 查找私有根目录之外（系统 PATH 中）的同名工具，仅用于提示
    pub fn find_outside_root(&self, descriptor: &ToolDescriptor) -> Option<PathBuf> {
        descriptor.binary_names.iter().find_map(|binary_name| {
            which::which_all(binary_name)
                .ok()?
                .find(|path| !self.root.contains(path))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PackageId;
    use crate::models::UpdateStrategy;
    use crate::utils::platform::{Arch, LinuxPolicy};
    use std::fs;
    use tempfile::TempDir;

    const MULTI: ToolDescriptor = ToolDescriptor {
        id: "multi",
        name: "Multi",
        binary_names: &["primary", "secondary"],
        package: PackageId::Universal("@scope/multi"),
        update_strategy: UpdateStrategy::Reinstall,
        check_updates: false,
        version_args: &["--version"],
    };

    fn locator(root: &std::path::Path) -> ToolLocator {
        ToolLocator::new(
            InstallRoot::new(root),
            Arc::new(LinuxPolicy { arch: Arch::X64 }),
        )
    }

    fn touch(path: PathBuf) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "#!/bin/sh\n").unwrap();
    }

    #[test]
    fn test_empty_root_finds_nothing() {
        let dir = TempDir::new().unwrap();
        assert!(locator(dir.path()).locate(&MULTI).is_none());
        for tool in ToolDescriptor::all() {
            assert!(locator(dir.path()).locate(tool).is_none());
        }
    }

    #[test]
    fn test_candidate_name_order_wins() {
        let dir = TempDir::new().unwrap();
        touch(dir.path().join("bin").join("secondary"));
        touch(dir.path().join("primary"));

        let found = locator(dir.path()).locate(&MULTI).unwrap();
        assert_eq!(found.binary_name, "primary");
        assert_eq!(found.path, dir.path().join("primary"));
    }

    #[test]
    fn test_location_order_within_name() {
        let dir = TempDir::new().unwrap();
        touch(dir.path().join("primary"));
        touch(dir.path().join("bin").join("primary"));

        let found = locator(dir.path()).locate(&MULTI).unwrap();
        assert_eq!(found.path, dir.path().join("bin").join("primary"));
    }

    #[test]
    fn test_directories_are_skipped() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("bin").join("primary")).unwrap();
        touch(
            dir.path()
                .join("lib/node_modules/@scope/multi/bin/primary"),
        );

        let found = locator(dir.path()).locate(&MULTI).unwrap();
        assert!(found.path.ends_with("lib/node_modules/@scope/multi/bin/primary"));
        assert!(found.resolved.is_absolute());
    }
}
