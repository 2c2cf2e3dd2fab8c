//! 进程 PATH 维护
//!
//! 只追加、不覆盖：已存在的条目保持原位，新条目按顺序加入。

use crate::utils::paths::InstallRoot;
use crate::utils::platform::PlatformPolicy;
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;

/// PATH 调整结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathAugmentation {
    pub value: OsString,
    /// 本次新加入的条目
    pub added: Vec<PathBuf>,
}

/// 计算新的 PATH：`prepend` 放在最前，`append` 放在最后，已存在的条目跳过
pub fn augment_search_path(
    current: &OsStr,
    prepend: &[PathBuf],
    append: &[PathBuf],
) -> PathAugmentation {
    let existing: Vec<PathBuf> = std::env::split_paths(current)
        .filter(|p| !p.as_os_str().is_empty())
        .collect();
    let mut added = Vec::new();

    let mut head = Vec::new();
    for entry in prepend {
        if !existing.contains(entry) && !head.contains(entry) {
            head.push(entry.clone());
            added.push(entry.clone());
        }
    }

    let mut merged = head;
    merged.extend(existing.iter().cloned());
    for entry in append {
        if !merged.contains(entry) {
            merged.push(entry.clone());
            added.push(entry.clone());
        }
    }

    match std::env::join_paths(&merged) {
        Ok(value) => PathAugmentation { value, added },
        Err(e) => {
            tracing::warn!(error = %e, "PATH 条目包含非法字符，保持原值");
            PathAugmentation {
                value: current.to_os_string(),
                added: Vec::new(),
            }
        }
    }
}

/// 子进程使用的 PATH：私有目录强制排在最前
pub fn child_search_path(policy: &dyn PlatformPolicy, root: &InstallRoot) -> OsString {
    let current = std::env::var_os("PATH").unwrap_or_default();
    let private = policy.private_path_entries(root.path());
    let rest = std::env::split_paths(&current)
        .filter(|p| !p.as_os_str().is_empty() && !private.contains(p));
    let merged: Vec<PathBuf> = private.iter().cloned().chain(rest).collect();
    std::env::join_paths(merged).unwrap_or(current)
}

/// 调整当前进程的 PATH，返回新增条目
pub fn apply_search_path(policy: &dyn PlatformPolicy, root: &InstallRoot) -> Vec<PathBuf> {
    let current = std::env::var_os("PATH").unwrap_or_default();
    let augmentation = augment_search_path(
        &current,
        &policy.private_path_entries(root.path()),
        &policy.system_path_entries(),
    );
    if !augmentation.added.is_empty() {
        std::env::set_var("PATH", &augmentation.value);
        tracing::info!(added = ?augmentation.added, "已更新进程 PATH");
    }
    augmentation.added
}
