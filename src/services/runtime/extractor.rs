//! 运行时压缩包解压
//!
//! 支持 zip 与 tar.gz，按 "去掉前 N 层目录" 的语义解压，
//! 使压缩包内带版本号的顶层目录直接折叠到目标根目录。

use crate::core::error::ProvisionError;
use crate::utils::platform::ArchiveFormat;
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Component, Path, PathBuf};

/// 解压压缩包到目标目录
pub fn extract_archive(
    archive_path: &Path,
    dest_dir: &Path,
    format: ArchiveFormat,
    strip_components: usize,
) -> Result<(), ProvisionError> {
    tracing::info!(
        archive = %archive_path.display(),
        dest = %dest_dir.display(),
        format = ?format,
        "开始解压运行时"
    );

    let result = fs::create_dir_all(dest_dir)
        .with_context(|| format!("创建目录失败: {}", dest_dir.display()))
        .and_then(|_| match format {
            ArchiveFormat::Zip => extract_zip(archive_path, dest_dir, strip_components),
            ArchiveFormat::TarGz => extract_tar_gz(archive_path, dest_dir, strip_components),
        });

    result.map_err(|e| {
        tracing::error!(archive = %archive_path.display(), error = ?e, "解压失败");
        ProvisionError::Extraction {
            archive: archive_path.to_path_buf(),
            reason: format!("{e:#}"),
        }
    })
}

/// 去掉前 N 层目录；拒绝绝对路径与 `..`
fn strip_path(path: &Path, strip_components: usize) -> Option<PathBuf> {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => components.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if components.len() <= strip_components {
        return None;
    }
    Some(components[strip_components..].iter().collect())
}

fn extract_zip(archive_path: &Path, dest_dir: &Path, strip_components: usize) -> Result<()> {
    let file = File::open(archive_path)
        .with_context(|| format!("打开 zip 失败: {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("读取 zip 失败: {}", archive_path.display()))?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry
            .enclosed_name()
            .and_then(|name| strip_path(&name, strip_components))
        else {
            continue;
        };
        let dest_path = dest_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&dest_path)?;
            continue;
        }
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut outfile = File::create(&dest_path)
            .with_context(|| format!("创建文件失败: {}", dest_path.display()))?;
        io::copy(&mut entry, &mut outfile)?;

        #[cfg(unix)]
        set_unix_permissions(&dest_path, entry.unix_mode())?;
    }

    Ok(())
}

fn extract_tar_gz(archive_path: &Path, dest_dir: &Path, strip_components: usize) -> Result<()> {
    let file = File::open(archive_path)
        .with_context(|| format!("打开 tar.gz 失败: {}", archive_path.display()))?;
    let decoder = flate2::read::GzDecoder::new(BufReader::new(file));
    extract_tar(decoder, dest_dir, strip_components)
}

fn extract_tar<R: Read>(reader: R, dest_dir: &Path, strip_components: usize) -> Result<()> {
    let mut archive = tar::Archive::new(reader);

    for entry_result in archive.entries()? {
        let mut entry = entry_result?;
        let entry_type = entry.header().entry_type();
        let path = entry.path()?.into_owned();

        let Some(relative) = strip_path(&path, strip_components) else {
            if path.is_absolute() || path.components().any(|c| c == Component::ParentDir) {
                tracing::warn!(path = ?path, "跳过不安全的压缩包路径");
            }
            continue;
        };
        let dest_path = dest_dir.join(&relative);

        if entry_type.is_dir() {
            fs::create_dir_all(&dest_path)?;
        } else if entry_type.is_symlink() {
            // bin/npm 等入口是指向 lib/ 的相对链接，只保留不越界的链接
            let Some(target) = entry.link_name()?.map(|t| t.into_owned()) else {
                continue;
            };
            if !link_stays_inside(&relative, &target) {
                tracing::warn!(path = ?path, target = ?target, "跳过指向目录外的链接");
                continue;
            }
            if let Some(parent) = dest_path.parent() {
                fs::create_dir_all(parent)?;
            }
            create_symlink(&target, &dest_path)?;
        } else if entry_type.is_file() {
            if let Some(parent) = dest_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut outfile = File::create(&dest_path)
                .with_context(|| format!("创建文件失败: {}", dest_path.display()))?;
            io::copy(&mut entry, &mut outfile)?;
            outfile.flush()?;

            #[cfg(unix)]
            {
                if let Ok(mode) = entry.header().mode() {
                    set_unix_permissions(&dest_path, Some(mode))?;
                }
            }
        } else {
            tracing::debug!(path = ?path, entry_type = ?entry_type, "跳过不支持的条目类型");
        }
    }

    Ok(())
}

/// 相对链接解析后是否仍位于解压根目录内
fn link_stays_inside(link: &Path, target: &Path) -> bool {
    if target.is_absolute() {
        return false;
    }
    let mut depth: Vec<&std::ffi::OsStr> = Vec::new();
    let parent_components = link
        .parent()
        .map(|p| p.components().collect::<Vec<_>>())
        .unwrap_or_default();
    for component in parent_components.into_iter().chain(target.components()) {
        match component {
            Component::Normal(part) => depth.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth.pop().is_none() {
                    return false;
                }
            }
            _ => return false,
        }
    }
    true
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> Result<()> {
    if link.symlink_metadata().is_ok() {
        fs::remove_file(link)?;
    }
    std::os::unix::fs::symlink(target, link)
        .with_context(|| format!("创建链接失败: {}", link.display()))
}

#[cfg(not(unix))]
fn create_symlink(target: &Path, link: &Path) -> Result<()> {
    // Windows 运行时使用 zip 包，不含链接
    tracing::debug!(link = %link.display(), target = %target.display(), "跳过链接");
    Ok(())
}

#[cfg(unix)]
fn set_unix_permissions(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(mode) = mode {
        if mode & 0o111 != 0 {
            fs::set_permissions(path, fs::Permissions::from_mode(mode | 0o755))
                .with_context(|| format!("设置权限失败: {}", path.display()))?;
        }
    }
    Ok(())
}
