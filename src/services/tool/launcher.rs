use super::locator::ToolLocator;
use crate::core::error::LaunchError;
use crate::models::ToolDescriptor;
use crate::services::bootstrap::path_env::child_search_path;
use crate::utils::command::CommandRunner;
use crate::utils::paths::InstallRoot;
use crate::utils::platform::PlatformPolicy;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 在系统终端中打开私有目录内的工具
#[derive(Clone)]
pub struct TerminalLauncher {
    runner: Arc<dyn CommandRunner>,
    policy: Arc<dyn PlatformPolicy>,
    root: InstallRoot,
    locator: ToolLocator,
    tools: Vec<ToolDescriptor>,
}

impl TerminalLauncher {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        policy: Arc<dyn PlatformPolicy>,
        root: InstallRoot,
    ) -> Self {
        let locator = ToolLocator::new(root.clone(), policy.clone());
        Self {
            runner,
            policy,
            root,
            locator,
            tools: ToolDescriptor::all().to_vec(),
        }
    }

    /// 限定可启动的工具列表
    pub fn with_tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = tools;
        self
    }

    /// 启动工具，返回被启动的可执行文件路径
    pub fn launch(&self, tool_id: &str, cwd: &Path) -> Result<PathBuf, LaunchError> {
        let descriptor = self
            .tools
            .iter()
            .find(|d| d.id == tool_id)
            .ok_or_else(|| LaunchError::UnknownTool(tool_id.to_string()))?;
        let located = self
            .locator
            .locate(descriptor)
            .ok_or_else(|| LaunchError::NotInstalled {
                tool: descriptor.name.to_string(),
            })?;

        let spec = self
            .policy
            .terminal_command(&located.path, cwd)
            .env("PATH", child_search_path(self.policy.as_ref(), &self.root));

        tracing::info!(tool_id, command = %spec.display(), "在终端中启动工具");
        self.runner.spawn_detached(&spec).map_err(|e| {
            tracing::error!(tool_id, error = ?e, "启动终端失败");
            LaunchError::Spawn {
                command: spec.display(),
                reason: e.to_string(),
            }
        })?;
        Ok(located.path)
    }
}
