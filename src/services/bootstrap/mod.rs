//! 环境引导：检查轮次编排、运行状态与 PATH 维护

pub mod orchestrator;
pub mod path_env;
pub mod state;

pub use orchestrator::{BootstrapService, BootstrapServiceBuilder};
pub use path_env::{apply_search_path, augment_search_path, child_search_path, PathAugmentation};
