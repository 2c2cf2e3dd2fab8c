pub mod command;
pub mod config;
pub mod paths;
pub mod platform;

pub use command::*;
pub use config::*;
pub use paths::*;
pub use platform::*;
