pub mod config;
pub mod event;
pub mod tool;

pub use config::*;
pub use event::*;
pub use tool::*;
