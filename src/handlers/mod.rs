pub mod config;
pub mod logs;
pub mod voice;

pub use config::*;
pub use logs::*;
pub use voice::*;
