pub mod activity;
pub mod circular_buffer;
pub mod config;
pub mod frame;
pub mod keepalive;
pub mod reconnect;
pub mod timer;
pub mod types;

pub use activity::*;
pub use circular_buffer::*;
pub use config::*;
pub use frame::*;
pub use keepalive::*;
pub use reconnect::*;
pub use timer::*;
pub use types::*;
