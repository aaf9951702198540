pub mod config;
pub mod dispatch;
pub mod error;
pub mod fs;
pub mod lifecycle;
pub mod link;
pub mod proto;
pub mod server;
pub mod state;
