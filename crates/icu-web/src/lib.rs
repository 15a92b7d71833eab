//! # ICU Web
//!
//! 转科协调系统的 HTTP / WebSocket 接口层。

pub mod error;
pub mod handlers;
pub mod server;
pub mod ws;

pub use error::ApiError;
pub use server::{create_app, AppState, WebServer};
