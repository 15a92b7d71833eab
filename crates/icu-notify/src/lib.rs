//! # ICU通知模块
//!
//! 将状态变更事件推送给所有在线订阅者：
//! - 事件类型与 `{type, data}` 信封格式
//! - 订阅者注册表，由服务进程持有，关闭时统一拆除
//! - 广播时发现投递失败的订阅者并在广播结束后移除

pub mod event;
pub mod hub;

pub use event::{EventEnvelope, EventType};
pub use hub::{BroadcastReport, ChannelSink, EventSink, NotificationHub, SubscriberId};
