//! # ICU数据库模块
//!
//! 持久化网关：负责患者、生命体征、科室、用户、转科申请、审批、出科记录
//! 和就绪跟踪的存储。提供 PostgreSQL 实现和内存实现。

pub mod connection;
pub mod memory;
pub mod models;
pub mod queries;
pub mod store;

// 重新导出主要类型
pub use connection::DatabasePool;
pub use memory::MemoryStore;
pub use models::*;
pub use queries::PgStore;
pub use store::{StoredPrediction, TransferStore};
