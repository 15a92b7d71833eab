//! 错误定义模块

use thiserror::Error;

/// ICU转科系统统一错误类型
#[derive(Error, Debug)]
pub enum IcuError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("网络错误: {0}")]
    Network(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("权限错误: {0}")]
    Permission(String),

    #[error("系统内部错误: {0}")]
    Internal(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("推理错误: {0}")]
    Inference(String),

    #[error("资源冲突: {0}")]
    Conflict(String),

    #[error("无效状态转换: 从 {from} 到 {event}")]
    InvalidStateTransition { from: String, event: String },
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for IcuError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => IcuError::NotFound("row not found".to_string()),
            other => IcuError::Database(other.to_string()),
        }
    }
}

/// ICU转科系统统一结果类型
pub type Result<T> = std::result::Result<T, IcuError>;
