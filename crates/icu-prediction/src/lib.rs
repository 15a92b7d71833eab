//! # ICU预测模块
//!
//! 提供转科就绪预测相关功能，包括：
//! - 分类器接口：十维临床特征到就绪判定的契约
//! - 规则分类器：默认的确定性分类实现
//! - 预测服务：生成完整预测结果，失败时回退到安全默认值
//! - 预测缓存：每位患者一个权威缓存值，背后是只追加的预测日志

pub mod cache;
pub mod classifier;
pub mod service;

// 重新导出主要类型
pub use cache::PredictionCache;
pub use classifier::{
    Classification, FeatureVector, ReadinessClassifier, RuleBasedClassifier, FEATURE_NAMES,
};
pub use service::{ModelInfo, PredictionService, MODEL_VERSION};
