//! 转科就绪分类器
//!
//! 核心流程只依赖 `ReadinessClassifier` 契约；具体模型（集成、插补、缩放）属于外部协作方。

use icu_core::{IcuError, Patient, ReadinessLabel, Result};
use serde::{Deserialize, Serialize};

/// 特征顺序，与训练数据列名一致
pub const FEATURE_NAMES: [&str; 10] = [
    "HR",
    "SpO2",
    "RESP",
    "ABPsys",
    "lactate",
    "gcs",
    "age",
    "comorbidity_score",
    "on_vent",
    "on_pressors",
];

/// 十维临床特征向量
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    #[serde(rename = "HR")]
    pub heart_rate: f64,
    #[serde(rename = "SpO2")]
    pub spo2: f64,
    #[serde(rename = "RESP")]
    pub respiratory_rate: f64,
    #[serde(rename = "ABPsys")]
    pub systolic_bp: f64,
    pub lactate: f64,
    pub gcs: f64,
    pub age: f64,
    pub comorbidity_score: f64,
    pub on_vent: bool,
    pub on_pressors: bool,
}

impl FeatureVector {
    pub fn from_patient(patient: &Patient) -> Self {
        let vitals = &patient.vitals;
        Self {
            heart_rate: vitals.heart_rate,
            spo2: vitals.spo2,
            respiratory_rate: vitals.respiratory_rate,
            systolic_bp: vitals.systolic_bp,
            lactate: vitals.lactate,
            gcs: vitals.gcs,
            age: f64::from(patient.age),
            comorbidity_score: vitals.comorbidity_score,
            on_vent: vitals.on_ventilator,
            on_pressors: vitals.on_pressors,
        }
    }

    /// 按 `FEATURE_NAMES` 顺序展开，布尔值编码为 0/1
    pub fn as_array(&self) -> [f64; 10] {
        [
            self.heart_rate,
            self.spo2,
            self.respiratory_rate,
            self.systolic_bp,
            self.lactate,
            self.gcs,
            self.age,
            self.comorbidity_score,
            if self.on_vent { 1.0 } else { 0.0 },
            if self.on_pressors { 1.0 } else { 0.0 },
        ]
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in FEATURE_NAMES.iter().zip(self.as_array()) {
            if !value.is_finite() {
                return Err(IcuError::Inference(format!("feature {} is not finite", name)));
            }
        }
        Ok(())
    }
}

/// 分类器原始输出
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: ReadinessLabel,
    /// 可转科的概率
    pub probability: f64,
    /// 按贡献排序的前 k 个特征
    pub contributing_features: Vec<String>,
}

/// 就绪分类器契约
pub trait ReadinessClassifier: Send + Sync {
    fn name(&self) -> &str;

    fn classify(&self, features: &FeatureVector) -> Result<Classification>;
}

#[derive(Debug)]
struct Criterion {
    name: &'static str,
    met: bool,
    deviation: f64,
}

impl Criterion {
    fn range(name: &'static str, value: f64, low: f64, high: f64) -> Self {
        let deviation = if value < low {
            (low - value) / low
        } else if value > high {
            (value - high) / high
        } else {
            0.0
        };
        Self { name, met: deviation == 0.0, deviation }
    }

    fn above(name: &'static str, value: f64, threshold: f64) -> Self {
        let met = value > threshold;
        // 恰好等于阈值也算未达标，给一个极小偏差以参与排序
        let deviation = if met { 0.0 } else { ((threshold - value) / threshold).max(f64::EPSILON) };
        Self { name, met, deviation }
    }

    fn below(name: &'static str, value: f64, threshold: f64) -> Self {
        let met = value < threshold;
        let deviation = if met { 0.0 } else { ((value - threshold) / threshold).max(f64::EPSILON) };
        Self { name, met, deviation }
    }

    fn absent(name: &'static str, present: bool) -> Self {
        Self { name, met: !present, deviation: if present { 1.0 } else { 0.0 } }
    }
}

/// 默认的确定性规则分类器
///
/// 八项标准中满足至少七项且未使用呼吸机和升压药时判定为可转科。
#[derive(Debug, Clone)]
pub struct RuleBasedClassifier {
    top_k: usize,
}

impl RuleBasedClassifier {
    pub fn new(top_k: usize) -> Self {
        Self { top_k }
    }

    fn criteria(features: &FeatureVector) -> [Criterion; 8] {
        [
            Criterion::range("Heart Rate", features.heart_rate, 60.0, 110.0),
            Criterion::above("SpO2", features.spo2, 94.0),
            Criterion::range("Respiratory Rate", features.respiratory_rate, 10.0, 22.0),
            Criterion::range("Systolic BP", features.systolic_bp, 90.0, 150.0),
            Criterion::below("Lactate", features.lactate, 2.2),
            Criterion::above("GCS", features.gcs, 12.0),
            Criterion::absent("Ventilator", features.on_vent),
            Criterion::absent("Pressors", features.on_pressors),
        ]
    }
}

impl Default for RuleBasedClassifier {
    fn default() -> Self {
        Self::new(3)
    }
}

impl ReadinessClassifier for RuleBasedClassifier {
    fn name(&self) -> &str {
        "RuleBasedClassifier"
    }

    fn classify(&self, features: &FeatureVector) -> Result<Classification> {
        features.validate()?;

        let criteria = Self::criteria(features);
        let met = criteria.iter().filter(|c| c.met).count();
        let on_support = features.on_vent || features.on_pressors;
        let ready = met >= 7 && !on_support;

        let fraction = met as f64 / 16.0;
        let probability = if ready {
            (0.5 + fraction).min(0.98)
        } else if on_support {
            fraction.min(0.3)
        } else {
            fraction
        };

        let mut failed: Vec<&Criterion> = criteria.iter().filter(|c| !c.met).collect();
        failed.sort_by(|a, b| b.deviation.total_cmp(&a.deviation));
        let mut contributing_features: Vec<String> = failed
            .into_iter()
            .take(self.top_k)
            .map(|c| c.name.to_string())
            .collect();
        if contributing_features.is_empty() {
            contributing_features.push("Stable clinical parameters".to_string());
        }

        Ok(Classification {
            label: if ready { ReadinessLabel::Ready } else { ReadinessLabel::NotReady },
            probability,
            contributing_features,
        })
    }
}
