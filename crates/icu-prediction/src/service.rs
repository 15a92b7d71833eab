//! 预测服务

use chrono::Utc;
use icu_core::{IcuError, Prediction, ReadinessLabel, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::classifier::{FeatureVector, ReadinessClassifier, FEATURE_NAMES};

/// 当前模型版本
pub const MODEL_VERSION: &str = "1.0.0";

/// 模型信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_type: String,
    pub features_expected: usize,
    pub feature_names: Vec<String>,
}

/// 预测服务
///
/// 包装分类器，生成带解释文本的完整预测结果。
#[derive(Clone)]
pub struct PredictionService {
    classifier: Arc<dyn ReadinessClassifier>,
}

impl PredictionService {
    pub fn new(classifier: Arc<dyn ReadinessClassifier>) -> Self {
        Self { classifier }
    }

    /// 执行推理；分类器失败或输出异常时返回 `Inference` 错误
    pub fn predict(&self, features: &FeatureVector) -> Result<Prediction> {
        features.validate()?;
        let classification = self.classifier.classify(features)?;

        let probability = classification.probability;
        if !probability.is_finite() || !(0.0..=1.0).contains(&probability) {
            return Err(IcuError::Inference(format!(
                "classifier {} returned probability {}",
                self.classifier.name(),
                probability
            )));
        }

        let explanation = match classification.label {
            ReadinessLabel::Ready => format!(
                "Patient shows stable clinical parameters with {:.1}% confidence for safe transfer",
                probability * 100.0
            ),
            ReadinessLabel::NotReady => format!(
                "Patient requires continued ICU monitoring with {:.1}% confidence",
                (1.0 - probability) * 100.0
            ),
        };

        Ok(Prediction {
            label: classification.label,
            probability,
            confidence: probability.max(1.0 - probability),
            explanation,
            risk_factors: classification.contributing_features,
            model_version: MODEL_VERSION.to_string(),
            timestamp: Utc::now(),
        })
    }

    /// 执行推理，失败时回退到安全默认值
    pub fn predict_or_fallback(&self, features: &FeatureVector) -> Prediction {
        match self.predict(features) {
            Ok(prediction) => prediction,
            Err(e) => {
                warn!("Prediction failed, substituting fallback: {}", e);
                Self::fallback_prediction()
            }
        }
    }

    /// 安全默认值：不可转科、低置信度、需要临床评估
    pub fn fallback_prediction() -> Prediction {
        Prediction {
            label: ReadinessLabel::NotReady,
            probability: 0.3,
            confidence: 0.7,
            explanation: "Unable to assess - requires clinical evaluation".to_string(),
            risk_factors: vec!["Assessment unavailable".to_string()],
            model_version: MODEL_VERSION.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn model_info(&self) -> ModelInfo {
        ModelInfo {
            model_type: self.classifier.name().to_string(),
            features_expected: FEATURE_NAMES.len(),
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl std::fmt::Debug for PredictionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictionService")
            .field("classifier", &self.classifier.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{Classification, RuleBasedClassifier};

    struct BrokenClassifier;

    impl ReadinessClassifier for BrokenClassifier {
        fn name(&self) -> &str {
            "broken"
        }

        fn classify(&self, _features: &FeatureVector) -> Result<Classification> {
            Ok(Classification {
                label: ReadinessLabel::Ready,
                probability: 1.7,
                contributing_features: vec![],
            })
        }
    }

    fn features() -> FeatureVector {
        FeatureVector {
            heart_rate: 95.0,
            spo2: 96.0,
            respiratory_rate: 18.0,
            systolic_bp: 110.0,
            lactate: 1.0,
            gcs: 15.0,
            age: 70.0,
            comorbidity_score: 3.0,
            on_vent: false,
            on_pressors: false,
        }
    }

    #[test]
    fn test_predict_builds_full_response() {
        let service = PredictionService::new(Arc::new(RuleBasedClassifier::default()));
        let prediction = service.predict(&features()).unwrap();

        assert_eq!(prediction.label, ReadinessLabel::Ready);
        assert_eq!(prediction.model_version, MODEL_VERSION);
        assert!(prediction.confidence >= 0.5);
        assert!(prediction.explanation.contains("safe transfer"));
    }

    #[test]
    fn test_malformed_output_is_inference_error() {
        let service = PredictionService::new(Arc::new(BrokenClassifier));
        let result = service.predict(&features());
        assert!(matches!(result, Err(IcuError::Inference(_))));
    }

    #[test]
    fn test_fallback_on_failure() {
        let service = PredictionService::new(Arc::new(BrokenClassifier));
        let prediction = service.predict_or_fallback(&features());

        assert_eq!(prediction.label, ReadinessLabel::NotReady);
        assert_eq!(prediction.confidence, 0.7);
        assert_eq!(prediction.risk_factors, vec!["Assessment unavailable"]);
    }

    #[test]
    fn test_model_info() {
        let service = PredictionService::new(Arc::new(RuleBasedClassifier::default()));
        let info = service.model_info();
        assert_eq!(info.features_expected, 10);
        assert_eq!(info.feature_names[3], "ABPsys");
    }
}
