//! 预测缓存
//!
//! 每位患者在进程内保留一个权威预测值，持久层保存只追加的预测日志，
//! "当前"预测即时间戳最新的一条。

use icu_core::{Patient, Prediction, Result};
use icu_database::TransferStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use crate::classifier::FeatureVector;
use crate::service::PredictionService;

/// 缓存查找结果
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(Prediction),
    Missing,
    /// 日志中的最新记录无法解析
    Malformed(String),
}

/// 预测缓存
pub struct PredictionCache {
    store: Arc<dyn TransferStore>,
    latest: RwLock<HashMap<String, Prediction>>,
}

impl PredictionCache {
    pub fn new(store: Arc<dyn TransferStore>) -> Self {
        Self {
            store,
            latest: RwLock::new(HashMap::new()),
        }
    }

    /// 查找最新预测，区分缺失和损坏
    pub async fn lookup(&self, patient_id: &str) -> Result<CacheLookup> {
        if let Some(prediction) = self.latest.read().await.get(patient_id) {
            return Ok(CacheLookup::Hit(prediction.clone()));
        }

        let stored = match self.store.latest_prediction(patient_id).await? {
            Some(stored) => stored,
            None => return Ok(CacheLookup::Missing),
        };

        match serde_json::from_str::<Prediction>(&stored.payload) {
            Ok(prediction) => {
                self.remember(patient_id, &prediction).await;
                Ok(CacheLookup::Hit(prediction))
            }
            Err(e) => Ok(CacheLookup::Malformed(e.to_string())),
        }
    }

    /// 返回最新预测；损坏的记录视为不存在
    pub async fn get(&self, patient_id: &str) -> Result<Option<Prediction>> {
        match self.lookup(patient_id).await? {
            CacheLookup::Hit(prediction) => Ok(Some(prediction)),
            CacheLookup::Missing => Ok(None),
            CacheLookup::Malformed(reason) => {
                warn!("Cached prediction for {} is malformed: {}", patient_id, reason);
                Ok(None)
            }
        }
    }

    /// 追加一条新预测（从不覆盖日志）
    pub async fn put(&self, patient_id: &str, prediction: &Prediction) -> Result<()> {
        let payload = serde_json::to_string(prediction)?;
        self.store
            .append_prediction(patient_id, &payload, prediction.timestamp)
            .await?;
        self.remember(patient_id, prediction).await;
        debug!("Cached prediction for {} ({})", patient_id, prediction.label.as_str());
        Ok(())
    }

    /// 读穿透：缺失或损坏时同步重新推理并写入；推理失败时返回安全默认值
    pub async fn get_or_refresh(&self, patient: &Patient, service: &PredictionService) -> Prediction {
        let patient_id = patient.patient_id.as_str();

        match self.lookup(patient_id).await {
            Ok(CacheLookup::Hit(prediction)) => return prediction,
            Ok(CacheLookup::Missing) => {}
            Ok(CacheLookup::Malformed(reason)) => {
                warn!("Re-inferring {} after malformed cache entry: {}", patient_id, reason);
            }
            Err(e) => {
                error!("Prediction cache lookup failed for {}: {}", patient_id, e);
            }
        }

        match service.predict(&FeatureVector::from_patient(patient)) {
            Ok(prediction) => {
                if let Err(e) = self.put(patient_id, &prediction).await {
                    error!("Failed to store prediction for {}: {}", patient_id, e);
                }
                prediction
            }
            Err(e) => {
                warn!("Inference failed for {}, using fallback: {}", patient_id, e);
                PredictionService::fallback_prediction()
            }
        }
    }

    /// 丢弃进程内缓存值，下次读取时回源
    pub async fn evict(&self, patient_id: &str) {
        self.latest.write().await.remove(patient_id);
    }

    async fn remember(&self, patient_id: &str, prediction: &Prediction) {
        let mut latest = self.latest.write().await;
        let newer = latest
            .get(patient_id)
            .map_or(true, |current| current.timestamp <= prediction.timestamp);
        if newer {
            latest.insert(patient_id.to_string(), prediction.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{Classification, ReadinessClassifier, RuleBasedClassifier};
    use chrono::{Duration, Utc};
    use icu_core::{IcuError, ReadinessLabel, Vitals};
    use icu_database::{MemoryStore, NewPatient};

    struct FailingClassifier;

    impl ReadinessClassifier for FailingClassifier {
        fn name(&self) -> &str {
            "failing"
        }

        fn classify(&self, _features: &FeatureVector) -> Result<Classification> {
            Err(IcuError::Inference("model unavailable".to_string()))
        }
    }

    fn prediction(label: ReadinessLabel, probability: f64) -> Prediction {
        Prediction {
            label,
            probability,
            confidence: probability.max(1.0 - probability),
            explanation: "test".to_string(),
            risk_factors: vec![],
            model_version: "1.0.0".to_string(),
            timestamp: Utc::now(),
        }
    }

    async fn patient(store: &MemoryStore) -> Patient {
        store
            .create_patient(&NewPatient {
                patient_id: "ICU-042".to_string(),
                name: "Henry Stewart".to_string(),
                age: 71,
                bed: None,
                department_id: None,
                vitals: Vitals {
                    heart_rate: 78.0,
                    spo2: 98.0,
                    respiratory_rate: 14.0,
                    systolic_bp: 118.0,
                    lactate: 0.9,
                    gcs: 15.0,
                    on_ventilator: false,
                    on_pressors: false,
                    comorbidity_score: 1.0,
                },
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_get_returns_most_recent_put() {
        let cache = PredictionCache::new(Arc::new(MemoryStore::new()));
        assert!(cache.get("ICU-042").await.unwrap().is_none());

        for i in 0..5 {
            let value = prediction(ReadinessLabel::NotReady, 0.1 * i as f64);
            cache.put("ICU-042", &value).await.unwrap();
            assert_eq!(cache.get("ICU-042").await.unwrap(), Some(value));
        }
    }

    #[tokio::test]
    async fn test_put_never_overwrites_log() {
        let store = Arc::new(MemoryStore::new());
        let cache = PredictionCache::new(store.clone());

        cache.put("ICU-042", &prediction(ReadinessLabel::NotReady, 0.2)).await.unwrap();
        let latest = prediction(ReadinessLabel::Ready, 0.9);
        cache.put("ICU-042", &latest).await.unwrap();

        // 新实例从日志回源，仍然得到最新值
        let fresh = PredictionCache::new(store);
        assert_eq!(fresh.get("ICU-042").await.unwrap(), Some(latest));
    }

    #[tokio::test]
    async fn test_older_put_does_not_shadow_newer_value() {
        let cache = PredictionCache::new(Arc::new(MemoryStore::new()));
        let newer = prediction(ReadinessLabel::Ready, 0.9);
        let mut older = prediction(ReadinessLabel::NotReady, 0.2);
        older.timestamp = newer.timestamp - Duration::minutes(10);

        cache.put("ICU-042", &newer).await.unwrap();
        cache.put("ICU-042", &older).await.unwrap();
        assert_eq!(cache.get("ICU-042").await.unwrap(), Some(newer));
    }

    #[tokio::test]
    async fn test_malformed_entry_is_reinferred() {
        let store = Arc::new(MemoryStore::new());
        let patient = patient(&store).await;
        store
            .append_prediction("ICU-042", "{not json", Utc::now())
            .await
            .unwrap();

        let cache = PredictionCache::new(store.clone());
        assert!(matches!(cache.lookup("ICU-042").await.unwrap(), CacheLookup::Malformed(_)));
        assert!(cache.get("ICU-042").await.unwrap().is_none());

        let service = PredictionService::new(Arc::new(RuleBasedClassifier::default()));
        let refreshed = cache.get_or_refresh(&patient, &service).await;
        assert_eq!(refreshed.label, ReadinessLabel::Ready);
        assert_eq!(cache.get("ICU-042").await.unwrap(), Some(refreshed));
    }

    #[tokio::test]
    async fn test_inference_failure_degrades_to_placeholder() {
        let store = Arc::new(MemoryStore::new());
        let patient = patient(&store).await;
        let cache = PredictionCache::new(store);

        let service = PredictionService::new(Arc::new(FailingClassifier));
        let result = cache.get_or_refresh(&patient, &service).await;

        assert_eq!(result.label, ReadinessLabel::NotReady);
        assert_eq!(result.explanation, "Unable to assess - requires clinical evaluation");
        // 默认值不写入缓存
        assert!(cache.get("ICU-042").await.unwrap().is_none());
    }
}
