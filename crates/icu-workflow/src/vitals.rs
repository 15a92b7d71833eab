//! 生命体征评估流水线
//!
//! 体征写入后的固定步骤：重新预测并写入缓存、更新就绪跟踪、广播 `vitals_update`。
//! 模拟器和手动录入共用同一条流水线。

use chrono::{DateTime, Utc};
use icu_core::{Patient, Prediction, Result, Vitals};
use icu_database::TransferStore;
use icu_notify::{EventEnvelope, NotificationHub};
use icu_prediction::{FeatureVector, PredictionCache, PredictionService};
use std::sync::Arc;

use crate::readiness::ReadinessTracker;

/// 一次评估的结果
#[derive(Debug, Clone)]
pub struct Assessment {
    pub patient: Patient,
    pub prediction: Prediction,
    pub ready_since: Option<DateTime<Utc>>,
}

/// 生命体征评估流水线
pub struct VitalsPipeline {
    store: Arc<dyn TransferStore>,
    predictions: PredictionService,
    cache: Arc<PredictionCache>,
    readiness: Arc<ReadinessTracker>,
    hub: Arc<NotificationHub>,
}

impl VitalsPipeline {
    pub fn new(
        store: Arc<dyn TransferStore>,
        predictions: PredictionService,
        cache: Arc<PredictionCache>,
        readiness: Arc<ReadinessTracker>,
        hub: Arc<NotificationHub>,
    ) -> Self {
        Self {
            store,
            predictions,
            cache,
            readiness,
            hub,
        }
    }

    pub fn store(&self) -> &Arc<dyn TransferStore> {
        &self.store
    }

    /// 写入新体征（同时追加历史）并重新评估
    pub async fn record(&self, patient_id: &str, vitals: &Vitals) -> Result<Assessment> {
        let patient = self.store.update_vitals(patient_id, vitals).await?;
        self.reassess(patient).await
    }

    /// 基于患者当前体征重新评估
    pub async fn reassess(&self, patient: Patient) -> Result<Assessment> {
        let patient_id = patient.patient_id.clone();

        let prediction = match self.predictions.predict(&FeatureVector::from_patient(&patient)) {
            Ok(prediction) => {
                if let Err(e) = self.cache.put(&patient_id, &prediction).await {
                    tracing::error!("Failed to cache prediction for {}: {}", patient_id, e);
                }
                prediction
            }
            Err(e) => {
                tracing::warn!("Inference failed for {}, using fallback: {}", patient_id, e);
                PredictionService::fallback_prediction()
            }
        };

        // 已有活动申请的患者不显示为待转科
        let has_active_request = !self.store.active_requests_for_patient(&patient_id).await?.is_empty();
        let ready = prediction.label.is_ready() && !has_active_request;
        let state = self.readiness.set_ready(&patient_id, ready, None).await?;
        let ready_since = state.ready_since.filter(|_| state.currently_ready);

        self.hub
            .broadcast(&EventEnvelope::vitals_update(&patient, &prediction, ready_since))
            .await;

        Ok(Assessment {
            patient,
            prediction,
            ready_since,
        })
    }
}
