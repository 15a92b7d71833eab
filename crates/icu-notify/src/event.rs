//! 通知事件定义

use chrono::Utc;
use icu_core::{DischargeRecord, Patient, Prediction, Result, TransferRequest};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TransferRequestCreated,
    TransferRequestUpdated,
    VitalsUpdate,
    PatientDischarged,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransferRequestCreated => "transfer_request_created",
            Self::TransferRequestUpdated => "transfer_request_updated",
            Self::VitalsUpdate => "vitals_update",
            Self::PatientDischarged => "patient_discharged",
        }
    }
}

impl TryFrom<&str> for EventType {
    type Error = icu_core::IcuError;

    fn try_from(value: &str) -> Result<Self> {
        match value {
            "transfer_request_created" => Ok(Self::TransferRequestCreated),
            "transfer_request_updated" => Ok(Self::TransferRequestUpdated),
            "vitals_update" => Ok(Self::VitalsUpdate),
            "patient_discharged" => Ok(Self::PatientDischarged),
            other => Err(icu_core::IcuError::Validation(format!("unknown event type: {}", other))),
        }
    }
}

/// 推送给客户端的 JSON 信封 `{type, data}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub data: serde_json::Value,
}

impl EventEnvelope {
    pub fn new(event_type: EventType, data: serde_json::Value) -> Self {
        Self { event_type, data }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn transfer_request_created(request: &TransferRequest) -> Result<Self> {
        Ok(Self::new(EventType::TransferRequestCreated, serde_json::to_value(request)?))
    }

    pub fn transfer_request_updated(request: &TransferRequest) -> Result<Self> {
        Ok(Self::new(EventType::TransferRequestUpdated, serde_json::to_value(request)?))
    }

    /// 生命体征更新，附带最新预测和就绪开始时间
    pub fn vitals_update(
        patient: &Patient,
        prediction: &Prediction,
        ready_since: Option<chrono::DateTime<Utc>>,
    ) -> Self {
        Self::new(
            EventType::VitalsUpdate,
            json!({
                "patient_id": patient.patient_id,
                "vitals": patient.vitals,
                "prediction": prediction,
                "ready_since": ready_since,
                "timestamp": Utc::now(),
            }),
        )
    }

    pub fn patient_discharged(record: &DischargeRecord) -> Result<Self> {
        Ok(Self::new(EventType::PatientDischarged, serde_json::to_value(record)?))
    }
}
