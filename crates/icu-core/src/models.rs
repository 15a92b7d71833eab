//! 核心数据模型定义

use crate::error::{IcuError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 患者当前生命体征
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vitals {
    #[serde(rename = "heartRate")]
    pub heart_rate: f64,
    #[serde(rename = "spO2")]
    pub spo2: f64,
    #[serde(rename = "respiratoryRate")]
    pub respiratory_rate: f64,
    #[serde(rename = "systolicBP")]
    pub systolic_bp: f64,
    pub lactate: f64,
    pub gcs: f64,
    #[serde(rename = "onVentilator", default)]
    pub on_ventilator: bool,
    #[serde(rename = "onPressors", default)]
    pub on_pressors: bool,
    #[serde(rename = "comorbidityScore", default)]
    pub comorbidity_score: f64,
}

/// 生命体征历史记录（只追加）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VitalsRecord {
    pub patient_id: String,
    pub vitals: Vitals,
    pub recorded_at: DateTime<Utc>,
}

/// 患者基本信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub patient_id: String,           // 外部患者ID，如 ICU-040
    pub name: String,
    pub age: i32,
    pub bed: Option<String>,          // 床位号
    pub department_id: Option<i64>,   // 当前所在科室
    pub is_active: bool,              // 出科后置为 false（逻辑删除）
    pub vitals: Vitals,
    pub admission_date: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// 转科就绪判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadinessLabel {
    #[serde(rename = "Ready")]
    Ready,
    #[serde(rename = "Not Ready")]
    NotReady,
}

impl ReadinessLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadinessLabel::Ready => "Ready",
            ReadinessLabel::NotReady => "Not Ready",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ReadinessLabel::Ready)
    }
}

/// 分类器输出快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    #[serde(rename = "prediction")]
    pub label: ReadinessLabel,
    pub probability: f64,
    pub confidence: f64,
    pub explanation: String,
    pub risk_factors: Vec<String>,
    pub model_version: String,
    pub timestamp: DateTime<Utc>,
}

/// 转科申请状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,        // 护士已提交
    DoctorApproved, // 医生已批准
    DoctorRejected, // 医生已拒绝
    AdminApproved,  // 管理员已批准
    AdminRejected,  // 管理员已拒绝
    Completed,      // 已出科
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::DoctorApproved => "doctor_approved",
            TransferStatus::DoctorRejected => "doctor_rejected",
            TransferStatus::AdminApproved => "admin_approved",
            TransferStatus::AdminRejected => "admin_rejected",
            TransferStatus::Completed => "completed",
        }
    }

    /// 终止状态：不再接受任何事件
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::DoctorRejected | TransferStatus::AdminRejected
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = IcuError;

    /// 解析状态字符串，接受历史同义词；无法识别的值返回验证错误
    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(TransferStatus::Pending),
            "approved" | "doctor_approved" => Ok(TransferStatus::DoctorApproved),
            "rejected" | "doctor_rejected" => Ok(TransferStatus::DoctorRejected),
            "admin_approved" => Ok(TransferStatus::AdminApproved),
            "admin_rejected" => Ok(TransferStatus::AdminRejected),
            "completed" => Ok(TransferStatus::Completed),
            other => Err(IcuError::Validation(format!("unknown transfer status '{}'", other))),
        }
    }
}

/// 转科申请
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    #[serde(rename = "id")]
    pub request_id: String,
    pub patient_id: String,
    #[serde(rename = "nurse_id")]
    pub requesting_nurse: String,
    #[serde(rename = "doctor_id")]
    pub reviewing_doctor: Option<String>,
    #[serde(rename = "admin_id")]
    pub approving_admin: Option<String>,
    pub target_department_id: Option<i64>,
    pub status: TransferStatus,
    #[serde(rename = "ml_prediction")]
    pub prediction: Option<Prediction>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 审批动作
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    Approved,
    Rejected,
}

impl ApprovalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalAction::Approved => "approved",
            ApprovalAction::Rejected => "rejected",
        }
    }
}

impl FromStr for ApprovalAction {
    type Err = IcuError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "approved" => Ok(ApprovalAction::Approved),
            "rejected" => Ok(ApprovalAction::Rejected),
            other => Err(IcuError::Validation(format!("unknown approval action '{}'", other))),
        }
    }
}

/// 审批审计记录，只追加，不修改
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub id: Uuid,
    pub request_id: String,
    pub approver: String,
    pub approver_role: UserRole,
    pub action: ApprovalAction,
    pub comments: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 科室
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Department {
    pub id: i64,
    pub name: String,
    pub capacity: i32,
    pub current_occupancy: i32,
}

impl Department {
    /// 剩余床位 = 容量 - 当前占用
    pub fn available_beds(&self) -> i32 {
        self.capacity - self.current_occupancy
    }
}

/// 用户角色
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Nurse,
    Doctor,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Nurse => "nurse",
            UserRole::Doctor => "doctor",
            UserRole::Admin => "admin",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = IcuError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "nurse" => Ok(UserRole::Nurse),
            "doctor" => Ok(UserRole::Doctor),
            "admin" => Ok(UserRole::Admin),
            other => Err(IcuError::Validation(format!("invalid role '{}'", other))),
        }
    }
}

/// 用户信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub role: UserRole,
    pub department_id: Option<i64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// 就绪持续时间跟踪行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyState {
    pub patient_id: String,
    pub currently_ready: bool,
    pub ready_since: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// 出科记录，每个完成的申请只生成一次
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DischargeRecord {
    pub id: Uuid,
    pub request_id: String,
    pub patient_id: String,
    pub patient_name: String,
    pub destination_department_id: Option<i64>,
    pub requesting_nurse: String,
    pub reviewing_doctor: Option<String>,
    pub approving_admin: Option<String>,
    pub discharged_by: String,
    pub notes: Option<String>,
    pub discharged_at: DateTime<Utc>,
}
