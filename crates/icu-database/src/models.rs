//! 数据库模型

use chrono::{DateTime, Utc};
use icu_core::models::*;
use icu_core::{IcuError, Result};
use sqlx::FromRow;
use uuid::Uuid;

// 默认数据 - 与原有部署保持一致

/// 默认科室: (名称, 容量)
pub const DEFAULT_DEPARTMENTS: &[(&str, i32)] = &[
    ("ICU", 20),
    ("General Ward", 50),
    ("Cardiac Unit", 15),
    ("Surgical Ward", 30),
    ("Emergency Department", 25),
    ("Step-Down Unit", 20),
];

/// 默认用户: (用户名, 角色, 所属科室名)
pub const DEFAULT_USERS: &[(&str, UserRole, &str)] = &[
    ("nurse_sarah", UserRole::Nurse, "ICU"),
    ("nurse_mike", UserRole::Nurse, "ICU"),
    ("dr_smith", UserRole::Doctor, "ICU"),
    ("dr_jones", UserRole::Doctor, "ICU"),
    ("admin_cardiac", UserRole::Admin, "Cardiac Unit"),
    ("admin_general", UserRole::Admin, "General Ward"),
];

// 数据库表模型 - 使用FromRow trait用于SQL查询

/// 数据库科室表
#[derive(Debug, FromRow)]
pub struct DbDepartment {
    pub id: i64,
    pub name: String,
    pub capacity: i32,
    pub current_occupancy: i32,
}

impl From<DbDepartment> for Department {
    fn from(row: DbDepartment) -> Self {
        Department {
            id: row.id,
            name: row.name,
            capacity: row.capacity,
            current_occupancy: row.current_occupancy,
        }
    }
}

/// 数据库用户表
#[derive(Debug, FromRow)]
pub struct DbUser {
    pub username: String,
    pub role: String, // 存储为字符串，转换为UserRole枚举
    pub department_id: Option<i64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbUser> for User {
    type Error = IcuError;

    fn try_from(row: DbUser) -> Result<Self> {
        Ok(User {
            role: row.role.parse()?,
            username: row.username,
            department_id: row.department_id,
            is_active: row.is_active,
            created_at: row.created_at,
        })
    }
}

/// 患者表与当前生命体征表的联合查询行
#[derive(Debug, FromRow)]
pub struct DbPatient {
    pub patient_id: String,
    pub name: String,
    pub age: i32,
    pub bed_number: Option<String>,
    pub department_id: Option<i64>,
    pub is_active: bool,
    pub admission_date: DateTime<Utc>,
    pub heart_rate: f64,
    pub spo2: f64,
    pub respiratory_rate: f64,
    pub systolic_bp: f64,
    pub lactate: f64,
    pub gcs: f64,
    pub on_ventilator: bool,
    pub on_pressors: bool,
    pub comorbidity_score: f64,
    pub recorded_at: DateTime<Utc>,
}

impl From<DbPatient> for Patient {
    fn from(row: DbPatient) -> Self {
        Patient {
            patient_id: row.patient_id,
            name: row.name,
            age: row.age,
            bed: row.bed_number,
            department_id: row.department_id,
            is_active: row.is_active,
            vitals: Vitals {
                heart_rate: row.heart_rate,
                spo2: row.spo2,
                respiratory_rate: row.respiratory_rate,
                systolic_bp: row.systolic_bp,
                lactate: row.lactate,
                gcs: row.gcs,
                on_ventilator: row.on_ventilator,
                on_pressors: row.on_pressors,
                comorbidity_score: row.comorbidity_score,
            },
            admission_date: row.admission_date,
            last_updated: row.recorded_at,
        }
    }
}

/// 数据库生命体征历史表
#[derive(Debug, FromRow)]
pub struct DbVitalsHistory {
    pub patient_id: String,
    pub heart_rate: f64,
    pub spo2: f64,
    pub respiratory_rate: f64,
    pub systolic_bp: f64,
    pub lactate: f64,
    pub gcs: f64,
    pub on_ventilator: bool,
    pub on_pressors: bool,
    pub comorbidity_score: f64,
    pub recorded_at: DateTime<Utc>,
}

impl From<DbVitalsHistory> for VitalsRecord {
    fn from(row: DbVitalsHistory) -> Self {
        VitalsRecord {
            patient_id: row.patient_id,
            vitals: Vitals {
                heart_rate: row.heart_rate,
                spo2: row.spo2,
                respiratory_rate: row.respiratory_rate,
                systolic_bp: row.systolic_bp,
                lactate: row.lactate,
                gcs: row.gcs,
                on_ventilator: row.on_ventilator,
                on_pressors: row.on_pressors,
                comorbidity_score: row.comorbidity_score,
            },
            recorded_at: row.recorded_at,
        }
    }
}

/// 数据库预测日志表
#[derive(Debug, FromRow)]
pub struct DbPrediction {
    pub patient_id: String,
    pub payload: String,
    pub generated_at: DateTime<Utc>,
}

/// 数据库转科申请表
#[derive(Debug, FromRow)]
pub struct DbTransferRequest {
    pub request_id: String,
    pub patient_id: String,
    pub requesting_nurse: String,
    pub reviewing_doctor: Option<String>,
    pub approving_admin: Option<String>,
    pub target_department_id: Option<i64>,
    pub current_status: String, // 存储为字符串，转换为TransferStatus枚举
    pub ml_prediction: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbTransferRequest> for TransferRequest {
    type Error = IcuError;

    fn try_from(row: DbTransferRequest) -> Result<Self> {
        let prediction = match row.ml_prediction.as_deref() {
            Some(raw) => match serde_json::from_str::<Prediction>(raw) {
                Ok(prediction) => Some(prediction),
                Err(e) => {
                    tracing::warn!(
                        "Discarding malformed prediction snapshot on {}: {}",
                        row.request_id,
                        e
                    );
                    None
                }
            },
            None => None,
        };

        Ok(TransferRequest {
            status: row.current_status.parse()?,
            request_id: row.request_id,
            patient_id: row.patient_id,
            requesting_nurse: row.requesting_nurse,
            reviewing_doctor: row.reviewing_doctor,
            approving_admin: row.approving_admin,
            target_department_id: row.target_department_id,
            prediction,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// 数据库审批记录表
#[derive(Debug, FromRow)]
pub struct DbApproval {
    pub id: Uuid,
    pub request_id: String,
    pub approver: String,
    pub approver_role: String,
    pub action: String,
    pub comments: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbApproval> for Approval {
    type Error = IcuError;

    fn try_from(row: DbApproval) -> Result<Self> {
        Ok(Approval {
            id: row.id,
            approver_role: row.approver_role.parse()?,
            action: row.action.parse()?,
            request_id: row.request_id,
            approver: row.approver,
            comments: row.comments,
            created_at: row.created_at,
        })
    }
}

/// 数据库出科记录表
#[derive(Debug, FromRow)]
pub struct DbDischarge {
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

impl From<DbDischarge> for DischargeRecord {
    fn from(row: DbDischarge) -> Self {
        DischargeRecord {
            id: row.id,
            request_id: row.request_id,
            patient_id: row.patient_id,
            patient_name: row.patient_name,
            destination_department_id: row.destination_department_id,
            requesting_nurse: row.requesting_nurse,
            reviewing_doctor: row.reviewing_doctor,
            approving_admin: row.approving_admin,
            discharged_by: row.discharged_by,
            notes: row.notes,
            discharged_at: row.discharged_at,
        }
    }
}

/// 数据库就绪跟踪表
#[derive(Debug, FromRow)]
pub struct DbReadyState {
    pub patient_id: String,
    pub currently_ready: bool,
    pub ready_since: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbReadyState> for ReadyState {
    fn from(row: DbReadyState) -> Self {
        ReadyState {
            patient_id: row.patient_id,
            currently_ready: row.currently_ready,
            ready_since: row.ready_since,
            updated_at: row.updated_at,
        }
    }
}

// 插入模型 - 用于创建新记录

/// 新患者插入模型
#[derive(Debug, Clone)]
pub struct NewPatient {
    pub patient_id: String,
    pub name: String,
    pub age: i32,
    pub bed: Option<String>,
    pub department_id: Option<i64>,
    pub vitals: Vitals,
}

/// 新用户插入模型
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub role: UserRole,
    pub department_id: Option<i64>,
}

/// 新审批记录插入模型
#[derive(Debug, Clone)]
pub struct NewApproval {
    pub request_id: String,
    pub approver: String,
    pub approver_role: UserRole,
    pub action: ApprovalAction,
    pub comments: Option<String>,
}
