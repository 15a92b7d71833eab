//! 持久化网关接口

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use icu_core::{
    Approval, Department, DischargeRecord, Patient, ReadyState, Result, TransferRequest,
    TransferStatus, User, UserRole, Vitals, VitalsRecord,
};

use crate::models::{NewApproval, NewPatient, NewUser};

/// 预测日志中的一条原始记录
///
/// `payload` 保存序列化后的预测 JSON，由缓存层负责解析。
#[derive(Debug, Clone)]
pub struct StoredPrediction {
    pub patient_id: String,
    pub payload: String,
    pub generated_at: DateTime<Utc>,
}

/// 持久化网关
///
/// 独占所有持久状态。其他组件只持有外部ID，需要时重新读取。
#[async_trait]
pub trait TransferStore: Send + Sync {
    /// 写入默认科室和用户（幂等）
    async fn seed_defaults(&self) -> Result<()>;

    // ========== 科室 ==========

    async fn list_departments(&self) -> Result<Vec<Department>>;

    async fn get_department(&self, id: i64) -> Result<Option<Department>>;

    /// 按名称查找科室（不区分大小写）
    async fn find_department_by_name(&self, name: &str) -> Result<Option<Department>>;

    /// 调整科室占用数，结果限制在 `0..=capacity`
    async fn adjust_occupancy(&self, id: i64, delta: i32) -> Result<Department>;

    // ========== 用户 ==========

    async fn find_user(&self, username: &str) -> Result<Option<User>>;

    async fn create_user(&self, user: &NewUser) -> Result<User>;

    async fn list_users_by_role(&self, role: UserRole) -> Result<Vec<User>>;

    // ========== 患者 ==========

    async fn create_patient(&self, patient: &NewPatient) -> Result<Patient>;

    async fn get_patient(&self, patient_id: &str) -> Result<Option<Patient>>;

    async fn list_active_patients(&self) -> Result<Vec<Patient>>;

    /// 更新当前生命体征，同时追加一条历史记录
    async fn update_vitals(&self, patient_id: &str, vitals: &Vitals) -> Result<Patient>;

    /// 历史生命体征，按时间倒序
    async fn vitals_history(&self, patient_id: &str, limit: i64) -> Result<Vec<VitalsRecord>>;

    async fn deactivate_patient(&self, patient_id: &str) -> Result<()>;

    // ========== 预测日志 ==========

    async fn append_prediction(
        &self,
        patient_id: &str,
        payload: &str,
        generated_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn latest_prediction(&self, patient_id: &str) -> Result<Option<StoredPrediction>>;

    // ========== 转科申请 ==========

    /// 插入新申请；`exclusive` 为真时，若该患者已有活动申请则原子地返回 `Conflict`
    async fn insert_transfer_request(&self, request: &TransferRequest, exclusive: bool) -> Result<()>;

    async fn get_transfer_request(&self, request_id: &str) -> Result<Option<TransferRequest>>;

    /// 按创建时间倒序列出申请，可按状态过滤
    async fn list_transfer_requests(
        &self,
        status: Option<TransferStatus>,
    ) -> Result<Vec<TransferRequest>>;

    /// 保存申请，仅当库中状态仍为 `expected` 时生效，否则返回 `InvalidStateTransition`
    async fn save_transfer_request(
        &self,
        request: &TransferRequest,
        expected: TransferStatus,
    ) -> Result<()>;

    async fn active_requests_for_patient(&self, patient_id: &str) -> Result<Vec<TransferRequest>>;

    // ========== 审批记录 ==========

    /// 在同一事务中保存状态变更（带 `expected` 检查）并追加审批记录
    async fn record_decision(
        &self,
        request: &TransferRequest,
        expected: TransferStatus,
        approval: &NewApproval,
    ) -> Result<Approval>;

    async fn approvals_for_request(&self, request_id: &str) -> Result<Vec<Approval>>;

    // ========== 出科记录 ==========

    /// 在同一事务中完成申请（带 `expected` 检查）、写入出科记录并停用患者
    async fn complete_discharge(
        &self,
        request: &TransferRequest,
        expected: TransferStatus,
        record: &DischargeRecord,
    ) -> Result<()>;

    async fn list_discharges(&self) -> Result<Vec<DischargeRecord>>;

    // ========== 就绪跟踪 ==========

    async fn get_ready_state(&self, patient_id: &str) -> Result<Option<ReadyState>>;

    async fn put_ready_state(&self, state: &ReadyState) -> Result<()>;
}
