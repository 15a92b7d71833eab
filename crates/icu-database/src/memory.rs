//! 内存存储实现
//!
//! 数据库不可用时的降级存储，同时用于测试。语义与 PostgreSQL 实现保持一致。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use icu_core::{
    Approval, Department, DischargeRecord, IcuError, Patient, ReadyState, Result,
    TransferRequest, TransferStatus, User, UserRole, Vitals, VitalsRecord,
};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{NewApproval, NewPatient, NewUser, DEFAULT_DEPARTMENTS, DEFAULT_USERS};
use crate::store::{StoredPrediction, TransferStore};

#[derive(Debug, Default)]
struct MemoryState {
    departments: Vec<Department>,
    users: HashMap<String, User>,
    patients: HashMap<String, Patient>,
    vitals_history: Vec<VitalsRecord>,
    predictions: Vec<StoredPrediction>,
    // 插入顺序，保证同一时间戳下的排序稳定
    requests: Vec<TransferRequest>,
    approvals: Vec<Approval>,
    discharges: Vec<DischargeRecord>,
    ready_states: HashMap<String, ReadyState>,
}

impl MemoryState {
    /// 校验库中状态仍为 `expected`，返回申请位置
    fn guard_request(
        &self,
        request_id: &str,
        expected: TransferStatus,
        next: TransferStatus,
    ) -> Result<usize> {
        let index = self
            .requests
            .iter()
            .position(|r| r.request_id == request_id)
            .ok_or_else(|| IcuError::NotFound(format!("transfer request {}", request_id)))?;
        let current = self.requests[index].status;
        if current != expected {
            return Err(IcuError::InvalidStateTransition {
                from: current.to_string(),
                event: next.to_string(),
            });
        }
        Ok(index)
    }
}

/// 基于 `RwLock` 的内存存储
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建并写入默认科室和用户
    pub async fn seeded() -> Result<Self> {
        let store = Self::new();
        store.seed_defaults().await?;
        Ok(store)
    }
}

#[async_trait]
impl TransferStore for MemoryStore {
    async fn seed_defaults(&self) -> Result<()> {
        let mut state = self.state.write().await;

        for (name, capacity) in DEFAULT_DEPARTMENTS {
            if state.departments.iter().any(|d| d.name == *name) {
                continue;
            }
            let id = state.departments.len() as i64 + 1;
            state.departments.push(Department {
                id,
                name: name.to_string(),
                capacity: *capacity,
                current_occupancy: 0,
            });
        }

        for (username, role, department) in DEFAULT_USERS {
            if state.users.contains_key(*username) {
                continue;
            }
            let department_id = state
                .departments
                .iter()
                .find(|d| d.name == *department)
                .map(|d| d.id);
            state.users.insert(
                username.to_string(),
                User {
                    username: username.to_string(),
                    role: *role,
                    department_id,
                    is_active: true,
                    created_at: Utc::now(),
                },
            );
        }

        Ok(())
    }

    async fn list_departments(&self) -> Result<Vec<Department>> {
        let state = self.state.read().await;
        let mut departments = state.departments.clone();
        departments.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(departments)
    }

    async fn get_department(&self, id: i64) -> Result<Option<Department>> {
        let state = self.state.read().await;
        Ok(state.departments.iter().find(|d| d.id == id).cloned())
    }

    async fn find_department_by_name(&self, name: &str) -> Result<Option<Department>> {
        let state = self.state.read().await;
        Ok(state
            .departments
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name.trim()))
            .cloned())
    }

    async fn adjust_occupancy(&self, id: i64, delta: i32) -> Result<Department> {
        let mut state = self.state.write().await;
        let department = state
            .departments
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| IcuError::NotFound(format!("department {}", id)))?;
        department.current_occupancy =
            (department.current_occupancy + delta).clamp(0, department.capacity);
        Ok(department.clone())
    }

    async fn find_user(&self, username: &str) -> Result<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.get(username).cloned())
    }

    async fn create_user(&self, user: &NewUser) -> Result<User> {
        let mut state = self.state.write().await;
        if state.users.contains_key(&user.username) {
            return Err(IcuError::Conflict(format!("user {} already exists", user.username)));
        }
        let created = User {
            username: user.username.clone(),
            role: user.role,
            department_id: user.department_id,
            is_active: true,
            created_at: Utc::now(),
        };
        state.users.insert(created.username.clone(), created.clone());
        Ok(created)
    }

    async fn list_users_by_role(&self, role: UserRole) -> Result<Vec<User>> {
        let state = self.state.read().await;
        let mut users: Vec<User> = state
            .users
            .values()
            .filter(|u| u.role == role && u.is_active)
            .cloned()
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    async fn create_patient(&self, patient: &NewPatient) -> Result<Patient> {
        let mut state = self.state.write().await;
        if state.patients.contains_key(&patient.patient_id) {
            return Err(IcuError::Conflict(format!(
                "patient {} already exists",
                patient.patient_id
            )));
        }
        let now = Utc::now();
        let created = Patient {
            patient_id: patient.patient_id.clone(),
            name: patient.name.clone(),
            age: patient.age,
            bed: patient.bed.clone(),
            department_id: patient.department_id,
            is_active: true,
            vitals: patient.vitals.clone(),
            admission_date: now,
            last_updated: now,
        };
        state.patients.insert(created.patient_id.clone(), created.clone());
        Ok(created)
    }

    async fn get_patient(&self, patient_id: &str) -> Result<Option<Patient>> {
        let state = self.state.read().await;
        Ok(state.patients.get(patient_id).cloned())
    }

    async fn list_active_patients(&self) -> Result<Vec<Patient>> {
        let state = self.state.read().await;
        let mut patients: Vec<Patient> =
            state.patients.values().filter(|p| p.is_active).cloned().collect();
        patients.sort_by(|a, b| a.patient_id.cmp(&b.patient_id));
        Ok(patients)
    }

    async fn update_vitals(&self, patient_id: &str, vitals: &Vitals) -> Result<Patient> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let updated = {
            let patient = state
                .patients
                .get_mut(patient_id)
                .ok_or_else(|| IcuError::NotFound(format!("patient {}", patient_id)))?;
            patient.vitals = vitals.clone();
            patient.last_updated = now;
            patient.clone()
        };
        state.vitals_history.push(VitalsRecord {
            patient_id: patient_id.to_string(),
            vitals: vitals.clone(),
            recorded_at: now,
        });
        Ok(updated)
    }

    async fn vitals_history(&self, patient_id: &str, limit: i64) -> Result<Vec<VitalsRecord>> {
        let state = self.state.read().await;
        Ok(state
            .vitals_history
            .iter()
            .rev()
            .filter(|r| r.patient_id == patient_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn deactivate_patient(&self, patient_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let patient = state
            .patients
            .get_mut(patient_id)
            .ok_or_else(|| IcuError::NotFound(format!("patient {}", patient_id)))?;
        patient.is_active = false;
        patient.last_updated = Utc::now();
        Ok(())
    }

    async fn append_prediction(
        &self,
        patient_id: &str,
        payload: &str,
        generated_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.predictions.push(StoredPrediction {
            patient_id: patient_id.to_string(),
            payload: payload.to_string(),
            generated_at,
        });
        Ok(())
    }

    async fn latest_prediction(&self, patient_id: &str) -> Result<Option<StoredPrediction>> {
        let state = self.state.read().await;
        // max_by_key 在相等时返回最后一个元素，即最近插入的记录
        Ok(state
            .predictions
            .iter()
            .filter(|p| p.patient_id == patient_id)
            .max_by_key(|p| p.generated_at)
            .cloned())
    }

    async fn insert_transfer_request(&self, request: &TransferRequest, exclusive: bool) -> Result<()> {
        let mut state = self.state.write().await;
        if state.requests.iter().any(|r| r.request_id == request.request_id) {
            return Err(IcuError::Conflict(format!(
                "transfer request {} already exists",
                request.request_id
            )));
        }
        if exclusive {
            if let Some(existing) = state
                .requests
                .iter()
                .find(|r| r.patient_id == request.patient_id && r.status.is_active())
            {
                return Err(IcuError::Conflict(format!(
                    "patient {} already has active request {} ({})",
                    request.patient_id, existing.request_id, existing.status
                )));
            }
        }
        state.requests.push(request.clone());
        Ok(())
    }

    async fn get_transfer_request(&self, request_id: &str) -> Result<Option<TransferRequest>> {
        let state = self.state.read().await;
        Ok(state.requests.iter().find(|r| r.request_id == request_id).cloned())
    }

    async fn list_transfer_requests(
        &self,
        status: Option<TransferStatus>,
    ) -> Result<Vec<TransferRequest>> {
        let state = self.state.read().await;
        let mut requests: Vec<TransferRequest> = state
            .requests
            .iter()
            .rev()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(requests)
    }

    async fn save_transfer_request(
        &self,
        request: &TransferRequest,
        expected: TransferStatus,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let index = state.guard_request(&request.request_id, expected, request.status)?;
        state.requests[index] = request.clone();
        Ok(())
    }

    async fn active_requests_for_patient(&self, patient_id: &str) -> Result<Vec<TransferRequest>> {
        let state = self.state.read().await;
        Ok(state
            .requests
            .iter()
            .filter(|r| r.patient_id == patient_id && r.status.is_active())
            .cloned()
            .collect())
    }

    async fn record_decision(
        &self,
        request: &TransferRequest,
        expected: TransferStatus,
        approval: &NewApproval,
    ) -> Result<Approval> {
        let mut state = self.state.write().await;
        let index = state.guard_request(&request.request_id, expected, request.status)?;
        state.requests[index] = request.clone();

        let record = Approval {
            id: Uuid::new_v4(),
            request_id: approval.request_id.clone(),
            approver: approval.approver.clone(),
            approver_role: approval.approver_role,
            action: approval.action,
            comments: approval.comments.clone(),
            created_at: Utc::now(),
        };
        state.approvals.push(record.clone());
        Ok(record)
    }

    async fn approvals_for_request(&self, request_id: &str) -> Result<Vec<Approval>> {
        let state = self.state.read().await;
        Ok(state
            .approvals
            .iter()
            .filter(|a| a.request_id == request_id)
            .cloned()
            .collect())
    }

    async fn complete_discharge(
        &self,
        request: &TransferRequest,
        expected: TransferStatus,
        record: &DischargeRecord,
    ) -> Result<()> {
        let mut state = self.state.write().await;

        // 先完成全部检查再修改
        let index = state.guard_request(&request.request_id, expected, request.status)?;
        if state.discharges.iter().any(|d| d.request_id == record.request_id) {
            return Err(IcuError::Conflict(format!(
                "request {} already discharged",
                record.request_id
            )));
        }
        if !state.patients.contains_key(&record.patient_id) {
            return Err(IcuError::NotFound(format!("patient {}", record.patient_id)));
        }

        state.requests[index] = request.clone();
        state.discharges.push(record.clone());
        if let Some(patient) = state.patients.get_mut(&record.patient_id) {
            patient.is_active = false;
            patient.last_updated = Utc::now();
        }
        Ok(())
    }

    async fn list_discharges(&self) -> Result<Vec<DischargeRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<DischargeRecord> = state.discharges.iter().rev().cloned().collect();
        records.sort_by(|a, b| b.discharged_at.cmp(&a.discharged_at));
        Ok(records)
    }

    async fn get_ready_state(&self, patient_id: &str) -> Result<Option<ReadyState>> {
        let state = self.state.read().await;
        Ok(state.ready_states.get(patient_id).cloned())
    }

    async fn put_ready_state(&self, ready: &ReadyState) -> Result<()> {
        let mut state = self.state.write().await;
        state.ready_states.insert(ready.patient_id.clone(), ready.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_vitals() -> Vitals {
        Vitals {
            heart_rate: 88.0,
            spo2: 97.0,
            respiratory_rate: 16.0,
            systolic_bp: 120.0,
            lactate: 1.1,
            gcs: 15.0,
            on_ventilator: false,
            on_pressors: false,
            comorbidity_score: 1.0,
        }
    }

    fn sample_patient(id: &str) -> NewPatient {
        NewPatient {
            patient_id: id.to_string(),
            name: "Lucas Edwards".to_string(),
            age: 64,
            bed: None,
            department_id: Some(1),
            vitals: sample_vitals(),
        }
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let store = MemoryStore::seeded().await.unwrap();
        store.seed_defaults().await.unwrap();

        assert_eq!(store.list_departments().await.unwrap().len(), 6);
        assert_eq!(store.list_users_by_role(UserRole::Doctor).await.unwrap().len(), 2);

        let admin = store.find_user("admin_cardiac").await.unwrap().unwrap();
        let cardiac = store.find_department_by_name("cardiac unit").await.unwrap().unwrap();
        assert_eq!(admin.department_id, Some(cardiac.id));
    }

    #[tokio::test]
    async fn test_update_vitals_appends_history() {
        let store = MemoryStore::seeded().await.unwrap();
        store.create_patient(&sample_patient("ICU-040")).await.unwrap();

        let mut vitals = sample_vitals();
        vitals.heart_rate = 120.0;
        store.update_vitals("ICU-040", &vitals).await.unwrap();
        vitals.heart_rate = 101.0;
        let patient = store.update_vitals("ICU-040", &vitals).await.unwrap();

        assert_eq!(patient.vitals.heart_rate, 101.0);
        let history = store.vitals_history("ICU-040", 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].vitals.heart_rate, 101.0);
        assert_eq!(history[1].vitals.heart_rate, 120.0);
    }

    #[tokio::test]
    async fn test_duplicate_patient_is_conflict() {
        let store = MemoryStore::new();
        store.create_patient(&sample_patient("ICU-040")).await.unwrap();
        let result = store.create_patient(&sample_patient("ICU-040")).await;
        assert!(matches!(result, Err(IcuError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_deactivated_patient_is_hidden_from_listing() {
        let store = MemoryStore::new();
        store.create_patient(&sample_patient("ICU-040")).await.unwrap();
        store.create_patient(&sample_patient("ICU-041")).await.unwrap();
        store.deactivate_patient("ICU-040").await.unwrap();

        let active = store.list_active_patients().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].patient_id, "ICU-041");
        // 逻辑删除，记录仍可读取
        assert!(store.get_patient("ICU-040").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_latest_prediction_prefers_newest_timestamp() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.append_prediction("ICU-040", "new", now).await.unwrap();
        store
            .append_prediction("ICU-040", "old", now - Duration::minutes(5))
            .await
            .unwrap();
        store.append_prediction("ICU-040", "newest", now).await.unwrap();

        let latest = store.latest_prediction("ICU-040").await.unwrap().unwrap();
        assert_eq!(latest.payload, "newest");
        assert!(store.latest_prediction("ICU-999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_occupancy_is_clamped() {
        let store = MemoryStore::seeded().await.unwrap();
        let icu = store.find_department_by_name("ICU").await.unwrap().unwrap();

        let department = store.adjust_occupancy(icu.id, -3).await.unwrap();
        assert_eq!(department.current_occupancy, 0);

        let department = store.adjust_occupancy(icu.id, 500).await.unwrap();
        assert_eq!(department.current_occupancy, department.capacity);
        assert_eq!(department.available_beds(), 0);
    }

    fn pending_request(id: &str, patient_id: &str) -> TransferRequest {
        let now = Utc::now();
        TransferRequest {
            request_id: id.to_string(),
            patient_id: patient_id.to_string(),
            requesting_nurse: "nurse_sarah".to_string(),
            reviewing_doctor: None,
            approving_admin: None,
            target_department_id: None,
            status: TransferStatus::Pending,
            prediction: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn approval(request_id: &str, approver: &str) -> NewApproval {
        NewApproval {
            request_id: request_id.to_string(),
            approver: approver.to_string(),
            approver_role: UserRole::Doctor,
            action: icu_core::ApprovalAction::Approved,
            comments: None,
        }
    }

    #[tokio::test]
    async fn test_exclusive_insert_rejects_second_active_request() {
        let store = MemoryStore::new();
        store.insert_transfer_request(&pending_request("TR-1", "ICU-040"), true).await.unwrap();

        let second = store.insert_transfer_request(&pending_request("TR-2", "ICU-040"), true).await;
        assert!(matches!(second, Err(IcuError::Conflict(_))));

        // 非独占模式允许并行申请
        store.insert_transfer_request(&pending_request("TR-3", "ICU-040"), false).await.unwrap();
        assert_eq!(store.active_requests_for_patient("ICU-040").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_stale_decision_is_rejected_without_approval() {
        let store = MemoryStore::new();
        store.insert_transfer_request(&pending_request("TR-1", "ICU-040"), true).await.unwrap();

        let mut approved = pending_request("TR-1", "ICU-040");
        approved.status = TransferStatus::DoctorApproved;
        store
            .record_decision(&approved, TransferStatus::Pending, &approval("TR-1", "dr_smith"))
            .await
            .unwrap();

        // 基于过期的 pending 读取做出的第二个决定
        let mut rejected = pending_request("TR-1", "ICU-040");
        rejected.status = TransferStatus::DoctorRejected;
        let result = store
            .record_decision(&rejected, TransferStatus::Pending, &approval("TR-1", "dr_jones"))
            .await;
        assert!(matches!(result, Err(IcuError::InvalidStateTransition { .. })));

        let stored = store.get_transfer_request("TR-1").await.unwrap().unwrap();
        assert_eq!(stored.status, TransferStatus::DoctorApproved);
        assert_eq!(store.approvals_for_request("TR-1").await.unwrap().len(), 1);

        let stale_save = store.save_transfer_request(&rejected, TransferStatus::Pending).await;
        assert!(matches!(stale_save, Err(IcuError::InvalidStateTransition { .. })));
        let missing = store
            .save_transfer_request(&pending_request("TR-9", "ICU-040"), TransferStatus::Pending)
            .await;
        assert!(matches!(missing, Err(IcuError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_failed_discharge_changes_nothing() {
        let store = MemoryStore::new();
        store.create_patient(&sample_patient("ICU-040")).await.unwrap();
        let mut request = pending_request("TR-1", "ICU-040");
        request.status = TransferStatus::AdminApproved;
        store.insert_transfer_request(&request, true).await.unwrap();

        let mut completed = request.clone();
        completed.status = TransferStatus::Completed;
        let record = DischargeRecord {
            id: Uuid::new_v4(),
            request_id: "TR-1".to_string(),
            patient_id: "ICU-040".to_string(),
            patient_name: "Lucas Edwards".to_string(),
            destination_department_id: Some(2),
            requesting_nurse: "nurse_sarah".to_string(),
            reviewing_doctor: Some("dr_smith".to_string()),
            approving_admin: Some("admin_general".to_string()),
            discharged_by: "nurse_sarah".to_string(),
            notes: None,
            discharged_at: Utc::now(),
        };

        // 期望状态不符时不写入任何内容
        let result = store.complete_discharge(&completed, TransferStatus::Pending, &record).await;
        assert!(matches!(result, Err(IcuError::InvalidStateTransition { .. })));
        assert!(store.list_discharges().await.unwrap().is_empty());
        assert!(store.get_patient("ICU-040").await.unwrap().unwrap().is_active);

        store
            .complete_discharge(&completed, TransferStatus::AdminApproved, &record)
            .await
            .unwrap();
        assert_eq!(store.list_discharges().await.unwrap().len(), 1);
        assert!(!store.get_patient("ICU-040").await.unwrap().unwrap().is_active);
        let stored = store.get_transfer_request("TR-1").await.unwrap().unwrap();
        assert_eq!(stored.status, TransferStatus::Completed);
    }
}
