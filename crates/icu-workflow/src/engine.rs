//! 转科工作流引擎
//!
//! 协调状态机、身份解析、预测缓存、就绪跟踪和通知分发的核心引擎。
//! 所有持久状态都通过存储网关读写，引擎本身只持有外部ID。

use crate::{
    identity::IdentityResolver,
    readiness::ReadinessTracker,
    state_machine::{ApproverRole, Decision, TransferEvent, TransferStateMachine},
};
use chrono::Utc;
use icu_core::{
    utils::generate_request_id, Approval, ApprovalAction, DischargeRecord, IcuError, Prediction,
    Result, TransferRequest, TransferStatus, UserRole,
};
use icu_database::{NewApproval, TransferStore};
use icu_notify::{EventEnvelope, NotificationHub};
use icu_prediction::PredictionCache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// 同一患者已有活动申请时的处理策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveRequestPolicy {
    /// 拒绝新申请，返回 `Conflict`
    #[default]
    Reject,
    /// 允许多个并行申请
    Allow,
}

/// 护士提交的新申请
#[derive(Debug, Clone, Default)]
pub struct NewTransferRequest {
    pub patient_id: String,
    pub nurse_id: String,
    pub notes: Option<String>,
    /// 未提供时使用缓存中的最新预测
    pub prediction: Option<Prediction>,
}

/// 医生或管理员的审批输入
#[derive(Debug, Clone)]
pub struct DecisionInput {
    pub actor: String,
    pub decision: Decision,
    /// 科室ID或科室名称
    pub target_department: Option<String>,
    pub notes: Option<String>,
}

/// 通用更新
#[derive(Debug, Clone, Default)]
pub struct TransferUpdate {
    pub status: Option<TransferStatus>,
    pub target_department: Option<String>,
    pub notes: Option<String>,
    /// 状态变更时必填，作为审批人
    pub actor: Option<String>,
}

/// 转科工作流引擎
pub struct TransferWorkflow {
    store: Arc<dyn TransferStore>,
    state_machine: TransferStateMachine,
    identity: Arc<dyn IdentityResolver>,
    cache: Arc<PredictionCache>,
    readiness: Arc<ReadinessTracker>,
    hub: Arc<NotificationHub>,
    policy: ActiveRequestPolicy,
}

impl TransferWorkflow {
    pub fn new(
        store: Arc<dyn TransferStore>,
        identity: Arc<dyn IdentityResolver>,
        cache: Arc<PredictionCache>,
        readiness: Arc<ReadinessTracker>,
        hub: Arc<NotificationHub>,
        policy: ActiveRequestPolicy,
    ) -> Self {
        Self {
            store,
            state_machine: TransferStateMachine::new(),
            identity,
            cache,
            readiness,
            hub,
            policy,
        }
    }

    pub fn policy(&self) -> ActiveRequestPolicy {
        self.policy
    }

    /// 护士提交转科申请
    pub async fn create(&self, input: NewTransferRequest) -> Result<TransferRequest> {
        let patient = self
            .store
            .get_patient(&input.patient_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| IcuError::NotFound(format!("patient {}", input.patient_id)))?;

        let nurse = self.identity.resolve(&input.nurse_id, UserRole::Nurse).await?;

        let prediction = match input.prediction {
            Some(prediction) => Some(prediction),
            None => match self.cache.get(&patient.patient_id).await {
                Ok(cached) => cached,
                Err(e) => {
                    tracing::warn!("No prediction snapshot for {}: {}", patient.patient_id, e);
                    None
                }
            },
        };

        let now = Utc::now();
        let request = TransferRequest {
            request_id: generate_request_id(&patient.patient_id, now),
            patient_id: patient.patient_id.clone(),
            requesting_nurse: nurse.username,
            reviewing_doctor: None,
            approving_admin: None,
            target_department_id: None,
            status: TransferStatus::Pending,
            prediction,
            notes: non_empty(input.notes),
            created_at: now,
            updated_at: now,
        };
        // 活动申请检查与插入在存储内原子完成
        let exclusive = self.policy == ActiveRequestPolicy::Reject;
        self.store.insert_transfer_request(&request, exclusive).await?;

        // 有活动申请时不再显示为待转科
        if let Err(e) = self.readiness.clear(&patient.patient_id).await {
            tracing::error!("Failed to clear readiness for {}: {}", patient.patient_id, e);
        }

        tracing::info!(
            "Transfer request {} created for {} by {}",
            request.request_id,
            request.patient_id,
            request.requesting_nurse
        );
        self.publish(EventEnvelope::transfer_request_created(&request)).await;
        Ok(request)
    }

    /// 医生审批：pending → doctor_approved / doctor_rejected
    pub async fn doctor_decision(&self, request_id: &str, input: DecisionInput) -> Result<TransferRequest> {
        self.decide(request_id, ApproverRole::Doctor, input).await
    }

    /// 管理员审批：doctor_approved → admin_approved / admin_rejected
    pub async fn admin_decision(&self, request_id: &str, input: DecisionInput) -> Result<TransferRequest> {
        self.decide(request_id, ApproverRole::Admin, input).await
    }

    async fn decide(
        &self,
        request_id: &str,
        role: ApproverRole,
        input: DecisionInput,
    ) -> Result<TransferRequest> {
        let mut request = self.get(request_id).await?;

        let event = TransferEvent::for_decision(role, input.decision);
        let next = self.state_machine.transition(request.status, event)?;

        let actor = self.identity.resolve(&input.actor, role.user_role()).await?;

        let target = self
            .resolve_department(input.target_department.as_deref(), request.target_department_id)
            .await?;
        if input.decision == Decision::Approve && target.is_none() {
            return Err(IcuError::Validation(format!(
                "target department is required to approve {}",
                request_id
            )));
        }

        let previous = request.status;
        request.status = next;
        request.target_department_id = target;
        match role {
            ApproverRole::Doctor => request.reviewing_doctor = Some(actor.username.clone()),
            ApproverRole::Admin => request.approving_admin = Some(actor.username.clone()),
        }
        let notes = non_empty(input.notes);
        if notes.is_some() {
            request.notes = notes.clone();
        }
        request.updated_at = Utc::now();

        // 状态仍为读取时的值才落库，并发审批中只有一个成功
        self.store
            .record_decision(
                &request,
                previous,
                &NewApproval {
                    request_id: request.request_id.clone(),
                    approver: actor.username.clone(),
                    approver_role: actor.role,
                    action: match input.decision {
                        Decision::Approve => ApprovalAction::Approved,
                        Decision::Reject => ApprovalAction::Rejected,
                    },
                    comments: notes,
                },
            )
            .await?;

        tracing::info!(
            "Transfer request {} {} -> {} by {} {}",
            request.request_id,
            previous,
            next,
            actor.role,
            actor.username
        );
        self.publish(EventEnvelope::transfer_request_updated(&request)).await;
        Ok(request)
    }

    /// 通用更新：备注和科室直接修改，状态变更转交对应角色的审批函数
    pub async fn update(&self, request_id: &str, update: TransferUpdate) -> Result<TransferRequest> {
        let mut request = self.get(request_id).await?;

        if let Some(status) = update.status.filter(|s| *s != request.status) {
            let (role, decision) = TransferEvent::for_target_status(status).ok_or_else(|| {
                IcuError::InvalidStateTransition {
                    from: request.status.to_string(),
                    event: format!("set_{}", status),
                }
            })?;
            let actor = update.actor.ok_or_else(|| {
                IcuError::Validation(format!("{} id is required to set status {}", role.user_role(), status))
            })?;
            return self
                .decide(
                    request_id,
                    role,
                    DecisionInput {
                        actor,
                        decision,
                        target_department: update.target_department,
                        notes: update.notes,
                    },
                )
                .await;
        }

        request.target_department_id = self
            .resolve_department(update.target_department.as_deref(), request.target_department_id)
            .await?;
        if let Some(notes) = non_empty(update.notes) {
            request.notes = Some(notes);
        }
        request.updated_at = Utc::now();

        let current = request.status;
        self.store.save_transfer_request(&request, current).await?;
        tracing::info!("Transfer request {} updated", request.request_id);
        self.publish(EventEnvelope::transfer_request_updated(&request)).await;
        Ok(request)
    }

    /// 出科：仅对 admin_approved 的申请有效，生成唯一的出科记录
    pub async fn discharge(
        &self,
        request_id: &str,
        performed_by: &str,
        notes: Option<String>,
    ) -> Result<DischargeRecord> {
        let mut request = self.get(request_id).await?;
        let next = self.state_machine.transition(request.status, TransferEvent::Discharge)?;

        let nurse = self.identity.resolve(performed_by, UserRole::Nurse).await?;
        let patient = self
            .store
            .get_patient(&request.patient_id)
            .await?
            .ok_or_else(|| IcuError::NotFound(format!("patient {}", request.patient_id)))?;

        let now = Utc::now();
        let notes = non_empty(notes);
        let record = DischargeRecord {
            id: Uuid::new_v4(),
            request_id: request.request_id.clone(),
            patient_id: patient.patient_id.clone(),
            patient_name: patient.name.clone(),
            destination_department_id: request.target_department_id,
            requesting_nurse: request.requesting_nurse.clone(),
            reviewing_doctor: request.reviewing_doctor.clone(),
            approving_admin: request.approving_admin.clone(),
            discharged_by: nurse.username,
            notes: notes.clone(),
            discharged_at: now,
        };
        let previous = request.status;
        request.status = next;
        if notes.is_some() {
            request.notes = notes;
        }
        request.updated_at = now;
        // 申请完成、出科记录、患者停用在同一事务内
        self.store.complete_discharge(&request, previous, &record).await?;

        if let Some(destination) = record.destination_department_id {
            self.store.adjust_occupancy(destination, 1).await?;
        }
        if let Some(source) = patient.department_id.filter(|d| Some(*d) != record.destination_department_id) {
            self.store.adjust_occupancy(source, -1).await?;
        }

        if let Err(e) = self.readiness.clear(&patient.patient_id).await {
            tracing::error!("Failed to clear readiness for {}: {}", patient.patient_id, e);
        }
        self.cache.evict(&patient.patient_id).await;

        tracing::info!(
            "Patient {} discharged under {} by {}",
            record.patient_id,
            record.request_id,
            record.discharged_by
        );
        self.publish(EventEnvelope::transfer_request_updated(&request)).await;
        self.publish(EventEnvelope::patient_discharged(&record)).await;
        Ok(record)
    }

    pub async fn get(&self, request_id: &str) -> Result<TransferRequest> {
        self.store
            .get_transfer_request(request_id)
            .await?
            .ok_or_else(|| IcuError::NotFound(format!("transfer request {}", request_id)))
    }

    pub async fn list(&self, status: Option<TransferStatus>) -> Result<Vec<TransferRequest>> {
        self.store.list_transfer_requests(status).await
    }

    /// 审批记录，按时间顺序
    pub async fn approvals(&self, request_id: &str) -> Result<Vec<Approval>> {
        self.get(request_id).await?;
        self.store.approvals_for_request(request_id).await
    }

    pub async fn discharges(&self) -> Result<Vec<DischargeRecord>> {
        self.store.list_discharges().await
    }

    /// 解析目标科室：数字按ID，其他按名称；无法解析时保留原值
    async fn resolve_department(&self, input: Option<&str>, current: Option<i64>) -> Result<Option<i64>> {
        let value = match input.map(str::trim).filter(|v| !v.is_empty()) {
            Some(value) => value,
            None => return Ok(current),
        };

        let found = match value.parse::<i64>() {
            Ok(id) => self.store.get_department(id).await?,
            Err(_) => self.store.find_department_by_name(value).await?,
        };

        match found {
            Some(department) => Ok(Some(department.id)),
            None => {
                tracing::warn!("Department '{}' not found, keeping {:?}", value, current);
                Ok(current)
            }
        }
    }

    async fn publish(&self, envelope: Result<EventEnvelope>) {
        match envelope {
            Ok(envelope) => {
                self.hub.broadcast(&envelope).await;
            }
            Err(e) => tracing::error!("Failed to build notification: {}", e),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{DirectoryIdentityResolver, IdentityPolicy};
    use icu_core::{ReadinessLabel, Vitals};
    use icu_database::{MemoryStore, NewPatient};
    use icu_notify::ChannelSink;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Harness {
        store: Arc<MemoryStore>,
        workflow: TransferWorkflow,
        readiness: Arc<ReadinessTracker>,
        events: UnboundedReceiver<String>,
    }

    impl Harness {
        fn drain_events(&mut self) -> Vec<String> {
            let mut types = Vec::new();
            while let Ok(payload) = self.events.try_recv() {
                let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
                types.push(value["type"].as_str().unwrap().to_string());
            }
            types
        }
    }

    /// 解析前先让出执行权，使并发请求在读取与写入之间交错
    struct YieldingResolver(DirectoryIdentityResolver);

    #[async_trait::async_trait]
    impl IdentityResolver for YieldingResolver {
        async fn resolve(&self, username: &str, role: UserRole) -> Result<icu_core::User> {
            tokio::task::yield_now().await;
            self.0.resolve(username, role).await
        }
    }

    async fn harness(policy: ActiveRequestPolicy) -> Harness {
        harness_with(policy, false).await
    }

    async fn harness_with(policy: ActiveRequestPolicy, interleave: bool) -> Harness {
        let store = Arc::new(MemoryStore::seeded().await.unwrap());
        let icu = store.find_department_by_name("ICU").await.unwrap().unwrap();
        store
            .create_patient(&NewPatient {
                patient_id: "P-1".to_string(),
                name: "Charlotte Collins".to_string(),
                age: 67,
                bed: Some("Bed-P-1".to_string()),
                department_id: Some(icu.id),
                vitals: Vitals {
                    heart_rate: 84.0,
                    spo2: 97.0,
                    respiratory_rate: 16.0,
                    systolic_bp: 124.0,
                    lactate: 1.1,
                    gcs: 15.0,
                    on_ventilator: false,
                    on_pressors: false,
                    comorbidity_score: 2.0,
                },
            })
            .await
            .unwrap();
        store.adjust_occupancy(icu.id, 1).await.unwrap();

        let hub = Arc::new(NotificationHub::new());
        let (sink, events) = ChannelSink::pair();
        hub.subscribe(Arc::new(sink)).await;

        let readiness = Arc::new(ReadinessTracker::new(store.clone()));
        let directory = DirectoryIdentityResolver::new(store.clone(), IdentityPolicy::Strict);
        let identity: Arc<dyn IdentityResolver> = if interleave {
            Arc::new(YieldingResolver(directory))
        } else {
            Arc::new(directory)
        };
        let workflow = TransferWorkflow::new(
            store.clone(),
            identity,
            Arc::new(PredictionCache::new(store.clone())),
            readiness.clone(),
            hub,
            policy,
        );

        Harness { store, workflow, readiness, events }
    }

    fn create_input() -> NewTransferRequest {
        NewTransferRequest {
            patient_id: "P-1".to_string(),
            nurse_id: "nurse_sarah".to_string(),
            notes: Some("Stable for 24h".to_string()),
            prediction: None,
        }
    }

    fn approve(actor: &str, department: Option<&str>) -> DecisionInput {
        DecisionInput {
            actor: actor.to_string(),
            decision: Decision::Approve,
            target_department: department.map(str::to_string),
            notes: None,
        }
    }

    fn reject(actor: &str) -> DecisionInput {
        DecisionInput {
            actor: actor.to_string(),
            decision: Decision::Reject,
            target_department: None,
            notes: Some("Lactate trending up".to_string()),
        }
    }

    #[tokio::test]
    async fn test_full_transfer_lifecycle() {
        let mut h = harness(ActiveRequestPolicy::Reject).await;
        let ward = h.store.find_department_by_name("General Ward").await.unwrap().unwrap();

        let request = h.workflow.create(create_input()).await.unwrap();
        assert_eq!(request.status, TransferStatus::Pending);
        assert!(h.workflow.approvals(&request.request_id).await.unwrap().is_empty());

        let request = h
            .workflow
            .doctor_decision(&request.request_id, approve("dr_smith", Some("general ward")))
            .await
            .unwrap();
        assert_eq!(request.status, TransferStatus::DoctorApproved);
        assert_eq!(request.target_department_id, Some(ward.id));
        assert_eq!(request.reviewing_doctor.as_deref(), Some("dr_smith"));

        let request = h
            .workflow
            .admin_decision(&request.request_id, approve("admin_general", None))
            .await
            .unwrap();
        assert_eq!(request.status, TransferStatus::AdminApproved);

        let record = h
            .workflow
            .discharge(&request.request_id, "nurse_mike", Some("Transferred".to_string()))
            .await
            .unwrap();
        assert_eq!(record.request_id, request.request_id);
        assert_eq!(record.requesting_nurse, "nurse_sarah");
        assert_eq!(record.reviewing_doctor.as_deref(), Some("dr_smith"));
        assert_eq!(record.approving_admin.as_deref(), Some("admin_general"));
        assert_eq!(record.discharged_by, "nurse_mike");

        let stored = h.workflow.get(&request.request_id).await.unwrap();
        assert_eq!(stored.status, TransferStatus::Completed);
        assert_eq!(h.workflow.discharges().await.unwrap().len(), 1);

        let patient = h.store.get_patient("P-1").await.unwrap().unwrap();
        assert!(!patient.is_active);
        let ward = h.store.get_department(ward.id).await.unwrap().unwrap();
        assert_eq!(ward.current_occupancy, 1);

        let approvals = h.workflow.approvals(&request.request_id).await.unwrap();
        assert_eq!(approvals.len(), 2);
        assert_eq!(approvals[0].approver, "dr_smith");
        assert_eq!(approvals[0].approver_role, UserRole::Doctor);
        assert_eq!(approvals[1].approver, "admin_general");
        assert_eq!(approvals[1].approver_role, UserRole::Admin);

        assert_eq!(
            h.drain_events(),
            vec![
                "transfer_request_created",
                "transfer_request_updated",
                "transfer_request_updated",
                "transfer_request_updated",
                "patient_discharged",
            ]
        );
    }

    #[tokio::test]
    async fn test_doctor_reject_is_terminal() {
        let h = harness(ActiveRequestPolicy::Reject).await;
        let request = h.workflow.create(create_input()).await.unwrap();

        let request = h
            .workflow
            .doctor_decision(&request.request_id, reject("dr_jones"))
            .await
            .unwrap();
        assert_eq!(request.status, TransferStatus::DoctorRejected);

        let result = h
            .workflow
            .admin_decision(&request.request_id, approve("admin_general", Some("General Ward")))
            .await;
        assert!(matches!(result, Err(IcuError::InvalidStateTransition { .. })));

        let approvals = h.workflow.approvals(&request.request_id).await.unwrap();
        assert_eq!(approvals.len(), 1);
        assert_eq!(approvals[0].action, ApprovalAction::Rejected);
        assert_eq!(approvals[0].comments.as_deref(), Some("Lactate trending up"));
    }

    #[tokio::test]
    async fn test_doctor_approve_requires_department() {
        let h = harness(ActiveRequestPolicy::Reject).await;
        let request = h.workflow.create(create_input()).await.unwrap();

        let result = h.workflow.doctor_decision(&request.request_id, approve("dr_smith", None)).await;
        assert!(matches!(result, Err(IcuError::Validation(_))));

        // 无法解析的名称同样不能批准
        let result = h
            .workflow
            .doctor_decision(&request.request_id, approve("dr_smith", Some("Ward-Z")))
            .await;
        assert!(matches!(result, Err(IcuError::Validation(_))));

        let stored = h.workflow.get(&request.request_id).await.unwrap();
        assert_eq!(stored.status, TransferStatus::Pending);
        assert!(h.workflow.approvals(&request.request_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_actor_is_rejected_under_strict_identity() {
        let h = harness(ActiveRequestPolicy::Reject).await;
        let request = h.workflow.create(create_input()).await.unwrap();

        let result = h
            .workflow
            .doctor_decision(&request.request_id, approve("dr_unknown", Some("General Ward")))
            .await;
        assert!(matches!(result, Err(IcuError::NotFound(_))));

        // 护士不能以医生身份审批
        let result = h
            .workflow
            .doctor_decision(&request.request_id, approve("nurse_mike", Some("General Ward")))
            .await;
        assert!(matches!(result, Err(IcuError::Permission(_))));
    }

    #[tokio::test]
    async fn test_create_for_unknown_or_discharged_patient() {
        let h = harness(ActiveRequestPolicy::Reject).await;

        let mut input = create_input();
        input.patient_id = "P-404".to_string();
        assert!(matches!(h.workflow.create(input).await, Err(IcuError::NotFound(_))));

        h.store.deactivate_patient("P-1").await.unwrap();
        assert!(matches!(h.workflow.create(create_input()).await, Err(IcuError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_active_request_policy() {
        let h = harness(ActiveRequestPolicy::Reject).await;
        h.workflow.create(create_input()).await.unwrap();
        let second = h.workflow.create(create_input()).await;
        assert!(matches!(second, Err(IcuError::Conflict(_))));

        let h = harness(ActiveRequestPolicy::Allow).await;
        h.workflow.create(create_input()).await.unwrap();
        h.workflow.create(create_input()).await.unwrap();
        assert_eq!(h.store.active_requests_for_patient("P-1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_new_request_after_rejection_is_allowed() {
        let h = harness(ActiveRequestPolicy::Reject).await;
        let first = h.workflow.create(create_input()).await.unwrap();
        h.workflow.doctor_decision(&first.request_id, reject("dr_smith")).await.unwrap();

        let second = h.workflow.create(create_input()).await.unwrap();
        assert_ne!(first.request_id, second.request_id);
    }

    #[tokio::test]
    async fn test_discharge_requires_admin_approval() {
        let h = harness(ActiveRequestPolicy::Reject).await;
        let request = h.workflow.create(create_input()).await.unwrap();

        let result = h.workflow.discharge(&request.request_id, "nurse_mike", None).await;
        assert!(matches!(result, Err(IcuError::InvalidStateTransition { .. })));
        assert!(h.workflow.discharges().await.unwrap().is_empty());

        let result = h.workflow.discharge("TR-00000000-P-1-DEADBEEF", "nurse_mike", None).await;
        assert!(matches!(result, Err(IcuError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_second_discharge_is_rejected() {
        let h = harness(ActiveRequestPolicy::Reject).await;
        let request = h.workflow.create(create_input()).await.unwrap();
        h.workflow
            .doctor_decision(&request.request_id, approve("dr_smith", Some("Cardiac Unit")))
            .await
            .unwrap();
        h.workflow
            .admin_decision(&request.request_id, approve("admin_cardiac", None))
            .await
            .unwrap();
        h.workflow.discharge(&request.request_id, "nurse_mike", None).await.unwrap();

        let again = h.workflow.discharge(&request.request_id, "nurse_mike", None).await;
        assert!(matches!(again, Err(IcuError::InvalidStateTransition { .. })));
        assert_eq!(h.workflow.discharges().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_routes_status_through_role_decision() {
        let h = harness(ActiveRequestPolicy::Reject).await;
        let request = h.workflow.create(create_input()).await.unwrap();

        // 状态变更缺少审批人
        let result = h
            .workflow
            .update(
                &request.request_id,
                TransferUpdate {
                    status: Some("approved".parse().unwrap()),
                    target_department: Some("Step-Down Unit".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(IcuError::Validation(_))));

        let updated = h
            .workflow
            .update(
                &request.request_id,
                TransferUpdate {
                    status: Some("approved".parse().unwrap()),
                    target_department: Some("Step-Down Unit".to_string()),
                    actor: Some("dr_jones".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, TransferStatus::DoctorApproved);

        let approvals = h.workflow.approvals(&request.request_id).await.unwrap();
        assert_eq!(approvals.len(), 1);
        assert_eq!(approvals[0].approver_role, UserRole::Doctor);

        let result = h
            .workflow
            .update(
                &request.request_id,
                TransferUpdate {
                    status: Some(TransferStatus::Completed),
                    actor: Some("admin_general".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(IcuError::InvalidStateTransition { .. })));
    }

    #[tokio::test]
    async fn test_update_keeps_department_when_name_unresolved() {
        let h = harness(ActiveRequestPolicy::Reject).await;
        let request = h.workflow.create(create_input()).await.unwrap();
        let surgical = h.store.find_department_by_name("Surgical Ward").await.unwrap().unwrap();

        let updated = h
            .workflow
            .update(
                &request.request_id,
                TransferUpdate {
                    target_department: Some(surgical.id.to_string()),
                    notes: Some("Bed reserved".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.target_department_id, Some(surgical.id));
        assert_eq!(updated.notes.as_deref(), Some("Bed reserved"));

        let updated = h
            .workflow
            .update(
                &request.request_id,
                TransferUpdate {
                    target_department: Some("Nonexistent Ward".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.target_department_id, Some(surgical.id));
        assert_eq!(updated.status, TransferStatus::Pending);
        assert!(h.workflow.approvals(&request.request_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_snapshots_cached_prediction_and_clears_readiness() {
        let h = harness(ActiveRequestPolicy::Reject).await;
        h.readiness.set_ready("P-1", true, None).await.unwrap();

        let cache = PredictionCache::new(h.store.clone());
        let prediction = Prediction {
            label: ReadinessLabel::Ready,
            probability: 0.92,
            confidence: 0.92,
            explanation: "stable".to_string(),
            risk_factors: vec!["Stable clinical parameters".to_string()],
            model_version: "1.0.0".to_string(),
            timestamp: Utc::now(),
        };
        cache.put("P-1", &prediction).await.unwrap();

        let request = h.workflow.create(create_input()).await.unwrap();
        assert_eq!(request.prediction, Some(prediction));
        assert!(h.readiness.get_ready_since("P-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_decisions_record_one_approval() {
        let mut h = harness_with(ActiveRequestPolicy::Reject, true).await;
        let request = h.workflow.create(create_input()).await.unwrap();
        h.drain_events();

        let (approved, rejected) = tokio::join!(
            h.workflow
                .doctor_decision(&request.request_id, approve("dr_smith", Some("General Ward"))),
            h.workflow.doctor_decision(&request.request_id, reject("dr_jones")),
        );

        let results = [approved, rejected];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(IcuError::InvalidStateTransition { .. })))
                .count(),
            1
        );

        let winner = results.iter().find_map(|r| r.as_ref().ok()).unwrap();
        let stored = h.workflow.get(&request.request_id).await.unwrap();
        assert_eq!(stored.status, winner.status);

        let approvals = h.workflow.approvals(&request.request_id).await.unwrap();
        assert_eq!(approvals.len(), 1);
        assert_eq!(Some(approvals[0].approver.clone()), winner.reviewing_doctor);
        assert_eq!(h.drain_events(), vec!["transfer_request_updated"]);
    }

    #[tokio::test]
    async fn test_concurrent_creates_leave_one_active_request() {
        let h = harness_with(ActiveRequestPolicy::Reject, true).await;

        let mut second = create_input();
        second.nurse_id = "nurse_mike".to_string();
        let (a, b) = tokio::join!(h.workflow.create(create_input()), h.workflow.create(second));

        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results.iter().filter(|r| matches!(r, Err(IcuError::Conflict(_)))).count(),
            1
        );
        assert_eq!(h.store.active_requests_for_patient("P-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_admin_reject_is_terminal() {
        let h = harness(ActiveRequestPolicy::Reject).await;
        let request = h.workflow.create(create_input()).await.unwrap();
        h.workflow
            .doctor_decision(&request.request_id, approve("dr_smith", Some("General Ward")))
            .await
            .unwrap();

        let request = h
            .workflow
            .admin_decision(&request.request_id, reject("admin_general"))
            .await
            .unwrap();
        assert_eq!(request.status, TransferStatus::AdminRejected);
        assert_eq!(request.approving_admin.as_deref(), Some("admin_general"));

        let approvals = h.workflow.approvals(&request.request_id).await.unwrap();
        assert_eq!(approvals.len(), 2);
        assert_eq!(approvals[1].approver, "admin_general");
        assert_eq!(approvals[1].approver_role, UserRole::Admin);
        assert_eq!(approvals[1].action, ApprovalAction::Rejected);

        let result = h.workflow.discharge(&request.request_id, "nurse_mike", None).await;
        assert!(matches!(result, Err(IcuError::InvalidStateTransition { .. })));
        assert!(h.workflow.discharges().await.unwrap().is_empty());
        assert!(h.store.get_patient("P-1").await.unwrap().unwrap().is_active);

        // 管理员拒绝后可以重新申请
        h.workflow.create(create_input()).await.unwrap();
    }
}
