//! HTTP处理器

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use icu_core::{
    utils::default_bed_label, Department, IcuError, Patient, Prediction, TransferStatus, UserRole,
    Vitals,
};
use icu_database::{NewPatient, TransferStore};
use icu_prediction::{FeatureVector, MODEL_VERSION};
use icu_workflow::{Decision, DecisionInput, NewTransferRequest, TransferUpdate};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// 新患者默认收入的科室
const DEFAULT_DEPARTMENT: &str = "ICU";

/// 科室引用：数字ID或科室名称
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DepartmentRef {
    Id(i64),
    Name(String),
}

impl DepartmentRef {
    fn as_key(&self) -> String {
        match self {
            DepartmentRef::Id(id) => id.to_string(),
            DepartmentRef::Name(name) => name.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTransferBody {
    #[serde(default)]
    pub patient_id: String,
    #[serde(default)]
    pub nurse_id: String,
    pub notes: Option<String>,
    pub ml_prediction: Option<Prediction>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DecisionBody {
    pub doctor_id: Option<String>,
    pub admin_id: Option<String>,
    pub target_department: Option<DepartmentRef>,
    #[serde(alias = "comments")]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTransferBody {
    pub status: Option<String>,
    pub target_department: Option<DepartmentRef>,
    pub notes: Option<String>,
    #[serde(alias = "doctor_id", alias = "admin_id")]
    pub actor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DischargeBody {
    #[serde(alias = "performed_by")]
    pub nurse_id: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddPatientBody {
    #[serde(alias = "patient_id")]
    pub id: String,
    pub name: String,
    pub age: i32,
    pub bed: Option<String>,
    pub department: Option<DepartmentRef>,
    pub vitals: Vitals,
}

#[derive(Debug, Deserialize)]
pub struct UpdateVitalsBody {
    pub patient_id: String,
    pub vitals: Vitals,
}

/// 健康检查处理器
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "model_loaded": true,
        "storage": state.backend,
        "subscribers": state.hub.subscriber_count().await,
        "timestamp": Utc::now().to_rfc3339(),
        "version": MODEL_VERSION,
    }))
}

pub async fn model_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.predictions.model_info())
}

/// 对任意特征向量做一次预测，不写缓存
pub async fn predict(
    State(state): State<AppState>,
    Json(features): Json<FeatureVector>,
) -> ApiResult<Json<Prediction>> {
    Ok(Json(state.predictions.predict(&features)?))
}

/// 前端使用的患者视图，置信度以百分比表示
fn patient_view(
    patient: &Patient,
    department: Option<&str>,
    prediction: &Prediction,
    ready_since: Option<DateTime<Utc>>,
) -> Value {
    json!({
        "id": patient.patient_id,
        "name": patient.name,
        "age": patient.age,
        "department": department,
        "bed": patient.bed.clone().unwrap_or_else(|| default_bed_label(&patient.patient_id)),
        "vitals": patient.vitals,
        "onVentilator": patient.vitals.on_ventilator,
        "onPressors": patient.vitals.on_pressors,
        "comorbidityScore": patient.vitals.comorbidity_score,
        "prediction": {
            "transferReady": prediction.label.is_ready(),
            "confidence": (prediction.confidence * 100.0).round(),
            "reasoning": prediction.explanation,
            "riskFactors": prediction.risk_factors,
            "timestamp": prediction.timestamp,
        },
        "readySince": ready_since,
        "lastUpdated": patient.last_updated,
    })
}

async fn department_names(store: &dyn TransferStore) -> ApiResult<HashMap<i64, String>> {
    Ok(store
        .list_departments()
        .await?
        .into_iter()
        .map(|d| (d.id, d.name))
        .collect())
}

async fn ready_since_or_none(state: &AppState, patient_id: &str) -> Option<DateTime<Utc>> {
    match state.readiness.get_ready_since(patient_id).await {
        Ok(since) => since,
        Err(e) => {
            warn!("Failed to read readiness for {}: {}", patient_id, e);
            None
        }
    }
}

async fn active_patient(state: &AppState, patient_id: &str) -> ApiResult<Patient> {
    state
        .store
        .get_patient(patient_id)
        .await?
        .filter(|p| p.is_active)
        .ok_or_else(|| ApiError(IcuError::NotFound(format!("patient {}", patient_id))))
}

/// 在院患者列表，附带缓存预测和就绪开始时间
pub async fn list_patients(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let patients = state.store.list_active_patients().await?;
    let departments = department_names(state.store.as_ref()).await?;

    let mut views = Vec::with_capacity(patients.len());
    for patient in &patients {
        let prediction = state.cache.get_or_refresh(patient, &state.predictions).await;
        let ready_since = ready_since_or_none(&state, &patient.patient_id).await;
        let department = patient
            .department_id
            .and_then(|id| departments.get(&id))
            .map(String::as_str);
        views.push(patient_view(patient, department, &prediction, ready_since));
    }

    Ok(Json(Value::Array(views)))
}

pub async fn patient_vitals(
    State(state): State<AppState>,
    Path(patient_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let patient = active_patient(&state, &patient_id).await?;
    Ok(Json(json!({
        "patient_id": patient.patient_id,
        "vitals": patient.vitals,
        "timestamp": patient.last_updated,
    })))
}

pub async fn vitals_history(
    State(state): State<AppState>,
    Path(patient_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<impl IntoResponse> {
    if state.store.get_patient(&patient_id).await?.is_none() {
        return Err(ApiError(IcuError::NotFound(format!("patient {}", patient_id))));
    }
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    Ok(Json(state.store.vitals_history(&patient_id, limit).await?))
}

/// 患者的当前预测：命中缓存直接返回，否则重新推理
pub async fn patient_prediction(
    State(state): State<AppState>,
    Path(patient_id): Path<String>,
) -> ApiResult<Json<Prediction>> {
    let patient = active_patient(&state, &patient_id).await?;
    Ok(Json(state.cache.get_or_refresh(&patient, &state.predictions).await))
}

async fn resolve_department(
    store: &dyn TransferStore,
    reference: &DepartmentRef,
) -> ApiResult<Option<Department>> {
    let department = match reference {
        DepartmentRef::Id(id) => store.get_department(*id).await?,
        DepartmentRef::Name(name) => match name.trim().parse::<i64>() {
            Ok(id) => store.get_department(id).await?,
            Err(_) => store.find_department_by_name(name.trim()).await?,
        },
    };
    Ok(department)
}

/// 新患者入科：写入患者，占用一张床位，立即评估
pub async fn add_patient(
    State(state): State<AppState>,
    Json(body): Json<AddPatientBody>,
) -> ApiResult<impl IntoResponse> {
    let patient_id = body.id.trim().to_string();
    if patient_id.is_empty() || body.name.trim().is_empty() {
        return Err(ApiError(IcuError::Validation(
            "patient id and name are required".to_string(),
        )));
    }
    if !(0..=130).contains(&body.age) {
        return Err(ApiError(IcuError::Validation(format!("invalid age {}", body.age))));
    }

    let department = match &body.department {
        Some(reference) => Some(
            resolve_department(state.store.as_ref(), reference)
                .await?
                .ok_or_else(|| {
                    ApiError(IcuError::Validation(format!(
                        "unknown department '{}'",
                        reference.as_key()
                    )))
                })?,
        ),
        None => state.store.find_department_by_name(DEFAULT_DEPARTMENT).await?,
    };

    let patient = state
        .store
        .create_patient(&NewPatient {
            bed: Some(body.bed.unwrap_or_else(|| default_bed_label(&patient_id))),
            patient_id,
            name: body.name.trim().to_string(),
            age: body.age,
            department_id: department.as_ref().map(|d| d.id),
            vitals: body.vitals,
        })
        .await?;
    if let Some(department) = &department {
        state.store.adjust_occupancy(department.id, 1).await?;
    }
    info!("Patient {} admitted", patient.patient_id);

    let assessment = state.vitals.reassess(patient).await?;
    let view = patient_view(
        &assessment.patient,
        department.as_ref().map(|d| d.name.as_str()),
        &assessment.prediction,
        assessment.ready_since,
    );
    Ok((StatusCode::CREATED, Json(view)))
}

/// 手动录入生命体征
pub async fn update_vitals(
    State(state): State<AppState>,
    Json(body): Json<UpdateVitalsBody>,
) -> ApiResult<Json<Value>> {
    let assessment = state.vitals.record(&body.patient_id, &body.vitals).await?;
    if let Some(simulator) = &state.simulator {
        simulator.rebase(&body.patient_id, &body.vitals).await;
    }
    info!("Vitals updated for {}", body.patient_id);

    Ok(Json(json!({
        "status": "updated",
        "patient_id": assessment.patient.patient_id,
        "vitals": assessment.patient.vitals,
        "prediction": assessment.prediction,
        "ready_since": assessment.ready_since,
    })))
}

pub async fn discharged_patients(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.workflow.discharges().await?))
}

/// 护士提交转科申请
pub async fn create_transfer_request(
    State(state): State<AppState>,
    Json(body): Json<CreateTransferBody>,
) -> ApiResult<impl IntoResponse> {
    if body.patient_id.trim().is_empty() {
        return Err(ApiError(IcuError::Validation("patient_id is required".to_string())));
    }

    let request = state
        .workflow
        .create(NewTransferRequest {
            patient_id: body.patient_id.trim().to_string(),
            nurse_id: body.nurse_id,
            notes: body.notes,
            prediction: body.ml_prediction,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn list_transfer_requests(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<impl IntoResponse> {
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(str::parse::<TransferStatus>)
        .transpose()?;
    Ok(Json(state.workflow.list(status).await?))
}

pub async fn get_transfer_request(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.workflow.get(&request_id).await?))
}

/// 通用更新：状态变更按审批规则路由，其余字段直接修改
pub async fn update_transfer_request(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    Json(body): Json<UpdateTransferBody>,
) -> ApiResult<impl IntoResponse> {
    let status = body
        .status
        .as_deref()
        .map(str::parse::<TransferStatus>)
        .transpose()?;

    let request = state
        .workflow
        .update(
            &request_id,
            TransferUpdate {
                status,
                target_department: body.target_department.as_ref().map(DepartmentRef::as_key),
                notes: body.notes,
                actor: body.actor,
            },
        )
        .await?;
    Ok(Json(request))
}

pub async fn request_approvals(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.workflow.approvals(&request_id).await?))
}

fn decision_input(
    actor: Option<String>,
    field: &str,
    decision: Decision,
    body: DecisionBody,
) -> ApiResult<DecisionInput> {
    let actor = actor
        .filter(|a| !a.trim().is_empty())
        .ok_or_else(|| ApiError(IcuError::Validation(format!("{} is required", field))))?;
    Ok(DecisionInput {
        actor,
        decision,
        target_department: body.target_department.as_ref().map(DepartmentRef::as_key),
        notes: body.notes,
    })
}

async fn doctor_decision(
    state: AppState,
    request_id: String,
    decision: Decision,
    body: DecisionBody,
) -> ApiResult<impl IntoResponse> {
    let input = decision_input(body.doctor_id.clone(), "doctor_id", decision, body)?;
    Ok(Json(state.workflow.doctor_decision(&request_id, input).await?))
}

async fn admin_decision(
    state: AppState,
    request_id: String,
    decision: Decision,
    body: DecisionBody,
) -> ApiResult<impl IntoResponse> {
    let input = decision_input(body.admin_id.clone(), "admin_id", decision, body)?;
    Ok(Json(state.workflow.admin_decision(&request_id, input).await?))
}

pub async fn doctor_approve(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    Json(body): Json<DecisionBody>,
) -> ApiResult<impl IntoResponse> {
    doctor_decision(state, request_id, Decision::Approve, body).await
}

pub async fn doctor_reject(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    Json(body): Json<DecisionBody>,
) -> ApiResult<impl IntoResponse> {
    doctor_decision(state, request_id, Decision::Reject, body).await
}

pub async fn admin_approve(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    Json(body): Json<DecisionBody>,
) -> ApiResult<impl IntoResponse> {
    admin_decision(state, request_id, Decision::Approve, body).await
}

pub async fn admin_reject(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    Json(body): Json<DecisionBody>,
) -> ApiResult<impl IntoResponse> {
    admin_decision(state, request_id, Decision::Reject, body).await
}

/// 出科，仅对管理员已批准的申请有效
pub async fn discharge(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    Json(body): Json<DischargeBody>,
) -> ApiResult<impl IntoResponse> {
    let nurse = body
        .nurse_id
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| ApiError(IcuError::Validation("nurse_id is required".to_string())))?;
    let record = state.workflow.discharge(&request_id, &nurse, body.notes).await?;
    Ok(Json(record))
}

pub async fn list_departments(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let departments = state.store.list_departments().await?;
    Ok(Json(Value::Array(
        departments
            .iter()
            .map(|d| {
                json!({
                    "id": d.id,
                    "name": d.name,
                    "capacity": d.capacity,
                    "current_occupancy": d.current_occupancy,
                    "available_beds": d.available_beds(),
                })
            })
            .collect(),
    )))
}

pub async fn users_by_role(
    State(state): State<AppState>,
    Path(role): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let role: UserRole = role.parse()?;
    Ok(Json(state.store.list_users_by_role(role).await?))
}
