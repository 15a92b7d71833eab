//! 数据库查询操作

use crate::connection::DatabasePool;
use crate::models::*;
use crate::store::{StoredPrediction, TransferStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use icu_core::{
    Approval, Department, DischargeRecord, IcuError, Patient, ReadyState, Result,
    TransferRequest, TransferStatus, User, UserRole, Vitals, VitalsRecord,
};
use uuid::Uuid;

const PATIENT_SELECT: &str = r#"
    SELECT p.patient_id, p.name, p.age, p.bed_number, p.department_id, p.is_active,
           p.admission_date, v.heart_rate, v.spo2, v.respiratory_rate, v.systolic_bp,
           v.lactate, v.gcs, v.on_ventilator, v.on_pressors, v.comorbidity_score,
           v.recorded_at
    FROM patients p
    JOIN patient_vitals v ON v.patient_id = p.patient_id
"#;

/// 唯一约束冲突转换为 `Conflict`，其余错误转换为数据库错误
fn conflict_or_database(err: sqlx::Error, what: String) -> IcuError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => IcuError::Conflict(what),
        _ => IcuError::Database(err.to_string()),
    }
}

/// 仅当库中状态仍为 `expected` 时更新申请；未命中时区分不存在与状态已变
async fn update_request_if(
    conn: &mut PgConnection,
    request: &TransferRequest,
    expected: TransferStatus,
) -> Result<()> {
    let snapshot = request.prediction.as_ref().map(serde_json::to_string).transpose()?;

    let result = sqlx::query(r#"
        UPDATE transfer_requests SET
            reviewing_doctor = $2, approving_admin = $3, target_department_id = $4,
            current_status = $5, ml_prediction = $6, notes = $7, updated_at = $8
        WHERE request_id = $1 AND current_status = $9
    "#)
    .bind(&request.request_id)
    .bind(&request.reviewing_doctor)
    .bind(&request.approving_admin)
    .bind(request.target_department_id)
    .bind(request.status.as_str())
    .bind(snapshot)
    .bind(&request.notes)
    .bind(request.updated_at)
    .bind(expected.as_str())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() > 0 {
        return Ok(());
    }

    let current: Option<String> =
        sqlx::query_scalar("SELECT current_status FROM transfer_requests WHERE request_id = $1")
            .bind(&request.request_id)
            .fetch_optional(&mut *conn)
            .await?;

    match current {
        None => Err(IcuError::NotFound(format!("transfer request {}", request.request_id))),
        Some(from) => Err(IcuError::InvalidStateTransition {
            from,
            event: request.status.to_string(),
        }),
    }
}

/// PostgreSQL 持久化网关
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DatabasePool,
}

impl PgStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// 创建数据库表
    pub async fn create_tables(&self) -> Result<()> {
        let pool = self.pool.pool();

        let statements = [
            // 科室表
            r#"
            CREATE TABLE IF NOT EXISTS departments (
                id BIGSERIAL PRIMARY KEY,
                name TEXT UNIQUE NOT NULL,
                capacity INTEGER NOT NULL DEFAULT 50,
                current_occupancy INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )
            "#,
            // 用户表
            r#"
            CREATE TABLE IF NOT EXISTS users (
                username TEXT PRIMARY KEY,
                role TEXT NOT NULL CHECK (role IN ('nurse', 'doctor', 'admin')),
                department_id BIGINT REFERENCES departments(id),
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
            "#,
            // 患者表
            r#"
            CREATE TABLE IF NOT EXISTS patients (
                patient_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                age INTEGER NOT NULL,
                bed_number TEXT,
                department_id BIGINT REFERENCES departments(id),
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                admission_date TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
            "#,
            // 当前生命体征表
            r#"
            CREATE TABLE IF NOT EXISTS patient_vitals (
                patient_id TEXT PRIMARY KEY REFERENCES patients(patient_id),
                heart_rate DOUBLE PRECISION NOT NULL,
                spo2 DOUBLE PRECISION NOT NULL,
                respiratory_rate DOUBLE PRECISION NOT NULL,
                systolic_bp DOUBLE PRECISION NOT NULL,
                lactate DOUBLE PRECISION NOT NULL,
                gcs DOUBLE PRECISION NOT NULL,
                on_ventilator BOOLEAN NOT NULL DEFAULT FALSE,
                on_pressors BOOLEAN NOT NULL DEFAULT FALSE,
                comorbidity_score DOUBLE PRECISION NOT NULL DEFAULT 0,
                recorded_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
            "#,
            // 生命体征历史表（只追加）
            r#"
            CREATE TABLE IF NOT EXISTS patient_vitals_history (
                id BIGSERIAL PRIMARY KEY,
                patient_id TEXT NOT NULL REFERENCES patients(patient_id),
                heart_rate DOUBLE PRECISION NOT NULL,
                spo2 DOUBLE PRECISION NOT NULL,
                respiratory_rate DOUBLE PRECISION NOT NULL,
                systolic_bp DOUBLE PRECISION NOT NULL,
                lactate DOUBLE PRECISION NOT NULL,
                gcs DOUBLE PRECISION NOT NULL,
                on_ventilator BOOLEAN NOT NULL DEFAULT FALSE,
                on_pressors BOOLEAN NOT NULL DEFAULT FALSE,
                comorbidity_score DOUBLE PRECISION NOT NULL DEFAULT 0,
                recorded_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
            "#,
            // 预测日志表（只追加）
            r#"
            CREATE TABLE IF NOT EXISTS predictions (
                id BIGSERIAL PRIMARY KEY,
                patient_id TEXT NOT NULL REFERENCES patients(patient_id),
                payload TEXT NOT NULL,
                generated_at TIMESTAMP WITH TIME ZONE NOT NULL
            )
            "#,
            // 转科申请表
            r#"
            CREATE TABLE IF NOT EXISTS transfer_requests (
                request_id TEXT PRIMARY KEY,
                patient_id TEXT NOT NULL REFERENCES patients(patient_id),
                requesting_nurse TEXT NOT NULL REFERENCES users(username),
                reviewing_doctor TEXT REFERENCES users(username),
                approving_admin TEXT REFERENCES users(username),
                target_department_id BIGINT REFERENCES departments(id),
                current_status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (current_status IN ('pending', 'doctor_approved', 'doctor_rejected',
                                              'admin_approved', 'admin_rejected', 'completed')),
                ml_prediction TEXT,
                notes TEXT,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL,
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL
            )
            "#,
            // 审批审计表（只追加）
            r#"
            CREATE TABLE IF NOT EXISTS transfer_approvals (
                id UUID PRIMARY KEY,
                request_id TEXT NOT NULL REFERENCES transfer_requests(request_id),
                approver TEXT NOT NULL REFERENCES users(username),
                approver_role TEXT NOT NULL,
                action TEXT NOT NULL CHECK (action IN ('approved', 'rejected')),
                comments TEXT,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
            "#,
            // 出科记录表
            r#"
            CREATE TABLE IF NOT EXISTS discharge_records (
                id UUID PRIMARY KEY,
                request_id TEXT UNIQUE NOT NULL REFERENCES transfer_requests(request_id),
                patient_id TEXT NOT NULL REFERENCES patients(patient_id),
                patient_name TEXT NOT NULL,
                destination_department_id BIGINT REFERENCES departments(id),
                requesting_nurse TEXT NOT NULL,
                reviewing_doctor TEXT,
                approving_admin TEXT,
                discharged_by TEXT NOT NULL,
                notes TEXT,
                discharged_at TIMESTAMP WITH TIME ZONE NOT NULL
            )
            "#,
            // 就绪跟踪表
            r#"
            CREATE TABLE IF NOT EXISTS patient_ready_states (
                patient_id TEXT PRIMARY KEY REFERENCES patients(patient_id),
                currently_ready BOOLEAN NOT NULL DEFAULT FALSE,
                ready_since TIMESTAMP WITH TIME ZONE,
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
            "#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(pool)
                .await
                .map_err(|e| IcuError::Database(e.to_string()))?;
        }

        // 创建索引以优化查询性能
        self.create_indexes().await?;

        tracing::info!("Database tables created successfully");
        Ok(())
    }

    /// 创建数据库索引
    async fn create_indexes(&self) -> Result<()> {
        let pool = self.pool.pool();

        let indexes = vec![
            "CREATE INDEX IF NOT EXISTS idx_vitals_history_patient ON patient_vitals_history(patient_id, recorded_at)",
            "CREATE INDEX IF NOT EXISTS idx_predictions_patient ON predictions(patient_id, generated_at)",
            "CREATE INDEX IF NOT EXISTS idx_transfer_requests_patient ON transfer_requests(patient_id)",
            "CREATE INDEX IF NOT EXISTS idx_transfer_requests_status ON transfer_requests(current_status)",
            "CREATE INDEX IF NOT EXISTS idx_transfer_approvals_request ON transfer_approvals(request_id)",
        ];

        for index_sql in indexes {
            sqlx::query(index_sql)
                .execute(pool)
                .await
                .map_err(|e| IcuError::Database(e.to_string()))?;
        }

        tracing::info!("Database indexes created successfully");
        Ok(())
    }
}

#[async_trait]
impl TransferStore for PgStore {
    async fn seed_defaults(&self) -> Result<()> {
        let pool = self.pool.pool();

        for (name, capacity) in DEFAULT_DEPARTMENTS {
            sqlx::query(
                "INSERT INTO departments (name, capacity, current_occupancy) VALUES ($1, $2, 0) ON CONFLICT (name) DO NOTHING",
            )
            .bind(*name)
            .bind(*capacity)
            .execute(pool)
            .await?;
        }

        for (username, role, department) in DEFAULT_USERS {
            sqlx::query(r#"
                INSERT INTO users (username, role, department_id)
                SELECT $1, $2, id FROM departments WHERE name = $3
                ON CONFLICT (username) DO NOTHING
            "#)
            .bind(*username)
            .bind(role.as_str())
            .bind(*department)
            .execute(pool)
            .await?;
        }

        Ok(())
    }

    // ========== 科室相关操作 ==========

    async fn list_departments(&self) -> Result<Vec<Department>> {
        let rows = sqlx::query_as::<_, DbDepartment>(
            "SELECT id, name, capacity, current_occupancy FROM departments ORDER BY name",
        )
        .fetch_all(self.pool.pool())
        .await?;

        Ok(rows.into_iter().map(Department::from).collect())
    }

    async fn get_department(&self, id: i64) -> Result<Option<Department>> {
        let row = sqlx::query_as::<_, DbDepartment>(
            "SELECT id, name, capacity, current_occupancy FROM departments WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await?;

        Ok(row.map(Department::from))
    }

    async fn find_department_by_name(&self, name: &str) -> Result<Option<Department>> {
        let row = sqlx::query_as::<_, DbDepartment>(
            "SELECT id, name, capacity, current_occupancy FROM departments WHERE LOWER(name) = LOWER($1)",
        )
        .bind(name.trim())
        .fetch_optional(self.pool.pool())
        .await?;

        Ok(row.map(Department::from))
    }

    async fn adjust_occupancy(&self, id: i64, delta: i32) -> Result<Department> {
        let row = sqlx::query_as::<_, DbDepartment>(r#"
            UPDATE departments
            SET current_occupancy = LEAST(GREATEST(current_occupancy + $1, 0), capacity)
            WHERE id = $2
            RETURNING id, name, capacity, current_occupancy
        "#)
        .bind(delta)
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await?;

        row.map(Department::from)
            .ok_or_else(|| IcuError::NotFound(format!("department {}", id)))
    }

    // ========== 用户相关操作 ==========

    async fn find_user(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, DbUser>(
            "SELECT username, role, department_id, is_active, created_at FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(self.pool.pool())
        .await?;

        row.map(User::try_from).transpose()
    }

    async fn create_user(&self, user: &NewUser) -> Result<User> {
        let row = sqlx::query_as::<_, DbUser>(r#"
            INSERT INTO users (username, role, department_id)
            VALUES ($1, $2, $3)
            RETURNING username, role, department_id, is_active, created_at
        "#)
        .bind(&user.username)
        .bind(user.role.as_str())
        .bind(user.department_id)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| conflict_or_database(e, format!("user {} already exists", user.username)))?;

        User::try_from(row)
    }

    async fn list_users_by_role(&self, role: UserRole) -> Result<Vec<User>> {
        let rows = sqlx::query_as::<_, DbUser>(r#"
            SELECT username, role, department_id, is_active, created_at
            FROM users
            WHERE role = $1 AND is_active = TRUE
            ORDER BY username
        "#)
        .bind(role.as_str())
        .fetch_all(self.pool.pool())
        .await?;

        rows.into_iter().map(User::try_from).collect()
    }

    // ========== 患者相关操作 ==========

    async fn create_patient(&self, patient: &NewPatient) -> Result<Patient> {
        let mut tx = self.pool.pool().begin().await?;

        sqlx::query(r#"
            INSERT INTO patients (patient_id, name, age, bed_number, department_id)
            VALUES ($1, $2, $3, $4, $5)
        "#)
        .bind(&patient.patient_id)
        .bind(&patient.name)
        .bind(patient.age)
        .bind(&patient.bed)
        .bind(patient.department_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_or_database(e, format!("patient {} already exists", patient.patient_id)))?;

        let vitals = &patient.vitals;
        sqlx::query(r#"
            INSERT INTO patient_vitals
            (patient_id, heart_rate, spo2, respiratory_rate, systolic_bp, lactate, gcs,
             on_ventilator, on_pressors, comorbidity_score)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#)
        .bind(&patient.patient_id)
        .bind(vitals.heart_rate)
        .bind(vitals.spo2)
        .bind(vitals.respiratory_rate)
        .bind(vitals.systolic_bp)
        .bind(vitals.lactate)
        .bind(vitals.gcs)
        .bind(vitals.on_ventilator)
        .bind(vitals.on_pressors)
        .bind(vitals.comorbidity_score)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.get_patient(&patient.patient_id)
            .await?
            .ok_or_else(|| IcuError::Internal(format!("patient {} vanished after insert", patient.patient_id)))
    }

    async fn get_patient(&self, patient_id: &str) -> Result<Option<Patient>> {
        let sql = format!("{} WHERE p.patient_id = $1", PATIENT_SELECT);
        let row = sqlx::query_as::<_, DbPatient>(&sql)
            .bind(patient_id)
            .fetch_optional(self.pool.pool())
            .await?;

        Ok(row.map(Patient::from))
    }

    async fn list_active_patients(&self) -> Result<Vec<Patient>> {
        let sql = format!("{} WHERE p.is_active = TRUE ORDER BY p.patient_id", PATIENT_SELECT);
        let rows = sqlx::query_as::<_, DbPatient>(&sql)
            .fetch_all(self.pool.pool())
            .await?;

        Ok(rows.into_iter().map(Patient::from).collect())
    }

    async fn update_vitals(&self, patient_id: &str, vitals: &Vitals) -> Result<Patient> {
        let mut tx = self.pool.pool().begin().await?;

        // 先写历史，再覆盖当前值
        sqlx::query(r#"
            INSERT INTO patient_vitals_history
            (patient_id, heart_rate, spo2, respiratory_rate, systolic_bp, lactate, gcs,
             on_ventilator, on_pressors, comorbidity_score)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#)
        .bind(patient_id)
        .bind(vitals.heart_rate)
        .bind(vitals.spo2)
        .bind(vitals.respiratory_rate)
        .bind(vitals.systolic_bp)
        .bind(vitals.lactate)
        .bind(vitals.gcs)
        .bind(vitals.on_ventilator)
        .bind(vitals.on_pressors)
        .bind(vitals.comorbidity_score)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                IcuError::NotFound(format!("patient {}", patient_id))
            }
            other => IcuError::Database(other.to_string()),
        })?;

        sqlx::query(r#"
            UPDATE patient_vitals SET
                heart_rate = $2, spo2 = $3, respiratory_rate = $4, systolic_bp = $5,
                lactate = $6, gcs = $7, on_ventilator = $8, on_pressors = $9,
                comorbidity_score = $10, recorded_at = NOW()
            WHERE patient_id = $1
        "#)
        .bind(patient_id)
        .bind(vitals.heart_rate)
        .bind(vitals.spo2)
        .bind(vitals.respiratory_rate)
        .bind(vitals.systolic_bp)
        .bind(vitals.lactate)
        .bind(vitals.gcs)
        .bind(vitals.on_ventilator)
        .bind(vitals.on_pressors)
        .bind(vitals.comorbidity_score)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.get_patient(patient_id)
            .await?
            .ok_or_else(|| IcuError::NotFound(format!("patient {}", patient_id)))
    }

    async fn vitals_history(&self, patient_id: &str, limit: i64) -> Result<Vec<VitalsRecord>> {
        let rows = sqlx::query_as::<_, DbVitalsHistory>(r#"
            SELECT patient_id, heart_rate, spo2, respiratory_rate, systolic_bp, lactate, gcs,
                   on_ventilator, on_pressors, comorbidity_score, recorded_at
            FROM patient_vitals_history
            WHERE patient_id = $1
            ORDER BY recorded_at DESC, id DESC
            LIMIT $2
        "#)
        .bind(patient_id)
        .bind(limit.max(0))
        .fetch_all(self.pool.pool())
        .await?;

        Ok(rows.into_iter().map(VitalsRecord::from).collect())
    }

    async fn deactivate_patient(&self, patient_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE patients SET is_active = FALSE WHERE patient_id = $1")
            .bind(patient_id)
            .execute(self.pool.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(IcuError::NotFound(format!("patient {}", patient_id)));
        }
        Ok(())
    }

    // ========== 预测日志 ==========

    async fn append_prediction(
        &self,
        patient_id: &str,
        payload: &str,
        generated_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("INSERT INTO predictions (patient_id, payload, generated_at) VALUES ($1, $2, $3)")
            .bind(patient_id)
            .bind(payload)
            .bind(generated_at)
            .execute(self.pool.pool())
            .await?;

        Ok(())
    }

    async fn latest_prediction(&self, patient_id: &str) -> Result<Option<StoredPrediction>> {
        let row = sqlx::query_as::<_, DbPrediction>(r#"
            SELECT patient_id, payload, generated_at
            FROM predictions
            WHERE patient_id = $1
            ORDER BY generated_at DESC, id DESC
            LIMIT 1
        "#)
        .bind(patient_id)
        .fetch_optional(self.pool.pool())
        .await?;

        Ok(row.map(|row| StoredPrediction {
            patient_id: row.patient_id,
            payload: row.payload,
            generated_at: row.generated_at,
        }))
    }

    // ========== 转科申请相关操作 ==========

    async fn insert_transfer_request(&self, request: &TransferRequest, exclusive: bool) -> Result<()> {
        let snapshot = request.prediction.as_ref().map(serde_json::to_string).transpose()?;
        let mut tx = self.pool.pool().begin().await?;

        if exclusive {
            // 锁住患者行，串行化同一患者的并发创建
            sqlx::query("SELECT patient_id FROM patients WHERE patient_id = $1 FOR UPDATE")
                .bind(&request.patient_id)
                .fetch_optional(&mut *tx)
                .await?;

            let active: Option<(String, String)> = sqlx::query_as(r#"
                SELECT request_id, current_status FROM transfer_requests
                WHERE patient_id = $1
                  AND current_status IN ('pending', 'doctor_approved', 'admin_approved')
                LIMIT 1
            "#)
            .bind(&request.patient_id)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some((request_id, status)) = active {
                return Err(IcuError::Conflict(format!(
                    "patient {} already has active request {} ({})",
                    request.patient_id, request_id, status
                )));
            }
        }

        sqlx::query(r#"
            INSERT INTO transfer_requests
            (request_id, patient_id, requesting_nurse, reviewing_doctor, approving_admin,
             target_department_id, current_status, ml_prediction, notes, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#)
        .bind(&request.request_id)
        .bind(&request.patient_id)
        .bind(&request.requesting_nurse)
        .bind(&request.reviewing_doctor)
        .bind(&request.approving_admin)
        .bind(request.target_department_id)
        .bind(request.status.as_str())
        .bind(snapshot)
        .bind(&request.notes)
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_or_database(e, format!("transfer request {} already exists", request.request_id)))?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_transfer_request(&self, request_id: &str) -> Result<Option<TransferRequest>> {
        let row = sqlx::query_as::<_, DbTransferRequest>(
            "SELECT * FROM transfer_requests WHERE request_id = $1",
        )
        .bind(request_id)
        .fetch_optional(self.pool.pool())
        .await?;

        row.map(TransferRequest::try_from).transpose()
    }

    async fn list_transfer_requests(
        &self,
        status: Option<TransferStatus>,
    ) -> Result<Vec<TransferRequest>> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, DbTransferRequest>(
                    "SELECT * FROM transfer_requests WHERE current_status = $1 ORDER BY created_at DESC",
                )
                .bind(status.as_str())
                .fetch_all(self.pool.pool())
                .await?
            }
            None => {
                sqlx::query_as::<_, DbTransferRequest>(
                    "SELECT * FROM transfer_requests ORDER BY created_at DESC",
                )
                .fetch_all(self.pool.pool())
                .await?
            }
        };

        rows.into_iter().map(TransferRequest::try_from).collect()
    }

    async fn save_transfer_request(
        &self,
        request: &TransferRequest,
        expected: TransferStatus,
    ) -> Result<()> {
        let mut conn = self.pool.pool().acquire().await?;
        update_request_if(&mut conn, request, expected).await
    }

    async fn active_requests_for_patient(&self, patient_id: &str) -> Result<Vec<TransferRequest>> {
        let rows = sqlx::query_as::<_, DbTransferRequest>(r#"
            SELECT * FROM transfer_requests
            WHERE patient_id = $1
              AND current_status IN ('pending', 'doctor_approved', 'admin_approved')
            ORDER BY created_at DESC
        "#)
        .bind(patient_id)
        .fetch_all(self.pool.pool())
        .await?;

        rows.into_iter().map(TransferRequest::try_from).collect()
    }

    // ========== 审批记录 ==========

    async fn record_decision(
        &self,
        request: &TransferRequest,
        expected: TransferStatus,
        approval: &NewApproval,
    ) -> Result<Approval> {
        let mut tx = self.pool.pool().begin().await?;
        update_request_if(&mut tx, request, expected).await?;

        let row = sqlx::query_as::<_, DbApproval>(r#"
            INSERT INTO transfer_approvals (id, request_id, approver, approver_role, action, comments)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, request_id, approver, approver_role, action, comments, created_at
        "#)
        .bind(Uuid::new_v4())
        .bind(&approval.request_id)
        .bind(&approval.approver)
        .bind(approval.approver_role.as_str())
        .bind(approval.action.as_str())
        .bind(&approval.comments)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Approval::try_from(row)
    }

    async fn approvals_for_request(&self, request_id: &str) -> Result<Vec<Approval>> {
        let rows = sqlx::query_as::<_, DbApproval>(r#"
            SELECT id, request_id, approver, approver_role, action, comments, created_at
            FROM transfer_approvals
            WHERE request_id = $1
            ORDER BY created_at
        "#)
        .bind(request_id)
        .fetch_all(self.pool.pool())
        .await?;

        rows.into_iter().map(Approval::try_from).collect()
    }

    // ========== 出科记录 ==========

    async fn complete_discharge(
        &self,
        request: &TransferRequest,
        expected: TransferStatus,
        record: &DischargeRecord,
    ) -> Result<()> {
        let mut tx = self.pool.pool().begin().await?;
        update_request_if(&mut tx, request, expected).await?;

        sqlx::query(r#"
            INSERT INTO discharge_records
            (id, request_id, patient_id, patient_name, destination_department_id,
             requesting_nurse, reviewing_doctor, approving_admin, discharged_by, notes, discharged_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#)
        .bind(record.id)
        .bind(&record.request_id)
        .bind(&record.patient_id)
        .bind(&record.patient_name)
        .bind(record.destination_department_id)
        .bind(&record.requesting_nurse)
        .bind(&record.reviewing_doctor)
        .bind(&record.approving_admin)
        .bind(&record.discharged_by)
        .bind(&record.notes)
        .bind(record.discharged_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_or_database(e, format!("request {} already discharged", record.request_id)))?;

        let result = sqlx::query("UPDATE patients SET is_active = FALSE WHERE patient_id = $1")
            .bind(&record.patient_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(IcuError::NotFound(format!("patient {}", record.patient_id)));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_discharges(&self) -> Result<Vec<DischargeRecord>> {
        let rows = sqlx::query_as::<_, DbDischarge>(
            "SELECT * FROM discharge_records ORDER BY discharged_at DESC",
        )
        .fetch_all(self.pool.pool())
        .await?;

        Ok(rows.into_iter().map(DischargeRecord::from).collect())
    }

    // ========== 就绪跟踪 ==========

    async fn get_ready_state(&self, patient_id: &str) -> Result<Option<ReadyState>> {
        let row = sqlx::query_as::<_, DbReadyState>(
            "SELECT patient_id, currently_ready, ready_since, updated_at FROM patient_ready_states WHERE patient_id = $1",
        )
        .bind(patient_id)
        .fetch_optional(self.pool.pool())
        .await?;

        Ok(row.map(ReadyState::from))
    }

    async fn put_ready_state(&self, state: &ReadyState) -> Result<()> {
        sqlx::query(r#"
            INSERT INTO patient_ready_states (patient_id, currently_ready, ready_since, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (patient_id) DO UPDATE SET
                currently_ready = EXCLUDED.currently_ready,
                ready_since = EXCLUDED.ready_since,
                updated_at = EXCLUDED.updated_at
        "#)
        .bind(&state.patient_id)
        .bind(state.currently_ready)
        .bind(state.ready_since)
        .bind(state.updated_at)
        .execute(self.pool.pool())
        .await?;

        Ok(())
    }
}
