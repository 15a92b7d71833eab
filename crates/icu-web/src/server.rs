//! Web服务器

use axum::{
    routing::{get, post, put},
    Router,
};
use icu_core::Result;
use icu_database::TransferStore;
use icu_notify::NotificationHub;
use icu_prediction::{PredictionCache, PredictionService};
use icu_workflow::{ReadinessTracker, TransferWorkflow, VitalsPipeline, VitalsSimulator};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::handlers;
use crate::ws::ws_handler;

/// 处理器共享状态
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TransferStore>,
    pub workflow: Arc<TransferWorkflow>,
    pub predictions: PredictionService,
    pub cache: Arc<PredictionCache>,
    pub readiness: Arc<ReadinessTracker>,
    pub vitals: Arc<VitalsPipeline>,
    pub hub: Arc<NotificationHub>,
    /// 运行中的模拟器；手动录入体征后更新其基线
    pub simulator: Option<Arc<VitalsSimulator>>,
    /// 存储后端名称，用于健康检查
    pub backend: &'static str,
}

/// 构建路由
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/model-info", get(handlers::model_info))
        .route("/predict", post(handlers::predict))
        // 患者
        .route("/patients", get(handlers::list_patients))
        .route("/patient/:id/vitals", get(handlers::patient_vitals))
        .route("/patient/:id/vitals/history", get(handlers::vitals_history))
        .route("/api/predict/:id", get(handlers::patient_prediction))
        .route("/add-patient", post(handlers::add_patient))
        .route("/update-vitals", post(handlers::update_vitals))
        .route("/discharged-patients", get(handlers::discharged_patients))
        // 转科申请
        .route("/transfer-request", post(handlers::create_transfer_request))
        .route("/transfer-requests", get(handlers::list_transfer_requests))
        .route(
            "/transfer-request/:id",
            get(handlers::get_transfer_request).put(handlers::update_transfer_request),
        )
        .route("/transfer-request/:id/approvals", get(handlers::request_approvals))
        .route("/transfer-request/:id/approve", put(handlers::doctor_approve))
        .route("/transfer-request/:id/reject", put(handlers::doctor_reject))
        .route("/transfer-request/:id/admin-approve", put(handlers::admin_approve))
        .route("/transfer-request/:id/admin-reject", put(handlers::admin_reject))
        .route("/transfer-request/:id/discharge", post(handlers::discharge))
        // 目录
        .route("/departments", get(handlers::list_departments))
        .route("/users/:role", get(handlers::users_by_role))
        // 实时推送
        .route("/ws", get(ws_handler))
        .with_state(state)
        // 全局中间件
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
}

pub struct WebServer {
    addr: SocketAddr,
    app: Router,
}

impl WebServer {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        Self {
            addr,
            app: create_app(state),
        }
    }

    /// 运行直到 `shutdown` 完成，随后等待进行中的请求结束
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("Starting web server on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Web server stopped");
        Ok(())
    }
}
