//! ICU转科协调服务主程序

use anyhow::{Context, Result};
use clap::Parser;
use icu_admin::{init_logging, ConfigManager, DatabaseConfig};
use icu_database::{DatabasePool, MemoryStore, PgStore, TransferStore};
use icu_notify::NotificationHub;
use icu_prediction::{PredictionCache, PredictionService, RuleBasedClassifier};
use icu_web::{AppState, WebServer};
use icu_workflow::{
    seed_demo_patients, DirectoryIdentityResolver, ReadinessTracker, TransferWorkflow,
    VitalsPipeline, VitalsSimulator,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// 命令行参数，优先级高于配置文件和环境变量
#[derive(Parser, Debug)]
#[command(name = "icu-server")]
#[command(about = "ICU 转科协调服务：就绪预测、审批流程与实时推送")]
struct Args {
    /// 配置文件路径 (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 监听地址
    #[arg(long)]
    host: Option<String>,

    /// 监听端口
    #[arg(short, long)]
    port: Option<u16>,

    /// PostgreSQL 连接字符串
    #[arg(long)]
    database_url: Option<String>,

    /// 日志级别
    #[arg(short, long)]
    log_level: Option<String>,

    /// 关闭生命体征模拟
    #[arg(long)]
    no_simulation: bool,
}

/// 打开存储：优先 PostgreSQL，失败时按配置降级到内存
async fn open_store(config: &DatabaseConfig) -> Result<(Arc<dyn TransferStore>, &'static str)> {
    let Some(url) = config.url.as_deref() else {
        info!("未配置数据库，使用内存存储");
        return Ok((Arc::new(MemoryStore::seeded().await?), "memory"));
    };

    let connected = async {
        let pool = DatabasePool::connect(url, config.max_connections, config.connect_timeout()).await?;
        let store = PgStore::new(pool);
        store.create_tables().await?;
        store.seed_defaults().await?;
        Ok::<_, icu_core::IcuError>(store)
    }
    .await;

    match connected {
        Ok(store) => {
            info!("已连接 PostgreSQL");
            Ok((Arc::new(store), "postgres"))
        }
        Err(e) if config.fallback_to_memory => {
            warn!("数据库不可用，降级到内存存储: {}", e);
            Ok((Arc::new(MemoryStore::seeded().await?), "memory"))
        }
        Err(e) => Err(e).context("数据库连接失败"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut manager = ConfigManager::new(args.config.as_deref())?;
    manager.apply(|config| {
        if let Some(host) = args.host.clone() {
            config.server.host = host;
        }
        if let Some(port) = args.port {
            config.server.port = port;
        }
        if let Some(url) = args.database_url.clone() {
            config.database.url = Some(url);
        }
        if let Some(level) = args.log_level.clone() {
            config.logging.level = level;
        }
        if args.no_simulation {
            config.simulation.enabled = false;
        }
    })?;
    let config = manager.into_config();

    init_logging(&config.logging)?;
    info!("启动ICU转科协调服务...");

    let (store, backend) = open_store(&config.database).await?;

    if config.simulation.seed_demo_patients {
        let seeded = seed_demo_patients(store.as_ref()).await?;
        if seeded > 0 {
            info!("已写入 {} 名演示患者", seeded);
        }
    }

    // 组装各组件
    let predictions = PredictionService::new(Arc::new(RuleBasedClassifier::default()));
    let cache = Arc::new(PredictionCache::new(store.clone()));
    let readiness = Arc::new(ReadinessTracker::new(store.clone()));
    let hub = Arc::new(NotificationHub::new());
    let identity = Arc::new(DirectoryIdentityResolver::new(
        store.clone(),
        config.workflow.identity_policy,
    ));
    let workflow = Arc::new(TransferWorkflow::new(
        store.clone(),
        identity,
        cache.clone(),
        readiness.clone(),
        hub.clone(),
        config.workflow.active_request_policy,
    ));
    let vitals = Arc::new(VitalsPipeline::new(
        store.clone(),
        predictions.clone(),
        cache.clone(),
        readiness.clone(),
        hub.clone(),
    ));

    info!("服务配置:");
    info!("  存储后端: {}", backend);
    info!("  申请策略: {:?}", config.workflow.active_request_policy);
    info!("  身份策略: {:?}", config.workflow.identity_policy);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let simulator = if config.simulation.enabled {
        let simulator = Arc::new(VitalsSimulator::new(vitals.clone(), config.simulation.settings()));
        tokio::spawn(simulator.clone().run(shutdown_rx.clone()));
        Some(simulator)
    } else {
        info!("生命体征模拟已关闭");
        None
    };

    let state = AppState {
        store,
        workflow,
        predictions,
        cache,
        readiness,
        vitals,
        hub: hub.clone(),
        simulator,
        backend,
    };

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("无效的监听地址 {}:{}", config.server.host, config.server.port))?;
    info!("  监听地址: {}", addr);

    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("监听关闭信号失败: {}", e);
        }
        info!("收到关闭信号，正在停止服务...");
        let _ = shutdown_tx.send(true);
    };

    if let Err(e) = WebServer::new(addr, state).run(shutdown).await {
        error!("服务器运行失败: {}", e);
        return Err(e.into());
    }

    // 关闭全部 WebSocket 连接
    let closed = hub.close_all().await;
    info!("已关闭 {} 个实时连接，服务已停止", closed);
    drop(shutdown_rx);

    Ok(())
}
