//! 配置管理
//!
//! 配置按层合并：内置默认值 → 可选的 TOML 文件 → `ICU__` 前缀的环境变量。

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use icu_workflow::{ActiveRequestPolicy, IdentityPolicy, SimulationSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

/// 配置管理器
#[derive(Debug)]
pub struct ConfigManager {
    /// 配置数据
    config: IcuConfig,
    /// 配置文件路径
    config_path: Option<PathBuf>,
    /// 配置验证器
    validator: ConfigValidator,
}

/// ICU转科系统完整配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IcuConfig {
    /// 服务器配置
    pub server: ServerConfig,
    /// 数据库配置
    pub database: DatabaseConfig,
    /// 工作流配置
    pub workflow: WorkflowConfig,
    /// 生命体征模拟配置
    pub simulation: SimulationConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 监听主机
    pub host: String,
    /// 监听端口
    pub port: u16,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// 连接字符串，未配置时使用内存存储
    pub url: Option<String>,
    /// 最大连接数
    pub max_connections: u32,
    /// 连接超时（秒）
    pub connect_timeout_secs: u64,
    /// 数据库不可用时降级到内存存储
    pub fallback_to_memory: bool,
}

/// 工作流配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// 同一患者已有活动申请时的处理策略
    pub active_request_policy: ActiveRequestPolicy,
    /// 未知操作者的处理策略
    pub identity_policy: IdentityPolicy,
}

/// 生命体征模拟配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub jitter_ms: u64,
    pub patients_per_tick: usize,
    /// 空库启动时写入演示患者
    pub seed_demo_patients: bool,
}

/// 日志格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Full,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别或 EnvFilter 指令
    pub level: String,
    /// 日志格式
    pub format: LogFormat,
    /// 是否输出 target
    pub with_target: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            connect_timeout_secs: 5,
            fallback_to_memory: true,
        }
    }
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 5,
            jitter_ms: 1000,
            patients_per_tick: 1,
            seed_demo_patients: true,
        }
    }
}

impl SimulationConfig {
    pub fn settings(&self) -> SimulationSettings {
        SimulationSettings {
            interval: Duration::from_secs(self.interval_secs),
            jitter: Duration::from_millis(self.jitter_ms),
            patients_per_tick: self.patients_per_tick,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            with_target: false,
        }
    }
}

impl ConfigManager {
    /// 加载配置；`config_path` 为空时只使用默认值和环境变量
    pub fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = Self::load_config(config_path)?;
        let manager = Self {
            config,
            config_path: config_path.map(Path::to_path_buf),
            validator: ConfigValidator::new(),
        };
        manager.validate_config()?;
        Ok(manager)
    }

    /// 从 TOML 文本加载（不读取环境变量）
    pub fn load_from_str(toml: &str) -> Result<IcuConfig> {
        let settings = Config::builder()
            .add_source(Config::try_from(&IcuConfig::default())?)
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;

        settings
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    fn load_config(config_path: Option<&Path>) -> Result<IcuConfig> {
        let mut builder = Config::builder().add_source(Config::try_from(&IcuConfig::default())?);

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix("ICU")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: IcuConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        match config_path {
            Some(path) => info!("Configuration loaded from: {}", path.display()),
            None => info!("Configuration loaded from defaults and environment"),
        }
        Ok(config)
    }

    /// 获取配置
    pub fn config(&self) -> &IcuConfig {
        &self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// 应用命令行覆盖项后重新验证
    pub fn apply<F>(&mut self, overrides: F) -> Result<()>
    where
        F: FnOnce(&mut IcuConfig),
    {
        overrides(&mut self.config);
        self.validate_config()
    }

    /// 验证配置
    pub fn validate_config(&self) -> Result<()> {
        self.validator.validate(&self.config)
    }

    pub fn into_config(self) -> IcuConfig {
        self.config
    }
}

/// 验证规则
#[derive(Debug)]
struct ValidationRule {
    field_path: &'static str,
    validator: fn(&IcuConfig) -> bool,
    error_message: &'static str,
}

/// 配置验证器
#[derive(Debug)]
pub struct ConfigValidator {
    validation_rules: Vec<ValidationRule>,
}

impl ConfigValidator {
    /// 创建新的配置验证器
    pub fn new() -> Self {
        let validation_rules = vec![
            ValidationRule {
                field_path: "server.port",
                validator: |config| config.server.port != 0,
                error_message: "Server port cannot be 0",
            },
            ValidationRule {
                field_path: "database.max_connections",
                validator: |config| config.database.max_connections != 0,
                error_message: "Database max connections cannot be 0",
            },
            ValidationRule {
                field_path: "simulation.interval_secs",
                validator: |config| config.simulation.interval_secs != 0,
                error_message: "Simulation interval cannot be 0",
            },
            ValidationRule {
                field_path: "simulation.patients_per_tick",
                validator: |config| config.simulation.patients_per_tick != 0,
                error_message: "Simulation must update at least one patient per tick",
            },
        ];

        Self { validation_rules }
    }

    /// 验证配置
    pub fn validate(&self, config: &IcuConfig) -> Result<()> {
        for rule in &self.validation_rules {
            if !(rule.validator)(config) {
                error!("Configuration validation failed for {}", rule.field_path);
                return Err(anyhow::anyhow!("{}: {}", rule.field_path, rule.error_message));
            }
        }
        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}
