//! # ICU转科工作流模块
//!
//! 提供转科申请的完整流程管理，包括：
//! - 申请状态机：护士提交 → 医生审批 → 管理员审批 → 出科
//! - 工作流引擎：审批审计、目标科室解析、活动申请策略和事件通知
//! - 身份解析：将操作者用户名解析为带角色的用户记录
//! - 就绪跟踪：记录患者首次进入可转科状态的时间
//! - 生命体征模拟：后台周期性更新体征并重新评估

pub mod engine;
pub mod identity;
pub mod readiness;
pub mod simulation;
pub mod state_machine;
pub mod vitals;

// 重新导出主要类型
pub use engine::{
    ActiveRequestPolicy, DecisionInput, NewTransferRequest, TransferUpdate, TransferWorkflow,
};
pub use identity::{DirectoryIdentityResolver, IdentityPolicy, IdentityResolver};
pub use readiness::ReadinessTracker;
pub use simulation::{
    perturb_vitals, seed_demo_patients, SimulationSettings, StabilityPattern, VitalsSimulator,
};
pub use state_machine::{ApproverRole, Decision, TransferEvent, TransferStateMachine};
pub use vitals::{Assessment, VitalsPipeline};
