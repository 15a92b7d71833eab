//! 转科申请状态机
//!
//! 管理转科申请从提交到出科的状态转换

use icu_core::{IcuError, Result, TransferStatus, UserRole};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// 审批人角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApproverRole {
    Doctor,
    Admin,
}

impl ApproverRole {
    pub fn user_role(&self) -> UserRole {
        match self {
            ApproverRole::Doctor => UserRole::Doctor,
            ApproverRole::Admin => UserRole::Admin,
        }
    }
}

/// 审批决定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

/// 状态转换事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TransferEvent {
    DoctorApprove,
    DoctorReject,
    AdminApprove,
    AdminReject,
    Discharge,
}

impl TransferEvent {
    /// 每个角色唯一的转换入口：事件由调用的决策函数决定，不从自由输入推断
    pub fn for_decision(role: ApproverRole, decision: Decision) -> Self {
        match (role, decision) {
            (ApproverRole::Doctor, Decision::Approve) => TransferEvent::DoctorApprove,
            (ApproverRole::Doctor, Decision::Reject) => TransferEvent::DoctorReject,
            (ApproverRole::Admin, Decision::Approve) => TransferEvent::AdminApprove,
            (ApproverRole::Admin, Decision::Reject) => TransferEvent::AdminReject,
        }
    }

    /// 将目标状态映射回对应的角色决定；`Completed` 只能通过出科到达
    pub fn for_target_status(status: TransferStatus) -> Option<(ApproverRole, Decision)> {
        match status {
            TransferStatus::DoctorApproved => Some((ApproverRole::Doctor, Decision::Approve)),
            TransferStatus::DoctorRejected => Some((ApproverRole::Doctor, Decision::Reject)),
            TransferStatus::AdminApproved => Some((ApproverRole::Admin, Decision::Approve)),
            TransferStatus::AdminRejected => Some((ApproverRole::Admin, Decision::Reject)),
            TransferStatus::Pending | TransferStatus::Completed => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferEvent::DoctorApprove => "doctor_approve",
            TransferEvent::DoctorReject => "doctor_reject",
            TransferEvent::AdminApprove => "admin_approve",
            TransferEvent::AdminReject => "admin_reject",
            TransferEvent::Discharge => "discharge",
        }
    }
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 转科申请状态机
#[derive(Debug)]
pub struct TransferStateMachine {
    transitions: HashMap<(TransferStatus, TransferEvent), TransferStatus>,
}

impl TransferStateMachine {
    /// 创建新的状态机实例
    pub fn new() -> Self {
        let mut transitions = HashMap::new();

        // 定义状态转换规则
        transitions.insert((TransferStatus::Pending, TransferEvent::DoctorApprove), TransferStatus::DoctorApproved);
        transitions.insert((TransferStatus::Pending, TransferEvent::DoctorReject), TransferStatus::DoctorRejected);
        transitions.insert((TransferStatus::DoctorApproved, TransferEvent::AdminApprove), TransferStatus::AdminApproved);
        transitions.insert((TransferStatus::DoctorApproved, TransferEvent::AdminReject), TransferStatus::AdminRejected);
        transitions.insert((TransferStatus::AdminApproved, TransferEvent::Discharge), TransferStatus::Completed);

        Self { transitions }
    }

    /// 检查状态转换是否有效
    pub fn can_transition(&self, from: TransferStatus, event: TransferEvent) -> bool {
        self.transitions.contains_key(&(from, event))
    }

    /// 执行状态转换
    pub fn transition(&self, from: TransferStatus, event: TransferEvent) -> Result<TransferStatus> {
        match self.transitions.get(&(from, event)) {
            Some(to) => Ok(*to),
            None => Err(IcuError::InvalidStateTransition {
                from: from.to_string(),
                event: event.to_string(),
            }),
        }
    }

    /// 获取所有可能的状态
    pub fn all_states() -> Vec<TransferStatus> {
        vec![
            TransferStatus::Pending,
            TransferStatus::DoctorApproved,
            TransferStatus::DoctorRejected,
            TransferStatus::AdminApproved,
            TransferStatus::AdminRejected,
            TransferStatus::Completed,
        ]
    }

    /// 获取状态的所有可能事件
    pub fn possible_events(&self, current: TransferStatus) -> Vec<TransferEvent> {
        self.transitions
            .keys()
            .filter(|(state, _)| *state == current)
            .map(|(_, event)| *event)
            .collect()
    }

    /// 没有任何出边的状态即终止状态
    pub fn is_terminal(&self, status: TransferStatus) -> bool {
        self.possible_events(status).is_empty()
    }
}

impl Default for TransferStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
