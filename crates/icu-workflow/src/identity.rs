//! 操作者身份解析
//!
//! 工作流中的护士、医生和管理员都以用户名传入，在这里解析为用户记录。

use async_trait::async_trait;
use icu_core::{IcuError, Result, User, UserRole};
use icu_database::{NewUser, TransferStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 未知身份的处理策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityPolicy {
    /// 未知用户返回 `NotFound`，角色不符或停用返回 `Permission`
    #[default]
    Strict,
    /// 兼容旧部署：按用户名自动创建用户。没有任何认证，仅用于封闭演示环境
    Provisional,
}

/// 身份解析契约
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, username: &str, role: UserRole) -> Result<User>;
}

/// 基于用户表的身份解析
pub struct DirectoryIdentityResolver {
    store: Arc<dyn TransferStore>,
    policy: IdentityPolicy,
}

impl DirectoryIdentityResolver {
    pub fn new(store: Arc<dyn TransferStore>, policy: IdentityPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> IdentityPolicy {
        self.policy
    }
}

#[async_trait]
impl IdentityResolver for DirectoryIdentityResolver {
    async fn resolve(&self, username: &str, role: UserRole) -> Result<User> {
        let username = username.trim();
        if username.is_empty() {
            return Err(IcuError::Validation(format!("{} id is required", role)));
        }

        match self.store.find_user(username).await? {
            Some(user) if !user.is_active => {
                Err(IcuError::Permission(format!("user {} is inactive", username)))
            }
            Some(user) if user.role != role => Err(IcuError::Permission(format!(
                "user {} has role {}, expected {}",
                username, user.role, role
            ))),
            Some(user) => Ok(user),
            None => match self.policy {
                IdentityPolicy::Strict => {
                    Err(IcuError::NotFound(format!("{} {}", role, username)))
                }
                IdentityPolicy::Provisional => {
                    tracing::warn!(
                        "Creating provisional {} account '{}' without authentication",
                        role,
                        username
                    );
                    let created = self
                        .store
                        .create_user(&NewUser {
                            username: username.to_string(),
                            role,
                            department_id: None,
                        })
                        .await;
                    match created {
                        Ok(user) => Ok(user),
                        // 并发请求已创建同名用户
                        Err(IcuError::Conflict(_)) => self
                            .store
                            .find_user(username)
                            .await?
                            .ok_or_else(|| IcuError::NotFound(format!("{} {}", role, username))),
                        Err(e) => Err(e),
                    }
                }
            },
        }
    }
}
