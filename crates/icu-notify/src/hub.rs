//! 通知分发中心
//!
//! 维护在线订阅者集合。广播尽力而为：投递失败不向调用方抛出，
//! 只记录日志，并在本次广播结束后移除失败的订阅者。

use async_trait::async_trait;
use futures::future::join_all;
use icu_core::{IcuError, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::event::EventEnvelope;

/// 订阅者标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// 订阅者投递通道
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, payload: &str) -> Result<()>;
}

/// 基于无界 mpsc 通道的投递端，每个 WebSocket 连接一个
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::UnboundedSender<String>) -> Self {
        Self { sender }
    }

    /// 创建投递端及对应的接收端
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn deliver(&self, payload: &str) -> Result<()> {
        self.sender
            .send(payload.to_string())
            .map_err(|_| IcuError::Internal("subscriber channel closed".to_string()))
    }
}

/// 一次广播的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub pruned: usize,
}

/// 通知分发中心
#[derive(Default)]
pub struct NotificationHub {
    subscribers: RwLock<HashMap<SubscriberId, Arc<dyn EventSink>>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, sink: Arc<dyn EventSink>) -> SubscriberId {
        let id = SubscriberId::new();
        let mut subscribers = self.subscribers.write().await;
        subscribers.insert(id, sink);
        info!("Subscriber {} connected ({} active)", id, subscribers.len());
        id
    }

    pub async fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.write().await.remove(&id).is_some();
        if removed {
            info!("Subscriber {} disconnected", id);
        }
        removed
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// 向所有订阅者广播事件
    pub async fn broadcast(&self, event: &EventEnvelope) -> BroadcastReport {
        let payload = match event.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode {} event: {}", event.event_type.as_str(), e);
                return BroadcastReport::default();
            }
        };

        // 投递期间不持有锁，订阅和退订不会被慢订阅者阻塞
        let targets: Vec<(SubscriberId, Arc<dyn EventSink>)> = self
            .subscribers
            .read()
            .await
            .iter()
            .map(|(id, sink)| (*id, Arc::clone(sink)))
            .collect();

        if targets.is_empty() {
            debug!("No subscribers for event: {}", event.event_type.as_str());
            return BroadcastReport::default();
        }

        let outcomes = join_all(targets.iter().map(|(id, sink)| {
            let payload = payload.as_str();
            async move { (*id, sink.deliver(payload).await) }
        }))
        .await;

        let mut failed = Vec::new();
        for (id, outcome) in outcomes {
            if let Err(e) = outcome {
                warn!("Delivery to subscriber {} failed: {}", id, e);
                failed.push(id);
            }
        }

        if !failed.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for id in &failed {
                subscribers.remove(id);
            }
            warn!("Pruned {} dead subscribers ({} remaining)", failed.len(), subscribers.len());
        }

        let report = BroadcastReport {
            delivered: targets.len() - failed.len(),
            pruned: failed.len(),
        };
        debug!(
            "Broadcast {}: delivered={}, pruned={}",
            event.event_type.as_str(),
            report.delivered,
            report.pruned
        );
        report
    }

    /// 关闭时拆除全部订阅，丢弃发送端使连接任务退出
    pub async fn close_all(&self) -> usize {
        let mut subscribers = self.subscribers.write().await;
        let count = subscribers.len();
        subscribers.clear();
        info!("Closed {} subscriber connections", count);
        count
    }
}
