//! WebSocket 实时推送
//!
//! 每个连接在通知中心注册一个通道订阅者，转发任务把事件写入 socket。
//! 客户端发来的消息只用于保活，内容被忽略。

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use icu_notify::ChannelSink;
use std::sync::Arc;
use tracing::{debug, info};

use crate::server::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (sink, mut events) = ChannelSink::pair();
    let id = state.hub.subscribe(Arc::new(sink)).await;
    info!("WebSocket client {} connected", id);

    let mut forward = tokio::spawn(async move {
        while let Some(payload) = events.recv().await {
            if sender.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let mut inbound = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if let Message::Close(_) = message {
                break;
            }
        }
    });

    // 任一方向结束即断开
    tokio::select! {
        _ = &mut forward => inbound.abort(),
        _ = &mut inbound => forward.abort(),
    }

    if state.hub.unsubscribe(id).await {
        debug!("Subscriber {} removed", id);
    }
    info!("WebSocket client {} disconnected", id);
}
