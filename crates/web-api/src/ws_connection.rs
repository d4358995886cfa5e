//! WebSocket 连接
//!
//! 把一个 WebSocket 拆成读、写两个任务，中间通过 mpsc 与应用层的连接 actor 交互：
//! 读任务解码客户端帧为命令，写任务把 actor 产生的事件编码成 JSON 文本帧。

use application::{ClientCommand, ServerEvent};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::UserId;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::sync::mpsc;

use crate::state::AppState;

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 256;

/// 客户端帧解码失败
#[derive(Debug)]
pub struct BadFrame(String);

pub fn decode_frame(text: &str) -> Result<ClientCommand, BadFrame> {
    serde_json::from_str(text).map_err(|err| BadFrame(err.to_string()))
}

pub fn encode_event(event: &ServerEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

fn bad_frame_ack(error: &BadFrame) -> ServerEvent {
    ServerEvent::ack_err(None, "BAD_FRAME", format!("malformed frame: {}", error.0))
}

/// 写操作命令，统一由写任务发送
#[derive(Debug)]
enum WsCommand {
    Event(ServerEvent),
    Pong(axum::body::Bytes),
}

pub async fn serve(mut socket: WebSocket, state: AppState, user_id: UserId) {
    let actor = match state.realtime.open(user_id).await {
        Ok(actor) => actor,
        Err(err) => {
            tracing::error!(user_id = %user_id, error = %err, "建立实时连接失败");
            let _ = socket.send(WsMessage::Close(None)).await;
            return;
        }
    };
    let connection_id = actor.connection_id();

    let (sink, stream) = socket.split();
    let (command_tx, command_rx) = mpsc::channel::<ClientCommand>(COMMAND_BUFFER);
    let (event_tx, event_rx) = mpsc::channel::<ServerEvent>(EVENT_BUFFER);
    let (control_tx, control_rx) = mpsc::channel::<WsCommand>(COMMAND_BUFFER);

    let actor_task = tokio::spawn(actor.run(command_rx, event_tx));
    let mut reader = tokio::spawn(read_frames(stream, command_tx, control_tx));
    let mut writer = tokio::spawn(write_frames(sink, event_rx, control_rx));

    // 任一方向结束即视为断开；命令通道关闭后 actor 自行完成清理
    tokio::select! {
        _ = &mut reader => {}
        _ = &mut writer => reader.abort(),
    }

    if let Err(err) = actor_task.await {
        tracing::warn!(connection_id = %connection_id, error = %err, "连接 actor 异常退出");
    }
    reader.abort();
    writer.abort();
    tracing::debug!(connection_id = %connection_id, "WebSocket 任务已结束");
}

async fn read_frames(
    mut stream: SplitStream<WebSocket>,
    commands: mpsc::Sender<ClientCommand>,
    control: mpsc::Sender<WsCommand>,
) {
    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                tracing::debug!(error = %err, "读取 WebSocket 帧失败");
                break;
            }
        };
        match frame {
            WsMessage::Text(text) => match decode_frame(text.as_str()) {
                Ok(command) => {
                    if commands.send(command).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    tracing::debug!(error = ?err, "收到无法解析的帧");
                    if control
                        .send(WsCommand::Event(bad_frame_ack(&err)))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            },
            WsMessage::Binary(_) => {
                let err = BadFrame("binary frames are not supported".to_string());
                if control
                    .send(WsCommand::Event(bad_frame_ack(&err)))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            WsMessage::Ping(data) => {
                if control.send(WsCommand::Pong(data)).await.is_err() {
                    break;
                }
            }
            WsMessage::Pong(_) => {}
            WsMessage::Close(_) => {
                tracing::debug!("客户端关闭连接");
                break;
            }
        }
    }
}

async fn write_frames(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut events: mpsc::Receiver<ServerEvent>,
    mut control: mpsc::Receiver<WsCommand>,
) {
    loop {
        let command = tokio::select! {
            Some(event) = events.recv() => WsCommand::Event(event),
            Some(command) = control.recv() => command,
            else => break,
        };
        let frame = match command {
            WsCommand::Event(event) => match encode_event(&event) {
                Ok(text) => WsMessage::Text(text.into()),
                Err(err) => {
                    tracing::warn!(event = event.name(), error = %err, "事件序列化失败");
                    continue;
                }
            },
            WsCommand::Pong(data) => WsMessage::Pong(data),
        };
        if sink.send(frame).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}
