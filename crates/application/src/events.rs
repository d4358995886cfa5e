//! 实时通道的事件定义
//!
//! 帧格式为 `{"event": 名称, "data": {...}}`，事件名和字段均为 camelCase。

use domain::{ConversationId, DeliveryStatus, Message, MessageId, UserId};
use serde::{Deserialize, Serialize};

/// 服务端推送给客户端的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    ReceiveMessage {
        message: Message,
        status: DeliveryStatus,
    },
    MessageStatus {
        message_id: MessageId,
        status: DeliveryStatus,
    },
    Typing {
        user_id: UserId,
        conversation_id: ConversationId,
    },
    StopTyping {
        user_id: UserId,
        conversation_id: ConversationId,
    },
    UserOnline {
        user_id: UserId,
    },
    UserOffline {
        user_id: UserId,
    },
    /// 对客户端命令的确认
    Ack {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<Message>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<AckError>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckError {
    pub code: String,
    pub message: String,
}

impl ServerEvent {
    pub fn ack_ok(request_id: Option<String>, message: Message) -> Self {
        ServerEvent::Ack {
            request_id,
            success: true,
            message: Some(message),
            error: None,
        }
    }

    pub fn ack_err(
        request_id: Option<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ServerEvent::Ack {
            request_id,
            success: false,
            message: None,
            error: Some(AckError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::ReceiveMessage { .. } => "receiveMessage",
            ServerEvent::MessageStatus { .. } => "messageStatus",
            ServerEvent::Typing { .. } => "typing",
            ServerEvent::StopTyping { .. } => "stopTyping",
            ServerEvent::UserOnline { .. } => "userOnline",
            ServerEvent::UserOffline { .. } => "userOffline",
            ServerEvent::Ack { .. } => "ack",
        }
    }
}

/// 客户端发送的命令
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientCommand {
    SendMessage {
        content: String,
        conversation_id: ConversationId,
        /// 客户端关联 ack 用的请求编号
        #[serde(default)]
        request_id: Option<String>,
    },
    MarkAsRead {
        message_ids: Vec<MessageId>,
    },
    Typing {
        conversation_id: ConversationId,
    },
}
