//! 对话历史：轮次记录
//!
//! 每条记录含角色、文本与可选的结构化负载（能力调用批次、能力结果信封等）；
//! 超出上限时从最旧的非 system 消息开始剪枝，供 Planner 上下文与观测投影使用。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 消息角色（Capability 为能力执行后的观察结果）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Capability,
}

/// 单条轮次记录
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            payload: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            payload: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            payload: None,
        }
    }

    /// 能力执行结果（content 为信封的 JSON 文本，payload 为同一信封的结构化形式）
    pub fn capability(content: impl Into<String>, payload: Value) -> Self {
        Self {
            role: Role::Capability,
            content: content.into(),
            payload: Some(payload),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// 对话历史：最多保留 max_messages 条，system 消息不参与剪枝
#[derive(Clone, Debug)]
pub struct ConversationMemory {
    messages: Vec<Message>,
    max_messages: usize,
}

impl ConversationMemory {
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_messages: max_messages.max(2),
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
        self.prune();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    fn prune(&mut self) {
        while self.messages.len() > self.max_messages {
            match self.messages.iter().position(|m| m.role != Role::System) {
                Some(idx) => {
                    self.messages.remove(idx);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
