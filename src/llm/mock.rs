//! Mock LLM 客户端（用于测试与本地演示，无需 API）
//!
//! 按顺序返回预设回复；脚本耗尽后根据会话情况给出一个确定性的演示规划：
//! 还没有能力结果时规划「生成数据 -> 画图 -> 统计 -> 报告」，之后直接用最后一条观察回复。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::LlmClient;
use crate::memory::{Message, Role};

const DEMO_PLAN: &str = r#"[
  {"capability": "generate_data", "args": {}},
  {"capability": "render_chart", "args": {}},
  {"capability": "compute_statistics", "args": {}},
  {"capability": "generate_report", "args": {}}
]"#;

/// 脚本化 Mock 客户端
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<String, String>>>,
    calls: AtomicUsize,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按顺序返回给定回复
    pub fn scripted<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    /// 追加一次失败（模拟传输错误）
    pub fn push_failure(&self, err: impl Into<String>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Err(err.into()));
        }
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Ok(reply.into()));
        }
    }

    /// complete 被调用的次数
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fallback(messages: &[Message]) -> String {
        let since_user: Vec<&Message> = messages
            .iter()
            .rev()
            .take_while(|m| m.role != Role::User)
            .collect();
        match since_user.iter().find(|m| m.role == Role::Capability) {
            Some(observation) => format!("Done. Last result: {}", observation.content),
            None => DEMO_PLAN.to_string(),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(reply) => reply,
            None => Ok(Self::fallback(messages)),
        }
    }
}
