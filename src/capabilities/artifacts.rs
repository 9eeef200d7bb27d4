//! 产物句柄与内存产物仓库
//!
//! 句柄是不透明字符串，只在当前会话内有意义；内置能力通过共享的 ArtifactStore 读写数据集与图像描述。

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 不透明产物句柄
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactHandle(String);

impl ArtifactHandle {
    /// 生成新句柄，prefix 仅用于可读性（如 dataset / figure）
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{}-{}", prefix, uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ArtifactHandle {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for ArtifactHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 内存产物仓库：handle -> JSON 内容
#[derive(Debug, Default)]
pub struct ArtifactStore {
    items: RwLock<HashMap<ArtifactHandle, Value>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, prefix: &str, content: Value) -> ArtifactHandle {
        let handle = ArtifactHandle::generate(prefix);
        if let Ok(mut items) = self.items.write() {
            items.insert(handle.clone(), content);
        }
        handle
    }

    pub fn get(&self, handle: &ArtifactHandle) -> Option<Value> {
        self.items.read().ok()?.get(handle).cloned()
    }

    pub fn clear(&self) {
        if let Ok(mut items) = self.items.write() {
            items.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.items.read().map(|i| i.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
