//! 检查点：每个节点成功后按线程保存的快照
//!
//! 快照包含对话状态、下一个要执行的节点以及挂起中的中断（如果有）。
//! 节点失败时不写检查点，线程停留在上一次成功的快照。

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::graph::{ConversationState, Node};
use crate::hitl::Interrupt;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,
    /// 该线程累计成功执行的节点数
    pub step: u64,
    pub state: ConversationState,
    pub next: Node,
    #[serde(default)]
    pub interrupt: Option<Interrupt>,
    /// 毫秒时间戳
    pub updated_at: i64,
}

impl Checkpoint {
    pub fn new(
        thread_id: impl Into<String>,
        step: u64,
        state: ConversationState,
        next: Node,
        interrupt: Option<Interrupt>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            step,
            state,
            next,
            interrupt,
            updated_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.interrupt.is_some()
    }

    /// 运行在某一步失败或被取消后停下：没有挂起，但还没走到 End
    pub fn is_unfinished(&self) -> bool {
        self.interrupt.is_none() && self.next != Node::End
    }
}

/// 检查点存储后端：按 thread_id 取最新快照
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>, AgentError>;

    async fn put(&self, checkpoint: &Checkpoint) -> Result<(), AgentError>;

    async fn delete(&self, thread_id: &str) -> Result<(), AgentError>;
}

/// 进程内存储；存序列化后的 JSON，与持久化后端走同一条编解码路径
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    inner: Mutex<HashMap<String, String>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>, AgentError> {
        let raw = self.lock().get(thread_id).cloned();
        raw.map(|s| serde_json::from_str(&s).map_err(AgentError::from))
            .transpose()
    }

    async fn put(&self, checkpoint: &Checkpoint) -> Result<(), AgentError> {
        let raw = serde_json::to_string(checkpoint)?;
        self.lock().insert(checkpoint.thread_id.clone(), raw);
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<(), AgentError> {
        self.lock().remove(thread_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hitl::HitlPayload;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryCheckpointStore::new();
        assert!(store.get("t1").await.unwrap().is_none());

        let mut state = ConversationState::default();
        state.push_user("hello");
        let intr = Interrupt::new("save_confirm", HitlPayload::text("T", "M"));
        let cp = Checkpoint::new("t1", 3, state, Node::SaveConfirm, Some(intr));
        store.put(&cp).await.unwrap();

        let back = store.get("t1").await.unwrap().unwrap();
        assert_eq!(back, cp);
        assert!(back.is_suspended());
        assert!(!back.is_unfinished());

        store.delete("t1").await.unwrap();
        assert!(store.get("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_overwrites_latest() {
        let store = MemoryCheckpointStore::new();
        let cp1 = Checkpoint::new("t", 1, ConversationState::default(), Node::Agent, None);
        let cp2 = Checkpoint::new("t", 2, ConversationState::default(), Node::End, None);
        store.put(&cp1).await.unwrap();
        store.put(&cp2).await.unwrap();
        assert_eq!(store.get("t").await.unwrap().unwrap().step, 2);
        assert!(cp1.is_unfinished());
        assert!(!cp2.is_unfinished());
    }
}
