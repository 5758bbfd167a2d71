//! 线程持久化协作者
//!
//! 驱动循环把新追加的消息、以及用户确认保存的研究报告交给 ThreadStore；
//! 线程标题取第一条用户消息的前 100 个字符。

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::AgentError;
use crate::memory::Message;
use crate::schemas::ResearchReport;

pub const MAX_TITLE_CHARS: usize = 100;

/// 由首条用户消息生成线程标题
pub fn derive_title(first_human: &str) -> String {
    first_human.trim().chars().take(MAX_TITLE_CHARS).collect()
}

#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// 线程不存在时创建；已有标题时不覆盖
    async fn ensure_thread(&self, thread_id: &str, title: Option<&str>) -> Result<(), AgentError>;

    async fn title(&self, thread_id: &str) -> Result<Option<String>, AgentError>;

    /// 追加消息；同一 message id 重复写入时忽略
    async fn append_messages(&self, thread_id: &str, messages: &[Message]) -> Result<(), AgentError>;

    async fn load_messages(&self, thread_id: &str) -> Result<Vec<Message>, AgentError>;

    /// 保存研究报告，返回报告 id
    async fn save_report(&self, thread_id: &str, report: &ResearchReport) -> Result<String, AgentError>;

    async fn list_reports(&self, thread_id: &str) -> Result<Vec<ResearchReport>, AgentError>;
}

#[derive(Debug, Default)]
struct ThreadRecord {
    title: Option<String>,
    messages: Vec<Message>,
    reports: Vec<ResearchReport>,
}

/// 进程内实现
#[derive(Debug, Default)]
pub struct MemoryThreadStore {
    threads: Mutex<HashMap<String, ThreadRecord>>,
}

impl MemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, thread_id: &str, f: impl FnOnce(&mut ThreadRecord) -> T) -> T {
        let mut guard = self.threads.lock().unwrap_or_else(|e| e.into_inner());
        f(guard.entry(thread_id.to_string()).or_default())
    }
}

#[async_trait]
impl ThreadStore for MemoryThreadStore {
    async fn ensure_thread(&self, thread_id: &str, title: Option<&str>) -> Result<(), AgentError> {
        self.with(thread_id, |rec| {
            if rec.title.is_none() {
                rec.title = title.map(derive_title);
            }
        });
        Ok(())
    }

    async fn title(&self, thread_id: &str) -> Result<Option<String>, AgentError> {
        Ok(self.with(thread_id, |rec| rec.title.clone()))
    }

    async fn append_messages(&self, thread_id: &str, messages: &[Message]) -> Result<(), AgentError> {
        self.with(thread_id, |rec| {
            for m in messages {
                if !rec.messages.iter().any(|existing| existing.id == m.id) {
                    rec.messages.push(m.clone());
                }
            }
        });
        Ok(())
    }

    async fn load_messages(&self, thread_id: &str) -> Result<Vec<Message>, AgentError> {
        Ok(self.with(thread_id, |rec| rec.messages.clone()))
    }

    async fn save_report(&self, thread_id: &str, report: &ResearchReport) -> Result<String, AgentError> {
        self.with(thread_id, |rec| rec.reports.push(report.clone()));
        Ok(uuid::Uuid::new_v4().to_string())
    }

    async fn list_reports(&self, thread_id: &str) -> Result<Vec<ResearchReport>, AgentError> {
        Ok(self.with(thread_id, |rec| rec.reports.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_title_truncates() {
        let long = "x".repeat(150);
        assert_eq!(derive_title(&long).chars().count(), 100);
        assert_eq!(derive_title("  What is 15 * 37?  "), "What is 15 * 37?");
    }

    #[tokio::test]
    async fn test_memory_store_dedups_messages() {
        let store = MemoryThreadStore::new();
        store.ensure_thread("t", Some("first")).await.unwrap();
        store.ensure_thread("t", Some("second")).await.unwrap();
        assert_eq!(store.title("t").await.unwrap().as_deref(), Some("first"));

        let m = Message::user("hi");
        store.append_messages("t", &[m.clone()]).await.unwrap();
        store.append_messages("t", &[m]).await.unwrap();
        assert_eq!(store.load_messages("t").await.unwrap().len(), 1);

        let report = ResearchReport {
            title: "R".into(),
            summary: "S".into(),
            ..Default::default()
        };
        store.save_report("t", &report).await.unwrap();
        assert_eq!(store.list_reports("t").await.unwrap(), vec![report]);
    }
}
