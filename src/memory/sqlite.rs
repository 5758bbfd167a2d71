//! SQLite 持久化：检查点 + 线程 / 消息 / 研究报告
//!
//! 同一个数据库文件同时实现 CheckpointStore 与 ThreadStore。rusqlite 是同步 API，
//! 所有查询都放进 spawn_blocking，避免阻塞 async 运行时。
//! 检查点按行追加（最新一行即当前快照），写入后按保留数裁剪旧行。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::core::AgentError;
use crate::memory::threads::derive_title;
use crate::memory::{Checkpoint, CheckpointStore, Message, Role, ThreadStore, ToolCall};
use crate::schemas::ResearchReport;

/// 每个线程默认保留的检查点行数
pub const DEFAULT_CHECKPOINT_RETENTION: usize = 20;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS threads (
    id TEXT PRIMARY KEY,
    title TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS messages (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    thread_id TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    tool_calls TEXT,
    tool_call_id TEXT,
    name TEXT,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS research_reports (
    id TEXT PRIMARY KEY,
    thread_id TEXT NOT NULL,
    title TEXT NOT NULL,
    summary TEXT NOT NULL,
    report TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS checkpoints (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    thread_id TEXT NOT NULL,
    step INTEGER NOT NULL,
    state TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id);
CREATE INDEX IF NOT EXISTS idx_checkpoints_thread ON checkpoints(thread_id);
";

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    retention: usize,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("retention", &self.retention)
            .finish()
    }
}

impl SqliteStore {
    /// 打开（或创建）数据库文件并建表
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AgentError::Storage(format!("io: {e}")))?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, AgentError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, AgentError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            retention: DEFAULT_CHECKPOINT_RETENTION,
        })
    }

    /// 每个线程保留的检查点行数（至少 1）
    pub fn with_retention(mut self, keep: usize) -> Self {
        self.retention = keep.max(1);
        self
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, AgentError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, AgentError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&guard)
        })
        .await
        .map_err(|e| AgentError::Storage(format!("sqlite task: {e}")))?
    }

    /// 仅保留最近 keep 行检查点，返回删除行数
    pub async fn cleanup_checkpoints(&self, thread_id: &str, keep: usize) -> Result<usize, AgentError> {
        let thread_id = thread_id.to_string();
        self.with_conn(move |conn| prune(conn, &thread_id, keep)).await
    }

    pub async fn checkpoint_count(&self, thread_id: &str) -> Result<usize, AgentError> {
        let thread_id = thread_id.to_string();
        self.with_conn(move |conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM checkpoints WHERE thread_id = ?1",
                params![thread_id],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
        .await
    }
}

fn prune(conn: &Connection, thread_id: &str, keep: usize) -> Result<usize, AgentError> {
    let removed = conn.execute(
        "DELETE FROM checkpoints WHERE thread_id = ?1 AND id NOT IN (
            SELECT id FROM checkpoints WHERE thread_id = ?1 ORDER BY id DESC LIMIT ?2
        )",
        params![thread_id, keep as i64],
    )?;
    Ok(removed)
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>, AgentError> {
        let thread_id = thread_id.to_string();
        let raw: Option<String> = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT state FROM checkpoints WHERE thread_id = ?1 ORDER BY id DESC LIMIT 1",
                        params![thread_id],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;
        raw.map(|s| serde_json::from_str(&s).map_err(AgentError::from))
            .transpose()
    }

    async fn put(&self, checkpoint: &Checkpoint) -> Result<(), AgentError> {
        let raw = serde_json::to_string(checkpoint)?;
        let thread_id = checkpoint.thread_id.clone();
        let step = checkpoint.step as i64;
        let keep = self.retention;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO checkpoints (thread_id, step, state, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![thread_id, step, raw, now()],
            )?;
            let removed = prune(conn, &thread_id, keep)?;
            if removed > 0 {
                debug!(thread_id = %thread_id, removed, "pruned old checkpoints");
            }
            Ok(())
        })
        .await
    }

    async fn delete(&self, thread_id: &str) -> Result<(), AgentError> {
        let thread_id = thread_id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM checkpoints WHERE thread_id = ?1", params![thread_id])?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl ThreadStore for SqliteStore {
    async fn ensure_thread(&self, thread_id: &str, title: Option<&str>) -> Result<(), AgentError> {
        let thread_id = thread_id.to_string();
        let title = title.map(derive_title);
        self.with_conn(move |conn| {
            let ts = now();
            conn.execute(
                "INSERT OR IGNORE INTO threads (id, title, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
                params![thread_id, title, ts],
            )?;
            conn.execute(
                "UPDATE threads SET title = ?2 WHERE id = ?1 AND title IS NULL",
                params![thread_id, title],
            )?;
            Ok(())
        })
        .await
    }

    async fn title(&self, thread_id: &str) -> Result<Option<String>, AgentError> {
        let thread_id = thread_id.to_string();
        self.with_conn(move |conn| {
            let title: Option<Option<String>> = conn
                .query_row(
                    "SELECT title FROM threads WHERE id = ?1",
                    params![thread_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(title.flatten())
        })
        .await
    }

    async fn append_messages(&self, thread_id: &str, messages: &[Message]) -> Result<(), AgentError> {
        let thread_id = thread_id.to_string();
        let messages = messages.to_vec();
        self.with_conn(move |conn| {
            let ts = now();
            let tx = conn.unchecked_transaction()?;
            for m in &messages {
                let tool_calls = if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(serde_json::to_string(&m.tool_calls)?)
                };
                tx.execute(
                    "INSERT OR IGNORE INTO messages
                        (id, thread_id, role, content, tool_calls, tool_call_id, name, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        m.id,
                        thread_id,
                        m.role.as_str(),
                        m.content,
                        tool_calls,
                        m.tool_call_id,
                        m.name,
                        ts
                    ],
                )?;
            }
            tx.execute(
                "UPDATE threads SET updated_at = ?2 WHERE id = ?1",
                params![thread_id, ts],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn load_messages(&self, thread_id: &str) -> Result<Vec<Message>, AgentError> {
        let thread_id = thread_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, role, content, tool_calls, tool_call_id, name
                 FROM messages WHERE thread_id = ?1 ORDER BY seq ASC",
            )?;
            let rows = stmt.query_map(params![thread_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (id, role, content, tool_calls, tool_call_id, name) = row?;
                let role = Role::parse(&role)
                    .ok_or_else(|| AgentError::Storage(format!("unknown role in messages: {role}")))?;
                let tool_calls: Vec<ToolCall> = match tool_calls {
                    Some(s) => serde_json::from_str(&s)?,
                    None => Vec::new(),
                };
                out.push(Message {
                    id,
                    role,
                    content,
                    tool_calls,
                    tool_call_id,
                    name,
                });
            }
            Ok(out)
        })
        .await
    }

    async fn save_report(&self, thread_id: &str, report: &ResearchReport) -> Result<String, AgentError> {
        let thread_id = thread_id.to_string();
        let report = report.clone();
        self.with_conn(move |conn| {
            let id = uuid::Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO research_reports (id, thread_id, title, summary, report, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    thread_id,
                    report.title,
                    report.summary,
                    serde_json::to_string(&report)?,
                    now()
                ],
            )?;
            Ok(id)
        })
        .await
    }

    async fn list_reports(&self, thread_id: &str) -> Result<Vec<ResearchReport>, AgentError> {
        let thread_id = thread_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT report FROM research_reports WHERE thread_id = ?1 ORDER BY rowid ASC",
            )?;
            let rows = stmt.query_map(params![thread_id], |row| row.get::<_, String>(0))?;
            let mut out = Vec::new();
            for raw in rows {
                out.push(serde_json::from_str(&raw?)?);
            }
            Ok(out)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ConversationState, Node};
    use serde_json::json;

    #[tokio::test]
    async fn test_latest_checkpoint_wins_and_prunes() {
        let store = SqliteStore::open_in_memory().unwrap().with_retention(2);
        for step in 1..=4 {
            let cp = Checkpoint::new("t", step, ConversationState::default(), Node::Agent, None);
            store.put(&cp).await.unwrap();
        }
        assert_eq!(store.get("t").await.unwrap().unwrap().step, 4);
        assert_eq!(store.checkpoint_count("t").await.unwrap(), 2);

        assert_eq!(store.cleanup_checkpoints("t", 1).await.unwrap(), 1);
        store.delete("t").await.unwrap();
        assert!(store.get("t").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reopen_file_keeps_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db/delve.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            let mut state = ConversationState::default();
            state.push_user("remember");
            store
                .put(&Checkpoint::new("t", 1, state, Node::Retrieve, None))
                .await
                .unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        let cp = store.get("t").await.unwrap().unwrap();
        assert_eq!(cp.state.messages()[0].content, "remember");
    }

    #[tokio::test]
    async fn test_thread_messages_and_reports() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.ensure_thread("t", Some("What is 15 * 37?")).await.unwrap();
        store.ensure_thread("t", Some("other")).await.unwrap();
        assert_eq!(store.title("t").await.unwrap().as_deref(), Some("What is 15 * 37?"));
        assert_eq!(store.title("missing").await.unwrap(), None);

        let call = Message::assistant_with_calls(
            "",
            vec![ToolCall::new("c1", "calculator", json!({"expression": "15*37"}))],
        );
        let result = Message::tool("c1", "calculator", "555");
        store
            .append_messages("t", &[Message::user("q"), call.clone(), result.clone()])
            .await
            .unwrap();
        store.append_messages("t", &[result]).await.unwrap();

        let loaded = store.load_messages("t").await.unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[1], call);
        assert_eq!(loaded[2].tool_call_id.as_deref(), Some("c1"));

        let report = ResearchReport {
            title: "AI safety".into(),
            summary: "s".into(),
            tags: vec!["ai".into()],
            ..Default::default()
        };
        store.save_report("t", &report).await.unwrap();
        assert_eq!(store.list_reports("t").await.unwrap(), vec![report]);
    }
}
