//! 记忆层：消息模型、检查点存储（内存 / 文件 / SQLite）、线程持久化

pub mod checkpoint;
pub mod conversation;
pub mod persistence;
pub mod sqlite;
pub mod threads;

pub use checkpoint::{Checkpoint, CheckpointStore, MemoryCheckpointStore};
pub use conversation::{Message, Role, ToolCall};
pub use persistence::FileCheckpointStore;
pub use sqlite::SqliteStore;
pub use threads::{derive_title, MemoryThreadStore, ThreadStore};
