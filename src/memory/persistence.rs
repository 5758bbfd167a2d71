//! 检查点文件持久化
//!
//! 每个线程一个 JSON 文件（`<dir>/<thread_id>.json`），写入先落临时文件再 rename，
//! 进程在写一半时退出也不会留下损坏的快照。目录不存在时自动创建。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::core::AgentError;
use crate::memory::{Checkpoint, CheckpointStore};

#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// thread_id 中非字母数字字符替换为 `_`，避免路径穿越
    fn path_for(&self, thread_id: &str) -> PathBuf {
        let safe: String = thread_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

fn io_err(e: std::io::Error) -> AgentError {
    AgentError::Storage(format!("io: {e}"))
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>, AgentError> {
        let path = self.path_for(thread_id);
        let data = match fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(e)),
        };
        Ok(Some(serde_json::from_str(&data)?))
    }

    async fn put(&self, checkpoint: &Checkpoint) -> Result<(), AgentError> {
        fs::create_dir_all(&self.dir).await.map_err(io_err)?;
        let path = self.path_for(&checkpoint.thread_id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(checkpoint)?)
            .await
            .map_err(io_err)?;
        fs::rename(&tmp, &path).await.map_err(io_err)?;
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<(), AgentError> {
        match fs::remove_file(self.path_for(thread_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(e)),
        }
    }
}
