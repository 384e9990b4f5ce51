//! 转录持久化协作方
//!
//! 只约定 load/save 契约；默认实现为每会话一个 JSON 文件。持久化失败由
//! 调用方记录日志后吸收，不使当前轮失败：内存中的会话仍然正确，
//! 等待下一次成功保存。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::{CompactionMeta, Message};

/// list() 返回的会话概要
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSessionInfo {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub message_count: usize,
}

/// 持久化接口：save / load / delete / list
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    async fn save(
        &self,
        session_id: &str,
        messages: &[Message],
        meta: &CompactionMeta,
    ) -> Result<(), String>;

    /// 不存在的会话返回 Ok(None)，不是错误
    async fn load(&self, session_id: &str)
        -> Result<Option<(Vec<Message>, CompactionMeta)>, String>;

    async fn delete(&self, session_id: &str) -> Result<(), String>;

    async fn list(&self) -> Result<Vec<StoredSessionInfo>, String>;
}

/// 文件内容：消息 + 压缩元数据 + 创建时间
#[derive(Serialize, Deserialize)]
struct StoredSession {
    created_at: DateTime<Utc>,
    #[serde(default)]
    compaction: CompactionMeta,
    messages: Vec<Message>,
}

/// JSON 文件存储：目录下每会话一个 `<id>.json`
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        // 会话 ID 可能包含路径分隔符之类的字符，统一替换
        let safe: String = session_id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

#[async_trait]
impl TranscriptStore for JsonFileStore {
    async fn save(
        &self,
        session_id: &str,
        messages: &[Message],
        meta: &CompactionMeta,
    ) -> Result<(), String> {
        let path = self.path_for(session_id);
        // 保留已有文件的创建时间
        let created_at = match tokio::fs::read_to_string(&path).await {
            Ok(data) => serde_json::from_str::<StoredSession>(&data)
                .map(|s| s.created_at)
                .unwrap_or_else(|_| Utc::now()),
            Err(_) => Utc::now(),
        };
        let stored = StoredSession {
            created_at,
            compaction: meta.clone(),
            messages: messages.to_vec(),
        };
        let json = serde_json::to_string_pretty(&stored).map_err(|e| e.to_string())?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| e.to_string())?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| e.to_string())
    }

    async fn load(
        &self,
        session_id: &str,
    ) -> Result<Option<(Vec<Message>, CompactionMeta)>, String> {
        let path = self.path_for(session_id);
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.to_string()),
        };
        let stored: StoredSession = serde_json::from_str(&data).map_err(|e| e.to_string())?;
        Ok(Some((stored.messages, stored.compaction)))
    }

    async fn delete(&self, session_id: &str) -> Result<(), String> {
        match tokio::fs::remove_file(self.path_for(session_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn list(&self) -> Result<Vec<StoredSessionInfo>, String> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.to_string()),
        };
        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| e.to_string())? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(data) = tokio::fs::read_to_string(&path).await else {
                continue;
            };
            let Ok(stored) = serde_json::from_str::<StoredSession>(&data) else {
                tracing::warn!(path = %path.display(), "skipping unreadable session file");
                continue;
            };
            let id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            out.push(StoredSessionInfo {
                id,
                created_at: stored.created_at,
                message_count: stored.messages.len(),
            });
        }
        Ok(out)
    }
}

/// 空存储：丢弃所有写入（测试与无持久化运行场景）
#[derive(Default)]
pub struct NullStore;

#[async_trait]
impl TranscriptStore for NullStore {
    async fn save(
        &self,
        _session_id: &str,
        _messages: &[Message],
        _meta: &CompactionMeta,
    ) -> Result<(), String> {
        Ok(())
    }

    async fn load(
        &self,
        _session_id: &str,
    ) -> Result<Option<(Vec<Message>, CompactionMeta)>, String> {
        Ok(None)
    }

    async fn delete(&self, _session_id: &str) -> Result<(), String> {
        Ok(())
    }

    async fn list(&self) -> Result<Vec<StoredSessionInfo>, String> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());

        let messages = vec![Message::user("hi"), Message::assistant("hello")];
        let mut meta = CompactionMeta::default();
        meta.summary = Some("greeting".into());
        meta.compressed_message_count = 1;

        store.save("s1", &messages, &meta).await.unwrap();
        let (loaded, loaded_meta) = store.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded_meta.summary.as_deref(), Some("greeting"));
        assert_eq!(loaded_meta.compressed_message_count, 1);
    }

    #[tokio::test]
    async fn load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        assert!(store.load("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let meta = CompactionMeta::default();
        store.save("a", &[Message::user("1")], &meta).await.unwrap();
        store.save("b", &[Message::user("2")], &meta).await.unwrap();

        let mut ids: Vec<String> = store.list().await.unwrap().into_iter().map(|s| s.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);

        store.delete("a").await.unwrap();
        assert!(store.load("a").await.unwrap().is_none());
        // 删除不存在的会话不是错误
        store.delete("a").await.unwrap();
    }
}
