//! 计划持久化存储
//!
//! 磁盘上的工件就是序列化器的文本输出，一个会话一个 markdown 文件，无二进制
//! 格式。写入带版本标签：expected_version 与磁盘头部版本不一致时拒绝写入并
//! 返回 VersionConflict，提示丢失更新（如用户在外部改过文件），绝不静默覆盖。

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use thiserror::Error;

use crate::plan::parse::header_version;

/// 存储层错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("plan changed externally: expected version {expected}, found {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 计划存储 trait：按会话 id 读写序列化文本
pub trait PlanStore: Send + Sync {
    /// 读取会话的计划文本；不存在返回 None
    fn load(&self, session_id: &str) -> Result<Option<String>, StoreError>;

    /// 乐观写入：磁盘版本必须等于 expected_version；新会话（文件不存在）直接写入
    fn save(&self, session_id: &str, text: &str, expected_version: u64) -> Result<(), StoreError>;
}

/// 会话 id 里只保留可做文件名的字符
fn sanitize(session_id: &str) -> String {
    session_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

/// 文件存储：workspace/plans/<session>.md
pub struct FilePlanStore {
    root: PathBuf,
}

impl FilePlanStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("{}.md", sanitize(session_id)))
    }
}

impl PlanStore for FilePlanStore {
    fn load(&self, session_id: &str) -> Result<Option<String>, StoreError> {
        match std::fs::read_to_string(self.path_for(session_id)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, session_id: &str, text: &str, expected_version: u64) -> Result<(), StoreError> {
        let path = self.path_for(session_id);
        if let Ok(existing) = std::fs::read_to_string(&path) {
            // 头部缺版本号的旧文件按版本 1 对待，与解析端的默认一致
            let actual = header_version(&existing).unwrap_or(1);
            if actual != expected_version {
                return Err(StoreError::VersionConflict {
                    expected: expected_version,
                    actual,
                });
            }
        }
        std::fs::create_dir_all(&self.root)?;
        let mut f = std::fs::File::create(&path)?;
        f.write_all(text.as_bytes())?;
        Ok(())
    }
}

/// 内存存储：测试与无工作目录场景
#[derive(Default)]
pub struct MemoryPlanStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlanStore for MemoryPlanStore {
    fn load(&self, session_id: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(session_id).cloned())
    }

    fn save(&self, session_id: &str, text: &str, expected_version: u64) -> Result<(), StoreError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = entries.get(session_id) {
            let actual = header_version(existing).unwrap_or(1);
            if actual != expected_version {
                return Err(StoreError::VersionConflict {
                    expected: expected_version,
                    actual,
                });
            }
        }
        entries.insert(session_id.to_string(), text.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::model::Plan;
    use crate::plan::serialize::serialize;

    fn versioned_doc(version: u64) -> String {
        let mut p = Plan::new();
        p.metadata.version = version;
        serialize(&p)
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePlanStore::new(dir.path());
        assert!(store.load("s1").unwrap().is_none());

        let doc = versioned_doc(2);
        store.save("s1", &doc, 1).unwrap();
        assert_eq!(store.load("s1").unwrap().unwrap(), doc);
    }

    #[test]
    fn test_file_store_first_save_accepts_any_expected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePlanStore::new(dir.path());
        store.save("fresh", &versioned_doc(2), 1).unwrap();
    }

    #[test]
    fn test_stale_expected_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePlanStore::new(dir.path());
        // 第一次写入后磁盘版本为 2
        store.save("s1", &versioned_doc(2), 1).unwrap();
        // 用同一个过期的 expected_version 再写：检测到丢失更新
        let err = store.save("s1", &versioned_doc(2), 1).unwrap_err();
        match err {
            StoreError::VersionConflict { expected, actual } => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
            }
            other => panic!("expected VersionConflict, got {other:?}"),
        }
    }

    #[test]
    fn test_memory_store_conflict_semantics_match() {
        let store = MemoryPlanStore::new();
        store.save("s1", &versioned_doc(2), 1).unwrap();
        store.save("s1", &versioned_doc(3), 2).unwrap();
        assert!(matches!(
            store.save("s1", &versioned_doc(3), 2),
            Err(StoreError::VersionConflict { .. })
        ));
    }

    #[test]
    fn test_session_id_is_sanitized_for_filenames() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePlanStore::new(dir.path());
        store.save("../escape/../../etc", &versioned_doc(2), 1).unwrap();
        // 路径穿越字符被剥掉，文件落在根目录内
        assert!(store.load("../escape/../../etc").unwrap().is_some());
        assert!(dir.path().join("escapeetc.md").exists());
    }
}
