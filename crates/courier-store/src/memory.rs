use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::warn;

use courier_core::Result;

use crate::atomic::write_json_atomic;

/// One consolidated memory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Session key the entry was consolidated from.
    pub session: String,
    pub content: String,
    pub recorded_at: DateTime<Utc>,
}

/// The workspace-scoped long-term memory document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryDoc {
    pub entries: Vec<MemoryEntry>,
    pub updated_at: DateTime<Utc>,
}

impl Default for MemoryDoc {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

impl MemoryDoc {
    pub fn push(&mut self, session: impl Into<String>, content: impl Into<String>) {
        self.entries.push(MemoryEntry {
            session: session.into(),
            content: content.into(),
            recorded_at: Utc::now(),
        });
        self.updated_at = Utc::now();
    }

    /// Render the document for prompt injection.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("- [{}] {}", e.session, e.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Long-term memory: one JSON document per workspace, mutated only through
/// a single serialized writer.
///
/// Readers go straight to the file; the atomic rename in
/// [`write_json_atomic`] guarantees they see either the pre- or
/// post-consolidation version, never a partial one.
pub struct LongTermMemory {
    path: PathBuf,
    writer: Mutex<()>,
}

impl LongTermMemory {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join("memory.json"),
            writer: Mutex::new(()),
        }
    }

    /// Read the current document without taking the writer lock.
    ///
    /// An unparsable document is quarantined with a `.corrupt` suffix and
    /// replaced by an empty one, never silently destroyed.
    pub fn read(&self) -> Result<MemoryDoc> {
        if !self.path.exists() {
            return Ok(MemoryDoc::default());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        match serde_json::from_str(&raw) {
            Ok(doc) => Ok(doc),
            Err(e) => {
                let aside = self.path.with_extension("json.corrupt");
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    aside = %aside.display(),
                    "memory document unparsable, quarantining"
                );
                std::fs::rename(&self.path, &aside)?;
                Ok(MemoryDoc::default())
            }
        }
    }

    /// Acquire the workspace-wide writer lock and snapshot the current
    /// document. The lock is held until the guard drops, on every exit
    /// path; an uncommitted guard leaves the file untouched.
    pub async fn begin_write(&self) -> Result<MemoryWriteGuard<'_>> {
        let lock = self.writer.lock().await;
        let doc = self.read()?;
        Ok(MemoryWriteGuard {
            _lock: lock,
            path: &self.path,
            doc,
        })
    }
}

/// Exclusive write session over the memory document.
pub struct MemoryWriteGuard<'a> {
    _lock: MutexGuard<'a, ()>,
    path: &'a Path,
    doc: MemoryDoc,
}

impl MemoryWriteGuard<'_> {
    pub fn doc(&self) -> &MemoryDoc {
        &self.doc
    }

    pub fn doc_mut(&mut self) -> &mut MemoryDoc {
        &mut self.doc
    }

    /// Atomically replace the on-disk document with this guard's copy.
    pub fn commit(mut self) -> Result<()> {
        self.doc.updated_at = Utc::now();
        write_json_atomic(self.path, &self.doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn commit_persists_and_read_sees_it() {
        let dir = tempfile::tempdir().unwrap();
        let memory = LongTermMemory::new(dir.path());

        let mut guard = memory.begin_write().await.unwrap();
        guard.doc_mut().push("telegram:chat-1", "user prefers metric units");
        guard.commit().unwrap();

        let doc = memory.read().unwrap();
        assert_eq!(doc.entries.len(), 1);
        assert_eq!(doc.entries[0].content, "user prefers metric units");
    }

    #[tokio::test]
    async fn concurrent_writers_both_land() {
        let dir = tempfile::tempdir().unwrap();
        let memory = Arc::new(LongTermMemory::new(dir.path()));

        let mut handles = Vec::new();
        for i in 0..2 {
            let memory = Arc::clone(&memory);
            handles.push(tokio::spawn(async move {
                let mut guard = memory.begin_write().await.unwrap();
                // Yield between read and write: without the writer lock this
                // interleaving would let the last committer win.
                tokio::task::yield_now().await;
                guard.doc_mut().push(format!("session-{i}"), format!("fact {i}"));
                guard.commit().unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let doc = memory.read().unwrap();
        assert_eq!(doc.entries.len(), 2);
    }

    #[tokio::test]
    async fn dropped_guard_releases_lock_and_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let memory = LongTermMemory::new(dir.path());

        {
            let mut guard = memory.begin_write().await.unwrap();
            guard.doc_mut().push("s", "never committed");
            // Summarization failed: guard drops without commit.
        }

        assert!(memory.read().unwrap().entries.is_empty());

        // Lock must be free again.
        let guard = memory.begin_write().await.unwrap();
        drop(guard);
    }

    #[tokio::test]
    async fn unparsable_document_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let memory = LongTermMemory::new(dir.path());
        std::fs::write(dir.path().join("memory.json"), "not json at all").unwrap();

        let doc = memory.read().unwrap();
        assert!(doc.entries.is_empty());
        assert!(dir.path().join("memory.json.corrupt").exists());
    }
}
