use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use courier_core::{Result, SessionKey, Turn};

/// One line of a session log file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum LogRecord {
    Turn(Turn),
    /// Consolidation watermark: turns up to this index have been folded
    /// into long-term memory.
    Watermark { consolidated_through: usize },
}

/// In-memory view of a session, derived from its log.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub turns: Vec<Turn>,
    pub consolidated_through: usize,
}

/// Append-only JSONL log for a single session.
///
/// Appends are one serialized record per line. A torn tail line fails to
/// parse on the next load and is skipped, so it is never observable as a
/// committed record.
pub struct SessionLog {
    path: PathBuf,
}

impl SessionLog {
    pub fn new(state_dir: &Path, key: &SessionKey) -> Self {
        let path = state_dir
            .join("sessions")
            .join(format!("{}.jsonl", key.file_stem()));
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append_turn(&self, turn: &Turn) -> Result<()> {
        self.append_record(&LogRecord::Turn(turn.clone()))
    }

    pub fn append_watermark(&self, consolidated_through: usize) -> Result<()> {
        self.append_record(&LogRecord::Watermark {
            consolidated_through,
        })
    }

    fn append_record(&self, record: &LogRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }

    /// Load the session state, tolerating per-record corruption.
    ///
    /// A record that fails to parse is skipped with a warning; the rest of
    /// the log still loads. If the file itself cannot be read, it is renamed
    /// aside with a `.corrupt` suffix and an empty session is returned,
    /// preserving the original bytes for inspection.
    pub fn load(&self) -> Result<SessionState> {
        if !self.path.exists() {
            return Ok(SessionState::default());
        }

        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                let aside = self.quarantine_path();
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    aside = %aside.display(),
                    "session log unreadable, quarantining"
                );
                std::fs::rename(&self.path, &aside)?;
                return Ok(SessionState::default());
            }
        };

        let mut state = SessionState::default();
        for (lineno, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogRecord>(line) {
                Ok(LogRecord::Turn(turn)) => state.turns.push(turn),
                Ok(LogRecord::Watermark {
                    consolidated_through,
                }) => state.consolidated_through = consolidated_through,
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        line = lineno + 1,
                        error = %e,
                        "skipping unparsable session record"
                    );
                }
            }
        }
        Ok(state)
    }

    fn quarantine_path(&self) -> PathBuf {
        self.path.with_extension("jsonl.corrupt")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::Role;

    fn key() -> SessionKey {
        SessionKey::new("telegram", "chat-42")
    }

    #[test]
    fn append_then_load_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::new(dir.path(), &key());

        log.append_turn(&Turn::text(Role::User, "one")).unwrap();
        log.append_turn(&Turn::text(Role::Assistant, "two")).unwrap();
        log.append_turn(&Turn::text(Role::User, "three")).unwrap();

        let state = log.load().unwrap();
        let contents: Vec<_> = state.turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, ["one", "two", "three"]);
    }

    #[test]
    fn one_bad_record_among_five_loads_the_other_four() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::new(dir.path(), &key());

        log.append_turn(&Turn::text(Role::User, "a")).unwrap();
        log.append_turn(&Turn::text(Role::Assistant, "b")).unwrap();

        // Corrupt one record in the middle.
        let raw = std::fs::read_to_string(log.path()).unwrap();
        let mut lines: Vec<String> = raw.lines().map(String::from).collect();
        lines.insert(1, "{\"kind\":\"turn\",\"garbage".to_string());
        std::fs::write(log.path(), lines.join("\n")).unwrap();

        log.append_turn(&Turn::text(Role::User, "c")).unwrap();
        log.append_turn(&Turn::text(Role::Assistant, "d")).unwrap();

        let state = log.load().unwrap();
        assert_eq!(state.turns.len(), 4);
    }

    #[test]
    fn torn_tail_line_is_not_a_committed_record() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::new(dir.path(), &key());

        log.append_turn(&Turn::text(Role::User, "full")).unwrap();

        // Simulate a crash mid-append.
        let mut raw = std::fs::read_to_string(log.path()).unwrap();
        raw.push_str("{\"kind\":\"turn\",\"role\":\"assi");
        std::fs::write(log.path(), raw).unwrap();

        let state = log.load().unwrap();
        assert_eq!(state.turns.len(), 1);
        assert_eq!(state.turns[0].content, "full");
    }

    #[test]
    fn unreadable_log_is_quarantined_not_destroyed() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::new(dir.path(), &key());

        log.append_turn(&Turn::text(Role::User, "x")).unwrap();
        let original = std::fs::read(log.path()).unwrap();

        // Invalid UTF-8 makes the whole file unreadable as text.
        std::fs::write(log.path(), [0xff, 0xfe, 0x00, 0xff]).unwrap();

        let state = log.load().unwrap();
        assert!(state.turns.is_empty());

        let aside = log.path().with_extension("jsonl.corrupt");
        assert!(aside.exists());
        assert!(!log.path().exists());
        assert_ne!(std::fs::read(&aside).unwrap(), original);
    }

    #[test]
    fn watermark_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::new(dir.path(), &key());

        for i in 0..6 {
            log.append_turn(&Turn::text(Role::User, format!("turn {i}")))
                .unwrap();
        }
        log.append_watermark(4).unwrap();

        let state = log.load().unwrap();
        assert_eq!(state.turns.len(), 6);
        assert_eq!(state.consolidated_through, 4);
    }
}
