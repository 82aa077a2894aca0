use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use courier_core::{Result, SessionKey, Turn};

use crate::log::{SessionLog, SessionState};

struct CacheEntry {
    state: SessionState,
    last_access: Instant,
}

/// Session store: durable JSONL logs plus a derived in-memory cache.
///
/// The log is the source of truth. Appends hit the log before the cache, so
/// a crash between the two loses nothing. Cache eviction (LRU over capacity,
/// TTL on access) only drops the in-memory copy; the next load rereads the
/// log.
pub struct SessionStore {
    state_dir: PathBuf,
    cache: Mutex<HashMap<SessionKey, CacheEntry>>,
    max_sessions: usize,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(state_dir: &Path, max_sessions: usize, ttl: Duration) -> Self {
        Self {
            state_dir: state_dir.to_path_buf(),
            cache: Mutex::new(HashMap::new()),
            max_sessions: max_sessions.max(1),
            ttl,
        }
    }

    fn log_for(&self, key: &SessionKey) -> SessionLog {
        SessionLog::new(&self.state_dir, key)
    }

    /// Append a turn: committed once the log write returns.
    pub fn append(&self, key: &SessionKey, turn: &Turn) -> Result<()> {
        self.log_for(key).append_turn(turn)?;

        let mut cache = self.cache.lock();
        if let Some(entry) = cache.get_mut(key) {
            entry.state.turns.push(turn.clone());
            entry.last_access = Instant::now();
        }
        Ok(())
    }

    /// Record that turns up to `consolidated_through` were folded into
    /// long-term memory.
    pub fn set_watermark(&self, key: &SessionKey, consolidated_through: usize) -> Result<()> {
        self.log_for(key).append_watermark(consolidated_through)?;

        let mut cache = self.cache.lock();
        if let Some(entry) = cache.get_mut(key) {
            entry.state.consolidated_through = consolidated_through;
            entry.last_access = Instant::now();
        }
        Ok(())
    }

    /// Load a session, serving from cache when the entry is still fresh.
    pub fn load(&self, key: &SessionKey) -> Result<SessionState> {
        {
            let mut cache = self.cache.lock();
            if let Some(entry) = cache.get_mut(key) {
                if entry.last_access.elapsed() < self.ttl {
                    entry.last_access = Instant::now();
                    return Ok(entry.state.clone());
                }
                // Stale entry: drop it and reread the log below.
                cache.remove(key);
            }
        }

        let state = self.log_for(key).load()?;
        let mut cache = self.cache.lock();
        cache.insert(
            key.clone(),
            CacheEntry {
                state: state.clone(),
                last_access: Instant::now(),
            },
        );
        Self::evict_over_capacity(&mut cache, self.max_sessions);
        Ok(state)
    }

    /// Number of sessions currently held in the cache.
    pub fn cached_sessions(&self) -> usize {
        self.cache.lock().len()
    }

    fn evict_over_capacity(cache: &mut HashMap<SessionKey, CacheEntry>, max: usize) {
        while cache.len() > max {
            let oldest = cache
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    debug!(session = %key, "evicting session from cache");
                    cache.remove(&key);
                }
                None => break,
            }
        }
    }
}
