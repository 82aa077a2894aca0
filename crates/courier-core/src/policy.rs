use serde::{Deserialize, Serialize};

/// Per-channel sender allow-list.
///
/// The default is deny-all: an empty list with `allow_all = false` rejects
/// every sender. There is deliberately no constructor or deserialization
/// path that yields an open policy without `allow_all` being set explicitly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessPolicy {
    pub allow_all: bool,
    pub allow_list: Vec<String>,
}

impl AccessPolicy {
    pub fn deny_all() -> Self {
        Self::default()
    }

    pub fn allow(senders: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            allow_all: false,
            allow_list: senders.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether a sender identity is admitted. Every inbound path, including
    /// help/introspection commands, goes through this check.
    pub fn permits(&self, sender: &str) -> bool {
        self.allow_all || self.allow_list.iter().any(|s| s == sender)
    }
}
