use serde::{Deserialize, Serialize};

/// Stable identifier for one ongoing conversation: transport + conversation
/// identity (chat id, group id, email thread, …).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub transport: String,
    pub conversation: String,
}

impl SessionKey {
    pub fn new(transport: impl Into<String>, conversation: impl Into<String>) -> Self {
        Self {
            transport: transport.into(),
            conversation: conversation.into(),
        }
    }

    /// Filesystem-safe form of the key, used for the session log filename.
    /// Anything outside `[A-Za-z0-9._-]` becomes `_`.
    pub fn file_stem(&self) -> String {
        format!("{}-{}", self.transport, self.conversation)
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.transport, self.conversation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_transport_colon_conversation() {
        let key = SessionKey::new("telegram", "12345");
        assert_eq!(key.to_string(), "telegram:12345");
    }

    #[test]
    fn file_stem_sanitizes_unsafe_chars() {
        let key = SessionKey::new("email", "alice@example.com/inbox");
        assert_eq!(key.file_stem(), "email-alice_example.com_inbox");
    }

    #[test]
    fn keys_are_hashable_and_comparable() {
        let a = SessionKey::new("matrix", "!room:server");
        let b = SessionKey::new("matrix", "!room:server");
        assert_eq!(a, b);
        let mut set = std::collections::HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }
}
