use std::collections::HashMap;

use tracing::warn;

use courier_core::{AccessPolicy, CourierError, Result};

/// Per-channel sender authorization.
///
/// Evaluated in the manager before an event reaches the inbound bus. There
/// is deliberately no bypass for "administrative" or help commands: every
/// inbound path goes through [`AccessController::check`]. A channel with no
/// configured policy denies everyone.
pub struct AccessController {
    policies: HashMap<String, AccessPolicy>,
}

impl AccessController {
    pub fn new(policies: HashMap<String, AccessPolicy>) -> Self {
        Self { policies }
    }

    pub fn check(&self, channel_id: &str, sender: &str) -> Result<()> {
        let permitted = self
            .policies
            .get(channel_id)
            .is_some_and(|policy| policy.permits(sender));
        if permitted {
            Ok(())
        } else {
            warn!(channel = channel_id, sender, "sender rejected by access policy");
            Err(CourierError::AccessDenied {
                channel: channel_id.into(),
                sender: sender.into(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> AccessController {
        let mut policies = HashMap::new();
        policies.insert("tg".to_string(), AccessPolicy::allow(["alice"]));
        policies.insert("open".to_string(), AccessPolicy {
            allow_all: true,
            allow_list: vec![],
        });
        AccessController::new(policies)
    }

    #[test]
    fn listed_sender_is_admitted() {
        assert!(controller().check("tg", "alice").is_ok());
    }

    #[test]
    fn unlisted_sender_is_rejected() {
        let err = controller().check("tg", "mallory").unwrap_err();
        assert!(matches!(err, CourierError::AccessDenied { .. }));
    }

    #[test]
    fn unknown_channel_denies_everyone() {
        assert!(controller().check("nope", "alice").is_err());
    }

    #[test]
    fn allow_all_channel_admits_anyone() {
        assert!(controller().check("open", "whoever").is_ok());
    }

    #[test]
    fn denial_error_reveals_no_internal_detail() {
        let err = controller().check("tg", "mallory").unwrap_err();
        let rendered = err.to_string();
        assert!(!rendered.contains("allow_list"));
        assert!(!rendered.contains("policy"));
    }
}
