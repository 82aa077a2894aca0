use serde::{Deserialize, Serialize};

/// Connection state of one channel adapter.
///
/// Modeled as an explicit machine with named transitions so reconnect and
/// heartbeat races are structurally impossible: there is no way to be
/// "sort of connected" or to run two heartbeat loops for one logical
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterState {
    Disconnected,
    Connecting,
    Authenticated,
    Live,
    Reconnecting,
}

impl AdapterState {
    /// Whether `self → next` is a legal transition.
    pub fn can_transition(self, next: AdapterState) -> bool {
        use AdapterState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Authenticated)
                | (Connecting, Disconnected)
                | (Connecting, Reconnecting)
                | (Authenticated, Live)
                | (Authenticated, Reconnecting)
                | (Authenticated, Disconnected)
                | (Live, Reconnecting)
                | (Live, Disconnected)
                | (Reconnecting, Connecting)
                | (Reconnecting, Disconnected)
        )
    }
}

/// Tracks outstanding heartbeat acknowledgments while an adapter is `Live`.
///
/// Every sent heartbeat increments the outstanding count; an ack clears it.
/// Reaching the missed-ack threshold means the connection is a zombie and
/// must be forced through a reconnect, not left silently dead.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    outstanding: u32,
    missed_threshold: u32,
}

impl HeartbeatMonitor {
    pub fn new(missed_threshold: u32) -> Self {
        Self {
            outstanding: 0,
            missed_threshold: missed_threshold.max(1),
        }
    }

    /// Record a sent heartbeat. Returns true if the missed-ack threshold
    /// was reached and the connection must be torn down.
    pub fn on_sent(&mut self) -> bool {
        self.outstanding += 1;
        self.outstanding >= self.missed_threshold
    }

    /// Record an acknowledgment. All earlier heartbeats are covered by it.
    pub fn on_ack(&mut self) {
        self.outstanding = 0;
    }

    pub fn outstanding(&self) -> u32 {
        self.outstanding
    }

    /// Reset on reconnect: the new connection starts with a clean slate.
    pub fn reset(&mut self) {
        self.outstanding = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AdapterState::*;

    #[test]
    fn happy_path_transitions_are_legal() {
        assert!(Disconnected.can_transition(Connecting));
        assert!(Connecting.can_transition(Authenticated));
        assert!(Authenticated.can_transition(Live));
        assert!(Live.can_transition(Reconnecting));
        assert!(Reconnecting.can_transition(Connecting));
    }

    #[test]
    fn shortcut_transitions_are_illegal() {
        assert!(!Disconnected.can_transition(Live));
        assert!(!Disconnected.can_transition(Authenticated));
        assert!(!Connecting.can_transition(Live));
        assert!(!Live.can_transition(Authenticated));
        assert!(!Reconnecting.can_transition(Live));
    }

    #[test]
    fn every_connected_state_can_reach_disconnected_or_reconnecting() {
        for state in [Connecting, Authenticated, Live] {
            assert!(state.can_transition(Reconnecting) || state.can_transition(Disconnected));
        }
    }

    #[test]
    fn missed_ack_threshold_forces_reconnect() {
        let mut hb = HeartbeatMonitor::new(3);
        assert!(!hb.on_sent());
        assert!(!hb.on_sent());
        assert!(hb.on_sent());
    }

    #[test]
    fn ack_clears_all_outstanding_heartbeats() {
        let mut hb = HeartbeatMonitor::new(3);
        hb.on_sent();
        hb.on_sent();
        hb.on_ack();
        assert_eq!(hb.outstanding(), 0);
        assert!(!hb.on_sent());
    }

    #[test]
    fn reset_gives_a_new_connection_a_clean_slate() {
        let mut hb = HeartbeatMonitor::new(2);
        hb.on_sent();
        hb.reset();
        assert!(!hb.on_sent());
    }
}
