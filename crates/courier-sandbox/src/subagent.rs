use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use courier_core::{CourierError, Result};

/// Concurrency gate for sub-agent spawns.
///
/// The cap is enforced by a semaphore: when every slot is taken, spawning
/// fails fast with [`CourierError::SubAgentLimit`] instead of queuing
/// unbounded work. Each admitted spawn gets a cancellation token derived
/// from its parent, so sub-agents never outlive the invocation that
/// spawned them.
pub struct SubAgentGate {
    slots: Arc<Semaphore>,
    max: usize,
}

/// Held for the lifetime of one running sub-agent; dropping it frees the
/// slot.
#[derive(Debug)]
pub struct SubAgentSlot {
    _permit: OwnedSemaphorePermit,
    pub cancel: CancellationToken,
}

impl SubAgentGate {
    pub fn new(max: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    pub fn admit(&self, parent: &CancellationToken) -> Result<SubAgentSlot> {
        match Arc::clone(&self.slots).try_acquire_owned() {
            Ok(permit) => Ok(SubAgentSlot {
                _permit: permit,
                cancel: parent.child_token(),
            }),
            Err(_) => Err(CourierError::SubAgentLimit { max: self.max }),
        }
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exceeding_the_cap_fails_fast() {
        let gate = SubAgentGate::new(2);
        let parent = CancellationToken::new();

        let a = gate.admit(&parent).unwrap();
        let _b = gate.admit(&parent).unwrap();

        let err = gate.admit(&parent).unwrap_err();
        assert!(matches!(err, CourierError::SubAgentLimit { max: 2 }));

        drop(a);
        assert!(gate.admit(&parent).is_ok());
    }

    #[test]
    fn cancelling_the_parent_cancels_the_slot() {
        let gate = SubAgentGate::new(1);
        let parent = CancellationToken::new();
        let slot = gate.admit(&parent).unwrap();

        assert!(!slot.cancel.is_cancelled());
        parent.cancel();
        assert!(slot.cancel.is_cancelled());
    }

    #[test]
    fn zero_capacity_rejects_every_spawn() {
        let gate = SubAgentGate::new(0);
        let parent = CancellationToken::new();
        assert!(gate.admit(&parent).is_err());
    }
}
