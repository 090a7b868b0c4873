//! Per-incoming-channel recorded message log.

use crate::id::ProcessId;

/// The recorded state of one incoming channel, as observed by its
/// receiving process.
///
/// Created empty when the process is constructed. Appended to only while
/// the channel is recording; frozen the instant that channel's marker
/// arrives. A frozen log refuses further appends until the next round
/// resets it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelState<P> {
    channel_id: ProcessId,
    messages: Vec<P>,
    frozen: bool,
}

impl<P> ChannelState<P> {
    /// An empty, unfrozen log for the channel from `sender`.
    pub fn new(sender: ProcessId) -> Self {
        Self {
            channel_id: sender,
            messages: Vec::new(),
            frozen: false,
        }
    }

    /// The sender at the other end of this channel.
    pub fn channel_id(&self) -> ProcessId {
        self.channel_id
    }

    /// Recorded application messages, in arrival (= send) order.
    pub fn messages(&self) -> &[P] {
        &self.messages
    }

    /// Number of recorded messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether the marker for the current round has arrived.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Append a message. Returns `false` (and drops nothing into the log)
    /// if the log is frozen.
    pub fn record(&mut self, message: P) -> bool {
        if self.frozen {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Stop accepting messages for this round.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Clear the log and unfreeze it for a new round.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.frozen = false;
    }
}

impl<P: Clone> ChannelState<P> {
    /// Copy out the recorded messages.
    pub fn to_vec(&self) -> Vec<P> {
        self.messages.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn log_is_exactly_the_prefix_before_freeze(
            msgs in proptest::collection::vec(any::<u32>(), 0..40),
            cut in 0usize..40,
        ) {
            let cut = cut.min(msgs.len());
            let mut log = ChannelState::new(ProcessId(0));
            for (i, m) in msgs.iter().enumerate() {
                if i == cut {
                    log.freeze();
                }
                log.record(*m);
            }
            if cut == msgs.len() {
                log.freeze();
            }
            prop_assert_eq!(log.messages(), &msgs[..cut]);
        }
    }

    #[test]
    fn frozen_log_rejects_appends() {
        let mut log = ChannelState::new(ProcessId(3));
        assert!(log.record(1));
        assert!(log.record(2));
        log.freeze();
        assert!(!log.record(3));
        assert_eq!(log.messages(), &[1, 2]);
        assert!(log.is_frozen());
        assert_eq!(log.channel_id(), ProcessId(3));
    }

    #[test]
    fn reset_clears_and_unfreezes() {
        let mut log = ChannelState::new(ProcessId(0));
        log.record("m");
        log.freeze();
        log.reset();
        assert!(log.is_empty());
        assert!(!log.is_frozen());
        assert!(log.record("n"));
        assert_eq!(log.len(), 1);
    }
}
