//! In-process FIFO links backed by crossbeam channels.
//!
//! A crossbeam channel is FIFO per sender and never duplicates, which is
//! exactly the contract [`Channel`] asks for. Each directed edge of the
//! topology gets its own channel so per-channel order is never mixed with
//! traffic from other senders.

use crossbeam_channel::{Receiver, Sender, TrySendError};

use cutline_core::{Channel, ChannelError, ChannelId, Message};

/// Sending half of one directed link.
#[derive(Debug)]
pub struct Link<P> {
    id: ChannelId,
    tx: Sender<Message<P>>,
}

impl<P> Clone for Link<P> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            tx: self.tx.clone(),
        }
    }
}

impl<P: Send> Channel<P> for Link<P> {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn send(&self, message: Message<P>) -> Result<(), ChannelError> {
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => ChannelError::Full { channel: self.id },
            TrySendError::Disconnected(_) => ChannelError::Disconnected { channel: self.id },
        })
    }
}

/// Create a link for `id`. `None` capacity means unbounded.
pub fn link<P>(id: ChannelId, capacity: Option<usize>) -> (Link<P>, Receiver<Message<P>>) {
    let (tx, rx) = match capacity {
        Some(cap) => crossbeam_channel::bounded(cap),
        None => crossbeam_channel::unbounded(),
    };
    (Link { id, tx }, rx)
}
