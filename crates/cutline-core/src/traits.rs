//! Seams between the protocol and its external collaborators.

use std::fmt;

use crate::error::ChannelError;
use crate::id::{ChannelId, ProcessId};
use crate::message::Message;

/// The sending half of a unidirectional FIFO channel.
///
/// ## Contract
///
/// Messages handed to [`send`](Channel::send) are delivered to the
/// receiving process exactly once, in send order, with no loss. The
/// snapshot is only guaranteed consistent if this holds. Sends must not
/// block indefinitely from the protocol's point of view; an
/// implementation that cannot buffer returns [`ChannelError::Full`].
pub trait Channel<P>: Send {
    /// The directed channel this sender writes to.
    fn id(&self) -> ChannelId;

    /// Enqueue a message for delivery.
    fn send(&self, message: Message<P>) -> Result<(), ChannelError>;
}

/// Application state hosted by a process.
///
/// Application traffic is generated outside the protocol; a process only
/// applies its effects and captures the state on demand. Both hooks run
/// inside the process's single handler, so a capture can never observe a
/// half-applied message.
pub trait LocalState: Send + 'static {
    /// Application payload carried on channels.
    type Payload: Clone + Send + fmt::Debug + 'static;
    /// Opaque captured local state.
    type Snapshot: Clone + Send + fmt::Debug + 'static;

    /// Apply a delivered application message.
    fn on_deliver(&mut self, from: ProcessId, payload: &Self::Payload);

    /// Apply the sender-side effect of an application send.
    ///
    /// Called after the message has been accepted by the channel.
    fn on_send(&mut self, to: ProcessId, payload: &Self::Payload) {
        let _ = (to, payload);
    }

    /// Capture the current local state.
    fn capture(&self) -> Self::Snapshot;
}
