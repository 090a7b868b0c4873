//! The message envelope carried on every channel.
//!
//! Application payloads and protocol markers travel on the same FIFO
//! channel and are indistinguishable in transit order. The envelope
//! separates them with [`Content`] and tags every message with the
//! sender's channel epoch, so a receiver can tell pre-cut traffic from
//! post-cut traffic without trusting arrival order alone.

use crate::id::{ProcessId, SnapshotId};

/// Payload of a [`Message`]: either application data or a marker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Content<P> {
    /// An opaque application payload.
    Application(P),
    /// A snapshot marker delimiting the cut for the given round.
    Marker(SnapshotId),
}

/// An immutable message on a directed channel.
///
/// ## Epochs
///
/// `epoch` is the id of the last marker the sender had emitted on this
/// channel at the time the message was sent, or
/// [`SnapshotId::GENESIS`] if it has emitted none. A marker carries its
/// own round id as epoch. On a FIFO channel the receiver therefore sees
/// every application message with exactly the epoch of the last marker
/// it received from that sender; any other epoch is a reordering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message<P> {
    /// The sending process.
    pub sender: ProcessId,
    /// The sender's channel epoch when this message was sent.
    pub epoch: SnapshotId,
    /// Application payload or marker.
    pub content: Content<P>,
}

impl<P> Message<P> {
    /// Build an application message.
    pub fn application(sender: ProcessId, epoch: SnapshotId, payload: P) -> Self {
        Self {
            sender,
            epoch,
            content: Content::Application(payload),
        }
    }

    /// Build a marker for `snapshot`.
    pub fn marker(sender: ProcessId, snapshot: SnapshotId) -> Self {
        Self {
            sender,
            epoch: snapshot,
            content: Content::Marker(snapshot),
        }
    }

    /// Returns `true` if this is a marker.
    pub fn is_marker(&self) -> bool {
        matches!(self.content, Content::Marker(_))
    }

    /// The marker's round, if this is a marker.
    pub fn as_marker(&self) -> Option<SnapshotId> {
        match self.content {
            Content::Marker(id) => Some(id),
            Content::Application(_) => None,
        }
    }

    /// The application payload, if this is an application message.
    pub fn payload(&self) -> Option<&P> {
        match &self.content {
            Content::Application(p) => Some(p),
            Content::Marker(_) => None,
        }
    }
}
