//! Core types and traits for the Cutline snapshot protocol.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the vocabulary shared by the rest of the workspace: process, round and
//! channel identifiers, the message envelope, recorded channel state, the
//! assembled global snapshot, the error taxonomy, and the seams to the
//! transport ([`Channel`]) and to application state ([`LocalState`]).

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod channel;
pub mod error;
pub mod id;
pub mod message;
pub mod snapshot;
pub mod traits;

pub use channel::ChannelState;
pub use error::{ChannelError, InvalidTransition, ProtocolFault};
pub use id::{ChannelId, ProcessId, SnapshotId};
pub use message::{Content, Message};
pub use snapshot::{GlobalSnapshot, ProcessRecord};
pub use traits::{Channel, LocalState};
