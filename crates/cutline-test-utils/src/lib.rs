//! Test utilities for Cutline development.
//!
//! Provides reference [`LocalState`](cutline_core::LocalState) fixtures
//! ([`Bank`], [`Chatter`]) and a deterministic single-threaded network
//! [`Simulation`] that drives real recorders under a seeded scheduler.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;
pub mod sim;

pub use fixtures::{total_money, Bank, Chatter};
pub use sim::{Node, Simulation};
