//! Per-process protocol counters.
//!
//! [`ProcessMetrics`] is owned by the process handler and copied out on
//! every status query. Counters are cumulative since the process started.

/// Traffic and fault counters for a single process.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessMetrics {
    /// Application messages accepted by an outgoing channel.
    pub app_sent: u64,
    /// Application messages applied to local state.
    pub app_delivered: u64,
    /// Application messages appended to a recording channel log.
    pub app_recorded: u64,
    /// Markers accepted by an outgoing channel.
    pub markers_sent: u64,
    /// Markers accepted by the recorder.
    pub markers_received: u64,
    /// Local captures taken (one per round this process joined).
    pub captures: u64,
    /// Rounds this process finished.
    pub rounds_completed: u64,
    /// Incoming traffic rejected with a protocol fault.
    pub faults: u64,
    /// Sends that failed at the transport.
    pub channel_failures: u64,
}
