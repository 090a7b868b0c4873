//! The process registry: spawns one actor thread per process, wires the
//! links, and exposes the trigger and result interfaces.
//!
//! # Threads
//!
//! | Thread | Owns |
//! |--------|------|
//! | `cutline-p{n}` | the process's `LocalState`, `Recorder` and outgoing links |
//! | caller | the [`TerminationDetector`], behind a mutex |
//!
//! Processes talk to each other only through their links and to the
//! control plane only through the event channel. Commands from the
//! caller travel on a bounded control inbox per process, with replies on
//! bounded(1) channels.
//!
//! A round's records live in the control plane until its global snapshot
//! is handed out. After that the round is retired: asking for it again
//! returns [`ClusterError::Retired`].

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use cutline_core::{
    Channel, ChannelError, ChannelId, GlobalSnapshot, InvalidTransition, LocalState, Message,
    ProcessId, ProtocolFault, SnapshotId,
};

use crate::config::{ClusterConfig, ConfigError};
use crate::link::{link, Link};
use crate::metrics::ProcessMetrics;
use crate::process::{BoxChannel, Control, FaultReport, Mailbox, ProcessActor, ProcessStatus};
use crate::termination::{RoundStatus, TerminationDetector, HISTORY_LIMIT};

// ── Error types ──────────────────────────────────────────────────

/// Errors returned by [`Cluster`] operations.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ClusterError {
    /// No process with this id.
    #[error("unknown process {process}")]
    UnknownProcess {
        /// The requested id.
        process: ProcessId,
    },
    /// The process thread has stopped.
    #[error("cluster has shut down")]
    Shutdown,
    /// A send failed at the transport.
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// The request is not allowed in the current protocol state.
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
    /// The round hit a protocol fault and will not complete.
    #[error(transparent)]
    Protocol(#[from] ProtocolFault),
    /// `initiate_snapshot` while the previous round has not terminated.
    #[error("round {active} has not terminated: {} process(es) pending", pending.len())]
    RoundPending {
        /// The round still running.
        active: SnapshotId,
        /// Processes not yet `Done` in that round.
        pending: Vec<ProcessId>,
    },
    /// The round was already handed out, or a newer round was.
    #[error("snapshot {snapshot} was already retrieved")]
    Retired {
        /// The requested round.
        snapshot: SnapshotId,
    },
    /// The round has not terminated yet.
    #[error("snapshot {snapshot} is not ready: {} process(es) pending", pending.len())]
    NotReady {
        /// The requested round.
        snapshot: SnapshotId,
        /// Processes not yet `Done`.
        pending: Vec<ProcessId>,
    },
    /// The round did not terminate before the deadline.
    #[error("snapshot {snapshot} stalled: {} process(es) still pending", pending.len())]
    Stalled {
        /// The requested round.
        snapshot: SnapshotId,
        /// Processes not yet `Done`.
        pending: Vec<ProcessId>,
    },
}

// ── ShutdownReport ───────────────────────────────────────────────

/// Report from [`Cluster::shutdown`].
#[derive(Debug)]
pub struct ShutdownReport {
    /// Total time spent stopping and joining threads.
    pub total_ms: u64,
    /// Number of process threads joined.
    pub processes_joined: usize,
    /// Final counters of every joined process.
    pub metrics: IndexMap<ProcessId, ProcessMetrics>,
}

// ── Cluster ──────────────────────────────────────────────────────

struct ProcessHandle<P> {
    control: Sender<Control<P>>,
    thread: Option<JoinHandle<ProcessMetrics>>,
}

struct ControlPlane<P, S> {
    detector: TerminationDetector<P, S>,
    /// Last round started through this registry.
    last_round: SnapshotId,
}

/// A running set of processes connected by FIFO links.
pub struct Cluster<L: LocalState> {
    processes: IndexMap<ProcessId, ProcessHandle<L::Payload>>,
    links: IndexMap<ChannelId, Link<L::Payload>>,
    control: Mutex<ControlPlane<L::Payload, L::Snapshot>>,
    config: ClusterConfig,
    stopped: bool,
}

impl<L: LocalState> Cluster<L> {
    /// Validate `config`, wire every link, and start one thread per
    /// process. `factory` builds each process's initial local state.
    pub fn spawn(
        config: ClusterConfig,
        mut factory: impl FnMut(ProcessId) -> L,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let topology = &config.topology;

        let mut links = IndexMap::new();
        let mut receivers = IndexMap::new();
        for &edge in topology.edges() {
            let (tx, rx) = link(edge, config.channel_capacity);
            links.insert(edge, tx);
            receivers.insert(edge, rx);
        }

        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let mut processes = IndexMap::new();
        for id in topology.processes() {
            let outbound: IndexMap<ProcessId, BoxChannel<L::Payload>> = topology
                .outbound(id)
                .into_iter()
                .filter_map(|to| {
                    let tx = links.get(&ChannelId::new(id, to))?.clone();
                    Some((to, Box::new(tx) as BoxChannel<L::Payload>))
                })
                .collect();
            let inbound: Vec<(ProcessId, Receiver<Message<L::Payload>>)> = topology
                .inbound(id)
                .into_iter()
                .filter_map(|from| {
                    let rx = receivers.swap_remove(&ChannelId::new(from, id))?;
                    Some((from, rx))
                })
                .collect();

            let (control_tx, control_rx) = crossbeam_channel::bounded(config.control_capacity);
            let mailbox = Mailbox::new(control_rx, inbound);
            let peers: Vec<ProcessId> = mailbox.peers().collect();
            let actor = ProcessActor::new(id, factory(id), peers, outbound, events_tx.clone());

            let spawned = thread::Builder::new()
                .name(format!("cutline-{id}"))
                .spawn(move || actor.run(mailbox));
            match spawned {
                Ok(handle) => {
                    processes.insert(
                        id,
                        ProcessHandle {
                            control: control_tx,
                            thread: Some(handle),
                        },
                    );
                }
                Err(e) => {
                    warn!(process = %id, error = %e, "process thread spawn failed");
                    links.clear();
                    stop_all(&mut processes);
                    return Err(ConfigError::ThreadSpawnFailed {
                        reason: format!("process {id}: {e}"),
                    });
                }
            }
        }
        drop(events_tx);

        let participants = processes.keys().copied().collect();
        info!(
            processes = processes.len(),
            channels = links.len(),
            "cluster started"
        );
        Ok(Self {
            processes,
            links,
            control: Mutex::new(ControlPlane {
                detector: TerminationDetector::new(events_rx, participants),
                last_round: SnapshotId::GENESIS,
            }),
            config,
            stopped: false,
        })
    }

    /// Process ids in registration order.
    pub fn process_ids(&self) -> impl Iterator<Item = ProcessId> + '_ {
        self.processes.keys().copied()
    }

    /// The configuration this cluster was built from.
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Ask `from` to send an application message to `to`.
    ///
    /// Returns once the message is on the link and the sender's
    /// [`LocalState::on_send`] hook has run.
    pub fn send(
        &self,
        from: ProcessId,
        to: ProcessId,
        payload: L::Payload,
    ) -> Result<(), ClusterError> {
        self.request(from, |reply| Control::Send { to, payload, reply })??;
        Ok(())
    }

    /// Start a new round at `process` with the next free snapshot id.
    ///
    /// Rejected with [`ClusterError::RoundPending`], naming the processes
    /// that are not yet `Done`, while the previous round started through
    /// this cluster has not terminated.
    pub fn initiate_snapshot(&self, process: ProcessId) -> Result<SnapshotId, ClusterError> {
        let mut plane = self.plane();
        plane.detector.poll();
        let last = plane.last_round;
        let next = last.max(plane.detector.latest_round()).next();
        if !last.is_genesis() {
            if let RoundStatus::Pending(pending) = plane.detector.status(last) {
                return Err(ClusterError::RoundPending {
                    active: last,
                    pending,
                });
            }
        }
        self.request(process, |reply| Control::Initiate {
            snapshot: next,
            reply,
        })??;
        plane.last_round = next;
        Ok(next)
    }

    /// Initiate an explicit round id at `process`.
    ///
    /// Several processes may initiate the same round; each joins it.
    /// Returns whether `process` captured its state because of this call.
    pub fn initiate_round(
        &self,
        process: ProcessId,
        snapshot: SnapshotId,
    ) -> Result<bool, ClusterError> {
        let captured = self.request(process, |reply| Control::Initiate { snapshot, reply })??;
        let mut plane = self.plane();
        plane.last_round = plane.last_round.max(snapshot);
        Ok(captured)
    }

    /// The assembled snapshot for `snapshot`, if every process is `Done`.
    ///
    /// A successful call retires the round.
    pub fn get_snapshot(
        &self,
        snapshot: SnapshotId,
    ) -> Result<GlobalSnapshot<L::Payload, L::Snapshot>, ClusterError> {
        let mut plane = self.plane();
        plane.detector.poll();
        let status = plane.detector.status(snapshot);
        Self::finish(&mut plane, snapshot, status, false)
    }

    /// Block until `snapshot` terminates or `timeout` elapses.
    ///
    /// Other control-plane calls wait on the same lock meanwhile.
    pub fn wait_for_snapshot(
        &self,
        snapshot: SnapshotId,
        timeout: Duration,
    ) -> Result<GlobalSnapshot<L::Payload, L::Snapshot>, ClusterError> {
        let deadline = Instant::now() + timeout;
        let mut plane = self.plane();
        let status = plane.detector.wait_until(snapshot, deadline);
        Self::finish(&mut plane, snapshot, status, true)
    }

    /// [`Cluster::wait_for_snapshot`] bounded by the configured
    /// `default_wait`.
    pub fn await_snapshot(
        &self,
        snapshot: SnapshotId,
    ) -> Result<GlobalSnapshot<L::Payload, L::Snapshot>, ClusterError> {
        self.wait_for_snapshot(snapshot, self.config.default_wait)
    }

    /// Rounds whose records the control plane still holds.
    pub fn held_rounds(&self) -> usize {
        let mut plane = self.plane();
        plane.detector.poll();
        plane.detector.held_rounds()
    }

    fn finish(
        plane: &mut ControlPlane<L::Payload, L::Snapshot>,
        snapshot: SnapshotId,
        status: RoundStatus,
        waited: bool,
    ) -> Result<GlobalSnapshot<L::Payload, L::Snapshot>, ClusterError> {
        match status {
            RoundStatus::Complete => {
                let assembler = plane
                    .detector
                    .take(snapshot)
                    .ok_or(ClusterError::Retired { snapshot })?;
                let global = assembler.assemble()?;
                info!(
                    snapshot = %snapshot,
                    in_flight = global.in_flight_count(),
                    "global snapshot assembled"
                );
                Ok(global)
            }
            RoundStatus::Faulted(report) => Err(report.fault.into()),
            RoundStatus::Retired => Err(ClusterError::Retired { snapshot }),
            RoundStatus::Pending(pending) if waited => {
                Err(ClusterError::Stalled { snapshot, pending })
            }
            RoundStatus::Pending(pending) => Err(ClusterError::NotReady { snapshot, pending }),
        }
    }

    /// Phase, round and counters of `process`.
    pub fn status(&self, process: ProcessId) -> Result<ProcessStatus, ClusterError> {
        self.request(process, |reply| Control::Status { reply })
    }

    /// Protocol faults reported so far, oldest first. Only the newest
    /// [`HISTORY_LIMIT`] are kept.
    pub fn faults(&self) -> Vec<FaultReport> {
        let mut plane = self.plane();
        plane.detector.poll();
        plane.detector.faults().cloned().collect()
    }

    /// Transport failures reported so far, oldest first.
    pub fn channel_failures(&self) -> Vec<(ProcessId, ChannelError)> {
        let mut plane = self.plane();
        plane.detector.poll();
        plane.detector.channel_failures().cloned().collect()
    }

    /// Write a raw message onto the link `from -> to`, bypassing the
    /// sending process. Intended for fault injection.
    pub fn inject(
        &self,
        from: ProcessId,
        to: ProcessId,
        message: Message<L::Payload>,
    ) -> Result<(), ClusterError> {
        let channel = ChannelId::new(from, to);
        let tx = self
            .links
            .get(&channel)
            .ok_or(ChannelError::UnknownChannel { channel })?;
        debug!(channel = %channel, marker = message.is_marker(), "injecting message");
        tx.send(message)?;
        Ok(())
    }

    /// Stop every process and join its thread. Idempotent.
    pub fn shutdown(&mut self) -> ShutdownReport {
        if self.stopped {
            return ShutdownReport {
                total_ms: 0,
                processes_joined: 0,
                metrics: IndexMap::new(),
            };
        }
        let start = Instant::now();
        self.stopped = true;
        self.links.clear();
        let metrics = stop_all(&mut self.processes);
        let report = ShutdownReport {
            total_ms: start.elapsed().as_millis() as u64,
            processes_joined: metrics.len(),
            metrics,
        };
        info!(
            joined = report.processes_joined,
            total_ms = report.total_ms,
            "cluster stopped"
        );
        report
    }

    fn request<T>(
        &self,
        process: ProcessId,
        make: impl FnOnce(Sender<T>) -> Control<L::Payload>,
    ) -> Result<T, ClusterError> {
        let handle = self
            .processes
            .get(&process)
            .ok_or(ClusterError::UnknownProcess { process })?;
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        handle
            .control
            .send(make(reply_tx))
            .map_err(|_| ClusterError::Shutdown)?;
        reply_rx.recv().map_err(|_| ClusterError::Shutdown)
    }

    fn plane(&self) -> MutexGuard<'_, ControlPlane<L::Payload, L::Snapshot>> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<L: LocalState> Drop for Cluster<L> {
    fn drop(&mut self) {
        if !self.stopped {
            self.shutdown();
        }
    }
}

/// Send `Shutdown` to every process, then join them all.
fn stop_all<P>(
    processes: &mut IndexMap<ProcessId, ProcessHandle<P>>,
) -> IndexMap<ProcessId, ProcessMetrics> {
    for handle in processes.values() {
        let _ = handle.control.send(Control::Shutdown);
    }
    let mut metrics = IndexMap::new();
    for (id, handle) in processes.iter_mut() {
        if let Some(thread) = handle.thread.take() {
            match thread.join() {
                Ok(m) => {
                    metrics.insert(*id, m);
                }
                Err(_) => warn!(process = %id, "process thread panicked"),
            }
        }
    }
    metrics
}
