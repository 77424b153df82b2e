//! The compute device seam and a reference CPU implementation.
//!
//! A [`ComputeDevice`] accepts the posted position buffer, evaluates the
//! surface kernel on it, and later delivers a copy of the results. Delivery
//! is a message: each readback request carries a [`ReadbackNotifier`] that
//! the device consumes exactly once, from any thread, whenever the transfer
//! resolves. The engine drains those messages on its own thread; nothing
//! ever blocks on a transfer.
//!
//! The channel is bounded. A notifier that finds it full hands itself back
//! as [`Undelivered`] and the device retries on a later frame.

use crate::id::TransferId;
use crate::point::QueryPoint;
use glam::Vec3;
use std::collections::VecDeque;
use std::fmt;
use std::sync::mpsc::{SyncSender, TrySendError};

// ---------------------------------------------------------------------------
// Completion messages
// ---------------------------------------------------------------------------

/// How a readback resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadbackOutcome {
    /// The transfer finished; one result per posted query, in posted order.
    Completed(Vec<Vec3>),
    /// The transport reported an error. No data.
    Failed,
}

/// A resolved readback, as drained by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadbackEvent {
    pub transfer: TransferId,
    pub outcome: ReadbackOutcome,
}

/// One-shot sender for a single readback's outcome.
///
/// Dropping a notifier without resolving it reports [`ReadbackOutcome::Failed`],
/// so a device that is torn down mid-transfer still frees the engine's slot.
/// That last report is lost if the channel is full at the time.
pub struct ReadbackNotifier {
    transfer: TransferId,
    sender: Option<SyncSender<ReadbackEvent>>,
}

/// An outcome the engine had no room for. Call [`retry`](Self::retry) once
/// the engine has drained its completions.
#[derive(Debug)]
pub struct Undelivered {
    pub notifier: ReadbackNotifier,
    pub outcome: ReadbackOutcome,
}

impl Undelivered {
    pub fn retry(self) -> Result<(), Undelivered> {
        self.notifier.resolve(self.outcome)
    }
}

impl ReadbackNotifier {
    pub(crate) fn new(transfer: TransferId, sender: SyncSender<ReadbackEvent>) -> Self {
        Self {
            transfer,
            sender: Some(sender),
        }
    }

    pub fn transfer(&self) -> TransferId {
        self.transfer
    }

    pub fn complete(self, results: Vec<Vec3>) -> Result<(), Undelivered> {
        self.resolve(ReadbackOutcome::Completed(results))
    }

    pub fn fail(self) -> Result<(), Undelivered> {
        self.resolve(ReadbackOutcome::Failed)
    }

    /// Report `outcome`. On a full channel the notifier comes back unspent.
    pub fn resolve(mut self, outcome: ReadbackOutcome) -> Result<(), Undelivered> {
        let Some(sender) = self.sender.take() else {
            return Ok(());
        };
        let event = ReadbackEvent {
            transfer: self.transfer,
            outcome,
        };
        match sender.try_send(event) {
            Err(TrySendError::Full(event)) => {
                self.sender = Some(sender);
                Err(Undelivered {
                    notifier: self,
                    outcome: event.outcome,
                })
            }
            // The engine may already be gone; nobody is left to tell.
            Ok(()) | Err(TrySendError::Disconnected(_)) => Ok(()),
        }
    }
}

impl Drop for ReadbackNotifier {
    fn drop(&mut self) {
        let Some(sender) = self.sender.take() else {
            return;
        };
        let event = ReadbackEvent {
            transfer: self.transfer,
            outcome: ReadbackOutcome::Failed,
        };
        if let Err(TrySendError::Full(_)) = sender.try_send(event) {
            log::warn!(
                "{}: completion queue full, dropped failure report",
                self.transfer
            );
        }
    }
}

impl fmt::Debug for ReadbackNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadbackNotifier")
            .field("transfer", &self.transfer)
            .field("resolved", &self.sender.is_none())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ComputeDevice trait
// ---------------------------------------------------------------------------

/// The device that evaluates the surface kernel.
///
/// `maintain` and `release` default to no-ops so devices only override what
/// they need.
pub trait ComputeDevice {
    /// Upload the populated prefix of the position buffer and run the kernel.
    fn dispatch(&mut self, queries: &[QueryPoint]);

    /// Start an asynchronous copy of the first `count` results. The outcome
    /// must be reported through `notifier`, retrying any [`Undelivered`]
    /// report on a later `maintain`.
    fn request_readback(&mut self, count: usize, notifier: ReadbackNotifier);

    /// Called once per frame before completions are drained.
    fn maintain(&mut self) {}

    /// Free device buffers. Pending transfers may still resolve afterwards.
    fn release(&mut self) {}
}

// ---------------------------------------------------------------------------
// CpuDevice
// ---------------------------------------------------------------------------

/// A surface kernel evaluated on the CPU: maps one query to one result.
pub type Kernel = Box<dyn FnMut(&QueryPoint) -> Vec3>;

struct PendingTransfer {
    notifier: ReadbackNotifier,
    results: Vec<Vec3>,
    frames_waited: u32,
}

/// Reference device that runs a [`Kernel`] closure on dispatch.
///
/// Readbacks either resolve automatically after a fixed number of
/// `maintain` calls ([`CpuDevice::with_latency`]) or wait until the owner
/// resolves them by hand ([`CpuDevice::new`]), which lets tests reorder and
/// fail transfers at will.
///
/// Resolved transfers the engine has no room for wait in a backlog, which
/// is flushed in order by `maintain` and [`flush_backlog`](Self::flush_backlog).
pub struct CpuDevice {
    kernel: Kernel,
    results: Vec<Vec3>,
    pending: VecDeque<PendingTransfer>,
    backlog: VecDeque<Undelivered>,
    latency: Option<u32>,
    dispatch_count: u64,
}

impl CpuDevice {
    /// A device whose readbacks only resolve through [`complete`](Self::complete),
    /// [`fail`](Self::fail) or [`complete_all`](Self::complete_all).
    pub fn new(kernel: impl FnMut(&QueryPoint) -> Vec3 + 'static) -> Self {
        Self {
            kernel: Box::new(kernel),
            results: Vec::new(),
            pending: VecDeque::new(),
            backlog: VecDeque::new(),
            latency: None,
            dispatch_count: 0,
        }
    }

    /// A device whose readbacks resolve in submission order after `frames`
    /// calls to `maintain`. Zero resolves during the request itself.
    pub fn with_latency(kernel: impl FnMut(&QueryPoint) -> Vec3 + 'static, frames: u32) -> Self {
        Self {
            latency: Some(frames),
            ..Self::new(kernel)
        }
    }

    pub fn latency(&self) -> Option<u32> {
        self.latency
    }

    /// Number of dispatches run so far.
    pub fn dispatch_count(&self) -> u64 {
        self.dispatch_count
    }

    /// The result buffer of the most recent dispatch.
    pub fn last_results(&self) -> &[Vec3] {
        &self.results
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Unresolved transfers, oldest first.
    pub fn pending_transfers(&self) -> Vec<TransferId> {
        self.pending.iter().map(|p| p.notifier.transfer()).collect()
    }

    /// Resolved transfers still waiting for room in the engine's queue.
    pub fn backlog_count(&self) -> usize {
        self.backlog.len()
    }

    /// Resolve one transfer successfully. Returns `false` if it is unknown.
    pub fn complete(&mut self, transfer: TransferId) -> bool {
        match self.take(transfer) {
            Some(pending) => {
                self.deliver(pending.notifier, ReadbackOutcome::Completed(pending.results));
                true
            }
            None => false,
        }
    }

    /// Resolve one transfer with a transport error.
    pub fn fail(&mut self, transfer: TransferId) -> bool {
        match self.take(transfer) {
            Some(pending) => {
                self.deliver(pending.notifier, ReadbackOutcome::Failed);
                true
            }
            None => false,
        }
    }

    /// Resolve every pending transfer successfully, oldest first.
    pub fn complete_all(&mut self) -> usize {
        let count = self.pending.len();
        while let Some(pending) = self.pending.pop_front() {
            self.deliver(pending.notifier, ReadbackOutcome::Completed(pending.results));
        }
        count
    }

    /// Retry backlogged reports in order until the queue fills again.
    /// Returns how many were delivered.
    pub fn flush_backlog(&mut self) -> usize {
        let mut delivered = 0;
        while let Some(undelivered) = self.backlog.pop_front() {
            match undelivered.retry() {
                Ok(()) => delivered += 1,
                Err(undelivered) => {
                    self.backlog.push_front(undelivered);
                    break;
                }
            }
        }
        delivered
    }

    fn deliver(&mut self, notifier: ReadbackNotifier, outcome: ReadbackOutcome) {
        // Nothing may overtake an earlier report.
        if !self.backlog.is_empty() {
            self.backlog.push_back(Undelivered { notifier, outcome });
            return;
        }
        if let Err(undelivered) = notifier.resolve(outcome) {
            log::debug!(
                "{}: completion queue full, holding the report",
                undelivered.notifier.transfer()
            );
            self.backlog.push_back(undelivered);
        }
    }

    fn take(&mut self, transfer: TransferId) -> Option<PendingTransfer> {
        let index = self
            .pending
            .iter()
            .position(|p| p.notifier.transfer() == transfer)?;
        self.pending.remove(index)
    }
}

impl ComputeDevice for CpuDevice {
    fn dispatch(&mut self, queries: &[QueryPoint]) {
        let kernel = &mut self.kernel;
        self.results.clear();
        self.results.extend(queries.iter().map(|q| kernel(q)));
        self.dispatch_count += 1;
    }

    fn request_readback(&mut self, count: usize, notifier: ReadbackNotifier) {
        let mut results: Vec<Vec3> = self.results.iter().copied().take(count).collect();
        results.resize(count, Vec3::ZERO);

        if self.latency == Some(0) {
            self.deliver(notifier, ReadbackOutcome::Completed(results));
            return;
        }
        self.pending.push_back(PendingTransfer {
            notifier,
            results,
            frames_waited: 0,
        });
    }

    fn maintain(&mut self) {
        self.flush_backlog();
        let Some(latency) = self.latency else {
            return;
        };
        for pending in &mut self.pending {
            pending.frames_waited += 1;
        }
        while self
            .pending
            .front()
            .is_some_and(|p| p.frames_waited >= latency)
        {
            if let Some(pending) = self.pending.pop_front() {
                self.deliver(pending.notifier, ReadbackOutcome::Completed(pending.results));
            }
        }
    }

    fn release(&mut self) {
        // Dropping the notifiers reports each pending transfer as failed.
        self.pending.clear();
        self.backlog.clear();
        self.results = Vec::new();
    }
}

impl fmt::Debug for CpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuDevice")
            .field("latency", &self.latency)
            .field("pending", &self.pending.len())
            .field("backlog", &self.backlog.len())
            .field("dispatch_count", &self.dispatch_count)
            .finish_non_exhaustive()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
