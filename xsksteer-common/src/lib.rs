#![no_std]

//! Types and decision logic shared by the XDP program and the user-space loader.
//!
//! The redirect decision is written against three small capabilities
//! ([`QueueEndpointTable`], [`Redirector`] and [`TraceSink`]) so that the same
//! code runs inside the kernel against an `XSKMAP` and on the host against an
//! in-memory table.

use core::fmt;

mod license;

pub use license::{License, LicenseFeatures};

/// Name of the queue-to-socket map inside the compiled object.
pub const SOCKET_MAP_NAME: &str = "socket_map";

/// Name of the XDP program inside the compiled object.
pub const PROGRAM_NAME: &str = "xsksteer";

/// Name of the read-only global that switches per-frame trace records on or off.
pub const TRACE_ENABLED_GLOBAL: &str = "TRACE_ENABLED";

/// Number of receive queues the socket map holds unless configured otherwise.
pub const DEFAULT_CAPACITY: u32 = 64;

/// Upper bound accepted for a configured socket map capacity.
pub const MAX_CAPACITY: u32 = 4096;

/// Flags passed to `bpf_redirect_map`. The lower two bits select the action the
/// helper returns when the slot is empty, so a failed redirect falls back to
/// the normal stack instead of aborting the frame.
pub const REDIRECT_FLAGS: u64 = xdp_action::XDP_PASS as u64;

/// Receive-queue index as reported by the driver for the current frame.
pub type QueueIndex = u32;

/// Identifier of a registered fast-path socket.
///
/// An `XSKMAP` lookup yields the queue id the socket was bound to, not the
/// socket itself, so in the kernel a value that differs from the frame's queue
/// marks a socket bound to another queue.
pub type Endpoint = u32;

/// XDP verdict codes from `enum xdp_action` in `<linux/bpf.h>`.
pub mod xdp_action {
    pub const XDP_ABORTED: u32 = 0;
    pub const XDP_DROP: u32 = 1;
    pub const XDP_PASS: u32 = 2;
    pub const XDP_TX: u32 = 3;
    pub const XDP_REDIRECT: u32 = 4;

    /// Returns the symbolic name of a verdict code.
    pub const fn name(code: u32) -> &'static str {
        match code {
            XDP_ABORTED => "XDP_ABORTED",
            XDP_DROP => "XDP_DROP",
            XDP_PASS => "XDP_PASS",
            XDP_TX => "XDP_TX",
            XDP_REDIRECT => "XDP_REDIRECT",
            _ => "XDP_UNKNOWN",
        }
    }
}

/// Read-only view of the queue-to-socket map as seen by the decision path.
///
/// Implementations must answer without blocking and must never hand out a
/// value that was not written by a completed registration.
pub trait QueueEndpointTable {
    fn get(&self, queue: QueueIndex) -> Option<Endpoint>;
}

/// Hands a frame over to the socket registered for `queue`.
///
/// Returns the verdict produced by the transport. For the kernel this is the
/// return value of `bpf_redirect_map`: `XDP_REDIRECT` on success, the fallback
/// action encoded in [`REDIRECT_FLAGS`] otherwise.
pub trait Redirector {
    fn redirect(&self, queue: QueueIndex) -> u32;
}

/// Best-effort sink for per-frame diagnostic records.
///
/// Emitting must never block and must never fail the caller; a sink that
/// cannot keep up drops records.
pub trait TraceSink {
    fn emit(&self, record: &TraceRecord);
}

/// Receive metadata the decision unit reads from a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMeta {
    pub rx_queue_index: QueueIndex,
}

impl FrameMeta {
    pub const fn new(rx_queue_index: QueueIndex) -> Self {
        Self { rx_queue_index }
    }
}

/// Outcome of a single redirect decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Divert the frame to the socket identified by the endpoint.
    Redirect(Endpoint),
    /// Leave the frame to the normal network stack.
    Pass,
}

/// One diagnostic record per decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceRecord {
    Redirect {
        queue: QueueIndex,
        status: u32,
        endpoint: Endpoint,
    },
    Pass {
        queue: QueueIndex,
    },
}

impl TraceRecord {
    pub const fn queue(&self) -> QueueIndex {
        match *self {
            TraceRecord::Redirect { queue, .. } | TraceRecord::Pass { queue } => queue,
        }
    }

    /// The endpoint carried by the record, `None` for the "no endpoint" marker.
    pub const fn endpoint(&self) -> Option<Endpoint> {
        match *self {
            TraceRecord::Redirect { endpoint, .. } => Some(endpoint),
            TraceRecord::Pass { .. } => None,
        }
    }
}

impl fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceRecord::Redirect {
                queue,
                status,
                endpoint,
            } => write!(f, "XDP_REDIRECT queue={queue}, ret={status}, val={endpoint}"),
            TraceRecord::Pass { queue } => write!(f, "XDP_PASS queue={queue} val=NULL"),
        }
    }
}

/// Result of [`decide`]: the chosen action plus the verdict to hand back to the
/// kernel receive path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub queue: QueueIndex,
    pub action: Action,
    /// `XDP_PASS` for [`Action::Pass`], the transport's status for a redirect.
    pub verdict: u32,
}

impl Decision {
    pub const fn trace_record(&self) -> TraceRecord {
        match self.action {
            Action::Redirect(endpoint) => TraceRecord::Redirect {
                queue: self.queue,
                status: self.verdict,
                endpoint,
            },
            Action::Pass => TraceRecord::Pass { queue: self.queue },
        }
    }
}

/// Decides whether the frame described by `meta` is redirected or passed.
///
/// Performs exactly one lookup in `table`. On a match the redirect is attempted
/// through `redirector` and its status recorded; a rejected redirect does not
/// turn the decision into [`Action::Pass`]. Exactly one record is emitted to
/// `sink` per call.
#[inline(always)]
pub fn decide<T, R, S>(meta: &FrameMeta, table: &T, redirector: &R, sink: &S) -> Decision
where
    T: QueueEndpointTable + ?Sized,
    R: Redirector + ?Sized,
    S: TraceSink + ?Sized,
{
    let queue = meta.rx_queue_index;

    let decision = match table.get(queue) {
        Some(endpoint) => Decision {
            queue,
            action: Action::Redirect(endpoint),
            verdict: redirector.redirect(queue),
        },
        None => Decision {
            queue,
            action: Action::Pass,
            verdict: xdp_action::XDP_PASS,
        },
    };

    sink.emit(&decision.trace_record());
    decision
}

/// Sink that discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TraceSink for NullSink {
    #[inline(always)]
    fn emit(&self, _record: &TraceRecord) {}
}
