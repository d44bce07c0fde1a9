//! The one caller-visible failure mode this engine has.

use thiserror::Error;

/// Errors `Engine` can return to its caller.
///
/// Everything else that can go wrong on the wire — line errors, frame
/// aborts, CRC mismatches, oversized frames, RX enqueue failure — is
/// internal to the RFSM, counted in [`crate::Status`], and logged; none of
/// it escapes as an `Err` because none of it is something the caller could
/// do anything about beyond what the protocol already does (retry, drop,
/// recover).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MstpError {
    /// The transmit queue has no room for another frame.
    #[error("transmit queue is full")]
    TxQueueFull,
}
