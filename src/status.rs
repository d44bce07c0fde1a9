//! Host-facing read-only snapshot of engine state.

use crate::mnsm::{MnsmState, MnsmStats};
use crate::rfsm::{RfsmState, RfsmStats};

/// A point-in-time view of everything a host application might want to
/// display or log, gathered without holding the engine's lock any longer
/// than it takes to copy these plain-data fields out.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub this_station: u8,
    pub joined: bool,
    pub sole_manager: bool,
    pub rfsm_state: RfsmState,
    pub mnsm_state: MnsmState,
    pub silence_ms: i64,
    pub tx_queue_len: usize,
    pub rx_queue_len: usize,
    pub rfsm_stats: RfsmStats,
    pub mnsm_stats: MnsmStats,
}
