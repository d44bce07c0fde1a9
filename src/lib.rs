//! # bacnet-mstp
//!
//! A BACnet MS/TP (Master-Slave/Token-Passing — ASHRAE 135 Clause 9)
//! data-link engine: the Receive Frame State Machine, the Manager Node
//! State Machine, the two Annex G CRC codecs, and the silence/reply timing
//! discipline that drives both.
//!
//! # Scope
//!
//! This crate implements the manager-node side of the data link only. It
//! does not parse NPDUs or APDUs, does not operate as a subordinate-only
//! node, and does not negotiate baud rate or arbitrate more than one bus
//! per [`Engine`] instance. The UART driver and the BACnet application
//! layer are external collaborators, connected through [`UartTransport`]
//! and [`Engine::submit_tx`]/[`Engine::receive_rx`] respectively.
//!
//! # Overview
//!
//! A host drives an [`Engine`] with two calls from its I/O loop:
//! [`Engine::on_octet`] for every byte the UART receives, and
//! [`Engine::on_tick`] on a roughly `Tslot`-sized cadence to let the
//! manager node act on elapsed silence. Frames for this station to send go
//! in through [`Engine::submit_tx`]; frames this station has received come
//! back out through [`Engine::receive_rx`].
//!
//! ```no_run
//! use bacnet_mstp::{Engine, MstpConfig, UartTransport, Frame, FrameType};
//!
//! struct MyUart;
//! impl UartTransport for MyUart {
//!     fn transmit(&mut self, _bytes: &[u8]) {}
//!     fn transmit_complete(&self) -> bool { true }
//!     fn baud(&self) -> u32 { 38400 }
//! }
//!
//! let engine = Engine::new(MstpConfig::default(), MyUart);
//! engine.on_octet(0x55, false);
//! engine.on_tick(10);
//! let _ = engine.submit_tx(Frame::new(FrameType::BacnetDataNotExpectingReply, 2, 0, vec![1, 2, 3]));
//! while let Some(entry) = engine.receive_rx() {
//!     println!("{:?}", entry);
//! }
//! ```

mod checksum;
mod config;
mod engine;
mod error;
mod frame;
mod mnsm;
mod queue;
mod rfsm;
mod status;
mod timer;
mod transport;

pub use config::{turnaround_us, MstpConfig};
pub use engine::Engine;
pub use error::MstpError;
pub use frame::{Frame, FrameType, BROADCAST_ADDRESS};
pub use mnsm::{MnsmState, MnsmStats};
pub use queue::RxEntry;
pub use rfsm::{RfsmState, RfsmStats};
pub use status::Status;
pub use timer::SilenceTimer;
pub use transport::UartTransport;
