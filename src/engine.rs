//! The application-facing façade: owns the RFSM, the MNSM, the silence
//! timer, and both queues behind locks sized to match how often each is
//! actually contended.

use std::sync::Mutex;

use log::{debug, trace, warn};

use crate::config::{turnaround_us, MstpConfig, MAX_TX};
use crate::error::MstpError;
use crate::frame::{Frame, FrameType};
use crate::mnsm::Mnsm;
use crate::queue::{RxEntry, RxQueue, TxQueue};
use crate::rfsm::Rfsm;
use crate::status::Status;
use crate::timer::SilenceTimer;
use crate::transport::UartTransport;

/// Everything touched within a single `on_octet` or `on_tick` invocation —
/// one lock, matching the reference driver's single spinlock around its
/// receive-frame and manager-node state machines.
struct Core<T: UartTransport> {
    rfsm: Rfsm,
    mnsm: Mnsm,
    transport: T,
    config: MstpConfig,
}

/// The BACnet MS/TP manager-node engine.
///
/// `Engine` is `Send + Sync` as long as `T` is: every field is behind a
/// `Mutex` except the silence timer, which is already a lock-free atomic.
/// TX and RX queues get their own locks so a full RX queue never blocks a
/// concurrent `submit_tx`, and vice versa.
pub struct Engine<T: UartTransport> {
    core: Mutex<Core<T>>,
    tx_queue: Mutex<TxQueue>,
    rx_queue: Mutex<RxQueue>,
    silence: SilenceTimer,
}

impl<T: UartTransport> Engine<T> {
    #[must_use]
    pub fn new(mut config: MstpConfig, transport: T) -> Self {
        config.clamp();
        let rfsm = Rfsm::new(config.this_station);
        let mnsm = Mnsm::new(
            config.this_station,
            config.nmax_manager,
            config.nmax_info_frames,
            config.tusage_timeout_ms,
        );
        let engine = Self {
            core: Mutex::new(Core { rfsm, mnsm, transport, config }),
            tx_queue: Mutex::new(TxQueue::new()),
            rx_queue: Mutex::new(RxQueue::new()),
            silence: SilenceTimer::new(),
        };
        engine.silence.charge(crate::config::T_FRAME_ABORT_MS + 1);
        engine
    }

    /// Reconfigure the engine in place: resets the RFSM to `Idle`, the
    /// MNSM to `Initialize`, drains both queues, and forces the silence
    /// timer stale so the new configuration starts from a clean slate
    /// rather than inheriting whatever the bus was doing a moment ago.
    pub fn configure(&self, mut config: MstpConfig) {
        config.clamp();
        {
            let mut core = self.core.lock().expect("mstp core lock poisoned");
            core.rfsm = Rfsm::new(config.this_station);
            core.mnsm = Mnsm::new(
                config.this_station,
                config.nmax_manager,
                config.nmax_info_frames,
                config.tusage_timeout_ms,
            );
            core.config = config;
        }
        self.tx_queue.lock().expect("mstp tx queue lock poisoned").clear();
        self.rx_queue.lock().expect("mstp rx queue lock poisoned").clear();
        self.silence.charge(crate::config::T_FRAME_ABORT_MS + 1);
    }

    /// Queue a frame for eventual transmission during this station's next
    /// token hold.
    ///
    /// Silently succeeds without enqueueing in two cases: the frame is
    /// addressed to this station itself (nobody needs a loopback path),
    /// or the engine hasn't joined the token ring yet and isn't the sole
    /// manager — in both cases there is nothing useful the caller could
    /// do differently, so this isn't reported as an error. A genuinely
    /// full queue is the one condition that is.
    pub fn submit_tx(&self, frame: Frame) -> Result<(), MstpError> {
        let (this_station, can_send, nmax_info_frames) = {
            let core = self.core.lock().expect("mstp core lock poisoned");
            (
                core.config.this_station,
                core.mnsm.is_joined() || core.mnsm.is_sole_manager(),
                core.config.nmax_info_frames,
            )
        };
        if frame.destination == this_station {
            trace!("submit_tx to self ({this_station}) dropped, not queued");
            return Ok(());
        }
        if !can_send {
            trace!("submit_tx before joining the ring, dropping frame to {}", frame.destination);
            return Ok(());
        }
        let mut tx_queue = self.tx_queue.lock().expect("mstp tx queue lock poisoned");
        if tx_queue.len() >= usize::from(nmax_info_frames) {
            return Err(MstpError::TxQueueFull);
        }
        tx_queue.push(frame).map_err(|_| MstpError::TxQueueFull)
    }

    /// Pop the oldest received application frame, if any.
    pub fn receive_rx(&self) -> Option<RxEntry> {
        self.rx_queue.lock().expect("mstp rx queue lock poisoned").pop()
    }

    /// A snapshot of engine state for logging, diagnostics, or a host's
    /// own status endpoint.
    #[must_use]
    pub fn status(&self) -> Status {
        let core = self.core.lock().expect("mstp core lock poisoned");
        Status {
            this_station: core.config.this_station,
            joined: core.mnsm.is_joined(),
            sole_manager: core.mnsm.is_sole_manager(),
            rfsm_state: core.rfsm.state(),
            mnsm_state: core.mnsm.state(),
            silence_ms: self.silence.load(),
            tx_queue_len: self.tx_queue.lock().expect("mstp tx queue lock poisoned").len(),
            rx_queue_len: self.rx_queue.lock().expect("mstp rx queue lock poisoned").len(),
            rfsm_stats: core.rfsm.stats(),
            mnsm_stats: core.mnsm.stats(),
        }
    }

    /// Feed one octet received from the UART through the RFSM, and let
    /// the MNSM react to whatever frame that completes.
    ///
    /// `line_error` should fold together framing, parity, and overrun
    /// errors the UART driver reports alongside this octet.
    pub fn on_octet(&self, byte: u8, line_error: bool) {
        let mut core = self.core.lock().expect("mstp core lock poisoned");
        {
            let mut rx_queue = self.rx_queue.lock().expect("mstp rx queue lock poisoned");
            core.rfsm.on_octet(byte, line_error, &self.silence, &mut rx_queue);
        }

        if core.rfsm.received_valid_frame {
            let (frame_type, source, destination) = core.rfsm.last_frame();
            if destination == core.config.this_station && frame_type == FrameType::PollForManager {
                let reply = Frame::new(FrameType::ReplyToPollForManager, source, core.config.this_station, Vec::new());
                self.transmit_now(&mut core, &reply);
            } else if destination == core.config.this_station && frame_type == FrameType::TestRequest {
                // Echo the request payload back verbatim, unless it's too
                // big to fit a reply frame, in which case the body is empty.
                let echo = core.rfsm.last_frame_data();
                let echo = if echo.len() <= MAX_TX - 21 { echo.to_vec() } else { Vec::new() };
                let reply = Frame::new(FrameType::TestResponse, source, core.config.this_station, echo);
                self.transmit_now(&mut core, &reply);
            }
            if let Some(frame) = core.mnsm.on_frame(frame_type, source, destination) {
                self.transmit_now(&mut core, &frame);
            }
        } else if core.rfsm.received_invalid_frame {
            trace!("discarded invalid frame in rfsm state {:?}", core.rfsm.state());
            core.mnsm.on_invalid_frame();
        }
    }

    /// Advance timers and let the MNSM act on elapsed silence. A host
    /// driver loop should call this roughly every `Tslot` — more often is
    /// harmless, the state machines only act once thresholds are crossed.
    pub fn on_tick(&self, elapsed_ms: i64) {
        self.silence.tick(elapsed_ms);
        let mut core = self.core.lock().expect("mstp core lock poisoned");
        let event_count = core.rfsm.event_count();
        let outgoing = {
            let mut tx_queue = self.tx_queue.lock().expect("mstp tx queue lock poisoned");
            core.mnsm.on_tick(&self.silence, event_count, &mut tx_queue)
        };
        if core.mnsm.take_event_count_reset() {
            core.rfsm.reset_event_count();
        }
        if let Some(frame) = outgoing {
            self.transmit_now(&mut core, &frame);
        }
    }

    /// Emit `frame`, after first honoring the EIA-485 line-turnaround
    /// contract: never key the driver until at least one turnaround
    /// interval of silence has passed since the last octet, or the
    /// transmission can collide with the tail of whatever just arrived.
    ///
    /// Nothing else advances the silence timer inside this synchronous
    /// call, so rather than spin on it the way the reference driver's
    /// tight polling loop does, the remainder is slept out directly and
    /// the timer aged by the same amount.
    fn transmit_now(&self, core: &mut Core<T>, frame: &Frame) {
        if frame.destination == core.config.this_station {
            warn!("refusing to transmit a frame addressed to this station");
            return;
        }
        let baud = core.transport.baud().max(1);
        let turnaround_ms = (turnaround_us(baud) / 1000).max(1) as i64;
        let remaining = turnaround_ms - self.silence.load();
        if remaining > 0 {
            std::thread::sleep(std::time::Duration::from_millis(remaining as u64));
            self.silence.tick(remaining);
        }

        let bytes = frame.encode();
        debug!("tx {:?} -> {} ({} bytes)", frame.frame_type, frame.destination, bytes.len());
        core.transport.transmit(&bytes);
        while !core.transport.transmit_complete() {
            std::hint::spin_loop();
        }
        const BITS_PER_OCTET: u64 = 10; // start + 8 data + stop, no parity
        let tx_time_ms = (bytes.len() as u64 * BITS_PER_OCTET * 1000) / u64::from(baud);
        self.silence.charge(-(tx_time_ms as i64 + turnaround_ms));
    }
}
