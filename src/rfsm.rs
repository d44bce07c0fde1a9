//! The Receive Frame State Machine: reassembles one octet at a time into
//! validated frames, fed by the UART driver and drained by the MNSM.

use crate::config::{MAX_RX, T_FRAME_ABORT_MS};
use crate::checksum::{self as crc, DATA_CRC_INIT, DATA_CRC_RESIDUE, HEADER_CRC_INIT, HEADER_CRC_RESIDUE};
use crate::frame::{FrameType, BROADCAST_ADDRESS};
use crate::queue::{RxEntry, RxQueue};
use crate::timer::SilenceTimer;

#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RfsmState {
    Idle,
    Preamble,
    Header,
    Data,
    SkipData,
}

/// Running counters, exposed through [`crate::Status`] since none of these
/// conditions are fatal enough to interrupt the receive path.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RfsmStats {
    pub frame_aborts: u32,
    pub header_crc_errors: u32,
    pub data_crc_errors: u32,
    pub oversized_frames: u32,
    pub valid_frames: u32,
    pub rx_enqueue_drops: u32,
}

/// Octet-driven frame reassembly.
///
/// `event_count` tracks bus activity for the MNSM's quiet-window logic; it
/// is bumped while idling, hunting for a preamble, or parsing a header, but
/// not while shuttling payload octets through `Data`/`SkipData` — the same
/// asymmetry the reference driver has always had, since by the time a
/// frame's header has validated, the MNSM already knows the bus is in use.
pub struct Rfsm {
    state: RfsmState,
    index: usize,
    header: [u8; 5],
    header_crc: u8,
    data: Vec<u8>,
    data_crc: u16,
    frame_type: FrameType,
    destination: u8,
    source: u8,
    data_length: usize,
    this_station: u8,
    event_count: u32,
    pub received_valid_frame: bool,
    pub received_invalid_frame: bool,
    stats: RfsmStats,
}

impl Rfsm {
    #[must_use]
    pub fn new(this_station: u8) -> Self {
        Self {
            state: RfsmState::Idle,
            index: 0,
            header: [0; 5],
            header_crc: HEADER_CRC_INIT,
            data: Vec::new(),
            data_crc: DATA_CRC_INIT,
            frame_type: FrameType::Token,
            destination: 0,
            source: 0,
            data_length: 0,
            this_station,
            event_count: 0,
            received_valid_frame: false,
            received_invalid_frame: false,
            stats: RfsmStats::default(),
        }
    }

    pub fn set_station(&mut self, addr: u8) {
        self.this_station = addr;
    }

    #[must_use]
    pub fn state(&self) -> RfsmState {
        self.state
    }

    #[must_use]
    pub fn stats(&self) -> RfsmStats {
        self.stats
    }

    #[must_use]
    pub fn event_count(&self) -> u32 {
        self.event_count
    }

    /// The type, source, and destination of the most recently completed
    /// frame. Only meaningful immediately after a call to [`Rfsm::on_octet`]
    /// that set `received_valid_frame`.
    #[must_use]
    pub fn last_frame(&self) -> (FrameType, u8, u8) {
        (self.frame_type, self.source, self.destination)
    }

    /// The payload of the most recently completed frame, for frame types
    /// the RX queue never carries (`TestRequest`'s echo body, chiefly).
    /// DER/DNER payloads are moved out into the RX queue on completion, so
    /// this is empty for those by the time a caller observes it — query it
    /// only for the non-application frame types `on_octet` leaves behind.
    /// Sliced to `data_length` rather than returning `self.data` whole,
    /// since a zero-length frame never touches (or clears) that buffer.
    #[must_use]
    pub fn last_frame_data(&self) -> &[u8] {
        let len = self.data_length.min(self.data.len());
        &self.data[..len]
    }

    pub fn reset_event_count(&mut self) {
        self.event_count = 0;
    }

    /// Force the RFSM back to `Idle`, discarding any frame in progress.
    pub fn reset(&mut self) {
        self.state = RfsmState::Idle;
        self.index = 0;
        self.received_valid_frame = false;
        self.received_invalid_frame = false;
    }

    fn to_idle(&mut self) {
        self.state = RfsmState::Idle;
        self.index = 0;
    }

    fn bump_event(&mut self, timer: &SilenceTimer) {
        timer.reset();
        self.event_count = self.event_count.saturating_add(1);
    }

    /// Feed one received octet through the state machine.
    ///
    /// `line_error` folds together framing/parity/overrun errors the UART
    /// driver reports alongside this octet; all three are treated the
    /// same way: whatever frame is in progress is discarded.
    pub fn on_octet(
        &mut self,
        ch: u8,
        line_error: bool,
        timer: &SilenceTimer,
        rx_queue: &mut RxQueue,
    ) {
        self.received_valid_frame = false;
        self.received_invalid_frame = false;
        match self.state {
            RfsmState::Idle => self.on_idle(ch, line_error, timer),
            RfsmState::Preamble => self.on_preamble(ch, line_error, timer),
            RfsmState::Header => self.on_header(ch, line_error, timer),
            RfsmState::Data => self.on_data(ch, line_error, timer, rx_queue),
            RfsmState::SkipData => self.on_skip_data(line_error, timer),
        }
    }

    fn on_idle(&mut self, ch: u8, line_error: bool, timer: &SilenceTimer) {
        self.bump_event(timer);
        if line_error {
            return;
        }
        if ch == 0x55 {
            self.state = RfsmState::Preamble;
        }
    }

    fn on_preamble(&mut self, ch: u8, line_error: bool, timer: &SilenceTimer) {
        if timer.load() > T_FRAME_ABORT_MS {
            self.stats.frame_aborts += 1;
            self.to_idle();
            return;
        }
        self.bump_event(timer);
        if line_error {
            self.to_idle();
            return;
        }
        match ch {
            0xFF => {
                self.state = RfsmState::Header;
                self.index = 0;
                self.header_crc = HEADER_CRC_INIT;
            }
            0x55 => {} // repeated preamble octet, stay put
            _ => self.to_idle(),
        }
    }

    fn on_header(&mut self, ch: u8, line_error: bool, timer: &SilenceTimer) {
        if timer.load() > T_FRAME_ABORT_MS {
            self.stats.frame_aborts += 1;
            self.received_invalid_frame = true;
            self.to_idle();
            return;
        }
        self.bump_event(timer);
        if line_error {
            self.received_invalid_frame = true;
            self.to_idle();
            return;
        }

        self.header_crc = crc::header_crc_update(self.header_crc, ch);

        if self.index < 5 {
            self.header[self.index] = ch;
            self.index += 1;
            return;
        }

        // index == 5: `ch` was the header CRC octet itself.
        if self.header_crc != HEADER_CRC_RESIDUE {
            self.stats.header_crc_errors += 1;
            self.received_invalid_frame = true;
            self.to_idle();
            return;
        }

        self.frame_type = FrameType::from_u8(self.header[0]);
        self.destination = self.header[1];
        self.source = self.header[2];
        self.data_length = (usize::from(self.header[3]) << 8) | usize::from(self.header[4]);

        let for_us =
            self.destination == self.this_station || self.destination == BROADCAST_ADDRESS;

        if self.data_length == 0 {
            if for_us {
                self.received_valid_frame = true;
                self.stats.valid_frames += 1;
            }
            self.to_idle();
            return;
        }

        if self.data_length > MAX_RX * 2 {
            self.stats.oversized_frames += 1;
            self.received_invalid_frame = true;
            self.to_idle();
            return;
        }

        self.index = 0;
        if for_us && self.data_length <= MAX_RX {
            self.data.clear();
            self.data.reserve(self.data_length);
            self.data_crc = DATA_CRC_INIT;
            self.state = RfsmState::Data;
        } else {
            self.state = RfsmState::SkipData;
        }
    }

    fn on_data(&mut self, ch: u8, line_error: bool, timer: &SilenceTimer, rx_queue: &mut RxQueue) {
        if timer.load() > T_FRAME_ABORT_MS {
            self.stats.frame_aborts += 1;
            self.received_invalid_frame = true;
            self.to_idle();
            return;
        }
        timer.reset();
        if line_error {
            self.received_invalid_frame = true;
            self.to_idle();
            return;
        }

        if self.index < self.data_length {
            self.data.push(ch);
            self.data_crc = crc::data_crc_update(self.data_crc, ch);
            self.index += 1;
            return;
        }

        // index == data_length, data_length + 1: the two trailer octets, low then high.
        self.data_crc = crc::data_crc_update(self.data_crc, ch);
        self.index += 1;
        if self.index <= self.data_length + 1 {
            return;
        }

        if self.data_crc != DATA_CRC_RESIDUE {
            self.stats.data_crc_errors += 1;
            self.received_invalid_frame = true;
            self.to_idle();
            return;
        }

        self.stats.valid_frames += 1;
        self.received_valid_frame = true;
        if self.frame_type.is_application_data() {
            let entry = RxEntry {
                frame_type: self.frame_type,
                source: self.source,
                destination: self.destination,
                data: std::mem::take(&mut self.data),
            };
            if rx_queue.push(entry).is_err() {
                self.stats.rx_enqueue_drops += 1;
                self.received_valid_frame = false;
            }
        }
        self.to_idle();
    }

    fn on_skip_data(&mut self, line_error: bool, timer: &SilenceTimer) {
        if timer.load() > T_FRAME_ABORT_MS {
            self.stats.frame_aborts += 1;
            self.received_invalid_frame = true;
            self.to_idle();
            return;
        }
        timer.reset();
        if line_error {
            self.received_invalid_frame = true;
            self.to_idle();
            return;
        }
        self.index += 1;
        if self.index >= self.data_length + 2 {
            self.to_idle();
        }
    }
}
