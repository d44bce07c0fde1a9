//! Protocol-fixed constants (ASHRAE 135 Clause 9) and the host-tunable
//! [`MstpConfig`], validated and clamped rather than rejected.

/// Number of token passes a manager makes before polling for a new manager.
pub const NPOLL: u8 = 50;
/// Number of retries for a lost token before assuming the downstream station is gone.
pub const NRETRY_TOKEN: u8 = 1;
/// Minimum octet count that counts as "bus activity" while waiting out a poll window.
pub const NMIN_OCTETS: u32 = 4;

pub const T_FRAME_ABORT_MS: i64 = 100;
pub const T_NO_TOKEN_MS: i64 = 500;
pub const T_REPLY_TIMEOUT_MS: i64 = 300;
pub const T_REPLY_DELAY_MS: i64 = 200;
pub const T_SLOT_MS: i64 = 10;
pub const T_USAGE_TIMEOUT_MIN_MS: i64 = 20;
pub const T_USAGE_TIMEOUT_MAX_MS: i64 = 35;
pub const T_USAGE_TIMEOUT_TP_MS: i64 = 85;

/// Largest data payload the RFSM will fully reassemble rather than skip.
pub const MAX_RX: usize = 512;
/// Largest payload this engine will ever originate.
pub const MAX_TX: usize = 512;

pub const DEFAULT_NMAX_MANAGER: u8 = 127;
const VALID_BAUD_RATES: [u32; 6] = [9600, 19200, 38400, 57600, 76800, 115200];
const DEFAULT_BAUD: u32 = 38400;
/// Baud rate an unrecognized configured value clamps to — not
/// [`DEFAULT_BAUD`], which is only [`MstpConfig::default`]'s out-of-box
/// choice. ASHRAE 135 has unrecognized rates fall back to 76800.
const CLAMP_FALLBACK_BAUD: u32 = 76_800;

/// Per-baud line turnaround delay in microseconds between receiving the
/// last octet of an incoming frame and transmitting a reply, per the
/// standard's turnaround table. Unrecognized baud rates fall back to the
/// same delay as 76800, the table's otherwise-unlisted entry.
#[must_use]
pub fn turnaround_us(baud: u32) -> u64 {
    match baud {
        9600 => 4167,
        19200 => 2083,
        38400 => 1042,
        57600 => 694,
        115200 => 347,
        _ => 521,
    }
}

/// Host-tunable parameters. `Default` matches a sensible out-of-box
/// configuration; [`MstpConfig::clamp`] keeps every field inside the
/// range the state machines assume, silently, per the "configuration out
/// of range" handling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MstpConfig {
    pub this_station: u8,
    pub nmax_manager: u8,
    pub nmax_info_frames: u8,
    pub baud: u32,
    pub tusage_timeout_ms: i64,
}

impl Default for MstpConfig {
    fn default() -> Self {
        Self {
            this_station: 0,
            nmax_manager: DEFAULT_NMAX_MANAGER,
            nmax_info_frames: 1,
            baud: DEFAULT_BAUD,
            tusage_timeout_ms: T_USAGE_TIMEOUT_MAX_MS,
        }
    }
}

impl MstpConfig {
    #[must_use]
    pub fn new(
        this_station: u8,
        nmax_manager: u8,
        nmax_info_frames: u8,
        baud: u32,
        tusage_timeout_ms: i64,
    ) -> Self {
        let mut cfg = Self {
            this_station,
            nmax_manager,
            nmax_info_frames,
            baud,
            tusage_timeout_ms,
        };
        cfg.clamp();
        cfg
    }

    /// Bring every field within its valid range. Never errors: an
    /// out-of-range tunable is a configuration mistake, not a reason to
    /// refuse to run.
    pub fn clamp(&mut self) {
        self.nmax_manager = self.nmax_manager.clamp(1, 127);
        self.this_station = self.this_station.min(127);
        self.nmax_info_frames = self.nmax_info_frames.max(1);
        self.tusage_timeout_ms = self
            .tusage_timeout_ms
            .clamp(T_USAGE_TIMEOUT_MIN_MS, T_USAGE_TIMEOUT_MAX_MS);
        if !VALID_BAUD_RATES.contains(&self.baud) {
            self.baud = CLAMP_FALLBACK_BAUD;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_already_in_range() {
        let mut cfg = MstpConfig::default();
        let before = cfg;
        cfg.clamp();
        assert_eq!(cfg, before);
    }

    #[test]
    fn clamp_brings_station_and_manager_count_into_range() {
        let cfg = MstpConfig::new(200, 255, 0, 1200, 1000);
        assert_eq!(cfg.this_station, 127);
        assert_eq!(cfg.nmax_manager, 127);
        assert_eq!(cfg.nmax_info_frames, 1);
        assert_eq!(cfg.baud, CLAMP_FALLBACK_BAUD);
        assert_eq!(cfg.tusage_timeout_ms, T_USAGE_TIMEOUT_MAX_MS);
    }

    #[test]
    fn turnaround_table_matches_standard_rates() {
        assert_eq!(turnaround_us(9600), 4167);
        assert_eq!(turnaround_us(115200), 347);
        assert_eq!(turnaround_us(76800), 521);
        assert_eq!(turnaround_us(1_000_000), 521);
    }
}
