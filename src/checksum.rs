//! ASHRAE 135 Annex G CRC codecs for the MS/TP header and data trailers.
//!
//! Both functions are pure: no allocation, no I/O, and no dependence on
//! engine state. The RFSM folds one octet at a time through
//! [`header_crc_update`] / [`data_crc_update`] as it reassembles a frame;
//! [`header_crc_of`] / [`data_crc_of`] compute the same result over a
//! complete buffer for the frame encoder and for tests.

/// Initial accumulator value for the 8-bit header CRC.
pub const HEADER_CRC_INIT: u8 = 0xFF;
/// Accumulator value that indicates a valid header once its own CRC octet
/// has been folded into the running accumulator.
pub const HEADER_CRC_RESIDUE: u8 = 0x55;

/// Initial accumulator value for the 16-bit data CRC.
pub const DATA_CRC_INIT: u16 = 0xFFFF;
/// Accumulator value that indicates valid data once both trailer octets
/// have been folded into the running accumulator.
pub const DATA_CRC_RESIDUE: u16 = 0xF0B8;

/// Fold one octet into the running header CRC accumulator.
///
/// This is the "parallel" CRC-8 algorithm of Annex G.1 (polynomial
/// X^8 + X^7 + 1) — not a standard bit-by-bit CRC-8, so it has no crate
/// equivalent and stays hand-rolled, same as every MS/TP implementation
/// that predates this one.
#[must_use]
pub fn header_crc_update(accum: u8, octet: u8) -> u8 {
    let c = u16::from(accum ^ octet);
    let c = c ^ (c << 1) ^ (c << 2) ^ (c << 3) ^ (c << 4) ^ (c << 5) ^ (c << 6) ^ (c << 7);
    ((c & 0xFE) ^ ((c >> 8) & 1)) as u8
}

/// Fold one octet into the running data CRC accumulator (Annex G.2).
#[must_use]
pub fn data_crc_update(accum: u16, octet: u8) -> u16 {
    let crc_low = (accum & 0xFF) ^ u16::from(octet);
    (accum >> 8)
        ^ (crc_low << 8)
        ^ (crc_low << 3)
        ^ (crc_low << 12)
        ^ (crc_low >> 4)
        ^ (crc_low & 0x0F)
        ^ ((crc_low & 0x0F) << 7)
}

/// CRC-16/X-25 is bit-for-bit the same algorithm as Annex G.2 (poly 0x1021
/// reflected to 0x8408, init 0xFFFF, output complemented) — its residue of
/// 0xF0B8 is exactly [`DATA_CRC_RESIDUE`]. The `crc` crate's table-driven
/// implementation backs the whole-buffer encode path; [`data_crc_update`]
/// remains the one the RFSM drives octet by octet.
const DATA_CRC16_X25: crc::Algorithm<u16> = crc::CRC_16_IBM_SDLC;

/// Compute the transmitted data CRC (already ones-complemented) over a
/// complete buffer using the table-driven implementation.
#[must_use]
pub fn data_crc_of(data: &[u8]) -> u16 {
    crc::Crc::<u16>::new(&DATA_CRC16_X25).checksum(data)
}

/// Compute the transmitted header CRC (already ones-complemented) over a
/// complete 5-octet header using the bit-level accumulator.
#[must_use]
pub fn header_crc_of(header: &[u8]) -> u8 {
    !header.iter().fold(HEADER_CRC_INIT, |acc, &b| header_crc_update(acc, b))
}
