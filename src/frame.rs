//! Frame types and the wire codec shared by the encoder and the RFSM.

use crate::checksum::{data_crc_of, header_crc_of};

/// Reserved destination address meaning "every station on this segment".
pub const BROADCAST_ADDRESS: u8 = 0xFF;

/// Preamble octets that open every frame on the wire.
pub const PREAMBLE: [u8; 2] = [0x55, 0xFF];

/// The eight frame types ASHRAE 135 Clause 9 assigns a discriminant to,
/// plus a catch-all for anything this engine doesn't originate but must
/// still be able to observe and log without losing the original byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Token,
    PollForManager,
    ReplyToPollForManager,
    TestRequest,
    TestResponse,
    BacnetDataExpectingReply,
    BacnetDataNotExpectingReply,
    ReplyPostponed,
    Unknown(u8),
}

impl FrameType {
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Token,
            1 => Self::PollForManager,
            2 => Self::ReplyToPollForManager,
            3 => Self::TestRequest,
            4 => Self::TestResponse,
            5 => Self::BacnetDataExpectingReply,
            6 => Self::BacnetDataNotExpectingReply,
            7 => Self::ReplyPostponed,
            other => Self::Unknown(other),
        }
    }

    #[must_use]
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Token => 0,
            Self::PollForManager => 1,
            Self::ReplyToPollForManager => 2,
            Self::TestRequest => 3,
            Self::TestResponse => 4,
            Self::BacnetDataExpectingReply => 5,
            Self::BacnetDataNotExpectingReply => 6,
            Self::ReplyPostponed => 7,
            Self::Unknown(v) => v,
        }
    }

    /// `true` for the two frame types that ever reach the RX queue.
    #[must_use]
    pub fn is_application_data(self) -> bool {
        matches!(
            self,
            Self::BacnetDataExpectingReply | Self::BacnetDataNotExpectingReply
        )
    }
}

impl Default for FrameType {
    fn default() -> Self {
        Self::Token
    }
}

/// A decoded or to-be-encoded MS/TP frame.
///
/// `data.len()` is the authoritative length; there is no separate stored
/// length field to drift out of sync with it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    pub frame_type: FrameType,
    pub destination: u8,
    pub source: u8,
    pub data: Vec<u8>,
}

impl Frame {
    #[must_use]
    pub fn new(frame_type: FrameType, destination: u8, source: u8, data: Vec<u8>) -> Self {
        Self {
            frame_type,
            destination,
            source,
            data,
        }
    }

    #[must_use]
    pub fn token(destination: u8, source: u8) -> Self {
        Self::new(FrameType::Token, destination, source, Vec::new())
    }

    /// Serialize to the on-wire layout: preamble, 5-octet header, header
    /// CRC, and (if any data) the payload followed by the data CRC sent
    /// low octet first. Never emits the optional trailing pad octet —
    /// nothing in this crate needs it and no receiver requires it.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PREAMBLE.len() + 6 + self.data.len() + 2);
        out.extend_from_slice(&PREAMBLE);
        let header = [
            self.frame_type.to_u8(),
            self.destination,
            self.source,
            (self.data.len() >> 8) as u8,
            (self.data.len() & 0xFF) as u8,
        ];
        out.extend_from_slice(&header);
        out.push(header_crc_of(&header));
        if !self.data.is_empty() {
            out.extend_from_slice(&self.data);
            let data_crc = data_crc_of(&self.data);
            out.push((data_crc & 0xFF) as u8);
            out.push((data_crc >> 8) as u8);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_type_round_trips_known_discriminants() {
        for byte in 0u8..=7 {
            assert_eq!(FrameType::from_u8(byte).to_u8(), byte);
        }
    }

    #[test]
    fn frame_type_unknown_preserves_byte() {
        let ft = FrameType::from_u8(42);
        assert_eq!(ft, FrameType::Unknown(42));
        assert_eq!(ft.to_u8(), 42);
    }

    #[test]
    fn encode_token_frame_matches_ashrae_vector() {
        let frame = Frame::token(0x10, 0x05);
        let bytes = frame.encode();
        assert_eq!(bytes, vec![0x55, 0xFF, 0x00, 0x10, 0x05, 0x00, 0x00, 0x8C]);
    }

    #[test]
    fn encode_data_frame_appends_payload_and_crc() {
        let frame = Frame::new(
            FrameType::BacnetDataNotExpectingReply,
            0x10,
            0x05,
            vec![0x01, 0x22, 0x30],
        );
        let bytes = frame.encode();
        assert_eq!(&bytes[0..2], &PREAMBLE);
        assert_eq!(bytes[2], 0x06);
        assert_eq!(&bytes[8..11], &[0x01, 0x22, 0x30]);
        assert_eq!(&bytes[11..13], &[0x10, 0xBD]);
    }
}
