//! End-to-end scenarios driven purely through `Engine`'s public surface:
//! feed encoded frames in through `on_octet`, advance time through
//! `on_tick`, and check what comes out the other side.

use std::sync::{Arc, Mutex};

use bacnet_mstp::{Engine, Frame, FrameType, MstpConfig, UartTransport};

/// A transport double recording every frame handed to it, since the test
/// binary is a separate crate and can't reach the library's own
/// `#[cfg(test)]`-gated loopback. `sent` is shared via `Arc` so a test can
/// keep a handle to it after the transport itself has been moved into the
/// `Engine`.
struct RecordingTransport {
    baud: u32,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl RecordingTransport {
    fn new(baud: u32) -> (Self, Arc<Mutex<Vec<Vec<u8>>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        (Self { baud, sent: sent.clone() }, sent)
    }
}

impl UartTransport for RecordingTransport {
    fn transmit(&mut self, bytes: &[u8]) {
        self.sent.lock().unwrap().push(bytes.to_vec());
    }

    fn transmit_complete(&self) -> bool {
        true
    }

    fn baud(&self) -> u32 {
        self.baud
    }
}

fn feed(engine: &Engine<RecordingTransport>, frame: &Frame) {
    for byte in frame.encode() {
        engine.on_octet(byte, false);
    }
}

#[test]
fn two_stations_form_a_ring_and_exchange_data() {
    let config = MstpConfig::new(1, 10, 1, 38400, 35);
    let (transport, _sent) = RecordingTransport::new(38400);
    let engine = Engine::new(config, transport);

    // Station 2 hands us the token to start the ring.
    feed(&engine, &Frame::token(1, 2));
    assert!(engine.status().joined);

    // Queue an application frame; it only leaves once we actually hold
    // the token, which we now do.
    let payload = Frame::new(FrameType::BacnetDataNotExpectingReply, 2, 1, vec![0xDE, 0xAD]);
    engine.submit_tx(payload).expect("queue has room");
    engine.on_tick(1);

    // Receive an application frame addressed to us from the same peer.
    let incoming = Frame::new(FrameType::BacnetDataNotExpectingReply, 1, 2, vec![0xBE, 0xEF]);
    feed(&engine, &incoming);
    let entry = engine.receive_rx().expect("frame should have been queued");
    assert_eq!(entry.data, vec![0xBE, 0xEF]);
    assert_eq!(entry.source, 2);
}

#[test]
fn lone_station_declares_itself_sole_manager_after_a_full_poll_sweep() {
    let config = MstpConfig::new(1, 3, 1, 38400, 35);
    let (transport, _sent) = RecordingTransport::new(38400);
    let engine = Engine::new(config, transport);

    // Nobody answers; silence runs past T_NO_TOKEN_MS so we start polling.
    // Millisecond ticks, since NoToken only opens this station's 10ms slot
    // for one such window and coarser steps could step right over it.
    for _ in 0..1000 {
        engine.on_tick(1);
    }
    assert!(engine.status().sole_manager);
    assert!(engine.status().joined);
}

#[test]
fn header_crc_corruption_leaves_ring_formation_untouched() {
    let config = MstpConfig::new(1, 10, 1, 38400, 35);
    let (transport, _sent) = RecordingTransport::new(38400);
    let engine = Engine::new(config, transport);

    let mut bytes = Frame::token(1, 2).encode();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF; // corrupt the header CRC octet
    for byte in bytes {
        engine.on_octet(byte, false);
    }

    assert!(!engine.status().joined);
    assert_eq!(engine.status().rfsm_stats.header_crc_errors, 1);
}

#[test]
fn poll_for_manager_addressed_to_us_is_answered_immediately() {
    let config = MstpConfig::new(5, 10, 1, 38400, 35);
    let (transport, sent) = RecordingTransport::new(38400);
    let engine = Engine::new(config, transport);

    feed(&engine, &Frame::new(FrameType::PollForManager, 5, 2, Vec::new()));

    let status = engine.status();
    assert_eq!(status.rfsm_stats.valid_frames, 1);
    // The reply went straight out the transport without waiting on a tick.
    let sent = sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0][2], FrameType::ReplyToPollForManager.to_u8());
}

#[test]
fn test_request_through_the_engine_gets_echoed_back() {
    let config = MstpConfig::new(1, 10, 1, 38400, 35);
    let (transport, sent) = RecordingTransport::new(38400);
    let engine = Engine::new(config, transport);

    feed(&engine, &Frame::new(FrameType::TestRequest, 1, 9, vec![0x01, 0x02, 0x03, 0x04]));

    let sent = sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0][2], FrameType::TestResponse.to_u8());
    assert_eq!(&sent[0][8..12], &[0x01, 0x02, 0x03, 0x04]);
}

#[test]
fn finding_a_peer_via_poll_for_manager_hands_it_the_token() {
    let config = MstpConfig::new(1, 10, 1, 38400, 35);
    let (transport, sent) = RecordingTransport::new(38400);
    let engine = Engine::new(config, transport);

    // Drive the engine into PollForManager, then have a peer answer.
    // Millisecond ticks for the same reason as the sole-manager test above:
    // NoToken's slot window is easy to step over at coarser granularity.
    for _ in 0..700 {
        engine.on_tick(1);
        if sent.lock().unwrap().iter().any(|b| b[2] == FrameType::PollForManager.to_u8()) {
            break;
        }
    }
    assert!(!engine.status().sole_manager, "a peer should answer before the sweep completes");
    feed(&engine, &Frame::new(FrameType::ReplyToPollForManager, 1, 7, Vec::new()));

    let sent = sent.lock().unwrap();
    let last = sent.last().expect("a token should have been sent to the newly found peer");
    assert_eq!(last[2], FrameType::Token.to_u8());
}

#[test]
fn frame_not_addressed_to_us_never_reaches_the_rx_queue() {
    let config = MstpConfig::new(1, 10, 1, 38400, 35);
    let (transport, _sent) = RecordingTransport::new(38400);
    let engine = Engine::new(config, transport);
    feed(&engine, &Frame::token(1, 2));

    let misaddressed =
        Frame::new(FrameType::BacnetDataNotExpectingReply, 9, 2, vec![0x01, 0x02, 0x03]);
    feed(&engine, &misaddressed);

    assert!(engine.receive_rx().is_none());
}
