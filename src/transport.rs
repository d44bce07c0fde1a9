//! The seam between this engine and a concrete UART/serial driver.

/// What the engine needs from a half-duplex RS-485 UART driver.
///
/// The engine never depends on a specific serial crate — a host supplies
/// one implementation of this trait, whatever hardware or virtual
/// transport it runs on (a real UART, a loopback pair in tests, a
/// simulated bus for proptests). None of its methods return a `Result`:
/// a transport that can't write has nothing this crate's state machines
/// can act on beyond what the protocol's own timeouts already handle.
pub trait UartTransport {
    /// Write `bytes` to the line.
    fn transmit(&mut self, bytes: &[u8]);

    /// `true` once the last `transmit` call's bytes have fully left the
    /// UART, not just been copied into its buffer. The engine busy-waits
    /// this before resuming normal silence-timer accounting.
    fn transmit_complete(&self) -> bool;

    /// Configured baud rate, used to size the line-turnaround delay.
    fn baud(&self) -> u32;
}

#[cfg(test)]
pub(crate) struct LoopbackTransport {
    pub sent: Vec<Vec<u8>>,
    pub baud: u32,
}

#[cfg(test)]
impl LoopbackTransport {
    pub fn new(baud: u32) -> Self {
        Self { sent: Vec::new(), baud }
    }
}

#[cfg(test)]
impl UartTransport for LoopbackTransport {
    fn transmit(&mut self, bytes: &[u8]) {
        self.sent.push(bytes.to_vec());
    }

    fn transmit_complete(&self) -> bool {
        true
    }

    fn baud(&self) -> u32 {
        self.baud
    }
}
