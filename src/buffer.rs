//! Byte queue and bit-level shift registers shared between the clock-edge
//! interrupt and the main loop.

use bit_reverse::BitwiseReverse;

use crate::util;

const QUEUE_DEPTH: u8 = 16;

/// Scancodes received from the keyboard, waiting for the translator.
///
/// Single producer (the clock ISR), single consumer (the main loop). A
/// producer that laps the consumer silently wraps; real keyboards cannot
/// outrun a 16-byte window.
pub struct ScanQueue {
    head: u8,
    tail: u8,
    contents: [u8; QUEUE_DEPTH as usize],
}

impl ScanQueue {
    pub const fn new() -> ScanQueue {
        ScanQueue {
            head: 0,
            tail: 0,
            contents: [0; QUEUE_DEPTH as usize],
        }
    }

    /// Called only from thread mode with the clock interrupt masked.
    pub fn flush(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.contents = [0; QUEUE_DEPTH as usize];
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn push(&mut self, code: u8) {
        self.contents[usize::from(self.tail)] = code;
        self.tail = (self.tail + 1) % QUEUE_DEPTH;
    }

    pub fn take(&mut self) -> Option<u8> {
        if self.is_empty() {
            None
        } else {
            let code = self.contents[usize::from(self.head)];
            self.head = (self.head + 1) % QUEUE_DEPTH;
            Some(code)
        }
    }
}

/// Device-to-host shift register. One bit per falling clock edge; yields the
/// raw 11-bit word (start, 8 data bits, parity, stop) once complete.
#[derive(Clone, Copy)]
pub struct RxFrame {
    pos: u8,
    bits: u16,
}

impl RxFrame {
    pub const fn new() -> RxFrame {
        RxFrame { pos: 0, bits: 0 }
    }

    /// Shifts in one sampled DATA level. Returns the finished word on the
    /// eleventh bit and rearms itself for the next frame.
    pub fn shift_in(&mut self, high: bool) -> Option<u16> {
        self.bits = (self.bits << 1) | u16::from(high);
        self.pos += 1;

        if self.pos >= 11 {
            let word = self.bits;
            self.pos = 0;
            self.bits = 0;
            Some(word)
        } else {
            None
        }
    }

    /// Validates and unpacks a captured word.
    ///
    /// The start bit must be 0 and the stop bit 1 or the frame is dropped.
    /// The parity bit is consumed without being checked; keyboards that got
    /// this far are already clocking sanely, and the original hardware
    /// shipped that way. Data arrives LSB-first on the wire but lands
    /// MSB-first in the register, hence the reversal.
    pub fn decode(word: u16) -> Option<u8> {
        let start = word & (1 << 10);
        let stop = word & 1;

        if start != 0 || stop == 0 {
            return None;
        }

        // Drop stop and parity, keep the eight data bits.
        Some(((word >> 2) as u8).swap_bits())
    }
}

/// Host-to-device shift register: 8 data bits, odd parity, stop bit, drained
/// LSB-first by the clock ISR. The start bit is not part of the register;
/// it is driven by hand during the request-to-send handshake.
#[derive(Clone, Copy)]
pub struct TxFrame {
    pos: u8,
    bits: u16,
}

impl TxFrame {
    pub const fn new() -> TxFrame {
        TxFrame { pos: 10, bits: 0 }
    }

    /// True once data, parity, and stop have all been clocked out.
    pub fn is_empty(&self) -> bool {
        self.pos > 9
    }

    pub fn reset(&mut self) {
        self.pos = 10;
        self.bits = 0;
    }

    /// Loads a byte for transmission. Refused while a previous frame is
    /// still draining.
    pub fn load(&mut self, byte: u8) -> Result<(), ()> {
        if !self.is_empty() {
            return Err(());
        }

        let parity = if util::odd_parity(byte) { 1 << 8 } else { 0 };
        self.bits = u16::from(byte) | parity | (1 << 9);
        self.pos = 0;
        Ok(())
    }

    pub fn shift_out(&mut self) -> Option<bool> {
        if self.is_empty() {
            return None;
        }

        let bit = (self.bits & 0x01) == 1;
        self.bits >>= 1;
        self.pos += 1;
        Some(bit)
    }
}
