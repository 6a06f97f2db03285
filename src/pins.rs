//! The four signal lines, all on I/O port 1.
//!
//! AT CLK also serves as the falling-edge interrupt source. Lines idle high
//! behind pull-ups; a line is "driven" only while its direction bit is out.

use msp430g2211::PORT_1_2;

#[derive(Clone, Copy)]
pub enum Pin {
    AtClk,
    XtClk,
    XtData,
    AtData,
}

impl Pin {
    const fn mask(self) -> u8 {
        match self {
            Pin::AtClk => 1 << 0,
            Pin::XtClk => 1 << 2,
            Pin::XtData => 1 << 3,
            Pin::AtData => 1 << 4,
        }
    }
}

const AT_LINES: u8 = Pin::AtClk.mask() | Pin::AtData.mask();
const XT_LINES: u8 = Pin::XtClk.mask() | Pin::XtData.mask();

pub fn set(port: &PORT_1_2, pin: Pin) {
    port.p1out
        .modify(|r, w| w.p1out().bits(r.p1out().bits() | pin.mask()));
}

pub fn unset(port: &PORT_1_2, pin: Pin) {
    port.p1out
        .modify(|r, w| w.p1out().bits(r.p1out().bits() & !pin.mask()));
}

pub fn mk_in(port: &PORT_1_2, pin: Pin) {
    port.p1dir
        .modify(|r, w| w.p1dir().bits(r.p1dir().bits() & !pin.mask()));
}

pub fn is_set(port: &PORT_1_2, pin: Pin) -> bool {
    port.p1in.read().p1in().bits() & pin.mask() != 0
}

pub fn is_unset(port: &PORT_1_2, pin: Pin) -> bool {
    !is_set(port, pin)
}

/// Power-on line state: everything released, AT CLK armed to interrupt on
/// falling edges.
pub fn idle(port: &PORT_1_2) {
    port.p1out
        .modify(|r, w| w.p1out().bits(r.p1out().bits() | AT_LINES | XT_LINES));
    port.p1dir
        .modify(|r, w| w.p1dir().bits(r.p1dir().bits() & !(AT_LINES | XT_LINES)));
    port.p1ies
        .modify(|r, w| w.p1ies().bits(r.p1ies().bits() | Pin::AtClk.mask()));
    clear_at_clk_int(port);
    enable_at_clk_int(port);
}

/// Releases both AT lines to the keyboard.
pub fn at_idle(port: &PORT_1_2) {
    port.p1out
        .modify(|r, w| w.p1out().bits(r.p1out().bits() | AT_LINES));
    port.p1dir
        .modify(|r, w| w.p1dir().bits(r.p1dir().bits() & !AT_LINES));
}

/// Holds AT CLK low so the keyboard buffers instead of clocking. DATA stays
/// high so a request-to-send can follow.
pub fn at_inhibit(port: &PORT_1_2) {
    port.p1out.modify(|r, w| {
        w.p1out()
            .bits((r.p1out().bits() | Pin::AtData.mask()) & !Pin::AtClk.mask())
    });
    port.p1dir
        .modify(|r, w| w.p1dir().bits(r.p1dir().bits() | AT_LINES));
}

/// Takes both XT lines as outputs, latched high. Call only after observing
/// the host has released them.
pub fn xt_grab(port: &PORT_1_2) {
    port.p1out
        .modify(|r, w| w.p1out().bits(r.p1out().bits() | XT_LINES));
    port.p1dir
        .modify(|r, w| w.p1dir().bits(r.p1dir().bits() | XT_LINES));
}

/// Hands the XT lines back to the host, DATA released high first.
pub fn xt_release(port: &PORT_1_2) {
    port.p1out
        .modify(|r, w| w.p1out().bits(r.p1out().bits() | XT_LINES));
    port.p1dir
        .modify(|r, w| w.p1dir().bits(r.p1dir().bits() & !XT_LINES));
}

pub fn enable_at_clk_int(port: &PORT_1_2) {
    port.p1ie
        .modify(|r, w| w.p1ie().bits(r.p1ie().bits() | Pin::AtClk.mask()));
}

pub fn disable_at_clk_int(port: &PORT_1_2) {
    port.p1ie
        .modify(|r, w| w.p1ie().bits(r.p1ie().bits() & !Pin::AtClk.mask()));
}

pub fn clear_at_clk_int(port: &PORT_1_2) {
    port.p1ifg
        .modify(|r, w| w.p1ifg().bits(r.p1ifg().bits() & !Pin::AtClk.mask()));
}
