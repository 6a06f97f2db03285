//! AT/PS2 to XT keyboard protocol bridge for the MSP430G2211.
//!
//! The clock-edge interrupt reassembles AT frames from the keyboard (or,
//! while a command is going the other way, drains them bit by bit); the main
//! loop pulls received bytes through the set-2 to set-1 translator and
//! clocks the results out to the PC on the XT pair.

#![cfg_attr(target_arch = "msp430", no_std)]
#![cfg_attr(target_arch = "msp430", no_main)]
#![cfg_attr(not(target_arch = "msp430"), allow(dead_code))]

#[cfg(target_arch = "msp430")]
extern crate panic_msp430;

mod buffer;
mod fsm;
mod util;

#[cfg(target_arch = "msp430")]
mod board;
#[cfg(target_arch = "msp430")]
mod bridge;
#[cfg(target_arch = "msp430")]
mod pins;

// Hosted builds exist to run the unit tests; the firmware entry point is
// in `bridge`.
#[cfg(not(target_arch = "msp430"))]
fn main() {}
