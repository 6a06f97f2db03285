//! Peripherals shared between thread mode and the interrupt handlers.

use core::cell::OnceCell;

use msp430::interrupt::{CriticalSection, Mutex};
use msp430g2211::{PORT_1_2, TIMER_A2};

pub struct Board {
    pub port: PORT_1_2,
    pub timer: TIMER_A2,
}

static BOARD: Mutex<OnceCell<Board>> = Mutex::new(OnceCell::new());

impl Board {
    /// Parks the peripherals for shared access. Errors if called twice.
    pub fn install(self, cs: CriticalSection) -> Result<(), ()> {
        BOARD.borrow(cs).set(self).map_err(|_| ())
    }

    /// `None` only before `install` has run, i.e. never once interrupts
    /// are live.
    pub fn get<'cs>(cs: CriticalSection<'cs>) -> Option<&'cs Board> {
        BOARD.borrow(cs).get()
    }
}
