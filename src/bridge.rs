//! Interrupt handlers, wire-level transmit paths, and the main bridge loop.

use core::cell::{Cell, RefCell};

use msp430::critical_section as mspcs;
use msp430::interrupt::{CriticalSection, Mutex};
use msp430_rt::entry;
use msp430g2211::{interrupt, Peripherals};
use portable_atomic::{AtomicBool, AtomicU8, Ordering};

use crate::board::Board;
use crate::buffer::{RxFrame, ScanQueue, TxFrame};
use crate::fsm::{Action, Leds, Reply, Translator};
use crate::pins::{self, Pin};

// Timer_A2 runs at 100 kHz, so one tick is 10 us.
macro_rules! us_to_ticks {
    ($u:expr) => {
        (($u as u32 / 10) + 1) as u16
    };
}

/// Shared deadline for a stalled AT frame and a missing transmit ACK.
const FRAME_TIMEOUT_TICKS: u16 = us_to_ticks!(20_000);
/// The keyboard runs its self-test after a reset command; stay out of its
/// way until the `AA` answer has had time to arrive.
const RESET_SETTLE_TICKS: u16 = us_to_ticks!(650_000);
/// Gap between `ED` and its mask byte, and general inter-command spacing.
const COMMAND_GAP_TICKS: u16 = us_to_ticks!(10_000);
/// Half-period of the XT clock while a bit is on the wire.
const XT_BIT_HOLD_TICKS: u16 = us_to_ticks!(26);
/// Request-to-send: AT CLK held low this long before the start bit.
const RTS_HOLD_TICKS: u16 = us_to_ticks!(100);
/// Start bit setup time before CLK is handed back to the keyboard.
const START_HOLD_TICKS: u16 = us_to_ticks!(33);

static TIMEOUT: AtomicBool = AtomicBool::new(false);
static HOST_MODE: AtomicBool = AtomicBool::new(false);
static DEVICE_ACK: AtomicBool = AtomicBool::new(false);
/// Frames dropped for a bad start or stop bit since power-on.
static BAD_KEYS: AtomicU8 = AtomicU8::new(0);

static SCAN_QUEUE: Mutex<RefCell<ScanQueue>> = Mutex::new(RefCell::new(ScanQueue::new()));
static RX_FRAME: Mutex<Cell<RxFrame>> = Mutex::new(Cell::new(RxFrame::new()));
static TX_FRAME: Mutex<Cell<TxFrame>> = Mutex::new(Cell::new(TxFrame::new()));

#[interrupt]
fn TIMERA0(cs: CriticalSection) {
    TIMEOUT.store(true, Ordering::SeqCst);

    // Interrupts are not enabled until the board is installed.
    let brd = Board::get(cs).unwrap();

    // Writing 0 halts the timer in up mode; the one-shot has fired. CCIFG
    // was already cleared on entry.
    brd.timer.taccr0.write(|w| w.taccr0().bits(0x0000));
}

#[interrupt]
fn PORT1(cs: CriticalSection) {
    let brd = Board::get(cs).unwrap();
    let port = &brd.port;

    if HOST_MODE.load(Ordering::SeqCst) {
        let mut tx = TX_FRAME.borrow(cs).get();

        if let Some(bit) = tx.shift_out() {
            if bit {
                pins::set(port, Pin::AtData);
            } else {
                pins::unset(port, Pin::AtData);
            }

            // The stop bit just went out; the keyboard drives its ACK on
            // the next edge, so the lines go back immediately.
            if tx.is_empty() {
                pins::at_idle(port);
            }
        } else if pins::is_unset(port, Pin::AtData) {
            DEVICE_ACK.store(true, Ordering::SeqCst);
            tx.reset();
        }

        TX_FRAME.borrow(cs).set(tx);
    } else {
        let mut rx = RX_FRAME.borrow(cs).get();

        if let Some(word) = rx.shift_in(pins::is_set(port, Pin::AtData)) {
            // Keep CLK inhibited from the last sampled bit until the lines
            // are re-armed, or the keyboard clocks the next frame into
            // nothing.
            pins::at_inhibit(port);

            match RxFrame::decode(word) {
                Some(code) => {
                    if let Ok(mut queue) = SCAN_QUEUE.borrow(cs).try_borrow_mut() {
                        queue.push(code);
                    }
                }
                None => {
                    BAD_KEYS.fetch_add(1, Ordering::SeqCst);
                }
            }

            pins::at_idle(port);
        }

        RX_FRAME.borrow(cs).set(rx);
    }

    pins::clear_at_clk_int(port);
}

fn init(cs: CriticalSection) {
    let p = Peripherals::take().unwrap();

    p.WATCHDOG_TIMER
        .wdtctl
        .write(|w| w.wdtpw().password().wdthold().set_bit());

    pins::idle(&p.PORT_1_2);

    // Nominal 1.6 MHz main clock: the factory 1 MHz calibration bumped two
    // RSEL steps (x1.35 each) and one DCO step back down (/1.08). Slower
    // clocks miss AT edges while the FSM is busy. SMCLK then divides by 4,
    // and Timer_A2 divides by 4 again for the 100 kHz tick.
    let calbc1 = p.CALIBRATION_DATA.calbc1_1mhz.read().calbc1_1mhz().bits();
    let caldco = p.CALIBRATION_DATA.caldco_1mhz.read().caldco_1mhz().bits();

    p.SYSTEM_CLOCK.bcsctl1.write(|w| w.bcsctl1().bits(calbc1 + 2));
    p.SYSTEM_CLOCK.dcoctl.write(|w| {
        w.dcoctl().bits(if caldco >= 32 { caldco - 32 } else { caldco })
    });
    p.SYSTEM_CLOCK.bcsctl2.write(|w| w.divs().divs_2());

    p.TIMER_A2.taccr0.write(|w| w.taccr0().bits(0x0000));
    p.TIMER_A2
        .tactl
        .write(|w| w.tassel().tassel_2().id().id_2().mc().mc_1());
    p.TIMER_A2.tacctl0.write(|w| w.ccie().set_bit());

    let brd = Board {
        port: p.PORT_1_2,
        timer: p.TIMER_A2,
    };
    brd.install(cs).unwrap();
}

#[entry(interrupt_enable(pre_interrupt = init))]
fn main() -> ! {
    // Power-on: reset the keyboard, sit out its self-test, then probe the
    // link with an echo. Both answers land in the translator's ignore set.
    send_to_keyboard(Action::RESET).unwrap();
    delay(RESET_SETTLE_TICKS).unwrap();
    send_to_keyboard(Action::ECHO).unwrap();
    delay(COMMAND_GAP_TICKS).unwrap();

    let mut translator = Translator::start();
    let mut reply = Reply::init();

    loop {
        let action = translator.step(&reply).unwrap();

        reply = match action {
            Action::FlushQueue => {
                mspcs::with(|cs| {
                    if let Ok(mut queue) = SCAN_QUEUE.borrow(cs).try_borrow_mut() {
                        queue.flush();
                    }
                });
                Reply::QueueFlushed
            }
            Action::SetLeds(leds) => {
                update_leds(leds).unwrap();
                Reply::LedsSet(leds)
            }
            Action::EmitToHost(code) => {
                send_to_host(code).unwrap();
                Reply::Emitted(code)
            }
            Action::AwaitKey => wait_for_scancode().unwrap(),
        };
    }
}

/// Blocks until the keyboard delivers a byte. If a frame stalls with CLK
/// held low for 20 ms, the keyboard gets a reset, the host gets a forged
/// self-test pass so it re-initializes cleanly, and the soft reset is
/// reported instead of a key.
fn wait_for_scancode() -> Result<Reply, ()> {
    fn take_scancode() -> Option<u8> {
        mspcs::with(|cs| {
            SCAN_QUEUE
                .borrow(cs)
                .try_borrow_mut()
                .map_or(None, |mut queue| queue.take())
        })
    }

    fn at_clk_low() -> Result<bool, ()> {
        mspcs::with(|cs| {
            let brd = Board::get(cs).ok_or(())?;
            Ok(pins::is_unset(&brd.port, Pin::AtClk))
        })
    }

    loop {
        if let Some(code) = take_scancode() {
            return Ok(Reply::Key(code));
        }

        // CLK low with nothing buffered means a frame is in flight.
        if at_clk_low()? {
            start_timer(FRAME_TIMEOUT_TICKS)?;

            while at_clk_low()? {
                if TIMEOUT.load(Ordering::SeqCst) {
                    // The keyboard may answer a back-to-back reset with a
                    // resend request (FE); that is ignored downstream.
                    send_to_keyboard(Action::RESET)?;
                    send_to_host(Action::SELF_TEST_PASS)?;
                    return Ok(Reply::KeyboardReset);
                }
            }

            stop_timer()?;
        }
    }
}

fn send_to_keyboard(byte: u8) -> Result<(), ()> {
    fn keyboard_busy() -> Result<bool, ()> {
        mspcs::with(|cs| {
            let brd = Board::get(cs).ok_or(())?;

            let busy = pins::is_unset(&brd.port, Pin::AtClk);
            if !busy {
                // Seize the lines inside the same critical section the
                // idle check passed in.
                pins::at_inhibit(&brd.port);
            }

            Ok(busy)
        })
    }

    mspcs::with(|cs| {
        let brd = Board::get(cs).ok_or(())?;

        let mut tx = TX_FRAME.borrow(cs).get();
        tx.load(byte)?;
        TX_FRAME.borrow(cs).set(tx);

        // With HOST_MODE still clear the interrupt cannot touch the frame;
        // masking CLK edges only keeps a half-received byte from advancing
        // while the lines turn around. The receive register is left alone:
        // the keyboard retries an interrupted byte on its own.
        pins::disable_at_clk_int(&brd.port);
        Ok(())
    })?;

    while keyboard_busy()? {}

    delay(RTS_HOLD_TICKS)?;

    mspcs::with(|cs| {
        let brd = Board::get(cs).ok_or(())?;
        // Start bit.
        pins::unset(&brd.port, Pin::AtData);
        Ok(())
    })?;

    delay(START_HOLD_TICKS)?;

    mspcs::with(|cs| {
        let brd = Board::get(cs).ok_or(())?;
        let port = &brd.port;

        // Hand CLK back to the keyboard, latching the output high first so
        // the pull-up is never fought, then arm the transmit half of the
        // clock interrupt.
        pins::set(port, Pin::AtClk);
        pins::mk_in(port, Pin::AtClk);
        pins::clear_at_clk_int(port);
        pins::enable_at_clk_int(port);

        HOST_MODE.store(true, Ordering::SeqCst);
        DEVICE_ACK.store(false, Ordering::SeqCst);
        Ok(())
    })?;

    start_timer(FRAME_TIMEOUT_TICKS)?;

    while !(DEVICE_ACK.load(Ordering::SeqCst) || TIMEOUT.load(Ordering::SeqCst)) {}

    stop_timer()?;

    mspcs::with(|cs| {
        // A missing ACK is not fatal, but the frame must not be left
        // half-drained for the next send.
        if !DEVICE_ACK.load(Ordering::SeqCst) {
            let mut tx = TX_FRAME.borrow(cs).get();
            tx.reset();
            TX_FRAME.borrow(cs).set(tx);
        }
    });

    HOST_MODE.store(false, Ordering::SeqCst);

    Ok(())
}

fn send_host_bit(bit: bool) -> Result<(), ()> {
    mspcs::with(|cs| {
        let brd = Board::get(cs).ok_or(())?;
        let port = &brd.port;

        if bit {
            pins::set(port, Pin::XtData);
        } else {
            pins::unset(port, Pin::XtData);
        }
        pins::unset(port, Pin::XtClk);
        Ok(())
    })?;

    delay(XT_BIT_HOLD_TICKS)?;

    mspcs::with(|cs| {
        let brd = Board::get(cs).ok_or(())?;
        pins::set(&brd.port, Pin::XtClk);
        Ok(())
    })
}

fn send_to_host(code: u8) -> Result<(), ()> {
    fn host_inhibited() -> Result<bool, ()> {
        mspcs::with(|cs| {
            let brd = Board::get(cs).ok_or(())?;
            let port = &brd.port;

            let held_low =
                pins::is_unset(port, Pin::XtClk) || pins::is_unset(port, Pin::XtData);
            if !held_low {
                pins::xt_grab(port);
            }

            Ok(held_low)
        })
    }

    // The host cannot send bytes; it only holds CLK or DATA low to stall
    // this side. Wait for both lines, grabbing them in the same critical
    // section the check passes in.
    while host_inhibited()? {}

    // Two start bits, then data LSB-first.
    send_host_bit(false)?;
    send_host_bit(true)?;

    let mut bits = code;
    for _ in 0..8 {
        send_host_bit(bits & 0x01 != 0)?;
        bits >>= 1;
    }

    mspcs::with(|cs| {
        let brd = Board::get(cs).ok_or(())?;
        pins::xt_release(&brd.port);
        Ok(())
    })
}

fn update_leds(leds: Leds) -> Result<(), ()> {
    send_to_keyboard(Action::SET_LEDS)?;
    delay(COMMAND_GAP_TICKS)?;
    send_to_keyboard(leds.bits())
}

fn delay(ticks: u16) -> Result<(), ()> {
    start_timer(ticks)?;
    while !TIMEOUT.load(Ordering::SeqCst) {}
    Ok(())
}

fn start_timer(ticks: u16) -> Result<(), ()> {
    mspcs::with(|cs| {
        let brd = Board::get(cs).ok_or(())?;

        brd.timer.tacctl0.modify(|_, w| w.ccifg().clear_bit());
        TIMEOUT.store(false, Ordering::SeqCst);
        brd.timer.taccr0.write(|w| w.taccr0().bits(ticks));
        Ok(())
    })
}

fn stop_timer() -> Result<(), ()> {
    mspcs::with(|cs| {
        let brd = Board::get(cs).ok_or(())?;

        brd.timer.taccr0.write(|w| w.taccr0().bits(0x0000));
        brd.timer.tacctl0.modify(|_, w| w.ccifg().clear_bit());
        Ok(())
    })
}
