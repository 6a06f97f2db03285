//! Scancode translation state machine.
//!
//! The translator never touches hardware. Each call to [`Translator::step`]
//! consumes the reply to the previous [`Action`] and hands the main loop the
//! next one; the main loop owns the actual waiting, byte I/O, and LED
//! commands. Keeping the machine pure keeps it testable off-target.

use bitflags::bitflags;

/// Set-2 make code to set-1 make code. Break codes reuse the same entry with
/// bit 7 set. Zero marks codes with no XT equivalent; anything past the end
/// of the table translates to zero as well.
#[rustfmt::skip]
const SET2_TO_SET1: [u8; 132] = [
  // x0    x1    x2    x3    x4    x5    x6    x7    x8    x9    xA    xB    xC    xD    xE    xF
    0x00, 0x43, 0x00, 0x3F, 0x3D, 0x3B, 0x3C, 0x58, 0x00, 0x44, 0x42, 0x40, 0x3E, 0x0F, 0x29, 0x00,
    0x00, 0x38, 0x2A, 0x00, 0x1D, 0x10, 0x02, 0x00, 0x00, 0x00, 0x2C, 0x1F, 0x1E, 0x11, 0x03, 0x00,
    0x00, 0x2E, 0x2D, 0x20, 0x12, 0x05, 0x04, 0x00, 0x00, 0x39, 0x2F, 0x21, 0x14, 0x13, 0x06, 0x00,
    0x00, 0x31, 0x30, 0x23, 0x22, 0x15, 0x07, 0x00, 0x00, 0x00, 0x32, 0x24, 0x16, 0x08, 0x09, 0x00,
    0x00, 0x33, 0x25, 0x17, 0x18, 0x0B, 0x0A, 0x00, 0x00, 0x34, 0x35, 0x26, 0x27, 0x19, 0x0C, 0x00,
    0x00, 0x00, 0x28, 0x00, 0x1A, 0x0D, 0x00, 0x00, 0x3A, 0x36, 0x1C, 0x1B, 0x00, 0x2B, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0E, 0x00, 0x00, 0x4F, 0x00, 0x4B, 0x47, 0x00, 0x00, 0x00,
    0x52, 0x53, 0x50, 0x4C, 0x4D, 0x48, 0x01, 0x45, 0x57, 0x4E, 0x51, 0x4A, 0x37, 0x49, 0x46, 0x00,
    0x00, 0x00, 0x00, 0x41,
];

/// Break codes are the make code with the high bit set.
const BREAK_BIT: u8 = 0x80;

/// Set-2 prefix for a key release.
const BREAK_PREFIX: u8 = 0xF0;
/// Set-2 prefix for extended keys.
const EXTENDED_PREFIX: u8 = 0xE0;
/// Set-2 prefix opening a Pause sequence.
const PAUSE_PREFIX: u8 = 0xE1;
/// Num Lock make code, doubling as the byte that closes a Pause sequence.
const NUM_LOCK: u8 = 0x77;
const SCROLL_LOCK: u8 = 0x7E;
const CAPS_LOCK: u8 = 0x58;

fn to_set1(code: u8) -> u8 {
    SET2_TO_SET1.get(usize::from(code)).copied().unwrap_or(0)
}

bitflags! {
    /// Shadow of the keyboard's lock-LED register, mirrored out over `ED`
    /// commands whenever a Lock key is released.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct Leds: u8 {
        const SCROLL = 0x01;
        const NUM = 0x02;
        const CAPS = 0x04;
    }
}

/// What the main loop should do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Empty the scancode queue (clock interrupt masked).
    FlushQueue,
    /// Send `ED` plus the new mask to the keyboard.
    SetLeds(Leds),
    /// Clock one translated byte out to the PC.
    EmitToHost(u8),
    /// Block until the keyboard produces a byte.
    AwaitKey,
}

// Command bytes the firmware sends on the AT side, plus the self-test byte
// it forges toward the PC after a soft reset.
impl Action {
    pub const RESET: u8 = 0xFF;
    pub const ECHO: u8 = 0xEE;
    pub const SET_LEDS: u8 = 0xED;
    pub const SELF_TEST_PASS: u8 = 0xAA;
}

/// Outcome of the previous [`Action`], reported back by the main loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reply {
    Boot,
    QueueFlushed,
    LedsSet(Leds),
    Emitted(u8),
    Key(u8),
    /// The watchdog reset the keyboard while we were waiting.
    KeyboardReset,
}

impl Reply {
    pub fn init() -> Reply {
        Reply::Boot
    }
}

#[derive(Clone, Copy)]
enum State {
    Boot,
    /// `FlushQueue` issued.
    Flushing,
    /// `AwaitKey` issued, normal stream position.
    Scanning,
    /// `AwaitKey` issued for the byte following an `F0` prefix.
    Breaking,
    /// `SetLeds` issued; the pending break code still has to go out.
    SettingLeds(u8),
    /// `EmitToHost` issued.
    Emitting,
}

pub struct Translator {
    state: State,
    leds: Leds,
    in_pause: bool,
}

impl Translator {
    pub fn start() -> Translator {
        Translator {
            state: State::Boot,
            leds: Leds::empty(),
            in_pause: false,
        }
    }

    /// Advances the machine one transition. `Err` means the reply does not
    /// answer the action that was issued.
    pub fn step(&mut self, reply: &Reply) -> Result<Action, ()> {
        let action = match (self.state, *reply) {
            (State::Boot, Reply::Boot) => {
                self.state = State::Flushing;
                Action::FlushQueue
            }
            (State::Flushing, Reply::QueueFlushed) => {
                self.state = State::Scanning;
                Action::AwaitKey
            }
            (State::Scanning, Reply::Key(code)) => self.classify(code),
            (State::Breaking, Reply::Key(code)) => self.finish_break(code),
            (State::SettingLeds(code), Reply::LedsSet(_)) => {
                self.state = State::Emitting;
                Action::EmitToHost(to_set1(code) | BREAK_BIT)
            }
            (State::Emitting, Reply::Emitted(_)) => {
                self.state = State::Scanning;
                Action::AwaitKey
            }
            (State::Scanning | State::Breaking, Reply::KeyboardReset) => {
                // The keyboard was power-cycled; its LED register and any
                // half-seen sequence are gone.
                self.leds = Leds::empty();
                self.in_pause = false;
                self.state = State::Flushing;
                Action::FlushQueue
            }
            _ => return Err(()),
        };

        Ok(action)
    }

    fn classify(&mut self, code: u8) -> Action {
        match code {
            // Protocol chatter (ack, self-test pass, resend, echo) never
            // reaches the PC.
            0xFA | 0xAA | 0xFE | 0xEE => Action::AwaitKey,
            BREAK_PREFIX => {
                self.state = State::Breaking;
                Action::AwaitKey
            }
            EXTENDED_PREFIX | PAUSE_PREFIX => {
                if code == PAUSE_PREFIX {
                    self.in_pause = true;
                }
                self.state = State::Emitting;
                Action::EmitToHost(code)
            }
            _ => {
                self.state = State::Emitting;
                Action::EmitToHost(to_set1(code))
            }
        }
    }

    fn finish_break(&mut self, code: u8) -> Action {
        // Pause embeds `F0 77` (the Num Lock release) in its fixed
        // sequence; the `E1` prefix latched us so this one must not
        // toggle the LED.
        if code == NUM_LOCK && self.in_pause {
            self.in_pause = false;
            self.state = State::Emitting;
            return Action::EmitToHost(to_set1(code) | BREAK_BIT);
        }

        match lock_led(code) {
            Some(led) => {
                self.leds.toggle(led);
                self.state = State::SettingLeds(code);
                Action::SetLeds(self.leds)
            }
            None => {
                self.state = State::Emitting;
                Action::EmitToHost(to_set1(code) | BREAK_BIT)
            }
        }
    }
}

fn lock_led(code: u8) -> Option<Leds> {
    match code {
        SCROLL_LOCK => Some(Leds::SCROLL),
        NUM_LOCK => Some(Leds::NUM),
        CAPS_LOCK => Some(Leds::CAPS),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    enum Event {
        Xt(u8),
        Leds(u8),
    }

    /// Drives the translator the way the firmware loop does, answering each
    /// action and logging the externally visible traffic.
    struct Bench {
        translator: Translator,
        pending: Action,
    }

    impl Bench {
        fn new() -> Bench {
            let mut translator = Translator::start();
            let mut pending = translator.step(&Reply::init()).unwrap();

            // Swallow the boot-time queue flush so tests start at AwaitKey.
            if pending == Action::FlushQueue {
                pending = translator.step(&Reply::QueueFlushed).unwrap();
            }

            Bench {
                translator,
                pending,
            }
        }

        fn feed(&mut self, codes: &[u8]) -> Vec<Event> {
            let mut events = Vec::new();
            let mut input = codes.iter().copied();

            loop {
                let reply = match self.pending {
                    Action::FlushQueue => Reply::QueueFlushed,
                    Action::SetLeds(mask) => {
                        events.push(Event::Leds(mask.bits()));
                        Reply::LedsSet(mask)
                    }
                    Action::EmitToHost(code) => {
                        events.push(Event::Xt(code));
                        Reply::Emitted(code)
                    }
                    Action::AwaitKey => match input.next() {
                        Some(code) => Reply::Key(code),
                        None => return events,
                    },
                };

                self.pending = self.translator.step(&reply).unwrap();
            }
        }

        fn soft_reset(&mut self) {
            assert_eq!(self.pending, Action::AwaitKey);
            self.pending = self.translator.step(&Reply::KeyboardReset).unwrap();
            assert_eq!(self.pending, Action::FlushQueue);
            self.pending = self.translator.step(&Reply::QueueFlushed).unwrap();
            assert_eq!(self.pending, Action::AwaitKey);
        }
    }

    #[test]
    fn simple_make_code() {
        let mut bench = Bench::new();
        assert_eq!(bench.feed(&[0x1C]), [Event::Xt(0x1E)]);
    }

    #[test]
    fn make_then_break() {
        let mut bench = Bench::new();
        assert_eq!(
            bench.feed(&[0x1C, 0xF0, 0x1C]),
            [Event::Xt(0x1E), Event::Xt(0x9E)]
        );
    }

    #[test]
    fn extended_prefix_passes_through() {
        let mut bench = Bench::new();
        assert_eq!(
            bench.feed(&[0xE0, 0x75]),
            [Event::Xt(0xE0), Event::Xt(0x48)]
        );
    }

    #[test]
    fn extended_break_passes_prefix_through() {
        let mut bench = Bench::new();
        assert_eq!(
            bench.feed(&[0xE0, 0xF0, 0x75]),
            [Event::Xt(0xE0), Event::Xt(0xC8)]
        );
    }

    #[test]
    fn protocol_chatter_is_swallowed() {
        let mut bench = Bench::new();
        assert!(bench.feed(&[0xFA, 0xAA, 0xFE, 0xEE]).is_empty());
    }

    #[test]
    fn scroll_lock_release_updates_leds_before_break_code() {
        let mut bench = Bench::new();
        assert_eq!(
            bench.feed(&[0x7E, 0xF0, 0x7E]),
            [Event::Xt(0x46), Event::Leds(0x01), Event::Xt(0xC6)]
        );
    }

    #[test]
    fn lock_leds_toggle_back_off() {
        let mut bench = Bench::new();
        assert_eq!(
            bench.feed(&[0xF0, 0x58]),
            [Event::Leds(0x04), Event::Xt(0xBA)]
        );
        assert_eq!(
            bench.feed(&[0xF0, 0x58]),
            [Event::Leds(0x00), Event::Xt(0xBA)]
        );
    }

    #[test]
    fn num_lock_release_toggles_num_led() {
        let mut bench = Bench::new();
        assert_eq!(
            bench.feed(&[0xF0, 0x77]),
            [Event::Leds(0x02), Event::Xt(0xC5)]
        );
    }

    #[test]
    fn pause_sequence_leaves_num_led_alone() {
        let mut bench = Bench::new();
        let events = bench.feed(&[0xE1, 0x14, 0x77, 0xE1, 0xF0, 0x14, 0xF0, 0x77]);
        assert_eq!(
            events,
            [
                Event::Xt(0xE1),
                Event::Xt(0x1D),
                Event::Xt(0x45),
                Event::Xt(0xE1),
                Event::Xt(0x9D),
                Event::Xt(0xC5),
            ]
        );

        // The embedded Num Lock release must not have shifted the shadow;
        // a real release afterwards toggles from a clean slate.
        assert_eq!(
            bench.feed(&[0xF0, 0x77]),
            [Event::Leds(0x02), Event::Xt(0xC5)]
        );
    }

    #[test]
    fn unknown_codes_translate_to_zero() {
        let mut bench = Bench::new();
        assert_eq!(bench.feed(&[0xF1]), [Event::Xt(0x00)]);
        assert_eq!(bench.feed(&[0xF0, 0xF1]), [Event::Xt(0x80)]);
    }

    #[test]
    fn soft_reset_clears_led_shadow() {
        let mut bench = Bench::new();
        assert_eq!(
            bench.feed(&[0xF0, 0x58]),
            [Event::Leds(0x04), Event::Xt(0xBA)]
        );

        bench.soft_reset();

        // Shadow went back to zero, so the next release turns Caps on
        // again instead of off.
        assert_eq!(
            bench.feed(&[0xF0, 0x58]),
            [Event::Leds(0x04), Event::Xt(0xBA)]
        );
    }

    #[test]
    fn soft_reset_clears_pause_latch() {
        let mut bench = Bench::new();
        assert_eq!(bench.feed(&[0xE1]), [Event::Xt(0xE1)]);

        bench.soft_reset();

        // No latch left over, so this is an ordinary Num Lock release.
        assert_eq!(
            bench.feed(&[0xF0, 0x77]),
            [Event::Leds(0x02), Event::Xt(0xC5)]
        );
    }

    #[test]
    fn mismatched_reply_is_rejected() {
        let mut translator = Translator::start();
        assert_eq!(translator.step(&Reply::Emitted(0x00)), Err(()));
    }
}
