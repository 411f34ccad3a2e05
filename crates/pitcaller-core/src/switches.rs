//! Debounced lane switch polling
//!
//! Each lane has a momentary switch wired to a GPIO input. The circuit idles at
//! one level and the switch flips it to the [`ActiveLevel`] while pressed. The
//! poller only reports which lanes currently read active; the idle gate that
//! turns those reads into single triggers lives in
//! [`LaneStore::trigger_switch`](crate::lanes::LaneStore::trigger_switch).

use embassy_time::{Duration, Instant};
use embedded_hal::digital::InputPin;
use heapless::Vec;
use log::warn;

use crate::lanes::{LANE_COUNT, LaneIndex};

/// Guaranteed interval between two switch polls
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Level a lane input reads while its switch is triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveLevel {
    High,
    Low,
}

/// Reads every lane input and reports the lanes at their active level
pub struct SwitchPoller<P>
where
    P: InputPin,
{
    pins: [P; LANE_COUNT],
    active: ActiveLevel,
}

impl<P> SwitchPoller<P>
where
    P: InputPin,
{
    /// Create a poller over one input per lane, in lane order
    pub fn new(pins: [P; LANE_COUNT], active: ActiveLevel) -> Self {
        Self { pins, active }
    }

    /// Return every lane whose input currently reads the active level.
    ///
    /// A failed read is logged and the lane treated as not triggered.
    pub fn triggered_lanes(&mut self) -> Vec<LaneIndex, LANE_COUNT> {
        let mut triggered = Vec::new();
        for (pin, index) in self.pins.iter_mut().zip(LaneIndex::all()) {
            let read = match self.active {
                ActiveLevel::High => pin.is_high(),
                ActiveLevel::Low => pin.is_low(),
            };
            match read {
                Ok(true) => {
                    // One slot per lane, so this never overflows
                    let _ = triggered.push(index);
                }
                Ok(false) => {}
                Err(e) => warn!("Failed to read switch for {}: {:?}", index, e),
            }
        }
        triggered
    }
}

/// Fixed cadence that bounds the worst-case debounce latency
///
/// The event loop polls opportunistically on every pass; this cadence makes
/// sure a poll still happens every [`POLL_INTERVAL`] when the loop is busy.
#[derive(Debug, Clone, Copy)]
pub struct PollCadence {
    interval: Duration,
    last_poll: Instant,
}

impl PollCadence {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_poll: Instant::from_ticks(0),
        }
    }

    /// Returns `true` and restarts the interval when a poll is due at `now`
    pub fn is_due(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last_poll) >= self.interval {
            self.last_poll = now;
            true
        } else {
            false
        }
    }
}

impl Default for PollCadence {
    fn default() -> Self {
        Self::new(POLL_INTERVAL)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use core::cell::Cell;
    use core::convert::Infallible;
    use embedded_hal::digital::{Error, ErrorKind, ErrorType};

    /// Input pin whose level is shared with the test body
    pub(crate) struct FakePin<'a> {
        pub(crate) high: &'a Cell<bool>,
    }

    impl ErrorType for FakePin<'_> {
        type Error = Infallible;
    }

    impl InputPin for FakePin<'_> {
        fn is_high(&mut self) -> Result<bool, Self::Error> {
            Ok(self.high.get())
        }

        fn is_low(&mut self) -> Result<bool, Self::Error> {
            Ok(!self.high.get())
        }
    }

    #[derive(Debug)]
    struct BrokenPinError;

    impl Error for BrokenPinError {
        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    struct BrokenPin;

    impl ErrorType for BrokenPin {
        type Error = BrokenPinError;
    }

    impl InputPin for BrokenPin {
        fn is_high(&mut self) -> Result<bool, Self::Error> {
            Err(BrokenPinError)
        }

        fn is_low(&mut self) -> Result<bool, Self::Error> {
            Err(BrokenPinError)
        }
    }

    #[test]
    fn test_active_high() {
        let levels: [Cell<bool>; LANE_COUNT] = Default::default();
        let pins = core::array::from_fn(|i| FakePin { high: &levels[i] });
        let mut poller = SwitchPoller::new(pins, ActiveLevel::High);

        assert!(poller.triggered_lanes().is_empty());

        levels[1].set(true);
        levels[3].set(true);
        let triggered = poller.triggered_lanes();
        assert_eq!(
            triggered.as_slice(),
            &[LaneIndex::new(1).unwrap(), LaneIndex::new(3).unwrap()]
        );
    }

    #[test]
    fn test_active_low() {
        let levels: [Cell<bool>; LANE_COUNT] = core::array::from_fn(|_| Cell::new(true));
        let pins = core::array::from_fn(|i| FakePin { high: &levels[i] });
        let mut poller = SwitchPoller::new(pins, ActiveLevel::Low);

        assert!(poller.triggered_lanes().is_empty());
        levels[0].set(false);
        assert_eq!(
            poller.triggered_lanes().as_slice(),
            &[LaneIndex::new(0).unwrap()]
        );
    }

    #[test]
    fn test_read_errors_are_not_triggers() {
        let mut poller = SwitchPoller::new(
            [BrokenPin, BrokenPin, BrokenPin, BrokenPin],
            ActiveLevel::High,
        );
        assert!(poller.triggered_lanes().is_empty());
    }

    #[test]
    fn test_cadence() {
        let mut cadence = PollCadence::default();
        assert!(cadence.is_due(Instant::from_millis(50)));
        assert!(!cadence.is_due(Instant::from_millis(60)));
        assert!(!cadence.is_due(Instant::from_millis(99)));
        assert!(cadence.is_due(Instant::from_millis(100)));
        // A clock that appears to run backwards never makes a poll due
        assert!(!cadence.is_due(Instant::from_millis(20)));
    }
}
