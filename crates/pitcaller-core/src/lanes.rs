//! Lane state store
//!
//! Holds the authoritative state of every physical lane: pilot name, display
//! label, countdown and pitting flag. All mutation goes through the named
//! operations on [`LaneStore`] so the countdown invariants live in one place:
//!
//! - `countdown_remaining` never exceeds the configured countdown length.
//! - It is only re-armed by a start trigger and only decreases through
//!   [`LaneStore::tick`].
//! - A switch trigger is ignored while the lane is counting down; a remote
//!   start always re-arms.

use core::fmt::{self, Write};

use embassy_time::{Duration, Instant};
use heapless::String;
use log::debug;

/// Number of physical lanes on the device
pub const LANE_COUNT: usize = 4;

/// Maximum length of a pilot name in characters, matching the UI's input limit
pub const PILOT_NAME_MAX_CHARS: usize = 24;

/// Storage for a pilot name: [`PILOT_NAME_MAX_CHARS`] characters of up to 4 UTF-8 bytes
pub const PILOT_NAME_CAPACITY: usize = PILOT_NAME_MAX_CHARS * 4;

/// Maximum length of a lane label ("Lane N: " plus the pilot name)
pub const LABEL_CAPACITY: usize = "Lane N: ".len() + PILOT_NAME_CAPACITY;

/// Time between two decrements of a running countdown
pub const TICK_INTERVAL: Duration = Duration::from_millis(1000);

pub type PilotName = String<PILOT_NAME_CAPACITY>;
pub type Label = String<LABEL_CAPACITY>;

/// A lane index that is known to be in `[0, LANE_COUNT)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LaneIndex(u8);

impl LaneIndex {
    /// Validate a raw 0-based lane index
    pub const fn new(raw: usize) -> Option<Self> {
        if raw < LANE_COUNT {
            Some(Self(raw as u8))
        } else {
            None
        }
    }

    /// 0-based index, as used on the wire
    pub const fn get(self) -> usize {
        self.0 as usize
    }

    /// 1-based lane number, as printed on the device
    pub const fn number(self) -> usize {
        self.0 as usize + 1
    }

    /// Iterate over every lane in index order
    pub fn all() -> impl Iterator<Item = LaneIndex> {
        (0..LANE_COUNT as u8).map(LaneIndex)
    }
}

impl fmt::Display for LaneIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lane {}", self.number())
    }
}

/// State of a single lane
#[derive(Debug, Clone)]
pub struct LaneState {
    label: Label,
    pilot_name: PilotName,
    countdown_remaining: u16,
    is_pitting: bool,
    /// Instant of the last arm or decrement
    last_tick: Instant,
}

impl LaneState {
    fn new(index: LaneIndex) -> Self {
        Self {
            label: format_label(index, ""),
            pilot_name: PilotName::new(),
            countdown_remaining: 0,
            is_pitting: false,
            last_tick: Instant::from_ticks(0),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn pilot_name(&self) -> &str {
        &self.pilot_name
    }

    /// Seconds left on the countdown, `0` when idle
    pub fn countdown_remaining(&self) -> u16 {
        self.countdown_remaining
    }

    pub fn is_pitting(&self) -> bool {
        self.is_pitting
    }

    /// Whether the lane is idle and a switch trigger would be accepted
    pub fn is_idle(&self) -> bool {
        self.countdown_remaining == 0
    }
}

/// Lane-scoped notification produced each time a lane is armed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PitAnnouncement {
    pub lane: LaneIndex,
    pub pilot_name: PilotName,
    pub is_pitting: bool,
}

/// Owner of the lane array
pub struct LaneStore {
    lanes: [LaneState; LANE_COUNT],
    countdown_secs: u16,
}

impl LaneStore {
    /// Create a store with every lane idle, unnamed and not pitting
    pub fn new(countdown_secs: u16) -> Self {
        Self {
            lanes: core::array::from_fn(|i| LaneState::new(LaneIndex(i as u8))),
            countdown_secs,
        }
    }

    /// Configured countdown length in seconds
    pub fn countdown_secs(&self) -> u16 {
        self.countdown_secs
    }

    pub fn lane(&self, index: LaneIndex) -> &LaneState {
        &self.lanes[index.get()]
    }

    /// All lanes in index order
    pub fn lanes(&self) -> &[LaneState; LANE_COUNT] {
        &self.lanes
    }

    /// Handle a physical switch trigger.
    ///
    /// Only an idle lane is armed; while the countdown runs, repeated reads of a
    /// held or bouncing switch are ignored and `None` is returned.
    pub fn trigger_switch(&mut self, index: LaneIndex, now: Instant) -> Option<PitAnnouncement> {
        if !self.lane(index).is_idle() {
            return None;
        }
        Some(self.arm(index, now))
    }

    /// Handle a remote start command. Re-arms the lane whatever its countdown.
    pub fn start(&mut self, index: LaneIndex, now: Instant) -> PitAnnouncement {
        self.arm(index, now)
    }

    /// Set the pilot name and recompute the label. Countdown and pitting are untouched.
    pub fn set_pilot(&mut self, index: LaneIndex, name: PilotName) {
        let lane = &mut self.lanes[index.get()];
        lane.label = format_label(index, &name);
        lane.pilot_name = name;
        debug!("{} label is now {:?}", index, lane.label.as_str());
    }

    /// Advance every running countdown by at most one second.
    ///
    /// Each lane decrements on its own schedule, measured from its last arm or
    /// decrement. Returns `true` when at least one lane changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        let mut changed = false;
        for lane in self.lanes.iter_mut().filter(|lane| !lane.is_idle()) {
            if now.saturating_duration_since(lane.last_tick) >= TICK_INTERVAL {
                lane.countdown_remaining -= 1;
                lane.last_tick = now;
                changed = true;
            }
        }
        changed
    }

    fn arm(&mut self, index: LaneIndex, now: Instant) -> PitAnnouncement {
        let countdown_secs = self.countdown_secs;
        let lane = &mut self.lanes[index.get()];
        lane.countdown_remaining = countdown_secs;
        lane.last_tick = now;
        lane.is_pitting = !lane.is_pitting;
        debug!(
            "{} armed for {}s, pitting={}",
            index, countdown_secs, lane.is_pitting
        );

        PitAnnouncement {
            lane: index,
            pilot_name: lane.pilot_name.clone(),
            is_pitting: lane.is_pitting,
        }
    }
}

fn format_label(index: LaneIndex, pilot_name: &str) -> Label {
    let mut label = Label::new();
    // LABEL_CAPACITY covers "Lane N: " plus a full PILOT_NAME_CAPACITY name
    let _ = if pilot_name.is_empty() {
        write!(label, "Lane {}", index.number())
    } else {
        write!(label, "Lane {}: {}", index.number(), pilot_name)
    };
    label
}
