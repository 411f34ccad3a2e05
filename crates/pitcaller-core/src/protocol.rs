//! Push protocol codec
//!
//! Inbound frames are short plain-text commands typed by the browser UI:
//!
//! | Frame                | Command                      |
//! |----------------------|------------------------------|
//! | `start<d>`           | [`Command::Start`]           |
//! | `update<d>:<name>`   | [`Command::UpdatePilot`]     |
//!
//! `<d>` is a single ASCII digit holding the 0-based lane index. Anything else
//! is rejected with a [`CommandError`] and dropped by the caller.
//!
//! Outbound frames are JSON objects tagged by a `type` field: a full snapshot
//! of all lanes (`"update"`) or a single-lane pit announcement (`"announce"`).

use core::str::FromStr;

use heapless::String;
use serde::Serialize;
use thiserror_no_std::Error;

use crate::lanes::{
    LANE_COUNT, LaneIndex, LaneStore, PILOT_NAME_MAX_CHARS, PilotName, PitAnnouncement,
};

/// Maximum size of one outbound frame in bytes
pub const FRAME_CAPACITY: usize = 1280;

/// Text frame sent to every new connection before the first snapshot
pub const GREETING: &str = "Connected";

pub type Frame = String<FRAME_CAPACITY>;

const START_PREFIX: &str = "start";
const UPDATE_PREFIX: &str = "update";
const NAME_SEPARATOR: char = ':';

/// A validated client command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Arm the lane's countdown and flip its pitting flag
    Start { lane: LaneIndex },
    /// Rename the lane's pilot
    UpdatePilot { lane: LaneIndex, name: PilotName },
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    #[error("unrecognized command")]
    Unrecognized,
    #[error("missing lane index")]
    MissingLane,
    #[error("lane index is not a digit: {0:?}")]
    InvalidLane(char),
    #[error("lane index {0} is out of range")]
    LaneOutOfRange(u32),
    #[error("missing ':' after lane index")]
    MissingSeparator,
    #[error("unexpected input after lane index")]
    TrailingInput,
    #[error("pilot name is too long")]
    NameTooLong,
    #[error("pilot name contains control characters")]
    InvalidName,
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(frame: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = frame.strip_prefix(START_PREFIX) {
            let (lane, rest) = parse_lane(rest)?;
            if !rest.is_empty() {
                return Err(CommandError::TrailingInput);
            }
            Ok(Command::Start { lane })
        } else if let Some(rest) = frame.strip_prefix(UPDATE_PREFIX) {
            let (lane, rest) = parse_lane(rest)?;
            let name = rest
                .strip_prefix(NAME_SEPARATOR)
                .ok_or(CommandError::MissingSeparator)?;
            Ok(Command::UpdatePilot {
                lane,
                name: parse_pilot_name(name)?,
            })
        } else {
            Err(CommandError::Unrecognized)
        }
    }
}

/// Split a single leading digit off `input` and validate it as a lane index
fn parse_lane(input: &str) -> Result<(LaneIndex, &str), CommandError> {
    let mut chars = input.chars();
    let c = chars.next().ok_or(CommandError::MissingLane)?;
    let digit = c.to_digit(10).ok_or(CommandError::InvalidLane(c))?;
    let lane = LaneIndex::new(digit as usize).ok_or(CommandError::LaneOutOfRange(digit))?;
    Ok((lane, chars.as_str()))
}

fn parse_pilot_name(name: &str) -> Result<PilotName, CommandError> {
    if name.chars().any(char::is_control) {
        return Err(CommandError::InvalidName);
    }
    if name.chars().count() > PILOT_NAME_MAX_CHARS {
        return Err(CommandError::NameTooLong);
    }
    PilotName::from_str(name).map_err(|_| CommandError::NameTooLong)
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    #[error("message does not fit in one frame")]
    FrameTooLarge,
}

#[derive(Serialize)]
struct LaneView<'a> {
    label: &'a str,
    #[serde(rename = "pilotName")]
    pilot_name: &'a str,
    countdown: u16,
    #[serde(rename = "isPitting")]
    is_pitting: bool,
}

#[derive(Serialize)]
struct FullUpdate<'a> {
    #[serde(rename = "type")]
    message_type: &'static str,
    data: &'a [LaneView<'a>],
}

#[derive(Serialize)]
struct Announcement<'a> {
    #[serde(rename = "type")]
    message_type: &'static str,
    lane: usize,
    #[serde(rename = "pilotName")]
    pilot_name: &'a str,
    #[serde(rename = "isPitting")]
    is_pitting: bool,
}

/// Encode a snapshot of every lane, in index order
pub fn encode_full_update(store: &LaneStore) -> Result<Frame, EncodeError> {
    let lanes = store.lanes();
    let views: [LaneView<'_>; LANE_COUNT] = core::array::from_fn(|i| LaneView {
        label: lanes[i].label(),
        pilot_name: lanes[i].pilot_name(),
        countdown: lanes[i].countdown_remaining(),
        is_pitting: lanes[i].is_pitting(),
    });

    encode(&FullUpdate {
        message_type: "update",
        data: &views,
    })
}

/// Encode a lane-scoped pit announcement
pub fn encode_announcement(announcement: &PitAnnouncement) -> Result<Frame, EncodeError> {
    encode(&Announcement {
        message_type: "announce",
        lane: announcement.lane.get(),
        pilot_name: &announcement.pilot_name,
        is_pitting: announcement.is_pitting,
    })
}

fn encode<T: Serialize>(message: &T) -> Result<Frame, EncodeError> {
    let mut buf = [0u8; FRAME_CAPACITY];
    let len =
        serde_json_core::to_slice(message, &mut buf).map_err(|_| EncodeError::FrameTooLarge)?;
    // serde-json-core only ever writes UTF-8
    let text = core::str::from_utf8(&buf[..len]).map_err(|_| EncodeError::FrameTooLarge)?;
    Frame::from_str(text).map_err(|_| EncodeError::FrameTooLarge)
}
