//! Hardware initialization for the pitcaller device

use esp_hal::gpio::{AnyPin, Input, InputConfig, Pull};
use log::info;
use pitcaller_core::lanes::LANE_COUNT;
use pitcaller_core::switches::{ActiveLevel, SwitchPoller};

/// Lane inputs in lane order
pub type LaneInputs = SwitchPoller<Input<'static>>;

/// Configure one GPIO input per lane and wrap them in a poller
///
/// Inputs are pulled up, so an open switch reads high.
pub fn init_lane_inputs(
    pins: [AnyPin<'static>; LANE_COUNT],
    active: ActiveLevel,
) -> LaneInputs {
    let inputs = pins.map(|pin| Input::new(pin, InputConfig::default().with_pull(Pull::Up)));
    info!("Lane inputs ready, active {:?}", active);
    SwitchPoller::new(inputs, active)
}
