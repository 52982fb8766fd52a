/*!
  Moving channel data in and out of the register file.

  Channels are stored channel-major: all `num_instances` values of channel 0, then all of
  channel 1, and so on. Channel `c` is loaded into register `c`, four instances per slot.

  When `num_instances` is not a multiple of four, the cursor of the last lane-group clamps at the
  last valid instance. On load the trailing lanes repeat the final instance; on store they land on
  the final instance again, so nothing past the end of a channel is ever read or written.
*/

use std::cmp::min;

use wide::f32x4;

use crate::register::LANES;

/// Packs one channel into `slots`, one lane-group per slot. An empty channel leaves `slots` as
/// they are.
pub fn load_channel(channel: &[f32], slots: &mut [f32x4]) {
  let last =
    match channel.len().checked_sub(1) {
      Some(last) => last,
      None       => return
    };

  for (group, slot) in slots.iter_mut().enumerate() {
    let first = group * LANES;
    let mut lanes = [0.0f32; LANES];
    for (lane, value) in lanes.iter_mut().enumerate() {
      *value = channel[min(first + lane, last)];
    }
    *slot = f32x4::from(lanes);
  }
}

/// Unpacks `slots` into one channel. Lanes past the end of the channel are stored onto its last
/// instance.
pub fn store_channel(slots: &[f32x4], channel: &mut [f32]) {
  let last =
    match channel.len().checked_sub(1) {
      Some(last) => last,
      None       => return
    };

  for (group, slot) in slots.iter().enumerate() {
    let first = group * LANES;
    for (lane, value) in slot.to_array().iter().enumerate() {
      channel[min(first + lane, last)] = *value;
    }
  }
}

/// Loads every channel of the flat `inputs` into consecutive registers of `stride` slots each.
pub fn load_inputs(inputs: &[f32], num_instances: usize, slots: &mut [f32x4], stride: usize) {
  for (channel, registers) in inputs.chunks_exact(num_instances).zip(slots.chunks_exact_mut(stride)) {
    load_channel(channel, registers);
  }
}

/// Stores consecutive registers of `stride` slots each into the channels of the flat `outputs`.
pub fn store_outputs(slots: &[f32x4], outputs: &mut [f32], num_instances: usize, stride: usize) {
  for (registers, channel) in slots.chunks_exact(stride).zip(outputs.chunks_exact_mut(num_instances)) {
    store_channel(registers, channel);
  }
}
