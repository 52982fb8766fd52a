/*!
  The register file is a single arena of four-lane vectors, allocated once when the VM is built
  and reused by every call to `execute`. Registers are addressed by index; see `crate::register`
  for how a register maps onto a run of slots.

  The arena never grows. A program that needs more slots than the arena holds is rejected before
  any work is done.
*/

use std::mem::size_of;

use wide::f32x4;

/// Default byte budget of a VM's register file.
pub const DEFAULT_REGISTER_BUDGET: usize = 256 * 1024;

pub struct RegisterFile {
  slots: Vec<f32x4>,
}

impl RegisterFile {

  /// Allocates an arena holding as many slots as fit in `budget` bytes.
  pub fn with_budget(budget: usize) -> RegisterFile {
    let count = budget / size_of::<f32x4>();
    RegisterFile{
      slots: vec![f32x4::splat(0.0); count]
    }
  }

  /// Number of four-lane slots in the arena.
  pub fn capacity(&self) -> usize {
    self.slots.len()
  }

  /// Number of slots a program with `num_registers` registers needs for `lane_groups`
  /// lane-groups.
  pub fn required(num_registers: usize, lane_groups: usize) -> usize {
    num_registers * lane_groups
  }

  pub fn fits(&self, required: usize) -> bool {
    required <= self.capacity()
  }

  pub fn slots(&self) -> &[f32x4] {
    &self.slots
  }

  pub fn slots_mut(&mut self) -> &mut [f32x4] {
    &mut self.slots
  }

}

impl Default for RegisterFile {
  fn default() -> Self {
    RegisterFile::with_budget(DEFAULT_REGISTER_BUDGET)
  }
}
