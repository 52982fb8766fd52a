//! A `Register` names one logical value in the register file. Registers are small integer
//! indices, never pointers: a register covers one slot per lane-group, so the slots of register
//! `r` for a call with `stride` lane-groups are `r * stride .. (r + 1) * stride`.

use std::fmt::{Display, Formatter};
use std::ops::Range;

use crate::bytecode::Word;

pub type RegisterNumberType = Word;

/// Number of instances packed into one register slot.
pub const LANES: usize = 4;

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub struct Register(pub RegisterNumberType);

impl Register {
  /// Converts the register to its index in the logical register list.
  pub fn idx(&self) -> usize {
    self.0 as usize
  }

  pub fn from_idx(idx: usize) -> Register {
    Register(idx as RegisterNumberType)
  }

  /// The first slot of this register in an arena laid out with `stride` lane-groups per register.
  pub fn base(&self, stride: usize) -> usize {
    self.idx() * stride
  }

  /// The slots of this register in an arena laid out with `stride` lane-groups per register.
  pub fn span(&self, stride: usize) -> Range<usize> {
    let base = self.base(stride);
    base..base + stride
  }
}

/// The number of lane-groups needed to hold `num_instances` instances, i.e. `ceil(n / 4)`.
pub fn lane_groups(num_instances: usize) -> usize {
  (num_instances + LANES - 1) / LANES
}

impl Display for Register {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "r{}", self.0)
  }
}
