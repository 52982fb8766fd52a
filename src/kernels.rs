/*!
  Vector kernels of the dispatch loop.

  Each `op*` function decodes the operands of one instruction from the reader, scales register
  operands by the lane-group stride, and applies `func` to every lane-group of the destination
  register. They are generic over `func` so that every opcode gets its own inlined loop; the
  dispatch loop in `crate::vm` picks the kernel with a `match` on the opcode.

  Sources may alias the destination (`Sqrt_R(r2, r2)`). Slots are copied in and out one
  lane-group at a time, so that is always well defined.
*/

use wide::f32x4;

use crate::bytecode::ByteCodeReader;
use crate::register::{Register, LANES};

/// `[OpCode][Dst][Src]`
#[inline(always)]
pub fn op1<F>(reader: &mut ByteCodeReader, slots: &mut [f32x4], stride: usize, func: F) -> Register
  where F: Fn(f32x4) -> f32x4
{
  let dst = reader.register();
  let r   = dst.base(stride);
  let x   = reader.register().base(stride);

  for group in 0..stride {
    slots[r + group] = func(slots[x + group]);
  }
  dst
}

/// `[OpCode][Dst][Constant]`
#[inline(always)]
pub fn op1_c<F>(reader: &mut ByteCodeReader, slots: &mut [f32x4], stride: usize, func: F) -> Register
  where F: Fn(f32x4) -> f32x4
{
  let dst   = reader.register();
  let value = func(f32x4::splat(reader.constant()));

  for slot in &mut slots[dst.span(stride)] {
    *slot = value;
  }
  dst
}

/// `[OpCode][Dst][A][B]`
#[inline(always)]
pub fn op2<F>(reader: &mut ByteCodeReader, slots: &mut [f32x4], stride: usize, func: F) -> Register
  where F: Fn(f32x4, f32x4) -> f32x4
{
  let dst = reader.register();
  let r   = dst.base(stride);
  let a   = reader.register().base(stride);
  let b   = reader.register().base(stride);

  for group in 0..stride {
    slots[r + group] = func(slots[a + group], slots[b + group]);
  }
  dst
}

/// `[OpCode][Dst][Constant][B]`, the constant being the left operand.
#[inline(always)]
pub fn op2_c<F>(reader: &mut ByteCodeReader, slots: &mut [f32x4], stride: usize, func: F) -> Register
  where F: Fn(f32x4, f32x4) -> f32x4
{
  let dst = reader.register();
  let r   = dst.base(stride);
  let a   = f32x4::splat(reader.constant());
  let b   = reader.register().base(stride);

  for group in 0..stride {
    slots[r + group] = func(a, slots[b + group]);
  }
  dst
}

/// Applies a scalar function to each lane. Used for the transcendental opcodes so that every lane
/// gets exactly the `f32` result.
#[inline(always)]
pub fn per_lane(x: f32x4, func: fn(f32) -> f32) -> f32x4 {
  let mut lanes: [f32; LANES] = x.to_array();
  for lane in lanes.iter_mut() {
    *lane = func(*lane);
  }
  f32x4::from(lanes)
}
