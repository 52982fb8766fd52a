//! The expression virtual machine: a register machine whose registers are four-lane vectors, so
//! that every instruction is evaluated for four instances at a time.

use std::fmt::{Display, Formatter};

use prettytable::{format as TableFormat, Table};
use tracing::{debug, error, trace};
use wide::f32x4;

use crate::bytecode::{ByteCode, ByteCodeReader, Operation};
use crate::error::{BytecodeError, ChannelKind, ExecuteError};
use crate::kernels::{op1, op1_c, op2, op2_c, per_lane};
use crate::register::{lane_groups, Register};
use crate::register_file::{RegisterFile, DEFAULT_REGISTER_BUDGET};
use crate::streams::{load_inputs, store_outputs};

/**
  An `ExpressionVM` owns a register file that is allocated once and reused by every call to
  `execute`. Calls take `&mut self`, so one VM serves one thread at a time; evaluate in parallel
  with one VM per worker.
*/
pub struct ExpressionVM {

  // Memory Store //
  registers : RegisterFile,

  // Layout of the most recent call //
  stride        : usize,            // Lane-groups per register
  num_registers : usize,            // Registers the program uses
  last_dst      : Option<Register>, // Destination of the last instruction executed

}

impl ExpressionVM {

  // region Display methods

  fn make_register_table(&self) -> Table {
    let mut table = Table::new();

    table.set_format(*TABLE_DISPLAY_FORMAT);
    table.set_titles(row![ubr->"Register", ubl->"Lane 0", ubl->"Lane 1", ubl->"Lane 2", ubl->"Lane 3"]);

    let slots = self.registers.slots();
    for index in 0..self.num_registers {
      let register = Register::from_idx(index);
      for (group, slot) in slots[register.span(self.stride)].iter().enumerate() {
        let lanes = slot.to_array();
        let name  =
          match Some(register) == self.last_dst {
            true  => format!("* --> {}[{}] =", register, group),
            false => format!("{}[{}] =", register, group)
          };
        table.add_row(row![r->name, lanes[0], lanes[1], lanes[2], lanes[3]]);
      } // end for lane-group
    } // end for register
    table
  }

  // endregion

  pub fn new() -> ExpressionVM {
    ExpressionVM::with_budget(DEFAULT_REGISTER_BUDGET)
  }

  /// Builds a VM whose register file holds as many four-lane slots as fit in `budget` bytes.
  pub fn with_budget(budget: usize) -> ExpressionVM {
    ExpressionVM{
      registers     : RegisterFile::with_budget(budget),
      stride        : 0,
      num_registers : 0,
      last_dst      : None,
    }
  }

  /// Number of four-lane slots in the register file.
  pub fn capacity(&self) -> usize {
    self.registers.capacity()
  }

  /**
    Runs `byte_code` over `num_instances` instances.

    `inputs` holds `num_input_registers` channels and `outputs` holds at most
    `num_temp_registers` channels, both channel-major with `num_instances` values per channel.
    Output channel `j` receives register `num_input_registers + j`.

    Every check happens before any work is done, and outputs are only written once the whole
    program has run, so any error leaves `outputs` as it was.

    Register operands are not range checked while dispatching: every `ByteCode` constructor
    rejects registers outside the program's own budget, and the capacity check covers that
    budget.
  */
  pub fn execute(
    &mut self,
    byte_code     : &ByteCode,
    inputs        : &[f32],
    outputs       : &mut [f32],
    num_instances : usize
  ) -> Result<(), ExecuteError>
  {
    if num_instances == 0 {
      return Ok(());
    }

    let num_inputs  = channel_count(ChannelKind::Input,  inputs.len(),  num_instances)?;
    let num_outputs = channel_count(ChannelKind::Output, outputs.len(), num_instances)?;

    if num_inputs != byte_code.num_input_registers() {
      return Err(ExecuteError::InputChannels{
        expected : byte_code.num_input_registers(),
        got      : num_inputs
      });
    }
    if num_outputs > byte_code.num_temp_registers() {
      return Err(ExecuteError::OutputChannels{
        available : byte_code.num_temp_registers(),
        got       : num_outputs
      });
    }

    let stride    = lane_groups(num_instances);
    let required  = RegisterFile::required(byte_code.num_registers(), stride);
    let available = self.registers.capacity();
    if !self.registers.fits(required) {
      error!(required, available, "Not enough registers to run the expression");
      return Err(ExecuteError::CapacityExceeded{ required, available });
    }

    debug!(num_instances, lane_groups = stride, slots = required, "Executing expression");

    self.stride        = stride;
    self.num_registers = byte_code.num_registers();
    self.last_dst      = None;

    let input_end = num_inputs * stride;
    load_inputs(inputs, num_instances, &mut self.registers.slots_mut()[..input_end], stride);

    if let Err(e) = self.dispatch(byte_code) {
      error!(error = %e, "Aborting expression");
      return Err(e.into());
    }

    let output_end = input_end + num_outputs * stride;
    store_outputs(&self.registers.slots()[input_end..output_end], outputs, num_instances, stride);

    Ok(())
  }

  /// The dispatch loop. The cursor starts at the beginning of the bytecode and moves forward one
  /// instruction per step until it reaches the end or meets an opcode it cannot decode.
  fn dispatch(&mut self, byte_code: &ByteCode) -> Result<(), BytecodeError> {
    let stride     = self.stride;
    let mut reader = byte_code.reader();

    while !reader.is_at_end() {
      let offset    = reader.offset();
      let operation = reader.next_operation()?;
      trace!(offset, %operation, "dispatch");

      let dst = execute_operation(operation, &mut reader, self.registers.slots_mut(), stride);

      #[cfg(feature = "trace_computation")]
      {
        self.last_dst = Some(dst);
        trace!("\n{}", self);
      }
      #[cfg(not(feature = "trace_computation"))]
      let _ = dst;
    }

    Ok(())
  }

}

impl Default for ExpressionVM {
  fn default() -> Self {
    ExpressionVM::new()
  }
}

/// Runs the kernel for one decoded opcode. The reader sits on the instruction's first operand.
#[inline(always)]
fn execute_operation(
  operation : Operation,
  reader    : &mut ByteCodeReader,
  slots     : &mut [f32x4],
  stride    : usize
) -> Register
{
  match operation {

    // unary
    Operation::AbsR  => op1(reader, slots, stride, |x| x.abs()),
    Operation::SqrtR => op1(reader, slots, stride, |x| x.sqrt()),
    Operation::SinR  => op1(reader, slots, stride, |x| per_lane(x, f32::sin)),
    Operation::CosR  => op1(reader, slots, stride, |x| per_lane(x, f32::cos)),
    Operation::TanR  => op1(reader, slots, stride, |x| per_lane(x, f32::tan)),
    Operation::ASinR => op1(reader, slots, stride, |x| per_lane(x, f32::asin)),
    Operation::ACosR => op1(reader, slots, stride, |x| per_lane(x, f32::acos)),
    Operation::ATanR => op1(reader, slots, stride, |x| per_lane(x, f32::atan)),
    Operation::MovR  => op1(reader, slots, stride, |x| x),

    Operation::MovC  => op1_c(reader, slots, stride, |x| x),

    // binary
    Operation::AddRR => op2(reader, slots, stride, |a, b| a + b),
    Operation::SubRR => op2(reader, slots, stride, |a, b| a - b),
    Operation::MulRR => op2(reader, slots, stride, |a, b| a * b),
    Operation::DivRR => op2(reader, slots, stride, |a, b| a / b),
    Operation::MinRR => op2(reader, slots, stride, |a, b| a.min(b)),
    Operation::MaxRR => op2(reader, slots, stride, |a, b| a.max(b)),

    Operation::AddCR => op2_c(reader, slots, stride, |a, b| a + b),
    Operation::SubCR => op2_c(reader, slots, stride, |a, b| a - b),
    Operation::MulCR => op2_c(reader, slots, stride, |a, b| a * b),
    Operation::DivCR => op2_c(reader, slots, stride, |a, b| a / b),
    Operation::MinCR => op2_c(reader, slots, stride, |a, b| a.min(b)),
    Operation::MaxCR => op2_c(reader, slots, stride, |a, b| a.max(b)),

  }
}

fn channel_count(kind: ChannelKind, len: usize, num_instances: usize) -> Result<usize, ExecuteError> {
  match len % num_instances {
    0 => Ok(len / num_instances),
    _ => Err(ExecuteError::ChannelLength{ kind, len, num_instances })
  }
}


lazy_static! {
  pub static ref TABLE_DISPLAY_FORMAT: TableFormat::TableFormat =
    TableFormat::FormatBuilder::new()
      .column_separator('│')
      .borders(' ')
      .separator(
        TableFormat::LinePosition::Title,
        TableFormat::LineSeparator::new('─', '┼', ' ', ' ')
      )
      .separator(
        TableFormat::LinePosition::Bottom,
        TableFormat::LineSeparator::new('─', '┴', ' ', ' ')
      )
      .padding(1, 1)
      .build();
}

impl Display for ExpressionVM {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "Registers: {} of {} slots in use, {} lane-groups each\n{}",
      self.num_registers * self.stride,
      self.capacity(),
      self.stride,
      self.make_register_table()
    )
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  use crate::bytecode::{parse_assembly, Instruction, Word};

  const LENGTH_PROGRAM: &str = "
    .inputs(x, y)
    .outputs(length)
    Add_RR(r2, r0, r1)
    Sqrt_R(r2, r2)
    Mul_CR(r2, 10.0, r2)
  ";

  fn assemble(text: &str) -> ByteCode {
    parse_assembly(text).unwrap()
  }

  fn relative_eq(a: f32, b: f32) -> bool {
    (a - b).abs() <= 1e-6 * a.abs().max(b.abs())
  }

  #[test]
  fn end_to_end(){
    let byte_code = assemble(LENGTH_PROGRAM);
    let inputs    = [1.0, 2.0, 3.0, 4.0, 5.0, 5.0, 6.0, 7.0, 8.0, 9.0];
    let mut out   = [0.0f32; 5];

    let mut vm = ExpressionVM::new();
    vm.execute(&byte_code, &inputs, &mut out, 5).unwrap();

    let expected = [6.0f32, 8.0, 10.0, 12.0, 14.0];
    for (value, sum) in out.iter().zip(expected.iter()) {
      assert!(relative_eq(*value, 10.0 * sum.sqrt()), "{} != 10 * sqrt({})", value, sum);
    }
  }

  #[test]
  fn add_matches_scalar_addition(){
    let byte_code = assemble(".inputs(a, b)\nAdd_RR(r2, r0, r1)");
    let a: Vec<f32> = (0..16).map(|i| i as f32 * 0.25).collect();
    let b: Vec<f32> = (0..16).map(|i| 100.0 - i as f32 * 3.5).collect();
    let inputs: Vec<f32> = a.iter().chain(b.iter()).cloned().collect();
    let mut out = vec![0.0f32; 16];

    ExpressionVM::new().execute(&byte_code, &inputs, &mut out, 16).unwrap();

    for i in 0..16 {
      assert_eq!(out[i], a[i] + b[i]);
    }
  }

  #[test]
  fn partial_lane_groups_stay_in_bounds(){
    let byte_code = assemble(".inputs(a)\n.outputs(p, q)\nMul_CR(r1, 2.0, r0)\nAdd_CR(r2, 1.0, r0)");

    for n in 1..=11usize {
      let inputs: Vec<f32> = (0..n).map(|i| i as f32).collect();
      // Two output channels, followed by guard values.
      let mut buffer = vec![-1.0f32; 2 * n + 3];

      ExpressionVM::new().execute(&byte_code, &inputs, &mut buffer[..2 * n], n).unwrap();

      for i in 0..n {
        assert_eq!(buffer[i], 2.0 * i as f32);
        assert_eq!(buffer[n + i], 1.0 + i as f32);
      }
      assert_eq!(&buffer[2 * n..], &[-1.0, -1.0, -1.0]);
    }
  }

  #[test]
  fn broadcast_is_bit_exact(){
    let bits: Word = 0x7FC5_5A5A;
    let mut byte_code = ByteCode::new(0, 1);
    byte_code.emit(Instruction::UnaryConstant{
      opcode: Operation::MovC, dst: Register(0), constant: f32::from_bits(bits)
    }).unwrap();
    let mut out = vec![0.0f32; 7];

    ExpressionVM::new().execute(&byte_code, &[], &mut out, 7).unwrap();

    assert!(out.iter().all(|value| value.to_bits() == bits));
  }

  #[test]
  fn sqrt_of_sum(){
    let byte_code = assemble(".inputs(a, b)\nAdd_RR(r2, r0, r1)\nSqrt_R(r2, r2)");
    let inputs = [0.5, 2.0, 7.25, 1e6, 3.0, 0.125, 9.0, 40.0, 1.0, 0.0];
    let mut out = [0.0f32; 5];

    ExpressionVM::new().execute(&byte_code, &inputs, &mut out, 5).unwrap();

    for i in 0..5 {
      let expected = (inputs[i] + inputs[5 + i]).sqrt();
      assert!(relative_eq(out[i], expected));
    }
  }

  #[test]
  fn every_opcode_matches_its_scalar_definition(){
    let byte_code = assemble("
      .inputs(a, b)
      .outputs(abs, sqrt, sin, cos, tan, asin, acos, atan, mov, movc, add, sub, mul, div, min, max, addc, subc, mulc, divc, minc, maxc)
      Abs_R(r2, r0)
      Sqrt_R(r3, r1)
      Sin_R(r4, r0)
      Cos_R(r5, r0)
      Tan_R(r6, r0)
      ASin_R(r7, r0)
      ACos_R(r8, r0)
      ATan_R(r9, r0)
      Mov_R(r10, r1)
      Mov_C(r11, -2.5)
      Add_RR(r12, r0, r1)
      Sub_RR(r13, r0, r1)
      Mul_RR(r14, r0, r1)
      Div_RR(r15, r0, r1)
      Min_RR(r16, r0, r1)
      Max_RR(r17, r0, r1)
      Add_CR(r18, 3.0, r1)
      Sub_CR(r19, 3.0, r1)
      Mul_CR(r20, 3.0, r1)
      Div_CR(r21, 3.0, r1)
      Min_CR(r22, 3.0, r1)
      Max_CR(r23, 3.0, r1)
    ");
    let a = [-0.75f32, 0.5, 0.0, 0.9, -0.3];
    let b = [2.0f32, 4.0, 0.25, 9.0, 1.5];
    let n = a.len();
    let inputs: Vec<f32> = a.iter().chain(b.iter()).cloned().collect();
    let mut out = vec![0.0f32; 22 * n];

    ExpressionVM::new().execute(&byte_code, &inputs, &mut out, n).unwrap();

    let channel = |name: &str| {
      let index = byte_code.output_index(name).unwrap();
      out[index * n..(index + 1) * n].to_vec()
    };
    let check = |name: &str, f: &dyn Fn(f32, f32) -> f32| {
      for (i, value) in channel(name).iter().enumerate() {
        let expected = f(a[i], b[i]);
        assert!(
          *value == expected || relative_eq(*value, expected),
          "{}[{}]: {} != {}", name, i, value, expected
        );
      }
    };

    check("abs",  &|a: f32, _: f32| a.abs());
    check("sqrt", &|_: f32, b: f32| b.sqrt());
    check("sin",  &|a: f32, _: f32| a.sin());
    check("cos",  &|a: f32, _: f32| a.cos());
    check("tan",  &|a: f32, _: f32| a.tan());
    check("asin", &|a: f32, _: f32| a.asin());
    check("acos", &|a: f32, _: f32| a.acos());
    check("atan", &|a: f32, _: f32| a.atan());
    check("mov",  &|_: f32, b: f32| b);
    check("movc", &|_: f32, _: f32| -2.5);
    check("add",  &|a: f32, b: f32| a + b);
    check("sub",  &|a: f32, b: f32| a - b);
    check("mul",  &|a: f32, b: f32| a * b);
    check("div",  &|a: f32, b: f32| a / b);
    check("min",  &|a: f32, b: f32| a.min(b));
    check("max",  &|a: f32, b: f32| a.max(b));
    check("addc", &|_: f32, b: f32| 3.0 + b);
    check("subc", &|_: f32, b: f32| 3.0 - b);
    check("mulc", &|_: f32, b: f32| 3.0 * b);
    check("divc", &|_: f32, b: f32| 3.0 / b);
    check("minc", &|_: f32, b: f32| 3.0f32.min(b));
    check("maxc", &|_: f32, b: f32| 3.0f32.max(b));
  }

  #[test]
  fn division_by_zero_follows_ieee(){
    let byte_code = assemble(".inputs(a, b)\nDiv_RR(r2, r0, r1)");
    let inputs = [1.0, -1.0, 0.0, 4.0, 0.0, 0.0, 0.0, 2.0];
    let mut out = [0.0f32; 4];

    ExpressionVM::new().execute(&byte_code, &inputs, &mut out, 4).unwrap();

    assert_eq!(out[0], f32::INFINITY);
    assert_eq!(out[1], f32::NEG_INFINITY);
    assert!(out[2].is_nan());
    assert_eq!(out[3], 2.0);
  }

  #[test]
  fn capacity_overflow_leaves_outputs_untouched(){
    let byte_code = assemble(LENGTH_PROGRAM);
    // Three registers of two lane-groups need six slots; give the VM five.
    let mut vm = ExpressionVM::with_budget(5 * 16);
    let inputs = [1.0f32; 16];
    let mut out = [42.0f32; 8];

    let result = vm.execute(&byte_code, &inputs, &mut out, 8);

    assert_eq!(result, Err(ExecuteError::CapacityExceeded{ required: 6, available: 5 }));
    assert!(out.iter().all(|value| *value == 42.0));

    // The same VM still runs calls that fit.
    let mut small = [0.0f32; 4];
    vm.execute(&byte_code, &inputs[..8], &mut small, 4).unwrap();
    assert!(relative_eq(small[0], 10.0 * 2.0f32.sqrt()));
  }

  #[test]
  fn unknown_opcode_is_fatal(){
    let mut words = assemble(LENGTH_PROGRAM).words().to_vec();
    let bad_offset = words.len();
    words.extend_from_slice(&[0xFF, 2, 2]);
    words.extend_from_slice(&[Operation::MovC as Word, 2, 1.0f32.to_bits()]);
    let byte_code = ByteCode::from_words_unchecked(words, 2, 1);
    let mut out = [0.0f32; 4];

    let result = ExpressionVM::new().execute(&byte_code, &[1.0f32; 8], &mut out, 4);

    assert_eq!(
      result,
      Err(ExecuteError::Bytecode(BytecodeError::UnknownOpcode{ opcode: 0xFF, offset: bad_offset }))
    );
  }

  #[test]
  fn truncated_program_is_fatal(){
    let byte_code = ByteCode::from_words_unchecked(vec![Operation::AddRR as Word, 2, 0], 2, 1);
    let result = ExpressionVM::new().execute(&byte_code, &[1.0f32; 8], &mut [0.0f32; 4], 4);
    assert_eq!(
      result,
      Err(ExecuteError::Bytecode(BytecodeError::Truncated{ opcode: Operation::AddRR, offset: 0 }))
    );
  }

  #[test]
  fn raw_words_run_only_after_checks(){
    let mov_r = Operation::MovR as Word;
    assert!(ByteCode::from_words(vec![mov_r, 2, 9000], 2, 1).is_err());
    assert!(ByteCode::from_words(vec![mov_r, 2, 5], 2, 1).is_err());

    let byte_code = ByteCode::from_words(vec![mov_r, 2, 1], 2, 1).unwrap();
    let inputs = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
    let mut out = [0.0f32; 4];
    ExpressionVM::new().execute(&byte_code, &inputs, &mut out, 4).unwrap();
    assert_eq!(out, [5.0, 6.0, 7.0, 8.0]);
  }

  #[test]
  fn caller_errors_are_reported_before_any_work(){
    let byte_code = assemble(LENGTH_PROGRAM);
    let mut vm  = ExpressionVM::new();
    let mut out = [3.0f32; 5];

    assert_eq!(
      vm.execute(&byte_code, &[1.0; 9], &mut out, 5),
      Err(ExecuteError::ChannelLength{ kind: ChannelKind::Input, len: 9, num_instances: 5 })
    );
    assert_eq!(
      vm.execute(&byte_code, &[1.0; 10], &mut out[..4], 5),
      Err(ExecuteError::ChannelLength{ kind: ChannelKind::Output, len: 4, num_instances: 5 })
    );
    assert_eq!(
      vm.execute(&byte_code, &[1.0; 15], &mut out, 5),
      Err(ExecuteError::InputChannels{ expected: 2, got: 3 })
    );
    let mut two_outputs = [3.0f32; 10];
    assert_eq!(
      vm.execute(&byte_code, &[1.0; 10], &mut two_outputs, 5),
      Err(ExecuteError::OutputChannels{ available: 1, got: 2 })
    );
    assert!(out.iter().chain(two_outputs.iter()).all(|value| *value == 3.0));
  }

  #[test]
  fn zero_instances_is_a_no_op(){
    let byte_code = assemble(LENGTH_PROGRAM);
    assert_eq!(ExpressionVM::new().execute(&byte_code, &[], &mut [], 0), Ok(()));
  }

  #[test]
  fn display_shows_the_register_file(){
    let byte_code = assemble(".inputs(a)\nMov_C(r1, 2.0)");
    let mut vm = ExpressionVM::new();
    vm.execute(&byte_code, &[1.0, 1.0], &mut [0.0, 0.0], 2).unwrap();

    let text = format!("{}", vm);
    assert!(text.starts_with("Registers: 2 of 16384 slots in use, 1 lane-groups each"));
    assert!(text.contains("r0[0] ="));
    assert!(text.contains("r1[0] ="));
  }

  proptest! {
    #[test]
    fn add_is_lane_wise(
      pairs in proptest::collection::vec((-1e6f32..1e6, -1e6f32..1e6), 1..64)
    ) {
      let byte_code = assemble(".inputs(a, b)\nAdd_RR(r2, r0, r1)");
      let n = pairs.len();
      let inputs: Vec<f32> =
        pairs.iter().map(|p| p.0).chain(pairs.iter().map(|p| p.1)).collect();
      let mut out = vec![0.0f32; n];

      ExpressionVM::new().execute(&byte_code, &inputs, &mut out, n).unwrap();

      for (i, (a, b)) in pairs.iter().enumerate() {
        prop_assert_eq!(out[i], a + b);
      }
    }

    #[test]
    fn repeated_runs_are_bit_identical(
      values in proptest::collection::vec(0.0f32..1e4, 2..80)
    ) {
      let byte_code = assemble(LENGTH_PROGRAM);
      let n = values.len() / 2;
      let inputs = &values[..2 * n];
      let mut first  = vec![0.0f32; n];
      let mut second = vec![0.0f32; n];

      let mut vm = ExpressionVM::new();
      vm.execute(&byte_code, inputs, &mut first, n).unwrap();
      vm.execute(&byte_code, inputs, &mut second, n).unwrap();

      let mut fresh = vec![0.0f32; n];
      ExpressionVM::new().execute(&byte_code, inputs, &mut fresh, n).unwrap();

      let bits = |v: &Vec<f32>| v.iter().map(|x| x.to_bits()).collect::<Vec<u32>>();
      prop_assert_eq!(bits(&first), bits(&second));
      prop_assert_eq!(bits(&first), bits(&fresh));
    }
  }

}
