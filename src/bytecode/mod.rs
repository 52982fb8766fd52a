/*!

  The VM uses a 32 bit word size. An instruction is an opcode word followed by two or three
  operand words, so instructions are either 3 or 4 words long. The first operand is always the
  destination register. Source operands are either register indices or constants:

    Opcode:    1 word
    Register:  1 word, an index into the logical register list
    Constant:  1 word, the bit pattern of an `f32`

  Constants are stored with `f32::to_bits` and read back with `f32::from_bits`. They are never
  converted numerically, so every bit pattern, including signed zeros and NaN payloads,
  survives encoding.

  There is no control flow. The instruction cursor only ever moves forward by the width of the
  instruction it just decoded, and execution ends when the cursor reaches the end of the stream.

  As in the binary encoding of the WAM, an enum is only used for the opcode itself, not the entire
  instruction. Decoding in the VM's dispatch loop reads operands straight from the word stream;
  `Instruction` is the unencoded form used by the assembler, the disassembler, and `ByteCode::emit`.

*/

mod assembly;
mod binary;

pub use assembly::parse_assembly;
pub use binary::{encode_instruction, try_decode_instruction, ByteCodeReader, EncodedInstruction,
                 Word};

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::{Display as StrumDisplay, EnumIter, EnumString, IntoStaticStr};

use crate::channels::ChannelTable;
use crate::error::{AssemblyError, BytecodeError};
use crate::register::Register;

/**
  Opcodes of the virtual machine.

  Rust stores enum variants as bytes. As in C, enum values are represented by consecutive
  natural numbers and can be treated as numeric types. Therefore, we group opcodes with the same
  operand layout together so that a given opcode's shape and size can be determined with a
  trivial comparison. Consequently, the order the opcodes are listed below is significant.
  Order-dependencies:
      ```
      Operation::shape()
      Operation::size()
      binary::try_decode_instruction()
      ```
*/
#[derive(
StrumDisplay, IntoStaticStr, EnumString, EnumIter, TryFromPrimitive, IntoPrimitive,
Clone,        Copy,          Eq,         PartialEq, Debug,            Hash
)]
#[repr(u8)]
pub enum Operation {
  // 3 word instructions //
  // Unary, register source //
  #[strum(to_string = "Abs_R")]  AbsR,   // abs( dst, src )
  #[strum(to_string = "Sqrt_R")] SqrtR,  // sqrt( dst, src )
  #[strum(to_string = "Sin_R")]  SinR,   // sin( dst, src )
  #[strum(to_string = "Cos_R")]  CosR,   // cos( dst, src )
  #[strum(to_string = "Tan_R")]  TanR,   // tan( dst, src )
  #[strum(to_string = "ASin_R")] ASinR,  // asin( dst, src )
  #[strum(to_string = "ACos_R")] ACosR,  // acos( dst, src )
  #[strum(to_string = "ATan_R")] ATanR,  // atan( dst, src )
  #[strum(to_string = "Mov_R")]  MovR,   // mov( dst, src )
  // Opcode 9

  // Unary, constant source //
  #[strum(to_string = "Mov_C")]  MovC,   // mov( dst, constant )
  // Opcode 10

  // 4 word instructions //
  // Binary, register-register //
  #[strum(to_string = "Add_RR")] AddRR,  // add( dst, a, b )
  #[strum(to_string = "Sub_RR")] SubRR,  // sub( dst, a, b )
  #[strum(to_string = "Mul_RR")] MulRR,  // mul( dst, a, b )
  #[strum(to_string = "Div_RR")] DivRR,  // div( dst, a, b )
  #[strum(to_string = "Min_RR")] MinRR,  // min( dst, a, b )
  #[strum(to_string = "Max_RR")] MaxRR,  // max( dst, a, b )
  // Opcode 16

  // Binary, constant-register. The constant is the left operand. //
  #[strum(to_string = "Add_CR")] AddCR,  // add( dst, constant, b )
  #[strum(to_string = "Sub_CR")] SubCR,  // sub( dst, constant, b )
  #[strum(to_string = "Mul_CR")] MulCR,  // mul( dst, constant, b )
  #[strum(to_string = "Div_CR")] DivCR,  // div( dst, constant, b )
  #[strum(to_string = "Min_CR")] MinCR,  // min( dst, constant, b )
  #[strum(to_string = "Max_CR")] MaxCR,  // max( dst, constant, b )
}

pub const MAX_UNARY_OPCODE: u8 = 9u8;
pub const MAX_UNARY_CONSTANT_OPCODE: u8 = 10u8;
pub const MAX_BINARY_OPCODE: u8 = 16u8;

/// Operand layout of an instruction, determined by its opcode.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Hash)]
pub enum Shape {
  /// [OpCode][Dst][Src]
  Unary,
  /// [OpCode][Dst][Constant]
  UnaryConstant,
  /// [OpCode][Dst][A][B]
  Binary,
  /// [OpCode][Dst][Constant][B]
  BinaryConstant,
}

impl Operation {
  pub fn code(&self) -> u8 {
    Into::<u8>::into(*self)
  }

  pub fn shape(&self) -> Shape {
    match self.code() {
      value if value < MAX_UNARY_OPCODE          => Shape::Unary,
      value if value < MAX_UNARY_CONSTANT_OPCODE => Shape::UnaryConstant,
      value if value < MAX_BINARY_OPCODE         => Shape::Binary,
      _value                                     => Shape::BinaryConstant
    }
  }

  /// Size in WORDS of an instruction with this opcode, including the opcode word.
  pub fn size(&self) -> usize {
    match self.code() < MAX_UNARY_CONSTANT_OPCODE {
      true  => 3,
      false => 4
    }
  }

  /// The kinds of operand the instruction takes, destination first.
  pub fn operand_kinds(&self) -> &'static [OperandKind] {
    use OperandKind::{Constant as C, Register as R};
    match self.shape() {
      Shape::Unary          => &[R, R],
      Shape::UnaryConstant  => &[R, C],
      Shape::Binary         => &[R, R, R],
      Shape::BinaryConstant => &[R, C, R],
    }
  }
}

#[derive(Clone, Copy, Eq, PartialEq, Debug, Hash)]
pub enum OperandKind {
  Register,
  Constant
}

impl Display for OperandKind {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      OperandKind::Register => write!(f, "register"),
      OperandKind::Constant => write!(f, "constant")
    }
  }
}

/// A source operand as written in assembly.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Operand {
  Register(Register),
  Constant(f32)
}

impl Operand {
  pub fn kind(&self) -> OperandKind {
    match self {
      Operand::Register(_) => OperandKind::Register,
      Operand::Constant(_) => OperandKind::Constant
    }
  }
}

impl Display for Operand {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      Operand::Register(register) => write!(f, "{}", register),
      Operand::Constant(constant) => write_constant(f, *constant)
    }
  }
}

/// Finite constants print in their shortest round-tripping decimal form. Everything else prints
/// as its bit pattern so that NaN payloads survive a trip through assembly text.
fn write_constant(f: &mut Formatter<'_>, constant: f32) -> std::fmt::Result {
  match constant.is_finite() {
    true  => write!(f, "{:?}", constant),
    false => write!(f, "0x{:08X}", constant.to_bits())
  }
}

/// Holds the unencoded components of an instruction. As such, it enumerates the possible
/// instruction argument combinations.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Instruction {
  /// [OpCode][Dst][Src]
  Unary {
    opcode : Operation,
    dst    : Register,
    src    : Register
  },
  /// [OpCode][Dst][Constant]
  UnaryConstant {
    opcode   : Operation,
    dst      : Register,
    constant : f32
  },
  /// [OpCode][Dst][A][B]
  Binary {
    opcode : Operation,
    dst    : Register,
    a      : Register,
    b      : Register
  },
  /// [OpCode][Dst][Constant][B]
  BinaryConstant {
    opcode   : Operation,
    dst      : Register,
    constant : f32,
    b        : Register
  },
}

impl Instruction {

  /// Builds an instruction from an opcode and its operands, destination first. Returns `None`
  /// if the operands do not match the opcode's shape.
  pub fn from_operands(opcode: Operation, operands: &[Operand]) -> Option<Instruction> {
    use Operand::{Constant as C, Register as R};
    match (opcode.shape(), operands) {

      (Shape::Unary, [R(dst), R(src)]) =>
        Some(Instruction::Unary{ opcode, dst: *dst, src: *src }),

      (Shape::UnaryConstant, [R(dst), C(constant)]) =>
        Some(Instruction::UnaryConstant{ opcode, dst: *dst, constant: *constant }),

      (Shape::Binary, [R(dst), R(a), R(b)]) =>
        Some(Instruction::Binary{ opcode, dst: *dst, a: *a, b: *b }),

      (Shape::BinaryConstant, [R(dst), C(constant), R(b)]) =>
        Some(Instruction::BinaryConstant{ opcode, dst: *dst, constant: *constant, b: *b }),

      _ => None

    }
  }

  pub fn opcode(&self) -> Operation {
    match self {
      | Instruction::Unary{opcode, ..}
      | Instruction::UnaryConstant{opcode, ..}
      | Instruction::Binary{opcode, ..}
      | Instruction::BinaryConstant{opcode, ..} => *opcode
    }
  }

  pub fn dst(&self) -> Register {
    match self {
      | Instruction::Unary{dst, ..}
      | Instruction::UnaryConstant{dst, ..}
      | Instruction::Binary{dst, ..}
      | Instruction::BinaryConstant{dst, ..} => *dst
    }
  }

  /// The operands in encoding order, destination first.
  pub fn operands(&self) -> Vec<Operand> {
    match *self {
      Instruction::Unary{dst, src, ..} =>
        vec![Operand::Register(dst), Operand::Register(src)],
      Instruction::UnaryConstant{dst, constant, ..} =>
        vec![Operand::Register(dst), Operand::Constant(constant)],
      Instruction::Binary{dst, a, b, ..} =>
        vec![Operand::Register(dst), Operand::Register(a), Operand::Register(b)],
      Instruction::BinaryConstant{dst, constant, b, ..} =>
        vec![Operand::Register(dst), Operand::Constant(constant), Operand::Register(b)],
    }
  }

  /// Every register the instruction reads or writes.
  pub fn registers(&self) -> Vec<Register> {
    self.operands()
        .into_iter()
        .filter_map(|operand| match operand {
          Operand::Register(register) => Some(register),
          Operand::Constant(_)        => None
        })
        .collect()
  }
}

impl Display for Instruction {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "{}({})",
      self.opcode(),
      self.operands()
          .iter()
          .map(|operand| format!("{}", operand))
          .collect::<Vec<String>>()
          .join(", ")
    )
  }
}

/**
  A compiled expression program: the encoded word stream plus the register budget it was
  compiled against. Registers `0..num_input_registers` receive the input channels; the temp
  registers follow, and the first temp registers double as the output registers.

  Every way of building a `ByteCode` (`emit`, `parse_assembly`, `from_words`) rejects registers
  outside its own budget, and `from_words` rejects streams that do not decode. The dispatch loop
  relies on this and does not range check register operands.
*/
#[derive(Clone, Debug, Default)]
pub struct ByteCode {
  code                : Vec<Word>,
  num_input_registers : usize,
  num_temp_registers  : usize,
  inputs              : ChannelTable,
  outputs             : ChannelTable,
}

impl ByteCode {

  pub fn new(num_input_registers: usize, num_temp_registers: usize) -> ByteCode {
    ByteCode{
      code: Vec::new(),
      num_input_registers,
      num_temp_registers,
      inputs: ChannelTable::new(),
      outputs: ChannelTable::new(),
    }
  }

  /// Wraps an already encoded word stream after checking it with `verify`.
  pub fn from_words(code: Vec<Word>, num_input_registers: usize, num_temp_registers: usize)
    -> Result<ByteCode, BytecodeError>
  {
    let byte_code = ByteCode{
      code,
      ..ByteCode::new(num_input_registers, num_temp_registers)
    };
    byte_code.verify()?;
    Ok(byte_code)
  }

  /// Wraps a word stream without checking it, so that tests can hand the dispatch loop streams
  /// that `from_words` would refuse.
  #[cfg(test)]
  pub(crate) fn from_words_unchecked(
    code                : Vec<Word>,
    num_input_registers : usize,
    num_temp_registers  : usize
  ) -> ByteCode
  {
    ByteCode{
      code,
      ..ByteCode::new(num_input_registers, num_temp_registers)
    }
  }

  /// Encodes `instruction` onto the end of the program.
  pub fn emit(&mut self, instruction: Instruction) -> Result<(), BytecodeError> {
    self.check_registers(&instruction)?;
    self.code.extend_from_slice(encode_instruction(&instruction).words());
    Ok(())
  }

  fn check_registers(&self, instruction: &Instruction) -> Result<(), BytecodeError> {
    let limit = self.num_registers();
    match instruction.registers().into_iter().find(|register| register.idx() >= limit) {
      Some(register) => Err(BytecodeError::RegisterOutOfRange{ register, limit }),
      None           => Ok(())
    }
  }

  pub fn words(&self) -> &[Word] {
    &self.code
  }

  pub fn reader(&self) -> ByteCodeReader<'_> {
    ByteCodeReader::new(&self.code)
  }

  pub fn num_input_registers(&self) -> usize {
    self.num_input_registers
  }

  pub fn num_temp_registers(&self) -> usize {
    self.num_temp_registers
  }

  /// Total number of logical registers, inputs plus temps.
  pub fn num_registers(&self) -> usize {
    self.num_input_registers + self.num_temp_registers
  }

  pub fn inputs(&self) -> &ChannelTable {
    &self.inputs
  }

  pub fn inputs_mut(&mut self) -> &mut ChannelTable {
    &mut self.inputs
  }

  pub fn outputs(&self) -> &ChannelTable {
    &self.outputs
  }

  pub fn outputs_mut(&mut self) -> &mut ChannelTable {
    &mut self.outputs
  }

  /// The channel index of a named input, which is also its input register.
  pub fn input_index(&self, name: &str) -> Option<usize> {
    self.inputs.index_of(name)
  }

  pub fn output_index(&self, name: &str) -> Option<usize> {
    self.outputs.index_of(name)
  }

  /// Decodes the program, one `Instruction` at a time. Iteration stops after the first error.
  pub fn instructions(&self) -> Instructions<'_> {
    Instructions{
      reader : self.reader(),
      failed : false
    }
  }

  /// Checks that the whole stream decodes and that every register is within the budget.
  pub fn verify(&self) -> Result<(), BytecodeError> {
    for instruction in self.instructions() {
      self.check_registers(&instruction?)?;
    }
    Ok(())
  }

}

pub struct Instructions<'a> {
  reader : ByteCodeReader<'a>,
  failed : bool
}

impl<'a> Iterator for Instructions<'a> {
  type Item = Result<Instruction, BytecodeError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.failed || self.reader.is_at_end() {
      return None;
    }
    let result = try_decode_instruction(&mut self.reader);
    self.failed = result.is_err();
    Some(result)
  }
}

/// Prints the program as assembly that `parse_assembly` reads back.
impl Display for ByteCode {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    if self.inputs.len() == self.num_input_registers && !self.inputs.is_empty() {
      writeln!(f, ".inputs({})", self.inputs.names().collect::<Vec<&str>>().join(", "))?;
    } else if self.num_input_registers > 0 {
      writeln!(f, ".inputs({})", self.num_input_registers)?;
    }
    if !self.outputs.is_empty() {
      writeln!(f, ".outputs({})", self.outputs.names().collect::<Vec<&str>>().join(", "))?;
    }
    writeln!(f, ".temps({})", self.num_temp_registers)?;

    for instruction in self.instructions() {
      match instruction {
        Ok(instruction) => writeln!(f, "{}", instruction)?,
        Err(e)          => writeln!(f, "# {}", e)?
      }
    }
    Ok(())
  }
}

impl FromStr for ByteCode {
  type Err = AssemblyError;

  fn from_str(text: &str) -> Result<Self, Self::Err> {
    parse_assembly(text)
  }
}
