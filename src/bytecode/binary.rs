/*!
  This module is responsible for the encoding and decoding of binary instructions.

*/
use std::convert::TryFrom;

use super::{Instruction, Operation, Shape};
use crate::error::BytecodeError;
use crate::register::{Register, RegisterNumberType};

// If you change this you must also change `encode_instruction` and `try_decode_instruction`.
pub type Word = u32;

/// An `Either` type for an encoded instruction, allowing the instruction to be
/// either three words or four.
pub enum EncodedInstruction {
  Three([Word; 3]),
  Four([Word; 4])
}

impl EncodedInstruction {
  pub fn words(&self) -> &[Word] {
    match self {
      EncodedInstruction::Three(words) => words,
      EncodedInstruction::Four(words)  => words
    }
  }
}

/**
  A forward-only cursor over a word stream. `next_operation` decodes an opcode and checks that
  the whole instruction is present, after which the operand readers cannot run off the end of
  the stream.
*/
#[derive(Clone)]
pub struct ByteCodeReader<'a> {
  code   : &'a [Word],
  cursor : usize
}

impl<'a> ByteCodeReader<'a> {

  pub fn new(code: &'a [Word]) -> ByteCodeReader<'a> {
    ByteCodeReader{ code, cursor: 0 }
  }

  /// Word offset of the cursor.
  pub fn offset(&self) -> usize {
    self.cursor
  }

  pub fn is_at_end(&self) -> bool {
    self.cursor >= self.code.len()
  }

  /// Decodes the opcode word under the cursor and advances past it.
  pub fn next_operation(&mut self) -> Result<Operation, BytecodeError> {
    let offset = self.cursor;
    let word   = self.code[offset];
    let opcode =
      u8::try_from(word)
        .ok()
        .and_then(|byte| Operation::try_from(byte).ok())
        .ok_or(BytecodeError::UnknownOpcode{ opcode: word, offset })?;

    if offset + opcode.size() > self.code.len() {
      return Err(BytecodeError::Truncated{ opcode, offset });
    }
    self.cursor += 1;
    Ok(opcode)
  }

  /// Reads a register operand.
  pub fn register(&mut self) -> Register {
    Register(self.word() as RegisterNumberType)
  }

  /// Reads a constant operand. The word is the constant's bit pattern.
  pub fn constant(&mut self) -> f32 {
    f32::from_bits(self.word())
  }

  fn word(&mut self) -> Word {
    let word = self.code[self.cursor];
    self.cursor += 1;
    word
  }
}

/// Decodes the instruction under the cursor and advances past it.
pub fn try_decode_instruction(reader: &mut ByteCodeReader) -> Result<Instruction, BytecodeError> {
  let opcode = reader.next_operation()?;
  let dst    = reader.register();

  let instruction =
    match opcode.shape() {

      Shape::Unary => {
        // [OpCode][Dst][Src]
        Instruction::Unary{ opcode, dst, src: reader.register() }
      }

      Shape::UnaryConstant => {
        // [OpCode][Dst][Constant]
        Instruction::UnaryConstant{ opcode, dst, constant: reader.constant() }
      }

      Shape::Binary => {
        // [OpCode][Dst][A][B]
        let a = reader.register();
        let b = reader.register();
        Instruction::Binary{ opcode, dst, a, b }
      }

      Shape::BinaryConstant => {
        // [OpCode][Dst][Constant][B]
        let constant = reader.constant();
        let b        = reader.register();
        Instruction::BinaryConstant{ opcode, dst, constant, b }
      }

    };

  Ok(instruction)
}

/**
  Encodes the instruction into bytecode. The opcode's shape is not checked against the
  `Instruction` variant; `Instruction::from_operands` is the checked constructor.
*/
pub fn encode_instruction(instruction: &Instruction) -> EncodedInstruction {
  match *instruction {

    Instruction::Unary{ opcode, dst, src } => {
      // [OpCode][Dst][Src]
      EncodedInstruction::Three([opcode.code() as Word, dst.0, src.0])
    }

    Instruction::UnaryConstant{ opcode, dst, constant } => {
      // [OpCode][Dst][Constant]
      EncodedInstruction::Three([opcode.code() as Word, dst.0, constant.to_bits()])
    }

    Instruction::Binary{ opcode, dst, a, b } => {
      // [OpCode][Dst][A][B]
      EncodedInstruction::Four([opcode.code() as Word, dst.0, a.0, b.0])
    }

    Instruction::BinaryConstant{ opcode, dst, constant, b } => {
      // [OpCode][Dst][Constant][B]
      EncodedInstruction::Four([opcode.code() as Word, dst.0, constant.to_bits(), b.0])
    }

  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn constants_are_bit_exact(){
    // A NaN with a payload and a negative zero must not be normalized.
    for bits in [0x7FC0_0001u32, 0x8000_0000, 0x4120_0000, 0xFFFF_FFFF].iter() {
      let instruction = Instruction::UnaryConstant{
        opcode   : Operation::MovC,
        dst      : Register(1),
        constant : f32::from_bits(*bits)
      };
      let encoded = encode_instruction(&instruction);
      assert_eq!(encoded.words()[2], *bits);

      let mut reader = ByteCodeReader::new(encoded.words());
      match try_decode_instruction(&mut reader).unwrap() {
        Instruction::UnaryConstant{ constant, .. } => assert_eq!(constant.to_bits(), *bits),
        other => panic!("decoded the wrong shape: {:?}", other)
      }
    }
  }

  #[test]
  fn cursor_advances_by_instruction_size(){
    let code = [
      Operation::SqrtR.code() as Word, 2, 2,
      Operation::MulCR.code() as Word, 2, 10.0f32.to_bits(), 2,
    ];
    let mut reader = ByteCodeReader::new(&code);

    try_decode_instruction(&mut reader).unwrap();
    assert_eq!(reader.offset(), 3);
    let instruction = try_decode_instruction(&mut reader).unwrap();
    assert_eq!(reader.offset(), 7);
    assert!(reader.is_at_end());
    assert_eq!(format!("{}", instruction), "Mul_CR(r2, 10.0, r2)");
  }

  #[test]
  fn unknown_and_truncated(){
    let mut reader = ByteCodeReader::new(&[0x1_0000]);
    assert_eq!(
      reader.next_operation(),
      Err(BytecodeError::UnknownOpcode{ opcode: 0x1_0000, offset: 0 })
    );

    let code = [Operation::AddRR.code() as Word, 2, 0];
    let mut reader = ByteCodeReader::new(&code);
    assert_eq!(
      reader.next_operation(),
      Err(BytecodeError::Truncated{ opcode: Operation::AddRR, offset: 0 })
    );
  }

}
