/*!
  The human readable textual form of bytecode is called assembly. This module leverages the
  `strum` derives of `Operation` to read assembly into a `ByteCode`; `Display` on `ByteCode`
  writes it back out.

  Assembly is line oriented. `#` starts a comment. A line is blank, an instruction, or one of the
  directives below:

  ```text
  .inputs(x, y)         # named input channels; `.inputs(2)` declares unnamed ones
  .outputs(length)      # named output channels
  .temps(1)             # temp register count; inferred when omitted
  Add_RR(r2, r0, r1)
  Sqrt_R(r2, r2)
  Mul_CR(r2, 10.0, r2)  # constants are float literals or `0x` bit patterns
  ```
*/

use std::str::FromStr;

use nom::{
  branch::alt,
  bytes::complete::{tag, take_while1},
  character::complete::{char as one_char, digit1, hex_digit1, space0},
  combinator::{all_consuming, map, map_res},
  multi::separated_list0,
  number::complete::float,
  sequence::{delimited, pair, preceded, tuple},
  IResult
};

use crate::bytecode::{ByteCode, Instruction, Operand, Operation};
use crate::error::{AssemblyError, BytecodeError};
use crate::register::{Register, RegisterNumberType};

/// One line of assembly, before any semantic checks.
#[derive(Debug, PartialEq)]
enum Line<'a> {
  Inputs(Declaration<'a>),
  Outputs(Vec<&'a str>),
  Temps(usize),
  Instruction {
    name     : &'a str,
    operands : Vec<Operand>
  }
}

#[derive(Debug, PartialEq)]
enum Declaration<'a> {
  Count(usize),
  Names(Vec<&'a str>)
}

// region Parsers

fn identifier(input: &str) -> IResult<&str, &str> {
  take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)
}

fn count(input: &str) -> IResult<&str, usize> {
  map_res(digit1, usize::from_str)(input)
}

fn register(input: &str) -> IResult<&str, Register> {
  map_res(
    preceded(one_char('r'), digit1),
    |digits: &str| digits.parse::<RegisterNumberType>().map(Register)
  )(input)
}

/// A constant written as its bit pattern, e.g. `0x41200000` for `10.0`.
fn bit_pattern(input: &str) -> IResult<&str, f32> {
  map_res(
    preceded(alt((tag("0x"), tag("0X"))), hex_digit1),
    |digits: &str| u32::from_str_radix(digits, 16).map(f32::from_bits)
  )(input)
}

fn operand(input: &str) -> IResult<&str, Operand> {
  alt((
    map(register, Operand::Register),
    map(bit_pattern, Operand::Constant),
    map(float, Operand::Constant)
  ))(input)
}

/// `( item, item, ... )` with optional spaces around every token.
fn parenthesized<'a, O, F>(item: F) -> impl FnMut(&'a str) -> IResult<&'a str, Vec<O>>
  where F: FnMut(&'a str) -> IResult<&'a str, O>
{
  delimited(
    tuple((space0, one_char('('), space0)),
    separated_list0(tuple((space0, one_char(','), space0)), item),
    pair(space0, one_char(')'))
  )
}

fn single<'a, O, F>(item: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
  where F: FnMut(&'a str) -> IResult<&'a str, O>
{
  delimited(
    tuple((space0, one_char('('), space0)),
    item,
    pair(space0, one_char(')'))
  )
}

fn directive(input: &str) -> IResult<&str, Line> {
  alt((
    map(preceded(tag(".inputs"), single(count)), |n| Line::Inputs(Declaration::Count(n))),
    map(
      preceded(tag(".inputs"), parenthesized(identifier)),
      |names| Line::Inputs(Declaration::Names(names))
    ),
    map(preceded(tag(".outputs"), parenthesized(identifier)), Line::Outputs),
    map(preceded(tag(".temps"), single(count)), Line::Temps)
  ))(input)
}

fn instruction(input: &str) -> IResult<&str, Line> {
  map(
    pair(identifier, parenthesized(operand)),
    |(name, operands)| Line::Instruction{ name, operands }
  )(input)
}

fn line(input: &str) -> IResult<&str, Line> {
  all_consuming(alt((directive, instruction)))(input)
}

// endregion

/// Removes the comment and surrounding whitespace from a line.
fn strip(text: &str) -> &str {
  let code =
    match text.find('#') {
      Some(start) => &text[..start],
      None        => text
    };
  code.trim()
}

/**
  Reads assembly text into a `ByteCode`.

  Input registers are the declared input channels. Unless `.temps` gives the count explicitly,
  the temp register count is the smallest that covers every register the program references and
  every declared output.
*/
pub fn parse_assembly(text: &str) -> Result<ByteCode, AssemblyError> {
  let mut inputs       : Vec<(usize, &str)>         = Vec::new();
  let mut input_count  : usize                      = 0;
  let mut outputs      : Vec<(usize, &str)>         = Vec::new();
  let mut temps        : Option<usize>              = None;
  let mut instructions : Vec<(usize, Instruction)>  = Vec::new();

  for (index, raw_line) in text.lines().enumerate() {
    let line_number = index + 1;
    let stripped    = strip(raw_line);
    if stripped.is_empty() {
      continue;
    }

    let parsed =
      match line(stripped) {
        Ok((_rest, parsed)) => parsed,
        Err(_e)             => {
          return Err(AssemblyError::Syntax{ line: line_number, text: stripped.to_string() });
        }
      };

    match parsed {

      // Names are numbered from channel 0, so they cannot follow or precede unnamed inputs.
      Line::Inputs(Declaration::Count(n)) => {
        if !inputs.is_empty() {
          return Err(AssemblyError::MixedInputs{ line: line_number });
        }
        input_count += n;
      }

      Line::Inputs(Declaration::Names(names)) => {
        if input_count > inputs.len() {
          return Err(AssemblyError::MixedInputs{ line: line_number });
        }
        input_count += names.len();
        inputs.extend(names.into_iter().map(|name| (line_number, name)));
      }

      Line::Outputs(names) => {
        outputs.extend(names.into_iter().map(|name| (line_number, name)));
      }

      Line::Temps(n) => {
        temps = Some(n);
      }

      Line::Instruction{ name, operands } => {
        let operation =
          Operation::from_str(name)
            .map_err(|_e| AssemblyError::UnknownOperation{
              line : line_number,
              name : name.to_string()
            })?;

        let instruction =
          Instruction::from_operands(operation, &operands)
            .ok_or_else(|| AssemblyError::WrongOperands{
              line      : line_number,
              operation,
              expected  : join(operation.operand_kinds().iter()),
              got       : join(operands.iter().map(Operand::kind).collect::<Vec<_>>().iter())
            })?;

        instructions.push((line_number, instruction));
      }

    } // end match parsed line
  } // end for lines

  let num_temp_registers =
    match temps {
      Some(n) => n,
      None    => {
        let highest =
          instructions
            .iter()
            .flat_map(|(_line, instruction)| instruction.registers())
            .map(|register| register.idx() + 1)
            .max()
            .unwrap_or(0);
        highest.saturating_sub(input_count).max(outputs.len())
      }
    };

  let mut byte_code = ByteCode::new(input_count, num_temp_registers);

  for (line, name) in inputs {
    if byte_code.inputs_mut().push(name).is_err() {
      return Err(AssemblyError::DuplicateChannel{ line, name: name.to_string() });
    }
  }
  for (line, name) in outputs {
    if byte_code.outputs_mut().push(name).is_err() {
      return Err(AssemblyError::DuplicateChannel{ line, name: name.to_string() });
    }
  }

  for (line, instruction) in instructions {
    byte_code.emit(instruction).map_err(|e| match e {
      BytecodeError::RegisterOutOfRange{ register, limit } =>
        AssemblyError::RegisterOutOfRange{ line, register, limit },
      // `emit` only checks register ranges.
      _ => AssemblyError::Syntax{ line, text: instruction.to_string() }
    })?;
  }

  Ok(byte_code)
}

fn join<'a, T: 'a + ToString>(items: impl Iterator<Item = &'a T>) -> String {
  items
    .map(ToString::to_string)
    .collect::<Vec<String>>()
    .join(", ")
}
