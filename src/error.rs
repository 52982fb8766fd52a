//! Error types for bytecode decoding, assembly, and execution.

use std::fmt::{Display, Formatter};

use thiserror::Error;

use crate::bytecode::{Operation, Word};
use crate::register::Register;

/// Problems with the encoded word stream itself.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BytecodeError {
  #[error("unknown opcode {opcode} at word {offset}")]
  UnknownOpcode { opcode: Word, offset: usize },

  #[error("{opcode} at word {offset} runs past the end of the bytecode")]
  Truncated { opcode: Operation, offset: usize },

  #[error("register {register} is out of range; the program has {limit} registers")]
  RegisterOutOfRange { register: Register, limit: usize },
}

/// Which side of `execute` a channel buffer belongs to.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ChannelKind {
  Input,
  Output
}

impl Display for ChannelKind {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      ChannelKind::Input  => write!(f, "input"),
      ChannelKind::Output => write!(f, "output")
    }
  }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecuteError {
  #[error("program needs {required} register slots but the VM only has {available}")]
  CapacityExceeded { required: usize, available: usize },

  #[error("{kind} buffer of {len} floats is not a whole number of channels of {num_instances} instances")]
  ChannelLength { kind: ChannelKind, len: usize, num_instances: usize },

  #[error("program reads {expected} input channels but {got} were given")]
  InputChannels { expected: usize, got: usize },

  #[error("program has {available} temp registers but {got} output channels were given")]
  OutputChannels { available: usize, got: usize },

  #[error("fatal bytecode error: {0}")]
  Bytecode(#[from] BytecodeError),
}

/// Errors produced by `bytecode::parse_assembly`. Line numbers count from 1.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AssemblyError {
  #[error("error on line {line}: cannot parse `{text}`")]
  Syntax { line: usize, text: String },

  #[error("error on line {line}: {name} is not an operation")]
  UnknownOperation { line: usize, name: String },

  #[error("error on line {line}: {operation} expects ({expected}) but was given ({got})")]
  WrongOperands { line: usize, operation: Operation, expected: String, got: String },

  #[error("error on line {line}: register {register} is out of range; the program has {limit} registers")]
  RegisterOutOfRange { line: usize, register: Register, limit: usize },

  #[error("error on line {line}: channel `{name}` is declared twice")]
  DuplicateChannel { line: usize, name: String },

  #[error("error on line {line}: inputs are declared both by count and by name")]
  MixedInputs { line: usize },
}
