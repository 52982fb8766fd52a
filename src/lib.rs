/*!
  A lane-vectorized bytecode interpreter for small, branch-free arithmetic expressions.

  Programs are flat sequences of register instructions (`Add_RR`, `Sqrt_R`, `Mul_CR`, ...) over
  four-lane `f32` vectors. `ExpressionVM::execute` packs the instances of each input channel four
  at a time into input registers, runs the program once over every lane-group, and unpacks the
  output registers back into flat channel-major arrays.

  ```
  use exprvm::{parse_assembly, ExpressionVM};

  let byte_code = parse_assembly("
    .inputs(x, y)
    Add_RR(r2, r0, r1)
    Sqrt_R(r2, r2)
    Mul_CR(r2, 10.0, r2)
  ").unwrap();

  let inputs = [1.0, 2.0, 3.0, 4.0, 5.0,   5.0, 6.0, 7.0, 8.0, 9.0];
  let mut outputs = [0.0; 5];
  ExpressionVM::new().execute(&byte_code, &inputs, &mut outputs, 5).unwrap();

  assert_eq!(outputs[0], 10.0 * 6.0f32.sqrt());
  ```
*/

#[macro_use] extern crate prettytable;
#[macro_use] extern crate lazy_static;

pub mod bytecode;
pub mod channels;
pub mod error;
pub mod kernels;
pub mod register;
pub mod register_file;
pub mod streams;
pub mod vm;

pub use bytecode::{parse_assembly, ByteCode, Instruction, Operand, Operation};
pub use error::{AssemblyError, BytecodeError, ChannelKind, ExecuteError};
pub use register::Register;
pub use register_file::DEFAULT_REGISTER_BUDGET;
pub use vm::ExpressionVM;
