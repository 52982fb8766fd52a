//! Assembles an expression program, runs it over a batch of instances, and prints the input and
//! output channels side by side.
//!
//! ```text
//! exprvm [program.asm] [num_instances]
//! ```
//!
//! Each input channel `c` is filled with the ramp `c + 1, c + 2, ...`. Set `RUST_LOG=trace` to
//! watch the register file after every instruction.

#[macro_use] extern crate prettytable;

use std::error::Error;
use std::fs;

use prettytable::{Cell, Row, Table};
use tracing::info;
use tracing_subscriber::EnvFilter;

use exprvm::vm::TABLE_DISPLAY_FORMAT;
use exprvm::{parse_assembly, ByteCode, ExpressionVM};

const DEMO_PROGRAM: &str = "
# Ten times the square root of x + y.
.inputs(x, y)
.outputs(length)
Add_RR(r2, r0, r1)
Sqrt_R(r2, r2)
Mul_CR(r2, 10.0, r2)
";

fn channel_name(names: &exprvm::channels::ChannelTable, prefix: char, index: usize) -> String {
  match names.name_of(index) {
    Some(name) => name.to_string(),
    None       => format!("{}{}", prefix, index)
  }
}

fn make_channel_table(
  byte_code     : &ByteCode,
  inputs        : &[f32],
  outputs       : &[f32],
  num_instances : usize
) -> Table
{
  let num_inputs  = byte_code.num_input_registers();
  let num_outputs = outputs.len() / num_instances;

  let mut titles = vec![Cell::new("#").style_spec("ubr")];
  for index in 0..num_inputs {
    titles.push(Cell::new(&channel_name(byte_code.inputs(), 'i', index)).style_spec("ubl"));
  }
  for index in 0..num_outputs {
    titles.push(Cell::new(&channel_name(byte_code.outputs(), 'o', index)).style_spec("ubl"));
  }

  let mut table = Table::new();
  table.set_format(*TABLE_DISPLAY_FORMAT);
  table.set_titles(Row::new(titles));

  for instance in 0..num_instances {
    let mut row = row![r->instance];
    for channel in inputs.chunks_exact(num_instances).chain(outputs.chunks_exact(num_instances)) {
      row.add_cell(Cell::new(&channel[instance].to_string()));
    }
    table.add_row(row);
  }
  table
}

fn main() -> Result<(), Box<dyn Error>> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .init();

  let mut args = std::env::args().skip(1);
  let text =
    match args.next() {
      Some(path) => fs::read_to_string(path)?,
      None       => DEMO_PROGRAM.to_string()
    };
  let num_instances: usize =
    match args.next() {
      Some(count) => count.parse()?,
      None        => 10
    };

  let byte_code = parse_assembly(&text)?;
  println!("# Program\n{}", byte_code);

  let num_inputs  = byte_code.num_input_registers();
  let num_outputs = byte_code.outputs().len().max(1).min(byte_code.num_temp_registers());

  let inputs: Vec<f32> =
    (0..num_inputs)
      .flat_map(|channel| (0..num_instances).map(move |i| (channel + i + 1) as f32))
      .collect();
  let mut outputs = vec![0.0f32; num_outputs * num_instances];

  let mut vm = ExpressionVM::new();
  vm.execute(&byte_code, &inputs, &mut outputs, num_instances)?;
  info!(num_instances, num_outputs, "Executed expression");

  if num_instances > 0 {
    println!("{}", make_channel_table(&byte_code, &inputs, &outputs, num_instances));
  }
  Ok(())
}
