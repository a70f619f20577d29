// intvm demo: runs a couple of fixed programs and prints the stacks.

use anyhow::Result;
use intvm::{Executor, Instruction, Op, Program, Width, I32, I64};
use tracing_subscriber::EnvFilter;

// ((1 + 2) * 3) at 32 bits
fn build_demo_program() -> Program<I32> {
    vec![
        Instruction::constant(1),
        Instruction::constant(2),
        Instruction::op(Op::Add),
        Instruction::constant(3),
        Instruction::op(Op::Mul),
    ]
    .into_iter()
    .collect()
}

// 7 * 6, then a division by zero that leaves a trap on top
fn build_trap_program() -> Program<I64> {
    vec![
        Instruction::constant(7),
        Instruction::constant(6),
        Instruction::op(Op::Mul),
        Instruction::constant(0),
        Instruction::constant(44),
        Instruction::op(Op::DivU),
    ]
    .into_iter()
    .collect()
}

fn run<W: Width>(program: &Program<W>) -> Result<()> {
    let mut exec = Executor::<W>::new();
    exec.execute(program)?;
    let stack = exec
        .stack()
        .as_slice()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    println!("{}: [{stack}]", W::NAME);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    run(&build_demo_program())?;
    run(&build_trap_program())?;
    Ok(())
}
