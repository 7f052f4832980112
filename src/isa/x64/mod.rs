//! x86-64 backend: registers, the abstract instruction record, the binary
//! encoder, System V parameter classification, and instruction selection
//! from the CFG-IR.

pub mod abi;
pub mod emit;
pub mod inst;
pub mod lower;
pub mod regs;

#[cfg(test)]
mod emit_tests;
