//! Target instruction set support. Only x86-64 is implemented.

pub mod x64;
