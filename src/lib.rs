//! Emulator for a small textual assembly language.
//!
//! Programs are plain text, one instruction per line: a flat register
//! namespace (`R1`, `R2`, ... plus the reserved `PC`, `SP` and `RV`), a
//! byte-addressable address space written `M[expr]`, assignments with an
//! optional `=.1` / `=.2` byte width, `+ - * /` arithmetic, and control flow
//! through `JUMP`, `CALL <name>`, `RET` and the branch mnemonics
//! `BLT BLE BEQ BNE BGT BGE`.
//!
//! [`program::Program::parse`] turns source text into validated instruction
//! token sequences and a function table; [`processor::Processor::run`]
//! executes them against the register file and sparse address space in
//! [`mem::Memory`], one instruction at a time via [`emulator::Emulator`].
//! Any violation (malformed instruction, undefined register or function,
//! out-of-range or uninitialized address, unbalanced stack on the final
//! `RET`) aborts the load or run with a descriptive error.

pub mod emulator;
pub mod lexer;
pub mod mem;
pub mod processor;
pub mod program;
