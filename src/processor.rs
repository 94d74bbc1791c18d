//! The fetch-decode-execute loop driving the emulator over a loaded program.

use crate::emulator::{self, ControlFlow, Emulator};
use crate::lexer::INSTR_POINTER;
use crate::program::{self, Program};

/// Processor result type
pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Error occurred while executing an instruction
    #[error(transparent)]
    Emulation(#[from] emulator::Error),

    /// Error occurred while fetching an instruction
    #[error(transparent)]
    Program(#[from] program::Error),
}

/// Owns a loaded program and the emulator state for one run.
#[derive(Debug)]
pub struct Processor {
    program: Program,
    emulator: Emulator,
}

impl Processor {
    pub fn new(program: Program) -> Self {
        Self {
            program,
            emulator: Emulator::new(),
        }
    }

    /// Parses source text and wraps the resulting program.
    pub fn from_source(source: &str) -> Result<Self> {
        Ok(Self::new(Program::parse(source)?))
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn memory(&self) -> &crate::mem::Memory {
        self.emulator.memory()
    }

    pub fn memory_mut(&mut self) -> &mut crate::mem::Memory {
        self.emulator.memory_mut()
    }

    /// Runs the program from instruction index 0 until the final `RET` or
    /// until the index leaves the program.
    ///
    /// Before every dispatch the `PC` register is mirrored to
    /// `index * 4`; with `trace` set, each executed instruction is echoed as
    /// `address: tokens`. Returns the return-value register of the final
    /// `RET`, or `None` when execution ran off the end of the program.
    pub fn run(&mut self, trace: bool) -> Result<Option<i32>> {
        let mut index: i64 = 0;

        while index >= 0 && (index as usize) < self.program.len() {
            let current = index as usize;
            self.emulator
                .memory_mut()
                .set_register(INSTR_POINTER, (current * 4) as i32);

            let instruction = self.program.instruction(current)?;
            if trace {
                println!("{}: {}", current * 4, instruction);
            }

            match self.emulator.execute(current, instruction, &self.program)? {
                ControlFlow::Next => index += 1,
                ControlFlow::Jump(target) => index = target,
                ControlFlow::Halt(value) => return Ok(Some(value)),
            }
        }

        Ok(None)
    }
}
