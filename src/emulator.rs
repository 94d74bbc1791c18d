//! Per-instruction execution: dispatch on the leading token, the expression
//! evaluator, the ALU and the typed load/store operations.

use crate::lexer::{
    self, BRANCH_EQ, BRANCH_GE, BRANCH_GT, BRANCH_LE, BRANCH_LT, BRANCH_MNEMONICS, BRANCH_NE,
    CALL, INSTR_POINTER, JUMP, MEM_ACCESS_CLOSE, MEM_ACCESS_OPEN, MEM_ACCESS_PREFIX,
    REGISTER_PREFIX, RETURN, RET_VALUE, STACK_POINTER,
};
use crate::mem::{self, Memory, STACK_POINTER_INIT, WORD_SIZE};
use crate::program::{self, Instruction, Program};

/// Emulator result type
pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Error occurred while accessing a register or memory location
    #[error(transparent)]
    Memory(#[from] mem::Error),

    /// Error occurred while looking up a function entry point
    #[error(transparent)]
    Program(#[from] program::Error),

    /// The final `RET` found the stack pointer away from its initial value.
    #[error("memory leak detected: stack pointer at {stack_pointer} on final return")]
    MemoryLeak { stack_pointer: i32 },

    #[error("division by zero")]
    DivisionByZero,

    /// A token sequence no evaluator shape accepts.
    #[error("malformed expression: \"{0}\"")]
    MalformedExpression(String),

    /// A token that looks numeric but does not parse as a 32-bit integer.
    #[error("invalid numeric literal \"{0}\"")]
    InvalidLiteral(String),
}

/// Where execution continues after one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlow {
    /// Fall through to the next instruction.
    Next,
    /// Continue at the given instruction index. Signed: a negative target
    /// simply ends the run.
    Jump(i64),
    /// Top-level `RET`: terminate, surfacing the return-value register.
    Halt(i32),
}

/// Executes instructions against the register file and address space.
///
/// Call/return discipline is an explicit software stack in the address
/// space: `CALL` pushes the return address word below the stack pointer and
/// `RET` pops it. The call-depth counter distinguishes a nested `RET` from
/// the program's final one.
#[derive(Debug)]
pub struct Emulator {
    memory: Memory,
    num_calls: usize,
}

impl Default for Emulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Emulator {
    pub fn new() -> Self {
        Self {
            memory: Memory::new(),
            num_calls: 0,
        }
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// Outstanding `CALL`s without a matching `RET`.
    pub fn call_depth(&self) -> usize {
        self.num_calls
    }

    /// Executes the instruction stored at `index`, keyed on its leading
    /// token. A leading token that matches no handler is a no-op and falls
    /// through.
    pub fn execute(
        &mut self,
        index: usize,
        instruction: &Instruction,
        program: &Program,
    ) -> Result<ControlFlow> {
        let tokens = instruction.tokens();
        let identifier = instruction.identifier();

        if identifier == RETURN {
            self.ret()
        } else if identifier == STACK_POINTER
            || identifier == RET_VALUE
            || identifier.contains(REGISTER_PREFIX)
            || identifier.contains(MEM_ACCESS_PREFIX)
        {
            self.evaluate(tokens)?;
            Ok(ControlFlow::Next)
        } else if identifier == CALL {
            self.call(tokens, index, program)
        } else if identifier == JUMP {
            let target = self.evaluate(&tokens[1..])?;
            Ok(ControlFlow::Jump(target as i64 / 4))
        } else if BRANCH_MNEMONICS.contains(&identifier) {
            self.branch(tokens)
        } else {
            Ok(ControlFlow::Next)
        }
    }

    /// Evaluates a token sequence: a lone literal or register, a pure ALU
    /// expression, an arithmetic assignment, or one of the `=` assignment
    /// shapes including typed store/load through `M[...]`. Returns the
    /// computed value; assignment shapes apply their register or memory
    /// write as a side effect.
    pub fn evaluate(&mut self, tokens: &[String]) -> Result<i32> {
        match tokens {
            [operand] => self.resolve(operand),
            [left, op, right] if op.as_str() != "=" => self.alu(left, op, right),
            [dest, _, left, op, right] => {
                let value = self.alu(left, op, right)?;
                self.memory.set_register(dest, value);
                Ok(value)
            }
            _ => self.assign(tokens),
        }
    }

    /// The `=` assignment shapes of variable length: store when the
    /// destination is a memory access, load when the source is, otherwise a
    /// plain register assignment. An `.1`/`.2` token directly after `=`
    /// selects the byte width for memory operations and is ignored for
    /// register assignments.
    fn assign(&mut self, tokens: &[String]) -> Result<i32> {
        let malformed = || Error::MalformedExpression(tokens.join(" "));

        match tokens {
            [dest, _, source] if dest.contains(MEM_ACCESS_PREFIX) => {
                self.store(dest, source, WORD_SIZE)
            }
            [dest, _, width, source] if dest.contains(MEM_ACCESS_PREFIX) => {
                self.store(dest, source, byte_count(width)?)
            }
            [dest, _, source] if source.contains(MEM_ACCESS_PREFIX) => {
                self.load(dest, source, WORD_SIZE)
            }
            [dest, _, width, source] if source.contains(MEM_ACCESS_PREFIX) => {
                self.load(dest, source, byte_count(width)?)
            }
            [dest, _, _, source] | [dest, _, source] => {
                let value = self.resolve(source)?;
                self.memory.set_register(dest, value);
                Ok(value)
            }
            _ => Err(malformed()),
        }
    }

    /// Resolves a single token as a numeric literal or a register read.
    fn resolve(&self, token: &str) -> Result<i32> {
        if is_literal(token) {
            token
                .parse()
                .map_err(|_| Error::InvalidLiteral(token.to_string()))
        } else {
            Ok(self.memory.register(token)?)
        }
    }

    /// Applies one arithmetic operator to two resolved operands. Arithmetic
    /// wraps like native two's-complement; division truncates toward zero.
    fn alu(&self, left: &str, op: &str, right: &str) -> Result<i32> {
        let left_value = self.resolve(left)?;
        let right_value = self.resolve(right)?;

        match op {
            "+" => Ok(left_value.wrapping_add(right_value)),
            "-" => Ok(left_value.wrapping_sub(right_value)),
            "*" => Ok(left_value.wrapping_mul(right_value)),
            "/" => {
                if right_value == 0 {
                    return Err(Error::DivisionByZero);
                }
                Ok(left_value.wrapping_div(right_value))
            }
            _ => Err(Error::MalformedExpression(format!(
                "{left} {op} {right}"
            ))),
        }
    }

    /// Writes `byte_count` bytes of the resolved source to the address named
    /// by the `M[...]` destination.
    fn store(&mut self, dest: &str, source: &str, byte_count: usize) -> Result<i32> {
        let address = self.address_of(dest)?;
        let value = self.resolve(source)?;
        self.memory.write(value, address, byte_count)?;
        Ok(value)
    }

    /// Reads `byte_count` bytes from the address named by the `M[...]`
    /// source into the destination register.
    fn load(&mut self, dest: &str, source: &str, byte_count: usize) -> Result<i32> {
        let address = self.address_of(source)?;
        let value = self.memory.read(address, byte_count)?;
        self.memory.set_register(dest, value);
        Ok(value)
    }

    /// Evaluates the address expression between the brackets of a memory
    /// access token by re-tokenizing its contents, so nested register
    /// arithmetic like `M[R1 + 3]` is itself fully evaluated.
    fn address_of(&mut self, token: &str) -> Result<i32> {
        let open = token.find(MEM_ACCESS_OPEN);
        let close = token.find(MEM_ACCESS_CLOSE);
        let contents = match (open, close) {
            (Some(open), Some(close)) if open < close => &token[open + 1..close],
            _ => return Err(Error::MalformedExpression(token.to_string())),
        };

        let tokens = lexer::tokenize(contents);
        self.evaluate(&tokens)
    }

    fn ret(&mut self) -> Result<ControlFlow> {
        if self.num_calls > 0 {
            let stack_pointer = self.memory.register(STACK_POINTER)?;
            let target = self.memory.read(stack_pointer, WORD_SIZE)? / 4;
            self.memory
                .set_register(STACK_POINTER, stack_pointer + WORD_SIZE as i32);
            self.num_calls -= 1;
            return Ok(ControlFlow::Jump(target as i64));
        }

        let stack_pointer = self.memory.register(STACK_POINTER)?;
        if stack_pointer != STACK_POINTER_INIT {
            return Err(Error::MemoryLeak { stack_pointer });
        }

        Ok(ControlFlow::Halt(self.memory.register(RET_VALUE)?))
    }

    /// Pushes the address of the next instruction onto the stack, then jumps
    /// to the called function's entry. The push happens before the lookup;
    /// it is not rolled back when the function does not exist.
    fn call(&mut self, tokens: &[String], index: usize, program: &Program) -> Result<ControlFlow> {
        let name = tokens
            .get(1)
            .ok_or_else(|| Error::MalformedExpression(tokens.join(" ")))?;

        let stack_pointer = self.memory.register(STACK_POINTER)? - WORD_SIZE as i32;
        self.memory.set_register(STACK_POINTER, stack_pointer);
        self.memory
            .write(((index + 1) * 4) as i32, stack_pointer, WORD_SIZE)?;
        self.num_calls += 1;

        let target = program.function_index(name)?;
        Ok(ControlFlow::Jump(target as i64))
    }

    /// Evaluates both operands and the destination expression, then jumps
    /// when the comparison holds, otherwise falls through to the
    /// instruction after the mirrored `PC`.
    fn branch(&mut self, tokens: &[String]) -> Result<ControlFlow> {
        if tokens.len() < 4 {
            return Err(Error::MalformedExpression(tokens.join(" ")));
        }

        let left = self.evaluate(&tokens[1..2])?;
        let right = self.evaluate(&tokens[2..3])?;
        let destination = self.evaluate(&tokens[3..])?;

        let taken = match tokens[0].as_str() {
            BRANCH_LT => left < right,
            BRANCH_LE => left <= right,
            BRANCH_EQ => left == right,
            BRANCH_NE => left != right,
            BRANCH_GT => left > right,
            BRANCH_GE => left >= right,
            _ => false,
        };

        if taken {
            Ok(ControlFlow::Jump(destination as i64 / 4))
        } else {
            let pc = self.memory.register(INSTR_POINTER)?;
            Ok(ControlFlow::Jump(pc as i64 / 4 + 1))
        }
    }
}

/// Whether the token is a numeric literal, optionally signed.
fn is_literal(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => true,
        Some('-') => chars.next().is_some_and(|c| c.is_ascii_digit()),
        _ => false,
    }
}

/// Byte width from an `.1`/`.2` suffix token. Anything beyond the word size
/// would run past the value's byte representation.
fn byte_count(token: &str) -> Result<usize> {
    token
        .chars()
        .nth(1)
        .and_then(|c| c.to_digit(10))
        .map(|width| width as usize)
        .filter(|&width| (1..=WORD_SIZE).contains(&width))
        .ok_or_else(|| Error::MalformedExpression(token.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn eval(emulator: &mut Emulator, line: &str) -> Result<i32> {
        let tokens = tokenize(line);
        emulator.evaluate(&tokens)
    }

    #[test]
    fn evaluates_literals() -> Result<()> {
        let mut emulator = Emulator::new();
        assert_eq!(eval(&mut emulator, "42")?, 42);
        assert_eq!(eval(&mut emulator, "-10")?, -10);
        Ok(())
    }

    #[test]
    fn evaluates_register_reads() -> Result<()> {
        let mut emulator = Emulator::new();
        emulator.memory_mut().set_register("R1", 7);
        assert_eq!(eval(&mut emulator, "R1")?, 7);
        Ok(())
    }

    #[test]
    fn undefined_register_read_fails() {
        let mut emulator = Emulator::new();
        assert_eq!(
            eval(&mut emulator, "R1").unwrap_err(),
            Error::Memory(mem::Error::UndefinedRegister("R1".to_string()))
        );
    }

    #[test]
    fn evaluates_pure_alu_expression_without_assignment() -> Result<()> {
        let mut emulator = Emulator::new();
        emulator.memory_mut().set_register("R1", 6);
        assert_eq!(eval(&mut emulator, "R1 * 7")?, 42);
        assert_eq!(eval(&mut emulator, "R1 + -10")?, -4);
        assert!(emulator.memory().register("R2").is_err());
        Ok(())
    }

    #[test]
    fn arithmetic_assignment_stores_result() -> Result<()> {
        let mut emulator = Emulator::new();
        emulator.memory_mut().set_register("R2", 40);
        assert_eq!(eval(&mut emulator, "R1 = R2 + 2")?, 42);
        assert_eq!(emulator.memory().register("R1")?, 42);
        Ok(())
    }

    #[test]
    fn plain_assignment_of_literal_and_register() -> Result<()> {
        let mut emulator = Emulator::new();
        eval(&mut emulator, "R1 = 5")?;
        eval(&mut emulator, "R2 = R1")?;
        assert_eq!(emulator.memory().register("R2")?, 5);
        Ok(())
    }

    #[test]
    fn width_suffix_is_ignored_for_register_assignment() -> Result<()> {
        let mut emulator = Emulator::new();
        eval(&mut emulator, "R1 =.1 300")?;
        assert_eq!(emulator.memory().register("R1")?, 300);
        Ok(())
    }

    #[test]
    fn division_truncates_toward_zero() -> Result<()> {
        let mut emulator = Emulator::new();
        assert_eq!(eval(&mut emulator, "7 / 2")?, 3);
        assert_eq!(eval(&mut emulator, "-7 / 2")?, -3);
        Ok(())
    }

    #[test]
    fn division_by_zero_fails() {
        let mut emulator = Emulator::new();
        assert_eq!(eval(&mut emulator, "1 / 0").unwrap_err(), Error::DivisionByZero);
    }

    #[test]
    fn store_and_load_round_trip() -> Result<()> {
        let mut emulator = Emulator::new();
        eval(&mut emulator, "R1 = 1000")?;
        eval(&mut emulator, "M[R1] = 123456")?;
        eval(&mut emulator, "R2 = M[R1]")?;
        assert_eq!(emulator.memory().register("R2")?, 123456);
        Ok(())
    }

    #[test]
    fn store_address_expression_is_evaluated() -> Result<()> {
        let mut emulator = Emulator::new();
        eval(&mut emulator, "R1 = 1000")?;
        eval(&mut emulator, "M[R1 + 3] = 9")?;
        assert_eq!(emulator.memory().read(1003, WORD_SIZE)?, 9);
        Ok(())
    }

    #[test]
    fn typed_store_and_load_use_suffix_width() -> Result<()> {
        let mut emulator = Emulator::new();
        eval(&mut emulator, "R1 = 1000")?;
        eval(&mut emulator, "M[R1] =.2 -2")?;
        assert_eq!(eval(&mut emulator, "R2 =.2 M[R1]")?, 0xFFFE);
        // Only two bytes were written.
        assert!(eval(&mut emulator, "R3 = M[R1]").is_err());
        Ok(())
    }

    #[test]
    fn store_of_literal_source() -> Result<()> {
        let mut emulator = Emulator::new();
        eval(&mut emulator, "M[512] = -1")?;
        assert_eq!(emulator.memory().read(512, WORD_SIZE)?, -1);
        Ok(())
    }

    #[test]
    fn empty_expression_is_malformed() {
        let mut emulator = Emulator::new();
        assert!(matches!(
            emulator.evaluate(&[]).unwrap_err(),
            Error::MalformedExpression(_)
        ));
    }

    fn one_instruction(line: &str) -> (Program, Emulator) {
        let program = Program::parse(line).unwrap();
        (program, Emulator::new())
    }

    #[test]
    fn call_pushes_return_address_and_jumps() -> Result<()> {
        let source = "CALL <f>\nRET\n<f>\nRET\n";
        let program = Program::parse(source).unwrap();
        let mut emulator = Emulator::new();

        let flow = emulator.execute(0, program.instruction(0)?, &program)?;
        assert_eq!(flow, ControlFlow::Jump(2));
        assert_eq!(emulator.call_depth(), 1);

        let stack_pointer = emulator.memory().register(STACK_POINTER)?;
        assert_eq!(stack_pointer, STACK_POINTER_INIT - 4);
        // Saved word is the address of the instruction after the CALL.
        assert_eq!(emulator.memory().read(stack_pointer, WORD_SIZE)?, 4);
        Ok(())
    }

    #[test]
    fn ret_pops_saved_address_and_restores_stack_pointer() -> Result<()> {
        let source = "CALL <f>\nRET\n<f>\nRET\n";
        let program = Program::parse(source).unwrap();
        let mut emulator = Emulator::new();

        emulator.execute(0, program.instruction(0)?, &program)?;
        let flow = emulator.execute(2, program.instruction(2)?, &program)?;
        assert_eq!(flow, ControlFlow::Jump(1));
        assert_eq!(emulator.call_depth(), 0);
        assert_eq!(
            emulator.memory().register(STACK_POINTER)?,
            STACK_POINTER_INIT
        );
        Ok(())
    }

    #[test]
    fn call_of_undeclared_function_fails_after_push() {
        let (program, mut emulator) = one_instruction("CALL <nope>\n");
        let err = emulator
            .execute(0, program.instruction(0).unwrap(), &program)
            .unwrap_err();
        assert_eq!(
            err,
            Error::Program(program::Error::UndefinedFunction {
                name: "<nope>".to_string()
            })
        );
        // The push is not rolled back.
        assert_eq!(
            emulator.memory().register(STACK_POINTER).unwrap(),
            STACK_POINTER_INIT - 4
        );
    }

    #[test]
    fn top_level_ret_surfaces_return_value() -> Result<()> {
        let (program, mut emulator) = one_instruction("RET\n");
        emulator.memory_mut().set_register(RET_VALUE, 99);
        let flow = emulator.execute(0, program.instruction(0)?, &program)?;
        assert_eq!(flow, ControlFlow::Halt(99));
        Ok(())
    }

    #[test]
    fn top_level_ret_with_moved_stack_pointer_is_a_leak() {
        let (program, mut emulator) = one_instruction("RET\n");
        emulator
            .memory_mut()
            .set_register(STACK_POINTER, STACK_POINTER_INIT - 8);
        let err = emulator
            .execute(0, program.instruction(0).unwrap(), &program)
            .unwrap_err();
        assert_eq!(
            err,
            Error::MemoryLeak {
                stack_pointer: STACK_POINTER_INIT - 8
            }
        );
    }

    #[test]
    fn jump_divides_target_address_by_four() -> Result<()> {
        let (program, mut emulator) = one_instruction("JUMP 8\n");
        let flow = emulator.execute(0, program.instruction(0)?, &program)?;
        assert_eq!(flow, ControlFlow::Jump(2));
        Ok(())
    }

    #[test]
    fn branch_taken_jumps_to_destination() -> Result<()> {
        let (program, mut emulator) = one_instruction("BEQ R1 5 16\n");
        emulator.memory_mut().set_register("R1", 5);
        emulator.memory_mut().set_register(INSTR_POINTER, 0);
        let flow = emulator.execute(0, program.instruction(0)?, &program)?;
        assert_eq!(flow, ControlFlow::Jump(4));
        Ok(())
    }

    #[test]
    fn branch_not_taken_falls_through() -> Result<()> {
        let (program, mut emulator) = one_instruction("BEQ R1 5 16\n");
        emulator.memory_mut().set_register("R1", 6);
        emulator.memory_mut().set_register(INSTR_POINTER, 12);
        let flow = emulator.execute(3, program.instruction(0)?, &program)?;
        assert_eq!(flow, ControlFlow::Jump(4));
        Ok(())
    }

    #[test]
    fn branch_destination_may_be_an_expression() -> Result<()> {
        let (program, mut emulator) = one_instruction("BLT R1 10 R2 + 4\n");
        emulator.memory_mut().set_register("R1", 1);
        emulator.memory_mut().set_register("R2", 20);
        let flow = emulator.execute(0, program.instruction(0)?, &program)?;
        assert_eq!(flow, ControlFlow::Jump(6));
        Ok(())
    }

    #[test]
    fn unknown_identifier_is_skipped() -> Result<()> {
        let (program, mut emulator) = one_instruction("NOP\n");
        let flow = emulator.execute(0, program.instruction(0)?, &program)?;
        assert_eq!(flow, ControlFlow::Next);
        Ok(())
    }
}
