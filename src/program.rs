//! Validated program storage: the ordered instruction sequence and the
//! function table built from `<name>` declaration lines.

use std::collections::BTreeMap;
use std::fmt;

use crate::lexer;

/// Program store result type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading a program or looking up its contents.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A source line failed the instruction constraint check. The whole load
    /// aborts on the first such line.
    #[error("compilation error at line {line}: \"{text}\": {reason}")]
    InvalidInstruction {
        line: usize,
        text: String,
        #[source]
        reason: lexer::Error,
    },

    /// The same function name was declared twice.
    #[error("redeclaration of function \"{name}\" at line {line}")]
    DuplicateFunction { line: usize, name: String },

    /// A `CALL` referenced a function that was never declared.
    #[error("function \"{name}\" doesn't exist")]
    UndefinedFunction { name: String },

    /// An instruction index outside the stored program was requested.
    #[error("instruction index {index} is out of range")]
    IndexOutOfRange { index: usize },
}

/// One validated source line, stored as its ordered token sequence.
///
/// Never empty: blank, comment-only and declaration lines are filtered out
/// before storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    tokens: Vec<String>,
}

impl Instruction {
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// The leading token, which selects the instruction handler.
    pub fn identifier(&self) -> &str {
        &self.tokens[0]
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tokens.join(" "))
    }
}

/// The loaded program: instructions in source order plus the table of
/// declared function entry points. Immutable once parsed.
#[derive(Debug, Clone, Default)]
pub struct Program {
    instructions: Vec<Instruction>,
    functions: BTreeMap<String, usize>,
}

impl Program {
    /// Parses source text into a program.
    ///
    /// Each line has its trailing comment stripped and is checked against
    /// the instruction constraints before tokenization. A declaration line
    /// (first token bracketed by `<` and `>`) records the index the next
    /// stored instruction will receive instead of being stored itself; the
    /// recorded key keeps its brackets, matching `CALL <name>` call sites.
    pub fn parse(source: &str) -> Result<Self> {
        let mut instructions = Vec::new();
        let mut functions = BTreeMap::new();

        for (index, raw) in source.lines().enumerate() {
            let line_number = index + 1;
            let line = strip_comment(raw);

            lexer::check_instruction(line).map_err(|reason| Error::InvalidInstruction {
                line: line_number,
                text: raw.trim_end().to_string(),
                reason,
            })?;

            let tokens = lexer::tokenize(line);
            if tokens.is_empty() {
                continue;
            }

            if is_function_declaration(&tokens[0]) {
                let name = tokens[0].clone();
                if functions.contains_key(&name) {
                    return Err(Error::DuplicateFunction {
                        line: line_number,
                        name,
                    });
                }
                functions.insert(name, instructions.len());
                continue;
            }

            instructions.push(Instruction { tokens });
        }

        Ok(Self {
            instructions,
            functions,
        })
    }

    /// Total number of stored instructions.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// The instruction at `index`. Instruction addresses are `index * 4`.
    pub fn instruction(&self, index: usize) -> Result<&Instruction> {
        self.instructions
            .get(index)
            .ok_or(Error::IndexOutOfRange { index })
    }

    /// Entry index of a declared function, looked up by its bracketed name.
    pub fn function_index(&self, name: &str) -> Result<usize> {
        self.functions
            .get(name)
            .copied()
            .ok_or_else(|| Error::UndefinedFunction {
                name: name.to_string(),
            })
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find(lexer::COMMENT_PREFIX) {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn is_function_declaration(token: &str) -> bool {
    token.contains(lexer::FUNC_DECL_OPEN) && token.contains(lexer::FUNC_DECL_CLOSE)
}
