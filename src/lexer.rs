//! Source syntax: the instruction character set, the line tokenizer and the
//! load-time instruction constraint check.

/// Prefix starting a trailing comment.
pub const COMMENT_PREFIX: char = ';';

/// Brackets surrounding a function declaration label.
pub const FUNC_DECL_OPEN: char = '<';
pub const FUNC_DECL_CLOSE: char = '>';

/// Prefix of the general-purpose register names.
pub const REGISTER_PREFIX: char = 'R';

/// Reserved register mirroring the current instruction address.
pub const INSTR_POINTER: &str = "PC";

/// Reserved stack-pointer register.
pub const STACK_POINTER: &str = "SP";

/// Reserved return-value register.
pub const RET_VALUE: &str = "RV";

/// Prefix opening a memory-access expression, closed by [`MEM_ACCESS_CLOSE`].
pub const MEM_ACCESS_PREFIX: &str = "M[";
pub const MEM_ACCESS_OPEN: char = '[';
pub const MEM_ACCESS_CLOSE: char = ']';

/// Control-flow keywords.
pub const JUMP: &str = "JUMP";
pub const CALL: &str = "CALL";
pub const RETURN: &str = "RET";

/// Branch mnemonics.
pub const BRANCH_LT: &str = "BLT";
pub const BRANCH_LE: &str = "BLE";
pub const BRANCH_EQ: &str = "BEQ";
pub const BRANCH_NE: &str = "BNE";
pub const BRANCH_GT: &str = "BGT";
pub const BRANCH_GE: &str = "BGE";
pub const BRANCH_MNEMONICS: [&str; 6] = [
    BRANCH_LT, BRANCH_LE, BRANCH_EQ, BRANCH_NE, BRANCH_GT, BRANCH_GE,
];

/// Arithmetic operator characters handled by the ALU.
pub const ALU_OPERATORS: [char; 4] = ['+', '-', '*', '/'];

/// Delimiters that end a token without becoming one themselves.
const IGNORE_DELIMS: [char; 2] = [',', ' '];

/// Lexer result type
pub type Result<T> = std::result::Result<T, Error>;

/// Ways a source line can violate the instruction constraints. The program
/// store attaches the line number and text when it surfaces these.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// More than one `M[...]` access in a single instruction.
    #[error("multiple memory accesses in one instruction")]
    MultipleMemoryAccesses,

    /// More than one arithmetic operator in a single instruction.
    #[error("multiple arithmetic operators in one instruction")]
    MultipleOperators,

    /// An arithmetic operator combined with a load or store. Arithmetic is
    /// only allowed inside the address expression of the memory access.
    #[error("arithmetic operation combined with a memory access")]
    AluWithMemoryAccess,

    /// The instruction starts with a digit, which would shadow numeric
    /// literals.
    #[error("instruction starts with a digit")]
    LeadingDigit,
}

/// `-` directly before a digit is a unary sign glued to the literal, not a
/// subtraction operator.
fn is_unary_minus(c: char, next: Option<&char>) -> bool {
    c == '-' && next.is_some_and(|d| d.is_ascii_digit())
}

fn is_significant_delim(c: char) -> bool {
    ALU_OPERATORS.contains(&c) || c == '='
}

/// Splits one comment-stripped line into its lexical components.
///
/// Ignorable delimiters (comma, space) end the current token; the operator
/// characters `+ - * / =` end it and become single-character tokens of their
/// own, except for a unary minus glued to a numeric literal. Once the scan
/// reaches the start of a `M[` memory access, everything up to the closing
/// bracket stays in one token so the address expression can be re-tokenized
/// on demand; runs of ignorable delimiters inside the brackets collapse to a
/// single character.
///
/// ```
/// let tokens = asmvm::lexer::tokenize("R1 = R2 + -10");
/// assert_eq!(tokens, ["R1", "=", "R2", "+", "-10"]);
/// ```
pub fn tokenize(line: &str) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    let mut tokens = Vec::new();
    let mut component = String::new();
    let mut open = false;

    for i in 0..chars.len() {
        let c = chars[i];
        if line_starts_with(&chars[i..], MEM_ACCESS_PREFIX) {
            open = true;
        }

        if IGNORE_DELIMS.contains(&c) && !open {
            if !component.is_empty() {
                tokens.push(std::mem::take(&mut component));
            }
        } else if IGNORE_DELIMS.contains(&c) {
            if component.chars().last() != Some(c) {
                component.push(c);
            }
        } else if is_significant_delim(c) && !is_unary_minus(c, chars.get(i + 1)) && !open {
            if !component.is_empty() {
                tokens.push(std::mem::take(&mut component));
            }
            tokens.push(c.to_string());
        } else if i == chars.len() - 1 {
            component.push(c);
            tokens.push(std::mem::take(&mut component));
        } else {
            component.push(c);
        }

        if c == MEM_ACCESS_CLOSE {
            open = false;
        }
    }

    tokens
}

fn line_starts_with(chars: &[char], prefix: &str) -> bool {
    chars.len() >= prefix.chars().count() && chars.iter().zip(prefix.chars()).all(|(&a, b)| a == b)
}

/// Accepts or rejects one comment-stripped line before it is tokenized and
/// stored.
///
/// Combining two memory accesses, two arithmetic operations, or an
/// arithmetic operation with a load/store in a single instruction is
/// illegal; an operator is only tolerated next to a memory access when its
/// first occurrence falls inside the address brackets (`M[R1 + 3] = R2` is
/// legal, `M[R1] = R2 + 3` is not). A line whose first non-space character
/// is a digit is rejected so labels cannot look numeric.
pub fn check_instruction(line: &str) -> Result<()> {
    if let Some(first) = line.find(MEM_ACCESS_PREFIX) {
        if line[first + MEM_ACCESS_PREFIX.len()..].contains(MEM_ACCESS_PREFIX) {
            return Err(Error::MultipleMemoryAccesses);
        }
    }

    let chars: Vec<char> = line.chars().collect();
    let num_operators = (0..chars.len())
        .filter(|&i| {
            ALU_OPERATORS.contains(&chars[i]) && !is_unary_minus(chars[i], chars.get(i + 1))
        })
        .count();

    if num_operators > 1 {
        return Err(Error::MultipleOperators);
    }

    if num_operators == 1 && line.contains(MEM_ACCESS_PREFIX) {
        // Only the first occurrence of each operator character is tested,
        // preserving the lenient behavior of text search over the raw line.
        let open = line.find(MEM_ACCESS_OPEN).unwrap_or(usize::MAX);
        let close = line.find(MEM_ACCESS_CLOSE).unwrap_or(usize::MAX);
        let inside = ALU_OPERATORS
            .iter()
            .filter_map(|&op| line.find(op))
            .any(|pos| open < pos && pos < close);

        if !inside {
            return Err(Error::AluWithMemoryAccess);
        }
    }

    if let Some(first) = line.trim_start().chars().next() {
        if first.is_ascii_digit() {
            return Err(Error::LeadingDigit);
        }
    }

    Ok(())
}
