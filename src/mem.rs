//! Register file and sparse byte-addressable address space.

use std::collections::BTreeMap;

use crate::lexer::STACK_POINTER;

/// Initial stack-pointer value: the stack is empty and grows downward from
/// here. Also the exclusive upper bound of valid addresses.
pub const STACK_POINTER_INIT: i32 = i32::MAX - 3;

/// Width in bytes of a register value and of an address-space word.
pub const WORD_SIZE: usize = 4;

/// Memory result type
pub type Result<T> = std::result::Result<T, Error>;

/// Possible memory errors
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The register was never written.
    #[error("register \"{0}\" doesn't exist")]
    UndefinedRegister(String),

    /// The address falls outside `(0, STACK_POINTER_INIT)`.
    #[error("address {0} is out of range")]
    AddressOutOfRange(i32),

    /// The address was never written.
    #[error("address {0} isn't initialized")]
    UninitializedAddress(i32),
}

/// Named registers plus a sparse byte-indexed address space.
///
/// Registers are created lazily on first write; reading an unwritten one is
/// an error. The address space stores individual bytes; multi-byte values
/// are assembled and split little-endian, matching the native layout of
/// `i32`. Only the stack pointer starts initialized, at
/// [`STACK_POINTER_INIT`].
#[derive(Debug, Clone)]
pub struct Memory {
    registers: BTreeMap<String, i32>,
    address_space: BTreeMap<i32, u8>,
}

impl Default for Memory {
    fn default() -> Self {
        let mut registers = BTreeMap::new();
        registers.insert(STACK_POINTER.to_string(), STACK_POINTER_INIT);
        Self {
            registers,
            address_space: BTreeMap::new(),
        }
    }
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns `value` to the register, creating it if absent.
    pub fn set_register(&mut self, register: &str, value: i32) {
        self.registers.insert(register.to_string(), value);
    }

    /// The current value of the register.
    pub fn register(&self, register: &str) -> Result<i32> {
        self.registers
            .get(register)
            .copied()
            .ok_or_else(|| Error::UndefinedRegister(register.to_string()))
    }

    /// Assembles `byte_count` (1, 2 or 4) consecutive bytes starting at
    /// `address` into a signed integer, little-endian. Missing high bytes of
    /// the word are zero. Every byte read must be in range and previously
    /// written.
    pub fn read(&self, address: i32, byte_count: usize) -> Result<i32> {
        let mut word = [0u8; WORD_SIZE];
        for (i, slot) in word.iter_mut().enumerate().take(byte_count) {
            let addr = checked_address(address, i)?;
            *slot = *self
                .address_space
                .get(&addr)
                .ok_or(Error::UninitializedAddress(addr))?;
        }

        Ok(i32::from_le_bytes(word))
    }

    /// Writes the low `byte_count` bytes of `value` to consecutive addresses
    /// starting at `address`, little-endian. Bounds are enforced per byte;
    /// prior initialization is not required.
    pub fn write(&mut self, value: i32, address: i32, byte_count: usize) -> Result<()> {
        let word = value.to_le_bytes();
        for (i, &byte) in word.iter().enumerate().take(byte_count) {
            let addr = checked_address(address, i)?;
            self.address_space.insert(addr, byte);
        }

        Ok(())
    }
}

/// Bounds check for the `i`th byte of an access based at `address`. The base
/// must be positive and every touched byte must stay below the stack
/// sentinel.
fn checked_address(address: i32, i: usize) -> Result<i32> {
    let addr = address as i64 + i as i64;
    if address <= 0 || addr >= STACK_POINTER_INIT as i64 {
        return Err(Error::AddressOutOfRange(address));
    }

    Ok(addr as i32)
}
