//! Lowering of code bodies into interpreter operations.
//!
//! Bodies are decoded once when the module engine is created. Immediates are
//! LEB128 encoded; local and call indices are range checked here so the
//! execution loop does not have to.

use thiserror::Error;

use crate::module::{Code, Index};

/// Why a code body could not be lowered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub(super) enum CompileError {
    #[error("body is not terminated by end")]
    MissingEnd,

    #[error("unexpected end at offset {offset}")]
    TrailingBytes { offset: usize },

    #[error("unexpected end of body at offset {offset}")]
    UnexpectedEof { offset: usize },

    #[error("call target {index} out of range (len={len}) at offset {offset}")]
    CallOutOfRange { index: u32, len: usize, offset: usize },

    #[error("local {index} out of range (len={len}) at offset {offset}")]
    LocalOutOfRange { index: u32, len: usize, offset: usize },

    #[error("memory index must be zero at offset {offset}")]
    MemoryIndex { offset: usize },

    #[error("i32.const out of range at offset {offset}")]
    ConstOutOfRange { offset: usize },

    #[error("malformed LEB128 at offset {offset}")]
    Leb128 { offset: usize },

    #[error("unsupported opcode {opcode:#04x} at offset {offset}")]
    UnsupportedOpcode { opcode: u8, offset: usize },
}

/// One decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Op {
    Unreachable,
    Nop,
    Return,
    Call(Index),
    Drop,
    LocalGet(u32),
    LocalSet(u32),
    LocalTee(u32),
    I32Load(u32),
    I64Load(u32),
    I32Store(u32),
    I64Store(u32),
    MemorySize,
    MemoryGrow,
    I32Const(i32),
    I64Const(i64),
    I32Eqz,
    I32Add,
    I32Sub,
    I32Mul,
    I32DivU,
    I64Add,
    I64Sub,
    I64Mul,
}

mod opcode {
    pub const UNREACHABLE: u8 = 0x00;
    pub const NOP: u8 = 0x01;
    pub const END: u8 = 0x0b;
    pub const RETURN: u8 = 0x0f;
    pub const CALL: u8 = 0x10;
    pub const DROP: u8 = 0x1a;
    pub const LOCAL_GET: u8 = 0x20;
    pub const LOCAL_SET: u8 = 0x21;
    pub const LOCAL_TEE: u8 = 0x22;
    pub const I32_LOAD: u8 = 0x28;
    pub const I64_LOAD: u8 = 0x29;
    pub const I32_STORE: u8 = 0x36;
    pub const I64_STORE: u8 = 0x37;
    pub const MEMORY_SIZE: u8 = 0x3f;
    pub const MEMORY_GROW: u8 = 0x40;
    pub const I32_CONST: u8 = 0x41;
    pub const I64_CONST: u8 = 0x42;
    pub const I32_EQZ: u8 = 0x45;
    pub const I32_ADD: u8 = 0x6a;
    pub const I32_SUB: u8 = 0x6b;
    pub const I32_MUL: u8 = 0x6c;
    pub const I32_DIV_U: u8 = 0x6e;
    pub const I64_ADD: u8 = 0x7c;
    pub const I64_SUB: u8 = 0x7d;
    pub const I64_MUL: u8 = 0x7e;
}

/// Decode `code` into operations.
///
/// * `local_count` - parameters plus declared locals.
/// * `function_count` - size of the module's function index space.
///
/// The body must end with a single trailing `end`.
pub(super) fn compile(
    code: &Code,
    local_count: usize,
    function_count: usize,
) -> Result<Vec<Op>, CompileError> {
    let mut reader = Reader::new(&code.body);
    let mut ops = Vec::with_capacity(code.body.len());

    loop {
        let at = reader.offset();
        let byte = reader
            .u8()
            .map_err(|_| CompileError::MissingEnd)?;

        let op = match byte {
            opcode::END => {
                if !reader.is_eof() {
                    return Err(CompileError::TrailingBytes { offset: at });
                }
                return Ok(ops);
            }
            opcode::UNREACHABLE => Op::Unreachable,
            opcode::NOP => Op::Nop,
            opcode::RETURN => Op::Return,
            opcode::CALL => {
                let index = reader.uleb_u32()?;
                if index as usize >= function_count {
                    return Err(CompileError::CallOutOfRange {
                        index,
                        len: function_count,
                        offset: at,
                    });
                }
                Op::Call(index)
            }
            opcode::DROP => Op::Drop,
            opcode::LOCAL_GET | opcode::LOCAL_SET | opcode::LOCAL_TEE => {
                let index = reader.uleb_u32()?;
                if index as usize >= local_count {
                    return Err(CompileError::LocalOutOfRange {
                        index,
                        len: local_count,
                        offset: at,
                    });
                }
                match byte {
                    opcode::LOCAL_GET => Op::LocalGet(index),
                    opcode::LOCAL_SET => Op::LocalSet(index),
                    _ => Op::LocalTee(index),
                }
            }
            opcode::I32_LOAD | opcode::I64_LOAD | opcode::I32_STORE | opcode::I64_STORE => {
                let _align = reader.uleb_u32()?;
                let offset = reader.uleb_u32()?;
                match byte {
                    opcode::I32_LOAD => Op::I32Load(offset),
                    opcode::I64_LOAD => Op::I64Load(offset),
                    opcode::I32_STORE => Op::I32Store(offset),
                    _ => Op::I64Store(offset),
                }
            }
            opcode::MEMORY_SIZE | opcode::MEMORY_GROW => {
                // Reserved memory index byte.
                if reader.u8()? != 0 {
                    return Err(CompileError::MemoryIndex { offset: at });
                }
                if byte == opcode::MEMORY_SIZE {
                    Op::MemorySize
                } else {
                    Op::MemoryGrow
                }
            }
            opcode::I32_CONST => {
                let value = i32::try_from(reader.sleb(32)?)
                    .map_err(|_| CompileError::ConstOutOfRange { offset: at })?;
                Op::I32Const(value)
            }
            opcode::I64_CONST => Op::I64Const(reader.sleb(64)?),
            opcode::I32_EQZ => Op::I32Eqz,
            opcode::I32_ADD => Op::I32Add,
            opcode::I32_SUB => Op::I32Sub,
            opcode::I32_MUL => Op::I32Mul,
            opcode::I32_DIV_U => Op::I32DivU,
            opcode::I64_ADD => Op::I64Add,
            opcode::I64_SUB => Op::I64Sub,
            opcode::I64_MUL => Op::I64Mul,
            other => {
                return Err(CompileError::UnsupportedOpcode {
                    opcode: other,
                    offset: at,
                });
            }
        };
        ops.push(op);
    }
}

/// Cursor over a code body.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn offset(&self) -> usize {
        self.pos
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn u8(&mut self) -> Result<u8, CompileError> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or(CompileError::UnexpectedEof { offset: self.pos })?;
        self.pos += 1;
        Ok(byte)
    }

    /// Unsigned LEB128, at most 5 bytes.
    fn uleb_u32(&mut self) -> Result<u32, CompileError> {
        let mut result: u64 = 0;
        let mut shift = 0u32;
        for _ in 0..5 {
            let byte = self.u8()?;
            result |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return u32::try_from(result)
                    .map_err(|_| CompileError::Leb128 { offset: self.pos });
            }
            shift += 7;
        }
        Err(CompileError::Leb128 { offset: self.pos })
    }

    /// Signed LEB128 of `bits` width, sign extended to i64.
    fn sleb(&mut self, bits: u32) -> Result<i64, CompileError> {
        let max_bytes = bits.div_ceil(7);
        let mut result: i64 = 0;
        let mut shift = 0u32;
        for _ in 0..max_bytes {
            let byte = self.u8()?;
            result |= i64::from(byte & 0x7f) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    result |= -1i64 << shift;
                }
                return Ok(result);
            }
        }
        Err(CompileError::Leb128 { offset: self.pos })
    }
}
