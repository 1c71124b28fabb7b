//! Execution loop.
//!
//! Wasm calls push a frame onto a heap-allocated call stack rather than the
//! native one. Guest call depth is bounded by `max_call_depth` alone.

use std::mem;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use wasmrt_common::{HostFunctionError, RuntimeError, TrapCode};

use crate::engine::CallContext;
use crate::memory::MemoryInstance;

use super::compile::Op;
use super::{Body, CompiledFunction, CompiledModule};

pub(super) struct Executor {
    max_call_depth: u32,
}

/// Outcome of entering a function.
enum Entry {
    /// Host function results.
    Returned(Vec<u64>),
    /// Wasm function ready to run.
    Frame(Frame),
}

/// Why a frame stopped running.
enum Control {
    Return,
    Call(Arc<CompiledFunction>, Vec<u64>),
}

impl Executor {
    pub(super) fn new(max_call_depth: u32) -> Self {
        Self { max_call_depth }
    }

    /// Run `function` with `params`. `ctx` belongs to the caller.
    pub(super) fn invoke(
        &self,
        ctx: &CallContext,
        function: &Arc<CompiledFunction>,
        params: &[u64],
    ) -> Result<Vec<u64>, RuntimeError> {
        let mut current = match self.enter(ctx, function, params, 0)? {
            Entry::Returned(results) => return Ok(results),
            Entry::Frame(frame) => frame,
        };
        let mut callers: Vec<Frame> = Vec::new();

        loop {
            match current.run()? {
                Control::Return => {
                    let results = current.results()?;
                    match callers.pop() {
                        Some(caller) => {
                            current = caller;
                            current.stack.extend(results);
                        }
                        None => return Ok(results),
                    }
                }
                Control::Call(callee, args) => {
                    let depth = u32::try_from(callers.len() + 1).unwrap_or(u32::MAX);
                    match self.enter(&current.ctx, &callee, &args, depth)? {
                        Entry::Returned(results) => current.stack.extend(results),
                        Entry::Frame(frame) => callers.push(mem::replace(&mut current, frame)),
                    }
                }
            }
        }
    }

    /// Check the call may proceed, then run a host function or set up the
    /// frame of a wasm function at `depth`.
    fn enter(
        &self,
        ctx: &CallContext,
        function: &Arc<CompiledFunction>,
        params: &[u64],
        depth: u32,
    ) -> Result<Entry, RuntimeError> {
        let source = &function.source;
        ctx.check(&source.debug_name())?;
        if depth >= self.max_call_depth {
            return Err(RuntimeError::trap(
                source.debug_name(),
                TrapCode::CallStackExhausted,
            ));
        }

        let owner = function
            .owner
            .upgrade()
            .filter(|m| !m.closed.load(Ordering::Acquire))
            .ok_or_else(|| RuntimeError::ModuleReleased {
                name: source.module_name().to_string(),
            })?;

        match &function.body {
            Body::Host(func) => {
                let results = func(ctx, params)?;
                if results.len() != source.ty().results.len() {
                    return Err(HostFunctionError::InvalidArgument {
                        reason: format!(
                            "{} returned {} results, expected {}",
                            source.debug_name(),
                            results.len(),
                            source.ty().results.len()
                        ),
                    }
                    .into());
                }
                Ok(Entry::Returned(results))
            }
            Body::Wasm { local_count, .. } => {
                let instance = source.module().ok_or_else(|| RuntimeError::ModuleReleased {
                    name: source.module_name().to_string(),
                })?;
                let ctx = if Arc::ptr_eq(ctx.module(), &instance) {
                    ctx.clone()
                } else {
                    ctx.for_module(instance)
                };

                let mut locals = params.to_vec();
                locals.resize(*local_count, 0);
                Ok(Entry::Frame(Frame {
                    function: Arc::clone(function),
                    owner,
                    memory: ctx.memory(),
                    ctx,
                    pc: 0,
                    locals,
                    stack: Vec::new(),
                }))
            }
        }
    }
}

/// Activation of a wasm function.
struct Frame {
    function: Arc<CompiledFunction>,
    owner: Arc<CompiledModule>,
    ctx: CallContext,
    memory: Option<Arc<MemoryInstance>>,
    pc: usize,
    locals: Vec<u64>,
    stack: Vec<u64>,
}

impl Frame {
    fn trap(&self, code: TrapCode) -> RuntimeError {
        RuntimeError::trap(self.function.source.debug_name(), code)
    }

    /// Execute from the current position until the function calls another
    /// or returns.
    fn run(&mut self) -> Result<Control, RuntimeError> {
        let function = Arc::clone(&self.function);
        let ops: &[Op] = match &function.body {
            Body::Wasm { ops, .. } => ops,
            Body::Host(_) => &[],
        };

        while let Some(&op) = ops.get(self.pc) {
            self.pc += 1;
            if self.ctx.is_cancelled() {
                return Err(self.trap(TrapCode::Cancelled));
            }
            if let Some(control) = self.step(op)? {
                return Ok(control);
            }
        }
        Ok(Control::Return)
    }

    fn pop(&mut self) -> Result<u64, RuntimeError> {
        self.stack
            .pop()
            .ok_or_else(|| self.trap(TrapCode::StackUnderflow))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn pop_i32(&mut self) -> Result<u32, RuntimeError> {
        self.pop().map(|v| v as u32)
    }

    fn push_i32(&mut self, value: u32) {
        self.stack.push(u64::from(value));
    }

    fn memory(&self) -> Result<&MemoryInstance, RuntimeError> {
        self.memory
            .as_deref()
            .ok_or_else(|| self.trap(TrapCode::MemoryOutOfBounds))
    }

    /// Effective address of a load or store.
    fn address(&mut self, offset: u32) -> Result<u32, RuntimeError> {
        let base = self.pop_i32()?;
        base.checked_add(offset)
            .ok_or_else(|| self.trap(TrapCode::MemoryOutOfBounds))
    }

    /// Execute one operation. Returns the control transfer, if any.
    #[allow(clippy::cast_sign_loss)]
    fn step(&mut self, op: Op) -> Result<Option<Control>, RuntimeError> {
        match op {
            Op::Unreachable => return Err(self.trap(TrapCode::Unreachable)),
            Op::Nop => {}
            Op::Return => return Ok(Some(Control::Return)),
            Op::Call(index) => {
                let callee = Arc::clone(&self.owner.functions[index as usize]);
                let arity = callee.source.ty().params.len();
                if self.stack.len() < arity {
                    return Err(self.trap(TrapCode::StackUnderflow));
                }
                let args = self.stack.split_off(self.stack.len() - arity);
                return Ok(Some(Control::Call(callee, args)));
            }
            Op::Drop => {
                self.pop()?;
            }
            Op::LocalGet(i) => self.stack.push(self.locals[i as usize]),
            Op::LocalSet(i) => {
                let value = self.pop()?;
                self.locals[i as usize] = value;
            }
            Op::LocalTee(i) => {
                let value = self.pop()?;
                self.locals[i as usize] = value;
                self.stack.push(value);
            }
            Op::I32Load(offset) => {
                let addr = self.address(offset)?;
                let value = self
                    .memory()?
                    .read_u32(addr)
                    .ok_or_else(|| self.trap(TrapCode::MemoryOutOfBounds))?;
                self.push_i32(value);
            }
            Op::I64Load(offset) => {
                let addr = self.address(offset)?;
                let value = self
                    .memory()?
                    .read_u64(addr)
                    .ok_or_else(|| self.trap(TrapCode::MemoryOutOfBounds))?;
                self.stack.push(value);
            }
            Op::I32Store(offset) => {
                let value = self.pop_i32()?;
                let addr = self.address(offset)?;
                if !self.memory()?.put_u32(addr, value) {
                    return Err(self.trap(TrapCode::MemoryOutOfBounds));
                }
            }
            Op::I64Store(offset) => {
                let value = self.pop()?;
                let addr = self.address(offset)?;
                if !self.memory()?.put_u64(addr, value) {
                    return Err(self.trap(TrapCode::MemoryOutOfBounds));
                }
            }
            Op::MemorySize => {
                let pages = self.memory()?.pages();
                self.push_i32(pages);
            }
            Op::MemoryGrow => {
                let delta = self.pop_i32()?;
                let previous = self.memory()?.grow(delta).unwrap_or(u32::MAX);
                self.push_i32(previous);
            }
            Op::I32Const(v) => self.push_i32(v as u32),
            Op::I64Const(v) => self.stack.push(v as u64),
            Op::I32Eqz => {
                let v = self.pop_i32()?;
                self.push_i32(u32::from(v == 0));
            }
            Op::I32Add | Op::I32Sub | Op::I32Mul | Op::I32DivU => {
                let b = self.pop_i32()?;
                let a = self.pop_i32()?;
                let result = match op {
                    Op::I32Add => a.wrapping_add(b),
                    Op::I32Sub => a.wrapping_sub(b),
                    Op::I32Mul => a.wrapping_mul(b),
                    _ => a
                        .checked_div(b)
                        .ok_or_else(|| self.trap(TrapCode::IntegerDivideByZero))?,
                };
                self.push_i32(result);
            }
            Op::I64Add | Op::I64Sub | Op::I64Mul => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.stack.push(match op {
                    Op::I64Add => a.wrapping_add(b),
                    Op::I64Sub => a.wrapping_sub(b),
                    _ => a.wrapping_mul(b),
                });
            }
        }
        Ok(None)
    }

    fn results(&mut self) -> Result<Vec<u64>, RuntimeError> {
        let count = self.function.source.ty().results.len();
        if self.stack.len() < count {
            return Err(self.trap(TrapCode::StackUnderflow));
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }
}
