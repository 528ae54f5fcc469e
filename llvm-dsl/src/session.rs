//! The per-thread building state.
//!
//! A [Session] owns an LLVM [Context], the single [Builder] through which
//! every instruction is emitted, and the stack of [Frame]s that [Scope]s push
//! and pop. The free functions of this crate always act on
//! [`Session::current`]; code that wants to be explicit about which context
//! it builds in creates its own session and [installs](Session::install) it.
//!
//! Contexts are leaked: every handle this crate returns carries the
//! `'static` lifetime of the context that created it, and a context must
//! outlive all of its modules, types and values.

use std::cell::{Cell, OnceCell, RefCell};
use std::collections::HashMap;
use std::rc::Weak;

use indexmap::IndexMap;
use inkwell::OptimizationLevel;
use inkwell::basic_block::BasicBlock;
use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::targets::{
    CodeModel, InitializationConfig, RelocMode, Target, TargetData, TargetMachine,
};
use inkwell::types::{AsTypeRef, BasicTypeEnum};
use inkwell::values::{
    AnyValue, AsValueRef, BasicValue, BasicValueEnum, FunctionValue, InstructionValue,
    PointerValue,
};
use tracing::trace;

use crate::module::Module;
use crate::reference::Ref;
use crate::scope::Scope;
use crate::symbols::SymbolName;
use crate::types::Type;
use crate::{Error, Result};

thread_local! {
    static CURRENT: Cell<Option<&'static Session>> = const { Cell::new(None) };
}

/// One entry of the insertion-context stack.
pub(crate) struct Frame {
    pub(crate) module: Option<Module>,
    pub(crate) function: Option<FunctionValue<'static>>,
    pub(crate) block: Option<BasicBlock<'static>>,
    pub(crate) symbols: IndexMap<String, Ref>,
    /// Set on the frame that opened a function body. Local lookup stops here.
    pub(crate) root: bool,
}

impl Frame {
    pub(crate) fn module(module: Module) -> Self {
        Self {
            module: Some(module),
            function: None,
            block: None,
            symbols: IndexMap::new(),
            root: false,
        }
    }

    pub(crate) fn block(block: BasicBlock<'static>) -> Self {
        Self {
            module: None,
            function: block.get_parent(),
            block: Some(block),
            symbols: IndexMap::new(),
            root: false,
        }
    }

    pub(crate) fn function(function: FunctionValue<'static>, entry: BasicBlock<'static>) -> Self {
        Self {
            module: None,
            function: Some(function),
            block: Some(entry),
            symbols: IndexMap::new(),
            root: true,
        }
    }
}

/// The blocks targeted by `break_` and `continue_` inside a loop or switch.
#[derive(Clone, Copy, Debug)]
pub(crate) struct LoopTargets {
    pub(crate) function: FunctionValue<'static>,
    pub(crate) break_to: BasicBlock<'static>,
    pub(crate) continue_to: Option<BasicBlock<'static>>,
}

/// A handle that remembers a block and must forget it when the block is
/// deleted.
pub(crate) trait BlockOwner {
    /// Called before the owned block is deleted.
    fn release(&self);
}

struct Checkpoint {
    block: Option<BasicBlock<'static>>,
    mark: Option<InstructionValue<'static>>,
    blocks: Vec<BasicBlock<'static>>,
}

#[derive(Default)]
struct State {
    frames: Vec<Frame>,
    loops: Vec<LoopTargets>,
    block_owners: HashMap<usize, Vec<Weak<dyn BlockOwner>>>,
    member_names: HashMap<usize, Vec<String>>,
    struct_masks: HashMap<usize, u64>,
    parameter_names: HashMap<usize, Vec<String>>,
    signatures: HashMap<usize, Type>,
}

/// The host's target triple and data layout.
pub(crate) struct NativeLayout {
    pub(crate) triple: String,
    pub(crate) data: TargetData,
}

/// Building state for one thread: context, builder and scope stack.
pub struct Session {
    context: &'static Context,
    builder: Builder<'static>,
    state: RefCell<State>,
    native: OnceCell<Result<NativeLayout>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("frames", &self.state.borrow().frames.len())
            .finish_non_exhaustive()
    }
}

/// Restores the previously current session when dropped.
#[must_use = "the session is uninstalled when the guard is dropped"]
#[derive(Debug)]
pub struct SessionGuard {
    previous: Option<&'static Session>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        CURRENT.with(|c| c.set(self.previous));
    }
}

impl Session {
    /// Creates a fresh session with its own LLVM context.
    ///
    /// The session is not current until it is [installed](Session::install).
    #[must_use]
    pub fn new() -> &'static Session {
        let context: &'static Context = Box::leak(Box::new(Context::create()));
        Box::leak(Box::new(Session {
            context,
            builder: context.create_builder(),
            state: RefCell::default(),
            native: OnceCell::new(),
        }))
    }

    /// Returns the session of this thread, creating one on first use.
    pub fn current() -> &'static Session {
        CURRENT.with(|c| match c.get() {
            Some(s) => s,
            None => {
                let s = Session::new();
                c.set(Some(s));
                s
            }
        })
    }

    /// Makes this session current for the thread until the guard drops.
    pub fn install(&'static self) -> SessionGuard {
        let previous = CURRENT.with(|c| c.replace(Some(self)));
        SessionGuard { previous }
    }

    /// Runs `f` with this session current.
    pub fn enter<T>(&'static self, f: impl FnOnce() -> T) -> T {
        let _guard = self.install();
        f()
    }

    /// Returns the LLVM context that owns every handle built in this session.
    pub fn context(&self) -> &'static Context {
        self.context
    }

    pub(crate) fn builder(&self) -> &Builder<'static> {
        &self.builder
    }

    pub(crate) fn native(&self) -> Result<&NativeLayout> {
        self.native
            .get_or_init(native_layout)
            .as_ref()
            .map_err(Clone::clone)
    }

    // ----- frames -----

    pub(crate) fn push_frame(&'static self, frame: Frame) -> Scope {
        let mut state = self.state.borrow_mut();
        let depth = state.frames.len();
        if let Some(block) = frame.block {
            self.builder.position_at_end(block);
        }
        state.frames.push(frame);
        Scope::new(self, depth)
    }

    pub(crate) fn truncate(&self, depth: usize) {
        let mut state = self.state.borrow_mut();
        state.frames.truncate(depth);
        match state.frames.iter().rev().find_map(|f| f.block) {
            Some(block) => self.builder.position_at_end(block),
            None => self.builder.clear_insertion_position(),
        }
    }

    pub(crate) fn current_module(&self) -> Option<Module> {
        let state = self.state.borrow();
        state.frames.iter().rev().find_map(|f| f.module.clone())
    }

    pub(crate) fn current_function(&self) -> Option<FunctionValue<'static>> {
        let state = self.state.borrow();
        state.frames.iter().rev().find_map(|f| f.function)
    }

    pub(crate) fn current_block(&self) -> Option<BasicBlock<'static>> {
        let state = self.state.borrow();
        state.frames.iter().rev().find_map(|f| f.block)
    }

    pub(crate) fn module(&self) -> Result<Module> {
        self.current_module().ok_or(Error::NoScope("module"))
    }

    pub(crate) fn function(&self) -> Result<FunctionValue<'static>> {
        self.current_function().ok_or(Error::NoScope("function"))
    }

    /// Moves the insertion point of the innermost frame that has one.
    pub(crate) fn set_block(&self, block: BasicBlock<'static>) {
        let mut state = self.state.borrow_mut();
        if let Some(frame) = state.frames.iter_mut().rev().find(|f| f.block.is_some()) {
            frame.block = Some(block);
        }
        self.builder.position_at_end(block);
    }

    /// Returns the builder positioned at the end of the current block.
    ///
    /// Fails if there is no current block or if it is already terminated.
    pub(crate) fn emitter(&self) -> Result<&Builder<'static>> {
        let block = self.current_block().ok_or(Error::NoScope("basic block"))?;
        if block.get_terminator().is_some() {
            return Err(Error::BlockAlreadyTerminated(
                block.get_name().to_string_lossy().into_owned(),
            ));
        }
        self.builder.position_at_end(block);
        Ok(&self.builder)
    }

    /// Runs `f`, undoing everything it emitted into the current function if
    /// it fails: instructions appended to the current block are erased and
    /// blocks created since are deleted.
    pub(crate) fn atomically<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let checkpoint = self.checkpoint();
        let result = f();
        if let Err(e) = &result {
            self.rollback(&checkpoint, e);
        }
        result
    }

    fn checkpoint(&self) -> Checkpoint {
        let block = self.current_block();
        Checkpoint {
            block,
            mark: block.and_then(|b| b.get_last_instruction()),
            blocks: block
                .and_then(|b| b.get_parent())
                .map(|f| f.get_basic_blocks())
                .unwrap_or_default(),
        }
    }

    fn rollback(&self, checkpoint: &Checkpoint, error: &Error) {
        let Some(origin) = checkpoint.block else {
            return;
        };
        let created: Vec<_> = origin
            .get_parent()
            .map(|f| f.get_basic_blocks())
            .unwrap_or_default()
            .into_iter()
            .filter(|b| !checkpoint.blocks.contains(b))
            .collect();
        let mut erased = 0;
        while let Some(last) = origin.get_last_instruction() {
            if Some(last) == checkpoint.mark {
                break;
            }
            last.erase_from_basic_block();
            erased += 1;
        }
        erased += self.delete_blocks(&created);
        if self.current_block().is_some() {
            self.set_block(origin);
        }
        if erased > 0 || !created.is_empty() {
            trace!(erased, blocks = created.len(), %error, "rolled back");
        }
    }

    /// Remembers that `owner` refers to `block`, so that deleting the block
    /// releases it.
    pub(crate) fn register_block_owner(&self, block: BasicBlock<'static>, owner: Weak<dyn BlockOwner>) {
        let key = block.as_mut_ptr() as usize;
        let mut state = self.state.borrow_mut();
        let owners = state.block_owners.entry(key).or_default();
        owners.retain(|o| o.strong_count() > 0);
        owners.push(owner);
    }

    /// Releases the owners of `blocks`, which are about to be deleted.
    pub(crate) fn release_blocks(&self, blocks: &[BasicBlock<'static>]) {
        let owners: Vec<_> = {
            let mut state = self.state.borrow_mut();
            blocks
                .iter()
                .filter_map(|b| state.block_owners.remove(&(b.as_mut_ptr() as usize)))
                .flatten()
                .collect()
        };
        for owner in owners.iter().filter_map(Weak::upgrade) {
            owner.release();
        }
    }

    /// Empties and deletes `blocks`, releasing their owners first. Returns
    /// the number of instructions erased.
    pub(crate) fn delete_blocks(&self, blocks: &[BasicBlock<'static>]) -> usize {
        self.release_blocks(blocks);
        let mut erased = 0;
        for block in blocks.iter().rev() {
            while let Some(last) = block.get_last_instruction() {
                last.erase_from_basic_block();
                erased += 1;
            }
        }
        for block in blocks.iter().rev() {
            // SAFETY: the block is empty and its owners have forgotten it.
            let _ = unsafe { block.delete() };
        }
        erased
    }

    /// Fails if `value` is an instruction of a function other than the
    /// current one.
    pub(crate) fn check_local(&self, value: BasicValueEnum<'static>) -> Result<()> {
        let Some(inst) = value.as_instruction_value() else {
            return Ok(());
        };
        let owner = inst.get_parent().and_then(|b| b.get_parent());
        if owner.is_some() && owner != self.current_function() {
            return Err(Error::ForeignValue(
                inst.print_to_string().to_string().trim().to_owned(),
            ));
        }
        Ok(())
    }

    /// Allocates a stack slot in the prologue block of the current function.
    pub(crate) fn build_alloca(
        &self,
        ty: BasicTypeEnum<'static>,
        name: &str,
    ) -> Result<PointerValue<'static>> {
        let function = self.function()?;
        let prologue = function
            .get_first_basic_block()
            .ok_or(Error::NoScope("function body"))?;
        match prologue.get_terminator() {
            Some(term) => self.builder.position_before(&term),
            None => self.builder.position_at_end(prologue),
        }
        let slot = self.builder.build_alloca(ty, name);
        if let Some(block) = self.current_block() {
            self.builder.position_at_end(block);
        }
        Ok(slot?)
    }

    // ----- symbols -----

    /// Registers a local in the innermost frame and returns its effective name.
    pub(crate) fn declare_local(&self, name: &SymbolName, slot: Ref) -> Result<String> {
        let mut state = self.state.borrow_mut();
        let frame = state
            .frames
            .last_mut()
            .ok_or(Error::NoScope("function"))?;
        let effective = name.resolve(|candidate| frame.symbols.contains_key(candidate))?;
        trace!(name = %effective, "declared local");
        frame.symbols.insert(effective.clone(), slot);
        Ok(effective)
    }

    /// Looks `name` up in the frames of the current function, innermost first.
    pub(crate) fn lookup_local(&self, name: &str) -> Option<Ref> {
        let state = self.state.borrow();
        for frame in state.frames.iter().rev() {
            if let Some(r) = frame.symbols.get(name) {
                return Some(r.clone());
            }
            if frame.root {
                break;
            }
        }
        None
    }

    /// Names of the locals visible in the current function, outermost first.
    pub(crate) fn local_names(&self) -> Vec<String> {
        let state = self.state.borrow();
        let start = state
            .frames
            .iter()
            .rposition(|f| f.root)
            .unwrap_or(state.frames.len());
        state.frames[start..]
            .iter()
            .flat_map(|f| f.symbols.keys().cloned())
            .collect()
    }

    // ----- loops -----

    pub(crate) fn push_loop(&self, targets: LoopTargets) -> usize {
        let mut state = self.state.borrow_mut();
        state.loops.push(targets);
        state.loops.len() - 1
    }

    pub(crate) fn pop_loop(&self, depth: usize) {
        self.state.borrow_mut().loops.truncate(depth);
    }

    /// The innermost loop of the current function, or the innermost one
    /// accepting `continue_` when `need_continue` is set.
    pub(crate) fn innermost_loop(&self, need_continue: bool) -> Result<LoopTargets> {
        let function = self.function()?;
        let state = self.state.borrow();
        state
            .loops
            .iter()
            .rev()
            .take_while(|l| l.function == function)
            .find(|l| !need_continue || l.continue_to.is_some())
            .copied()
            .ok_or_else(|| {
                Error::bad_flow(if need_continue {
                    "continue_ outside of a loop"
                } else {
                    "break_ outside of a loop or switch"
                })
            })
    }

    // ----- side metadata -----

    pub(crate) fn set_member_names(&self, ty: &impl AsTypeRef, names: Vec<String>) {
        let key = ty.as_type_ref() as usize;
        self.state.borrow_mut().member_names.insert(key, names);
    }

    pub(crate) fn member_names(&self, ty: &impl AsTypeRef) -> Option<Vec<String>> {
        let key = ty.as_type_ref() as usize;
        self.state.borrow().member_names.get(&key).cloned()
    }

    pub(crate) fn set_struct_mask(&self, ty: &impl AsTypeRef, mask: u64) {
        let key = ty.as_type_ref() as usize;
        self.state.borrow_mut().struct_masks.insert(key, mask);
    }

    pub(crate) fn struct_mask(&self, ty: &impl AsTypeRef) -> Option<u64> {
        let key = ty.as_type_ref() as usize;
        self.state.borrow().struct_masks.get(&key).copied()
    }

    pub(crate) fn set_parameter_names(&self, function: FunctionValue<'static>, names: Vec<String>) {
        let key = function.as_value_ref() as usize;
        self.state.borrow_mut().parameter_names.insert(key, names);
    }

    pub(crate) fn parameter_names(&self, function: FunctionValue<'static>) -> Vec<String> {
        let key = function.as_value_ref() as usize;
        let state = self.state.borrow();
        state.parameter_names.get(&key).cloned().unwrap_or_default()
    }

    /// Remembers the signed view of a function's type.
    pub(crate) fn set_signature(&self, function: FunctionValue<'static>, ty: Type) {
        let key = function.as_value_ref() as usize;
        self.state.borrow_mut().signatures.insert(key, ty);
    }

    pub(crate) fn signature(&self, function: FunctionValue<'static>) -> Option<Type> {
        let key = function.as_value_ref() as usize;
        self.state.borrow().signatures.get(&key).copied()
    }
}

fn native_layout() -> Result<NativeLayout> {
    Target::initialize_native(&InitializationConfig::default()).map_err(Error::Llvm)?;
    let triple = TargetMachine::get_default_triple();
    let target = Target::from_triple(&triple)?;
    let machine = target
        .create_target_machine(
            &triple,
            &TargetMachine::get_host_cpu_name().to_string(),
            &TargetMachine::get_host_cpu_features().to_string(),
            OptimizationLevel::Default,
            RelocMode::Default,
            CodeModel::Default,
        )
        .ok_or_else(|| Error::Llvm(format!("no target machine for {triple:?}")))?;
    Ok(NativeLayout {
        triple: triple.as_str().to_string_lossy().into_owned(),
        data: machine.get_target_data(),
    })
}

#[cfg(test)]
mod test {
    use cool_asserts::assert_matches;

    use super::*;

    #[test]
    fn installed_session_is_current() {
        let outer = Session::current();
        let inner = Session::new();
        {
            let _guard = inner.install();
            assert!(std::ptr::eq(Session::current(), inner));
        }
        assert!(std::ptr::eq(Session::current(), outer));
        let seen = inner.enter(Session::current);
        assert!(std::ptr::eq(seen, inner));
    }

    #[test]
    fn emitter_needs_a_block() {
        let session = Session::new();
        let _guard = session.install();
        assert_matches!(session.emitter(), Err(Error::NoScope("basic block")));
        assert!(session.current_module().is_none());
    }
}
