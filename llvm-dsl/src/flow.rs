//! Structured control flow over basic blocks.
//!
//! Each builder receives its branches as [Code]: either a [Label] to jump
//! to, or a closure that is emitted into a fresh block which then falls
//! through to the block the builder continues with. Closures see the
//! locals of the code around them and may declare their own, which go out
//! of scope when the closure returns.
//!
//! After a builder returns, instructions are appended to its join block.
//! When no path reaches the join block (say both branches of an [`if_else`]
//! return), the block is dropped and the current block stays terminated.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use inkwell::basic_block::BasicBlock;
use inkwell::values::FunctionValue;
use tracing::trace;

use crate::session::{BlockOwner, Frame, LoopTargets, Session};
use crate::types::Type;
use crate::value::{IntoOperand, Value, convert_int, test};
use crate::{Error, Result};

mod switch;

pub use switch::{Switch, switch_};

/// What a piece of emitted code returns: `()` or a `Result`.
pub trait Emitted {
    /// Drops the value, keeping any error.
    fn into_result(self) -> Result<()>;
}

impl Emitted for () {
    fn into_result(self) -> Result<()> {
        Ok(())
    }
}

impl<T> Emitted for Result<T> {
    fn into_result(self) -> Result<()> {
        self.map(drop)
    }
}

/// A branch of a control-flow builder.
pub enum Code<'a> {
    /// Jump to this label.
    Label(Label),
    /// Emit this code into a fresh block.
    Thunk(Box<dyn FnOnce() -> Result<()> + 'a>),
}

impl fmt::Debug for Code<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Code::Label(l) => f.debug_tuple("Label").field(l).finish(),
            Code::Thunk(_) => f.write_str("Thunk"),
        }
    }
}

impl From<Label> for Code<'_> {
    fn from(label: Label) -> Self {
        Code::Label(label)
    }
}

impl From<&Label> for Code<'_> {
    fn from(label: &Label) -> Self {
        Code::Label(label.clone())
    }
}

impl<'a, F, R> From<F> for Code<'a>
where
    F: FnOnce() -> R + 'a,
    R: Emitted,
{
    fn from(f: F) -> Self {
        Code::Thunk(Box::new(move || f().into_result()))
    }
}

type Deferred = Rc<dyn Fn() -> Result<()>>;

struct LabelState {
    name: String,
    block: Cell<Option<BasicBlock<'static>>>,
    deferred: RefCell<Option<Deferred>>,
    // Deferred code already emitted into `block`.
    spent: RefCell<Option<Deferred>>,
}

impl BlockOwner for LabelState {
    fn release(&self) {
        self.block.set(None);
        if let Some(code) = self.spent.borrow_mut().take() {
            *self.deferred.borrow_mut() = Some(code);
        }
    }
}

/// A handle to a basic block of the current function.
///
/// The block is created the first time the label is targeted or entered.
/// A deferred label carries code that is emitted into its block the first
/// time the label is targeted; code that is never jumped to is never
/// emitted. When a failed builder discards the block, the label forgets it
/// and the code is emitted again on the next jump.
#[derive(Clone)]
pub struct Label(Rc<LabelState>);

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Label")
            .field("name", &self.name())
            .field("deferred", &self.0.deferred.borrow().is_some())
            .finish()
    }
}

impl PartialEq for Label {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
            || matches!((self.basic_block(), other.basic_block()), (Some(a), Some(b)) if a == b)
    }
}

impl Default for Label {
    fn default() -> Self {
        Label::new()
    }
}

impl Label {
    /// A label whose block is created on first use.
    pub fn new() -> Label {
        Label::named("label")
    }

    /// As [`Label::new`], naming the block.
    pub fn named(name: impl Into<String>) -> Label {
        Label(Rc::new(LabelState {
            name: name.into(),
            block: Cell::new(None),
            deferred: RefCell::new(None),
            spent: RefCell::new(None),
        }))
    }

    /// A label whose code is emitted when it is first targeted. The code
    /// must end in a terminator. It may run more than once if an enclosing
    /// builder fails and discards what it emitted.
    pub fn deferred<F, R>(name: impl Into<String>, code: F) -> Label
    where
        F: Fn() -> R + 'static,
        R: Emitted,
    {
        let label = Label::named(name);
        *label.0.deferred.borrow_mut() = Some(Rc::new(move || code().into_result()));
        label
    }

    /// The label of an existing block.
    pub(crate) fn from_block(block: BasicBlock<'static>) -> Label {
        let label = Label::named(block.get_name().to_string_lossy());
        label.0.block.set(Some(block));
        label.register(block);
        label
    }

    fn register(&self, block: BasicBlock<'static>) {
        let owner: Weak<dyn BlockOwner> = Rc::<LabelState>::downgrade(&self.0);
        Session::current().register_block_owner(block, owner);
    }

    /// The name of the block, or the requested name before it exists.
    pub fn name(&self) -> String {
        match self.0.block.get() {
            Some(b) => b.get_name().to_string_lossy().into_owned(),
            None => self.0.name.clone(),
        }
    }

    /// The block, if it has been created.
    pub fn basic_block(&self) -> Option<BasicBlock<'static>> {
        self.0.block.get()
    }

    /// `blockaddress` of the label, for [`goto_indirect`]. Emits deferred
    /// code like a jump would.
    pub fn address(&self) -> Result<Value> {
        let block = self.target()?;
        // SAFETY: the block has a parent function and is not its entry block.
        let addr = unsafe { block.get_address() }
            .ok_or_else(|| Error::bad_flow(format!("{} has no address", self.name())))?;
        Ok(Value::new(addr.into(), Type::void().ptr()))
    }

    fn ensure_block(&self) -> Result<BasicBlock<'static>> {
        let session = Session::current();
        let function = session.function()?;
        if let Some(block) = self.0.block.get() {
            if block.get_parent() != Some(function) {
                return Err(Error::bad_flow(format!(
                    "label {} belongs to another function",
                    self.name()
                )));
            }
            return Ok(block);
        }
        let block = session.context().append_basic_block(function, &self.0.name);
        trace!(block = %self.0.name, "created label block");
        self.0.block.set(Some(block));
        self.register(block);
        Ok(block)
    }

    /// The block to branch to, running deferred code first.
    pub(crate) fn target(&self) -> Result<BasicBlock<'static>> {
        let block = self.ensure_block()?;
        let deferred = self.0.deferred.borrow_mut().take();
        if let Some(code) = deferred {
            *self.0.spent.borrow_mut() = Some(code.clone());
            let session = Session::current();
            let _scope = session.push_frame(Frame::block(block));
            code()?;
            if session.emitter().is_ok() {
                return Err(Error::bad_flow(format!(
                    "deferred code of {} falls off its end",
                    self.name()
                )));
            }
        }
        Ok(block)
    }

    /// The block to make current for a scope.
    pub(crate) fn block_for_scope(&self) -> Result<BasicBlock<'static>> {
        if self.0.deferred.borrow().is_some() {
            return Err(Error::bad_flow(format!(
                "{} has deferred code and cannot be entered",
                self.name()
            )));
        }
        self.ensure_block()
    }
}

fn append_block(function: FunctionValue<'static>, name: &str) -> BasicBlock<'static> {
    trace!(block = name, "created block");
    Session::current().context().append_basic_block(function, name)
}

/// Emits `code` as a branch target. A closure gets a fresh block placed
/// before `before`, whose end falls through to `fallthrough`.
fn branch_target(
    code: Code<'_>,
    name: &str,
    before: BasicBlock<'static>,
    fallthrough: BasicBlock<'static>,
) -> Result<BasicBlock<'static>> {
    match code {
        Code::Label(label) => label.target(),
        Code::Thunk(f) => {
            let block = Session::current().context().prepend_basic_block(before, name);
            trace!(block = name, "created block");
            emit_into(block, f, fallthrough)?;
            Ok(block)
        }
    }
}

/// Runs `f` in `block` within a nested scope, then branches to
/// `fallthrough` unless the code ended in a terminator.
fn emit_into(
    block: BasicBlock<'static>,
    f: impl FnOnce() -> Result<()>,
    fallthrough: BasicBlock<'static>,
) -> Result<()> {
    let session = Session::current();
    let _scope = session.push_frame(Frame::block(block));
    f()?;
    if let Ok(builder) = session.emitter() {
        builder.build_unconditional_branch(fallthrough)?;
    }
    Ok(())
}

/// Emits `code` as the body of a loop with the given targets.
fn loop_body(
    code: Code<'_>,
    name: &str,
    before: BasicBlock<'static>,
    fallthrough: BasicBlock<'static>,
    targets: LoopTargets,
) -> Result<BasicBlock<'static>> {
    let session = Session::current();
    let depth = session.push_loop(targets);
    let result = branch_target(code, name, before, fallthrough);
    session.pop_loop(depth);
    result
}

/// Evaluates a loop test in `block` and branches on it.
fn emit_test<V: IntoOperand>(
    block: BasicBlock<'static>,
    cond: impl FnOnce() -> V,
    then: BasicBlock<'static>,
    otherwise: BasicBlock<'static>,
) -> Result<()> {
    let session = Session::current();
    let _scope = session.push_frame(Frame::block(block));
    let cond = test(cond())?;
    session.emitter()?.build_conditional_branch(
        cond.llvm().into_int_value(),
        then,
        otherwise,
    )?;
    Ok(())
}

/// Continues after a builder at `join`, or drops `join` if nothing jumps
/// to it.
fn enter_join(function: FunctionValue<'static>, join: BasicBlock<'static>) -> Result<()> {
    let session = Session::current();
    if join.get_first_use().is_none() {
        trace!(block = %join.get_name().to_string_lossy(), "dropped unreachable join block");
        // SAFETY: the block is empty and unused.
        unsafe { join.delete() }.map_err(|()| Error::Llvm("cannot delete block".into()))?;
        return Ok(());
    }
    if let Some(last) = function.get_last_basic_block() {
        if last != join {
            join.move_after(last)
                .map_err(|()| Error::Llvm("cannot move block".into()))?;
        }
    }
    session.set_block(join);
    Ok(())
}

/// `if (cond) then`
pub fn if_<'a>(cond: impl IntoOperand, then: impl Into<Code<'a>>) -> Result<()> {
    conditional(cond, then.into(), None)
}

/// `if (cond) then else otherwise`
pub fn if_else<'a, 'b>(
    cond: impl IntoOperand,
    then: impl Into<Code<'a>>,
    otherwise: impl Into<Code<'b>>,
) -> Result<()> {
    conditional(cond, then.into(), Some(otherwise.into()))
}

fn conditional(cond: impl IntoOperand, then: Code<'_>, otherwise: Option<Code<'_>>) -> Result<()> {
    let session = Session::current();
    session.atomically(|| {
        let function = session.function()?;
        session.emitter()?;
        let cond = test(cond)?;
        let join = append_block(function, "if.end");
        let then_block = branch_target(then, "if.then", join, join)?;
        let else_block = match otherwise {
            Some(code) => branch_target(code, "if.else", join, join)?,
            None => join,
        };
        session.emitter()?.build_conditional_branch(
            cond.llvm().into_int_value(),
            then_block,
            else_block,
        )?;
        enter_join(function, join)
    })
}

/// `while (cond()) body`. `continue_` re-evaluates the condition.
pub fn while_<'a, V: IntoOperand>(
    cond: impl FnOnce() -> V,
    body: impl Into<Code<'a>>,
) -> Result<()> {
    let session = Session::current();
    let body = body.into();
    session.atomically(|| {
        let function = session.function()?;
        session.emitter()?;
        let header = append_block(function, "while.cond");
        let exit = append_block(function, "while.end");
        let targets = LoopTargets {
            function,
            break_to: exit,
            continue_to: Some(header),
        };
        let body_block = loop_body(body, "while.body", exit, header, targets)?;
        session.emitter()?.build_unconditional_branch(header)?;
        emit_test(header, cond, body_block, exit)?;
        enter_join(function, exit)
    })
}

/// `do body while (cond())`. `continue_` jumps to the condition.
pub fn do_<'a, V: IntoOperand>(
    body: impl Into<Code<'a>>,
    cond: impl FnOnce() -> V,
) -> Result<()> {
    let session = Session::current();
    let body = body.into();
    session.atomically(|| {
        let function = session.function()?;
        session.emitter()?;
        let header = append_block(function, "do.cond");
        let exit = append_block(function, "do.end");
        let targets = LoopTargets {
            function,
            break_to: exit,
            continue_to: Some(header),
        };
        let body_block = loop_body(body, "do.body", header, header, targets)?;
        session.emitter()?.build_unconditional_branch(body_block)?;
        emit_test(header, cond, body_block, exit)?;
        enter_join(function, exit)
    })
}

/// `for (init; cond(); step) body`.
///
/// `init` runs in the current block inside a scope shared with the other
/// three parts, so variables it declares are visible to them. `continue_`
/// jumps to `step`.
pub fn for_<'a, V: IntoOperand, I: Emitted, S: Emitted>(
    init: impl FnOnce() -> I,
    cond: impl FnOnce() -> V,
    step: impl FnOnce() -> S,
    body: impl Into<Code<'a>>,
) -> Result<()> {
    let session = Session::current();
    let body = body.into();
    session.atomically(|| {
        let function = session.function()?;
        session.emitter()?;
        let header = append_block(function, "for.cond");
        let exit = append_block(function, "for.end");
        {
            let start = session.current_block().ok_or(Error::NoScope("basic block"))?;
            let _scope = session.push_frame(Frame::block(start));
            init().into_result()?;
            session.emitter()?.build_unconditional_branch(header)?;
            let inc = session.context().prepend_basic_block(exit, "for.inc");
            let targets = LoopTargets {
                function,
                break_to: exit,
                continue_to: Some(inc),
            };
            let body_block = loop_body(body, "for.body", inc, inc, targets)?;
            emit_test(header, cond, body_block, exit)?;
            emit_into(inc, || step().into_result(), header)?;
        }
        enter_join(function, exit)
    })
}

/// Jumps to `label`, emitting its deferred code if needed.
pub fn goto_(label: &Label) -> Result<()> {
    let session = Session::current();
    session.atomically(|| {
        session.emitter()?;
        let target = label.target()?;
        session.emitter()?.build_unconditional_branch(target)?;
        Ok(())
    })
}

/// Jumps to the block whose address is `addr`, which must be one of `labels`.
pub fn goto_indirect(addr: impl IntoOperand, labels: &[&Label]) -> Result<()> {
    let session = Session::current();
    session.atomically(|| {
        let addr = addr.into_operand()?.resolve(None)?;
        if !addr.ty().is_pointer() {
            return Err(Error::mismatch(format!("jump to a {}", addr.ty())));
        }
        let targets: Vec<_> = labels.iter().map(|l| l.target()).collect::<Result<_>>()?;
        session
            .emitter()?
            .build_indirect_branch(addr.llvm(), &targets)?;
        Ok(())
    })
}

/// Leaves the innermost loop or switch.
pub fn break_() -> Result<()> {
    let session = Session::current();
    let targets = session.innermost_loop(false)?;
    session
        .emitter()?
        .build_unconditional_branch(targets.break_to)?;
    Ok(())
}

/// Starts the next iteration of the innermost loop.
pub fn continue_() -> Result<()> {
    let session = Session::current();
    let targets = session.innermost_loop(true)?;
    let to = targets
        .continue_to
        .ok_or_else(|| Error::bad_flow("continue_ outside of a loop"))?;
    session.emitter()?.build_unconditional_branch(to)?;
    Ok(())
}

/// Returns `value` from the current function.
///
/// The value must have the return type, or be an integer of the same
/// signedness that widens to it.
pub fn return_(value: impl IntoOperand) -> Result<()> {
    let session = Session::current();
    let function = session.function()?;
    let ret = Type::of_function(function).ret()?;
    if ret.is_void() {
        return Err(Error::bad_flow("return_ with a value from a void function"));
    }
    session.atomically(|| {
        session.emitter()?;
        let value = value.into_operand()?.resolve(Some(ret))?;
        let value = if value.ty().llvm() == ret.llvm() {
            value
        } else {
            match (value.ty().int_width(), ret.int_width()) {
                (Some(from), Some(to))
                    if from < to && value.ty().leaf_unsigned() == ret.leaf_unsigned() =>
                {
                    convert_int(value, ret)?
                }
                _ => {
                    return Err(Error::bad_flow(format!(
                        "return of {} from a function returning {ret}",
                        value.ty()
                    )));
                }
            }
        };
        session.emitter()?.build_return(Some(&value.llvm()))?;
        Ok(())
    })
}

/// Returns from a `void` function.
pub fn return_void() -> Result<()> {
    let session = Session::current();
    let function = session.function()?;
    let ret = Type::of_function(function).ret()?;
    if !ret.is_void() {
        return Err(Error::bad_flow(format!(
            "return_void from a function returning {ret}"
        )));
    }
    session.emitter()?.build_return(None)?;
    Ok(())
}
