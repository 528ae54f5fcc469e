//! RAII guards over the insertion-context stack.

use inkwell::values::FunctionValue;
use tracing::debug;

use crate::flow::Label;
use crate::module::Module;
use crate::reference::{ConstRef, Ref};
use crate::session::{Frame, Session};
use crate::symbols::SymbolName;
use crate::types::Type;
use crate::{Error, Result};

/// An entry on the insertion-context stack.
///
/// Creating a scope pushes a frame; dropping it pops that frame, and every
/// frame pushed after it, and puts the builder back where the enclosing
/// frame left it.
#[must_use = "the scope is popped as soon as it is dropped"]
#[derive(Debug)]
pub struct Scope {
    session: &'static Session,
    depth: usize,
}

impl Scope {
    pub(crate) fn new(session: &'static Session, depth: usize) -> Self {
        Self { session, depth }
    }

    /// Makes `module` the current module.
    pub fn module(module: &Module) -> Scope {
        Session::current().push_frame(Frame::module(module.clone()))
    }

    /// Opens the body of `function` and makes its entry block current.
    ///
    /// The function gets a prologue block holding the stack slots of its
    /// locals, followed by the `entry` block. Every named parameter is
    /// spilled to a slot and registered under its name.
    ///
    /// Fails if the function already has a body.
    pub fn function(function: &ConstRef) -> Result<Scope> {
        let func = function.function()?;
        open_body(func)
    }

    /// Makes the block of `label` current, creating it in the current
    /// function if needed.
    pub fn label(label: &Label) -> Result<Scope> {
        let block = label.block_for_scope()?;
        Ok(Session::current().push_frame(Frame::block(block)))
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.session.truncate(self.depth);
    }
}

pub(crate) fn open_body(func: FunctionValue<'static>) -> Result<Scope> {
    let session = Session::current();
    if func.get_first_basic_block().is_some() {
        return Err(Error::DuplicateName(format!(
            "{} already has a body",
            func.get_name().to_string_lossy()
        )));
    }
    let context = session.context();
    let prologue = context.append_basic_block(func, "alloca");
    let entry = context.append_basic_block(func, "entry");
    session.builder().position_at_end(prologue);
    session.builder().build_unconditional_branch(entry)?;
    debug!(function = %func.get_name().to_string_lossy(), "opened function body");

    let scope = session.push_frame(Frame::function(func, entry));
    let names = session.parameter_names(func);
    let param_types = Type::of_function(func).params()?;
    for ((param, name), ty) in func.get_params().into_iter().zip(&names).zip(param_types) {
        if name.is_empty() {
            continue;
        }
        param.set_name(name);
        let slot = session.build_alloca(ty.basic()?, name)?;
        session.emitter()?.build_store(slot, param)?;
        let r = Ref::local(slot, ty);
        session.declare_local(&SymbolName::rigid(name), r)?;
    }
    Ok(scope)
}

/// Returns the innermost current module.
pub fn current_module() -> Option<Module> {
    Session::current().current_module()
}

/// Returns the innermost function whose body is being built.
pub fn current_function() -> Option<ConstRef> {
    Session::current()
        .current_function()
        .map(ConstRef::function_ref)
}

/// Returns the label of the block instructions are currently appended to.
pub fn current_label() -> Option<Label> {
    Session::current().current_block().map(Label::from_block)
}

#[cfg(test)]
mod test {
    use cool_asserts::assert_matches;
    use rstest::rstest;

    use super::*;
    use crate::decl::declare_fn;
    use crate::test::{TestContext, test_ctx};

    #[rstest]
    fn scopes_nest_and_restore(test_ctx: TestContext) {
        let i32_t = Type::int(32);
        let f = declare_fn(i32_t.func(&[i32_t]).unwrap(), "f").unwrap();
        assert!(current_function().is_none());
        {
            let _body = Scope::function(&f).unwrap();
            let entry = current_label().unwrap();
            assert_eq!(entry.name(), "entry");
            let label = Label::named("inner");
            {
                let _inner = Scope::label(&label).unwrap();
                assert_eq!(current_label().unwrap().name(), "inner");
            }
            assert_eq!(current_label(), Some(entry));
            assert_eq!(current_function().unwrap().address().llvm(), f.address().llvm());
        }
        assert!(current_label().is_none());
        assert_eq!(current_module().unwrap().name(), test_ctx.module().name());
    }

    #[rstest]
    fn a_body_is_opened_once(_test_ctx: TestContext) {
        let f = declare_fn(Type::void().func(&[]).unwrap(), "g").unwrap();
        let body = Scope::function(&f).unwrap();
        drop(body);
        assert_matches!(Scope::function(&f), Err(Error::DuplicateName(_)));
    }
}
