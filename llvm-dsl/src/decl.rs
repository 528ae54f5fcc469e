//! Declaring and defining the globals and functions of a module.
//!
//! The linkage follows the C storage classes: `extern_` symbols are visible
//! outside the module, `static_` ones are internal, and `inline_fn` emits a
//! `linkonce_odr` definition that is always inlined.

use inkwell::attributes::{Attribute, AttributeLoc};
use inkwell::module::Linkage;
use inkwell::types::AnyTypeEnum;
use inkwell::values::FunctionValue;
use tracing::debug;

use crate::constant::zero;
use crate::flow::Emitted;
use crate::reference::{ConstRef, Ref};
use crate::scope::open_body;
use crate::session::Session;
use crate::symbols::SymbolName;
use crate::types::Type;
use crate::{Error, Result};

/// Declares an external global variable of type `ty`.
///
/// It stays a declaration until [initialized](ConstRef::initialize).
/// Declaring a rigid name again with the same type yields the same global.
pub fn extern_(ty: Type, name: impl Into<SymbolName>) -> Result<Ref> {
    global(Linkage::External, ty, name.into())
}

/// Defines an internal, zero-initialized global variable of type `ty`.
pub fn static_(ty: Type, name: impl Into<SymbolName>) -> Result<Ref> {
    global(Linkage::Internal, ty, name.into())
}

fn global(linkage: Linkage, ty: Type, name: SymbolName) -> Result<Ref> {
    let session = Session::current();
    let module = session.module()?;
    let slot = ty.basic()?;
    if linkage == Linkage::External && !name.is_flexible() {
        if let Some(existing) = module.llvm().get_global(name.name()) {
            let same_type = module.symbol(name.name()).is_some_and(|r| r.ty() == ty);
            if same_type && existing.get_linkage() == Linkage::External {
                return Ok(Ref::global(existing, ty));
            }
        }
    }
    let effective = name.resolve(|n| module.is_taken(n))?;
    let global = module.llvm().add_global(slot, None, &effective);
    global.set_linkage(linkage);
    if linkage != Linkage::External {
        global.set_initializer(&zero(slot));
    }
    module.register_global(&effective, ty, name.is_flexible());
    debug!(name = %effective, ?linkage, ty = %ty, "declared global");
    Ok(Ref::global(global, ty))
}

/// Declares an external function of type `ty` without a body.
///
/// Declaring a rigid name again with the same type yields the same
/// function.
pub fn declare_fn(ty: Type, name: impl Into<SymbolName>) -> Result<ConstRef> {
    let (function, _) = function(Linkage::External, ty, name.into(), &[])?;
    Ok(ConstRef::function_ref(function))
}

/// Defines an external function of type `ty`.
///
/// `params` names the leading parameters; the body sees each named
/// parameter as a local variable. The body runs with the function's entry
/// block current. When it returns, every block still open is closed: with
/// `ret void` in a `void` function, with `unreachable` if no branch reaches
/// it, and with [`Error::BadControlFlow`] otherwise. A body that fails
/// leaves no function behind.
pub fn extern_fn<R: Emitted>(
    ty: Type,
    name: impl Into<SymbolName>,
    params: &[&str],
    body: impl FnOnce() -> R,
) -> Result<ConstRef> {
    define(Linkage::External, ty, name.into(), params, body)
}

/// As [`extern_fn`], with internal linkage.
pub fn static_fn<R: Emitted>(
    ty: Type,
    name: impl Into<SymbolName>,
    params: &[&str],
    body: impl FnOnce() -> R,
) -> Result<ConstRef> {
    define(Linkage::Internal, ty, name.into(), params, body)
}

/// As [`extern_fn`], with `linkonce_odr` linkage and `alwaysinline`.
pub fn inline_fn<R: Emitted>(
    ty: Type,
    name: impl Into<SymbolName>,
    params: &[&str],
    body: impl FnOnce() -> R,
) -> Result<ConstRef> {
    define(Linkage::LinkOnceODR, ty, name.into(), params, body)
}

/// Finds or creates the function. The flag is set when it was created.
fn function(
    linkage: Linkage,
    ty: Type,
    name: SymbolName,
    params: &[&str],
) -> Result<(FunctionValue<'static>, bool)> {
    let session = Session::current();
    let module = session.module()?;
    let AnyTypeEnum::FunctionType(fn_type) = ty.llvm() else {
        return Err(Error::mismatch(format!("{ty} is not a function type")));
    };
    let arity = ty.params()?.len();
    if params.len() > arity {
        return Err(Error::SignatureMismatch(format!(
            "{} parameter names for {ty}",
            params.len()
        )));
    }
    let names = params.iter().map(|p| p.to_string()).collect();

    if !name.is_flexible() {
        if let Some(existing) = module.llvm().get_function(name.name()) {
            let reusable = existing.count_basic_blocks() == 0
                && existing.get_type() == fn_type
                && Type::of_function(existing) == ty;
            if reusable {
                existing.set_linkage(linkage);
                if !params.is_empty() {
                    session.set_parameter_names(existing, names);
                }
                return Ok((existing, false));
            }
        }
    }
    let effective = name.resolve(|n| module.is_taken(n))?;
    let function = module.llvm().add_function(&effective, fn_type, Some(linkage));
    session.set_signature(function, ty);
    session.set_parameter_names(function, names);
    module.register_function(&effective, name.is_flexible());
    debug!(name = %effective, ?linkage, ty = %ty, "declared function");
    Ok((function, true))
}

fn define<R: Emitted>(
    linkage: Linkage,
    ty: Type,
    name: SymbolName,
    params: &[&str],
    body: impl FnOnce() -> R,
) -> Result<ConstRef> {
    let (function, created) = self::function(linkage, ty, name, params)?;
    if linkage == Linkage::LinkOnceODR {
        let context = Session::current().context();
        let kind = Attribute::get_named_enum_kind_id("alwaysinline");
        function.add_attribute(AttributeLoc::Function, context.create_enum_attribute(kind, 0));
    }
    match emit_body(function, body) {
        Ok(()) => Ok(ConstRef::function_ref(function)),
        Err(e) => {
            discard(function, created);
            Err(e)
        }
    }
}

fn emit_body<R: Emitted>(function: FunctionValue<'static>, body: impl FnOnce() -> R) -> Result<()> {
    let _scope = open_body(function)?;
    body().into_result()?;
    seal(function)
}

/// Terminates the blocks a body left open.
fn seal(function: FunctionValue<'static>) -> Result<()> {
    let session = Session::current();
    let builder = session.builder();
    let returns_void = Type::of_function(function).ret()?.is_void();
    for block in function.get_basic_blocks() {
        if block.get_terminator().is_some() {
            continue;
        }
        builder.position_at_end(block);
        if returns_void {
            builder.build_return(None)?;
        } else if block.get_first_use().is_none() {
            builder.build_unreachable()?;
        } else {
            return Err(Error::bad_flow(format!(
                "control reaches the end of `{}` in `{}` without a return",
                block.get_name().to_string_lossy(),
                function.get_name().to_string_lossy()
            )));
        }
    }
    Ok(())
}

/// Removes what a failed body emitted. A function that existed before as a
/// declaration is turned back into one.
fn discard(function: FunctionValue<'static>, created: bool) {
    let name = function.get_name().to_string_lossy().into_owned();
    let session = Session::current();
    if created {
        session.release_blocks(&function.get_basic_blocks());
        // SAFETY: nothing refers to a function whose body just failed.
        unsafe { function.delete() };
    } else {
        session.delete_blocks(&function.get_basic_blocks());
        function.set_linkage(Linkage::External);
    }
    debug!(name, "discarded failed function body");
}

#[cfg(test)]
mod test {
    use cool_asserts::assert_matches;
    use rstest::rstest;

    use super::*;
    use crate::flow::{if_, return_};
    use crate::symbols::{flexible, var};
    use crate::test::{TestContext, test_ctx};

    fn printed(ctx: &TestContext) -> String {
        ctx.module().llvm().print_to_string().to_string()
    }

    #[rstest]
    fn rigid_declarations_are_reused(_test_ctx: TestContext) {
        let i32_t = Type::int(32);
        let unary = i32_t.func(&[i32_t]).unwrap();
        let f = declare_fn(unary, "f").unwrap();
        let again = declare_fn(unary, "f").unwrap();
        assert_eq!(f.function().unwrap(), again.function().unwrap());
        assert_matches!(
            declare_fn(Type::void().func(&[]).unwrap(), "f"),
            Err(Error::DuplicateName(n)) => assert_eq!(n, "f")
        );
        let defined = extern_fn(unary, "f", &["n"], || return_(var("n"))).unwrap();
        assert_eq!(defined.function().unwrap(), f.function().unwrap());
        assert_matches!(
            extern_fn(unary, "f", &[], || return_(0)),
            Err(Error::DuplicateName(_))
        );
    }

    #[rstest]
    fn flexible_names_never_collide(test_ctx: TestContext) {
        let ty = Type::int(32).func(&[Type::int(32)]).unwrap();
        declare_fn(ty, flexible("f")).unwrap();
        let second = declare_fn(ty, flexible("f")).unwrap();
        assert_eq!(second.function().unwrap().get_name().to_str(), Ok("f.1"));
        static_(Type::f64(), flexible("f")).unwrap();
        assert!(test_ctx.module().llvm().get_global("f.2").is_some());
    }

    #[rstest]
    fn parameter_names_are_checked(_test_ctx: TestContext) {
        let ty = Type::void().func(&[Type::int(32)]).unwrap();
        assert_matches!(
            static_fn(ty, "two", &["a", "b"], || ()),
            Err(Error::SignatureMismatch(_))
        );
        static_fn(ty, "unnamed", &[], || {
            assert_matches!(var("a"), Err(Error::NameNotFound(_)));
        })
        .unwrap();
    }

    #[rstest]
    fn open_blocks_are_sealed(test_ctx: TestContext) {
        static_fn(Type::void().func(&[]).unwrap(), "empty", &[], || ()).unwrap();
        let ir = printed(&test_ctx);
        assert!(ir.contains("define internal void @empty()"));
        assert!(ir.contains("ret void"));

        let i32_t = Type::int(32);
        let result = static_fn(i32_t.func(&[i32_t]).unwrap(), "falls_off", &["n"], || {
            if_(var("n"), || return_(1))
        });
        assert_matches!(result, Err(Error::BadControlFlow(_)));
        assert!(test_ctx.module().llvm().get_function("falls_off").is_none());
        test_ctx.module().verify().unwrap();
    }

    #[rstest]
    fn failed_bodies_restore_declarations(test_ctx: TestContext) {
        let ty = Type::int(32).func(&[]).unwrap();
        let decl = declare_fn(ty, "later").unwrap();
        assert!(extern_fn(ty, "later", &[], || return_(1.5)).is_err());
        let function = decl.function().unwrap();
        assert_eq!(function.count_basic_blocks(), 0);
        assert_eq!(function.get_linkage(), Linkage::External);
        extern_fn(ty, "later", &[], || return_(2)).unwrap();
        test_ctx.module().verify().unwrap();
    }

    #[rstest]
    fn inline_functions(test_ctx: TestContext) {
        let i32_t = Type::int(32);
        inline_fn(i32_t.func(&[i32_t]).unwrap(), "twice", &["x"], || {
            return_(&var("x")? * 2)
        })
        .unwrap();
        let ir = printed(&test_ctx);
        assert!(ir.contains("define linkonce_odr i32 @twice(i32 %x)"));
        assert!(ir.contains("alwaysinline"));
    }

    #[rstest]
    fn globals(test_ctx: TestContext) {
        let i32_t = Type::int(32);
        let g = extern_(i32_t, "g").unwrap();
        assert_eq!(g.ty(), i32_t);
        assert_eq!(
            extern_(i32_t, "g").unwrap().address().llvm(),
            g.address().llvm()
        );
        assert_matches!(static_(i32_t, "g"), Err(Error::DuplicateName(_)));
        static_(Type::f64().array(2).unwrap(), "table").unwrap();
        assert_matches!(
            static_(i32_t.func(&[]).unwrap(), "h"),
            Err(Error::InvalidType(_))
        );
        let ir = printed(&test_ctx);
        assert!(ir.contains("@g = external global i32"));
        assert!(ir.contains("@table = internal global [2 x double] zeroinitializer"));
    }

    #[rstest]
    fn declarations_need_a_module() {
        let session = Session::new();
        let _guard = session.install();
        assert_matches!(
            declare_fn(Type::void().func(&[]).unwrap(), "f"),
            Err(Error::NoScope("module"))
        );
    }
}
