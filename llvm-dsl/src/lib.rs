//! # An embedded language for building LLVM IR
//!
//! `llvm-dsl` builds IR with code that reads like the program being
//! generated. Values and references overload the arithmetic operators,
//! structured builders such as [`if_else`] and [`for_`] lay out the basic
//! blocks, and a thread-local stack of [Scope]s decides where instructions
//! go, so that none of this needs an explicit builder argument.
//!
//! ```no_run
//! use llvm_dsl::{Module, Scope, Type, ValueOps, extern_fn, if_else, return_, var};
//!
//! # fn main() -> llvm_dsl::Result<()> {
//! let module = Module::new("demo");
//! let _scope = Scope::module(&module);
//! let i32_t = Type::int(32);
//! let fact = extern_fn(i32_t.func(&[i32_t])?, "fact", &["n"], || {
//!     let n = var("n")?;
//!     if_else(
//!         n.lt_(2),
//!         || return_(1),
//!         || {
//!             let fact = var("fact")?;
//!             return_(&n * fact.call((&n - 1,))?)
//!         },
//!     )
//! })?;
//! module.verify()?;
//! let compiled = module.compile::<unsafe extern "C" fn(i32) -> i32>("fact")?;
//! assert_eq!(unsafe { compiled.call(5) }, 120);
//! # let _ = fact;
//! # Ok(())
//! # }
//! ```
//!
//! ## Building blocks
//!
//! * [Type]: an IR type plus the signedness its integers are read with.
//! * [Value]: the result of an instruction or a constant. Values move into
//!   the operations consuming them, like SSA registers.
//! * [Ref] and [ConstRef]: addresses of objects. Locals live in stack slots,
//!   so values cross blocks through references rather than phi nodes.
//! * [Scope]: an RAII guard over the current module, function or block.
//! * [Module]: owns the IR, reads and writes it, links, optimizes and JIT
//!   compiles it.
//!
//! Every operation either succeeds or fails with an [Error] and leaves the
//! current block as it was. The operator impls panic on error instead;
//! each has a fallible named counterpart.

pub mod constant;
pub mod decl;
mod error;
pub mod flow;
pub mod intrinsics;
pub mod module;
pub mod reference;
pub mod reflect;
pub mod scope;
pub mod session;
pub mod symbols;
pub mod types;
pub mod value;


pub use constant::Literal;
pub use decl::{declare_fn, extern_, extern_fn, inline_fn, static_, static_fn};
pub use error::{Error, Result};
pub use flow::{
    Code, Label, Switch, break_, continue_, do_, for_, goto_, goto_indirect, if_, if_else,
    return_, return_void, switch_, while_,
};
pub use intrinsics::{Typed, alignof_, offsetof_, reinterpret_cast_, sizeof_, static_cast_, typeof_};
pub use module::{Module, OptLevel};
pub use reference::{ConstRef, Ref};
pub use scope::{Scope, current_function, current_label, current_module};
pub use session::{Session, SessionGuard};
pub use symbols::{SymbolName, auto_, flexible, local, local_of, var};
pub use types::{HostSignature, HostType, Type};
pub use value::{
    Arguments, BinaryOp, CmpOp, IntoOperand, Member, Operand, Value, ValueOps, binary, compare,
    logical_and, logical_not, logical_or, test,
};

pub use inkwell;

/// The LLVM version this crate was built against.
#[allow(unreachable_code)]
#[must_use]
pub fn llvm_version() -> &'static str {
    #[cfg(feature = "llvm14-0")]
    return "llvm14";
    panic!("No recognised llvm feature.")
}
