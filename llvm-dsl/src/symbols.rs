//! Symbol names and the local variables of a function.

use std::fmt;

use tracing::debug;

use crate::reference::Ref;
use crate::session::Session;
use crate::types::{HostType, Type};
use crate::value::IntoOperand;
use crate::{Error, Result};

/// The requested name of a symbol.
///
/// A rigid name must be used exactly as given and collides with any
/// existing symbol of that name. A flexible name is suffixed with `.1`,
/// `.2`, ... until it is unique.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SymbolName {
    name: String,
    flexible: bool,
}

impl SymbolName {
    /// A name that must be used exactly.
    pub fn rigid(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flexible: false,
        }
    }

    /// A name that may be renamed on collision.
    pub fn flexible(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flexible: true,
        }
    }

    /// The requested name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the name may be renamed on collision.
    pub fn is_flexible(&self) -> bool {
        self.flexible
    }

    /// The effective name given the names `taken` already.
    pub(crate) fn resolve(&self, taken: impl Fn(&str) -> bool) -> Result<String> {
        if !taken(&self.name) {
            return Ok(self.name.clone());
        }
        if !self.flexible {
            return Err(Error::DuplicateName(self.name.clone()));
        }
        let renamed = (1..)
            .map(|n| format!("{}.{n}", self.name))
            .find(|candidate| !taken(candidate))
            .ok_or_else(|| Error::DuplicateName(self.name.clone()))?;
        debug!(requested = %self.name, effective = %renamed, "renamed flexible symbol");
        Ok(renamed)
    }
}

impl fmt::Display for SymbolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<&str> for SymbolName {
    fn from(name: &str) -> Self {
        SymbolName::rigid(name)
    }
}

impl From<String> for SymbolName {
    fn from(name: String) -> Self {
        SymbolName::rigid(name)
    }
}

impl From<&String> for SymbolName {
    fn from(name: &String) -> Self {
        SymbolName::rigid(name.as_str())
    }
}

/// Shorthand for [`SymbolName::flexible`].
pub fn flexible(name: impl Into<String>) -> SymbolName {
    SymbolName::flexible(name)
}

/// Allocates a local variable of type `ty` in the current function.
///
/// A non-empty name registers the variable in the innermost scope.
pub fn local(ty: Type, name: impl Into<SymbolName>) -> Result<Ref> {
    let name = name.into();
    let session = Session::current();
    let slot = session.build_alloca(ty.basic()?, name.name())?;
    let r = Ref::local(slot, ty);
    if !name.name().is_empty() {
        if let Err(e) = session.declare_local(&name, r.clone()) {
            if let Some(inst) = slot.as_instruction() {
                inst.erase_from_basic_block();
            }
            return Err(e);
        }
    }
    Ok(r)
}

/// [`local`] with the type mapped from the host type `T`.
pub fn local_of<T: HostType + ?Sized>(name: impl Into<SymbolName>) -> Result<Ref> {
    local(Type::get::<T>()?, name)
}

/// A local variable typed and initialized by `init`.
pub fn auto_(init: impl IntoOperand, name: impl Into<SymbolName>) -> Result<Ref> {
    let session = Session::current();
    session.atomically(|| {
        let value = init.into_operand()?.resolve(None)?;
        let r = local(value.ty(), name)?;
        r.store(value)?;
        Ok(r)
    })
}

/// Looks up a variable: the locals of the current function, innermost
/// scope first, then the globals and functions of the current module.
pub fn var(name: &str) -> Result<Ref> {
    let session = Session::current();
    if let Some(r) = session.lookup_local(name) {
        return Ok(r);
    }
    session
        .current_module()
        .and_then(|m| m.symbol(name))
        .ok_or_else(|| Error::NameNotFound(name.to_owned()))
}

#[cfg(test)]
mod test {
    use cool_asserts::assert_matches;
    use rstest::rstest;

    use super::*;
    use crate::decl::static_fn;
    use crate::flow::if_;
    use crate::reflect::local_names;
    use crate::test::{TestContext, test_ctx};

    #[test]
    fn flexible_names_are_suffixed() {
        let taken = ["x", "x.1"];
        let is_taken = |n: &str| taken.contains(&n);
        assert_eq!(flexible("x").resolve(is_taken).unwrap(), "x.2");
        assert_eq!(flexible("y").resolve(is_taken).unwrap(), "y");
        assert_matches!(
            SymbolName::from("x").resolve(is_taken),
            Err(Error::DuplicateName(n)) => assert_eq!(n, "x")
        );
    }

    #[rstest]
    fn locals_are_scoped(_test_ctx: TestContext) {
        let i32_t = Type::int(32);
        static_fn(Type::void().func(&[i32_t]).unwrap(), "scoped", &["n"], || {
            let n = var("n")?;
            assert_eq!(n.ty(), i32_t);
            local(Type::f64(), "x")?;
            assert_matches!(local(i32_t, "x"), Err(Error::DuplicateName(_)));
            let a = local(i32_t, flexible("x"))?;
            let b = local(i32_t, flexible("x"))?;
            assert_ne!(a.address().llvm(), b.address().llvm());
            assert_eq!(local_names().len(), 4);
            if_(&n, || {
                let inner = auto_(Type::uint(8).constant(1), "inner")?;
                assert_eq!(inner.ty(), Type::uint(8));
                assert_eq!(var("x")?.ty(), Type::f64());
                Ok(())
            })?;
            assert_matches!(var("inner"), Err(Error::NameNotFound(_)));
            Ok(())
        })
        .unwrap();
        assert_matches!(var("n"), Err(Error::NameNotFound(_)));
    }

    #[rstest]
    fn host_typed_locals(_test_ctx: TestContext) {
        static_fn(Type::void().func(&[]).unwrap(), "host", &[], || {
            assert_eq!(local_of::<u16>("w")?.ty(), Type::uint(16));
            assert_eq!(local_of::<[f32; 3]>("v")?.ty(), Type::f32().array(3)?);
            Ok(())
        })
        .unwrap();
    }
}
