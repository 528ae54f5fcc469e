//! Lvalues: addresses paired with the type of the object they hold.

use std::fmt;
use std::ops::Deref;

use inkwell::values::{BasicValueEnum, FunctionValue, GlobalValue, PointerValue};

use crate::session::Session;
use crate::types::Type;
use crate::value::{
    Arguments, BinaryOp, IntoOperand, Member, Value, binary, coerce, extend_index,
};
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq)]
enum Origin {
    /// A stack slot.
    Local,
    Global(GlobalValue<'static>),
    Function(FunctionValue<'static>),
    /// An address computed from another reference or a pointer value.
    Derived,
}

/// A read-only reference to an object.
///
/// Reading it emits a load. Indexing and member access compute further
/// references without loading.
#[derive(Clone)]
pub struct ConstRef {
    addr: PointerValue<'static>,
    ty: Type,
    origin: Origin,
}

impl fmt::Debug for ConstRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstRef")
            .field("ty", &self.ty)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl ConstRef {
    fn new(addr: PointerValue<'static>, ty: Type, origin: Origin) -> Self {
        Self { addr, ty, origin }
    }

    /// A reference to a function.
    pub(crate) fn function_ref(function: FunctionValue<'static>) -> Self {
        let addr = function.as_global_value().as_pointer_value();
        Self::new(addr, Type::of_function(function), Origin::Function(function))
    }

    /// The type of the referenced object.
    pub fn ty(&self) -> Type {
        self.ty
    }

    /// `&self`: the address of the object.
    pub fn address(&self) -> Value {
        Value::new(self.addr.into(), self.ty.ptr())
    }

    /// Reads the object. Reading a function yields its address.
    pub fn load(&self) -> Result<Value> {
        if let Origin::Function(_) = self.origin {
            return Ok(self.address());
        }
        let session = Session::current();
        session.check_local(self.addr.into())?;
        self.ty.basic()?;
        let raw = session.emitter()?.build_load(self.addr, "")?;
        Ok(Value::new(raw, self.ty))
    }

    /// The address of the first element of an array.
    pub(crate) fn decay(&self) -> Result<Value> {
        let elem = self
            .ty
            .element()
            .filter(|_| self.ty.is_array())
            .ok_or_else(|| Error::mismatch(format!("{} does not decay", self.ty)))?;
        let zero = Session::current().context().i64_type().const_zero();
        let ptr = self.gep(&[zero, zero])?;
        Ok(Value::new(ptr.into(), elem.ptr()))
    }

    fn gep(
        &self,
        indices: &[inkwell::values::IntValue<'static>],
    ) -> Result<PointerValue<'static>> {
        let session = Session::current();
        session.check_local(self.addr.into())?;
        // SAFETY: the address is only dereferenced by generated code.
        Ok(unsafe {
            session
                .emitter()?
                .build_in_bounds_gep(self.addr, indices, "")?
        })
    }

    /// The function this refers to.
    pub fn function(&self) -> Result<FunctionValue<'static>> {
        match self.origin {
            Origin::Function(f) => Ok(f),
            _ => Err(Error::mismatch(format!("{} is not a function", self.ty))),
        }
    }

    /// The global variable or function this refers to, if any.
    pub fn global(&self) -> Option<GlobalValue<'static>> {
        match self.origin {
            Origin::Global(g) => Some(g),
            Origin::Function(f) => Some(f.as_global_value()),
            Origin::Local | Origin::Derived => None,
        }
    }

    /// Element `index` of a referenced array or vector, or of the array a
    /// referenced pointer points into.
    pub fn index(&self, index: impl IntoOperand) -> Result<ConstRef> {
        Session::current().atomically(|| {
            let index = index.into_operand()?.resolve(Some(Type::int(64)))?;
            let index = extend_index(index)?;
            let elem = self
                .ty
                .element()
                .ok_or_else(|| Error::mismatch(format!("{} cannot be indexed", self.ty)))?;
            if self.ty.is_pointer() {
                let ptr = self.load()?;
                let moved = ptr.offset(Value::from_llvm(index))?;
                return Ok(ConstRef::new(moved.llvm().into_pointer_value(), elem, Origin::Derived));
            }
            let zero = index.get_type().const_zero();
            let addr = self.gep(&[zero, index])?;
            Ok(ConstRef::new(addr, elem, Origin::Derived))
        })
    }

    /// Member of a referenced struct, by position or by name.
    pub fn dot(&self, member: impl Into<Member>) -> Result<ConstRef> {
        let (i, ty) = member.into().resolve(self.ty)?;
        let session = Session::current();
        session.check_local(self.addr.into())?;
        let addr = session.emitter()?.build_struct_gep(self.addr, i, "")?;
        Ok(ConstRef::new(addr, ty, Origin::Derived))
    }

    /// Member of the struct a referenced pointer points to.
    pub fn arrow(&self, member: impl Into<Member>) -> Result<ConstRef> {
        Session::current().atomically(|| self.pointee()?.as_const().dot(member))
    }

    /// The object a referenced pointer points to.
    pub fn pointee(&self) -> Result<Ref> {
        if !self.ty.is_pointer() {
            return Err(Error::mismatch(format!("{} is not a pointer", self.ty)));
        }
        self.load()?.pointee()
    }

    /// Calls the referenced function or function pointer.
    pub fn call(&self, args: impl Arguments) -> Result<Value> {
        self.load()?.call(args)
    }

    /// As [`ConstRef::call`], discarding any result.
    pub fn call_void(&self, args: impl Arguments) -> Result<()> {
        self.load()?.call_void(args)
    }

    /// Constructs the object in place from a value of exactly its type.
    ///
    /// Globals take the value, which must be constant, as their initializer.
    pub fn initialize(&self, value: impl IntoOperand) -> Result<()> {
        let session = Session::current();
        let global = match self.origin {
            Origin::Global(g) => Some(g),
            Origin::Function(_) => {
                return Err(Error::mismatch("functions cannot be initialized"));
            }
            Origin::Local | Origin::Derived => None,
        };
        session.atomically(|| {
            let value = value.into_operand()?.resolve(Some(self.ty))?;
            if value.ty().llvm() != self.ty.llvm() {
                return Err(Error::mismatch(format!(
                    "{} initialized from {}",
                    self.ty,
                    value.ty()
                )));
            }
            match global {
                Some(g) if session.current_block().is_none() || value.is_const() => {
                    if !value.is_const() {
                        return Err(Error::mismatch("global initializers must be constant"));
                    }
                    g.set_initializer(&value.llvm());
                }
                _ => {
                    session.emitter()?.build_store(self.addr, value.llvm())?;
                }
            }
            Ok(())
        })
    }
}

/// A mutable reference to an object.
///
/// Everything a [ConstRef] offers is available through `Deref`; access
/// paths through a `Ref` yield `Ref`s again.
#[derive(Clone)]
pub struct Ref(ConstRef);

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Ref").field(&self.0).finish()
    }
}

impl Deref for Ref {
    type Target = ConstRef;

    fn deref(&self) -> &ConstRef {
        &self.0
    }
}

impl Ref {
    /// A stack slot holding a `ty`.
    pub(crate) fn local(slot: PointerValue<'static>, ty: Type) -> Ref {
        Ref(ConstRef::new(slot, ty, Origin::Local))
    }

    /// A global variable holding a `ty`.
    pub(crate) fn global(global: GlobalValue<'static>, ty: Type) -> Ref {
        Ref(ConstRef::new(global.as_pointer_value(), ty, Origin::Global(global)))
    }

    /// A function, as found in a module's symbol table. Stores to it fail.
    pub(crate) fn from_function(function: FunctionValue<'static>) -> Ref {
        Ref(ConstRef::function_ref(function))
    }

    /// The object at `addr`.
    pub fn derived(addr: PointerValue<'static>, ty: Type) -> Ref {
        Ref(ConstRef::new(addr, ty, Origin::Derived))
    }

    /// Gives up write access.
    pub fn into_const(self) -> ConstRef {
        self.0
    }

    /// This reference, read-only.
    pub fn as_const(&self) -> &ConstRef {
        &self.0
    }

    /// See [`ConstRef::index`].
    pub fn index(&self, index: impl IntoOperand) -> Result<Ref> {
        self.0.index(index).map(Ref)
    }

    /// See [`ConstRef::dot`].
    pub fn dot(&self, member: impl Into<Member>) -> Result<Ref> {
        self.0.dot(member).map(Ref)
    }

    /// See [`ConstRef::arrow`].
    pub fn arrow(&self, member: impl Into<Member>) -> Result<Ref> {
        self.0.arrow(member).map(Ref)
    }

    /// `self = value`. The value is widened to the object's type if needed.
    pub fn store(&self, value: impl IntoOperand) -> Result<()> {
        let session = Session::current();
        if let Origin::Function(_) = self.origin {
            return Err(Error::mismatch("cannot store to a function"));
        }
        session.atomically(|| {
            session.check_local(self.addr.into())?;
            let value = value.into_operand()?.resolve(Some(self.ty))?;
            let value = coerce(value, self.ty)?;
            session.emitter()?.build_store(self.addr, value.llvm())?;
            Ok(())
        })
    }

    /// `self op= rhs`: load, apply `op`, convert back and store.
    pub fn update(&self, op: BinaryOp, rhs: impl IntoOperand) -> Result<()> {
        Session::current().atomically(|| {
            let result = binary(op, self.load(), rhs)?;
            let result = crate::intrinsics::static_cast_(result, self.ty)?;
            self.store(result)
        })
    }

    /// `++self`
    pub fn increment(&self) -> Result<()> {
        self.step(false)
    }

    /// `--self`
    pub fn decrement(&self) -> Result<()> {
        self.step(true)
    }

    fn step(&self, down: bool) -> Result<()> {
        let session = Session::current();
        session.atomically(|| {
            let old = self.load()?;
            let builder = session.emitter()?;
            let new: BasicValueEnum<'static> = match old.llvm() {
                BasicValueEnum::IntValue(i) => {
                    let one = i.get_type().const_int(1, false);
                    let stepped = match (down, self.ty.leaf_unsigned()) {
                        (false, false) => builder.build_int_nsw_add(i, one, "")?,
                        (false, true) => builder.build_int_add(i, one, "")?,
                        (true, false) => builder.build_int_nsw_sub(i, one, "")?,
                        (true, true) => builder.build_int_sub(i, one, "")?,
                    };
                    stepped.into()
                }
                BasicValueEnum::FloatValue(f) => {
                    let one = f.get_type().const_float(1.0);
                    if down {
                        builder.build_float_sub(f, one, "")?.into()
                    } else {
                        builder.build_float_add(f, one, "")?.into()
                    }
                }
                BasicValueEnum::PointerValue(_) => {
                    let by = Type::int(64).constant(if down { -1 } else { 1 })?;
                    old.offset(by)?.llvm()
                }
                _ => return Err(Error::mismatch(format!("++ of {}", self.ty))),
            };
            session.emitter()?.build_store(self.addr, new)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod test {
    use cool_asserts::assert_matches;
    use rstest::rstest;

    use super::*;
    use crate::decl::{static_, static_fn};
    use crate::flow::return_;
    use crate::symbols::{local, var};
    use crate::test::{TestContext, test_ctx};

    #[rstest]
    fn access_paths_keep_mutability(_test_ctx: TestContext) {
        let i32_t = Type::int(32);
        let point = Type::named_struct("Pt", &[i32_t, i32_t], &["x", "y"]).unwrap();
        static_fn(i32_t.func(&[]).unwrap(), "paths", &[], || {
            let grid = local(point.array(3)?, "grid")?;
            let cell: Ref = grid.index(1)?.dot("y")?;
            cell.store(5)?;
            let read_only = grid.as_const().index(1)?.dot(1)?;
            assert_eq!(read_only.ty(), i32_t);
            let p = local(point.ptr(), "p")?;
            p.store(grid.index(2)?.address())?;
            p.arrow("x")?.store(&cell)?;
            return_(p.arrow(0))
        })
        .unwrap();
    }

    #[rstest]
    fn stores_widen_but_never_narrow(_test_ctx: TestContext) {
        static_fn(Type::void().func(&[]).unwrap(), "stores", &[], || {
            let wide = local(Type::int(64), "wide")?;
            let narrow = local(Type::int(8), "narrow")?;
            wide.store(&narrow)?;
            assert_matches!(narrow.store(&wide), Err(Error::TypeMismatch(_)));
            assert_matches!(narrow.store(1000), Err(Error::LiteralOutOfRange { .. }));
            narrow.update(BinaryOp::Add, &wide)?;
            Ok(())
        })
        .unwrap();
    }

    #[rstest]
    fn increments(test_ctx: TestContext) {
        static_fn(Type::void().func(&[]).unwrap(), "steps", &[], || {
            local(Type::int(32), "s")?.increment()?;
            local(Type::uint(32), "u")?.decrement()?;
            local(Type::f64(), "f")?.increment()?;
            local(Type::int(8).ptr(), "p")?.increment()?;
            Ok(())
        })
        .unwrap();
        let ir = test_ctx.module().llvm().print_to_string().to_string();
        assert!(ir.contains("add nsw i32"));
        assert!(ir.contains("sub i32"));
        assert!(ir.contains("fadd double"));
        assert!(ir.contains("getelementptr inbounds i8"));
    }

    #[rstest]
    fn globals_take_initializers(test_ctx: TestContext) {
        let counter = static_(Type::int(32), "counter").unwrap();
        counter.initialize(41).unwrap();
        assert_matches!(counter.initialize(1.5), Err(Error::BadLiteral { .. }));
        static_fn(Type::int(32).func(&[]).unwrap(), "bump", &[], || {
            let c = var("counter")?;
            c.increment()?;
            return_(&c)
        })
        .unwrap();
        let ir = test_ctx.module().llvm().print_to_string().to_string();
        assert!(ir.contains("@counter = internal global i32 41"));
    }

    #[rstest]
    fn functions_are_read_only(_test_ctx: TestContext) {
        let f = static_fn(Type::void().func(&[]).unwrap(), "noop", &[], || Ok(())).unwrap();
        assert!(f.function().is_ok());
        assert_eq!(f.load().unwrap().ty(), Type::void().func(&[]).unwrap().ptr());
        assert_matches!(f.initialize(0), Err(Error::TypeMismatch(_)));
    }
}
