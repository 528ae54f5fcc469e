//! Rvalues: the results of instructions and constants.
//!
//! A [Value] is never copied implicitly: like an SSA register it is produced
//! once and then moved into the operation that consumes it. Anything that
//! can stand where a value is expected implements [IntoOperand], which
//! covers values, [Ref]s (loaded on use), host literals and `Result`s of
//! any of these, so that fallible sub-expressions chain with `?` or without.

use std::fmt;

use inkwell::types::{AnyType, AnyTypeEnum, VectorType};
use inkwell::values::{
    AnyValue, AsValueRef, BasicMetadataValueEnum, BasicValue, BasicValueEnum, CallableValue,
    InstructionOpcode,
};
use itertools::Itertools as _;

use crate::constant::Literal;
use crate::reference::{ConstRef, Ref};
use crate::session::Session;
use crate::types::Type;
use crate::{Error, Result};

mod arith;
mod ops;

pub use arith::{binary, compare, logical_and, logical_not, logical_or, test, BinaryOp, CmpOp, ValueOps};
pub(crate) use arith::{coerce, convert_int, extend_index};

/// An IR value together with its signedness-aware type.
pub struct Value {
    raw: BasicValueEnum<'static>,
    ty: Type,
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let printed = self.raw.print_to_string().to_string();
        write!(f, "Value({})", printed.trim())
    }
}

impl Value {
    /// Pairs an LLVM value with the type it is viewed as.
    ///
    /// `ty` must denote the LLVM type of `raw`; only its signedness may differ.
    pub fn new(raw: BasicValueEnum<'static>, ty: Type) -> Value {
        debug_assert_eq!(
            raw.get_type().as_any_type_enum(),
            ty.llvm(),
            "value and type disagree"
        );
        Value { raw, ty }
    }

    /// Wraps an LLVM value, viewing its integers as signed.
    pub fn from_llvm(raw: impl BasicValue<'static>) -> Value {
        let raw = raw.as_basic_value_enum();
        Value {
            raw,
            ty: Type::from_llvm(raw.get_type()),
        }
    }

    /// The wrapped LLVM value.
    pub fn llvm(&self) -> BasicValueEnum<'static> {
        self.raw
    }

    /// The type of the value.
    pub fn ty(&self) -> Type {
        self.ty
    }

    /// Whether the value is a compile-time constant.
    pub fn is_const(&self) -> bool {
        match self.raw {
            BasicValueEnum::IntValue(v) => v.is_const(),
            BasicValueEnum::FloatValue(v) => v.is_const(),
            BasicValueEnum::PointerValue(v) => v.is_const(),
            BasicValueEnum::ArrayValue(v) => v.is_const(),
            BasicValueEnum::VectorValue(v) => v.is_const(),
            BasicValueEnum::StructValue(_) => {
                self.raw.as_instruction_value().is_none() && !is_parameter(self.raw)
            }
        }
    }

    /// The same value viewed with a different signedness.
    pub(crate) fn retyped(self, ty: Type) -> Value {
        Value { ty, ..self }
    }

    /// Element `index` of a pointer, array or vector.
    ///
    /// Pointers are offset and loaded from. Arrays indexed by a non-constant
    /// index are spilled to a stack slot first.
    pub fn index(self, index: impl IntoOperand) -> Result<Value> {
        let session = Session::current();
        session.check_local(self.raw)?;
        let index = index.into_operand()?.resolve(Some(Type::int(64)))?;
        if !index.ty.is_int() {
            return Err(Error::mismatch(format!("index of type {}", index.ty)));
        }
        let elem = self
            .ty
            .element()
            .ok_or_else(|| Error::mismatch(format!("{} cannot be indexed", self.ty)))?;
        match self.raw {
            BasicValueEnum::PointerValue(_) => self.offset(index)?.pointee()?.load(),
            BasicValueEnum::VectorValue(v) => {
                let raw = session.emitter()?.build_extract_element(
                    v,
                    index.raw.into_int_value(),
                    "",
                )?;
                Ok(Value::new(raw, elem))
            }
            BasicValueEnum::ArrayValue(a) => match index.raw.into_int_value().get_zero_extended_constant() {
                Some(i) if index.is_const() => {
                    let i = u32::try_from(i)
                        .map_err(|_| Error::mismatch(format!("index {i} out of range")))?;
                    let raw = session.emitter()?.build_extract_value(a, i, "")?;
                    Ok(Value::new(raw, elem))
                }
                _ => {
                    let slot = session.build_alloca(a.get_type().into(), "")?;
                    session.emitter()?.build_store(slot, a)?;
                    let spilled = Ref::local(slot, self.ty);
                    spilled.index(index)?.load()
                }
            },
            _ => Err(Error::mismatch(format!("{} cannot be indexed", self.ty))),
        }
    }

    /// Pointer arithmetic: this pointer moved by `count` elements.
    pub(crate) fn offset(self, count: Value) -> Result<Value> {
        let session = Session::current();
        let ptr = self.raw.into_pointer_value();
        let index = extend_index(count)?;
        // SAFETY: the result is only dereferenced by generated code.
        let raw = unsafe { session.emitter()?.build_in_bounds_gep(ptr, &[index], "")? };
        Ok(Value::new(raw.into(), self.ty))
    }

    /// The object this pointer points to.
    pub fn pointee(self) -> Result<Ref> {
        Session::current().check_local(self.raw)?;
        let BasicValueEnum::PointerValue(p) = self.raw else {
            return Err(Error::mismatch(format!("{} is not a pointer", self.ty)));
        };
        let pointee = self
            .ty
            .element()
            .ok_or_else(|| Error::mismatch(format!("{} is not a pointer", self.ty)))?;
        Ok(Ref::derived(p, pointee))
    }

    /// Member of a struct value, by index or by name.
    pub fn dot(self, member: impl Into<Member>) -> Result<Value> {
        let session = Session::current();
        session.check_local(self.raw)?;
        let BasicValueEnum::StructValue(s) = self.raw else {
            return Err(Error::mismatch(format!("{} is not a struct", self.ty)));
        };
        let (i, ty) = member.into().resolve(self.ty)?;
        let raw = session.emitter()?.build_extract_value(s, i, "")?;
        Ok(Value::new(raw, ty))
    }

    /// Member of the struct this pointer points to.
    pub fn arrow(self, member: impl Into<Member>) -> Result<Value> {
        self.pointee()?.dot(member)?.load()
    }

    /// Calls this function pointer and returns its result.
    ///
    /// Fails for functions returning `void`; use [`Value::call_void`] for those.
    pub fn call(self, args: impl Arguments) -> Result<Value> {
        let ret = self.function_type()?.ret()?;
        if ret.is_void() {
            return Err(Error::mismatch("a void call yields no value"));
        }
        let raw = Session::current()
            .atomically(|| self.emit_call(args))?
            .ok_or_else(|| Error::mismatch("a void call yields no value"))?;
        Ok(Value::new(raw, ret))
    }

    /// Calls this function pointer and discards any result.
    pub fn call_void(self, args: impl Arguments) -> Result<()> {
        Session::current()
            .atomically(|| self.emit_call(args))
            .map(drop)
    }

    fn function_type(&self) -> Result<Type> {
        self.ty
            .element()
            .filter(Type::is_function)
            .ok_or_else(|| Error::mismatch(format!("{} is not callable", self.ty)))
    }

    fn emit_call(self, args: impl Arguments) -> Result<Option<BasicValueEnum<'static>>> {
        let session = Session::current();
        session.check_local(self.raw)?;
        let fn_ty = self.function_type()?;
        let params = fn_ty.params()?;
        let args = args.into_operands()?;
        if args.len() < params.len() || (args.len() > params.len() && !fn_ty.is_varargs()) {
            return Err(Error::SignatureMismatch(format!(
                "{} takes {} arguments, {} given",
                fn_ty,
                params.len(),
                args.len()
            )));
        }
        let mut lowered: Vec<BasicMetadataValueEnum<'static>> = Vec::with_capacity(args.len());
        for (i, arg) in args.into_iter().enumerate() {
            let v = match params.get(i) {
                Some(&p) => {
                    let v = arg.resolve(Some(p))?;
                    coerce(v, p).map_err(|e| match e {
                        Error::TypeMismatch(m) => {
                            Error::SignatureMismatch(format!("argument {i}: {m}"))
                        }
                        other => other,
                    })?
                }
                None => promote_vararg(arg.resolve(None)?)?,
            };
            lowered.push(v.raw.into());
        }
        let callee = CallableValue::try_from(self.raw.into_pointer_value())
            .map_err(|()| Error::mismatch(format!("{} is not callable", self.ty)))?;
        let site = session.emitter()?.build_call(callee, &lowered, "")?;
        Ok(site.try_as_basic_value().left())
    }
}

fn is_parameter(raw: BasicValueEnum<'static>) -> bool {
    Session::current().current_function().is_some_and(|f| {
        f.get_param_iter()
            .any(|p| p.as_value_ref() == raw.as_value_ref())
    })
}

/// The default argument promotions for the variadic part of a call.
fn promote_vararg(v: Value) -> Result<Value> {
    match (v.ty.int_width(), v.ty.float_width()) {
        (Some(w), _) if w < 32 && !v.ty.is_vector() => {
            let to = if v.ty.leaf_unsigned() { Type::uint(32) } else { Type::int(32) };
            convert_int(v, to)
        }
        (_, Some(w)) if w < 64 && !v.ty.is_vector() => coerce(v, Type::f64()),
        _ => Ok(v),
    }
}

/// A struct member, by position or by name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Member {
    /// The member at this position.
    Index(usize),
    /// The member with this name.
    Name(String),
}

impl From<usize> for Member {
    fn from(i: usize) -> Self {
        Member::Index(i)
    }
}

impl From<&str> for Member {
    fn from(name: &str) -> Self {
        Member::Name(name.to_owned())
    }
}

impl From<String> for Member {
    fn from(name: String) -> Self {
        Member::Name(name)
    }
}

impl Member {
    /// The position and type of this member in `ty`.
    pub(crate) fn resolve(self, ty: Type) -> Result<(u32, Type)> {
        let st = ty
            .as_struct()
            .ok_or_else(|| Error::mismatch(format!("{ty} is not a struct")))?;
        let index = match self {
            Member::Index(i) => i,
            Member::Name(name) => Session::current()
                .member_names(&st)
                .and_then(|names| names.iter().position(|n| *n == name))
                .ok_or(Error::NameNotFound(name))?,
        };
        let index = u32::try_from(index).map_err(|_| Error::mismatch("member index"))?;
        let member = ty
            .member(index)
            .ok_or_else(|| Error::mismatch(format!("{ty} has no member {index}")))?;
        Ok((index, member))
    }
}

/// Something that stands where a value is expected.
#[derive(Debug)]
pub enum Operand {
    /// A value already built.
    Value(Value),
    /// An object, loaded when used.
    Place(ConstRef),
    /// A host literal, typed by the context it is used in.
    Literal(Literal),
}

impl Operand {
    /// Produces the value of the operand. Literals take the type `hint`
    /// when given, their natural type otherwise; arrays decay to pointers
    /// when a pointer is expected.
    pub(crate) fn resolve(self, hint: Option<Type>) -> Result<Value> {
        match self {
            Operand::Value(v) => {
                Session::current().check_local(v.raw)?;
                Ok(v)
            }
            Operand::Place(r) => match hint {
                Some(h) if h.is_pointer() && r.ty().is_array() => r.decay(),
                _ => r.load(),
            },
            Operand::Literal(lit) => match hint {
                Some(h) => literal_as(lit, h),
                None => lit.into_value(),
            },
        }
    }
}

/// Builds `lit` as a `ty`, splatting scalars across vector lanes.
fn literal_as(lit: Literal, ty: Type) -> Result<Value> {
    match (ty.llvm(), &lit) {
        (
            AnyTypeEnum::VectorType(v),
            Literal::Int(_) | Literal::Float(_) | Literal::Bool(_),
        ) => {
            let lane = ty.scalar_part().constant(lit)?;
            let lanes = vec![lane.raw; v.get_size() as usize];
            Ok(Value::new(VectorType::const_vector(&lanes).into(), ty))
        }
        _ => ty.constant(lit),
    }
}

/// Conversion into an [Operand].
pub trait IntoOperand {
    /// Performs the conversion.
    fn into_operand(self) -> Result<Operand>;
}

impl IntoOperand for Operand {
    fn into_operand(self) -> Result<Operand> {
        Ok(self)
    }
}

impl IntoOperand for Value {
    fn into_operand(self) -> Result<Operand> {
        Ok(Operand::Value(self))
    }
}

impl IntoOperand for ConstRef {
    fn into_operand(self) -> Result<Operand> {
        Ok(Operand::Place(self))
    }
}

impl IntoOperand for &ConstRef {
    fn into_operand(self) -> Result<Operand> {
        Ok(Operand::Place(self.clone()))
    }
}

impl IntoOperand for Ref {
    fn into_operand(self) -> Result<Operand> {
        Ok(Operand::Place(self.into_const()))
    }
}

impl IntoOperand for &Ref {
    fn into_operand(self) -> Result<Operand> {
        Ok(Operand::Place(self.as_const().clone()))
    }
}

impl IntoOperand for Literal {
    fn into_operand(self) -> Result<Operand> {
        Ok(Operand::Literal(self))
    }
}

impl<T: IntoOperand> IntoOperand for Result<T> {
    fn into_operand(self) -> Result<Operand> {
        self?.into_operand()
    }
}

macro_rules! literal_operand {
    ($($t:ty),*) => {
        $(impl IntoOperand for $t {
            fn into_operand(self) -> Result<Operand> {
                Ok(Operand::Literal(Literal::from(self)))
            }
        })*
    };
}

literal_operand!(
    i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, usize, f32, f64, bool, &str, String
);

/// The arguments of a call: a tuple of operands, or a `Vec` of them.
pub trait Arguments {
    /// Converts every argument, in order.
    fn into_operands(self) -> Result<Vec<Operand>>;
}

impl Arguments for () {
    fn into_operands(self) -> Result<Vec<Operand>> {
        Ok(Vec::new())
    }
}

impl<T: IntoOperand> Arguments for Vec<T> {
    fn into_operands(self) -> Result<Vec<Operand>> {
        self.into_iter().map(IntoOperand::into_operand).try_collect()
    }
}

macro_rules! tuple_arguments {
    ($($name:ident),+) => {
        impl<$($name: IntoOperand),+> Arguments for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_operands(self) -> Result<Vec<Operand>> {
                let ($($name,)+) = self;
                Ok(vec![$($name.into_operand()?),+])
            }
        }
    };
}

tuple_arguments!(A);
tuple_arguments!(A, B);
tuple_arguments!(A, B, C);
tuple_arguments!(A, B, C, D);
tuple_arguments!(A, B, C, D, E);
tuple_arguments!(A, B, C, D, E, F);
tuple_arguments!(A, B, C, D, E, F, G);
tuple_arguments!(A, B, C, D, E, F, G, H);

/// Emits a conversion instruction, folded when `v` is constant.
pub(crate) fn build_cast(op: InstructionOpcode, v: Value, to: Type) -> Result<Value> {
    let raw = Session::current()
        .emitter()?
        .build_cast(op, v.raw, to.basic()?, "")?;
    Ok(Value::new(raw, to))
}

#[cfg(test)]
mod test {
    use cool_asserts::assert_matches;
    use rstest::rstest;

    use super::*;
    use crate::decl::static_fn;
    use crate::flow::return_;
    use crate::symbols::local;
    use crate::test::{TestContext, test_ctx};

    #[rstest]
    fn literals_take_the_hinted_type(_test_ctx: TestContext) {
        let v = 7u8.into_operand().unwrap().resolve(Some(Type::int(64))).unwrap();
        assert_eq!(v.ty(), Type::int(64));
        assert!(v.is_const());
        let splat = 1i32
            .into_operand()
            .unwrap()
            .resolve(Some(Type::f32() * 4))
            .unwrap();
        assert_eq!(splat.ty(), Type::f32() * 4);
        assert_matches!(
            300i32.into_operand().unwrap().resolve(Some(Type::int(8))),
            Err(Error::LiteralOutOfRange { .. })
        );
    }

    #[rstest]
    fn members_by_name_and_position(_test_ctx: TestContext) {
        let i32_t = Type::int(32);
        let point = Type::named_struct("Point", &[i32_t, Type::f64()], &["x", "y"]).unwrap();
        assert_eq!(Member::from("y").resolve(point).unwrap(), (1, Type::f64()));
        assert_eq!(Member::from(0).resolve(point).unwrap(), (0, i32_t));
        assert_matches!(
            Member::from("z").resolve(point),
            Err(Error::NameNotFound(n)) => assert_eq!(n, "z")
        );
        assert_matches!(Member::from(2).resolve(point), Err(Error::TypeMismatch(_)));
    }

    #[rstest]
    fn struct_values_and_calls(_test_ctx: TestContext) {
        let i32_t = Type::int(32);
        let pair = Type::anonymous_struct(&[i32_t, i32_t]).unwrap();
        let swap = static_fn(pair.func(&[pair]).unwrap(), "swap", &["p"], || {
            let p = crate::symbols::var("p")?;
            let out = local(pair, "out")?;
            out.dot(0)?.store(p.dot(1)?)?;
            out.dot(1)?.store(p.dot(0)?)?;
            return_(out)
        })
        .unwrap();
        static_fn(i32_t.func(&[]).unwrap(), "use_swap", &[], || {
            let swapped = swap.load()?.call((pair.constant((1, 2))?,))?;
            assert!(!swapped.is_const());
            return_(swapped.dot(0))
        })
        .unwrap();
    }

    #[rstest]
    fn calls_check_their_arguments(_test_ctx: TestContext) {
        let i32_t = Type::int(32);
        let f = crate::decl::declare_fn(i32_t.func(&[Type::int(64)]).unwrap(), "f").unwrap();
        let g = crate::decl::declare_fn(Type::void().func(&[]).unwrap(), "g").unwrap();
        static_fn(Type::void().func(&[]).unwrap(), "caller", &[], || {
            assert_matches!(f.load()?.call(()), Err(Error::SignatureMismatch(_)));
            assert_matches!(
                f.load()?.call((Type::f64().constant(1.0)?,)),
                Err(Error::SignatureMismatch(_))
            );
            let narrow = local(Type::int(16), "narrow")?;
            assert_eq!(f.load()?.call((&narrow,))?.ty(), i32_t);
            assert_matches!(g.load()?.call(()), Err(Error::TypeMismatch(_)));
            g.load()?.call_void(())
        })
        .unwrap();
    }
}
