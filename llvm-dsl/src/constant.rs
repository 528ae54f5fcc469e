//! Building IR constants from host literals.

use inkwell::module::Linkage;
use inkwell::types::{AnyTypeEnum, BasicTypeEnum};
use inkwell::values::{ArrayValue, BasicValue, BasicValueEnum};
use itertools::Itertools as _;

use crate::session::Session;
use crate::types::Type;
use crate::value::Value;
use crate::{Error, Result};

/// A host literal, not yet given an IR type.
///
/// Lists nest to any depth and describe multi-dimensional arrays or vectors;
/// tuples describe structs. Lists may also initialize structs, as brace
/// initializers do in C.
#[derive(Debug)]
#[non_exhaustive]
pub enum Literal {
    /// The null pointer.
    Null,
    /// An integer.
    Int(i128),
    /// A floating point number.
    Float(f64),
    /// A boolean.
    Bool(bool),
    /// A string: a zero terminated `i8` array, or a pointer to one.
    Str(String),
    /// The members of a struct.
    Tuple(Vec<Literal>),
    /// The elements of an array or vector.
    List(Vec<Literal>),
    /// An already built constant.
    Value(Value),
    /// A raw host address, for pointer types.
    Address(u64),
}

macro_rules! literal_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Literal {
            fn from(i: $t) -> Self {
                Literal::Int(i as i128)
            }
        })*
    };
}

literal_from_int!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, usize);

impl From<f32> for Literal {
    fn from(f: f32) -> Self {
        Literal::Float(f64::from(f))
    }
}

impl From<f64> for Literal {
    fn from(f: f64) -> Self {
        Literal::Float(f)
    }
}

impl From<bool> for Literal {
    fn from(b: bool) -> Self {
        Literal::Bool(b)
    }
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self {
        Literal::Str(s.to_owned())
    }
}

impl From<String> for Literal {
    fn from(s: String) -> Self {
        Literal::Str(s)
    }
}

impl From<Value> for Literal {
    fn from(v: Value) -> Self {
        Literal::Value(v)
    }
}

impl<T: Into<Literal>> From<Vec<T>> for Literal {
    fn from(items: Vec<T>) -> Self {
        Literal::List(items.into_iter().map_into().collect())
    }
}

impl<T: Into<Literal>, const N: usize> From<[T; N]> for Literal {
    fn from(items: [T; N]) -> Self {
        Literal::List(items.into_iter().map_into().collect())
    }
}

macro_rules! literal_from_tuple {
    ($($name:ident),+) => {
        impl<$($name: Into<Literal>),+> From<($($name,)+)> for Literal {
            #[allow(non_snake_case)]
            fn from(($($name,)+): ($($name,)+)) -> Self {
                Literal::Tuple(vec![$($name.into()),+])
            }
        }
    };
}

literal_from_tuple!(A);
literal_from_tuple!(A, B);
literal_from_tuple!(A, B, C);
literal_from_tuple!(A, B, C, D);
literal_from_tuple!(A, B, C, D, E);
literal_from_tuple!(A, B, C, D, E, F);

impl Literal {
    fn describe(&self) -> String {
        match self {
            Literal::Null => "null".into(),
            Literal::Int(i) => i.to_string(),
            Literal::Float(f) => f.to_string(),
            Literal::Bool(b) => b.to_string(),
            Literal::Str(s) => format!("{s:?}"),
            Literal::Tuple(_) => "tuple".into(),
            Literal::List(_) => "list".into(),
            Literal::Value(v) => format!("value of type {}", v.ty()),
            Literal::Address(a) => format!("address {a:#x}"),
        }
    }

    /// The type a literal takes when nothing else decides: `i32` (or a
    /// wider integer when needed), `double`, `bool`, a `char` array, `i8*`
    /// for null and addresses, and structs or arrays thereof.
    pub fn natural_type(&self) -> Result<Type> {
        Ok(match self {
            Literal::Null | Literal::Address(_) => Type::void().ptr(),
            Literal::Int(i) if i32::try_from(*i).is_ok() => Type::int(32),
            Literal::Int(i) if i64::try_from(*i).is_ok() => Type::int(64),
            Literal::Int(_) => Type::int(128),
            Literal::Float(_) => Type::f64(),
            Literal::Bool(_) => Type::bool(),
            Literal::Str(s) => Type::char().array(str_len(s)? + 1)?,
            Literal::Tuple(items) => {
                let members: Vec<Type> = items.iter().map(Literal::natural_type).try_collect()?;
                Type::anonymous_struct(&members)?
            }
            Literal::List(items) => {
                let first = items.first().ok_or_else(|| Error::BadLiteral {
                    ty: "unknown".into(),
                    reason: "an empty list has no natural type".into(),
                })?;
                first.natural_type()?.array(str_len_of(items.len())?)?
            }
            Literal::Value(v) => v.ty(),
        })
    }

    /// Builds the literal with its natural type.
    pub fn into_value(self) -> Result<Value> {
        let ty = self.natural_type()?;
        ty.constant(self)
    }
}

fn str_len(s: &str) -> Result<u32> {
    str_len_of(s.len())
}

fn str_len_of(n: usize) -> Result<u32> {
    u32::try_from(n).map_err(|_| Error::InvalidType(format!("array of {n} elements")))
}

impl Type {
    /// Builds a constant of this type from a host literal.
    ///
    /// An array type of length zero takes its length from the literal.
    pub fn constant(&self, literal: impl Into<Literal>) -> Result<Value> {
        let raw = build(*self, literal.into())?;
        let ty = if self.array_len() == Some(0) {
            Type::from_llvm(raw.get_type()).with_mask(self.mask())
        } else {
            *self
        };
        Ok(Value::new(raw, ty))
    }
}

fn bad_literal(ty: Type, reason: impl Into<String>) -> Error {
    Error::BadLiteral {
        ty: ty.to_string(),
        reason: reason.into(),
    }
}

fn out_of_range(ty: Type, literal: &Literal) -> Error {
    Error::LiteralOutOfRange {
        literal: literal.describe(),
        ty: ty.to_string(),
    }
}

fn build(ty: Type, literal: Literal) -> Result<BasicValueEnum<'static>> {
    match (ty.llvm(), literal) {
        (_, Literal::Value(v)) => {
            if !v.is_const() {
                return Err(bad_literal(ty, "value is not a constant"));
            }
            if v.ty().llvm() != ty.llvm() {
                return Err(Error::mismatch(format!(
                    "constant of type {} used for {ty}",
                    v.ty()
                )));
            }
            Ok(v.llvm())
        }
        (AnyTypeEnum::PointerType(p), Literal::Null | Literal::Int(0)) => {
            Ok(p.const_null().into())
        }
        (AnyTypeEnum::PointerType(p), Literal::Address(a)) => {
            let ctx = Session::current().context();
            Ok(ctx.i64_type().const_int(a, false).const_to_pointer(p).into())
        }
        (AnyTypeEnum::PointerType(_), Literal::Str(s)) => string_pointer(ty, &s),
        (AnyTypeEnum::IntType(t), Literal::Int(i)) => {
            let bits = t.get_bit_width();
            if !int_fits(i, bits, ty.leaf_unsigned()) {
                return Err(out_of_range(ty, &Literal::Int(i)));
            }
            Ok(int_const(t, i, bits).into())
        }
        (AnyTypeEnum::IntType(t), Literal::Bool(b)) => Ok(t.const_int(u64::from(b), false).into()),
        (AnyTypeEnum::FloatType(t), Literal::Int(i)) => Ok(t.const_float(i as f64).into()),
        (AnyTypeEnum::FloatType(t), Literal::Float(f)) => {
            let max = match ty.float_width() {
                Some(16) => 65504.0,
                Some(32) => f64::from(f32::MAX),
                _ => f64::MAX,
            };
            if f.is_finite() && f.abs() > max {
                return Err(out_of_range(ty, &Literal::Float(f)));
            }
            Ok(t.const_float(f).into())
        }
        (AnyTypeEnum::ArrayType(_), Literal::Str(s)) => string_array(ty, &s),
        (AnyTypeEnum::ArrayType(a), Literal::List(items)) => {
            let elem = element_of(ty)?;
            let len = a.len();
            if len != 0 && items.len() > len as usize {
                return Err(bad_literal(ty, format!("{} elements given", items.len())));
            }
            let mut values: Vec<_> = items.into_iter().map(|i| build(elem, i)).try_collect()?;
            let fill = zero(a.get_element_type());
            values.resize(values.len().max(len as usize), fill);
            Ok(const_array(a.get_element_type(), &values).into())
        }
        (AnyTypeEnum::VectorType(v), Literal::List(items)) => {
            let elem = ty.scalar_part();
            let lanes = v.get_size() as usize;
            if items.len() > lanes {
                return Err(bad_literal(ty, format!("{} lanes given", items.len())));
            }
            let mut values: Vec<_> = items.into_iter().map(|i| build(elem, i)).try_collect()?;
            values.resize(lanes, zero(v.get_element_type()));
            Ok(inkwell::types::VectorType::const_vector(&values).into())
        }
        (AnyTypeEnum::StructType(s), Literal::Tuple(items) | Literal::List(items)) => {
            if s.is_opaque() {
                return Err(bad_literal(ty, "struct is opaque"));
            }
            let count = s.count_fields() as usize;
            if items.len() > count {
                return Err(bad_literal(ty, format!("{} members given", items.len())));
            }
            let mut values = Vec::with_capacity(count);
            for (i, item) in items.into_iter().enumerate() {
                let member = ty
                    .member(i as u32)
                    .ok_or_else(|| bad_literal(ty, format!("no member {i}")))?;
                values.push(build(member, item)?);
            }
            values.extend(s.get_field_types().into_iter().skip(values.len()).map(zero));
            Ok(s.const_named_struct(&values).into())
        }
        (_, lit) => Err(bad_literal(ty, format!("cannot hold {}", lit.describe()))),
    }
}

fn element_of(ty: Type) -> Result<Type> {
    ty.element()
        .ok_or_else(|| bad_literal(ty, "no element type"))
}

/// Whether `i` is representable in an integer of `bits` bits.
pub(crate) fn int_fits(i: i128, bits: u32, unsigned: bool) -> bool {
    if bits >= 128 {
        return !unsigned || i >= 0;
    }
    if unsigned {
        i >= 0 && i < (1i128 << bits)
    } else {
        let half = 1i128 << (bits - 1);
        -half <= i && i < half
    }
}

fn int_const(
    t: inkwell::types::IntType<'static>,
    i: i128,
    bits: u32,
) -> inkwell::values::IntValue<'static> {
    if bits <= 64 {
        return t.const_int(i as u64, false);
    }
    let words = bits.div_ceil(64) as usize;
    let fill = if i < 0 { u64::MAX } else { 0 };
    let mut w = vec![fill; words];
    w[0] = i as u64;
    w[1] = (i >> 64) as u64;
    t.const_int_arbitrary_precision(&w)
}

fn string_bytes(ty: Type, s: &str) -> Result<()> {
    if ty.int_width() != Some(8) {
        return Err(bad_literal(ty, "strings need i8 elements"));
    }
    if s.as_bytes().contains(&0) {
        return Err(bad_literal(ty, "strings cannot contain NUL"));
    }
    Ok(())
}

fn string_array(ty: Type, s: &str) -> Result<BasicValueEnum<'static>> {
    let elem = element_of(ty)?;
    string_bytes(elem, s)?;
    let len = ty.array_len().unwrap_or(0) as usize;
    let bytes = s.as_bytes();
    let size = if len == 0 { bytes.len() + 1 } else { len };
    if bytes.len() > size {
        return Err(out_of_range(ty, &Literal::Str(s.to_owned())));
    }
    let i8_t = Session::current().context().i8_type();
    let mut chars = bytes
        .iter()
        .map(|b| i8_t.const_int(u64::from(*b), false))
        .collect_vec();
    chars.resize(size, i8_t.const_zero());
    Ok(i8_t.const_array(&chars).into())
}

fn string_pointer(ty: Type, s: &str) -> Result<BasicValueEnum<'static>> {
    let elem = element_of(ty)?;
    string_bytes(elem, s)?;
    let session = Session::current();
    let module = session.module()?;
    let text = session.context().const_string(s.as_bytes(), true);
    let global = module.llvm().add_global(text.get_type(), None, ".str");
    global.set_initializer(&text);
    global.set_constant(true);
    global.set_linkage(Linkage::Private);
    global.set_unnamed_addr(true);
    let ptr = ty.llvm().into_pointer_type();
    Ok(global.as_pointer_value().const_cast(ptr).as_basic_value_enum())
}

/// The zero constant of `ty`.
pub(crate) fn zero(ty: BasicTypeEnum<'static>) -> BasicValueEnum<'static> {
    match ty {
        BasicTypeEnum::ArrayType(t) => t.const_zero().into(),
        BasicTypeEnum::FloatType(t) => t.const_zero().into(),
        BasicTypeEnum::IntType(t) => t.const_zero().into(),
        BasicTypeEnum::PointerType(t) => t.const_zero().into(),
        BasicTypeEnum::StructType(t) => t.const_zero().into(),
        BasicTypeEnum::VectorType(t) => t.const_zero().into(),
        #[allow(unreachable_patterns)]
        _ => unreachable!("no other first-class types"),
    }
}

fn const_array(
    elem: BasicTypeEnum<'static>,
    values: &[BasicValueEnum<'static>],
) -> ArrayValue<'static> {
    match elem {
        BasicTypeEnum::ArrayType(t) => {
            t.const_array(&values.iter().map(|v| v.into_array_value()).collect_vec())
        }
        BasicTypeEnum::FloatType(t) => {
            t.const_array(&values.iter().map(|v| v.into_float_value()).collect_vec())
        }
        BasicTypeEnum::IntType(t) => {
            t.const_array(&values.iter().map(|v| v.into_int_value()).collect_vec())
        }
        BasicTypeEnum::PointerType(t) => {
            t.const_array(&values.iter().map(|v| v.into_pointer_value()).collect_vec())
        }
        BasicTypeEnum::StructType(t) => {
            t.const_array(&values.iter().map(|v| v.into_struct_value()).collect_vec())
        }
        BasicTypeEnum::VectorType(t) => {
            t.const_array(&values.iter().map(|v| v.into_vector_value()).collect_vec())
        }
        #[allow(unreachable_patterns)]
        _ => unreachable!("no other first-class types"),
    }
}

#[cfg(test)]
mod test {
    use cool_asserts::assert_matches;
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;
    use crate::test::{TestContext, test_ctx};

    #[rstest]
    fn scalars(_test_ctx: TestContext) {
        let c = Type::int(32).constant(-7).unwrap();
        assert_eq!(c.llvm().into_int_value().get_sign_extended_constant(), Some(-7));
        let b = Type::bool().constant(true).unwrap();
        assert_eq!(b.llvm().into_int_value().get_zero_extended_constant(), Some(1));
        let f = Type::f32().constant(1.5).unwrap();
        assert!(f.is_const());
        assert_eq!(Type::void().ptr().constant(Literal::Null).unwrap().ty(), Type::void().ptr());
    }

    #[rstest]
    fn range_errors(_test_ctx: TestContext) {
        assert_matches!(
            Type::int(8).constant(128),
            Err(Error::LiteralOutOfRange { .. })
        );
        assert_matches!(Type::uint(8).constant(-1), Err(Error::LiteralOutOfRange { .. }));
        assert_matches!(Type::f32().constant(1e300), Err(Error::LiteralOutOfRange { .. }));
        assert!(Type::uint(8).constant(255).is_ok());
    }

    #[rstest]
    fn wide_integers(_test_ctx: TestContext) {
        let c = Type::int(128).constant(i128::MIN).unwrap();
        assert_eq!(c.ty().int_width(), Some(128));
        assert!(Type::int(200).constant(-1).is_ok());
    }

    #[rstest]
    fn shape_mismatch(_test_ctx: TestContext) {
        let arr = Type::int(32).array(2).unwrap();
        assert_matches!(arr.constant(vec![1, 2, 3]), Err(Error::BadLiteral { .. }));
        assert_matches!(Type::int(32).constant(Literal::Null), Err(Error::BadLiteral { .. }));
        assert_matches!(Type::int(32).constant(1.5), Err(Error::BadLiteral { .. }));
        let st = Type::anonymous_struct(&[Type::int(8)]).unwrap();
        assert_matches!(st.constant((1, 2)), Err(Error::BadLiteral { .. }));
    }

    #[rstest]
    fn nested_lists(_test_ctx: TestContext) {
        let grid = Type::int(16).array(3).unwrap().array(2).unwrap();
        let c = grid.constant(vec![vec![1, 2, 3], vec![4, 5]]).unwrap();
        assert_eq!(c.ty(), grid);
        let cube = Type::int(8)
            .array(1)
            .and_then(|t| t.array(1))
            .and_then(|t| t.array(1))
            .and_then(|t| t.array(1))
            .unwrap();
        assert!(cube.constant(vec![vec![vec![vec![9]]]]).is_ok());
    }

    #[rstest]
    fn unsized_arrays_take_their_length(_test_ctx: TestContext) {
        let c = Type::int(32).array(0).unwrap().constant([1, 2, 3]).unwrap();
        assert_eq!(c.ty().array_len(), Some(3));
        let s = Type::char().array(0).unwrap().constant("hi").unwrap();
        assert_eq!(s.ty().array_len(), Some(3));
        let padded = Type::char().array(8).unwrap().constant("hi").unwrap();
        assert_eq!(padded.ty().array_len(), Some(8));
        assert_matches!(
            Type::char().array(1).unwrap().constant("hi"),
            Err(Error::LiteralOutOfRange { .. })
        );
    }

    #[rstest]
    fn strings_as_pointers_need_a_module(test_ctx: TestContext) {
        let p = Type::char().ptr().constant("hello").unwrap();
        assert!(p.ty().is_pointer());
        assert!(test_ctx.module().llvm().get_global(".str").is_some());
    }

    #[rstest]
    fn structs_from_tuples(_test_ctx: TestContext) {
        let st = Type::anonymous_struct(&[Type::int(32), Type::f64(), Type::bool()]).unwrap();
        let c = st.constant((1, 2.5, true)).unwrap();
        assert_eq!(c.ty(), st);
        let partial = st.constant(vec![7]).unwrap();
        assert!(partial.is_const());
    }

    #[rstest]
    fn natural_types(_test_ctx: TestContext) {
        assert_eq!(Literal::Int(3).natural_type().unwrap(), Type::int(32));
        assert_eq!(Literal::Int(1 << 40).natural_type().unwrap(), Type::int(64));
        assert_eq!(Literal::from(2.0).natural_type().unwrap(), Type::f64());
        assert_eq!(Literal::from("ab").natural_type().unwrap().array_len(), Some(3));
    }

    proptest! {
        #[test]
        fn integer_range_checks(bits in 1u32..=64, value in any::<i64>(), unsigned: bool) {
            let ty = if unsigned { Type::uint(bits) } else { Type::int(bits) };
            let value = i128::from(value);
            let (lo, hi) = if unsigned {
                (0, (1i128 << bits) - 1)
            } else {
                (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
            };
            let fits = lo <= value && value <= hi;
            prop_assert_eq!(ty.constant(value).is_ok(), fits);
        }
    }
}
