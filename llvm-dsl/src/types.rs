//! The [Type] façade over LLVM types.
//!
//! LLVM integers are signless, but the operators of this crate choose
//! between signed and unsigned instructions. A [Type] therefore pairs an
//! LLVM type with a signedness mask:
//!
//! * for integers, and for pointers, arrays and vectors whose innermost
//!   element is an integer, bit 0 is set when that integer is unsigned;
//! * for structs, bit `i` describes member `i`;
//! * for functions, bit 0 describes the return type and bit `i + 1`
//!   parameter `i`.
//!
//! The mask of a named struct lives in the [Session] so that every handle to
//! the same named struct agrees on it.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Mul;

use inkwell::AddressSpace;
use inkwell::types::{
    AnyType, AnyTypeEnum, AsTypeRef, BasicMetadataTypeEnum, BasicType, BasicTypeEnum,
    FloatType, StructType,
};
use inkwell::values::FunctionValue;
use itertools::Itertools as _;
use tracing::debug;

use crate::session::Session;
use crate::{Error, Result};

mod host;
pub use host::{HostSignature, HostType};

/// A handle to an IR type plus its signedness.
///
/// Two handles are equal when they denote the same uniqued LLVM type and
/// agree on signedness.
#[derive(Clone, Copy)]
pub struct Type {
    ir: AnyTypeEnum<'static>,
    unsigned: u64,
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        self.ir.as_type_ref() == other.ir.as_type_ref() && self.unsigned == other.unsigned
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.ir.as_type_ref() as usize).hash(state);
        self.unsigned.hash(state);
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_int() && self.leaf_unsigned() {
            write!(f, "unsigned ")?;
        }
        write!(f, "{}", self.ir.print_to_string().to_string())
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type({self})")
    }
}

fn context() -> &'static inkwell::context::Context {
    Session::current().context()
}

// LLVM's `IntegerType::MAX_INT_BITS`.
const MAX_INT_BITS: u32 = (1 << 24) - 1;

fn int_width_ok(bits: u32) -> bool {
    (1..=MAX_INT_BITS).contains(&bits)
}

/// The innermost element of a pointer, array or vector chain.
fn leaf(mut ir: AnyTypeEnum<'static>) -> AnyTypeEnum<'static> {
    loop {
        ir = match ir {
            AnyTypeEnum::PointerType(t) => t.get_element_type(),
            AnyTypeEnum::ArrayType(t) => t.get_element_type().as_any_type_enum(),
            AnyTypeEnum::VectorType(t) => t.get_element_type().as_any_type_enum(),
            other => return other,
        }
    }
}

impl Type {
    /// Wraps an LLVM type. Integers are taken to be signed, named structs
    /// recover the signedness recorded when they were completed.
    pub fn from_llvm(ir: impl AnyType<'static>) -> Type {
        let ir = ir.as_any_type_enum();
        let unsigned = match leaf(ir) {
            AnyTypeEnum::StructType(s) if s.get_name().is_some() => {
                Session::current().struct_mask(&s).unwrap_or(0)
            }
            _ => 0,
        };
        Type { ir, unsigned }
    }

    /// Wraps `ir`, marking its innermost integer element as unsigned when
    /// `unsigned` is set.
    pub(crate) fn scalar(ir: impl AnyType<'static>, unsigned: bool) -> Type {
        let t = Type::from_llvm(ir);
        match leaf(t.ir) {
            AnyTypeEnum::StructType(_) | AnyTypeEnum::FunctionType(_) => t,
            _ => Type {
                unsigned: u64::from(unsigned),
                ..t
            },
        }
    }

    /// The signed view of the type of `function`.
    pub(crate) fn of_function(function: FunctionValue<'static>) -> Type {
        Session::current()
            .signature(function)
            .unwrap_or_else(|| Type::from_llvm(function.get_type()))
    }

    /// Returns the wrapped LLVM type.
    pub fn llvm(&self) -> AnyTypeEnum<'static> {
        self.ir
    }

    pub(crate) fn mask(&self) -> u64 {
        self.unsigned
    }

    pub(crate) fn leaf_unsigned(&self) -> bool {
        self.unsigned & 1 != 0
    }

    pub(crate) fn with_mask(self, unsigned: u64) -> Type {
        Type { unsigned, ..self }
    }

    // ----- fundamental types -----

    /// `void`.
    pub fn void() -> Type {
        Type::from_llvm(context().void_type())
    }

    /// `i1`, unsigned.
    pub fn bool() -> Type {
        Type::scalar(context().bool_type(), true)
    }

    /// `char`: a signed `i8`.
    pub fn char() -> Type {
        Type::int(8)
    }

    /// `wchar_t` of the host: an unsigned `i16` on Windows, a signed `i32`
    /// elsewhere.
    pub fn wchar() -> Type {
        if cfg!(windows) {
            Type::uint(16)
        } else {
            Type::int(32)
        }
    }

    /// A signed integer of `bits` bits.
    ///
    /// # Panics
    ///
    /// If `bits` is zero or wider than LLVM allows. [`Type::int_of`] reports
    /// these as errors instead.
    pub fn int(bits: u32) -> Type {
        assert!(int_width_ok(bits), "no integer type of {bits} bits");
        Type::scalar(context().custom_width_int_type(bits), false)
    }

    /// An unsigned integer of `bits` bits.
    ///
    /// # Panics
    ///
    /// As [`Type::int`].
    pub fn uint(bits: u32) -> Type {
        assert!(int_width_ok(bits), "no integer type of {bits} bits");
        Type::scalar(context().custom_width_int_type(bits), true)
    }

    /// An integer of `bits` bits, failing with [`Error::InvalidType`] for
    /// widths LLVM cannot represent.
    pub fn int_of(bits: u32, unsigned: bool) -> Result<Type> {
        if !int_width_ok(bits) {
            return Err(Error::InvalidType(format!("integer of {bits} bits")));
        }
        Ok(Type::scalar(context().custom_width_int_type(bits), unsigned))
    }

    /// A floating point type of 16, 32, 64, 80 (x87) or 128 bits.
    pub fn float(bits: u32) -> Result<Type> {
        let ctx = context();
        let ft = match bits {
            16 => ctx.f16_type(),
            32 => ctx.f32_type(),
            64 => ctx.f64_type(),
            80 => ctx.x86_f80_type(),
            128 => ctx.f128_type(),
            _ => return Err(Error::InvalidType(format!("float of {bits} bits"))),
        };
        Ok(Type::from_llvm(ft))
    }

    /// `float`.
    pub fn f32() -> Type {
        Type::from_llvm(context().f32_type())
    }

    /// `double`.
    pub fn f64() -> Type {
        Type::from_llvm(context().f64_type())
    }

    // ----- compound types -----

    /// A pointer to this type. A pointer to `void` is an `i8*`.
    pub fn ptr(self) -> Type {
        let space = AddressSpace::default();
        let ir = match self.ir {
            AnyTypeEnum::VoidType(_) => context().i8_type().ptr_type(space).as_any_type_enum(),
            AnyTypeEnum::FunctionType(f) => f.ptr_type(space).as_any_type_enum(),
            other => match BasicTypeEnum::try_from(other) {
                Ok(b) => b.ptr_type(space).as_any_type_enum(),
                Err(()) => return Type::from_llvm(context().i8_type().ptr_type(space)),
            },
        };
        Type { ir, ..self }
    }

    /// An array of `len` elements of this type. A length of zero stands for
    /// an unsized `T[]`.
    pub fn array(self, len: u32) -> Result<Type> {
        let elem = self.element_slot("array")?;
        Ok(Type {
            ir: elem.array_type(len).as_any_type_enum(),
            ..self
        })
    }

    /// A vector of `lanes` elements of this integer, float or pointer type.
    pub fn vector(self, lanes: u32) -> Result<Type> {
        let ir = match self.ir {
            AnyTypeEnum::IntType(t) => t.vec_type(lanes).as_any_type_enum(),
            AnyTypeEnum::FloatType(t) => t.vec_type(lanes).as_any_type_enum(),
            AnyTypeEnum::PointerType(t) => t.vec_type(lanes).as_any_type_enum(),
            _ => return Err(Error::InvalidType(format!("vector of {self}"))),
        };
        if lanes == 0 {
            return Err(Error::InvalidType("vector of zero lanes".into()));
        }
        Ok(Type { ir, ..self })
    }

    /// The type of functions returning this type and taking `params`.
    pub fn func(self, params: &[Type]) -> Result<Type> {
        self.function_type(params, false)
    }

    /// As [`Type::func`], for functions taking extra variadic arguments.
    pub fn func_varargs(self, params: &[Type]) -> Result<Type> {
        self.function_type(params, true)
    }

    fn function_type(self, params: &[Type], varargs: bool) -> Result<Type> {
        let args: Vec<BasicMetadataTypeEnum<'static>> = params
            .iter()
            .map(|p| p.element_slot("parameter").map(Into::into))
            .try_collect()?;
        let ir = match self.ir {
            AnyTypeEnum::VoidType(v) => v.fn_type(&args, varargs),
            _ => self.element_slot("return")?.fn_type(&args, varargs),
        };
        let mut unsigned = u64::from(self.leaf_unsigned() && !self.is_void());
        for (i, p) in params.iter().enumerate().take(63) {
            unsigned |= u64::from(p.leaf_unsigned()) << (i + 1);
        }
        Ok(Type {
            ir: ir.as_any_type_enum(),
            unsigned,
        })
    }

    /// An anonymous struct with the given members.
    pub fn anonymous_struct(members: &[Type]) -> Result<Type> {
        let fields = Self::fields(members)?;
        let st = context().struct_type(&fields, false);
        Ok(Type {
            ir: st.as_any_type_enum(),
            unsigned: Self::member_mask(members),
        })
    }

    /// A named struct without a body, or the existing struct of that name.
    pub fn opaque_struct(name: &str) -> Type {
        let ctx = context();
        match ctx.get_struct_type(name) {
            Some(st) => Type::from_llvm(st),
            None => Type::from_llvm(ctx.opaque_struct_type(name)),
        }
    }

    /// A named struct with the given members and optional member names.
    ///
    /// If an opaque struct of that name exists it is completed. If a
    /// complete struct of that name exists it is returned when its members
    /// are the same, and is an error otherwise.
    pub fn named_struct(name: &str, members: &[Type], names: &[&str]) -> Result<Type> {
        if !names.is_empty() && names.len() != members.len() {
            return Err(Error::InvalidType(format!(
                "struct {name} has {} members but {} member names",
                members.len(),
                names.len()
            )));
        }
        let session = Session::current();
        let fields = Self::fields(members)?;
        let mask = Self::member_mask(members);
        let ctx = session.context();
        let st = match ctx.get_struct_type(name) {
            Some(st) if st.is_opaque() => st,
            Some(st) => {
                let same = st.get_field_types() == fields && session.struct_mask(&st).unwrap_or(0) == mask;
                let names_agree = names.is_empty()
                    || session
                        .member_names(&st)
                        .is_none_or(|known| known.iter().eq(names.iter().copied()));
                if same && names_agree {
                    return Ok(Type::from_llvm(st));
                }
                return Err(Error::mismatch(format!(
                    "struct {name} is already defined as {}",
                    st.print_to_string().to_string()
                )));
            }
            None => ctx.opaque_struct_type(name),
        };
        st.set_body(&fields, false);
        session.set_struct_mask(&st, mask);
        if !names.is_empty() {
            session.set_member_names(&st, names.iter().map(|n| n.to_string()).collect());
        }
        debug!(name, members = members.len(), "completed struct");
        Ok(Type::from_llvm(st))
    }

    fn fields(members: &[Type]) -> Result<Vec<BasicTypeEnum<'static>>> {
        members.iter().map(|m| m.element_slot("struct member")).collect()
    }

    fn member_mask(members: &[Type]) -> u64 {
        members
            .iter()
            .take(64)
            .enumerate()
            .fold(0, |m, (i, t)| m | (u64::from(t.leaf_unsigned()) << i))
    }

    fn element_slot(&self, what: &str) -> Result<BasicTypeEnum<'static>> {
        BasicTypeEnum::try_from(self.ir)
            .map_err(|()| Error::InvalidType(format!("{self} cannot be used as {what} type")))
    }

    /// The type as a first-class LLVM type.
    pub(crate) fn basic(&self) -> Result<BasicTypeEnum<'static>> {
        self.element_slot("a value")
    }

    // ----- inspection -----

    pub(crate) fn is_void(&self) -> bool {
        self.ir.is_void_type()
    }

    pub(crate) fn is_int(&self) -> bool {
        self.ir.is_int_type()
    }

    pub(crate) fn is_float(&self) -> bool {
        self.ir.is_float_type()
    }

    pub(crate) fn is_pointer(&self) -> bool {
        self.ir.is_pointer_type()
    }

    pub(crate) fn is_array(&self) -> bool {
        self.ir.is_array_type()
    }

    pub(crate) fn is_vector(&self) -> bool {
        self.ir.is_vector_type()
    }

    pub(crate) fn is_struct(&self) -> bool {
        self.ir.is_struct_type()
    }

    pub(crate) fn is_function(&self) -> bool {
        self.ir.is_function_type()
    }

    /// Integer width, for integers and vectors of integers.
    pub(crate) fn int_width(&self) -> Option<u32> {
        match self.scalar_part().ir {
            AnyTypeEnum::IntType(t) => Some(t.get_bit_width()),
            _ => None,
        }
    }

    /// Float width, for floats and vectors of floats.
    pub(crate) fn float_width(&self) -> Option<u32> {
        match self.scalar_part().ir {
            AnyTypeEnum::FloatType(t) => Some(float_bits(t)),
            _ => None,
        }
    }

    /// The lane type of a vector, or the type itself.
    pub(crate) fn scalar_part(&self) -> Type {
        match self.ir {
            AnyTypeEnum::VectorType(v) => Type {
                ir: v.get_element_type().as_any_type_enum(),
                ..*self
            },
            _ => *self,
        }
    }

    /// The number of lanes of a vector.
    pub(crate) fn lanes(&self) -> Option<u32> {
        match self.ir {
            AnyTypeEnum::VectorType(v) => Some(v.get_size()),
            _ => None,
        }
    }

    /// Element of a pointer, array or vector.
    pub(crate) fn element(&self) -> Option<Type> {
        let ir = match self.ir {
            AnyTypeEnum::PointerType(t) => t.get_element_type(),
            AnyTypeEnum::ArrayType(t) => t.get_element_type().as_any_type_enum(),
            AnyTypeEnum::VectorType(t) => t.get_element_type().as_any_type_enum(),
            _ => return None,
        };
        Some(Type { ir, ..*self })
    }

    /// Length of an array type.
    pub(crate) fn array_len(&self) -> Option<u32> {
        match self.ir {
            AnyTypeEnum::ArrayType(t) => Some(t.len()),
            _ => None,
        }
    }

    pub(crate) fn as_struct(&self) -> Option<StructType<'static>> {
        match self.ir {
            AnyTypeEnum::StructType(s) => Some(s),
            _ => None,
        }
    }

    /// Member `i` of a struct type.
    pub(crate) fn member(&self, i: u32) -> Option<Type> {
        let field = self.as_struct()?.get_field_type_at_index(i)?;
        Some(Type::scalar(field, i < 64 && (self.unsigned >> i) & 1 != 0))
    }

    /// Members of a complete struct type.
    pub(crate) fn members(&self) -> Result<Vec<Type>> {
        let st = self
            .as_struct()
            .ok_or_else(|| Error::mismatch(format!("{self} is not a struct")))?;
        if st.is_opaque() {
            return Err(Error::InvalidType(format!("{self} is opaque")));
        }
        Ok((0..st.count_fields())
            .filter_map(|i| self.member(i))
            .collect())
    }

    /// Return type of a function type.
    pub(crate) fn ret(&self) -> Result<Type> {
        let AnyTypeEnum::FunctionType(f) = self.ir else {
            return Err(Error::mismatch(format!("{self} is not a function type")));
        };
        Ok(match f.get_return_type() {
            Some(r) => Type::scalar(r, self.leaf_unsigned()),
            None => Type::void(),
        })
    }

    /// Parameter types of a function type.
    pub(crate) fn params(&self) -> Result<Vec<Type>> {
        let AnyTypeEnum::FunctionType(f) = self.ir else {
            return Err(Error::mismatch(format!("{self} is not a function type")));
        };
        Ok(f.get_param_types()
            .into_iter()
            .enumerate()
            .map(|(i, p)| Type::scalar(p, i < 63 && (self.unsigned >> (i + 1)) & 1 != 0))
            .collect())
    }

    pub(crate) fn is_varargs(&self) -> bool {
        matches!(self.ir, AnyTypeEnum::FunctionType(f) if f.is_var_arg())
    }

    /// Size in bits of scalars and vectors, used to validate bit casts.
    pub(crate) fn bit_size(&self) -> Option<u64> {
        match self.ir {
            AnyTypeEnum::IntType(t) => Some(u64::from(t.get_bit_width())),
            AnyTypeEnum::FloatType(t) => Some(u64::from(float_bits(t))),
            AnyTypeEnum::VectorType(v) => {
                let lane = self.scalar_part().bit_size()?;
                Some(lane * u64::from(v.get_size()))
            }
            _ => None,
        }
    }
}

/// Width of a floating point type.
pub(crate) fn float_bits(t: FloatType<'static>) -> u32 {
    let ctx = context();
    if t == ctx.f16_type() {
        16
    } else if t == ctx.f32_type() {
        32
    } else if t == ctx.f64_type() {
        64
    } else if t == ctx.x86_f80_type() {
        80
    } else {
        128
    }
}

impl Mul<u32> for Type {
    type Output = Type;

    /// `T * n` is a vector of `n` lanes of `T`.
    ///
    /// # Panics
    ///
    /// If `T` cannot be a vector element. See [`Type::vector`].
    fn mul(self, lanes: u32) -> Type {
        self.vector(lanes).unwrap_or_else(|e| panic!("{e}"))
    }
}

#[cfg(test)]
mod test {
    use cool_asserts::assert_matches;
    use rstest::rstest;

    use super::*;
    use crate::test::{TestContext, test_ctx};

    #[rstest]
    fn signedness_distinguishes_handles(_test_ctx: TestContext) {
        assert_eq!(Type::int(32), Type::int(32));
        assert_ne!(Type::int(32), Type::uint(32));
        assert_eq!(Type::int(32).llvm(), Type::uint(32).llvm());
        assert_eq!(Type::char(), Type::int(8));
        assert!(Type::bool().leaf_unsigned());
        assert_eq!(Type::uint(16).ptr().element(), Some(Type::uint(16)));
    }

    #[rstest]
    #[case(16)]
    #[case(32)]
    #[case(64)]
    #[case(80)]
    #[case(128)]
    fn float_widths(_test_ctx: TestContext, #[case] bits: u32) {
        let t = Type::float(bits).unwrap();
        assert_eq!(t.float_width(), Some(bits));
    }

    #[rstest]
    fn bad_float_width(_test_ctx: TestContext) {
        assert_matches!(Type::float(12), Err(Error::InvalidType(_)));
    }

    #[rstest]
    fn integer_widths(_test_ctx: TestContext) {
        assert_eq!(Type::int_of(17, true).unwrap(), Type::uint(17));
        assert_eq!(Type::uint(8).to_string(), "unsigned i8");
        assert_matches!(Type::int_of(0, false), Err(Error::InvalidType(_)));
        assert_matches!(Type::int_of(1 << 24, false), Err(Error::InvalidType(_)));
    }

    #[rstest]
    #[should_panic(expected = "no integer type of 0 bits")]
    fn zero_width_int_panics(_test_ctx: TestContext) {
        Type::int(0);
    }

    #[rstest]
    fn compound_types(_test_ctx: TestContext) {
        let i32_t = Type::int(32);
        let arr = i32_t.array(4).unwrap();
        assert_eq!(arr.to_string(), "[4 x i32]");
        assert_eq!(Type::void().ptr().to_string(), "i8*");
        let v = i32_t * 4;
        assert_eq!(v.lanes(), Some(4));
        assert_matches!(Type::void().array(3), Err(Error::InvalidType(_)));
        assert_matches!(arr.vector(2), Err(Error::InvalidType(_)));

        let f = Type::f64().func(&[i32_t, Type::uint(8).ptr()]).unwrap();
        assert_eq!(f.ret().unwrap(), Type::f64());
        assert_eq!(f.params().unwrap(), vec![i32_t, Type::uint(8).ptr()]);
        assert!(!f.is_varargs());
        assert!(i32_t.func_varargs(&[]).unwrap().is_varargs());
    }

    #[rstest]
    fn opaque_structs_complete_once(_test_ctx: TestContext) {
        let fwd = Type::opaque_struct("node");
        assert_matches!(fwd.members(), Err(Error::InvalidType(_)));
        let members = [Type::int(32), fwd.ptr()];
        let node = Type::named_struct("node", &members, &["value", "next"]).unwrap();
        assert_eq!(node.llvm(), fwd.llvm());
        assert_eq!(node.members().unwrap().len(), 2);
        // The same completion again is accepted.
        Type::named_struct("node", &members, &[]).unwrap();
        assert_matches!(
            Type::named_struct("node", &[Type::int(64)], &[]),
            Err(Error::TypeMismatch(_))
        );
        assert_matches!(
            Type::named_struct("pair", &[Type::int(8)], &["a", "b"]),
            Err(Error::InvalidType(_))
        );
    }

    #[rstest]
    fn named_struct_remembers_signedness(_test_ctx: TestContext) {
        let st = Type::named_struct("pixel", &[Type::uint(8), Type::int(8)], &[]).unwrap();
        let again = Type::opaque_struct("pixel");
        assert_eq!(st, again);
        assert_eq!(again.member(0), Some(Type::uint(8)));
        assert_eq!(again.member(1), Some(Type::int(8)));
    }
}
