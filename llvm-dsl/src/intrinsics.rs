//! Layout queries and conversions.
//!
//! `sizeof_`, `alignof_` and `offsetof_` are constant expressions of type
//! `u64` built on null-pointer arithmetic, so they need no target layout
//! and fold once one is known. The casts follow C: [`static_cast_`]
//! converts numbers by value, [`reinterpret_cast_`] keeps the bits.

use inkwell::AddressSpace;
use inkwell::types::{BasicType, BasicTypeEnum};
use inkwell::values::InstructionOpcode;

use crate::reference::{ConstRef, Ref};
use crate::session::Session;
use crate::types::Type;
use crate::value::{IntoOperand, Member, Value, build_cast, convert_int, test};
use crate::{Error, Result};

/// `sizeof(ty)`, in bytes.
pub fn sizeof_(ty: Type) -> Result<Value> {
    let size = ty
        .basic()?
        .size_of()
        .ok_or_else(|| Error::InvalidType(format!("{ty} has no size")))?;
    Ok(Value::new(size.into(), Type::uint(64)))
}

/// `alignof(ty)`, in bytes.
pub fn alignof_(ty: Type) -> Result<Value> {
    let align = match ty.basic()? {
        BasicTypeEnum::ArrayType(t) => t.get_alignment(),
        BasicTypeEnum::FloatType(t) => t.get_alignment(),
        BasicTypeEnum::IntType(t) => t.get_alignment(),
        BasicTypeEnum::PointerType(t) => t.get_alignment(),
        BasicTypeEnum::StructType(t) if !t.is_opaque() => t.get_alignment(),
        BasicTypeEnum::VectorType(t) => t.get_alignment(),
        BasicTypeEnum::StructType(_) => {
            return Err(Error::InvalidType(format!("{ty} has no alignment")));
        }
    };
    Ok(Value::new(align.into(), Type::uint(64)))
}

/// `offsetof(ty, member)`, in bytes, for a struct type.
pub fn offsetof_(ty: Type, member: impl Into<Member>) -> Result<Value> {
    let (index, _) = member.into().resolve(ty)?;
    let context = Session::current().context();
    let i32_t = context.i32_type();
    let null = ty.basic()?.ptr_type(AddressSpace::default()).const_null();
    // SAFETY: the constant address is never dereferenced.
    let member = unsafe {
        null.const_gep(&[i32_t.const_zero(), i32_t.const_int(u64::from(index), false)])
    };
    let offset = member.const_to_int(context.i64_type());
    Ok(Value::new(offset.into(), Type::uint(64)))
}

/// Anything with a type: values and the objects references refer to.
pub trait Typed {
    /// The type of the value, or of the referenced object.
    fn type_of(&self) -> Type;
}

impl Typed for Value {
    fn type_of(&self) -> Type {
        self.ty()
    }
}

impl Typed for ConstRef {
    fn type_of(&self) -> Type {
        self.ty()
    }
}

impl Typed for Ref {
    fn type_of(&self) -> Type {
        self.ty()
    }
}

/// `decltype(x)`
pub fn typeof_(x: &impl Typed) -> Type {
    x.type_of()
}

/// How a value of one type becomes a value of another.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Conversion {
    Retype,
    Integer,
    Truth,
    Cast(InstructionOpcode),
}

fn static_conversion(from: Type, to: Type) -> Option<Conversion> {
    use InstructionOpcode as Op;

    if from.llvm() == to.llvm() {
        return Some(Conversion::Retype);
    }
    if from.lanes() != to.lanes() {
        return None;
    }
    let (src, dst) = (from.scalar_part(), to.scalar_part());
    let conversion = match (src.int_width(), dst.int_width()) {
        (Some(w), Some(1)) if w != 1 && !from.is_vector() => Conversion::Truth,
        (Some(_), Some(_)) => Conversion::Integer,
        (Some(_), None) if dst.is_float() => {
            Conversion::Cast(if src.leaf_unsigned() { Op::UIToFP } else { Op::SIToFP })
        }
        (None, Some(_)) if src.is_float() => {
            Conversion::Cast(if dst.leaf_unsigned() { Op::FPToUI } else { Op::FPToSI })
        }
        (Some(_), None) if dst.is_pointer() => Conversion::Cast(Op::IntToPtr),
        (None, Some(_)) if src.is_pointer() => Conversion::Cast(Op::PtrToInt),
        _ => match (src.float_width(), dst.float_width()) {
            (Some(a), Some(b)) if a < b => Conversion::Cast(Op::FPExt),
            (Some(_), Some(_)) => Conversion::Cast(Op::FPTrunc),
            _ if src.is_pointer() && dst.is_pointer() => Conversion::Cast(Op::BitCast),
            _ => return None,
        },
    };
    Some(conversion)
}

fn reinterpret_conversion(from: Type, to: Type) -> Option<Conversion> {
    use InstructionOpcode as Op;

    if from.llvm() == to.llvm() {
        return Some(Conversion::Retype);
    }
    let is_word = |t: Type| t.int_width() == Some(64) && !t.is_vector();
    let op = match (from.is_pointer(), to.is_pointer()) {
        (true, true) => Op::BitCast,
        (true, false) if is_word(to) => Op::PtrToInt,
        (false, true) if is_word(from) => Op::IntToPtr,
        (false, false) if from.bit_size().is_some() && from.bit_size() == to.bit_size() => {
            Op::BitCast
        }
        _ => return None,
    };
    Some(Conversion::Cast(op))
}

fn convert(v: Value, to: Type, conversion: Conversion) -> Result<Value> {
    match conversion {
        Conversion::Retype => Ok(v.retyped(to)),
        Conversion::Integer => convert_int(v, to),
        Conversion::Truth => Ok(test(v)?.retyped(to)),
        Conversion::Cast(op) => build_cast(op, v, to),
    }
}

/// Converts `v` to `to` by value, as a C cast between arithmetic and
/// pointer types does.
///
/// Integers are truncated or extended by their own signedness, integers
/// and floats convert by the signedness of the integer side, a conversion
/// to `bool` compares against zero, and pointers convert to and from
/// integers and to other pointers. Vectors convert lane by lane.
pub fn static_cast_(v: impl IntoOperand, to: Type) -> Result<Value> {
    Session::current().atomically(|| {
        let v = v.into_operand()?.resolve(Some(to))?;
        let conversion = static_conversion(v.ty(), to)
            .ok_or_else(|| Error::mismatch(format!("cannot cast {} to {to}", v.ty())))?;
        convert(v, to, conversion)
    })
}

/// Reinterprets the bits of `v` as a `to`.
///
/// Both types must have the same size. Pointers may be reinterpreted as
/// other pointers and as 64-bit integers.
pub fn reinterpret_cast_(v: impl IntoOperand, to: Type) -> Result<Value> {
    Session::current().atomically(|| {
        let v = v.into_operand()?.resolve(Some(to))?;
        let conversion = reinterpret_conversion(v.ty(), to)
            .ok_or_else(|| Error::mismatch(format!("cannot reinterpret {} as {to}", v.ty())))?;
        convert(v, to, conversion)
    })
}

impl Type {
    /// `T(v)`: a [`static_cast_`] where one exists, a
    /// [`reinterpret_cast_`] otherwise.
    pub fn cast(&self, v: impl IntoOperand) -> Result<Value> {
        let to = *self;
        Session::current().atomically(|| {
            let v = v.into_operand()?.resolve(Some(to))?;
            let conversion = static_conversion(v.ty(), to)
                .or_else(|| reinterpret_conversion(v.ty(), to))
                .ok_or_else(|| Error::mismatch(format!("cannot cast {} to {to}", v.ty())))?;
            convert(v, to, conversion)
        })
    }
}

#[cfg(test)]
mod test {
    use cool_asserts::assert_matches;
    use rstest::rstest;

    use super::*;
    use crate::decl::static_fn;
    use crate::flow::return_;
    use crate::symbols::{local, var};
    use crate::test::{TestContext, test_ctx};

    fn printed(ctx: &TestContext) -> String {
        ctx.module().llvm().print_to_string().to_string()
    }

    #[rstest]
    fn layout_queries_are_constants(_test_ctx: TestContext) {
        let p = Type::named_struct("P", &[Type::int(32), Type::int(64), Type::int(8)], &["a", "b", "c"])
            .unwrap();
        for v in [sizeof_(p), alignof_(p), offsetof_(p, "b"), offsetof_(p, 2)] {
            let v = v.unwrap();
            assert!(v.is_const());
            assert_eq!(v.ty(), Type::uint(64));
        }
        assert_matches!(offsetof_(p, "d"), Err(Error::NameNotFound(_)));
        assert_matches!(offsetof_(Type::int(32), 0), Err(Error::TypeMismatch(_)));
        assert_matches!(sizeof_(Type::opaque_struct("Hidden")), Err(Error::InvalidType(_)));
        assert_matches!(sizeof_(Type::void()), Err(Error::InvalidType(_)));
    }

    #[rstest]
    fn typeof_follows_the_handle(_test_ctx: TestContext) {
        static_fn(Type::void().func(&[]).unwrap(), "types", &[], || {
            let r = local(Type::uint(16), "r")?;
            assert_eq!(typeof_(&r), Type::uint(16));
            assert_eq!(typeof_(&r.address()), Type::uint(16).ptr());
            assert_eq!(typeof_(r.as_const()), Type::uint(16));
            Ok(())
        })
        .unwrap();
    }

    #[rstest]
    #[case::sign_extend(Type::int(8), Type::int(32), "sext i8")]
    #[case::zero_extend(Type::uint(8), Type::int(32), "zext i8")]
    #[case::truncate(Type::int(64), Type::uint(16), "trunc i64")]
    #[case::signed_to_float(Type::int(32), Type::f64(), "sitofp i32")]
    #[case::unsigned_to_float(Type::uint(32), Type::f32(), "uitofp i32")]
    #[case::float_to_unsigned(Type::f64(), Type::uint(8), "fptoui double")]
    #[case::float_to_signed(Type::f32(), Type::int(64), "fptosi float")]
    #[case::narrow_float(Type::f64(), Type::f32(), "fptrunc double")]
    #[case::pointer_to_int(Type::int(8).ptr(), Type::uint(64), "ptrtoint i8*")]
    #[case::int_to_pointer(Type::int(64), Type::f64().ptr(), "inttoptr i64")]
    #[case::pointer_to_pointer(Type::int(8).ptr(), Type::int(32).ptr(), "bitcast i8*")]
    #[case::to_bool(Type::int(32), Type::bool(), "icmp ne i32")]
    fn static_casts(
        test_ctx: TestContext,
        #[case] from: Type,
        #[case] to: Type,
        #[case] expected: &str,
    ) {
        static_fn(Type::void().func(&[from]).unwrap(), "cast", &["x"], || {
            let v = static_cast_(var("x"), to)?;
            assert_eq!(v.ty(), to);
            Ok(())
        })
        .unwrap();
        assert!(printed(&test_ctx).contains(expected), "{expected}");
    }

    #[rstest]
    fn reinterpretation_keeps_the_size(test_ctx: TestContext) {
        static_fn(Type::void().func(&[Type::f32()]).unwrap(), "bits", &["x"], || {
            let bits = reinterpret_cast_(var("x"), Type::uint(32))?;
            assert_eq!(bits.ty(), Type::uint(32));
            assert_matches!(
                reinterpret_cast_(var("x"), Type::int(64)),
                Err(Error::TypeMismatch(_))
            );
            assert_matches!(
                static_cast_(var("x"), Type::f32().array(1)?),
                Err(Error::TypeMismatch(_))
            );
            Ok(())
        })
        .unwrap();
        assert!(printed(&test_ctx).contains("bitcast float"));
    }

    #[rstest]
    fn c_style_casts_fall_back_to_bits(test_ctx: TestContext) {
        let v4 = Type::int(8) * 4;
        static_fn(Type::int(32).func(&[v4]).unwrap(), "pack", &["v"], || {
            let by_value = Type::f64().cast(2)?;
            assert_eq!(by_value.ty(), Type::f64());
            return_(Type::int(32).cast(var("v")))
        })
        .unwrap();
        assert!(printed(&test_ctx).contains("bitcast <4 x i8>"));
    }
}
