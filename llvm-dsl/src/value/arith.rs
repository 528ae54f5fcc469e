//! Arithmetic, comparisons and the implicit conversions between operands.
//!
//! Operands of different integer widths are widened to the wider one, each
//! extended according to its own signedness. At equal width an unsigned
//! operand makes the operation unsigned. Floats widen to the wider float;
//! integers and floats never mix implicitly.

use inkwell::builder::Builder;
use inkwell::values::{
    BasicValue, BasicValueEnum, FloatMathValue, InstructionOpcode, IntMathValue, IntValue,
};
use inkwell::{FloatPredicate, IntPredicate};
use strum::{Display, EnumIter};

use super::{IntoOperand, Operand, Value, build_cast};
use crate::session::Session;
use crate::types::Type;
use crate::{Error, Result};

/// Binary arithmetic and bitwise operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter)]
#[non_exhaustive]
pub enum BinaryOp {
    /// `+`; offsets pointers.
    Add,
    /// `-`; offsets pointers.
    Sub,
    /// `*`
    Mul,
    /// `/`, signed or unsigned.
    Div,
    /// `%`, signed or unsigned.
    Rem,
    /// `&`
    And,
    /// `|`
    Or,
    /// `^`
    Xor,
    /// `<<`
    Shl,
    /// `>>`: arithmetic for signed operands, logical for unsigned ones.
    Shr,
}

/// Comparison operators. Their results are `bool`, or vectors of `bool`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter)]
#[non_exhaustive]
pub enum CmpOp {
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `==`
    Eq,
    /// `!=`; true for unordered floats.
    Ne,
}

impl CmpOp {
    fn int_predicate(self, unsigned: bool) -> IntPredicate {
        match (self, unsigned) {
            (CmpOp::Eq, _) => IntPredicate::EQ,
            (CmpOp::Ne, _) => IntPredicate::NE,
            (CmpOp::Lt, false) => IntPredicate::SLT,
            (CmpOp::Le, false) => IntPredicate::SLE,
            (CmpOp::Gt, false) => IntPredicate::SGT,
            (CmpOp::Ge, false) => IntPredicate::SGE,
            (CmpOp::Lt, true) => IntPredicate::ULT,
            (CmpOp::Le, true) => IntPredicate::ULE,
            (CmpOp::Gt, true) => IntPredicate::UGT,
            (CmpOp::Ge, true) => IntPredicate::UGE,
        }
    }

    fn float_predicate(self) -> FloatPredicate {
        match self {
            CmpOp::Eq => FloatPredicate::OEQ,
            CmpOp::Ne => FloatPredicate::UNE,
            CmpOp::Lt => FloatPredicate::OLT,
            CmpOp::Le => FloatPredicate::OLE,
            CmpOp::Gt => FloatPredicate::OGT,
            CmpOp::Ge => FloatPredicate::OGE,
        }
    }
}

/// Resolves both operands in order, typing a literal after the other side. Next to a
/// pointer a literal is an `i64` offset when `offsets` is set, a pointer
/// otherwise.
fn resolve_pair(lhs: Operand, rhs: Operand, offsets: bool) -> Result<(Value, Value)> {
    let hint_for = |ty: Type| if offsets && ty.is_pointer() { Type::int(64) } else { ty };
    match (lhs, rhs) {
        (lhs @ Operand::Literal(_), rhs) if !matches!(rhs, Operand::Literal(_)) => {
            let rhs = rhs.resolve(None)?;
            let lhs = lhs.resolve(Some(hint_for(rhs.ty)))?;
            Ok((lhs, rhs))
        }
        (lhs, rhs) => {
            let lhs = lhs.resolve(None)?;
            let rhs = rhs.resolve(Some(hint_for(lhs.ty)))?;
            Ok((lhs, rhs))
        }
    }
}

/// Brings two operands to a common type.
pub(crate) fn unify(a: Value, b: Value) -> Result<(Value, Value)> {
    if a.ty == b.ty {
        return Ok((a, b));
    }
    let (ta, tb) = (a.ty, b.ty);
    let mismatch = move || Error::mismatch(format!("{ta} and {tb}"));
    if a.ty.lanes() != b.ty.lanes() {
        return Err(mismatch());
    }
    match (a.ty.int_width(), b.ty.int_width(), a.ty.float_width(), b.ty.float_width()) {
        (Some(wa), Some(wb), ..) if wa > wb => {
            let to = a.ty;
            Ok((a, convert_int(b, to)?))
        }
        (Some(wa), Some(wb), ..) if wa < wb => {
            let to = b.ty;
            Ok((convert_int(a, to)?, b))
        }
        (Some(_), Some(_), ..) => {
            let to = a.ty.with_mask(1);
            Ok((a.retyped(to), b.retyped(to)))
        }
        (.., Some(wa), Some(wb)) if wa >= wb => {
            let to = a.ty;
            Ok((a, coerce(b, to)?))
        }
        (.., Some(_), Some(_)) => {
            let to = b.ty;
            Ok((coerce(a, to)?, b))
        }
        _ if a.ty.llvm() == b.ty.llvm() => {
            let to = a.ty;
            Ok((a, b.retyped(to)))
        }
        _ => Err(mismatch()),
    }
}

/// Resizes an integer (or integer vector) to `to`, extending by the
/// signedness of `v`.
pub(crate) fn convert_int(v: Value, to: Type) -> Result<Value> {
    let (Some(from_w), Some(to_w)) = (v.ty.int_width(), to.int_width()) else {
        return Err(Error::mismatch(format!("{} to {to}", v.ty)));
    };
    let op = if from_w == to_w {
        return Ok(v.retyped(to));
    } else if from_w > to_w {
        InstructionOpcode::Trunc
    } else if v.ty.leaf_unsigned() {
        InstructionOpcode::ZExt
    } else {
        InstructionOpcode::SExt
    };
    build_cast(op, v, to)
}

/// The implicit conversion applied to stored values, arguments and
/// returned values: identity up to signedness, or widening.
pub(crate) fn coerce(v: Value, to: Type) -> Result<Value> {
    if v.ty.llvm() == to.llvm() {
        return Ok(v.retyped(to));
    }
    let fail = |v: &Value| Error::mismatch(format!("cannot convert {} to {to}", v.ty));
    if v.ty.lanes() != to.lanes() {
        return Err(fail(&v));
    }
    match (v.ty.int_width(), to.int_width(), v.ty.float_width(), to.float_width()) {
        (Some(from), Some(into), ..) if from < into => convert_int(v, to),
        (.., Some(from), Some(into)) if from < into => build_cast(InstructionOpcode::FPExt, v, to),
        _ => Err(fail(&v)),
    }
}

/// An integer value as a 64-bit `getelementptr` index.
pub(crate) fn extend_index(v: Value) -> Result<IntValue<'static>> {
    if !v.ty.is_int() {
        return Err(Error::mismatch(format!("index of type {}", v.ty)));
    }
    let to = if v.ty.leaf_unsigned() { Type::uint(64) } else { Type::int(64) };
    let v = if v.ty.int_width() < Some(64) { convert_int(v, to)? } else { v };
    Ok(v.llvm().into_int_value())
}

/// Applies a binary operator.
pub fn binary(op: BinaryOp, lhs: impl IntoOperand, rhs: impl IntoOperand) -> Result<Value> {
    Session::current().atomically(|| emit_binary(op, lhs, rhs))
}

fn emit_binary(op: BinaryOp, lhs: impl IntoOperand, rhs: impl IntoOperand) -> Result<Value> {
    let lhs = lhs.into_operand()?;
    let rhs = rhs.into_operand()?;
    let (a, b) = resolve_pair(lhs, rhs, true)?;
    match (op, a.ty.is_pointer(), b.ty.is_pointer()) {
        (BinaryOp::Add, true, false) => return a.offset(b),
        (BinaryOp::Add, false, true) => return b.offset(a),
        (BinaryOp::Sub, true, false) => {
            let neg = negate(b)?;
            return a.offset(neg);
        }
        (_, true, _) | (_, _, true) => {
            return Err(Error::mismatch(format!("{op} of {} and {}", a.ty, b.ty)));
        }
        _ => {}
    }
    let (a, b) = if matches!(op, BinaryOp::Shl | BinaryOp::Shr) {
        let to = a.ty;
        (a, convert_int(b, to)?)
    } else {
        unify(a, b)?
    };
    let ty = a.ty;
    let builder = Session::current().emitter()?;
    let raw = match (a.llvm(), b.llvm()) {
        (BasicValueEnum::IntValue(x), BasicValueEnum::IntValue(y)) => {
            int_binop(builder, op, ty.leaf_unsigned(), x, y)?
        }
        (BasicValueEnum::FloatValue(x), BasicValueEnum::FloatValue(y)) => {
            float_binop(builder, op, ty, x, y)?
        }
        (BasicValueEnum::VectorValue(x), BasicValueEnum::VectorValue(y))
            if ty.int_width().is_some() =>
        {
            int_binop(builder, op, ty.leaf_unsigned(), x, y)?
        }
        (BasicValueEnum::VectorValue(x), BasicValueEnum::VectorValue(y))
            if ty.float_width().is_some() =>
        {
            float_binop(builder, op, ty, x, y)?
        }
        _ => return Err(Error::mismatch(format!("{op} of {ty}"))),
    };
    Ok(Value::new(raw, ty))
}

fn int_binop<T: IntMathValue<'static>>(
    builder: &Builder<'static>,
    op: BinaryOp,
    unsigned: bool,
    a: T,
    b: T,
) -> Result<BasicValueEnum<'static>> {
    let r = match op {
        BinaryOp::Add => builder.build_int_add(a, b, "")?,
        BinaryOp::Sub => builder.build_int_sub(a, b, "")?,
        BinaryOp::Mul => builder.build_int_mul(a, b, "")?,
        BinaryOp::Div if unsigned => builder.build_int_unsigned_div(a, b, "")?,
        BinaryOp::Div => builder.build_int_signed_div(a, b, "")?,
        BinaryOp::Rem if unsigned => builder.build_int_unsigned_rem(a, b, "")?,
        BinaryOp::Rem => builder.build_int_signed_rem(a, b, "")?,
        BinaryOp::And => builder.build_and(a, b, "")?,
        BinaryOp::Or => builder.build_or(a, b, "")?,
        BinaryOp::Xor => builder.build_xor(a, b, "")?,
        BinaryOp::Shl => builder.build_left_shift(a, b, "")?,
        BinaryOp::Shr => builder.build_right_shift(a, b, !unsigned, "")?,
    };
    Ok(r.as_basic_value_enum())
}

fn float_binop<T: FloatMathValue<'static>>(
    builder: &Builder<'static>,
    op: BinaryOp,
    ty: Type,
    a: T,
    b: T,
) -> Result<BasicValueEnum<'static>> {
    let r = match op {
        BinaryOp::Add => builder.build_float_add(a, b, "")?,
        BinaryOp::Sub => builder.build_float_sub(a, b, "")?,
        BinaryOp::Mul => builder.build_float_mul(a, b, "")?,
        BinaryOp::Div => builder.build_float_div(a, b, "")?,
        BinaryOp::Rem => builder.build_float_rem(a, b, "")?,
        _ => return Err(Error::mismatch(format!("{op} of {ty}"))),
    };
    Ok(r.as_basic_value_enum())
}

/// Compares two operands, producing `bool`.
pub fn compare(op: CmpOp, lhs: impl IntoOperand, rhs: impl IntoOperand) -> Result<Value> {
    Session::current().atomically(|| emit_compare(op, lhs, rhs))
}

fn emit_compare(op: CmpOp, lhs: impl IntoOperand, rhs: impl IntoOperand) -> Result<Value> {
    let lhs = lhs.into_operand()?;
    let rhs = rhs.into_operand()?;
    let (a, b) = resolve_pair(lhs, rhs, false)?;
    let session = Session::current();
    if a.ty.is_pointer() && b.ty.is_pointer() {
        let builder = session.emitter()?;
        let i64_t = session.context().i64_type();
        let a = builder.build_ptr_to_int(a.llvm().into_pointer_value(), i64_t, "")?;
        let b = builder.build_ptr_to_int(b.llvm().into_pointer_value(), i64_t, "")?;
        let raw = builder.build_int_compare(op.int_predicate(true), a, b, "")?;
        return Ok(Value::new(raw.into(), Type::bool()));
    }
    let (a, b) = unify(a, b)?;
    let result_ty = match a.ty.lanes() {
        Some(n) => Type::bool().vector(n)?,
        None => Type::bool(),
    };
    let builder = session.emitter()?;
    let raw: BasicValueEnum<'static> = match (a.llvm(), b.llvm()) {
        (BasicValueEnum::IntValue(x), BasicValueEnum::IntValue(y)) => builder
            .build_int_compare(op.int_predicate(a.ty.leaf_unsigned()), x, y, "")?
            .into(),
        (BasicValueEnum::FloatValue(x), BasicValueEnum::FloatValue(y)) => builder
            .build_float_compare(op.float_predicate(), x, y, "")?
            .into(),
        (BasicValueEnum::VectorValue(x), BasicValueEnum::VectorValue(y))
            if a.ty.int_width().is_some() =>
        {
            builder
                .build_int_compare(op.int_predicate(a.ty.leaf_unsigned()), x, y, "")?
                .into()
        }
        (BasicValueEnum::VectorValue(x), BasicValueEnum::VectorValue(y))
            if a.ty.float_width().is_some() =>
        {
            builder
                .build_float_compare(op.float_predicate(), x, y, "")?
                .into()
        }
        _ => return Err(Error::mismatch(format!("{op} of {}", a.ty))),
    };
    Ok(Value::new(raw, result_ty))
}

/// Converts a scalar to `bool`: integers and pointers are true when
/// non-zero, floats when non-zero and not NaN.
pub fn test(v: impl IntoOperand) -> Result<Value> {
    let v = v.into_operand()?.resolve(None)?;
    if v.ty.is_vector() {
        return Err(Error::mismatch(format!("truth value of {}", v.ty)));
    }
    let builder = Session::current().emitter()?;
    let raw = match v.llvm() {
        BasicValueEnum::IntValue(i) if i.get_type().get_bit_width() == 1 => {
            return Ok(v.retyped(Type::bool()));
        }
        BasicValueEnum::IntValue(i) => {
            builder.build_int_compare(IntPredicate::NE, i, i.get_type().const_zero(), "")?
        }
        BasicValueEnum::FloatValue(f) => builder.build_float_compare(
            FloatPredicate::ONE,
            f,
            f.get_type().const_zero(),
            "",
        )?,
        BasicValueEnum::PointerValue(p) => builder.build_is_not_null(p, "")?,
        _ => return Err(Error::mismatch(format!("truth value of {}", v.ty))),
    };
    Ok(Value::new(raw.into(), Type::bool()))
}

/// `a && b`. Both operands are evaluated.
pub fn logical_and(a: impl IntoOperand, b: impl IntoOperand) -> Result<Value> {
    let a = test(a)?;
    let b = test(b)?;
    let raw = Session::current().emitter()?.build_and(
        a.llvm().into_int_value(),
        b.llvm().into_int_value(),
        "",
    )?;
    Ok(Value::new(raw.into(), Type::bool()))
}

/// `a || b`. Both operands are evaluated.
pub fn logical_or(a: impl IntoOperand, b: impl IntoOperand) -> Result<Value> {
    let a = test(a)?;
    let b = test(b)?;
    let raw = Session::current().emitter()?.build_or(
        a.llvm().into_int_value(),
        b.llvm().into_int_value(),
        "",
    )?;
    Ok(Value::new(raw.into(), Type::bool()))
}

/// `!a`
pub fn logical_not(a: impl IntoOperand) -> Result<Value> {
    let a = test(a)?;
    let raw = Session::current()
        .emitter()?
        .build_not(a.llvm().into_int_value(), "")?;
    Ok(Value::new(raw.into(), Type::bool()))
}

/// Arithmetic negation.
pub(crate) fn negate(v: Value) -> Result<Value> {
    let ty = v.ty;
    let builder = Session::current().emitter()?;
    let raw: BasicValueEnum<'static> = match v.llvm() {
        BasicValueEnum::IntValue(i) => builder.build_int_neg(i, "")?.into(),
        BasicValueEnum::FloatValue(f) => builder.build_float_neg(f, "")?.into(),
        BasicValueEnum::VectorValue(x) if ty.int_width().is_some() => {
            builder.build_int_neg(x, "")?.into()
        }
        BasicValueEnum::VectorValue(x) if ty.float_width().is_some() => {
            builder.build_float_neg(x, "")?.into()
        }
        _ => return Err(Error::mismatch(format!("negation of {ty}"))),
    };
    Ok(Value::new(raw, ty))
}

/// Bitwise complement of an integer.
pub(crate) fn complement(v: Value) -> Result<Value> {
    let ty = v.ty;
    let builder = Session::current().emitter()?;
    let raw: BasicValueEnum<'static> = match v.llvm() {
        BasicValueEnum::IntValue(i) => builder.build_not(i, "")?.into(),
        BasicValueEnum::VectorValue(x) if ty.int_width().is_some() => {
            builder.build_not(x, "")?.into()
        }
        _ => return Err(Error::mismatch(format!("complement of {ty}"))),
    };
    Ok(Value::new(raw, ty))
}

/// Fallible operators on values and borrowed references.
///
/// The arithmetic operators of `std::ops` panic on error; these methods
/// report it instead. References are taken by `&` so that `r.lt_(n)` reads
/// `r` without consuming the handle.
pub trait ValueOps: IntoOperand + Sized {
    /// Applies `op` with `rhs` on the right.
    fn binary(self, op: BinaryOp, rhs: impl IntoOperand) -> Result<Value> {
        binary(op, self, rhs)
    }

    /// `self < rhs`
    fn lt_(self, rhs: impl IntoOperand) -> Result<Value> {
        compare(CmpOp::Lt, self, rhs)
    }

    /// `self <= rhs`
    fn le_(self, rhs: impl IntoOperand) -> Result<Value> {
        compare(CmpOp::Le, self, rhs)
    }

    /// `self > rhs`
    fn gt_(self, rhs: impl IntoOperand) -> Result<Value> {
        compare(CmpOp::Gt, self, rhs)
    }

    /// `self >= rhs`
    fn ge_(self, rhs: impl IntoOperand) -> Result<Value> {
        compare(CmpOp::Ge, self, rhs)
    }

    /// `self == rhs`
    fn eq_(self, rhs: impl IntoOperand) -> Result<Value> {
        compare(CmpOp::Eq, self, rhs)
    }

    /// `self != rhs`
    fn ne_(self, rhs: impl IntoOperand) -> Result<Value> {
        compare(CmpOp::Ne, self, rhs)
    }

    /// `self && rhs`
    fn and_(self, rhs: impl IntoOperand) -> Result<Value> {
        logical_and(self, rhs)
    }

    /// `self || rhs`
    fn or_(self, rhs: impl IntoOperand) -> Result<Value> {
        logical_or(self, rhs)
    }

    /// `!self`
    fn not_(self) -> Result<Value> {
        logical_not(self)
    }

    /// `-self`
    fn neg_(self) -> Result<Value> {
        negate(self.into_operand()?.resolve(None)?)
    }

    /// `~self`
    fn complement_(self) -> Result<Value> {
        complement(self.into_operand()?.resolve(None)?)
    }
}

impl ValueOps for Value {}
impl ValueOps for &crate::reference::Ref {}
impl ValueOps for &crate::reference::ConstRef {}
impl<T: IntoOperand> ValueOps for Result<T> {}

#[cfg(test)]
mod test {
    use cool_asserts::assert_matches;
    use rstest::rstest;

    use super::*;
    use crate::decl::static_fn;
    use crate::flow::return_;
    use crate::symbols::local;
    use crate::test::{TestContext, test_ctx};

    fn in_body<T>(f: impl FnOnce() -> Result<T>) -> T {
        let mut out = None;
        static_fn(Type::void().func(&[]).unwrap(), crate::symbols::SymbolName::flexible("t"), &[], || {
            out = Some(f()?);
            Ok(())
        })
        .unwrap();
        out.unwrap()
    }

    #[rstest]
    #[case(Type::int(8), Type::int(32), Type::int(32))]
    #[case(Type::uint(8), Type::int(32), Type::int(32))]
    #[case(Type::int(32), Type::uint(32), Type::uint(32))]
    #[case(Type::uint(64), Type::int(16), Type::uint(64))]
    #[case(Type::f32(), Type::f64(), Type::f64())]
    fn widening(_test_ctx: TestContext, #[case] a: Type, #[case] b: Type, #[case] expected: Type) {
        let ty = in_body(|| {
            let x = local(a, "x")?;
            let y = local(b, "y")?;
            Ok(binary(BinaryOp::Add, &x, &y)?.ty())
        });
        assert_eq!(ty, expected);
    }

    #[rstest]
    fn ints_and_floats_do_not_mix(_test_ctx: TestContext) {
        let err = in_body(|| {
            let x = local(Type::int(32), "x")?;
            let y = local(Type::f64(), "y")?;
            Ok(binary(BinaryOp::Mul, &x, &y))
        });
        assert_matches!(err, Err(Error::TypeMismatch(_)));
    }

    #[rstest]
    fn division_follows_signedness(test_ctx: TestContext) {
        in_body(|| {
            let s = local(Type::int(32), "s")?;
            let u = local(Type::uint(32), "u")?;
            binary(BinaryOp::Div, &s, 2)?;
            binary(BinaryOp::Shr, &u, 1)?;
            binary(BinaryOp::Shr, &s, 1u8)?;
            Ok(())
        });
        let ir = test_ctx.module().llvm().print_to_string().to_string();
        assert!(ir.contains("sdiv i32"));
        assert!(ir.contains("lshr i32"));
        assert!(ir.contains("ashr i32"));
    }

    #[rstest]
    fn comparisons(test_ctx: TestContext) {
        in_body(|| {
            let f = local(Type::f64(), "f")?;
            let u = local(Type::uint(16), "u")?;
            assert_eq!(compare(CmpOp::Ne, &f, &f)?.ty(), Type::bool());
            compare(CmpOp::Lt, &u, 3)?;
            compare(CmpOp::Ge, &f, 0.5)?;
            Ok(())
        });
        let ir = test_ctx.module().llvm().print_to_string().to_string();
        assert!(ir.contains("fcmp une double"));
        assert!(ir.contains("icmp ult i16"));
        assert!(ir.contains("fcmp oge double"));
    }

    #[rstest]
    fn pointer_arithmetic(_test_ctx: TestContext) {
        let ty = in_body(|| {
            let buf = local(Type::int(32).array(4)?, "buf")?;
            let p = local(Type::int(32).ptr(), "p")?;
            p.store(&buf)?;
            let q = binary(BinaryOp::Add, &p, 2)?;
            assert_matches!(binary(BinaryOp::Mul, &p, 2), Err(Error::TypeMismatch(_)));
            Ok(q.ty())
        });
        assert_eq!(ty, Type::int(32).ptr());
    }

    #[rstest]
    fn pointers_compare_with_zero(_test_ctx: TestContext) {
        in_body(|| {
            let p = local(Type::int(32).ptr(), "p")?;
            assert_eq!(compare(CmpOp::Eq, &p, 0)?.ty(), Type::bool());
            assert_eq!(compare(CmpOp::Ne, 0, &p)?.ty(), Type::bool());
            assert_matches!(compare(CmpOp::Eq, &p, 5), Err(Error::BadLiteral { .. }));
            Ok(())
        });
    }

    #[rstest]
    fn truth_values(_test_ctx: TestContext) {
        in_body(|| {
            let p = local(Type::char().ptr(), "p")?;
            let x = local(Type::f32(), "x")?;
            assert_eq!(test(&p)?.ty(), Type::bool());
            assert_eq!(logical_and(&p, &x)?.ty(), Type::bool());
            assert_eq!(logical_not(&x)?.ty(), Type::bool());
            Ok(())
        });
    }

    #[rstest]
    fn returns_widen(_test_ctx: TestContext) {
        static_fn(Type::int(64).func(&[]).unwrap(), "wide", &[], || return_(7u8)).unwrap();
    }
}
