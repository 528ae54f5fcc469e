//! `std::ops` operators on values and references.
//!
//! The operators cannot return a `Result`, so they panic when the operation
//! fails, as `a + b` would for overflowing host integers in debug builds.
//! The fallible forms are [`binary`] and the [`ValueOps`] methods.
//!
//! [`ValueOps`]: super::ValueOps

use std::ops::{
    Add, AddAssign, BitAnd, BitAndAssign, BitOr, BitOrAssign, BitXor, BitXorAssign, Div,
    DivAssign, Mul, MulAssign, Neg, Not, Rem, RemAssign, Shl, ShlAssign, Shr, ShrAssign, Sub,
    SubAssign,
};

use super::arith::{complement, negate};
use super::{BinaryOp, IntoOperand, Value, binary};
use crate::reference::{ConstRef, Ref};

fn unwrap_op(r: crate::Result<Value>, op: BinaryOp) -> Value {
    r.unwrap_or_else(|e| panic!("{op}: {e}"))
}

macro_rules! binary_ops {
    ($lhs:ty; $($trait:ident $method:ident $op:ident),*) => {
        $(impl<T: IntoOperand> $trait<T> for $lhs {
            type Output = Value;

            fn $method(self, rhs: T) -> Value {
                unwrap_op(binary(BinaryOp::$op, self, rhs), BinaryOp::$op)
            }
        })*
    };
}

macro_rules! all_binary_ops {
    ($($lhs:ty),*) => {
        $(binary_ops!($lhs;
            Add add Add, Sub sub Sub, Mul mul Mul, Div div Div, Rem rem Rem,
            BitAnd bitand And, BitOr bitor Or, BitXor bitxor Xor, Shl shl Shl, Shr shr Shr
        );)*
    };
}

all_binary_ops!(Value, Ref, &Ref, ConstRef, &ConstRef);

macro_rules! literal_lhs_ops {
    ($($lit:ty),*) => {
        $(literal_lhs_ops!(@rhs $lit; Value, Ref, &Ref, ConstRef, &ConstRef);)*
    };
    (@rhs $lit:ty; $($rhs:ty),*) => {
        $(literal_lhs_ops!(@op $lit, $rhs;
            Add add Add, Sub sub Sub, Mul mul Mul, Div div Div, Rem rem Rem,
            BitAnd bitand And, BitOr bitor Or, BitXor bitxor Xor, Shl shl Shl, Shr shr Shr
        );)*
    };
    (@op $lit:ty, $rhs:ty; $($trait:ident $method:ident $op:ident),*) => {
        $(impl $trait<$rhs> for $lit {
            type Output = Value;

            fn $method(self, rhs: $rhs) -> Value {
                unwrap_op(binary(BinaryOp::$op, self, rhs), BinaryOp::$op)
            }
        })*
    };
}

literal_lhs_ops!(i32, i64, u32, u64, f64);

macro_rules! unary_ops {
    ($($t:ty),*) => {
        $(impl Neg for $t {
            type Output = Value;

            fn neg(self) -> Value {
                self.into_operand()
                    .and_then(|o| o.resolve(None))
                    .and_then(negate)
                    .unwrap_or_else(|e| panic!("negation: {e}"))
            }
        }

        impl Not for $t {
            type Output = Value;

            /// Bitwise complement; see [`logical_not`](super::logical_not)
            /// for the logical one.
            fn not(self) -> Value {
                self.into_operand()
                    .and_then(|o| o.resolve(None))
                    .and_then(complement)
                    .unwrap_or_else(|e| panic!("complement: {e}"))
            }
        })*
    };
}

unary_ops!(Value, Ref, &Ref, ConstRef, &ConstRef);

macro_rules! assign_ops {
    ($($trait:ident $method:ident $op:ident),*) => {
        $(impl<T: IntoOperand> $trait<T> for Ref {
            fn $method(&mut self, rhs: T) {
                self.update(BinaryOp::$op, rhs)
                    .unwrap_or_else(|e| panic!("{}: {e}", BinaryOp::$op));
            }
        })*
    };
}

assign_ops!(
    AddAssign add_assign Add,
    SubAssign sub_assign Sub,
    MulAssign mul_assign Mul,
    DivAssign div_assign Div,
    RemAssign rem_assign Rem,
    BitAndAssign bitand_assign And,
    BitOrAssign bitor_assign Or,
    BitXorAssign bitxor_assign Xor,
    ShlAssign shl_assign Shl,
    ShrAssign shr_assign Shr
);

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;
    use crate::decl::static_fn;
    use crate::flow::return_;
    use crate::symbols::var;
    use crate::test::{TestContext, test_ctx};
    use crate::types::Type;

    #[rstest]
    fn operators_build_expressions(test_ctx: TestContext) {
        let i32_t = Type::int(32);
        static_fn(i32_t.func(&[i32_t, i32_t]).unwrap(), "expr", &["a", "b"], || {
            let a = var("a")?;
            let b = var("b")?;
            let mut acc = crate::symbols::auto_(&a * 3 + &b, "acc")?;
            acc += 1;
            acc <<= 2;
            return_(-(&acc) ^ (10i32 - &b))
        })
        .unwrap();
        let ir = test_ctx.module().llvm().print_to_string().to_string();
        assert!(ir.contains("mul i32"));
        assert!(ir.contains("shl i32"));
        assert!(ir.contains("xor i32"));
    }

    #[rstest]
    #[should_panic(expected = "type mismatch")]
    fn operators_panic_on_mismatch(_test_ctx: TestContext) {
        static_fn(Type::void().func(&[]).unwrap(), "bad", &[], || {
            let x = crate::symbols::local(Type::f64(), "x")?;
            let _ = &x << 1;
            Ok(())
        })
        .unwrap();
    }
}
