//! Mapping of host (Rust) types onto IR types.

use super::Type;
use crate::Result;

/// A host type with an IR counterpart, for [`Type::get`].
///
/// Integers map by width and signedness, `bool` to `i1`, `()` to `void`,
/// raw pointers to pointers (a pointer to `()` is an `i8*`), arrays `[T; N]`
/// to IR arrays, slices `[T]` to zero-length arrays, tuples to anonymous
/// structs and `extern "C"` function pointers to pointers to functions.
pub trait HostType {
    /// The IR type of `Self`.
    fn host_type() -> Result<Type>;
}

impl Type {
    /// The IR type of the host type `T`.
    pub fn get<T: HostType + ?Sized>() -> Result<Type> {
        T::host_type()
    }

    /// A named struct whose members are those of the host tuple `T`.
    pub fn get_named<T: HostType + ?Sized>(name: &str, member_names: &[&str]) -> Result<Type> {
        let members = T::host_type()?.members()?;
        Type::named_struct(name, &members, member_names)
    }
}

macro_rules! host_int {
    ($($t:ty => $ctor:ident),* $(,)?) => {
        $(impl HostType for $t {
            fn host_type() -> Result<Type> {
                Ok(Type::$ctor(<$t>::BITS))
            }
        })*
    };
}

host_int! {
    i8 => int, i16 => int, i32 => int, i64 => int, i128 => int, isize => int,
    u8 => uint, u16 => uint, u32 => uint, u64 => uint, u128 => uint, usize => uint,
}

impl HostType for bool {
    fn host_type() -> Result<Type> {
        Ok(Type::bool())
    }
}

impl HostType for char {
    fn host_type() -> Result<Type> {
        Ok(Type::uint(32))
    }
}

impl HostType for f32 {
    fn host_type() -> Result<Type> {
        Ok(Type::f32())
    }
}

impl HostType for f64 {
    fn host_type() -> Result<Type> {
        Ok(Type::f64())
    }
}

impl HostType for () {
    fn host_type() -> Result<Type> {
        Ok(Type::void())
    }
}

impl<T: HostType + ?Sized> HostType for *const T {
    fn host_type() -> Result<Type> {
        Ok(T::host_type()?.ptr())
    }
}

impl<T: HostType + ?Sized> HostType for *mut T {
    fn host_type() -> Result<Type> {
        Ok(T::host_type()?.ptr())
    }
}

impl<T: HostType, const N: usize> HostType for [T; N] {
    fn host_type() -> Result<Type> {
        let len = u32::try_from(N)
            .map_err(|_| crate::Error::InvalidType(format!("array of {N} elements")))?;
        T::host_type()?.array(len)
    }
}

impl<T: HostType> HostType for [T] {
    fn host_type() -> Result<Type> {
        T::host_type()?.array(0)
    }
}

macro_rules! host_tuple {
    ($($name:ident),+) => {
        impl<$($name: HostType),+> HostType for ($($name,)+) {
            fn host_type() -> Result<Type> {
                Type::anonymous_struct(&[$($name::host_type()?),+])
            }
        }
    };
}

host_tuple!(A);
host_tuple!(A, B);
host_tuple!(A, B, C);
host_tuple!(A, B, C, D);
host_tuple!(A, B, C, D, E);
host_tuple!(A, B, C, D, E, F);
host_tuple!(A, B, C, D, E, F, G);
host_tuple!(A, B, C, D, E, F, G, H);

/// A host function pointer type whose signature has an IR counterpart.
///
/// Used by [`Module::compile`](crate::Module::compile) to check the
/// requested signature against the compiled function.
pub trait HostSignature {
    /// The function type (not the pointer type) of the signature.
    fn signature() -> Result<Type>;
}

macro_rules! host_fn {
    ($($arg:ident),*) => {
        impl<R: HostType, $($arg: HostType),*> HostSignature for unsafe extern "C" fn($($arg),*) -> R {
            fn signature() -> Result<Type> {
                R::host_type()?.func(&[$($arg::host_type()?),*])
            }
        }

        impl<R: HostType, $($arg: HostType),*> HostSignature for extern "C" fn($($arg),*) -> R {
            fn signature() -> Result<Type> {
                R::host_type()?.func(&[$($arg::host_type()?),*])
            }
        }

        impl<R: HostType, $($arg: HostType),*> HostType for unsafe extern "C" fn($($arg),*) -> R {
            fn host_type() -> Result<Type> {
                Ok(<Self as HostSignature>::signature()?.ptr())
            }
        }

        impl<R: HostType, $($arg: HostType),*> HostType for extern "C" fn($($arg),*) -> R {
            fn host_type() -> Result<Type> {
                Ok(<Self as HostSignature>::signature()?.ptr())
            }
        }
    };
}

host_fn!();
host_fn!(A);
host_fn!(A, B);
host_fn!(A, B, C);
host_fn!(A, B, C, D);
host_fn!(A, B, C, D, E);
host_fn!(A, B, C, D, E, F);

#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;
    use crate::test::{TestContext, test_ctx};

    #[rstest]
    fn scalars(_test_ctx: TestContext) {
        assert_eq!(Type::get::<i32>().unwrap(), Type::int(32));
        assert_eq!(Type::get::<u8>().unwrap(), Type::uint(8));
        assert_eq!(Type::get::<usize>().unwrap(), Type::uint(usize::BITS));
        assert_eq!(Type::get::<bool>().unwrap(), Type::bool());
        assert_eq!(Type::get::<f64>().unwrap(), Type::f64());
        assert_eq!(Type::get::<()>().unwrap(), Type::void());
    }

    #[rstest]
    fn compounds(_test_ctx: TestContext) {
        assert_eq!(Type::get::<*const ()>().unwrap().to_string(), "i8*");
        assert_eq!(Type::get::<*mut u16>().unwrap(), Type::uint(16).ptr());
        assert_eq!(Type::get::<[i8; 3]>().unwrap().to_string(), "[3 x i8]");
        assert_eq!(Type::get::<[f32]>().unwrap().to_string(), "[0 x float]");
        assert_eq!(
            Type::get::<(i32, f64)>().unwrap().to_string(),
            "{ i32, double }"
        );
        let f = Type::get::<extern "C" fn(i32) -> i64>().unwrap();
        assert_eq!(f.to_string(), "i64 (i32)*");
    }

    #[rstest]
    fn named_tuple(_test_ctx: TestContext) {
        let p = Type::get_named::<(i32, i64, i8)>("P", &["a", "b", "c"]).unwrap();
        assert_eq!(p.to_string(), "%P = type { i32, i64, i8 }");
    }
}
