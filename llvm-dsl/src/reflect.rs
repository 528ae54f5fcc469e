//! Compile-time reflection over types, functions and scopes.
//!
//! The predicates and transforms mirror the C++ `<type_traits>` header,
//! applied to IR categories: integers (including `bool`) are integral,
//! structs are classes, and there are no references.

use std::ops::Index;

use delegate::delegate;
use inkwell::types::{AnyType, BasicType};

use crate::reference::ConstRef;
use crate::session::Session;
use crate::types::Type;
use crate::value::Member;
use crate::{Error, Result};

/// A read-only sequence of types or names.
#[derive(Clone, Debug, Default, PartialEq, Eq, derive_more::From)]
pub struct List<T>(Vec<T>);

/// The member or parameter types of a type.
pub type TypeList = List<Type>;

/// Member, parameter or local variable names.
pub type NameList = List<String>;

impl<T> List<T> {
    delegate! {
        to self.0 {
            /// The number of entries.
            pub fn len(&self) -> usize;
            /// Whether there are no entries.
            pub fn is_empty(&self) -> bool;
            /// Entry `i`, if there is one.
            pub fn get(&self, i: usize) -> Option<&T>;
            /// The entries in order.
            pub fn iter(&self) -> std::slice::Iter<'_, T>;
            /// The first entry.
            pub fn first(&self) -> Option<&T>;
            /// The last entry.
            pub fn last(&self) -> Option<&T>;
        }
    }

    /// The entries as a vector.
    pub fn into_vec(self) -> Vec<T> {
        self.0
    }
}

impl<T> Index<usize> for List<T> {
    type Output = T;

    fn index(&self, i: usize) -> &T {
        &self.0[i]
    }
}

impl<T> IntoIterator for List<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a List<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl PartialEq<[&str]> for NameList {
    fn eq(&self, other: &[&str]) -> bool {
        self.0.iter().eq(other.iter().copied())
    }
}

/// The member types of a complete struct.
pub fn member_types(ty: Type) -> Result<TypeList> {
    ty.members().map(List::from)
}

/// The member names of a struct, empty if it was declared without names.
pub fn member_names(ty: Type) -> Result<NameList> {
    let st = ty
        .as_struct()
        .ok_or_else(|| Error::mismatch(format!("{ty} is not a struct")))?;
    Ok(Session::current().member_names(&st).unwrap_or_default().into())
}

fn function_type(ty: Type) -> Result<Type> {
    match ty.element() {
        Some(f) if ty.is_pointer() && f.is_function() => Ok(f),
        _ if ty.is_function() => Ok(ty),
        _ => Err(Error::mismatch(format!("{ty} is not a function type"))),
    }
}

/// The parameter types of a function type or function pointer type.
pub fn parameter_types(ty: Type) -> Result<TypeList> {
    function_type(ty)?.params().map(List::from)
}

/// The names the parameters of `function` were declared with. Unnamed
/// parameters have empty names.
pub fn parameter_names(function: &ConstRef) -> Result<NameList> {
    let function = function.function()?;
    let mut names = Session::current().parameter_names(function);
    names.resize(function.count_params() as usize, String::new());
    Ok(names.into())
}

/// The locals visible at the current insertion point, outermost first.
pub fn local_names() -> NameList {
    Session::current().local_names().into()
}

/// The element type of a pointer, array or vector.
pub fn element_type(ty: Type) -> Result<Type> {
    ty.element()
        .ok_or_else(|| Error::mismatch(format!("{ty} has no element type")))
}

/// The return type of a function type or function pointer type.
pub fn return_type(ty: Type) -> Result<Type> {
    function_type(ty)?.ret()
}

// ----- predicates -----

/// Integers, `bool` included.
pub fn is_integral(ty: Type) -> bool {
    ty.is_int()
}

/// Floats of any width.
pub fn is_floating_point(ty: Type) -> bool {
    ty.is_float()
}

/// Pointers, function pointers included.
pub fn is_pointer(ty: Type) -> bool {
    ty.is_pointer()
}

/// Arrays, not vectors.
pub fn is_array(ty: Type) -> bool {
    ty.is_array()
}

/// Structs, named or anonymous.
pub fn is_class(ty: Type) -> bool {
    ty.is_struct()
}

/// Function types, not function pointers.
pub fn is_function(ty: Type) -> bool {
    ty.is_function()
}

/// `void` only.
pub fn is_void(ty: Type) -> bool {
    ty.is_void()
}

/// Signed integers and floats.
pub fn is_signed(ty: Type) -> bool {
    (ty.is_int() && !ty.leaf_unsigned()) || ty.is_float()
}

/// Unsigned integers, `bool` included.
pub fn is_unsigned(ty: Type) -> bool {
    ty.is_int() && ty.leaf_unsigned()
}

/// Complete structs without members.
pub fn is_empty(ty: Type) -> bool {
    ty.members().is_ok_and(|m| m.is_empty())
}

/// Integers and floats.
pub fn is_arithmetic(ty: Type) -> bool {
    is_integral(ty) || is_floating_point(ty)
}

/// Arithmetic types and `void`.
pub fn is_fundamental(ty: Type) -> bool {
    is_arithmetic(ty) || is_void(ty)
}

/// Arithmetic types and pointers.
pub fn is_scalar(ty: Type) -> bool {
    is_arithmetic(ty) || is_pointer(ty)
}

/// Arrays, vectors, structs, functions and pointers.
pub fn is_compound(ty: Type) -> bool {
    !is_fundamental(ty)
}

/// Anything but functions and `void`.
pub fn is_object(ty: Type) -> bool {
    !is_function(ty) && !is_void(ty)
}

/// Same IR type and same signedness.
pub fn is_same(a: Type, b: Type) -> bool {
    a == b
}

// ----- transforms -----

/// Arrays decay to pointers to their first element, functions to
/// function pointers.
pub fn decay(ty: Type) -> Type {
    match ty.element() {
        Some(elem) if ty.is_array() => elem.ptr(),
        _ if ty.is_function() => ty.ptr(),
        _ => ty,
    }
}

fn integral(ty: Type, what: &str) -> Result<()> {
    if ty.int_width().is_none() {
        return Err(Error::mismatch(format!("{what} of {ty}")));
    }
    Ok(())
}

/// The signed integer (or vector of them) of the same width.
pub fn make_signed(ty: Type) -> Result<Type> {
    integral(ty, "make_signed")?;
    Ok(ty.with_mask(0))
}

/// The unsigned integer (or vector of them) of the same width.
pub fn make_unsigned(ty: Type) -> Result<Type> {
    integral(ty, "make_unsigned")?;
    Ok(ty.with_mask(1))
}

/// The element of an array, or the type itself.
pub fn remove_extent(ty: Type) -> Type {
    match ty.element() {
        Some(elem) if ty.is_array() => elem,
        _ => ty,
    }
}

/// The innermost element of nested arrays, or the type itself.
pub fn remove_all_extents(mut ty: Type) -> Type {
    while ty.is_array() {
        ty = remove_extent(ty);
    }
    ty
}

/// The pointee of a pointer, or the type itself.
pub fn remove_pointer(ty: Type) -> Type {
    match ty.element() {
        Some(elem) if ty.is_pointer() => elem,
        _ => ty,
    }
}

/// The type itself: IR types are never references.
pub fn remove_reference(ty: Type) -> Type {
    ty
}

/// A pointer to `ty`.
pub fn add_pointer(ty: Type) -> Type {
    ty.ptr()
}

/// The type both operands of an arithmetic operation convert to.
///
/// The wider integer wins and at equal width the unsigned one; the wider
/// float wins; a float beats any integer. Other types only agree with
/// themselves.
pub fn common_type(a: Type, b: Type) -> Result<Type> {
    if a == b {
        return Ok(a);
    }
    match (a.int_width(), b.int_width(), a.float_width(), b.float_width()) {
        _ if a.lanes() != b.lanes() => {}
        (Some(x), Some(y), ..) => {
            return Ok(if x > y || (x == y && a.leaf_unsigned()) { a } else { b });
        }
        (.., Some(x), Some(y)) => return Ok(if x >= y { a } else { b }),
        (.., Some(_), None) if b.int_width().is_some() => return Ok(a),
        (.., None, Some(_)) if a.int_width().is_some() => return Ok(b),
        _ => {}
    }
    Err(Error::mismatch(format!("no common type of {a} and {b}")))
}

// ----- properties -----

/// The number of array dimensions.
pub fn rank(ty: Type) -> u32 {
    let mut rank = 0;
    let mut ty = ty;
    while ty.is_array() {
        rank += 1;
        ty = remove_extent(ty);
    }
    rank
}

/// The length of array dimension `dim`, 0 if there is no such dimension.
pub fn extent(ty: Type, dim: u32) -> u32 {
    let mut ty = ty;
    for _ in 0..dim {
        if !ty.is_array() {
            return 0;
        }
        ty = remove_extent(ty);
    }
    ty.array_len().unwrap_or(0)
}

/// The ABI alignment of `ty` on the host target, in bytes.
pub fn alignment_of(ty: Type) -> Result<u32> {
    let basic = ty.basic()?;
    Ok(Session::current().native()?.data.get_abi_alignment(&basic))
}

/// The allocation size of `ty` on the host target, in bytes.
pub fn size_of(ty: Type) -> Result<u64> {
    let basic = ty.basic()?;
    if !basic.is_sized() {
        return Err(Error::InvalidType(format!("{ty} has no size")));
    }
    Ok(Session::current().native()?.data.get_abi_size(&basic.as_any_type_enum()))
}

/// The offset of a struct member on the host target, in bytes.
pub fn offset_of(ty: Type, member: impl Into<Member>) -> Result<u64> {
    let (index, _) = member.into().resolve(ty)?;
    let st = ty
        .as_struct()
        .ok_or_else(|| Error::mismatch(format!("{ty} is not a struct")))?;
    Session::current()
        .native()?
        .data
        .offset_of_element(&st, index)
        .ok_or_else(|| Error::InvalidType(format!("{ty} has no member {index}")))
}
