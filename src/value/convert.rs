//! Bidirectional conversion between `VariantValue` and native types
//!
//! Design: converters for composite types are written purely in terms of
//! the converters for their components, so adding a scalar type requires
//! no change to any container rule. Failures name the expected type, the
//! actual tag, and the failing position inside composites.

use crate::closure::ClosureInfo;
use crate::errors::{ConversionError, PathSegment};
use crate::object::ObjectHandle;
use crate::value::image::ImageBlob;
use crate::value::variant::VariantValue;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Native → variant direction; defined not to fail (native return types
/// are a subset of the supported mapping, known at registration time).
pub trait IntoVariant {
    fn into_variant(self) -> VariantValue;
}

/// Variant → native direction; fallible, with descriptive errors.
pub trait FromVariant: Sized {
    fn from_variant(value: &VariantValue) -> Result<Self, ConversionError>;

    /// Human-readable expected-type name used in diagnostics
    fn expected() -> String;
}

/// Marshal a native value into a variant
pub fn to_variant<T: IntoVariant>(value: T) -> VariantValue {
    value.into_variant()
}

/// Marshal a variant into a native value
pub fn from_variant<T: FromVariant>(value: &VariantValue) -> Result<T, ConversionError> {
    T::from_variant(value)
}

/// Key rendering for mapping error paths: strings unquoted, everything
/// else in display form.
fn key_display(key: &VariantValue) -> String {
    match key {
        VariantValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------
// Scalars
// ---------------------------------------------------------------------

macro_rules! integer_conversions {
    ($($ty:ty),* $(,)?) => {$(
        impl FromVariant for $ty {
            fn from_variant(value: &VariantValue) -> Result<Self, ConversionError> {
                match value {
                    VariantValue::Integer(i) => num_traits::cast::<i64, $ty>(*i).ok_or_else(|| {
                        ConversionError::mismatch(
                            Self::expected(),
                            format!("integer {} (out of range)", i),
                        )
                    }),
                    VariantValue::Float(x) => num_traits::cast::<f64, $ty>(*x).ok_or_else(|| {
                        ConversionError::mismatch(
                            Self::expected(),
                            format!("float {} (not representable)", x),
                        )
                    }),
                    other => Err(ConversionError::mismatch(Self::expected(), other.kind())),
                }
            }

            fn expected() -> String {
                stringify!($ty).to_string()
            }
        }

        impl IntoVariant for $ty {
            fn into_variant(self) -> VariantValue {
                match num_traits::cast::<$ty, i64>(self) {
                    Some(i) => VariantValue::Integer(i),
                    // Unsigned values beyond i64::MAX widen to float
                    None => VariantValue::Float(self as f64),
                }
            }
        }
    )*};
}

integer_conversions!(i8, i16, i32, i64, u8, u16, u32, u64, isize, usize);

macro_rules! float_conversions {
    ($($ty:ty),* $(,)?) => {$(
        impl FromVariant for $ty {
            fn from_variant(value: &VariantValue) -> Result<Self, ConversionError> {
                match value {
                    VariantValue::Float(x) => Ok(*x as $ty),
                    VariantValue::Integer(i) => Ok(*i as $ty),
                    other => Err(ConversionError::mismatch(Self::expected(), other.kind())),
                }
            }

            fn expected() -> String {
                stringify!($ty).to_string()
            }
        }

        impl IntoVariant for $ty {
            fn into_variant(self) -> VariantValue {
                VariantValue::Float(self as f64)
            }
        }
    )*};
}

float_conversions!(f32, f64);

impl FromVariant for bool {
    fn from_variant(value: &VariantValue) -> Result<Self, ConversionError> {
        match value {
            VariantValue::Integer(i) => Ok(*i != 0),
            other => Err(ConversionError::mismatch(Self::expected(), other.kind())),
        }
    }

    fn expected() -> String {
        "boolean (integer 0/1)".to_string()
    }
}

impl IntoVariant for bool {
    fn into_variant(self) -> VariantValue {
        VariantValue::Integer(self as i64)
    }
}

impl FromVariant for String {
    fn from_variant(value: &VariantValue) -> Result<Self, ConversionError> {
        match value {
            VariantValue::String(s) => Ok(s.clone()),
            other => Err(ConversionError::mismatch(Self::expected(), other.kind())),
        }
    }

    fn expected() -> String {
        "string".to_string()
    }
}

impl IntoVariant for String {
    fn into_variant(self) -> VariantValue {
        VariantValue::String(self)
    }
}

impl IntoVariant for &str {
    fn into_variant(self) -> VariantValue {
        VariantValue::String(self.to_string())
    }
}

impl FromVariant for DateTime<Utc> {
    fn from_variant(value: &VariantValue) -> Result<Self, ConversionError> {
        match value {
            VariantValue::DateTime(dt) => Ok(*dt),
            other => Err(ConversionError::mismatch(Self::expected(), other.kind())),
        }
    }

    fn expected() -> String {
        "datetime".to_string()
    }
}

impl IntoVariant for DateTime<Utc> {
    fn into_variant(self) -> VariantValue {
        VariantValue::DateTime(self)
    }
}

impl FromVariant for ImageBlob {
    fn from_variant(value: &VariantValue) -> Result<Self, ConversionError> {
        match value {
            VariantValue::Image(img) => Ok(img.clone()),
            other => Err(ConversionError::mismatch(Self::expected(), other.kind())),
        }
    }

    fn expected() -> String {
        "image".to_string()
    }
}

impl IntoVariant for ImageBlob {
    fn into_variant(self) -> VariantValue {
        VariantValue::Image(self)
    }
}

impl FromVariant for ObjectHandle {
    /// Extracting a handle aliases the instance; by-value crossings go
    /// through `ObjectHandle::deep_copy` explicitly.
    fn from_variant(value: &VariantValue) -> Result<Self, ConversionError> {
        match value {
            VariantValue::Object(handle) => Ok(handle.clone()),
            other => Err(ConversionError::mismatch(Self::expected(), other.kind())),
        }
    }

    fn expected() -> String {
        "object handle".to_string()
    }
}

impl IntoVariant for ObjectHandle {
    fn into_variant(self) -> VariantValue {
        VariantValue::Object(self)
    }
}

impl FromVariant for ClosureInfo {
    fn from_variant(value: &VariantValue) -> Result<Self, ConversionError> {
        match value {
            VariantValue::Closure(info) => Ok(info.clone()),
            other => Err(ConversionError::mismatch(Self::expected(), other.kind())),
        }
    }

    fn expected() -> String {
        "function closure".to_string()
    }
}

impl IntoVariant for ClosureInfo {
    fn into_variant(self) -> VariantValue {
        VariantValue::Closure(self)
    }
}

/// Identity conversion: the fully-dynamic parameter type
impl FromVariant for VariantValue {
    fn from_variant(value: &VariantValue) -> Result<Self, ConversionError> {
        Ok(value.clone())
    }

    fn expected() -> String {
        "any value".to_string()
    }
}

impl IntoVariant for VariantValue {
    fn into_variant(self) -> VariantValue {
        self
    }
}

/// Unit return maps to the absence marker
impl IntoVariant for () {
    fn into_variant(self) -> VariantValue {
        VariantValue::Undefined
    }
}

// ---------------------------------------------------------------------
// Composites
// ---------------------------------------------------------------------

impl<T: FromVariant> FromVariant for Option<T> {
    fn from_variant(value: &VariantValue) -> Result<Self, ConversionError> {
        match value {
            VariantValue::Undefined => Ok(None),
            other => T::from_variant(other).map(Some),
        }
    }

    fn expected() -> String {
        format!("optional {}", T::expected())
    }
}

impl<T: IntoVariant> IntoVariant for Option<T> {
    fn into_variant(self) -> VariantValue {
        match self {
            Some(value) => value.into_variant(),
            None => VariantValue::Undefined,
        }
    }
}

impl<T: FromVariant> FromVariant for Vec<T> {
    fn from_variant(value: &VariantValue) -> Result<Self, ConversionError> {
        match value {
            VariantValue::Sequence(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    T::from_variant(item).map_err(|e| e.nested(PathSegment::Index(i)))
                })
                .collect(),
            other => Err(ConversionError::mismatch(Self::expected(), other.kind())),
        }
    }

    fn expected() -> String {
        format!("sequence of {}", T::expected())
    }
}

impl<T: IntoVariant> IntoVariant for Vec<T> {
    fn into_variant(self) -> VariantValue {
        VariantValue::Sequence(self.into_iter().map(IntoVariant::into_variant).collect())
    }
}

impl<K, V> FromVariant for HashMap<K, V>
where
    K: FromVariant + Eq + Hash,
    V: FromVariant,
{
    fn from_variant(value: &VariantValue) -> Result<Self, ConversionError> {
        match value {
            VariantValue::Mapping(entries) => {
                let mut map = HashMap::with_capacity(entries.len());
                for (key, val) in entries {
                    let k = K::from_variant(key)
                        .map_err(|e| e.nested(PathSegment::Key(key_display(key))))?;
                    let v = V::from_variant(val)
                        .map_err(|e| e.nested(PathSegment::Key(key_display(key))))?;
                    map.insert(k, v);
                }
                Ok(map)
            }
            other => Err(ConversionError::mismatch(Self::expected(), other.kind())),
        }
    }

    fn expected() -> String {
        format!("mapping of {} to {}", K::expected(), V::expected())
    }
}

impl<K, V> IntoVariant for HashMap<K, V>
where
    K: IntoVariant,
    V: IntoVariant,
{
    fn into_variant(self) -> VariantValue {
        VariantValue::mapping(
            self.into_iter()
                .map(|(k, v)| (k.into_variant(), v.into_variant())),
        )
    }
}

impl<K, V> FromVariant for BTreeMap<K, V>
where
    K: FromVariant + Ord,
    V: FromVariant,
{
    fn from_variant(value: &VariantValue) -> Result<Self, ConversionError> {
        match value {
            VariantValue::Mapping(entries) => {
                let mut map = BTreeMap::new();
                for (key, val) in entries {
                    let k = K::from_variant(key)
                        .map_err(|e| e.nested(PathSegment::Key(key_display(key))))?;
                    let v = V::from_variant(val)
                        .map_err(|e| e.nested(PathSegment::Key(key_display(key))))?;
                    map.insert(k, v);
                }
                Ok(map)
            }
            other => Err(ConversionError::mismatch(Self::expected(), other.kind())),
        }
    }

    fn expected() -> String {
        format!("mapping of {} to {}", K::expected(), V::expected())
    }
}

impl<K, V> IntoVariant for BTreeMap<K, V>
where
    K: IntoVariant,
    V: IntoVariant,
{
    fn into_variant(self) -> VariantValue {
        VariantValue::mapping(
            self.into_iter()
                .map(|(k, v)| (k.into_variant(), v.into_variant())),
        )
    }
}

macro_rules! tuple_conversions {
    ($(($($T:ident $idx:tt),+) => $arity:expr;)+) => {$(
        impl<$($T: FromVariant),+> FromVariant for ($($T,)+) {
            fn from_variant(value: &VariantValue) -> Result<Self, ConversionError> {
                match value {
                    VariantValue::Sequence(items) if items.len() == $arity => {
                        Ok(($(
                            $T::from_variant(&items[$idx])
                                .map_err(|e| e.nested(PathSegment::Slot($idx)))?,
                        )+))
                    }
                    VariantValue::Sequence(items) => Err(ConversionError::mismatch(
                        Self::expected(),
                        format!("sequence of length {}", items.len()),
                    )),
                    other => Err(ConversionError::mismatch(Self::expected(), other.kind())),
                }
            }

            fn expected() -> String {
                let slots = [$($T::expected()),+];
                format!("tuple ({})", slots.join(", "))
            }
        }

        impl<$($T: IntoVariant),+> IntoVariant for ($($T,)+) {
            fn into_variant(self) -> VariantValue {
                VariantValue::Sequence(vec![$(self.$idx.into_variant()),+])
            }
        }
    )+};
}

tuple_conversions! {
    (A 0) => 1;
    (A 0, B 1) => 2;
    (A 0, B 1, C 2) => 3;
    (A 0, B 1, C 2, D 3) => 4;
}
