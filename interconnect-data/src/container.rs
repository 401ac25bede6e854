use std::fmt;

use derive_more::From;
use enum_kinds::EnumKind;
use serde::{Deserialize, Serialize};

use crate::error::ValueConversionError;
use crate::value_set::NamedValueSet;

/// The value held by one interconnect table entry.
///
/// `ValueContainer` is a tagged union over the storage kinds the fabric
/// supports. Copies are always deep: cloning a container yields a value that
/// shares no storage with the original. Equality is deep as well, and is
/// reflexive for every kind (floating point payloads compare by bit pattern,
/// so a NaN value is equal to itself).
///
/// Nullable numerics are represented in two halves: a nullable value that is
/// present is stored as the plain numeric variant, and a nullable value that
/// is null is stored as [`ValueContainer::Null`] tagged with its numeric
/// kind. [`ValueContainer::Empty`] is distinct from both: it means the entry
/// has no value at all.
#[derive(Clone, Debug, Serialize, Deserialize, EnumKind, From)]
#[enum_kind(
    StorageKind,
    derive(Hash, PartialOrd, Ord, Serialize, Deserialize)
)]
pub enum ValueContainer {
    /// No value. This is the state of an entry that has never been written,
    /// or that has been reset.
    Empty,

    #[from]
    Bool(bool),

    #[from]
    I8(i8),
    #[from]
    I16(i16),
    #[from]
    I32(i32),
    #[from]
    I64(i64),

    #[from]
    U8(u8),
    #[from]
    U16(u16),
    #[from]
    U32(u32),
    #[from]
    U64(u64),

    #[from]
    F32(f32),
    #[from]
    F64(f64),

    /// A UTF-8 string.
    #[from]
    Text(String),

    /// An opaque byte blob. The fabric moves it around without interpreting
    /// it.
    Object(Vec<u8>),

    /// A list of strings.
    #[from]
    TextList(Vec<String>),

    /// A nested container.
    Nested(Box<ValueContainer>),

    /// A named-value set, used for service action parameters and results as
    /// well as plain entry values.
    #[from]
    ValueSet(NamedValueSet),

    /// A nullable numeric that is currently null, tagged with the kind it
    /// would have when present.
    Null(StorageKind),
}

impl Default for ValueContainer {
    fn default() -> Self {
        ValueContainer::Empty
    }
}

impl PartialEq for ValueContainer {
    fn eq(&self, other: &Self) -> bool {
        use ValueContainer::*;
        match (self, other) {
            (Empty, Empty) => true,
            (Bool(a), Bool(b)) => a == b,
            (I8(a), I8(b)) => a == b,
            (I16(a), I16(b)) => a == b,
            (I32(a), I32(b)) => a == b,
            (I64(a), I64(b)) => a == b,
            (U8(a), U8(b)) => a == b,
            (U16(a), U16(b)) => a == b,
            (U32(a), U32(b)) => a == b,
            (U64(a), U64(b)) => a == b,
            // bit comparison keeps equality reflexive in the presence of NaN
            (F32(a), F32(b)) => a.to_bits() == b.to_bits(),
            (F64(a), F64(b)) => a.to_bits() == b.to_bits(),
            (Text(a), Text(b)) => a == b,
            (Object(a), Object(b)) => a == b,
            (TextList(a), TextList(b)) => a == b,
            (Nested(a), Nested(b)) => a == b,
            (ValueSet(a), ValueSet(b)) => a == b,
            (Null(a), Null(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ValueContainer {}

impl fmt::Display for ValueContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ValueContainer::*;
        match self {
            Empty => f.write_str("<empty>"),
            Bool(v) => write!(f, "{v}"),
            I8(v) => write!(f, "{v}"),
            I16(v) => write!(f, "{v}"),
            I32(v) => write!(f, "{v}"),
            I64(v) => write!(f, "{v}"),
            U8(v) => write!(f, "{v}"),
            U16(v) => write!(f, "{v}"),
            U32(v) => write!(f, "{v}"),
            U64(v) => write!(f, "{v}"),
            F32(v) => write!(f, "{v}"),
            F64(v) => write!(f, "{v}"),
            Text(v) => write!(f, "{v:?}"),
            Object(v) => write!(f, "<object {} bytes>", v.len()),
            TextList(v) => write!(f, "{v:?}"),
            Nested(v) => write!(f, "[{v}]"),
            ValueSet(v) => write!(f, "{v}"),
            Null(kind) => write!(f, "<null {kind:?}>"),
        }
    }
}

impl ValueContainer {
    /// The storage kind of the currently held value.
    pub fn kind(&self) -> StorageKind {
        StorageKind::from(self)
    }

    /// True when the container holds no value at all.
    pub fn is_empty(&self) -> bool {
        matches!(self, ValueContainer::Empty)
    }

    /// True when the container holds a null of some nullable kind.
    pub fn is_null(&self) -> bool {
        matches!(self, ValueContainer::Null(_))
    }

    /// An estimate of the number of bytes this value occupies on the wire.
    ///
    /// Used by the propagation engine to bound frame sizes; it does not need
    /// to be exact, only monotone in the real size.
    pub fn estimated_content_size(&self) -> usize {
        use ValueContainer::*;
        match self {
            Empty | Null(_) => 1,
            Bool(_) | I8(_) | U8(_) => 2,
            I16(_) | U16(_) => 3,
            I32(_) | U32(_) | F32(_) => 5,
            I64(_) | U64(_) | F64(_) => 9,
            Text(s) => 5 + s.len(),
            Object(b) => 5 + b.len(),
            TextList(l) => 5 + l.iter().map(|s| 5 + s.len()).sum::<usize>(),
            Nested(inner) => 1 + inner.estimated_content_size(),
            ValueSet(set) => set.estimated_content_size(),
        }
    }

    fn as_i128(&self) -> Option<i128> {
        use ValueContainer::*;
        match *self {
            Bool(v) => Some(v as i128),
            I8(v) => Some(v as i128),
            I16(v) => Some(v as i128),
            I32(v) => Some(v as i128),
            I64(v) => Some(v as i128),
            U8(v) => Some(v as i128),
            U16(v) => Some(v as i128),
            U32(v) => Some(v as i128),
            U64(v) => Some(v as i128),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        use ValueContainer::*;
        match *self {
            F32(v) => Some(v as f64),
            F64(v) => Some(v),
            _ => self.as_i128().map(|v| v as f64),
        }
    }

    /// Convert this value to the given storage kind.
    ///
    /// Integer conversions are range checked, text converts to and from the
    /// numeric kinds by parse/format, and the structured kinds (object, text
    /// list, nested, value set) only convert to themselves. When `nullable`
    /// is set, an empty or null source converts to a null of the target
    /// kind instead of failing.
    pub fn convert_to_kind(
        &self,
        to: StorageKind,
        nullable: bool,
    ) -> Result<ValueContainer, ValueConversionError> {
        use StorageKind as K;
        use ValueContainer::*;

        if to == K::Empty {
            return Ok(Empty);
        }
        if self.is_empty() || self.is_null() {
            return if nullable {
                Ok(Null(to))
            } else if self.is_null() {
                Err(ValueConversionError::UnexpectedNull)
            } else {
                Err(ValueConversionError::EmptyValue)
            };
        }
        if self.kind() == to {
            return Ok(self.clone());
        }

        let mismatch = || ValueConversionError::KindMismatch {
            from: self.kind(),
            to,
        };
        let out_of_range = |value: &dyn fmt::Display| ValueConversionError::OutOfRange {
            from: self.kind(),
            to,
            value: value.to_string(),
        };

        macro_rules! narrow {
            ($ty:ty, $variant:ident) => {{
                let wide = match self {
                    Text(s) => s
                        .trim()
                        .parse::<i128>()
                        .map_err(|_| ValueConversionError::ParseFailed {
                            text: s.clone(),
                            to,
                        })?,
                    other => other.as_i128().ok_or_else(mismatch)?,
                };
                <$ty>::try_from(wide)
                    .map($variant)
                    .map_err(|_| out_of_range(&wide))
            }};
        }

        match to {
            K::Bool => match self {
                Text(s) => match s.trim() {
                    "true" | "True" | "1" => Ok(Bool(true)),
                    "false" | "False" | "0" => Ok(Bool(false)),
                    _ => Err(ValueConversionError::ParseFailed {
                        text: s.clone(),
                        to,
                    }),
                },
                other => other.as_i128().map(|v| Bool(v != 0)).ok_or_else(mismatch),
            },
            K::I8 => narrow!(i8, I8),
            K::I16 => narrow!(i16, I16),
            K::I32 => narrow!(i32, I32),
            K::I64 => narrow!(i64, I64),
            K::U8 => narrow!(u8, U8),
            K::U16 => narrow!(u16, U16),
            K::U32 => narrow!(u32, U32),
            K::U64 => narrow!(u64, U64),
            K::F32 => match self {
                Text(s) => s
                    .trim()
                    .parse::<f32>()
                    .map(F32)
                    .map_err(|_| ValueConversionError::ParseFailed {
                        text: s.clone(),
                        to,
                    }),
                other => other.as_f64().map(|v| F32(v as f32)).ok_or_else(mismatch),
            },
            K::F64 => match self {
                Text(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(F64)
                    .map_err(|_| ValueConversionError::ParseFailed {
                        text: s.clone(),
                        to,
                    }),
                other => other.as_f64().map(F64).ok_or_else(mismatch),
            },
            K::Text => match self {
                Bool(v) => Ok(Text(v.to_string())),
                other => {
                    if let Some(v) = other.as_i128() {
                        Ok(Text(v.to_string()))
                    } else if let Some(v) = other.as_f64() {
                        Ok(Text(v.to_string()))
                    } else {
                        Err(mismatch())
                    }
                }
            },
            // structured kinds convert only to themselves, which the
            // same-kind fast path above already handled
            K::Object | K::TextList | K::Nested | K::ValueSet | K::Null | K::Empty => {
                Err(mismatch())
            }
        }
    }
}

impl From<&str> for ValueContainer {
    fn from(v: &str) -> Self {
        ValueContainer::Text(v.to_owned())
    }
}

/// The `(storage kind, nullable)` pair a static Rust type maps to.
///
/// Typed accessors resolve this once at creation time and route every
/// subsequent get and set through the same pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedType {
    pub kind: StorageKind,
    pub nullable: bool,
}

/// A static type that can be stored in and recovered from a
/// [`ValueContainer`].
pub trait ContainerCodec: Sized + Default {
    /// The storage kind and nullability this type maps to.
    const DECODED: DecodedType;

    /// Encode a value of this type into a container.
    fn encode(self) -> ValueContainer;

    /// Decode a container into this type, converting the stored kind where
    /// the conversion rules allow it.
    fn decode(vc: &ValueContainer) -> Result<Self, ValueConversionError>;
}

macro_rules! numeric_codec {
    ($ty:ty, $kind:ident, $variant:ident) => {
        impl ContainerCodec for $ty {
            const DECODED: DecodedType = DecodedType {
                kind: StorageKind::$kind,
                nullable: false,
            };

            fn encode(self) -> ValueContainer {
                ValueContainer::$variant(self)
            }

            fn decode(vc: &ValueContainer) -> Result<Self, ValueConversionError> {
                match vc.convert_to_kind(StorageKind::$kind, false)? {
                    ValueContainer::$variant(v) => Ok(v),
                    other => Err(ValueConversionError::KindMismatch {
                        from: other.kind(),
                        to: StorageKind::$kind,
                    }),
                }
            }
        }

        impl ContainerCodec for Option<$ty> {
            const DECODED: DecodedType = DecodedType {
                kind: StorageKind::$kind,
                nullable: true,
            };

            fn encode(self) -> ValueContainer {
                match self {
                    Some(v) => ValueContainer::$variant(v),
                    None => ValueContainer::Null(StorageKind::$kind),
                }
            }

            fn decode(vc: &ValueContainer) -> Result<Self, ValueConversionError> {
                match vc.convert_to_kind(StorageKind::$kind, true)? {
                    ValueContainer::$variant(v) => Ok(Some(v)),
                    ValueContainer::Null(_) => Ok(None),
                    other => Err(ValueConversionError::KindMismatch {
                        from: other.kind(),
                        to: StorageKind::$kind,
                    }),
                }
            }
        }
    };
}

numeric_codec!(bool, Bool, Bool);
numeric_codec!(i8, I8, I8);
numeric_codec!(i16, I16, I16);
numeric_codec!(i32, I32, I32);
numeric_codec!(i64, I64, I64);
numeric_codec!(u8, U8, U8);
numeric_codec!(u16, U16, U16);
numeric_codec!(u32, U32, U32);
numeric_codec!(u64, U64, U64);
numeric_codec!(f32, F32, F32);
numeric_codec!(f64, F64, F64);

impl ContainerCodec for String {
    const DECODED: DecodedType = DecodedType {
        kind: StorageKind::Text,
        nullable: false,
    };

    fn encode(self) -> ValueContainer {
        ValueContainer::Text(self)
    }

    fn decode(vc: &ValueContainer) -> Result<Self, ValueConversionError> {
        match vc.convert_to_kind(StorageKind::Text, false)? {
            ValueContainer::Text(s) => Ok(s),
            other => Err(ValueConversionError::KindMismatch {
                from: other.kind(),
                to: StorageKind::Text,
            }),
        }
    }
}

impl ContainerCodec for Vec<String> {
    const DECODED: DecodedType = DecodedType {
        kind: StorageKind::TextList,
        nullable: false,
    };

    fn encode(self) -> ValueContainer {
        ValueContainer::TextList(self)
    }

    fn decode(vc: &ValueContainer) -> Result<Self, ValueConversionError> {
        match vc {
            ValueContainer::TextList(l) => Ok(l.clone()),
            other => Err(ValueConversionError::KindMismatch {
                from: other.kind(),
                to: StorageKind::TextList,
            }),
        }
    }
}

impl ContainerCodec for NamedValueSet {
    const DECODED: DecodedType = DecodedType {
        kind: StorageKind::ValueSet,
        nullable: false,
    };

    fn encode(self) -> ValueContainer {
        ValueContainer::ValueSet(self)
    }

    fn decode(vc: &ValueContainer) -> Result<Self, ValueConversionError> {
        match vc {
            ValueContainer::ValueSet(s) => Ok(s.clone()),
            other => Err(ValueConversionError::KindMismatch {
                from: other.kind(),
                to: StorageKind::ValueSet,
            }),
        }
    }
}

impl ContainerCodec for ValueContainer {
    const DECODED: DecodedType = DecodedType {
        kind: StorageKind::Nested,
        nullable: false,
    };

    fn encode(self) -> ValueContainer {
        self
    }

    fn decode(vc: &ValueContainer) -> Result<Self, ValueConversionError> {
        Ok(vc.clone())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;

    fn leaf_container() -> impl Strategy<Value = ValueContainer> {
        prop_oneof![
            Just(ValueContainer::Empty),
            any::<bool>().prop_map(ValueContainer::Bool),
            any::<i8>().prop_map(ValueContainer::I8),
            any::<i32>().prop_map(ValueContainer::I32),
            any::<i64>().prop_map(ValueContainer::I64),
            any::<u64>().prop_map(ValueContainer::U64),
            any::<f32>().prop_map(ValueContainer::F32),
            any::<f64>().prop_map(ValueContainer::F64),
            any::<String>().prop_map(ValueContainer::Text),
            any::<Vec<u8>>().prop_map(ValueContainer::Object),
            any::<Vec<String>>().prop_map(ValueContainer::TextList),
            Just(ValueContainer::Null(StorageKind::I32)),
        ]
    }

    fn arbitrary_container() -> impl Strategy<Value = ValueContainer> {
        leaf_container().prop_recursive(2, 8, 4, |inner| {
            prop_oneof![
                inner.clone().prop_map(|v| ValueContainer::Nested(Box::new(v))),
                proptest::collection::vec((any::<String>(), inner), 0..4).prop_map(|pairs| {
                    ValueContainer::ValueSet(pairs.into_iter().collect())
                }),
            ]
        })
    }

    #[allow(clippy::eq_op)]
    #[test_strategy::proptest]
    fn eq_reflexive(#[strategy(arbitrary_container())] x: ValueContainer) {
        prop_assert!(x == x);
    }

    #[test_strategy::proptest]
    fn eq_symmetric(
        #[strategy(arbitrary_container())] x: ValueContainer,
        #[strategy(arbitrary_container())] y: ValueContainer,
    ) {
        prop_assert_eq!(x == y, y == x);
    }

    #[test_strategy::proptest]
    fn clone_is_equal(#[strategy(arbitrary_container())] x: ValueContainer) {
        prop_assert_eq!(x.clone(), x);
    }

    #[test]
    fn nan_is_reflexive() {
        let v = ValueContainer::F64(f64::NAN);
        assert_eq!(v, v.clone());
    }

    #[test]
    fn empty_is_distinct_from_null() {
        assert_ne!(
            ValueContainer::Empty,
            ValueContainer::Null(StorageKind::I32)
        );
    }

    #[test]
    fn clone_is_independent() {
        let original = ValueContainer::TextList(vec!["a".into()]);
        let mut copy = original.clone();
        if let ValueContainer::TextList(l) = &mut copy {
            l.push("b".into());
        }
        assert_eq!(original, ValueContainer::TextList(vec!["a".into()]));
    }

    #[test]
    fn numeric_narrowing_is_range_checked() {
        let v = ValueContainer::I32(300);
        assert!(matches!(
            v.convert_to_kind(StorageKind::U8, false),
            Err(ValueConversionError::OutOfRange { .. })
        ));
        assert_eq!(
            v.convert_to_kind(StorageKind::I64, false).unwrap(),
            ValueContainer::I64(300)
        );
    }

    #[test]
    fn text_parses_to_numerics() {
        let v = ValueContainer::Text(" 42 ".into());
        assert_eq!(
            v.convert_to_kind(StorageKind::U16, false).unwrap(),
            ValueContainer::U16(42)
        );
        assert_eq!(
            v.convert_to_kind(StorageKind::F64, false).unwrap(),
            ValueContainer::F64(42.0)
        );
    }

    #[test]
    fn empty_converts_to_null_when_nullable() {
        assert_eq!(
            ValueContainer::Empty
                .convert_to_kind(StorageKind::I32, true)
                .unwrap(),
            ValueContainer::Null(StorageKind::I32)
        );
        assert!(matches!(
            ValueContainer::Empty.convert_to_kind(StorageKind::I32, false),
            Err(ValueConversionError::EmptyValue)
        ));
    }

    #[test]
    fn codec_decodes_through_conversion() {
        let v = ValueContainer::I16(7);
        assert_eq!(i64::decode(&v).unwrap(), 7);
        assert_eq!(Option::<u8>::decode(&v).unwrap(), Some(7));
        assert_eq!(
            Option::<u8>::decode(&ValueContainer::Null(StorageKind::U8)).unwrap(),
            None
        );
    }

    #[test]
    fn estimated_size_grows_with_content() {
        let small = ValueContainer::Text("a".into());
        let large = ValueContainer::Text("a".repeat(100));
        assert!(small.estimated_content_size() < large.estimated_content_size());
    }

    #[test]
    fn containers_survive_bincode() {
        let v = ValueContainer::ValueSet(
            [
                ("a".to_owned(), ValueContainer::I32(1)),
                ("b".to_owned(), ValueContainer::Text("x".into())),
            ]
            .into_iter()
            .collect(),
        );
        let bytes = bincode::serialize(&v).unwrap();
        assert_eq!(bincode::deserialize::<ValueContainer>(&bytes).unwrap(), v);
    }
}
