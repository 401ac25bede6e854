//! Value containers for the interconnect fabric.
//!
//! An interconnect table stores one [`ValueContainer`] per named entry. The
//! container is a tagged union over a fixed set of storage kinds; parts that
//! publish or observe values agree on nothing beyond this type and the name
//! of the entry. [`NamedValueSet`] bundles several named containers together
//! and is used both as a container payload and as the parameter/result set of
//! remote service actions.

mod container;
mod error;
mod value_set;

pub use container::{ContainerCodec, DecodedType, StorageKind, ValueContainer};
pub use error::ValueConversionError;
pub use value_set::NamedValueSet;
