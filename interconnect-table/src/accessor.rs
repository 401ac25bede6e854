use std::marker::PhantomData;
use std::sync::Arc;

use interconnect_data::{ContainerCodec, DecodedType, ValueContainer, ValueConversionError};

use crate::table::Table;

/// A client handle to one table entry.
///
/// The accessor carries a cached copy of the entry's container, its own
/// local sequence number, and a set-pending bit. Staging a value only
/// touches the cache; [`set`](Accessor::set) and friends push the cache
/// through the owning table under its lock, and
/// [`update`](Accessor::update) pulls the entry back into the cache.
///
/// A detached stub accessor (returned for an empty name) has no table and
/// no entry; all of its operations are no-ops.
#[derive(Debug, Clone)]
pub struct Accessor {
    pub(crate) table: Option<Arc<Table>>,
    pub(crate) entry_id: u32,
    name: String,
    pub(crate) cached: ValueContainer,
    pub(crate) local_seq: u32,
    pub(crate) set_pending: bool,
}

impl Accessor {
    pub(crate) fn detached() -> Self {
        Accessor {
            table: None,
            entry_id: 0,
            name: String::new(),
            cached: ValueContainer::Empty,
            local_seq: 0,
            set_pending: false,
        }
    }

    pub(crate) fn attached(
        table: Arc<Table>,
        entry_id: u32,
        name: String,
        cached: ValueContainer,
        local_seq: u32,
    ) -> Self {
        Accessor {
            table: Some(table),
            entry_id,
            name,
            cached,
            local_seq,
            set_pending: false,
        }
    }

    /// False for the stub accessor a table hands out for an empty name.
    pub fn is_attached(&self) -> bool {
        self.table.is_some()
    }

    pub(crate) fn belongs_to(&self, table: &Table) -> bool {
        self.table
            .as_ref()
            .is_some_and(|t| std::ptr::eq(Arc::as_ptr(t), table))
    }

    /// The entry's post-mapping name. Empty for a detached accessor.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The entry's 1-based id; zero for a detached accessor.
    pub fn id(&self) -> u32 {
        self.entry_id
    }

    /// The locally cached container.
    pub fn value(&self) -> &ValueContainer {
        &self.cached
    }

    pub fn local_seq(&self) -> u32 {
        self.local_seq
    }

    pub fn is_set_pending(&self) -> bool {
        self.set_pending
    }

    /// Whether this entry has ever held a value, as far as this accessor
    /// knows: either it has observed a write, or one is staged here.
    pub fn has_value_been_set(&self) -> bool {
        self.local_seq != 0 || self.set_pending
    }

    /// Whether the entry has moved past this accessor's local seq.
    pub fn is_update_needed(&self) -> bool {
        match &self.table {
            Some(table) => table.entry_seq(self.entry_id) != self.local_seq,
            None => false,
        }
    }

    /// Stage `value` into the cache. Staging a value equal to the cached one
    /// leaves the set-pending bit alone; an unequal value sets it. No-op on
    /// a detached accessor.
    pub fn stage(&mut self, value: ValueContainer) {
        if self.table.is_none() {
            return;
        }
        if value != self.cached {
            self.cached = value;
            self.set_pending = true;
        }
    }

    /// Push the cached container into the entry unconditionally.
    pub fn set(&mut self) {
        if let Some(table) = self.table.clone() {
            table.set(self, false);
        }
    }

    /// Stage `value` and push it, whether or not it differs from the cache.
    pub fn set_value(&mut self, value: ValueContainer) {
        self.stage(value);
        self.set();
    }

    /// Stage `value` and push it only if it differs from the cache.
    pub fn set_if_different(&mut self, value: ValueContainer) {
        self.stage(value);
        if self.set_pending {
            if let Some(table) = self.table.clone() {
                table.set(self, true);
            }
        }
    }

    /// Pull the entry's container into the cache. No-op when the local seq
    /// already matches the entry seq.
    pub fn update(&mut self) {
        if !self.is_update_needed() {
            return;
        }
        if let Some(table) = self.table.clone() {
            table.update(self);
        }
    }

    /// Reset the entry (and this cache) back to the never-written state.
    pub fn reset(&mut self) {
        if let Some(table) = self.table.clone() {
            table.reset(self);
        }
    }
}

/// A typed wrapper over an [`Accessor`].
///
/// The `(storage kind, nullable)` pair for `T` is resolved once when the
/// wrapper is created; every get and set goes through that pair. A get whose
/// conversion fails yields `T::default()` and parks the error on the
/// wrapper instead of panicking or poisoning the table.
#[derive(Debug)]
pub struct TypedAccessor<T: ContainerCodec> {
    inner: Accessor,
    decoded: DecodedType,
    last_get_error: Option<ValueConversionError>,
    _marker: PhantomData<T>,
}

impl<T: ContainerCodec> TypedAccessor<T> {
    pub fn new(inner: Accessor) -> Self {
        TypedAccessor {
            inner,
            decoded: T::DECODED,
            last_get_error: None,
            _marker: PhantomData,
        }
    }

    /// The decoded storage parameters this wrapper routes through.
    pub fn decoded_type(&self) -> DecodedType {
        self.decoded
    }

    /// Decode the cached container, or `T::default()` when the stored kind
    /// cannot be coerced (the error is retained on the wrapper).
    pub fn get(&mut self) -> T {
        match T::decode(self.inner.value()) {
            Ok(v) => {
                self.last_get_error = None;
                v
            }
            Err(e) => {
                self.last_get_error = Some(e);
                T::default()
            }
        }
    }

    /// Decode the cached container without the default fallback.
    pub fn try_get(&self) -> Result<T, ValueConversionError> {
        T::decode(self.inner.value())
    }

    /// The error captured by the most recent failed [`get`](Self::get).
    pub fn last_get_error(&self) -> Option<&ValueConversionError> {
        self.last_get_error.as_ref()
    }

    pub fn set(&mut self, value: T) {
        self.inner.set_value(value.encode());
    }

    pub fn set_if_different(&mut self, value: T) {
        self.inner.set_if_different(value.encode());
    }

    pub fn update(&mut self) {
        self.inner.update();
    }

    pub fn accessor(&self) -> &Accessor {
        &self.inner
    }

    pub fn accessor_mut(&mut self) -> &mut Accessor {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use interconnect_data::StorageKind;

    use super::*;

    #[test]
    fn typed_round_trip() {
        let table = Table::new("T");
        let mut w = table.get_typed::<i32>("n");
        assert_eq!(w.decoded_type().kind, StorageKind::I32);
        assert!(!w.decoded_type().nullable);
        w.set(41);

        let mut r = table.get_typed::<i64>("n");
        r.update();
        // i32 widens to i64 through the conversion rules
        assert_eq!(r.get(), 41);
        assert!(r.last_get_error().is_none());
    }

    #[test]
    fn failed_get_returns_default_and_parks_error() {
        let table = Table::new("T");
        let mut w = table.get_accessor("s");
        w.set_value(ValueContainer::Object(vec![1, 2, 3]));

        let mut r = table.get_typed::<i32>("s");
        r.update();
        assert_eq!(r.get(), 0);
        assert!(matches!(
            r.last_get_error(),
            Some(ValueConversionError::KindMismatch { .. })
        ));
    }

    #[test]
    fn nullable_typed_accessor() {
        let table = Table::new("T");
        let mut w = table.get_typed::<Option<u16>>("m");
        assert!(w.decoded_type().nullable);
        w.set(None);

        let mut r = table.get_typed::<Option<u16>>("m");
        r.update();
        assert_eq!(r.get(), None);

        w.set(Some(7));
        r.update();
        assert_eq!(r.get(), Some(7));
    }

    #[test]
    fn update_needed_tracks_entry_seq() {
        let table = Table::new("T");
        let mut a = table.get_accessor("x");
        let mut b = table.get_accessor("x");
        assert!(!b.is_update_needed());
        a.set_value(ValueContainer::Bool(true));
        assert!(b.is_update_needed());
        b.update();
        assert!(!b.is_update_needed());
        assert_eq!(b.value(), &ValueContainer::Bool(true));
    }
}
