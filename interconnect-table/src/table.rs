use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use ahash::RandomState;
use interconnect_data::{ContainerCodec, ValueContainer};
use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::accessor::{Accessor, TypedAccessor};
use crate::entry::TableEntry;
use crate::mapping::{NameMapper, NameMappingRule};
use crate::next_seq;

/// Callback invoked under the table lock once per entry written by a set
/// batch, with the entry's name and freshly written container.
///
/// The hook must be cheap and must not acquire other locks; a hook that
/// blocks or takes a lock held elsewhere while that holder waits on this
/// table will deadlock. The table does not (and cannot) enforce this.
pub type PostSetHook = Box<dyn Fn(&str, &ValueContainer) + Send>;

/// Handle for removing a change observer registered with
/// [`Table::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationToken(u64);

struct TableInner {
    entries: Vec<TableEntry>,
    by_name: std::collections::HashMap<String, u32, RandomState>,
    mapper: NameMapper,
    post_set_hook: Option<PostSetHook>,
}

/// A named registry of named values.
///
/// All mutation is linearized under one internal lock and stamped onto the
/// table's global sequence number, which advances on every observable state
/// transition (entry creation, any write, any reset) and wraps skipping
/// zero. A multi-entry [`set_many`](Table::set_many) is atomic: observers
/// either see none of the batch or all of it.
///
/// Tables are always shared (`Arc<Table>`); accessors hold the arc plus the
/// entry's dense id, so there are no back-pointer cycles to manage.
pub struct Table {
    name: String,
    inner: Mutex<TableInner>,
    global_seq: AtomicU32,
    names_len: AtomicUsize,
    observers: RwLock<Vec<(NotificationToken, Arc<dyn Fn() + Send + Sync>)>>,
    next_observer_id: AtomicU64,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("names", &self.names_length())
            .field("global_seq", &self.global_seq())
            .finish()
    }
}

impl Table {
    pub fn new(name: impl Into<String>) -> Arc<Table> {
        Arc::new(Table {
            name: name.into(),
            inner: Mutex::new(TableInner {
                entries: Vec::new(),
                by_name: Default::default(),
                mapper: Default::default(),
                post_set_hook: None,
            }),
            global_seq: AtomicU32::new(0),
            names_len: AtomicUsize::new(0),
            observers: RwLock::new(Vec::new()),
            next_observer_id: AtomicU64::new(1),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The table's global sequence number. Readable without the lock;
    /// strictly ordered with respect to all mutations.
    pub fn global_seq(&self) -> u32 {
        self.global_seq.load(Ordering::Acquire)
    }

    /// Fast-path name count. Updated after a new name is fully linked, so a
    /// concurrent reader may briefly observe `n - 1` while a writer adds;
    /// readers that need the strong view must go through
    /// [`names_range`](Table::names_range).
    pub fn names_length(&self) -> usize {
        self.names_len.load(Ordering::Acquire)
    }

    /// A snapshot slice of the insertion-ordered name list. `max == 0` means
    /// "all from `start`"; out-of-range bounds clamp rather than panic.
    pub fn names_range(&self, start: usize, max: usize) -> Vec<String> {
        let inner = self.inner.lock();
        let len = inner.entries.len();
        let start = start.min(len);
        let end = if max == 0 { len } else { (start + max).min(len) };
        inner.entries[start..end]
            .iter()
            .map(|e| e.name().to_owned())
            .collect()
    }

    // must be called with the inner lock held
    fn bump_global_locked(&self) {
        let next = next_seq(self.global_seq.load(Ordering::Relaxed));
        self.global_seq.store(next, Ordering::Release);
    }

    fn notify(&self) {
        let observers = self.observers.read();
        for (_, observer) in observers.iter() {
            observer();
        }
    }

    /// Register a change observer, called after every table mutation once
    /// the lock has been released. Returns a token for
    /// [`unobserve`](Table::unobserve).
    pub fn observe(&self, f: impl Fn() + Send + Sync + 'static) -> NotificationToken {
        let token = NotificationToken(self.next_observer_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((token, Arc::new(f)));
        token
    }

    pub fn unobserve(&self, token: NotificationToken) {
        self.observers.write().retain(|(t, _)| *t != token);
    }

    /// Install (or remove) the post-set hook. See [`PostSetHook`] for the
    /// contract.
    pub fn set_post_set_hook(&self, hook: Option<PostSetHook>) {
        self.inner.lock().post_set_hook = hook;
    }

    /// Replace the name-mapping rule list and rebuild the exact-match cache.
    pub fn set_mapping_rules(&self, rules: Vec<NameMappingRule>) {
        self.inner.lock().mapper.set_rules(rules);
    }

    /// Append one rule to the mapping list.
    pub fn add_mapping_rule(&self, rule: NameMappingRule) {
        self.inner.lock().mapper.add_rule(rule);
    }

    /// Drop all mapping rules.
    pub fn reset_mapping(&self) {
        self.inner.lock().mapper.reset();
    }

    /// Get an accessor for `name`.
    ///
    /// The name is trimmed; an empty result yields a detached stub accessor
    /// whose operations are all no-ops. Otherwise the name-mapping rules are
    /// applied and the entry for the mapped name is found or created (entry
    /// creation bumps the global seq and notifies observers). The returned
    /// accessor is pre-updated from the entry.
    pub fn get_accessor(self: &Arc<Self>, name: &str) -> Accessor {
        let name = name.trim();
        if name.is_empty() {
            return Accessor::detached();
        }

        let mut created = false;
        let accessor = {
            let mut inner = self.inner.lock();
            let mapped = inner.mapper.map(name).into_owned();
            let id = match inner.by_name.get(mapped.as_str()) {
                Some(&id) => id,
                None => {
                    let id = (inner.entries.len() + 1) as u32;
                    inner.entries.push(TableEntry::new(mapped.clone(), id));
                    inner.by_name.insert(mapped.clone(), id);
                    // link fully before exposing the new count
                    self.names_len.store(inner.entries.len(), Ordering::Release);
                    self.bump_global_locked();
                    created = true;
                    id
                }
            };
            let entry = &inner.entries[(id - 1) as usize];
            Accessor::attached(
                Arc::clone(self),
                id,
                mapped,
                entry.container().clone(),
                entry.seq(),
            )
        };
        if created {
            trace!(table = %self.name, name = %accessor.name(), id = accessor.id(), "created entry");
            self.notify();
        }
        accessor
    }

    /// Typed variant of [`get_accessor`](Table::get_accessor); resolves the
    /// storage kind and nullability for `T` once, at creation.
    pub fn get_typed<T: ContainerCodec>(self: &Arc<Self>, name: &str) -> TypedAccessor<T> {
        TypedAccessor::new(self.get_accessor(name))
    }

    /// The current sequence number of the entry with the given id, or zero
    /// for an unknown id.
    pub fn entry_seq(&self, id: u32) -> u32 {
        if id == 0 {
            return 0;
        }
        let inner = self.inner.lock();
        inner
            .entries
            .get((id - 1) as usize)
            .map_or(0, TableEntry::seq)
    }

    /// Write the cached container of each listed accessor into its entry,
    /// atomically with respect to every other table operation.
    ///
    /// With `optimize` set, accessors without a pending set are skipped, and
    /// a batch with no pending writer at all returns without taking the
    /// lock. Accessors that do not belong to this table are silently
    /// ignored. If anything was written the global seq is bumped once and
    /// observers are notified.
    pub fn set_many(&self, accessors: &mut [&mut Accessor], optimize: bool) {
        if optimize
            && !accessors
                .iter()
                .any(|a| a.is_set_pending() && a.belongs_to(self))
        {
            return;
        }

        let mut wrote = false;
        {
            let mut inner = self.inner.lock();
            let TableInner {
                entries,
                post_set_hook,
                ..
            } = &mut *inner;
            for a in accessors.iter_mut() {
                if !a.belongs_to(self) {
                    continue;
                }
                if optimize && !a.is_set_pending() {
                    continue;
                }
                let entry = &mut entries[(a.entry_id - 1) as usize];
                entry.container = a.cached.clone();
                entry.seq = next_seq(entry.seq);
                a.set_pending = false;
                a.local_seq = entry.seq;
                if let Some(hook) = post_set_hook {
                    hook(entry.name(), &entry.container);
                }
                wrote = true;
            }
            if wrote {
                self.bump_global_locked();
            }
        }
        if wrote {
            self.notify();
        }
    }

    /// Single-accessor form of [`set_many`](Table::set_many).
    pub fn set(&self, accessor: &mut Accessor, optimize: bool) {
        self.set_many(&mut [accessor], optimize);
    }

    /// Refresh each listed accessor whose local seq lags its entry,
    /// atomically, so a batch update observes a consistent snapshot. Does
    /// not bump the global seq.
    pub fn update_many(&self, accessors: &mut [&mut Accessor]) {
        let mut inner = self.inner.lock();
        for a in accessors.iter_mut() {
            if !a.belongs_to(self) {
                continue;
            }
            let entry = &inner.entries[(a.entry_id - 1) as usize];
            if a.local_seq != entry.seq() {
                a.cached = entry.container().clone();
                a.local_seq = entry.seq();
                a.set_pending = false;
            }
        }
    }

    /// Single-accessor form of [`update_many`](Table::update_many).
    pub fn update(&self, accessor: &mut Accessor) {
        self.update_many(&mut [accessor]);
    }

    /// Clear the accessor's entry back to the never-written state: empty
    /// container, entry seq zero. Bumps the global seq and notifies.
    pub fn reset(&self, accessor: &mut Accessor) {
        if !accessor.belongs_to(self) {
            return;
        }
        {
            let mut inner = self.inner.lock();
            let entry = &mut inner.entries[(accessor.entry_id - 1) as usize];
            entry.container = ValueContainer::Empty;
            entry.seq = 0;
            accessor.cached = ValueContainer::Empty;
            accessor.local_seq = 0;
            accessor.set_pending = false;
            self.bump_global_locked();
        }
        self.notify();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn single_write_round_trip() {
        let table = Table::new("T");
        let mut a = table.get_accessor("x");
        a.set_value(ValueContainer::I32(7));
        let mut b = table.get_accessor("x");
        b.update();
        assert_eq!(b.value(), &ValueContainer::I32(7));
        assert_eq!(b.local_seq(), 1);
        assert_eq!(a.local_seq(), 1);
        // one bump from creating "x", one from the set
        assert_eq!(table.global_seq(), 2);
    }

    #[test]
    fn ids_are_dense_and_stable() {
        let table = Table::new("T");
        let a = table.get_accessor("a");
        let b = table.get_accessor("b");
        let c = table.get_accessor("c");
        assert_eq!((a.id(), b.id(), c.id()), (1, 2, 3));
        assert_eq!(table.get_accessor("b").id(), 2);
        assert_eq!(table.names_length(), 3);
    }

    #[test]
    fn batch_set_bumps_global_once_and_is_atomic() {
        let table = Table::new("T");
        let mut a = table.get_accessor("a");
        let mut b = table.get_accessor("b");
        a.stage(ValueContainer::I32(1));
        b.stage(ValueContainer::I32(2));

        let before = table.global_seq();
        table.set_many(&mut [&mut a, &mut b], true);
        assert_eq!(table.global_seq(), before + 1);
        assert_eq!(a.local_seq(), 1);
        assert_eq!(b.local_seq(), 1);

        // an update batch taken after the set sees both new values
        let mut ra = table.get_accessor("a");
        let mut rb = table.get_accessor("b");
        table.update_many(&mut [&mut ra, &mut rb]);
        assert_eq!(ra.value(), &ValueContainer::I32(1));
        assert_eq!(rb.value(), &ValueContainer::I32(2));
    }

    #[test]
    fn optimized_noop_batch_leaves_global_seq_alone() {
        let table = Table::new("T");
        let mut a = table.get_accessor("a");
        a.set_value(ValueContainer::I32(1));
        let before = table.global_seq();
        // nothing pending any more
        table.set_many(&mut [&mut a], true);
        assert_eq!(table.global_seq(), before);
    }

    #[test]
    fn set_pending_follows_value_equality() {
        let table = Table::new("T");
        let mut a = table.get_accessor("x");
        a.set_value(ValueContainer::I32(5));
        assert!(!a.is_set_pending());

        a.stage(ValueContainer::I32(5));
        assert!(!a.is_set_pending(), "equal restage must not set pending");

        a.stage(ValueContainer::I32(6));
        assert!(a.is_set_pending());
        a.set();
        assert!(!a.is_set_pending());
    }

    #[test]
    fn entry_seq_is_monotonic_per_entry() {
        let table = Table::new("T");
        let mut a = table.get_accessor("x");
        for i in 0..5 {
            a.set_value(ValueContainer::I32(i));
            assert_eq!(a.local_seq(), (i + 1) as u32);
        }
    }

    #[test]
    fn reset_returns_entry_to_never_written() {
        let table = Table::new("T");
        let mut a = table.get_accessor("x");
        a.set_value(ValueContainer::I32(1));
        assert!(a.has_value_been_set());
        let before = table.global_seq();
        a.reset();
        assert_eq!(a.value(), &ValueContainer::Empty);
        assert_eq!(a.local_seq(), 0);
        assert!(!a.has_value_been_set());
        assert_eq!(table.global_seq(), before + 1);
        assert_eq!(table.entry_seq(a.id()), 0);
    }

    #[test]
    fn mapped_names_share_entries() {
        let table = Table::new("T");
        table.set_mapping_rules(vec![NameMappingRule::regex("foo.*", "bar.$0").unwrap()]);
        let a = table.get_accessor("foo.zz");
        assert_eq!(a.name(), "bar.foo.zz");
        let b = table.get_accessor("bar.foo.zz");
        assert_eq!(b.id(), a.id());
        assert_eq!(table.names_length(), 1);
    }

    #[test]
    fn empty_name_yields_detached_stub() {
        let table = Table::new("T");
        let mut stub = table.get_accessor("  ");
        assert!(!stub.is_attached());
        let before = table.global_seq();
        stub.set_value(ValueContainer::I32(1));
        stub.update();
        stub.reset();
        assert_eq!(table.global_seq(), before);
        assert_eq!(table.names_length(), 0);
    }

    #[test]
    fn names_range_clamps() {
        let table = Table::new("T");
        for name in ["a", "b", "c"] {
            table.get_accessor(name);
        }
        assert_eq!(table.names_range(0, 0), vec!["a", "b", "c"]);
        assert_eq!(table.names_range(1, 1), vec!["b"]);
        assert_eq!(table.names_range(2, 10), vec!["c"]);
        assert!(table.names_range(7, 2).is_empty());
    }

    #[test]
    fn observers_fire_after_mutations() {
        let table = Table::new("T");
        let hits = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&hits);
        let token = table.observe(move || {
            observed.fetch_add(1, Ordering::SeqCst);
        });

        let mut a = table.get_accessor("x"); // create -> 1
        a.set_value(ValueContainer::I32(1)); // set -> 2
        a.reset(); // reset -> 3
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        table.unobserve(token);
        a.set_value(ValueContainer::I32(2));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn post_set_hook_sees_each_written_entry() {
        let table = Table::new("T");
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        table.set_post_set_hook(Some(Box::new(move |name, vc| {
            sink.lock().push((name.to_owned(), vc.clone()));
        })));

        let mut a = table.get_accessor("a");
        let mut b = table.get_accessor("b");
        a.stage(ValueContainer::I32(1));
        b.stage(ValueContainer::I32(2));
        table.set_many(&mut [&mut a, &mut b], true);

        let seen = seen.lock();
        assert_eq!(
            *seen,
            vec![
                ("a".to_owned(), ValueContainer::I32(1)),
                ("b".to_owned(), ValueContainer::I32(2)),
            ]
        );
    }

    #[test]
    fn foreign_accessors_are_skipped() {
        let table = Table::new("T");
        let other = Table::new("U");
        let mut foreign = other.get_accessor("x");
        foreign.stage(ValueContainer::I32(9));
        let before = table.global_seq();
        table.set_many(&mut [&mut foreign], false);
        assert_eq!(table.global_seq(), before);
        // the foreign accessor still has its pending write for its own table
        assert!(foreign.is_set_pending());
    }

    #[test]
    fn concurrent_batch_reads_never_tear() {
        let table = Table::new("T");
        let mut wa = table.get_accessor("a");
        let mut wb = table.get_accessor("b");

        let reader_table = Arc::clone(&table);
        let stop = Arc::new(AtomicUsize::new(0));
        let reader_stop = Arc::clone(&stop);
        let reader = std::thread::spawn(move || {
            let mut ra = reader_table.get_accessor("a");
            let mut rb = reader_table.get_accessor("b");
            while reader_stop.load(Ordering::Relaxed) == 0 {
                reader_table.update_many(&mut [&mut ra, &mut rb]);
                // both entries are always written in the same batch with
                // equal payloads, so a torn read would show a mismatch
                assert_eq!(ra.value(), rb.value());
            }
        });

        for i in 0..1000 {
            wa.stage(ValueContainer::I64(i));
            wb.stage(ValueContainer::I64(i));
            table.set_many(&mut [&mut wa, &mut wb], false);
        }
        stop.store(1, Ordering::Relaxed);
        reader.join().unwrap();
    }
}
