use std::collections::HashMap;
use std::sync::Arc;

use ahash::RandomState;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::TableError;
use crate::table::Table;

/// Name of the table returned when a lookup passes no name.
pub const DEFAULT_TABLE_NAME: &str = "default";

static GLOBAL_REGISTRY: Lazy<TableRegistry> = Lazy::new(TableRegistry::new);

/// A process-wide mapping from table name to table.
///
/// The global registry is initialized on demand; tests that need isolation
/// can construct their own registry (or unregistered tables) instead, and
/// suites that do touch the global one can wipe it with
/// [`clear_for_test`](TableRegistry::clear_for_test).
pub struct TableRegistry {
    tables: Mutex<HashMap<String, Arc<Table>, RandomState>>,
}

impl Default for TableRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TableRegistry {
    pub fn new() -> Self {
        TableRegistry {
            tables: Mutex::new(Default::default()),
        }
    }

    /// The process-wide registry.
    pub fn global() -> &'static TableRegistry {
        &GLOBAL_REGISTRY
    }

    /// Register a table under its own name.
    ///
    /// Registration is the configuration-time surface, so this is where the
    /// fabric's config errors surface; callers decide whether to propagate
    /// or drop them.
    pub fn register(&self, table: Arc<Table>) -> Result<(), TableError> {
        if table.name().is_empty() {
            return Err(TableError::EmptyTableName);
        }
        let mut tables = self.tables.lock();
        if tables.contains_key(table.name()) {
            return Err(TableError::DuplicateTableName(table.name().to_owned()));
        }
        debug!(table = %table.name(), "registered table");
        tables.insert(table.name().to_owned(), table);
        Ok(())
    }

    /// Find a registered table. An empty name selects the default table.
    pub fn lookup(&self, name: &str) -> Option<Arc<Table>> {
        if name.is_empty() {
            return Some(self.default_table());
        }
        self.tables.lock().get(name).cloned()
    }

    /// Find a registered table, creating and registering it when absent. An
    /// empty name selects the default table.
    pub fn lookup_or_create(&self, name: &str) -> Arc<Table> {
        if name.is_empty() {
            return self.default_table();
        }
        self.tables
            .lock()
            .entry(name.to_owned())
            .or_insert_with(|| Table::new(name))
            .clone()
    }

    /// The registry's default table, created on first use.
    pub fn default_table(&self) -> Arc<Table> {
        self.tables
            .lock()
            .entry(DEFAULT_TABLE_NAME.to_owned())
            .or_insert_with(|| Table::new(DEFAULT_TABLE_NAME))
            .clone()
    }

    /// Drop every registered table, including the default. Only for test
    /// isolation; live accessors keep their tables alive independently.
    pub fn clear_for_test(&self) {
        self.tables.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_registration_fails() {
        let registry = TableRegistry::new();
        registry.register(Table::new("T")).unwrap();
        assert_eq!(
            registry.register(Table::new("T")),
            Err(TableError::DuplicateTableName("T".into()))
        );
    }

    #[test]
    fn empty_name_is_rejected() {
        let registry = TableRegistry::new();
        assert_eq!(
            registry.register(Table::new("")),
            Err(TableError::EmptyTableName)
        );
    }

    #[test]
    fn lookup_with_no_name_returns_the_default_singleton() {
        let registry = TableRegistry::new();
        let a = registry.lookup("").unwrap();
        let b = registry.default_table();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name(), DEFAULT_TABLE_NAME);
    }

    #[test]
    fn lookup_or_create_reuses_tables() {
        let registry = TableRegistry::new();
        let a = registry.lookup_or_create("mine");
        let b = registry.lookup_or_create("mine");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.lookup("mine").is_some());
    }
}
