use std::collections::HashMap;

use ahash::RandomState;
use interconnect_proto::ProtocolError;
use interconnect_table::Accessor;

/// Per-propagated-name session state.
pub(crate) struct TrackingItem {
    /// The engine's own accessor for the local entry backing this name.
    pub accessor: Accessor,

    /// The connection-level name (local prefix already stripped).
    pub conn_name: String,

    /// Server-assigned id; zero until the server assigns one. On the server
    /// this always equals the item's position + 1 in the tracking vector.
    pub id: u32,

    /// Server only: the registration record for this item has been queued.
    pub registration_sent: bool,

    /// Client only: the add-name request for this item has been queued.
    pub add_request_sent: bool,

    /// The item's cached container was assigned from an inbound vpi in the
    /// current service pass and awaits the batched table write.
    pub staged: bool,

    /// The accessor seq current when this item last had a vpi queued; a
    /// scan emits a normal update when the accessor has moved past it.
    pub last_sent_seq: u32,
}

/// The per-session table of tracking items, indexed by connection name and
/// (on the client) by the peer-assigned id.
#[derive(Default)]
pub(crate) struct TrackingTable {
    items: Vec<TrackingItem>,
    by_conn_name: HashMap<String, usize, RandomState>,
    by_remote_id: HashMap<u32, usize, RandomState>,
}

impl TrackingTable {
    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn contains_name(&self, conn_name: &str) -> bool {
        self.by_conn_name.contains_key(conn_name)
    }

    pub(crate) fn index_of_name(&self, conn_name: &str) -> Option<usize> {
        self.by_conn_name.get(conn_name).copied()
    }

    /// Client-side id lookup, populated from received registration records.
    pub(crate) fn index_of_remote_id(&self, id: u32) -> Option<usize> {
        self.by_remote_id.get(&id).copied()
    }

    /// Server-side id lookup: the id is the position in the vector.
    pub(crate) fn index_of_server_id(&self, id: u32) -> Option<usize> {
        let index = (id as usize).checked_sub(1)?;
        (index < self.items.len()).then_some(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> &mut TrackingItem {
        &mut self.items[index]
    }

    /// Insert a new item and return its index.
    pub(crate) fn insert(&mut self, accessor: Accessor, conn_name: String, id: u32) -> usize {
        let index = self.items.len();
        self.by_conn_name.insert(conn_name.clone(), index);
        if id != 0 {
            self.by_remote_id.insert(id, index);
        }
        self.items.push(TrackingItem {
            accessor,
            conn_name,
            id,
            registration_sent: false,
            add_request_sent: false,
            staged: false,
            last_sent_seq: 0,
        });
        index
    }

    /// Bind a peer-assigned id to an existing item (client side).
    pub(crate) fn bind_remote_id(&mut self, index: usize, id: u32) -> Result<(), ProtocolError> {
        if let Some(&existing) = self.by_remote_id.get(&id) {
            if existing != index {
                return Err(ProtocolError::DuplicateRegistrationId { id });
            }
            return Ok(());
        }
        self.items[index].id = id;
        self.by_remote_id.insert(id, index);
        Ok(())
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut TrackingItem> {
        self.items.iter_mut()
    }

    /// Mutable accessors of all currently staged items, in item order.
    pub(crate) fn staged_accessors(&mut self) -> Vec<&mut Accessor> {
        self.items
            .iter_mut()
            .filter(|item| item.staged)
            .map(|item| &mut item.accessor)
            .collect()
    }

    /// Close out a staged batch after the table write: the accessor seq now
    /// reflects the inbound value, and recording it as sent keeps the next
    /// scan from echoing the value back to the peer.
    pub(crate) fn finish_staged(&mut self) {
        for item in &mut self.items {
            if item.staged {
                item.last_sent_seq = item.accessor.local_seq();
                item.staged = false;
            }
        }
    }

    pub(crate) fn any_staged(&self) -> bool {
        self.items.iter().any(|item| item.staged)
    }
}

#[cfg(test)]
mod tests {
    use interconnect_table::Table;

    use super::*;

    #[test]
    fn server_id_is_position_plus_one() {
        let table = Table::new("T");
        let mut tracking = TrackingTable::default();
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            let accessor = table.get_accessor(name);
            let index = tracking.insert(accessor, (*name).to_owned(), (i + 1) as u32);
            assert_eq!(index, i);
        }
        assert_eq!(tracking.index_of_server_id(2), Some(1));
        assert_eq!(tracking.index_of_server_id(0), None);
        assert_eq!(tracking.index_of_server_id(4), None);
    }

    #[test]
    fn duplicate_remote_id_binding_is_rejected() {
        let table = Table::new("T");
        let mut tracking = TrackingTable::default();
        let a = tracking.insert(table.get_accessor("a"), "a".into(), 0);
        let b = tracking.insert(table.get_accessor("b"), "b".into(), 0);
        tracking.bind_remote_id(a, 7).unwrap();
        // rebinding the same pair is idempotent
        tracking.bind_remote_id(a, 7).unwrap();
        assert!(matches!(
            tracking.bind_remote_id(b, 7),
            Err(ProtocolError::DuplicateRegistrationId { id: 7 })
        ));
    }
}
