//! Named-value table spaces.
//!
//! A [`Table`] is a registry of named entries, each holding one
//! [`ValueContainer`](interconnect_data::ValueContainer). Parts interact with
//! entries exclusively through [`Accessor`] handles obtained from the table's
//! factory; the table linearizes all mutation under one lock and stamps every
//! observable change with a global sequence number, so observers can detect
//! changes (and the atomicity of batched writes) without holding the lock.
//!
//! Tables can be registered process-wide in the [`TableRegistry`], which also
//! owns the on-demand default table.

mod accessor;
mod entry;
mod error;
mod mapping;
mod registry;
mod table;

pub use accessor::{Accessor, TypedAccessor};
pub use entry::TableEntry;
pub use error::TableError;
pub use mapping::NameMappingRule;
pub use registry::TableRegistry;
pub use table::{NotificationToken, PostSetHook, Table};

/// Advance a wrapping sequence number, skipping zero.
///
/// Zero is reserved everywhere as "never written" (entry seqs) or "absent"
/// (frame seq and ack fields), so counters step from `u32::MAX` to 1.
pub fn next_seq(seq: u32) -> u32 {
    match seq.wrapping_add(1) {
        0 => 1,
        n => n,
    }
}

#[cfg(test)]
mod seq_tests {
    use super::next_seq;

    #[test]
    fn skips_zero_on_wrap() {
        assert_eq!(next_seq(0), 1);
        assert_eq!(next_seq(1), 2);
        assert_eq!(next_seq(u32::MAX), 1);
    }
}
