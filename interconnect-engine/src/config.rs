use std::time::Duration;

use interconnect_proto::MatchRuleSet;
use serde::{Deserialize, Serialize};

/// Configuration for one session endpoint.
///
/// Everything except `part_id` has a usable default; hosts typically
/// deserialize this from their own configuration source.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Identity of this endpoint in logs and in the session-open record.
    pub part_id: String,

    /// Lower bound between consecutive outbound table scans.
    pub nominal_scan_period: Duration,

    /// Client only: holdoff after a failed connection before the automatic
    /// reconnect attempt.
    pub reconnect_holdoff: Duration,

    /// Local table to mirror from/into; empty selects the default table.
    pub local_table_name: String,

    /// Server-side table the client asks for; empty selects the server's
    /// default table.
    pub remote_table_name: String,

    /// When non-empty, only local names under this prefix participate in
    /// the session, and the prefix is stripped from outbound connection
    /// names and prepended to inbound ones.
    pub add_remove_local_prefix: String,

    /// Which connection-level names this endpoint propagates. Defaults to
    /// match-any.
    pub remote_name_match_rules: MatchRuleSet,

    /// How long a pushed frame may wait for its ack before the session is
    /// aborted.
    pub ack_wait_limit: Duration,

    /// Cap on unacknowledged outbound frames.
    pub max_pending_frames: usize,

    /// Cap on the cumulative estimated bytes of unacknowledged frames.
    pub max_pending_bytes: usize,

    /// Soft limit at which frame packing stops adding records.
    pub nominal_max_bytes_per_frame: usize,

    /// After this long with no traffic in either direction, send a ping.
    pub idle_ping_after: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig {
            part_id: String::new(),
            nominal_scan_period: Duration::from_millis(100),
            reconnect_holdoff: Duration::from_secs(3),
            local_table_name: String::new(),
            remote_table_name: String::new(),
            add_remove_local_prefix: String::new(),
            remote_name_match_rules: MatchRuleSet::match_any(),
            ack_wait_limit: Duration::from_secs(30),
            max_pending_frames: 100,
            max_pending_bytes: 10_000_000,
            nominal_max_bytes_per_frame: 250_000,
            idle_ping_after: Duration::from_secs(10),
        }
    }
}

impl EndpointConfig {
    pub fn new(part_id: impl Into<String>) -> Self {
        EndpointConfig {
            part_id: part_id.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = EndpointConfig::default();
        assert_eq!(cfg.nominal_scan_period, Duration::from_millis(100));
        assert_eq!(cfg.reconnect_holdoff, Duration::from_secs(3));
        assert_eq!(cfg.ack_wait_limit, Duration::from_secs(30));
        assert_eq!(cfg.max_pending_frames, 100);
        assert_eq!(cfg.max_pending_bytes, 10_000_000);
        assert_eq!(cfg.nominal_max_bytes_per_frame, 250_000);
        assert_eq!(cfg.idle_ping_after, Duration::from_secs(10));
    }
}
