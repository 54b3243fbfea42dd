//! Per-scrape computation of pending send-packet and pending-ack sets per
//! channel, `first_seen` timestamp maintenance, and gauge emission.
//!
//! Mirrors `ibc_monitor/exporter.py::IBCExporter.update_metrics`: send-side
//! pending is always recomputed before ack-side pending for the same
//! channel, since the ack computation consumes the freshly computed
//! `Cvalid` set (spec §5 ordering guarantee).

use std::collections::{BTreeMap, HashMap};

use chrono::DateTime;
use tracing::{debug, info};

use crate::config::ExcludedSequences;
use crate::pagination::{chunk, paginate, repeat_param, BATCH_SIZE};
use crate::rest_client::{RestClient, DEFAULT_QUERY_TIMEOUT};

/// `(chain_id, connection_id, port_id, channel_id)`.
pub type ChannelKey = (String, String, String, String);

/// `sequence -> first_seen_unix_seconds`, ordered so `min()` is O(log n).
pub type PendingSet = BTreeMap<u64, i64>;

pub struct ChannelLabels<'a> {
    pub chain_id: &'a str,
    pub connection_id: &'a str,
    pub port_id: &'a str,
    pub channel_id: &'a str,
    pub cp_chain_id: &'a str,
    pub cp_port_id: &'a str,
    pub cp_channel_id: &'a str,
}

fn key_of(labels: &ChannelLabels) -> ChannelKey {
    (
        labels.chain_id.to_string(),
        labels.connection_id.to_string(),
        labels.port_id.to_string(),
        labels.channel_id.to_string(),
    )
}

/// `oldest_sequence`, `oldest_timestamp`.
fn oldest(set: &PendingSet) -> (u64, i64) {
    match set.iter().next() {
        Some((&seq, &ts)) => (seq, ts),
        None => (0, 0),
    }
}

/// Reconcile a pending map against the freshly observed authoritative set:
/// drop anything no longer present, insert newcomers with `now`. Leaves
/// `first_seen` untouched for surviving sequences.
fn reconcile(pending: &mut PendingSet, observed: &std::collections::HashSet<u64>, now: i64) {
    pending.retain(|seq, _| observed.contains(seq));
    for &seq in observed {
        pending.entry(seq).or_insert(now);
    }
}

/// Parse a Go-style duration string (`"720h"`, `"5m30s"`, any subset,
/// absent components = 0) into whole seconds.
pub fn parse_duration_seconds(s: &str) -> i64 {
    let mut hours = 0i64;
    let mut minutes = 0i64;
    let mut seconds = 0i64;
    let mut num = String::new();
    for c in s.chars() {
        match c {
            '0'..='9' => num.push(c),
            'h' => {
                hours = num.parse().unwrap_or(0);
                num.clear();
            }
            'm' => {
                minutes = num.parse().unwrap_or(0);
                num.clear();
            }
            's' => {
                seconds = num.parse().unwrap_or(0);
                num.clear();
            }
            _ => num.clear(),
        }
    }
    hours * 3600 + minutes * 60 + seconds
}

/// Parse an RFC-3339 timestamp (any fractional-second precision) into
/// epoch seconds, returning 0 on any parse failure.
pub fn parse_rfc3339_to_epoch(ts: &str) -> i64 {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.timestamp())
        .unwrap_or(0)
}

#[derive(Default, Clone, Copy)]
pub struct ChannelBacklog {
    pub send_size: usize,
    pub send_oldest_seq: u64,
    pub send_oldest_ts: i64,
    pub ack_size: usize,
    pub ack_oldest_seq: u64,
    pub ack_oldest_ts: i64,
}

#[derive(Default)]
pub struct Engine {
    pending_packets: HashMap<ChannelKey, PendingSet>,
    pending_acks: HashMap<ChannelKey, PendingSet>,
}

impl Engine {
    pub fn new() -> Self {
        Engine::default()
    }

    pub fn pending_packets(&self, key: &ChannelKey) -> Option<&PendingSet> {
        self.pending_packets.get(key)
    }

    pub fn pending_acks(&self, key: &ChannelKey) -> Option<&PendingSet> {
        self.pending_acks.get(key)
    }

    /// Run the full per-channel update for one direction: `send` is the
    /// chain that committed the packets, `recv` is its counterparty (the
    /// chain that would have acknowledged them). `recv` is `None` when the
    /// counterparty chain has no configured REST client.
    pub async fn update_channel(
        &mut self,
        now: i64,
        excluded: &ExcludedSequences,
        send: &mut RestClient,
        recv: Option<&mut RestClient>,
        labels: &ChannelLabels<'_>,
    ) -> ChannelBacklog {
        let key = key_of(labels);

        // 1) observed commitments, minus excluded sequences.
        let commitments = paginate(
            send,
            &format!(
                "/ibc/core/channel/v1/channels/{}/ports/{}/packet_commitments",
                labels.channel_id, labels.port_id
            ),
            "commitments",
            DEFAULT_QUERY_TIMEOUT,
        )
        .await;
        let valid_seqs: Vec<u64> = commitments
            .iter()
            .filter_map(|c| c.get("sequence").and_then(sequence_as_u64))
            .filter(|seq| !excluded.is_excluded(labels.channel_id, *seq))
            .collect();
        let valid_set: std::collections::HashSet<u64> = valid_seqs.iter().copied().collect();

        // 2) send-packet pending update (strictly before ack-side).
        let send_pending = self.pending_packets.entry(key.clone()).or_default();
        reconcile(send_pending, &valid_set, now);
        let (send_oldest_seq, send_oldest_ts) = oldest(send_pending);
        let send_size = send_pending.len();

        metrics::gauge!(
            "ibc_send_packet_backlog_size",
            "chain_id" => labels.chain_id.to_string(),
            "connection_id" => labels.connection_id.to_string(),
            "port_id" => labels.port_id.to_string(),
            "channel_id" => labels.channel_id.to_string(),
            "counterparty_chain_id" => labels.cp_chain_id.to_string(),
            "counterparty_port_id" => labels.cp_port_id.to_string(),
            "counterparty_channel_id" => labels.cp_channel_id.to_string(),
        )
        .set(send_size as f64);
        metrics::gauge!(
            "ibc_send_packet_backlog_oldest_sequence",
            "chain_id" => labels.chain_id.to_string(),
            "connection_id" => labels.connection_id.to_string(),
            "port_id" => labels.port_id.to_string(),
            "channel_id" => labels.channel_id.to_string(),
            "counterparty_chain_id" => labels.cp_chain_id.to_string(),
            "counterparty_port_id" => labels.cp_port_id.to_string(),
            "counterparty_channel_id" => labels.cp_channel_id.to_string(),
        )
        .set(send_oldest_seq as f64);
        metrics::gauge!(
            "ibc_send_packet_backlog_oldest_timestamp_seconds",
            "chain_id" => labels.chain_id.to_string(),
            "connection_id" => labels.connection_id.to_string(),
            "port_id" => labels.port_id.to_string(),
            "channel_id" => labels.channel_id.to_string(),
            "counterparty_chain_id" => labels.cp_chain_id.to_string(),
            "counterparty_port_id" => labels.cp_port_id.to_string(),
            "counterparty_channel_id" => labels.cp_channel_id.to_string(),
        )
        .set(send_oldest_ts as f64);

        // 3) filtered acks from the receiving side, 4) unreceived acks back
        // on the sending side.
        let unreceived: std::collections::HashSet<u64> = if let (Some(recv), false) = (recv, valid_seqs.is_empty()) {
            let acked = filtered_ack_sequences(recv, labels.cp_port_id, labels.cp_channel_id, &valid_seqs).await;
            unreceived_acks(send, labels.port_id, labels.channel_id, &acked).await
        } else {
            std::collections::HashSet::new()
        };

        // 5) ack pending update.
        let ack_pending = self.pending_acks.entry(key).or_default();
        reconcile(ack_pending, &unreceived, now);
        let (ack_oldest_seq, ack_oldest_ts) = oldest(ack_pending);
        let ack_size = ack_pending.len();

        metrics::gauge!(
            "ibc_ack_packet_backlog_oldest_sequence",
            "chain_id" => labels.chain_id.to_string(),
            "connection_id" => labels.connection_id.to_string(),
            "port_id" => labels.port_id.to_string(),
            "channel_id" => labels.channel_id.to_string(),
            "counterparty_chain_id" => labels.cp_chain_id.to_string(),
            "counterparty_port_id" => labels.cp_port_id.to_string(),
            "counterparty_channel_id" => labels.cp_channel_id.to_string(),
        )
        .set(ack_oldest_seq as f64);
        metrics::gauge!(
            "ibc_ack_packet_backlog_oldest_timestamp_seconds",
            "chain_id" => labels.chain_id.to_string(),
            "connection_id" => labels.connection_id.to_string(),
            "port_id" => labels.port_id.to_string(),
            "channel_id" => labels.channel_id.to_string(),
            "counterparty_chain_id" => labels.cp_chain_id.to_string(),
            "counterparty_port_id" => labels.cp_port_id.to_string(),
            "counterparty_channel_id" => labels.cp_channel_id.to_string(),
        )
        .set(ack_oldest_ts as f64);

        info!(
            chain_id = labels.chain_id,
            port_id = labels.port_id,
            channel_id = labels.channel_id,
            backlog = send_size,
            oldest = send_oldest_seq,
            age_s = if send_oldest_ts > 0 { now - send_oldest_ts } else { 0 },
            ack_backlog = ack_size,
            ack_oldest = ack_oldest_seq,
            ack_age_s = if ack_oldest_ts > 0 { now - ack_oldest_ts } else { 0 },
            "backlog updated"
        );

        ChannelBacklog {
            send_size,
            send_oldest_seq,
            send_oldest_ts,
            ack_size,
            ack_oldest_seq,
            ack_oldest_ts,
        }
    }

    /// Emit `ibc_client_trusting_period_seconds` and
    /// `ibc_client_last_update_timestamp_seconds` for one client, as seen
    /// from `rc` (the chain `rc` is connected to).
    pub async fn update_client_health(
        &self,
        rc: &mut RestClient,
        chain_id: &str,
        client_id: &str,
        cp_chain_id: &str,
        cp_client_id: &str,
    ) {
        let cs = rc
            .query_with_timeout(&format!("/ibc/core/client/v1/client_states/{client_id}"), DEFAULT_QUERY_TIMEOUT)
            .await;
        let client_state = cs.get("client_state").cloned().unwrap_or_default();
        let trusting_period = client_state
            .get("trusting_period")
            .and_then(|v| v.as_str())
            .map(parse_duration_seconds)
            .unwrap_or(0);

        metrics::gauge!(
            "ibc_client_trusting_period_seconds",
            "client_id" => client_id.to_string(),
            "chain_id" => chain_id.to_string(),
            "counterparty_chain_id" => cp_chain_id.to_string(),
            "counterparty_client_id" => cp_client_id.to_string(),
        )
        .set(trusting_period as f64);

        let last_update = latest_consensus_timestamp(rc, client_id, &client_state).await;
        metrics::gauge!(
            "ibc_client_last_update_timestamp_seconds",
            "client_id" => client_id.to_string(),
            "chain_id" => chain_id.to_string(),
            "counterparty_chain_id" => cp_chain_id.to_string(),
            "counterparty_client_id" => cp_client_id.to_string(),
        )
        .set(last_update as f64);
    }
}

async fn filtered_ack_sequences(
    recv: &mut RestClient,
    cp_port: &str,
    cp_channel: &str,
    seqs: &[u64],
) -> std::collections::HashSet<u64> {
    let mut acked = std::collections::HashSet::new();
    if seqs.is_empty() {
        return acked;
    }
    let base = format!("/ibc/core/channel/v1/channels/{cp_channel}/ports/{cp_port}/packet_acknowledgements");
    for batch in chunk(seqs, BATCH_SIZE) {
        let q = repeat_param("packet_commitment_sequences", &batch);
        let res = recv.query_with_timeout(&format!("{base}?{q}"), DEFAULT_QUERY_TIMEOUT).await;
        if let Some(arr) = res.get("acknowledgements").and_then(|v| v.as_array()) {
            for a in arr {
                if let Some(seq) = a.get("sequence").and_then(sequence_as_u64) {
                    acked.insert(seq);
                }
            }
        }
    }
    acked
}

async fn unreceived_acks(
    send: &mut RestClient,
    port: &str,
    channel: &str,
    ack_seqs: &std::collections::HashSet<u64>,
) -> std::collections::HashSet<u64> {
    let mut unreceived = std::collections::HashSet::new();
    if ack_seqs.is_empty() {
        return unreceived;
    }
    let seqs: Vec<u64> = ack_seqs.iter().copied().collect();
    let base = format!("/ibc/core/channel/v1/channels/{channel}/ports/{port}/unreceived_acks");
    for batch in chunk(&seqs, BATCH_SIZE) {
        let q = repeat_param("packet_ack_sequences", &batch);
        let res = send.query_with_timeout(&format!("{base}?{q}"), DEFAULT_QUERY_TIMEOUT).await;
        if let Some(arr) = res.get("sequences").and_then(|v| v.as_array()) {
            for s in arr {
                if let Some(seq) = sequence_as_u64(s) {
                    unreceived.insert(seq);
                }
            }
        }
    }
    unreceived
}

/// Resolve "latest consensus timestamp" for a client: try the height named
/// by `client_state.latest_height` first, falling back to scanning the
/// full consensus-state list for the greatest `(revision_number,
/// revision_height)`. Returns 0 on total failure, matching the spec's
/// parse-error substitution policy.
async fn latest_consensus_timestamp(
    rc: &mut RestClient,
    client_id: &str,
    client_state: &serde_json::Value,
) -> i64 {
    if let Some(height) = client_state.get("latest_height") {
        let rev_num = height.get("revision_number").and_then(|v| v.as_str()).unwrap_or("0");
        let rev_height = height.get("revision_height").and_then(|v| v.as_str()).unwrap_or("0");
        if rev_height != "0" {
            let res = rc
                .query_with_timeout(
                    &format!(
                        "/ibc/core/client/v1/consensus_states/{client_id}/revision/{rev_num}/height/{rev_height}"
                    ),
                    DEFAULT_QUERY_TIMEOUT,
                )
                .await;
            if let Some(ts) = res
                .get("consensus_state")
                .and_then(|cs| cs.get("timestamp"))
                .and_then(|v| v.as_str())
            {
                return parse_rfc3339_to_epoch(ts);
            }
        }
    }

    let res = rc
        .query_with_timeout(&format!("/ibc/core/client/v1/consensus_states/{client_id}"), DEFAULT_QUERY_TIMEOUT)
        .await;
    let states = res
        .get("consensus_states")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    let best = states.into_iter().max_by_key(|s| {
        let rev_num: u64 = s
            .get("height")
            .and_then(|h| h.get("revision_number"))
            .and_then(|v| v.as_str())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let rev_height: u64 = s
            .get("height")
            .and_then(|h| h.get("revision_height"))
            .and_then(|v| v.as_str())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        (rev_num, rev_height)
    });
    match best.and_then(|s| s.get("consensus_state").and_then(|cs| cs.get("timestamp")).cloned()) {
        Some(serde_json::Value::String(ts)) => parse_rfc3339_to_epoch(&ts),
        _ => {
            debug!(client_id = %client_id, "no consensus state timestamp resolved");
            0
        }
    }
}

fn sequence_as_u64(v: &serde_json::Value) -> Option<u64> {
    v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_parses_hours_minutes_seconds() {
        assert_eq!(parse_duration_seconds("720h"), 2_592_000);
        assert_eq!(parse_duration_seconds(""), 0);
        assert_eq!(parse_duration_seconds("5m30s"), 330);
        assert_eq!(parse_duration_seconds("1h2m3s"), 3723);
    }

    #[test]
    fn rfc3339_parses_high_precision_fractional_seconds() {
        let ts = "2025-08-11T11:02:48.284737546+00:00";
        let epoch = parse_rfc3339_to_epoch(ts);
        // 2025-08-11T11:02:48Z
        assert_eq!(epoch, 1754910168);
    }

    #[test]
    fn rfc3339_parse_failure_yields_zero() {
        assert_eq!(parse_rfc3339_to_epoch("not-a-timestamp"), 0);
    }

    #[test]
    fn oldest_is_zero_for_empty_set() {
        let set = PendingSet::new();
        assert_eq!(oldest(&set), (0, 0));
    }

    #[test]
    fn oldest_returns_minimum_key() {
        let mut set = PendingSet::new();
        set.insert(5, 100);
        set.insert(1, 50);
        set.insert(9, 200);
        assert_eq!(oldest(&set), (1, 50));
    }

    #[test]
    fn reconcile_preserves_first_seen_for_surviving_sequences() {
        let mut set = PendingSet::new();
        set.insert(1, 1000);
        let observed: std::collections::HashSet<u64> = [1, 2].into_iter().collect();
        reconcile(&mut set, &observed, 2000);
        assert_eq!(set.get(&1), Some(&1000));
        assert_eq!(set.get(&2), Some(&2000));
    }

    #[test]
    fn reconcile_drops_sequences_no_longer_observed() {
        let mut set = PendingSet::new();
        set.insert(1, 1000);
        set.insert(3, 1000);
        let observed: std::collections::HashSet<u64> = [3].into_iter().collect();
        reconcile(&mut set, &observed, 2000);
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(&3), Some(&1000));
    }
}
