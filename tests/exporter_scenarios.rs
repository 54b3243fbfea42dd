use std::collections::HashSet;
use std::io::Write;

use httpmock::{Method::GET, MockServer};
use ibc_backlog_exporter::accounting::{ChannelLabels, Engine};
use ibc_backlog_exporter::config::{load_config, ExcludedSequences};
use ibc_backlog_exporter::rest_client::RestClient;
use ibc_backlog_exporter::scanner::StateScanner;
use serde_json::json;

fn http() -> reqwest::Client {
    reqwest::Client::builder().build().unwrap()
}

fn labels<'a>(send_chain: &'a str, cp_chain: &'a str) -> ChannelLabels<'a> {
    ChannelLabels {
        chain_id: send_chain,
        connection_id: "connection-0",
        port_id: "transfer",
        channel_id: "channel-0",
        cp_chain_id: cp_chain,
        cp_port_id: "transfer",
        cp_channel_id: "channel-1",
    }
}

fn no_exclusions() -> ExcludedSequences {
    ExcludedSequences::default()
}

/// Loads `excluded_sequences` through the real TOML config path rather than
/// constructing the type directly (it has no public constructor besides
/// `Default`), mirroring how `config.rs`'s own tests round-trip via
/// `load_config` + a temp file.
fn excluded_sequences(channel_id: &str, seqs: &[i64]) -> ExcludedSequences {
    let entries = seqs.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(", ");
    let contents = format!(
        r#"
        [[chains]]
        name = "home"
        chain_id = "home-1"
        rests = ["https://home.example"]
        home_chain = true

        [excluded_sequences]
        "{channel_id}" = [{entries}]
        "#
    );
    let mut f = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    load_config(f.path()).unwrap().excluded_sequences
}

/// S1 — basic backlog accounting, exactly as specified: one channel with
/// sequence 2 excluded, commitments `[1,2,3]` on the send side, the
/// receiving chain's `packet_acknowledgements` for `[1,3]` returning `{2,3}`
/// acked, and the send chain's `unreceived_acks` for `{2,3}` returning
/// `{3}` still outstanding.
#[tokio::test]
async fn s1_basic_backlog_accounting() {
    let home = MockServer::start_async().await;
    home.mock_async(|when, then| {
        when.method(GET).path("/ibc/core/client/v1/client_states");
        then.status(200).json_body(json!({
            "client_states": [{"client_id": "07-tendermint-0", "client_state": {"chain_id": "cp-1"}}],
            "pagination": {"next_key": null}
        }));
    })
    .await;
    home.mock_async(|when, then| {
        when.method(GET)
            .path("/ibc/core/connection/v1/client_connections/07-tendermint-0");
        then.status(200).json_body(json!({"connection_paths": ["connection-0"], "pagination": {"next_key": null}}));
    })
    .await;
    home.mock_async(|when, then| {
        when.method(GET).path("/ibc/core/connection/v1/connections/connection-0");
        then.status(200).json_body(json!({
            "connection": {"counterparty": {"client_id": "07-tendermint-1", "connection_id": "connection-7"}}
        }));
    })
    .await;
    home.mock_async(|when, then| {
        when.method(GET)
            .path("/ibc/core/channel/v1/connections/connection-0/channels");
        then.status(200).json_body(json!({
            "channels": [{
                "port_id": "transfer",
                "channel_id": "channel-0",
                "counterparty": {"port_id": "transfer", "channel_id": "channel-1"}
            }],
            "pagination": {"next_key": null}
        }));
    })
    .await;
    home.mock_async(|when, then| {
        when.method(GET)
            .path("/ibc/core/channel/v1/channels/channel-0/ports/transfer/packet_commitments");
        then.status(200).json_body(json!({
            "commitments": [{"sequence": "1"}, {"sequence": "2"}, {"sequence": "3"}],
            "pagination": {"next_key": null}
        }));
    })
    .await;
    home.mock_async(|when, then| {
        when.method(GET)
            .path("/ibc/core/channel/v1/channels/channel-0/ports/transfer/unreceived_acks")
            .query_param("packet_ack_sequences", "2")
            .query_param("packet_ack_sequences", "3");
        then.status(200).json_body(json!({"sequences": [3]}));
    })
    .await;

    let cp = MockServer::start_async().await;
    cp.mock_async(|when, then| {
        when.method(GET)
            .path("/ibc/core/channel/v1/channels/channel-1/ports/transfer/packet_acknowledgements")
            .query_param("packet_commitment_sequences", "1")
            .query_param("packet_commitment_sequences", "3");
        then.status(200)
            .json_body(json!({"acknowledgements": [{"sequence": 2}, {"sequence": 3}]}));
    })
    .await;

    let mut home_rc = RestClient::new(http(), &home.base_url(), "home-1", "home");
    let mut cp_chains = HashSet::new();
    cp_chains.insert("cp-1".to_string());
    let mut scanner = StateScanner::new("home-1", cp_chains);
    let cfg = home_chain_cfg();
    let mut rest_by_chain = std::collections::HashMap::new();
    scanner.scan(&mut home_rc, &cfg, &mut rest_by_chain).await;
    assert_eq!(scanner.topology().channels.len(), 1);

    let mut cp_rc = RestClient::new(http(), &cp.base_url(), "cp-1", "cp");
    let mut engine = Engine::new();
    let excl = excluded_sequences("channel-0", &[2]);
    let l = labels("home-1", "cp-1");
    let backlog = engine
        .update_channel(1_000, &excl, &mut home_rc, Some(&mut cp_rc), &l)
        .await;
    assert_eq!(backlog.send_size, 2);
    assert_eq!(backlog.send_oldest_seq, 1);
    assert_eq!(backlog.send_oldest_ts, 1_000);
    assert_eq!(backlog.ack_size, 1);
    assert_eq!(backlog.ack_oldest_seq, 3);
    assert_eq!(backlog.ack_oldest_ts, 1_000);
}

/// S2 — `first_seen` for a sequence that survives across two scrapes must
/// not be bumped forward on the second scrape.
#[tokio::test]
async fn s2_first_seen_is_stable_across_scrapes() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/ibc/core/channel/v1/channels/channel-0/ports/transfer/packet_commitments");
            then.status(200).json_body(json!({
                "commitments": [{"sequence": 5}],
                "pagination": {"next_key": null}
            }));
        })
        .await;

    let mut rc = RestClient::new(http(), &server.base_url(), "home-1", "home");
    let mut engine = Engine::new();
    let excl = no_exclusions();
    let l = labels("home-1", "cp-1");

    let first = engine.update_channel(1_000, &excl, &mut rc, None, &l).await;
    assert_eq!(first.send_oldest_ts, 1_000);

    let second = engine.update_channel(5_000, &excl, &mut rc, None, &l).await;
    assert_eq!(second.send_size, 1);
    assert_eq!(second.send_oldest_ts, 1_000, "first_seen must survive the second scrape");
}

/// S3 — once a sequence drops out of `packet_commitments` (it was relayed
/// and cleared) it disappears from the pending set on the next scrape.
#[tokio::test]
async fn s3_sequence_drains_once_no_longer_observed() {
    let server = MockServer::start_async().await;
    let m1 = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/ibc/core/channel/v1/channels/channel-0/ports/transfer/packet_commitments");
            then.status(200).json_body(json!({
                "commitments": [{"sequence": 1}, {"sequence": 2}],
                "pagination": {"next_key": null}
            }));
        })
        .await;

    let mut rc = RestClient::new(http(), &server.base_url(), "home-1", "home");
    let mut engine = Engine::new();
    let excl = no_exclusions();
    let l = labels("home-1", "cp-1");

    let first = engine.update_channel(1_000, &excl, &mut rc, None, &l).await;
    assert_eq!(first.send_size, 2);
    m1.delete();

    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/ibc/core/channel/v1/channels/channel-0/ports/transfer/packet_commitments");
            then.status(200).json_body(json!({
                "commitments": [{"sequence": 2}],
                "pagination": {"next_key": null}
            }));
        })
        .await;
    let second = engine.update_channel(2_000, &excl, &mut rc, None, &l).await;
    assert_eq!(second.send_size, 1);
    assert_eq!(second.send_oldest_seq, 2);
}

/// S4 — an exhausted/unreachable endpoint collapses to an empty result
/// rather than propagating a transport error to the scheduler.
#[tokio::test]
async fn s4_unreachable_endpoint_collapses_to_empty_backlog() {
    // Port 0 on loopback refuses immediately; no server ever listens there.
    let mut rc = RestClient::new(http(), "http://127.0.0.1:0", "home-1", "home");
    let mut engine = Engine::new();
    let excl = no_exclusions();
    let l = labels("home-1", "cp-1");
    let backlog = engine.update_channel(1_000, &excl, &mut rc, None, &l).await;
    assert_eq!(backlog.send_size, 0);
    assert_eq!(backlog.send_oldest_seq, 0);
}

/// S5 — `health()` refuses an endpoint whose `node_info.network` does not
/// match the configured chain ID, even though the endpoint itself is up.
#[tokio::test]
async fn s5_mismatched_chain_id_is_unhealthy() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/cosmos/base/tendermint/v1beta1/node_info");
            then.status(200)
                .json_body(json!({"default_node_info": {"network": "wrong-chain-1"}}));
        })
        .await;
    let mut rc = RestClient::new(http(), &server.base_url(), "home-1", "home");
    assert!(!rc.health().await);
}

/// S6 — a client whose connection-path lookup 404s contributes no
/// connections or channels, but does not abort the scan.
#[tokio::test]
async fn s6_404_on_client_connections_is_swallowed() {
    let home = MockServer::start_async().await;
    home.mock_async(|when, then| {
        when.method(GET).path("/ibc/core/client/v1/client_states");
        then.status(200).json_body(json!({
            "client_states": [{"client_id": "07-tendermint-0", "client_state": {"chain_id": "cp-1"}}],
            "pagination": {"next_key": null}
        }));
    })
    .await;
    home.mock_async(|when, then| {
        when.method(GET)
            .path("/ibc/core/connection/v1/client_connections/07-tendermint-0");
        then.status(404);
    })
    .await;

    let mut home_rc = RestClient::new(http(), &home.base_url(), "home-1", "home");
    let mut cp_chains = HashSet::new();
    cp_chains.insert("cp-1".to_string());
    let mut scanner = StateScanner::new("home-1", cp_chains);
    let cfg = home_chain_cfg();
    let mut rest_by_chain = std::collections::HashMap::new();
    scanner.scan(&mut home_rc, &cfg, &mut rest_by_chain).await;

    assert_eq!(scanner.topology().clients, vec!["07-tendermint-0".to_string()]);
    assert!(scanner.topology().connections.is_empty());
    assert!(scanner.topology().channels.is_empty());
}

fn home_chain_cfg() -> ibc_backlog_exporter::config::ChainConfig {
    ibc_backlog_exporter::config::ChainConfig {
        name: "home".to_string(),
        chain_id: "home-1".to_string(),
        rpcs: vec![],
        rests: vec![],
        whitelist_clients: vec![],
        blacklist_clients: vec![],
        whitelist_connections: vec![],
        blacklist_connections: vec![],
        whitelist_channels: vec![],
        blacklist_channels: vec![],
        state_refresh_interval: 1800,
        state_scan_timeout: 60,
        home_chain: true,
    }
}
