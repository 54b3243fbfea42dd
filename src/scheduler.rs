//! The periodic driver: wake every `update_interval_seconds`, probe REST
//! health, run the (throttled) state scan, then run backlog accounting for
//! every home and counterparty channel.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::Client;
use tracing::{debug, info};

use crate::accounting::{ChannelLabels, Engine};
use crate::config::Config;
use crate::rest_client::RestClient;
use crate::scanner::StateScanner;

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Build the home client plus one client per reachable counterparty chain.
/// Counterparties with no configured REST URL are skipped with a warning,
/// matching `IBCExporter.__init__`'s behaviour.
fn build_clients(cfg: &Config, http: Client) -> Result<(RestClient, std::collections::HashMap<String, RestClient>)> {
    let home_cfg = cfg.home_chain();
    if home_cfg.rests.is_empty() {
        bail!("no REST endpoints configured for home chain {}", home_cfg.chain_id);
    }
    let home = RestClient::new(http.clone(), &home_cfg.rests[0], home_cfg.chain_id.clone(), home_cfg.name.clone());

    let mut rest_by_chain = std::collections::HashMap::new();
    for cp in cfg.counterparty_chains() {
        if cp.rests.is_empty() {
            tracing::warn!(chain_id = %cp.chain_id, "no REST endpoints configured for counterparty chain; it will be skipped");
            continue;
        }
        rest_by_chain.insert(
            cp.chain_id.clone(),
            RestClient::new(http.clone(), &cp.rests[0], cp.chain_id.clone(), cp.name.clone()),
        );
    }
    Ok((home, rest_by_chain))
}

pub async fn run(cfg: Config) -> Result<()> {
    let http = Client::builder()
        .build()
        .context("failed to build reqwest client")?;
    let (mut home, mut rest_by_chain) = build_clients(&cfg, http)?;
    let home_chain_id = cfg.home_chain().chain_id.clone();

    let counterparty_chain_ids: HashSet<String> = cfg.counterparty_chains().map(|c| c.chain_id.clone()).collect();
    let mut scanner = StateScanner::new(home_chain_id.clone(), counterparty_chain_ids);
    let mut engine = Engine::new();

    loop {
        update_metrics(&cfg, &mut home, &mut rest_by_chain, &mut scanner, &mut engine).await;
        tokio::time::sleep(Duration::from_secs(cfg.exporter.update_interval_seconds)).await;
    }
}

async fn update_metrics(
    cfg: &Config,
    home: &mut RestClient,
    rest_by_chain: &mut std::collections::HashMap<String, RestClient>,
    scanner: &mut StateScanner,
    engine: &mut Engine,
) {
    let now = now_unix();
    let home_cfg = cfg.home_chain();

    // 2) health probes.
    let home_healthy = home.health().await;
    metrics::gauge!(
        "ibc_rest_health",
        "chain_id" => home.chain_id().to_string(),
        "endpoint" => home.endpoint().to_string(),
    )
    .set(if home_healthy { 1.0 } else { 0.0 });

    for rc in rest_by_chain.values_mut() {
        let healthy = rc.health().await;
        metrics::gauge!(
            "ibc_rest_health",
            "chain_id" => rc.chain_id().to_string(),
            "endpoint" => rc.endpoint().to_string(),
        )
        .set(if healthy { 1.0 } else { 0.0 });
    }

    // 3) skip the cycle entirely if home is unreachable.
    if !home_healthy {
        debug!(chain_id = %home_cfg.chain_id, "home chain endpoint unhealthy; skipping scan/metrics this cycle");
        return;
    }

    // 4) throttled topology scan.
    scanner.scan(home, home_cfg, rest_by_chain).await;

    // -- client health metrics (home + mirrored counterparty) --
    let topology_clients = scanner.topology().clients.clone();
    for client_id in &topology_clients {
        let cp_chain_id = scanner
            .topology()
            .client_chain_map
            .get(client_id)
            .cloned()
            .unwrap_or_default();
        let cp_client_id = scanner
            .topology()
            .client_counterparty_client_ids
            .get(client_id)
            .cloned()
            .unwrap_or_default();

        engine
            .update_client_health(home, &home_cfg.chain_id, client_id, &cp_chain_id, &cp_client_id)
            .await;

        if !cp_client_id.is_empty() {
            if let Some(cp_rc) = rest_by_chain.get_mut(&cp_chain_id) {
                engine
                    .update_client_health(cp_rc, &cp_chain_id, &cp_client_id, &home_cfg.chain_id, client_id)
                    .await;
            }
        }
    }

    // -- per-channel backlog (home side) --
    let home_channels = scanner.topology().channels.clone();
    for ch in &home_channels {
        let labels = ChannelLabels {
            chain_id: &home_cfg.chain_id,
            connection_id: &ch.connection_id,
            port_id: &ch.port_id,
            channel_id: &ch.channel_id,
            cp_chain_id: &ch.cp_chain_id,
            cp_port_id: &ch.cp_port_id,
            cp_channel_id: &ch.cp_channel_id,
        };
        let recv = rest_by_chain.get_mut(&ch.cp_chain_id);
        engine
            .update_channel(now, &cfg.excluded_sequences, home, recv, &labels)
            .await;
    }

    // -- per-channel backlog (counterparty side) --
    let cp_channels = scanner.topology().cp_channels.clone();
    for ch in &cp_channels {
        let Some(mut rc) = rest_by_chain.remove(&ch.cp_chain_id) else {
            continue;
        };
        let labels = ChannelLabels {
            chain_id: &ch.cp_chain_id,
            connection_id: &ch.cp_connection_id,
            port_id: &ch.port_id,
            channel_id: &ch.channel_id,
            cp_chain_id: &ch.home_chain_id,
            cp_port_id: &ch.cp_port_id,
            cp_channel_id: &ch.cp_channel_id,
        };
        engine
            .update_channel(now, &cfg.excluded_sequences, &mut rc, Some(&mut *home), &labels)
            .await;
        rest_by_chain.insert(ch.cp_chain_id.clone(), rc);
    }

    // -- last-update freshness signal for every reachable chain --
    metrics::gauge!("ibc_backlog_last_update_time_seconds", "chain_id" => home_cfg.chain_id.clone())
        .set(now as f64);
    for chain_id in rest_by_chain.keys() {
        metrics::gauge!("ibc_backlog_last_update_time_seconds", "chain_id" => chain_id.clone()).set(now as f64);
    }

    info!("metrics updated");
}
