//! Periodic IBC topology discovery rooted at the home chain.
//!
//! Mirrors `ibc_monitor/state_scanner.py::StateScanner`: enumerate clients
//! and connections on the home chain, derive the home-side channel table,
//! then derive counterparty connection IDs from the home connection state
//! and list channels directly on each counterparty — no client enumeration
//! on counterparties.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::ChainConfig;
use crate::filter::{channel_filter, id_filter};
use crate::pagination::paginate;
use crate::rest_client::RestClient;

/// `(connection, port, channel, cp_port, cp_channel, cp_chain)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeChannel {
    pub connection_id: String,
    pub port_id: String,
    pub channel_id: String,
    pub cp_port_id: String,
    pub cp_channel_id: String,
    pub cp_chain_id: String,
}

/// `(cp_chain, cp_connection, port, channel, cp_port, cp_channel, home_chain)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpChannel {
    pub cp_chain_id: String,
    pub cp_connection_id: String,
    pub port_id: String,
    pub channel_id: String,
    pub cp_port_id: String,
    pub cp_channel_id: String,
    pub home_chain_id: String,
}

#[derive(Default)]
pub struct Topology {
    pub clients: Vec<String>,
    pub client_chain_map: HashMap<String, String>,
    pub client_counterparty_client_ids: HashMap<String, String>,
    pub connections: Vec<String>,
    pub connection_client_map: HashMap<String, String>,
    pub channels: Vec<HomeChannel>,
    pub cp_connections: HashMap<String, Vec<String>>,
    pub cp_channels: Vec<CpChannel>,
}

pub struct StateScanner {
    home_chain_id: String,
    counterparty_chain_ids: HashSet<String>,
    last_scan: Option<Instant>,
    topology: Topology,
}

impl StateScanner {
    pub fn new(home_chain_id: impl Into<String>, counterparty_chain_ids: HashSet<String>) -> Self {
        StateScanner {
            home_chain_id: home_chain_id.into(),
            counterparty_chain_ids,
            last_scan: None,
            topology: Topology::default(),
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// No-op unless `state_refresh_interval` seconds have elapsed since the
    /// previous successful scan, or this is the first scan. Rebuilds every
    /// table from scratch and swaps them in atomically on success.
    pub async fn scan(
        &mut self,
        home: &mut RestClient,
        cfg: &ChainConfig,
        rest_by_chain: &mut HashMap<String, RestClient>,
    ) {
        if let Some(last) = self.last_scan {
            if last.elapsed() < Duration::from_secs(cfg.state_refresh_interval) {
                return;
            }
        }

        if home.chain_id() != self.home_chain_id {
            debug!(
                current = home.chain_id(),
                home = %self.home_chain_id,
                "refusing to scan: attached REST client is not the home chain"
            );
            return;
        }

        self.last_scan = Some(Instant::now());
        debug!(home_chain_id = %self.home_chain_id, "scanning IBC state");

        let timeout = Duration::from_secs(cfg.state_scan_timeout);
        let mut topology = Topology::default();

        // 1) clients, restricted to the configured counterparty chain set.
        let all_clients = paginate(home, "/ibc/core/client/v1/client_states", "client_states", timeout).await;
        let mut client_chain_map = HashMap::new();
        let mut local_clients = Vec::new();
        for c in &all_clients {
            let Some(cid) = c.get("client_id").and_then(|v| v.as_str()) else {
                continue;
            };
            let Some(chain_id) = c
                .get("client_state")
                .and_then(|cs| cs.get("chain_id"))
                .and_then(|v| v.as_str())
            else {
                continue;
            };
            if !self.counterparty_chain_ids.contains(chain_id) {
                debug!(client_id = %cid, chain_id = %chain_id, "skipping client for unconfigured counterparty chain");
                continue;
            }
            local_clients.push(cid.to_string());
            client_chain_map.insert(cid.to_string(), chain_id.to_string());
        }
        topology.clients = id_filter(&local_clients, &cfg.whitelist_clients, &cfg.blacklist_clients);
        topology.client_chain_map = topology
            .clients
            .iter()
            .filter_map(|cid| client_chain_map.get(cid).map(|chain| (cid.clone(), chain.clone())))
            .collect();

        // 2) connections per surviving client.
        let mut connection_client_map = HashMap::new();
        let mut client_cp_client_ids = HashMap::new();
        let mut all_conns = Vec::new();
        let mut cp_conn_per_chain: HashMap<String, HashSet<String>> = HashMap::new();

        for cid in &topology.clients {
            let conn_ids_json = paginate(
                home,
                &format!("/ibc/core/connection/v1/client_connections/{cid}"),
                "connection_paths",
                timeout,
            )
            .await;
            let conn_ids: Vec<String> = conn_ids_json
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            if conn_ids.is_empty() {
                debug!(client_id = %cid, "no connections for client");
                continue;
            }

            for conn in &conn_ids {
                connection_client_map.insert(conn.clone(), cid.clone());
                let conn_res = home
                    .query_with_timeout(&format!("/ibc/core/connection/v1/connections/{conn}"), timeout)
                    .await;
                let connection = conn_res.get("connection").cloned().unwrap_or_default();
                let counterparty = connection.get("counterparty").cloned().unwrap_or_default();
                let cp_client_id = counterparty
                    .get("client_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                let cp_connection_id = counterparty
                    .get("connection_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");

                if !cp_client_id.is_empty() {
                    client_cp_client_ids
                        .entry(cid.clone())
                        .or_insert_with(|| cp_client_id.to_string());
                }

                if let Some(cp_chain) = topology.client_chain_map.get(cid) {
                    if !cp_connection_id.is_empty() {
                        cp_conn_per_chain
                            .entry(cp_chain.clone())
                            .or_default()
                            .insert(cp_connection_id.to_string());
                    }
                }
            }
            all_conns.extend(conn_ids);
        }

        topology.connection_client_map = connection_client_map;
        topology.client_counterparty_client_ids = client_cp_client_ids;
        topology.connections = id_filter(&all_conns, &cfg.whitelist_connections, &cfg.blacklist_connections);
        debug!(connections = ?topology.connections, "relevant connections (home)");

        // 3) home channels per surviving connection.
        let mut chan_list = Vec::new();
        for conn in &topology.connections {
            let chans = paginate(
                home,
                &format!("/ibc/core/channel/v1/connections/{conn}/channels"),
                "channels",
                timeout,
            )
            .await;
            if chans.is_empty() {
                debug!(connection_id = %conn, "no channels for connection");
                continue;
            }
            let local_client = topology.connection_client_map.get(conn).cloned().unwrap_or_default();
            let cp_chain = topology
                .client_chain_map
                .get(&local_client)
                .cloned()
                .unwrap_or_default();
            for ch in &chans {
                let Some(port) = ch.get("port_id").and_then(|v| v.as_str()) else {
                    continue;
                };
                let Some(channel) = ch.get("channel_id").and_then(|v| v.as_str()) else {
                    continue;
                };
                let counterparty = ch.get("counterparty").cloned().unwrap_or_default();
                let cp_port = counterparty.get("port_id").and_then(|v| v.as_str()).unwrap_or("");
                let cp_channel = counterparty.get("channel_id").and_then(|v| v.as_str()).unwrap_or("");
                chan_list.push(HomeChannel {
                    connection_id: conn.clone(),
                    port_id: port.to_string(),
                    channel_id: channel.to_string(),
                    cp_port_id: cp_port.to_string(),
                    cp_channel_id: cp_channel.to_string(),
                    cp_chain_id: cp_chain.clone(),
                });
            }
        }
        topology.channels = chan_list
            .into_iter()
            .filter(|c| channel_filter(&c.port_id, &c.channel_id, &cfg.whitelist_channels, &cfg.blacklist_channels))
            .collect();

        // 4) counterparty channels, derived from home connection state —
        // not run through the home channel allow/deny filter.
        for (cp_chain, cp_conn_ids) in &cp_conn_per_chain {
            let Some(rc) = rest_by_chain.get_mut(cp_chain) else {
                debug!(cp_chain = %cp_chain, "no REST client configured for counterparty chain; skipping");
                continue;
            };
            let cp_conn_ids: Vec<String> = cp_conn_ids.iter().cloned().collect();
            let filtered = id_filter(&cp_conn_ids, &cfg.whitelist_connections, &cfg.blacklist_connections);
            topology.cp_connections.insert(cp_chain.clone(), filtered.clone());

            for cp_conn in &filtered {
                let chans = paginate(
                    rc,
                    &format!("/ibc/core/channel/v1/connections/{cp_conn}/channels"),
                    "channels",
                    timeout,
                )
                .await;
                if chans.is_empty() {
                    debug!(cp_connection_id = %cp_conn, cp_chain = %cp_chain, "no channels on counterparty connection");
                    continue;
                }
                for ch in &chans {
                    let Some(port) = ch.get("port_id").and_then(|v| v.as_str()) else {
                        continue;
                    };
                    let Some(channel) = ch.get("channel_id").and_then(|v| v.as_str()) else {
                        continue;
                    };
                    let counterparty = ch.get("counterparty").cloned().unwrap_or_default();
                    let cp_port = counterparty.get("port_id").and_then(|v| v.as_str()).unwrap_or("");
                    let cp_channel = counterparty.get("channel_id").and_then(|v| v.as_str()).unwrap_or("");
                    topology.cp_channels.push(CpChannel {
                        cp_chain_id: cp_chain.clone(),
                        cp_connection_id: cp_conn.clone(),
                        port_id: port.to_string(),
                        channel_id: channel.to_string(),
                        cp_port_id: cp_port.to_string(),
                        cp_channel_id: cp_channel.to_string(),
                        home_chain_id: self.home_chain_id.clone(),
                    });
                }
            }
        }

        info!(
            home_chain_id = %self.home_chain_id,
            clients = topology.clients.len(),
            connections = topology.connections.len(),
            channels = topology.channels.len(),
            cp_chains = topology.cp_connections.len(),
            cp_channels = topology.cp_channels.len(),
            "state scan complete"
        );

        self.topology = topology;
    }
}
