//! Glob-style allow/deny matching over IBC identifiers, mirroring
//! `ibc_monitor`'s `fnmatch`-based filters: a non-empty whitelist is the
//! sole authority; an empty whitelist falls back to the blacklist as a
//! deny list.

use glob::Pattern;

fn matches_any(value: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pat| {
        Pattern::new(pat)
            .map(|p| p.matches(value))
            .unwrap_or(false)
    })
}

/// Filter a list of identifiers (client IDs, connection IDs, ...) by glob
/// whitelist/blacklist, keeping the relative order of `ids`.
pub fn id_filter(ids: &[String], whitelist: &[String], blacklist: &[String]) -> Vec<String> {
    if !whitelist.is_empty() {
        ids.iter()
            .filter(|id| matches_any(id, whitelist))
            .cloned()
            .collect()
    } else {
        ids.iter()
            .filter(|id| !matches_any(id, blacklist))
            .cloned()
            .collect()
    }
}

/// Apply the same allow/deny logic to a single `"port/channel"` pair.
pub fn channel_filter(port: &str, channel: &str, whitelist: &[String], blacklist: &[String]) -> bool {
    let id = format!("{port}/{channel}");
    if !whitelist.is_empty() {
        matches_any(&id, whitelist)
    } else {
        !matches_any(&id, blacklist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitelist_wins_over_blacklist() {
        let ids = vec!["07-tendermint-0".to_string(), "07-tendermint-1".to_string()];
        let whitelist = vec!["07-tendermint-0".to_string()];
        let blacklist = vec!["07-tendermint-0".to_string()];
        let result = id_filter(&ids, &whitelist, &blacklist);
        assert_eq!(result, vec!["07-tendermint-0".to_string()]);
    }

    #[test]
    fn empty_whitelist_falls_back_to_blacklist() {
        let ids = vec!["connection-0".to_string(), "connection-1".to_string()];
        let blacklist = vec!["connection-1".to_string()];
        let result = id_filter(&ids, &[], &blacklist);
        assert_eq!(result, vec!["connection-0".to_string()]);
    }

    #[test]
    fn empty_whitelist_and_blacklist_keeps_everything() {
        let ids = vec!["connection-0".to_string(), "connection-1".to_string()];
        let result = id_filter(&ids, &[], &[]);
        assert_eq!(result, ids);
    }

    #[test]
    fn channel_filter_matches_port_slash_channel() {
        let whitelist = vec!["transfer/*".to_string()];
        assert!(channel_filter("transfer", "channel-0", &whitelist, &[]));
        assert!(!channel_filter("icahost", "channel-5", &whitelist, &[]));
    }

    #[test]
    fn channel_filter_blacklist_denies_match() {
        let blacklist = vec!["transfer/channel-0".to_string()];
        assert!(!channel_filter("transfer", "channel-0", &[], &blacklist));
        assert!(channel_filter("transfer", "channel-1", &[], &blacklist));
    }
}
