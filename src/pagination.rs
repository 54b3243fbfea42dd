//! Generic iteration over `pagination.next_key` list endpoints, and the
//! batching/repeated-parameter helpers used by filtered ack/unreceived-ack
//! queries.

use std::time::Duration;

use serde_json::Value;
use url::form_urlencoded;

use crate::rest_client::RestClient;

/// Maximum sequences per filtered query — servers reject longer URLs.
pub const BATCH_SIZE: usize = 100;

fn append_pagination_key(path: &str, next_key: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(next_key.as_bytes()).collect();
    let sep = if path.contains('?') { '&' } else { '?' };
    format!("{path}{sep}pagination.key={encoded}")
}

/// Follow `pagination.next_key` on `client`, concatenating `result[list_key]`
/// across pages in order. Every page query carries `timeout`.
pub async fn paginate(client: &mut RestClient, path: &str, list_key: &str, timeout: Duration) -> Vec<Value> {
    let mut items = Vec::new();
    let mut next_key: Option<String> = None;
    loop {
        let qpath = match &next_key {
            Some(k) => append_pagination_key(path, k),
            None => path.to_string(),
        };
        let res = client.query_with_timeout(&qpath, timeout).await;
        if let Some(arr) = res.get(list_key).and_then(|v| v.as_array()) {
            items.extend(arr.iter().cloned());
        }
        next_key = res
            .get("pagination")
            .and_then(|p| p.get("next_key"))
            .and_then(|k| k.as_str())
            .filter(|k| !k.is_empty())
            .map(|k| k.to_string());
        if next_key.is_none() {
            break;
        }
    }
    items
}

/// Split a sequence list into batches of at most [`BATCH_SIZE`].
pub fn chunk(seqs: &[u64], size: usize) -> Vec<Vec<u64>> {
    if size == 0 {
        return vec![seqs.to_vec()];
    }
    seqs.chunks(size).map(|c| c.to_vec()).collect()
}

/// Encode `name=v1&name=v2...` with URL-escaped values.
pub fn repeat_param(name: &str, values: &[u64]) -> String {
    values
        .iter()
        .map(|v| {
            let encoded: String = form_urlencoded::byte_serialize(v.to_string().as_bytes()).collect();
            format!("{name}={encoded}")
        })
        .collect::<Vec<_>>()
        .join("&")
}
