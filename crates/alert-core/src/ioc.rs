//! Canonical IOC record and feed-item normalisation.
//!
//! Threat feeds arrive as loosely shaped JSON/CSV maps; this is the single
//! point where they become typed records. Unknown shapes yield `None`
//! rather than errors - a feed item without an indicator value is noise.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Indicator type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IocType {
    Ipv4,
    Ipv6,
    Domain,
    Url,
    Hash,
    File,
    MalwareFamily,
    Unknown,
}

impl IocType {
    fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "ipv4" | "ip" | "ip-src" | "ip-dst" => IocType::Ipv4,
            "ipv6" => IocType::Ipv6,
            "domain" | "hostname" => IocType::Domain,
            "url" | "uri" => IocType::Url,
            "hash" | "md5" | "sha1" | "sha256" => IocType::Hash,
            "file" | "filename" => IocType::File,
            "malware_family" | "malware" => IocType::MalwareFamily,
            _ => IocType::Unknown,
        }
    }

    /// Best-effort inference from the indicator value itself.
    fn infer(value: &str) -> Self {
        if Ipv4Addr::from_str(value).is_ok() {
            return IocType::Ipv4;
        }
        if Ipv6Addr::from_str(value).is_ok() {
            return IocType::Ipv6;
        }
        if value.starts_with("http://") || value.starts_with("https://") {
            return IocType::Url;
        }
        let hexish = value.len() >= 32 && value.chars().all(|c| c.is_ascii_hexdigit());
        if matches!(value.len(), 32 | 40 | 64) && hexish {
            return IocType::Hash;
        }
        if value.contains('.') && !value.contains(' ') && !value.contains('/') {
            return IocType::Domain;
        }
        IocType::Unknown
    }
}

/// The canonical IOC shape crossing the ingest boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IocRecord {
    pub value: String,
    #[serde(rename = "type")]
    pub ioc_type: IocType,
    pub source: String,
    pub source_id: String,
    pub first_seen: String,
    pub last_seen: String,
    pub description: String,
    pub tags: Vec<String>,
    pub confidence: u8,
    pub raw: serde_json::Value,
}

/// Normalise one heterogeneous feed item into the canonical record.
///
/// Field aliases follow what feeds actually send: `value`/`ioc`/
/// `indicator`/`hash` for the indicator, `created`/`updated` for the seen
/// timestamps, `labels` for tags. Confidence clamps to 0..=100, default 50.
pub fn normalize_feed_item(item: &serde_json::Value, source: &str) -> Option<IocRecord> {
    let obj = item.as_object()?;

    let value = first_string(obj, &["value", "ioc", "indicator", "hash"])?;

    let ioc_type = match first_string(obj, &["type", "ioc_type"]) {
        Some(raw) => match IocType::parse(&raw) {
            IocType::Unknown => IocType::infer(&value),
            parsed => parsed,
        },
        None => IocType::infer(&value),
    };

    let confidence = obj
        .get("confidence")
        .and_then(|v| {
            v.as_i64()
                .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        })
        .unwrap_or(50)
        .clamp(0, 100) as u8;

    let tags = obj
        .get("tags")
        .or_else(|| obj.get("labels"))
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|t| t.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    Some(IocRecord {
        value,
        ioc_type,
        source: source.to_string(),
        source_id: first_string(obj, &["id", "source_id"]).unwrap_or_default(),
        first_seen: first_string(obj, &["first_seen", "created"]).unwrap_or_default(),
        last_seen: first_string(obj, &["last_seen", "updated"]).unwrap_or_default(),
        description: first_string(obj, &["description", "comment"]).unwrap_or_default(),
        tags,
        confidence,
        raw: item.clone(),
    })
}

/// Normalise a whole feed response. Feeds deliver either a bare array,
/// an object with a `data` array, or a single item.
pub fn normalize_feed(payload: &serde_json::Value, source: &str) -> Vec<IocRecord> {
    match payload {
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|item| normalize_feed_item(item, source))
            .collect(),
        serde_json::Value::Object(obj) => match obj.get("data") {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|item| normalize_feed_item(item, source))
                .collect(),
            _ => normalize_feed_item(payload, source).into_iter().collect(),
        },
        _ => Vec::new(),
    }
}

fn first_string(
    obj: &serde_json::Map<String, serde_json::Value>,
    keys: &[&str],
) -> Option<String> {
    for key in keys {
        if let Some(v) = obj.get(*key) {
            match v {
                serde_json::Value::String(s) if !s.is_empty() => return Some(s.clone()),
                serde_json::Value::Number(n) => return Some(n.to_string()),
                _ => {}
            }
        }
    }
    None
}
