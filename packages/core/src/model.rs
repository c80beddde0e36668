//! Core data types: network codes, flattened account records and the
//! timestamped snapshots they are grouped into.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AppError;

/// Required length of an Ad Manager network code accepted over HTTP.
pub const NETWORK_CODE_LEN: usize = 11;

/// An Ad Manager network code that passed input validation
/// (exactly 11 ASCII digits).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkCode(String);

impl NetworkCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for NetworkCode {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.len() == NETWORK_CODE_LEN && raw.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(raw.to_string()))
        } else {
            Err(AppError::InvalidInput(format!(
                "Invalid network_code. Must be {} digits.",
                NETWORK_CODE_LEN
            )))
        }
    }
}

impl fmt::Display for NetworkCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One flattened result row: display field name to scalar value, in the
/// column order of the query that produced it.
pub type Record = Map<String, Value>;

/// One complete, timestamped fetch result for a network code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub network_code: String,
    pub total_count: usize,
    /// RFC 3339 timestamp taken when aggregation completed. Kept as the raw
    /// string so a damaged value degrades to "stale" instead of making the
    /// whole file unreadable.
    #[serde(default)]
    pub fetched_at: String,
    #[serde(
        rename = "child_publishers",
        alias = "records",
        alias = "manager_accounts",
        default
    )]
    pub records: Vec<Record>,
}

impl Snapshot {
    pub fn new(network_code: impl Into<String>, fetched_at: String, records: Vec<Record>) -> Self {
        Self {
            network_code: network_code.into(),
            total_count: records.len(),
            fetched_at,
            records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, name: &str) -> Record {
        let mut record = Record::new();
        record.insert("ID".into(), json!(id));
        record.insert("Name".into(), json!(name));
        record.insert("Readiness Status".into(), json!("READY"));
        record
    }

    #[test]
    fn network_code_accepts_eleven_digits() {
        let code: NetworkCode = "23033612553".parse().unwrap();
        assert_eq!(code.as_str(), "23033612553");
    }

    #[test]
    fn network_code_rejects_short_and_non_numeric_values() {
        for raw in ["123", "", "2303361255a", "230336125531", " 2303361255"] {
            assert!(raw.parse::<NetworkCode>().is_err(), "accepted {:?}", raw);
        }
    }

    #[test]
    fn snapshot_total_count_tracks_records() {
        let snapshot = Snapshot::new(
            "23033612553",
            "2026-10-19T08:00:00+00:00".into(),
            vec![record("1", "Alpha"), record("2", "Beta")],
        );
        assert_eq!(snapshot.total_count, snapshot.records.len());
    }

    #[test]
    fn snapshot_survives_json_round_trip_in_order() {
        let snapshot = Snapshot::new(
            "23033612553",
            "2026-10-19T08:00:00+00:00".into(),
            vec![record("2", "Zulu"), record("1", "Alpha")],
        );

        let encoded = serde_json::to_string(&snapshot).unwrap();
        let decoded: Snapshot = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded, snapshot);
        let keys: Vec<&String> = decoded.records[0].keys().collect();
        assert_eq!(keys, ["ID", "Name", "Readiness Status"]);
        assert_eq!(decoded.records[0]["Name"], "Zulu");
    }

    #[test]
    fn snapshot_serialises_records_as_child_publishers() {
        let snapshot = Snapshot::new("23033612553", String::new(), vec![record("1", "Alpha")]);
        let value = serde_json::to_value(&snapshot).unwrap();
        assert!(value["child_publishers"].is_array());
        assert!(value.get("records").is_none());
    }

    #[test]
    fn snapshot_without_fetched_at_still_loads() {
        let raw = r#"{"network_code":"23033612553","total_count":0,"child_publishers":[]}"#;
        let snapshot: Snapshot = serde_json::from_str(raw).unwrap();
        assert!(snapshot.fetched_at.is_empty());
        assert!(snapshot.records.is_empty());
    }
}
