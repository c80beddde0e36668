//! Paged record fetcher.
//!
//! Runs a PQL statement page by page (`LIMIT page_size OFFSET n`) until an
//! empty page comes back, then flattens every row into a [`Record`] keyed by
//! display field names.
//!
//! The field names are derived from the first page's column labels and
//! reused for every later page of the same fetch. Rows are positional, so
//! if a later page ever came back with a different column width the fetch
//! fails instead of misassigning values.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::error::FetchError;
use crate::model::{Record, Snapshot};
use crate::services::ad_manager::{AccountClientFactory, ColumnType, Row};

pub const DEFAULT_PAGE_SIZE: u32 = 500;

/// Lower-cased PQL column label to display field name.
pub const HEADER_RENAMES: &[(&str, &str)] = &[
    ("id", "ID"),
    ("name", "Name"),
    ("readinessstatus", "Readiness Status"),
    ("approvalstatus", "Approval Status"),
    ("parentchildstatus", "Parent Child Status"),
    ("childnetworkcode", "Child Network Code"),
    ("email", "Email"),
    ("delegationtype", "Delegation Type"),
    ("invitationstatus", "Invitation Status"),
];

/// Display name for a column label; unknown labels are kept as they are.
pub fn display_name(label: &str) -> String {
    let lowered = label.to_lowercase();
    HEADER_RENAMES
        .iter()
        .find(|(raw, _)| *raw == lowered)
        .map(|(_, display)| display.to_string())
        .unwrap_or_else(|| label.to_string())
}

/// Which slice of the `child_publisher` table to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountQuery {
    /// Child publishers delegated to this network (`DelegationType = 'IN_CHILD'`).
    ChildPublishers,
    /// Child networks this account manages (`ParentChildStatus = 'MANAGED'`).
    ManagedAccounts,
}

impl AccountQuery {
    fn columns(&self) -> &'static str {
        match self {
            AccountQuery::ChildPublishers => {
                "Id, Name, ReadinessStatus, ApprovalStatus, ChildNetworkCode, Email, \
                 InvitationStatus, DelegationType"
            }
            AccountQuery::ManagedAccounts => {
                "Id, Name, ReadinessStatus, ApprovalStatus, ParentChildStatus, \
                 ChildNetworkCode, Email"
            }
        }
    }

    fn filter(&self) -> &'static str {
        match self {
            AccountQuery::ChildPublishers => "DelegationType = 'IN_CHILD'",
            AccountQuery::ManagedAccounts => "ParentChildStatus = 'MANAGED'",
        }
    }

    /// The PQL statement for one page.
    pub fn statement(&self, limit: u32, offset: u64) -> String {
        format!(
            "SELECT {} FROM child_publisher WHERE {} ORDER BY Name ASC LIMIT {} OFFSET {}",
            self.columns(),
            self.filter(),
            limit,
            offset
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            AccountQuery::ChildPublishers => "child publishers",
            AccountQuery::ManagedAccounts => "managed accounts",
        }
    }
}

/// Fetches complete account listings from Ad Manager.
#[derive(Clone)]
pub struct RecordFetcher {
    factory: Arc<dyn AccountClientFactory + Send + Sync>,
    page_size: u32,
}

impl RecordFetcher {
    pub fn new(factory: Arc<dyn AccountClientFactory + Send + Sync>, page_size: u32) -> Self {
        Self {
            factory,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Fetch every page of `query` for `network_code` and return them as a
    /// single snapshot. No rows at all is an empty snapshot, not an error.
    pub async fn fetch(&self, network_code: &str, query: AccountQuery) -> Result<Snapshot, FetchError> {
        let network_code = network_code.trim();
        if network_code.is_empty() {
            tracing::error!("Network code not provided");
            return Err(FetchError::configuration("Network code not provided"));
        }

        let client = self.factory.client_for(network_code).await?;

        let mut offset: u64 = 0;
        let mut fields: Option<Vec<String>> = None;
        let mut rows: Vec<Row> = Vec::new();

        loop {
            let statement = query.statement(self.page_size, offset);
            let page = client.select(&statement).await.map_err(|err| {
                tracing::error!("Query for network {} failed at offset {}: {}", network_code, offset, err);
                err
            })?;

            let columns = page.column_types.as_deref().ok_or_else(|| {
                tracing::error!("Invalid response received from the server.");
                FetchError::invalid_response("response has no column types")
            })?;

            if fields.is_none() {
                fields = Some(field_names(columns));
            }

            if page.rows.is_empty() {
                break;
            }

            tracing::debug!(
                "Fetched {} {} for network {} at offset {}",
                page.rows.len(),
                query.label(),
                network_code,
                offset
            );
            rows.extend(page.rows);
            offset += u64::from(self.page_size);
        }

        let fields = fields.unwrap_or_default();
        let records = rows
            .into_iter()
            .map(|row| flatten_row(&fields, row))
            .collect::<Result<Vec<_>, _>>()?;

        if records.is_empty() {
            tracing::info!("No {} found for network {}", query.label(), network_code);
        } else {
            tracing::info!("Found {} {} for network {}", records.len(), query.label(), network_code);
        }

        Ok(Snapshot::new(network_code, Utc::now().to_rfc3339(), records))
    }
}

fn field_names(columns: &[ColumnType]) -> Vec<String> {
    columns.iter().map(|column| display_name(&column.label_name)).collect()
}

/// Zip field names against a row's positional values.
fn flatten_row(fields: &[String], row: Row) -> Result<Record, FetchError> {
    if row.values.len() != fields.len() {
        return Err(FetchError::invalid_response(format!(
            "row has {} values but the first page had {} columns",
            row.values.len(),
            fields.len()
        )));
    }

    Ok(fields
        .iter()
        .cloned()
        .zip(row.values)
        .collect::<serde_json::Map<String, Value>>())
}
