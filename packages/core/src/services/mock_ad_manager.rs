//! Scripted stand-in for Ad Manager, used by unit and integration tests.
//!
//! Pages are served in the order they were queued; once the script runs
//! out every further select returns an empty page. Every statement issued
//! is recorded so tests can assert on paging.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::FetchError;
use crate::services::ad_manager::{AccountClientFactory, ColumnType, PqlService, ResultSet, Row};

#[derive(Debug, Default)]
struct Script {
    replies: VecDeque<Result<ResultSet, FetchError>>,
    queries: Vec<String>,
    networks: Vec<String>,
    factory_error: Option<FetchError>,
    trailing_columns: Vec<ColumnType>,
}

#[derive(Debug, Clone, Default)]
pub struct MockAdManager {
    script: Arc<Mutex<Script>>,
}

/// Build a result page from column labels and positional row values.
pub fn page(labels: &[&str], rows: Vec<Vec<Value>>) -> ResultSet {
    ResultSet {
        column_types: Some(
            labels
                .iter()
                .map(|label| ColumnType {
                    label_name: label.to_string(),
                })
                .collect(),
        ),
        rows: rows.into_iter().map(|values| Row { values }).collect(),
    }
}

impl MockAdManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a page of results.
    pub fn with_page(self, page: ResultSet) -> Self {
        {
            let mut script = self.lock();
            if let Some(columns) = page.column_types.as_ref() {
                script.trailing_columns = columns.clone();
            }
            script.replies.push_back(Ok(page));
        }
        self
    }

    /// Queue a failing select.
    pub fn with_error(self, error: FetchError) -> Self {
        self.lock().replies.push_back(Err(error));
        self
    }

    /// Make `client_for` itself fail, e.g. for missing credentials.
    pub fn with_factory_error(self, error: FetchError) -> Self {
        self.lock().factory_error = Some(error);
        self
    }

    /// Statements issued so far, oldest first.
    pub fn queries(&self) -> Vec<String> {
        self.lock().queries.clone()
    }

    /// Network codes clients were requested for.
    pub fn networks(&self) -> Vec<String> {
        self.lock().networks.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl PqlService for MockAdManager {
    async fn select(&self, query: &str) -> Result<ResultSet, FetchError> {
        let mut script = self.lock();
        script.queries.push(query.to_string());

        match script.replies.pop_front() {
            Some(reply) => reply,
            // Past the end of the data: same columns, no rows.
            None => Ok(ResultSet {
                column_types: Some(script.trailing_columns.clone()),
                rows: Vec::new(),
            }),
        }
    }
}

#[async_trait]
impl AccountClientFactory for MockAdManager {
    async fn client_for(
        &self,
        network_code: &str,
    ) -> Result<Box<dyn PqlService + Send + Sync>, FetchError> {
        let mut script = self.lock();
        script.networks.push(network_code.to_string());
        if let Some(err) = script.factory_error.clone() {
            return Err(err);
        }
        drop(script);

        Ok(Box::new(self.clone()))
    }
}
