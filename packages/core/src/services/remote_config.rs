//! Remote JSON configuration blobs kept in a Firebase Realtime Database
//! under `config/<key>`.
//!
//! The connection (credentials + token source) is established on first use
//! and then shared for the life of the store.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::error::AppError;
use crate::services::google_auth::{CredentialSource, ServiceAccountTokenSource, TokenSource};

pub const FIREBASE_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/firebase.database",
    "https://www.googleapis.com/auth/userinfo.email",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirebaseSettings {
    pub credentials_path: Option<PathBuf>,
    pub database_url: Option<String>,
}

#[async_trait]
pub trait ConfigStore {
    /// The blob stored under `key`, or `None` when nothing is there.
    async fn get(&self, key: &str) -> Result<Option<Value>, AppError>;

    /// Replace the blob stored under `key`.
    async fn set(&self, key: &str, value: &Value) -> Result<(), AppError>;
}

fn validate_key(key: &str) -> Result<(), AppError> {
    if key.is_empty() || key.contains(['.', '$', '#', '[', ']']) {
        return Err(AppError::InvalidInput(format!("Invalid config key: {:?}", key)));
    }
    Ok(())
}

struct Connection {
    database_url: String,
    tokens: Arc<dyn TokenSource + Send + Sync>,
}

impl Connection {
    fn key_url(&self, key: &str) -> String {
        format!("{}/config/{}.json", self.database_url.trim_end_matches('/'), key)
    }
}

pub struct FirebaseConfigStore {
    settings: FirebaseSettings,
    http: Client,
    connection: OnceCell<Connection>,
}

impl FirebaseConfigStore {
    pub fn new(settings: FirebaseSettings) -> Self {
        Self {
            settings,
            http: Client::new(),
            connection: OnceCell::new(),
        }
    }

    /// A store that is already connected with the given token source.
    pub fn with_token_source(
        database_url: impl Into<String>,
        tokens: Arc<dyn TokenSource + Send + Sync>,
    ) -> Self {
        let database_url = database_url.into();
        Self {
            settings: FirebaseSettings {
                credentials_path: None,
                database_url: Some(database_url.clone()),
            },
            http: Client::new(),
            connection: OnceCell::new_with(Some(Connection { database_url, tokens })),
        }
    }

    async fn connection(&self) -> Result<&Connection, AppError> {
        self.connection.get_or_try_init(|| self.connect()).await
    }

    async fn connect(&self) -> Result<Connection, AppError> {
        let (path, database_url) = match (&self.settings.credentials_path, &self.settings.database_url) {
            (Some(path), Some(url)) => (path, url),
            _ => {
                tracing::error!("Firebase credentials or database URL not configured");
                return Err(AppError::RemoteConfig("Firebase configuration missing".to_string()));
            }
        };

        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            tracing::error!("Firebase credentials file not found: {}", path.display());
            return Err(AppError::RemoteConfig(format!(
                "Firebase credentials file not found: {}",
                path.display()
            )));
        }

        let key = CredentialSource::File(path.clone())
            .load()
            .await
            .map_err(|err| AppError::RemoteConfig(err.to_string()))?;
        let tokens = ServiceAccountTokenSource::new(key, FIREBASE_SCOPES, self.http.clone());

        tracing::info!("Firebase initialized successfully");
        Ok(Connection {
            database_url: database_url.clone(),
            tokens: Arc::new(tokens),
        })
    }

    async fn bearer(&self, connection: &Connection) -> Result<String, AppError> {
        connection
            .tokens
            .access_token()
            .await
            .map_err(|err| AppError::RemoteConfig(err.to_string()))
    }
}

fn remote_error(key: &str, err: impl std::fmt::Display) -> AppError {
    AppError::RemoteConfig(format!("config/{}: {}", key, err))
}

#[async_trait]
impl ConfigStore for FirebaseConfigStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, AppError> {
        validate_key(key)?;
        let connection = self.connection().await?;
        let token = self.bearer(connection).await?;

        let response = self
            .http
            .get(connection.key_url(key))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| remote_error(key, err))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(remote_error(key, format!("HTTP {}", response.status())));
        }

        let value = response.json::<Value>().await.map_err(|err| remote_error(key, err))?;
        Ok(match value {
            Value::Null => None,
            other => Some(other),
        })
    }

    async fn set(&self, key: &str, value: &Value) -> Result<(), AppError> {
        validate_key(key)?;
        let connection = self.connection().await?;
        let token = self.bearer(connection).await?;

        let response = self
            .http
            .put(connection.key_url(key))
            .bearer_auth(token)
            .json(value)
            .send()
            .await
            .map_err(|err| remote_error(key, err))?;

        if !response.status().is_success() {
            return Err(remote_error(key, format!("HTTP {}", response.status())));
        }

        tracing::info!("Firebase config updated for key '{}'", key);
        Ok(())
    }
}

/// In-process store for tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, AppError> {
        validate_key(key)?;
        let entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &Value) -> Result<(), AppError> {
        validate_key(key)?;
        let mut entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.insert(key.to_string(), value.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{
        matchers::{body_json, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use crate::services::google_auth::StaticToken;

    const TEST_KEY_PEM: &str = include_str!("../../tests/fixtures/test_service_account_key.pem");

    fn connected_store(server: &MockServer) -> FirebaseConfigStore {
        FirebaseConfigStore::with_token_source(server.uri(), Arc::new(StaticToken("test-token".into())))
    }

    #[tokio::test]
    async fn get_returns_stored_blob() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/config/closed_accounts.json"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ids": [1, 2]})))
            .mount(&server)
            .await;

        let value = connected_store(&server).get("closed_accounts").await.unwrap();
        assert_eq!(value, Some(json!({"ids": [1, 2]})));
    }

    #[tokio::test]
    async fn get_on_missing_key_yields_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/config/nothing_here.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("null"))
            .mount(&server)
            .await;

        assert_eq!(connected_store(&server).get("nothing_here").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_puts_json_under_config_key() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/config/closed_accounts.json"))
            .and(body_json(json!({"ids": [7]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ids": [7]})))
            .expect(1)
            .mount(&server)
            .await;

        connected_store(&server)
            .set("closed_accounts", &json!({"ids": [7]}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn server_errors_surface_as_remote_config_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = connected_store(&server).get("closed_accounts").await.unwrap_err();
        assert!(matches!(err, AppError::RemoteConfig(_)));
    }

    #[tokio::test]
    async fn missing_settings_fail_on_first_use() {
        let store = FirebaseConfigStore::new(FirebaseSettings::default());
        let err = store.get("closed_accounts").await.unwrap_err();
        assert_eq!(err.to_string(), "Remote config error: Firebase configuration missing");
    }

    #[tokio::test]
    async fn missing_credentials_file_is_reported() {
        let store = FirebaseConfigStore::new(FirebaseSettings {
            credentials_path: Some(PathBuf::from("/definitely/not/here.json")),
            database_url: Some("https://example.firebaseio.com".into()),
        });
        let err = store.get("closed_accounts").await.unwrap_err();
        assert!(err.to_string().contains("Firebase credentials file not found"));
    }

    #[tokio::test]
    async fn connection_is_initialised_once_from_key_file() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "fb-token", "expires_in": 3600})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer fb-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
            .expect(2)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("firebase.json");
        let key = json!({
            "client_email": "config@childpub-test.iam.gserviceaccount.com",
            "private_key": TEST_KEY_PEM,
            "token_uri": format!("{}/token", server.uri()),
        });
        std::fs::write(&key_path, key.to_string()).unwrap();

        let store = FirebaseConfigStore::new(FirebaseSettings {
            credentials_path: Some(key_path),
            database_url: Some(server.uri()),
        });

        assert_eq!(store.get("feature_flag").await.unwrap(), Some(json!(true)));
        assert_eq!(store.get("feature_flag").await.unwrap(), Some(json!(true)));
    }

    #[tokio::test]
    async fn memory_store_round_trips_and_rejects_bad_keys() {
        let store = MemoryConfigStore::new();
        assert_eq!(store.get("closed_accounts").await.unwrap(), None);

        store.set("closed_accounts", &json!(["a"])).await.unwrap();
        assert_eq!(store.get("closed_accounts").await.unwrap(), Some(json!(["a"])));

        assert!(matches!(
            store.set("bad.key", &json!(1)).await,
            Err(AppError::InvalidInput(_))
        ));
    }
}
