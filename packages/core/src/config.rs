use std::env;
use std::path::PathBuf;

use crate::cache::DEFAULT_MAX_AGE_HOURS;
use crate::cli::ServeArgs;
use crate::fetcher::DEFAULT_PAGE_SIZE;
use crate::services::ad_manager::{AdManagerSettings, DEFAULT_API_VERSION, DEFAULT_ENDPOINT};
use crate::services::google_auth::CredentialSource;
use crate::services::mailer::{SmtpSettings, DEFAULT_SMTP_HOST, DEFAULT_SMTP_PORT};
use crate::services::remote_config::FirebaseSettings;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;

#[derive(Debug, Clone)]
pub struct Config {
    /// Default network for the one-shot `fetch` command.
    pub network_code: Option<String>,
    pub credentials: Option<CredentialSource>,
    pub ad_manager: AdManagerSettings,
    pub page_size: u32,
    pub snapshot_dir: PathBuf,
    pub cache_max_age_hours: f64,
    pub host: String,
    pub port: u16,
    pub smtp: SmtpSettings,
    pub firebase: FirebaseSettings,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        // Inline JSON wins over a key file path.
        let credentials = var("GAM_SERVICE_ACCOUNT_JSON")
            .map(CredentialSource::Env)
            .or_else(|| var("GAM_SERVICE_ACCOUNT").map(|path| CredentialSource::File(path.into())));

        let ad_manager = AdManagerSettings {
            endpoint: var("GAM_API_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            api_version: var("GAM_API_VERSION").unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            application_name: var("GAM_APPLICATION_NAME")
                .unwrap_or_else(|| "childpub-monitor".to_string()),
        };

        let page_size = match var("GAM_PAGE_SIZE") {
            Some(raw) => match raw.parse::<u32>() {
                Ok(size) if size > 0 => size,
                _ => return Err("GAM_PAGE_SIZE must be a positive number".to_string()),
            },
            None => DEFAULT_PAGE_SIZE,
        };

        let cache_max_age_hours = match var("CACHE_MAX_AGE_HOURS") {
            Some(raw) => match raw.parse::<f64>() {
                Ok(hours) if hours.is_finite() && hours > 0.0 => hours,
                _ => return Err("CACHE_MAX_AGE_HOURS must be a positive number".to_string()),
            },
            None => DEFAULT_MAX_AGE_HOURS,
        };

        let port = var("PORT")
            .map(|raw| raw.parse::<u16>())
            .transpose()
            .map_err(|_| "PORT must be a valid port number")?
            .unwrap_or(DEFAULT_PORT);

        let smtp_port = var("SMTP_PORT")
            .map(|raw| raw.parse::<u16>())
            .transpose()
            .map_err(|_| "SMTP_PORT must be a valid port number")?
            .unwrap_or(DEFAULT_SMTP_PORT);

        let smtp_user = var("SMTP_USER");
        let smtp = SmtpSettings {
            host: var("SMTP_HOST").unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
            port: smtp_port,
            from: var("FROM_EMAIL").or_else(|| smtp_user.clone()),
            user: smtp_user,
            password: var("SMTP_PASSWORD"),
        };

        let firebase = FirebaseSettings {
            credentials_path: var("FIREBASE_CREDENTIALS_PATH").map(PathBuf::from),
            database_url: var("FIREBASE_DATABASE_URL"),
        };

        Ok(Self {
            network_code: var("GAM_NETWORK_CODE"),
            credentials,
            ad_manager,
            page_size,
            snapshot_dir: var("SNAPSHOT_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from(".")),
            cache_max_age_hours,
            host: var("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            smtp,
            firebase,
        })
    }

    /// CLI flags take precedence over the environment.
    pub fn apply_serve_args(&mut self, args: &ServeArgs) {
        if let Some(host) = &args.host {
            self.host = host.clone();
        }
        if let Some(port) = args.port {
            self.port = port;
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
