use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use serde_json::{json, Value};

use childpub_monitor::api;
use childpub_monitor::cli::{Cli, Command, ConfigCommand, FetchArgs, NotifyArgs, ServeArgs};
use childpub_monitor::config::Config;
use childpub_monitor::error::AppError;
use childpub_monitor::fetcher::{AccountQuery, RecordFetcher};
use childpub_monitor::logging::{init_logging, COMMAND_DIRECTIVE, SERVER_DIRECTIVE};
use childpub_monitor::metrics::AppMetrics;
use childpub_monitor::model::NetworkCode;
use childpub_monitor::monitor::SnapshotService;
use childpub_monitor::services::ad_manager::AdManagerClientFactory;
use childpub_monitor::services::mailer::{NotificationSink, SmtpMailer};
use childpub_monitor::services::remote_config::{ConfigStore, FirebaseConfigStore};
use childpub_monitor::store::FsSnapshotStore;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    let cli = Cli::parse();

    // One-shot commands print their result on stdout; keep logs quiet there.
    let default_level = match cli.command {
        Command::Serve(_) => SERVER_DIRECTIVE,
        _ => COMMAND_DIRECTIVE,
    };
    init_logging(default_level);

    let config = match Config::from_env().map_err(AppError::Config) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("{}", err);
            println!("Error: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Serve(args) => serve(config, args).await,
        Command::Fetch(args) => fetch(config, args).await,
        Command::Notify(args) => notify(config, args).await,
        Command::Config(command) => remote_config(config, command).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            println!("Error: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn snapshot_service(config: &Config) -> SnapshotService {
    let factory = AdManagerClientFactory::new(config.ad_manager.clone(), config.credentials.clone());
    let fetcher = RecordFetcher::new(Arc::new(factory), config.page_size);
    let store = FsSnapshotStore::new(config.snapshot_dir.clone());

    SnapshotService::new(fetcher, Arc::new(store), config.cache_max_age_hours)
}

async fn serve(mut config: Config, args: ServeArgs) -> Result<(), AppError> {
    config.apply_serve_args(&args);

    let metrics = Arc::new(
        AppMetrics::new().map_err(|err| AppError::Server(format!("Failed to register metrics: {}", err)))?,
    );
    let service = Arc::new(snapshot_service(&config).with_metrics(metrics.clone()));
    let app = api::create_router(service, metrics);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|err| AppError::Server(format!("Failed to bind {}: {}", addr, err)))?;

    tracing::info!(
        "Child publisher API listening on {} (snapshots in {}, max age {}h)",
        addr,
        config.snapshot_dir.display(),
        config.cache_max_age_hours
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Server(err.to_string()))?;

    tracing::info!("Server stopped cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", err);
    }
    tracing::info!("Shutdown signal received");
}

async fn fetch(config: Config, args: FetchArgs) -> Result<(), AppError> {
    let network_code: NetworkCode = args
        .network_code
        .clone()
        .or_else(|| config.network_code.clone())
        .ok_or_else(|| AppError::InvalidInput("Network code required".to_string()))?
        .parse()?;
    let service = snapshot_service(&config);

    if args.managed {
        let snapshot = service
            .fetch(network_code.as_str(), AccountQuery::ManagedAccounts)
            .await?;
        let report = json!({
            "network_code": snapshot.network_code,
            "total_count": snapshot.total_count,
            "fetched_at": snapshot.fetched_at,
            "manager_accounts": snapshot.records,
        });
        let rendered = serde_json::to_string_pretty(&report)
            .map_err(|err| AppError::Storage(err.to_string()))?;
        println!("{}", rendered);
        return Ok(());
    }

    let served = service.serve(&network_code, args.refresh).await?;
    println!(
        "Success: Fetched {} publishers for network {}",
        served.snapshot.total_count, network_code
    );
    Ok(())
}

async fn notify(config: Config, args: NotifyArgs) -> Result<(), AppError> {
    let html = tokio::fs::read_to_string(&args.html_file).await.map_err(|err| {
        AppError::InvalidInput(format!("Cannot read {}: {}", args.html_file.display(), err))
    })?;

    let mailer = SmtpMailer::new(&config.smtp)?;
    mailer.send(&args.to, &args.subject, &html).await?;

    println!("Email sent to {}", args.to.join(", "));
    Ok(())
}

async fn remote_config(config: Config, command: ConfigCommand) -> Result<(), AppError> {
    let store = FirebaseConfigStore::new(config.firebase.clone());

    match command {
        ConfigCommand::Get { key } => {
            let value = store.get(&key).await?.unwrap_or(Value::Null);
            let rendered = serde_json::to_string_pretty(&value)
                .map_err(|err| AppError::RemoteConfig(err.to_string()))?;
            println!("{}", rendered);
        }
        ConfigCommand::Set { key, value } => {
            let value: Value = serde_json::from_str(&value)
                .map_err(|err| AppError::InvalidInput(format!("Value is not valid JSON: {}", err)))?;
            store.set(&key, &value).await?;
            println!("Updated config/{}", key);
        }
    }

    Ok(())
}
