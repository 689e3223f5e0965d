use std::process::ExitCode;
use std::sync::Arc;

use agentdesk::settings::{AppSettings, SettingsStore};
use agentdesk::shell::{Shell, ShellError};
use agentdesk_backend::AgentService;
use agentdesk_client::ClientCore;
use agentdesk_protocol::Backend;
use agentdesk_remote::{HttpAgentClient, RemoteError};
use agentdesk_storage::{SqliteStorage, StorageError};
use snafu::{ResultExt, Snafu};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Snafu)]
enum StartupError {
    #[snafu(display("failed to open database on `{stage}`: {source}"))]
    OpenStorage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("failed to build agent client on `{stage}`: {source}"))]
    BuildAgentClient {
        stage: &'static str,
        source: RemoteError,
    },
    #[snafu(display("shell stopped on `{stage}`: {source}"))]
    Shell {
        stage: &'static str,
        source: ShellError,
    },
}

/// `RUST_LOG` wins over the configured filter.
fn init_tracing(settings: &AppSettings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_filter.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(settings: Arc<AppSettings>) -> Result<(), StartupError> {
    let storage = SqliteStorage::open(&settings.database_path)
        .await
        .context(OpenStorageSnafu {
            stage: "open-sqlite-storage",
        })?;
    tracing::info!(database_url = storage.database_url(), "storage ready");

    let agent_client =
        HttpAgentClient::new(settings.request_timeout()).context(BuildAgentClientSnafu {
            stage: "build-http-agent-client",
        })?;

    let backend: Arc<dyn Backend> =
        Arc::new(AgentService::new(Arc::new(storage), Arc::new(agent_client)));
    let mut shell = Shell::new(ClientCore::new(backend));

    shell.start().await.context(ShellSnafu {
        stage: "start-shell",
    })?;
    shell.run().await.context(ShellSnafu {
        stage: "run-shell",
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let settings_store = SettingsStore::load();
    let settings = settings_store.settings();
    init_tracing(&settings);
    tracing::debug!(config_path = %settings_store.config_path().display(), "settings loaded");

    match run(settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "agentdesk exited with an error");
            eprintln!("{error}");
            ExitCode::FAILURE
        }
    }
}
