//! B2C Session - Azure AD B2C sign-in client
//!
//! Signs users in against B2C policy authorities, keeps a token cache in the
//! platform secure store and calls Microsoft Graph with the access token.
//! Runs as a menu bar app on macOS and as a console prompt elsewhere.

#![deny(clippy::all)]

#[cfg(target_os = "macos")]
mod app;
mod auth;
mod config;
#[cfg(not(target_os = "macos"))]
mod console;
mod error;
mod keychain;
#[cfg(target_os = "macos")]
mod menubar;
mod session;
mod settings;

use anyhow::{Context, Result};
use std::fs::File;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::{Config, LoggingConfig};
use error::AppError;
use keychain::{MemoryStore, SecureStore};
use session::{Presenter, SessionAction, SessionController};

const LOG_FILE: &str = "b2c-session.log";

fn main() {
    // Load .env file (if present) before anything else
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config.logging);
    info!(
        "Starting {} v{} ({})",
        config.app.name, config.app.version, config.app.bundle_identifier
    );
    if let Err(e) = config.validate() {
        warn!("{}", e);
        eprintln!("Configuration error: {}", e);
        eprintln!("\nPlease set the following environment variables:");
        eprintln!("  B2C_CLIENT_ID=<application-id-registered-in-b2c>");
        eprintln!("  B2C_TENANT=<tenant>.onmicrosoft.com");
        eprintln!("  B2C_AUTHORITY_HOST=<tenant>.b2clogin.com");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create Tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    let store = open_store(&config);

    if let Err(e) = run_app(&config, &runtime, store) {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    // Don't wait on a browser sign-in that is still pending
    runtime.shutdown_timeout(Duration::from_secs(1));
}

/// Initialize tracing into a file under the log directory, or stderr if
/// that can't be opened.
fn init_logging(config: &LoggingConfig) {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
    };

    let file = settings::init_log_directory(&config.log_dir).and_then(|dir| {
        let path = dir.join(LOG_FILE);
        File::options()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))
    });

    match file {
        Ok(file) => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_target(false)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init(),
        Err(e) => {
            eprintln!("Warning: Could not open log file: {:#}", e);
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

/// The platform secure store, or an in-memory one if it is unavailable.
fn open_store(config: &Config) -> Arc<dyn SecureStore> {
    match keychain::platform_store(&config.keychain.access_group) {
        Ok(store) => Arc::from(store),
        Err(e) => {
            warn!("Secure store unavailable, tokens will not persist: {}", e);
            Arc::new(MemoryStore::new())
        }
    }
}

/// Start the controller task, or a stand-in that reports why it could not
/// be created.
fn spawn_session(
    runtime: &Runtime,
    config: &Config,
    store: Arc<dyn SecureStore>,
    presenter: Arc<dyn Presenter>,
    actions: mpsc::Receiver<SessionAction>,
) {
    match create_controller(config, store, Arc::clone(&presenter)) {
        Ok(controller) => {
            runtime.spawn(async move {
                controller.run(actions).await;
            });
        }
        Err(e) => {
            error!("Unable to create application context: {}", e);
            runtime.spawn(report_unavailable(e, presenter, actions));
        }
    }
}

/// Validate the config, then build the controller on top of it.
fn create_controller(
    config: &Config,
    store: Arc<dyn SecureStore>,
    presenter: Arc<dyn Presenter>,
) -> Result<SessionController, AppError> {
    config.validate()?;
    SessionController::initialize(config, store, presenter)
}

async fn report_unavailable(
    err: AppError,
    presenter: Arc<dyn Presenter>,
    mut actions: mpsc::Receiver<SessionAction>,
) {
    let text = format!("{} ({})", err.user_message(), err);
    presenter.log(&text);
    while actions.recv().await.is_some() {
        presenter.log(&text);
    }
}

#[cfg(target_os = "macos")]
fn run_app(config: &Config, runtime: &Runtime, store: Arc<dyn SecureStore>) -> Result<()> {
    use app::delegate::AppDelegate;
    use menubar::builder::MenuBar;
    use menubar::delegate::init_action_channel;
    use menubar::state::init_app_state;
    use menubar::updates::MenuBarPresenter;
    use objc2::runtime::ProtocolObject;
    use objc2_app_kit::{NSApplication, NSApplicationActivationPolicy};
    use objc2_foundation::MainThreadMarker;

    // Must run on main thread for AppKit
    let mtm = MainThreadMarker::new().context("Must run on main thread")?;

    init_app_state();
    let actions = init_action_channel().context("Action channel already initialized")?;

    let ns_app = NSApplication::sharedApplication(mtm);
    // No dock icon
    ns_app.setActivationPolicy(NSApplicationActivationPolicy::Accessory);

    let delegate = AppDelegate::new(mtm);
    ns_app.setDelegate(Some(ProtocolObject::from_ref(&*delegate)));

    MenuBar::init(mtm);
    info!("Menu bar initialized");

    spawn_session(runtime, config, store, Arc::new(MenuBarPresenter), actions);

    info!("Starting application event loop");
    unsafe {
        ns_app.run();
    }
    Ok(())
}

#[cfg(not(target_os = "macos"))]
fn run_app(config: &Config, runtime: &Runtime, store: Arc<dyn SecureStore>) -> Result<()> {
    use session::view::ChannelPresenter;

    let (presenter, updates) = ChannelPresenter::new();
    let (tx, rx) = mpsc::channel(10);
    spawn_session(runtime, config, store, Arc::new(presenter), rx);

    runtime.block_on(async move {
        tx.send(SessionAction::LoadAccount)
            .await
            .context("Session task stopped")?;
        console::run(tx, updates).await
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::error::ConfigError;
    use crate::session::testing::RecordingPresenter;

    #[test]
    fn test_incomplete_config_is_unavailable() {
        let store: Arc<dyn SecureStore> = Arc::new(MemoryStore::new());
        let presenter: Arc<dyn Presenter> = Arc::new(RecordingPresenter::default());

        let placeholders = Config::embedded().unwrap();
        let result = create_controller(&placeholders, Arc::clone(&store), Arc::clone(&presenter));
        assert!(matches!(
            result,
            Err(AppError::Config(ConfigError::Incomplete(_)))
        ));

        assert!(create_controller(&test_config(), store, presenter).is_ok());
    }

    #[tokio::test]
    async fn test_report_unavailable_answers_every_action() {
        let presenter = Arc::new(RecordingPresenter::default());
        let (tx, rx) = mpsc::channel(4);
        tx.send(SessionAction::Authorize).await.unwrap();
        tx.send(SessionAction::CallApi).await.unwrap();
        drop(tx);

        let err = AppError::Config(ConfigError::Incomplete("B2C tenant not configured".into()));
        report_unavailable(err, presenter.clone(), rx).await;

        let expected = "Unable to create application context. Check the B2C settings. \
                        (Configuration error: B2C tenant not configured)";
        assert_eq!(presenter.logs(), vec![expected.to_string(); 3]);
        assert_eq!(presenter.label(), None);
    }
}
