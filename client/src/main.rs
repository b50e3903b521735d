mod channel;
mod config;
mod fetcher;
mod prefs;
mod render;
mod session;
#[cfg(test)]
mod test_support;
mod view;
mod viewport;

use std::process::ExitCode;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing_subscriber::EnvFilter;

use crate::config::ClientConfig;
use crate::prefs::{JsonFileStore, Layer};
use crate::session::{Phase, Session, SessionHandle};
use crate::view::MapView;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let Some(server_id) = std::env::args().nth(1).or_else(config::server_id) else {
        tracing::error!("usage: countrymap-client <server-id> (or set COUNTRYMAP_SERVER_ID)");
        return ExitCode::from(2);
    };

    let config = ClientConfig::from_env();
    let store = JsonFileStore::new(config::prefs_path());
    tracing::info!(
        %server_id,
        api_url = %config.api_url,
        live_url = %config.live_url,
        prefs = %store.path().display(),
        "starting country map client"
    );

    let session = match Session::new(&config, server_id, Box::new(store)) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(error = %e, "failed to start session");
            return ExitCode::FAILURE;
        }
    };
    let handle = session.spawn();

    let not_found = tokio::select! {
        not_found = display(&handle) => not_found,
        () = commands(&handle) => false,
        () = shutdown_signal() => false,
    };

    handle.shutdown().await;
    tracing::info!("client shut down");
    if not_found {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Print a frame for every published view. Returns true when the server id
/// turned out to be unknown.
async fn display(handle: &SessionHandle) -> bool {
    let mut views = handle.view();
    let mut map = MapView::default();
    loop {
        let view = views.borrow_and_update().clone();
        map.refresh(
            view.state.as_deref(),
            view.last_update,
            view.preferences.layers,
            view.applied,
        );
        println!("{}", render::render(&view, &map));
        match view.phase {
            Phase::NotFound => return true,
            Phase::Closed => return false,
            _ => {}
        }
        if views.changed().await.is_err() {
            return false;
        }
    }
}

/// Line commands on stdin: `admin`, `toggle <layer>`, `quit`.
async fn commands(handle: &SessionHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return std::future::pending().await,
            Err(e) => {
                tracing::warn!(error = %e, "stdin closed");
                return std::future::pending().await;
            }
        };
        let mut words = line.split_whitespace();
        let mut prefs = handle.view().borrow().preferences;
        match (words.next(), words.next()) {
            (Some("quit" | "exit"), _) => return,
            (Some("admin"), _) => prefs.admin_mode = !prefs.admin_mode,
            (Some("toggle"), Some(name)) => match Layer::parse(name) {
                Some(layer) => prefs.layers.toggle(layer),
                None => {
                    tracing::warn!(layer = name, "unknown layer");
                    continue;
                }
            },
            (None, _) => continue,
            (Some(other), _) => {
                tracing::warn!(command = other, "unknown command");
                continue;
            }
        }
        handle.set_preferences(prefs).await;
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
