//! Application orchestrator — wires the servers to the in-memory
//! editor.

use std::sync::Arc;

use ghosttext_editor::{ConnectOptions, MemoryEditor, SyncBridge, SyntaxMap};
use ghosttext_server::{ConnectHooks, HttpStatusServer};

use crate::config::Config;

/// Owns the zero-or-one active handshake endpoint for the process.
pub struct App {
    server: Option<Arc<HttpStatusServer>>,
}

impl App {
    /// Binds the handshake endpoint and starts serving.
    ///
    /// A bind failure is fatal: there is no fallback port the browser
    /// extension would find.
    pub async fn start(port: u16, hooks: Arc<dyn ConnectHooks>) -> anyhow::Result<Self> {
        let server = HttpStatusServer::bind(port, hooks).await?;
        Ok(Self {
            server: Some(server),
        })
    }

    /// Stops the endpoint and every session server it spawned.
    pub fn stop(&mut self) {
        if let Some(server) = self.server.take() {
            server.stop();
        }
    }
}

/// Runs the server until shutdown is requested.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let editor = Arc::new(MemoryEditor::new(SyntaxMap {
        host_to_syntax: config.host_to_syntax.clone(),
        default_syntax: config.default_syntax.clone(),
    }));

    let bridge = Arc::new(SyncBridge::new(
        Arc::clone(&editor),
        ConnectOptions {
            new_window_on_connect: config.new_window_on_connect,
            window_command_on_connect: config.window_command_on_connect.clone(),
        },
    ));

    let mut app = App::start(config.server_port, bridge).await?;
    tracing::info!("server ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    app.stop();
    Ok(())
}
