//! Standalone RPC server that runs compiled gateway plugins.

mod cli;

use std::os::unix::net::UnixListener;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use pluginserver_core::{PluginServer, ServerConfig, serve};
use pluginserver_protocol::PluginInfo;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cli::Cli;

/// Socket file created inside the gateway prefix; the name is part of the
/// wire contract with the host.
const SOCKET_FILE_NAME: &str = "go_pluginserver.sock";

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    if cli.version {
        println!("Version: {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let server = Arc::new(PluginServer::new(ServerConfig::new(
        cli.plugins_directory.clone(),
    )));

    if let Some(name) = &cli.dump_plugin_info {
        return dump_plugin_info(&server, name);
    }
    if cli.dump_all_plugins {
        return dump_all_plugins(&server);
    }

    spawn_parent_watchdog();
    run_server(&cli, server)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn dump_plugin_info(server: &PluginServer, name: &str) -> Result<()> {
    let info = server
        .plugin_info(name)
        .with_context(|| format!("can't load plugin {name}"))?;
    println!("{}", serde_json::to_string(&info)?);
    Ok(())
}

fn dump_all_plugins(server: &PluginServer) -> Result<()> {
    let mut infos = Vec::<PluginInfo>::new();
    for name in server.plugin_names() {
        match server.plugin_info(&name) {
            Ok(info) => infos.push(info),
            Err(error) => warn!(plugin = %name, %error, "can't load plugin"),
        }
    }
    println!("{}", serde_json::to_string(&infos)?);
    Ok(())
}

/// Exits when the parent process goes away: adoption by init means the
/// gateway is gone and every live event with it.
fn spawn_parent_watchdog() {
    thread::spawn(|| {
        loop {
            if std::os::unix::process::parent_id() == 1 {
                info!("gateway exited; shutting down");
                std::process::exit(0);
            }
            thread::sleep(Duration::from_secs(1));
        }
    });
}

fn run_server(cli: &Cli, server: Arc<PluginServer>) -> Result<()> {
    let socket_path = cli.kong_prefix.join(SOCKET_FILE_NAME);
    match std::fs::remove_file(&socket_path) {
        Ok(()) => {}
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => {
            return Err(error)
                .with_context(|| format!("removing {}", socket_path.display()));
        }
    }

    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("listen on {}", socket_path.display()))?;
    info!(socket = %socket_path.display(), "listening");

    serve(listener, server);
    Ok(())
}
