use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser, Clone)]
#[command(name = "pluginserver")]
#[command(about = "RPC sidecar that runs compiled gateway plugins")]
#[command(disable_version_flag = true)]
pub struct Cli {
    /// Gateway prefix path; the server socket is created inside it.
    #[arg(long, default_value = "/usr/local/kong")]
    pub kong_prefix: PathBuf,

    /// Directory searched for plugin shared objects.
    #[arg(long, default_value = "")]
    pub plugins_directory: PathBuf,

    /// Dump one plugin's info as JSON to stdout and exit.
    #[arg(long, value_name = "NAME")]
    pub dump_plugin_info: Option<String>,

    /// Dump info for every plugin in the plugins directory as a JSON array.
    #[arg(long)]
    pub dump_all_plugins: bool,

    /// Print the binary version and exit.
    #[arg(long)]
    pub version: bool,
}
