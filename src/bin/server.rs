// -----------------------------------------------------------------------------
// fsload-server - the throttled file server the generator drives
// -----------------------------------------------------------------------------

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use fsload::constants::{DEFAULT_PATH_PREFIX, SERVER_DEFAULT_PORT};
use fsload::server::{FileServer, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "fsload-server", version, about = "Throttled name-addressed blob file server")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value_t = SERVER_DEFAULT_PORT)]
    port: u16,

    /// URL prefix files are addressed under (no leading/trailing slashes)
    #[arg(long, default_value = DEFAULT_PATH_PREFIX)]
    path_prefix: String,

    /// Directory blobs are stored in (defaults to the system temp dir)
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    use tracing_subscriber::{fmt, EnvFilter};
    fmt()
        .with_env_filter(EnvFilter::new(format!("fsload={level}")))
        .with_target(false)
        .init();

    let cfg = ServerConfig {
        port: cli.port,
        path_prefix: cli.path_prefix,
        storage_dir: cli.storage_dir.unwrap_or_else(std::env::temp_dir),
        ..ServerConfig::default()
    };
    info!("starting file server");
    FileServer::new(cfg).run().await
}
