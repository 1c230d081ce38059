//! Run the pruning proxy in front of a provider API.
//!
//! # Usage
//!
//! ```bash
//! snip-proxy --upstream https://api.anthropic.com
//! snip-proxy --upstream https://api.openai.com --port 9000 --project .
//! SNIP_LOG=snip_proxy=debug snip-proxy --upstream https://generativelanguage.googleapis.com
//! ```
//!
//! Then point the agent's provider base URL at the printed address and tag
//! requests with `x-snip-session`.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use snip_proxy::{ProxyConfig, spawn_proxy};
use snip_rs::notify::{LoggingNotifier, Notifier};
use snip_rs::state::FilePersistence;
use snip_rs::{Snip, SnipConfig, logging};
use tracing::info;

/// Pruning proxy for LLM provider requests.
#[derive(Parser)]
#[command(about = "Prune stale tool outputs from requests on their way to the provider")]
struct Args {
    /// Provider base URL requests are forwarded to.
    #[arg(long)]
    upstream: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8787)]
    port: u16,

    /// Project root whose `.snip/snip.json` is layered over the global config.
    #[arg(long)]
    project: Option<PathBuf>,

    /// Directory holding per-session state files.
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Debug logging for snip itself (SNIP_LOG overrides).
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    logging::init(args.verbose);

    let loaded = SnipConfig::load(args.project.as_deref());
    let notifier = Arc::new(LoggingNotifier::new(loaded.config.pruning_summary));
    notifier.config_issues(&loaded.issues);
    if !loaded.config.enabled {
        info!("Pruning disabled by configuration; forwarding only");
    }

    let state_dir = args.state_dir.unwrap_or_else(FilePersistence::default_dir);
    let persistence = match FilePersistence::new(&state_dir) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: cannot use state directory {}: {e}", state_dir.display());
            process::exit(1);
        }
    };

    let builder = Snip::builder(loaded.config)
        .with_persistence(Arc::new(persistence))
        .with_notifier(notifier);
    let config =
        ProxyConfig::new(&args.upstream).with_bind_addr(([127, 0, 0, 1], args.port).into());

    let (addr, _snip) = match spawn_proxy(builder, config).await {
        Ok(started) => started,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };
    println!("snip proxy: http://{addr} -> {}", args.upstream);

    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("Error: failed to wait for Ctrl-C: {e}");
        process::exit(1);
    }
    info!("Shutting down");
}
