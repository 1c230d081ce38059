//! Run snip's hooks from the command line.
//!
//! Session state lives under `$HOME/.local/share/snip/sessions` (override
//! with `--state-dir`). Transcripts are JSON arrays of
//! `{"role": ..., "parts": [...]}` messages.
//!
//! # Examples
//!
//! ```sh
//! # Rewrite a captured request body for a session
//! snip rewrite --session ses_1 --body request.json > pruned.json
//!
//! # Run the idle pass against a transcript
//! snip idle --session ses_1 --transcript transcript.json
//!
//! # Prune numeric IDs 3 and 4, as the agent would
//! snip prune --session ses_1 --transcript transcript.json --ids 3,4 --reason "stale reads"
//!
//! # Show the effective configuration and any rejected keys
//! snip config --project .
//! ```

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use snip_rs::host::{HostFuture, SessionAccessor, SessionInfo, Transcript};
use snip_rs::janitor::IdleOutcome;
use snip_rs::prune_tool::PruneTool;
use snip_rs::state::{FilePersistence, Persistence};
use snip_rs::{Snip, SnipConfig, SnipError, logging};

#[derive(Parser)]
#[command(name = "snip", about = "Prune stale tool outputs from LLM request bodies")]
struct Cli {
    // ── Shared options ─────────────────────────────────────────
    /// Directory holding per-session state files
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Project root whose `.snip/snip.json` is layered over the global config
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    /// Debug logging for snip itself (SNIP_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rewrite one request body and print it to stdout
    Rewrite {
        /// Session the request belongs to
        #[arg(long)]
        session: Option<String>,

        /// Request body file (stdin when omitted)
        #[arg(long)]
        body: Option<PathBuf>,

        /// Transcript used to answer session lookups
        #[arg(long)]
        transcript: Option<PathBuf>,

        /// Treat the session as a subagent of this parent
        #[arg(long)]
        parent: Option<String>,
    },

    /// Run the idle pass for a session
    Idle {
        #[arg(long)]
        session: String,

        #[arg(long)]
        transcript: PathBuf,

        #[arg(long)]
        parent: Option<String>,
    },

    /// Prune tool outputs by their numeric IDs
    Prune {
        #[arg(long)]
        session: String,

        #[arg(long)]
        transcript: PathBuf,

        /// Comma-separated numeric IDs from the prunable-tools listing
        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<u64>,

        #[arg(long)]
        reason: Option<String>,

        #[arg(long)]
        parent: Option<String>,
    },

    /// Print the saved state of a session
    Stats {
        #[arg(long)]
        session: String,
    },

    /// Print the effective configuration
    Config,

    /// Print the prune tool's function-calling definition
    Tool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), SnipError> {
    let state_dir = cli.state_dir.unwrap_or_else(FilePersistence::default_dir);
    let loaded = SnipConfig::load(cli.project.as_deref());
    for issue in &loaded.issues {
        eprintln!("Warning: {issue}");
    }

    match cli.command {
        Command::Config => {
            for source in &loaded.sources {
                eprintln!("Loaded {}", source.display());
            }
            println!("{}", serde_json::to_string_pretty(&loaded.config)?);
        }

        Command::Tool => {
            println!("{}", serde_json::to_string_pretty(&PruneTool::definition())?);
        }

        Command::Stats { session } => {
            let persistence = FilePersistence::new(&state_dir)?;
            match persistence.load(&session)? {
                Some(saved) => println!("{}", serde_json::to_string_pretty(&saved)?),
                None => {
                    return Err(SnipError::InvalidArguments(format!(
                        "no saved state for session {session} in {}",
                        state_dir.display()
                    )));
                }
            }
        }

        Command::Rewrite {
            session,
            body,
            transcript,
            parent,
        } => {
            let raw = read_body(body.as_deref())?;
            let mut builder = snip(loaded.config, &state_dir)?;
            if let Some(path) = transcript {
                builder = builder.with_accessor(Arc::new(TranscriptFile::new(path, parent)));
            }
            let snip = builder.build();
            match snip.rewrite(session.as_deref(), &raw).await {
                Some(rewritten) => {
                    println!("{}", String::from_utf8_lossy(&rewritten));
                    if let Some(id) = &session {
                        snip.store().persist_now(id)?;
                    }
                }
                None => {
                    eprintln!("No changes.");
                    println!("{}", String::from_utf8_lossy(&raw));
                }
            }
        }

        Command::Idle {
            session,
            transcript,
            parent,
        } => {
            let snip = snip(loaded.config, &state_dir)?
                .with_accessor(Arc::new(TranscriptFile::new(transcript, parent)))
                .build();
            match snip.janitor().run(&session).await {
                IdleOutcome::Skipped(reason) => eprintln!("Skipped: {reason:?}"),
                IdleOutcome::Nothing => eprintln!("Nothing to prune."),
                IdleOutcome::Pruned(summary) => {
                    snip.store().persist_now(&session)?;
                    println!(
                        "Pruned {} tool output(s), ~{} tokens saved.",
                        summary.pruned.len(),
                        summary.tokens_saved
                    );
                }
            }
        }

        Command::Prune {
            session,
            transcript,
            ids,
            reason,
            parent,
        } => {
            let snip = snip(loaded.config, &state_dir)?
                .with_accessor(Arc::new(TranscriptFile::new(transcript, parent)))
                .build();
            let result = snip.prune(&session, ids, reason).await?;
            snip.store().persist_now(&session)?;
            println!("{}", result.render());
        }
    }
    Ok(())
}

fn snip(config: SnipConfig, state_dir: &Path) -> Result<snip_rs::SnipBuilder, SnipError> {
    let persistence = FilePersistence::new(state_dir)?;
    Ok(Snip::builder(config).with_persistence(Arc::new(persistence)))
}

fn read_body(path: Option<&Path>) -> Result<Vec<u8>, SnipError> {
    match path {
        Some(path) => Ok(std::fs::read(path)?),
        None => {
            let mut buf = Vec::new();
            io::stdin().read_to_end(&mut buf)?;
            Ok(buf)
        }
    }
}

// ── TranscriptFile ─────────────────────────────────────────────────

/// Host stand-in backed by one transcript file.
struct TranscriptFile {
    path: PathBuf,
    parent: Option<String>,
}

impl TranscriptFile {
    fn new(path: PathBuf, parent: Option<String>) -> Self {
        Self { path, parent }
    }

    fn load(&self) -> Result<Transcript, SnipError> {
        let json = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&json).map_err(|e| {
            SnipError::Host(format!("failed to parse {}: {e}", self.path.display()))
        })
    }
}

impl SessionAccessor for TranscriptFile {
    fn get<'a>(&'a self, session_id: &'a str) -> HostFuture<'a, SessionInfo> {
        let info = SessionInfo {
            id: session_id.to_string(),
            parent_id: self.parent.clone(),
            title: None,
        };
        Box::pin(async move { Ok(info) })
    }

    fn list(&self) -> HostFuture<'_, Vec<SessionInfo>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn messages<'a>(&'a self, _session_id: &'a str, limit: usize) -> HostFuture<'a, Transcript> {
        Box::pin(async move {
            let mut transcript = self.load()?;
            let skip = transcript.len().saturating_sub(limit);
            transcript.drain(..skip);
            Ok(transcript)
        })
    }
}
