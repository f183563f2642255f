// Laminark CLI — thin wrappers over the library facade.
//
// Surfaces: `hook` (observation producer), `recall`/`resume`/`status`
// (query consumers), session lifecycle events, `ingest` for external
// documentation, and `serve` for the long-lived background service.
//
// Exit codes: 0 on success, 1 on configuration/IO failure, with a
// one-line reason on stderr.

use clap::{Parser, Subcommand};
use laminark::{
    engine::debug::init_logging, run_service, Classification, EmbeddingClient, Laminark,
    MatchType, ObservationInput, ObservationKind, SearchOptions, ServiceConfig, ToolInput,
    ToolScope,
};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "laminark", version, about = "Project-scoped memory store for coding agents")]
struct Cli {
    /// Project directory (defaults to the current directory).
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest one observation from stdin JSON (the hook surface).
    Hook,

    /// Ingest a documentation file as immediately-queryable reference.
    Ingest {
        path: PathBuf,
    },

    /// Search memory.
    Recall {
        query: Vec<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        kind: Option<String>,
        #[arg(long)]
        include_unclassified: bool,
    },

    /// Stash the most recent observations as a named topic thread.
    Stash {
        label: String,
        #[arg(long, default_value = "")]
        summary: String,
        #[arg(long, default_value_t = 10)]
        last: usize,
    },

    /// List stashed threads, or resume one by id.
    Resume {
        id: Option<String>,
    },

    /// Counts and capabilities.
    Status,

    /// Record a session start; pass configured tool names for the
    /// staleness sweep.
    SessionStart {
        #[arg(long)]
        id: Option<String>,
        #[arg(long = "tool")]
        tools: Vec<String>,
    },

    /// Record a session end with an optional summary.
    SessionEnd {
        id: String,
        #[arg(long)]
        summary: Option<String>,
    },

    /// Record one tool invocation.
    ToolUse {
        name: String,
        #[arg(long, default_value = "command")]
        tool_type: String,
        #[arg(long)]
        failed: bool,
    },

    /// Run the long-lived background service (curation fallback +
    /// embedding backfill).
    Serve {
        #[arg(long)]
        embedder_url: Option<String>,
        #[arg(long, default_value = "all-minilm")]
        embedder_model: String,
        #[arg(long, default_value_t = 120)]
        curation_interval: u64,
    },
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("laminark: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> laminark::LaminarkResult<()> {
    let project_dir = match cli.project {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let laminark = Laminark::open(&project_dir)?;

    match cli.command {
        Command::Hook => {
            let mut raw = String::new();
            std::io::stdin().read_to_string(&mut raw)?;
            let input: ObservationInput = serde_json::from_str(&raw)?;
            let observation = laminark.observe(&input)?;
            println!("{}", observation.id);
        }

        Command::Ingest { path } => {
            let content = std::fs::read_to_string(&path)?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());
            let input = ObservationInput::new(content)
                .with_title(name.as_str())
                .with_source(format!("ingest:{name}"))
                .with_kind(ObservationKind::Reference);
            let observation = laminark.observe_classified(&input, Classification::Discovery)?;
            println!("{}", observation.id);
        }

        Command::Recall { query, limit, session, kind, include_unclassified } => {
            let kind = match kind {
                Some(raw) => Some(raw.parse::<ObservationKind>().map_err(|_| {
                    laminark::LaminarkError::validation(format!("unknown kind '{raw}'"))
                })?),
                None => None,
            };
            let options = SearchOptions {
                limit,
                session_id: session,
                kind,
                since: None,
                include_unclassified,
            };
            let results = laminark
                .recall(&query.join(" "), &options, None)
                .await?;
            for result in results {
                let label = result
                    .observation
                    .title
                    .as_deref()
                    .unwrap_or(&result.observation.id);
                println!(
                    "{:>6.4} [{}] {}: {}",
                    result.score,
                    match_label(result.match_type),
                    label,
                    result.snippet.replace('\n', " ")
                );
            }
        }

        Command::Stash { label, summary, last } => {
            let thread = laminark.stash_recent(&label, &summary, last)?;
            println!("{} ({} observations)", thread.id, thread.observation_snapshots.len());
        }

        Command::Resume { id } => match id {
            Some(id) => {
                let (thread, observations) = laminark.resume(&id)?;
                println!("# {} — {}", thread.topic_label, thread.summary);
                for observation in observations {
                    println!("- [{}] {}", observation.kind, first_line(&observation.content));
                }
            }
            None => {
                for thread in laminark.list_stashes(None)? {
                    println!(
                        "{}  {:<8} {}  ({} observations)",
                        thread.id,
                        thread.status.as_str(),
                        thread.topic_label,
                        thread.observation_snapshots.len()
                    );
                }
            }
        },

        Command::Status => {
            let status = laminark.status()?;
            println!("project        {}", status.project_hash);
            println!("schema         v{}", status.schema_version);
            println!("vector search  {}", if status.vector_enabled { "on" } else { "off" });
            println!("observations   {} ({} pending)", status.observations, status.unclassified);
            println!("graph          {} nodes, {} edges", status.graph_nodes, status.graph_edges);
            println!("threads        {}", status.threads);
            println!("tools          {}", status.tools);
        }

        Command::SessionStart { id, tools } => {
            let session = laminark.session_started(id.as_deref())?;
            if !tools.is_empty() {
                let stale = laminark.mark_stale_tools(&tools)?;
                if stale > 0 {
                    eprintln!("laminark: {stale} tools went stale");
                }
            }
            println!("{}", session.id);
        }

        Command::SessionEnd { id, summary } => {
            if !laminark.session_ended(&id, summary.as_deref())? {
                return Err(laminark::LaminarkError::not_found("session", id));
            }
        }

        Command::ToolUse { name, tool_type, failed } => {
            let input = ToolInput {
                name,
                tool_type,
                scope: ToolScope::Project,
                source: "organic".to_string(),
                description: None,
                server_name: None,
            };
            let status = laminark.observe_tool_use(&input, !failed)?;
            println!("{}", status.as_str());
        }

        Command::Serve { embedder_url, embedder_model, curation_interval } => {
            let embedder = embedder_url.map(|url| {
                Arc::new(EmbeddingClient::new(url, embedder_model)) as Arc<dyn laminark::Embedder>
            });
            let config = ServiceConfig {
                curation_interval_secs: curation_interval,
                ..Default::default()
            };
            run_service(Arc::new(laminark), None, embedder, config).await;
        }
    }

    Ok(())
}

fn match_label(match_type: MatchType) -> &'static str {
    match match_type {
        MatchType::Fts => "fts",
        MatchType::Vector => "vector",
        MatchType::Hybrid => "hybrid",
    }
}

fn first_line(content: &str) -> &str {
    content.lines().next().unwrap_or("")
}
