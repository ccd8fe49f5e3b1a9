//! devac CLI - federated code graph: seeds, hub and graph queries

use clap::{Args, Parser, Subcommand};
use devac::commands::{self, CommandContext, COMMANDS};
use devac::config::{self, DevacConfig};
use devac::hub::{
    self, DiagnosticSource, DiagnosticsFilter, HubRouter, HubServer, RefreshOutcome,
};
use devac::hub::manifest::discover_packages;
use devac::lock::{LockManager, LockStatus};
use devac::query::{HitSummary, QueryScope};
use devac::server::{self, AppState};
use devac::storage::reader::QueryRow;
use devac::ui::{self, Icons};
use devac::watcher::SeedWatcher;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "devac")]
#[command(version)]
#[command(about = "Federated code graph - per-package seeds, a central hub and graph queries")]
#[command(long_about = r#"
devac stores the code graph of every package next to its source (.devac/seed),
federates registered repositories through a central hub, and answers
recursive graph queries across all of them.

Example usage:
  devac init
  devac hub register ../api ../web
  devac dependents "devac://api/./src/auth.ts#login" --depth 3
  devac query "SELECT kind, count(*) AS n FROM {nodes} GROUP BY kind"
  devac serve --http
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    /// Workspace root holding .devac/central.db
    #[arg(short, long, global = true, default_value = ".")]
    workspace: PathBuf,

    /// Config file (defaults to <workspace>/devac.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Which packages a query reads
#[derive(Args, Clone)]
struct ScopeArgs {
    /// Package root to query (repeatable; defaults to every package under the workspace)
    #[arg(short, long = "package")]
    packages: Vec<PathBuf>,

    /// Branch overlay to read on top of the base seed
    #[arg(short, long)]
    branch: Option<String>,
}

#[derive(Args, Clone)]
struct TraversalArgs {
    /// Entity id or devac:// URI
    entity: String,

    /// Only follow edges of this type (CALLS, IMPORTS, EXTENDS, ...)
    #[arg(short, long)]
    edge_type: Option<String>,

    /// Maximum traversal depth
    #[arg(short, long, default_value = "1")]
    depth: usize,

    /// Maximum number of results
    #[arg(short, long, default_value = "100")]
    limit: usize,

    /// count, summary or full
    #[arg(long, default_value = "summary")]
    detail: String,

    #[command(flatten)]
    scope: ScopeArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the hub and a default config in the workspace
    Init {
        /// Overwrite an existing devac.toml
        #[arg(short, long)]
        force: bool,
    },

    /// Manage the central hub
    Hub {
        #[command(subcommand)]
        command: HubCommands,
    },

    /// What an entity depends on
    Deps(TraversalArgs),

    /// What depends on an entity
    Dependents(TraversalArgs),

    /// Callers and callees of an entity
    Calls {
        entity: String,

        /// callers, callees or both
        #[arg(long, default_value = "both")]
        direction: String,

        #[arg(short, long, default_value = "1")]
        depth: usize,

        #[arg(short, long, default_value = "100")]
        limit: usize,

        #[arg(long, default_value = "summary")]
        detail: String,

        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// File-level imports
    Imports {
        /// File path relative to its package
        file: String,

        /// outgoing or incoming
        #[arg(long, default_value = "outgoing")]
        direction: String,

        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Read-only SQL over {nodes}, {edges}, {external_refs} and {effects}
    Query {
        sql: String,

        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// List query commands, or run one with key=value arguments
    Commands {
        name: Option<String>,

        /// key=value arguments
        args: Vec<String>,

        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Inspect or clear locks
    Lock {
        #[command(subcommand)]
        command: LockCommands,
    },

    /// Run the hub server (single hub writer) until interrupted
    Serve {
        /// Also serve the HTTP query API
        #[arg(long)]
        http: bool,

        /// HTTP port (defaults to [server] http_port)
        #[arg(long)]
        http_port: Option<u16>,

        /// Refresh repos when their seeds change
        #[arg(long)]
        watch: bool,
    },
}

#[derive(Subcommand)]
enum HubCommands {
    /// Register repositories (idempotent)
    Register { paths: Vec<PathBuf> },

    /// Mark a repository unregistered
    Unregister { repo_id: String },

    /// Refresh one repository, or all of them
    Refresh { repo_id: Option<String> },

    /// List registered repositories
    List {
        /// Include unregistered repositories
        #[arg(short, long)]
        all: bool,
    },

    /// Hub statistics and the route calls take
    Status,

    /// Query pushed diagnostics
    Diagnostics {
        #[arg(short, long)]
        repo: Option<String>,

        /// tsc, eslint, test, coverage, ci, github_issue, pr_review, other
        #[arg(short, long)]
        source: Option<String>,

        /// Only unresolved diagnostics
        #[arg(short, long)]
        unresolved: bool,

        /// Counts instead of rows
        #[arg(long)]
        summary: bool,

        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum LockCommands {
    /// Show who holds the lock of a target
    Status {
        /// Locked path (a seed branch directory, or .devac/hub)
        target: PathBuf,
    },

    /// Remove a lock regardless of holder
    ForceRelease { target: PathBuf },
}

struct Session {
    workspace: PathBuf,
    config: DevacConfig,
    json: bool,
}

impl Session {
    fn router(&self) -> HubRouter {
        HubRouter::new(&self.workspace).with_options(self.config.router_options())
    }

    fn context(&self, scope: ScopeArgs) -> CommandContext {
        let packages = if scope.packages.is_empty() {
            discover_packages(&self.workspace)
        } else {
            scope.packages
        };
        let branch = scope.branch.unwrap_or_else(|| self.config.seed.default_branch.clone());
        CommandContext::new(QueryScope::new(packages).with_branch(branch))
    }

    fn print_json(&self, value: &impl serde::Serialize) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(|| cli.workspace.join(config::CONFIG_FILE));
    let session = Session {
        config: config::load_config(Some(&config_path))?.unwrap_or_default(),
        workspace: cli.workspace,
        json: cli.json,
    };

    match cli.command {
        Commands::Init { force } => {
            let db = hub::init(&session.workspace)?;
            if force || !config_path.exists() {
                config::write_config(&config_path, &session.config, force)?;
            }
            config::ensure_gitignore(&session.workspace)?;
            if session.json {
                session.print_json(&serde_json::json!({ "hub": db, "config": config_path }))?;
            } else {
                ui::success("Workspace initialized");
                ui::status(Icons::DATABASE, "Hub", &db.display().to_string());
                ui::status(Icons::INFO, "Config", &config_path.display().to_string());
            }
        }

        Commands::Hub { command } => run_hub(&session, command).await?,

        Commands::Deps(args) => run_traversal(&session, "deps", args).await?,

        Commands::Dependents(args) => run_traversal(&session, "dependents", args).await?,

        Commands::Calls { entity, direction, depth, limit, detail, scope } => {
            let mut params = Map::new();
            params.insert("entity".into(), Value::String(entity.clone()));
            params.insert("direction".into(), Value::String(direction));
            params.insert("depth".into(), depth.into());
            params.insert("limit".into(), limit.into());
            params.insert("detail".into(), Value::String(detail));

            let value = execute(session.context(scope), "calls", params).await?;
            if session.json {
                session.print_json(&value)?;
            } else {
                for side in ["callers", "callees"] {
                    if let Some(output) = value.get(side) {
                        ui::section(&format!(" {} of {} ", side, entity));
                        print_hit_lines(output)?;
                    }
                }
            }
        }

        Commands::Imports { file, direction, scope } => {
            let mut params = Map::new();
            params.insert("file".into(), Value::String(file.clone()));
            params.insert("direction".into(), Value::String(direction));

            let value = execute(session.context(scope), "imports", params).await?;
            if session.json {
                session.print_json(&value)?;
            } else {
                let imports = value["imports"].as_array().cloned().unwrap_or_default();
                if imports.is_empty() {
                    ui::empty("No imports found.");
                }
                for import in imports {
                    let target = import["target_file"]
                        .as_str()
                        .or_else(|| import["module_specifier"].as_str())
                        .unwrap_or("?");
                    let symbol = import["imported_symbol"].as_str().unwrap_or("*");
                    let marker = if import["is_resolved"].as_bool() == Some(true) { Icons::LINK } else { Icons::WARN };
                    println!(
                        "{} {} {} {}",
                        marker,
                        import["source_file"].as_str().unwrap_or(&file),
                        ui::dim("->"),
                        format_args!("{} ({})", target, symbol)
                    );
                }
            }
        }

        Commands::Query { sql, scope } => {
            let mut params = Map::new();
            params.insert("sql".into(), Value::String(sql));
            let value = execute(session.context(scope), "query", params).await?;
            if session.json {
                session.print_json(&value)?;
            } else {
                let rows: Vec<QueryRow> = serde_json::from_value(value["rows"].clone())?;
                if rows.is_empty() {
                    ui::empty("No rows.");
                } else {
                    println!("{}", ui::rows_table(&rows));
                    ui::summary_row("Rows:", &rows.len().to_string());
                }
            }
        }

        Commands::Commands { name: None, .. } => {
            if session.json {
                session.print_json(&COMMANDS)?;
            } else {
                for command in COMMANDS {
                    println!("{} {}", Icons::SEARCH, command.name);
                    ui::summary_row("", command.description);
                    for param in command.params {
                        let default = param.default.map(|d| format!(" [default: {}]", d)).unwrap_or_default();
                        let required = if param.required { " (required)" } else { "" };
                        ui::summary_row(
                            &format!("  --{}", param.name),
                            &format!("{}{}{}", param.description, required, default),
                        );
                    }
                }
            }
        }

        Commands::Commands { name: Some(name), args, scope } => {
            let params = parse_key_values(&args)?;
            let value = execute(session.context(scope), &name, params).await?;
            session.print_json(&value)?;
        }

        Commands::Lock { command } => run_lock(&session, command)?,

        Commands::Serve { http, http_port, watch } => {
            hub::init(&session.workspace)?;
            let server = HubServer::start(&session.workspace, session.config.hub_server_options()).await?;
            ui::header("Hub server running");
            ui::status(Icons::HUB, "IPC", &server.local_addr().to_string());
            ui::status(Icons::INFO, "PID", &server.marker().pid.to_string());

            let mut tasks = tokio::task::JoinSet::new();
            if http {
                let port = http_port.unwrap_or(session.config.server.http_port);
                let state = AppState::new(session.context(ScopeArgs { packages: Vec::new(), branch: None }), session.router());
                tasks.spawn(async move { server::start_server(port, state).await });
            }
            if watch {
                let watcher = SeedWatcher::from_hub(session.router()).await?;
                tasks.spawn(async move {
                    watcher
                        .run_until(async {
                            let _ = tokio::signal::ctrl_c().await;
                        })
                        .await
                });
            }

            server
                .run_until(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await?;
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Err(e)) => ui::error(&e.to_string()),
                    Err(e) => ui::error(&format!("background task failed: {}", e)),
                    Ok(Ok(())) => {}
                }
            }
            ui::success("Hub server stopped");
        }
    }

    Ok(())
}

async fn run_hub(session: &Session, command: HubCommands) -> anyhow::Result<()> {
    let router = session.router();
    match command {
        HubCommands::Register { paths } => {
            let mut results = Vec::new();
            for path in &paths {
                let result = router.register_repo(path).await?;
                if !session.json {
                    if result.skipped {
                        println!("{} {} unchanged", Icons::SKIPPED, result.repo_id);
                    } else {
                        ui::success(&format!("Registered {}", result.repo_id));
                    }
                    ui::summary_row("Packages:", &result.packages.join(", "));
                    ui::summary_row("Cross-repo edges:", &result.cross_repo_edges.to_string());
                }
                results.push(result);
            }
            if session.json {
                session.print_json(&results)?;
            }
        }

        HubCommands::Unregister { repo_id } => {
            router.unregister_repo(&repo_id).await?;
            if session.json {
                session.print_json(&serde_json::json!({ "repo_id": repo_id, "status": "unregistered" }))?;
            } else {
                ui::success(&format!("Unregistered {}", repo_id));
            }
        }

        HubCommands::Refresh { repo_id: Some(repo_id) } => {
            let result = router.refresh_repo(&repo_id).await?;
            if session.json {
                session.print_json(&result)?;
            } else {
                ui::refresh_outcome(&result.repo_id, result.outcome);
            }
        }

        HubCommands::Refresh { repo_id: None } => {
            let all = router.refresh_all().await?;
            if session.json {
                session.print_json(&all)?;
            } else {
                for result in &all.results {
                    ui::refresh_outcome(&result.repo_id, result.outcome);
                }
                for failure in &all.errors {
                    ui::error(&format!("{}: {}", failure.repo_id, failure.message));
                }
                ui::summary_row(
                    "Refreshed:",
                    &format!(
                        "{} ({} unchanged, {} stale, {} failed)",
                        all.count(RefreshOutcome::Refreshed),
                        all.count(RefreshOutcome::Skipped),
                        all.count(RefreshOutcome::Stale),
                        all.errors.len()
                    ),
                );
            }
        }

        HubCommands::List { all } => {
            let repos = router.list_repos(all).await?;
            if session.json {
                session.print_json(&repos)?;
            } else if repos.is_empty() {
                ui::empty("No repositories registered.");
            } else {
                println!("{}", ui::repos_table(&repos));
            }
        }

        HubCommands::Status => {
            let route = router.route()?;
            let status = router.status().await?;
            if session.json {
                session.print_json(&serde_json::json!({ "route": route, "status": status }))?;
            } else {
                ui::header("Hub status");
                let route = match route {
                    hub::Route::Server { pid, port } => format!("server (pid {}, port {})", pid, port),
                    hub::Route::Direct => "direct".to_string(),
                };
                println!(
                    "{}",
                    ui::stats_table(&[
                        ("Hub", &status.path.display().to_string()),
                        ("Route", &route),
                        ("Schema version", &status.schema_version.to_string()),
                        ("Active repos", &status.repos_active.to_string()),
                        ("Stale repos", &status.repos_stale.to_string()),
                        ("Unregistered repos", &status.repos_unregistered.to_string()),
                        ("Packages", &status.packages.to_string()),
                        (
                            "Diagnostics",
                            &format!("{} open / {} total", status.open_diagnostics, status.total_diagnostics),
                        ),
                    ])
                );
            }
        }

        HubCommands::Diagnostics { repo, source, unresolved, summary, limit } => {
            if summary {
                let summary = router.diagnostics_summary(repo.as_deref()).await?;
                if session.json {
                    session.print_json(&summary)?;
                } else {
                    ui::header("Diagnostics");
                    ui::summary_row("Total:", &summary.total.to_string());
                    ui::summary_row("Unresolved:", &summary.unresolved.to_string());
                    for (label, counts) in [
                        ("By source", &summary.by_source),
                        ("By severity", &summary.by_severity),
                        ("By category", &summary.by_category),
                    ] {
                        ui::section(&format!(" {} ", label));
                        for (key, count) in counts {
                            ui::summary_row(key, &count.to_string());
                        }
                    }
                }
                return Ok(());
            }

            let mut filter = DiagnosticsFilter {
                repo_id: repo,
                limit: Some(limit),
                ..DiagnosticsFilter::default()
            };
            if let Some(source) = source {
                filter = filter.with_source(source.parse::<DiagnosticSource>()?);
            }
            if unresolved {
                filter = filter.unresolved();
            }

            let diagnostics = router.query_diagnostics(filter).await?;
            if session.json {
                session.print_json(&diagnostics)?;
            } else if diagnostics.is_empty() {
                ui::empty("No diagnostics.");
            } else {
                for d in diagnostics {
                    let location = match (&d.file_path, d.line_number) {
                        (Some(file), Some(line)) => format!("{}:{}", file, line),
                        (Some(file), None) => file.clone(),
                        _ => String::new(),
                    };
                    let icon = if d.resolved { Icons::CHECK } else { Icons::WARN };
                    println!("{} [{}/{}] {} {}", icon, d.source, d.severity, d.title, ui::muted(&location));
                    ui::summary_row(&d.repo_id, &d.description);
                }
            }
        }
    }
    Ok(())
}

fn run_lock(session: &Session, command: LockCommands) -> anyhow::Result<()> {
    match command {
        LockCommands::Status { target } => {
            let stale_after = Duration::from_millis(session.config.lock.stale_after_ms);
            let status = LockManager::inspect(&target, stale_after)?;
            if session.json {
                session.print_json(&status)?;
                return Ok(());
            }
            match status {
                LockStatus::Free => println!("{} {} is free", Icons::UNLOCK, target.display()),
                LockStatus::Held { info } => {
                    println!("{} {} is held", Icons::LOCK, target.display());
                    print_lock_info(&info);
                }
                LockStatus::Stale { info, holder_alive } => {
                    ui::warn(&format!(
                        "{} is stale (holder {})",
                        target.display(),
                        if holder_alive { "alive but old" } else { "dead" }
                    ));
                    print_lock_info(&info);
                }
            }
        }

        LockCommands::ForceRelease { target } => {
            let removed = LockManager::force_release(&target)?;
            if session.json {
                session.print_json(&removed)?;
            } else if let Some(info) = removed {
                ui::success(&format!("Removed lock on {}", target.display()));
                print_lock_info(&info);
            } else {
                ui::empty("No lock to remove.");
            }
        }
    }
    Ok(())
}

fn print_lock_info(info: &devac::lock::LockInfo) {
    ui::summary_row("PID:", &info.pid.to_string());
    ui::summary_row("Holder:", &info.holder);
    ui::summary_row("Acquired:", &info.acquired_at.to_rfc3339());
}

async fn run_traversal(session: &Session, name: &str, args: TraversalArgs) -> anyhow::Result<()> {
    let mut params = Map::new();
    params.insert("entity".into(), Value::String(args.entity.clone()));
    if let Some(edge_type) = args.edge_type {
        params.insert("edge_type".into(), Value::String(edge_type));
    }
    params.insert("depth".into(), args.depth.into());
    params.insert("limit".into(), args.limit.into());
    params.insert("detail".into(), Value::String(args.detail));

    let value = execute(session.context(args.scope), name, params).await?;
    if session.json {
        return session.print_json(&value);
    }
    ui::section(&format!(" {} of {} ", name, args.entity));
    print_output(&value)
}

/// Render a serialized `QueryOutput`
fn print_output(output: &Value) -> anyhow::Result<()> {
    match output["detail"].as_str() {
        Some("count") => ui::summary_row("Count:", &output["count"].to_string()),
        Some("full") => println!("{}", serde_json::to_string_pretty(&output["results"])?),
        _ => {
            let hits = summaries(output);
            if hits.is_empty() {
                ui::empty("No results.");
            } else {
                println!("{}", ui::hits_table(&hits));
            }
        }
    }
    Ok(())
}

/// Like [`print_output`], one line per summarized hit
fn print_hit_lines(output: &Value) -> anyhow::Result<()> {
    if output["detail"].as_str() != Some("summary") {
        return print_output(output);
    }
    let hits = summaries(output);
    if hits.is_empty() {
        ui::empty("No results.");
    }
    for hit in &hits {
        ui::hit(hit);
    }
    Ok(())
}

fn summaries(output: &Value) -> Vec<HitSummary> {
    output["results"]
        .as_array()
        .map(|results| results.iter().filter_map(summary_from_value).collect())
        .unwrap_or_default()
}

fn summary_from_value(value: &Value) -> Option<HitSummary> {
    Some(HitSummary {
        entity_id: value["entity_id"].as_str()?.to_string(),
        uri: value["uri"].as_str().map(str::to_string),
        name: value["name"].as_str()?.to_string(),
        kind: serde_json::from_value(value["kind"].clone()).ok()?,
        file_path: value["file_path"].as_str()?.to_string(),
        depth: value["depth"].as_u64()? as usize,
        impact_level: serde_json::from_value(value["impact_level"].clone()).ok()?,
    })
}

/// Command executors read SQLite files; keep them off the runtime threads
async fn execute(ctx: CommandContext, name: &str, params: Map<String, Value>) -> anyhow::Result<Value> {
    let name = name.to_string();
    let value = tokio::task::spawn_blocking(move || commands::execute(&name, &ctx, params)).await??;
    Ok(value)
}

fn parse_key_values(args: &[String]) -> anyhow::Result<Map<String, Value>> {
    let mut params = Map::new();
    for arg in args {
        let Some((key, value)) = arg.split_once('=') else {
            anyhow::bail!("expected key=value, got '{}'", arg);
        };
        params.insert(key.trim_start_matches("--").to_string(), Value::String(value.to_string()));
    }
    Ok(params)
}
