//! ghostfs: administrative CLI over the scoped file service.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use ghostfs::utils::{format_bytes, format_duration};
use ghostfs::{GhostConfig, GhostService, ReplaceContent, ScopedFileService};

#[derive(Parser, Debug)]
#[command(name = "ghostfs")]
#[command(about = "Inspect, export and import scoped bot data")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Use the database driver regardless of configuration
    #[arg(long, global = true)]
    db: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List files of a scope
    Ls {
        /// global, root, bots, bot:<id> or custom:<dir>
        scope: String,
        /// Folder inside the scope
        #[arg(default_value = "/")]
        folder: String,
        /// Glob matched against file names (case-insensitive)
        #[arg(short, long, default_value = "*.*")]
        pattern: String,
        /// Glob patterns of relative paths to skip
        #[arg(short, long)]
        exclude: Vec<String>,
        /// Include dot files
        #[arg(short, long)]
        all: bool,
    },
    /// Print a file to stdout
    Cat {
        scope: String,
        /// Path inside the scope
        path: String,
    },
    /// Export a scope to a directory or a .tgz archive
    Export {
        scope: String,
        /// Target directory (or archive file with --archive)
        target: PathBuf,
        #[arg(short, long)]
        exclude: Vec<String>,
        /// Write a gzip tarball instead of a directory
        #[arg(long)]
        archive: bool,
        /// Rewrite text in exported JSON files (FROM=TO, archive only)
        #[arg(long, value_name = "FROM=TO", requires = "archive")]
        replace: Option<String>,
    },
    /// Import every file of a directory into a scope (lock ignored)
    Import { scope: String, source: PathBuf },
    /// Show revisions not yet promoted
    Pending { scope: String },
    /// Mirror database files of a folder onto disk
    Sync {
        scope: String,
        #[arg(default_value = "/")]
        folder: String,
    },
}

fn init_logging(json: bool) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    // File contents go to stdout, so logs go to stderr
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

fn load_config(path: Option<&PathBuf>, force_db: bool) -> Result<GhostConfig> {
    let mut config = match path {
        Some(path) => GhostConfig::load_from(path)?,
        None => GhostConfig::default(),
    }
    .apply_env()?;

    if force_db {
        config.use_db_driver = true;
    }

    let validation = config.validate()?;
    for warning in &validation.warnings {
        tracing::warn!("{warning}");
    }
    Ok(config)
}

fn resolve_scope(ghost: &GhostService, scope: &str) -> Result<Arc<ScopedFileService>> {
    let resolved = match scope {
        "global" => ghost.global(),
        "root" => ghost.root(None),
        "bots" => ghost.bots(),
        other => {
            if let Some(bot_id) = other.strip_prefix("bot:") {
                ghost.for_bot(bot_id)?
            } else if let Some(dir) = other.strip_prefix("custom:") {
                ghost.custom(dir)?
            } else {
                anyhow::bail!(
                    "Unknown scope '{other}' (expected global, root, bots, bot:<id> or custom:<dir>)"
                );
            }
        },
    };
    Ok(resolved)
}

fn parse_replace(pair: &str) -> Result<ReplaceContent> {
    let (from, to) = pair
        .split_once('=')
        .with_context(|| format!("Invalid --replace '{pair}', expected FROM=TO"))?;
    Ok(ReplaceContent {
        from: vec![from.to_string()],
        to: to.to_string(),
    })
}

async fn run(ghost: &GhostService, command: Command) -> Result<()> {
    match command {
        Command::Ls {
            scope,
            folder,
            pattern,
            exclude,
            all,
        } => {
            let scope = resolve_scope(ghost, &scope)?;
            for file in scope
                .directory_listing(&folder, &pattern, &exclude, all)
                .await?
            {
                println!("{file}");
            }
        },
        Command::Cat { scope, path } => {
            let scope = resolve_scope(ghost, &scope)?;
            let (folder, name) = path.rsplit_once('/').unwrap_or(("/", path.as_str()));
            let content = scope
                .read_file_as_buffer(folder, name)
                .await
                .with_context(|| format!("Failed to read {path}"))?;
            std::io::stdout().write_all(&content)?;
        },
        Command::Export {
            scope,
            target,
            exclude,
            archive,
            replace,
        } => {
            let scope = resolve_scope(ghost, &scope)?;
            if archive {
                let replace = replace.as_deref().map(parse_replace).transpose()?;
                let bytes = scope
                    .export_to_archive_buffer(&exclude, replace.as_ref())
                    .await?;
                tokio::fs::write(&target, &bytes)
                    .await
                    .with_context(|| format!("Failed to write {}", target.display()))?;
                println!(
                    "Wrote {} ({})",
                    target.display(),
                    format_bytes(bytes.len() as u64)
                );
            } else {
                let files = scope.export_to_directory(&target, &exclude).await?;
                println!("Exported {} files to {}", files.len(), target.display());
            }
        },
        Command::Import { scope, source } => {
            let scope = resolve_scope(ghost, &scope)?;
            let source = source
                .canonicalize()
                .with_context(|| format!("Source not found: {}", source.display()))?;
            scope.import_from_directory(&source).await?;
            println!("Imported {}", source.display());
        },
        Command::Pending { scope } => {
            let scope = resolve_scope(ghost, &scope)?;
            let pending = scope.get_pending_changes().await?;
            if pending.is_empty() {
                println!("Fully synced");
            }
            let now = chrono::Utc::now();
            for (folder, revisions) in pending {
                println!("{folder}/ ({} revisions)", revisions.len());
                for revision in revisions {
                    println!(
                        "  {}  {} ago by {}",
                        revision.path,
                        format_duration(now - revision.created_on),
                        revision.created_by
                    );
                }
            }
        },
        Command::Sync { scope, folder } => {
            let scope = resolve_scope(ghost, &scope)?;
            if !scope.uses_database() {
                anyhow::bail!("Scope is disk-backed, nothing to sync (use --db)");
            }
            scope.sync_database_files_to_disk(&folder).await?;
            println!("Synced {folder}");
        },
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json);

    let config = load_config(cli.config.as_ref(), cli.db)?;
    let ghost = GhostService::open(&config).context("Failed to open file service")?;
    ghost.initialize(config.use_db_driver, true);

    let result = run(&ghost, cli.command).await;
    ghost.shutdown();
    result
}
