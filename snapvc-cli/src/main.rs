//! snapvc command line
//!
//! Every command loads the repository from `--repo`, runs one operation,
//! prints the result as JSON on stdout and saves the state. Logs go to
//! stderr.

mod daemon;
mod input;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use snapvc_core::{
    BackupType, CommitRequest, CreateBackupRequest, CreateBranchRequest, FileStore, HookManager,
    MergeBranchesRequest, RepositoryConfig, ResolveMergeRequest, RestoreRequest, RevertRequest,
    VersionControl, VersionId,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "snapvc")]
#[command(author = "snapvc Contributors")]
#[command(version)]
#[command(about = "Version control for structured content snapshots")]
struct Cli {
    /// Repository directory
    #[arg(long, global = true, default_value = "./snapvc-repo")]
    repo: PathBuf,

    /// Acting user; defaults to $USER
    #[arg(long, global = true)]
    author: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize a new repository
    Init,

    /// Commit a JSON document as a new version
    Commit {
        content_id: String,
        /// JSON file, or "-" for stdin
        #[arg(short, long)]
        file: String,
        #[arg(short, long)]
        message: String,
        #[arg(short, long)]
        branch: Option<String>,
        /// Fail if the branch head moved past this version
        #[arg(long)]
        expected_head: Option<VersionId>,
    },

    /// Manage branches
    Branch {
        #[command(subcommand)]
        action: BranchCommand,
    },

    /// Show version history of a branch, newest first
    Log {
        content_id: String,
        /// Defaults to the primary branch
        #[arg(short, long)]
        branch: Option<String>,
        #[arg(short, long)]
        limit: Option<usize>,
        /// Continue after this version
        #[arg(long)]
        after: Option<VersionId>,
    },

    /// Show one version
    Show {
        content_id: String,
        version_id: VersionId,
    },

    /// Structural diff between two versions
    Diff {
        content_id: String,
        base: VersionId,
        compare: VersionId,
    },

    /// Merge one branch into another
    Merge {
        content_id: String,
        source: String,
        target: String,
        #[arg(short, long, default_value = "")]
        message: String,
    },

    /// List merge requests
    Merges { content_id: String },

    /// Resolve a conflicted merge
    Resolve {
        content_id: String,
        merge_id: Uuid,
        /// JSON object mapping each conflict path to its value, or "-" for stdin
        #[arg(short, long)]
        file: String,
    },

    /// Reject a conflicted merge
    Reject { content_id: String, merge_id: Uuid },

    /// Commit an earlier version's data as the new head
    Revert {
        content_id: String,
        version_id: VersionId,
        #[arg(short, long)]
        branch: Option<String>,
    },

    /// Manage backups
    Backup {
        #[command(subcommand)]
        action: BackupCommand,
    },

    /// Run scheduled backups in the foreground until Ctrl-C
    BackupDaemon {
        /// Defaults to scheduled_backup_interval_secs from config.json
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

#[derive(Subcommand, Debug)]
enum BranchCommand {
    /// Create a branch
    Create {
        content_id: String,
        name: String,
        /// Defaults to the primary branch head
        #[arg(long)]
        from: Option<VersionId>,
        #[arg(short = 'D', long, default_value = "")]
        description: String,
    },
    /// List branches
    List { content_id: String },
    /// Delete a branch; its versions remain
    Delete { content_id: String, name: String },
}

#[derive(Subcommand, Debug)]
enum BackupCommand {
    /// Capture the current heads
    Create { content_id: String },
    /// List unexpired backups
    List { content_id: String },
    /// Restore a backup as a new version
    Restore {
        content_id: String,
        backup_id: Uuid,
        #[arg(short, long)]
        branch: Option<String>,
    },
}

fn init_tracing(debug: bool) {
    let env_filter = if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn default_author() -> String {
    std::env::var("USER").unwrap_or_else(|_| "anonymous".to_string())
}

async fn open_repository(path: &Path) -> Result<VersionControl> {
    if !path.join("metadata.json").exists() {
        bail!("No repository at {:?}; run `snapvc init` first", path);
    }
    let config = RepositoryConfig::load(path)?;
    let store = FileStore::open(path)?;
    let repo = VersionControl::builder(config)
        .hooks(HookManager::new(path.to_path_buf()))
        .persistence(Arc::new(store))
        .load()
        .await?;
    Ok(repo)
}

fn init_repository(path: &Path) -> Result<()> {
    let store = FileStore::open(path)?;
    if !path.join("config.json").exists() {
        RepositoryConfig::default().save(path)?;
    }
    HookManager::new(path.to_path_buf()).ensure_hooks_dir()?;
    tracing::info!(path = ?path, uuid = %store.metadata().uuid, "Repository initialized");
    print_json(store.metadata())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let author = cli.author.unwrap_or_else(default_author);

    if let Commands::Init = cli.command {
        return init_repository(&cli.repo);
    }

    let repo = open_repository(&cli.repo).await?;

    match cli.command {
        // Handled before loading
        Commands::Init => {}

        Commands::Commit {
            content_id,
            file,
            message,
            branch,
            expected_head,
        } => {
            let request = CommitRequest {
                data: input::read_document(&file)?,
                message,
                branch,
                expected_head,
            };
            let version = repo.commit_changes(&content_id, request, &author).await?;
            repo.persist().await?;
            print_json(&version)?;
        }

        Commands::Branch { action } => match action {
            BranchCommand::Create {
                content_id,
                name,
                from,
                description,
            } => {
                let request = CreateBranchRequest {
                    branch_name: name,
                    from_version: from,
                    description,
                };
                let branch = repo.create_branch(&content_id, request, &author).await?;
                repo.persist().await?;
                print_json(&branch)?;
            }
            BranchCommand::List { content_id } => {
                print_json(&repo.get_branches(&content_id).await?)?;
            }
            BranchCommand::Delete { content_id, name } => {
                let branch = repo.delete_branch(&content_id, &name).await?;
                repo.persist().await?;
                print_json(&branch)?;
            }
        },

        Commands::Log {
            content_id,
            branch,
            limit,
            after,
        } => {
            let branch = match branch {
                Some(branch) => branch,
                None => repo.primary_branch(&content_id).await?,
            };
            match limit {
                Some(limit) => {
                    let page = repo
                        .get_version_history_page(&content_id, &branch, after, limit)
                        .await?;
                    print_json(&page)?;
                }
                None if after.is_some() => {
                    bail!("--after needs --limit");
                }
                None => {
                    print_json(&repo.get_version_history(&content_id, &branch).await?)?;
                }
            }
        }

        Commands::Show {
            content_id,
            version_id,
        } => {
            print_json(&repo.get_version(&content_id, &version_id).await?)?;
        }

        Commands::Diff {
            content_id,
            base,
            compare,
        } => {
            print_json(&repo.get_version_diff(&content_id, &base, &compare).await?)?;
        }

        Commands::Merge {
            content_id,
            source,
            target,
            message,
        } => {
            let request = MergeBranchesRequest {
                source_branch: source,
                target_branch: target,
                message,
            };
            let merge = repo.merge_branches(&content_id, request, &author).await?;
            repo.persist().await?;
            print_json(&merge)?;
        }

        Commands::Merges { content_id } => {
            print_json(&repo.get_merge_requests(&content_id).await?)?;
        }

        Commands::Resolve {
            content_id,
            merge_id,
            file,
        } => {
            let request = ResolveMergeRequest {
                merge_id,
                resolutions: input::read_resolutions(&file)?,
            };
            let merge = repo.resolve_merge(&content_id, request, &author).await?;
            repo.persist().await?;
            print_json(&merge)?;
        }

        Commands::Reject {
            content_id,
            merge_id,
        } => {
            let merge = repo.reject_merge(&content_id, merge_id).await?;
            repo.persist().await?;
            print_json(&merge)?;
        }

        Commands::Revert {
            content_id,
            version_id,
            branch,
        } => {
            let request = RevertRequest { version_id, branch };
            let version = repo.revert_to_version(&content_id, request, &author).await?;
            repo.persist().await?;
            print_json(&version)?;
        }

        Commands::Backup { action } => match action {
            BackupCommand::Create { content_id } => {
                let request = CreateBackupRequest {
                    backup_type: BackupType::Manual,
                };
                let record = repo.create_backup(&content_id, request).await?;
                repo.persist().await?;
                print_json(&record)?;
            }
            BackupCommand::List { content_id } => {
                print_json(&repo.get_backups(&content_id).await?)?;
            }
            BackupCommand::Restore {
                content_id,
                backup_id,
                branch,
            } => {
                let request = RestoreRequest { backup_id, branch };
                let version = repo
                    .restore_from_backup(&content_id, request, &author)
                    .await?;
                repo.persist().await?;
                print_json(&version)?;
            }
        },

        Commands::BackupDaemon { interval_secs } => {
            let secs = interval_secs.unwrap_or(repo.config().scheduled_backup_interval_secs);
            if secs == 0 {
                bail!("Backup interval must be positive");
            }
            daemon::run(Arc::new(repo), Duration::from_secs(secs)).await?;
        }
    }

    Ok(())
}
