use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use projvault::archive::ZipCodec;
use projvault::backup::{BackupEngine, Retention};
use projvault::config::ConfigManager;
use projvault::diff::{ChangeStatus, DiffEngine, LineKind};
use projvault::fs::OsFilesystem;
use projvault::logger;
use projvault::recover::{RecoverOptions, RecoveryEngine};
use projvault::vcs::GitCli;

#[derive(Parser)]
#[command(name = "projvault")]
#[command(about = "Incremental, checksum-verified backups for local source projects", long_about = None)]
#[command(version)]
struct Cli {
    /// Source root containing project directories
    #[arg(long, global = true)]
    source: Option<PathBuf>,

    /// Directory holding archives and manifests
    #[arg(long, global = true)]
    backup_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up every project under the source root, or a single one
    Run {
        /// Project to back up (default: all)
        project: Option<String>,

        /// Base names or globs to exclude (repeatable)
        #[arg(long = "exclude")]
        exclude: Vec<String>,

        /// Keep only the N most recent versions per project (0 keeps all)
        #[arg(long, default_value_t = 0)]
        keep_last: usize,
    },

    /// List recorded backup versions for a project
    List {
        project: String,
    },

    /// Verify an archive's checksum against its manifest record
    Verify {
        project: String,

        /// Version to verify (default: latest)
        #[arg(long)]
        version: Option<String>,
    },

    /// Restore a project from a recorded backup
    Recover {
        project: String,

        /// Version to recover (default: latest)
        #[arg(long)]
        version: Option<String>,

        /// Delete an existing project directory before extraction
        #[arg(long, conflicts_with = "archive")]
        wipe: bool,

        /// Rename an existing project directory aside before extraction
        #[arg(long)]
        archive: bool,
    },

    /// Compare two backup versions of a project
    Diff {
        project: String,
        version_a: String,
        version_b: String,

        /// Show a line-level diff for one file instead of the file summary
        #[arg(long)]
        file: Option<String>,
    },
}

fn main() -> Result<()> {
    logger::init_logger()?;

    let cli = Cli::parse();
    let source = match cli.source {
        Some(source) => source,
        None => std::env::current_dir().context("Failed to resolve current directory")?,
    };
    let backup_dir = match cli.backup_dir {
        Some(dir) => dir,
        None => ConfigManager::default_backup_root()?,
    };

    let fs = OsFilesystem;
    let vcs = GitCli;
    let codec = ZipCodec;

    match cli.command {
        Commands::Run {
            project,
            exclude,
            keep_last,
        } => {
            let engine = BackupEngine::new(&fs, &vcs, &codec);
            let retention = Retention { keep_last };

            let results = match project {
                Some(project) => {
                    let outcome = engine.backup_project(
                        &project, &source, &backup_dir, &exclude, retention,
                    );
                    vec![projvault::backup::ProjectResult {
                        project,
                        outcome,
                    }]
                }
                None => engine.run_backup(&source, &backup_dir, &exclude, retention)?,
            };

            let mut failures = 0;
            for result in &results {
                match &result.outcome {
                    Ok(outcome) if outcome.skipped => {
                        println!(
                            "  {} {} ({})",
                            "skipped".dimmed(),
                            result.project,
                            outcome.reason
                        );
                    }
                    Ok(outcome) => {
                        let entry = outcome.entry.as_ref().expect("present when not skipped");
                        println!(
                            "  {} {} -> {} ({} files)",
                            "backed up".green(),
                            result.project.bold(),
                            entry.file,
                            entry.file_count
                        );
                        for pruned in &outcome.pruned {
                            println!("    {} {pruned}", "pruned".yellow());
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        println!("  {} {}: {e:#}", "failed".red(), result.project);
                    }
                }
            }
            if failures > 0 {
                anyhow::bail!("{failures} project(s) failed to back up");
            }
        }

        Commands::List { project } => {
            let engine = RecoveryEngine::new(&fs, &codec);
            let versions = engine.list_versions(&project, &backup_dir)?;
            if versions.is_empty() {
                println!("No backups recorded for {project}");
            }
            for entry in versions {
                println!(
                    "  {}  {}  {} files  {} bytes  {}",
                    entry.file.bold(),
                    entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.file_count,
                    entry.size_bytes,
                    entry
                        .git_head
                        .as_deref()
                        .map(projvault::vcs::short_rev)
                        .unwrap_or("-")
                        .dimmed()
                );
            }
        }

        Commands::Verify { project, version } => {
            let engine = RecoveryEngine::new(&fs, &codec);
            engine.verify(&project, &backup_dir, version.as_deref())?;
            println!("{} {project}", "verified".green());
        }

        Commands::Recover {
            project,
            version,
            wipe,
            archive,
        } => {
            let engine = RecoveryEngine::new(&fs, &codec);
            let options = RecoverOptions {
                version,
                wipe,
                archive,
            };
            engine.recover(&project, &source, &backup_dir, &options)?;
            println!("{} {project}", "recovered".green());
        }

        Commands::Diff {
            project,
            version_a,
            version_b,
            file,
        } => {
            let engine = DiffEngine::new(&codec);
            match file {
                None => {
                    let diff =
                        engine.compute_diff(&project, &backup_dir, &version_a, &version_b)?;
                    for change in &diff.changes {
                        let label = match change.status {
                            ChangeStatus::Modified => "M".yellow(),
                            ChangeStatus::Added => "A".green(),
                            ChangeStatus::Deleted => "D".red(),
                        };
                        println!("  {label} {}", change.path);
                    }
                    println!(
                        "{} added, {} modified, {} deleted",
                        diff.added, diff.modified, diff.deleted
                    );
                }
                Some(file) => {
                    let summary =
                        engine.compute_diff(&project, &backup_dir, &version_a, &version_b)?;
                    let status = summary
                        .changes
                        .iter()
                        .find(|c| c.path == file)
                        .map(|c| c.status)
                        .unwrap_or(ChangeStatus::Modified);

                    let diff = engine.compute_file_diff(
                        &project,
                        &backup_dir,
                        &version_a,
                        &version_b,
                        &file,
                        status,
                    )?;
                    if diff.is_binary {
                        println!("Binary file {file} differs");
                    } else {
                        for line in &diff.lines {
                            match line.kind {
                                LineKind::Unchanged => println!("  {}", line.text),
                                LineKind::Added => {
                                    println!("{}", format!("+ {}", line.text).green())
                                }
                                LineKind::Deleted => {
                                    println!("{}", format!("- {}", line.text).red())
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    Ok(())
}
