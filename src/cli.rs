use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::archiver::config::{ChecksumMode, unknown_env_keys};
use crate::archiver::warn::{self, WarnEvent};
use crate::commands::{self, CommandReport};

#[derive(Debug, Parser)]
#[command(
    name = "arcpics",
    version,
    about = "Archive pictures and videos into a dated tree with per-year checksum ledgers"
)]
struct Cli {
    /// Print the command report as JSON.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Copy or move media from the sources into the archive.
    Archive(ArchiveArgs),
    /// Check every file under SOURCE against its checksum ledger.
    Validate(LedgerArgs),
    /// Recompute and store checksums for every file under SOURCE.
    UpdateChecksums(LedgerArgs),
    /// Reset file times under PATH to each file's content date.
    CorrectDates(CorrectDatesArgs),
    /// Delete the oldest archived files until BYTES are freed.
    Reclaim(ReclaimArgs),
}

#[derive(Debug, Args)]
struct ArchiveArgs {
    /// Source folders or files; defaults to `archive.source_folders`.
    sources: Vec<PathBuf>,
    #[arg(long = "dest")]
    destination: Option<PathBuf>,
    #[arg(long = "move-dest")]
    move_destination: Option<PathBuf>,
    #[arg(short = 'm', long = "move")]
    move_files: bool,
    #[arg(short = 'd', long)]
    diagnostics: bool,
    #[arg(long)]
    rotate: bool,
    #[arg(short = 'l', long = "log")]
    log_file: Option<PathBuf>,
    #[arg(long = "exclude-ext")]
    exclude_extensions: Vec<String>,
    /// `YYYY-MM-DD HH:MM`
    #[arg(long = "older-than")]
    older_than: Option<String>,
    #[arg(long, value_parser = ["none", "normal"])]
    checksums: Option<String>,
    #[arg(long)]
    scan_only: bool,
    #[arg(long)]
    no_video: bool,
    #[arg(short = 'q', long)]
    quiet: bool,
}

#[derive(Debug, Args)]
struct LedgerArgs {
    source: PathBuf,
    /// Directory holding `.arcpics/`; defaults to SOURCE.
    #[arg(long)]
    ledger_root: Option<PathBuf>,
    #[arg(short = 'l', long = "log")]
    log_file: Option<PathBuf>,
    #[arg(short = 'q', long)]
    quiet: bool,
}

#[derive(Debug, Args)]
struct CorrectDatesArgs {
    path: PathBuf,
    #[arg(short = 'd', long)]
    diagnostics: bool,
    #[arg(short = 'q', long)]
    quiet: bool,
}

#[derive(Debug, Args)]
struct ReclaimArgs {
    destination: PathBuf,
    #[arg(long)]
    bytes: u64,
    #[arg(short = 'd', long)]
    diagnostics: bool,
    #[arg(short = 'q', long)]
    quiet: bool,
}

fn warn_unknown_env() {
    for key in unknown_env_keys() {
        warn::emit(WarnEvent {
            code: "UNKNOWN_ENV",
            stage: "config",
            action: "read-env",
            path: &key,
            retry: "none",
            reason: "not-recognized",
            err: "ignored",
        });
    }
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let status = if report.ok { "ok" } else { "failed" };
    println!("{} {status}", report.command);
    for detail in &report.details {
        println!("  {detail}");
    }
    for issue in &report.issues {
        println!("  issue: {issue}");
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    warn_unknown_env();

    let report = match cli.command {
        Command::Archive(args) => {
            let checksum_mode = args
                .checksums
                .as_deref()
                .map(str::parse::<ChecksumMode>)
                .transpose()
                .map_err(anyhow::Error::msg)?;
            commands::archive::run(&commands::archive::ArchiveOptions {
                sources: args.sources,
                destination: args.destination,
                move_destination: args.move_destination,
                move_files: args.move_files,
                diagnostics: args.diagnostics,
                rotate: args.rotate,
                log_file: args.log_file,
                exclude_extensions: args.exclude_extensions,
                older_than: args.older_than,
                checksum_mode,
                scan_only: args.scan_only,
                no_video: args.no_video,
                quiet: args.quiet,
            })?
        }
        Command::Validate(args) => run_ledger(args, ChecksumMode::ValidateOnly)?,
        Command::UpdateChecksums(args) => run_ledger(args, ChecksumMode::UpdateOnly)?,
        Command::CorrectDates(args) => {
            commands::correct_dates::run(&commands::correct_dates::CorrectDatesOptions {
                path: args.path,
                diagnostics: args.diagnostics,
                quiet: args.quiet,
            })?
        }
        Command::Reclaim(args) => commands::reclaim::run(&commands::reclaim::ReclaimOptions {
            destination: args.destination,
            bytes: args.bytes,
            diagnostics: args.diagnostics,
            quiet: args.quiet,
        })?,
    };

    print_report(&report, cli.json)?;
    if !report.ok {
        std::process::exit(1);
    }
    Ok(())
}

fn run_ledger(args: LedgerArgs, mode: ChecksumMode) -> Result<CommandReport> {
    commands::checksums::run(&commands::checksums::ChecksumOptions {
        source: args.source,
        ledger_root: args.ledger_root,
        mode,
        log_file: args.log_file,
        quiet: args.quiet,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn archive_flags_parse() {
        let cli = Cli::try_parse_from([
            "arcpics",
            "archive",
            "/card",
            "--dest",
            "/mnt/archive",
            "-m",
            "--exclude-ext",
            "thm",
            "--exclude-ext",
            "lrv",
            "--older-than",
            "2020-01-01 00:00",
            "--checksums",
            "none",
            "--json",
        ])
        .expect("parse");
        assert!(cli.json);
        let Command::Archive(args) = cli.command else {
            panic!("expected archive");
        };
        assert!(args.move_files);
        assert_eq!(args.exclude_extensions, vec!["thm", "lrv"]);
        assert_eq!(args.checksums.as_deref(), Some("none"));
    }

    #[test]
    fn unknown_checksum_mode_is_rejected() {
        assert!(Cli::try_parse_from(["arcpics", "archive", "--checksums", "sometimes"]).is_err());
    }
}
