use crate::archiver::config::PostProcessConfig;
use crate::archiver::console::Console;
use crate::archiver::util::run_command_with_optional_timeout;
use crate::archiver::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use std::path::Path;
use std::process::Command;

const PER_FOLDER: &str = "{{}}";
const ALL_FOLDERS: &str = "{}";

/// Expands the args template into one argument line per invocation.
///
/// `{{}}` yields one invocation per folder; `{}` yields a single invocation
/// with every folder space-joined.
pub fn expand_args(template: &str, folders: &[String]) -> Vec<String> {
    if template.contains(PER_FOLDER) {
        folders
            .iter()
            .map(|folder| template.replace(PER_FOLDER, folder))
            .collect()
    } else {
        vec![template.replace(ALL_FOLDERS, &folders.join(" "))]
    }
}

/// Runs the configured post-processing command for the folders a run touched.
/// Disabled commands are only printed.
pub fn run(console: &Console, cfg: &PostProcessConfig, folders: &[String], workdir: &Path) {
    let Some(command) = cfg.command.as_deref().filter(|c| !c.trim().is_empty()) else {
        return;
    };
    if folders.is_empty() {
        return;
    }

    let lines = match cfg.args.as_deref() {
        Some(template) => expand_args(template, folders),
        None => vec![String::new()],
    };

    for args in lines {
        let shell = format!("{command} {args}").trim_end().to_string();
        if !cfg.enabled {
            console.info(&format!("Command not executed (disabled): {shell}"));
            continue;
        }
        console.action("EXECUTING", &shell);
        if let Err(err) = execute(command, &args, workdir, cfg.timeout_secs) {
            warn::emit(WarnEvent {
                code: "POST_PROCESS_FAILED",
                stage: "finalize",
                action: "post-process",
                path: &workdir.display().to_string(),
                retry: "none",
                reason: "command-failed",
                err: &format!("{err:#}"),
            });
        }
    }
}

fn execute(command: &str, args: &str, workdir: &Path, timeout_secs: Option<u64>) -> Result<()> {
    let binary = which::which(command)
        .with_context(|| format!("post-process command `{command}` not found on PATH"))?;
    let mut cmd = Command::new(binary);
    cmd.args(args.split_whitespace()).current_dir(workdir);
    let output = run_command_with_optional_timeout(&mut cmd, timeout_secs)
        .with_context(|| format!("failed to run `{command}`"))?;
    if !output.status.success() {
        anyhow::bail!(
            "`{command} {args}` exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn folders() -> Vec<String> {
        vec![
            "2023/06/2023-06-15".to_string(),
            "2023/07/2023-07-01".to_string(),
        ]
    }

    #[test]
    fn single_braces_join_all_folders() {
        assert_eq!(
            expand_args("-r {} /mnt/backup", &folders()),
            vec!["-r 2023/06/2023-06-15 2023/07/2023-07-01 /mnt/backup".to_string()]
        );
    }

    #[test]
    fn double_braces_run_once_per_folder() {
        assert_eq!(
            expand_args("--index {{}}", &folders()),
            vec![
                "--index 2023/06/2023-06-15".to_string(),
                "--index 2023/07/2023-07-01".to_string(),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn disabled_command_is_not_executed() {
        let tmp = tempdir().expect("tempdir");
        let marker = tmp.path().join("ran");
        let cfg = PostProcessConfig {
            command: Some("touch".to_string()),
            args: Some(marker.display().to_string()),
            enabled: false,
            timeout_secs: None,
        };
        run(&Console::new(false), &cfg, &folders(), tmp.path());
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[test]
    fn enabled_command_runs_in_workdir() {
        let tmp = tempdir().expect("tempdir");
        let cfg = PostProcessConfig {
            command: Some("touch".to_string()),
            args: Some("ran-{{}}".to_string()),
            enabled: true,
            timeout_secs: Some(10),
        };
        run(
            &Console::new(false),
            &cfg,
            &["a".to_string(), "b".to_string()],
            tmp.path(),
        );
        assert!(tmp.path().join("ran-a").exists());
        assert!(tmp.path().join("ran-b").exists());
    }
}
