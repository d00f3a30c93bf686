use std::process::Command;
use std::time::Instant;

use serde::Deserialize;

use crate::error::LintError;
use crate::io::as_overhead;
use crate::registry::TaskContext;

/// One entry of the linter's JSON report. Only the counters matter here; the
/// linter already printed human-readable findings and wrote its auto-fixes
/// back over the sources.
#[derive(Debug, Deserialize)]
struct FileReport {
    #[serde(rename = "filePath")]
    file_path: String,
    #[serde(rename = "errorCount")]
    error_count: usize,
    #[serde(rename = "warningCount")]
    warning_count: usize,
}

/// Run the external linter with auto-fix over the application scripts.
///
/// This is the only task that mutates source files in place. Its failure
/// policy depends on the session: during a live-reload session errors are
/// demoted to warnings so a typo doesn't kill the serve process, otherwise
/// any error aborts the chain with a nonzero exit.
pub fn run(ctx: &TaskContext) -> anyhow::Result<()> {
    let s = Instant::now();
    let paths = ctx.paths;

    let output = Command::new(&paths.lint_bin)
        .arg("--fix")
        .args(["--format", "json"])
        .arg(paths.js_dir().as_str())
        .output()
        .map_err(|source| LintError::Spawn {
            bin: paths.lint_bin.clone(),
            source,
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if stdout.trim().is_empty() {
        if output.status.success() {
            tracing::info!("lint found nothing to report {}", as_overhead(s));
            return Ok(());
        }
        return Err(LintError::Tool {
            bin: paths.lint_bin.clone(),
            status: output.status,
        }
        .into());
    }

    let (errors, warnings) = summarize(&stdout)?;
    tracing::info!("lint finished {}", as_overhead(s));

    apply_policy(errors, warnings, ctx.live())?;
    Ok(())
}

/// Fold the per-file report into overall error/warning totals.
fn summarize(report: &str) -> Result<(usize, usize), LintError> {
    let files: Vec<FileReport> = serde_json::from_str(report)?;

    let mut errors = 0;
    let mut warnings = 0;
    for file in &files {
        if file.error_count > 0 {
            tracing::debug!("{}: {} error(s)", file.file_path, file.error_count);
        }
        errors += file.error_count;
        warnings += file.warning_count;
    }

    Ok((errors, warnings))
}

fn apply_policy(errors: usize, warnings: usize, live: bool) -> Result<(), LintError> {
    if errors == 0 {
        if warnings > 0 {
            tracing::warn!("lint reported {warnings} warning(s)");
        }
        return Ok(());
    }

    if live {
        // A live session must survive bad intermediate states of the code.
        tracing::warn!("lint reported {errors} error(s), continuing (live session)");
        return Ok(());
    }

    Err(LintError::Failed { errors, warnings })
}
