use std::fs;
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::error::ScriptError;
use crate::globset::GlobSet;
use crate::io::as_overhead;
use crate::registry::TaskContext;

/// Transpile every application script to the older syntax target, keeping
/// the directory structure under `js/` intact in `.tmp/js/`. Source maps are
/// inlined so the browser can still point at the original lines.
pub fn transpile(ctx: &TaskContext) -> anyhow::Result<()> {
    let s = Instant::now();
    let paths = ctx.paths;

    // `**` also matches zero components, so top-level files are included
    let sources = GlobSet::single(&format!("{}/**/*.js", paths.js_dir()))?.walk()?;

    sources
        .into_par_iter()
        .try_for_each(|source| -> Result<(), ScriptError> {
            let data = fs::read(&source)?;
            let out = run_esbuild(
                &paths.esbuild_bin,
                &["--target=es2015", "--sourcemap=inline", "--loader=js"],
                &data,
                &source,
            )?;

            let dest = dest_for(&source, paths.js_dir(), &paths.temp_js());
            if let Some(dir) = dest.parent() {
                fs::create_dir_all(dir)?;
            }
            fs::write(&dest, out)?;

            Ok(())
        })?;

    tracing::info!("transpiled scripts {}", as_overhead(s));
    ctx.signal_reload();

    Ok(())
}

/// Bundle the fixed third-party script list into `.tmp/third_party/core.js`.
/// List order is dependency order, concatenation must preserve it exactly.
pub fn bundle_core(ctx: &TaskContext) -> anyhow::Result<()> {
    let s = Instant::now();
    let paths = ctx.paths;

    let bundle = concat_in_order(&paths.core_scripts)?;
    let out = run_esbuild(
        &paths.esbuild_bin,
        &["--target=es2015", "--sourcemap=inline", "--loader=js"],
        &bundle,
        Utf8Path::new("core.js"),
    )?;

    let dir = paths.temp_core();
    fs::create_dir_all(&dir)?;
    fs::write(dir.join("core.js"), out)?;

    tracing::info!("bundled core scripts {}", as_overhead(s));
    ctx.signal_reload();

    Ok(())
}

/// Minify the transpiled application scripts into `dist/app.min.js`.
pub fn minify(ctx: &TaskContext) -> anyhow::Result<()> {
    minify_dir(ctx, &ctx.paths.temp_js(), "app.min.js")
}

/// Minify the third-party bundle into `dist/core.min.js`.
pub fn minify_core(ctx: &TaskContext) -> anyhow::Result<()> {
    minify_dir(ctx, &ctx.paths.temp_core(), "core.min.js")
}

fn minify_dir(ctx: &TaskContext, dir: &Utf8Path, artifact: &str) -> anyhow::Result<()> {
    let paths = ctx.paths;

    let inputs = GlobSet::new([
        format!("{dir}/**/*.js"),
        format!("!{dir}/**/*.min.js"),
    ])?
    .walk()?;

    if inputs.is_empty() {
        tracing::warn!("no scripts under {dir}, skipping {artifact}");
        return Ok(());
    }

    let bundle = concat_in_order(&inputs)?;
    let out = run_esbuild(
        &paths.esbuild_bin,
        &["--minify", "--loader=js"],
        &bundle,
        Utf8Path::new(artifact),
    )?;

    fs::create_dir_all(&paths.dist)?;
    let dest = paths.dist.join(artifact);
    fs::write(&dest, out)?;

    tracing::info!("wrote {dest}");
    Ok(())
}

/// Concatenate files in the given order, separated by newlines so a missing
/// trailing newline in one file cannot glue two statements together.
fn concat_in_order(files: &[Utf8PathBuf]) -> Result<Vec<u8>, ScriptError> {
    let mut bundle = Vec::new();

    for file in files {
        if !file.is_file() {
            return Err(ScriptError::MissingCoreScript(file.clone()));
        }
        bundle.extend_from_slice(&fs::read(file)?);
        bundle.push(b'\n');
    }

    Ok(bundle)
}

fn dest_for(source: &Utf8Path, js_dir: &Utf8Path, temp_js: &Utf8Path) -> Utf8PathBuf {
    match source.strip_prefix(js_dir) {
        Ok(relative) => temp_js.join(relative),
        Err(_) => temp_js.join(source.file_name().unwrap_or("script.js")),
    }
}

/// Pipe `input` through the external esbuild binary. A spawn failure or a
/// nonzero exit is fatal to the calling task chain.
fn run_esbuild(
    bin: &str,
    args: &[&str],
    input: &[u8],
    file: &Utf8Path,
) -> Result<Vec<u8>, ScriptError> {
    let mut child = Command::new(bin)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|source| ScriptError::Spawn {
            bin: bin.to_string(),
            source,
        })?;

    child
        .stdin
        .take()
        .expect("stdin was piped")
        .write_all(input)?;

    let output = child.wait_with_output()?;
    if !output.status.success() {
        return Err(ScriptError::Tool {
            bin: bin.to_string(),
            status: output.status,
            file: file.to_path_buf(),
        });
    }

    Ok(output.stdout)
}
