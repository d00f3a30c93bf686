use std::fs;
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Instant;

use grass::OutputStyle;
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::error::StyleError;
use crate::globset::GlobSet;
use crate::io::as_overhead;
use crate::registry::TaskContext;

const PREFIX_ARGS: &[&str] = &["--use", "autoprefixer", "--no-map"];

/// Compile every entry stylesheet under `scss/`, then rewrite it with vendor
/// prefixes for the declared browser matrix. Partials (leading `_`) are
/// reachable only through `@use`/`@import` and are not entry points.
///
/// Error policy is resilient: a malformed file logs its compile error and is
/// skipped, an unusable prefixer downgrades to unprefixed output with a
/// warning. The process never aborts here.
pub fn compile(ctx: &TaskContext) -> anyhow::Result<()> {
    let s = Instant::now();
    let paths = ctx.paths;

    let sources = GlobSet::single(&format!("{}/[!_]*.scss", paths.scss_dir()))?.walk()?;
    fs::create_dir_all(&paths.styles_out)?;

    let browsers = paths.browsers.join(", ");

    let emitted: usize = sources
        .into_par_iter()
        .map(|source| {
            let opts = grass::Options::default().load_path(paths.base.as_std_path());

            let css = match grass::from_path(&source, &opts) {
                Ok(css) => css,
                Err(e) => {
                    tracing::error!("sass error in {source}:\n{e}");
                    return 0;
                }
            };

            let css = match prefix_css(&paths.prefix_bin, PREFIX_ARGS, &browsers, &css) {
                Ok(css) => css,
                Err(e) => {
                    tracing::warn!("prefixer skipped for {source}: {e}");
                    css
                }
            };

            let name = source.file_stem().unwrap_or("app");
            let dest = paths.styles_out.join(name).with_extension("css");
            if let Err(e) = fs::write(&dest, css) {
                tracing::error!("couldn't write {dest}: {e}");
                return 0;
            }
            1
        })
        .sum();

    tracing::info!("compiled {emitted} stylesheet(s) {}", as_overhead(s));
    ctx.signal_reload();

    Ok(())
}

/// Concatenate the compiled stylesheets (never an already minified one) and
/// recompress into `dist/app.min.css`. Byte-stable across reruns with
/// unchanged sources.
pub fn minify(ctx: &TaskContext) -> anyhow::Result<()> {
    let paths = ctx.paths;

    let inputs = GlobSet::new([
        format!("{}/*.css", paths.styles_out),
        format!("!{}/*.min.css", paths.styles_out),
    ])?
    .walk()?;

    if inputs.is_empty() {
        tracing::warn!("no stylesheets under {}, skipping minify:css", paths.styles_out);
        return Ok(());
    }

    let mut bundle = String::new();
    for input in &inputs {
        bundle.push_str(&fs::read_to_string(input).map_err(StyleError::Io)?);
        bundle.push('\n');
    }

    let minified = compress(&bundle)?;

    fs::create_dir_all(&paths.dist)?;
    let dest = paths.dist.join("app.min.css");
    fs::write(&dest, minified).map_err(StyleError::Io)?;

    tracing::info!("wrote {dest}");
    Ok(())
}

/// CSS is a subset of SCSS, so a compressed recompile doubles as a safe
/// whitespace/comment-stripping minifier.
fn compress(css: &str) -> Result<String, StyleError> {
    let opts = grass::Options::default().style(OutputStyle::Compressed);
    grass::from_string(css.to_string(), &opts).map_err(StyleError::Sass)
}

/// Pipe a stylesheet through the external prefixer. The browser matrix goes
/// in through `BROWSERSLIST`, the convention every browserslist-based tool
/// reads.
fn prefix_css(bin: &str, args: &[&str], browsers: &str, css: &str) -> Result<String, StyleError> {
    let mut child = Command::new(bin)
        .args(args)
        .env("BROWSERSLIST", browsers)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|source| StyleError::Spawn {
            bin: bin.to_string(),
            source,
        })?;

    child
        .stdin
        .take()
        .expect("stdin was piped")
        .write_all(css.as_bytes())?;

    let output = child.wait_with_output()?;
    if !output.status.success() {
        return Err(StyleError::Tool {
            bin: bin.to_string(),
            status: output.status,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Paths;
    use camino::Utf8PathBuf;

    fn scratch(tag: &str) -> Utf8PathBuf {
        let dir = std::env::temp_dir().join(format!("sensu-styles-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        Utf8PathBuf::try_from(dir).unwrap()
    }

    #[test]
    fn test_compress_strips_whitespace() {
        let out = compress("a {\n  color: red;\n}\n").unwrap();
        assert_eq!(out.trim(), "a{color:red}");
    }

    #[test]
    fn test_compress_is_idempotent() {
        let once = compress(".x { margin: 0 auto; }").unwrap();
        let twice = compress(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_prefixer_pipe_round_trips_stdin() {
        // `cat` stands in for the real tool, the pipe mechanics are the same
        let out = prefix_css("cat", &[], "", "a{color:red}").unwrap();
        assert_eq!(out, "a{color:red}");
    }

    #[test]
    fn test_missing_prefixer_is_a_spawn_error() {
        let err = prefix_css("sensu-no-such-prefixer", &[], "", "a{}").unwrap_err();
        assert!(matches!(err, StyleError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_compile_pipes_output_through_the_prefixer() {
        use std::os::unix::fs::PermissionsExt;

        let root = scratch("prefixed");
        let mut paths = Paths::rooted(&root);

        // a stand-in prefixer that visibly rewrites what passes through it
        let tool = root.join("rewrite.sh");
        fs::write(&tool, "#!/bin/sh\nsed s/red/blue/\n").unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();
        paths.prefix_bin = tool.into_string();

        let scss = paths.scss_dir().to_path_buf();
        fs::create_dir_all(&scss).unwrap();
        fs::write(scss.join("app.scss"), "body { color: red; }").unwrap();

        let ctx = TaskContext::new(&paths);
        compile(&ctx).unwrap();

        let css = fs::read_to_string(paths.styles_out.join("app.css")).unwrap();
        assert!(css.contains("blue"));
        assert!(!css.contains("red"));
    }

    #[test]
    fn test_compile_survives_a_missing_prefixer() {
        let root = scratch("noprefixer");
        let mut paths = Paths::rooted(&root);
        paths.prefix_bin = "sensu-no-such-prefixer".to_string();

        let scss = paths.scss_dir().to_path_buf();
        fs::create_dir_all(&scss).unwrap();
        fs::write(scss.join("app.scss"), "body { margin: 0; }").unwrap();

        let ctx = TaskContext::new(&paths);
        compile(&ctx).unwrap();

        let css = fs::read_to_string(paths.styles_out.join("app.css")).unwrap();
        assert!(css.contains("margin"));
    }

    #[test]
    fn test_one_bad_file_does_not_block_the_rest() {
        let root = scratch("resilient");
        let paths = Paths::rooted(&root);

        let scss = paths.scss_dir();
        fs::create_dir_all(&scss).unwrap();
        fs::write(scss.join("good.scss"), "$c: blue;\nbody { color: $c; }").unwrap();
        fs::write(scss.join("bad.scss"), "body { color: ").unwrap();

        let ctx = TaskContext::new(&paths);
        compile(&ctx).unwrap();

        assert!(paths.styles_out.join("good.css").exists());
        assert!(!paths.styles_out.join("bad.css").exists());
    }

    #[test]
    fn test_partials_are_not_entry_points() {
        let root = scratch("partials");
        let paths = Paths::rooted(&root);

        let scss = paths.scss_dir();
        fs::create_dir_all(&scss).unwrap();
        fs::write(scss.join("_vars.scss"), "$c: blue;").unwrap();
        fs::write(scss.join("app.scss"), "body { margin: 0; }").unwrap();

        let ctx = TaskContext::new(&paths);
        compile(&ctx).unwrap();

        assert!(paths.styles_out.join("app.css").exists());
        assert!(!paths.styles_out.join("_vars.css").exists());
    }

    #[test]
    fn test_minify_excludes_minified_and_is_stable() {
        let root = scratch("minify");
        let paths = Paths::rooted(&root);

        fs::create_dir_all(&paths.styles_out).unwrap();
        fs::write(paths.styles_out.join("app.css"), "a {  color : red ; }").unwrap();
        fs::write(paths.styles_out.join("old.min.css"), "b{display:none}").unwrap();

        let ctx = TaskContext::new(&paths);
        minify(&ctx).unwrap();

        let first = fs::read(paths.dist.join("app.min.css")).unwrap();
        let text = String::from_utf8(first.clone()).unwrap();
        assert!(text.contains("a{color:red}"));
        assert!(!text.contains("display:none"));

        minify(&ctx).unwrap();
        let second = fs::read(paths.dist.join("app.min.css")).unwrap();
        assert_eq!(first, second);
    }
}
