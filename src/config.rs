use camino::{Utf8Path, Utf8PathBuf};

/// Immutable project layout, resolved once at startup and handed to
/// [`Pipeline::new`](crate::Pipeline::new). Every task reads its input and
/// output locations from here; nothing mutates it afterwards.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Project root holding the source directories.
    pub base: Utf8PathBuf,
    /// Directory with root-level markup files, usually the same as `base`.
    pub html: Utf8PathBuf,
    /// Intermediate build output (`.tmp`).
    pub temp: Utf8PathBuf,
    /// Final distribution directory (`dist`).
    pub dist: Utf8PathBuf,
    /// Style sources.
    pub scss: Utf8PathBuf,
    /// Destination for compiled stylesheets. The upstream project wavered
    /// between `css/` in the live source tree and `.tmp/css`; both layouts
    /// work, the live source tree is the default here.
    pub styles_out: Utf8PathBuf,
    /// Application scripts, also rewritten in place by lint auto-fix.
    pub js: Utf8PathBuf,
    /// Static fonts, watched for reload only.
    pub fonts: Utf8PathBuf,
    /// Third-party script sources.
    pub third_party: Utf8PathBuf,
    /// Permanent images directory, written in place by `minify:images`.
    pub images: Utf8PathBuf,
    /// Staging directory for raw images awaiting optimization.
    pub images_temp: Utf8PathBuf,
    /// Cache for optimized images, keyed by content hash.
    pub cache: Utf8PathBuf,
    /// Third-party scripts bundled by `coreScripts`, in dependency order.
    /// The order is load-bearing and must survive concatenation.
    pub core_scripts: Vec<Utf8PathBuf>,
    /// Port for the development HTTP server.
    pub port: u16,
    /// External transpiler/minifier binary.
    pub esbuild_bin: String,
    /// External linter binary.
    pub lint_bin: String,
    /// External CSS postprocessor used for vendor prefixing.
    pub prefix_bin: String,
    /// Browser-support matrix handed to the prefixer through the
    /// `BROWSERSLIST` environment variable.
    pub browsers: Vec<String>,
}

impl Paths {
    /// Layout rooted at `base` with the conventional directory names. The
    /// current directory maps to bare relative paths so glob patterns line
    /// up with what the file watcher reports.
    pub fn rooted(base: impl AsRef<Utf8Path>) -> Self {
        let base = base.as_ref().to_path_buf();
        let join = |name: &str| -> Utf8PathBuf {
            if base == "." {
                Utf8PathBuf::from(name)
            } else {
                base.join(name)
            }
        };

        Self {
            html: base.clone(),
            temp: join(".tmp"),
            dist: join("dist"),
            scss: join("scss"),
            styles_out: join("css"),
            js: join("js"),
            fonts: join("fonts"),
            third_party: join("third_party"),
            images: join("images"),
            images_temp: join("images_temp"),
            cache: join(".cache/images"),
            core_scripts: vec![
                join("third_party/jquery.js"),
                join("third_party/bootstrap.js"),
            ],
            port: 9000,
            esbuild_bin: "esbuild".to_string(),
            lint_bin: "eslint".to_string(),
            prefix_bin: "postcss".to_string(),
            browsers: [
                "ie >= 10",
                "ie_mob >= 10",
                "ff >= 30",
                "chrome >= 34",
                "safari >= 7",
                "opera >= 23",
                "ios >= 7",
                "android >= 4.4",
                "bb >= 10",
            ]
            .map(String::from)
            .to_vec(),
            base,
        }
    }

    pub fn scss_dir(&self) -> &Utf8Path {
        &self.scss
    }

    pub fn js_dir(&self) -> &Utf8Path {
        &self.js
    }

    pub fn temp_js(&self) -> Utf8PathBuf {
        self.temp.join("js")
    }

    pub fn temp_core(&self) -> Utf8PathBuf {
        self.temp.join("third_party")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::rooted(".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rooted_layout() {
        let paths = Paths::rooted("site");

        assert_eq!(paths.temp, Utf8Path::new("site/.tmp"));
        assert_eq!(paths.dist, Utf8Path::new("site/dist"));
        assert_eq!(paths.styles_out, Utf8Path::new("site/css"));
        assert_eq!(paths.scss_dir(), Utf8Path::new("site/scss"));
        assert_eq!(paths.port, 9000);
    }

    #[test]
    fn test_current_dir_has_no_dot_prefix() {
        let paths = Paths::rooted(".");

        assert_eq!(paths.scss_dir(), Utf8Path::new("scss"));
        assert_eq!(paths.dist, Utf8Path::new("dist"));
    }

    #[test]
    fn test_browser_matrix_is_declared() {
        let paths = Paths::rooted(".");
        assert!(paths.browsers.iter().any(|b| b == "ie >= 10"));
        assert!(paths.browsers.iter().any(|b| b == "android >= 4.4"));
    }

    #[test]
    fn test_core_scripts_order() {
        let paths = Paths::rooted(".");
        // jquery must precede bootstrap, the bundle depends on it
        assert!(paths.core_scripts[0].as_str().contains("jquery"));
        assert!(paths.core_scripts[1].as_str().contains("bootstrap"));
    }
}
