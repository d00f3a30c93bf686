use crate::config::Paths;
use crate::error::{ConfigError, SensuError};
use crate::registry::{Registry, TaskContext};
use crate::{images, io, lint, scripts, styles};

#[cfg(feature = "live")]
use crate::watch::{self, ReloadHub};

/// The wired-up asset pipeline: the task registry plus the immutable layout
/// it operates on.
///
/// Leaf tasks read sources, `minify:*` tasks depend on their leaves, and the
/// aggregates fan in on top:
///
/// ```text
/// styles ──── minify:css ────┐
/// scripts ─── minify:js ─────┤
/// coreScripts minify:corejs ─┼── minify ──┐
///             minify:images ─┘            ├── build
/// lint ────────────────────────────────────┘
/// ```
pub struct Pipeline {
    registry: Registry,
    paths: Paths,
}

impl Pipeline {
    pub fn new(paths: Paths) -> Result<Self, ConfigError> {
        let mut registry = Registry::new();

        registry.register("styles", &[], styles::compile)?;
        registry.register("scripts", &[], scripts::transpile)?;
        registry.register("coreScripts", &[], scripts::bundle_core)?;
        registry.register("lint", &[], lint::run)?;

        registry.register("minify:css", &["styles"], styles::minify)?;
        registry.register("minify:js", &["scripts"], scripts::minify)?;
        registry.register("minify:corejs", &["coreScripts"], scripts::minify_core)?;
        registry.register("minify:images", &[], images::minify)?;

        registry.register(
            "minify",
            &["minify:css", "minify:js", "minify:corejs", "minify:images"],
            |ctx| {
                io::report_size("dist", &ctx.paths.dist, false)?;
                Ok(())
            },
        )?;

        registry.register("clean", &[], |ctx| {
            io::clean(ctx.paths)?;
            Ok(())
        })?;

        registry.register("build", &["lint", "minify"], |ctx| {
            io::report_size("build", &ctx.paths.dist, true)?;
            Ok(())
        })?;

        Ok(Self { registry, paths })
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Every invocable name, registry tasks and the long-running modes.
    pub fn task_names(&self) -> Vec<&'static str> {
        let mut names = self.registry.names();
        names.push("default");
        #[cfg(feature = "live")]
        names.push("watch");
        #[cfg(all(feature = "live", feature = "server"))]
        {
            names.push("serve");
            names.push("serveLite");
        }
        names.sort_unstable();
        names
    }

    /// Run a task by name. `default` cleans and then waits for the full
    /// build, so a build failure surfaces in the exit status instead of
    /// being fired off and forgotten. `watch`/`serve`/`serveLite` enter
    /// watching and never return on success.
    pub fn run(&self, name: &str) -> Result<(), SensuError> {
        match name {
            "default" => {
                self.run("clean")?;
                self.run("build")
            }
            #[cfg(feature = "live")]
            "watch" => self.watch(),
            #[cfg(all(feature = "live", feature = "server"))]
            "serve" => self.serve(true),
            #[cfg(all(feature = "live", feature = "server"))]
            "serveLite" => self.serve(false),
            _ => self.registry.run(name, &TaskContext::new(&self.paths)),
        }
    }

    /// Enter watch mode: no HTTP server, just rebuilds and reload signals.
    #[cfg(feature = "live")]
    pub fn watch(&self) -> Result<(), SensuError> {
        let hub = ReloadHub::start()?;
        watch::watch_loop(self, &hub)
    }

    /// Run `minify` once (skipped by `serveLite`), then serve and watch.
    #[cfg(all(feature = "live", feature = "server"))]
    pub fn serve(&self, initial_minify: bool) -> Result<(), SensuError> {
        let hub = ReloadHub::start()?;

        if initial_minify {
            self.run_with_reload("minify", &hub)?;
        }

        let _http = crate::serve::start(&self.paths);
        watch::watch_loop(self, &hub)
    }

    /// Registry run with a live-reload sink attached; used by the watch
    /// loop and the initial `serve` build.
    #[cfg(feature = "live")]
    pub(crate) fn run_with_reload(&self, name: &str, hub: &ReloadHub) -> Result<(), SensuError> {
        self.registry
            .run(name, &TaskContext::with_reload(&self.paths, hub))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_cli_task_is_known() {
        let pipeline = Pipeline::new(Paths::rooted(".")).unwrap();
        let names = pipeline.task_names();

        for name in [
            "styles",
            "scripts",
            "coreScripts",
            "lint",
            "minify:css",
            "minify:js",
            "minify:corejs",
            "minify:images",
            "minify",
            "clean",
            "build",
            "default",
        ] {
            assert!(names.contains(&name), "missing task {name}");
        }
    }

    #[test]
    fn test_unknown_name_is_rejected() {
        let pipeline = Pipeline::new(Paths::rooted(".")).unwrap();
        let err = pipeline.run("mystery").unwrap_err();
        assert!(matches!(
            err,
            SensuError::Config(ConfigError::UnknownTask(_))
        ));
    }

    #[test]
    fn test_clean_runs_against_empty_tree() {
        let root = std::env::temp_dir().join(format!("sensu-pipeline-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(&root).unwrap();
        let root = camino::Utf8PathBuf::try_from(root).unwrap();

        let pipeline = Pipeline::new(Paths::rooted(&root)).unwrap();
        pipeline.run("clean").unwrap();
        pipeline.run("clean").unwrap();
    }
}
