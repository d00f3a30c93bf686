use thiserror::Error;

/// Top-level error for a pipeline run.
#[derive(Debug, Error)]
pub enum SensuError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Task '{0}':\n{1}")]
    Task(String, anyhow::Error),

    #[cfg(feature = "live")]
    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),
}

/// Mistakes in the task graph itself. These abort before any action runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown task '{0}'")]
    UnknownTask(String),

    #[error("Task '{0}' is registered twice")]
    DuplicateTask(String),

    #[error("Task '{task}' declares unknown prerequisite '{prerequisite}'")]
    UnknownPrerequisite { task: String, prerequisite: String },

    #[error("Prerequisite cycle involving task '{0}'")]
    Cycle(String),

    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),
}

#[derive(Debug, Error)]
pub enum StyleError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Sass compilation error:\n{0}")]
    Sass(#[from] Box<grass::Error>),

    #[error("Failed to spawn '{bin}': {source}")]
    Spawn {
        bin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{bin}' exited with {status}")]
    Tool {
        bin: String,
        status: std::process::ExitStatus,
    },
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to spawn '{bin}': {source}")]
    Spawn {
        bin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{bin}' exited with {status} while processing {file}")]
    Tool {
        bin: String,
        status: std::process::ExitStatus,
        file: camino::Utf8PathBuf,
    },

    #[error("Core script missing: {0}")]
    MissingCoreScript(camino::Utf8PathBuf),
}

#[derive(Debug, Error)]
pub enum LintError {
    #[error("Failed to spawn '{bin}': {source}")]
    Spawn {
        bin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Couldn't parse linter report.\n{0}")]
    Report(#[from] serde_json::Error),

    #[error("'{bin}' exited with {status} and produced no report")]
    Tool {
        bin: String,
        status: std::process::ExitStatus,
    },

    #[error("Lint found {errors} error(s) ({warnings} warning(s))")]
    Failed { errors: usize, warnings: usize },
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),
}

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Couldn't bind the reload socket.\n{0}")]
    Bind(std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Recv(#[from] std::sync::mpsc::RecvError),
}
