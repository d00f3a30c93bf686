use camino::Utf8PathBuf;
use clap::Parser;
use console::style;

use sensu::{Paths, Pipeline};

/// Front-end asset pipeline runner.
#[derive(Parser, Debug)]
#[command(name = "sensu", version, about)]
struct Args {
    /// Task to run, e.g. `build`, `serve`, `minify:css`.
    #[clap(index = 1, default_value = "default")]
    task: String,

    /// Project root holding `scss/`, `js/`, `images_temp/` and friends.
    #[arg(short, long, default_value = ".")]
    root: Utf8PathBuf,

    /// List every known task and exit.
    #[arg(long)]
    list: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let pipeline = Pipeline::new(Paths::rooted(&args.root))?;

    if args.list {
        for name in pipeline.task_names() {
            println!("{name}");
        }
        return Ok(());
    }

    eprintln!(
        "Running {} task {}",
        style("sensu").red(),
        style(&args.task).blue()
    );

    pipeline.run(&args.task)?;

    Ok(())
}
