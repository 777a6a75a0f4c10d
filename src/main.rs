use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use filtermr::app::{self, AppConfig, RunConfig};
use filtermr::pipeline::{CollectWriter, Engine, RunSummary};
use filtermr::wordcount::{self, WordCounts};
use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;
use tracing::{debug, info};

/// Map-reduce over a filter lock
#[derive(Parser)]
#[command(name = "filtermr")]
#[command(about = "Run map-reduce jobs whose workers share buffers through a filter lock", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Count the words of a file, or of stdin when no file is given
    Wordcount {
        /// File to read
        file: Option<PathBuf>,

        /// Workers per stage (default: available parallelism)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Bucket count of the grouping map (default: 353)
        #[arg(long)]
        buckets: Option<usize>,

        /// Lock guarding the stage buffers (default: filter-lock)
        #[arg(long, value_enum)]
        engine: Option<EngineArg>,

        /// Path to a TOML file with `workers`, `buckets` and `engine`
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum EngineArg {
    FilterLock,
    Mutex,
}

impl From<EngineArg> for Engine {
    fn from(arg: EngineArg) -> Self {
        match arg {
            EngineArg::FilterLock => Engine::FilterLock,
            EngineArg::Mutex => Engine::Mutex,
        }
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    counts: &'a WordCounts,
    summary: &'a RunSummary,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let verbose = cli.verbose;

    if let Err(error) = run(cli).await {
        app::handle_fatal_error(error, verbose);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Wordcount {
            file,
            workers,
            buckets,
            engine,
            config,
            format,
        } => {
            let run_config = match &config {
                Some(path) => RunConfig::load(path)?,
                None => RunConfig::default(),
            }
            .with_workers(workers)
            .with_buckets(buckets)
            .with_engine(engine.map(Engine::from));
            run_config.validate()?;

            let app_config = AppConfig::new(cli.verbose).with_run(run_config);
            app::init_logging(&app_config);
            debug!("Run configuration: {:?}", app_config.run);

            let text = read_input(file.as_ref())?;
            word_count(text, &app_config.run, format).await
        }
    }
}

fn read_input(file: Option<&PathBuf>) -> anyhow::Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read input file {}", path.display())),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("failed to read stdin")?;
            Ok(text)
        }
    }
}

async fn word_count(text: String, config: &RunConfig, format: OutputFormat) -> anyhow::Result<()> {
    let writer = CollectWriter::<String, u64>::new();
    let pipeline = wordcount::pipeline()
        .with_writer(writer.clone())
        .with_bucket_count(config.buckets)
        .with_engine(config.engine)
        .build()?;

    let summary = pipeline
        .run(text, config.workers)
        .await
        .context("word count failed")?;
    info!(
        "Counted {} words into {} distinct keys",
        summary.words, summary.distinct_keys
    );

    let counts = wordcount::collect_counts(writer.take());
    match format {
        OutputFormat::Text => print!("{}", wordcount::render_text(&counts)),
        OutputFormat::Json => {
            let report = JsonReport {
                counts: &counts,
                summary: &summary,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
