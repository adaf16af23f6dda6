//! chapterwise: command-line entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Parse CLI arguments
//!   3. Load config, apply CLI overrides
//!   4. Resolve effective log level (CLI `-v` flags > env > config)
//!   5. Init logger once
//!   6. Build the LLM provider (dummy for `--dry-run`)
//!   7. Load chapters from the source
//!   8. Spawn Ctrl-C → shutdown signal watcher
//!   9. Run the requested command

use std::collections::HashSet;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use chapterwise::bootstrap::logger;
use chapterwise::config::{self, Config};
use chapterwise::error::AppError;
use chapterwise::llm::{LlmProvider, providers};
use chapterwise::subsystems::pipeline::{Pipeline, RunOptions};
use chapterwise::subsystems::source::{self, Chapter};

const USAGE: &str = "\
Usage: chapterwise [OPTIONS] [COMMAND]

Commands:
  run                        Analyse pending chapters (default)
  purge <UNIT>...            Remove units' concepts and notes so they are re-analysed
  render                     Rebuild concept cards and the index
  context                    Print the context summary the next chapter would get

Options:
  -h, --help                 Print help
  -f, --config <PATH>        Path to configuration file (default: config/default.toml)
  -s, --source <PATH>        Chapter directory or JSON manifest (overrides [source] path)
  -b, --book <NAME>          Book name / output sub-directory (overrides [pipeline] book_name)
      --force <UNIT>         Re-analyse UNIT even if already done (repeatable)
  -n, --max-chapters <N>     Analyse at most N chapters this run
      --dry-run              Use the dummy provider and write nothing
  -v, -vv, -vvv, -vvvv       Increase logging verbosity";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Run,
    Purge(Vec<String>),
    Render,
    Context,
}

#[derive(Debug, PartialEq, Eq)]
struct CliArgs {
    log_level: Option<&'static str>,
    config_path: Option<String>,
    source: Option<String>,
    book: Option<String>,
    force: Vec<String>,
    max_chapters: Option<usize>,
    dry_run: bool,
    command: Command,
}

#[derive(Debug, PartialEq, Eq)]
enum Parsed {
    Help,
    Args(CliArgs),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present: ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    let args = match parse_cli_args(std::env::args().skip(1)) {
        Ok(Parsed::Args(args)) => args,
        Ok(Parsed::Help) => {
            println!("{USAGE}");
            return Ok(());
        }
        Err(msg) => {
            eprintln!("error: {msg}\n\n{USAGE}");
            std::process::exit(2);
        }
    };

    let mut config = config::load(args.config_path.as_deref())?;
    if let Some(book) = &args.book {
        config.pipeline.book_name = book.clone();
    }
    if let Some(src) = &args.source {
        config.source.path = Some(config::expand_home(src));
    }

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str());
    logger::init(
        effective_log_level,
        args.log_level.is_some(),
        config.log_file.as_deref(),
    )?;

    info!(
        book = %config.pipeline.book_name,
        book_dir = %config.pipeline.book_dir().display(),
        configured_log_level = %config.log_level,
        effective_log_level = %effective_log_level,
        "config loaded"
    );

    let provider = if args.dry_run {
        LlmProvider::Dummy(providers::dummy::DummyProvider)
    } else {
        providers::build(&config.llm, config.llm_api_key.clone())
            .map_err(|e| AppError::Config(e.to_string()))?
    };
    if matches!(provider, LlmProvider::OpenAiCompatible(_)) && config.llm_api_key.is_none() {
        warn!("LLM_API_KEY is not set; requests go out without a key");
    }

    let chapters = load_source(&config, args.command == Command::Run)?;

    // Ctrl-C handler: cancels the token; the pipeline stops between chapters.
    let shutdown = CancellationToken::new();
    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received; finishing up");
            ctrlc_token.cancel();
        }
    });

    let mut pipeline = Pipeline::new(&config, provider);

    match args.command {
        Command::Run => {
            let options = RunOptions {
                force: args.force.into_iter().collect::<HashSet<_>>(),
                max_chapters: args.max_chapters,
                dry_run: args.dry_run,
            };
            let report = pipeline.run(&chapters, &options, &shutdown).await?;
            for (unit, reason) in &report.failed {
                println!("✗ {unit}: {reason}");
            }
            println!(
                "✓ {} analysed, {} already done, {} failed{}, {} concepts in {}",
                report.processed.len(),
                report.skipped_done,
                report.failed.len(),
                if report.interrupted { " (interrupted)" } else { "" },
                pipeline.memory().len(),
                pipeline.book_dir().display()
            );
        }
        Command::Purge(units) => {
            if args.dry_run {
                println!("dry run: would purge {}", units.join(", "));
                return Ok(());
            }
            for (unit, outcome) in pipeline.purge_units(&units, &chapters)? {
                println!(
                    "✓ {unit}: detached from {} concepts, {} removed",
                    outcome.detached, outcome.removed
                );
            }
        }
        Command::Render => {
            pipeline.render(&chapters)?;
            println!("✓ rendered {}", pipeline.book_dir().display());
        }
        Command::Context => println!("{}", pipeline.context_summary()),
    }

    Ok(())
}

/// Chapters from the configured source. Only `run` requires one.
fn load_source(config: &Config, required: bool) -> Result<Vec<Chapter>, AppError> {
    match &config.source.path {
        Some(path) => source::load_chapters(path, &config.source),
        None if required => Err(AppError::Config(
            "no chapter source: set [source] path or pass -s <PATH>".into(),
        )),
        None => Ok(Vec::new()),
    }
}

fn parse_cli_args<I>(args: I) -> Result<Parsed, String>
where
    I: IntoIterator<Item = String>,
{
    let mut verbosity = 0u8;
    let mut config_path = None;
    let mut source = None;
    let mut book = None;
    let mut force = Vec::new();
    let mut max_chapters = None;
    let mut dry_run = false;
    let mut positional: Vec<String> = Vec::new();

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        if arg == "--" {
            positional.extend(iter.by_ref());
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => return Ok(Parsed::Help),
            "-f" | "--config" => config_path = Some(value(&mut iter, "-f/--config")?),
            "-s" | "--source" => source = Some(value(&mut iter, "-s/--source")?),
            "-b" | "--book" => book = Some(value(&mut iter, "-b/--book")?),
            "--force" => force.push(value(&mut iter, "--force")?),
            "-n" | "--max-chapters" => {
                let n = value(&mut iter, "-n/--max-chapters")?;
                max_chapters = Some(
                    n.parse::<usize>()
                        .map_err(|_| format!("-n/--max-chapters expects a number, got '{n}'"))?,
                );
            }
            "--dry-run" => dry_run = true,
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            a if a.starts_with('-') && a.len() > 1 => return Err(format!("unknown option '{a}'")),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        None | Some("run") => Command::Run,
        Some("render") => Command::Render,
        Some("context") => Command::Context,
        Some("purge") => {
            let units: Vec<String> = positional.by_ref().collect();
            if units.is_empty() {
                return Err("purge requires at least one unit id".into());
            }
            Command::Purge(units)
        }
        Some(other) => return Err(format!("unknown command '{other}'")),
    };
    if let Some(extra) = positional.next() {
        return Err(format!("unexpected argument '{extra}'"));
    }

    Ok(Parsed::Args(CliArgs {
        log_level: logger::level_for_verbosity(verbosity),
        config_path,
        source,
        book,
        force,
        max_chapters,
        dry_run,
        command,
    }))
}

fn value(iter: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
    iter.next()
        .ok_or_else(|| format!("{flag} requires an argument"))
}
