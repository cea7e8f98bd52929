//! schemafuzz CLI - Schema-driven API fuzzing with shrinking and flaky detection

mod render;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use schemafuzz_core::config::{Config, Phase, parse_credentials};
use schemafuzz_core::report::{RunReport, generate_schema};
use schemafuzz_core::verdict::{Verdict, VerdictPolicy};
use schemafuzz_core::to_http_file;
use schemafuzz_runner::loader::{declared_base_url, extract_operations, load_document};
use schemafuzz_runner::{HttpTransport, OperationFilter, Runner};

use crate::render::{Progress, render_report};

const CONFIG_FILE: &str = ".schemafuzz.toml";

#[derive(Parser)]
#[command(name = "schemafuzz")]
#[command(about = "Schema-driven API fuzzing with shrinking and flaky detection")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (debug logs on stderr)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate cases from a schema and run them against the API
    Run(RunArgs),

    /// Initialize config file
    Init,

    /// Export JSON Schema of the JSON report
    Schema,
}

#[derive(Args)]
struct RunArgs {
    /// Schema location: file path or http(s) URL (default: from config)
    schema: Option<String>,

    /// Base URL of the API (default: the schema's servers)
    #[arg(short, long)]
    base_url: Option<String>,

    /// Header sent with every request, repeatable
    #[arg(short = 'H', long = "header", value_name = "KEY:VALUE", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Basic credentials
    #[arg(short, long, value_name = "USER:PASSWORD", value_parser = parse_auth)]
    auth: Option<String>,

    /// Checks to run, comma separated
    #[arg(short, long, value_delimiter = ',')]
    checks: Vec<String>,

    /// Only operations whose path matches this regex, repeatable
    #[arg(short = 'E', long)]
    endpoint: Vec<String>,

    /// Only operations with this HTTP method, repeatable
    #[arg(short = 'M', long)]
    method: Vec<String>,

    /// Only operations with a tag matching this regex, repeatable
    #[arg(short = 'T', long)]
    tag: Vec<String>,

    /// Maximum generated examples per operation
    #[arg(long)]
    max_examples: Option<u32>,

    /// Response latency budget in milliseconds
    #[arg(long, value_name = "MS")]
    deadline: Option<u64>,

    /// Hard request timeout in milliseconds
    #[arg(long, value_name = "MS")]
    request_timeout: Option<u64>,

    /// Operations executed in parallel
    #[arg(short, long)]
    workers: Option<usize>,

    /// Global seed
    #[arg(long)]
    seed: Option<u64>,

    /// Fixed seed for fully deterministic runs
    #[arg(long)]
    derandomize: bool,

    /// Enabled phases, comma separated (explicit, generate, shrink)
    #[arg(long, value_delimiter = ',')]
    phases: Vec<Phase>,

    /// Fail the run on every unsatisfiable operation
    #[arg(long)]
    strict: bool,

    /// Config file (default: .schemafuzz.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Terminal)]
    output: OutputFormat,

    /// Write reproductions of failing operations to this .http file
    #[arg(long)]
    repro_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
enum OutputFormat {
    #[default]
    Terminal,
    Json,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let Some((name, value)) = raw.split_once(':') else {
        return Err(format!("Should be in KEY:VALUE format. Got: {raw}"));
    };
    let name = name.trim();
    if name.is_empty() {
        return Err("Header name should not be empty".to_string());
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn parse_auth(raw: &str) -> Result<String, String> {
    parse_credentials(raw).map_err(|e| e.to_string())?;
    Ok(raw.to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

/// Logs go to stderr so stdout stays clean for JSON output.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Run(args) => run_fuzz(args),
        Commands::Init => init_config(Path::new(CONFIG_FILE)),
        Commands::Schema => {
            println!("{}", generate_schema()?);
            Ok(0)
        }
    }
}

fn init_config(path: &Path) -> Result<i32> {
    if path.exists() {
        eprintln!("{} already exists", path.display());
        return Ok(1);
    }
    std::fs::write(path, Config::example())
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Created {}", path.display());
    Ok(0)
}

/// Config from `--config`, the default locations or built-in defaults, with
/// command-line flags layered on top.
fn resolve_config(args: &RunArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?.unwrap_or_default(),
    };

    if let Some(schema) = &args.schema {
        config.schema.clone_from(schema);
    }
    if args.base_url.is_some() {
        config.base_url.clone_from(&args.base_url);
    }
    config.headers.extend(args.headers.iter().cloned());
    if args.auth.is_some() {
        config.auth.clone_from(&args.auth);
    }
    if !args.checks.is_empty() {
        config.checks.clone_from(&args.checks);
    }
    config.filter.endpoints.extend(args.endpoint.iter().cloned());
    config.filter.methods.extend(args.method.iter().cloned());
    config.filter.tags.extend(args.tag.iter().cloned());
    if let Some(max_examples) = args.max_examples {
        config.max_examples = max_examples;
    }
    if let Some(deadline) = args.deadline {
        config.deadline_ms = deadline;
    }
    if let Some(timeout) = args.request_timeout {
        config.request_timeout_ms = timeout;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    config.derandomize |= args.derandomize;
    if !args.phases.is_empty() {
        config.phases.clone_from(&args.phases);
    }
    config.strict_unsatisfiable |= args.strict;

    config.validate()?;
    Ok(config)
}

fn run_fuzz(args: RunArgs) -> Result<i32> {
    let config = resolve_config(&args)?;

    let document = load_document(&config.schema)?;
    let base_url = match &config.base_url {
        Some(url) => url.trim_end_matches('/').to_string(),
        None => declared_base_url(&document, &config.schema).with_context(|| {
            format!(
                "{} declares no server; pass --base-url or set base_url in {CONFIG_FILE}",
                config.schema
            )
        })?,
    };
    debug!(base_url, "resolved base URL");

    let filter = OperationFilter::from_config(&config.filter)?;
    let operations = filter.apply(extract_operations(&document, &base_url));
    info!(operations = operations.len(), schema = %config.schema, "schema loaded");

    let mut transport = HttpTransport::new(Duration::from_millis(config.request_timeout_ms))?;
    if let Some(auth) = &config.auth {
        let (user, password) = parse_credentials(auth)?;
        transport = transport.with_basic_auth(user, password);
    }
    let runner = Runner::from_config(&config)?;
    let policy = VerdictPolicy {
        strict_unsatisfiable: config.strict_unsatisfiable,
    };

    let terminal = args.output == OutputFormat::Terminal;
    if terminal {
        println!(
            "Testing {} operations against {base_url} (seed {})\n",
            operations.len(),
            runner.seed()
        );
    }
    let progress = Progress::new(operations.iter().map(|op| op.label()).collect());
    let report = runner.run(&operations, &transport, |event| {
        if !terminal {
            return;
        }
        if let Some(line) = progress.line(event) {
            println!("{line}");
        }
    })?;
    let verdict = report.verdict(&policy);

    match args.output {
        OutputFormat::Terminal => print!("\n{}", render_report(&report, &verdict)),
        OutputFormat::Json => println!("{}", json_output(&report, &verdict)?),
    }

    if let Some(path) = &args.repro_file {
        write_repro_file(path, &report)?;
    }

    Ok(verdict.exit_code)
}

fn json_output(report: &RunReport, verdict: &Verdict) -> Result<String> {
    let output = serde_json::json!({
        "verdict": {
            "status": verdict.status.to_string(),
            "exit_code": verdict.exit_code,
            "reason": verdict.reason,
        },
        "report": report,
    });
    Ok(serde_json::to_string_pretty(&output)?)
}

fn write_repro_file(path: &Path, report: &RunReport) -> Result<()> {
    if !report.operations.iter().any(|op| op.terminal.case().is_some()) {
        debug!("nothing to reproduce");
        return Ok(());
    }
    std::fs::write(path, to_http_file(report))
        .with_context(|| format!("failed to write {}", path.display()))?;
    eprintln!("Reproductions written to {}", path.display());
    Ok(())
}
