//! Maestro command line
//!
//! Builds the capability registry, loads configuration and drives the
//! orchestrator for a single request.

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use maestro_core::{Bag, CapabilityRegistry, ExecutionContext, MaestroConfig, Orchestrator};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod simulated;

const PRINTER_GRACE: Duration = Duration::from_millis(250);

fn cli() -> Command {
    let request = Arg::new("request")
        .required(true)
        .num_args(1..)
        .help("Free-form request text");

    Command::new("maestro")
        .version(maestro_core::VERSION)
        .about("Capability orchestration: plan, run and track requests")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("workers")
                .long("workers")
                .global(true)
                .value_parser(value_parser!(usize))
                .help("Override the worker pool size"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("run")
                .about("Plan and execute a request")
                .arg(request.clone())
                .arg(
                    Arg::new("option")
                        .long("option")
                        .short('o')
                        .action(ArgAction::Append)
                        .help("Request option as key=value (value parsed as JSON when possible)"),
                )
                .arg(
                    Arg::new("progress")
                        .long("progress")
                        .action(ArgAction::SetTrue)
                        .help("Print task progress to stderr"),
                ),
        )
        .subcommand(
            Command::new("plan")
                .about("Print the execution plan for a request without running it")
                .arg(request.clone()),
        )
        .subcommand(
            Command::new("project")
                .about("Decompose a request into epics, stories and sprints")
                .arg(request)
                .arg(
                    Arg::new("execute")
                        .long("execute")
                        .action(ArgAction::SetTrue)
                        .help("Run the sprints after planning"),
                ),
        )
        .subcommand(Command::new("capabilities").about("List registered capabilities"))
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(matches: &ArgMatches) -> Result<MaestroConfig> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => MaestroConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => MaestroConfig::new(),
    };
    if let Some(workers) = matches.get_one::<usize>("workers") {
        config = config.with_max_workers(*workers);
    }
    Ok(config)
}

fn request_text(args: &ArgMatches) -> Result<String> {
    let text = args
        .get_many::<String>("request")
        .context("missing request")?
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ");
    if text.trim().is_empty() {
        bail!("request must not be blank");
    }
    Ok(text)
}

fn parse_options(args: &ArgMatches) -> Result<Bag> {
    let mut options = Bag::new();
    for raw in args.get_many::<String>("option").into_iter().flatten() {
        let Some((key, value)) = raw.split_once('=') else {
            bail!("option `{raw}` is not key=value");
        };
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        options.insert(key.trim().to_string(), value);
    }
    Ok(options)
}

fn build_orchestrator(config: MaestroConfig) -> Result<Arc<Orchestrator>> {
    let registry = Arc::new(CapabilityRegistry::new());
    for capability in simulated::catalog() {
        registry.register(capability)?;
    }
    Orchestrator::with_registry(config, registry).context("invalid configuration")
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(orchestrator: &Orchestrator, cancel: &CancellationToken, args: &ArgMatches) -> Result<bool> {
    let request = request_text(args)?;
    let options = parse_options(args)?;

    let result = if args.get_flag("progress") {
        let (sink, mut updates) = orchestrator.progress_channel();
        let printer = tokio::spawn(async move {
            while let Some(update) = updates.recv().await {
                eprintln!("[{}] {} {}", update.status, update.capability, update.task_id);
            }
        });
        let result = orchestrator
            .execute_with_progress(cancel, &request, options, sink)
            .await;
        // Closes once the context holding the sink is dropped
        let _ = tokio::time::timeout(PRINTER_GRACE, printer).await;
        result?
    } else {
        orchestrator.execute(cancel, &request, options).await?
    };

    print_json(&result)?;
    Ok(result.success)
}

async fn project(orchestrator: &Orchestrator, cancel: &CancellationToken, args: &ArgMatches) -> Result<bool> {
    let request = request_text(args)?;
    if !args.get_flag("execute") {
        let project = orchestrator.plan_project(&request, Bag::new())?;
        print_json(&project)?;
        return Ok(true);
    }

    let context = Arc::new(ExecutionContext::new(request.as_str()));
    let result = orchestrator.hierarchy().run(cancel, &request, context).await?;
    print_json(&result)?;
    Ok(result.success)
}

fn capabilities(orchestrator: &Orchestrator) {
    for name in orchestrator.capabilities() {
        let description = orchestrator
            .capability(&name)
            .map(|c| c.description().to_string())
            .unwrap_or_default();
        println!("{name:<16} {description}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("json"));

    let config = load_config(&matches)?;
    let orchestrator = build_orchestrator(config)?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            interrupt.cancel();
        }
    });

    let success = match matches.subcommand() {
        Some(("run", args)) => run(&orchestrator, &cancel, args).await?,
        Some(("plan", args)) => {
            let plan = orchestrator.plan(&request_text(args)?)?;
            print_json(&plan)?;
            true
        }
        Some(("project", args)) => project(&orchestrator, &cancel, args).await?,
        Some(("capabilities", _)) => {
            capabilities(&orchestrator);
            true
        }
        _ => bail!("no subcommand given"),
    };

    orchestrator.shutdown().await;
    std::process::exit(if success { 0 } else { 1 });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(argv: &[&str]) -> ArgMatches {
        cli().try_get_matches_from(argv).unwrap()
    }

    #[test]
    fn cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn request_words_are_joined() {
        let m = matches(&["maestro", "run", "search", "for", "TODO"]);
        let (_, args) = m.subcommand().unwrap();
        assert_eq!(request_text(args).unwrap(), "search for TODO");
    }

    #[test]
    fn options_parse_json_or_fall_back_to_string() {
        let m = matches(&["maestro", "run", "x", "-o", "timeout=30", "-o", "mode=fast"]);
        let (_, args) = m.subcommand().unwrap();
        let options = parse_options(args).unwrap();

        assert_eq!(options["timeout"], serde_json::json!(30));
        assert_eq!(options["mode"], serde_json::json!("fast"));
    }

    #[test]
    fn malformed_option_is_rejected() {
        let m = matches(&["maestro", "run", "x", "-o", "novalue"]);
        let (_, args) = m.subcommand().unwrap();
        assert!(parse_options(args).is_err());
    }

    #[test]
    fn config_file_and_worker_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("maestro.toml");
        std::fs::write(&path, "max_workers = 3\n").unwrap();

        let m = matches(&["maestro", "--config", path.to_str().unwrap(), "capabilities"]);
        assert_eq!(load_config(&m).unwrap().max_workers, 3);

        let m = matches(&["maestro", "--config", path.to_str().unwrap(), "--workers", "7", "capabilities"]);
        assert_eq!(load_config(&m).unwrap().max_workers, 7);
    }

    #[tokio::test]
    async fn registers_every_simulated_capability() {
        let orchestrator = build_orchestrator(MaestroConfig::new()).unwrap();
        assert_eq!(orchestrator.capabilities().len(), 5);
    }

    #[tokio::test]
    async fn run_executes_against_simulated_capabilities() {
        let orchestrator = build_orchestrator(MaestroConfig::new()).unwrap();
        let m = matches(&["maestro", "run", "search", "for", "TODO", "--progress"]);
        let (_, args) = m.subcommand().unwrap();

        let success = run(&orchestrator, &CancellationToken::new(), args).await.unwrap();
        assert!(success);
    }
}
