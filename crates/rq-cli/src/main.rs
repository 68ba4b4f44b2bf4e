use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use rq_runner::config::{
    KEY_BACKEND, KEY_COMPILER1, KEY_COMPILER2, KEY_NUM_RUNS, KEY_OPT1, KEY_OPT2, KEY_VERSION1,
    KEY_VERSION2,
};
use rq_runner::{BenchError, BenchmarkConfig, ConfigValues, HarnessSettings};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "rq",
    version,
    about = "Benchmark library versions side by side in isolated sandboxes"
)]
struct Cli {
    #[arg(long, global = true)]
    verbose: bool,
    /// Harness settings (YAML). Defaults to ./rq.yaml when present.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Debug, Default)]
struct ConfigArgs {
    /// KEY=VALUE file produced by the configuration step.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    compiler1: Option<String>,
    #[arg(long)]
    version1: Option<String>,
    #[arg(long)]
    opt1: Option<String>,
    #[arg(long)]
    backend: Option<String>,
    #[arg(long)]
    num_runs: Option<String>,
    #[arg(long)]
    compiler2: Option<String>,
    #[arg(long)]
    version2: Option<String>,
    #[arg(long)]
    opt2: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    Run {
        #[command(flatten)]
        config: ConfigArgs,
        #[arg(long)]
        json: bool,
    },
    Describe {
        #[command(flatten)]
        config: ConfigArgs,
        #[arg(long)]
        json: bool,
    },
    Versions {
        package: String,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    Sandboxes {
        #[arg(long)]
        json: bool,
    },
}

struct CommandOutput {
    payload: Option<Value>,
    exit_code: i32,
}

impl CommandOutput {
    fn done(payload: Option<Value>) -> Self {
        Self {
            payload,
            exit_code: 0,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let json_mode = command_json_mode(&cli.command);
    match run_command(cli.command, cli.settings.as_deref()) {
        Ok(output) => {
            if let Some(payload) = output.payload {
                emit_json(&payload);
            }
            if output.exit_code != 0 {
                std::process::exit(output.exit_code);
            }
        }
        Err(err) => {
            let (code, exit_code) = match err.downcast_ref::<BenchError>() {
                Some(bench) => (bench.code(), bench.exit_code()),
                None => ("command_failed", 1),
            };
            if json_mode {
                emit_json(&json_error(code, err.to_string(), json!({})));
            } else {
                eprintln!("error: {:#}", err);
            }
            std::process::exit(exit_code);
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "rq_runner=debug,rq_cli=debug"
    } else {
        "rq_runner=info,rq_cli=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_command(command: Commands, settings_path: Option<&Path>) -> Result<CommandOutput> {
    let settings = rq_runner::load_settings(settings_path)?;
    debug!(
        sandbox_root = %settings.sandbox_root.display(),
        runner_script = %settings.runner_script.display(),
        "harness settings loaded"
    );
    match command {
        Commands::Run { config, json } => {
            let config = resolve_config(&config)?;
            let summary = rq_runner::run_benchmarks(&settings, &config)?;
            let exit_code = summary.exit_code();
            if json {
                return Ok(CommandOutput {
                    payload: Some(json!({
                        "ok": exit_code == 0,
                        "command": "run",
                        "config": config,
                        "summary": summary,
                        "exit_code": exit_code
                    })),
                    exit_code,
                });
            }
            for slot in &summary.slots {
                println!(
                    "{}: {} {} ({:?}, comparison={}) -> {}",
                    slot.sandbox,
                    slot.tool,
                    slot.version,
                    slot.provenance,
                    slot.is_comparison_run,
                    slot.status
                );
            }
            Ok(CommandOutput {
                payload: None,
                exit_code,
            })
        }
        Commands::Describe { config, json } => {
            let config = resolve_config(&config)?;
            let planned = rq_runner::describe_benchmarks(&settings, &config)?;
            if json {
                return Ok(CommandOutput::done(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "sandbox_root": settings.sandbox_root.display().to_string(),
                    "runner_script": settings.runner_script.display().to_string(),
                    "slots": planned
                }))));
            }
            print_settings(&settings);
            for slot in &planned {
                println!("sandbox: {}", slot.sandbox);
                println!("  path: {}", slot.path.display());
                println!("  exists: {}", slot.exists);
                println!("  comparison_run: {}", slot.is_comparison_run);
                println!("  runner_args: {}", slot.runner_args.join(" "));
            }
            Ok(CommandOutput::done(None))
        }
        Commands::Versions {
            package,
            limit,
            json,
        } => {
            let versions = rq_runner::available_versions(&settings, &package, limit)?;
            if json {
                return Ok(CommandOutput::done(Some(json!({
                    "ok": true,
                    "command": "versions",
                    "package": package,
                    "versions": versions
                }))));
            }
            for version in versions {
                println!("{}", version);
            }
            Ok(CommandOutput::done(None))
        }
        Commands::Sandboxes { json } => {
            let entries = rq_runner::list_sandboxes(&settings)?;
            if json {
                return Ok(CommandOutput::done(Some(json!({
                    "ok": true,
                    "command": "sandboxes",
                    "sandbox_root": settings.sandbox_root.display().to_string(),
                    "sandboxes": entries
                }))));
            }
            if entries.is_empty() {
                println!("no sandboxes under {}", settings.sandbox_root.display());
            }
            for entry in entries {
                let provisioned = entry.marker.as_ref().map(|m| m.provisioned);
                println!(
                    "{}\tprovisioned={}\t{} bytes",
                    entry.name,
                    provisioned.map_or("unknown".to_string(), |p| p.to_string()),
                    entry.size_bytes
                );
            }
            Ok(CommandOutput::done(None))
        }
    }
}

/// File values first, then any flag given on the command line.
fn resolve_config(args: &ConfigArgs) -> Result<BenchmarkConfig, BenchError> {
    let mut values = match &args.config {
        Some(path) => rq_runner::read_config_file(path)?,
        None => ConfigValues::default(),
    };
    values.merge(config_overrides(args));
    BenchmarkConfig::from_values(&values)
}

fn config_overrides(args: &ConfigArgs) -> ConfigValues {
    let mut overrides = ConfigValues::default();
    let pairs = [
        (KEY_COMPILER1, &args.compiler1),
        (KEY_VERSION1, &args.version1),
        (KEY_OPT1, &args.opt1),
        (KEY_BACKEND, &args.backend),
        (KEY_NUM_RUNS, &args.num_runs),
        (KEY_COMPILER2, &args.compiler2),
        (KEY_VERSION2, &args.version2),
        (KEY_OPT2, &args.opt2),
    ];
    for (key, value) in pairs {
        if let Some(v) = value {
            overrides.set(key, v.clone());
        }
    }
    overrides
}

fn print_settings(settings: &HarnessSettings) {
    println!("sandbox_root: {}", settings.sandbox_root.display());
    println!("python: {}", settings.python);
    println!("runner_script: {}", settings.runner_script.display());
    println!("baseline_packages: {}", settings.baseline_packages.join(", "));
}

/// One JSON document per invocation on stdout. Logs and child output stay on stderr.
fn emit_json(value: &Value) {
    let line = serde_json::to_string(value).unwrap_or_else(|_| {
        json_error(
            "serialization_error",
            "failed to serialize JSON payload".to_string(),
            json!({}),
        )
        .to_string()
    });
    println!("{}", line);
}

/// Failure envelope; `code` is the stable machine-readable error kind.
fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. }
        | Commands::Describe { json, .. }
        | Commands::Versions { json, .. }
        | Commands::Sandboxes { json } => *json,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_build_a_configuration_without_a_file() {
        let cli = Cli::try_parse_from([
            "rq",
            "describe",
            "--compiler1",
            "qiskit",
            "--version1",
            "1.0",
            "--opt1",
            "3",
            "--num-runs",
            "5",
            "--compiler2",
            "pytket",
            "--version2",
            "2.7.0",
        ])
        .expect("parse");
        let Commands::Describe { config, json } = cli.command else {
            panic!("expected describe");
        };
        assert!(!json);
        let config = resolve_config(&config).expect("config");
        assert_eq!(config.primary.tool_name, "qiskit");
        assert_eq!(config.primary.run_count, 5);
        let secondary = config.secondary.expect("second tool");
        assert_eq!(secondary.optimization_level, "3");
    }

    #[test]
    fn flags_override_config_file() {
        let path = std::env::temp_dir().join(format!("rq_cli_config_{}.txt", std::process::id()));
        std::fs::write(
            &path,
            "COMPILER1=qiskit\nVERSION1=1.0\nOPT1=1\nBACKEND=FakeAthensV2\nNUM_RUNS=3\nCOMPILER2=pytket\nVERSION2=2.7.0\nOPT2=2\n",
        )
        .expect("write config");
        let args = ConfigArgs {
            config: Some(path.clone()),
            version1: Some("0.45.0".to_string()),
            compiler2: Some(String::new()),
            ..ConfigArgs::default()
        };
        let config = resolve_config(&args).expect("config");
        assert_eq!(config.primary.version, "0.45.0");
        assert_eq!(config.primary.backend_target, "FakeAthensV2");
        assert!(config.secondary.is_none());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn error_envelope_carries_code_and_message() {
        let value = json_error("pinned_install_failed", "no such version".to_string(), json!({}));
        assert_eq!(value["ok"], json!(false));
        assert_eq!(value["error"]["code"], json!("pinned_install_failed"));
        assert_eq!(value["error"]["message"], json!("no such version"));
    }

    #[test]
    fn missing_configuration_maps_to_its_exit_code() {
        let err = resolve_config(&ConfigArgs::default()).expect_err("no config");
        assert_eq!(err.code(), "configuration_unavailable");
        assert_eq!(err.exit_code(), 2);
    }
}
