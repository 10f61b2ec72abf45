use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use spindle_aggregate::{Application, ApplicationProvider, RecordBatch, ServiceRecord};
use spindle_annotate::{manifest, Annotator, DeployDescription, DeployStrategy, RolloutStrategy, Traffic};
use spindle_core::{Artifact, Moniker};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "spindlectl", version, about = "Spindle CLI: monikers, artifacts and application views")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum StrategyArg { Apply, Recreate, Replace, ServerSideApply, ServerSideApplyForce }

impl From<StrategyArg> for DeployStrategy {
    fn from(v: StrategyArg) -> Self {
        match v {
            StrategyArg::Apply => DeployStrategy::Apply,
            StrategyArg::Recreate => DeployStrategy::Recreate,
            StrategyArg::Replace => DeployStrategy::Replace,
            StrategyArg::ServerSideApply => DeployStrategy::ServerSideApply { force_conflicts: false },
            StrategyArg::ServerSideApplyForce => DeployStrategy::ServerSideApply { force_conflicts: true },
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum RolloutArg { Highlander, RedBlack, BlueGreen }

impl From<RolloutArg> for RolloutStrategy {
    fn from(v: RolloutArg) -> Self {
        match v {
            RolloutArg::Highlander => RolloutStrategy::Highlander,
            RolloutArg::RedBlack => RolloutStrategy::RedBlack,
            RolloutArg::BlueGreen => RolloutStrategy::BlueGreen,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the moniker derived for a manifest
    Moniker {
        /// Manifest file (YAML or JSON)
        file: String,
    },
    /// Write moniker, artifact, traffic and strategy annotations into a manifest
    Annotate {
        file: String,
        #[arg(long)]
        app: String,
        #[arg(long)]
        cluster: Option<String>,
        #[arg(long)]
        stack: Option<String>,
        #[arg(long)]
        detail: Option<String>,
        #[arg(long)]
        sequence: Option<i64>,
        #[arg(long = "artifact-type")]
        artifact_type: Option<String>,
        #[arg(long = "artifact-name")]
        artifact_name: Option<String>,
        #[arg(long = "artifact-location")]
        artifact_location: Option<String>,
        #[arg(long = "artifact-version")]
        artifact_version: Option<String>,
        /// Load balancer routing to this resource (repeatable)
        #[arg(long = "load-balancer", action = ArgAction::Append)]
        load_balancers: Vec<String>,
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,
    },
    /// Print the artifact a manifest was deployed from
    Artifact {
        file: String,
        /// Account the manifest was read from
        #[arg(long, default_value = "default")]
        account: String,
    },
    /// Print traffic, caching and strategy settings
    Policy {
        file: String,
    },
    /// Check annotations against a requested rollout
    Validate {
        file: String,
        #[arg(long, value_enum)]
        rollout: Option<RolloutArg>,
    },
    /// Aggregate service records (JSON array) into applications
    Apps {
        /// Records file
        records: String,
        /// Include per-account service names
        #[arg(long, action = ArgAction::SetTrue)]
        expand: bool,
        /// Fold account/region shards concurrently
        #[arg(long, action = ArgAction::SetTrue)]
        parallel: bool,
    },
    /// Look up one application by exact name
    App {
        records: String,
        name: String,
    },
}

fn init_tracing() {
    let env = std::env::var("SPINDLE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("SPINDLE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid SPINDLE_METRICS_ADDR; expected host:port");
        }
    }
}

fn load_manifest(path: &str) -> Result<(serde_json::Value, spindle_core::Manifest)> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading manifest {}", path))?;
    manifest::parse_document(&text).with_context(|| format!("loading manifest {}", path))
}

fn load_records(path: &str) -> Result<Arc<RecordBatch>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading records {}", path))?;
    let records: Vec<ServiceRecord> = serde_json::from_str(&text).with_context(|| format!("parsing records {}", path))?;
    let batch: RecordBatch = records.into_iter().collect();
    info!(records = batch.len(), "loaded service records");
    Ok(Arc::new(batch))
}

fn emit<T: Serialize>(output: Output, value: &T, human: impl FnOnce(&T)) -> Result<()> {
    match output {
        Output::Human => human(value),
        Output::Json => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

fn or_dash(v: &Option<String>) -> &str { v.as_deref().unwrap_or("-") }

fn print_moniker(m: &Moniker) {
    let seq = m.sequence.map(|s| s.to_string()).unwrap_or_else(|| "-".into());
    println!("app={} cluster={} stack={} detail={} sequence={}", or_dash(&m.app), or_dash(&m.cluster), or_dash(&m.stack), or_dash(&m.detail), seq);
}

fn print_application(app: &Application) {
    println!("{}", app.name);
    for (account, names) in &app.cluster_names {
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        println!("  {} • {}", account, names.join(", "));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let annotator = Annotator::new();

    match cli.command {
        Commands::Moniker { file } => {
            let (_, m) = load_manifest(&file)?;
            emit(cli.output, &annotator.get_moniker(&m), print_moniker)?;
        }
        Commands::Annotate {
            file, app, cluster, stack, detail, sequence,
            artifact_type, artifact_name, artifact_location, artifact_version,
            load_balancers, strategy,
        } => {
            let (mut doc, mut m) = load_manifest(&file)?;
            let moniker = Moniker { app: Some(app), cluster, stack, detail, sequence };
            annotator.set_moniker(&mut m, &moniker)?;
            let artifact = artifact_type.map(|t| Artifact {
                artifact_type: Some(t),
                name: artifact_name,
                location: artifact_location,
                version: artifact_version,
                ..Artifact::default()
            });
            annotator.set_artifact(&mut m, artifact.as_ref())?;
            if !load_balancers.is_empty() {
                annotator.set_traffic(&mut m, &Traffic { load_balancers })?;
            }
            if let Some(s) = strategy {
                annotator.set_deploy_strategy(&mut m, s.into());
            }
            manifest::write_back(&mut doc, &m);
            match cli.output {
                Output::Human => print!("{}", serde_yaml::to_string(&doc)?),
                Output::Json => println!("{}", serde_json::to_string_pretty(&doc)?),
            }
        }
        Commands::Artifact { file, account } => {
            let (_, m) = load_manifest(&file)?;
            match annotator.get_artifact(&m, &account) {
                Some(a) => emit(cli.output, &a, |a| {
                    println!("{} {} {} (location: {})", or_dash(&a.artifact_type), or_dash(&a.name), or_dash(&a.version), or_dash(&a.location));
                })?,
                None => match cli.output {
                    Output::Human => println!("no artifact recorded"),
                    Output::Json => println!("null"),
                },
            }
        }
        Commands::Policy { file } => {
            let (_, m) = load_manifest(&file)?;
            let policy = serde_json::json!({
                "traffic": annotator.get_traffic(&m),
                "caching": annotator.get_caching_properties(&m),
                "strategy": annotator.get_strategy(&m),
            });
            emit(cli.output, &policy, |p| {
                for (k, v) in p.as_object().into_iter().flatten() {
                    println!("{}: {}", k, v);
                }
            })?;
        }
        Commands::Validate { file, rollout } => {
            let (_, m) = load_manifest(&file)?;
            let deploy = DeployDescription { rollout: rollout.map(Into::into) };
            if let Err(e) = annotator.validate_rollout_constraints(&m, &deploy) {
                error!(error = %e, file = %file, "validation failed");
                return Err(e.into());
            }
            println!("ok");
        }
        Commands::Apps { records, expand, parallel } => {
            let cache = load_records(&records)?;
            let provider = ApplicationProvider::new(cache.clone(), cache);
            let apps = if parallel { provider.applications_parallel(expand).await? } else { provider.applications(expand)? };
            emit(cli.output, &apps.into_vec(), |apps| apps.iter().for_each(print_application))?;
        }
        Commands::App { records, name } => {
            let cache = load_records(&records)?;
            let provider = ApplicationProvider::new(cache.clone(), cache);
            let app = provider.application(&name)?.ok_or_else(|| anyhow!("application {} not found", name))?;
            emit(cli.output, &app, print_application)?;
        }
    }
    Ok(())
}
