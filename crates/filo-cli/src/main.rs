use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use filo_exec::engine::{Engine, ExecTiming};
use filo_exec::operator::{Operator, Request, Response};
use filo_fc::decode::TelemetryDecoder;
use filo_fc::ingest::run_ingest;
use filo_fc::link::FcLink;
use filo_fc::state::FlightStateHandle;
use filo_fc::watchdog::{run_watchdog, WatchdogConfig};
use filo_fc::FcConfig;
use filo_program::{doctor as program_doctor, parse, validate, Program, SafetyPolicy};
use filo_proto::telemetry::TelemetrySample;

use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "filo", version, about = "FILO - drone macro runner and manual control bridge")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sanity-check the config file.
    Doctor,
    /// Parse and validate a macro program offline.
    Check {
        file: String,
        /// Battery level to validate against, percent.
        #[arg(long, default_value_t = 100)]
        battery: u8,
    },
    /// Open the FC link and serve operator requests (JSON lines on stdin).
    Run,
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    fc: FcConfig,
    #[serde(default)]
    safety: SafetyPolicy,
    #[serde(default)]
    watchdog: WatchdogConfig,
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
    toml::from_str(&s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Check { file, battery } => check(&cfg, &file, battery)?,
        Command::Run => run(&cfg).await?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    program_doctor::check_policy(&cfg.safety)?;

    anyhow::ensure!(!cfg.fc.serial_dev.trim().is_empty(), "fc.serial_dev missing");
    anyhow::ensure!(cfg.fc.baud > 0, "fc.baud invalid");
    anyhow::ensure!(!cfg.fc.arm_timeout().is_zero(), "fc.arm_timeout_ms must be > 0");
    if !std::path::Path::new(&cfg.fc.serial_dev).exists() {
        warn!("doctor: serial device {} not present (ok if the FC is unplugged)", cfg.fc.serial_dev);
    }

    anyhow::ensure!(cfg.watchdog.period_ms > 0, "watchdog.period_ms must be > 0");
    anyhow::ensure!(
        cfg.watchdog.timeout_ms > cfg.watchdog.period_ms,
        "watchdog.timeout_ms must exceed watchdog.period_ms"
    );

    info!("doctor: OK");
    Ok(())
}

#[derive(serde::Serialize)]
struct CheckReport<'a> {
    program: &'a Program,
    estimated_flight_time: f32,
    #[serde(flatten)]
    report: filo_program::ValidationReport,
}

fn check(cfg: &Config, file: &str, battery: u8) -> Result<()> {
    program_doctor::check_policy(&cfg.safety).context("invalid [safety] policy")?;
    let src = std::fs::read_to_string(file).with_context(|| format!("read program {}", file))?;
    let program: Program = parse(&src, &cfg.safety).collect();
    let telemetry = TelemetrySample { battery_percent: battery, ..Default::default() };
    let report = validate(&program, &telemetry, &cfg.safety);
    let valid = report.valid;
    let n_errors = report.errors.len();

    let out = CheckReport { program: &program, estimated_flight_time: program.estimated_flight_time(), report };
    println!("{}", serde_json::to_string_pretty(&out).context("encode report")?);

    anyhow::ensure!(!program.is_empty(), "no recognized commands in {}", file);
    anyhow::ensure!(valid, "program invalid ({} errors)", n_errors);
    info!("check: {} OK ({} commands)", file, program.len());
    Ok(())
}

async fn run(cfg: &Config) -> Result<()> {
    program_doctor::check_policy(&cfg.safety).context("invalid [safety] policy")?;
    let state = FlightStateHandle::new();

    let (link, reader) = FcLink::open_serial(&cfg.fc.serial_dev, cfg.fc.baud, state.clone())?;
    let link = Arc::new(link);

    let decoder = TelemetryDecoder::new(state.clone());
    tokio::spawn(run_ingest(reader, decoder, cfg.fc.read_backoff()));
    tokio::spawn(run_watchdog(state.clone(), cfg.watchdog.clone()));

    let engine = Arc::new(Engine::new(Arc::clone(&link), cfg.safety.clone(), ExecTiming::default()));
    let operator = Operator::new(link, engine, cfg.safety.clone(), cfg.fc.arm_timeout());

    info!("run: serving operator requests on stdin");
    serve(&operator).await?;

    if let Some(out) = operator.wait_program().await {
        info!("run: program ended {:?} ({} commands)", out.state, out.executed);
    }
    info!("run: bye");
    Ok(())
}

/// One JSON request per stdin line, one JSON response per stdout line.
/// Returns on EOF or Ctrl-C; the latter also stops a running program.
async fn serve(operator: &Operator) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("read stdin")? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let resp = match serde_json::from_str::<Request>(line) {
                    Ok(req) => operator.handle(req).await,
                    Err(e) => Response::error(format!("bad request: {}", e)),
                };
                let mut s = serde_json::to_string(&resp).context("encode response")?;
                s.push('\n');
                stdout.write_all(s.as_bytes()).await.context("write stdout")?;
                stdout.flush().await.context("flush stdout")?;
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("run: interrupted");
                let _ = operator.stop();
                break;
            }
        }
    }
    Ok(())
}
