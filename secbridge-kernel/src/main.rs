/**
 * SECBRIDGE - Point d'entrée du batch de réconciliation
 *
 * RÔLE : charge la configuration, ouvre la base de mapping, branche les
 * clients Livestatus et MantisBT puis exécute une passe complète.
 *
 * CODES DE SORTIE :
 *   0 passe terminée (même si des hôtes ont échoué, cf. logs)
 *   1 échec d'initialisation (base, client HTTP)
 *   2 configuration illisible ou invalide
 */

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use secbridge_kernel::config::{default_config_path, load_config, BridgeConfig};
use secbridge_kernel::monitoring::LivestatusClient;
use secbridge_kernel::tracker::MantisClient;
use secbridge_kernel::{EngineSettings, MappingStore, ReconciliationEngine};

const EXIT_INIT: u8 = 1;
const EXIT_CONFIG: u8 = 2;

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Run { config_path: PathBuf },
    Help,
}

fn usage() -> &'static str {
    "Usage: secbridge [-c|--configuration-file PATH]\n\
     \n\
     Opens, updates and closes MantisBT issues from the security updates check.\n\
     \n\
     Options:\n  \
       -c, --configuration-file PATH  configuration file (default: $SECBRIDGE_CONFIG or /etc/secbridge.yaml)\n  \
       -h, --help                     print this help\n"
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Command, String> {
    let args = args.into_iter().collect::<Vec<_>>();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        return Ok(Command::Help);
    }

    let mut config_path: Option<PathBuf> = None;
    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "-c" | "--configuration-file" => {
                i += 1;
                let v = args.get(i).ok_or("--configuration-file requires PATH")?;
                config_path = Some(PathBuf::from(v));
            }
            other => {
                if let Some(v) = other.strip_prefix("--configuration-file=") {
                    config_path = Some(PathBuf::from(v));
                } else {
                    return Err(format!("unknown argument: {other}"));
                }
            }
        }
        i += 1;
    }

    Ok(Command::Run {
        config_path: config_path.unwrap_or_else(default_config_path),
    })
}

fn build_engine(cfg: &BridgeConfig) -> Result<ReconciliationEngine> {
    let templates = cfg.templates.compile().context("invalid message templates")?;
    let store = MappingStore::open(&cfg.database.path)
        .with_context(|| format!("cannot open mapping store {}", cfg.database.path.display()))?;
    let tracker = MantisClient::from_config(&cfg.tracker).context("cannot build MantisBT client")?;
    let monitoring = LivestatusClient::from_config(&cfg.monitoring);

    Ok(ReconciliationEngine::new(
        Box::new(monitoring),
        Box::new(tracker),
        store,
        templates,
        EngineSettings::from_config(cfg),
    ))
}

fn main() -> ExitCode {
    // .env optionnel (token du tracker)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("secbridge=info,secbridge_kernel=info")),
        )
        .init();

    let config_path = match parse_args(std::env::args().skip(1)) {
        Ok(Command::Help) => {
            print!("{}", usage());
            return ExitCode::SUCCESS;
        }
        Ok(Command::Run { config_path }) => config_path,
        Err(e) => {
            eprintln!("{e}\n\n{}", usage());
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let cfg = match load_config(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(path = %config_path.display(), error = %e, "configuration error");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let engine = match build_engine(&cfg) {
        Ok(engine) => engine,
        Err(e) => {
            error!("initialization failed: {e:#}");
            return ExitCode::from(EXIT_INIT);
        }
    };

    info!(path = %config_path.display(), "secbridge run starting");
    let report = engine.run();
    if report.failed > 0 || report.failed_queries > 0 {
        info!(failed = report.failed, failed_queries = report.failed_queries, "run completed with failures");
    }
    ExitCode::SUCCESS
}
