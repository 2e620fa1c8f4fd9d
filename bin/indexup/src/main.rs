//! indexup deploys the Index contract suite and hands the index over to its admin.

mod cli;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::Table;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use cli::{Cli, Command, OutputFormat};
use indexup_deploy::{
    ArtifactStore, CONFIG_FILENAME, Config, ConfigHash, DeploySettings, Deployment,
    DeploymentConfigHash, DeploymentFailure, DeploymentRecord, ExecutionEnvironment,
    FailureRecord, MemoryEnvironment, NetworkId, Orchestrator, Outcome, RpcEnvironment,
};

/// Network id of the in-memory chain when the configuration accepts any network.
const DRY_RUN_NETWORK_ID: u64 = 2018;

/// Chain id of the in-memory chain, as reported by local development nodes.
const DRY_RUN_CHAIN_ID: u64 = 1337;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Deploy { dry_run, format } => deploy(&config, dry_run, format).await,
        Command::SolcSettings => {
            let settings = serde_json::to_string_pretty(&config.compiler.solc_settings())
                .context("Failed to serialize solc settings")?;
            println!("{settings}");
            Ok(())
        }
        Command::ShowConfig => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

/// Layer defaults, the TOML file and `INDEXUP_*` environment variables.
fn load_config(path: Option<&Path>) -> Result<Config> {
    let config_path = match path {
        Some(path) if !path.exists() => {
            anyhow::bail!("Configuration file or directory not found: {}", path.display());
        }
        Some(path) if path.is_dir() => path.join(CONFIG_FILENAME),
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(CONFIG_FILENAME),
    };

    let config: Config = Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(&config_path))
        .merge(Env::prefixed("INDEXUP_").split("__"))
        .extract()
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;

    tracing::debug!(
        config_path = %config_path.display(),
        network_id = %config.network.network_id,
        artifacts = %config.artifacts.display(),
        "Configuration resolved"
    );
    Ok(config)
}

async fn deploy(config: &Config, dry_run: bool, format: OutputFormat) -> Result<()> {
    let settings = DeploySettings::from(config);

    if dry_run {
        let network_id = match config.network.network_id {
            NetworkId::Id(id) => id,
            NetworkId::Any => DRY_RUN_NETWORK_ID,
        };
        tracing::info!(network_id, "Dry run against an in-memory chain");

        let artifacts = ArtifactStore::placeholder();
        let env = MemoryEnvironment::new(DRY_RUN_CHAIN_ID, &artifacts).with_network_id(network_id);
        let orchestrator = Orchestrator::new(env, artifacts, settings);
        return run(&orchestrator, config, None, format).await;
    }

    let artifacts = ArtifactStore::load(&config.artifacts)?;
    let config_hash = DeploymentConfigHash::new(config, &artifacts).compute_hash()?;
    let rpc_url = config.network.rpc_url()?;

    tracing::info!(
        rpc_url = %rpc_url,
        network_id = %config.network.network_id,
        config_hash = %config_hash,
        "Deploying contracts..."
    );

    let env = RpcEnvironment::new(rpc_url)?;
    let orchestrator = Orchestrator::new(env, artifacts, settings);
    run(&orchestrator, config, Some(config_hash), format).await
}

/// Run the deployment, print the result and persist a record when `config_hash` is set.
async fn run<E: ExecutionEnvironment>(
    orchestrator: &Orchestrator<E>,
    config: &Config,
    config_hash: Option<ConfigHash>,
    format: OutputFormat,
) -> Result<()> {
    match orchestrator.deploy_all().await {
        Ok(deployment) => {
            match format {
                OutputFormat::Table => println!("{}", deployment_table(&deployment)),
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&deployment)
                        .context("Failed to serialize deployment")?
                ),
            }

            if let Some(config_hash) = config_hash {
                DeploymentRecord::new(config_hash, &deployment).save(&config.outdata)?;
            }
            Ok(())
        }
        Err(failure) => {
            let record = FailureRecord::new(config_hash.clone().unwrap_or_default(), &failure);
            match format {
                OutputFormat::Table => eprintln!("{}", trail_table(&failure)),
                OutputFormat::Json => eprintln!(
                    "{}",
                    serde_json::to_string_pretty(&record)
                        .context("Failed to serialize failure record")?
                ),
            }

            if config_hash.is_some() {
                record.save(&config.outdata)?;
            }
            Err(failure.into())
        }
    }
}

fn deployment_table(deployment: &Deployment) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Contract", "Role", "Address"]);
    for (contract, address) in deployment.addresses.contracts() {
        let role = contract.role().map(|r| r.key()).unwrap_or("-");
        table.add_row(vec![contract.to_string(), role.to_string(), address.to_string()]);
    }
    table.add_row(vec![
        "Index owner".to_string(),
        "-".to_string(),
        deployment.owner.to_string(),
    ]);
    table.add_row(vec![
        "Gas used".to_string(),
        "-".to_string(),
        deployment.gas.gas_used.to_string(),
    ]);
    if let (Some(price), Some(cost)) = (deployment.gas.gas_price_gwei, deployment.gas.cost_eth()) {
        table.add_row(vec![format!("Cost at {price} gwei"), "-".to_string(), cost]);
    }
    table
}

fn trail_table(failure: &DeploymentFailure) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Step", "Phase", "Operation", "Status", "Detail"]);
    for record in &failure.trail.records {
        let (status, detail) = match &record.outcome {
            Outcome::Submitted { tx_hash } => ("submitted", tx_hash.to_string()),
            Outcome::Confirmed {
                address: Some(address),
                ..
            } => ("confirmed", address.to_string()),
            Outcome::Confirmed {
                tx_hash: Some(tx_hash),
                gas_used: Some(gas_used),
                ..
            } => ("confirmed", format!("{tx_hash} (gas {gas_used})")),
            Outcome::Confirmed {
                tx_hash: Some(tx_hash),
                ..
            } => ("confirmed", tx_hash.to_string()),
            Outcome::Confirmed { .. } => ("confirmed", String::new()),
            Outcome::Failed { reason } => ("failed", reason.clone()),
        };
        table.add_row(vec![
            record.phase.number().to_string(),
            record.phase.to_string(),
            record.operation.to_string(),
            status.to_string(),
            detail,
        ]);
    }
    table
}
