// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod keyspace;
pub mod liveness;
pub mod logging;
pub mod model;
pub mod notify;
pub mod router;
pub mod store;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::load_and_validate;
use crate::config::FleetConfig;
use crate::dag::{validate_dependencies, DependencyGraph, GraphValidation};
use crate::engine::{Collaborators, Fleet, FleetService, RuntimeEvent};
use crate::keyspace::{DescriptorEstimator, KeyspaceEstimator, Partition};
use crate::notify::TracingNotifier;
use crate::router::MemoryLanes;
use crate::store::MemoryStore;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - in-memory store and lanes
/// - router, registry, liveness monitor and coordinator
/// - the service loop and Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let collaborators = Collaborators {
        store: Arc::new(MemoryStore::new()),
        lanes: Arc::new(MemoryLanes::unbounded()),
        notifier: Arc::new(TracingNotifier),
        estimator: Arc::new(DescriptorEstimator),
    };
    let fleet = Fleet::new(&cfg.settings, collaborators);
    let service = FleetService::start(fleet.clone());

    for definition in &cfg.campaigns {
        let campaign = fleet.coordinator.create_campaign(definition).await?;
        service
            .send(RuntimeEvent::StartCampaign(campaign.id))
            .await?;
    }
    info!(campaigns = cfg.campaigns.len(), "campaigns submitted; waiting for agents");

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received; shutting down");
    service.shutdown().await?;
    Ok(())
}

/// Print each campaign's attacks, graph validity, plan order and task
/// counts.
fn print_dry_run(cfg: &FleetConfig) {
    let settings = &cfg.settings;
    println!("fleetsched dry-run");
    println!("  scheduler.task_size = {}", settings.task_size);
    println!("  scheduler.lease = {}s", settings.router.lease.num_seconds());
    println!("  scheduler.max_attempts = {}", settings.router.max_attempts);
    println!(
        "  scheduler.max_tasks_per_attack = {}",
        settings.max_tasks_per_attack
    );
    println!(
        "  liveness.sweep_interval = {}s",
        settings.liveness.sweep_interval.as_secs()
    );
    println!(
        "  liveness.offline_threshold = {}s",
        settings.liveness.offline_threshold.num_seconds()
    );
    println!();

    println!("campaigns ({}):", cfg.campaigns.len());
    for campaign in &cfg.campaigns {
        println!("  - {} [{}]", campaign.name, campaign.priority);

        let deps: Vec<&[usize]> = campaign.attacks.iter().map(|a| a.deps.as_slice()).collect();
        match validate_dependencies(&deps) {
            GraphValidation::Valid => {
                let graph = DependencyGraph::from_deps(&deps);
                if let Some(order) = graph.plan_order() {
                    println!("      plan order: {order:?}");
                }
            }
            GraphValidation::Invalid { cycle } => {
                println!("      INVALID: dependency cycle through positions {cycle:?}");
            }
        }

        for (position, attack) in campaign.attacks.iter().enumerate() {
            println!("      {position}: {} ({})", attack.name, attack.keyspace.mode());
            if !attack.deps.is_empty() {
                println!("         after: {:?}", attack.deps);
            }
            match DescriptorEstimator.total(&attack.keyspace) {
                Ok(total) => println!(
                    "         keyspace: {total}, tasks: {}",
                    Partition::new(total, settings.task_size).remaining()
                ),
                Err(err) => println!("         keyspace: {err}"),
            }
        }
    }

    debug!("dry-run complete (nothing scheduled)");
}
