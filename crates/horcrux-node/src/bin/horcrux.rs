//! `horcrux` CLI: a small front door onto [`horcrux_node::VaultNode`] for
//! manually exercising a node (grounded in the teacher's `aura-cli`
//! `#[tokio::main]` + `clap::Parser` entry point, minus its middleware stack
//! — a social-recovery node has no request pipeline to layer).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use horcrux_identity::Identity;
use horcrux_node::{NodeConfig, VaultNode};
use horcrux_router::{Router, RouterChannels};
use horcrux_store::memory::MemoryStore;

#[derive(Parser)]
#[command(name = "horcrux")]
#[command(about = "Horcrux social-recovery vault node", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML node config. Missing fields fall back to defaults.
    #[arg(short, long, global = true, default_value = "horcrux.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a fresh identity and print its bech32 keys.
    Keygen,

    /// Run a demo lifecycle (vault, stewards, distribution, recovery) against
    /// in-process identities — no real relay required, useful for manually
    /// exercising the engines end to end.
    Demo,

    /// Start a node: connect to the configured relays, subscribe to this
    /// identity's gift wraps, and dispatch every inbound rumor. Runs until
    /// interrupted.
    Run {
        /// Bech32 `nsec...` private key. A fresh identity is generated (and
        /// printed once, so it can be reused) if omitted.
        #[arg(long)]
        nsec: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Keygen => {
            let identity = Identity::generate();
            println!("nsec: {}", identity.export_bech32());
            println!("npub: {}", identity.pubkey_bech32());
        }
        Commands::Demo => run_demo().await?,
        Commands::Run { nsec } => run_node(&cli.config, nsec).await?,
    }
    Ok(())
}

/// A single-process walk through the full vault lifecycle: create a vault,
/// invite stewards, distribute shares, then reconstruct via a recovery
/// ceremony. Doesn't touch the network — every gift wrap is handed straight
/// to the recipient's `VaultNode` in-process, which is enough to exercise
/// every engine without a live relay.
async fn run_demo() -> Result<()> {
    let config = NodeConfig::default();
    let owner = VaultNode::new(Identity::generate(), config.clone(), Arc::new(MemoryStore::new()));
    info!(owner = %owner.pubkey(), "created owner node");

    let now = 1_700_000_000;
    let vault_id = owner.create_vault("demo vault", b"correct horse battery staple".to_vec(), now).await?;
    owner.create_backup_plan(vault_id, 2, vec!["wss://relay.damus.io".into()]).await?;

    let mut stewards = Vec::new();
    for name in ["alice", "bob", "carol"] {
        let identity = Identity::generate();
        let (invitation, link) = owner.invite_steward(vault_id, name, now).await?;
        println!("invite {name}: {}", link.build());
        owner.handle_rsvp(identity.pubkey(), &horcrux_invitation::RsvpPayload {
            invite_code: invitation.invite_code.as_str().to_string(),
            accepted_at: now,
        }).await?;
        stewards.push((name, identity));
    }

    // Split and hand shares to the stewards directly (bypassing relay
    // publish, which this demo never sets up).
    let mut vault = owner.store().get_vault(vault_id).await?.context("vault vanished")?;
    let mut plan = vault.backup_plan.take().context("plan vanished")?;
    let deliveries = horcrux_distribution::prepare_distribution(vault_id, &mut plan, &vault.content)?;
    plan.status = horcrux_core::PlanStatus::Distributed;
    vault.backup_plan = Some(plan);
    owner.store().put_vault(vault).await?;

    let mut steward_nodes = Vec::new();
    for ((_name, identity), delivery) in stewards.iter().zip(deliveries.iter()) {
        let node = VaultNode::new(Identity::import(&identity.export_bech32())?, config.clone(), Arc::new(MemoryStore::new()));
        node.receive_share(delivery.payload.clone()).await?;
        steward_nodes.push(node);
    }
    println!("distributed {} shares at threshold {}", deliveries.len(), 2);

    // Build the recovery request directly rather than through
    // `VaultNode::start_recovery`, which also publishes over the gateway —
    // this demo never connects to a real relay.
    let steward_pubkeys: Vec<_> = stewards.iter().map(|(_, identity)| identity.pubkey()).collect();
    let mut request =
        horcrux_core::RecoveryRequest::new(vault_id, owner.pubkey(), now + 10, None, 2, &steward_pubkeys);
    horcrux_recovery::mark_sent(&mut request);
    let request_id = request.id;
    owner.store().put_recovery_request(request).await?;

    for (steward_node, (_name, identity)) in steward_nodes.iter().zip(stewards.iter()) {
        let shard_data = steward_node.store().get_received_share(vault_id).await?;
        let payload = horcrux_recovery::RecoveryResponsePayload {
            recovery_request_id: request_id,
            vault_id,
            approved: true,
            shard_data,
            responded_at: now + 20,
        };
        if let Some(plaintext) =
            owner.handle_recovery_response(identity.pubkey(), horcrux_core::EventId::from_bytes([0u8; 32]), &payload).await?
        {
            println!("recovered: {}", String::from_utf8_lossy(&plaintext));
            return Ok(());
        }
    }
    anyhow::bail!("recovery did not complete with the configured threshold")
}

/// Start a long-running node: connect to relays, dispatch inbound rumors.
async fn run_node(config_path: &std::path::Path, nsec: Option<String>) -> Result<()> {
    let config = if config_path.exists() {
        NodeConfig::load(config_path).with_context(|| format!("loading {}", config_path.display()))?
    } else {
        NodeConfig::default()
    };

    let identity = match nsec {
        Some(raw) => Identity::import(&raw).context("importing --nsec")?,
        None => {
            let fresh = Identity::generate();
            println!("generated identity, save this to reuse the same vault state: {}", fresh.export_bech32());
            fresh
        }
    };

    let node = Arc::new(VaultNode::new(identity, config, Arc::new(MemoryStore::new())));
    info!(pubkey = %node.pubkey(), relays = ?node.gateway().relay_statuses().await.len(), "starting node");

    let subscription = node.subscription_request();
    let gateway = node.gateway().clone();
    tokio::spawn(gateway.clone().run(subscription));

    // One mpsc channel per engine kind-bucket, all drained into the same
    // `dispatch_rumor` entry point; the router only needs to know which
    // bucket a kind belongs to, not what each engine does with it.
    let (distribution_tx, distribution_rx) = tokio::sync::mpsc::unbounded_channel();
    let (recovery_request_tx, recovery_request_rx) = tokio::sync::mpsc::unbounded_channel();
    let (recovery_response_tx, recovery_response_rx) = tokio::sync::mpsc::unbounded_channel();
    let (invitation_rsvp_tx, invitation_rsvp_rx) = tokio::sync::mpsc::unbounded_channel();
    let (invitation_denial_tx, invitation_denial_rx) = tokio::sync::mpsc::unbounded_channel();
    let (shard_confirmation_tx, shard_confirmation_rx) = tokio::sync::mpsc::unbounded_channel();
    let (steward_removal_tx, steward_removal_rx) = tokio::sync::mpsc::unbounded_channel();

    let channels = RouterChannels {
        distribution: Some(distribution_tx),
        recovery_request: Some(recovery_request_tx),
        recovery_response: Some(recovery_response_tx),
        invitation_rsvp: Some(invitation_rsvp_tx),
        invitation_denial: Some(invitation_denial_tx),
        shard_confirmation: Some(shard_confirmation_tx),
        steward_removal: Some(steward_removal_tx),
    };

    let router_node = node.clone();
    let inbound = gateway.subscribe_inbound();
    tokio::spawn(async move {
        let mut router = Router::new(channels);
        router.run(router_node.identity(), inbound).await;
    });

    macro_rules! spawn_dispatch_loop {
        ($rx:expr) => {{
            let node = node.clone();
            tokio::spawn(async move {
                let mut rx = $rx;
                while let Some(rumor) = rx.recv().await {
                    if let Err(e) = node.dispatch_rumor(rumor).await {
                        tracing::warn!(error = %e, "failed to handle rumor");
                    }
                }
            });
        }};
    }
    spawn_dispatch_loop!(distribution_rx);
    spawn_dispatch_loop!(recovery_request_rx);
    spawn_dispatch_loop!(recovery_response_rx);
    spawn_dispatch_loop!(invitation_rsvp_rx);
    spawn_dispatch_loop!(invitation_denial_rx);
    spawn_dispatch_loop!(shard_confirmation_rx);
    spawn_dispatch_loop!(steward_removal_rx);

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down on ctrl-c");
    Ok(())
}
