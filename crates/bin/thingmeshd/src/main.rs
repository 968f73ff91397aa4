//! # thingmeshd — thingmesh daemon
//!
//! Composition root that wires the thing runtime to its adapters and runs
//! a node until interrupted.
//!
//! ## Responsibilities
//! - Parse configuration (config file, env vars)
//! - Initialize logging
//! - Check the coercion table before anything converts a value
//! - Open the configured state store (file or `SQLite`)
//! - Host the demo light bulb locally and on the loopback transport
//! - Persist the local technology and its things under one name
//! - Close the state manager on Ctrl-C so the final state is written
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer — no domain logic belongs here.

mod config;

use std::sync::Arc;

use thingmesh_adapter_loopback::LoopbackNetwork;
use thingmesh_app::codec::JsonCodec;
use thingmesh_app::executor::Executor;
use thingmesh_app::local::{LocalTechnology, LocalThingBuilder};
use thingmesh_app::persistence::{NestedStateManager, PersistentStateManager};
use thingmesh_app::ports::{StateStore, Technology};
use thingmesh_app::remote::TransportTechnology;
use thingmesh_app::thing::Thing;
use thingmesh_domain::coerce;
use tracing_subscriber::EnvFilter;

use crate::config::{Backend, Config};

/// Name the node's state is managed under.
const NODE_STATE: &str = "node";

fn demo_bulb(executor: &Executor) -> Thing {
    LocalThingBuilder::dimmable_light()
        .name("Light Bulb")
        .manufacturer("Acme, Inc.")
        .model("LB01")
        .build(executor)
}

/// A running node.
struct Daemon<S> {
    manager: PersistentStateManager<S, JsonCodec>,
    bulb: Option<Thing>,
    _local: Arc<LocalTechnology>,
    _transport: Arc<TransportTechnology>,
}

async fn start<S>(config: &Config, executor: Executor, store: S) -> anyhow::Result<Daemon<S>>
where
    S: StateStore + 'static,
{
    coerce::verify_table()?;
    let manager = PersistentStateManager::open(store, JsonCodec, executor.clone()).await?;
    let node = NestedStateManager::new();

    let local = LocalTechnology::new(executor.clone());
    node.start_managing("local", local.clone())?;

    let network = LoopbackNetwork::new();
    let transport = TransportTechnology::new(executor.clone(), network.join(&config.node.authority)?);

    let bulb = if config.demo.bulb_enabled {
        let bulb = demo_bulb(&executor);
        local.host(&bulb)?;
        transport.host(&bulb)?;
        node.start_managing("bulb", Arc::new(bulb.clone()))?;
        tracing::info!(uri = %transport.native_uri_for_thing(&bulb)?, "demo bulb hosted");
        Some(bulb)
    } else {
        None
    };

    manager.start_managing(NODE_STATE, node)?;
    Ok(Daemon {
        manager,
        bulb,
        _local: local,
        _transport: transport,
    })
}

async fn run<S>(config: &Config, executor: Executor, store: S) -> anyhow::Result<()>
where
    S: StateStore + 'static,
{
    let daemon = start(config, executor, store).await?;
    tracing::info!(authority = %config.node.authority, "thingmeshd running");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    daemon.manager.close().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.logging.filter))
        .init();

    let executor = Executor::current()?;
    match config.storage.backend {
        Backend::File => {
            let store = thingmesh_adapter_storage_file::Config {
                path: config.storage.path.clone(),
            }
            .build()?;
            run(&config, executor, store).await
        }
        Backend::Sqlite => {
            let store = thingmesh_adapter_storage_sqlite_sqlx::Config {
                database_url: config.storage.database_url.clone(),
                store_name: config.storage.store_name.clone(),
            }
            .build()
            .await?;
            run(&config, executor, store).await
        }
    }
}

#[cfg(test)]
mod tests {
    use thingmesh_app::persistence::MemoryStateStore;
    use thingmesh_domain::catalog::{base, level};

    use super::*;

    #[tokio::test]
    async fn should_describe_demo_bulb() {
        let bulb = demo_bulb(&Executor::current().unwrap());
        let name = bulb.fetch_property(&base::META_NAME).await.unwrap();
        let manufacturer = bulb.fetch_property(&base::META_MANUFACTURER).await.unwrap();
        let model = bulb.fetch_property(&base::META_MODEL).await.unwrap();
        assert_eq!(name.as_deref(), Some("Light Bulb"));
        assert_eq!(manufacturer.as_deref(), Some("Acme, Inc."));
        assert_eq!(model.as_deref(), Some("LB01"));
    }

    #[tokio::test]
    async fn should_restore_bulb_when_restarted() {
        let config = Config::default();
        let store = MemoryStateStore::new();
        let executor = Executor::current().unwrap();

        let daemon = start(&config, executor.clone(), store.clone()).await.unwrap();
        let bulb = daemon.bulb.clone().unwrap();
        bulb.set_property(&level::STAT_VALUE, 0.75).await.unwrap();
        daemon.manager.close().await.unwrap();
        drop(daemon);

        let daemon = start(&config, executor, store).await.unwrap();
        let bulb = daemon.bulb.clone().unwrap();
        assert_eq!(bulb.cached_property(&level::STAT_VALUE).unwrap(), Some(0.75));
        daemon.manager.close().await.unwrap();
    }
}
