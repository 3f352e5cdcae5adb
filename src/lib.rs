pub mod bans;
pub mod cache;
pub mod commands;
pub mod config;
pub mod db;
pub mod discord;
pub mod dispatch;
pub mod error;
pub mod expiring;
pub mod ledger;
pub mod model;
pub mod notice;
pub mod platform;
pub mod registry;
pub mod relay;
pub mod router;
pub mod thread;

use crate::bans::BanGate;
use crate::cache::MemoCache;
use crate::commands::Commands;
use crate::db::Pool;
use crate::dispatch::DispatchGateway;
use crate::ledger::MessageLedger;
use crate::platform::Platform;
use crate::registry::LinkRegistry;
use crate::relay::RelayEngine;
use crate::router::Router;
use std::sync::Arc;
use std::time::Duration;

/// Every service, constructed once and shared by reference.
pub struct Wormhole {
    pub registry: Arc<LinkRegistry>,
    pub bans: Arc<BanGate>,
    pub ledger: Arc<MessageLedger>,
    pub gateway: Arc<DispatchGateway>,
    pub relay: Arc<RelayEngine>,
    pub commands: Arc<Commands>,
    pub router: Router,
}

impl Wormhole {
    pub fn new(
        pool: Pool,
        platform: Arc<dyn Platform>,
        relay: &config::Relay,
        caches: &config::Cache,
    ) -> Self {
        let invite_ttl = Duration::from_secs(relay.invite_ttl_secs);
        let proxies = Arc::new(MemoCache::new(caches.proxies));

        let registry = Arc::new(LinkRegistry::new(
            pool.clone(),
            platform.clone(),
            proxies.clone(),
            caches,
            invite_ttl,
        ));
        let bans = Arc::new(BanGate::new(pool.clone(), platform.clone(), caches.bans));
        let ledger = Arc::new(MessageLedger::new(pool));
        let gateway = Arc::new(DispatchGateway::new(
            platform.clone(),
            proxies,
            relay.proxy_name.clone(),
        ));
        let engine = Arc::new(RelayEngine::new(
            registry.clone(),
            bans.clone(),
            ledger.clone(),
            gateway.clone(),
            platform.clone(),
            relay.clone(),
        ));
        let commands = Arc::new(Commands::new(
            registry.clone(),
            bans.clone(),
            ledger.clone(),
            platform.clone(),
            invite_ttl,
        ));
        let router = Router::new(
            engine.clone(),
            registry.clone(),
            bans.clone(),
            commands.clone(),
            platform,
        );
        Self {
            registry,
            bans,
            ledger,
            gateway,
            relay: engine,
            commands,
            router,
        }
    }
}
