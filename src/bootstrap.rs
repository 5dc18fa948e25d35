// twinme_core/src/bootstrap.rs
use std::sync::Arc;

use ds::DeliveryService;
use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ContextConfig;
use crate::context::Context;

#[derive(Clone, Debug, Default)]
pub struct BootstrapConfig {
    pub context: ContextConfig,
}

impl BootstrapConfig {
    /// Defaults overridden by the `TWINME_*` environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        use anyhow::Context;

        let context = ContextConfig::from_env().context("Invalid context configuration")?;
        Ok(Self { context })
    }
}

pub struct Bootstrap {
    pub context: Arc<Context>,
    /// Stops the scheduler and the event pump
    pub cancel: CancellationToken,
    pub scheduler: JoinHandle<()>,
    pub event_pump: JoinHandle<()>,
}

impl Bootstrap {
    /// Cancel live actions, then stop both background tasks.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.context.cancel_all();
        self.cancel.cancel();
        self.scheduler.await?;
        self.event_pump.await?;
        info!("[shutdown]: core stopped");
        Ok(())
    }
}

/// Build a context on `delivery`, then spawn the timeout scheduler and the
/// task forwarding transport events into the context.
pub fn bootstrap_core(cfg: BootstrapConfig, delivery: Arc<dyn DeliveryService>) -> Bootstrap {
    let events = delivery.subscribe();
    let context = Context::new(cfg.context, delivery);
    let cancel = CancellationToken::new();

    let scheduler = tokio::spawn(context.clone().run_scheduler(cancel.clone()));
    let event_pump = tokio::spawn(context.clone().run_event_pump(events, cancel.clone()));

    info!(
        "[bootstrap_core]: core started (default timeout {:?})",
        context.config().default_timeout
    );
    Bootstrap {
        context,
        cancel,
        scheduler,
        event_pump,
    }
}

pub fn bootstrap_core_from_env(delivery: Arc<dyn DeliveryService>) -> anyhow::Result<Bootstrap> {
    let cfg = BootstrapConfig::from_env()?;
    Ok(bootstrap_core(cfg, delivery))
}
