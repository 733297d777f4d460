//! Main reconciler for ReplicatedShard resources
//!
//! Implements the controller pattern using kube-rs runtime. Each reconcile
//! runs one drain pass for the shard; kube-rs never runs two reconciles for the
//! same object at once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use kube::{
    api::Api,
    client::Client,
    runtime::{
        controller::{Action, Controller},
        watcher::Config,
    },
    ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use crate::crd::ReplicatedShard;
use crate::error::{Error, Result};

use super::drain::DrainReconciler;

#[cfg(feature = "metrics")]
const CONTROLLER_NAME: &str = "replicatedshard";

/// Shared state for the controller
pub struct ControllerState {
    pub client: Client,
    pub drain: DrainReconciler,
    /// Set by leader election; only the leader acts on drains
    pub is_leader: Arc<AtomicBool>,
    /// Regular interval between passes when nothing asks for sooner
    pub resync_interval: Duration,
}

/// Main entry point to start the controller
pub async fn run_controller(state: Arc<ControllerState>, namespace: Option<String>) -> Result<()> {
    let client = state.client.clone();
    let shards: Api<ReplicatedShard> = match &namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    info!("Starting ReplicatedShard controller");

    // Verify CRD exists
    match shards.list(&Default::default()).await {
        Ok(_) => info!("ReplicatedShard CRD is available"),
        Err(e) => {
            error!(
                "ReplicatedShard CRD not found. Please install the CRD first: {:?}",
                e
            );
            return Err(Error::ConfigError(
                "ReplicatedShard CRD not installed".to_string(),
            ));
        }
    }

    // Pods are not watched. Drain requests are picked up on the resync.
    Controller::new(shards, Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("Reconciled: {:?}", obj),
                Err(e) => error!("Reconcile error: {:?}", e),
            }
        })
        .await;

    Ok(())
}

/// The main reconciliation function
///
/// This function is called whenever:
/// - A ReplicatedShard is created or updated
/// - The requeue timer expires
#[instrument(skip(ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<ReplicatedShard>, ctx: Arc<ControllerState>) -> Result<Action> {
    if !ctx.is_leader.load(Ordering::Relaxed) {
        debug!("Not the leader, skipping drain pass");
        return Ok(Action::requeue(ctx.resync_interval));
    }

    if let Err(errors) = obj.spec.validate() {
        for e in &errors {
            warn!(
                "Invalid ReplicatedShard {}: {}: {}",
                obj.name_any(),
                e.field,
                e.message
            );
        }
        return Err(Error::ConfigError(format!(
            "ReplicatedShard {} has {} invalid field(s)",
            obj.name_any(),
            errors.len()
        )));
    }

    let started = Instant::now();
    let result = ctx.drain.reconcile_drain(&obj).await;

    #[cfg(feature = "metrics")]
    {
        super::metrics::observe_reconcile_duration_seconds(
            CONTROLLER_NAME,
            started.elapsed().as_secs_f64(),
        );
        if let Err(e) = &result {
            super::metrics::inc_reconcile_error(CONTROLLER_NAME, e.metric_label());
        }
    }
    #[cfg(not(feature = "metrics"))]
    debug!("Drain pass took {:?}", started.elapsed());

    let requeue = result?;
    Ok(Action::requeue(next_pass(requeue, ctx.resync_interval)))
}

/// The requested delay, capped at the resync interval
fn next_pass(requested: Option<Duration>, resync_interval: Duration) -> Duration {
    requested
        .map(|d| d.min(resync_interval))
        .unwrap_or(resync_interval)
}

/// Error policy determines how to handle reconciliation errors
fn error_policy(shard: Arc<ReplicatedShard>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    error!("Reconciliation error for {}: {:?}", shard.name_any(), error);
    Action::requeue(retry_delay(error))
}

/// Use shorter retry for retriable errors
fn retry_delay(error: &Error) -> Duration {
    if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_pass_prefers_sooner_request() {
        let resync = Duration::from_secs(30);
        assert_eq!(next_pass(None, resync), resync);
        assert_eq!(
            next_pass(Some(Duration::from_secs(10)), resync),
            Duration::from_secs(10)
        );
        assert_eq!(next_pass(Some(Duration::from_secs(90)), resync), resync);
    }

    #[test]
    fn test_retry_delay_by_error_kind() {
        assert_eq!(
            retry_delay(&Error::RpcError("unavailable".to_string())),
            Duration::from_secs(15)
        );
        assert_eq!(
            retry_delay(&Error::UnsupportedDowngrade("8.0.30 to 8.0.20".to_string())),
            Duration::from_secs(60)
        );
    }
}
