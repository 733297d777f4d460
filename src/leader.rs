//! Lease based leader election
//!
//! Only the replica holding the `coordination.k8s.io` Lease reconciles shards.
//! Every write to an existing Lease is a `replace` carrying the
//! `resourceVersion` that was read, so two replicas racing for an expired
//! Lease cannot both win: the loser gets a conflict and keeps waiting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, ObjectMeta, PostParams};
use tracing::{debug, info, warn};

pub const LEASE_NAME: &str = "shard-drain-operator-leader";
pub const LEASE_DURATION_SECS: i32 = 15;
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// What to do with a Lease that was read from the API server
#[derive(Debug, PartialEq, Eq)]
pub enum LeaseDecision {
    /// We hold it
    Renew,
    /// Nobody holds it, or the holder stopped renewing
    TakeOver { previous: Option<String> },
    /// Somebody else holds it
    Wait { holder: String },
}

/// Decide how to treat `lease` at time `now`
pub fn decide(lease: &Lease, identity: &str, now: DateTime<Utc>) -> LeaseDecision {
    let spec = lease.spec.as_ref();
    let holder = spec.and_then(|s| s.holder_identity.clone());

    match holder {
        Some(holder) if holder == identity => LeaseDecision::Renew,
        Some(holder) => {
            let duration = spec
                .and_then(|s| s.lease_duration_seconds)
                .unwrap_or(LEASE_DURATION_SECS);
            let expired = spec
                .and_then(|s| s.renew_time.as_ref())
                .map(|renew| now > renew.0 + chrono::Duration::seconds(duration as i64))
                .unwrap_or(true);
            if expired {
                LeaseDecision::TakeOver {
                    previous: Some(holder),
                }
            } else {
                LeaseDecision::Wait { holder }
            }
        }
        None => LeaseDecision::TakeOver { previous: None },
    }
}

/// The Lease to write back for a `Renew` or `TakeOver` decision
///
/// Metadata, including `resourceVersion`, is kept from `existing` so the write
/// fails if anyone else changed the Lease in between.
pub fn claimed(existing: &Lease, identity: &str, now: DateTime<Utc>, takeover: bool) -> Lease {
    let mut spec = existing.spec.clone().unwrap_or_default();
    spec.renew_time = Some(MicroTime(now));
    spec.lease_duration_seconds = Some(LEASE_DURATION_SECS);
    if takeover {
        spec.holder_identity = Some(identity.to_string());
        spec.acquire_time = Some(MicroTime(now));
        spec.lease_transitions = Some(spec.lease_transitions.unwrap_or(0) + 1);
    }
    Lease {
        metadata: existing.metadata.clone(),
        spec: Some(spec),
    }
}

fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409)
}

pub struct LeaderElector {
    leases: Api<Lease>,
    namespace: String,
    identity: String,
}

impl LeaderElector {
    pub fn new(client: kube::Client, namespace: &str, identity: &str) -> Self {
        Self {
            leases: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
        }
    }

    /// Keep trying to hold the Lease, mirroring the outcome into `is_leader`
    pub async fn run(self, is_leader: Arc<AtomicBool>) {
        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    if !is_leader.swap(true, Ordering::Relaxed) {
                        info!("Acquired leadership for lease {}", LEASE_NAME);
                    }
                    tokio::time::sleep(RENEW_INTERVAL).await;
                }
                Ok(false) => {
                    if is_leader.swap(false, Ordering::Relaxed) {
                        warn!("Lost leadership for lease {}", LEASE_NAME);
                    }
                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
                Err(e) => {
                    warn!("Leader election error: {:?}", e);
                    is_leader.store(false, Ordering::Relaxed);
                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
            }
        }
    }

    async fn try_acquire_or_renew(&self) -> Result<bool, kube::Error> {
        let now = Utc::now();

        let existing = match self.leases.get_opt(LEASE_NAME).await? {
            Some(existing) => existing,
            None => return self.create(now).await,
        };

        let takeover = match decide(&existing, &self.identity, now) {
            LeaseDecision::Wait { holder } => {
                debug!("Lease {} is held by {}", LEASE_NAME, holder);
                return Ok(false);
            }
            LeaseDecision::Renew => false,
            LeaseDecision::TakeOver { previous } => {
                info!("Lease held by {:?} has expired, taking over", previous);
                true
            }
        };

        let lease = claimed(&existing, &self.identity, now, takeover);
        match self
            .leases
            .replace(LEASE_NAME, &PostParams::default(), &lease)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_conflict(&e) => {
                debug!("Lease {} changed while claiming it", LEASE_NAME);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn create(&self, now: DateTime<Utc>) -> Result<bool, kube::Error> {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(LEASE_NAME.to_string()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_duration_seconds: Some(LEASE_DURATION_SECS),
                lease_transitions: Some(0),
                ..Default::default()
            }),
        };
        match self.leases.create(&PostParams::default(), &lease).await {
            Ok(_) => {
                info!("Created lease {} with holder {}", LEASE_NAME, self.identity);
                Ok(true)
            }
            Err(e) if is_conflict(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
