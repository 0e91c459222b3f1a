//! Rollout runner — the background task executing one rolling update.
//!
//! The runner feeds batches from the [`Rollout`] controller to the
//! [`HostDeployer`], persists progress after every batch through the
//! lease arena, and waits out the batch delay. A shutdown signal is
//! observed while host deployments are in flight and during the delay;
//! in-flight deployments are aborted and the last persisted progress is
//! left as is.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use convoy_state::{HostId, StateStore};

use crate::controller::{BatchDecision, Rollout};
use crate::deployer::{DeployOutcome, HostDeployer};
use crate::lease::{Lease, RolloutLeases};

const PERSIST_RETRY_INITIAL: Duration = Duration::from_millis(100);
const PERSIST_RETRY_MAX: Duration = Duration::from_secs(5);

/// Everything a runner needs besides its rollout.
#[derive(Clone)]
pub struct RunnerContext {
    pub store: StateStore,
    pub deployer: Arc<dyn HostDeployer>,
    pub leases: RolloutLeases,
}

/// Drive `rollout` to a terminal state unless shut down first.
pub async fn run_rollout(
    ctx: RunnerContext,
    lease: Lease,
    mut rollout: Rollout,
    timeout_per_host: Duration,
    batch_delay: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let name = lease.name().to_string();
    let Some(job) = rollout.job().cloned() else {
        error!(deployment_group = %name, "rollout has no job, releasing lease");
        ctx.leases.release(&lease).await;
        return;
    };

    loop {
        let Some(batch) = rollout.next_batch().map(<[HostId]>::to_vec) else {
            break;
        };
        let batch_number = rollout.status().current_batch + 1;
        debug!(deployment_group = %name, batch = batch_number, hosts = ?batch, "deploying batch");

        let Some(outcomes) = deploy_batch(
            &ctx.deployer,
            &batch,
            &job,
            timeout_per_host,
            &mut shutdown,
        )
        .await
        else {
            info!(deployment_group = %name, batch = batch_number, "rollout cancelled mid-batch");
            return;
        };

        let decision = rollout.record_batch(outcomes);
        let terminal = decision != BatchDecision::Continue;

        if !persist_progress(&ctx, &lease, &rollout, terminal, &mut shutdown).await {
            debug!(deployment_group = %name, "lease lost, stopping runner");
            return;
        }

        match decision {
            BatchDecision::Continue => {
                if !batch_delay.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(batch_delay) => {}
                        _ = shutdown.changed() => {
                            info!(deployment_group = %name, "rollout cancelled during batch delay");
                            return;
                        }
                    }
                }
            }
            BatchDecision::Completed | BatchDecision::Aborted => break,
        }
    }

    ctx.leases.release(&lease).await;
}

/// Write the rollout's progress through its lease.
///
/// A failed intermediate write is left for the next batch to overwrite. A
/// terminal status has no later write, so it is retried with backoff for
/// as long as the lease is held. Returns false once the lease is lost.
async fn persist_progress(
    ctx: &RunnerContext,
    lease: &Lease,
    rollout: &Rollout,
    terminal: bool,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let mut backoff = PERSIST_RETRY_INITIAL;
    loop {
        match ctx.leases.persist(lease, &ctx.store, rollout.status()).await {
            Ok(stored) => return stored,
            Err(e) if !terminal => {
                error!(deployment_group = %lease.name(), error = %e, "failed to persist rollout progress");
                return true;
            }
            Err(e) => {
                error!(
                    deployment_group = %lease.name(),
                    state = ?rollout.state(),
                    error = %e,
                    retry_in_ms = backoff.as_millis() as u64,
                    "failed to persist final rollout status"
                );
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown.changed() => return false,
        }
        backoff = (backoff * 2).min(PERSIST_RETRY_MAX);
    }
}

/// Deploy to every host of a batch concurrently.
///
/// Returns one outcome per host in batch order, or `None` if shutdown was
/// signalled first, in which case in-flight deployments are aborted.
async fn deploy_batch(
    deployer: &Arc<dyn HostDeployer>,
    batch: &[HostId],
    job: &str,
    timeout_per_host: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<Vec<(HostId, DeployOutcome)>> {
    let mut set = JoinSet::new();
    for (index, host) in batch.iter().enumerate() {
        let deployer = Arc::clone(deployer);
        let host = host.clone();
        let job = job.to_string();
        set.spawn(async move {
            let outcome = tokio::time::timeout(timeout_per_host, deployer.deploy(&host, &job))
                .await
                .unwrap_or(DeployOutcome::Timeout);
            (index, outcome)
        });
    }

    // A host whose task panics keeps this placeholder.
    let mut outcomes: Vec<(HostId, DeployOutcome)> = batch
        .iter()
        .map(|h| {
            (
                h.clone(),
                DeployOutcome::Failure("deployment task aborted".to_string()),
            )
        })
        .collect();

    loop {
        tokio::select! {
            joined = set.join_next() => match joined {
                Some(Ok((index, outcome))) => outcomes[index].1 = outcome,
                Some(Err(e)) => error!(error = %e, "host deployment task failed"),
                None => break,
            },
            _ = shutdown.changed() => {
                set.abort_all();
                return None;
            }
        }
    }

    Some(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployer::DeployFuture;
    use convoy_state::{DeploymentGroup, Labels, RolloutState};
    use std::sync::Mutex;

    /// Records deploy calls; fails hosts listed in `fail`, hangs on `hang`.
    #[derive(Default)]
    struct ScriptedDeployer {
        calls: Mutex<Vec<HostId>>,
        fail: Vec<HostId>,
        hang: Vec<HostId>,
    }

    impl HostDeployer for ScriptedDeployer {
        fn deploy<'a>(&'a self, host: &'a str, _job: &'a str) -> DeployFuture<'a> {
            Box::pin(async move {
                self.calls.lock().unwrap().push(host.to_string());
                if self.hang.iter().any(|h| h == host) {
                    std::future::pending::<()>().await;
                }
                if self.fail.iter().any(|h| h == host) {
                    DeployOutcome::Failure("exit 1".to_string())
                } else {
                    DeployOutcome::Success
                }
            })
        }
    }

    fn group(batch_size: u32) -> DeploymentGroup {
        let mut g = DeploymentGroup::new("web", Labels::new());
        g.rolling_update.batch_size = batch_size;
        g
    }

    fn hosts(n: usize) -> Vec<HostId> {
        (1..=n).map(|i| format!("h{i}")).collect()
    }

    async fn run(
        deployer: Arc<ScriptedDeployer>,
        rollout: Rollout,
        timeout: Duration,
    ) -> (StateStore, RolloutLeases) {
        let store = StateStore::open_in_memory().unwrap();
        let leases = RolloutLeases::new();
        let (lease, shutdown) = leases.lock().await.grant("web");
        let ctx = RunnerContext {
            store: store.clone(),
            deployer,
            leases: leases.clone(),
        };
        run_rollout(ctx, lease, rollout, timeout, Duration::ZERO, shutdown).await;
        (store, leases)
    }

    #[tokio::test]
    async fn successful_rollout_persists_done_and_releases_lease() {
        let deployer = Arc::new(ScriptedDeployer::default());
        let rollout = Rollout::start(&group(2), "api:2", hosts(3));

        let (store, leases) = run(deployer.clone(), rollout, Duration::from_secs(5)).await;

        let status = store.get_rolling_update_status("web").unwrap().unwrap();
        assert_eq!(status.state, RolloutState::Done);
        assert_eq!(status.hosts_completed, 3);
        assert_eq!(status.current_batch, 2);
        assert_eq!(deployer.calls.lock().unwrap().len(), 3);
        assert!(!leases.is_held("web").await);
    }

    #[tokio::test]
    async fn failure_stops_later_batches() {
        let deployer = Arc::new(ScriptedDeployer {
            fail: vec!["h2".to_string()],
            ..Default::default()
        });
        let rollout = Rollout::start(&group(2), "api:2", hosts(6));

        let (store, _) = run(deployer.clone(), rollout, Duration::from_secs(5)).await;

        let status = store.get_rolling_update_status("web").unwrap().unwrap();
        assert_eq!(status.state, RolloutState::Failed);
        assert_eq!(status.failed_hosts, vec!["h2"]);

        let mut calls = deployer.calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(calls, vec!["h1", "h2"]);
    }

    #[tokio::test]
    async fn hung_host_times_out() {
        let deployer = Arc::new(ScriptedDeployer {
            hang: vec!["h1".to_string()],
            ..Default::default()
        });
        let rollout = Rollout::start(&group(1), "api:2", hosts(2));

        let (store, _) = run(deployer.clone(), rollout, Duration::from_millis(50)).await;

        let status = store.get_rolling_update_status("web").unwrap().unwrap();
        assert_eq!(status.state, RolloutState::Failed);
        assert!(status.last_error.unwrap().contains("timed out"));
        assert_eq!(*deployer.calls.lock().unwrap(), vec!["h1"]);
    }

    #[tokio::test]
    async fn shutdown_aborts_in_flight_batch_without_writing() {
        let deployer = Arc::new(ScriptedDeployer {
            hang: vec!["h1".to_string()],
            ..Default::default()
        });
        let store = StateStore::open_in_memory().unwrap();
        let leases = RolloutLeases::new();
        let (lease, shutdown) = leases.lock().await.grant("web");
        let ctx = RunnerContext {
            store: store.clone(),
            deployer: deployer.clone(),
            leases: leases.clone(),
        };
        let rollout = Rollout::start(&group(1), "api:2", hosts(2));
        let task = tokio::spawn(run_rollout(
            ctx,
            lease,
            rollout,
            Duration::from_secs(3600),
            Duration::ZERO,
            shutdown,
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(leases.lock().await.revoke("web"));

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("runner should stop promptly")
            .unwrap();
        assert!(store.get_rolling_update_status("web").unwrap().is_none());
        assert_eq!(*deployer.calls.lock().unwrap(), vec!["h1"]);
    }

    fn spawn(
        store: &StateStore,
        leases: &RolloutLeases,
        deployer: Arc<dyn HostDeployer>,
        lease: Lease,
        shutdown: watch::Receiver<bool>,
        rollout: Rollout,
        batch_delay: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let ctx = RunnerContext {
            store: store.clone(),
            deployer,
            leases: leases.clone(),
        };
        tokio::spawn(run_rollout(
            ctx,
            lease,
            rollout,
            Duration::from_secs(5),
            batch_delay,
            shutdown,
        ))
    }

    #[tokio::test]
    async fn next_batch_waits_for_batch_delay() {
        let deployer = Arc::new(ScriptedDeployer::default());
        let store = StateStore::open_in_memory().unwrap();
        let leases = RolloutLeases::new();
        let (lease, shutdown) = leases.lock().await.grant("web");

        let started = std::time::Instant::now();
        let task = spawn(
            &store,
            &leases,
            deployer.clone(),
            lease,
            shutdown,
            Rollout::start(&group(1), "api:2", hosts(2)),
            Duration::from_millis(400),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*deployer.calls.lock().unwrap(), vec!["h1"]);
        let status = store.get_rolling_update_status("web").unwrap().unwrap();
        assert_eq!(status.current_batch, 1);
        assert_eq!(status.state, RolloutState::RollingOut);

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("runner should finish")
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(400));
        assert_eq!(*deployer.calls.lock().unwrap(), vec!["h1", "h2"]);
        let status = store.get_rolling_update_status("web").unwrap().unwrap();
        assert_eq!(status.state, RolloutState::Done);
    }

    #[tokio::test]
    async fn revoke_during_batch_delay_stops_before_next_batch() {
        let deployer = Arc::new(ScriptedDeployer::default());
        let store = StateStore::open_in_memory().unwrap();
        let leases = RolloutLeases::new();
        let (lease, shutdown) = leases.lock().await.grant("web");

        let task = spawn(
            &store,
            &leases,
            deployer.clone(),
            lease,
            shutdown,
            Rollout::start(&group(1), "api:2", hosts(3)),
            Duration::from_secs(3600),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(leases.lock().await.revoke("web"));

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("runner should stop promptly")
            .unwrap();
        assert_eq!(*deployer.calls.lock().unwrap(), vec!["h1"]);
        let status = store.get_rolling_update_status("web").unwrap().unwrap();
        assert_eq!(status.current_batch, 1);
        assert_eq!(status.state, RolloutState::RollingOut);
    }

    /// Breaks the store's writes when deploying `host`.
    struct BreakStoreOn {
        host: &'static str,
        fail_sync: Arc<std::sync::atomic::AtomicBool>,
    }

    impl HostDeployer for BreakStoreOn {
        fn deploy<'a>(&'a self, host: &'a str, _job: &'a str) -> DeployFuture<'a> {
            Box::pin(async move {
                if host == self.host {
                    self.fail_sync
                        .store(true, std::sync::atomic::Ordering::SeqCst);
                }
                DeployOutcome::Success
            })
        }
    }

    #[tokio::test]
    async fn failed_final_write_keeps_lease_until_revoked() {
        let (store, fail_sync) = crate::test_support::flaky_store();
        let leases = RolloutLeases::new();
        let (lease, shutdown) = leases.lock().await.grant("web");

        let task = spawn(
            &store,
            &leases,
            Arc::new(BreakStoreOn {
                host: "h2",
                fail_sync,
            }),
            lease,
            shutdown,
            Rollout::start(&group(1), "api:2", hosts(2)),
            Duration::ZERO,
        );

        // The DONE write keeps failing: the runner must not hand the group
        // back while its stored status still says ROLLING_OUT.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!task.is_finished());
        assert!(leases.is_held("web").await);

        assert!(leases.lock().await.revoke("web"));
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("runner should stop once the lease is revoked")
            .unwrap();
    }
}
