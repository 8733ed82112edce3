//! The monitor loop.
//!
//! Drives discover → probe → classify → reconcile cycles strictly
//! sequentially: the next cycle starts only after the previous cycle's
//! transaction has committed or aborted. Within a cycle, service probes
//! fan out through a bounded worker pool. The loop is the single retry
//! authority: every in-cycle failure is logged and answered with a
//! shorter backoff instead of propagating out.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use lanscope_core::recognize::recognize;
use lanscope_core::rules::RuleSet;
use lanscope_core::types::{ClassifiedObservation, RawObservation};

use crate::config::ScanConfig;
use crate::error::{Result, ScanError};
use crate::probe::ProbeLayer;
use crate::store::{ReconcileSummary, TopologyStore};

/// The outcome of one completed cycle.
#[derive(Debug)]
pub struct CycleSummary {
    pub cycle_id: Uuid,
    pub hosts: usize,
    pub reconcile: ReconcileSummary,
}

pub struct Monitor {
    config: ScanConfig,
    rules: Arc<RuleSet>,
    probe: Arc<dyn ProbeLayer>,
    store: TopologyStore,
    location_id: Option<i64>,
    shutdown: CancellationToken,
}

impl Monitor {
    pub fn new(
        config: ScanConfig,
        rules: Arc<RuleSet>,
        probe: Arc<dyn ProbeLayer>,
        store: TopologyStore,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let location_id = match &config.location {
            Some(name) => Some(store.ensure_location(name, &config.network_range)?),
            None => None,
        };
        Ok(Self {
            config,
            rules,
            probe,
            store,
            location_id,
            shutdown,
        })
    }

    /// Run cycles until the shutdown token fires, observed at cycle
    /// boundaries and during sleeps. Only shutdown ends the loop.
    pub async fn run(&mut self) {
        tracing::info!(
            range = %self.config.network_range,
            interval_secs = self.config.scan_interval_secs,
            backoff_secs = self.config.retry_backoff_secs,
            "Monitor started"
        );

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let sleep_for = match self.run_cycle().await {
                Ok(summary) => {
                    tracing::info!(
                        cycle_id = %summary.cycle_id,
                        hosts = summary.hosts,
                        inserted = summary.reconcile.inserted,
                        updated = summary.reconcile.updated,
                        services = summary.reconcile.services_upserted,
                        marked_inactive = summary.reconcile.marked_inactive,
                        "Cycle complete"
                    );
                    Duration::from_secs(self.config.scan_interval_secs)
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        backoff_secs = self.config.retry_backoff_secs,
                        "Cycle failed, backing off"
                    );
                    Duration::from_secs(self.config.retry_backoff_secs)
                }
            };

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }

        tracing::info!("Monitor stopped");
    }

    /// Execute exactly one discover → probe → classify → reconcile cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleSummary> {
        let cycle_id = Uuid::new_v4();
        let started = std::time::Instant::now();
        tracing::debug!(cycle_id = %cycle_id, range = %self.config.network_range, "Cycle started");

        let discover_bound = Duration::from_secs(self.config.discover_timeout_secs);
        let observations = timeout(
            discover_bound,
            self.probe.discover(&self.config.network_range),
        )
        .await
        .map_err(|_| ScanError::DiscoverTimeout {
            range: self.config.network_range.clone(),
            secs: self.config.discover_timeout_secs,
        })??;

        let observations = self.probe_all(observations).await;

        let classified: Vec<ClassifiedObservation> = observations
            .into_iter()
            .map(|observation| {
                let device_type = recognize(&observation, &self.rules);
                tracing::debug!(
                    address = %observation.address,
                    hardware_address = %observation.hardware_address,
                    device_type = %device_type,
                    "Classified host"
                );
                ClassifiedObservation {
                    observation,
                    device_type,
                }
            })
            .collect();

        let now = Utc::now();
        let stale_cutoff = self
            .config
            .stale_after_secs
            .map(|secs| now - chrono::Duration::seconds(secs as i64));

        let hosts = classified.len();
        let reconcile = self
            .store
            .reconcile(&classified, now, self.location_id, stale_cutoff)?;

        tracing::debug!(
            cycle_id = %cycle_id,
            duration_ms = started.elapsed().as_millis() as u64,
            "Cycle reconciled"
        );

        Ok(CycleSummary {
            cycle_id,
            hosts,
            reconcile,
        })
    }

    /// Fan service probes out through a bounded pool, one task per host,
    /// each bounded by the per-host timeout. A failed or timed-out probe
    /// degrades that host to an empty port list; the host is still
    /// classified from its hardware address and hostname.
    async fn probe_all(&self, observations: Vec<RawObservation>) -> Vec<RawObservation> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_probes));
        let per_host = Duration::from_secs(self.config.probe_timeout_secs);

        let mut handles = Vec::with_capacity(observations.len());
        for mut observation in observations {
            let probe = self.probe.clone();
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("Semaphore closed");
                let result = match timeout(per_host, probe.probe_services(observation.address)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(ScanError::ProbeTimeout {
                        address: observation.address,
                        secs: per_host.as_secs(),
                    }),
                };
                match result {
                    Ok(ports) => observation.ports = ports,
                    Err(e) => tracing::warn!(
                        address = %observation.address,
                        error = %e,
                        "Service probe failed, continuing without ports"
                    ),
                }
                observation
            }));
        }

        let mut probed = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(observation) => probed.push(observation),
                Err(e) => tracing::error!(error = %e, "Service probe task panicked"),
            }
        }
        probed
    }
}
