use crate::artifact::Artifact;
use crate::sync::Puller;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Spawn the sync loop for one artifact.
///
/// The loop pulls immediately, then once per interval until `cancel` fires.
/// Intervals below the puller's minimum are raised to it, and an artifact
/// with a zero interval is handed back without syncing. Pulls never overlap
/// and a failed pull never ends the loop. The artifact is handed back when
/// the task exits.
pub fn start(
    puller: Puller,
    cancel: CancellationToken,
    mut artifact: Artifact,
) -> JoinHandle<Artifact> {
    tokio::spawn(async move {
        run(&puller, &cancel, &mut artifact).await;
        artifact
    })
}

async fn run(puller: &Puller, cancel: &CancellationToken, artifact: &mut Artifact) {
    let name = artifact.display_name();
    artifact.enforce_minimum_interval(puller.tunables().minimum_interval);

    let period = artifact.interval();
    if period.is_zero() {
        tracing::error!("Not syncing {}: interval must be positive", name);
        return;
    }
    let first_pull = Instant::now();

    tracing::info!(
        "Syncing {} to {} every {:?}",
        name,
        artifact.path().display(),
        period
    );

    pull_once(puller, cancel, artifact, &name).await;

    // A pull that outlasts the period delays the next tick instead of bunching ticks up
    let mut ticker = interval_at(first_pull + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("Stopped syncing {}", name);
                break;
            }
            _ = ticker.tick() => {
                pull_once(puller, cancel, artifact, &name).await;
            }
        }
    }
}

async fn pull_once(
    puller: &Puller,
    cancel: &CancellationToken,
    artifact: &mut Artifact,
    name: &str,
) {
    if let Err(e) = puller.pull_with_retry(cancel, artifact).await {
        tracing::error!("Failed to sync {}: {}", name, e);
    }
}

/// Owns the background sync tasks of a set of artifacts
pub struct SyncController {
    puller: Puller,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<Artifact>>,
}

impl SyncController {
    pub fn new(puller: Puller, cancel: CancellationToken) -> Self {
        Self {
            puller,
            cancel,
            tasks: Vec::new(),
        }
    }

    /// Start syncing `artifact` in the background
    pub fn start(&mut self, artifact: Artifact) {
        let task = start(self.puller.clone(), self.cancel.clone(), artifact);
        self.tasks.push(task);
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Number of running sync tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Cancel every sync loop and wait for them, returning their artifacts
    pub async fn shutdown(self) -> Vec<Artifact> {
        self.cancel.cancel();

        let mut artifacts = Vec::with_capacity(self.tasks.len());
        for task in self.tasks {
            match task.await {
                Ok(artifact) => artifacts.push(artifact),
                Err(e) => tracing::error!("Sync task failed: {}", e),
            }
        }

        tracing::info!("Stopped {} sync task(s)", artifacts.len());
        artifacts
    }
}
