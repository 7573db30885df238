use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;

/// Conditions a job waits for before it runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkConstraints {
    pub requires_network: bool,
}

pub type Job = BoxFuture<'static, ()>;

/// Bounded runner for cancellable background jobs
pub trait WorkQueue: Send + Sync {
    /// Schedule `job` under `tag`, replacing any earlier job with the same tag
    ///
    /// Cancelling the returned token drops the job at its next await point.
    fn schedule(&self, tag: &str, constraints: WorkConstraints, job: Job) -> CancellationToken;

    /// Cancel the job registered under `tag`, returning whether one was found
    fn cancel_by_tag(&self, tag: &str) -> bool;
}

struct Entry {
    generation: u64,
    token: CancellationToken,
}

/// [`WorkQueue`] on the tokio runtime
///
/// At most `slots` jobs run at once; the rest wait for a permit. Jobs that
/// require network wait until the connectivity channel reports `true`.
pub struct TokioWorkQueue {
    permits: Arc<Semaphore>,
    online: watch::Receiver<bool>,
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    generation: AtomicU64,
    // Keeps the default connectivity channel open
    _online_tx: Option<watch::Sender<bool>>,
}

impl TokioWorkQueue {
    /// Queue that always considers the network available
    #[must_use]
    pub fn new(slots: usize) -> Self {
        let (tx, rx) = watch::channel(true);
        Self::build(slots, rx, Some(tx))
    }

    /// Queue gated on an external connectivity signal
    #[must_use]
    pub fn with_connectivity(slots: usize, online: watch::Receiver<bool>) -> Self {
        Self::build(slots, online, None)
    }

    fn build(slots: usize, online: watch::Receiver<bool>, tx: Option<watch::Sender<bool>>) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(slots.max(1))),
            online,
            entries: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            _online_tx: tx,
        }
    }

    /// Number of jobs currently registered
    #[must_use]
    pub fn pending(&self) -> usize {
        self.entries.lock().len()
    }
}

impl WorkQueue for TokioWorkQueue {
    fn schedule(&self, tag: &str, constraints: WorkConstraints, job: Job) -> CancellationToken {
        let token = CancellationToken::new();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let replaced = self.entries.lock().insert(
            tag.to_string(),
            Entry {
                generation,
                token: token.clone(),
            },
        );
        if let Some(previous) = replaced {
            previous.token.cancel();
        }

        let permits = self.permits.clone();
        let mut online = self.online.clone();
        let entries = self.entries.clone();
        let job_token = token.clone();
        let tag = tag.to_string();

        tokio::spawn(async move {
            let run = async {
                if constraints.requires_network && online.wait_for(|up| *up).await.is_err() {
                    tracing::warn!(tag = %tag, "Connectivity signal closed, running job anyway");
                }
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                job.await;
            };

            tokio::select! {
                () = job_token.cancelled() => tracing::debug!(tag = %tag, "Job cancelled"),
                () = run => {}
            }

            let mut entries = entries.lock();
            if entries.get(&tag).is_some_and(|e| e.generation == generation) {
                entries.remove(&tag);
            }
        });

        token
    }

    fn cancel_by_tag(&self, tag: &str) -> bool {
        match self.entries.lock().remove(tag) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }
}
