//! Multi-tenant database isolation: the instance manager (component C9).
//!
//! Each project gets its own [`Database`] opened under `<root>/<project
//! id>`. Instances are opened lazily on first `acquire` and kept around,
//! refcounted by outstanding [`Lease`]s, until a background janitor evicts
//! ones that have sat idle (zero leases) past the configured TTL.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::database::{self, Database};
use crate::error::CResult;

pub type ProjectId = String;

struct InstanceRecord {
    database: Arc<Database>,
    lease_count: AtomicI64,
    last_released: Mutex<Option<Instant>>,
    gc_token: CancellationToken,
}

/// A held reference to an instance. Releases its lease exactly once, either
/// explicitly via [`Lease::release`] or implicitly on drop.
pub struct Lease {
    manager: Arc<InstanceManagerInner>,
    project: ProjectId,
    database: Arc<Database>,
    released: AtomicBool,
}

impl Lease {
    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    pub fn release(self) {
        // Drop performs the actual release; this just makes the call site
        // read naturally at the point the caller is done with it.
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.manager.release(&self.project);
        }
    }
}

struct InstanceManagerInner {
    root: PathBuf,
    config: EngineConfig,
    instances: DashMap<ProjectId, Arc<InstanceRecord>>,
    creation_gate: Mutex<()>,
}

impl InstanceManagerInner {
    fn release(&self, project: &ProjectId) {
        if let Some(record) = self.instances.get(project) {
            let remaining = record.lease_count.fetch_sub(1, Ordering::SeqCst) - 1;
            if remaining <= 0 {
                *record.last_released.lock() = Some(Instant::now());
            }
        }
    }
}

/// Owns every open per-project `Database` and hands out leases to them.
pub struct InstanceManager {
    inner: Arc<InstanceManagerInner>,
}

impl InstanceManager {
    pub fn new(root: impl Into<PathBuf>, config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(InstanceManagerInner {
                root: root.into(),
                config,
                instances: DashMap::new(),
                creation_gate: Mutex::new(()),
            }),
        }
    }

    /// Opens (if necessary) and leases the database for `project`. Different
    /// projects never contend on the same lock; only concurrent first-opens
    /// of the *same* project serialize, via `creation_gate`.
    pub fn acquire(&self, project: &str) -> CResult<Lease> {
        if let Some(record) = self.inner.instances.get(project) {
            record.lease_count.fetch_add(1, Ordering::SeqCst);
            *record.last_released.lock() = None;
            return Ok(Lease {
                manager: self.inner.clone(),
                project: project.to_string(),
                database: record.database.clone(),
                released: AtomicBool::new(false),
            });
        }

        let _gate = self.inner.creation_gate.lock();
        // Re-check: another thread may have created it while we waited.
        if let Some(record) = self.inner.instances.get(project) {
            record.lease_count.fetch_add(1, Ordering::SeqCst);
            *record.last_released.lock() = None;
            return Ok(Lease {
                manager: self.inner.clone(),
                project: project.to_string(),
                database: record.database.clone(),
                released: AtomicBool::new(false),
            });
        }

        if self.inner.instances.len() >= self.inner.config.max_instances() {
            self.evict_one_idle();
        }
        if self.inner.instances.len() >= self.inner.config.max_instances() {
            // Still over capacity: no idle instance to reclaim right now.
            // The core has no hard admission control, so the open proceeds
            // anyway; the janitor's next sweep is what brings the count back
            // down once something goes idle.
            log::warn!(
                target: "engine_warnings",
                "instance manager over capacity ({} open databases) admitting project {project} anyway",
                self.inner.config.max_instances()
            );
        }

        let path = self.inner.root.join(project);
        let database = Arc::new(Database::open(path, self.inner.config.clone())?);
        let gc_token = database::spawn_gc_loop(database.clone(), self.inner.config.gc_interval());

        let record = Arc::new(InstanceRecord {
            database: database.clone(),
            lease_count: AtomicI64::new(1),
            last_released: Mutex::new(None),
            gc_token,
        });
        self.inner.instances.insert(project.to_string(), record);

        Ok(Lease {
            manager: self.inner.clone(),
            project: project.to_string(),
            database,
            released: AtomicBool::new(false),
        })
    }

    pub fn open_count(&self) -> usize {
        self.inner.instances.len()
    }

    /// Evicts the first idle (zero-lease, released-longest-ago) instance it
    /// finds to make room under the capacity cap. Best-effort: if none are
    /// idle, this is a no-op and `acquire` admits the new instance over
    /// capacity anyway rather than refusing the caller.
    fn evict_one_idle(&self) {
        let victim = self
            .inner
            .instances
            .iter()
            .filter(|entry| entry.value().lease_count.load(Ordering::SeqCst) <= 0)
            .filter_map(|entry| entry.value().last_released.lock().map(|at| (entry.key().clone(), at)))
            .min_by_key(|(_, at)| *at)
            .map(|(project, _)| project);

        if let Some(project) = victim {
            self.evict(&project);
        }
    }

    fn evict(&self, project: &str) {
        if let Some((_, record)) = self.inner.instances.remove(project) {
            record.gc_token.cancel();
            if let Err(err) = record.database.close() {
                log::warn!("error flushing database for project {project} on eviction: {err}");
            }
        }
    }

    /// Sweeps every instance and evicts any that have been idle (zero
    /// leases) past the configured TTL. Runs synchronously; `spawn_janitor`
    /// wraps this in a periodic background task.
    pub fn sweep_idle(&self) {
        let ttl = self.inner.config.idle_ttl();
        let expired: Vec<String> = self
            .inner
            .instances
            .iter()
            .filter_map(|entry| {
                let record = entry.value();
                if record.lease_count.load(Ordering::SeqCst) > 0 {
                    return None;
                }
                let released_at = (*record.last_released.lock())?;
                (released_at.elapsed() >= ttl).then(|| entry.key().clone())
            })
            .collect();

        for project in expired {
            self.evict(&project);
        }
    }

    /// Spawns the background janitor loop; returns a token the caller can
    /// cancel to stop it (e.g. on process shutdown).
    pub fn spawn_janitor(self: &Arc<Self>) -> CancellationToken {
        let token = CancellationToken::new();
        let child_token = token.clone();
        let manager = self.clone();
        let interval = self.inner.config.janitor_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = child_token.cancelled() => break,
                    _ = ticker.tick() => manager.sweep_idle(),
                }
            }
        });
        token
    }

    /// Closes every open instance, flushing its logs and cancelling its GC
    /// loop. Used on process shutdown.
    pub fn close_all(&self) {
        let projects: Vec<String> = self.inner.instances.iter().map(|e| e.key().clone()).collect();
        for project in projects {
            self.evict(&project);
        }
    }
}
