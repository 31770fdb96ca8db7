//! Filesystem change watcher.
//!
//! The `notify` backend thread pushes raw changes into a bounded channel. A
//! single debounce task owns both the receiving end of that channel and the
//! sending end of the public event stream, so coalesced events can never be
//! sent after the stream has been closed.
//!
//! Each root is first subscribed recursively. When the backend rejects that
//! (an unreadable subdirectory is enough on inotify), the root's directories
//! are subscribed one by one and the ones that fail are skipped. Directories
//! created later under such a root are subscribed as they appear.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use benchwatch_types::{ChangeEvent, ChangeKind};
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::WatchError;
use crate::debounce::{Debouncer, RawChange};
use crate::discovery::walk_builder;

pub const DEFAULT_RAW_CAPACITY: usize = 1024;
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct WatchSettings {
    /// Quiet window per path.
    pub debounce: Duration,
    /// Extensions (without the dot) that count as relevant. Empty means all.
    pub extensions: Vec<String>,
    pub raw_capacity: usize,
    pub event_capacity: usize,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(benchwatch_config::DEFAULT_DEBOUNCE_MS),
            extensions: vec!["go".to_string()],
            raw_capacity: DEFAULT_RAW_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl WatchSettings {
    #[must_use]
    pub fn from_config(config: &benchwatch_config::WatchConfig) -> Self {
        Self {
            debounce: config.debounce(),
            extensions: config.extensions.clone(),
            ..Self::default()
        }
    }

    fn is_relevant(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|want| want == ext))
    }
}

/// Counters for the watcher pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatcherStats {
    pub watching_roots: u64,
    /// Directories that could not be subscribed and are not watched.
    pub skipped_dirs: u64,
    pub raw_received: u64,
    pub raw_ignored: u64,
    pub coalesced: u64,
    pub emitted: u64,
    pub discarded: u64,
    pub backend_errors: u64,
}

#[derive(Debug, Default)]
struct WatcherStatsInner {
    watching_roots: AtomicU64,
    skipped_dirs: AtomicU64,
    raw_received: AtomicU64,
    raw_ignored: AtomicU64,
    coalesced: AtomicU64,
    emitted: AtomicU64,
    discarded: AtomicU64,
    backend_errors: AtomicU64,
}

impl WatcherStatsInner {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> WatcherStats {
        WatcherStats {
            watching_roots: self.watching_roots.load(Ordering::Relaxed),
            skipped_dirs: self.skipped_dirs.load(Ordering::Relaxed),
            raw_received: self.raw_received.load(Ordering::Relaxed),
            raw_ignored: self.raw_ignored.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            backend_errors: self.backend_errors.load(Ordering::Relaxed),
        }
    }
}

/// How one root ended up subscribed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RootSubscription {
    Recursive,
    PerDirectory { watched: u64, skipped: u64 },
    Failed,
}

/// Subscribe `root` recursively, falling back to one subscription per
/// directory when the backend refuses the whole tree.
fn subscribe_root<F>(root: &Path, watch: &mut F) -> RootSubscription
where
    F: FnMut(&Path, RecursiveMode) -> notify::Result<()>,
{
    match watch(root, RecursiveMode::Recursive) {
        Ok(()) => return RootSubscription::Recursive,
        Err(err) => {
            tracing::warn!(
                root = %root.display(),
                "recursive watch failed, subscribing directories individually: {err}"
            );
        }
    }
    match subscribe_tree(root, watch) {
        (0, _) => RootSubscription::Failed,
        (watched, skipped) => RootSubscription::PerDirectory { watched, skipped },
    }
}

/// Subscribe every directory under `dir` non-recursively. Returns the number
/// of directories watched and skipped.
fn subscribe_tree<F>(dir: &Path, watch: &mut F) -> (u64, u64)
where
    F: FnMut(&Path, RecursiveMode) -> notify::Result<()>,
{
    let mut watched = 0;
    let mut skipped = 0;
    for item in walk_builder(dir).build() {
        let entry = match item {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!("skipping unwatchable path: {err}");
                skipped += 1;
                continue;
            }
        };
        if !entry.file_type().is_some_and(|ty| ty.is_dir()) {
            continue;
        }
        match watch(entry.path(), RecursiveMode::NonRecursive) {
            Ok(()) => watched += 1,
            Err(err) => {
                tracing::warn!(dir = %entry.path().display(), "skipping directory: {err}");
                skipped += 1;
            }
        }
    }
    (watched, skipped)
}

/// Subscribes directories created under roots that are watched per directory.
#[derive(Clone)]
struct DirSubscriber {
    backend: Arc<Mutex<RecommendedWatcher>>,
    roots: Arc<[PathBuf]>,
    stats: Arc<WatcherStatsInner>,
}

impl DirSubscriber {
    fn on_created(&self, path: &Path) {
        if !self.roots.iter().any(|root| path.starts_with(root)) {
            return;
        }
        let subscriber = self.clone();
        let path = path.to_path_buf();
        // Backend calls block until the notify thread answers.
        tokio::task::spawn_blocking(move || {
            if path.is_dir() {
                subscriber.subscribe(&path);
            }
        });
    }

    fn subscribe(&self, dir: &Path) {
        let mut backend = lock_or_recover(&self.backend);
        let mut watch = |path: &Path, mode: RecursiveMode| backend.watch(path, mode);
        let (watched, skipped) = subscribe_tree(dir, &mut watch);
        self.stats.skipped_dirs.fetch_add(skipped, Ordering::Relaxed);
        tracing::debug!(dir = %dir.display(), watched, skipped, "subscribed new directory");
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct ChangeWatcher {
    backend: Option<Arc<Mutex<RecommendedWatcher>>>,
    events: Option<mpsc::Receiver<ChangeEvent>>,
    task: Option<JoinHandle<()>>,
    token: CancellationToken,
    stats: Arc<WatcherStatsInner>,
}

impl ChangeWatcher {
    /// Watch every root recursively. Must be called inside a tokio runtime.
    ///
    /// Subdirectories that cannot be subscribed are skipped with a warning,
    /// as are roots where nothing could be subscribed. The call fails only
    /// when no root is watched at all.
    pub fn start(
        roots: &[PathBuf],
        settings: WatchSettings,
        shutdown: &CancellationToken,
    ) -> Result<Self, WatchError> {
        let stats = Arc::new(WatcherStatsInner::default());
        let (raw_tx, raw_rx) = mpsc::channel(settings.raw_capacity.max(1));

        let callback_stats = Arc::clone(&stats);
        let mut backend = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    for change in map_notify_event(event) {
                        // The receiver is gone once the debounce task exits.
                        if raw_tx.blocking_send(change).is_err() {
                            return;
                        }
                    }
                }
                Err(err) => {
                    WatcherStatsInner::bump(&callback_stats.backend_errors);
                    tracing::warn!("watch backend error: {err}");
                }
            }
        })
        .map_err(WatchError::Init)?;

        let mut watching = 0u64;
        let mut per_directory = Vec::new();
        let mut watch = |path: &Path, mode: RecursiveMode| backend.watch(path, mode);
        for root in roots {
            match subscribe_root(root, &mut watch) {
                RootSubscription::Recursive => {
                    watching += 1;
                    tracing::info!(root = %root.display(), "watching");
                }
                RootSubscription::PerDirectory { watched, skipped } => {
                    watching += 1;
                    stats.skipped_dirs.fetch_add(skipped, Ordering::Relaxed);
                    tracing::info!(root = %root.display(), watched, skipped, "watching directories");
                    per_directory.push(root.clone());
                }
                RootSubscription::Failed => {
                    tracing::warn!(root = %root.display(), "failed to watch root");
                }
            }
        }
        if watching == 0 {
            return Err(WatchError::NoRoots);
        }
        stats.watching_roots.store(watching, Ordering::Relaxed);

        let backend = Arc::new(Mutex::new(backend));
        let subscriber = (!per_directory.is_empty()).then(|| DirSubscriber {
            backend: Arc::clone(&backend),
            roots: per_directory.into(),
            stats: Arc::clone(&stats),
        });
        let mut watcher = Self::spawn_pipeline(raw_rx, settings, shutdown, stats, subscriber);
        watcher.backend = Some(backend);
        Ok(watcher)
    }

    /// Build the debounce pipeline over an externally fed raw stream.
    #[must_use]
    pub fn from_raw(
        raw: mpsc::Receiver<RawChange>,
        settings: WatchSettings,
        shutdown: &CancellationToken,
    ) -> Self {
        Self::spawn_pipeline(
            raw,
            settings,
            shutdown,
            Arc::new(WatcherStatsInner::default()),
            None,
        )
    }

    fn spawn_pipeline(
        raw: mpsc::Receiver<RawChange>,
        settings: WatchSettings,
        shutdown: &CancellationToken,
        stats: Arc<WatcherStatsInner>,
        subscriber: Option<DirSubscriber>,
    ) -> Self {
        let token = shutdown.child_token();
        let (tx, rx) = mpsc::channel(settings.event_capacity.max(1));
        let task = tokio::spawn(run_debounce(
            raw,
            tx,
            settings,
            token.clone(),
            Arc::clone(&stats),
            subscriber,
        ));
        Self {
            backend: None,
            events: Some(rx),
            task: Some(task),
            token,
            stats,
        }
    }

    /// The single consumer end of the event stream. `None` after the first call.
    pub fn events(&mut self) -> Option<mpsc::Receiver<ChangeEvent>> {
        self.events.take()
    }

    #[must_use]
    pub fn stats(&self) -> WatcherStats {
        self.stats.snapshot()
    }

    /// Stop watching and wait for the debounce task. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                tracing::warn!("debounce task ended abnormally: {err}");
            }
        }
        // Dropping the backend unsubscribes every root.
        self.backend = None;
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run_debounce(
    mut raw: mpsc::Receiver<RawChange>,
    tx: mpsc::Sender<ChangeEvent>,
    settings: WatchSettings,
    token: CancellationToken,
    stats: Arc<WatcherStatsInner>,
    subscriber: Option<DirSubscriber>,
) {
    let mut debouncer = Debouncer::new(settings.debounce);
    let mut raw_open = true;

    'run: loop {
        if !raw_open && debouncer.is_empty() {
            break;
        }
        let deadline = debouncer.next_deadline();

        tokio::select! {
            biased;
            () = token.cancelled() => break,
            change = raw.recv(), if raw_open => {
                let Some(change) = change else {
                    raw_open = false;
                    continue;
                };
                WatcherStatsInner::bump(&stats.raw_received);
                if change.kind == ChangeKind::Create
                    && let Some(subscriber) = &subscriber
                {
                    subscriber.on_created(&change.path);
                }
                if !settings.is_relevant(&change.path) {
                    WatcherStatsInner::bump(&stats.raw_ignored);
                    continue;
                }
                if debouncer.push(change, Instant::now()) {
                    WatcherStatsInner::bump(&stats.coalesced);
                }
            }
            () = sleep_until_deadline(deadline), if deadline.is_some() => {
                for event in debouncer.drain_due(Instant::now()) {
                    tracing::debug!(path = %event.path.display(), kind = %event.kind, "change");
                    tokio::select! {
                        biased;
                        () = token.cancelled() => break 'run,
                        sent = tx.send(event) => {
                            if sent.is_err() {
                                tracing::debug!("change consumer dropped, stopping debounce");
                                break 'run;
                            }
                            WatcherStatsInner::bump(&stats.emitted);
                        }
                    }
                }
            }
        }
    }

    let discarded = debouncer.discard();
    if discarded > 0 {
        stats
            .discarded
            .fetch_add(discarded as u64, Ordering::Relaxed);
        tracing::debug!(discarded, "discarding pending changes at shutdown");
    }
    // `tx` drops here: the event stream closes exactly once.
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn map_notify_event(event: Event) -> Vec<RawChange> {
    let Some(kind) = map_notify_kind(event.kind) else {
        return Vec::new();
    };
    event
        .paths
        .into_iter()
        .map(|path| RawChange::new(path, kind))
        .collect()
}

const fn map_notify_kind(kind: EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Create),
        EventKind::Modify(ModifyKind::Name(_)) => Some(ChangeKind::Rename),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => Some(ChangeKind::Write),
        EventKind::Remove(_) => Some(ChangeKind::Remove),
        _ => None,
    }
}
