//! Filesystem watching and reload debouncing for the key cache.
//!
//! A single coordinating task owns the `notify` watcher and the table of
//! pending debounce timers. Everything that touches either goes through it:
//!
//! - `Watch` commands from the lookup path register new files.
//! - Write events (re)arm the debounce timer of their path.
//! - Remove events evict the cached set immediately.
//!
//! # Debounce timers
//!
//! Each timer is a short-lived task with a capacity-1 reset channel. It sleeps
//! for the quiet period, restarting whenever a reset arrives, and when the
//! period elapses undisturbed it closes its channel, runs one reload and
//! exits. A write that finds the channel closed spawns a fresh timer, so a
//! write racing with a firing timer is never lost: either the timer sees the
//! reset, or the write starts a new timer whose reload follows it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{KeyCacheError, KeyStore};

/// Action run when a debounce timer fires.
pub(crate) type ReloadFn = Arc<dyn Fn(PathBuf) -> BoxFuture<'static, ()> + Send + Sync>;

/// Requests sent to the coordinating task.
pub(crate) enum WatchCommand {
    Watch {
        path: PathBuf,
        reply: oneshot::Sender<notify::Result<()>>,
    },
}

/// What a filesystem event means for the cache.
#[derive(Debug, PartialEq, Eq)]
enum Change {
    Written,
    Removed,
    Ignored,
}

fn classify(kind: &EventKind) -> Change {
    match kind {
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
            Change::Written
        }
        EventKind::Remove(_) => Change::Removed,
        _ => Change::Ignored,
    }
}

/// Per-path debounce timers.
pub(crate) struct Debouncer {
    quiet: Duration,
    timers: HashMap<PathBuf, mpsc::Sender<()>>,
    reload: ReloadFn,
    cancel: CancellationToken,
}

impl Debouncer {
    pub(crate) fn new(quiet: Duration, reload: ReloadFn, cancel: CancellationToken) -> Self {
        Self {
            quiet,
            timers: HashMap::new(),
            reload,
            cancel,
        }
    }

    /// Record a write to `path`, arming or resetting its timer.
    pub(crate) fn notify(&mut self, path: &Path) {
        if let Some(resets) = self.timers.get(path) {
            match resets.try_send(()) {
                // A reset already queued has the same effect.
                Ok(()) | Err(mpsc::error::TrySendError::Full(())) => return,
                Err(mpsc::error::TrySendError::Closed(())) => {}
            }
        }

        // Fired timers leave closed senders behind.
        self.timers.retain(|_, resets| !resets.is_closed());
        let (tx, rx) = mpsc::channel(1);
        self.timers.insert(path.to_path_buf(), tx);
        tokio::spawn(debounce(
            path.to_path_buf(),
            rx,
            self.quiet,
            Arc::clone(&self.reload),
            self.cancel.clone(),
        ));
    }

    /// Drop the timer of a removed file without firing it.
    pub(crate) fn forget(&mut self, path: &Path) {
        self.timers.remove(path);
    }

    /// Number of paths with a live timer.
    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.timers.values().filter(|tx| !tx.is_closed()).count()
    }

    /// Number of paths in the timer table, fired or not.
    #[cfg(test)]
    pub(crate) fn tracked(&self) -> usize {
        self.timers.len()
    }
}

async fn debounce(
    path: PathBuf,
    mut resets: mpsc::Receiver<()>,
    quiet: Duration,
    reload: ReloadFn,
    cancel: CancellationToken,
) {
    let sleep = tokio::time::sleep(quiet);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            reset = resets.recv() => match reset {
                Some(()) => sleep.as_mut().reset(Instant::now() + quiet),
                // Forgotten by the coordinator.
                None => return,
            },
            () = &mut sleep => break,
        }
    }

    resets.close();
    debug!("Reloading {} after quiet period", path.display());
    reload(path).await;
}

/// Handle used by the cache to talk to the coordinating task.
pub(crate) struct WatchHandle {
    commands: mpsc::UnboundedSender<WatchCommand>,
}

impl WatchHandle {
    /// Register `path` with the watcher.
    pub(crate) async fn watch(&self, path: &Path) -> Result<(), KeyCacheError> {
        let (reply, response) = oneshot::channel();
        let command = WatchCommand::Watch {
            path: path.to_path_buf(),
            reply,
        };
        self.commands
            .send(command)
            .map_err(|_| KeyCacheError::Closed)?;
        response
            .await
            .map_err(|_| KeyCacheError::Closed)?
            .map_err(|source| KeyCacheError::Watch {
                path: path.to_path_buf(),
                source,
            })
    }
}

/// Create the watcher and spawn the coordinating task.
pub(crate) fn spawn(
    store: Arc<KeyStore>,
    quiet: Duration,
    cancel: CancellationToken,
) -> notify::Result<(WatchHandle, tokio::task::JoinHandle<()>)> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        // The receiver is gone only after shutdown.
        let _ = events_tx.send(res);
    })?;

    let reload_store = Arc::clone(&store);
    let reload: ReloadFn = Arc::new(move |path: PathBuf| {
        let store = Arc::clone(&reload_store);
        Box::pin(async move {
            if let Err(e) = store.reload(&path).await {
                warn!("Keeping previous keys for {}: {}", path.display(), e);
            }
        })
    });

    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let debouncer = Debouncer::new(quiet, reload, cancel.clone());
    let task = tokio::spawn(coordinate(
        watcher,
        store,
        debouncer,
        commands_rx,
        events_rx,
        cancel,
    ));

    Ok((
        WatchHandle {
            commands: commands_tx,
        },
        task,
    ))
}

async fn coordinate(
    mut watcher: RecommendedWatcher,
    store: Arc<KeyStore>,
    mut debouncer: Debouncer,
    mut commands: mpsc::UnboundedReceiver<WatchCommand>,
    mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(command) = commands.recv() => match command {
                WatchCommand::Watch { path, reply } => {
                    let result = watcher.watch(&path, RecursiveMode::NonRecursive);
                    if result.is_ok() {
                        debug!("Watching {}", path.display());
                    }
                    let _ = reply.send(result);
                }
            },
            Some(event) = events.recv() => match event {
                Ok(event) => handle_event(&mut watcher, &store, &mut debouncer, event),
                Err(e) => warn!("Error watching authorized keys files: {}", e),
            },
            else => break,
        }
    }
    debug!("Key cache watcher stopped");
}

fn handle_event(
    watcher: &mut RecommendedWatcher,
    store: &KeyStore,
    debouncer: &mut Debouncer,
    event: Event,
) {
    match classify(&event.kind) {
        Change::Written => {
            for path in &event.paths {
                debouncer.notify(path);
            }
        }
        Change::Removed => {
            for path in &event.paths {
                debug!("{} removed, evicting cached keys", path.display());
                debouncer.forget(path);
                store.evict(path);
                // The kernel drops the watch with the inode; forget ours so a
                // later lookup can register the path again.
                let _ = watcher.unwatch(path);
            }
        }
        Change::Ignored => {}
    }
}
