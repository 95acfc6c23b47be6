//! Shader hot-reload.
//!
//! Watches the directories holding a program's stages and every file they
//! include. Filesystem events are collected on a worker thread; once no event
//! has arrived for the debounce window the program is re-flattened and the
//! result is delivered through a channel, so the consumer can swap programs
//! at a point of its choosing.

use notify::{
    Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::include::ShaderError;
use crate::reload::{ProgramReloader, ProgramSource, ReloadOutcome};
use latinium_common::ProgramPaths;

/// Default quiet period after the last event before a reload runs.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Events emitted by [`ShaderWatcher`].
#[derive(Debug)]
pub enum ReloadEvent {
    /// The program flattened to new sources.
    Reloaded(ProgramSource),
    /// Flattening failed; keep using the previous program.
    Failed(ShaderError),
}

/// Errors from setting up a watcher.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("failed to watch files: {0}")]
    Notify(#[from] notify::Error),
    #[error("watch root not found: {}", .0.display())]
    MissingRoot(PathBuf),
    #[error("failed to start watcher thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Trailing-edge debounce: a burst of events fires once, a full window after
/// the last event of the burst.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    last_event: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_event: None,
        }
    }

    /// Note an event at `now`, pushing the deadline back.
    pub fn record(&mut self, now: Instant) {
        self.last_event = Some(now);
    }

    /// When the pending burst fires, if one is pending.
    pub fn deadline(&self) -> Option<Instant> {
        self.last_event.map(|last| last + self.window)
    }

    /// Whether the pending burst is due at `now`. Firing clears it.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline() {
            Some(deadline) if now >= deadline => {
                self.last_event = None;
                true
            }
            _ => false,
        }
    }
}

enum WatchMessage {
    Changed(Event),
    Shutdown,
}

/// Watches a program's sources and reloads it on change.
pub struct ShaderWatcher {
    control: Sender<WatchMessage>,
    receiver: Receiver<ReloadEvent>,
    roots: Arc<Mutex<Vec<PathBuf>>>,
    worker: Option<JoinHandle<()>>,
}

impl ShaderWatcher {
    /// Watch with the default debounce window.
    pub fn new(reloader: ProgramReloader) -> Result<Self, WatchError> {
        Self::with_debounce(reloader, DEFAULT_DEBOUNCE)
    }

    /// Take over `reloader` and watch its program. A reloader that has not
    /// loaded yet is loaded first, so only later changes produce events.
    pub fn with_debounce(
        mut reloader: ProgramReloader,
        debounce: Duration,
    ) -> Result<Self, WatchError> {
        if reloader.last_good().is_none() {
            if let ReloadOutcome::Failed(e) = reloader.reload() {
                tracing::warn!("initial load failed, watching stage directories only: {e}");
            }
        }

        let (control, control_rx) = mpsc::channel();
        let (tx, rx) = mpsc::channel();

        let notify_tx = control.clone();
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => {
                    let _ = notify_tx.send(WatchMessage::Changed(event));
                }
                Err(e) => {
                    tracing::error!("watch error: {e:?}");
                }
            },
            NotifyConfig::default().with_poll_interval(Duration::from_secs(1)),
        )?;

        let initial = watch_roots(reloader.paths(), reloader.last_good())?;
        for root in &initial {
            watcher.watch(root, RecursiveMode::Recursive)?;
            tracing::info!("watching shader directory: {}", root.display());
        }
        let roots = Arc::new(Mutex::new(initial));

        let worker = Worker {
            watcher,
            reloader,
            debouncer: Debouncer::new(debounce),
            roots: Arc::clone(&roots),
            events: tx,
        };
        let handle = thread::Builder::new()
            .name("shader-watcher".into())
            .spawn(move || worker.run(control_rx))
            .map_err(WatchError::Spawn)?;

        Ok(Self {
            control,
            receiver: rx,
            roots,
            worker: Some(handle),
        })
    }

    /// Directories being watched. Grows and shrinks with the include set.
    pub fn roots(&self) -> Vec<PathBuf> {
        self.roots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Try to receive a reload event without blocking.
    pub fn try_recv(&self) -> Option<ReloadEvent> {
        self.receiver.try_recv().ok()
    }

    /// Block for at most `timeout`. `None` on timeout or if the watcher died.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ReloadEvent> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                tracing::warn!("shader watcher disconnected");
                None
            }
        }
    }

    /// All pending events.
    pub fn drain_events(&self) -> Vec<ReloadEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

impl Drop for ShaderWatcher {
    fn drop(&mut self) {
        let _ = self.control.send(WatchMessage::Shutdown);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::error!("shader watcher thread panicked");
            }
        }
    }
}

/// State owned by the watcher thread.
struct Worker {
    watcher: RecommendedWatcher,
    reloader: ProgramReloader,
    debouncer: Debouncer,
    roots: Arc<Mutex<Vec<PathBuf>>>,
    events: Sender<ReloadEvent>,
}

impl Worker {
    fn run(mut self, control: Receiver<WatchMessage>) {
        loop {
            let message = match self.debouncer.deadline() {
                Some(deadline) => {
                    control.recv_timeout(deadline.saturating_duration_since(Instant::now()))
                }
                None => control.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match message {
                Ok(WatchMessage::Changed(event)) => {
                    if is_relevant(&event, &self.current_roots()) {
                        tracing::trace!(paths = ?event.paths, "shader source event");
                        self.debouncer.record(Instant::now());
                    }
                }
                Ok(WatchMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
            if self.debouncer.fire(Instant::now()) {
                self.reload();
            }
        }
        tracing::debug!("shader watcher stopped");
    }

    fn current_roots(&self) -> Vec<PathBuf> {
        self.roots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn reload(&mut self) {
        tracing::debug!("shader sources settled, reloading");
        let event = match self.reloader.reload() {
            ReloadOutcome::Updated(program) => {
                self.rewatch();
                ReloadEvent::Reloaded(program)
            }
            ReloadOutcome::Failed(e) => ReloadEvent::Failed(e),
            ReloadOutcome::Unchanged => return,
        };
        if self.events.send(event).is_err() {
            tracing::trace!("reload receiver dropped");
        }
    }

    /// Follow the include set of the newest program.
    fn rewatch(&mut self) {
        let next = match watch_roots(self.reloader.paths(), self.reloader.last_good()) {
            Ok(next) => next,
            Err(e) => {
                tracing::warn!("keeping previous watch roots: {e}");
                return;
            }
        };
        let mut roots = self.roots.lock().unwrap_or_else(PoisonError::into_inner);
        for old in roots.iter().filter(|r| !next.contains(r)) {
            if let Err(e) = self.watcher.unwatch(old) {
                tracing::debug!("unwatch {}: {e}", old.display());
            }
        }
        let mut kept = Vec::with_capacity(next.len());
        for root in next {
            if !roots.contains(&root) {
                if let Err(e) = self.watcher.watch(&root, RecursiveMode::Recursive) {
                    tracing::warn!("failed to watch {}: {e}", root.display());
                    continue;
                }
                tracing::info!("watching shader directory: {}", root.display());
            }
            kept.push(root);
        }
        *roots = kept;
    }
}

/// Canonical parent directories of both stages and of every file the last
/// good program was flattened from. A directory nested inside another root
/// is dropped since roots are watched recursively.
fn watch_roots(
    paths: &ProgramPaths,
    program: Option<&ProgramSource>,
) -> Result<Vec<PathBuf>, WatchError> {
    let mut roots: Vec<PathBuf> = Vec::new();
    for (_, path) in paths.stages() {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let dir = std::fs::canonicalize(dir)
            .map_err(|_| WatchError::MissingRoot(dir.to_path_buf()))?;
        roots.push(dir);
    }
    if let Some(program) = program {
        // Dependencies are already canonical.
        roots.extend(
            program
                .dependencies()
                .into_iter()
                .filter_map(Path::parent)
                .map(Path::to_path_buf),
        );
    }

    roots.sort();
    roots.dedup();
    let mut kept: Vec<PathBuf> = Vec::new();
    for root in roots {
        if !kept.iter().any(|k| root.starts_with(k)) {
            kept.push(root);
        }
    }
    Ok(kept)
}

fn is_relevant(event: &Event, roots: &[PathBuf]) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
        && event
            .paths
            .iter()
            .any(|p| roots.iter().any(|root| p.starts_with(root)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, ModifyKind};
    use std::fs;

    const WAIT: Duration = Duration::from_secs(5);

    /// Receive until `done` accepts a reloaded program or `WAIT` runs out.
    fn wait_for_reload(
        watcher: &ShaderWatcher,
        done: impl Fn(&ProgramSource) -> bool,
    ) -> Option<ProgramSource> {
        let deadline = Instant::now() + WAIT;
        while let Some(left) = deadline.checked_duration_since(Instant::now()) {
            match watcher.recv_timeout(left) {
                Some(ReloadEvent::Reloaded(program)) if done(&program) => return Some(program),
                Some(_) => continue,
                None => return None,
            }
        }
        None
    }

    fn loaded(paths: ProgramPaths) -> ProgramReloader {
        let mut reloader = ProgramReloader::new(paths);
        assert!(matches!(reloader.reload(), ReloadOutcome::Updated(_)));
        reloader
    }

    fn simple_pack(dir: &Path) -> ProgramPaths {
        fs::write(dir.join("gbuffers_textured.vsh"), "void main() {}").unwrap();
        fs::write(dir.join("gbuffers_textured.fsh"), "f0").unwrap();
        ProgramPaths::named(dir, "gbuffers_textured")
    }

    #[test]
    fn debouncer_fires_after_quiet_period() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        let t0 = Instant::now();
        assert!(!debouncer.fire(t0));

        debouncer.record(t0);
        assert!(!debouncer.fire(t0 + Duration::from_millis(50)));
        // A second event pushes the deadline back.
        debouncer.record(t0 + Duration::from_millis(80));
        assert!(!debouncer.fire(t0 + Duration::from_millis(150)));
        assert_eq!(debouncer.deadline(), Some(t0 + Duration::from_millis(180)));
        assert!(debouncer.fire(t0 + Duration::from_millis(180)));
        assert!(!debouncer.fire(t0 + Duration::from_millis(500)));
        assert_eq!(debouncer.deadline(), None);
    }

    #[test]
    fn only_writes_under_roots_are_relevant() {
        let roots = vec![PathBuf::from("/pack/shaders")];
        let write = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(PathBuf::from("/pack/shaders/lib/light.glsl"));
        let create = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/pack/shaders/gbuffers_water.fsh"));
        let access = Event::new(EventKind::Access(AccessKind::Any))
            .add_path(PathBuf::from("/pack/shaders/lib/light.glsl"));
        let elsewhere = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/pack/textures/noise.png"));

        assert!(is_relevant(&write, &roots));
        assert!(is_relevant(&create, &roots));
        assert!(!is_relevant(&access, &roots));
        assert!(!is_relevant(&elsewhere, &roots));
    }

    #[test]
    fn nested_roots_collapse() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("program")).unwrap();
        let paths = ProgramPaths::new(
            tmp.path().join("a.vsh"),
            tmp.path().join("program/a.fsh"),
        );
        let roots = watch_roots(&paths, None).unwrap();
        assert_eq!(roots, vec![fs::canonicalize(tmp.path()).unwrap()]);
    }

    #[test]
    fn include_directories_become_roots() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("program")).unwrap();
        fs::create_dir_all(tmp.path().join("lib")).unwrap();
        fs::write(tmp.path().join("lib/common.glsl"), "float fog;").unwrap();
        fs::write(
            tmp.path().join("program/p.vsh"),
            "#include \"../lib/common.glsl\"",
        )
        .unwrap();
        fs::write(tmp.path().join("program/p.fsh"), "void main() {}").unwrap();
        let paths = ProgramPaths::named(tmp.path().join("program"), "p");

        let program = ProgramSource::load(&paths).unwrap();
        let roots = watch_roots(&paths, Some(&program)).unwrap();
        let base = fs::canonicalize(tmp.path()).unwrap();
        assert_eq!(roots, vec![base.join("lib"), base.join("program")]);
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = ProgramPaths::named(tmp.path().join("absent"), "gbuffers_basic");
        assert!(matches!(
            watch_roots(&paths, None),
            Err(WatchError::MissingRoot(_))
        ));
    }

    #[test]
    fn watcher_starts_quietly_on_existing_pack() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = simple_pack(tmp.path());
        let watcher = ShaderWatcher::new(ProgramReloader::new(paths)).unwrap();
        assert_eq!(watcher.roots().len(), 1);
        assert!(watcher.recv_timeout(Duration::from_millis(300)).is_none());
    }

    #[test]
    fn save_delivers_new_program() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = simple_pack(tmp.path());
        let watcher = ShaderWatcher::new(loaded(paths.clone())).unwrap();

        fs::write(&paths.fragment, "f1").unwrap();
        let program = wait_for_reload(&watcher, |p| p.fragment.source() == "f1");
        assert!(program.is_some(), "no reload after saving the fragment stage");
    }

    #[test]
    fn burst_of_writes_settles_on_final_content() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = simple_pack(tmp.path());
        let watcher = ShaderWatcher::new(loaded(paths.clone())).unwrap();

        fs::write(&paths.fragment, "f1").unwrap();
        thread::sleep(Duration::from_millis(30));
        fs::write(&paths.fragment, "f2").unwrap();

        let program = wait_for_reload(&watcher, |p| p.fragment.source() == "f2");
        assert!(program.is_some(), "last write of the burst was not delivered");
        thread::sleep(DEFAULT_DEBOUNCE * 3);
        for event in watcher.drain_events() {
            if let ReloadEvent::Reloaded(p) = event {
                assert_eq!(p.fragment.source(), "f2");
            }
        }
    }

    #[test]
    fn include_outside_stage_directory_triggers_reload() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("program")).unwrap();
        fs::create_dir_all(tmp.path().join("lib")).unwrap();
        fs::write(tmp.path().join("lib/common.glsl"), "float fog;").unwrap();
        fs::write(
            tmp.path().join("program/p.vsh"),
            "#include \"../lib/common.glsl\"",
        )
        .unwrap();
        fs::write(tmp.path().join("program/p.fsh"), "void main() {}").unwrap();
        let paths = ProgramPaths::named(tmp.path().join("program"), "p");

        let watcher = ShaderWatcher::new(loaded(paths)).unwrap();
        let lib = fs::canonicalize(tmp.path().join("lib")).unwrap();
        assert!(watcher.roots().contains(&lib));

        fs::write(tmp.path().join("lib/common.glsl"), "float rain;").unwrap();
        let program = wait_for_reload(&watcher, |p| p.vertex.source().contains("rain"));
        assert!(program.is_some(), "include edit outside the stage directory was missed");
    }

    #[test]
    fn identical_rewrite_is_not_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = simple_pack(tmp.path());
        let watcher = ShaderWatcher::new(loaded(paths.clone())).unwrap();

        fs::write(&paths.fragment, "f0").unwrap();
        assert!(watcher.recv_timeout(Duration::from_millis(500)).is_none());
    }
}
