use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use netpipefs_wire::Mode;

use crate::error::Result;
use crate::link::PeerLink;
use crate::pipe::Pipe;

/// Path → pipe mapping for every pipe currently tracked on this peer.
///
/// One lock guards the map; it is never held while a pipe's mutex is taken
/// by the same caller in the opposite order (lock order: registry → pipe).
/// The registry itself never destroys a pipe — the last closer removes the
/// entry and the `Arc` does the rest.
pub struct Registry {
    pipes: Mutex<HashMap<String, Arc<Pipe>>>,
    link: Arc<PeerLink>,
    capacity: usize,
}

impl Registry {
    /// Create a registry whose pipes buffer `capacity` bytes locally and
    /// emit frames over `link`.
    pub fn new(link: Arc<PeerLink>, capacity: usize) -> Self {
        Self {
            pipes: Mutex::new(HashMap::new()),
            link,
            capacity,
        }
    }

    /// Open one local handle on `path`, creating the pipe on first use.
    pub fn open(&self, path: &str, mode: Mode, nonblock: bool) -> Result<Arc<Pipe>> {
        let (pipe, just_created) = self.get_or_create(path);
        match pipe.open_local(mode, nonblock) {
            Ok(()) => Ok(pipe),
            Err(err) => {
                if just_created {
                    self.remove_if_unused(path);
                }
                Err(err)
            }
        }
    }

    /// Mirror the peer's OPEN frame, creating the pipe on first use.
    pub fn open_update(&self, path: &str, mode: Mode) {
        let (pipe, _) = self.get_or_create(path);
        pipe.open_update(mode);
    }

    /// Look up an existing pipe.
    pub fn get(&self, path: &str) -> Option<Arc<Pipe>> {
        self.lock().get(path).cloned()
    }

    /// Remove `path` from the map. Idempotent; callers must not hold the
    /// pipe's mutex.
    pub fn remove(&self, path: &str) -> bool {
        self.lock().remove(path).is_some()
    }

    /// Set the sticky teardown flag on every tracked pipe.
    pub fn force_exit_all(&self) {
        let pipes: Vec<Arc<Pipe>> = self.lock().values().cloned().collect();
        for pipe in pipes {
            pipe.force_exit();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn get_or_create(&self, path: &str) -> (Arc<Pipe>, bool) {
        let mut pipes = self.lock();
        if let Some(pipe) = pipes.get(path) {
            return (Arc::clone(pipe), false);
        }
        let pipe = Arc::new(Pipe::new(path, self.capacity, Arc::clone(&self.link)));
        pipes.insert(path.to_string(), Arc::clone(&pipe));
        (pipe, true)
    }

    /// Remove `path` only if no handle or queued request holds it; used to
    /// undo a creating open that failed, without racing a concurrent open.
    fn remove_if_unused(&self, path: &str) {
        let mut pipes = self.lock();
        let unused = pipes.get(path).map(|pipe| pipe.is_unused());
        if unused == Some(true) {
            pipes.remove(path);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Pipe>>> {
        self.pipes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("pipes", &self.len())
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
