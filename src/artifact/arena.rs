//! Per-post temporary directories
//!
//! Every post being built gets its own randomly named directory under the local
//! files root. Directories live in generation-indexed slots: releasing a
//! [`PostDir`] deletes its directory and bumps the slot generation, so a handle
//! from an earlier generation can never touch a reused slot. Handles dropped
//! without release leave their slot orphaned until [`TempArena::sweep`].

use super::Artifact;
use crate::Result;
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

const DIR_NAME_LEN: usize = 12;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotState {
    Free,
    Live,
    Orphaned,
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    dir_name: String,
    state: SlotState,
}

#[derive(Debug, Default)]
struct Slots {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

/// Owner of all per-post temporary directories
#[derive(Clone, Debug)]
pub struct TempArena {
    local_root: PathBuf,
    server_root: PathBuf,
    slots: Arc<Mutex<Slots>>,
}

impl TempArena {
    /// Create an arena rooted at `local_root`, seen by the upload server as `server_root`
    pub fn new(local_root: impl Into<PathBuf>, server_root: impl Into<PathBuf>) -> Self {
        Self {
            local_root: local_root.into(),
            server_root: server_root.into(),
            slots: Arc::new(Mutex::new(Slots::default())),
        }
    }

    /// Local root directory
    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a fresh directory for one post
    pub async fn allocate(&self) -> Result<PostDir> {
        let dir_name: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(DIR_NAME_LEN)
            .map(char::from)
            .collect();
        let local = self.local_root.join(&dir_name);
        tokio::fs::create_dir_all(&local).await?;

        let (index, generation) = {
            let mut slots = self.lock();
            match slots.free.pop() {
                Some(index) => {
                    let slot = &mut slots.slots[index];
                    slot.dir_name = dir_name.clone();
                    slot.state = SlotState::Live;
                    (index, slot.generation)
                }
                None => {
                    slots.slots.push(Slot {
                        generation: 0,
                        dir_name: dir_name.clone(),
                        state: SlotState::Live,
                    });
                    (slots.slots.len() - 1, 0)
                }
            }
        };

        tracing::debug!(dir = %local.display(), index, generation, "Post directory allocated");
        Ok(PostDir {
            arena: self.clone(),
            index,
            generation,
            server: self.server_root.join(&dir_name),
            local,
            released: false,
        })
    }

    /// Number of directories currently held by live handles
    pub fn live_count(&self) -> usize {
        self.lock()
            .slots
            .iter()
            .filter(|s| s.state == SlotState::Live)
            .count()
    }

    /// Remove the directories of handles that were dropped without release
    ///
    /// Returns how many directories were reclaimed.
    pub async fn sweep(&self) -> Result<usize> {
        let orphaned: Vec<(usize, u64, String)> = {
            let slots = self.lock();
            slots
                .slots
                .iter()
                .enumerate()
                .filter(|(_, s)| s.state == SlotState::Orphaned)
                .map(|(i, s)| (i, s.generation, s.dir_name.clone()))
                .collect()
        };

        let mut reclaimed = 0;
        for (index, generation, dir_name) in orphaned {
            remove_dir(&self.local_root.join(&dir_name)).await?;
            if self.retire(index, generation, SlotState::Orphaned) {
                reclaimed += 1;
            }
        }

        if reclaimed > 0 {
            tracing::info!(reclaimed, "Swept orphaned post directories");
        }
        Ok(reclaimed)
    }

    /// Remove everything under the local root
    ///
    /// Meant for start-up, before any directory is allocated.
    pub async fn sweep_root(&self) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.local_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await?;
            } else {
                tokio::fs::remove_file(&path).await?;
            }
            removed += 1;
        }

        if removed > 0 {
            tracing::info!(removed, root = %self.local_root.display(), "Removed leftovers from a previous run");
        }
        Ok(removed)
    }

    /// Free a slot if it is still at `generation` and in `expected` state
    fn retire(&self, index: usize, generation: u64, expected: SlotState) -> bool {
        let mut slots = self.lock();
        let Some(slot) = slots.slots.get_mut(index) else {
            return false;
        };
        if slot.generation != generation || slot.state != expected {
            return false;
        }
        slot.generation += 1;
        slot.state = SlotState::Free;
        slot.dir_name.clear();
        slots.free.push(index);
        true
    }

    fn orphan(&self, index: usize, generation: u64) {
        let mut slots = self.lock();
        if let Some(slot) = slots.slots.get_mut(index)
            && slot.generation == generation
            && slot.state == SlotState::Live
        {
            slot.state = SlotState::Orphaned;
        }
    }
}

/// Handle to one post's temporary directory
#[derive(Debug)]
pub struct PostDir {
    arena: TempArena,
    index: usize,
    generation: u64,
    local: PathBuf,
    server: PathBuf,
    released: bool,
}

impl PostDir {
    /// Directory on local disk
    pub fn local(&self) -> &Path {
        &self.local
    }

    /// The same directory as seen by the upload server
    pub fn server(&self) -> &Path {
        &self.server
    }

    /// Describe a file written directly inside this directory
    pub fn artifact(&self, local_path: PathBuf) -> Artifact {
        let server_path = match local_path.file_name() {
            Some(name) => self.server.join(name),
            None => self.server.clone(),
        };
        Artifact {
            server_path,
            local_path,
        }
    }

    /// Delete the directory and free the slot
    ///
    /// A handle whose slot has moved on is a no-op.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        if !self.arena.is_current(self.index, self.generation) {
            return Ok(());
        }
        remove_dir(&self.local).await?;
        self.arena.retire(self.index, self.generation, SlotState::Live);
        tracing::debug!(dir = %self.local.display(), "Post directory released");
        Ok(())
    }
}

impl TempArena {
    fn is_current(&self, index: usize, generation: u64) -> bool {
        self.lock()
            .slots
            .get(index)
            .is_some_and(|s| s.generation == generation && s.state == SlotState::Live)
    }
}

impl Drop for PostDir {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(dir = %self.local.display(), "Post directory dropped without release");
            self.arena.orphan(self.index, self.generation);
        }
    }
}

async fn remove_dir(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
