//! Explicit arena of open sandboxes keyed by [`SandboxId`].
//!
//! The arena map sits behind an `RwLock`; each sandbox sits behind its own
//! `Mutex`. Callers clone a [`SandboxHandle`] out of the map and lock it
//! without holding the map lock. When both a deck lock and sandbox locks are
//! needed, the deck lock is always taken first.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use deckmerge_store::DeckIdentity;
use serde::{Deserialize, Serialize};

use crate::model::types::SandboxId;
use crate::sandbox::Sandbox;

/// Shared, lockable sandbox.
pub type SandboxHandle<R> = Arc<Mutex<Sandbox<R>>>;

/// Lock a sandbox. A panic in another holder does not leave the entry set
/// half-written (every mutation validates before it writes), so poisoning is
/// ignored.
pub fn lock<R>(handle: &SandboxHandle<R>) -> MutexGuard<'_, Sandbox<R>> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct ArenaInner<R> {
    next_id: u64,
    sandboxes: BTreeMap<SandboxId, SandboxHandle<R>>,
}

/// Serializable image of an arena.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaSnapshot<R> {
    /// Next sandbox id to hand out.
    pub next_id: u64,
    /// Open sandboxes sorted by id.
    pub sandboxes: Vec<Sandbox<R>>,
}

impl<R> Default for ArenaSnapshot<R> {
    fn default() -> Self {
        Self {
            next_id: 1,
            sandboxes: Vec::new(),
        }
    }
}

/// All open sandboxes.
#[derive(Debug)]
pub struct SandboxArena<R> {
    inner: RwLock<ArenaInner<R>>,
}

impl<R> Default for SandboxArena<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> SandboxArena<R> {
    /// An empty arena.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: RwLock::new(ArenaInner {
                next_id: 1,
                sandboxes: BTreeMap::new(),
            }),
        }
    }

    /// Allocate an id, build the sandbox with it and register it.
    pub fn insert_with(&self, build: impl FnOnce(SandboxId) -> Sandbox<R>) -> SandboxId {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let id = SandboxId(inner.next_id);
        inner.next_id += 1;
        inner
            .sandboxes
            .insert(id, Arc::new(Mutex::new(build(id))));
        id
    }

    /// Handle to one sandbox.
    pub fn get(&self, id: SandboxId) -> Option<SandboxHandle<R>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.sandboxes.get(&id).cloned()
    }

    /// Unregister a sandbox. Returns its handle if it was present.
    pub fn remove(&self, id: SandboxId) -> Option<SandboxHandle<R>> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.sandboxes.remove(&id)
    }

    /// Handles to every open sandbox, sorted by id.
    pub fn handles(&self) -> Vec<(SandboxId, SandboxHandle<R>)> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .sandboxes
            .iter()
            .map(|(id, h)| (*id, Arc::clone(h)))
            .collect()
    }

    /// Handles to every open sandbox on `deck` except `except`.
    pub fn on_deck(
        &self,
        deck: &DeckIdentity,
        except: Option<SandboxId>,
    ) -> Vec<(SandboxId, SandboxHandle<R>)> {
        self.handles()
            .into_iter()
            .filter(|(id, _)| Some(*id) != except)
            .filter(|(_, h)| lock(h).deck == *deck)
            .collect()
    }

    /// Number of open sandboxes.
    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.sandboxes.len()
    }

    /// Whether no sandbox is open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<R: Clone> SandboxArena<R> {
    /// Export every sandbox.
    pub fn snapshot(&self) -> ArenaSnapshot<R> {
        let (next_id, handles) = {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            let handles: Vec<_> = inner.sandboxes.values().cloned().collect();
            (inner.next_id, handles)
        };
        ArenaSnapshot {
            next_id,
            sandboxes: handles.iter().map(|h| lock(h).clone()).collect(),
        }
    }

    /// Rebuild an arena from a snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: ArenaSnapshot<R>) -> Self {
        let max_id = snapshot.sandboxes.iter().map(|s| s.id.0).max().unwrap_or(0);
        let sandboxes = snapshot
            .sandboxes
            .into_iter()
            .map(|s| (s.id, Arc::new(Mutex::new(s))))
            .collect();
        Self {
            inner: RwLock::new(ArenaInner {
                next_id: snapshot.next_id.max(max_id + 1),
                sandboxes,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use deckmerge_store::{DeckType, Revision};

    use super::*;
    use crate::model::record::Selection;
    use crate::model::types::Owner;

    fn deck(number: u16) -> DeckIdentity {
        DeckIdentity::new("AL", number, 2024, DeckType::B).unwrap()
    }

    fn add(arena: &SandboxArena<u32>, number: u16) -> SandboxId {
        arena.insert_with(|id| {
            Sandbox::new(
                id,
                deck(number),
                Owner::new("alice").unwrap(),
                Selection::all(),
                Revision(0),
                0,
            )
        })
    }

    #[test]
    fn ids_are_sequential_and_not_reused() {
        let arena = SandboxArena::new();
        let a = add(&arena, 1);
        let b = add(&arena, 1);
        assert_eq!((a, b), (SandboxId(1), SandboxId(2)));
        assert!(arena.remove(b).is_some());
        assert_eq!(add(&arena, 1), SandboxId(3));
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn remove_is_idempotent() {
        let arena = SandboxArena::new();
        let a = add(&arena, 1);
        assert!(arena.remove(a).is_some());
        assert!(arena.remove(a).is_none());
        assert!(arena.get(a).is_none());
        assert!(arena.is_empty());
    }

    #[test]
    fn on_deck_filters_and_excludes() {
        let arena = SandboxArena::new();
        let a = add(&arena, 1);
        let b = add(&arena, 1);
        let _c = add(&arena, 2);
        let ids: Vec<_> = arena.on_deck(&deck(1), Some(a)).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![b]);
    }

    #[test]
    fn snapshot_round_trip_keeps_next_id() {
        let arena = SandboxArena::new();
        add(&arena, 1);
        let b = add(&arena, 1);
        arena.remove(b);
        let restored = SandboxArena::from_snapshot(arena.snapshot());
        assert_eq!(restored.len(), 1);
        assert_eq!(add(&restored, 1), SandboxId(3));
    }
}
