use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::RowId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Insert,
    Update,
    Delete,
}

pub type UpdateHook = Box<dyn Fn(Action, RowId) + Send + Sync>;
/// Returning `false` vetoes the commit.
pub type CommitHook = Box<dyn Fn() -> bool + Send + Sync>;
pub type RollbackHook = Box<dyn Fn() + Send + Sync>;
/// Receives the number of committed frames waiting in the WAL.
pub type WalHook = Box<dyn Fn(u64) + Send + Sync>;

#[derive(Default)]
struct HookSet {
    update: Option<Arc<UpdateHook>>,
    commit: Option<Arc<CommitHook>>,
    rollback: Option<Arc<RollbackHook>>,
    wal: Option<Arc<WalHook>>,
}

/// Callbacks registered on a connection. Each hook is cloned out of the lock
/// before it runs, so a hook may replace hooks without deadlocking.
#[derive(Default)]
pub struct Hooks {
    set: RwLock<HookSet>,
}

impl Hooks {
    pub fn set_update(&self, hook: Option<UpdateHook>) {
        self.set.write().update = hook.map(Arc::new);
    }

    pub fn set_commit(&self, hook: Option<CommitHook>) {
        self.set.write().commit = hook.map(Arc::new);
    }

    pub fn set_rollback(&self, hook: Option<RollbackHook>) {
        self.set.write().rollback = hook.map(Arc::new);
    }

    pub fn set_wal(&self, hook: Option<WalHook>) {
        self.set.write().wal = hook.map(Arc::new);
    }

    pub(crate) fn fire_update(&self, action: Action, key: RowId) {
        let hook = self.set.read().update.clone();
        if let Some(hook) = hook {
            hook(action, key);
        }
    }

    /// True unless a commit hook is registered and vetoes.
    pub(crate) fn allow_commit(&self) -> bool {
        let hook = self.set.read().commit.clone();
        hook.is_none_or(|hook| hook())
    }

    pub(crate) fn fire_rollback(&self) {
        let hook = self.set.read().rollback.clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    pub(crate) fn fire_wal(&self, frames: u64) {
        let hook = self.set.read().wal.clone();
        if let Some(hook) = hook {
            hook(frames);
        }
    }
}
