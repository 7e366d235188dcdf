use std::fmt;

use parking_lot::MutexGuard;
use tracing::{debug, warn};

use crate::{
    storage::pager::{CommitInfo, Pager, TxnView, WriteHandle, WriteSet},
    types::error::{DatabaseError, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Active,
    Committing,
    RolledBack,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::Idle => "idle",
            TransactionState::Active => "active",
            TransactionState::Committing => "committing",
            TransactionState::RolledBack => "rolled back",
        };
        f.write_str(name)
    }
}

/// The single writer: holds the pager's writer lock from `begin` until
/// commit or rollback, together with the private write set.
pub struct WriteTransaction<'p> {
    pager: &'p Pager,
    guard: MutexGuard<'p, ()>,
    set: Option<WriteSet>,
    state: TransactionState,
    abort_reason: Option<String>,
}

impl<'p> WriteTransaction<'p> {
    pub fn begin(pager: &'p Pager) -> Result<Self> {
        let guard = pager.lock_writer()?;
        let set = pager.begin_write(&guard)?;
        debug!(generation = set.base_generation(), "began write transaction");
        Ok(Self {
            pager,
            guard,
            set: Some(set),
            state: TransactionState::Active,
            abort_reason: None,
        })
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn pager(&self) -> &'p Pager {
        self.pager
    }

    pub fn writer_guard(&self) -> &MutexGuard<'p, ()> {
        &self.guard
    }

    fn inactive(&self) -> DatabaseError {
        DatabaseError::TransactionAborted {
            reason: self
                .abort_reason
                .clone()
                .unwrap_or_else(|| format!("transaction is {}", self.state)),
        }
    }

    pub fn write_set(&self) -> Result<&WriteSet> {
        match (&self.set, self.state) {
            (Some(set), TransactionState::Active) => Ok(set),
            _ => Err(self.inactive()),
        }
    }

    /// Runs a read against the transaction's view of the pages.
    pub fn read<T>(&self, f: impl FnOnce(&TxnView<'_>) -> Result<T>) -> Result<T> {
        let set = self.write_set()?;
        f(&self.pager.txn_view(set))
    }

    /// Runs a mutation. Any error rolls the whole transaction back, after
    /// which every call fails with `TransactionAborted`.
    pub fn write<T>(&mut self, f: impl FnOnce(&mut WriteHandle<'_>) -> Result<T>) -> Result<T> {
        if self.state != TransactionState::Active {
            return Err(self.inactive());
        }
        let pager = self.pager;
        let Some(set) = self.set.as_mut() else {
            return Err(self.inactive());
        };

        let result = f(&mut pager.write_handle(set));
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(error = %e, "write failed, rolling back transaction");
                self.abort_reason = Some(e.to_string());
                let rolled_back = self.rollback();
                Err(root_cause(e, rolled_back))
            }
        }
    }

    pub fn commit(&mut self) -> Result<CommitInfo> {
        if self.state != TransactionState::Active {
            return Err(self.inactive());
        }
        let Some(mut set) = self.set.take() else {
            return Err(self.inactive());
        };

        self.state = TransactionState::Committing;
        match self.pager.commit(&mut set) {
            Ok(info) => {
                self.state = TransactionState::Idle;
                Ok(info)
            }
            Err(e) => {
                warn!(error = %e, "commit failed, rolling back transaction");
                self.abort_reason = Some(e.to_string());
                self.state = TransactionState::RolledBack;
                let rolled_back = self.pager.rollback(set);
                Err(root_cause(e, rolled_back))
            }
        }
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.state = TransactionState::RolledBack;
        match self.set.take() {
            Some(set) => self.pager.rollback(set),
            None => Ok(()),
        }
    }
}

/// Reports `cause` even when the rollback it triggered fails too; the
/// rollback failure is only logged.
fn root_cause(cause: DatabaseError, rolled_back: Result<()>) -> DatabaseError {
    if let Err(e) = rolled_back {
        warn!(error = %e, cause = %cause, "rollback after failed write also failed");
    }
    cause
}

impl Drop for WriteTransaction<'_> {
    fn drop(&mut self) {
        if self.set.is_some() {
            if let Err(e) = self.rollback() {
                warn!(error = %e, "rollback on drop failed");
            }
        }
    }
}
