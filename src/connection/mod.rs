pub mod backup;
pub mod hooks;

use std::{
    ops::RangeBounds,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use parking_lot::MutexGuard;
use tracing::{debug, warn};

use crate::{
    connection::hooks::{Action, Hooks},
    executor::{
        ReadContext,
        blob::{self, Blob},
        function::{ArgCount, FunctionRegistry, ScalarFunction},
        range_scan::{KeyRange, RangeScanner},
    },
    storage::{
        btree::{BTree, InsertOutcome, TreeStats},
        cache::CacheStats,
        header::DatabaseHeader,
        pager::{
            CheckpointMode, CheckpointResult, CommitInfo, PageRead, PageWrite, Pager, PagerConfig,
            WriteHandle,
        },
        transaction::{TransactionState, WriteTransaction},
    },
    types::{
        RowId,
        error::{DatabaseError, Result},
        record::Record,
        value::Value,
    },
};

/// How to open a database file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOptions {
    read_only: bool,
    create: bool,
    config: PagerConfig,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            create: true,
            config: PagerConfig::default(),
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Whether a missing file is created. Ignored for read-only opens.
    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn config(mut self, config: PagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn cache_size(mut self, pages: usize) -> Self {
        self.config.cache_size = pages;
        self
    }

    pub fn busy_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.busy_timeout =
            timeout.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn wal_autocheckpoint(mut self, frames: u64) -> Self {
        self.config.wal_autocheckpoint = frames;
        self
    }

    pub fn checkpoint_on_close(mut self, enabled: bool) -> Self {
        self.config.checkpoint_on_close = enabled;
        self
    }

    pub fn open(&self, path: impl AsRef<Path>) -> Result<Connection> {
        Connection::open_with(path, self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    Commit,
    Rollback,
}

/// An open database. Reads run against a fresh committed snapshot per
/// call; writes go through a single `Transaction` at a time.
pub struct Connection {
    path: PathBuf,
    pager: Pager,
    hooks: Hooks,
    functions: FunctionRegistry,
}

impl Connection {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, &OpenOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, options: &OpenOptions) -> Result<Self> {
        let path = path.as_ref();
        let pager = Pager::open(
            path,
            options.read_only,
            options.create,
            options.config.clone(),
        )?;
        Ok(Self {
            path: path.to_path_buf(),
            pager,
            hooks: Hooks::default(),
            functions: FunctionRegistry::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.pager.is_read_only()
    }

    pub fn pager(&self) -> &Pager {
        &self.pager
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Checkpoints and removes the WAL, reporting any error that a plain
    /// drop would only log.
    pub fn close(self) -> Result<()> {
        self.pager.close()
    }

    pub fn begin(&self) -> Result<Transaction<'_>> {
        let inner = WriteTransaction::begin(&self.pager)?;
        Ok(Transaction { conn: self, inner })
    }

    /// Runs `f` inside a transaction and commits or rolls back according to
    /// the outcome it returns. An error rolls back.
    pub fn transaction<F>(&self, f: F) -> Result<TransactionOutcome>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<TransactionOutcome>,
    {
        let mut tx = self.begin()?;
        let outcome = f(&mut tx)?;
        match outcome {
            TransactionOutcome::Commit => {
                tx.commit()?;
            }
            TransactionOutcome::Rollback => tx.rollback()?,
        }
        Ok(outcome)
    }

    pub fn get(&self, key: RowId) -> Result<Option<Record>> {
        let payload = BTree::new(self.pager.snapshot()).find(key)?;
        payload.map(|bytes| Record::decode(&bytes)).transpose()
    }

    pub fn contains(&self, key: RowId) -> Result<bool> {
        BTree::new(self.pager.snapshot()).contains(key)
    }

    pub fn scan(&self, range: impl RangeBounds<RowId>) -> RangeScanner<'_, Self> {
        RangeScanner::new(self, KeyRange::from_bounds(range), false)
    }

    pub fn scan_rev(&self, range: impl RangeBounds<RowId>) -> RangeScanner<'_, Self> {
        RangeScanner::new(self, KeyRange::from_bounds(range), true)
    }

    pub fn open_blob(&self, key: RowId, column: usize) -> Result<Blob> {
        Blob::open(self, key, column)
    }

    pub fn check_integrity(&self) -> Result<TreeStats> {
        BTree::new(self.pager.snapshot()).verify()
    }

    /// Copies every committed frame into the main file and truncates the WAL.
    pub fn checkpoint(&self) -> Result<CheckpointResult> {
        self.checkpoint_mode(CheckpointMode::Truncate)
    }

    pub fn checkpoint_mode(&self, mode: CheckpointMode) -> Result<CheckpointResult> {
        self.pager.checkpoint(mode)
    }

    pub fn update_hook<F>(&self, hook: Option<F>)
    where
        F: Fn(Action, RowId) + Send + Sync + 'static,
    {
        self.hooks
            .set_update(hook.map(|f| Box::new(f) as hooks::UpdateHook));
    }

    pub fn commit_hook<F>(&self, hook: Option<F>)
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.hooks
            .set_commit(hook.map(|f| Box::new(f) as hooks::CommitHook));
    }

    pub fn rollback_hook<F>(&self, hook: Option<F>)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks
            .set_rollback(hook.map(|f| Box::new(f) as hooks::RollbackHook));
    }

    pub fn wal_hook<F>(&self, hook: Option<F>)
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.hooks.set_wal(hook.map(|f| Box::new(f) as hooks::WalHook));
    }

    /// Registers a scalar function, replacing one of the same name. The
    /// returned handle plugs into predicates and statement projections.
    pub fn create_function<F>(&self, name: &str, args: ArgCount, func: F) -> Arc<ScalarFunction>
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.functions.register(ScalarFunction::new(name, args, func))
    }

    pub fn function(&self, name: &str) -> Result<Arc<ScalarFunction>> {
        self.functions.get(name)
    }

    pub fn remove_function(&self, name: &str) -> bool {
        self.functions.remove(name)
    }

    pub fn function_names(&self) -> Vec<String> {
        self.functions.names()
    }

    fn header(&self) -> DatabaseHeader {
        self.pager.header()
    }

    pub fn user_version(&self) -> u32 {
        self.header().user_version
    }

    pub fn application_id(&self) -> u32 {
        self.header().application_id
    }

    pub fn schema_version(&self) -> u32 {
        self.header().schema_version
    }

    pub fn page_count(&self) -> u64 {
        self.header().page_count
    }

    pub fn freelist_count(&self) -> u64 {
        self.header().freelist_count
    }

    pub fn change_counter(&self) -> u32 {
        self.header().file_change_counter
    }

    pub fn cache_size(&self) -> usize {
        self.pager.cache_stats().capacity
    }

    pub fn set_cache_size(&self, pages: usize) {
        self.pager.set_cache_size(pages);
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.pager.cache_stats()
    }

    /// Passive checkpoint once the WAL holds `wal_autocheckpoint` committed
    /// frames. Runs under the committing transaction's writer lock.
    fn autocheckpoint(&self, writer: &MutexGuard<'_, ()>, wal_frames: u64) {
        let threshold = self.pager.config().wal_autocheckpoint;
        if threshold == 0 || wal_frames < threshold {
            return;
        }
        match self
            .pager
            .checkpoint_locked(writer, CheckpointMode::Passive)
        {
            Ok(result) => debug!(frames = result.checkpointed_frames, "auto-checkpoint"),
            Err(e) => warn!(error = %e, "auto-checkpoint failed"),
        }
    }
}

impl ReadContext for Connection {
    fn with_pages<T>(&self, f: impl FnOnce(&dyn PageRead) -> Result<T>) -> Result<T> {
        let snapshot = self.pager.snapshot();
        f(&snapshot)
    }
}

/// The single write transaction of a connection. Reads inside it see its
/// own uncommitted writes. Dropping it without `commit` rolls back.
pub struct Transaction<'c> {
    conn: &'c Connection,
    inner: WriteTransaction<'c>,
}

impl<'c> Transaction<'c> {
    pub fn state(&self) -> TransactionState {
        self.inner.state()
    }

    pub fn connection(&self) -> &'c Connection {
        self.conn
    }

    /// Runs a page-level mutation, firing the rollback hook if it aborts the
    /// transaction.
    pub(crate) fn write<T>(
        &mut self,
        f: impl FnOnce(&mut WriteHandle<'_>) -> Result<T>,
    ) -> Result<T> {
        let was_active = self.inner.state() == TransactionState::Active;
        let result = self.inner.write(f);
        if was_active && self.inner.state() == TransactionState::RolledBack {
            self.conn.hooks.fire_rollback();
        }
        result
    }

    pub fn get(&self, key: RowId) -> Result<Option<Record>> {
        let payload = self.inner.read(|view| BTree::new(view).find(key))?;
        payload.map(|bytes| Record::decode(&bytes)).transpose()
    }

    pub fn put(&mut self, key: RowId, record: &Record) -> Result<InsertOutcome> {
        let payload = record.encode();
        let outcome = self.write(|pages| BTree::new(pages).insert(key, &payload))?;
        let action = match outcome {
            InsertOutcome::Inserted => Action::Insert,
            InsertOutcome::Replaced => Action::Update,
        };
        self.conn.hooks.fire_update(action, key);
        Ok(outcome)
    }

    /// Removes `key`; returns whether it existed.
    pub fn delete(&mut self, key: RowId) -> Result<bool> {
        let removed = self.write(|pages| BTree::new(pages).delete(key))?;
        if removed {
            self.conn.hooks.fire_update(Action::Delete, key);
        }
        Ok(removed)
    }

    pub fn scan(&self, range: impl RangeBounds<RowId>) -> RangeScanner<'_, Self> {
        RangeScanner::new(self, KeyRange::from_bounds(range), false)
    }

    pub fn scan_rev(&self, range: impl RangeBounds<RowId>) -> RangeScanner<'_, Self> {
        RangeScanner::new(self, KeyRange::from_bounds(range), true)
    }

    pub fn open_blob(&self, key: RowId, column: usize) -> Result<Blob> {
        Blob::open(self, key, column)
    }

    /// Overwrites part of a blob column without changing its length. Bad
    /// offsets are rejected before anything is written.
    pub fn write_blob(
        &mut self,
        key: RowId,
        column: usize,
        offset: usize,
        bytes: &[u8],
    ) -> Result<()> {
        let mut record = self
            .get(key)?
            .ok_or(DatabaseError::RowNotFound { row_id: key })?;
        blob::overwrite(&mut record, column, offset, bytes)?;

        let payload = record.encode();
        self.write(|pages| BTree::new(pages).insert(key, &payload))?;
        self.conn.hooks.fire_update(Action::Update, key);
        Ok(())
    }

    pub fn user_version(&self) -> Result<u32> {
        Ok(self.inner.write_set()?.header().user_version)
    }

    pub fn set_user_version(&mut self, version: u32) -> Result<()> {
        self.write(|pages| {
            pages.header_mut().user_version = version;
            Ok(())
        })
    }

    pub fn set_application_id(&mut self, id: u32) -> Result<()> {
        self.write(|pages| {
            pages.header_mut().application_id = id;
            Ok(())
        })
    }

    pub fn commit(mut self) -> Result<CommitInfo> {
        self.inner.write_set()?;
        if !self.conn.hooks.allow_commit() {
            debug!("commit vetoed by hook");
            self.inner.rollback()?;
            self.conn.hooks.fire_rollback();
            return Err(DatabaseError::CommitVetoed);
        }

        match self.inner.commit() {
            Ok(info) => {
                if info.frames_written > 0 {
                    self.conn.hooks.fire_wal(info.wal_frames);
                    self.conn
                        .autocheckpoint(self.inner.writer_guard(), info.wal_frames);
                }
                Ok(info)
            }
            Err(e) => {
                if self.inner.state() == TransactionState::RolledBack {
                    self.conn.hooks.fire_rollback();
                }
                Err(e)
            }
        }
    }

    pub fn rollback(mut self) -> Result<()> {
        self.rollback_active()
    }

    fn rollback_active(&mut self) -> Result<()> {
        if self.inner.state() != TransactionState::Active {
            return Ok(());
        }
        self.inner.rollback()?;
        self.conn.hooks.fire_rollback();
        Ok(())
    }
}

impl ReadContext for Transaction<'_> {
    fn with_pages<T>(&self, f: impl FnOnce(&dyn PageRead) -> Result<T>) -> Result<T> {
        self.inner.read(|view| f(view))
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.rollback_active() {
            warn!(error = %e, "rollback of dropped transaction failed");
        }
    }
}
