use std::{
    collections::{BTreeMap, HashMap},
    fs::{File, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::{
    storage::{
        cache::{CacheStats, DEFAULT_CACHE_SIZE, PageCache, PageImage},
        header::DatabaseHeader,
        positional::{read_exact_at, write_all_at},
        wal::{FRAME_SIZE, Wal, WalReader, WalScan},
    },
    types::{
        HEADER_PAGE_ID, PAGE_SIZE, PageId, ROOT_PAGE_ID,
        error::{DatabaseError, Result},
        page::{FreePage, Page, PageType},
    },
};

/// Tunables for a pager. Loadable from any serde format; missing fields fall
/// back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagerConfig {
    /// Page cache capacity in pages.
    pub cache_size: usize,
    /// Milliseconds to wait for the writer lock; `None` fails immediately.
    pub busy_timeout: Option<u64>,
    /// Committed WAL frames that trigger a passive checkpoint after commit.
    /// Zero disables automatic checkpoints.
    pub wal_autocheckpoint: u64,
    pub checkpoint_on_close: bool,
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self {
            cache_size: DEFAULT_CACHE_SIZE,
            busy_timeout: None,
            wal_autocheckpoint: 1000,
            checkpoint_on_close: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointMode {
    Passive,
    Full,
    Restart,
    Truncate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CheckpointResult {
    /// Frames in the log when the checkpoint started.
    pub log_frames: u64,
    /// Frames copied back into the main file.
    pub checkpointed_frames: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitInfo {
    pub frames_written: u64,
    /// Committed frames not yet checkpointed.
    pub wal_frames: u64,
}

/// Read access to a consistent set of page images.
pub trait PageRead {
    fn read_page(&self, page_id: PageId) -> Result<PageImage>;
    fn header(&self) -> &DatabaseHeader;
    /// Changes whenever the visible page set changes.
    fn generation(&self) -> u64;
}

/// Mutation inside a write transaction.
pub trait PageWrite: PageRead {
    fn write_page(&mut self, page_id: PageId, image: Vec<u8>) -> Result<()>;
    fn allocate_page(&mut self) -> Result<PageId>;
    fn free_page(&mut self, page_id: PageId) -> Result<()>;
    fn header_mut(&mut self) -> &mut DatabaseHeader;
}

impl<T: PageRead + ?Sized> PageRead for &T {
    fn read_page(&self, page_id: PageId) -> Result<PageImage> {
        (**self).read_page(page_id)
    }

    fn header(&self) -> &DatabaseHeader {
        (**self).header()
    }

    fn generation(&self) -> u64 {
        (**self).generation()
    }
}

impl<T: PageRead + ?Sized> PageRead for &mut T {
    fn read_page(&self, page_id: PageId) -> Result<PageImage> {
        (**self).read_page(page_id)
    }

    fn header(&self) -> &DatabaseHeader {
        (**self).header()
    }

    fn generation(&self) -> u64 {
        (**self).generation()
    }
}

impl<T: PageWrite + ?Sized> PageWrite for &mut T {
    fn write_page(&mut self, page_id: PageId, image: Vec<u8>) -> Result<()> {
        (**self).write_page(page_id, image)
    }

    fn allocate_page(&mut self) -> Result<PageId> {
        (**self).allocate_page()
    }

    fn free_page(&mut self, page_id: PageId) -> Result<()> {
        (**self).free_page(page_id)
    }

    fn header_mut(&mut self) -> &mut DatabaseHeader {
        (**self).header_mut()
    }
}

/// What readers see: the last committed header and the WAL frames that
/// supersede the main file.
struct CommittedState {
    header: DatabaseHeader,
    wal_index: HashMap<PageId, u64>,
    wal_reader: Option<WalReader>,
    generation: u64,
    /// Committed frames not yet copied into the main file.
    wal_frames: u64,
}

/// Private state of the single write transaction.
pub struct WriteSet {
    header: DatabaseHeader,
    dirty: HashMap<PageId, PageImage>,
    frames: HashMap<PageId, u64>,
    wal_start: u64,
    base_generation: u64,
    generation: u64,
}

impl WriteSet {
    pub fn header(&self) -> &DatabaseHeader {
        &self.header
    }

    /// Page numbers dirtied so far.
    pub fn dirty_pages(&self) -> impl Iterator<Item = PageId> + '_ {
        self.dirty.keys().copied()
    }

    pub fn base_generation(&self) -> u64 {
        self.base_generation
    }
}

pub struct Pager {
    path: PathBuf,
    read_only: bool,
    config: PagerConfig,
    writer: Mutex<()>,
    committed: RwLock<CommittedState>,
    cache: Mutex<PageCache>,
    /// Accessed only through positional reads and writes.
    file: File,
    wal: Mutex<Wal>,
    generation: AtomicU64,
}

impl Pager {
    pub fn open(path: &Path, read_only: bool, create: bool, config: PagerConfig) -> Result<Self> {
        let exists = path.exists() && std::fs::metadata(path)?.len() > 0;
        if !exists {
            if read_only || !create {
                return Err(DatabaseError::Io(std::io::Error::new(
                    ErrorKind::NotFound,
                    format!("database {} does not exist", path.display()),
                )));
            }
            Self::create_new(path)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path)?;

        let mut page_one = vec![0u8; PAGE_SIZE];
        read_exact_at(&file, &mut page_one, 0).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => DatabaseError::CorruptHeader {
                reason: "file is shorter than one page".to_string(),
            },
            _ => DatabaseError::Io(e),
        })?;
        let mut header = DatabaseHeader::from_bytes(&page_one)?;

        let (mut wal, scan) = Wal::open(path, read_only)?;
        let mut wal_index = HashMap::new();
        let mut wal_reader = None;
        let mut wal_frames = 0;

        if !scan.committed.is_empty() {
            if read_only {
                if let Some(&offset) = scan.committed.get(&HEADER_PAGE_ID) {
                    header = DatabaseHeader::from_bytes(&wal.read_frame(offset, HEADER_PAGE_ID)?)?;
                }
                wal_index.extend(scan.committed.iter().map(|(&p, &o)| (p, o)));
                wal_reader = wal.reader();
                wal_frames = scan.committed_frames;
                info!(
                    path = %path.display(),
                    frames = scan.committed_frames,
                    "read-only open keeps committed WAL frames in memory"
                );
            } else {
                header = Self::replay(&file, &mut wal, &scan)?;
                info!(
                    path = %path.display(),
                    frames = scan.committed_frames,
                    pages = scan.committed.len(),
                    "recovered committed WAL frames"
                );
            }
        } else if !read_only && wal.exists() {
            wal.remove()?;
        }

        info!(
            path = %path.display(),
            page_count = header.page_count,
            root_page = header.root_page,
            read_only,
            "opened database"
        );

        let cache_size = if config.cache_size == 0 && header.default_cache_size > 0 {
            header.default_cache_size as usize
        } else {
            config.cache_size
        };

        Ok(Self {
            path: path.to_path_buf(),
            read_only,
            writer: Mutex::new(()),
            committed: RwLock::new(CommittedState {
                header,
                wal_index,
                wal_reader,
                generation: 1,
                wal_frames,
            }),
            cache: Mutex::new(PageCache::new(cache_size)),
            file,
            wal: Mutex::new(wal),
            generation: AtomicU64::new(1),
            config,
        })
    }

    fn create_new(path: &Path) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .read(true)
            .truncate(true)
            .open(path)?;

        let header = DatabaseHeader::default();
        let mut page_one = vec![0u8; PAGE_SIZE];
        header.write_into(&mut page_one);
        file.write_all(&page_one)?;

        let root = Page::new(ROOT_PAGE_ID, PageType::Leaf);
        file.write_all(&root.to_bytes())?;
        file.sync_all()?;

        info!(path = %path.display(), "created new database");
        Ok(())
    }

    /// Copies committed frames into the main file in page order, then drops
    /// the log. Returns the recovered header.
    fn replay(file: &File, wal: &mut Wal, scan: &WalScan) -> Result<DatabaseHeader> {
        for (&page_id, &offset) in &scan.committed {
            let image = wal.read_frame(offset, page_id)?;
            write_all_at(file, &image, page_offset(page_id))?;
            trace!(page_id, offset, "replayed WAL frame");
        }
        file.sync_all()?;

        let mut page_one = vec![0u8; PAGE_SIZE];
        read_exact_at(file, &mut page_one, 0)?;
        let header = DatabaseHeader::from_bytes(&page_one)?;

        file.set_len(header.page_count * PAGE_SIZE as u64)?;
        file.sync_all()?;
        wal.remove()?;
        Ok(header)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn config(&self) -> &PagerConfig {
        &self.config
    }

    pub fn header(&self) -> DatabaseHeader {
        self.committed.read().header.clone()
    }

    pub fn committed_generation(&self) -> u64 {
        self.committed.read().generation
    }

    pub fn wal_frames(&self) -> u64 {
        self.committed.read().wal_frames
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().stats()
    }

    pub fn set_cache_size(&self, pages: usize) {
        self.cache.lock().resize(pages);
        debug!(pages, "resized page cache");
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Fresh read snapshot of the last committed state. It holds the
    /// committed-state read lock, so keep it for a single operation only.
    pub fn snapshot(&self) -> ReadSnapshot<'_> {
        ReadSnapshot {
            pager: self,
            state: self.committed.read(),
        }
    }

    /// Acquires the single writer lock according to `busy_timeout`.
    pub fn lock_writer(&self) -> Result<MutexGuard<'_, ()>> {
        if self.read_only {
            return Err(DatabaseError::ReadOnly);
        }
        match self.config.busy_timeout {
            None => self
                .writer
                .try_lock()
                .ok_or(DatabaseError::TransactionAlreadyActive),
            Some(ms) => self
                .writer
                .try_lock_for(Duration::from_millis(ms))
                .ok_or(DatabaseError::Busy { operation: "begin" }),
        }
    }

    /// Starts the private state of a write transaction. The caller proves it
    /// holds the writer lock by passing the guard.
    pub fn begin_write(&self, _writer: &MutexGuard<'_, ()>) -> Result<WriteSet> {
        let state = self.committed.read();
        let mut wal = self.wal.lock();
        if state.wal_index.is_empty() && wal.frame_count() > 0 {
            // Every frame has been checkpointed; reuse the log from the start.
            wal.restart()?;
        }
        Ok(WriteSet {
            header: state.header.clone(),
            dirty: HashMap::new(),
            frames: HashMap::new(),
            wal_start: wal.end(),
            base_generation: state.generation,
            generation: state.generation,
        })
    }

    pub fn write_handle<'a>(&'a self, set: &'a mut WriteSet) -> WriteHandle<'a> {
        WriteHandle { pager: self, set }
    }

    pub fn txn_view<'a>(&'a self, set: &'a WriteSet) -> TxnView<'a> {
        TxnView { pager: self, set }
    }

    fn load_committed(&self, state: &CommittedState, page_id: PageId) -> Result<PageImage> {
        if page_id == 0 || page_id > state.header.page_count {
            return Err(DatabaseError::PageOutOfRange {
                page_id,
                page_count: state.header.page_count,
            });
        }

        if let Some(image) = self.cache.lock().get(page_id) {
            return Ok(image);
        }

        let image: PageImage = match (state.wal_index.get(&page_id), &state.wal_reader) {
            (Some(&offset), Some(reader)) => Arc::from(reader.read_frame(offset, page_id)?),
            (Some(_), None) => {
                return Err(DatabaseError::CorruptedPage {
                    page_id,
                    reason: "WAL frame referenced but no WAL is open".to_string(),
                });
            }
            (None, _) => Arc::from(self.read_main(page_id)?),
        };
        trace!(page_id, "loaded page");

        self.cache.lock().insert(page_id, Arc::clone(&image));
        Ok(image)
    }

    fn read_main(&self, page_id: PageId) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; PAGE_SIZE];
        read_exact_at(&self.file, &mut buffer, page_offset(page_id)).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => DatabaseError::CorruptedPage {
                page_id,
                reason: "page lies beyond the end of the file".to_string(),
            },
            _ => DatabaseError::Io(e),
        })?;
        Ok(buffer)
    }

    fn extend_main(&self, page_count: u64) -> Result<()> {
        let file = &self.file;
        let wanted = page_count * PAGE_SIZE as u64;
        let current = file.metadata().map_err(|source| DatabaseError::DiskFull {
            page_id: page_count,
            source,
        })?;
        if current.len() < wanted {
            file.set_len(wanted)
                .map_err(|source| DatabaseError::DiskFull {
                    page_id: page_count,
                    source,
                })?;
        }
        Ok(())
    }

    /// Makes the write set durable and visible. On error nothing has been
    /// published and the caller must roll back.
    pub fn commit(&self, set: &mut WriteSet) -> Result<CommitInfo> {
        let unchanged = set.frames.is_empty() && set.header == self.committed.read().header;
        if unchanged {
            return Ok(CommitInfo {
                frames_written: 0,
                wal_frames: self.wal_frames(),
            });
        }

        set.header.file_change_counter = set.header.file_change_counter.wrapping_add(1);
        let mut page_one = vec![0u8; PAGE_SIZE];
        set.header.write_into(&mut page_one);

        let (commit_offset, wal_end, wal_reader) = {
            let mut wal = self.wal.lock();
            let offset = wal.write_frame(None, HEADER_PAGE_ID, &page_one, true)?;
            wal.sync()?;
            (offset, wal.end(), wal.reader())
        };
        let frames_written = set.frames.len() as u64 + 1;

        let mut state = self.committed.write();
        let shrunk = set.header.page_count < state.header.page_count;
        state
            .wal_index
            .extend(set.frames.iter().map(|(&page, &offset)| (page, offset)));
        state.wal_index.insert(HEADER_PAGE_ID, commit_offset);
        state.wal_reader = wal_reader;
        state.header = set.header.clone();
        state.generation = self.next_generation();
        state.wal_frames += (wal_end - set.wal_start) / FRAME_SIZE;

        {
            let mut cache = self.cache.lock();
            if shrunk {
                cache.clear();
            }
            for (&page_id, image) in &set.dirty {
                cache.insert(page_id, Arc::clone(image));
            }
            cache.insert(HEADER_PAGE_ID, Arc::from(page_one));
        }

        debug!(
            frames = frames_written,
            change_counter = state.header.file_change_counter,
            "committed write transaction"
        );
        Ok(CommitInfo {
            frames_written,
            wal_frames: state.wal_frames,
        })
    }

    /// Discards the frames written by `set`.
    pub fn rollback(&self, set: WriteSet) -> Result<()> {
        let mut wal = self.wal.lock();
        if wal.exists() && wal.end() > set.wal_start {
            wal.truncate_to(set.wal_start)?;
        }
        debug!(pages = set.dirty.len(), "rolled back write transaction");
        Ok(())
    }

    /// Acquires the writer lock for a checkpoint in the given mode.
    pub fn lock_for_checkpoint(&self, mode: CheckpointMode) -> Result<MutexGuard<'_, ()>> {
        if self.read_only {
            return Err(DatabaseError::ReadOnly);
        }
        let guard = match (mode, self.config.busy_timeout) {
            (CheckpointMode::Passive, _) | (_, None) => self.writer.try_lock(),
            (_, Some(ms)) => self.writer.try_lock_for(Duration::from_millis(ms)),
        };
        guard.ok_or(DatabaseError::Busy {
            operation: "checkpoint",
        })
    }

    pub fn checkpoint(&self, mode: CheckpointMode) -> Result<CheckpointResult> {
        let guard = self.lock_for_checkpoint(mode)?;
        self.checkpoint_locked(&guard, mode)
    }

    /// Copies committed frames into the main file. Requires the writer lock,
    /// which freezes the committed state, so readers keep going through the
    /// copy and are held off only while the WAL index is cleared.
    pub fn checkpoint_locked(
        &self,
        _writer: &MutexGuard<'_, ()>,
        mode: CheckpointMode,
    ) -> Result<CheckpointResult> {
        let log_frames = self.wal.lock().frame_count();
        let (ordered, page_count, reader) = {
            let state = self.committed.read();
            let ordered: BTreeMap<PageId, u64> =
                state.wal_index.iter().map(|(&p, &o)| (p, o)).collect();
            (ordered, state.header.page_count, state.wal_reader.clone())
        };

        if let Some(reader) = &reader {
            for (&page_id, &offset) in &ordered {
                let image = reader.read_frame(offset, page_id)?;
                write_all_at(&self.file, &image, page_offset(page_id))?;
            }
        }
        self.file.set_len(page_count * PAGE_SIZE as u64)?;
        self.file.sync_all()?;

        {
            let mut state = self.committed.write();
            state.wal_index.clear();
            state.wal_reader = None;
            state.wal_frames = 0;
        }

        let mut wal = self.wal.lock();
        match mode {
            CheckpointMode::Passive | CheckpointMode::Full => {}
            CheckpointMode::Restart => wal.restart()?,
            CheckpointMode::Truncate => wal.truncate()?,
        }

        info!(
            ?mode,
            log_frames,
            pages = ordered.len(),
            "checkpoint complete"
        );
        Ok(CheckpointResult {
            log_frames,
            checkpointed_frames: log_frames,
        })
    }

    /// Final checkpoint on close. Skipped when a writer is still active.
    pub fn close(&self) -> Result<()> {
        if self.read_only || !self.config.checkpoint_on_close {
            return Ok(());
        }
        let Some(guard) = self.writer.try_lock() else {
            warn!(path = %self.path.display(), "writer active at close, skipping checkpoint");
            return Ok(());
        };
        self.checkpoint_locked(&guard, CheckpointMode::Truncate)?;
        self.wal.lock().remove()?;
        Ok(())
    }
}

impl Drop for Pager {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(path = %self.path.display(), error = %e, "checkpoint on close failed");
        }
    }
}

fn page_offset(page_id: PageId) -> u64 {
    (page_id - 1) * PAGE_SIZE as u64
}

/// Snapshot of the committed state for the duration of one read operation.
pub struct ReadSnapshot<'p> {
    pager: &'p Pager,
    state: RwLockReadGuard<'p, CommittedState>,
}

impl PageRead for ReadSnapshot<'_> {
    fn read_page(&self, page_id: PageId) -> Result<PageImage> {
        self.pager.load_committed(&self.state, page_id)
    }

    fn header(&self) -> &DatabaseHeader {
        &self.state.header
    }

    fn generation(&self) -> u64 {
        self.state.generation
    }
}

/// Read-only view of the active write transaction.
pub struct TxnView<'a> {
    pager: &'a Pager,
    set: &'a WriteSet,
}

/// Page access for the active write transaction: its own dirty pages first,
/// then the committed state.
pub struct WriteHandle<'a> {
    pager: &'a Pager,
    set: &'a mut WriteSet,
}

fn read_in_set(pager: &Pager, set: &WriteSet, page_id: PageId) -> Result<PageImage> {
    if page_id == 0 || page_id > set.header.page_count {
        return Err(DatabaseError::PageOutOfRange {
            page_id,
            page_count: set.header.page_count,
        });
    }
    if let Some(image) = set.dirty.get(&page_id) {
        return Ok(Arc::clone(image));
    }

    let state = pager.committed.read();
    if page_id > state.header.page_count {
        // Extended in this transaction and not written yet.
        return Ok(Arc::from(vec![0u8; PAGE_SIZE]));
    }
    pager.load_committed(&state, page_id)
}

impl PageRead for TxnView<'_> {
    fn read_page(&self, page_id: PageId) -> Result<PageImage> {
        read_in_set(self.pager, self.set, page_id)
    }

    fn header(&self) -> &DatabaseHeader {
        &self.set.header
    }

    fn generation(&self) -> u64 {
        self.set.generation
    }
}

impl WriteHandle<'_> {
    fn touch(&mut self) {
        self.set.generation = self.pager.next_generation();
    }

    /// Grows the working page count, extending the main file to match.
    /// Used by backup, which copies whole page ranges.
    pub fn ensure_page_count(&mut self, page_count: u64) -> Result<()> {
        if page_count > self.set.header.page_count {
            self.pager.extend_main(page_count)?;
        }
        self.set.header.page_count = page_count;
        self.touch();
        Ok(())
    }
}

impl PageRead for WriteHandle<'_> {
    fn read_page(&self, page_id: PageId) -> Result<PageImage> {
        read_in_set(self.pager, self.set, page_id)
    }

    fn header(&self) -> &DatabaseHeader {
        &self.set.header
    }

    fn generation(&self) -> u64 {
        self.set.generation
    }
}

impl PageWrite for WriteHandle<'_> {
    fn write_page(&mut self, page_id: PageId, image: Vec<u8>) -> Result<()> {
        if page_id <= HEADER_PAGE_ID || page_id > self.set.header.page_count {
            return Err(DatabaseError::PageOutOfRange {
                page_id,
                page_count: self.set.header.page_count,
            });
        }

        let at = self.set.frames.get(&page_id).copied();
        let offset = self.pager.wal.lock().write_frame(at, page_id, &image, false)?;
        self.set.frames.insert(page_id, offset);
        self.set.dirty.insert(page_id, Arc::from(image));
        self.touch();
        trace!(page_id, offset, "staged page");
        Ok(())
    }

    fn allocate_page(&mut self) -> Result<PageId> {
        let head = self.set.header.freelist_head;
        if head != 0 {
            let image = self.read_page(head)?;
            let free = FreePage::read(head, &image)?;
            self.set.header.freelist_head = free.next.unwrap_or(0);
            self.set.header.freelist_count = self.set.header.freelist_count.saturating_sub(1);
            self.touch();
            trace!(page_id = head, "reused free page");
            return Ok(head);
        }

        let page_id = self.set.header.page_count + 1;
        self.pager.extend_main(page_id)?;
        self.set.header.page_count = page_id;
        self.touch();
        trace!(page_id, "extended database file");
        Ok(page_id)
    }

    fn free_page(&mut self, page_id: PageId) -> Result<()> {
        let mut image = self.read_page(page_id)?.to_vec();
        FreePage {
            page_id,
            next: match self.set.header.freelist_head {
                0 => None,
                head => Some(head),
            },
        }
        .write_into(&mut image);
        self.write_page(page_id, image)?;

        self.set.header.freelist_head = page_id;
        self.set.header.freelist_count += 1;
        Ok(())
    }

    fn header_mut(&mut self) -> &mut DatabaseHeader {
        self.touch();
        &mut self.set.header
    }
}
