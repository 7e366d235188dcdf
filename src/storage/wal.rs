use std::{
    collections::BTreeMap,
    ffi::OsString,
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use tracing::{debug, trace, warn};

use crate::{
    storage::positional::read_exact_at,
    types::{PAGE_SIZE, PageId, error::DatabaseError},
    utils::hash::{calculate_frame_checksum, verify_frame_checksum},
};

pub const WAL_MAGIC: &[u8; 8] = b"LMBGWAL\0";
pub const WAL_VERSION: u32 = 1;
pub const WAL_HEADER_SIZE: u64 = 24;
pub const FRAME_HEADER_SIZE: usize = 8 + 8 + 1; // page_number + checksum + commit_flag
pub const FRAME_SIZE: u64 = (FRAME_HEADER_SIZE + PAGE_SIZE) as u64;

/*
 * WAL file layout
 * ┌──────────────────────────────────────────────────────────────┐
 * │ magic(8) | version(4) | page_size(4) | salt(4) | ckpt_seq(4) │
 * ├──────────────────────────────────────────────────────────────┤
 * │ frame: page_number(8) | checksum(8) | commit_flag(1) | image │
 * │ frame ...                                                    │
 * └──────────────────────────────────────────────────────────────┘
 */

/// Result of scanning an existing log on open.
#[derive(Debug, Default, Clone)]
pub struct WalScan {
    /// Latest committed frame offset for every page.
    pub committed: BTreeMap<PageId, u64>,
    pub committed_frames: u64,
    /// Frames after the last commit frame (torn or never committed).
    pub discarded_frames: u64,
}

/// Shared read handle on the log, tied to one salt. Frame reads are
/// positional, so readers never wait on the appending writer.
#[derive(Debug, Clone)]
pub struct WalReader {
    file: Arc<File>,
    salt: u32,
}

impl WalReader {
    /// Reads a frame image back, verifying it belongs to `page_id`.
    pub fn read_frame(&self, offset: u64, page_id: PageId) -> Result<Vec<u8>, DatabaseError> {
        let mut frame = vec![0u8; FRAME_SIZE as usize];
        read_exact_at(&self.file, &mut frame, offset)?;

        let (frame_page, checksum, commit) = decode_frame_header(&frame);
        let image = &frame[FRAME_HEADER_SIZE..];
        if frame_page != page_id
            || !verify_frame_checksum(self.salt, frame_page, commit, image, checksum)
        {
            return Err(DatabaseError::CorruptedPage {
                page_id,
                reason: format!("WAL frame at offset {} failed verification", offset),
            });
        }
        Ok(image.to_vec())
    }
}

pub struct Wal {
    path: PathBuf,
    file: Option<File>,
    shared: Option<Arc<File>>,
    read_only: bool,
    initialized: bool,
    salt: u32,
    checkpoint_seq: u32,
    end: u64,
}

pub fn wal_path_for(db_path: &Path) -> PathBuf {
    let mut wal_os: OsString = db_path.as_os_str().to_os_string();
    wal_os.push("-wal");
    PathBuf::from(wal_os)
}

impl Wal {
    /// Opens the log next to `db_path` if one exists and scans it for
    /// committed frames. A missing log is not created until the first write.
    pub fn open(db_path: &Path, read_only: bool) -> Result<(Self, WalScan), DatabaseError> {
        let path = wal_path_for(db_path);
        let mut wal = Self {
            path,
            file: None,
            shared: None,
            read_only,
            initialized: false,
            salt: 0,
            checkpoint_seq: 0,
            end: WAL_HEADER_SIZE,
        };

        let file = match OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(&wal.path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok((wal, WalScan::default())),
            Err(e) => return Err(e.into()),
        };
        wal.shared = Some(Arc::new(File::open(&wal.path)?));
        wal.file = Some(file);

        if !wal.read_header()? {
            return Ok((wal, WalScan::default()));
        }
        let scan = wal.scan()?;
        Ok((wal, scan))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.file.is_some()
    }

    /// Offset at which the next frame will be appended.
    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn frame_count(&self) -> u64 {
        (self.end - WAL_HEADER_SIZE) / FRAME_SIZE
    }

    pub fn checkpoint_seq(&self) -> u32 {
        self.checkpoint_seq
    }

    fn read_header(&mut self) -> Result<bool, DatabaseError> {
        let Some(file) = self.file.as_mut() else {
            return Ok(false);
        };
        let len = file.metadata()?.len();
        if len < WAL_HEADER_SIZE {
            if len > 0 {
                warn!(path = %self.path.display(), len, "ignoring WAL with truncated header");
            }
            return Ok(false);
        }

        let mut header = [0u8; WAL_HEADER_SIZE as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;

        let version = u32::from_be_bytes([header[8], header[9], header[10], header[11]]);
        let page_size = u32::from_be_bytes([header[12], header[13], header[14], header[15]]);
        if &header[0..8] != WAL_MAGIC || version != WAL_VERSION || page_size as usize != PAGE_SIZE
        {
            warn!(path = %self.path.display(), "ignoring WAL with invalid header");
            return Ok(false);
        }

        self.salt = u32::from_be_bytes([header[16], header[17], header[18], header[19]]);
        self.checkpoint_seq = u32::from_be_bytes([header[20], header[21], header[22], header[23]]);
        self.initialized = true;
        Ok(true)
    }

    /// Walks frames in order. Everything up to the last valid commit frame is
    /// committed; a torn or checksum-failing frame ends the log.
    fn scan(&mut self) -> Result<WalScan, DatabaseError> {
        let salt = self.salt;
        let Some(file) = self.file.as_mut() else {
            return Ok(WalScan::default());
        };
        let len = file.metadata()?.len();

        let mut scan = WalScan::default();
        let mut pending: Vec<(PageId, u64)> = Vec::new();
        let mut offset = WAL_HEADER_SIZE;
        let mut valid_end = WAL_HEADER_SIZE;
        let mut frame = vec![0u8; FRAME_SIZE as usize];

        while offset + FRAME_SIZE <= len {
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut frame)?;
            let (page_id, checksum, commit) = decode_frame_header(&frame);
            let image = &frame[FRAME_HEADER_SIZE..];
            if page_id == 0 || !verify_frame_checksum(salt, page_id, commit, image, checksum) {
                break;
            }

            pending.push((page_id, offset));
            offset += FRAME_SIZE;

            if commit {
                scan.committed_frames += pending.len() as u64;
                scan.committed.extend(pending.drain(..));
                valid_end = offset;
            }
        }

        scan.discarded_frames = (len.saturating_sub(valid_end)) / FRAME_SIZE;
        if scan.discarded_frames > 0 {
            warn!(
                path = %self.path.display(),
                discarded = scan.discarded_frames,
                "discarding uncommitted WAL frames"
            );
        }
        self.end = valid_end;
        Ok(scan)
    }

    fn ensure_file(&mut self) -> Result<&mut File, DatabaseError> {
        if self.read_only {
            return Err(DatabaseError::ReadOnly);
        }
        if self.file.is_none() {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.path)?;
            self.shared = Some(Arc::new(File::open(&self.path)?));
            self.file = Some(file);
            self.initialized = false;
        }
        if !self.initialized {
            self.write_header()?;
        }
        self.file
            .as_mut()
            .ok_or_else(|| DatabaseError::Io(ErrorKind::NotFound.into()))
    }

    fn write_header(&mut self) -> Result<(), DatabaseError> {
        let salt = next_salt(self.salt);
        let seq = self.checkpoint_seq;
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };

        let mut header = Vec::with_capacity(WAL_HEADER_SIZE as usize);
        header.extend_from_slice(WAL_MAGIC);
        header.extend_from_slice(&WAL_VERSION.to_be_bytes());
        header.extend_from_slice(&(PAGE_SIZE as u32).to_be_bytes());
        header.extend_from_slice(&salt.to_be_bytes());
        header.extend_from_slice(&seq.to_be_bytes());

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header)?;

        self.salt = salt;
        self.initialized = true;
        self.end = WAL_HEADER_SIZE;
        debug!(path = %self.path.display(), salt, seq, "started new WAL generation");
        Ok(())
    }

    /// Writes a frame at `at` (overwriting an uncommitted frame of the same
    /// transaction) or appends it. Returns the frame offset.
    pub fn write_frame(
        &mut self,
        at: Option<u64>,
        page_id: PageId,
        image: &[u8],
        commit: bool,
    ) -> Result<u64, DatabaseError> {
        if image.len() != PAGE_SIZE {
            return Err(DatabaseError::CorruptedPage {
                page_id,
                reason: format!("page image of {} bytes", image.len()),
            });
        }
        self.ensure_file()?;
        let offset = at.unwrap_or(self.end);
        let checksum = calculate_frame_checksum(self.salt, page_id, commit, image);

        let mut frame = Vec::with_capacity(FRAME_SIZE as usize);
        frame.extend_from_slice(&page_id.to_le_bytes());
        frame.extend_from_slice(&checksum.to_le_bytes());
        frame.push(commit as u8);
        frame.extend_from_slice(image);

        let file = self.ensure_file()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&frame)?;

        if offset + FRAME_SIZE > self.end {
            self.end = offset + FRAME_SIZE;
        }
        trace!(page_id, offset, commit, "wrote WAL frame");
        Ok(offset)
    }

    /// Read handle for frames written under the current salt.
    pub fn reader(&self) -> Option<WalReader> {
        self.shared.as_ref().map(|file| WalReader {
            file: Arc::clone(file),
            salt: self.salt,
        })
    }

    pub fn read_frame(&self, offset: u64, page_id: PageId) -> Result<Vec<u8>, DatabaseError> {
        self.reader()
            .ok_or_else(|| DatabaseError::CorruptedPage {
                page_id,
                reason: "WAL frame referenced but no WAL is open".to_string(),
            })?
            .read_frame(offset, page_id)
    }

    pub fn sync(&mut self) -> Result<(), DatabaseError> {
        if let Some(file) = self.file.as_mut() {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Drops every frame at or after `offset`.
    pub fn truncate_to(&mut self, offset: u64) -> Result<(), DatabaseError> {
        if let Some(file) = self.file.as_mut() {
            file.set_len(offset)?;
            self.end = offset.max(WAL_HEADER_SIZE);
        }
        Ok(())
    }

    /// Starts a new log generation in place; old frames stay on disk but no
    /// longer verify against the new salt.
    pub fn restart(&mut self) -> Result<(), DatabaseError> {
        if self.file.is_none() {
            return Ok(());
        }
        self.checkpoint_seq = self.checkpoint_seq.wrapping_add(1);
        let salt = next_salt(self.salt);
        let seq = self.checkpoint_seq;
        if let Some(file) = self.file.as_mut() {
            let mut tail = Vec::with_capacity(8);
            tail.extend_from_slice(&salt.to_be_bytes());
            tail.extend_from_slice(&seq.to_be_bytes());
            file.seek(SeekFrom::Start(16))?;
            file.write_all(&tail)?;
            file.sync_all()?;
        }
        self.salt = salt;
        self.end = WAL_HEADER_SIZE;
        Ok(())
    }

    /// Truncates the log file to zero bytes; the header is rewritten lazily.
    pub fn truncate(&mut self) -> Result<(), DatabaseError> {
        self.checkpoint_seq = self.checkpoint_seq.wrapping_add(1);
        if let Some(file) = self.file.as_mut() {
            file.set_len(0)?;
            file.sync_all()?;
        }
        self.initialized = false;
        self.end = WAL_HEADER_SIZE;
        Ok(())
    }

    /// Deletes the log file. Only valid once every committed frame has been
    /// copied into the main file.
    pub fn remove(&mut self) -> Result<(), DatabaseError> {
        if self.read_only {
            return Ok(());
        }
        self.file = None;
        self.shared = None;
        self.initialized = false;
        self.end = WAL_HEADER_SIZE;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn decode_frame_header(frame: &[u8]) -> (PageId, u64, bool) {
    let mut page = [0u8; 8];
    page.copy_from_slice(&frame[0..8]);
    let mut checksum = [0u8; 8];
    checksum.copy_from_slice(&frame[8..16]);
    (
        u64::from_le_bytes(page),
        u64::from_le_bytes(checksum),
        frame[16] == 1,
    )
}

fn next_salt(previous: u32) -> u32 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    let salt = nanos ^ previous.rotate_left(13) ^ 0x9e37_79b9;
    if salt == previous {
        salt.wrapping_add(1)
    } else {
        salt
    }
}
