use crate::{
    storage::{FILE_FORMAT_VERSION, LUMBUNG_MAGIC},
    types::{HEADER_SIZE, PAGE_SIZE, PageId, ROOT_PAGE_ID, error::DatabaseError},
};

/*
 * Database header, the first 100 bytes of page 1 (big-endian)
 *  0..16  magic            16..18 page_size        18 write_version
 *  19     read_version     20..24 change_counter   24..32 page_count
 *  32..40 freelist_head    40..48 freelist_count   48..56 root_page
 *  56..60 schema_version   60..64 user_version     64..68 application_id
 *  68..72 default_cache_size                       72..92 reserved
 *  92..96 version_valid_for                        96..100 library_version
 */

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseHeader {
    pub magic: [u8; 16],
    pub page_size: u16,
    pub file_format_write_version: u8,
    pub file_format_read_version: u8,
    pub file_change_counter: u32,
    pub page_count: u64,
    pub freelist_head: PageId,
    pub freelist_count: u64,
    pub root_page: PageId,
    pub schema_version: u32,
    pub user_version: u32,
    pub application_id: u32,
    pub default_cache_size: u32,
    pub reserved: [u8; 20],
    pub version_valid_for: u32,
    pub library_version: u32,
}

impl Default for DatabaseHeader {
    fn default() -> Self {
        Self {
            magic: *LUMBUNG_MAGIC,
            page_size: PAGE_SIZE as u16,
            file_format_write_version: FILE_FORMAT_VERSION,
            file_format_read_version: FILE_FORMAT_VERSION,
            file_change_counter: 0,
            page_count: ROOT_PAGE_ID,
            freelist_head: 0,
            freelist_count: 0,
            root_page: ROOT_PAGE_ID,
            schema_version: 1,
            user_version: 0,
            application_id: 0,
            default_cache_size: 0,
            reserved: [0; 20],
            version_valid_for: 0,
            library_version: 1000,
        }
    }
}

impl DatabaseHeader {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(HEADER_SIZE);

        buffer.extend_from_slice(&self.magic);
        buffer.extend_from_slice(&self.page_size.to_be_bytes());
        buffer.push(self.file_format_write_version);
        buffer.push(self.file_format_read_version);
        buffer.extend_from_slice(&self.file_change_counter.to_be_bytes());
        buffer.extend_from_slice(&self.page_count.to_be_bytes());
        buffer.extend_from_slice(&self.freelist_head.to_be_bytes());
        buffer.extend_from_slice(&self.freelist_count.to_be_bytes());
        buffer.extend_from_slice(&self.root_page.to_be_bytes());
        buffer.extend_from_slice(&self.schema_version.to_be_bytes());
        buffer.extend_from_slice(&self.user_version.to_be_bytes());
        buffer.extend_from_slice(&self.application_id.to_be_bytes());
        buffer.extend_from_slice(&self.default_cache_size.to_be_bytes());
        buffer.extend_from_slice(&self.reserved);
        buffer.extend_from_slice(&self.version_valid_for.to_be_bytes());
        buffer.extend_from_slice(&self.library_version.to_be_bytes());

        buffer.resize(HEADER_SIZE, 0);
        buffer
    }

    /// Writes the header over the first `HEADER_SIZE` bytes of a page-1 image.
    pub fn write_into(&self, page: &mut [u8]) {
        page[..HEADER_SIZE].copy_from_slice(&self.to_bytes());
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DatabaseError> {
        if bytes.len() < HEADER_SIZE {
            return Err(corrupt(format!(
                "header too short: {} bytes",
                bytes.len()
            )));
        }

        let mut reader = HeaderReader { bytes, offset: 0 };

        let mut magic = [0u8; 16];
        magic.copy_from_slice(reader.take(16));
        if &magic != LUMBUNG_MAGIC {
            return Err(corrupt("invalid magic number".to_string()));
        }

        let page_size = reader.u16();
        if page_size as usize != PAGE_SIZE {
            return Err(corrupt(format!("unsupported page size: {}", page_size)));
        }

        let file_format_write_version = reader.u8();
        let file_format_read_version = reader.u8();
        if file_format_read_version > FILE_FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported file format version {}",
                file_format_read_version
            )));
        }

        let file_change_counter = reader.u32();
        let page_count = reader.u64();
        let freelist_head = reader.u64();
        let freelist_count = reader.u64();
        let root_page = reader.u64();
        let schema_version = reader.u32();
        let user_version = reader.u32();
        let application_id = reader.u32();
        let default_cache_size = reader.u32();
        let mut reserved = [0u8; 20];
        reserved.copy_from_slice(reader.take(20));
        let version_valid_for = reader.u32();
        let library_version = reader.u32();

        let header = Self {
            magic,
            page_size,
            file_format_write_version,
            file_format_read_version,
            file_change_counter,
            page_count,
            freelist_head,
            freelist_count,
            root_page,
            schema_version,
            user_version,
            application_id,
            default_cache_size,
            reserved,
            version_valid_for,
            library_version,
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<(), DatabaseError> {
        if self.page_count < ROOT_PAGE_ID {
            return Err(corrupt(format!("page count {} too small", self.page_count)));
        }
        if self.root_page < ROOT_PAGE_ID || self.root_page > self.page_count {
            return Err(corrupt(format!(
                "root page {} outside 2..={}",
                self.root_page, self.page_count
            )));
        }
        if self.freelist_head > self.page_count || self.freelist_count >= self.page_count {
            return Err(corrupt(format!(
                "free list (head {}, count {}) inconsistent with page count {}",
                self.freelist_head, self.freelist_count, self.page_count
            )));
        }
        Ok(())
    }
}

fn corrupt(reason: String) -> DatabaseError {
    DatabaseError::CorruptHeader { reason }
}

struct HeaderReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> HeaderReader<'a> {
    fn take(&mut self, len: usize) -> &'a [u8] {
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        slice
    }

    fn u8(&mut self) -> u8 {
        self.take(1)[0]
    }

    fn u16(&mut self) -> u16 {
        let raw = self.take(2);
        u16::from_be_bytes([raw[0], raw[1]])
    }

    fn u32(&mut self) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4));
        u32::from_be_bytes(raw)
    }

    fn u64(&mut self) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8));
        u64::from_be_bytes(raw)
    }
}
