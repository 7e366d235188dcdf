use tracing::{debug, info};

use crate::{
    connection::{Connection, Transaction},
    storage::pager::{PageRead, PageWrite},
    types::{HEADER_PAGE_ID, PageId, error::Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupStatus {
    More,
    Done,
}

/// Online copy of one database into another, a few pages per step.
///
/// The destination stays locked in a write transaction for the whole copy
/// and only sees the result on `Done`. A commit on the source between steps
/// restarts the copy from page 1.
pub struct Backup<'a> {
    source: &'a Connection,
    destination: Option<Transaction<'a>>,
    next_page: PageId,
    total_pages: u64,
    source_generation: Option<u64>,
}

impl<'a> Backup<'a> {
    pub fn new(source: &'a Connection, destination: &'a Connection) -> Result<Self> {
        let destination = destination.begin()?;
        Ok(Self {
            source,
            destination: Some(destination),
            next_page: HEADER_PAGE_ID,
            total_pages: source.page_count(),
            source_generation: None,
        })
    }

    /// `(total, remaining)` pages as of the last step.
    pub fn progress(&self) -> (u64, u64) {
        let copied = self.next_page.saturating_sub(HEADER_PAGE_ID);
        (self.total_pages, self.total_pages.saturating_sub(copied))
    }

    /// Copies up to `pages` pages, page 1 being the header.
    pub fn step(&mut self, pages: u64) -> Result<BackupStatus> {
        let Some(destination) = self.destination.as_mut() else {
            return Ok(BackupStatus::Done);
        };

        {
            let snapshot = self.source.pager().snapshot();
            let generation = snapshot.generation();
            if self.source_generation != Some(generation) {
                if self.source_generation.is_some() {
                    debug!("source changed during backup, restarting");
                }
                self.source_generation = Some(generation);
                self.next_page = HEADER_PAGE_ID;
                self.total_pages = snapshot.header().page_count;
            }

            let total = self.total_pages;
            let start = self.next_page;
            let end = start.saturating_add(pages).min(total + 1);
            destination.write(|handle| {
                handle.ensure_page_count(total)?;
                if start == HEADER_PAGE_ID {
                    *handle.header_mut() = snapshot.header().clone();
                }
                for page_id in start.max(HEADER_PAGE_ID + 1)..end {
                    let image = snapshot.read_page(page_id)?;
                    handle.write_page(page_id, image.to_vec())?;
                }
                Ok(())
            })?;
            self.next_page = end;
        }

        if self.next_page <= self.total_pages {
            return Ok(BackupStatus::More);
        }

        if let Some(destination) = self.destination.take() {
            destination.commit()?;
        }
        info!(pages = self.total_pages, "backup complete");
        Ok(BackupStatus::Done)
    }

    /// Steps until done, reporting `(total, remaining)` after each step.
    pub fn run(
        &mut self,
        pages_per_step: u64,
        mut progress: impl FnMut(u64, u64),
    ) -> Result<()> {
        let pages = pages_per_step.max(1);
        loop {
            let status = self.step(pages)?;
            let (total, remaining) = self.progress();
            progress(total, remaining);
            if status == BackupStatus::Done {
                return Ok(());
            }
        }
    }
}
