//! # Writer and Reader Handles
//!
//! A `Writer` appends to the highest-numbered page in the stream directory
//! and rolls forward when it fills; a `Reader` drains from its own page and
//! cursor, following seals. Handles are cheap to clone (`try_clone` remaps
//! the current page) and independent: every reader sees the full stream
//! from wherever it joined.
//!
//! Page numbers are the only ordering: `<seq>.page.bin`, dense ascending.
//! On startup the directory is scanned once; the writer resumes on the
//! highest existing page (a sealed one just rolls on first push), the
//! reader starts on the lowest so nothing still on disk is skipped.

use std::fs::{self, DirEntry};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{Result, WrapErr};
use parking_lot::RwLock;

use crate::config::DEFAULT_ARENA_SIZE;
use crate::page::{Page, PopResult, PushResult, SpinPolicy};

const PAGE_FILE_SUFFIX: &str = "page.bin";

/// Ring-level configuration shared by the writer and reader sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingOptions {
    /// Unlink the oldest page file once more than this many exist. `None`
    /// keeps every page forever. Readers overrun by eviction skip to the
    /// oldest live page; there is no back-pressure.
    pub max_pages: Option<usize>,
    /// Spin policy handed to every page the handles open.
    pub spin: SpinPolicy,
}

impl Default for RingOptions {
    fn default() -> Self {
        Self {
            max_pages: None,
            spin: SpinPolicy::default(),
        }
    }
}

/// Appending half of a broadcast stream.
pub struct Writer<const ARENA: usize = DEFAULT_ARENA_SIZE> {
    dir: PathBuf,
    latest: Arc<RwLock<usize>>,
    page_no: usize,
    page: Page<ARENA>,
    options: RingOptions,
}

/// Consuming half of a broadcast stream. Each reader drains the entire
/// stream at its own pace from its own cursor.
pub struct Reader<const ARENA: usize = DEFAULT_ARENA_SIZE> {
    dir: PathBuf,
    latest: Arc<RwLock<usize>>,
    page_no: usize,
    page: Page<ARENA>,
    cursor: usize,
    options: RingOptions,
}

/// Opens (or resumes) the stream in `dir` with default options and the
/// default page size.
pub fn channel<P: Into<PathBuf>>(dir: P) -> Result<(Writer, Reader)> {
    channel_with::<DEFAULT_ARENA_SIZE>(dir.into(), RingOptions::default())
}

/// Opens (or resumes) the stream in `dir`. The arena size is fixed per
/// stream: every handle in every process must use the same one.
pub fn channel_with<const ARENA: usize>(
    dir: PathBuf,
    options: RingOptions,
) -> Result<(Writer<ARENA>, Reader<ARENA>)> {
    fs::create_dir_all(&dir)
        .wrap_err_with(|| format!("failed to create stream directory '{}'", dir.display()))?;

    let (lowest, highest) = scan_pages(&dir)?.unwrap_or((0, 0));
    let latest = Arc::new(RwLock::new(highest));

    let write_page = Page::open_with(page_path(&dir, highest), options.spin)?;
    let read_page = Page::open_with(page_path(&dir, lowest), options.spin)?;
    read_page.prefetch();

    Ok((
        Writer {
            dir: dir.clone(),
            latest: Arc::clone(&latest),
            page_no: highest,
            page: write_page,
            options,
        },
        Reader {
            dir,
            latest,
            page_no: lowest,
            page: read_page,
            cursor: 0,
            options,
        },
    ))
}

fn page_path(dir: &Path, page_no: usize) -> PathBuf {
    dir.join(format!("{}.{}", page_no, PAGE_FILE_SUFFIX))
}

fn page_number(entry: &DirEntry) -> Option<usize> {
    let name = entry.file_name();
    let name = name.to_str()?;
    let stem = name.strip_suffix(PAGE_FILE_SUFFIX)?.strip_suffix('.')?;
    stem.parse().ok()
}

/// Lowest and highest page numbers present, or `None` for a fresh stream.
fn scan_pages(dir: &Path) -> Result<Option<(usize, usize)>> {
    let mut range = None;

    for entry in fs::read_dir(dir)
        .wrap_err_with(|| format!("failed to scan stream directory '{}'", dir.display()))?
    {
        let entry = entry
            .wrap_err_with(|| format!("failed to scan stream directory '{}'", dir.display()))?;
        let Some(page_no) = page_number(&entry) else {
            continue;
        };

        range = Some(match range {
            None => (page_no, page_no),
            Some((lowest, highest)) => (page_no.min(lowest), page_no.max(highest)),
        });
    }

    Ok(range)
}

fn evict_page(dir: &Path, page_no: usize) -> Result<()> {
    let victim = page_path(dir, page_no);
    match fs::remove_file(&victim) {
        Ok(()) => Ok(()),
        // another handle (possibly in another process) got there first
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            Err(e).wrap_err_with(|| format!("failed to evict page file '{}'", victim.display()))
        }
    }
}

impl<const ARENA: usize> Writer<ARENA> {
    /// Appends one message, rolling to a new page whenever the current one
    /// fills. Returns the byte advance the message consumed in its page.
    pub fn push<T: AsRef<[u8]>>(&mut self, payload: T) -> Result<usize> {
        let payload = payload.as_ref();

        loop {
            match self.page.push(payload)? {
                PushResult::Written(advance) => return Ok(advance),
                PushResult::PageFull => self.advance_page()?,
            }
        }
    }

    /// A second handle on the same stream, sharing the page-roll bookkeeping
    /// but mapping the current page independently. Safe to move to another
    /// thread.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            dir: self.dir.clone(),
            latest: Arc::clone(&self.latest),
            page_no: self.page_no,
            page: self.page.reopen()?,
            options: self.options,
        })
    }

    pub fn current_page(&self) -> usize {
        self.page_no
    }

    fn advance_page(&mut self) -> Result<()> {
        let rolled_elsewhere = *self.latest.read() > self.page_no;

        if !rolled_elsewhere {
            let mut latest = self.latest.write();
            // another handle may have rolled while we waited for the lock
            if *latest == self.page_no {
                *latest += 1;
                if let Some(max_pages) = self.options.max_pages {
                    if *latest >= max_pages {
                        evict_page(&self.dir, *latest - max_pages)?;
                    }
                }
            }
        }

        self.page_no += 1;
        self.page = Page::open_with(page_path(&self.dir, self.page_no), self.options.spin)?;
        Ok(())
    }
}

impl<const ARENA: usize> Reader<ARENA> {
    /// Takes the next message, copied out of the page, or `None` when the
    /// stream has nothing new (or the spin policy gave up this round).
    /// Sealed pages are followed transparently.
    pub fn pop(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            match self.page.pop(self.cursor)? {
                PopResult::Msg { payload, advance } => {
                    let msg = payload.to_vec();
                    self.cursor += advance;
                    return Ok(Some(msg));
                }
                PopResult::Empty | PopResult::TimedOut => return Ok(None),
                PopResult::Finished => {}
            }
            self.advance_page()?;
        }
    }

    /// A second cursor over the same stream, starting where this one stands.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            dir: self.dir.clone(),
            latest: Arc::clone(&self.latest),
            page_no: self.page_no,
            page: self.page.reopen()?,
            cursor: self.cursor,
            options: self.options,
        })
    }

    pub fn current_page(&self) -> usize {
        self.page_no
    }

    fn advance_page(&mut self) -> Result<()> {
        let latest = *self.latest.read();
        // eviction may have unlinked the pages right after this one; land on
        // the oldest still alive rather than resurrecting a dead file
        let floor = match self.options.max_pages {
            Some(max_pages) => latest.saturating_sub(max_pages.saturating_sub(1)),
            None => 0,
        };

        self.page_no = (self.page_no + 1).max(floor);
        self.cursor = 0;
        self.page = Page::open_with(page_path(&self.dir, self.page_no), self.options.spin)?;
        self.page.prefetch();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn page_file_names_round_trip() {
        let dir = tempdir().unwrap();
        let path = page_path(dir.path(), 42);
        assert!(path.to_str().unwrap().ends_with("42.page.bin"));

        std::fs::write(&path, b"").unwrap();
        std::fs::write(dir.path().join("not-a-page.txt"), b"").unwrap();
        std::fs::write(dir.path().join("x.page.bin"), b"").unwrap();

        let mut found = Vec::new();
        for entry in fs::read_dir(dir.path()).unwrap() {
            if let Some(no) = page_number(&entry.unwrap()) {
                found.push(no);
            }
        }
        assert_eq!(found, vec![42]);
    }

    #[test]
    fn scan_reports_lowest_and_highest() {
        let dir = tempdir().unwrap();
        assert_eq!(scan_pages(dir.path()).unwrap(), None);

        for no in [3usize, 7, 5] {
            std::fs::write(page_path(dir.path(), no), b"").unwrap();
        }
        assert_eq!(scan_pages(dir.path()).unwrap(), Some((3, 7)));
    }

    #[test]
    fn evicting_a_missing_page_is_fine() {
        let dir = tempdir().unwrap();
        evict_page(dir.path(), 9).unwrap();
    }
}
