//! Paged directory listings.
//!
//! A [`ResultSet`] holds one page of entries at a time. Callers read the
//! current page through [`len`](ResultSet::len) and
//! [`entry_at`](ResultSet::entry_at), then call
//! [`next_page`](ResultSet::next_page) until it returns
//! [`VfsError::EndOfSequence`].

use tracing::warn;

use crate::context::Context;
use crate::error::{VfsError, VfsResult};
use crate::types::Entry;

/// One page of a possibly larger listing.
pub trait ResultSet: Send {
    /// Entries available on the current page without further I/O.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entry `idx` of the current page.
    fn entry_at(&self, idx: usize) -> Option<&Entry>;

    /// Estimated number of entries across all pages, `-1` if unknown.
    fn total(&self) -> i64;

    /// Estimated number of pages, `-1` if unknown.
    fn pages(&self) -> i64;

    /// Load the next page. Returns `EndOfSequence` when there is none; the
    /// current page is left unchanged in that case.
    fn next_page(&mut self, ctx: &Context) -> VfsResult<()>;

    /// Release backend resources.
    fn close(&mut self) -> VfsResult<()> {
        Ok(())
    }
}

/// Read every remaining page into a vector, starting with the current one.
pub fn collect_all(set: &mut dyn ResultSet, ctx: &Context) -> VfsResult<Vec<Entry>> {
    let mut out = Vec::with_capacity(set.total().max(0) as usize);
    loop {
        out.extend((0..set.len()).filter_map(|i| set.entry_at(i).cloned()));
        match set.next_page(ctx) {
            Ok(()) => {}
            Err(e) if e.is_end_of_sequence() => return Ok(out),
            Err(e) => return Err(e),
        }
    }
}

/// In-memory listing, optionally split into fixed-size pages.
#[derive(Debug, Clone, Default)]
pub struct VecResultSet {
    entries: Vec<Entry>,
    page_size: Option<usize>,
    page: usize,
    total: Option<i64>,
}

impl VecResultSet {
    /// A single page holding every entry.
    pub fn new(entries: Vec<Entry>) -> Self {
        Self {
            entries,
            ..Default::default()
        }
    }

    /// Pages of at most `page_size` entries. A size of zero means one page.
    pub fn paged(entries: Vec<Entry>, page_size: usize) -> Self {
        Self {
            entries,
            page_size: (page_size > 0).then_some(page_size),
            ..Default::default()
        }
    }

    /// Override the reported total, e.g. `-1` for a backend that cannot
    /// count ahead of time.
    pub fn with_total(mut self, total: i64) -> Self {
        self.total = Some(total);
        self
    }

    fn page_bounds(&self) -> (usize, usize) {
        match self.page_size {
            Some(size) => {
                let start = (self.page * size).min(self.entries.len());
                let end = (start + size).min(self.entries.len());
                (start, end)
            }
            None => (0, self.entries.len()),
        }
    }
}

impl ResultSet for VecResultSet {
    fn len(&self) -> usize {
        let (start, end) = self.page_bounds();
        end - start
    }

    fn entry_at(&self, idx: usize) -> Option<&Entry> {
        let (start, end) = self.page_bounds();
        self.entries[start..end].get(idx)
    }

    fn total(&self) -> i64 {
        self.total.unwrap_or(self.entries.len() as i64)
    }

    fn pages(&self) -> i64 {
        match self.page_size {
            Some(size) => self.entries.len().div_ceil(size).max(1) as i64,
            None => 1,
        }
    }

    fn next_page(&mut self, ctx: &Context) -> VfsResult<()> {
        ctx.check_cancelled()?;
        match self.page_size {
            Some(size) if (self.page + 1) * size < self.entries.len() => {
                self.page += 1;
                Ok(())
            }
            _ => Err(VfsError::EndOfSequence),
        }
    }
}

/// Several result sets read back to back.
///
/// Pages of the first set come first; when it is exhausted
/// [`next_page`](ResultSet::next_page) moves on to the first page of the
/// next set.
#[derive(Default)]
pub struct JoinedResultSet {
    sets: Vec<Box<dyn ResultSet>>,
    active: usize,
}

impl JoinedResultSet {
    pub fn new(sets: Vec<Box<dyn ResultSet>>) -> Self {
        Self { sets, active: 0 }
    }

    pub fn push(&mut self, set: Box<dyn ResultSet>) {
        self.sets.push(set);
    }

    /// Number of constituent sets.
    pub fn set_count(&self) -> usize {
        self.sets.len()
    }
}

impl std::fmt::Debug for JoinedResultSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinedResultSet")
            .field("sets", &self.sets.len())
            .field("active", &self.active)
            .finish()
    }
}

impl ResultSet for JoinedResultSet {
    fn len(&self) -> usize {
        self.sets.get(self.active).map_or(0, |s| s.len())
    }

    fn entry_at(&self, idx: usize) -> Option<&Entry> {
        self.sets.get(self.active).and_then(|s| s.entry_at(idx))
    }

    fn total(&self) -> i64 {
        let mut sum = 0;
        for set in &self.sets {
            let t = set.total();
            if t < 0 {
                return -1;
            }
            sum += t;
        }
        sum
    }

    fn pages(&self) -> i64 {
        let mut sum = 0;
        for set in &self.sets {
            let p = set.pages();
            if p < 0 {
                return -1;
            }
            sum += p;
        }
        sum
    }

    fn next_page(&mut self, ctx: &Context) -> VfsResult<()> {
        let Some(current) = self.sets.get_mut(self.active) else {
            return Err(VfsError::EndOfSequence);
        };
        match current.next_page(ctx) {
            Err(e) if e.is_end_of_sequence() => {
                if self.active + 1 >= self.sets.len() {
                    return Err(VfsError::EndOfSequence);
                }
                self.active += 1;
                Ok(())
            }
            other => other,
        }
    }

    /// Closes every constituent even when some fail; returns the first error.
    fn close(&mut self) -> VfsResult<()> {
        let mut first: Option<VfsError> = None;
        for (idx, set) in self.sets.iter_mut().enumerate() {
            if let Err(e) = set.close() {
                if first.is_none() {
                    first = Some(e);
                } else {
                    warn!(set = idx, error = %e, "additional error closing joined result set");
                }
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
