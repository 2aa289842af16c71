//! Sequential page enumeration per category
//!
//! Listing pages are dependent: whether page N+1 exists is only known
//! after page N was seen, and an empty page means the category is
//! exhausted. The enumerator therefore keeps one cursor per category and
//! releases exactly one page at a time; the controller reports each
//! page's outcome back before the next one is released. Pages already in
//! the checkpoint frontier are skipped without a fetch.

use crate::checkpoint::JobOutcome;
use crate::config::CategoryEntry;
use crate::state::{Job, JobId};
use std::collections::HashMap;
use url::Url;

/// Why a category stopped producing pages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// A page came back with zero records: the listing is exhausted
    EmptyPage,
    /// The per-category page cap was reached
    MaxPages,
    /// Page 1 failed permanently, so the category entry itself is suspect
    FirstPageFailed,
    /// A previous run already recorded this category's termination
    AlreadyComplete,
}

/// Outcome of the page a category most recently released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// The page was fetched and its records written
    Content,
    /// The page was fetched clean but held zero records
    Empty,
    /// The page failed permanently
    Failed,
}

struct CategoryCursor {
    id: String,
    base: Url,
    page_param: String,
    /// Page most recently released; 0 before the first release
    current: u32,
    finished: Option<FinishReason>,
}

/// One cursor per category, driven by the controller
pub struct Enumerator {
    cursors: Vec<CategoryCursor>,
    frontier: HashMap<JobId, JobOutcome>,
    max_pages: u32,
}

impl Enumerator {
    /// Builds cursors for every configured category
    ///
    /// `frontier` is the checkpoint snapshot taken at startup; identities
    /// found there are never released again.
    pub fn new(
        categories: &[CategoryEntry],
        frontier: HashMap<JobId, JobOutcome>,
        max_pages: u32,
    ) -> crate::Result<Self> {
        let mut cursors = Vec::with_capacity(categories.len());
        for entry in categories {
            cursors.push(CategoryCursor {
                id: entry.id.clone(),
                base: Url::parse(&entry.url)?,
                page_param: entry.page_param.clone(),
                current: 0,
                finished: None,
            });
        }
        Ok(Self {
            cursors,
            frontier,
            max_pages,
        })
    }

    /// Releases the first page of every category that still needs work
    pub fn initial_jobs(&mut self) -> Vec<Job> {
        let mut jobs = Vec::new();
        for i in 0..self.cursors.len() {
            if let Some(job) = release_next(&mut self.cursors[i], &self.frontier, self.max_pages) {
                jobs.push(job);
            }
        }
        jobs
    }

    /// Reports the outcome of a category's released page, returning the
    /// next page to fetch if the category continues
    ///
    /// An empty page terminates the category. A permanent failure on page
    /// 1 aborts it outright, since the base URL or selectors are almost
    /// certainly wrong; a failure deeper in wastes one page and moves on.
    pub fn advance(&mut self, category: &str, outcome: PageOutcome) -> Option<Job> {
        let cursor = match self.cursors.iter_mut().find(|c| c.id == category) {
            Some(cursor) => cursor,
            None => {
                tracing::warn!("Outcome reported for unknown category {}", category);
                return None;
            }
        };
        if cursor.finished.is_some() {
            tracing::warn!("Outcome reported for finished category {}", category);
            return None;
        }

        match outcome {
            PageOutcome::Empty => {
                finish(cursor, FinishReason::EmptyPage);
                None
            }
            PageOutcome::Failed if cursor.current <= 1 => {
                finish(cursor, FinishReason::FirstPageFailed);
                None
            }
            PageOutcome::Content | PageOutcome::Failed => {
                release_next(cursor, &self.frontier, self.max_pages)
            }
        }
    }

    /// True once every category has terminated
    pub fn all_finished(&self) -> bool {
        self.cursors.iter().all(|c| c.finished.is_some())
    }

    /// Number of categories still producing pages
    pub fn remaining(&self) -> usize {
        self.cursors.iter().filter(|c| c.finished.is_none()).count()
    }
}

/// Walks the cursor forward to the next page that needs a fetch
///
/// Pages already completed in the frontier are stepped over; a recorded
/// empty page or the page cap terminates the category instead.
fn release_next(
    cursor: &mut CategoryCursor,
    frontier: &HashMap<JobId, JobOutcome>,
    max_pages: u32,
) -> Option<Job> {
    loop {
        let page = cursor.current + 1;
        if page > max_pages {
            finish(cursor, FinishReason::MaxPages);
            return None;
        }

        let url = page_url(&cursor.base, &cursor.page_param, page);
        let id = JobId::new(cursor.id.clone(), page, url.to_string());
        match frontier.get(&id) {
            Some(JobOutcome::Empty) => {
                finish(cursor, FinishReason::AlreadyComplete);
                return None;
            }
            Some(_) => {
                tracing::debug!("Skipping {}: already checkpointed", id);
                cursor.current = page;
            }
            None => {
                cursor.current = page;
                return Some(Job::new(cursor.id.clone(), page, url));
            }
        }
    }
}

fn finish(cursor: &mut CategoryCursor, reason: FinishReason) {
    cursor.finished = Some(reason);
    match reason {
        FinishReason::EmptyPage => {
            tracing::info!(
                "Category {} exhausted after {} pages",
                cursor.id,
                cursor.current.saturating_sub(1)
            );
        }
        FinishReason::MaxPages => {
            tracing::info!(
                "Category {} stopped at the {}-page cap",
                cursor.id,
                cursor.current
            );
        }
        FinishReason::FirstPageFailed => {
            tracing::error!(
                "Category {} aborted: page 1 failed permanently, check its URL and selectors",
                cursor.id
            );
        }
        FinishReason::AlreadyComplete => {
            tracing::info!("Category {} already complete in the checkpoint log", cursor.id);
        }
    }
}

/// Builds the URL for one page of a category
///
/// Page 1 is the base URL untouched; later pages append the page
/// parameter, keeping whatever query string the base already carries.
fn page_url(base: &Url, param: &str, page: u32) -> Url {
    if page <= 1 {
        return base.clone();
    }
    let mut url = base.clone();
    url.query_pairs_mut().append_pair(param, &page.to_string());
    url
}
