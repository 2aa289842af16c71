//! Block detection over fetched pages
//!
//! Targets rarely say "you are blocked" outright. They throttle with
//! status codes, serve challenge interstitials with a 200, or return
//! stub pages a fraction of the normal size. The detector folds those
//! signals into one classification so the rest of the engine can treat
//! "blocked" as a single concept.

use crate::fetch::FetchedPage;

/// Statuses targets use to throttle or wall off scrapers
const SOFT_BLOCK_STATUSES: [u16; 3] = [429, 403, 503];

/// Lowercase fragments that betray a challenge or interstitial page
const CHALLENGE_MARKERS: [&str; 5] = [
    "captcha",
    "cloudflare",
    "are you human",
    "access denied",
    "unusual traffic",
];

/// A 2xx listing page smaller than this is a stub, not content
const MIN_CONTENT_BYTES: usize = 512;

/// What one fetched page turned out to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Real content; hand the body to the extractor
    Success,
    /// The target is pushing back; retry later under a longer delay
    SoftBlock(String),
    /// A non-retryable error status
    HardError(u16),
}

/// Classifies fetched pages by status, size, and content signatures
#[derive(Debug, Clone)]
pub struct BlockDetector {
    min_content_bytes: usize,
}

impl BlockDetector {
    pub fn new() -> Self {
        Self {
            min_content_bytes: MIN_CONTENT_BYTES,
        }
    }

    /// Classifies one fetched page
    ///
    /// Throttling statuses are soft blocks. Other non-2xx statuses are
    /// hard errors. A 2xx page is still a soft block when it carries a
    /// challenge marker or is too small to be a listing page. A normal
    /// 2xx page with no records is not a block; that distinction belongs
    /// to the extractor.
    pub fn classify(&self, page: &FetchedPage) -> Classification {
        if SOFT_BLOCK_STATUSES.contains(&page.status) {
            return Classification::SoftBlock(format!("status {}", page.status));
        }
        if !(200..300).contains(&page.status) {
            return Classification::HardError(page.status);
        }

        let lowered = page.body.to_lowercase();
        for marker in CHALLENGE_MARKERS {
            if lowered.contains(marker) {
                return Classification::SoftBlock(format!("challenge marker {:?}", marker));
            }
        }

        if page.body.len() < self.min_content_bytes {
            return Classification::SoftBlock(format!(
                "body only {} bytes where a listing was expected",
                page.body.len()
            ));
        }

        Classification::Success
    }
}

impl Default for BlockDetector {
    fn default() -> Self {
        Self::new()
    }
}
