use serde::{Deserialize, Serialize};

use crate::data::Gateway;
use crate::error::{FeedError, FeedResult};
use crate::model::Page;
use crate::session::{usable_token, CredentialProvider};

pub const DEFAULT_PAGE_SIZE: u32 = 25;
pub const DEFAULT_PREFETCH_THRESHOLD: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Idle,
    Fetching,
    Exhausted,
}

/// Cursor and in-flight bookkeeping for the listing. Owned by the feed
/// store; it decides whether a fetch may start and records how it ended.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Paginator {
    cursor: Option<String>,
    phase: Phase,
}

impl Paginator {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn in_flight(&self) -> bool {
        self.phase == Phase::Fetching
    }

    /// Starts a fetch if one may start and returns the cursor to request
    /// with. `use_cursor = false` asks for the first page and is allowed
    /// even after exhaustion; a cursor fetch is refused once exhausted.
    /// Only one fetch is ever in flight.
    pub fn begin(&mut self, use_cursor: bool) -> Option<Option<String>> {
        match self.phase {
            Phase::Fetching => None,
            Phase::Exhausted if use_cursor => None,
            _ if use_cursor && self.cursor.is_none() => None,
            _ => {
                self.phase = Phase::Fetching;
                Some(if use_cursor { self.cursor.clone() } else { None })
            }
        }
    }

    /// Records a successful page. A page without a cursor ends pagination.
    pub fn complete(&mut self, next_cursor: Option<String>) {
        self.phase = if next_cursor.is_some() {
            Phase::Idle
        } else {
            Phase::Exhausted
        };
        self.cursor = next_cursor;
    }

    /// Records a failed fetch; the cursor is kept so a retry resumes.
    pub fn fail(&mut self) {
        self.phase = Phase::Idle;
    }
}

/// Whether sitting at `index` in a list of `len` posts is close enough to
/// the tail to ask for more.
pub fn near_tail(len: usize, index: usize, threshold: usize) -> bool {
    len.saturating_sub(index + 1) < threshold
}

/// Loads one page. A missing or blank token fails before any request.
pub fn load_page(
    gateway: &dyn Gateway,
    credentials: &dyn CredentialProvider,
    cursor: Option<&str>,
    limit: u32,
) -> FeedResult<Page> {
    let Some(token) = usable_token(credentials) else {
        tracing::debug!("listing fetch skipped: no credentials");
        return Err(FeedError::AuthRequired);
    };
    let page = gateway.fetch_listings(&token, cursor, limit)?;
    tracing::debug!(
        items = page.items.len(),
        has_next = page.next_cursor.is_some(),
        "listing page loaded"
    );
    Ok(page)
}
