//! The feed state machine.
//!
//! [`FeedState`] is the single owner of everything the feed shows. Hosts
//! never touch it directly: they dispatch an [`Action`], the store applies
//! it in one step and answers with the [`Command`]s the runtime must carry
//! out. Network completions come back as further actions, so every
//! mutation happens inside [`FeedState::apply`].
//!
//! ```text
//! UI ──Action──▶ FeedState::apply ──Command──▶ runtime workers
//!                      ▲                            │
//!                      └──────── Action ◀───────────┘
//! ```

use std::collections::{HashMap, HashSet};

use crate::error::{FeedError, FeedResult};
use crate::model::{Direction, Page, Post, PreviewImage, Vote};
use crate::pagination::{self, Paginator, DEFAULT_PAGE_SIZE, DEFAULT_PREFETCH_THRESHOLD};
use crate::prefetch::ImageCache;
use crate::vote::{Reconciler, Settled, Ticket};
use crate::window::{self, Window, DEFAULT_RADIUS};

/// Tunables for the store. Defaults match the mobile client: 25-post pages,
/// fetch when fewer than 5 posts remain, 5 posts rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedSettings {
    pub page_size: u32,
    pub prefetch_threshold: usize,
    pub window_radius: usize,
    /// How many pages around the current post keep their image fetches.
    pub image_retain_pages: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            prefetch_threshold: DEFAULT_PREFETCH_THRESHOLD,
            window_radius: DEFAULT_RADIUS,
            image_retain_pages: 2,
        }
    }
}

/// Inputs to the store: user intents and completions of earlier commands.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// `use_cursor = false` loads the first page, `true` the next one.
    LoadPage { use_cursor: bool },
    /// Manual retry for the next page, used when the user is already at
    /// the tail and no navigation will trigger a fetch.
    LoadMore,
    PageLoaded(FeedResult<Page>),
    ImagesLoaded {
        batch: u64,
        requested: Vec<String>,
        images: HashMap<String, Vec<u8>>,
    },
    Next,
    Previous,
    Vote(Direction),
    VoteSettled { ticket: Ticket, result: FeedResult<()> },
    OpenComments,
    CommentsLoaded {
        post_id: String,
        result: FeedResult<Vec<String>>,
    },
}

/// Work the store hands back to the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    FetchPage { cursor: Option<String> },
    SubmitVote {
        ticket: Ticket,
        post_id: String,
        direction: Vote,
    },
    PrefetchImages {
        batch: u64,
        images: Vec<PreviewImage>,
    },
    CancelImages { ids: Vec<String> },
    FetchComments { post_id: String },
    HapticPulse,
    Notify(FeedEvent),
}

/// Things the host should know about but the store does not handle itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// The token is missing or was rejected; the session layer should
    /// re-authenticate and update the credential provider.
    ReauthRequired,
    PageLoadFailed { error: FeedError },
    VoteFailed { post_id: String, error: FeedError },
    CommentsFailed { post_id: String, error: FeedError },
}

#[derive(Debug, Clone, Default)]
pub struct FeedState {
    settings: FeedSettings,
    posts: Vec<Post>,
    seen: HashSet<String>,
    current_index: usize,
    paginator: Paginator,
    images: ImageCache,
    loading_images: HashMap<String, InFlight>,
    /// Cancelled image id -> post index, re-requested when the post comes
    /// back into view.
    cancelled_images: HashMap<String, usize>,
    next_batch: u64,
    votes: Reconciler,
    window: Option<Window>,
    comments: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InFlight {
    index: usize,
    batch: u64,
}

/// Pure transition: consumes the state and returns the next one together
/// with the commands to run.
pub fn apply(mut state: FeedState, action: Action) -> (FeedState, Vec<Command>) {
    let commands = state.apply(action);
    (state, commands)
}

impl FeedState {
    pub fn new(settings: FeedSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn settings(&self) -> &FeedSettings {
        &self.settings
    }

    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current(&self) -> Option<&Post> {
        self.posts.get(self.current_index)
    }

    pub fn window(&self) -> Option<Window> {
        self.window
    }

    /// Posts inside the render window, in order.
    pub fn visible(&self) -> &[Post] {
        match self.window {
            Some(w) => &self.posts[w.start..=w.end],
            None => &[],
        }
    }

    pub fn paginator(&self) -> &Paginator {
        &self.paginator
    }

    pub fn fetch_in_flight(&self) -> bool {
        self.paginator.in_flight()
    }

    pub fn next_cursor(&self) -> Option<&str> {
        self.paginator.cursor()
    }

    pub fn images(&self) -> &ImageCache {
        &self.images
    }

    pub fn loading_images(&self) -> usize {
        self.loading_images.len()
    }

    pub fn pending_votes(&self) -> usize {
        self.votes.pending()
    }

    pub fn comments(&self, post_id: &str) -> Option<&[String]> {
        self.comments.get(post_id).map(Vec::as_slice)
    }

    /// Applies one action and returns the commands it produced.
    pub fn apply(&mut self, action: Action) -> Vec<Command> {
        let _span = tracing::debug_span!("apply", index = self.current_index).entered();

        match action {
            Action::LoadPage { use_cursor } => self.request_page(use_cursor).into_iter().collect(),
            Action::LoadMore => self.request_page(true).into_iter().collect(),
            Action::PageLoaded(Ok(page)) => self.append_page(page),
            Action::PageLoaded(Err(error)) => {
                tracing::warn!(%error, "page load failed");
                self.paginator.fail();
                let mut commands = Vec::new();
                if error.is_auth() {
                    commands.push(Command::Notify(FeedEvent::ReauthRequired));
                }
                commands.push(Command::Notify(FeedEvent::PageLoadFailed { error }));
                commands
            }
            Action::ImagesLoaded {
                batch,
                requested,
                images,
            } => {
                for id in &requested {
                    // A newer batch may have re-requested the same image.
                    if self.loading_images.get(id).map(|f| f.batch) == Some(batch) {
                        self.loading_images.remove(id);
                    }
                }
                let added = self.images.merge(images);
                tracing::debug!(requested = requested.len(), added, "images merged");
                Vec::new()
            }
            Action::Next => self.next(),
            Action::Previous => {
                if self.current_index == 0 || self.posts.is_empty() {
                    return Vec::new();
                }
                self.current_index -= 1;
                self.refresh_window();
                let mut commands = self.cancel_distant_images();
                commands.extend(self.resume_window_images());
                commands.push(Command::HapticPulse);
                commands
            }
            Action::Vote(direction) => {
                let index = self.current_index;
                let Some(post) = self.posts.get_mut(index) else {
                    return Vec::new();
                };
                let (ticket, vote) = self.votes.tap(post, direction);
                tracing::debug!(post_id = %post.id, ticket, vote = vote.as_str(), "optimistic vote applied");
                vec![Command::SubmitVote {
                    ticket,
                    post_id: post.id.clone(),
                    direction: vote,
                }]
            }
            Action::VoteSettled { ticket, result } => self.settle_vote(ticket, result),
            Action::OpenComments => match self.current() {
                Some(post) => vec![Command::FetchComments {
                    post_id: post.id.clone(),
                }],
                None => Vec::new(),
            },
            Action::CommentsLoaded { post_id, result } => match result {
                Ok(bodies) => {
                    self.comments.insert(post_id, bodies);
                    Vec::new()
                }
                Err(error) => {
                    tracing::warn!(%post_id, %error, "comments failed");
                    vec![Command::Notify(FeedEvent::CommentsFailed { post_id, error })]
                }
            },
        }
    }

    fn request_page(&mut self, use_cursor: bool) -> Option<Command> {
        let cursor = self.paginator.begin(use_cursor)?;
        tracing::debug!(cursor = ?cursor, "requesting page");
        Some(Command::FetchPage { cursor })
    }

    fn next(&mut self) -> Vec<Command> {
        if self.current_index + 1 >= self.posts.len() {
            return Vec::new();
        }
        self.current_index += 1;
        self.refresh_window();

        let mut commands = Vec::new();
        if pagination::near_tail(
            self.posts.len(),
            self.current_index,
            self.settings.prefetch_threshold,
        ) {
            commands.extend(self.request_page(true));
        }
        commands.extend(self.cancel_distant_images());
        commands.extend(self.resume_window_images());
        commands.push(Command::HapticPulse);
        commands
    }

    fn append_page(&mut self, page: Page) -> Vec<Command> {
        self.paginator.complete(page.next_cursor);

        let mut previews = Vec::new();
        let mut duplicates = 0;
        for post in page.items {
            if !self.seen.insert(post.id.clone()) {
                duplicates += 1;
                continue;
            }
            if let Some(preview) = &post.preview {
                if !self.images.contains(&preview.id)
                    && !self.loading_images.contains_key(&preview.id)
                {
                    previews.push((preview.clone(), self.posts.len()));
                }
            }
            self.posts.push(post);
        }
        self.refresh_window();
        tracing::debug!(
            total = self.posts.len(),
            duplicates,
            exhausted = self.paginator.cursor().is_none(),
            "page appended"
        );

        self.prefetch(previews).into_iter().collect()
    }

    /// Marks images as loading under a fresh batch number.
    fn prefetch(&mut self, previews: Vec<(PreviewImage, usize)>) -> Option<Command> {
        if previews.is_empty() {
            return None;
        }
        self.next_batch += 1;
        let batch = self.next_batch;
        let images = previews
            .into_iter()
            .map(|(image, index)| {
                self.loading_images
                    .insert(image.id.clone(), InFlight { index, batch });
                image
            })
            .collect();
        Some(Command::PrefetchImages { batch, images })
    }

    fn settle_vote(&mut self, ticket: Ticket, result: FeedResult<()>) -> Vec<Command> {
        let error = result.err();
        match self.votes.settle(ticket, error.is_none(), &mut self.posts) {
            Settled::Confirmed => vec![Command::HapticPulse],
            Settled::RolledBack { post_id } | Settled::Superseded { post_id } => {
                let error = error.unwrap_or_else(|| FeedError::VoteFailed("unknown".into()));
                tracing::warn!(%post_id, %error, "vote failed");
                let mut commands = Vec::new();
                if error.is_auth() {
                    commands.push(Command::Notify(FeedEvent::ReauthRequired));
                }
                commands.push(Command::Notify(FeedEvent::VoteFailed { post_id, error }));
                commands
            }
            Settled::Unknown => {
                tracing::debug!(ticket, "settlement for unknown vote ticket");
                Vec::new()
            }
        }
    }

    fn refresh_window(&mut self) {
        self.window = window::window(
            self.posts.len(),
            self.current_index,
            self.settings.window_radius,
        );
    }

    /// Cancels image fetches for posts more than `image_retain_pages` pages
    /// away from the current post.
    fn cancel_distant_images(&mut self) -> Vec<Command> {
        let horizon = self.settings.page_size as usize * self.settings.image_retain_pages;
        let current = self.current_index;
        let mut ids: Vec<String> = self
            .loading_images
            .iter()
            .filter(|(_, f)| f.index.abs_diff(current) > horizon)
            .map(|(id, _)| id.clone())
            .collect();
        if ids.is_empty() {
            return Vec::new();
        }
        ids.sort();
        for id in &ids {
            if let Some(f) = self.loading_images.remove(id) {
                self.cancelled_images.insert(id.clone(), f.index);
            }
        }
        tracing::debug!(count = ids.len(), "cancelling distant image fetches");
        vec![Command::CancelImages { ids }]
    }

    /// Re-requests cancelled images whose posts are back in the render
    /// window and within the retain horizon.
    fn resume_window_images(&mut self) -> Vec<Command> {
        let Some(window) = self.window else {
            return Vec::new();
        };
        let horizon = self.settings.page_size as usize * self.settings.image_retain_pages;
        let current = self.current_index;
        let mut due: Vec<(String, usize)> = self
            .cancelled_images
            .iter()
            .filter(|(_, index)| window.contains(**index) && index.abs_diff(current) <= horizon)
            .map(|(id, index)| (id.clone(), *index))
            .collect();
        due.sort_by_key(|(_, index)| *index);

        let mut previews = Vec::new();
        for (id, index) in due {
            self.cancelled_images.remove(&id);
            if self.images.contains(&id) {
                continue;
            }
            if let Some(preview) = self.posts.get(index).and_then(|p| p.preview.clone()) {
                previews.push((preview, index));
            }
        }
        if !previews.is_empty() {
            tracing::debug!(count = previews.len(), "resuming cancelled image fetches");
        }
        self.prefetch(previews).into_iter().collect()
    }
}
