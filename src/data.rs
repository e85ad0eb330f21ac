use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{FeedError, FeedResult};
use crate::model::{Page, Post, Vote};
use crate::reddit::{self, ListingOptions};

/// Everything the feed needs from the network. Implementations block; the
/// runtime calls them from worker threads.
pub trait Gateway: Send + Sync {
    fn fetch_listings(&self, token: &str, cursor: Option<&str>, limit: u32) -> FeedResult<Page>;
    fn fetch_image(&self, url: &str) -> FeedResult<Vec<u8>>;
    fn submit_vote(&self, token: &str, post_id: &str, direction: Vote) -> FeedResult<()>;
    fn fetch_comments(&self, token: &str, post_id: &str) -> FeedResult<Vec<String>>;
}

pub struct RedditGateway {
    client: Arc<reddit::Client>,
    media: Arc<reddit::Client>,
}

impl RedditGateway {
    pub fn new(client: Arc<reddit::Client>) -> Self {
        Self {
            media: client.clone(),
            client,
        }
    }

    /// Uses a separate client (own timeout) for preview downloads.
    pub fn with_media_client(mut self, media: Arc<reddit::Client>) -> Self {
        self.media = media;
        self
    }
}

impl Gateway for RedditGateway {
    fn fetch_listings(&self, token: &str, cursor: Option<&str>, limit: u32) -> FeedResult<Page> {
        let opts = ListingOptions {
            after: cursor.map(str::to_string),
            limit: Some(limit),
        };
        self.client
            .front_page(token, opts)
            .map(Page::from)
    }

    fn fetch_image(&self, url: &str) -> FeedResult<Vec<u8>> {
        self.media.download(url)
    }

    fn submit_vote(&self, token: &str, post_id: &str, direction: Vote) -> FeedResult<()> {
        self.client
            .vote(token, post_id, direction.value() as i32)
            .map_err(|err| match err {
                FeedError::AuthRequired | FeedError::VoteFailed(_) => err,
                other => FeedError::VoteFailed(other.to_string()),
            })
    }

    fn fetch_comments(&self, token: &str, post_id: &str) -> FeedResult<Vec<String>> {
        let comments = self.client.comments(token, post_id)?;
        let mut bodies = Vec::new();
        for comment in &comments {
            comment.flatten_into(&mut bodies);
        }
        Ok(bodies)
    }
}

/// Smallest valid PNG signature; enough for format sniffing.
pub const MOCK_IMAGE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

/// Offline gateway serving a fixed number of synthetic pages. Used by the
/// `--offline` binary mode and by tests.
#[derive(Default)]
pub struct MockGateway {
    pages: usize,
    page_size: usize,
    fail_votes: bool,
    broken_images: HashSet<String>,
    image_delay: Duration,
    calls: Mutex<MockCalls>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockCalls {
    pub listings: usize,
    pub images: usize,
    pub votes: Vec<(String, Vote)>,
    pub comments: usize,
}

impl MockGateway {
    pub fn new(pages: usize, page_size: usize) -> Self {
        Self {
            pages,
            page_size,
            ..Self::default()
        }
    }

    pub fn failing_votes(mut self) -> Self {
        self.fail_votes = true;
        self
    }

    /// Makes every image download take at least `delay`.
    pub fn with_image_delay(mut self, delay: Duration) -> Self {
        self.image_delay = delay;
        self
    }

    pub fn with_broken_image(mut self, url: impl Into<String>) -> Self {
        self.broken_images.insert(url.into());
        self
    }

    pub fn calls(&self) -> MockCalls {
        self.calls.lock().clone()
    }

    fn page(&self, index: usize) -> Page {
        let start = index * self.page_size;
        let items = (start..start + self.page_size)
            .map(|n| {
                let mut post = Post::new(format!("t3_{n}"), format!("Sample post {n}"), 100, Vote::None)
                    .with_preview(format!("img{n}"), format!("https://preview.test/{n}.png"));
                post.author = "rocketfeed".into();
                post.subreddit = "r/rocketfeed".into();
                post.num_comments = 2;
                post
            })
            .collect();
        let next_cursor = (index + 1 < self.pages).then(|| format!("page{}", index + 1));
        Page { items, next_cursor }
    }
}

impl Gateway for MockGateway {
    fn fetch_listings(&self, _token: &str, cursor: Option<&str>, _limit: u32) -> FeedResult<Page> {
        self.calls.lock().listings += 1;
        let index = match cursor {
            None => 0,
            Some(raw) => raw
                .strip_prefix("page")
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| FeedError::Decode(format!("mock: unknown cursor {raw}")))?,
        };
        if index >= self.pages {
            return Ok(Page::default());
        }
        Ok(self.page(index))
    }

    fn fetch_image(&self, url: &str) -> FeedResult<Vec<u8>> {
        self.calls.lock().images += 1;
        if !self.image_delay.is_zero() {
            thread::sleep(self.image_delay);
        }
        if self.broken_images.contains(url) {
            return Err(FeedError::Network(format!("mock: {url} unavailable")));
        }
        Ok(MOCK_IMAGE.to_vec())
    }

    fn submit_vote(&self, _token: &str, post_id: &str, direction: Vote) -> FeedResult<()> {
        self.calls.lock().votes.push((post_id.to_string(), direction));
        if self.fail_votes {
            return Err(FeedError::VoteFailed("mock: vote rejected".into()));
        }
        Ok(())
    }

    fn fetch_comments(&self, _token: &str, post_id: &str) -> FeedResult<Vec<String>> {
        self.calls.lock().comments += 1;
        Ok(vec![
            format!("First comment on {post_id}"),
            "A reply".to_string(),
        ])
    }
}
