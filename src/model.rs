use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reddit;

/// The two directions a user can tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

/// Tri-state vote held by every post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Up,
    Down,
    #[default]
    None,
}

impl Vote {
    /// Score contribution of this vote, which is also the wire `dir` value.
    pub fn value(self) -> i64 {
        match self {
            Vote::Up => 1,
            Vote::None => 0,
            Vote::Down => -1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Vote::Up => "up",
            Vote::Down => "down",
            Vote::None => "none",
        }
    }

    pub fn from_likes(likes: Option<bool>) -> Self {
        match likes {
            Some(true) => Vote::Up,
            Some(false) => Vote::Down,
            None => Vote::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PreviewImage {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModerationFlags {
    pub over_18: bool,
    pub spoiler: bool,
    pub stickied: bool,
    pub archived: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    /// Service fullname (`t3_...`); the id votes and comments are keyed by.
    pub id: String,
    pub title: String,
    pub author: String,
    pub subreddit: String,
    score: i64,
    vote: Vote,
    pub created_at: Option<DateTime<Utc>>,
    pub preview: Option<PreviewImage>,
    /// Posts this one was cross-posted from. Owned values, never cyclic.
    pub crossposts: Vec<Post>,
    pub num_comments: i64,
    pub flags: ModerationFlags,
}

impl Post {
    pub fn new(id: impl Into<String>, title: impl Into<String>, score: i64, vote: Vote) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            author: String::new(),
            subreddit: String::new(),
            score,
            vote,
            created_at: None,
            preview: None,
            crossposts: Vec::new(),
            num_comments: 0,
            flags: ModerationFlags::default(),
        }
    }

    pub fn with_preview(mut self, id: impl Into<String>, url: impl Into<String>) -> Self {
        self.preview = Some(PreviewImage {
            id: id.into(),
            url: url.into(),
        });
        self
    }

    pub fn score(&self) -> i64 {
        self.score
    }

    pub fn vote(&self) -> Vote {
        self.vote
    }

    /// Moves the post to `vote`, shifting the score by the difference of
    /// the two votes. This is the only way either field changes.
    pub fn set_vote(&mut self, vote: Vote) -> i64 {
        let delta = vote.value() - self.vote.value();
        self.score += delta;
        self.vote = vote;
        delta
    }

    /// Restores an exact `(score, vote)` pair captured earlier.
    pub(crate) fn restore(&mut self, score: i64, vote: Vote) {
        self.score = score;
        self.vote = vote;
    }

    /// Number of posts in this cross-post tree, including this one.
    pub fn tree_size(&self) -> usize {
        1 + self.crossposts.iter().map(Post::tree_size).sum::<usize>()
    }
}

impl From<reddit::Post> for Post {
    fn from(raw: reddit::Post) -> Self {
        let created_at = raw.created_at().map(DateTime::<Utc>::from);
        let preview = raw
            .preview
            .as_ref()
            .and_then(|p| p.images.iter().find(|img| !img.source.url.is_empty()))
            .map(|img| PreviewImage {
                id: if img.id.is_empty() {
                    raw.name.clone()
                } else {
                    img.id.clone()
                },
                url: reddit::sanitize_url(&img.source.url),
            });
        Post {
            id: raw.name,
            title: raw.title,
            author: raw.author,
            subreddit: raw.subreddit,
            score: raw.score,
            vote: Vote::from_likes(raw.likes),
            created_at,
            preview,
            crossposts: raw
                .crosspost_parent_list
                .into_iter()
                .map(Post::from)
                .collect(),
            num_comments: raw.num_comments,
            flags: ModerationFlags {
                over_18: raw.over_18,
                spoiler: raw.spoiler,
                stickied: raw.stickied,
                archived: raw.archived,
            },
        }
    }
}

/// One fetched slice of the listing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Page {
    pub items: Vec<Post>,
    pub next_cursor: Option<String>,
}

impl Page {
    pub fn preview_images(&self) -> Vec<PreviewImage> {
        self.items
            .iter()
            .filter_map(|post| post.preview.clone())
            .collect()
    }
}

impl From<reddit::Listing<reddit::Post>> for Page {
    fn from(listing: reddit::Listing<reddit::Post>) -> Self {
        Page {
            items: listing
                .children
                .into_iter()
                .map(|thing| Post::from(thing.data))
                .collect(),
            next_cursor: listing.after.filter(|cursor| !cursor.is_empty()),
        }
    }
}
