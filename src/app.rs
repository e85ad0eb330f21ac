use std::collections::HashSet;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config;
use crate::data::{self, Gateway};
use crate::logging;
use crate::model::{Direction, Vote};
use crate::reddit;
use crate::runtime::{Host, Runtime};
use crate::session::{CredentialProvider, EnvToken, StaticToken};
use crate::store::{Action, FeedEvent, FeedState};

const OFFLINE_PAGES: usize = 4;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Serve synthetic pages instead of talking to Reddit.
    pub offline: bool,
    pub config_file: Option<PathBuf>,
}

pub fn run(options: RunOptions) -> Result<()> {
    let cfg = config::load(config::LoadOptions {
        config_file: options.config_file.clone(),
        env_prefix: None,
    })
    .context("load config")?;
    logging::init(&cfg.log.level);
    let config_path = options.config_file.clone().or_else(config::default_path);
    tracing::debug!(
        config = %friendly_path(config_path.as_ref()),
        offline = options.offline,
        "starting"
    );

    let (gateway, credentials): (Arc<dyn Gateway>, Arc<dyn CredentialProvider>) =
        if options.offline {
            (
                Arc::new(data::MockGateway::new(
                    OFFLINE_PAGES,
                    cfg.feed.page_size as usize,
                )),
                Arc::new(StaticToken::new("offline")),
            )
        } else {
            let api = reddit::Client::new(reddit::ClientConfig {
                user_agent: cfg.reddit.user_agent.clone(),
                base_url: Some(cfg.reddit.base_url.clone()),
                timeout: Some(cfg.reddit.timeout),
                http_client: None,
            })
            .context("create reddit client")?;
            let media = reddit::Client::new(reddit::ClientConfig {
                user_agent: cfg.reddit.user_agent.clone(),
                base_url: Some(cfg.reddit.base_url.clone()),
                timeout: Some(cfg.media.timeout),
                http_client: None,
            })
            .context("create media client")?;
            (
                Arc::new(
                    data::RedditGateway::new(Arc::new(api)).with_media_client(Arc::new(media)),
                ),
                Arc::new(EnvToken::new(cfg.reddit.token_env.clone())),
            )
        };

    let runtime = Runtime::start(cfg.runtime(), gateway, credentials, ConsoleHost::default());
    runtime.dispatch(Action::LoadPage { use_cursor: false })?;
    println!("rocketfeed {}: n/p move, u/d vote, c comments, m more, q quit", crate::VERSION);

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("read command")?;
        let action = match line.trim() {
            "q" | "quit" => break,
            "" => continue,
            other => match parse_command(other) {
                Some(action) => action,
                None => {
                    println!("unknown command: {other}");
                    continue;
                }
            },
        };
        runtime.dispatch(action)?;
    }

    runtime.shutdown();
    Ok(())
}

fn parse_command(input: &str) -> Option<Action> {
    let action = match input {
        "n" | "next" => Action::Next,
        "p" | "prev" => Action::Previous,
        "u" | "up" => Action::Vote(Direction::Up),
        "d" | "down" => Action::Vote(Direction::Down),
        "c" | "comments" => Action::OpenComments,
        "m" | "more" => Action::LoadMore,
        _ => return None,
    };
    Some(action)
}

/// Prints the render window whenever it changes, plus events and comments.
#[derive(Default)]
struct ConsoleHost {
    last_frame: String,
    shown_comments: HashSet<String>,
}

impl Host for ConsoleHost {
    fn haptic_pulse(&mut self) {
        tracing::trace!("haptic pulse");
    }

    fn on_event(&mut self, event: &FeedEvent) {
        let message = match event {
            FeedEvent::ReauthRequired => {
                "authentication required: set the configured token variable".to_string()
            }
            FeedEvent::PageLoadFailed { error } => format!("could not load posts: {error} (m to retry)"),
            FeedEvent::VoteFailed { post_id, error } => format!("vote on {post_id} failed: {error}"),
            FeedEvent::CommentsFailed { post_id, error } => {
                format!("comments for {post_id} failed: {error}")
            }
        };
        println!("! {message}");
    }

    fn on_state(&mut self, state: &FeedState) {
        let frame = render(state);
        if frame != self.last_frame {
            println!("{frame}");
            self.last_frame = frame;
        }

        let Some(post) = state.current() else {
            return;
        };
        if self.shown_comments.contains(&post.id) {
            return;
        }
        if let Some(bodies) = state.comments(&post.id) {
            for body in bodies {
                println!("    > {}", body.lines().next().unwrap_or_default());
            }
            self.shown_comments.insert(post.id.clone());
        }
    }
}

fn render(state: &FeedState) -> String {
    let Some(window) = state.window() else {
        return "(no posts)".to_string();
    };
    let mut out = String::new();
    for (index, post) in window.indices().zip(state.visible()) {
        let marker = if index == state.current_index() { '>' } else { ' ' };
        let vote = match post.vote() {
            Vote::Up => '+',
            Vote::Down => '-',
            Vote::None => ' ',
        };
        let image = match &post.preview {
            Some(preview) if state.images().contains(&preview.id) => " [img]",
            Some(_) => " [...]",
            None => "",
        };
        out.push_str(&format!(
            "{marker} {index:>4} {vote}{score:>6}  {title}{image}\n",
            score = post.score(),
            title = post.title,
        ));
    }
    out.push_str(&format!(
        "  {}/{} posts{}",
        state.current_index() + 1,
        state.len(),
        if state.fetch_in_flight() { ", loading" } else { "" }
    ));
    out
}

fn friendly_path(path: Option<&PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/rocketfeed/config.yaml".to_string()
    }
}
