use std::time::{Duration, SystemTime};

use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{FeedError, FeedResult};

pub const DEFAULT_BASE_URL: &str = "https://oauth.reddit.com/";

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub user_agent: String,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

#[derive(Debug, Clone, Default)]
pub struct ListingOptions {
    pub after: Option<String>,
    pub limit: Option<u32>,
}

impl ListingOptions {
    fn into_params(self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(limit) = self.limit {
            params.push(("limit".into(), limit.to_string()));
        }
        if let Some(after) = self.after {
            params.push(("after".into(), after));
        }
        params
    }
}

/// The feed always reads the front page's hot listing.
const FRONT_PAGE_PATH: &str = "/hot.json";

/// Blocking Reddit API client. Credentials are not held here: every
/// authenticated call takes the bearer token explicitly.
pub struct Client {
    http: HttpClient,
    user_agent: String,
    base_url: Url,
}

impl Client {
    pub fn new(config: ClientConfig) -> anyhow::Result<Self> {
        if config.user_agent.trim().is_empty() {
            anyhow::bail!("reddit client user agent required");
        }
        let base = config
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = Url::parse(&base)?;
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()?,
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
            base_url,
        })
    }

    pub fn front_page(&self, token: &str, opts: ListingOptions) -> FeedResult<Listing<Post>> {
        let params = opts.into_params();
        let resp = self.request(Method::GET, FRONT_PAGE_PATH, token, &params, None)?;
        let listing: ListingEnvelope<Post> = decode(resp)?;
        Ok(listing.data)
    }

    /// Flattened comment thread for `article` (a bare id or a `t3_` fullname).
    pub fn comments(&self, token: &str, article: &str) -> FeedResult<Vec<Comment>> {
        let path = format!("/comments/{}.json", article.trim_start_matches("t3_"));
        let resp = self.request(Method::GET, &path, token, &[], None)?;
        let payload: Vec<serde_json::Value> = decode(resp)?;
        let Some(raw) = payload.into_iter().nth(1) else {
            return Err(FeedError::Decode(
                "reddit: comments payload missing elements".into(),
            ));
        };
        let listing: ListingEnvelope<Comment> = serde_json::from_value(raw)?;
        Ok(listing
            .data
            .children
            .into_iter()
            .map(|thing| thing.data)
            .collect())
    }

    pub fn vote(&self, token: &str, fullname: &str, dir: i32) -> FeedResult<()> {
        if !(-1..=1).contains(&dir) {
            return Err(FeedError::VoteFailed(format!(
                "reddit: vote direction must be -1, 0, or 1, got {dir}"
            )));
        }
        let form = vec![
            ("id".to_string(), fullname.to_string()),
            ("dir".to_string(), dir.to_string()),
        ];
        self.request(Method::POST, "/api/vote", token, &[], Some(form))?;
        Ok(())
    }

    /// Downloads an absolute media URL. Preview hosts are public, so no
    /// bearer token is attached.
    pub fn download(&self, url: &str) -> FeedResult<Vec<u8>> {
        let url = Url::parse(&sanitize_url(url))?;
        let resp = self
            .http
            .get(url)
            .header(USER_AGENT, self.user_agent.clone())
            .send()?;
        if !resp.status().is_success() {
            return Err(FeedError::Network(format!(
                "media: request failed: {}",
                resp.status()
            )));
        }
        Ok(resp.bytes()?.to_vec())
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        token: &str,
        params: &[(String, String)],
        form: Option<Vec<(String, String)>>,
    ) -> FeedResult<Response> {
        let mut url = self.base_url.join(path)?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }

        let mut req = self.http.request(method, url);
        req = req.header(USER_AGENT, self.user_agent.clone());
        req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        if let Some(form_data) = form {
            req = req.header(CONTENT_TYPE, "application/x-www-form-urlencoded");
            req = req.form(&form_data);
        }

        let resp = req.send()?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        match status.as_u16() {
            401 | 403 => Err(FeedError::AuthRequired),
            429 => Err(FeedError::Network(format!("reddit: rate limited: {body}"))),
            _ => Err(FeedError::Network(format!(
                "reddit: api error {status}: {body}"
            ))),
        }
    }
}

fn decode<T: DeserializeOwned>(resp: Response) -> FeedResult<T> {
    let body = resp.text()?;
    Ok(serde_json::from_str(&body)?)
}

/// Preview URLs arrive HTML-escaped inside JSON.
pub fn sanitize_url(raw: &str) -> String {
    raw.replace("&amp;", "&")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing<T> {
    pub after: Option<String>,
    #[serde(default)]
    pub before: Option<String>,
    pub children: Vec<Thing<T>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thing<T> {
    pub kind: String,
    pub data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub name: String,
    pub title: String,
    pub subreddit: String,
    pub author: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub likes: Option<bool>,
    #[serde(default)]
    pub num_comments: i64,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub stickied: bool,
    #[serde(default)]
    pub over_18: bool,
    #[serde(default)]
    pub spoiler: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub preview: Option<Preview>,
    #[serde(default)]
    pub crosspost_parent_list: Vec<Post>,
}

impl Post {
    pub fn created_at(&self) -> Option<SystemTime> {
        if self.created_utc <= 0.0 {
            return None;
        }
        let secs = self.created_utc.trunc() as u64;
        Some(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Preview {
    #[serde(default)]
    pub images: Vec<PreviewImage>,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PreviewImage {
    pub source: PreviewSource,
    #[serde(default)]
    pub resolutions: Vec<PreviewSource>,
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PreviewSource {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub width: i64,
    #[serde(default)]
    pub height: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Comment {
    pub id: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub depth: i64,
    #[serde(default)]
    pub replies: Option<Box<Listing<Comment>>>,
}

impl Comment {
    /// Depth-first bodies of this comment and its replies.
    pub fn flatten_into(&self, out: &mut Vec<String>) {
        if !self.body.is_empty() {
            out.push(self.body.clone());
        }
        if let Some(replies) = &self.replies {
            for child in &replies.children {
                child.data.flatten_into(out);
            }
        }
    }
}

impl<'de> Deserialize<'de> for Comment {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // "more" stubs carry no body, and empty reply sets arrive as "".
        #[derive(Deserialize)]
        struct CommentHelper {
            id: String,
            #[serde(default)]
            body: String,
            #[serde(default)]
            author: String,
            #[serde(default)]
            depth: i64,
            #[serde(default)]
            replies: serde_json::Value,
        }

        let helper = CommentHelper::deserialize(deserializer)?;
        let replies = if helper.replies.is_null() || helper.replies == "" {
            None
        } else {
            serde_json::from_value::<ListingEnvelope<Comment>>(helper.replies)
                .ok()
                .map(|listing| Box::new(listing.data))
        };
        Ok(Comment {
            id: helper.id,
            body: helper.body,
            author: helper.author,
            depth: helper.depth,
            replies,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ListingEnvelope<T> {
    kind: String,
    data: Listing<T>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"{
        "kind": "Listing",
        "data": {
            "after": "t3_next",
            "before": null,
            "children": [{
                "kind": "t3",
                "data": {
                    "id": "abc", "name": "t3_abc", "title": "Hello",
                    "subreddit": "rust", "author": "ferris", "score": 10,
                    "likes": null, "num_comments": 3, "created_utc": 1611100000.0,
                    "over_18": false, "archived": true,
                    "preview": {"images": [{"id": "img1", "source": {"url": "https://i.test/a.jpg?w=1&amp;s=2", "width": 10, "height": 10}}], "enabled": true},
                    "crosspost_parent_list": [{
                        "id": "par", "name": "t3_par", "title": "Parent",
                        "subreddit": "pics", "author": "someone", "score": 99
                    }]
                }
            }]
        }
    }"#;

    #[test]
    fn decodes_listing_with_crossposts() {
        let envelope: ListingEnvelope<Post> = serde_json::from_str(LISTING).unwrap();
        let listing = envelope.data;
        assert_eq!(listing.after.as_deref(), Some("t3_next"));
        let post = &listing.children[0].data;
        assert_eq!(post.name, "t3_abc");
        assert!(post.archived);
        assert_eq!(post.crosspost_parent_list.len(), 1);
        assert_eq!(post.crosspost_parent_list[0].score, 99);
        assert!(post.created_at().is_some());
    }

    #[test]
    fn comments_with_empty_replies_decode() {
        let raw = r#"{"kind":"Listing","data":{"after":null,"children":[
            {"kind":"t1","data":{"id":"c1","body":"top","replies":{"kind":"Listing","data":{"after":null,"children":[
                {"kind":"t1","data":{"id":"c2","body":"nested","replies":""}}
            ]}}}},
            {"kind":"t1","data":{"id":"c3","body":"second","replies":""}}
        ]}}"#;
        let envelope: ListingEnvelope<Comment> = serde_json::from_str(raw).unwrap();
        let mut bodies = Vec::new();
        for thing in &envelope.data.children {
            thing.data.flatten_into(&mut bodies);
        }
        assert_eq!(bodies, vec!["top", "nested", "second"]);
    }

    #[test]
    fn sanitizes_encoded_urls() {
        assert_eq!(
            sanitize_url("https://i.test/a.jpg?w=1&amp;s=2"),
            "https://i.test/a.jpg?w=1&s=2"
        );
    }

    #[test]
    fn front_page_reads_hot_listing_with_paging_params() {
        assert_eq!(FRONT_PAGE_PATH, "/hot.json");
        let params = ListingOptions {
            after: Some("t3_next".into()),
            limit: Some(25),
        }
        .into_params();
        assert_eq!(
            params,
            vec![
                ("limit".to_string(), "25".to_string()),
                ("after".to_string(), "t3_next".to_string()),
            ]
        );
        assert!(ListingOptions::default().into_params().is_empty());
    }

    #[test]
    fn client_requires_user_agent() {
        assert!(Client::new(ClientConfig::default()).is_err());
    }
}
