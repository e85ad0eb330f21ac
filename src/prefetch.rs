use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use image::ImageFormat;
use parking_lot::Mutex;

use crate::data::Gateway;
use crate::error::{FeedError, FeedResult};
use crate::model::PreviewImage;

/// Append-only image store keyed by preview image id. Merging is a union
/// that never overwrites, so completions may arrive in any order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageCache {
    entries: HashMap<String, Vec<u8>>,
}

impl ImageCache {
    pub fn get(&self, id: &str) -> Option<&[u8]> {
        self.entries.get(id).map(Vec::as_slice)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Adds every image not already present and returns how many were new.
    pub fn merge(&mut self, images: HashMap<String, Vec<u8>>) -> usize {
        let mut added = 0;
        for (id, bytes) in images {
            self.entries.entry(id).or_insert_with(|| {
                added += 1;
                bytes
            });
        }
        added
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    fn same(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

type Outcome = (String, CancelToken, FeedResult<Vec<u8>>);

struct Job {
    image: PreviewImage,
    token: CancelToken,
    tx: Sender<Outcome>,
}

struct Inner {
    gateway: Arc<dyn Gateway>,
    jobs: Sender<Job>,
    stop: Sender<()>,
    tokens: Mutex<HashMap<String, CancelToken>>,
}

/// Fans image fetches out over a fixed worker pool and joins each batch
/// into one map.
pub struct Prefetcher {
    inner: Arc<Inner>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl Prefetcher {
    pub fn new(gateway: Arc<dyn Gateway>, cfg: Config) -> Self {
        let workers = if cfg.workers == 0 { 4 } else { cfg.workers };
        let (job_tx, job_rx) = unbounded();
        let (stop_tx, stop_rx) = unbounded();

        let inner = Arc::new(Inner {
            gateway,
            jobs: job_tx,
            stop: stop_tx,
            tokens: Mutex::new(HashMap::new()),
        });

        let mut handles = Vec::new();
        for _ in 0..workers {
            let rx_jobs = job_rx.clone();
            let rx_stop = stop_rx.clone();
            let worker_inner = inner.clone();
            handles.push(thread::spawn(move || worker_inner.worker(rx_jobs, rx_stop)));
        }

        Self { inner, handles }
    }

    /// Queues every image on the pool and returns a handle for joining
    /// the results. Does not block.
    pub fn start(&self, images: &[PreviewImage]) -> Batch {
        let (tx, rx) = unbounded();
        let mut issued = 0;
        for image in images {
            let job = Job {
                image: image.clone(),
                token: self.register(&image.id),
                tx: tx.clone(),
            };
            if self.inner.jobs.send(job).is_ok() {
                issued += 1;
            }
        }
        Batch {
            inner: self.inner.clone(),
            requested: images.iter().map(|image| image.id.clone()).collect(),
            issued,
            rx,
        }
    }

    /// Fetches every image concurrently and blocks until all have finished.
    pub fn prefetch(&self, images: &[PreviewImage]) -> HashMap<String, Vec<u8>> {
        self.start(images).join()
    }

    /// Cancels in-flight fetches for `ids`. Unknown ids are ignored.
    pub fn cancel(&self, ids: &[String]) {
        let tokens = self.inner.tokens.lock();
        for id in ids {
            if let Some(token) = tokens.get(id) {
                token.cancel();
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.inner.tokens.lock().len()
    }

    /// Shares the live token for `id`, replacing one that was cancelled.
    fn register(&self, id: &str) -> CancelToken {
        let mut tokens = self.inner.tokens.lock();
        let token = tokens.entry(id.to_string()).or_default();
        if token.is_cancelled() {
            *token = CancelToken::default();
        }
        token.clone()
    }

    fn shutdown(&mut self) {
        for _ in &self.handles {
            let _ = self.inner.stop.send(());
        }
        while let Some(handle) = self.handles.pop() {
            let _ = handle.join();
        }
    }
}

/// One prefetch request in flight on the pool.
pub struct Batch {
    inner: Arc<Inner>,
    requested: Vec<String>,
    issued: usize,
    rx: Receiver<Outcome>,
}

impl Batch {
    pub fn requested(&self) -> &[String] {
        &self.requested
    }

    /// Blocks until every job has reported. Failed, cancelled and
    /// undecodable images are left out of the result.
    pub fn join(self) -> HashMap<String, Vec<u8>> {
        let mut loaded = HashMap::new();
        for (id, token, result) in self.rx.iter().take(self.issued) {
            {
                let mut tokens = self.inner.tokens.lock();
                if tokens.get(&id).is_some_and(|live| live.same(&token)) {
                    tokens.remove(&id);
                }
            }
            match result {
                Ok(bytes) => {
                    loaded.insert(id, bytes);
                }
                Err(err) => tracing::debug!(image_id = %id, error = %err, "image dropped"),
            }
        }
        tracing::debug!(
            requested = self.requested.len(),
            loaded = loaded.len(),
            "prefetch batch joined"
        );
        loaded
    }
}

impl Drop for Prefetcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn worker(&self, jobs: Receiver<Job>, stop: Receiver<()>) {
        loop {
            crossbeam_channel::select! {
                recv(stop) -> _ => break,
                recv(jobs) -> msg => {
                    match msg {
                        Ok(job) => self.process(job),
                        Err(_) => break,
                    }
                }
            }
        }
    }

    fn process(&self, job: Job) {
        let result = self.fetch(&job.image, &job.token);
        let _ = job.tx.send((job.image.id, job.token, result));
    }

    fn fetch(&self, image: &PreviewImage, token: &CancelToken) -> FeedResult<Vec<u8>> {
        if token.is_cancelled() {
            return Err(FeedError::Network("media: cancelled".into()));
        }
        if image.url.is_empty() {
            return Err(FeedError::Network("media: url required".into()));
        }
        let bytes = self.gateway.fetch_image(&image.url)?;
        if token.is_cancelled() {
            return Err(FeedError::Network("media: cancelled".into()));
        }
        detect_format(&bytes)?;
        Ok(bytes)
    }
}

fn detect_format(bytes: &[u8]) -> FeedResult<ImageFormat> {
    match image::guess_format(bytes) {
        Ok(
            format @ (ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Gif | ImageFormat::WebP),
        ) => Ok(format),
        Ok(other) => Err(FeedError::Decode(format!(
            "media: unsupported format {other:?}"
        ))),
        Err(err) => Err(FeedError::Decode(format!("media: {err}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{MockGateway, MOCK_IMAGE};
    use std::time::{Duration, Instant};

    fn images(n: usize) -> Vec<PreviewImage> {
        (0..n)
            .map(|i| PreviewImage {
                id: format!("img{i}"),
                url: format!("https://preview.test/{i}.png"),
            })
            .collect()
    }

    #[test]
    fn merge_is_idempotent() {
        let batch: HashMap<String, Vec<u8>> =
            [("a".to_string(), vec![1, 2, 3]), ("b".to_string(), vec![4])].into();
        let mut once = ImageCache::default();
        assert_eq!(once.merge(batch.clone()), 2);
        let mut twice = once.clone();
        assert_eq!(twice.merge(batch), 0);
        assert_eq!(once, twice);
    }

    #[test]
    fn merge_never_overwrites() {
        let mut cache = ImageCache::default();
        cache.merge([("a".to_string(), vec![1])].into());
        cache.merge([("a".to_string(), vec![9])].into());
        assert_eq!(cache.get("a"), Some(&[1u8][..]));
    }

    #[test]
    fn batch_drops_failed_items() {
        let gateway = MockGateway::new(1, 1).with_broken_image("https://preview.test/1.png");
        let prefetcher = Prefetcher::new(Arc::new(gateway), Config { workers: 3 });
        let loaded = prefetcher.prefetch(&images(4));
        assert_eq!(loaded.len(), 3);
        assert!(!loaded.contains_key("img1"));
        assert_eq!(loaded["img0"], MOCK_IMAGE);
        assert_eq!(prefetcher.in_flight(), 0);
    }

    #[test]
    fn empty_batch_returns_immediately() {
        let prefetcher = Prefetcher::new(Arc::new(MockGateway::new(1, 1)), Config::default());
        assert!(prefetcher.prefetch(&[]).is_empty());
    }

    #[test]
    fn cancelled_token_skips_download() {
        let gateway = Arc::new(MockGateway::new(1, 1));
        let prefetcher = Prefetcher::new(gateway.clone(), Config { workers: 1 });
        let token = prefetcher.register("img0");
        prefetcher.cancel(&["img0".to_string()]);
        assert!(token.is_cancelled());

        let result = prefetcher.inner.fetch(&images(1)[0], &token);
        assert!(result.is_err());
        assert_eq!(gateway.calls().images, 0);
    }

    #[test]
    fn cancelled_token_is_replaced_on_next_request() {
        let prefetcher = Prefetcher::new(Arc::new(MockGateway::new(1, 1)), Config { workers: 1 });
        let old = prefetcher.register("img0");
        prefetcher.cancel(&["img0".to_string()]);

        let fresh = prefetcher.register("img0");
        assert!(!fresh.is_cancelled());
        assert!(!fresh.same(&old));
        assert!(fresh.same(&prefetcher.register("img0")));
    }

    #[test]
    fn start_returns_before_downloads_finish() {
        let gateway = MockGateway::new(1, 1).with_image_delay(Duration::from_millis(200));
        let prefetcher = Prefetcher::new(Arc::new(gateway), Config { workers: 1 });
        let began = Instant::now();
        let batch = prefetcher.start(&images(3));
        assert!(began.elapsed() < Duration::from_millis(200));
        assert_eq!(batch.requested(), ["img0", "img1", "img2"]);
        assert_eq!(prefetcher.in_flight(), 3);

        let loaded = batch.join();
        assert_eq!(loaded.len(), 3);
        assert_eq!(prefetcher.in_flight(), 0);
    }

    #[test]
    fn rejects_non_image_bytes() {
        assert!(detect_format(b"<html>nope</html>").is_err());
        assert_eq!(detect_format(MOCK_IMAGE).unwrap(), ImageFormat::Png);
    }
}
