use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::data::Gateway;
use crate::error::{FeedError, FeedResult};
use crate::pagination;
use crate::prefetch::{self, Batch, Prefetcher};
use crate::session::{usable_token, CredentialProvider};
use crate::store::{Action, Command, FeedEvent, FeedSettings, FeedState};
use crate::vote;

/// The embedding application. Every callback runs on the dispatcher thread,
/// so implementations must return quickly.
pub trait Host: Send {
    fn haptic_pulse(&mut self) {}

    fn on_event(&mut self, _event: &FeedEvent) {}

    /// Called after every applied action with the updated state.
    fn on_state(&mut self, _state: &FeedState) {}
}

#[derive(Debug, Clone)]
pub struct Config {
    pub settings: FeedSettings,
    pub network_workers: usize,
    pub image_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settings: FeedSettings::default(),
            network_workers: 4,
            image_workers: prefetch::Config::default().workers,
        }
    }
}

/// Owns the dispatcher thread, the network worker pool and the image
/// joiner. Image downloads run on the prefetcher's own pool, so they never
/// hold a network worker.
pub struct Runtime {
    actions: Sender<Action>,
    stop: Sender<()>,
    dispatcher: Option<thread::JoinHandle<FeedState>>,
    joiner: Option<thread::JoinHandle<()>>,
    pool: Pool,
}

struct Pool {
    stop: Sender<()>,
    handles: Vec<thread::JoinHandle<()>>,
}

/// Shared by network workers; turns commands into completion actions.
struct Executor {
    gateway: Arc<dyn Gateway>,
    credentials: Arc<dyn CredentialProvider>,
    actions: Sender<Action>,
    page_size: u32,
}

impl Runtime {
    pub fn start<H>(
        cfg: Config,
        gateway: Arc<dyn Gateway>,
        credentials: Arc<dyn CredentialProvider>,
        host: H,
    ) -> Self
    where
        H: Host + 'static,
    {
        let (action_tx, action_rx) = unbounded();
        let (stop_tx, stop_rx) = unbounded();
        let (job_tx, job_rx) = unbounded();
        let (pool_stop_tx, pool_stop_rx) = unbounded();
        let (batch_tx, batch_rx) = unbounded();

        let prefetcher = Prefetcher::new(
            gateway.clone(),
            prefetch::Config {
                workers: cfg.image_workers,
            },
        );

        let joiner_actions = action_tx.clone();
        let joiner = thread::spawn(move || join_batches(batch_rx, joiner_actions));

        let executor = Arc::new(Executor {
            gateway,
            credentials,
            actions: action_tx.clone(),
            page_size: cfg.settings.page_size,
        });

        let workers = if cfg.network_workers == 0 {
            4
        } else {
            cfg.network_workers
        };
        let mut handles = Vec::new();
        for _ in 0..workers {
            let jobs = job_rx.clone();
            let stop = pool_stop_rx.clone();
            let worker = executor.clone();
            handles.push(thread::spawn(move || worker.run(jobs, stop)));
        }

        let dispatcher = Dispatcher {
            state: FeedState::new(cfg.settings),
            host: Box::new(host),
            jobs: job_tx,
            batches: batch_tx,
            prefetcher,
        };
        let dispatcher = thread::spawn(move || dispatcher.run(action_rx, stop_rx));

        tracing::debug!(network_workers = workers, "feed runtime started");
        Self {
            actions: action_tx,
            stop: stop_tx,
            dispatcher: Some(dispatcher),
            joiner: Some(joiner),
            pool: Pool {
                stop: pool_stop_tx,
                handles,
            },
        }
    }

    /// Queues an action. Actions are applied in the order they are sent.
    pub fn dispatch(&self, action: Action) -> Result<()> {
        self.actions
            .send(action)
            .map_err(|_| anyhow!("runtime: dispatcher stopped"))
    }

    /// Handle for sending actions from other threads.
    pub fn sender(&self) -> Sender<Action> {
        self.actions.clone()
    }

    /// Stops the dispatcher and joins every worker. Returns the final state.
    pub fn shutdown(mut self) -> Option<FeedState> {
        self.stop_all()
    }

    fn stop_all(&mut self) -> Option<FeedState> {
        let handle = self.dispatcher.take()?;
        let _ = self.stop.send(());
        let state = handle.join().ok();
        // The dispatcher dropped its batch sender, so the joiner drains and exits.
        if let Some(joiner) = self.joiner.take() {
            let _ = joiner.join();
        }

        for _ in &self.pool.handles {
            let _ = self.pool.stop.send(());
        }
        while let Some(handle) = self.pool.handles.pop() {
            let _ = handle.join();
        }
        tracing::debug!("feed runtime stopped");
        state
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.stop_all();
    }
}

struct Dispatcher {
    state: FeedState,
    host: Box<dyn Host>,
    jobs: Sender<Command>,
    batches: Sender<(u64, Batch)>,
    prefetcher: Prefetcher,
}

impl Dispatcher {
    fn run(mut self, actions: Receiver<Action>, stop: Receiver<()>) -> FeedState {
        loop {
            crossbeam_channel::select! {
                recv(stop) -> _ => break,
                recv(actions) -> msg => {
                    match msg {
                        Ok(action) => self.handle(action),
                        Err(_) => break,
                    }
                }
            }
        }
        self.state
    }

    fn handle(&mut self, action: Action) {
        for command in self.state.apply(action) {
            match command {
                Command::HapticPulse => self.host.haptic_pulse(),
                Command::Notify(event) => self.host.on_event(&event),
                Command::CancelImages { ids } => self.prefetcher.cancel(&ids),
                Command::PrefetchImages { batch, images } => {
                    let pending = self.prefetcher.start(&images);
                    if self.batches.send((batch, pending)).is_err() {
                        tracing::warn!(batch, "image joiner closed; batch dropped");
                    }
                }
                other => {
                    if self.jobs.send(other).is_err() {
                        tracing::warn!("network pool closed; command dropped");
                    }
                }
            }
        }
        self.host.on_state(&self.state);
    }
}

impl Executor {
    fn run(&self, jobs: Receiver<Command>, stop: Receiver<()>) {
        loop {
            crossbeam_channel::select! {
                recv(stop) -> _ => break,
                recv(jobs) -> msg => {
                    match msg {
                        Ok(command) => self.execute(command),
                        Err(_) => break,
                    }
                }
            }
        }
    }

    fn execute(&self, command: Command) {
        let action = match command {
            Command::FetchPage { cursor } => Action::PageLoaded(pagination::load_page(
                self.gateway.as_ref(),
                self.credentials.as_ref(),
                cursor.as_deref(),
                self.page_size,
            )),
            Command::SubmitVote {
                ticket,
                post_id,
                direction,
            } => Action::VoteSettled {
                ticket,
                result: vote::submit(
                    self.gateway.as_ref(),
                    self.credentials.as_ref(),
                    &post_id,
                    direction,
                ),
            },
            Command::FetchComments { post_id } => {
                let result = self.comments(&post_id);
                Action::CommentsLoaded { post_id, result }
            }
            Command::PrefetchImages { .. }
            | Command::CancelImages { .. }
            | Command::HapticPulse
            | Command::Notify(_) => return,
        };
        // The dispatcher may already be gone during shutdown.
        let _ = self.actions.send(action);
    }

    fn comments(&self, post_id: &str) -> FeedResult<Vec<String>> {
        let token = usable_token(self.credentials.as_ref()).ok_or(FeedError::AuthRequired)?;
        self.gateway.fetch_comments(&token, post_id)
    }
}

/// Waits for image batches in submission order and reports each one back
/// to the dispatcher.
fn join_batches(batches: Receiver<(u64, Batch)>, actions: Sender<Action>) {
    for (batch, pending) in batches {
        let requested = pending.requested().to_vec();
        let images = pending.join();
        if actions
            .send(Action::ImagesLoaded {
                batch,
                requested,
                images,
            })
            .is_err()
        {
            break;
        }
    }
}
