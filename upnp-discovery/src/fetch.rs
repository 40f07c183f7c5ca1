//! Asynchronous description fetching.
//!
//! A fetch is started with a completion callback and returns a
//! [`FetchHandle`] that can interrupt it. The callback runs exactly once, on a
//! fetcher thread, with either the document text or a [`FetchError`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;

use crate::error::{DiscoveryError, Result};

/// Why a fetch produced no document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("fetch interrupted")]
    Interrupted,
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("request failed: {0}")]
    Request(String),
    #[error("fetcher shut down")]
    Closed,
}

/// Outcome delivered to a fetch's completion callback.
pub type FetchResult = std::result::Result<String, FetchError>;

/// Completion callback for one fetch.
pub type FetchCallback = Box<dyn FnOnce(FetchResult) + Send>;

/// Cancellation token for one in-flight fetch.
///
/// Interrupting does not wait for the transport: the completion callback
/// still runs, later, with [`FetchError::Interrupted`].
#[derive(Debug, Default)]
pub struct FetchHandle {
    interrupted: AtomicBool,
}

impl FetchHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}

/// Fetches description documents without blocking the caller.
pub trait XmlFetcher: Send + Sync {
    /// Start fetching `uri`. `on_complete` runs exactly once.
    fn fetch(&self, uri: &str, on_complete: FetchCallback) -> Arc<FetchHandle>;
}

struct Job {
    uri: String,
    handle: Arc<FetchHandle>,
    on_complete: FetchCallback,
}

/// [`XmlFetcher`] backed by a blocking HTTP client and a fixed pool of
/// `xml-fetch` worker threads.
pub struct HttpXmlFetcher {
    jobs: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl HttpXmlFetcher {
    /// Start `workers` fetch threads sharing one HTTP client.
    pub fn new(timeout: Duration, workers: usize) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DiscoveryError::Http(format!("Failed to create HTTP client: {}", e)))?;

        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers.max(1) {
            let client = client.clone();
            let receiver = Arc::clone(&receiver);
            let handle = thread::Builder::new()
                .name(format!("xml-fetch-{}", index))
                .spawn(move || run_worker(client, receiver))
                .map_err(|source| DiscoveryError::ThreadSpawn {
                    name: "xml-fetch",
                    source,
                })?;
            handles.push(handle);
        }

        Ok(Self {
            jobs: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
        })
    }

    /// Stop accepting fetches and wait for the workers to drain the queue.
    pub fn shutdown(&self) {
        self.jobs.lock().take();
        let current = thread::current().id();
        for handle in self.workers.lock().drain(..) {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }
}

impl XmlFetcher for HttpXmlFetcher {
    fn fetch(&self, uri: &str, on_complete: FetchCallback) -> Arc<FetchHandle> {
        let handle = Arc::new(FetchHandle::new());
        let job = Job {
            uri: uri.to_string(),
            handle: Arc::clone(&handle),
            on_complete,
        };

        let rejected = match self.jobs.lock().as_ref() {
            Some(sender) => sender.send(job).err().map(|e| e.0),
            None => Some(job),
        };
        if let Some(job) = rejected {
            (job.on_complete)(Err(FetchError::Closed));
        }
        handle
    }
}

impl Drop for HttpXmlFetcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(client: reqwest::blocking::Client, jobs: Arc<Mutex<Receiver<Job>>>) {
    loop {
        let job = match jobs.lock().recv() {
            Ok(job) => job,
            Err(_) => break,
        };
        let result = if job.handle.is_interrupted() {
            Err(FetchError::Interrupted)
        } else {
            fetch_text(&client, &job.uri)
        };
        let result = match result {
            Ok(_) if job.handle.is_interrupted() => Err(FetchError::Interrupted),
            other => other,
        };
        if let Err(e) = &result {
            tracing::debug!("Fetch of {} failed: {}", job.uri, e);
        }
        (job.on_complete)(result);
    }
}

fn fetch_text(client: &reqwest::blocking::Client, uri: &str) -> FetchResult {
    let response = client
        .get(uri)
        .send()
        .map_err(|e| FetchError::Request(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status(status.as_u16()));
    }
    response
        .text()
        .map_err(|e| FetchError::Request(e.to_string()))
}
