//! Runs a `FragmentLoader` on its own thread so that multi-threaded hosts
//! still get the single-writer ordering the loader relies on.
//!
//! Transport callbacks are fire-and-forget so a transport may report
//! completion from inside `start_download`, which runs on the service thread.
//! The request/reply calls are not: see [`LoaderHandle`].

use std::sync::mpsc;
use std::thread;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::error::{InterruptReason, LoadFailure, LoaderError};
use crate::loader::{FragmentLoader, LoaderSnapshot};
use crate::numbering::{FragmentNumber, SplitPointId};
use crate::transport::FragmentTransport;

const THREAD_NAME: &str = "splitload-loader";

enum Command {
    Inject(SplitPointId, mpsc::SyncSender<Result<(), LoaderError>>),
    FragmentLoaded(SplitPointId),
    LeftoversLoaded,
    FragmentFailed(FragmentNumber, InterruptReason),
    Reset(mpsc::SyncSender<Vec<SplitPointId>>),
    Snapshot(mpsc::SyncSender<LoaderSnapshot>),
    Shutdown,
}

/// Cloneable sender for commands to a running [`LoaderService`].
///
/// `inject`, `snapshot` and `reset_on_failure` block until the service thread
/// replies, so they must not be called from inside
/// `FragmentTransport::start_download`, which runs on that thread. Doing so
/// returns `LoaderError::CalledFromServiceThread` instead of waiting forever.
/// Only `fragment_has_loaded`, `leftovers_fragment_has_loaded` and
/// `fragment_load_failed` are usable there; they queue the command and return
/// immediately.
#[derive(Clone)]
pub struct LoaderHandle {
    tx: mpsc::Sender<Command>,
    service_thread: thread::ThreadId,
}

impl LoaderHandle {
    fn send(&self, cmd: Command) -> Result<(), LoaderError> {
        self.tx.send(cmd).map_err(|_| LoaderError::ServiceStopped)
    }

    fn request<R>(
        &self,
        make: impl FnOnce(mpsc::SyncSender<R>) -> Command,
    ) -> Result<R, LoaderError> {
        if thread::current().id() == self.service_thread {
            return Err(LoaderError::CalledFromServiceThread);
        }
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.send(make(reply_tx))?;
        reply_rx.recv().map_err(|_| LoaderError::ServiceStopped)
    }

    pub fn inject(&self, sp: SplitPointId) -> Result<(), LoaderError> {
        self.request(|reply| Command::Inject(sp, reply))?
    }

    pub fn snapshot(&self) -> Result<LoaderSnapshot, LoaderError> {
        self.request(Command::Snapshot)
    }

    pub fn reset_on_failure(&self) -> Result<Vec<SplitPointId>, LoaderError> {
        self.request(Command::Reset)
    }

    pub fn fragment_has_loaded(&self, sp: SplitPointId) -> Result<(), LoaderError> {
        self.send(Command::FragmentLoaded(sp))
    }

    pub fn leftovers_fragment_has_loaded(&self) -> Result<(), LoaderError> {
        self.send(Command::LeftoversLoaded)
    }

    pub fn fragment_load_failed(
        &self,
        fragment: FragmentNumber,
        reason: InterruptReason,
    ) -> Result<(), LoaderError> {
        self.send(Command::FragmentFailed(fragment, reason))
    }
}

pub struct LoaderService<T: FragmentTransport> {
    handle: LoaderHandle,
    thread: Option<thread::JoinHandle<FragmentLoader<T>>>,
}

impl<T: FragmentTransport + Send + 'static> LoaderService<T> {
    /// Moves `loader` onto a dedicated thread. Download failures are delivered
    /// on the returned receiver.
    pub fn spawn(loader: FragmentLoader<T>) -> Result<(Self, mpsc::Receiver<LoadFailure>)> {
        let (tx, rx) = mpsc::channel::<Command>();
        let (failure_tx, failure_rx) = mpsc::channel::<LoadFailure>();

        let thread = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || service_loop(loader, rx, failure_tx))
            .context("spawn loader service thread")?;
        info!(thread = THREAD_NAME, "loader service started");

        Ok((
            Self {
                handle: LoaderHandle {
                    tx,
                    service_thread: thread.thread().id(),
                },
                thread: Some(thread),
            },
            failure_rx,
        ))
    }

    pub fn handle(&self) -> LoaderHandle {
        self.handle.clone()
    }

    /// Stops the service thread and hands the loader back.
    pub fn shutdown(mut self) -> Result<FragmentLoader<T>, LoaderError> {
        let _ = self.handle.send(Command::Shutdown);
        let thread = self.thread.take().ok_or(LoaderError::ServiceStopped)?;
        thread.join().map_err(|_| LoaderError::ServiceStopped)
    }
}

impl<T: FragmentTransport> Drop for LoaderService<T> {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.handle.tx.send(Command::Shutdown);
        }
    }
}

fn service_loop<T: FragmentTransport>(
    mut loader: FragmentLoader<T>,
    rx: mpsc::Receiver<Command>,
    failures: mpsc::Sender<LoadFailure>,
) -> FragmentLoader<T> {
    while let Ok(cmd) = rx.recv() {
        match cmd {
            Command::Inject(sp, reply) => {
                let _ = reply.send(loader.inject(sp));
            }
            Command::FragmentLoaded(sp) => {
                if let Err(err) = loader.fragment_has_loaded(sp) {
                    warn!(split_point = %sp, "ignoring completion callback: {err}");
                }
            }
            Command::LeftoversLoaded => loader.leftovers_fragment_has_loaded(),
            Command::FragmentFailed(fragment, reason) => {
                match loader.fragment_load_failed(fragment, reason) {
                    Ok(failure) => {
                        if failures.send(failure).is_err() {
                            debug!(%fragment, "no failure listener");
                        }
                    }
                    Err(err) => warn!(%fragment, "ignoring failure callback: {err}"),
                }
            }
            Command::Reset(reply) => {
                let _ = reply.send(loader.reset_on_failure());
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(loader.snapshot());
            }
            Command::Shutdown => break,
        }
    }
    info!(thread = THREAD_NAME, state = %loader.state(), "loader service stopped");
    loader
}
