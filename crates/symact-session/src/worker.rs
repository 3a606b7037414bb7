use std::future::Future;
use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};

use futures_util::future::LocalBoxFuture;
use tokio::runtime::Builder;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::LocalSet;
use tracing::{debug, error};

use crate::error::{Result, SessionError};

/// Work sent to the event loop thread. Runs as its own local task.
pub(crate) type Job<T> = Box<dyn FnOnce(Rc<T>) -> LocalBoxFuture<'static, ()> + Send>;

/// Stops the event loop after an unrecoverable failure.
#[derive(Clone)]
pub(crate) struct FatalHandle {
    fatal_exit: bool,
    stop: Rc<Notify>,
}

impl FatalHandle {
    /// Log `reason`, then abort the process or stop the event loop.
    pub(crate) fn trigger(&self, reason: &str) {
        error!(reason, fatal_exit = self.fatal_exit, "session worker failed");
        let _ = std::io::stderr().flush();
        if self.fatal_exit {
            std::process::abort();
        }
        self.stop.notify_one();
    }
}

/// A dedicated thread running a single-threaded runtime and a `LocalSet`.
///
/// The state of type `T` lives on that thread only; other threads reach it
/// by submitting jobs.
pub(crate) struct Worker<T> {
    jobs: Option<mpsc::UnboundedSender<Job<T>>>,
    thread: Option<JoinHandle<()>>,
}

impl<T: 'static> Worker<T> {
    /// Start the thread and run `start` on it to build the state.
    ///
    /// Blocks until `start` finishes and returns its extra output `I`.
    pub(crate) fn spawn<F, Fut, I>(thread_name: String, fatal_exit: bool, start: F) -> Result<(Self, I)>
    where
        F: FnOnce(FatalHandle) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(Rc<T>, I)>> + 'static,
        I: Send + 'static,
    {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (started_tx, started_rx) = std_mpsc::sync_channel(1);

        let thread = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || run(jobs_rx, started_tx, fatal_exit, start))
            .map_err(|err| SessionError::Startup(format!("spawn {thread_name}: {err}")))?;

        let started = started_rx
            .recv()
            .map_err(|_| SessionError::Startup(format!("{thread_name} exited during startup")));
        match started.and_then(|result| result) {
            Ok(info) => {
                debug!(thread = %thread_name, "session worker started");
                Ok((
                    Self {
                        jobs: Some(jobs_tx),
                        thread: Some(thread),
                    },
                    info,
                ))
            }
            Err(err) => {
                drop(jobs_tx);
                let _ = thread.join();
                Err(err)
            }
        }
    }

    /// Run `job` on the event loop and receive its output.
    pub(crate) fn submit<R, F>(&self, job: F) -> Result<oneshot::Receiver<R>>
    where
        F: FnOnce(Rc<T>) -> LocalBoxFuture<'static, R> + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job<T> = Box::new(move |state| {
            Box::pin(async move {
                let _ = tx.send(job(state).await);
            })
        });
        let jobs = self.jobs.as_ref().ok_or(SessionError::WorkerStopped)?;
        jobs.send(job).map_err(|_| SessionError::WorkerStopped)?;
        Ok(rx)
    }
}

impl<T> Worker<T> {
    /// Stop accepting jobs, let the loop wind down and join the thread.
    pub(crate) fn shutdown(&mut self) {
        self.jobs = None;
        if let Some(thread) = self.thread.take() {
            // Joining ourselves would deadlock.
            if thread.thread().id() == thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                error!("session worker thread panicked");
            }
        }
    }
}

impl<T> Drop for Worker<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<T, F, Fut, I>(
    mut jobs: mpsc::UnboundedReceiver<Job<T>>,
    started: std_mpsc::SyncSender<Result<I>>,
    fatal_exit: bool,
    start: F,
) where
    T: 'static,
    F: FnOnce(FatalHandle) -> Fut,
    Fut: Future<Output = Result<(Rc<T>, I)>>,
{
    let runtime = match Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            let _ = started.send(Err(SessionError::Startup(format!("runtime: {err}"))));
            return;
        }
    };
    let local = LocalSet::new();
    let stop = Rc::new(Notify::new());
    let fatal = FatalHandle {
        fatal_exit,
        stop: stop.clone(),
    };

    let state = match local.block_on(&runtime, start(fatal.clone())) {
        Ok((state, info)) => {
            let _ = started.send(Ok(info));
            state
        }
        Err(err) => {
            let _ = started.send(Err(err));
            return;
        }
    };

    let event_loop = catch_unwind(AssertUnwindSafe(|| {
        local.block_on(&runtime, async {
            loop {
                tokio::select! {
                    biased;
                    () = stop.notified() => break,
                    job = jobs.recv() => match job {
                        Some(job) => {
                            tokio::task::spawn_local(job(state.clone()));
                        }
                        None => break,
                    },
                }
            }
        })
    }));
    if event_loop.is_err() {
        fatal.trigger("event loop panicked");
    }

    // Dropping the local set cancels the remaining tasks, which runs their
    // cleanup guards while the state is still alive.
    let _enter = runtime.enter();
    drop(local);
    drop(state);
    debug!("session worker stopped");
}
