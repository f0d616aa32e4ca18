// src/utils/streams.rs
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use futures::future::join_all;
use log::{debug, error, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use crate::config::defs::PipelineError;


/// Lifecycle of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Producing,
    /// The source ran dry; workers are finishing their last items.
    Completing,
    /// The source failed; workers stop pulling.
    Aborting,
    /// The consumer has seen the end of the queue.
    Drained,
    Joined,
}

#[derive(Debug, Default)]
struct RunFlags {
    exhausted: AtomicBool,
    aborted: AtomicBool,
}

/// Shared cursor and bookkeeping handed to every worker.
struct WorkerShared<S> {
    source: Mutex<S>,
    flags: Arc<RunFlags>,
    source_error: Mutex<Option<PipelineError>>,
}

/// What a worker drew from the shared cursor.
enum Pulled<I> {
    Item(I),
    Done,
}

impl<S, I> WorkerShared<S>
where
    S: Iterator<Item = Result<I, PipelineError>>,
{
    /// The abort flag is re-read and set under the source lock, so no worker
    /// can draw an item from behind a source error.
    fn pull(&self) -> Pulled<I> {
        if self.flags.aborted.load(Ordering::Acquire) {
            return Pulled::Done;
        }
        let mut source = match self.source.lock() {
            Ok(source) => source,
            Err(_) => {
                self.abort(PipelineError::WorkerFailed("read source lock poisoned".to_string()));
                return Pulled::Done;
            }
        };
        if self.flags.aborted.load(Ordering::Acquire) {
            return Pulled::Done;
        }
        match source.next() {
            Some(Ok(item)) => Pulled::Item(item),
            Some(Err(e)) => {
                self.abort(e);
                Pulled::Done
            }
            None => {
                self.flags.exhausted.store(true, Ordering::Release);
                Pulled::Done
            }
        }
    }

    /// Keeps the first source error; later ones are only logged.
    fn abort(&self, e: PipelineError) {
        self.flags.aborted.store(true, Ordering::Release);
        match self.source_error.lock() {
            Ok(mut slot) if slot.is_none() => {
                error!("Read source failed, stopping production: {}", e);
                *slot = Some(e);
            }
            _ => debug!("Additional read source error ignored: {}", e),
        }
    }

    fn take_error(&self) -> Option<PipelineError> {
        self.source_error.lock().ok().and_then(|mut slot| slot.take())
    }
}


/// Handle on a running read pipeline.
///
/// Records are pulled with `next()` until it returns `None`; only then should
/// `join()` be awaited, which surfaces any read source failure.
pub struct ReadPipeline<O> {
    rx: mpsc::Receiver<O>,
    done: JoinHandle<Result<(), PipelineError>>,
    flags: Arc<RunFlags>,
    state: RunState,
}

impl<O: Send + 'static> ReadPipeline<O> {
    pub async fn next(&mut self) -> Option<O> {
        let item = self.rx.recv().await;
        if item.is_none() && self.state != RunState::Drained {
            debug!("Pipeline queue drained");
            self.state = RunState::Drained;
        }
        item
    }

    pub fn state(&self) -> RunState {
        match self.state {
            RunState::Producing if self.flags.aborted.load(Ordering::Acquire) => RunState::Aborting,
            RunState::Producing if self.flags.exhausted.load(Ordering::Acquire) => RunState::Completing,
            state => state,
        }
    }

    /// Waits for every worker. Any record still queued is discarded, so callers
    /// drain with `next()` first.
    pub async fn join(&mut self) -> Result<(), PipelineError> {
        if self.state == RunState::Joined {
            return Err(PipelineError::InvalidConfig("pipeline already joined".to_string()));
        }
        self.rx.close();
        let result = (&mut self.done)
            .await
            .map_err(|e| PipelineError::WorkerFailed(e.to_string()));
        self.state = RunState::Joined;
        debug!("Pipeline joined");
        result?
    }

    /// Splits the handle into a record stream and the completion task.
    pub fn into_stream(self) -> (ReceiverStream<O>, JoinHandle<Result<(), PipelineError>>) {
        (ReceiverStream::new(self.rx), self.done)
    }
}


/// Runs `process` over `source` on a pool of `workers` blocking tasks.
///
/// Workers pull from a single shared cursor, so the source is never read
/// concurrently. Processing runs in parallel and results go through a bounded
/// queue of `capacity`; producers block while it is full.
///
/// A `process` error (or panic) drops that item after logging it and calling
/// `on_failure`. A source error stops all further pulling. Items already pulled are
/// still delivered, and the error is returned from `ReadPipeline::join`.
///
/// # Arguments
///
/// * `source` - Lazy, single-pass item source.
/// * `workers` - Number of concurrent workers (minimum 1).
/// * `capacity` - Queue bound between workers and the consumer (minimum 1).
/// * `process` - Per-item work.
/// * `on_failure` - Called once per dropped item.
///
/// # Returns
/// ReadPipeline handle. Must be called from within a tokio runtime.
pub fn spawn_read_workers<S, I, O, F, E>(
    source: S,
    workers: usize,
    capacity: usize,
    process: F,
    on_failure: E,
) -> ReadPipeline<O>
where
    S: Iterator<Item = Result<I, PipelineError>> + Send + 'static,
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Result<O, PipelineError> + Send + Sync + 'static,
    E: Fn(&PipelineError) + Send + Sync + 'static,
{
    let workers = workers.max(1);
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let flags = Arc::new(RunFlags::default());
    let shared = Arc::new(WorkerShared {
        source: Mutex::new(source),
        flags: flags.clone(),
        source_error: Mutex::new(None),
    });
    let process = Arc::new(process);
    let on_failure = Arc::new(on_failure);

    debug!("Starting {} read workers, queue capacity {}", workers, capacity);
    let mut handles = Vec::with_capacity(workers);
    for worker_id in 0..workers {
        let tx = tx.clone();
        let shared = shared.clone();
        let process = process.clone();
        let on_failure = on_failure.clone();

        handles.push(tokio::task::spawn_blocking(move || {
            let mut produced = 0u64;
            while let Pulled::Item(item) = shared.pull() {
                let outcome = catch_panic(|| (*process)(item)).unwrap_or_else(|msg| Err(PipelineError::WorkerFailed(msg)));
                match outcome {
                    Ok(record) => {
                        if tx.blocking_send(record).is_err() {
                            warn!("Worker {}: consumer went away, stopping", worker_id);
                            break;
                        }
                        produced += 1;
                    }
                    Err(e) => {
                        warn!("{}", e);
                        (*on_failure)(&e);
                    }
                }
            }
            debug!("Worker {} finished after {} records", worker_id, produced);
        }));
    }
    // Only the workers hold senders now; the queue closes when the last one exits.
    drop(tx);

    let join_shared = shared.clone();
    let done = tokio::spawn(async move {
        let mut failures = Vec::new();
        for result in join_all(handles).await {
            if let Err(e) = result {
                failures.push(e.to_string());
            }
        }
        if let Some(e) = join_shared.take_error() {
            return Err(e);
        }
        if !failures.is_empty() {
            return Err(PipelineError::WorkerFailed(failures.join("; ")));
        }
        Ok(())
    });

    ReadPipeline {
        rx,
        done,
        flags,
        state: RunState::Producing,
    }
}

thread_local! {
    static CATCHING_PANIC: Cell<bool> = const { Cell::new(false) };
}

/// Runs `f`, turning a panic into its message.
///
/// While `f` runs, the hook from `install_panic_hook` logs panics at debug
/// level instead of printing them.
pub fn catch_panic<T>(f: impl FnOnce() -> T) -> Result<T, String> {
    let outer = CATCHING_PANIC.with(|flag| flag.replace(true));
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    CATCHING_PANIC.with(|flag| flag.set(outer));
    result.map_err(|payload| panic_message(&payload))
}

/// Routes panics raised inside `catch_panic` to the debug log. Any other panic
/// goes to the previously installed hook.
pub fn install_panic_hook() {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        if CATCHING_PANIC.with(Cell::get) {
            debug!("Caught {}", info);
        } else {
            previous(info);
        }
    }));
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic with unknown payload".to_string()
    }
}
