use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;
use std::thread;

use crossbeam::channel::{unbounded, Receiver, Sender};
use crossbeam::select;
use crossbeam::sync::WaitGroup;
use log::error;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// A unit of work submitted to the pool. The affinity, when present, names
/// the worker that must run the task.
struct Job {
    task: Task,
    affinity: Option<usize>,
}

enum Message {
    Job(Job),
    Stop,
}

/// A fixed pool of worker threads with affinity routing.
///
/// Each worker owns a personal queue and shares the global queue. Dispatch
/// rules:
///
/// - No affinity: the job lands on the global queue and the first free worker
///   claims it.
/// - Affinity in range: whichever worker pulls the job off the global queue
///   forwards it to the target worker's personal queue.
/// - Stop: workers drain their personal queue message and exit.
///
/// A job that panics is caught at the job boundary and reported; the worker
/// keeps running.
pub struct Pool {
    global: Sender<Message>,
    personal: Vec<Sender<Message>>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
    size: usize,
}

impl Pool {
    /// Create a pool with `size` workers.
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "worker pool size must be greater than 0");

        let (global_tx, global_rx) = unbounded::<Message>();

        let mut personal_txs = Vec::with_capacity(size);
        let mut personal_rxs = Vec::with_capacity(size);
        for _ in 0..size {
            let (tx, rx) = unbounded::<Message>();
            personal_txs.push(tx);
            personal_rxs.push(rx);
        }

        let mut handles = Vec::with_capacity(size);
        for (id, personal_rx) in personal_rxs.into_iter().enumerate() {
            let global_rx = global_rx.clone();
            let forwards = personal_txs.clone();
            let handle = thread::Builder::new()
                .name(format!("tempo-worker-{id}"))
                .spawn(move || worker_loop(id, personal_rx, global_rx, forwards))
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }

        Self {
            global: global_tx,
            personal: personal_txs,
            handles: Mutex::new(handles),
            size,
        }
    }

    /// Number of workers in the pool.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Submit a job. `affinity` pins the job to a specific worker; `None`
    /// lets any free worker claim it. Out-of-range affinities are treated as
    /// `None`.
    pub fn submit<F>(&self, f: F, affinity: Option<usize>)
    where
        F: FnOnce() + Send + 'static,
    {
        let job = Job {
            task: Box::new(f),
            affinity,
        };
        // A failed send means the pool is already shut down; the job is
        // dropped, which also releases anything it captured.
        let _ = self.global.send(Message::Job(job));
    }

    /// Create a scope for submitting jobs that borrow non-`'static` data.
    /// All jobs spawned within the scope complete before `scope` returns.
    ///
    /// This is the join barrier the frame pipeline leans on: systems of one
    /// parallel group are spawned into a scope, and the next group cannot
    /// start until the scope closes.
    pub fn scope<'env, F, R>(&'env self, f: F) -> R
    where
        F: FnOnce(&Scope<'env>) -> R,
    {
        let scope = Scope {
            pool: self,
            wait: Some(WaitGroup::new()),
            _env: PhantomData,
        };
        let result = f(&scope);
        drop(scope); // blocks until every spawned job has finished
        result
    }

    /// Stop all workers and join them. Jobs still queued on the global queue
    /// are dropped; personal queues are drained up to the stop message.
    pub fn shutdown(&self) {
        let mut handles = self.handles.lock().unwrap();
        if handles.is_empty() {
            return;
        }
        for tx in &self.personal {
            let _ = tx.send(Message::Stop);
        }
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    id: usize,
    personal: Receiver<Message>,
    global: Receiver<Message>,
    forwards: Vec<Sender<Message>>,
) {
    loop {
        select! {
            recv(personal) -> msg => match msg {
                Ok(Message::Job(job)) => run_job(id, job),
                Ok(Message::Stop) | Err(_) => return,
            },
            recv(global) -> msg => match msg {
                Ok(Message::Job(job)) => {
                    // Jobs with an in-range affinity are routed to the target
                    // worker's personal queue to keep per-worker data on one
                    // thread.
                    match job.affinity {
                        Some(target) if target < forwards.len() && target != id => {
                            let _ = forwards[target].send(Message::Job(job));
                        }
                        _ => run_job(id, job),
                    }
                }
                Ok(Message::Stop) | Err(_) => return,
            },
        }
    }
}

fn run_job(id: usize, job: Job) {
    let result = catch_unwind(AssertUnwindSafe(job.task));
    if let Err(payload) = result {
        error!("worker {id}: job panicked: {}", panic_message(payload.as_ref()));
    }
}

/// Best-effort extraction of a panic payload message.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

/// A scope for submitting borrowed-data jobs with a join barrier.
///
/// Dropping the scope waits for every spawned job to complete, so borrows
/// handed to the jobs stay valid for their whole execution.
pub struct Scope<'env> {
    pool: &'env Pool,
    wait: Option<WaitGroup>,
    _env: PhantomData<std::cell::Cell<&'env ()>>,
}

impl<'env> Scope<'env> {
    /// Spawn a job on any free worker.
    pub fn spawn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'env,
    {
        self.spawn_inner(f, None);
    }

    /// Spawn a job pinned to a specific worker.
    pub fn spawn_at<F>(&self, worker: usize, f: F)
    where
        F: FnOnce() + Send + 'env,
    {
        self.spawn_inner(f, Some(worker));
    }

    fn spawn_inner<F>(&self, f: F, affinity: Option<usize>)
    where
        F: FnOnce() + Send + 'env,
    {
        let wait = self
            .wait
            .as_ref()
            .expect("scope is closing; cannot spawn")
            .clone();
        let task: Box<dyn FnOnce() + Send + 'env> = Box::new(move || {
            f();
            drop(wait);
        });

        // SAFETY: We erase the task's lifetime to store it in the executor.
        // This is sound because:
        // 1. The scope's Drop blocks on the wait group until every spawned
        //    task has run (or been dropped by a failed send), so no task can
        //    outlive 'env.
        // 2. A panicking task still drops its wait-group handle while
        //    unwinding inside the worker's catch boundary.
        let task: Task = unsafe { std::mem::transmute(task) };

        let _ = self.pool.global.send(Message::Job(Job { task, affinity }));
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        if let Some(wait) = self.wait.take() {
            wait.wait();
        }
    }
}
