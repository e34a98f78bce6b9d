use std::thread::{self, JoinHandle, ThreadId};

use async_channel::{Receiver, Sender};
use tokio::runtime::Handle;

/// Unit of work scheduled on an [`ExecutionContext`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Where asynchronous completion handlers are run. The transport decides when a handler
/// fires; the context decides on which thread.
pub trait ExecutionContext: Send + Sync {
    fn execute(&self, job: Job);
}

/// Runs jobs immediately on whichever thread delivers them.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineContext;

impl ExecutionContext for InlineContext {
    fn execute(&self, job: Job) {
        job();
    }
}

/// Runs jobs as tasks on a tokio runtime.
#[derive(Clone, Debug)]
pub struct RuntimeContext {
    handle: Handle,
}

impl RuntimeContext {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Context bound to the runtime the caller is currently running on.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl ExecutionContext for RuntimeContext {
    fn execute(&self, job: Job) {
        self.handle.spawn(async move { job() });
    }
}

/// A dedicated thread that runs jobs one at a time in submission order.
///
/// The worker exits once the queue is dropped and all submitted jobs have run.
pub struct SerialQueue {
    name: String,
    sender: Sender<Job>,
    thread_id: ThreadId,
    worker: Option<JoinHandle<()>>,
}

impl SerialQueue {
    pub fn new(name: impl Into<String>) -> std::io::Result<Self> {
        let name = name.into();
        let (sender, receiver) = async_channel::unbounded();
        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_queue(receiver))?;
        Ok(Self {
            name,
            sender,
            thread_id: worker.thread().id(),
            worker: Some(worker),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier of the worker thread every job runs on.
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }
}

fn run_queue(receiver: Receiver<Job>) {
    while let Ok(job) = receiver.recv_blocking() {
        job();
    }
}

impl ExecutionContext for SerialQueue {
    fn execute(&self, job: Job) {
        if self.sender.try_send(job).is_err() {
            log::warn!("serial queue `{}` is closed; dropping job", self.name);
        }
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        self.sender.close();
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}
