use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime, RuntimeFlavor};

const BACKGROUND_WORKERS: usize = 2;

static BACKGROUND_RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    Builder::new_multi_thread()
        .worker_threads(BACKGROUND_WORKERS)
        .thread_name("apigee-net")
        .enable_all()
        .build()
        .expect("failed to build background tokio runtime")
});

/// Handle to the shared runtime that owns every network task issued by the SDK.
///
/// Network work always runs here, independent of whatever runtime (if any) the caller is
/// on, so connection pools never outlive the runtime that created them.
pub fn background_handle() -> Handle {
    BACKGROUND_RUNTIME.handle().clone()
}

/// Spawns an async task on the background runtime without awaiting its result.
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let _ = BACKGROUND_RUNTIME.spawn(future);
}

/// Runs `future` on the background runtime and blocks the calling thread until it resolves.
///
/// Safe to call from plain threads and from inside other tokio runtimes: on a multi-thread
/// runtime the wait happens inside `block_in_place`, elsewhere the thread simply parks.
pub fn block_on_background<F>(future: F) -> F::Output
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let (tx, rx) = async_channel::bounded(1);
    spawn_detached(async move {
        let _ = tx.send(future.await).await;
    });

    let wait = move || {
        rx.recv_blocking()
            .expect("background runtime dropped a blocking task")
    };
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(wait)
        }
        _ => wait(),
    }
}

/// Asynchronously waits for the provided duration.
pub async fn sleep(duration: Duration) {
    if duration.is_zero() {
        return;
    }
    tokio::time::sleep(duration).await;
}
