use futures::future::BoxFuture;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// One-shot timer that the pool re-arms while dead nodes remain.
///
/// Lives inside the pool state and is only touched under the pool lock.
pub(crate) struct ResurrectionTimer {
    delay: Duration,
    runtime: Option<Handle>,
    armed: bool,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl ResurrectionTimer {
    pub(crate) fn new(delay: Duration) -> Self {
        Self {
            delay,
            runtime: None,
            armed: false,
            generation: 0,
            task: None,
        }
    }

    pub(crate) fn bind(&mut self, runtime: Handle) {
        self.runtime = Some(runtime);
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.armed
    }

    pub(crate) fn delay(&self) -> Duration {
        self.delay
    }

    /// Whether a tick started with `generation` is still the scheduled one
    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.armed && self.generation == generation
    }

    /// Schedules the future built by `tick` to run once after the configured delay.
    ///
    /// `tick` receives the generation of this arming. The previous task is
    /// detached rather than aborted, since re-arming happens from inside the
    /// running tick; a detached tick sees a stale generation and should return.
    pub(crate) fn arm<F>(&mut self, tick: F) -> bool
    where
        F: FnOnce(u64) -> BoxFuture<'static, ()>,
    {
        let Some(runtime) = self.runtime.as_ref() else {
            return false;
        };
        self.generation += 1;
        let tick = tick(self.generation);
        let delay = self.delay;
        self.task = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            tick.await;
        }));
        self.armed = true;
        true
    }

    /// Marks the timer idle from inside the tick that observed no dead nodes.
    pub(crate) fn disarm(&mut self) {
        self.armed = false;
        self.task = None;
    }

    /// Cancels any pending tick. The timer stays reusable.
    pub(crate) fn cancel(&mut self) {
        self.armed = false;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Cancels and forgets the runtime; the timer cannot be armed again.
    pub(crate) fn shutdown(&mut self) {
        self.cancel();
        self.runtime = None;
    }
}
