//! Job dispatch for the solve phases.
//!
//! The world hands fixed chunks of work to a caller-supplied [`Executor`]
//! and blocks on a count-down [`Latch`]. `push` must be non-blocking; it may
//! run the task inline ([`InlineExecutor`]) or ship it to worker threads
//! ([`ThreadPool`]).

use std::hint;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

/// A unit of work. `run` is called exactly once per dispatch.
pub trait Task: Sync {
    fn run(&self, worker: u32);
}

/// Type-erased borrow of a [`Task`], shippable across threads.
#[derive(Copy, Clone)]
pub struct TaskRef {
    ptr: *const (dyn Task + 'static),
}

unsafe impl Send for TaskRef {}
unsafe impl Sync for TaskRef {}

impl TaskRef {
    /// # Safety
    ///
    /// The task must stay alive and unmoved until `run` returns. The world
    /// guarantees this by waiting on a latch before releasing task storage.
    pub unsafe fn new(task: &dyn Task) -> Self {
        Self { ptr: unsafe { core::mem::transmute::<&dyn Task, &'static dyn Task>(task) } }
    }

    #[inline]
    pub fn run(self, worker: u32) {
        unsafe { (*self.ptr).run(worker) }
    }
}

/// Count-down latch. Tasks check in with `count_down`; the driver spins in
/// `wait` until every task has.
pub struct Latch {
    remaining: AtomicU32,
}

impl Latch {
    pub fn new(count: u32) -> Self {
        Self { remaining: AtomicU32::new(count) }
    }

    #[inline]
    pub fn count_down(&self) {
        self.remaining.fetch_sub(1, Ordering::Release);
    }

    #[inline]
    pub fn try_wait(&self) -> bool {
        self.remaining.load(Ordering::Acquire) == 0
    }

    pub fn wait(&self) {
        while !self.try_wait() {
            hint::spin_loop();
        }
    }
}

/// Non-blocking task sink.
pub trait Executor {
    fn push(&self, task: TaskRef);
}

/// Runs every task on the calling thread, inside `push`.
#[derive(Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn push(&self, task: TaskRef) {
        task.run(0);
    }
}

/// Fixed set of worker threads fed over an unbounded channel.
pub struct ThreadPool {
    sender: Option<Sender<TaskRef>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(threads: usize) -> std::io::Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded::<TaskRef>();
        let workers = (0..threads.max(1))
            .map(|worker| {
                let receiver: Receiver<TaskRef> = receiver.clone();
                std::thread::Builder::new()
                    .name(format!("keelphys-worker-{worker}"))
                    .spawn(move || {
                        while let Ok(task) = receiver.recv() {
                            task.run(worker as u32);
                        }
                    })
            })
            .collect::<std::io::Result<Vec<_>>>()?;
        Ok(Self { sender: Some(sender), workers })
    }
}

impl Executor for ThreadPool {
    fn push(&self, task: TaskRef) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(task);
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.sender = None;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountTask {
        hits: AtomicUsize,
        latch: Latch,
    }

    impl Task for CountTask {
        fn run(&self, _worker: u32) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            self.latch.count_down();
        }
    }

    fn dispatch(executor: &dyn Executor, pushes: u32) -> usize {
        let task = CountTask { hits: AtomicUsize::new(0), latch: Latch::new(pushes) };
        for _ in 0..pushes {
            executor.push(unsafe { TaskRef::new(&task) });
        }
        task.latch.wait();
        task.hits.load(Ordering::Relaxed)
    }

    #[test]
    fn inline_executor_runs_in_push() {
        assert_eq!(dispatch(&InlineExecutor, 5), 5);
    }

    #[test]
    fn thread_pool_runs_every_task() {
        let pool = ThreadPool::new(4).unwrap();
        assert_eq!(dispatch(&pool, 64), 64);
    }

    #[test]
    fn latch_counts_to_zero() {
        let latch = Latch::new(2);
        assert!(!latch.try_wait());
        latch.count_down();
        assert!(!latch.try_wait());
        latch.count_down();
        latch.wait();
    }
}
