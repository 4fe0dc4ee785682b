//! Type-erased task pool: same lifecycle machinery as the typed pool,
//! but the unit of work is an arbitrary closure and results come back as
//! `Box<dyn Any + Send>` for the caller to downcast.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::mem;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::signal::block_thread_signals;
use crate::IDLE_TIMEOUT;

/// Type-erased result of one submitted closure.
pub type TaskOutput = Box<dyn Any + Send>;

type Task = Box<dyn FnOnce() -> TaskOutput + Send>;

struct State {
    tasks: VecDeque<Task>,
    outputs: VecDeque<TaskOutput>,
    workers: HashMap<u64, JoinHandle<()>>,
    next_worker_id: u64,
    idle_workers: usize,
    stopping: bool,
}

struct Shared {
    state: Mutex<State>,
    task_ready: Condvar,
    output_ready: Condvar,
    max_workers: usize,
}

/// Elastic pool running arbitrary closures.
///
/// Submission order into the queue is FIFO; completion order is not, once
/// more than one worker is allowed.
pub struct TaskPool {
    shared: Arc<Shared>,
}

impl TaskPool {
    pub fn new(min_workers: usize, max_workers: usize) -> TaskPool {
        assert!(
            min_workers <= max_workers && max_workers > 0,
            "worker bounds {}..={} are invalid",
            min_workers,
            max_workers
        );

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                tasks: VecDeque::new(),
                outputs: VecDeque::new(),
                workers: HashMap::new(),
                next_worker_id: 0,
                idle_workers: 0,
                stopping: false,
            }),
            task_ready: Condvar::new(),
            output_ready: Condvar::new(),
            max_workers,
        });

        {
            let mut state = shared.state.lock().unwrap();
            for _ in 0..min_workers {
                // Core workers are the construction contract; without them a
                // blocking get_output would never return.
                assert!(
                    spawn_worker(&shared, &mut state, true),
                    "failed to spawn core worker thread"
                );
            }
        }

        TaskPool { shared }
    }

    /// Enqueues one closure; its return value becomes a [`TaskOutput`].
    /// Arguments travel by capture. Never blocks on worker availability;
    /// spawns one overflow worker when submissions outpace idle workers
    /// and the cap allows it. A no-op after [`TaskPool::stop`].
    pub fn run<F, R>(&self, task: F)
    where
        F: FnOnce() -> R + Send + 'static,
        R: Any + Send + 'static,
    {
        let task: Task = Box::new(move || Box::new(task()) as TaskOutput);
        let mut state = self.shared.state.lock().unwrap();
        if state.stopping {
            return;
        }
        if state.idle_workers <= state.tasks.len()
            && state.workers.len() < self.shared.max_workers
        {
            // An overflow worker that fails to spawn is not fatal: the task
            // still queues and the existing workers drain it.
            let _ = spawn_worker(&self.shared, &mut state, false);
        }
        state.tasks.push_back(task);
        self.shared.task_ready.notify_one();
    }

    /// Retrieves one result. Wait semantics match the typed pool:
    /// negative blocks, zero polls, positive waits that many milliseconds.
    pub fn get_output(&self, wait_ms: i64) -> Option<TaskOutput> {
        let mut state = self.shared.state.lock().unwrap();
        if !state.stopping {
            if wait_ms < 0 {
                while state.outputs.is_empty() {
                    state = self.shared.output_ready.wait(state).unwrap();
                    if state.stopping {
                        break;
                    }
                }
            } else if wait_ms > 0 && state.outputs.is_empty() {
                let (guard, _) = self
                    .shared
                    .output_ready
                    .wait_timeout(state, Duration::from_millis(wait_ms as u64))
                    .unwrap();
                state = guard;
            }
        }
        state.outputs.pop_front()
    }

    /// Stops the pool: joins every worker and discards queued tasks and
    /// results. Idempotent.
    pub fn stop(&self) {
        self.shutdown();
    }

    /// Like [`TaskPool::stop`], but returns the results completed before
    /// shutdown finished.
    pub fn stop_and_drain(&self) -> Vec<TaskOutput> {
        self.shutdown()
    }

    /// Number of live worker threads; stale as soon as it is read.
    pub fn worker_count(&self) -> usize {
        self.shared.state.lock().unwrap().workers.len()
    }

    fn shutdown(&self) -> Vec<TaskOutput> {
        let workers = {
            let mut state = self.shared.state.lock().unwrap();
            if state.stopping {
                return Vec::new();
            }
            state.stopping = true;
            state.tasks.clear();
            // idle_workers is left to the workers themselves: each one that
            // wakes from the condvar undoes its own increment before it sees
            // `stopping` and leaves, so the count stays balanced.
            mem::take(&mut state.workers)
        };
        self.shared.task_ready.notify_all();
        self.shared.output_ready.notify_all();
        for (_, handle) in workers {
            let _ = handle.join();
        }
        let mut state = self.shared.state.lock().unwrap();
        state.outputs.drain(..).collect()
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_worker(shared: &Arc<Shared>, state: &mut State, keep_in_pool: bool) -> bool {
    let id = state.next_worker_id;
    let worker_shared = Arc::clone(shared);
    let handle = match thread::Builder::new()
        .name(format!("taskpool-{}", id))
        .spawn(move || worker_main(worker_shared, id, keep_in_pool))
    {
        Ok(handle) => handle,
        Err(_) => return false,
    };
    state.next_worker_id += 1;
    state.workers.insert(id, handle);
    true
}

fn worker_main(shared: Arc<Shared>, id: u64, keep_in_pool: bool) {
    block_thread_signals();

    let mut state = shared.state.lock().unwrap();
    loop {
        while state.tasks.is_empty() {
            if state.stopping {
                return;
            }
            state.idle_workers += 1;
            if keep_in_pool {
                state = shared.task_ready.wait(state).unwrap();
            } else {
                let (guard, timeout) = shared.task_ready.wait_timeout(state, IDLE_TIMEOUT).unwrap();
                state = guard;
                if timeout.timed_out() {
                    state.idle_workers -= 1;
                    if !state.stopping {
                        state.workers.remove(&id);
                    }
                    return;
                }
            }
            state.idle_workers -= 1;
        }

        let task = state.tasks.pop_front().unwrap();
        drop(state);

        let output = task();

        state = shared.state.lock().unwrap();
        state.outputs.push_back(output);
        shared.output_ready.notify_one();
    }
}
