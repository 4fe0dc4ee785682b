//! Typed worker pool: one long-lived job instance per worker thread.

use std::collections::{HashMap, VecDeque};
use std::mem;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::signal::block_thread_signals;
use crate::IDLE_TIMEOUT;

/// A unit of processing owned by exactly one worker thread.
///
/// One `Job` value is constructed per worker and lives as long as the
/// worker does, so `set_config` and `process` never race with each other.
/// Reconfiguration through [`WorkerPool::reset_config`] reaches a worker
/// lazily, right before it starts its next task.
pub trait Job: Default + Send + 'static {
    type Config: Clone + Default + Send + 'static;
    type Input: Send + 'static;
    type Output: Send + 'static;

    fn set_config(&mut self, cfg: Self::Config);
    fn process(&mut self, input: Self::Input) -> Self::Output;
}

/// Shared job configuration with a generation counter. Workers compare the
/// generation they last applied against the cell before each task.
struct ConfigCell<C> {
    value: C,
    generation: u64,
}

struct State<J: Job> {
    tasks: VecDeque<J::Input>,
    outputs: VecDeque<J::Output>,
    workers: HashMap<u64, JoinHandle<()>>,
    next_worker_id: u64,
    idle_workers: usize,
    stopping: bool,
}

struct Shared<J: Job> {
    state: Mutex<State<J>>,
    task_ready: Condvar,
    output_ready: Condvar,
    config: Mutex<ConfigCell<J::Config>>,
    max_workers: usize,
}

/// Elastic pool of `min..=max` worker threads draining a FIFO task queue.
///
/// Core workers (the first `min`) live until [`WorkerPool::stop`]; overflow
/// workers are spawned when submissions outpace idle workers and retire on
/// their own after five idle seconds.
pub struct WorkerPool<J: Job> {
    shared: Arc<Shared<J>>,
}

impl<J: Job> WorkerPool<J> {
    /// Spawns `min_workers` core workers immediately. `config` seeds the
    /// shared job configuration; `None` uses the config type's default.
    pub fn new(min_workers: usize, max_workers: usize, config: Option<J::Config>) -> WorkerPool<J> {
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
            config: Mutex::new(ConfigCell {
                value: config.unwrap_or_default(),
                generation: 0,
            }),
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

        WorkerPool { shared }
    }

    /// Enqueues one task. Never blocks on worker availability: when every
    /// worker is busy and the cap is not reached, one overflow worker is
    /// spawned first; otherwise the task just waits its turn.
    ///
    /// After [`WorkerPool::stop`] this is a no-op and the task is dropped.
    pub fn run(&self, input: J::Input) {
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
        state.tasks.push_back(input);
        self.shared.task_ready.notify_one();
    }

    /// Retrieves one result.
    ///
    /// `wait_ms < 0` blocks until a result arrives or the pool stops;
    /// `wait_ms == 0` polls; `wait_ms > 0` waits up to that many
    /// milliseconds. `None` means nothing was ready in time. Results come
    /// back in completion order.
    pub fn get_output(&self, wait_ms: i64) -> Option<J::Output> {
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

    /// Replaces the shared job configuration. Each worker applies the new
    /// value before its next task; tasks already running finish under the
    /// old one.
    pub fn reset_config(&self, cfg: J::Config) {
        let mut cell = self.shared.config.lock().unwrap();
        cell.value = cfg;
        cell.generation += 1;
    }

    /// Stops the pool: wakes everything, joins every worker (in-flight
    /// tasks finish first) and discards queued tasks and results.
    /// Idempotent; after the first call every operation is a no-op.
    ///
    /// Use [`WorkerPool::stop_and_drain`] to keep completed results.
    pub fn stop(&self) {
        self.shutdown();
    }

    /// Like [`WorkerPool::stop`], but returns every result completed before
    /// shutdown finished instead of discarding them.
    pub fn stop_and_drain(&self) -> Vec<J::Output> {
        self.shutdown()
    }

    /// Number of live worker threads. Mostly useful for tests and
    /// monitoring; the value is stale the moment it is returned.
    pub fn worker_count(&self) -> usize {
        self.shared.state.lock().unwrap().workers.len()
    }

    fn shutdown(&self) -> Vec<J::Output> {
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

impl<J: Job> Drop for WorkerPool<J> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_worker<J: Job>(shared: &Arc<Shared<J>>, state: &mut State<J>, keep_in_pool: bool) -> bool {
    let id = state.next_worker_id;
    let worker_shared = Arc::clone(shared);
    let handle = match thread::Builder::new()
        .name(format!("workpool-{}", id))
        .spawn(move || worker_main(worker_shared, id, keep_in_pool))
    {
        Ok(handle) => handle,
        Err(_) => return false,
    };
    state.next_worker_id += 1;
    // Inserted under the same lock the worker needs to make progress, so
    // the worker cannot observe the map without its own entry.
    state.workers.insert(id, handle);
    true
}

fn worker_main<J: Job>(shared: Arc<Shared<J>>, id: u64, keep_in_pool: bool) {
    block_thread_signals();

    let mut job = J::default();
    let mut seen_generation = {
        let cell = shared.config.lock().unwrap();
        job.set_config(cell.value.clone());
        cell.generation
    };

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
                    // A concurrent stop() may own the handle map by now; in
                    // that case just leave and let stop() do the joining.
                    if !state.stopping {
                        state.workers.remove(&id);
                    }
                    return;
                }
            }
            state.idle_workers -= 1;
        }

        let input = state.tasks.pop_front().unwrap();
        drop(state);

        {
            let cell = shared.config.lock().unwrap();
            if cell.generation != seen_generation {
                job.set_config(cell.value.clone());
                seen_generation = cell.generation;
            }
        }
        let output = job.process(input);

        state = shared.state.lock().unwrap();
        state.outputs.push_back(output);
        shared.output_ready.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Scaler {
        factor: u64,
    }

    impl Job for Scaler {
        type Config = u64;
        type Input = u64;
        type Output = u64;

        fn set_config(&mut self, cfg: u64) {
            self.factor = cfg;
        }

        fn process(&mut self, input: u64) -> u64 {
            input * self.factor
        }
    }

    #[test]
    fn single_worker_preserves_submission_order() {
        let pool: WorkerPool<Scaler> = WorkerPool::new(1, 1, Some(2));
        for i in 1..=20u64 {
            pool.run(i);
        }
        for i in 1..=20u64 {
            assert_eq!(pool.get_output(-1), Some(i * 2));
        }
        pool.stop();
    }

    #[test]
    fn config_applies_before_next_task() {
        let pool: WorkerPool<Scaler> = WorkerPool::new(1, 1, Some(1));
        pool.run(7);
        assert_eq!(pool.get_output(-1), Some(7));

        pool.reset_config(10);
        pool.run(7);
        assert_eq!(pool.get_output(-1), Some(70));
        pool.stop();
    }

    #[test]
    fn default_config_is_used_when_none_given() {
        let pool: WorkerPool<Scaler> = WorkerPool::new(1, 1, None);
        pool.run(5);
        // u64::default() is 0.
        assert_eq!(pool.get_output(-1), Some(0));
        pool.stop();
    }
}
