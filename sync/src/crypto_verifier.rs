//! Signature verification worker pool. Verification is pure (no store
//! access) and never calls back on the submitting thread.

use chain::TransactionRef;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;

/// Completion callback. `None` means the pool was stopped before the task
/// ran.
pub type VerifyCallback = Box<dyn FnOnce(Option<bool>) + Send>;

struct Task {
    transaction: TransactionRef,
    callback: VerifyCallback,
}

#[derive(Default)]
struct QueueState {
    tasks: VecDeque<Task>,
    stopped: bool,
}

#[derive(Default)]
struct Queue {
    state: Mutex<QueueState>,
    available: Condvar,
}

pub struct CryptoVerifier {
    queue: Arc<Queue>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl CryptoVerifier {
    pub fn new(threads: usize) -> CryptoVerifier {
        assert!(threads > 0);
        let queue = Arc::new(Queue::default());

        let mut handles = Vec::with_capacity(threads);
        for index in 0..threads {
            let queue = queue.clone();
            let handle = thread::Builder::new()
                .name(format!("verifier-{}", index))
                .spawn(move || CryptoVerifier::work(queue))
                .expect("spawning verifier thread");
            handles.push(handle);
        }

        CryptoVerifier {
            queue: queue,
            threads: Mutex::new(handles),
        }
    }

    fn work(queue: Arc<Queue>) {
        loop {
            let task = {
                let mut state = queue.state.lock();
                loop {
                    if let Some(task) = state.tasks.pop_front() {
                        break task;
                    }
                    if state.stopped {
                        return;
                    }
                    queue.available.wait(&mut state);
                }
            };

            let result = task.transaction.validate_signatures();
            (task.callback)(Some(result));
        }
    }

    /// Submits one transaction; the callback runs on a pool thread.
    pub fn verify_async(&self, transaction: TransactionRef, callback: VerifyCallback) {
        let mut state = self.queue.state.lock();
        if state.stopped {
            drop(state);
            callback(None);
            return;
        }
        state.tasks.push_back(Task {
            transaction: transaction,
            callback: callback,
        });
        self.queue.available.notify_one();
    }

    /// Submits all transactions and blocks until every result arrived.
    /// Index-aligned with the input; a stopped pool yields `false`.
    pub fn verify_batch(&self, transactions: &[TransactionRef]) -> Vec<bool> {
        if transactions.is_empty() {
            return Vec::new();
        }

        struct BatchState {
            results: Mutex<(Vec<bool>, usize)>,
            done: Condvar,
        }

        let batch = Arc::new(BatchState {
            results: Mutex::new((vec![false; transactions.len()], 0)),
            done: Condvar::new(),
        });

        for (index, transaction) in transactions.iter().enumerate() {
            let batch = batch.clone();
            self.verify_async(
                transaction.clone(),
                Box::new(move |result| {
                    let mut results = batch.results.lock();
                    results.0[index] = result.unwrap_or(false);
                    results.1 += 1;
                    batch.done.notify_one();
                }),
            );
        }

        let mut results = batch.results.lock();
        while results.1 < transactions.len() {
            batch.done.wait(&mut results);
        }
        results.0.clone()
    }

    /// Drains outstanding tasks (their callbacks observe `None`) and joins
    /// the workers.
    pub fn stop(&self) {
        let drained = {
            let mut state = self.queue.state.lock();
            state.stopped = true;
            self.queue.available.notify_all();
            ::std::mem::replace(&mut state.tasks, VecDeque::new())
        };
        for task in drained {
            (task.callback)(None);
        }

        let mut threads = self.threads.lock();
        for thread in threads.drain(..) {
            let _ = thread.join();
        }
    }
}

impl Drop for CryptoVerifier {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::CryptoVerifier;
    use parking_lot::Mutex;
    use std::sync::mpsc;
    use std::sync::Arc;
    use test_data::ChainBuilder;

    #[test]
    fn test_verify_batch() {
        let verifier = CryptoVerifier::new(2);
        let builder = ChainBuilder::new();
        let transactions: Vec<_> = (0..8).map(|i| builder.transfer(2, i)).collect();

        let results = verifier.verify_batch(&transactions);
        assert_eq!(results, vec![true; 8]);
        verifier.stop();
    }

    #[test]
    fn test_verify_async_runs_off_thread() {
        let verifier = CryptoVerifier::new(1);
        let builder = ChainBuilder::new();
        let transaction = builder.transfer(2, 1);

        let (tx, rx) = mpsc::channel();
        let submitting_thread = ::std::thread::current().id();
        verifier.verify_async(
            transaction,
            Box::new(move |result| {
                let _ = tx.send((result, ::std::thread::current().id()));
            }),
        );

        let (result, thread_id) = rx.recv().unwrap();
        assert_eq!(result, Some(true));
        assert_ne!(thread_id, submitting_thread);
        verifier.stop();
    }

    #[test]
    fn test_stop_times_out_outstanding_tasks() {
        let verifier = CryptoVerifier::new(1);
        verifier.stop();

        let builder = ChainBuilder::new();
        let results = Arc::new(Mutex::new(Vec::new()));
        let results_in_callback = results.clone();
        verifier.verify_async(
            builder.transfer(2, 1),
            Box::new(move |result| {
                results_in_callback.lock().push(result);
            }),
        );
        assert_eq!(&*results.lock(), &[None]);
    }
}
