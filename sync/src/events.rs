//! Listener fan-out on a dedicated thread, so the control loop never blocks
//! on its observers. `on_blocks` is emitted strictly after the store commit
//! of the deepest block in the batch.

use chain::{BlockRef, TransactionRef};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Weak};
use std::thread;

pub struct EventsListenerCallbacks {
    pub on_blocks: Option<Box<dyn Fn(&[BlockRef], bool) + Send + Sync>>,
    pub on_new_transactions: Option<Box<dyn Fn(&[TransactionRef]) + Send + Sync>>,
}

enum Event {
    Blocks(Vec<BlockRef>, bool),
    NewTransactions(Vec<TransactionRef>),
}

type Listeners = RwLock<HashMap<usize, EventsListenerCallbacks>>;

pub struct Events {
    listeners: Arc<Listeners>,
    next_listener_id: AtomicUsize,
    sender: Mutex<Option<Sender<Event>>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Events {
    pub fn new() -> Events {
        let listeners: Arc<Listeners> = Arc::new(RwLock::new(HashMap::new()));
        let (sender, receiver) = channel();

        let thread_listeners = listeners.clone();
        let thread = thread::Builder::new()
            .name("events".to_owned())
            .spawn(move || {
                while let Ok(event) = receiver.recv() {
                    let listeners = thread_listeners.read();
                    match event {
                        Event::Blocks(blocks, did_change_branch) => {
                            for listener in listeners.values() {
                                if let Some(ref on_blocks) = listener.on_blocks {
                                    on_blocks(&blocks, did_change_branch);
                                }
                            }
                        }
                        Event::NewTransactions(transactions) => {
                            for listener in listeners.values() {
                                if let Some(ref on_new_transactions) =
                                    listener.on_new_transactions
                                {
                                    on_new_transactions(&transactions);
                                }
                            }
                        }
                    }
                }
            })
            .expect("spawning events thread");

        Events {
            listeners: listeners,
            next_listener_id: AtomicUsize::new(0),
            sender: Mutex::new(Some(sender)),
            thread: Mutex::new(Some(thread)),
        }
    }

    /// Registers callbacks; they stay registered while the returned guard
    /// lives.
    pub fn register(&self, callbacks: EventsListenerCallbacks) -> EventsListener {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.write().insert(id, callbacks);
        EventsListener {
            id: id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn on_blocks(&self, blocks: Vec<BlockRef>, did_change_branch: bool) {
        if let Some(ref sender) = *self.sender.lock() {
            let _ = sender.send(Event::Blocks(blocks, did_change_branch));
        }
    }

    pub fn on_new_transactions(&self, transactions: Vec<TransactionRef>) {
        if let Some(ref sender) = *self.sender.lock() {
            let _ = sender.send(Event::NewTransactions(transactions));
        }
    }

    pub fn stop(&self) {
        // dropping the sender ends the fan-out thread
        let _ = self.sender.lock().take();
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Events {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Unregisters its callbacks on drop.
pub struct EventsListener {
    id: usize,
    listeners: Weak<Listeners>,
}

impl Drop for EventsListener {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.write().remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Events, EventsListenerCallbacks};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use test_data::ChainBuilder;

    fn wait_until<F: Fn() -> bool>(predicate: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !predicate() {
            assert!(Instant::now() < deadline, "event was not delivered");
            ::std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_events_are_delivered() {
        let events = Events::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_callback = seen.clone();
        let _listener = events.register(EventsListenerCallbacks {
            on_blocks: Some(Box::new(move |blocks, did_change_branch| {
                seen_in_callback
                    .lock()
                    .push((blocks.len(), did_change_branch));
            })),
            on_new_transactions: None,
        });

        let mut builder = ChainBuilder::new();
        let block = builder.genesis();
        events.on_blocks(vec![block], true);

        wait_until(|| !seen.lock().is_empty());
        assert_eq!(&*seen.lock(), &[(1, true)]);
        events.stop();
    }

    #[test]
    fn test_dropped_listener_is_unregistered() {
        let events = Events::new();
        let seen = Arc::new(Mutex::new(0usize));
        let seen_in_callback = seen.clone();
        let listener = events.register(EventsListenerCallbacks {
            on_blocks: None,
            on_new_transactions: Some(Box::new(move |_| {
                *seen_in_callback.lock() += 1;
            })),
        });
        drop(listener);

        let builder = ChainBuilder::new();
        events.on_new_transactions(vec![builder.transfer(2, 1)]);
        events.stop();
        assert_eq!(*seen.lock(), 0);
    }
}
