use std::{
    collections::HashSet,
    marker::PhantomData,
    sync::{Arc, Mutex},
    thread::{self, ThreadId},
};

use crate::{engine::Engine, lock};

/// Proof that the current thread went through [`ThreadGate::ensure_registered`].
/// Not `Send`, so it cannot leave the thread it was issued on.
pub struct ThreadPermit {
    _thread_bound: PhantomData<*const ()>,
}

/// Registers foreign threads with the engine before they run library code.
pub struct ThreadGate {
    engine: Arc<dyn Engine>,
    registered: Mutex<HashSet<ThreadId>>,
}

impl ThreadGate {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            engine,
            registered: Mutex::new(HashSet::new()),
        }
    }

    /// Registers the current thread once. A failed registration is logged and
    /// retried on the next call; the permit is issued either way.
    pub fn ensure_registered(&self) -> ThreadPermit {
        let current = thread::current();
        let id = current.id();

        let mut registered = lock(&self.registered);
        if !registered.contains(&id) {
            let name = current
                .name()
                .map(str::to_owned)
                .unwrap_or_else(|| format!("{:?}", id));
            match self.engine.register_thread(&name) {
                Ok(()) => {
                    log::debug!("thread {} registered", name);
                    registered.insert(id);
                }
                Err(status) => {
                    log::error!("register thread {} error: {}", name, status);
                }
            }
        }

        ThreadPermit {
            _thread_bound: PhantomData,
        }
    }

    /// Forgets the current thread. For short-lived workers, so the table only
    /// holds threads that are still around.
    pub fn release(&self) {
        lock(&self.registered).remove(&thread::current().id());
    }

    pub fn is_registered(&self) -> bool {
        lock(&self.registered).contains(&thread::current().id())
    }

    pub fn registered_count(&self) -> usize {
        lock(&self.registered).len()
    }
}
