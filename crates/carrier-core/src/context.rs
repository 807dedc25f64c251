//! Transaction context: the per-message unit of work.
//!
//! A context is created when a message is received, carries an item bag and
//! four ordered callback lists through the pipeline, and is completed or
//! aborted exactly once before being disposed. Commit callbacks run in
//! registration order; dispose callbacks run in reverse registration order.

use crate::{Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, RwLock};
use std::sync::Arc;
use tracing::warn;

/// Lifecycle state of a [`TransactionContext`].
///
/// Transitions: `Fresh → (Completing → Completed) | Aborted; → Disposed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Created, neither completed nor aborted yet
    Fresh,
    /// Commit callbacks are running
    Completing,
    /// Commit and completed callbacks ran successfully
    Completed,
    /// The unit of work was rolled back
    Aborted,
    /// Dispose callbacks ran; terminal
    Disposed,
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContextState::Fresh => "fresh",
            ContextState::Completing => "completing",
            ContextState::Completed => "completed",
            ContextState::Aborted => "aborted",
            ContextState::Disposed => "disposed",
        };
        write!(f, "{name}")
    }
}

type Callback = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// Scoped bag of items plus ordered callback lists governing the
/// message-processing unit of work.
///
/// Owned by the worker processing the message; steps and handlers reach it
/// through the pipeline context.
pub struct TransactionContext {
    items: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    state: Mutex<ContextState>,
    commit_callbacks: Mutex<Vec<Callback>>,
    completed_callbacks: Mutex<Vec<Callback>>,
    aborted_callbacks: Mutex<Vec<Callback>>,
    disposed_callbacks: Mutex<Vec<Callback>>,
}

impl TransactionContext {
    /// Create a fresh transaction context
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            state: Mutex::new(ContextState::Fresh),
            commit_callbacks: Mutex::new(Vec::new()),
            completed_callbacks: Mutex::new(Vec::new()),
            aborted_callbacks: Mutex::new(Vec::new()),
            disposed_callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ContextState {
        *lock(&self.state)
    }

    /// Store an item in the context bag, replacing any existing value
    pub fn set_item<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        write(&self.items).insert(key.into(), Arc::new(value));
    }

    /// Fetch an item of the given type from the context bag
    pub fn get_item<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        read(&self.items).get(key).cloned()?.downcast::<T>().ok()
    }

    /// Fetch the item under `key`, running `factory` to create it when
    /// absent. The factory runs at most once per key.
    pub fn get_or_add<T, F>(&self, key: &str, factory: F) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let mut items = write(&self.items);
        if let Some(existing) = items.get(key).and_then(|v| v.clone().downcast::<T>().ok()) {
            return existing;
        }
        let value = Arc::new(factory());
        items.insert(key.to_string(), value.clone());
        value
    }

    /// Register a callback to run when the context commits.
    ///
    /// Fails once the context has left the [`ContextState::Fresh`] state.
    pub fn on_commit<F, Fut>(&self, callback: F) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register(
            &self.commit_callbacks,
            callback,
            &[ContextState::Fresh],
            "commit",
        )
    }

    /// Register a callback to run after a successful commit
    pub fn on_completed<F, Fut>(&self, callback: F) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register(
            &self.completed_callbacks,
            callback,
            &[ContextState::Fresh, ContextState::Completing],
            "completed",
        )
    }

    /// Register a callback to run when the context aborts
    pub fn on_aborted<F, Fut>(&self, callback: F) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register(
            &self.aborted_callbacks,
            callback,
            &[ContextState::Fresh, ContextState::Completing],
            "aborted",
        )
    }

    /// Register a callback to run on dispose, regardless of outcome.
    ///
    /// Dispose callbacks run in reverse registration order.
    pub fn on_disposed<F, Fut>(&self, callback: F) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register(
            &self.disposed_callbacks,
            callback,
            &[
                ContextState::Fresh,
                ContextState::Completing,
                ContextState::Completed,
                ContextState::Aborted,
            ],
            "disposed",
        )
    }

    fn register<F, Fut>(
        &self,
        list: &Mutex<Vec<Callback>>,
        callback: F,
        allowed: &[ContextState],
        phase: &str,
    ) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let state = lock(&self.state);
        if !allowed.contains(&*state) {
            return Err(Error::illegal_state(format!(
                "cannot register {phase} callback on a {state} transaction context"
            )));
        }
        lock(list).push(Box::new(move || callback().boxed()));
        Ok(())
    }

    /// Commit the unit of work.
    ///
    /// Runs commit callbacks in registration order, then completed callbacks.
    /// The first commit callback error aborts the context (aborted callbacks
    /// run) and is propagated to the caller.
    pub async fn complete(&self) -> Result<()> {
        {
            let mut state = lock(&self.state);
            if *state != ContextState::Fresh {
                return Err(Error::illegal_state(format!(
                    "cannot complete a {state} transaction context"
                )));
            }
            *state = ContextState::Completing;
        }

        for callback in take(&self.commit_callbacks) {
            if let Err(error) = callback().await {
                *lock(&self.state) = ContextState::Aborted;
                self.run_aborted_callbacks().await;
                return Err(error);
            }
        }

        *lock(&self.state) = ContextState::Completed;

        for callback in take(&self.completed_callbacks) {
            callback().await?;
        }
        Ok(())
    }

    /// Roll back the unit of work, running aborted callbacks
    pub async fn abort(&self) -> Result<()> {
        {
            let mut state = lock(&self.state);
            if *state != ContextState::Fresh {
                return Err(Error::illegal_state(format!(
                    "cannot abort a {state} transaction context"
                )));
            }
            *state = ContextState::Aborted;
        }
        self.run_aborted_callbacks().await;
        Ok(())
    }

    /// Dispose the context, running dispose callbacks in reverse
    /// registration order. Callback errors are logged, never propagated.
    /// Idempotent.
    pub async fn dispose(&self) {
        {
            let mut state = lock(&self.state);
            match *state {
                ContextState::Disposed => return,
                ContextState::Fresh | ContextState::Completing => {
                    warn!(
                        state = %state,
                        "disposing a transaction context that was neither completed nor aborted"
                    );
                }
                ContextState::Completed | ContextState::Aborted => {}
            }
            *state = ContextState::Disposed;
        }

        let mut callbacks = take(&self.disposed_callbacks);
        callbacks.reverse();
        for callback in callbacks {
            if let Err(error) = callback().await {
                warn!(%error, "transaction dispose callback failed");
            }
        }
    }

    async fn run_aborted_callbacks(&self) {
        for callback in take(&self.aborted_callbacks) {
            if let Err(error) = callback().await {
                warn!(%error, "transaction abort callback failed");
            }
        }
    }
}

impl Default for TransactionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionContext")
            .field("state", &self.state())
            .field("items", &read(&self.items).len())
            .finish()
    }
}

// Lock helpers that survive poisoning; a panicked callback must not take
// the whole context down with it.
fn lock<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read<'a, T>(rwlock: &'a RwLock<T>) -> std::sync::RwLockReadGuard<'a, T> {
    rwlock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<'a, T>(rwlock: &'a RwLock<T>) -> std::sync::RwLockWriteGuard<'a, T> {
    rwlock
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn take(list: &Mutex<Vec<Callback>>) -> Vec<Callback> {
    std::mem::take(&mut *lock(list))
}
