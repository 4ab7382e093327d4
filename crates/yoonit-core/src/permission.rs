//! Camera permission gate.
//!
//! The gate caches the last decided permission state. `has_permission` is a
//! pure read of that cache; only `request_permission` talks to the store,
//! and only an undetermined store ever prompts.

use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    /// Not determined yet: a request will prompt.
    Unknown,
    Granted,
    Denied,
    /// The user is not allowed to grant access (policy, parental control).
    Restricted,
}

impl PermissionState {
    fn to_u8(self) -> u8 {
        match self {
            PermissionState::Unknown => 0,
            PermissionState::Granted => 1,
            PermissionState::Denied => 2,
            PermissionState::Restricted => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => PermissionState::Granted,
            2 => PermissionState::Denied,
            3 => PermissionState::Restricted,
            _ => PermissionState::Unknown,
        }
    }
}

/// A permission request that did not end in `Granted`. This is an expected
/// outcome for callers to branch on.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("camera permission not granted ({0:?})")]
pub struct PermissionError(pub PermissionState);

/// OS-side permission storage.
pub trait PermissionStore: Send + Sync {
    /// Current state, without prompting.
    fn status(&self) -> PermissionState;

    /// Ask the user. Only called while `status()` is `Unknown`.
    fn prompt(&self, explanation: &str) -> impl Future<Output = PermissionState> + Send;
}

/// Read-only view of the gate's cached state, shareable with the engine.
#[derive(Clone, Debug)]
pub struct PermissionView {
    cached: Arc<AtomicU8>,
}

impl PermissionView {
    pub fn state(&self) -> PermissionState {
        PermissionState::from_u8(self.cached.load(Ordering::Acquire))
    }

    pub fn is_granted(&self) -> bool {
        self.state() == PermissionState::Granted
    }

    /// A view that always reports `Granted`, for hosts that negotiate
    /// permission elsewhere.
    pub fn granted() -> Self {
        Self {
            cached: Arc::new(AtomicU8::new(PermissionState::Granted.to_u8())),
        }
    }
}

pub struct PermissionGate<S> {
    store: S,
    cached: Arc<AtomicU8>,
    request_lock: tokio::sync::Mutex<()>,
}

impl<S: PermissionStore> PermissionGate<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            cached: Arc::new(AtomicU8::new(PermissionState::Unknown.to_u8())),
            request_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Resolve the camera permission, prompting only if undetermined.
    ///
    /// Resolves exactly once per call; concurrent calls are serialized so at
    /// most one prompt is shown at a time. There is no retry: callers ask
    /// again explicitly.
    pub async fn request_permission(&self, explanation: &str) -> Result<bool, PermissionError> {
        let _guard = self.request_lock.lock().await;

        let mut state = self.store.status();
        if state == PermissionState::Unknown {
            tracing::info!(explanation, "prompting for camera permission");
            state = self.store.prompt(explanation).await;
        }
        self.cached.store(state.to_u8(), Ordering::Release);
        tracing::info!(?state, "camera permission resolved");

        match state {
            PermissionState::Granted => Ok(true),
            other => Err(PermissionError(other)),
        }
    }

    /// Cached answer of the last request. Never prompts.
    pub fn has_permission(&self) -> bool {
        self.view().is_granted()
    }

    pub fn state(&self) -> PermissionState {
        self.view().state()
    }

    pub fn view(&self) -> PermissionView {
        PermissionView {
            cached: self.cached.clone(),
        }
    }
}

/// In-memory store with a scripted prompt answer.
#[derive(Debug)]
pub struct MemoryPermissionStore {
    state: Mutex<PermissionState>,
    answer: PermissionState,
    prompts: AtomicUsize,
}

impl MemoryPermissionStore {
    /// `initial` is the OS state; `answer` is what a prompt resolves to.
    pub fn new(initial: PermissionState, answer: PermissionState) -> Self {
        Self {
            state: Mutex::new(initial),
            answer,
            prompts: AtomicUsize::new(0),
        }
    }

    /// Change the OS state, as when the user edits camera access in the
    /// system settings. The gate only sees it on its next request.
    pub fn set_status(&self, state: PermissionState) {
        *self.lock() = state;
    }

    /// How many times the user was prompted.
    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PermissionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PermissionStore for MemoryPermissionStore {
    fn status(&self) -> PermissionState {
        *self.lock()
    }

    fn prompt(&self, _explanation: &str) -> impl Future<Output = PermissionState> + Send {
        self.prompts.fetch_add(1, Ordering::Relaxed);
        *self.lock() = self.answer;
        std::future::ready(self.answer)
    }
}

impl<S: PermissionStore> PermissionStore for Arc<S> {
    fn status(&self) -> PermissionState {
        self.as_ref().status()
    }

    fn prompt(&self, explanation: &str) -> impl Future<Output = PermissionState> + Send {
        self.as_ref().prompt(explanation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_revocation_seen_on_next_request() {
        let store = Arc::new(MemoryPermissionStore::new(
            PermissionState::Granted,
            PermissionState::Granted,
        ));
        let gate = PermissionGate::new(store.clone());
        assert!(gate.request_permission("").await.unwrap());

        store.set_status(PermissionState::Restricted);
        assert!(gate.has_permission());

        let err = gate.request_permission("").await.unwrap_err();
        assert_eq!(err, PermissionError(PermissionState::Restricted));
        assert!(!gate.has_permission());
        assert_eq!(store.prompts(), 0);
    }

    #[tokio::test]
    async fn test_denied_rejects_without_prompt() {
        let store = Arc::new(MemoryPermissionStore::new(
            PermissionState::Denied,
            PermissionState::Granted,
        ));
        let gate = PermissionGate::new(store.clone());

        let err = gate.request_permission("").await.unwrap_err();
        assert_eq!(err, PermissionError(PermissionState::Denied));
        assert!(!gate.has_permission());
        assert_eq!(store.prompts(), 0);
    }

    #[tokio::test]
    async fn test_restricted_rejects() {
        let gate = PermissionGate::new(MemoryPermissionStore::new(
            PermissionState::Restricted,
            PermissionState::Granted,
        ));
        assert_eq!(
            gate.request_permission("").await,
            Err(PermissionError(PermissionState::Restricted))
        );
        assert_eq!(gate.state(), PermissionState::Restricted);
    }

    #[tokio::test]
    async fn test_unknown_prompts_once() {
        let store = Arc::new(MemoryPermissionStore::new(
            PermissionState::Unknown,
            PermissionState::Granted,
        ));
        let gate = PermissionGate::new(store.clone());
        assert!(!gate.has_permission());

        assert_eq!(gate.request_permission("to scan faces").await, Ok(true));
        assert_eq!(gate.request_permission("again").await, Ok(true));
        assert!(gate.has_permission());
        assert_eq!(store.prompts(), 1);
    }

    #[tokio::test]
    async fn test_prompt_refused() {
        let gate = PermissionGate::new(MemoryPermissionStore::new(
            PermissionState::Unknown,
            PermissionState::Denied,
        ));
        assert!(gate.request_permission("").await.is_err());
        assert_eq!(gate.state(), PermissionState::Denied);
    }

    #[tokio::test]
    async fn test_concurrent_requests_prompt_once() {
        let store = Arc::new(MemoryPermissionStore::new(
            PermissionState::Unknown,
            PermissionState::Granted,
        ));
        let gate = Arc::new(PermissionGate::new(store.clone()));

        let a = tokio::spawn({
            let gate = gate.clone();
            async move { gate.request_permission("a").await }
        });
        let b = tokio::spawn({
            let gate = gate.clone();
            async move { gate.request_permission("b").await }
        });
        assert_eq!(a.await.unwrap(), Ok(true));
        assert_eq!(b.await.unwrap(), Ok(true));
        assert_eq!(store.prompts(), 1);
    }

    #[test]
    fn test_has_permission_is_cached_read() {
        let store = Arc::new(MemoryPermissionStore::new(
            PermissionState::Granted,
            PermissionState::Granted,
        ));
        let gate = PermissionGate::new(store.clone());
        // OS already granted, but nothing was requested yet.
        assert!(!gate.has_permission());
        assert_eq!(store.prompts(), 0);
        assert!(PermissionView::granted().is_granted());
    }
}
