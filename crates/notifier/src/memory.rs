//! In-memory provider that records sends. Used by tests and by the
//! end-to-end checks of the worker.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{EmailProvider, OutboundEmail, ProviderError};

#[derive(Debug, Clone)]
enum Scripted {
    Transient(String),
    Permanent(String),
}

#[derive(Debug, Default)]
struct State {
    sent: Vec<OutboundEmail>,
    attempts: usize,
    script: VecDeque<Scripted>,
}

/// Records every successful send; failures can be scripted ahead of time.
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    state: Arc<Mutex<State>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` sends fail with a transient error.
    pub async fn fail_next(&self, times: usize, message: impl Into<String>) {
        let message = message.into();
        let mut state = self.state.lock().await;
        for _ in 0..times {
            state.script.push_back(Scripted::Transient(message.clone()));
        }
    }

    /// Make the next send fail with a permanent rejection.
    pub async fn reject_next(&self, message: impl Into<String>) {
        self.state
            .lock()
            .await
            .script
            .push_back(Scripted::Permanent(message.into()));
    }

    /// All successfully sent emails, in order.
    pub async fn sent(&self) -> Vec<OutboundEmail> {
        self.state.lock().await.sent.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.state.lock().await.sent.len()
    }

    /// Number of `send` calls, successful or not.
    pub async fn attempts(&self) -> usize {
        self.state.lock().await.attempts
    }

    pub async fn was_sent_to(&self, email: &str) -> bool {
        self.state.lock().await.sent.iter().any(|e| e.to == email)
    }
}

#[async_trait]
impl EmailProvider for MemoryProvider {
    async fn send(&self, email: &OutboundEmail) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;
        state.attempts += 1;
        match state.script.pop_front() {
            Some(Scripted::Transient(msg)) => Err(ProviderError::Transient(msg)),
            Some(Scripted::Permanent(msg)) => Err(ProviderError::Permanent(msg)),
            None => {
                state.sent.push(email.clone());
                Ok(())
            }
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email() -> OutboundEmail {
        OutboundEmail::new("test@example.com", "Subject", "<p>body</p>")
    }

    #[tokio::test]
    async fn test_records_sends() {
        let provider = MemoryProvider::new();
        provider.send(&email()).await.unwrap();
        assert_eq!(provider.sent_count().await, 1);
        assert!(provider.was_sent_to("test@example.com").await);
    }

    #[tokio::test]
    async fn test_scripted_failures_then_success() {
        let provider = MemoryProvider::new();
        provider.fail_next(2, "connection reset").await;

        assert!(matches!(provider.send(&email()).await, Err(ProviderError::Transient(_))));
        assert!(matches!(provider.send(&email()).await, Err(ProviderError::Transient(_))));
        assert!(provider.send(&email()).await.is_ok());

        assert_eq!(provider.attempts().await, 3);
        assert_eq!(provider.sent_count().await, 1);
    }

    #[tokio::test]
    async fn test_rejection_is_permanent() {
        let provider = MemoryProvider::new();
        provider.reject_next("invalid recipient").await;
        let err = provider.send(&email()).await.unwrap_err();
        assert!(err.is_permanent());
        assert_eq!(provider.sent_count().await, 0);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let provider = MemoryProvider::new();
        let handle = provider.clone();
        provider.send(&email()).await.unwrap();
        assert_eq!(handle.sent_count().await, 1);
    }
}
