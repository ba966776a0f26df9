//! Session offset token.
//!
//! A generation counter shared by the controller, its session handle and
//! every fetch run. A run captures the generation it was started under and
//! stops as soon as the live value moves on.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct SessionToken {
    tx: Arc<watch::Sender<u64>>,
}

impl Default for SessionToken {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionToken {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    /// The live generation.
    pub fn current(&self) -> u64 {
        *self.tx.borrow()
    }

    /// Whether `generation` is still the live one.
    pub fn is_current(&self, generation: u64) -> bool {
        self.current() == generation
    }

    /// Invalidate every run started so far. Returns the new generation.
    pub fn bump(&self) -> u64 {
        let mut next = 0;
        self.tx.send_modify(|generation| {
            *generation += 1;
            next = *generation;
        });
        next
    }

    /// Resolves once the live generation differs from `generation`.
    pub async fn superseded(&self, generation: u64) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|live| *live != generation).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_bump_invalidates() {
        let token = SessionToken::new();
        let own = token.current();
        assert!(token.is_current(own));

        assert_eq!(token.bump(), own + 1);
        assert!(!token.is_current(own));
        assert!(token.is_current(own + 1));
    }

    #[test]
    fn test_clones_share_state() {
        let token = SessionToken::new();
        let handle = token.clone();
        handle.bump();
        assert_eq!(token.current(), 1);
    }

    #[test]
    fn test_superseded_pending_until_bump() {
        let token = SessionToken::new();
        let mut waiter = tokio_test::task::spawn(token.superseded(0));
        tokio_test::assert_pending!(waiter.poll());

        token.bump();
        assert!(waiter.is_woken());
        tokio_test::assert_ready!(waiter.poll());
    }

    #[tokio::test]
    async fn test_superseded_wakes_on_bump() {
        let token = SessionToken::new();
        let own = token.current();

        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.superseded(own).await })
        };
        tokio::task::yield_now().await;
        token.bump();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_superseded_returns_immediately_when_stale() {
        let token = SessionToken::new();
        token.bump();
        tokio::time::timeout(Duration::from_secs(1), token.superseded(0))
            .await
            .unwrap();
    }
}
