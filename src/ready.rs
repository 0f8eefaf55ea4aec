//! One-shot broadcast readiness signal.
//!
//! [`ready_signal`] returns a writer and a reader. The writer is consumed
//! by [`ReadyFulfiller::fulfill`], so the outcome is written at most once.
//! Any number of readers wait on clones of [`ReadySignal`] and all observe
//! the same terminal value. A writer dropped without fulfilling resolves
//! every waiter with [`ReadinessError::Abandoned`] instead of hanging.

use std::time::Duration;

use tokio::sync::watch;

use crate::error::ReadinessError;

/// Terminal readiness value shared by every waiter.
pub type ReadyOutcome = Result<(), ReadinessError>;

/// Create a linked writer/reader pair for the service `image`.
pub fn ready_signal(image: impl Into<String>) -> (ReadyFulfiller, ReadySignal) {
    let (tx, rx) = watch::channel(None);
    let image = image.into();
    (
        ReadyFulfiller { tx },
        ReadySignal { rx, image },
    )
}

/// Write half. Owned by the single background readiness task.
#[derive(Debug)]
pub struct ReadyFulfiller {
    tx: watch::Sender<Option<ReadyOutcome>>,
}

impl ReadyFulfiller {
    /// Publish the outcome to all current and future waiters.
    pub fn fulfill(self, outcome: ReadyOutcome) {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        });
    }
}

/// Read half.
#[derive(Debug, Clone)]
pub struct ReadySignal {
    rx: watch::Receiver<Option<ReadyOutcome>>,
    image: String,
}

impl ReadySignal {
    /// Block until the outcome is published.
    pub async fn wait(&self) -> ReadyOutcome {
        let mut rx = self.rx.clone();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| {
            Err(ReadinessError::Abandoned {
                image: self.image.clone(),
            })
        })
    }

    /// Like [`wait`](Self::wait), but give up after `timeout`.
    pub async fn wait_within(&self, timeout: Duration) -> ReadyOutcome {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ReadinessError::DeadlineExceeded {
                image: self.image.clone(),
                waited: timeout,
            }),
        }
    }

    /// The outcome if already published, without waiting.
    pub fn peek(&self) -> Option<ReadyOutcome> {
        if let Some(outcome) = (*self.rx.borrow()).clone() {
            return Some(outcome);
        }
        if self.rx.has_changed().is_err() {
            return Some(Err(ReadinessError::Abandoned {
                image: self.image.clone(),
            }));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_all_waiters_observe_success() {
        let (tx, rx) = ready_signal("redis:7");

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let rx = rx.clone();
                tokio::spawn(async move { rx.wait().await })
            })
            .collect();

        assert!(rx.peek().is_none());
        tx.fulfill(Ok(()));

        for w in waiters {
            assert_eq!(w.await.unwrap(), Ok(()));
        }
    }

    #[tokio::test]
    async fn test_repeated_wait_is_idempotent() {
        let (tx, rx) = ready_signal("redis:7");
        let failure = ReadinessError::ProbeExhausted {
            image: "redis:7".to_string(),
            attempts: 3,
            elapsed: Duration::from_secs(1),
            reason: "connection refused".to_string(),
        };
        tx.fulfill(Err(failure.clone()));

        for _ in 0..5 {
            assert_eq!(rx.wait().await, Err(failure.clone()));
        }
        assert_eq!(rx.peek(), Some(Err(failure)));
    }

    #[tokio::test]
    async fn test_dropped_writer_is_abandoned() {
        let (tx, rx) = ready_signal("redis:7");
        let waiter = {
            let rx = rx.clone();
            tokio::spawn(async move { rx.wait().await })
        };
        drop(tx);

        let expected = Err(ReadinessError::Abandoned {
            image: "redis:7".to_string(),
        });
        assert_eq!(waiter.await.unwrap(), expected);
        assert_eq!(rx.peek(), Some(expected));
    }

    #[tokio::test]
    async fn test_wait_within_times_out() {
        let (_tx, rx) = ready_signal("redis:7");
        let outcome = rx.wait_within(Duration::from_millis(20)).await;
        assert!(matches!(
            outcome,
            Err(ReadinessError::DeadlineExceeded { .. })
        ));
    }

    #[test]
    fn test_wait_after_fulfill_does_not_block() {
        let (tx, rx) = ready_signal("redis:7");
        tx.fulfill(Ok(()));
        assert_eq!(tokio_test::block_on(rx.wait()), Ok(()));
    }
}
