//! Attached stream state and credit accounting

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sessiond_protocol::{GraphicsEvent, ModeSnapshot};
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Default depth of a subscriber's delivery queue
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Something queued for one attached stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Data(Arc<[u8]>),
    Kitty(GraphicsEvent),
    Modes(ModeSnapshot),
}

/// Outcome of queueing an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Sent,
    /// Queue full; the subscriber should be dropped
    Full,
    Closed,
}

#[derive(Debug)]
struct Credit {
    balance: i64,
    last_ack: Option<Instant>,
}

/// One attached stream.
///
/// The session pushes events with [`Subscriber::try_send`]; the connection
/// task drains the receiver returned by [`Subscriber::new`] and spends
/// credit before writing data.
#[derive(Debug)]
pub struct Subscriber {
    stream_id: String,
    tx: Mutex<Option<mpsc::Sender<StreamEvent>>>,
    credit: Mutex<Credit>,
    credit_added: Notify,
    done: CancellationToken,
}

impl Subscriber {
    pub fn new(
        stream_id: impl Into<String>,
        initial_credit: i64,
        queue_depth: usize,
    ) -> (Arc<Self>, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let balance = initial_credit.max(0);
        let sub = Arc::new(Self {
            stream_id: stream_id.into(),
            tx: Mutex::new(Some(tx)),
            credit: Mutex::new(Credit {
                balance,
                last_ack: (balance > 0).then(Instant::now),
            }),
            credit_added: Notify::new(),
            done: CancellationToken::new(),
        });
        (sub, rx)
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn is_closed(&self) -> bool {
        self.done.is_cancelled()
    }

    pub fn credit(&self) -> i64 {
        self.credit.lock().balance
    }

    pub fn last_ack(&self) -> Option<Instant> {
        self.credit.lock().last_ack
    }

    /// Queue an event without waiting
    pub fn try_send(&self, event: StreamEvent) -> Enqueue {
        let tx = self.tx.lock();
        let Some(tx) = tx.as_ref() else {
            return Enqueue::Closed;
        };
        match tx.try_send(event) {
            Ok(()) => Enqueue::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => Enqueue::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Enqueue::Closed,
        }
    }

    /// Add credit from a client ack. Non-positive amounts and closed
    /// subscribers are ignored.
    pub fn add_credit(&self, bytes: i64) {
        if bytes <= 0 || self.is_closed() {
            return;
        }
        {
            let mut credit = self.credit.lock();
            credit.balance = credit.balance.saturating_add(bytes);
            credit.last_ack = Some(Instant::now());
        }
        self.credit_added.notify_one();
    }

    /// Wait until `need` bytes of credit are available and debit them.
    ///
    /// Returns false when the subscriber closes or `timeout` passes first.
    /// A zero timeout waits indefinitely.
    pub async fn wait_for_credit(&self, need: i64, timeout: Duration) -> bool {
        if need <= 0 {
            return true;
        }
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        loop {
            let notified = self.credit_added.notified();
            {
                let mut credit = self.credit.lock();
                if self.done.is_cancelled() {
                    return false;
                }
                if credit.balance >= need {
                    credit.balance -= need;
                    return true;
                }
            }
            let expired = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                _ = notified => {}
                _ = self.done.cancelled() => return false,
                _ = expired => return false,
            }
        }
    }

    /// Close the queue (the receiver drains then ends) and wake credit waiters.
    /// Idempotent.
    pub fn close(&self) {
        self.tx.lock().take();
        self.done.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_credit_resumes_after_ack() {
        let (sub, _rx) = Subscriber::new("s", 0, 4);
        let waiter = {
            let sub = sub.clone();
            tokio::spawn(async move { sub.wait_for_credit(10, Duration::from_millis(500)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        sub.add_credit(10);
        assert!(waiter.await.unwrap());
        assert_eq!(sub.credit(), 0);
    }

    #[tokio::test]
    async fn test_wait_for_credit_times_out() {
        let (sub, _rx) = Subscriber::new("s", 0, 4);
        assert!(!sub.wait_for_credit(10, Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_wait_for_credit_debits() {
        let (sub, _rx) = Subscriber::new("s", 20, 4);
        assert!(sub.wait_for_credit(10, Duration::from_millis(50)).await);
        assert_eq!(sub.credit(), 10);
        assert!(sub.wait_for_credit(0, Duration::from_millis(1)).await);
        assert_eq!(sub.credit(), 10);
    }

    #[tokio::test]
    async fn test_close_wakes_waiter() {
        let (sub, _rx) = Subscriber::new("s", 0, 4);
        let waiter = {
            let sub = sub.clone();
            tokio::spawn(async move { sub.wait_for_credit(1, Duration::ZERO).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        sub.close();
        assert!(!waiter.await.unwrap());
    }

    #[test]
    fn test_add_credit_ignores_non_positive_and_closed() {
        let (sub, _rx) = Subscriber::new("s", 0, 4);
        assert!(sub.last_ack().is_none());
        sub.add_credit(0);
        sub.add_credit(-5);
        assert_eq!(sub.credit(), 0);
        assert!(sub.last_ack().is_none());

        sub.add_credit(7);
        assert_eq!(sub.credit(), 7);
        assert!(sub.last_ack().is_some());

        sub.close();
        sub.add_credit(7);
        assert_eq!(sub.credit(), 7);
    }

    #[test]
    fn test_initial_credit_sets_last_ack() {
        let (sub, _rx) = Subscriber::new("s", 100, 4);
        assert!(sub.last_ack().is_some());
    }

    #[tokio::test]
    async fn test_full_queue_and_close() {
        let (sub, mut rx) = Subscriber::new("s", 0, 1);
        let data: Arc<[u8]> = Arc::from(&b"x"[..]);
        assert_eq!(sub.try_send(StreamEvent::Data(data.clone())), Enqueue::Sent);
        assert_eq!(sub.try_send(StreamEvent::Data(data.clone())), Enqueue::Full);

        sub.close();
        sub.close();
        assert!(sub.is_closed());
        assert_eq!(sub.try_send(StreamEvent::Data(data)), Enqueue::Closed);
        assert!(matches!(rx.recv().await, Some(StreamEvent::Data(_))));
        assert!(rx.recv().await.is_none());
    }
}
