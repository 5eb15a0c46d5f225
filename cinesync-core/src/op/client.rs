//! One client connection: identity plus a bounded send queue.
//!
//! The transport (WebSocket writer task) owns the receiving half of the
//! queue; the hub enqueues with [`Client::try_send`], which never blocks. A
//! full queue marks the client as a slow consumer and the hub evicts it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::message::Envelope;
use crate::models::{RoomId, User};
use crate::{Error, Result};

const SEND_QUEUE_DEPTH: usize = 128;

pub struct Client {
    conn_id: String,
    user: User,
    room_id: RoomId,
    tx: mpsc::Sender<Envelope>,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
    rtc_joined: AtomicBool,
}

impl Client {
    /// Create a client and hand back the queue's receiving half for the
    /// transport writer.
    #[must_use]
    pub fn new(user: User, room_id: RoomId) -> (Arc<Self>, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(SEND_QUEUE_DEPTH);
        let (closed_tx, closed_rx) = watch::channel(false);
        let client = Arc::new(Self {
            conn_id: nanoid::nanoid!(),
            user,
            room_id,
            tx,
            closed: AtomicBool::new(false),
            closed_tx,
            closed_rx,
            rtc_joined: AtomicBool::new(false),
        });
        (client, rx)
    }

    #[must_use]
    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    #[must_use]
    pub fn user(&self) -> &User {
        &self.user
    }

    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    #[must_use]
    pub fn rtc_joined(&self) -> bool {
        self.rtc_joined.load(Ordering::Acquire)
    }

    pub fn set_rtc_joined(&self, joined: bool) {
        self.rtc_joined.store(joined, Ordering::Release);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Non-blocking enqueue toward the transport writer.
    pub fn try_send(&self, message: Envelope) -> Result<()> {
        if self.is_closed() {
            return Err(Error::AlreadyClosed);
        }
        self.tx.try_send(message).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => Error::SendQueueFull,
            mpsc::error::TrySendError::Closed(_) => Error::AlreadyClosed,
        })
    }

    /// Idempotent close.
    pub fn close(&self) -> Result<()> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::AlreadyClosed);
        }
        let _ = self.closed_tx.send(true);
        Ok(())
    }

    /// Resolve once the client has been closed.
    pub async fn wait_closed(&self) {
        let mut rx = self.closed_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{UserId, UserRole};

    fn client() -> (Arc<Client>, mpsc::Receiver<Envelope>) {
        let user = User::new(UserId::new(), "alice".into(), UserRole::User, "h".into());
        Client::new(user, RoomId::new())
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let (client, mut rx) = client();
        client.try_send(Envelope::ping()).unwrap();
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_full_queue_reports_slow_consumer() {
        let (client, _rx) = client();
        let mut result = Ok(());
        for _ in 0..=SEND_QUEUE_DEPTH {
            result = client.try_send(Envelope::ping());
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(Error::SendQueueFull)));
    }

    #[tokio::test]
    async fn test_close_idempotent() {
        let (client, _rx) = client();
        client.close().unwrap();
        assert!(matches!(client.close(), Err(Error::AlreadyClosed)));
        assert!(matches!(
            client.try_send(Envelope::ping()),
            Err(Error::AlreadyClosed)
        ));
    }

    #[tokio::test]
    async fn test_wait_closed_resolves() {
        let (client, _rx) = client();
        let waiter = {
            let client = client.clone();
            tokio::spawn(async move { client.wait_closed().await })
        };
        client.close().unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_rtc_flag() {
        let (client, _rx) = client();
        assert!(!client.rtc_joined());
        client.set_rtc_joined(true);
        assert!(client.rtc_joined());
    }
}
