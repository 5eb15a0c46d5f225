//! Per-room client registry and broadcast dispatcher.
//!
//! Broadcasts flow through a bounded channel drained by the serve loop; the
//! loop hands each message to every registered client with a non-blocking
//! enqueue. A client whose send queue is full (or already closed) is evicted
//! on the spot so one slow consumer never stalls the room.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tracing::debug;

use super::client::Client;
use crate::message::Envelope;
use crate::models::{RoomId, UserId};
use crate::{Error, Result};

const BROADCAST_DEPTH: usize = 128;
const PING_INTERVAL: Duration = Duration::from_secs(5);

/// Per-broadcast filter.
#[derive(Debug, Clone, Default)]
pub struct BroadcastOpts {
    pub ignore_users: Vec<UserId>,
    pub ignore_conns: Vec<String>,
    /// Deliver only to connections that joined the realtime (RTC) group.
    pub rtc_joined_only: bool,
}

impl BroadcastOpts {
    #[must_use]
    pub fn ignore_conn(conn_id: &str) -> Self {
        Self {
            ignore_conns: vec![conn_id.to_string()],
            ..Default::default()
        }
    }

    #[must_use]
    pub fn ignore_user(user_id: &UserId) -> Self {
        Self {
            ignore_users: vec![user_id.clone()],
            ..Default::default()
        }
    }
}

struct BroadcastMessage {
    message: Envelope,
    opts: BroadcastOpts,
}

type Bucket = Arc<RwLock<HashMap<String, Arc<Client>>>>;

pub struct Hub {
    room_id: RoomId,
    this: Weak<Hub>,
    tx: mpsc::Sender<BroadcastMessage>,
    rx: Mutex<Option<mpsc::Receiver<BroadcastMessage>>>,
    exit_tx: watch::Sender<bool>,
    exit_rx: watch::Receiver<bool>,
    clients: DashMap<UserId, Bucket>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl Hub {
    #[must_use]
    pub fn new(room_id: RoomId) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(BROADCAST_DEPTH);
        let (exit_tx, exit_rx) = watch::channel(false);
        Arc::new_cyclic(|this| Self {
            room_id,
            this: this.clone(),
            tx,
            rx: Mutex::new(Some(rx)),
            exit_tx,
            exit_rx,
            clients: DashMap::new(),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of distinct users with at least one live connection.
    #[must_use]
    pub fn client_num(&self) -> i64 {
        self.clients.len() as i64
    }

    #[must_use]
    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.clients
            .get(user_id)
            .is_some_and(|bucket| !bucket.read().is_empty())
    }

    fn ensure_started(&self) {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let Some(hub) = self.this.upgrade() else {
            return;
        };
        let serve_hub = hub.clone();
        tokio::spawn(async move {
            let rx = serve_hub.rx.lock().await.take();
            if let Some(rx) = rx {
                serve_hub.serve(rx).await;
            }
        });
        tokio::spawn(async move { hub.ping().await });
    }

    async fn serve(&self, mut rx: mpsc::Receiver<BroadcastMessage>) {
        let mut exit = self.exit_rx.clone();
        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(broadcast) => self.dispatch(&broadcast),
                    None => break,
                },
                _ = exit.changed() => break,
            }
        }
        debug!(room_id = %self.room_id, "hub serve loop stopped");
    }

    /// Fan one message out to every matching client.
    fn dispatch(&self, broadcast: &BroadcastMessage) {
        let mut evicted: Vec<Arc<Client>> = Vec::new();
        for bucket in self.clients.iter() {
            if broadcast.opts.ignore_users.contains(bucket.key()) {
                continue;
            }
            let bucket = bucket.value().read();
            for client in bucket.values() {
                if broadcast
                    .opts
                    .ignore_conns
                    .iter()
                    .any(|conn| conn == client.conn_id())
                {
                    continue;
                }
                if broadcast.opts.rtc_joined_only && !client.rtc_joined() {
                    continue;
                }
                if client.try_send(broadcast.message.clone()).is_err() {
                    evicted.push(client.clone());
                }
            }
        }
        for client in evicted {
            debug!(
                room_id = %self.room_id,
                conn_id = %client.conn_id(),
                "evicting slow or closed client"
            );
            let _ = client.close();
            let _ = self.unregister(&client);
        }
    }

    /// Every 5 s: viewer-count broadcast when the count changed, keepalive
    /// ping otherwise. The pre/current pair is local to this task; a missed
    /// transition under churn is acceptable.
    async fn ping(&self) {
        let mut ticker = tokio::time::interval(PING_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut exit = self.exit_rx.clone();
        let mut pre: i64 = 0;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let current = self.client_num();
                    let message = if current == pre {
                        Envelope::ping()
                    } else {
                        Envelope::viewer_count(current)
                    };
                    if self.broadcast(message, BroadcastOpts::default()).await.is_ok() {
                        pre = current;
                    }
                }
                _ = exit.changed() => break,
            }
        }
    }

    pub async fn broadcast(&self, message: Envelope, opts: BroadcastOpts) -> Result<()> {
        if self.is_closed() {
            return Err(Error::AlreadyClosed);
        }
        self.ensure_started();
        let mut exit = self.exit_rx.clone();
        tokio::select! {
            sent = self.tx.send(BroadcastMessage { message, opts }) => {
                sent.map_err(|_| Error::AlreadyClosed)
            }
            _ = exit.changed() => Err(Error::AlreadyClosed),
        }
    }

    /// Register a client under (user, connection). Duplicate connection IDs
    /// are rejected.
    pub fn register(&self, client: &Arc<Client>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::AlreadyClosed);
        }
        self.ensure_started();
        let user_id = client.user().id.clone();
        loop {
            let bucket = self
                .clients
                .entry(user_id.clone())
                .or_default()
                .clone();
            let mut guard = bucket.write();
            // The bucket may have been compare-deleted between the map probe
            // and taking its lock; retry against the fresh one.
            let resident = self
                .clients
                .get(&user_id)
                .map(|current| Arc::ptr_eq(current.value(), &bucket))
                .unwrap_or(false);
            if !resident {
                continue;
            }
            if guard.contains_key(client.conn_id()) {
                return Err(Error::AlreadyExists(format!(
                    "connection {}",
                    client.conn_id()
                )));
            }
            guard.insert(client.conn_id().to_string(), client.clone());
            return Ok(());
        }
    }

    pub fn unregister(&self, client: &Arc<Client>) -> Result<()> {
        let user_id = &client.user().id;
        let Some(bucket) = self.clients.get(user_id).map(|b| b.value().clone()) else {
            return Err(Error::NotFound("client".to_string()));
        };
        let mut guard = bucket.write();
        if guard.remove(client.conn_id()).is_none() {
            return Err(Error::NotFound("client".to_string()));
        }
        if guard.is_empty() {
            drop(guard);
            self.clients
                .remove_if(user_id, |_, current| Arc::ptr_eq(current, &bucket));
        }
        Ok(())
    }

    /// Send to every connection of one user; failed connections are closed.
    pub fn send_to_user(&self, user_id: &UserId, message: &Envelope) -> Result<()> {
        if self.is_closed() {
            return Err(Error::AlreadyClosed);
        }
        let Some(bucket) = self.clients.get(user_id).map(|b| b.value().clone()) else {
            return Ok(());
        };
        let clients: Vec<_> = bucket.read().values().cloned().collect();
        for client in clients {
            if client.try_send(message.clone()).is_err() {
                let _ = client.close();
                let _ = self.unregister(&client);
            }
        }
        Ok(())
    }

    /// Close every connection of one user.
    pub fn kick_user(&self, user_id: &UserId) -> Result<()> {
        if self.is_closed() {
            return Err(Error::AlreadyClosed);
        }
        let Some(bucket) = self.clients.get(user_id).map(|b| b.value().clone()) else {
            return Ok(());
        };
        let clients: Vec<_> = bucket.read().values().cloned().collect();
        for client in clients {
            let _ = client.close();
            let _ = self.unregister(&client);
        }
        Ok(())
    }

    /// Idempotent shutdown: stops the loops and closes every client.
    pub fn close(&self) -> Result<()> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::AlreadyClosed);
        }
        let _ = self.exit_tx.send(true);
        let buckets: Vec<Bucket> = self
            .clients
            .iter()
            .map(|kv| kv.value().clone())
            .collect();
        self.clients.clear();
        for bucket in buckets {
            for client in bucket.write().drain() {
                let _ = client.1.close();
            }
        }
        debug!(room_id = %self.room_id, "hub closed");
        Ok(())
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        let _ = self.exit_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{User, UserRole};

    fn test_user(name: &str) -> User {
        User::new(UserId::new(), name.into(), UserRole::User, "hash".into())
    }

    fn new_client(user: &User) -> (Arc<Client>, mpsc::Receiver<Envelope>) {
        Client::new(user.clone(), RoomId::new())
    }

    #[tokio::test]
    async fn test_register_broadcast_receive() {
        let hub = Hub::new(RoomId::new());
        let user = test_user("alice");
        let (client, mut rx) = new_client(&user);
        hub.register(&client).unwrap();

        hub.broadcast(Envelope::viewer_count(1), BroadcastOpts::default())
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            received.message_type(),
            crate::message::MessageType::ViewerCount
        );
    }

    #[tokio::test]
    async fn test_duplicate_conn_rejected() {
        let hub = Hub::new(RoomId::new());
        let user = test_user("alice");
        let (client, _rx) = new_client(&user);
        hub.register(&client).unwrap();
        assert!(matches!(
            hub.register(&client),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_ignore_conn_filter() {
        let hub = Hub::new(RoomId::new());
        let user = test_user("alice");
        let (a, mut rx_a) = new_client(&user);
        let (b, mut rx_b) = new_client(&user);
        hub.register(&a).unwrap();
        hub.register(&b).unwrap();

        hub.broadcast(
            Envelope::viewer_count(2),
            BroadcastOpts::ignore_conn(a.conn_id()),
        )
        .await
        .unwrap();

        let got_b = tokio::time::timeout(Duration::from_secs(1), rx_b.recv())
            .await
            .unwrap();
        assert!(got_b.is_some());
        let got_a = tokio::time::timeout(Duration::from_millis(100), rx_a.recv()).await;
        assert!(got_a.is_err(), "ignored connection must not receive");
    }

    #[tokio::test]
    async fn test_ignore_user_filter() {
        let hub = Hub::new(RoomId::new());
        let alice = test_user("alice");
        let bob = test_user("bob");
        let (a, mut rx_a) = new_client(&alice);
        let (_b, mut rx_b) = new_client(&bob);
        hub.register(&a).unwrap();
        hub.register(&_b).unwrap();

        hub.broadcast(
            Envelope::viewer_count(2),
            BroadcastOpts::ignore_user(&alice.id),
        )
        .await
        .unwrap();

        let got_b = tokio::time::timeout(Duration::from_secs(1), rx_b.recv())
            .await
            .unwrap();
        assert!(got_b.is_some());
        let got_a = tokio::time::timeout(Duration::from_millis(100), rx_a.recv()).await;
        assert!(got_a.is_err(), "ignored user must not receive");
    }

    #[tokio::test]
    async fn test_slow_consumer_evicted() {
        let hub = Hub::new(RoomId::new());
        let user = test_user("slow");
        // Receiver kept but never drained: fills at the client queue depth.
        let (client, _rx) = new_client(&user);
        hub.register(&client).unwrap();

        for i in 0..200 {
            hub.broadcast(Envelope::viewer_count(i), BroadcastOpts::default())
                .await
                .unwrap();
        }
        // Allow the serve loop to run through the backlog.
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(client.is_closed());
        assert_eq!(hub.client_num(), 0);

        // The hub itself stays usable for other clients.
        let user2 = test_user("ok");
        let (client2, mut rx2) = new_client(&user2);
        hub.register(&client2).unwrap();
        hub.broadcast(Envelope::viewer_count(1), BroadcastOpts::default())
            .await
            .unwrap();
        let got = tokio::time::timeout(Duration::from_secs(1), rx2.recv())
            .await
            .unwrap();
        assert!(got.is_some());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let hub = Hub::new(RoomId::new());
        let user = test_user("alice");
        let (client, _rx) = new_client(&user);
        hub.register(&client).unwrap();

        hub.close().unwrap();
        assert!(matches!(hub.close(), Err(Error::AlreadyClosed)));
        assert!(client.is_closed());
        assert!(matches!(
            hub.broadcast(Envelope::ping(), BroadcastOpts::default())
                .await,
            Err(Error::AlreadyClosed)
        ));
        assert!(matches!(hub.register(&client), Err(Error::AlreadyClosed)));
    }

    #[tokio::test]
    async fn test_kick_user_closes_all_connections() {
        let hub = Hub::new(RoomId::new());
        let user = test_user("alice");
        let (a, _rx_a) = new_client(&user);
        let (b, _rx_b) = new_client(&user);
        hub.register(&a).unwrap();
        hub.register(&b).unwrap();

        hub.kick_user(&user.id).unwrap();
        assert!(a.is_closed());
        assert!(b.is_closed());
        assert!(!hub.is_online(&user.id));
    }

    #[tokio::test]
    async fn test_empty_user_bucket_removed() {
        let hub = Hub::new(RoomId::new());
        let user = test_user("alice");
        let (client, _rx) = new_client(&user);
        hub.register(&client).unwrap();
        assert_eq!(hub.client_num(), 1);

        hub.unregister(&client).unwrap();
        assert_eq!(hub.client_num(), 0);
    }
}
