//! In-process transport with competing-consumers delivery
//!
//! Each routing key has a set of workers served round-robin. Messages sent
//! while no worker is registered wait in the key's pending queue and go to
//! the next worker that registers. Stopping a worker deregisters it first,
//! lets the in-flight handler call finish, then re-routes whatever was
//! still queued for it.

use crate::{MessageHandler, MessageSender, SenderOptions, Transport, TransportError, Worker};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Delivery {
    payload: Vec<u8>,
    ack: Option<oneshot::Sender<Result<(), TransportError>>>,
}

#[derive(Default)]
struct Route {
    workers: Vec<(u64, mpsc::UnboundedSender<Delivery>)>,
    next: usize,
    pending: VecDeque<Delivery>,
}

#[derive(Default)]
struct Shared {
    routes: Mutex<HashMap<String, Route>>,
    next_worker_id: AtomicU64,
    closed: AtomicBool,
}

impl Shared {
    fn deliver(&self, routing_key: &str, mut delivery: Delivery) {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        let route = routes.entry(routing_key.to_owned()).or_default();

        while !route.workers.is_empty() {
            let slot = route.next % route.workers.len();
            route.next = route.next.wrapping_add(1);
            match route.workers[slot].1.send(delivery) {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => {
                    // Consumer task is gone; forget the worker and try the next one.
                    route.workers.remove(slot);
                    delivery = returned;
                }
            }
        }

        route.pending.push_back(delivery);
    }

    fn deregister(&self, routing_key: &str, worker_id: u64) {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(route) = routes.get_mut(routing_key) {
            route.workers.retain(|(id, _)| *id != worker_id);
        }
    }
}

/// In-memory [`Transport`] for tests and single-process deployments
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    shared: Arc<Shared>,
}

impl InMemoryTransport {
    /// Empty transport with no routes
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse all further sends and worker registrations
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
    }

    /// True after [`InMemoryTransport::close`]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Messages waiting for a worker on `routing_key`
    pub fn pending(&self, routing_key: &str) -> usize {
        let routes = self.shared.routes.lock().unwrap_or_else(|e| e.into_inner());
        routes.get(routing_key).map(|r| r.pending.len()).unwrap_or(0)
    }

    /// Workers currently registered on `routing_key`
    pub fn worker_count(&self, routing_key: &str) -> usize {
        let routes = self.shared.routes.lock().unwrap_or_else(|e| e.into_inner());
        routes.get(routing_key).map(|r| r.workers.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn create_worker(
        &self,
        routing_key: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Box<dyn Worker>, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let id = self.shared.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        {
            let mut routes = self.shared.routes.lock().unwrap_or_else(|e| e.into_inner());
            let route = routes.entry(routing_key.to_owned()).or_default();
            while let Some(delivery) = route.pending.pop_front() {
                // rx is alive, so this cannot fail
                let _ = tx.send(delivery);
            }
            route.workers.push((id, tx));
        }

        let task = tokio::spawn(consume(
            self.shared.clone(),
            routing_key.to_owned(),
            rx,
            handler,
            cancel.clone(),
        ));

        tracing::debug!(routing_key = %routing_key, worker_id = id, "Worker registered");

        Ok(Box::new(InMemoryWorker {
            id,
            routing_key: routing_key.to_owned(),
            shared: self.shared.clone(),
            cancel,
            task: Mutex::new(Some(task)),
        }))
    }

    async fn create_sender(
        &self,
        routing_key: &str,
        options: SenderOptions,
    ) -> Result<Arc<dyn MessageSender>, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        Ok(Arc::new(InMemorySender {
            routing_key: routing_key.to_owned(),
            shared: self.shared.clone(),
            options,
        }))
    }
}

async fn consume(
    shared: Arc<Shared>,
    routing_key: String,
    mut rx: mpsc::UnboundedReceiver<Delivery>,
    handler: Arc<dyn MessageHandler>,
    cancel: CancellationToken,
) {
    loop {
        let delivery = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            delivery = rx.recv() => match delivery {
                Some(delivery) => delivery,
                None => break,
            },
        };

        let result = handler.handle(delivery.payload).await;
        if let Err(e) = &result {
            tracing::warn!(routing_key = %routing_key, error = %e, "Handler rejected message");
        }
        if let Some(ack) = delivery.ack {
            let _ = ack.send(result);
        }
    }

    rx.close();
    let mut requeued = 0usize;
    while let Ok(delivery) = rx.try_recv() {
        shared.deliver(&routing_key, delivery);
        requeued += 1;
    }
    if requeued > 0 {
        tracing::debug!(routing_key = %routing_key, requeued, "Re-routed undelivered messages");
    }
}

struct InMemoryWorker {
    id: u64,
    routing_key: String,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl Worker for InMemoryWorker {
    fn deregister(&self) {
        self.shared.deregister(&self.routing_key, self.id);
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.deregister();
        self.cancel.cancel();

        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            task.await
                .map_err(|e| TransportError::Worker(e.to_string().into()))?;
            tracing::debug!(routing_key = %self.routing_key, worker_id = self.id, "Worker stopped");
        }
        Ok(())
    }
}

struct InMemorySender {
    routing_key: String,
    shared: Arc<Shared>,
    options: SenderOptions,
}

#[async_trait]
impl MessageSender for InMemorySender {
    async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        if self.options.fire_and_forget {
            self.shared
                .deliver(&self.routing_key, Delivery { payload, ack: None });
            return Ok(());
        }

        let (ack, done) = oneshot::channel();
        self.shared.deliver(
            &self.routing_key,
            Delivery {
                payload,
                ack: Some(ack),
            },
        );
        done.await.map_err(|_| TransportError::Closed)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Recorder {
        name: &'static str,
        seen: Arc<Mutex<Vec<(&'static str, Vec<u8>)>>>,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle(&self, payload: Vec<u8>) -> Result<(), TransportError> {
            self.seen.lock().unwrap().push((self.name, payload));
            Ok(())
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_each_message_goes_to_exactly_one_worker() {
        let transport = InMemoryTransport::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let a = transport
            .create_worker("q", Arc::new(Recorder { name: "a", seen: seen.clone() }))
            .await
            .unwrap();
        let b = transport
            .create_worker("q", Arc::new(Recorder { name: "b", seen: seen.clone() }))
            .await
            .unwrap();
        let sender = transport
            .create_sender("q", SenderOptions::fire_and_forget())
            .await
            .unwrap();

        for i in 0..4u8 {
            sender.send(vec![i]).await.unwrap();
        }
        settle().await;

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 4);
        let mut payloads: Vec<_> = seen.iter().map(|(_, p)| p[0]).collect();
        payloads.sort();
        assert_eq!(payloads, vec![0, 1, 2, 3]);
        assert_eq!(seen.iter().filter(|(n, _)| *n == "a").count(), 2);

        a.stop().await.unwrap();
        b.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_messages_wait_for_a_worker() {
        let transport = InMemoryTransport::new();
        let sender = transport
            .create_sender("q", SenderOptions::default())
            .await
            .unwrap();
        sender.send(b"early".to_vec()).await.unwrap();
        assert_eq!(transport.pending("q"), 1);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let worker = transport
            .create_worker("q", Arc::new(Recorder { name: "late", seen: seen.clone() }))
            .await
            .unwrap();
        settle().await;

        assert_eq!(transport.pending("q"), 0);
        assert_eq!(seen.lock().unwrap().as_slice(), &[("late", b"early".to_vec())]);
        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stopped_worker_receives_nothing() {
        let transport = InMemoryTransport::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let worker = transport
            .create_worker("q", Arc::new(Recorder { name: "a", seen: seen.clone() }))
            .await
            .unwrap();
        worker.stop().await.unwrap();
        worker.stop().await.unwrap();
        assert_eq!(transport.worker_count("q"), 0);

        let sender = transport
            .create_sender("q", SenderOptions::default())
            .await
            .unwrap();
        sender.send(vec![1]).await.unwrap();
        settle().await;

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(transport.pending("q"), 1);
    }

    #[tokio::test]
    async fn test_deregistered_worker_is_skipped_before_stop() {
        let transport = InMemoryTransport::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let a = transport
            .create_worker("q", Arc::new(Recorder { name: "a", seen: seen.clone() }))
            .await
            .unwrap();
        let b = transport
            .create_worker("q", Arc::new(Recorder { name: "b", seen: seen.clone() }))
            .await
            .unwrap();
        a.deregister();
        assert_eq!(transport.worker_count("q"), 1);

        let sender = transport
            .create_sender("q", SenderOptions::default())
            .await
            .unwrap();
        for i in 0..3u8 {
            sender.send(vec![i]).await.unwrap();
        }
        settle().await;

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|(name, _)| *name == "b"));

        a.stop().await.unwrap();
        b.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_await_handler_sender_waits_for_ack() {
        let transport = InMemoryTransport::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let worker = transport
            .create_worker("q", Arc::new(Recorder { name: "a", seen: seen.clone() }))
            .await
            .unwrap();
        let sender = transport
            .create_sender("q", SenderOptions::await_handler())
            .await
            .unwrap();

        sender.send(vec![7]).await.unwrap();

        assert_eq!(seen.lock().unwrap().len(), 1);
        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_transport_refuses_sends() {
        let transport = InMemoryTransport::new();
        let sender = transport
            .create_sender("q", SenderOptions::default())
            .await
            .unwrap();
        transport.close();

        assert!(matches!(
            sender.send(vec![1]).await,
            Err(TransportError::Closed)
        ));
        assert!(transport
            .create_sender("q", SenderOptions::default())
            .await
            .is_err());
    }
}
