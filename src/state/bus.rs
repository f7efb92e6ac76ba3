//! In-process publish/subscribe hub for [`GameBroadcast`] messages.
//!
//! Each subscriber owns an unbounded FIFO queue, so a single subscriber sees the
//! messages of one name in publish order and nothing is dropped while it is alive.
//! Nothing is promised about the relative order of different names once a
//! subscriber filters them differently or subscribes mid-game.

use std::{
    collections::HashSet,
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::dto::events::{EventError, EventName, GameBroadcast};

/// Identifier of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    // `None` means every name.
    names: Option<HashSet<EventName>>,
    tx: mpsc::UnboundedSender<GameBroadcast>,
}

impl Subscriber {
    fn wants(&self, name: EventName) -> bool {
        self.names.as_ref().is_none_or(|names| names.contains(&name))
    }
}

/// Receiving end of a subscription.
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<GameBroadcast>,
}

impl Subscription {
    /// Identifier to pass to [`EventHub::unsubscribe`].
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next message. `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<GameBroadcast> {
        self.rx.recv().await
    }

    /// Next queued message, if any, without waiting.
    pub fn try_recv(&mut self) -> Option<GameBroadcast> {
        self.rx.try_recv().ok()
    }
}

/// Fan-out hub shared by the coordinator and every renderer connection.
#[derive(Default)]
pub struct EventHub {
    next_id: AtomicU64,
    subscribers: DashMap<SubscriptionId, Subscriber>,
}

impl EventHub {
    /// Create a hub without subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `event` and queue it for every interested subscriber.
    ///
    /// Returns the number of subscribers it was delivered to. Subscribers whose
    /// receiving end was dropped are pruned on the way.
    pub fn publish(&self, event: GameBroadcast) -> Result<usize, EventError> {
        event.validate()?;
        let name = event.name();

        let mut delivered = 0;
        let mut closed = Vec::new();
        for entry in self.subscribers.iter() {
            if !entry.wants(name) {
                continue;
            }
            if entry.tx.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                closed.push(*entry.key());
            }
        }
        for id in closed {
            self.subscribers.remove(&id);
        }

        debug!(event = %name, delivered, "event published");
        Ok(delivered)
    }

    /// Subscribe to a set of names. An empty set subscribes to nothing.
    pub fn subscribe(&self, names: impl IntoIterator<Item = EventName>) -> Subscription {
        self.register(Some(names.into_iter().collect()))
    }

    /// Subscribe to every name of the catalog.
    pub fn subscribe_all(&self) -> Subscription {
        self.register(None)
    }

    /// Stop delivering to a subscription. Already queued messages stay readable.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Run `handler` for every message matching `names` on a dedicated task.
    ///
    /// The task ends once the subscription is removed with [`EventHub::unsubscribe`].
    pub fn spawn_handler<F, Fut>(
        &self,
        names: impl IntoIterator<Item = EventName>,
        mut handler: F,
    ) -> SubscriptionId
    where
        F: FnMut(GameBroadcast) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut subscription = self.subscribe(names);
        let id = subscription.id();
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                handler(event).await;
            }
        });
        id
    }

    fn register(&self, names: Option<HashSet<EventName>>) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.insert(id, Subscriber { names, tx });
        Subscription { id, rx }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::dto::events::{TimerEndEvent, TimerTickEvent};

    fn tick(time_remaining: u64) -> GameBroadcast {
        GameBroadcast::TimerTick(TimerTickEvent {
            time_remaining,
            index: 0,
        })
    }

    fn remaining(event: GameBroadcast) -> u64 {
        match event {
            GameBroadcast::TimerTick(tick) => tick.time_remaining,
            other => panic!("unexpected event {:?}", other.name()),
        }
    }

    #[tokio::test]
    async fn delivers_one_name_in_publish_order() {
        let hub = EventHub::new();
        let mut subscription = hub.subscribe([EventName::TimerTick]);

        for seconds in (1..=5).rev() {
            assert_eq!(hub.publish(tick(seconds)).unwrap(), 1);
        }

        let mut seen = Vec::new();
        while let Some(event) = subscription.try_recv() {
            seen.push(remaining(event));
        }
        assert_eq!(seen, vec![5, 4, 3, 2, 1]);
    }

    #[tokio::test]
    async fn filters_by_name() {
        let hub = EventHub::new();
        let mut ticks = hub.subscribe([EventName::TimerTick]);
        let mut everything = hub.subscribe_all();

        hub.publish(GameBroadcast::TimerEnd(TimerEndEvent { index: 0 }))
            .unwrap();
        hub.publish(tick(3)).unwrap();

        assert_eq!(remaining(ticks.recv().await.unwrap()), 3);
        assert!(ticks.try_recv().is_none());
        assert_eq!(
            everything.try_recv().map(|event| event.name()),
            Some(EventName::TimerEnd)
        );
        assert_eq!(
            everything.try_recv().map(|event| event.name()),
            Some(EventName::TimerTick)
        );
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery_but_keeps_queue() {
        let hub = EventHub::new();
        let mut subscription = hub.subscribe_all();
        hub.publish(tick(2)).unwrap();

        assert!(hub.unsubscribe(subscription.id()));
        assert!(!hub.unsubscribe(subscription.id()));
        assert_eq!(hub.publish(tick(1)).unwrap(), 0);

        assert_eq!(remaining(subscription.recv().await.unwrap()), 2);
        assert!(subscription.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let hub = EventHub::new();
        let subscription = hub.subscribe_all();
        assert_eq!(hub.subscriber_count(), 1);
        drop(subscription);

        assert_eq!(hub.publish(tick(1)).unwrap(), 0);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn invalid_payload_is_rejected_before_delivery() {
        let hub = EventHub::new();
        let mut subscription = hub.subscribe_all();
        let event = GameBroadcast::DeviceReleased(crate::dto::events::DeviceReleasedEvent {
            device_id: "".into(),
            player_id: None,
        });

        assert!(hub.publish(event).is_err());
        assert!(subscription.try_recv().is_none());
    }

    #[tokio::test]
    async fn handler_sees_every_message() {
        let hub = EventHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = hub.spawn_handler([EventName::TimerTick], move |event| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(remaining(event));
            }
        });

        hub.publish(tick(2)).unwrap();
        hub.publish(tick(1)).unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(*seen.lock().unwrap(), vec![2, 1]);
        assert!(hub.unsubscribe(id));
    }
}
