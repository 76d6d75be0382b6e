//! Event subscription bus.
//!
//! Every [`Connection`](crate::Connection) and every
//! [`Session`](crate::Session) owns one bus. Inbound events are delivered
//! synchronously, in registration order, during the dispatch turn that
//! decoded the frame.
//!
//! # Semantics
//!
//! - `on` handlers stay registered until [`EventBus::off`].
//! - `once` handlers are removed before their first delivery, so a handler
//!   that re-enters the bus never sees the same event twice.
//! - [`EventBus::next`] resolves with the next matching event, or fails
//!   with [`Error::TargetClosed`] if the owner disconnects first.
//! - Handlers run without any bus or connection lock held and may subscribe,
//!   unsubscribe or issue calls.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::trace;

use crate::error::{Error, Result};
use crate::identifiers::SubscriptionId;
use crate::protocol::{Event, EventKind};

// ============================================================================
// Types
// ============================================================================

/// Event handler callback type.
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

// ============================================================================
// EventFilter
// ============================================================================

/// Selects which events a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    /// Every event, including local ones.
    All,
    /// A single event kind.
    Kind(EventKind),
}

impl EventFilter {
    /// Returns `true` if the filter accepts `kind`.
    #[inline]
    #[must_use]
    pub fn matches(&self, kind: &EventKind) -> bool {
        match self {
            Self::All => true,
            Self::Kind(expected) => expected == kind,
        }
    }
}

impl From<EventKind> for EventFilter {
    fn from(kind: EventKind) -> Self {
        Self::Kind(kind)
    }
}

// ============================================================================
// Subscription
// ============================================================================

enum Delivery {
    Handler { handler: EventHandler, once: bool },
    Waiter(oneshot::Sender<Result<Event>>),
}

struct Subscription {
    id: SubscriptionId,
    filter: EventFilter,
    delivery: Delivery,
}

impl Subscription {
    fn accepts(&self, kind: &EventKind) -> bool {
        match self.delivery {
            Delivery::Waiter(_) => self.filter.matches(kind) || *kind == EventKind::Disconnected,
            Delivery::Handler { .. } => self.filter.matches(kind),
        }
    }

    fn is_one_shot(&self) -> bool {
        match self.delivery {
            Delivery::Waiter(_) => true,
            Delivery::Handler { once, .. } => once,
        }
    }
}

// ============================================================================
// EventBus
// ============================================================================

/// Ordered list of event subscriptions.
#[derive(Default)]
pub struct EventBus {
    subscriptions: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
    disconnected: AtomicBool,
}

impl EventBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a persistent handler.
    pub fn on<F>(&self, filter: impl Into<EventFilter>, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe(
            filter.into(),
            Delivery::Handler {
                handler: Arc::new(handler),
                once: false,
            },
        )
    }

    /// Registers a handler that fires at most once.
    pub fn once<F>(&self, filter: impl Into<EventFilter>, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe(
            filter.into(),
            Delivery::Handler {
                handler: Arc::new(handler),
                once: true,
            },
        )
    }

    /// Removes a subscription.
    ///
    /// Returns `false` if it was already gone.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        before != subscriptions.len()
    }

    /// Waits for the next event of `kind`.
    ///
    /// The returned future fails with [`Error::TargetClosed`] if the bus
    /// owner disconnects before a matching event arrives.
    pub fn next(&self, kind: EventKind) -> NextEvent {
        let (tx, rx) = oneshot::channel();

        // Checked under the list lock so a concurrent disconnect either sees
        // the waiter or the waiter sees the flag.
        let mut subscriptions = self.subscriptions.lock();
        if self.disconnected.load(Ordering::Acquire) {
            let _ = tx.send(Err(Error::TargetClosed));
        } else {
            subscriptions.push(Subscription {
                id: self.allocate_id(),
                filter: EventFilter::Kind(kind),
                delivery: Delivery::Waiter(tx),
            });
        }
        drop(subscriptions);

        NextEvent { rx }
    }

    /// Returns the number of live subscriptions.
    #[inline]
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Returns `true` once a [`EventKind::Disconnected`] event was emitted.
    #[inline]
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    fn allocate_id(&self) -> SubscriptionId {
        SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn subscribe(&self, filter: EventFilter, delivery: Delivery) -> SubscriptionId {
        let id = self.allocate_id();
        self.subscriptions.lock().push(Subscription {
            id,
            filter,
            delivery,
        });
        id
    }

    /// Delivers an event to every matching subscription.
    ///
    /// Must not be called with a connection lock held.
    pub(crate) fn emit(&self, event: &Event) {
        let mut handlers: Vec<EventHandler> = Vec::new();
        let mut waiters: Vec<oneshot::Sender<Result<Event>>> = Vec::new();

        {
            let mut subscriptions = self.subscriptions.lock();
            if event.kind == EventKind::Disconnected {
                self.disconnected.store(true, Ordering::Release);
            }

            let mut index = 0;
            while index < subscriptions.len() {
                if !subscriptions[index].accepts(&event.kind) {
                    index += 1;
                    continue;
                }

                if subscriptions[index].is_one_shot() {
                    let subscription = subscriptions.remove(index);
                    match subscription.delivery {
                        Delivery::Handler { handler, .. } => handlers.push(handler),
                        Delivery::Waiter(tx) => waiters.push(tx),
                    }
                } else {
                    if let Delivery::Handler { handler, .. } = &subscriptions[index].delivery {
                        handlers.push(Arc::clone(handler));
                    }
                    index += 1;
                }
            }
        }

        trace!(
            kind = %event.kind,
            handlers = handlers.len(),
            waiters = waiters.len(),
            "Emitting event"
        );

        for handler in handlers {
            handler(event);
        }

        for tx in waiters {
            let outcome = if event.kind == EventKind::Disconnected {
                Err(Error::TargetClosed)
            } else {
                Ok(event.clone())
            };
            let _ = tx.send(outcome);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &self.subscriber_count())
            .field("disconnected", &self.is_disconnected())
            .finish()
    }
}

// ============================================================================
// NextEvent
// ============================================================================

/// Future returned by [`EventBus::next`].
#[derive(Debug)]
pub struct NextEvent {
    rx: oneshot::Receiver<Result<Event>>,
}

impl Future for NextEvent {
    type Output = Result<Event>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(Error::TargetClosed)))
    }
}

// ============================================================================
// Tests
// ============================================================================
