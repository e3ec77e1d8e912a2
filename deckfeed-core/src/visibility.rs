use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{FeedError, Result};
use crate::loader::DeckLoader;
use crate::model::{ContentNode, NodeId};

/// Viewport transitions reported for a card's element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VisibilitySignal {
    /// Any part of the card entered the viewport.
    Visible,
    Hidden,
    /// The card fills most of the viewport and is the one being read.
    Primary,
    Unprimary,
}

pub trait VisibilityCallbacks: Send + Sync {
    fn on_signal(&self, element: &NodeId, signal: VisibilitySignal);
}

impl<F> VisibilityCallbacks for F
where
    F: Fn(&NodeId, VisibilitySignal) + Send + Sync,
{
    fn on_signal(&self, element: &NodeId, signal: VisibilitySignal) {
        self(element, signal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

struct Subscription {
    token: SubscriptionToken,
    callbacks: Arc<dyn VisibilityCallbacks>,
}

/// Routes visibility signals to the callbacks registered for each card.
///
/// One registry belongs to one view and is dropped with it.
#[derive(Default)]
pub struct VisibilityRegistry {
    next_token: AtomicU64,
    subscriptions: Mutex<HashMap<NodeId, Vec<Subscription>>>,
}

impl fmt::Debug for VisibilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisibilityRegistry")
            .field("elements", &self.subscriptions.lock().len())
            .finish()
    }
}

impl VisibilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        element: NodeId,
        callbacks: Arc<dyn VisibilityCallbacks>,
    ) -> SubscriptionToken {
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .lock()
            .entry(element)
            .or_default()
            .push(Subscription { token, callbacks });
        token
    }

    /// Returns false when the token was already removed.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        let mut removed = false;
        subscriptions.retain(|_, subs| {
            let before = subs.len();
            subs.retain(|sub| sub.token != token);
            removed |= subs.len() != before;
            !subs.is_empty()
        });
        removed
    }

    /// Delivers `signal` to every subscriber of `element`; returns how many got it.
    pub fn notify(&self, element: &NodeId, signal: VisibilitySignal) -> usize {
        let targets: Vec<Arc<dyn VisibilityCallbacks>> = self
            .subscriptions
            .lock()
            .get(element)
            .map(|subs| subs.iter().map(|sub| Arc::clone(&sub.callbacks)).collect())
            .unwrap_or_default();
        trace!(%element, ?signal, subscribers = targets.len(), "visibility signal");
        for callbacks in &targets {
            callbacks.on_signal(element, signal);
        }
        targets.len()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A visibility signal queued for the loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameEvent {
    pub node_id: NodeId,
    pub signal: VisibilitySignal,
}

impl FrameEvent {
    /// Visible cards are loaded; a primary card becomes the reading position.
    pub async fn apply(&self, loader: &DeckLoader) -> Result<Option<Arc<ContentNode>>> {
        match self.signal {
            VisibilitySignal::Visible => loader.get_content(&self.node_id).await.map(Some),
            VisibilitySignal::Primary => {
                let ordinal = loader
                    .content_order(&self.node_id)
                    .ok_or_else(|| FeedError::NotFound(format!("node {}", self.node_id)))?;
                loader.set_current_location(ordinal)?;
                Ok(loader.cached(&self.node_id))
            }
            VisibilitySignal::Hidden | VisibilitySignal::Unprimary => {
                debug!(node = %self.node_id, signal = ?self.signal, "card left focus");
                Ok(None)
            }
        }
    }
}

/// Callbacks that forward every signal into a channel drained by the loader's owner.
pub struct FrameCallbacks {
    sender: mpsc::UnboundedSender<FrameEvent>,
}

impl FrameCallbacks {
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<FrameEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Arc::new(Self { sender }), receiver)
    }
}

impl VisibilityCallbacks for FrameCallbacks {
    fn on_signal(&self, element: &NodeId, signal: VisibilitySignal) {
        if self
            .sender
            .send(FrameEvent {
                node_id: element.clone(),
                signal,
            })
            .is_err()
        {
            debug!(%element, "frame receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoaderConfig;
    use crate::fixture::FixtureProvider;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn unsubscribed_callbacks_stop_receiving() {
        let registry = VisibilityRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let token = registry.subscribe(
            NodeId::from("card"),
            Arc::new(move |_: &NodeId, _: VisibilitySignal| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(registry.notify(&NodeId::from("card"), VisibilitySignal::Visible), 1);
        assert_eq!(registry.notify(&NodeId::from("other"), VisibilitySignal::Visible), 0);
        assert!(registry.unsubscribe(token));
        assert!(!registry.unsubscribe(token));
        assert_eq!(registry.notify(&NodeId::from("card"), VisibilitySignal::Hidden), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn callbacks_may_resubscribe_during_notify() {
        let registry = Arc::new(VisibilityRegistry::new());
        let inner = Arc::clone(&registry);
        registry.subscribe(
            NodeId::from("a"),
            Arc::new(move |_: &NodeId, _: VisibilitySignal| {
                inner.subscribe(NodeId::from("b"), Arc::new(|_: &NodeId, _: VisibilitySignal| {}));
            }),
        );
        registry.notify(&NodeId::from("a"), VisibilitySignal::Primary);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn frame_events_drive_the_loader() {
        let provider = Arc::new(FixtureProvider::generated(1000, 100).unwrap());
        let loader = DeckLoader::new(provider, LoaderConfig::default());
        let index = loader.load_index(None, None, None).await.unwrap();
        let target = index.id_at(600).cloned().unwrap();

        let registry = VisibilityRegistry::new();
        let (callbacks, mut events) = FrameCallbacks::channel();
        registry.subscribe(target.clone(), callbacks);
        registry.notify(&target, VisibilitySignal::Visible);
        registry.notify(&target, VisibilitySignal::Primary);

        let visible = events.recv().await.unwrap();
        let node = visible.apply(&loader).await.unwrap().unwrap();
        assert_eq!(node.id, target);

        let primary = events.recv().await.unwrap();
        primary.apply(&loader).await.unwrap();
        assert_eq!(loader.current_location(), 600);
        assert_eq!(loader.current_id(), Some(target));
    }
}
