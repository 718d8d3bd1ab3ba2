//! Client notifications for autorec rule changes

use tokio::sync::broadcast;
use tracing::debug;

use crate::dvr::autorec::AutorecRule;
use crate::dvr::models::AutorecEvent;

/// Capacity of the notification channel; slow receivers lag rather than block
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Fire-and-forget sink for rule changes. Implementations must not block.
pub trait Notifier: Send + Sync {
    fn rule_added(&self, rule: &AutorecRule);
    fn rule_updated(&self, rule: &AutorecRule);
    fn rule_removed(&self, rule: &AutorecRule);
}

/// Publishes `AutorecEvent`s on a broadcast channel
pub struct AutorecNotifier {
    tx: broadcast::Sender<AutorecEvent>,
}

impl AutorecNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AutorecEvent> {
        self.tx.subscribe()
    }

    fn emit(&self, event: AutorecEvent) {
        // No receivers is fine
        if self.tx.send(event).is_err() {
            debug!("No autorec event subscribers");
        }
    }
}

impl Default for AutorecNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for AutorecNotifier {
    fn rule_added(&self, rule: &AutorecRule) {
        self.emit(AutorecEvent::added(rule));
    }

    fn rule_updated(&self, rule: &AutorecRule) {
        self.emit(AutorecEvent::updated(rule));
    }

    fn rule_removed(&self, rule: &AutorecRule) {
        self.emit(AutorecEvent::removed(rule));
    }
}
