use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;
use uuid::Uuid;

/// Per-subscriber buffer size. Signals are advisory (subscribers re-query
/// the latest state), so a small buffer is enough; a lagging subscriber
/// loses its oldest pending signal, never the newest.
const SUBSCRIBER_BUFFER: usize = 16;

/// A change signal. It carries no payload beyond the topic it was
/// published on; observers re-read the authoritative state from the store.
#[derive(Debug, Clone)]
pub struct ChangeSignal {
    pub topic: String,
}

/// In-process topic-keyed pub/sub. One topic per run fans a change signal
/// out to every live subscriber; publishing never blocks on slow
/// consumers.
#[derive(Default)]
pub struct Broker {
    topics: Mutex<HashMap<String, broadcast::Sender<ChangeSignal>>>,
}

pub fn run_topic(run_id: Uuid) -> String {
    format!("runUpdated:{run_id}")
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers a signal to every current subscriber of `topic`. Topics
    /// nobody listens to are dropped on the way through, keeping the
    /// registry bounded by the number of live subscriptions.
    pub fn publish(&self, topic: &str) {
        let mut topics = self.topics.lock().expect("broker registry poisoned");
        if let Some(sender) = topics.get(topic) {
            if sender.receiver_count() == 0 {
                topics.remove(topic);
                return;
            }
            let _ = sender.send(ChangeSignal {
                topic: topic.to_string(),
            });
        }
    }

    /// Subscribes to `topic`. The returned receiver yields one signal per
    /// publish; if more than [`SUBSCRIBER_BUFFER`] signals pile up the
    /// oldest are discarded and the receiver observes a lag, after which
    /// it continues with the newest signals.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<ChangeSignal> {
        let mut topics = self.topics.lock().expect("broker registry poisoned");
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(SUBSCRIBER_BUFFER).0)
            .subscribe()
    }

    pub fn publish_run_updated(&self, run_id: Uuid) {
        self.publish(&run_topic(run_id));
    }

    pub fn subscribe_run_updated(&self, run_id: Uuid) -> broadcast::Receiver<ChangeSignal> {
        self.subscribe(&run_topic(run_id))
    }
}
