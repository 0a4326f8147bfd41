//! The message sync layer.
//!
//! [`MessageSync`] fronts an [`AgentStore`] and is what the conversation
//! writes through. It offers two write paths:
//!
//! - `save_now`: immediate upsert, drops any pending debounced write for the
//!   same message id, errors are returned to the caller.
//! - `save_debounced`: coalesces rapid updates to one message (streaming
//!   text) into a single write after a quiet window. Background failures are
//!   logged and swallowed.
//!
//! All writes pass through a single write gate, so a debounced write can never
//! land after (and overwrite) a newer immediate write. Every save is pushed to
//! subscribers as a [`SyncEvent`]. Subscriptions read their initial state
//! from the store; nothing is cached here.

use agentweave_core::agent::{AgentInstance, InstancePatch};
use agentweave_core::error::StoreError;
use agentweave_core::message::AgentMessage;
use agentweave_core::store::{AgentStore, InstanceRecord};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

/// Default coalescing window for streaming updates.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// A change pushed to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Full state of an instance, sent once when a subscription starts
    Snapshot(InstanceRecord),
    MessageUpdated(AgentMessage),
    InstanceUpdated(AgentInstance),
}

#[derive(Default)]
struct Subscribers {
    /// instance id -> senders receiving every change of that instance
    instances: HashMap<String, Vec<mpsc::UnboundedSender<SyncEvent>>>,
    /// message id -> senders receiving changes of that one message
    messages: HashMap<String, Vec<mpsc::UnboundedSender<SyncEvent>>>,
}

struct Pending {
    generation: u64,
    message: AgentMessage,
}

struct Inner {
    store: Arc<dyn AgentStore>,
    debounce: Duration,
    write_gate: Mutex<()>,
    pending: Mutex<HashMap<String, Pending>>,
    generation: AtomicU64,
    subscribers: Mutex<Subscribers>,
}

/// Debounced, subscribable persistence in front of an [`AgentStore`].
#[derive(Clone)]
pub struct MessageSync {
    inner: Arc<Inner>,
}

impl MessageSync {
    pub fn new(store: Arc<dyn AgentStore>) -> Self {
        Self::with_debounce(store, DEFAULT_DEBOUNCE)
    }

    pub fn with_debounce(store: Arc<dyn AgentStore>, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                debounce,
                write_gate: Mutex::new(()),
                pending: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                subscribers: Mutex::new(Subscribers::default()),
            }),
        }
    }

    /// The wrapped store, for reads.
    pub fn store(&self) -> &Arc<dyn AgentStore> {
        &self.inner.store
    }

    pub fn debounce(&self) -> Duration {
        self.inner.debounce
    }

    /// Upsert a message immediately.
    pub async fn save_now(&self, message: &AgentMessage) -> Result<(), StoreError> {
        {
            let _gate = self.inner.write_gate.lock().await;
            self.inner.pending.lock().await.remove(&message.id);
            self.inner.store.save_message(message).await?;
        }
        debug!(message_id = %message.id, agent_id = %message.agent_id, "Message saved");
        self.inner.publish_message(message).await;
        Ok(())
    }

    /// Schedule a coalesced write of `message`.
    ///
    /// Later calls for the same message id within the window replace the
    /// scheduled content. Subscribers are notified immediately.
    pub async fn save_debounced(&self, message: &AgentMessage) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.pending.lock().await.insert(
            message.id.clone(),
            Pending {
                generation,
                message: message.clone(),
            },
        );
        self.inner.publish_message(message).await;

        let inner = self.inner.clone();
        let id = message.id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            let _gate = inner.write_gate.lock().await;
            let due = {
                let mut pending = inner.pending.lock().await;
                match pending.get(&id) {
                    Some(p) if p.generation == generation => pending.remove(&id),
                    // Superseded by a later save
                    _ => None,
                }
            };
            if let Some(p) = due {
                match inner.store.save_message(&p.message).await {
                    Ok(()) => debug!(message_id = %id, "Debounced message saved"),
                    Err(e) => warn!(message_id = %id, error = %e, "Debounced message save failed"),
                }
            }
        });
    }

    /// Write every pending debounced message now.
    ///
    /// Every drained write is attempted; failures are logged and the first
    /// one is returned.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let _gate = self.inner.write_gate.lock().await;
        let due: Vec<Pending> = self
            .inner
            .pending
            .lock()
            .await
            .drain()
            .map(|(_, p)| p)
            .collect();
        let mut first_error = None;
        for p in due {
            if let Err(e) = self.inner.store.save_message(&p.message).await {
                warn!(message_id = %p.message.id, error = %e, "Flushing message failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Number of debounced writes not yet performed.
    pub async fn pending_writes(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    /// Apply a partial update to an instance and notify subscribers.
    pub async fn update_instance(
        &self,
        id: &str,
        patch: &InstancePatch,
    ) -> Result<Option<AgentInstance>, StoreError> {
        let updated = {
            let _gate = self.inner.write_gate.lock().await;
            self.inner.store.update_instance(id, patch).await?
        };
        if let Some(instance) = &updated {
            self.inner.publish_instance(instance).await;
        }
        Ok(updated)
    }

    /// Receive every change to an instance and its messages.
    ///
    /// The instance and its full history are pushed right away as a
    /// [`SyncEvent::Snapshot`].
    pub async fn subscribe_instance(
        &self,
        instance_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<SyncEvent>, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(record) = self.inner.store.get_instance(instance_id).await? {
            let _ = tx.send(SyncEvent::Snapshot(record));
        }
        self.inner
            .subscribers
            .lock()
            .await
            .instances
            .entry(instance_id.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }

    /// Receive every change to one message.
    ///
    /// The current message state is pushed right away if it exists. A
    /// pending debounced write counts as the current state.
    pub async fn subscribe_message(
        &self,
        instance_id: &str,
        message_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<SyncEvent>, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();

        let pending = self
            .inner
            .pending
            .lock()
            .await
            .get(message_id)
            .map(|p| p.message.clone());
        let current = match pending {
            Some(message) => Some(message),
            None => self.inner.store.get_message(message_id).await?,
        };
        if let Some(message) = current.filter(|m| m.agent_id == instance_id) {
            let _ = tx.send(SyncEvent::MessageUpdated(message));
        }

        self.inner
            .subscribers
            .lock()
            .await
            .messages
            .entry(message_id.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }

    /// Number of instance and message keys with live subscribers.
    pub async fn subscribed_keys(&self) -> usize {
        let subscribers = self.inner.subscribers.lock().await;
        subscribers.instances.len() + subscribers.messages.len()
    }
}

/// Send `event` to every sender under `key`, dropping closed ones and the
/// key itself once nobody listens.
fn broadcast(
    map: &mut HashMap<String, Vec<mpsc::UnboundedSender<SyncEvent>>>,
    key: &str,
    event: &SyncEvent,
) {
    let Some(senders) = map.get_mut(key) else {
        return;
    };
    senders.retain(|tx| tx.send(event.clone()).is_ok());
    if senders.is_empty() {
        map.remove(key);
    }
}

impl Inner {
    async fn publish_message(&self, message: &AgentMessage) {
        let mut subscribers = self.subscribers.lock().await;
        let event = SyncEvent::MessageUpdated(message.clone());
        broadcast(&mut subscribers.instances, &message.agent_id, &event);
        broadcast(&mut subscribers.messages, &message.id, &event);
    }

    async fn publish_instance(&self, instance: &AgentInstance) {
        let mut subscribers = self.subscribers.lock().await;
        let event = SyncEvent::InstanceUpdated(instance.clone());
        broadcast(&mut subscribers.instances, &instance.id, &event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStore;
    use agentweave_core::agent::{AgentDefinition, AgentStatus};

    async fn setup() -> (MessageSync, AgentInstance) {
        let store = Arc::new(InMemoryStore::new());
        let def = AgentDefinition::new("def", "Helper");
        store.save_definition(&def).await.unwrap();
        let instance = AgentInstance::new(&def, None);
        store.create_instance(&instance).await.unwrap();
        (MessageSync::new(store), instance)
    }

    async fn stored_content(sync: &MessageSync, id: &str) -> Option<String> {
        sync.store().get_message(id).await.unwrap().map(|m| m.content)
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_writes_coalesce() {
        let (sync, instance) = setup().await;
        let mut msg = AgentMessage::assistant(&instance.id, "He");
        sync.save_debounced(&msg).await;
        msg.content = "Hello".into();
        sync.save_debounced(&msg).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(stored_content(&sync, &msg.id).await, None);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(stored_content(&sync, &msg.id).await.as_deref(), Some("Hello"));
        assert_eq!(sync.pending_writes().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn save_now_supersedes_pending_debounce() {
        let (sync, instance) = setup().await;
        let mut msg = AgentMessage::assistant(&instance.id, "draft");
        sync.save_debounced(&msg).await;

        msg.content = "final".into();
        msg.metadata.is_complete = true;
        sync.save_now(&msg).await.unwrap();
        assert_eq!(sync.pending_writes().await, 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(stored_content(&sync, &msg.id).await.as_deref(), Some("final"));
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_failure_is_swallowed() {
        let (sync, _instance) = setup().await;
        let orphan = AgentMessage::assistant("no-such-instance", "x");
        sync.save_debounced(&orphan).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sync.pending_writes().await, 0);
        assert!(sync.save_now(&orphan).await.is_err());
    }

    #[tokio::test]
    async fn flush_writes_pending() {
        let (sync, instance) = setup().await;
        let msg = AgentMessage::assistant(&instance.id, "streaming");
        sync.save_debounced(&msg).await;
        sync.flush().await.unwrap();
        assert_eq!(stored_content(&sync, &msg.id).await.as_deref(), Some("streaming"));
    }

    #[tokio::test]
    async fn flush_attempts_every_write_and_reports_first_error() {
        let (sync, instance) = setup().await;
        let orphan = AgentMessage::assistant("no-such-instance", "lost");
        let msg = AgentMessage::assistant(&instance.id, "kept");
        sync.save_debounced(&orphan).await;
        sync.save_debounced(&msg).await;

        assert!(sync.flush().await.is_err());
        assert_eq!(sync.pending_writes().await, 0);
        assert_eq!(stored_content(&sync, &msg.id).await.as_deref(), Some("kept"));
    }

    #[tokio::test]
    async fn instance_subscription_gets_snapshot_then_changes() {
        let (sync, instance) = setup().await;
        let earlier = AgentMessage::user(&instance.id, "earlier");
        sync.save_now(&earlier).await.unwrap();

        let mut rx = sync.subscribe_instance(&instance.id).await.unwrap();
        match rx.recv().await.unwrap() {
            SyncEvent::Snapshot(record) => {
                assert_eq!(record.instance.status, AgentStatus::Idle);
                assert_eq!(record.messages.len(), 1);
                assert_eq!(record.messages[0].content, "earlier");
            }
            other => panic!("unexpected {other:?}"),
        }

        let msg = AgentMessage::user(&instance.id, "hi");
        sync.save_now(&msg).await.unwrap();
        sync.update_instance(&instance.id, &InstancePatch::status(AgentStatus::Working))
            .await
            .unwrap();

        assert!(matches!(rx.recv().await.unwrap(), SyncEvent::MessageUpdated(m) if m.content == "hi"));
        assert!(matches!(
            rx.recv().await.unwrap(),
            SyncEvent::InstanceUpdated(i) if i.status == AgentStatus::Working
        ));
    }

    #[tokio::test]
    async fn message_subscription_sees_debounced_updates() {
        let (sync, instance) = setup().await;
        let mut msg = AgentMessage::assistant(&instance.id, "a");
        sync.save_now(&msg).await.unwrap();

        let mut rx = sync.subscribe_message(&instance.id, &msg.id).await.unwrap();
        assert!(matches!(rx.recv().await.unwrap(), SyncEvent::MessageUpdated(m) if m.content == "a"));

        msg.content = "ab".into();
        sync.save_debounced(&msg).await;
        assert!(matches!(rx.recv().await.unwrap(), SyncEvent::MessageUpdated(m) if m.content == "ab"));
    }

    #[tokio::test]
    async fn snapshot_reflects_writes_made_behind_the_sync_layer() {
        let (sync, instance) = setup().await;
        drop(sync.subscribe_instance(&instance.id).await.unwrap());

        sync.store()
            .update_instance(&instance.id, &InstancePatch::status(AgentStatus::Completed))
            .await
            .unwrap();

        let mut rx = sync.subscribe_instance(&instance.id).await.unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            SyncEvent::Snapshot(r) if r.instance.status == AgentStatus::Completed
        ));
    }

    #[tokio::test]
    async fn dropped_subscribers_are_removed_on_next_publish() {
        let (sync, instance) = setup().await;
        let msg = AgentMessage::user(&instance.id, "hi");
        sync.save_now(&msg).await.unwrap();

        let by_instance = sync.subscribe_instance(&instance.id).await.unwrap();
        let by_message = sync.subscribe_message(&instance.id, &msg.id).await.unwrap();
        assert_eq!(sync.subscribed_keys().await, 2);

        drop(by_instance);
        drop(by_message);
        sync.save_now(&msg).await.unwrap();
        assert_eq!(sync.subscribed_keys().await, 0);
    }

    #[tokio::test]
    async fn subscribing_to_unknown_message_pushes_nothing() {
        let (sync, instance) = setup().await;
        let mut rx = sync.subscribe_message(&instance.id, "missing").await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
