//! Event bus for async workflow communication
//!
//! Provides event publishing and subscription for workflow orchestration.

use crate::{BeemFlowError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Callback function for event handling
type EventCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// Event bus trait for publishing and subscribing to events
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event to a topic
    async fn publish(&self, topic: &str, payload: Value) -> Result<()>;

    /// Subscribe to a topic with a callback, returning a handle that can later
    /// be used to remove just this subscription without affecting others on
    /// the same topic.
    async fn subscribe(&self, topic: &str, callback: EventCallback) -> Result<Uuid>;

    /// Unsubscribe every callback registered for a topic.
    async fn unsubscribe(&self, topic: &str) -> Result<()>;

    /// Unsubscribe a single callback by the handle returned from `subscribe`.
    async fn unsubscribe_by_id(&self, id: Uuid) -> Result<()>;
}

struct Subscription {
    id: Uuid,
    callback: EventCallback,
}

/// In-process event bus using tokio broadcast channels
pub struct InProcEventBus {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<Value>>>>,
    callbacks: Arc<RwLock<HashMap<String, Vec<Subscription>>>>,
    // Reverse index so unsubscribe_by_id doesn't need to scan every topic.
    topic_by_id: Arc<RwLock<HashMap<Uuid, String>>>,
}

impl InProcEventBus {
    /// Create a new in-process event bus
    pub fn new() -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            callbacks: Arc::new(RwLock::new(HashMap::new())),
            topic_by_id: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InProcEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InProcEventBus {
    async fn publish(&self, topic: &str, payload: Value) -> Result<()> {
        // Get or create channel for this topic
        let sender = {
            let mut channels = self.channels.write();
            channels
                .entry(topic.to_string())
                .or_insert_with(|| broadcast::channel(100).0)
                .clone()
        };

        // Send to broadcast channel (ignore if no receivers)
        let _ = sender.send(payload.clone());

        // Call all registered callbacks
        if let Some(subs) = self.callbacks.read().get(topic) {
            for sub in subs {
                (sub.callback)(payload.clone());
            }
        }

        Ok(())
    }

    async fn subscribe(&self, topic: &str, callback: EventCallback) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.callbacks
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(Subscription { id, callback });
        self.topic_by_id.write().insert(id, topic.to_string());
        Ok(id)
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        if let Some(subs) = self.callbacks.write().remove(topic) {
            let mut by_id = self.topic_by_id.write();
            for sub in subs {
                by_id.remove(&sub.id);
            }
        }
        self.channels.write().remove(topic);
        Ok(())
    }

    async fn unsubscribe_by_id(&self, id: Uuid) -> Result<()> {
        let topic = self.topic_by_id.write().remove(&id);
        if let Some(topic) = topic {
            if let Some(subs) = self.callbacks.write().get_mut(&topic) {
                subs.retain(|sub| sub.id != id);
            }
        }
        Ok(())
    }
}

/// Network-backed event bus using Postgres `LISTEN`/`NOTIFY`.
///
/// `publish` fires `pg_notify(topic, payload)`; `subscribe` opens a dedicated
/// `PgListener` per subscription and forwards notifications to the callback
/// on its own task, so one slow/stuck callback can't starve other topics.
/// This is the selectable backend behind `event.driver = "postgres"` —
/// distinct from the in-process default, it works across multiple runtime
/// instances sharing the same database.
pub struct SqlEventBus {
    pool: sqlx::PgPool,
    tasks: Arc<DashMap<Uuid, tokio::task::AbortHandle>>,
    topics_by_id: Arc<DashMap<Uuid, String>>,
}

impl SqlEventBus {
    /// Connect to Postgres and prepare the bus. Does not issue any `LISTEN`
    /// until a caller subscribes.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = sqlx::PgPool::connect(database_url)
            .await
            .map_err(|e| BeemFlowError::storage(format!("event bus connect failed: {}", e)))?;

        Ok(Self {
            pool,
            tasks: Arc::new(DashMap::new()),
            topics_by_id: Arc::new(DashMap::new()),
        })
    }
}

#[async_trait]
impl EventBus for SqlEventBus {
    async fn publish(&self, topic: &str, payload: Value) -> Result<()> {
        let payload_str = payload.to_string();
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(topic)
            .bind(payload_str)
            .execute(&self.pool)
            .await
            .map_err(|e| BeemFlowError::storage(format!("event publish failed: {}", e)))?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str, callback: EventCallback) -> Result<Uuid> {
        let mut listener = sqlx::postgres::PgListener::connect_with(&self.pool)
            .await
            .map_err(|e| BeemFlowError::storage(format!("event subscribe failed: {}", e)))?;
        listener
            .listen(topic)
            .await
            .map_err(|e| BeemFlowError::storage(format!("event listen failed: {}", e)))?;

        let id = Uuid::new_v4();
        let handle = tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        if let Ok(payload) = serde_json::from_str::<Value>(notification.payload())
                        {
                            callback(payload);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("event bus listener stopped: {}", e);
                        break;
                    }
                }
            }
        });

        self.tasks.insert(id, handle.abort_handle());
        self.topics_by_id.insert(id, topic.to_string());
        Ok(id)
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        let ids: Vec<Uuid> = self
            .topics_by_id
            .iter()
            .filter(|e| e.value() == topic)
            .map(|e| *e.key())
            .collect();
        for id in ids {
            self.unsubscribe_by_id(id).await?;
        }
        Ok(())
    }

    async fn unsubscribe_by_id(&self, id: Uuid) -> Result<()> {
        if let Some((_, handle)) = self.tasks.remove(&id) {
            handle.abort();
        }
        self.topics_by_id.remove(&id);
        Ok(())
    }
}

/// Create an event bus from configuration. Defaults to the in-process bus;
/// `driver = "postgres"` selects the network-backed `SqlEventBus`, connecting
/// to `url` (falling back to the storage DSN if the event config omits one).
pub async fn create_event_bus_from_config(
    config: &crate::config::Config,
) -> Result<Arc<dyn EventBus>> {
    let event_config = config.event.as_ref();
    match event_config.and_then(|e| e.driver.as_deref()) {
        Some("postgres") => {
            let url = event_config
                .and_then(|e| e.url.clone())
                .unwrap_or_else(|| config.storage.dsn.clone());
            Ok(Arc::new(SqlEventBus::new(&url).await?))
        }
        _ => Ok(Arc::new(InProcEventBus::new())),
    }
}

#[cfg(test)]
mod event_test;
