use crate::config::Config;
use crate::domain::Domain;
use crate::ingest::State;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde::Serialize;
use std::time::Duration;
use tokio::task::JoinHandle;

/// What subscribers of a tenant see after every accepted reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RealtimeUpdate {
    #[serde(skip)]
    pub tenant: String,
    pub domain: Domain,
    pub entity_id: String,
    pub state: State,
}

/// Fire-and-forget push to live subscribers of a tenant. Implementations never block the
/// caller and never retry.
pub trait RealtimePublisher: Send + Sync {
    fn publish(&self, update: &RealtimeUpdate);
}

pub fn realtime_topic(prefix: &str, update: &RealtimeUpdate) -> String {
    format!(
        "{prefix}/realtime/{}/{}/{}",
        update.tenant, update.domain, update.entity_id
    )
}

pub struct MqttRealtimePublisher {
    client: AsyncClient,
    topic_prefix: String,
}

impl MqttRealtimePublisher {
    pub fn new(config: &Config) -> (Self, JoinHandle<()>) {
        let mut options = MqttOptions::new(
            format!("{}-push", config.mqtt_client_id),
            config.mqtt_host.clone(),
            config.mqtt_port,
        );
        options.set_keep_alive(config.mqtt_keepalive());
        if let Some(username) = &config.mqtt_username {
            options.set_credentials(
                username.clone(),
                config.mqtt_password.clone().unwrap_or_default(),
            );
        }
        let (client, mut eventloop) = AsyncClient::new(options, 256);
        let handle = tokio::spawn(async move {
            loop {
                if let Err(err) = eventloop.poll().await {
                    tracing::warn!(error = %err, "realtime publisher event loop error");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        });
        (
            Self {
                client,
                topic_prefix: config.mqtt_topic_prefix.clone(),
            },
            handle,
        )
    }
}

impl RealtimePublisher for MqttRealtimePublisher {
    fn publish(&self, update: &RealtimeUpdate) {
        let payload = match serde_json::to_vec(update) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(entity = %update.entity_id, error = %err, "failed to encode realtime update");
                return;
            }
        };
        let topic = realtime_topic(&self.topic_prefix, update);
        if let Err(err) = self
            .client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
        {
            tracing::debug!(
                tenant = %update.tenant,
                entity = %update.entity_id,
                error = %err,
                "dropped realtime update"
            );
        }
    }
}
