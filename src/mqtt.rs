use crate::config::Config;
use crate::domain::Domain;
use crate::ingest::TelemetryIngestor;
use crate::telemetry::parse_topic;
use anyhow::Result;
use chrono::Utc;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const SUMMARY_INTERVAL: Duration = Duration::from_secs(60);

pub fn subscription_filters(topic_prefix: &str) -> Vec<String> {
    Domain::ALL
        .iter()
        .map(|domain| format!("{topic_prefix}/{domain}/+/+"))
        .collect()
}

pub async fn run_listener(
    config: Config,
    ingestor: TelemetryIngestor,
    cancel: CancellationToken,
) -> Result<()> {
    let filters = subscription_filters(&config.mqtt_topic_prefix);
    let stats = ingestor.stats();
    let mut summary_tick = interval(SUMMARY_INTERVAL);
    summary_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    'connect: loop {
        if cancel.is_cancelled() {
            break;
        }
        let mut mqttoptions = MqttOptions::new(
            config.mqtt_client_id.clone(),
            config.mqtt_host.clone(),
            config.mqtt_port,
        );
        mqttoptions.set_keep_alive(config.mqtt_keepalive());
        if let Some(username) = &config.mqtt_username {
            mqttoptions.set_credentials(
                username.clone(),
                config.mqtt_password.clone().unwrap_or_default(),
            );
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 64);
        for filter in &filters {
            if let Err(err) = client.subscribe(filter.clone(), QoS::AtLeastOnce).await {
                tracing::warn!(topic = %filter, error = %err, "failed to subscribe to MQTT; retrying");
                stats.set_mqtt_connected(false);
                sleep(Duration::from_secs(2)).await;
                continue 'connect;
            }
            tracing::info!(topic = %filter, "subscribed to telemetry feed");
        }

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = client.disconnect().await;
                    stats.set_mqtt_connected(false);
                    break 'connect;
                }
                _ = summary_tick.tick() => {
                    stats.log_summary();
                    continue;
                }
                event = eventloop.poll() => event,
            };
            match event {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    stats.set_mqtt_connected(true);
                    stats.clear_error();
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    let received_at = Utc::now();
                    let Some(route) = parse_topic(&config.mqtt_topic_prefix, &publish.topic) else {
                        tracing::debug!(topic = %publish.topic, "ignoring message on unrecognised topic");
                        continue;
                    };
                    let mut payload = publish.payload.to_vec();
                    ingestor
                        .ingest_payload(&route, &mut payload, received_at)
                        .await;
                }
                Ok(_) => {}
                Err(err) => {
                    stats.set_mqtt_connected(false);
                    stats.record_error(err.to_string());
                    tracing::warn!(error = %err, "MQTT connection dropped; reconnecting");
                    break;
                }
            }
        }

        sleep(Duration::from_secs(1)).await;
    }

    tracing::info!("MQTT listener stopped");
    Ok(())
}
