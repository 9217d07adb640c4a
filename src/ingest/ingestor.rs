use super::engine;
use super::{IngestSettings, IngestStats, Reading, State, TelemetryIngestor};
use crate::publish::{RealtimePublisher, RealtimeUpdate};
use crate::store::{EntityKey, LiveStateStore};
use crate::telemetry::{parse_reading, TopicRoute};
use chrono::{DateTime, Utc};
use std::sync::Arc;

impl TelemetryIngestor {
    pub fn new(
        store: Arc<dyn LiveStateStore>,
        publisher: Arc<dyn RealtimePublisher>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            store,
            publisher,
            settings,
            stats: Arc::new(IngestStats::new()),
        }
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        self.stats.clone()
    }

    /// Normalizes a raw payload for `route` and folds it in. Malformed payloads are logged and
    /// dropped.
    pub async fn ingest_payload(
        &self,
        route: &TopicRoute,
        payload: &mut [u8],
        received_at: DateTime<Utc>,
    ) -> Option<State> {
        let reading = match parse_reading(route.domain.profile(), payload, received_at) {
            Ok(reading) => reading,
            Err(err) => {
                self.stats.record_dropped();
                tracing::warn!(
                    tenant = %route.tenant,
                    domain = %route.domain,
                    entity = %route.entity,
                    error = %err,
                    "dropping malformed reading"
                );
                return None;
            }
        };
        let key = EntityKey::new(route.tenant.clone(), route.domain, route.entity.clone());
        self.ingest_reading(&key, reading).await
    }

    /// Read, aggregate, commit, log and publish one reading. Store failures never stop the
    /// publish; a failed read also skips the commit so an unseen state is not overwritten.
    /// Returns `None` when the reading was dropped because a running total would overflow.
    pub async fn ingest_reading(&self, key: &EntityKey, reading: Reading) -> Option<State> {
        let settings = self.settings.for_domain(key.domain);
        let profile = key.domain.profile();

        let (previous, readable) = match self.store.get_state(key).await {
            Ok(previous) => (previous, true),
            Err(err) => {
                self.stats.record_store_error(err.to_string());
                tracing::warn!(entity = %key, error = %err, "live state read failed; not committing");
                (None, false)
            }
        };

        let mut state = match engine::aggregate(
            previous.as_ref(),
            &reading,
            profile,
            settings.connection_timeout_seconds,
        ) {
            Ok(state) => state,
            Err(err) => {
                self.stats.record_dropped();
                tracing::warn!(entity = %key, error = %err, "dropping reading");
                return None;
            }
        };

        if settings.window.is_enabled() {
            match self
                .store
                .append_window(key, state.stats.cumulative_count, settings.window.capacity())
                .await
            {
                Ok(buffer) => engine::apply_trailing_rate(&mut state.stats, &buffer, &settings.window),
                Err(err) => {
                    self.stats.record_store_error(err.to_string());
                    tracing::warn!(entity = %key, error = %err, "window append failed");
                }
            }
        }

        if readable {
            match self.store.contains(key).await {
                Ok(still_present) => {
                    if engine::restart_if_cleared(
                        &mut state.stats,
                        previous.is_some(),
                        still_present,
                        reading.received_at,
                    ) {
                        self.stats.record_window_restart();
                        tracing::info!(entity = %key, "live state cleared mid-update; restarting window");
                    }
                }
                Err(err) => {
                    self.stats.record_store_error(err.to_string());
                    tracing::warn!(entity = %key, error = %err, "live state re-read failed");
                }
            }

            if let Err(err) = self.store.put_state(key, &state).await {
                self.stats.record_store_error(err.to_string());
                tracing::warn!(entity = %key, error = %err, "failed to commit live state");
            }
        }

        if let Err(err) = self
            .store
            .push_reading(key, &state.connection_state.latest_reading, settings.reading_list_max)
            .await
        {
            self.stats.record_store_error(err.to_string());
            tracing::warn!(entity = %key, error = %err, "failed to append reading log");
        }

        self.publisher.publish(&RealtimeUpdate {
            tenant: key.tenant.clone(),
            domain: key.domain,
            entity_id: key.entity.clone(),
            state: state.clone(),
        });

        self.stats
            .record_accepted(reading.received_at.timestamp_millis());
        tracing::trace!(
            entity = %key,
            samples = state.stats.sample_count,
            rate_avg = state.stats.rate_avg,
            "reading aggregated"
        );
        Some(state)
    }
}
