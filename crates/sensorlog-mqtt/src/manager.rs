//! Broker connection lifecycle.
//!
//! [`SubscriptionManager`] owns the MQTT connection. It drives the
//! `rumqttc` event loop, re-issues every topic filter on each ConnAck (the
//! session is clean, so subscriptions never survive a reconnect), forwards
//! publishes into the bounded ingest channel, and paces reconnects with
//! [`ReconnectBackoff`]. Connection errors are never fatal.

use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS, SubscribeFilter,
    SubscribeReasonCode,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::backoff::ReconnectBackoff;
use crate::error::TopicFilterError;
use crate::ingest::InboundMessage;
use crate::settings::BrokerSettings;
use crate::status::{BrokerStatus, StatusHandle};
use crate::topics::validate_topic_filters;

/// Requests (subscribe, disconnect) that may queue toward the event loop.
const REQUEST_CAPACITY: usize = 16;

/// How the receive loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Shutdown was requested.
    Shutdown,
    /// The ingest channel closed, so nothing could consume messages.
    SinkClosed,
}

/// Keeps the broker connection alive and feeds inbound messages to the
/// ingest channel.
#[derive(Debug)]
pub struct SubscriptionManager {
    settings: BrokerSettings,
    filters: Vec<String>,
    status: StatusHandle,
}

impl SubscriptionManager {
    /// Validates the filters and prepares a manager. Returns the manager and
    /// a receiver for its status.
    ///
    /// # Errors
    ///
    /// Returns `TopicFilterError` if `filters` is empty or malformed.
    pub fn new(
        settings: BrokerSettings,
        filters: Vec<String>,
    ) -> Result<(Self, watch::Receiver<BrokerStatus>), TopicFilterError> {
        validate_topic_filters(&filters)?;
        let (status, rx) = StatusHandle::new();
        Ok((
            Self {
                settings,
                filters,
                status,
            },
            rx,
        ))
    }

    /// Spawns the receive loop on the current runtime.
    ///
    /// The loop runs until `shutdown` carries `true` (or its sender is
    /// dropped) or until `sink` closes.
    ///
    /// # Errors
    ///
    /// Returns `TopicFilterError` if `filters` is empty or malformed.
    pub fn start(
        settings: BrokerSettings,
        filters: Vec<String>,
        sink: mpsc::Sender<InboundMessage>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(JoinHandle<StopReason>, watch::Receiver<BrokerStatus>), TopicFilterError> {
        let (manager, status) = Self::new(settings, filters)?;
        let handle = tokio::spawn(manager.run(sink, shutdown));
        Ok((handle, status))
    }

    fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.settings.client_id.clone(),
            self.settings.host.clone(),
            self.settings.port,
        );
        options.set_keep_alive(self.settings.keep_alive);
        options.set_clean_session(true);
        if let Some(credentials) = &self.settings.credentials {
            options.set_credentials(credentials.username.clone(), credentials.password.clone());
        }
        options
    }

    /// Runs the receive loop to completion.
    pub async fn run(
        self,
        sink: mpsc::Sender<InboundMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) -> StopReason {
        let (client, mut eventloop) = AsyncClient::new(self.mqtt_options(), REQUEST_CAPACITY);
        let mut backoff = ReconnectBackoff::new(self.settings.backoff_min, self.settings.backoff_max);

        tracing::info!(
            host = %self.settings.host,
            port = self.settings.port,
            client_id = %self.settings.client_id,
            authenticated = self.settings.credentials.is_some(),
            filters = ?self.filters,
            "connecting to broker"
        );
        self.status.connecting();

        let reason = loop {
            let polled = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break StopReason::Shutdown,
                polled = eventloop.poll() => polled,
            };

            match polled {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    backoff.reset();
                    self.subscribe_all(&client);
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    let rejected = ack
                        .return_codes
                        .iter()
                        .filter(|code| matches!(code, SubscribeReasonCode::Failure))
                        .count();
                    if rejected < ack.return_codes.len() {
                        self.status.subscribed();
                        tracing::info!(
                            pkid = ack.pkid,
                            filters = ?self.filters,
                            "subscribed to topic filters"
                        );
                    } else {
                        self.status.rejected("broker rejected every topic filter".to_string());
                    }
                    if rejected > 0 {
                        tracing::warn!(pkid = ack.pkid, rejected, "broker rejected topic filters");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = InboundMessage::new(publish.topic, publish.payload);
                    // A full channel parks the loop here, which stops reading
                    // from the socket until the ingestor catches up.
                    let sent = tokio::select! {
                        biased;
                        _ = shutdown_requested(&mut shutdown) => break StopReason::Shutdown,
                        sent = sink.send(message) => sent,
                    };
                    if sent.is_err() {
                        tracing::warn!("ingest channel closed, stopping receive loop");
                        break StopReason::SinkClosed;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    let delay = backoff.next_delay();
                    self.status.connection_lost(e.to_string());
                    tracing::warn!(
                        error = %e,
                        backoff_ms = delay.as_millis() as u64,
                        host = %self.settings.host,
                        "broker connection lost, reconnecting after backoff"
                    );
                    if is_fatal_for_session(&e) {
                        tracing::error!(error = %e, "broker refused the connection");
                    }
                    tokio::select! {
                        biased;
                        _ = shutdown_requested(&mut shutdown) => break StopReason::Shutdown,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    self.status.connecting();
                }
            }
        };

        disconnect(&client, &mut eventloop).await;
        self.status.stopped();
        tracing::info!(reason = ?reason, "broker receive loop stopped");
        reason
    }

    fn subscribe_all(&self, client: &AsyncClient) {
        let filters = self
            .filters
            .iter()
            .map(|filter| SubscribeFilter::new(filter.clone(), QoS::AtMostOnce));

        match client.try_subscribe_many(filters) {
            Ok(()) => tracing::debug!(filters = ?self.filters, "subscription request queued"),
            Err(e) => {
                // Dropping the request means no traffic will arrive; the
                // next connection error brings us back through ConnAck.
                self.status.connection_lost(e.to_string());
                tracing::error!(error = %e, "failed to queue subscriptions");
            }
        }
    }
}

/// Resolves once shutdown has been requested or the signal sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn is_fatal_for_session(error: &ConnectionError) -> bool {
    matches!(error, ConnectionError::ConnectionRefused(_))
}

/// Sends DISCONNECT and gives the event loop a moment to flush it.
async fn disconnect(client: &AsyncClient, eventloop: &mut EventLoop) {
    if client.try_disconnect().is_err() {
        return;
    }
    let flush = async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    };
    if tokio::time::timeout(std::time::Duration::from_millis(500), flush)
        .await
        .is_err()
    {
        tracing::debug!("broker disconnect not acknowledged before timeout");
    }
}
