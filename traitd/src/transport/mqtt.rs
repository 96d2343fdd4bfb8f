// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! MQTT binding of the transport traits, built on the synchronous
//! `rumqttc` client. Plain TCP, clean sessions.
//!
//! Listener and trait sender each own a separate client connection (client
//! ids get a `-sub` / `-pub` suffix), so a stalled publish never delays the
//! receive path.

use std::time::{Duration, Instant};

use log::{debug, info, trace};
use rumqttc::{
    Client, ConnectReturnCode, Connection, ConnectionError, Event, MqttOptions, Outgoing, Packet,
    QoS, RecvTimeoutError, SubscribeReasonCode,
};

use crate::config::{BrokerConfig, QosLevel};
use crate::message::TraitItem;
use crate::shutdown::deadline_after;
use crate::transport::{Publication, Publisher, Subscriber, TransportError};

/// Capacity of the request channel between client handle and event loop.
const REQUEST_CAPACITY: usize = 64;

/// How long `idle()` drives the event loop to flush pings and acks.
const IDLE_DRAIN: Duration = Duration::from_millis(10);

impl From<QosLevel> for QoS {
    fn from(level: QosLevel) -> Self {
        match level {
            QosLevel::AtMostOnce => QoS::AtMostOnce,
            QosLevel::AtLeastOnce => QoS::AtLeastOnce,
            QosLevel::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

impl From<ConnectionError> for TransportError {
    fn from(e: ConnectionError) -> Self {
        match e {
            ConnectionError::ConnectionRefused(code) => refused(code),
            ConnectionError::NetworkTimeout => TransportError::Timeout,
            other => TransportError::Disconnected(other.to_string()),
        }
    }
}

fn refused(code: ConnectReturnCode) -> TransportError {
    let reason = format!("broker refused the connection: {code:?}");
    match code {
        ConnectReturnCode::ServiceUnavailable => TransportError::Disconnected(reason),
        _ => TransportError::Config(reason),
    }
}

fn lost(reason: &str) -> TransportError {
    TransportError::Disconnected(reason.to_string())
}

/// Topics we publish to must be concrete, i.e. without wildcards.
fn check_publish_topic(topic: &str) -> Result<(), TransportError> {
    if topic.is_empty() || topic.contains(&['+', '#', '\0'][..]) {
        return Err(TransportError::Malformed(format!(
            "cannot publish to topic {topic:?}"
        )));
    }
    Ok(())
}

struct Session {
    client: Client,
    connection: Connection,
}

impl Session {
    fn open(config: &BrokerConfig, client_id: String) -> Result<Self, TransportError> {
        debug!(
            "Connecting to mqtt://{}:{} as {client_id}",
            config.host, config.port
        );
        let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
        options.set_keep_alive(config.keep_alive);
        options.set_clean_session(true);

        let (client, mut connection) = Client::new(options, REQUEST_CAPACITY);
        await_connack(&mut connection, config.connect_timeout)?;
        Ok(Self { client, connection })
    }

    fn next_publication(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Publication>, TransportError> {
        match self.connection.recv_timeout(timeout) {
            Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => Ok(Some(Publication {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            })),
            Ok(Ok(Event::Incoming(Packet::SubAck(ack)))) => {
                if ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure))
                {
                    return Err(TransportError::Config(
                        "broker rejected a subscription".into(),
                    ));
                }
                debug!("Subscriptions acknowledged: {:?}", ack.return_codes);
                Ok(None)
            }
            Ok(Ok(Event::Incoming(Packet::Disconnect))) => Err(lost("broker closed the session")),
            Ok(Ok(event)) => {
                trace!("{event:?}");
                Ok(None)
            }
            Ok(Err(e)) => Err(e.into()),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(lost("event loop ended")),
        }
    }

    fn publish(
        &mut self,
        item: &TraitItem,
        qos: QoS,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        self.client
            .try_publish(item.topic.as_str(), qos, item.retain, item.payload.clone())
            .map_err(|e| TransportError::Disconnected(format!("cannot queue publish: {e}")))?;

        // Drive the event loop until the broker has the message.
        let deadline = deadline_after(timeout);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::Timeout);
            }
            match self.connection.recv_timeout(remaining) {
                Ok(Ok(Event::Outgoing(Outgoing::Publish(_)))) if qos == QoS::AtMostOnce => {
                    return Ok(())
                }
                Ok(Ok(Event::Incoming(Packet::PubAck(_)))) if qos == QoS::AtLeastOnce => {
                    return Ok(())
                }
                Ok(Ok(Event::Incoming(Packet::PubComp(_)))) => return Ok(()),
                Ok(Ok(Event::Incoming(Packet::Disconnect))) => {
                    return Err(lost("broker closed the session"))
                }
                Ok(Ok(event)) => trace!("{event:?}"),
                Ok(Err(e)) => return Err(e.into()),
                Err(RecvTimeoutError::Timeout) => return Err(TransportError::Timeout),
                Err(RecvTimeoutError::Disconnected) => return Err(lost("event loop ended")),
            }
        }
    }

    /// Lets the event loop send pings and process acks.
    fn drain(&mut self, window: Duration) -> Result<(), TransportError> {
        loop {
            match self.connection.recv_timeout(window) {
                Ok(Ok(Event::Incoming(Packet::Disconnect))) => {
                    return Err(lost("broker closed the session"))
                }
                Ok(Ok(event)) => trace!("{event:?}"),
                Ok(Err(e)) => return Err(e.into()),
                Err(RecvTimeoutError::Timeout) => return Ok(()),
                Err(RecvTimeoutError::Disconnected) => return Err(lost("event loop ended")),
            }
        }
    }
}

fn await_connack(connection: &mut Connection, timeout: Duration) -> Result<(), TransportError> {
    let deadline = deadline_after(timeout);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(TransportError::Timeout);
        }
        match connection.recv_timeout(remaining) {
            Ok(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(refused(code)),
                };
            }
            Ok(Ok(event)) => trace!("{event:?}"),
            Ok(Err(e)) => return Err(e.into()),
            Err(RecvTimeoutError::Timeout) => return Err(TransportError::Timeout),
            Err(RecvTimeoutError::Disconnected) => return Err(lost("event loop ended")),
        }
    }
}

/// Listener side: subscribes to every configured topic on each connect.
pub struct MqttSubscriber {
    config: BrokerConfig,
    session: Option<Session>,
}

impl MqttSubscriber {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }
}

impl Subscriber for MqttSubscriber {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.session = None;
        let mut session = Session::open(&self.config, format!("{}-sub", self.config.client_id))?;
        let qos = QoS::from(self.config.qos);
        for topic in &self.config.topics {
            session
                .client
                .try_subscribe(topic.as_str(), qos)
                .map_err(|e| TransportError::Disconnected(format!("subscribe {topic}: {e}")))?;
        }
        info!(
            "Connected to mqtt://{}:{}, subscribed to {:?}",
            self.config.host, self.config.port, self.config.topics
        );
        self.session = Some(session);
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Result<Option<Publication>, TransportError> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| lost("not connected"))?;
        let result = session.next_publication(timeout);
        if let Err(e) = &result {
            if !matches!(e, TransportError::Malformed(_)) {
                self.session = None;
            }
        }
        result
    }
}

/// Trait sender side.
pub struct MqttPublisher {
    config: BrokerConfig,
    session: Option<Session>,
}

impl MqttPublisher {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }
}

impl Publisher for MqttPublisher {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.session = None;
        let session = Session::open(&self.config, format!("{}-pub", self.config.client_id))?;
        info!(
            "Connected to mqtt://{}:{} for publishing",
            self.config.host, self.config.port
        );
        self.session = Some(session);
        Ok(())
    }

    fn publish(&mut self, item: &TraitItem) -> Result<(), TransportError> {
        check_publish_topic(&item.topic)?;
        let qos = QoS::from(self.config.qos);
        let timeout = self.config.publish_timeout;
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| lost("not connected"))?;
        let result = session.publish(item, qos, timeout);
        if result.is_err() {
            self.session = None;
        }
        result
    }

    fn idle(&mut self) -> Result<(), TransportError> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| lost("not connected"))?;
        let result = session.drain(IDLE_DRAIN);
        if result.is_err() {
            self.session = None;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_topics_cannot_be_published_to() {
        assert!(check_publish_topic("devices/1/traits").is_ok());
        assert!(matches!(
            check_publish_topic("devices/+/traits"),
            Err(TransportError::Malformed(_))
        ));
        assert!(check_publish_topic("devices/#").is_err());
        assert!(check_publish_topic("").is_err());
    }

    #[test]
    fn refused_connections_are_classified() {
        assert!(refused(ConnectReturnCode::ServiceUnavailable).is_transient());
        assert!(!refused(ConnectReturnCode::NotAuthorized).is_transient());
        assert!(!refused(ConnectReturnCode::BadClientId).is_transient());
    }

    #[test]
    fn publishing_without_a_session_is_a_disconnect() {
        let mut publisher = MqttPublisher::new(BrokerConfig::default());
        let err = publisher
            .publish(&TraitItem::new("devices/1", "on"))
            .unwrap_err();
        assert!(matches!(err, TransportError::Disconnected(_)));
    }
}
