//! Inbound event boundary with the execution backend.
//!
//! The backend pushes JSON payloads on four named channels. [`EventHub`] is the
//! in-process fan-out point for those payloads: a shell adapter forwards what
//! the backend emits with [`EventHub::emit_value`], and consumers register a
//! handler with [`EventHub::listen`] or [`EventHub::listen_all`], getting back
//! a [`Listener`] token that unsubscribes when closed or dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::track::{TrackError, TrackId, TrackStatus};

/// Event channel names used by the backend.
pub mod channels {
    /// Per-track status updates.
    pub const DOWNLOAD_PROGRESS: &str = "download-progress";
    /// Queue position updates ("3 of 12").
    pub const QUEUE_PROGRESS: &str = "queue-progress";
    /// Queue finished, with or without failures.
    pub const QUEUE_COMPLETE: &str = "queue-complete";
    /// Queue stopped by a user cancellation.
    pub const QUEUE_CANCELLED: &str = "queue-cancelled";
}

/// Default buffer size of the [`EventHub`].
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// A logical backend event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// `download-progress`
    DownloadProgress,
    /// `queue-progress`
    QueueProgress,
    /// `queue-complete`
    QueueComplete,
    /// `queue-cancelled`
    QueueCancelled,
}

impl Channel {
    /// Every channel, in subscription order.
    pub const ALL: [Self; 4] = [
        Self::DownloadProgress,
        Self::QueueProgress,
        Self::QueueComplete,
        Self::QueueCancelled,
    ];

    /// Wire name of the channel.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::DownloadProgress => channels::DOWNLOAD_PROGRESS,
            Self::QueueProgress => channels::QUEUE_PROGRESS,
            Self::QueueComplete => channels::QUEUE_COMPLETE,
            Self::QueueCancelled => channels::QUEUE_CANCELLED,
        }
    }

    /// Look up a channel by wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|channel| channel.name() == name)
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// `download-progress` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgressEvent {
    /// Track the update refers to.
    pub track_id: TrackId,
    /// New status.
    pub status: TrackStatus,
    /// Error details, normally only with `failed` or `rate_limited`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TrackError>,
}

/// `queue-progress` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueProgressEvent {
    /// 1-indexed position of the track being processed.
    pub current: u32,
    /// Live total reported by the backend.
    pub total: u32,
    /// Track at that position, when the backend includes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<TrackId>,
}

/// `queue-complete` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueCompleteEvent {
    /// Tracks that finished successfully.
    pub completed: u32,
    /// Tracks that failed.
    pub failed: u32,
    /// Total tracks in the run.
    pub total: u32,
    /// `(trackId, message)` for each failure.
    #[serde(default)]
    pub failed_tracks: Vec<(TrackId, String)>,
}

/// `queue-cancelled` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueCancelledEvent {
    /// Tracks that finished before the cancellation.
    pub completed: u32,
    /// Tracks that were never processed.
    pub cancelled: u32,
    /// Total tracks in the run, when the backend includes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u32>,
}

/// A decoded backend event.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// Per-track status update.
    DownloadProgress(DownloadProgressEvent),
    /// Queue position update.
    QueueProgress(QueueProgressEvent),
    /// Terminal completion.
    QueueComplete(QueueCompleteEvent),
    /// Terminal cancellation.
    QueueCancelled(QueueCancelledEvent),
}

impl BackendEvent {
    /// Channel this event travels on.
    #[must_use]
    pub const fn channel(&self) -> Channel {
        match self {
            Self::DownloadProgress(_) => Channel::DownloadProgress,
            Self::QueueProgress(_) => Channel::QueueProgress,
            Self::QueueComplete(_) => Channel::QueueComplete,
            Self::QueueCancelled(_) => Channel::QueueCancelled,
        }
    }

    /// Decode a raw payload received on `channel`.
    pub fn decode(channel: Channel, payload: Value) -> Result<Self> {
        Ok(match channel {
            Channel::DownloadProgress => Self::DownloadProgress(decode_payload(channel, payload)?),
            Channel::QueueProgress => Self::QueueProgress(decode_payload(channel, payload)?),
            Channel::QueueComplete => Self::QueueComplete(decode_payload(channel, payload)?),
            Channel::QueueCancelled => Self::QueueCancelled(decode_payload(channel, payload)?),
        })
    }

    /// Encode the payload as it appears on the wire.
    pub fn to_payload(&self) -> Result<Value> {
        let value = match self {
            Self::DownloadProgress(event) => serde_json::to_value(event)?,
            Self::QueueProgress(event) => serde_json::to_value(event)?,
            Self::QueueComplete(event) => serde_json::to_value(event)?,
            Self::QueueCancelled(event) => serde_json::to_value(event)?,
        };
        Ok(value)
    }
}

fn decode_payload<T: DeserializeOwned>(channel: Channel, payload: Value) -> Result<T> {
    serde_json::from_value(payload).map_err(|source| Error::EventDecode {
        channel: channel.name(),
        source,
    })
}

/// Fan-out hub for backend event payloads.
///
/// Every channel shares one ordered bus, so a listener covering several
/// channels sees payloads in the order they were emitted across all of them.
#[derive(Debug, Clone)]
pub struct EventHub {
    bus: broadcast::Sender<(Channel, Value)>,
    listeners: Arc<HashMap<Channel, AtomicUsize>>,
}

impl EventHub {
    /// Create a hub with the default buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_BUFFER)
    }

    /// Create a hub buffering up to `capacity` undelivered payloads.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (bus, _) = broadcast::channel(capacity.max(1));
        let listeners = Channel::ALL
            .into_iter()
            .map(|channel| (channel, AtomicUsize::new(0)))
            .collect();
        Self {
            bus,
            listeners: Arc::new(listeners),
        }
    }

    /// Forward a raw payload. Returns the number of listeners that will see it.
    pub fn emit_value(&self, channel: Channel, payload: Value) -> usize {
        let interested = self.listener_count(channel);
        if interested == 0 || self.bus.send((channel, payload)).is_err() {
            debug!("No listeners on '{}', dropping payload", channel);
            return 0;
        }
        interested
    }

    /// Serialize and forward a payload.
    pub fn emit<T: Serialize>(&self, channel: Channel, payload: &T) -> Result<usize> {
        let value = serde_json::to_value(payload)?;
        Ok(self.emit_value(channel, value))
    }

    /// Forward an already-typed backend event on its own channel.
    pub fn publish(&self, event: &BackendEvent) -> Result<usize> {
        Ok(self.emit_value(event.channel(), event.to_payload()?))
    }

    /// Number of active listeners on `channel`.
    #[must_use]
    pub fn listener_count(&self, channel: Channel) -> usize {
        self.listeners
            .get(&channel)
            .map_or(0, |count| count.load(Ordering::SeqCst))
    }

    /// Register `handler` for payloads on `channel`.
    ///
    /// Payloads are handed to the handler in emission order. Must be called from
    /// within a Tokio runtime. The handler must not close its own listener.
    pub fn listen<F>(&self, channel: Channel, handler: F) -> Listener
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.subscribe(vec![channel], move |_, payload| handler(payload))
    }

    /// Register one `handler` for every channel.
    ///
    /// A single task delivers all channels, so the handler observes payloads
    /// in the exact order they were emitted, whatever channel they came on.
    pub fn listen_all<F>(&self, handler: F) -> Listener
    where
        F: Fn(Channel, Value) + Send + Sync + 'static,
    {
        self.subscribe(Channel::ALL.to_vec(), handler)
    }

    fn subscribe<F>(&self, channels: Vec<Channel>, handler: F) -> Listener
    where
        F: Fn(Channel, Value) + Send + Sync + 'static,
    {
        let mut rx = self.bus.subscribe();
        let gate = Arc::new(ListenerGate::new());
        let task_gate = Arc::clone(&gate);
        let wanted = channels.clone();
        let label = describe(&channels);

        for channel in &channels {
            if let Some(count) = self.listeners.get(channel) {
                count.fetch_add(1, Ordering::SeqCst);
            }
        }

        let task_label = label.clone();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok((channel, payload)) => {
                        if !wanted.contains(&channel) {
                            continue;
                        }
                        if !task_gate.deliver(|| handler(channel, payload)) {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Listener on {} lagged, {} payloads skipped", task_label, skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Listener on {} stopped", task_label);
        });

        debug!("Listening on {}", label);
        Listener {
            channels,
            counts: Arc::clone(&self.listeners),
            gate,
            task: Some(task),
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

fn describe(channels: &[Channel]) -> String {
    if channels.len() == Channel::ALL.len() {
        return "all channels".to_string();
    }
    channels
        .iter()
        .map(|channel| format!("'{channel}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Open/closed switch shared between a [`Listener`] and its delivery task.
///
/// Delivery holds the read side for the duration of a handler call, closing
/// takes the write side, so once `close` returns no handler is running and
/// none will start.
#[derive(Debug)]
struct ListenerGate {
    open: RwLock<bool>,
}

impl ListenerGate {
    const fn new() -> Self {
        Self {
            open: RwLock::new(true),
        }
    }

    fn deliver(&self, f: impl FnOnce()) -> bool {
        let open = self.open.read().unwrap_or_else(PoisonError::into_inner);
        if *open {
            f();
        }
        *open
    }

    fn close(&self) {
        *self.open.write().unwrap_or_else(PoisonError::into_inner) = false;
    }

    fn is_open(&self) -> bool {
        *self.open.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Unsubscribe token returned by [`EventHub::listen`] and [`EventHub::listen_all`].
///
/// Closing (explicitly or by drop) waits for an in-flight handler call to
/// finish; afterwards the handler is never invoked again.
#[derive(Debug)]
pub struct Listener {
    channels: Vec<Channel>,
    counts: Arc<HashMap<Channel, AtomicUsize>>,
    gate: Arc<ListenerGate>,
    task: Option<JoinHandle<()>>,
}

impl Listener {
    /// Channels this listener is attached to.
    #[must_use]
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Whether the handler can still be invoked.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.gate.is_open()
    }

    /// Stop receiving payloads.
    pub fn unlisten(mut self) {
        self.close();
    }

    fn close(&mut self) {
        self.gate.close();
        if let Some(task) = self.task.take() {
            task.abort();
            for channel in &self.channels {
                if let Some(count) = self.counts.get(channel) {
                    count.fetch_sub(1, Ordering::SeqCst);
                }
            }
            debug!("Unlistened from {}", describe(&self.channels));
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::track::ErrorCode;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[test]
    fn test_channel_names_round_trip() {
        for channel in Channel::ALL {
            assert_eq!(Channel::from_name(channel.name()), Some(channel));
        }
        assert_eq!(Channel::from_name("device-connected"), None);
        assert_eq!(Channel::QueueComplete.to_string(), "queue-complete");
    }

    #[test]
    fn test_decode_download_progress_with_error() {
        let payload = serde_json::json!({
            "trackId": "123",
            "status": "failed",
            "error": { "code": "GEO_BLOCKED", "message": "Not available in your country" }
        });
        let event = BackendEvent::decode(Channel::DownloadProgress, payload).unwrap();
        match event {
            BackendEvent::DownloadProgress(progress) => {
                assert_eq!(progress.track_id, "123");
                assert_eq!(progress.status, TrackStatus::Failed);
                assert_eq!(progress.error.unwrap().code, ErrorCode::GeoBlocked);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_decode_tolerates_backend_extras() {
        let payload = serde_json::json!({ "current": 2, "total": 5, "trackId": "abc" });
        let event = BackendEvent::decode(Channel::QueueProgress, payload).unwrap();
        assert_eq!(
            event,
            BackendEvent::QueueProgress(QueueProgressEvent {
                current: 2,
                total: 5,
                track_id: Some("abc".to_string()),
            })
        );

        let payload = serde_json::json!({ "completed": 1, "cancelled": 3 });
        let event = BackendEvent::decode(Channel::QueueCancelled, payload).unwrap();
        assert!(matches!(
            event,
            BackendEvent::QueueCancelled(QueueCancelledEvent { total: None, .. })
        ));
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        let payload = serde_json::json!({ "current": "one" });
        let err = BackendEvent::decode(Channel::QueueProgress, payload).unwrap_err();
        assert!(matches!(err, Error::EventDecode { channel: "queue-progress", .. }));
    }

    #[test]
    fn test_queue_complete_payload_shape() {
        let event = BackendEvent::QueueComplete(QueueCompleteEvent {
            completed: 1,
            failed: 1,
            total: 2,
            failed_tracks: vec![("b".to_string(), "boom".to_string())],
        });
        let value = event.to_payload().unwrap();
        assert_eq!(value["failedTracks"][0][0], "b");
        assert_eq!(value["failedTracks"][0][1], "boom");
    }

    #[test]
    fn test_emit_without_listeners_is_dropped() {
        let hub = EventHub::new();
        assert_eq!(hub.emit_value(Channel::QueueProgress, Value::Null), 0);
    }

    #[tokio::test]
    async fn test_listen_delivers_in_order() {
        let hub = EventHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let listener = hub.listen(Channel::QueueProgress, move |payload| {
            sink.lock().unwrap().push(payload);
        });
        assert_eq!(hub.listener_count(Channel::QueueProgress), 1);

        for current in 1..=3 {
            hub.emit(
                Channel::QueueProgress,
                &QueueProgressEvent {
                    current,
                    total: 3,
                    track_id: None,
                },
            )
            .unwrap();
        }
        settle().await;

        let currents: Vec<u64> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|value| value["current"].as_u64().unwrap())
            .collect();
        assert_eq!(currents, vec![1, 2, 3]);
        assert!(listener.is_active());
        listener.unlisten();
    }

    #[tokio::test]
    async fn test_listen_all_keeps_order_across_channels() {
        let hub = EventHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let listener = hub.listen_all(move |channel, _| {
            sink.lock().unwrap().push(channel);
        });
        assert_eq!(listener.channels(), Channel::ALL.as_slice());
        for channel in Channel::ALL {
            assert_eq!(hub.listener_count(channel), 1);
        }

        let emitted = [
            Channel::QueueProgress,
            Channel::DownloadProgress,
            Channel::QueueProgress,
            Channel::DownloadProgress,
            Channel::QueueComplete,
            Channel::QueueCancelled,
        ];
        for channel in emitted {
            assert_eq!(hub.emit_value(channel, Value::Null), 1);
        }
        settle().await;

        assert_eq!(*seen.lock().unwrap(), emitted);
        listener.unlisten();
    }

    #[tokio::test]
    async fn test_single_channel_listener_ignores_other_channels() {
        let hub = EventHub::new();
        let seen = Arc::new(Mutex::new(0_usize));
        let sink = Arc::clone(&seen);

        let _listener = hub.listen(Channel::QueueComplete, move |_| {
            *sink.lock().unwrap() += 1;
        });

        assert_eq!(hub.emit_value(Channel::QueueProgress, Value::Null), 0);
        assert_eq!(hub.emit_value(Channel::QueueComplete, Value::Null), 1);
        settle().await;

        assert_eq!(*seen.lock().unwrap(), 1);
        assert_eq!(hub.listener_count(Channel::QueueProgress), 0);
    }

    #[tokio::test]
    async fn test_unlisten_stops_delivery() {
        let hub = EventHub::new();
        let seen = Arc::new(Mutex::new(0_usize));
        let sink = Arc::clone(&seen);

        let listener = hub.listen(Channel::QueueComplete, move |_| {
            *sink.lock().unwrap() += 1;
        });

        hub.emit_value(Channel::QueueComplete, Value::Null);
        settle().await;
        listener.unlisten();
        assert_eq!(hub.listener_count(Channel::QueueComplete), 0);

        hub.emit_value(Channel::QueueComplete, Value::Null);
        settle().await;

        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_closed_gate_refuses_queued_payloads() {
        let hub = EventHub::new();
        let seen = Arc::new(Mutex::new(0_usize));
        let sink = Arc::clone(&seen);

        let mut listener = hub.listen(Channel::DownloadProgress, move |_| {
            *sink.lock().unwrap() += 1;
        });

        // Queue payloads and close before the delivery task gets a chance to run.
        hub.emit_value(Channel::DownloadProgress, Value::Null);
        hub.emit_value(Channel::DownloadProgress, Value::Null);
        listener.close();
        settle().await;

        assert_eq!(*seen.lock().unwrap(), 0);
        assert!(!listener.is_active());
    }
}
