use std::{
    io,
    pin::Pin,
    sync::{Arc, Mutex, Weak},
    task::{Context, Poll},
};

use futures::Stream;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::BroadcastMessage;

/// Destination for forwarded pipeline messages.
pub trait BridgeSink: Send + Sync {
    fn write_line(&self, line: &str) -> io::Result<()>;

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(rename = "structuredData")]
    structured_data: &'a BroadcastMessage,
}

fn same_sink(a: &Arc<dyn BridgeSink>, b: &Arc<dyn BridgeSink>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Single-slot reference to the bridge session that receives forwarded messages.
///
/// The last attached sink wins; a session that ends only clears the slot if it
/// still owns it.
#[derive(Clone, Default)]
pub struct ActiveBridge {
    current: Arc<Mutex<Option<Arc<dyn BridgeSink>>>>,
}

impl ActiveBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `sink`, returning the sink it replaced.
    pub fn attach(&self, sink: Arc<dyn BridgeSink>) -> Option<Arc<dyn BridgeSink>> {
        let mut slot = self.current.lock().unwrap_or_else(|e| e.into_inner());
        let previous = slot.replace(sink);
        if previous.is_some() {
            tracing::info!("Bridge session replaced by a newer session");
        }
        previous
    }

    /// Clears the slot if `sink` is still the active one.
    pub fn detach(&self, sink: &Arc<dyn BridgeSink>) -> bool {
        let mut slot = self.current.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some(active) if same_sink(active, sink) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// Writes `{"structuredData": message}` plus a newline to the active sink.
    /// Returns false when no sink is attached or the write failed.
    pub fn forward(&self, message: &BroadcastMessage) -> bool {
        let sink = match self.current.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            Some(sink) => sink,
            None => return false,
        };
        let line = match serde_json::to_string(&Envelope { structured_data: message }) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to serialize bridge message: {}", e);
                return false;
            }
        };
        if let Err(e) = sink.write_line(&line).and_then(|_| sink.flush()) {
            tracing::warn!("Failed to forward message to bridge: {}", e);
            return false;
        }
        true
    }
}

/// Sink backed by a bounded channel, drained by an HTTP streaming response.
pub struct ChannelSink {
    tx: mpsc::Sender<String>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl BridgeSink for ChannelSink {
    fn write_line(&self, line: &str) -> io::Result<()> {
        match self.tx.try_send(format!("{}\n", line)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(io::Error::new(io::ErrorKind::WouldBlock, "bridge buffer full")),
            Err(TrySendError::Closed(_)) => Err(io::Error::new(io::ErrorKind::BrokenPipe, "bridge closed")),
        }
    }
}

/// Stream of newline-terminated JSON lines for one bridge session.
///
/// The bridge slot owns the only strong reference to the session's sink. Once a
/// newer session replaces it, the sink and its sender are dropped and this
/// stream ends after the lines already buffered. Dropping the session detaches
/// its sink if it is still the active one.
pub struct BridgeSession {
    rx: mpsc::Receiver<String>,
    sink: Weak<dyn BridgeSink>,
    bridge: ActiveBridge,
}

impl BridgeSession {
    pub fn open(bridge: &ActiveBridge, capacity: usize) -> Self {
        let (sink, rx) = ChannelSink::new(capacity);
        let sink: Arc<dyn BridgeSink> = Arc::new(sink);
        let weak = Arc::downgrade(&sink);
        bridge.attach(sink);
        Self { rx, sink: weak, bridge: bridge.clone() }
    }
}

impl Stream for BridgeSession {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for BridgeSession {
    fn drop(&mut self) {
        // Superseded sessions no longer have a sink to detach
        let Some(sink) = self.sink.upgrade() else { return };
        if self.bridge.detach(&sink) {
            tracing::info!("Bridge session closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        lines: Mutex<Vec<String>>,
        flushes: Mutex<usize>,
    }

    impl BridgeSink for Recorder {
        fn write_line(&self, line: &str) -> io::Result<()> {
            self.lines.lock().unwrap().push(line.to_string());
            Ok(())
        }

        fn flush(&self) -> io::Result<()> {
            *self.flushes.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[test]
    fn forward_without_sink_is_noop() {
        let bridge = ActiveBridge::new();
        assert!(!bridge.forward(&BroadcastMessage::new("symlink_created", json!({}))));
    }

    #[test]
    fn forward_wraps_and_flushes() {
        let bridge = ActiveBridge::new();
        let rec = Arc::new(Recorder::default());
        bridge.attach(rec.clone());

        let msg = BroadcastMessage::new("symlink_created", json!({"media_name": "Heat"}));
        assert!(bridge.forward(&msg));

        let lines = rec.lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        let v: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(v["structuredData"]["type"], "symlink_created");
        assert_eq!(v["structuredData"]["data"]["media_name"], "Heat");
        assert_eq!(*rec.flushes.lock().unwrap(), 1);
    }

    #[test]
    fn last_attached_wins_and_stale_detach_is_ignored() {
        let bridge = ActiveBridge::new();
        let first: Arc<dyn BridgeSink> = Arc::new(Recorder::default());
        let second_rec = Arc::new(Recorder::default());
        let second: Arc<dyn BridgeSink> = second_rec.clone();

        assert!(bridge.attach(first.clone()).is_none());
        assert!(bridge.attach(second.clone()).is_some());
        assert!(!bridge.detach(&first));
        assert!(bridge.is_active());

        bridge.forward(&BroadcastMessage::new("x", json!({})));
        assert_eq!(second_rec.lines.lock().unwrap().len(), 1);

        assert!(bridge.detach(&second));
        assert!(!bridge.is_active());
    }

    #[tokio::test]
    async fn session_streams_lines_and_detaches_on_drop() {
        let bridge = ActiveBridge::new();
        let mut session = BridgeSession::open(&bridge, 8);
        assert!(bridge.is_active());

        bridge.forward(&BroadcastMessage::new("x", json!({})));
        let line = session.rx.recv().await.unwrap();
        assert!(line.ends_with('\n'));
        assert!(line.starts_with("{\"structuredData\""));

        drop(session);
        assert!(!bridge.is_active());
    }

    #[tokio::test]
    async fn replaced_session_ends_after_draining() {
        let bridge = ActiveBridge::new();
        let mut first = BridgeSession::open(&bridge, 8);
        bridge.forward(&BroadcastMessage::new("before", json!({})));

        let mut second = BridgeSession::open(&bridge, 8);
        bridge.forward(&BroadcastMessage::new("after", json!({})));

        // The line buffered before the switch is still delivered, then the stream ends
        assert!(first.rx.recv().await.unwrap().contains("before"));
        assert!(first.rx.recv().await.is_none());
        drop(first);

        assert!(bridge.is_active());
        assert!(second.rx.recv().await.unwrap().contains("after"));
        drop(second);
        assert!(!bridge.is_active());
    }
}
