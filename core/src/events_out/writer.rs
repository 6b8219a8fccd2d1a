use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

use crate::config::EventsOutConfig;

fn audit_preview(s: &str) -> String {
    const MAX: usize = 120;
    if s.len() <= MAX {
        return s.to_string();
    }
    let end = s
        .char_indices()
        .take_while(|(i, _)| *i < MAX)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    let mut out = s[..end].to_string();
    out.push('…');
    out
}

enum Message {
    Line(String),
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
enum Sender {
    /// Lossy: lines are dropped (and counted) when the channel is full.
    Bounded(mpsc::Sender<Message>),
    Unbounded(mpsc::UnboundedSender<Message>),
}

/// Handle to the background JSONL writer. Sending never blocks.
#[derive(Clone)]
pub struct EventsOutTx {
    tx: Sender,
    dropped: Arc<AtomicU64>,
}

impl EventsOutTx {
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn send_line(&self, line: String) {
        let sent = match &self.tx {
            Sender::Bounded(tx) => tx.try_send(Message::Line(line)).is_ok(),
            Sender::Unbounded(tx) => tx.send(Message::Line(line)).is_ok(),
        };
        if !sent {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Wait until every line queued before this call has been written.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        let queued = match &self.tx {
            Sender::Bounded(tx) => tx.send(Message::Flush(ack)).await.is_ok(),
            Sender::Unbounded(tx) => tx.send(Message::Flush(ack)).is_ok(),
        };
        if queued {
            let _ = done.await;
        }
    }
}

pub async fn start_events_out(cfg: &EventsOutConfig) -> Result<Option<EventsOutTx>, String> {
    if !cfg.enabled || cfg.path.trim().is_empty() {
        return Ok(None);
    }

    let path = cfg.path.clone();
    let mut writer: Box<dyn tokio::io::AsyncWrite + Unpin + Send> = if path == "stdout:" {
        Box::new(tokio::io::stdout())
    } else {
        if let Some(parent) = std::path::Path::new(&path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| format!("events_out: create {}: {e}", parent.display()))?;
            }
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| format!("events_out: open {path}: {e}"))?;
        Box::new(file)
    };

    let (tx, mut rx) = if cfg.drop_when_full {
        let (tx, rx) = mpsc::channel::<Message>(cfg.channel_capacity.max(1));
        (Sender::Bounded(tx), Receiver::Bounded(rx))
    } else {
        let (tx, rx) = mpsc::unbounded_channel::<Message>();
        (Sender::Unbounded(tx), Receiver::Unbounded(rx))
    };

    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg {
                Message::Line(mut line) => {
                    if !line.ends_with('\n') {
                        line.push('\n');
                    }
                    if path == "stdout:" {
                        tracing::trace!(
                            target: "weft.stdout_audit",
                            kind = "events_out",
                            bytes = line.len(),
                            preview = %audit_preview(line.trim_end())
                        );
                    }
                    if writer.write_all(line.as_bytes()).await.is_err() {
                        return;
                    }
                }
                Message::Flush(ack) => {
                    let _ = writer.flush().await;
                    let _ = ack.send(());
                }
            }
        }

        let _ = writer.flush().await;
    });

    Ok(Some(EventsOutTx {
        tx,
        dropped: Arc::new(AtomicU64::new(0)),
    }))
}

enum Receiver {
    Bounded(mpsc::Receiver<Message>),
    Unbounded(mpsc::UnboundedReceiver<Message>),
}

impl Receiver {
    async fn recv(&mut self) -> Option<Message> {
        match self {
            Self::Bounded(rx) => rx.recv().await,
            Self::Unbounded(rx) => rx.recv().await,
        }
    }
}
