//! Forwards what the conversation loop displays to the socket writer task.

use super::protocol::ServerMessage;
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use coach_core::conversation::{DisplaySink, Notice};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

pub struct ChannelSink {
    tx: mpsc::Sender<ServerMessage>,
    streaming: AtomicBool,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            tx,
            streaming: AtomicBool::new(false),
        }
    }

    async fn send(&self, msg: ServerMessage) {
        if self.tx.send(msg).await.is_err() {
            debug!("Socket writer gone; dropping outgoing message");
        }
    }
}

#[async_trait]
impl DisplaySink for ChannelSink {
    async fn fragment(&self, text: &str) {
        if !self.streaming.swap(true, Ordering::SeqCst) {
            self.send(ServerMessage::ResponseStart).await;
        }
        self.send(ServerMessage::ResponseChunk {
            chunk: text.to_string(),
        })
        .await;
    }

    async fn completed(&self, full_text: &str) {
        if !self.streaming.swap(false, Ordering::SeqCst) {
            self.send(ServerMessage::ResponseStart).await;
        }
        self.send(ServerMessage::ResponseEnd {
            text: full_text.to_string(),
        })
        .await;
    }

    async fn discarded(&self) {
        if self.streaming.swap(false, Ordering::SeqCst) {
            self.send(ServerMessage::ResponseDiscarded).await;
        }
    }

    async fn notice(&self, notice: Notice) {
        self.send(notice.into()).await;
    }

    async fn transcription(&self, text: &str) {
        self.send(ServerMessage::Transcription {
            text: text.to_string(),
        })
        .await;
    }

    async fn audio(&self, audio: Bytes) {
        let data = base64::engine::general_purpose::STANDARD.encode(&audio);
        self.send(ServerMessage::AudioChunk { data }).await;
    }
}
