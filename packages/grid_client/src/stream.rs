//! Push stream consumer: owns a session's inbound channel, demultiplexes
//! sentinel-delimited frames and feeds the replies to the session.

use chrono::Utc;
use futures::StreamExt;
use grid_protocol::{FrameDecoder, Reply};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::session::SessionContext;
use crate::transport::GatewayTransport;

/// Counters for one run of the consumer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub replies: usize,
    pub malformed: usize,
    /// Bytes left without a closing sentinel when the stream ended.
    pub trailing_bytes: usize,
    pub cancelled: bool,
}

pub struct PushStreamConsumer<T: GatewayTransport> {
    session: SessionContext<T>,
    cancel: CancellationToken,
}

/// Clears the session's streaming flag on every exit path.
struct StreamingGuard<'a, T: GatewayTransport>(&'a SessionContext<T>);

impl<T: GatewayTransport> Drop for StreamingGuard<'_, T> {
    fn drop(&mut self) {
        self.0.set_streaming(false);
    }
}

impl<T: GatewayTransport> PushStreamConsumer<T> {
    pub fn new(session: SessionContext<T>) -> Self {
        Self::with_cancellation(session, CancellationToken::new())
    }

    pub fn with_cancellation(session: SessionContext<T>, cancel: CancellationToken) -> Self {
        Self { session, cancel }
    }

    pub fn session(&self) -> &SessionContext<T> {
        &self.session
    }

    /// Token that stops [`run`](Self::run) when cancelled.
    pub fn stop_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Open the push channel and consume it until it ends, fails or is stopped.
    ///
    /// The liveness ping and the timeout sweep run only while this does; the
    /// channel is dropped, and so released, on every return path.
    pub async fn run(&self) -> Result<StreamSummary, TransportError> {
        let session = &self.session;
        let config = session.config();
        let db_name = session.state().await.db_name().to_string();

        session.set_streaming(true);
        let _streaming = StreamingGuard(session);

        let mut frames = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Ok(StreamSummary { cancelled: true, ..Default::default() });
            }
            opened = session.transport().open_push_channel(&db_name, session.session_id()) => opened?,
        };
        info!(session = %session.session_id(), db = %db_name, "streaming started");

        let mut heartbeat = interval_at(
            Instant::now() + config.heartbeat_interval,
            config.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep = interval_at(
            Instant::now() + config.timeout_check_interval,
            config.timeout_check_interval,
        );
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut decoder = FrameDecoder::new();
        let mut summary = StreamSummary::default();
        let mut failure = None;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    summary.cancelled = true;
                    break;
                }
                _ = heartbeat.tick() => {
                    let outcome = session.heartbeat().await;
                    if !outcome.is_sent() {
                        debug!(session = %session.session_id(), ?outcome, "heartbeat not sent");
                    }
                }
                _ = sweep.tick() => {
                    session.sweep_timeouts().await;
                }
                chunk = frames.next() => match chunk {
                    Some(Ok(bytes)) => {
                        for parsed in decoder.push(&bytes) {
                            match parsed {
                                Ok(reply) => {
                                    self.handle_reply(reply).await;
                                    summary.replies += 1;
                                }
                                Err(e) => {
                                    warn!(
                                        session = %session.session_id(),
                                        len = e.frame_len(),
                                        "dropping malformed frame: {e}"
                                    );
                                    summary.malformed += 1;
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        failure = Some(e);
                        break;
                    }
                    None => break,
                },
            }
        }

        drop(frames);
        summary.trailing_bytes = decoder.finish();
        if summary.trailing_bytes > 0 {
            debug!(
                session = %session.session_id(),
                bytes = summary.trailing_bytes,
                "discarding unterminated frame"
            );
        }

        match failure {
            Some(e) => {
                warn!(session = %session.session_id(), "streaming stopped: {e}");
                Err(e)
            }
            None => {
                info!(
                    session = %session.session_id(),
                    replies = summary.replies,
                    cancelled = summary.cancelled,
                    "streaming stopped"
                );
                Ok(summary)
            }
        }
    }

    async fn handle_reply(&self, mut reply: Reply) {
        let now = Utc::now();
        reply.elapsed_ms = reply.elapsed_since_initiation(now);
        reply.received_at = Some(now);
        reply.same_session = reply.session_id.as_deref() == Some(self.session.session_id());
        debug!(
            session = %self.session.session_id(),
            command = %reply.command,
            request = reply.request_id.as_deref().unwrap_or("-"),
            elapsed_ms = reply.elapsed_ms,
            "[<] {:?}",
            reply.status
        );
        self.session.reconcile(reply.clone()).await;
        self.session.apply_reply(&reply).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::ledger::LedgerEntry;
    use crate::test_helpers::{RecordingTransport, data_set, valid_token};
    use grid_protocol::{CommandKind, FRAME_SENTINEL, Request, Status, encode_frame};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn consumer() -> (PushStreamConsumer<RecordingTransport>, mpsc::UnboundedSender<Vec<u8>>) {
        let (transport, frames) = RecordingTransport::with_push_channel();
        let session = SessionContext::with_session_id(ClientConfig::for_tenant("Demo"), transport, "s1");
        (PushStreamConsumer::new(session), frames)
    }

    fn frame(reply: &Reply) -> Vec<u8> {
        encode_frame(&reply.to_json().unwrap())
    }

    #[tokio::test]
    async fn frames_split_across_chunks_are_reconciled() {
        let (consumer, frames) = consumer();
        consumer.session().restore_credential(&valid_token()).await.unwrap();

        let mut load = Reply::new(CommandKind::Load, Status::Success).with_data_set(data_set("g1", None, 2));
        load.session_id = Some("s1".to_string());
        let mut bytes = frame(&Reply::initialization("s1"));
        bytes.extend(frame(&load));
        let (a, rest) = bytes.split_at(7);
        let (b, c) = rest.split_at(rest.len() - 3);
        for chunk in [a, b, c] {
            frames.send(chunk.to_vec()).unwrap();
        }
        drop(frames);

        let summary = consumer.run().await.unwrap();
        assert_eq!(summary.replies, 2);
        assert_eq!(summary.malformed, 0);
        assert!(!summary.cancelled);

        let state = consumer.session().state().await;
        assert_eq!(state.ledger().len(), 2);
        assert_eq!(state.data_sets().len(), 1);
        let reply = state.ledger().replies().last().unwrap();
        assert!(reply.same_session);
        assert!(reply.received_at.is_some());
        assert!(!consumer.session().is_streaming());
    }

    #[tokio::test]
    async fn malformed_piece_does_not_stop_the_stream() {
        let (consumer, frames) = consumer();
        let mut bytes = format!("{{not json{FRAME_SENTINEL}").into_bytes();
        bytes.extend(frame(&Reply::initialization("other")));
        bytes.extend(b"{\"command\":\"lo");
        frames.send(bytes).unwrap();
        drop(frames);

        let summary = consumer.run().await.unwrap();
        assert_eq!(summary.replies, 1);
        assert_eq!(summary.malformed, 1);
        assert_eq!(summary.trailing_bytes, 14);
        let state = consumer.session().state().await;
        assert!(!state.ledger().replies().next().unwrap().same_session);
    }

    #[tokio::test]
    async fn stop_unblocks_a_pending_read() {
        let (consumer, frames) = consumer();
        let token = consumer.stop_token();
        let session = consumer.session().clone();
        let task = tokio::spawn(async move { consumer.run().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(session.is_streaming());
        token.cancel();
        let summary = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(summary.cancelled);
        assert!(!session.is_streaming());
        assert!(frames.is_closed());
    }

    #[tokio::test]
    async fn open_failure_clears_streaming_flag() {
        let session = SessionContext::with_session_id(
            ClientConfig::for_tenant("Demo"),
            RecordingTransport::new(),
            "s1",
        );
        let consumer = PushStreamConsumer::new(session);
        assert!(matches!(consumer.run().await, Err(TransportError::Closed)));
        assert!(!consumer.session().is_streaming());
    }

    #[tokio::test(start_paused = true)]
    async fn timers_drive_heartbeat_and_sweep() {
        let (transport, _frames) = RecordingTransport::with_push_channel();
        let config = ClientConfig {
            heartbeat_interval: Duration::from_secs(60),
            timeout_check_interval: Duration::from_secs(10),
            ..ClientConfig::for_tenant("Demo")
        };
        let session = SessionContext::with_session_id(config, transport, "s1");
        session.restore_credential(&valid_token()).await.unwrap();

        let mut stale = Request::new(CommandKind::Prompt, "stale");
        stale.request_initiated_on = Utc::now() - chrono::Duration::seconds(30);
        session.send(stale.clone()).await;

        let consumer = PushStreamConsumer::new(session.clone());
        let token = consumer.stop_token();
        let task = tokio::spawn(async move { consumer.run().await });

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(matches!(
            session.state().await.ledger().find(&stale.request_id),
            Some(LedgerEntry::Request(tracked)) if tracked.timed_out
        ));
        assert_eq!(session.transport().sent().len(), 1);

        tokio::time::sleep(Duration::from_secs(50)).await;
        let sent = session.transport().sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].command, CommandKind::Heartbeat);

        token.cancel();
        task.await.unwrap().unwrap();
    }
}
