//! # Demonstration Application
//!
//! Echoes every received frame back to its sender and periodically
//! broadcasts a heartbeat frame to all connected clients.
//!
//! Handler callbacks cannot reach the session, so replies are queued here and
//! sent by [`service`] once the session is idle again.

use std::collections::VecDeque;

use esp_link::codec::{BOOL_ENCODED_SIZE, INT_ENCODED_SIZE, USINT_ENCODED_SIZE};
use esp_link::{
    ByteSink, ByteSource, ConfigStore, FrameEncoder, FrameReader, LinkError, LinkHandler, Session,
    Status,
};
use log::{debug, info, warn};

/// Replies waiting for the send slot
pub const MAX_PENDING_REPLIES: usize = 16;

const HEARTBEAT_SIZE: usize = USINT_ENCODED_SIZE + INT_ENCODED_SIZE + BOOL_ENCODED_SIZE;

/// Counters reported when the runner stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppStats {
    pub messages: u64,
    pub bytes_received: u64,
    pub sends_ok: u64,
    pub sends_failed: u64,
    pub replies_dropped: u64,
}

#[derive(Debug, Default)]
pub struct EchoApp {
    replies: VecDeque<(u8, Vec<u8>)>,
    heartbeat_due: bool,
    heartbeat_seq: u8,
    last_send_ok: bool,
    stats: AppStats,
}

impl EchoApp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> AppStats {
        self.stats
    }

    pub fn pending_replies(&self) -> usize {
        self.replies.len()
    }

    pub fn next_reply(&mut self) -> Option<(u8, Vec<u8>)> {
        self.replies.pop_front()
    }

    pub fn schedule_heartbeat(&mut self) {
        self.heartbeat_due = true;
    }

    /// Heartbeat frame if one is due: sequence number, received message
    /// count and whether the previous send succeeded
    pub fn take_heartbeat(&mut self) -> Option<Vec<u8>> {
        if !self.heartbeat_due {
            return None;
        }
        self.heartbeat_due = false;
        self.heartbeat_seq = self.heartbeat_seq.wrapping_add(1);

        let mut frame = vec![0u8; HEARTBEAT_SIZE];
        let mut encoder = FrameEncoder::new(&mut frame);
        encoder
            .put_usint(self.heartbeat_seq)
            .put_int(i16::try_from(self.stats.messages).unwrap_or(i16::MAX))
            .put_bool(self.last_send_ok);
        let len = encoder.finish().ok()?;
        frame.truncate(len);
        Some(frame)
    }
}

impl LinkHandler<Vec<u8>> for EchoApp {
    fn on_message(&mut self, status: Status, channel: u8, payload: &(impl ByteSource + ?Sized)) {
        if status != Status::Success {
            warn!("Discarding message on channel {} with status {:?}", channel, status);
            return;
        }
        self.stats.messages += 1;
        self.stats.bytes_received += payload.len() as u64;

        if let Ok(value) = FrameReader::new(payload).take_int() {
            debug!("Channel {} sent INT {}", channel, value);
        }

        if self.replies.len() >= MAX_PENDING_REPLIES {
            self.stats.replies_dropped += 1;
            warn!("Reply queue full, dropping echo for channel {}", channel);
            return;
        }
        let mut data = vec![0u8; payload.len()];
        payload.copy_to(&mut data);
        self.replies.push_back((channel, data));
    }

    fn on_send_complete(&mut self, status: Status, buffer: Vec<u8>) {
        self.last_send_ok = status == Status::Success;
        if self.last_send_ok {
            self.stats.sends_ok += 1;
            debug!("Sent {} bytes", buffer.len());
        } else {
            self.stats.sends_failed += 1;
            warn!("Send of {} bytes failed with {:?}", buffer.len(), status);
        }
    }

    fn on_connection(&mut self, channel: u8, open: bool) {
        if open {
            info!("Client connected on channel {}", channel);
        } else {
            info!("Client on channel {} disconnected", channel);
            self.replies.retain(|(c, _)| *c != channel);
        }
    }
}

/// Hand queued work to the session while it is idle
pub fn service<T, S>(session: &mut Session<'_, T, S, EchoApp, Vec<u8>>)
where
    T: ByteSink,
    S: ConfigStore,
{
    if !session.is_idle() {
        return;
    }

    if let Some((channel, data)) = session.handler_mut().next_reply() {
        if let Err(e) = session.send(channel, data) {
            warn!("Echo to channel {} rejected: {}", channel, e);
        }
        return;
    }

    if let Some(frame) = session.handler_mut().take_heartbeat() {
        match session.send_to_all(frame) {
            Ok(()) => debug!("Heartbeat broadcast started"),
            Err(e) if e.error == LinkError::NotConnected => {}
            Err(e) => warn!("Heartbeat rejected: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_queues_echo() {
        let mut app = EchoApp::new();
        app.on_message(Status::Success, 2, &b"HELLO"[..]);
        app.on_message(Status::Failure, 1, &b"junk"[..]);

        assert_eq!(app.next_reply(), Some((2, b"HELLO".to_vec())));
        assert_eq!(app.next_reply(), None);
        assert_eq!(app.stats().messages, 1);
        assert_eq!(app.stats().bytes_received, 5);
    }

    #[test]
    fn test_reply_queue_is_bounded() {
        let mut app = EchoApp::new();
        for _ in 0..MAX_PENDING_REPLIES + 2 {
            app.on_message(Status::Success, 0, &b"x"[..]);
        }
        assert_eq!(app.pending_replies(), MAX_PENDING_REPLIES);
        assert_eq!(app.stats().replies_dropped, 2);
    }

    #[test]
    fn test_disconnect_drops_pending_replies() {
        let mut app = EchoApp::new();
        app.on_message(Status::Success, 0, &b"a"[..]);
        app.on_message(Status::Success, 1, &b"b"[..]);
        app.on_connection(0, false);

        assert_eq!(app.next_reply(), Some((1, b"b".to_vec())));
        assert_eq!(app.next_reply(), None);
    }

    #[test]
    fn test_heartbeat_frame() {
        let mut app = EchoApp::new();
        assert_eq!(app.take_heartbeat(), None);

        app.on_message(Status::Success, 0, &b"x"[..]);
        app.on_send_complete(Status::Success, Vec::new());
        app.schedule_heartbeat();

        let frame = app.take_heartbeat().unwrap();
        assert_eq!(frame, vec![0x46, 1, 0x43, 0x00, 0x01, 0x41]);
        assert_eq!(app.take_heartbeat(), None);
    }

    #[test]
    fn test_send_completion_counts() {
        let mut app = EchoApp::new();
        app.on_send_complete(Status::Success, vec![1]);
        app.on_send_complete(Status::Failure, vec![2]);
        assert_eq!(app.stats().sends_ok, 1);
        assert_eq!(app.stats().sends_failed, 1);
    }
}
