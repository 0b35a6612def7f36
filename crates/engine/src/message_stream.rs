// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `MessageStream`: bounded single-producer, single-consumer channel of
//! user-origin messages fed into an active session (`spec.md` §4.1).
//!
//! Modeled as a pull-based channel with a terminal marker, per the
//! teacher's async-iterator design note (`spec.md` §9): one producer
//! pushes, one consumer pulls, `end()` unblocks every waiter.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;
use wm_core::EngineInputMessage;

struct Inner {
    queue: parking_lot::Mutex<VecDeque<EngineInputMessage>>,
    ended: std::sync::atomic::AtomicBool,
    notify: Notify,
}

/// Producer handle: `enqueue` and `end` may be called from any task.
#[derive(Clone)]
pub struct MessageStream {
    inner: Arc<Inner>,
}

impl MessageStream {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: parking_lot::Mutex::new(VecDeque::new()),
                ended: std::sync::atomic::AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Enqueue a message. A no-op (logged) if the stream has already ended.
    pub fn enqueue(&self, message: EngineInputMessage) {
        if self.inner.ended.load(std::sync::atomic::Ordering::SeqCst) {
            tracing::debug!("dropping enqueue on ended message stream");
            return;
        }
        self.inner.queue.lock().push_back(message);
        self.inner.notify.notify_one();
    }

    /// Transition to terminal state. All current and future consumer polls
    /// observe the end rather than blocking.
    pub fn end(&self) {
        self.inner.ended.store(true, std::sync::atomic::Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_ended(&self) -> bool {
        self.inner.ended.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Pull the next message, or `None` once the stream has ended and the
    /// buffer is drained.
    pub async fn next(&self) -> Option<EngineInputMessage> {
        loop {
            if let Some(msg) = self.inner.queue.lock().pop_front() {
                return Some(msg);
            }
            if self.inner.ended.load(std::sync::atomic::Ordering::SeqCst) {
                return None;
            }
            self.inner.notify.notified().await;
        }
    }
}

impl Default for MessageStream {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(text: &str) -> EngineInputMessage {
        EngineInputMessage { text: text.into(), parent_tool_use_id: None, session_id: None }
    }

    #[tokio::test]
    async fn delivers_in_enqueue_order() {
        let stream = MessageStream::new();
        stream.enqueue(msg("a"));
        stream.enqueue(msg("b"));
        assert_eq!(stream.next().await.unwrap().text, "a");
        assert_eq!(stream.next().await.unwrap().text, "b");
    }

    #[tokio::test]
    async fn end_unblocks_waiting_consumer() {
        let stream = MessageStream::new();
        let consumer = tokio::spawn({
            let stream = stream.clone();
            async move { stream.next().await }
        });
        tokio::task::yield_now().await;
        stream.end();
        assert!(consumer.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn enqueue_after_end_is_noop() {
        let stream = MessageStream::new();
        stream.end();
        stream.enqueue(msg("late"));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn subsequent_consumers_get_end_without_blocking() {
        let stream = MessageStream::new();
        stream.end();
        assert!(stream.next().await.is_none());
        assert!(stream.next().await.is_none());
    }
}
