//! Completion mailbox.
//!
//! Workers must not touch interactive-thread state. They post a message
//! instead, and the interactive thread drains the mailbox when it is ready
//! to apply results.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

/// Receiving end, owned by the interactive thread.
pub struct Mailbox<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

/// Sending end, cloned into worker jobs.
pub struct MailSender<T> {
    tx: Sender<T>,
}

impl<T> Clone for MailSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> MailSender<T> {
    /// Post a message. Returns `false` if the mailbox was dropped.
    pub fn post(&self, message: T) -> bool {
        self.tx.send(message).is_ok()
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx }
    }

    pub fn sender(&self) -> MailSender<T> {
        MailSender {
            tx: self.tx.clone(),
        }
    }

    /// Take every message posted so far, in posting order.
    pub fn drain(&self) -> Vec<T> {
        let mut messages = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(message) => messages.push(message),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        messages
    }

    /// Wait up to `timeout` for one message.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}
