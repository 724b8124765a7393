// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unbuffered hand-off channel.
//!
//! The receiver announces that it is ready to take a value; the sender can
//! wait for such an announcement inside a `select!` and only then decide what
//! to hand over. A sender that keeps the newest value and serves it on
//! [`Sender::ready`] gets last-value-wins delivery without ever blocking on a
//! slow receiver.

use tokio::sync::{mpsc, oneshot};

pub fn channel<T>() -> (Sender<T>, Receiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Sender { requests: rx }, Receiver { requests: tx, pending: None })
}

pub struct Sender<T> {
    requests: mpsc::UnboundedReceiver<oneshot::Sender<T>>,
}

/// A receiver waiting for exactly one value.
pub struct Permit<T> {
    slot: oneshot::Sender<T>,
}

impl<T> Permit<T> {
    /// Hand `value` over, or get it back if the receiver went away.
    pub fn send(self, value: T) -> Result<(), T> {
        self.slot.send(value)
    }
}

impl<T> Sender<T> {
    /// Wait until the receiver asks for a value. `None` once the receiver is
    /// dropped. Cancel safe.
    pub async fn ready(&mut self) -> Option<Permit<T>> {
        loop {
            let slot = self.requests.recv().await?;
            if !slot.is_closed() {
                return Some(Permit { slot });
            }
        }
    }
}

pub struct Receiver<T> {
    requests: mpsc::UnboundedSender<oneshot::Sender<T>>,
    pending: Option<oneshot::Receiver<T>>,
}

impl<T> Receiver<T> {
    /// Wait for the next value. `None` once the sender is dropped.
    ///
    /// Cancel safe: a value handed over while the future was being dropped is
    /// returned by the next call.
    pub async fn recv(&mut self) -> Option<T> {
        if self.pending.is_none() {
            let (tx, rx) = oneshot::channel();
            self.requests.send(tx).ok()?;
            self.pending = Some(rx);
        }
        let rx = self.pending.as_mut()?;
        let value = rx.await.ok();
        self.pending = None;
        value
    }
}

#[cfg(test)]
#[path = "rendezvous_tests.rs"]
mod tests;
