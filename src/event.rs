// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Board events and their subscriptions

use std::{
    pin::Pin,
    sync::Mutex,
    task::{Context, Poll},
};

use futures_core::Stream;
use tokio::sync::mpsc;

use crate::{
    frame::{Index, Register, Word},
    lock,
};

/// A state change reported by a board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardEvent {
    /// A single input differs from the previous reading.
    InputChanged { index: Index, value: u8 },

    /// A read completed. Sent after every read, changed or not.
    InputsUpdated { values: Vec<u8> },

    /// The board echoed a register write.
    WriteAcked { register: Register, value: Word },
}

/// Fan-out of board events to any number of subscribers.
///
/// Events published in one call are delivered to every subscriber
/// contiguously and in order.
#[derive(Debug, Default)]
pub(crate) struct EventFeed {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<BoardEvent>>>,
}

impl EventFeed {
    pub(crate) fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.subscribers).push(tx);
        Subscription { rx }
    }

    pub(crate) fn publish<I>(&self, events: I)
    where
        I: IntoIterator<Item = BoardEvent>,
    {
        let mut subscribers = lock(&self.subscribers);
        for event in events {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    /// Ends all subscriptions.
    pub(crate) fn detach_all(&self) {
        lock(&self.subscribers).clear();
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }
}

/// Receiving end of [`crate::RelayBoard::subscribe`].
///
/// Yields `None` once the board is closed and all buffered
/// events have been received.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<BoardEvent>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<BoardEvent> {
        self.rx.recv().await
    }

    /// Returns the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<BoardEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = BoardEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
