// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::bytes::Bytes;

/// Pending outbound frames.
///
/// Last in, first out: the most recently queued frame is written
/// first. Frames queued in the same burst therefore go out in
/// reverse order.
#[derive(Debug, Default)]
pub(crate) struct SendStack {
    frames: Vec<Bytes>,
}

impl SendStack {
    pub(crate) fn push(&mut self, frame: Bytes) {
        self.frames.push(frame);
    }

    pub(crate) fn pop(&mut self) -> Option<Bytes> {
        self.frames.pop()
    }

    pub(crate) fn len(&self) -> usize {
        self.frames.len()
    }
}
