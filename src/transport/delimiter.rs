// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inter-byte timeout framing
//!
//! The wire format carries neither a length field nor a delimiter.
//! A frame ends when the line stays quiet for longer than the quiet
//! window. A frame that is interrupted by a gap on the line is
//! delivered as two frames; nothing here tries to detect that.

use std::{io, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncReadExt as _},
    time,
};

use crate::bytes::{Bytes, BytesMut};

/// Maximum size of an RTU frame. Longer runs are cut at this size.
pub(crate) const MAX_FRAME_LEN: usize = 256;

#[derive(Debug)]
pub(crate) struct Delimiter<R> {
    reader: R,
    quiet_window: Duration,
    buf: BytesMut,
    eof: bool,
}

impl<R> Delimiter<R>
where
    R: AsyncRead + Unpin,
{
    pub(crate) fn new(reader: R, quiet_window: Duration) -> Self {
        Self {
            reader,
            quiet_window,
            buf: BytesMut::with_capacity(MAX_FRAME_LEN),
            eof: false,
        }
    }

    /// Waits for the next frame.
    ///
    /// Returns `Ok(None)` once the reader is exhausted and all
    /// buffered bytes have been delivered.
    pub(crate) async fn next_frame(&mut self) -> io::Result<Option<Bytes>> {
        if self.buf.is_empty() {
            if self.eof {
                return Ok(None);
            }
            // Idle line: wait as long as it takes for the first byte.
            if self.reader.read_buf(&mut self.buf).await? == 0 {
                self.eof = true;
                return Ok(None);
            }
        }
        while !self.eof && self.buf.len() < MAX_FRAME_LEN {
            match time::timeout(self.quiet_window, self.reader.read_buf(&mut self.buf)).await {
                // Quiet window elapsed
                Err(_) => break,
                Ok(Ok(0)) => self.eof = true,
                Ok(Ok(_)) => {}
                Ok(Err(err)) => return Err(err),
            }
        }
        let len = self.buf.len().min(MAX_FRAME_LEN);
        let frame = self.buf.split_to(len).freeze();
        log::trace!("Received frame: {frame:02X?}");
        Ok(Some(frame))
    }
}
