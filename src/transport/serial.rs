// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::io;

use async_trait::async_trait;
use tokio_serial::SerialStream;

use super::Connect;

/// Opens a serial device with 8N1 framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConnector {
    path: String,
    baud_rate: u32,
}

impl SerialConnector {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub const fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

#[async_trait]
impl Connect for SerialConnector {
    type Port = SerialStream;

    async fn connect(&self) -> io::Result<SerialStream> {
        let builder = tokio_serial::new(self.path.as_str(), self.baud_rate);
        let serial = SerialStream::open(&builder)?;
        Ok(serial)
    }
}
