// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types.

use std::{io, time::Duration};

use thiserror::Error;

use crate::BusAddress;

/// Errors surfaced to callers of the transport and board handles.
///
/// Bus noise (checksum mismatches, frames for unknown boards) is never
/// reported here. See [`crate::TransportStats`] instead.
#[derive(Debug, Error)]
pub enum Error {
    /// The serial port could not be opened or written.
    #[error(transparent)]
    Transport(#[from] io::Error),

    /// No write acknowledgement arrived in time.
    #[error("board {address}: no write acknowledgement within {timeout:?}")]
    WriteAckTimeout {
        address: BusAddress,
        timeout: Duration,
    },

    /// No board is registered at this address.
    #[error("no board registered at {0}")]
    UnknownBoard(BusAddress),

    /// Another board is already registered at this address.
    #[error("a board is already registered at {0}")]
    BoardExists(BusAddress),

    /// The transport or the board has been closed.
    #[error("closed")]
    Closed,
}

/// Specialized [`std::result::Result`] type.
pub type Result<T> = std::result::Result<T, Error>;
