// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Driver for relay/input boards sharing a
//! [Modbus RTU](https://en.wikipedia.org/wiki/Modbus) style serial bus,
//! based on [tokio](https://tokio.rs).
//!
//! A [`Transport`] owns the serial port. Boards are registered with it
//! by their bus address and are polled for their inputs in the
//! background. Input changes are reported as [`BoardEvent`]s.
//!
//! Frames on the bus have no length field. A received frame ends when
//! the line has been quiet for [`Config::quiet_window`].
//!
//! Outbound frames are written from a stack, one per
//! [`Config::send_interval`]: the most recently queued frame goes out
//! first. Commands and their responses are therefore not ordered.
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use tokio_relay_bus::prelude::*;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Transport::open("/dev/ttyUSB0", 9600);
//! let board = transport.add_board(
//!     BoardConfig::new(BusAddress(1), 8).poll_interval(Duration::from_millis(500)),
//! )?;
//!
//! let mut events = board.subscribe();
//! board.switch_on(3).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

#![warn(rust_2018_idioms)]

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod prelude;

pub use bytes;

mod address;
pub use self::address::BusAddress;

mod board;
pub use self::board::{BoardConfig, RelayBoard, POLL_STAGGER};

mod codec;

pub mod crc;

mod error;
pub use self::error::{Error, Result};

mod event;
pub use self::event::{BoardEvent, Subscription};

mod frame;
pub use self::frame::*;

mod router;

mod transport;
#[cfg(feature = "serial")]
pub use self::transport::SerialConnector;
pub use self::transport::{Config, Connect, Transport, TransportStats, MIN_SEND_INTERVAL};

/// Locks `mutex`, ignoring poisoning. None of the guarded state can be
/// left inconsistent by a panic.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
