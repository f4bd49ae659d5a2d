// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types and traits

///////////////////////////////////////////////////////////////////
/// Types
///////////////////////////////////////////////////////////////////
pub use crate::{
    BoardConfig, BoardEvent, BusAddress, Config, InputRelationship, InterlockMode, RelayBoard,
    RelayState, Subscription, Transport, TransportStats, WriteAck,
};

#[cfg(feature = "serial")]
pub use crate::SerialConnector;

///////////////////////////////////////////////////////////////////
/// Traits
///////////////////////////////////////////////////////////////////
pub use crate::Connect;
