// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;

/// A single byte for addressing a board on the shared serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BusAddress(pub u8);

impl BusAddress {
    /// The address every board listens to. Broadcast requests are
    /// never answered.
    pub const fn broadcast() -> Self {
        BusAddress(0)
    }

    /// The minimum address of a single board.
    pub const fn min_device() -> Self {
        BusAddress(1)
    }

    /// The maximum address of a single board.
    pub const fn max_device() -> Self {
        BusAddress(247)
    }

    pub fn is_broadcast(self) -> bool {
        self == Self::broadcast()
    }

    pub fn is_single_device(self) -> bool {
        self >= Self::min_device() && self <= Self::max_device()
    }
}

impl From<u8> for BusAddress {
    fn from(from: u8) -> Self {
        BusAddress(from)
    }
}

impl From<BusAddress> for u8 {
    fn from(from: BusAddress) -> Self {
        from.0
    }
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:0>2X}", self.0)
    }
}
