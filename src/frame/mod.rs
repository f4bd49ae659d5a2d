// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{fmt, str::FromStr};

use crate::{bytes::Bytes, BusAddress};

/// Index of a relay or input on a board.
pub type Index = u8;

/// A 16-bit register address.
pub type Register = u16;

/// A 16-bit register value.
pub type Word = u16;

/// First register of the input window read by [`Command::ReadInputs`].
pub const INPUT_REGISTER_START: Register = 0x0081;

/// Number of registers read by [`Command::ReadInputs`].
pub const INPUT_REGISTER_COUNT: u16 = 0x000C;

/// Register selector that addresses the board-wide interlock mode.
pub const INTERLOCK_REGISTER: Register = 0x00FD;

/// Selector byte for per-input relationships.
pub(crate) const INPUT_RELATIONSHIP_SELECTOR: u8 = 0xFD;

/// Pulse width used by [`crate::RelayBoard::pulse`].
pub const DEFAULT_PULSE_WIDTH: u8 = 0x10;

/// The function codes spoken by this board family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    /// 03 (0x03) Read Holding Registers
    ReadHoldingRegisters,

    /// 06 (0x06) Write Single Register
    WriteSingleRegister,

    /// Anything else. Never interpreted.
    Other(u8),
}

impl FunctionCode {
    /// Create a new [`FunctionCode`] with `value`.
    #[must_use]
    pub const fn new(value: u8) -> Self {
        match value {
            0x03 => Self::ReadHoldingRegisters,
            0x06 => Self::WriteSingleRegister,
            code => Self::Other(code),
        }
    }

    /// Gets the [`u8`] value of the current [`FunctionCode`].
    #[must_use]
    pub const fn value(self) -> u8 {
        match self {
            Self::ReadHoldingRegisters => 0x03,
            Self::WriteSingleRegister => 0x06,
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:0>2X}", self.value())
    }
}

/// Target state of a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    On,
    Off,
    /// Close the relay for the pulse width given with the command.
    Moment,
}

impl RelayState {
    pub(crate) const fn mode_byte(self) -> u8 {
        match self {
            Self::On => 0x01,
            Self::Off => 0x02,
            Self::Moment => 0x05,
        }
    }
}

impl From<bool> for RelayState {
    fn from(on: bool) -> Self {
        if on {
            Self::On
        } else {
            Self::Off
        }
    }
}

/// Board-wide relay interaction policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterlockMode {
    /// Inputs and relays act independently.
    #[default]
    Unrelated,
    SelfInterlock,
    Interlocking,
    Momentary,
    /// Second interlocking variant of the firmware.
    InterlockVariant2,
}

impl InterlockMode {
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Unrelated => 0x00,
            Self::SelfInterlock => 0x01,
            Self::Interlocking => 0x02,
            Self::Momentary => 0x03,
            Self::InterlockVariant2 => 0x04,
        }
    }
}

/// Parsing never fails: unknown names select [`InterlockMode::Unrelated`],
/// which is what the boards fall back to as well.
impl FromStr for InterlockMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mode = match s.trim().to_ascii_lowercase().as_str() {
            "self-interlock" | "self_interlock" | "selfinterlock" => Self::SelfInterlock,
            "interlocking" | "interlock" => Self::Interlocking,
            "momentary" => Self::Momentary,
            "interlock-2" | "interlock_2" | "interlocking-2" => Self::InterlockVariant2,
            _ => Self::Unrelated,
        };
        Ok(mode)
    }
}

/// Relationship between one input and its relay on per-input boards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputRelationship {
    #[default]
    None,
    Toggle,
    Lockout,
    Momentary,
}

impl InputRelationship {
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::None => 0x00,
            Self::Toggle => 0x01,
            Self::Lockout => 0x02,
            Self::Momentary => 0x03,
        }
    }
}

/// Unknown names select [`InputRelationship::None`].
impl FromStr for InputRelationship {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let relationship = match s.trim().to_ascii_lowercase().as_str() {
            "toggle" => Self::Toggle,
            "lockout" => Self::Lockout,
            "momentary" => Self::Momentary,
            _ => Self::None,
        };
        Ok(relationship)
    }
}

/// A command sent to a single board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Read the fixed input register window.
    ReadInputs,

    /// Switch a relay. `delay` is the pulse width for
    /// [`RelayState::Moment`] and the switching delay otherwise.
    WriteRelay {
        index: Index,
        state: RelayState,
        delay: u8,
    },

    /// Select the board-wide interlock mode.
    SetInterlock(InterlockMode),

    /// Select the relationship of a single input.
    SetInputRelationship {
        index: Index,
        relationship: InputRelationship,
    },
}

impl Command {
    #[must_use]
    pub const fn function_code(&self) -> FunctionCode {
        match self {
            Self::ReadInputs => FunctionCode::ReadHoldingRegisters,
            Self::WriteRelay { .. }
            | Self::SetInterlock(_)
            | Self::SetInputRelationship { .. } => FunctionCode::WriteSingleRegister,
        }
    }
}

/// A command together with the board it is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestAdu {
    pub address: BusAddress,
    pub command: Command,
}

/// One delimited chunk of received bytes, split into its parts.
///
/// Frames with `crc_valid == false` must not be interpreted any further.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub address: BusAddress,
    pub function: FunctionCode,
    pub payload: Bytes,
    pub crc_valid: bool,
}

/// Echo of a single register write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteAck {
    pub register: Register,
    pub value: Word,
}

/// An interpreted response payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Low bytes of the input registers, in register order.
    ReadInputs(Vec<u8>),
    WriteAck(WriteAck),
}
