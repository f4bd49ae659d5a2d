// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::io::{Cursor, Error, ErrorKind, Result};

use byteorder::{BigEndian, ReadBytesExt as _};

use crate::{
    bytes::{BufMut as _, BytesMut},
    frame::{
        Command, FunctionCode, Response, WriteAck, INPUT_REGISTER_COUNT, INPUT_REGISTER_START,
        INPUT_RELATIONSHIP_SELECTOR, INTERLOCK_REGISTER,
    },
};

pub(crate) mod rtu;

/// Encodes function code and payload of `command`.
fn encode_command_pdu(buf: &mut BytesMut, command: &Command) {
    use crate::frame::Command::*;
    buf.put_u8(command.function_code().value());
    match *command {
        ReadInputs => {
            buf.put_u16(INPUT_REGISTER_START);
            buf.put_u16(INPUT_REGISTER_COUNT);
        }
        WriteRelay {
            index,
            state,
            delay,
        } => {
            buf.put_u8(0x00);
            buf.put_u8(index);
            buf.put_u8(state.mode_byte());
            buf.put_u8(delay);
        }
        SetInterlock(mode) => {
            buf.put_u16(INTERLOCK_REGISTER);
            buf.put_u8(0x00);
            buf.put_u8(mode.code());
        }
        SetInputRelationship {
            index,
            relationship,
        } => {
            // The selector byte doubles as high byte of the value.
            buf.put_u8(index);
            buf.put_u8(INPUT_RELATIONSHIP_SELECTOR);
            buf.put_u8(INPUT_RELATIONSHIP_SELECTOR);
            buf.put_u8(relationship.code());
        }
    }
}

/// Interprets the payload of a CRC-checked response.
pub(crate) fn decode_response_pdu(function: FunctionCode, payload: &[u8]) -> Result<Response> {
    let rsp = match function {
        FunctionCode::ReadHoldingRegisters => {
            let (byte_count, registers) = payload
                .split_first()
                .ok_or_else(|| Error::new(ErrorKind::InvalidData, "missing byte count"))?;
            let len = usize::from(*byte_count);
            if len == 0 || len % 2 != 0 || len > registers.len() {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!(
                        "invalid byte count {len} for {} register bytes",
                        registers.len()
                    ),
                ));
            }
            // Only the low byte of each register carries the input state.
            let inputs = registers[..len]
                .chunks_exact(2)
                .map(|register| register[1])
                .collect();
            Response::ReadInputs(inputs)
        }
        FunctionCode::WriteSingleRegister => {
            let mut rdr = Cursor::new(payload);
            let register = rdr.read_u16::<BigEndian>()?;
            let value = rdr.read_u16::<BigEndian>()?;
            Response::WriteAck(WriteAck { register, value })
        }
        FunctionCode::Other(code) => {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("unsupported function code: 0x{code:0>2X}"),
            ));
        }
    };
    Ok(rsp)
}
