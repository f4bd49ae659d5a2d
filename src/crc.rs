// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! CRC-16/MODBUS checksum
//!
//! The checksum is appended to every frame low byte first.

use bytes::{BufMut as _, BytesMut};

/// Number of trailing checksum bytes in a frame.
pub const CRC_LEN: usize = 2;

/// Computes the CRC-16/MODBUS checksum of `buf`.
#[must_use]
pub fn compute(buf: &[u8]) -> u16 {
    let mut crc = 0xFFFF;
    for x in buf {
        crc ^= u16::from(*x);
        for _ in 0..8 {
            if (crc & 0x0001) != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Appends the checksum of the current contents of `buf`.
pub fn append(buf: &mut BytesMut) {
    let crc = compute(buf);
    buf.reserve(CRC_LEN);
    buf.put_u16_le(crc);
}

/// Checks the trailing checksum of a complete frame.
#[must_use]
pub fn verify(frame: &[u8]) -> bool {
    if frame.len() < CRC_LEN {
        return false;
    }
    let (data, crc) = frame.split_at(frame.len() - CRC_LEN);
    compute(data) == u16::from_le_bytes([crc[0], crc[1]])
}
