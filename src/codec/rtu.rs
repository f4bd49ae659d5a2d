// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::io::{Error, Result};

use tokio_util::codec::Encoder;

use crate::{
    bytes::{BufMut as _, Bytes, BytesMut},
    crc,
    frame::{Frame, FunctionCode, RequestAdu},
};

use super::encode_command_pdu;

// [address, function code, crc low, crc high]
const MIN_FRAME_LEN: usize = 1 + 1 + crc::CRC_LEN;

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ClientCodec;

impl ClientCodec {
    /// Encodes a complete request frame including its checksum.
    pub(crate) fn encode_to_bytes(adu: RequestAdu) -> Bytes {
        let mut buf = BytesMut::new();
        encode_request_adu(adu, &mut buf);
        buf.freeze()
    }
}

impl Encoder<RequestAdu> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, adu: RequestAdu, buf: &mut BytesMut) -> Result<()> {
        encode_request_adu(adu, buf);
        Ok(())
    }
}

fn encode_request_adu(adu: RequestAdu, buf: &mut BytesMut) {
    let RequestAdu { address, command } = adu;
    let start = buf.len();
    buf.reserve(8);
    buf.put_u8(address.into());
    encode_command_pdu(buf, &command);
    let crc = crc::compute(&buf[start..]);
    buf.put_u16_le(crc);
}

/// Splits a delimited chunk into a [`Frame`].
///
/// Returns `None` if the chunk is too short to carry an address,
/// a function code and a checksum.
pub(crate) fn decode_frame(mut chunk: Bytes) -> Option<Frame> {
    if chunk.len() < MIN_FRAME_LEN {
        return None;
    }
    let crc_valid = crc::verify(&chunk);
    chunk.truncate(chunk.len() - crc::CRC_LEN);
    let header = chunk.split_to(2);
    Some(Frame {
        address: header[0].into(),
        function: FunctionCode::new(header[1]),
        payload: chunk,
        crc_valid,
    })
}
