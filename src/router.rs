// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Demultiplexing of received frames to the registered boards

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use log::debug;

use crate::{board::BoardShared, bytes::Bytes, codec::rtu::decode_frame, lock, BusAddress};

/// Registry of boards keyed by their bus address.
#[derive(Debug, Default)]
pub(crate) struct Router {
    boards: Mutex<HashMap<BusAddress, Arc<BoardShared>>>,
    pub(crate) frames_received: AtomicU64,
    pub(crate) crc_errors: AtomicU64,
    pub(crate) unrouted_frames: AtomicU64,
}

impl Router {
    /// Registers `board` unless its address is taken.
    ///
    /// Returns the rejected board if the address is already in use.
    pub(crate) fn insert(&self, board: Arc<BoardShared>) -> Result<(), Arc<BoardShared>> {
        let mut boards = lock(&self.boards);
        if boards.contains_key(&board.address) {
            return Err(board);
        }
        boards.insert(board.address, board);
        Ok(())
    }

    pub(crate) fn get(&self, address: BusAddress) -> Option<Arc<BoardShared>> {
        lock(&self.boards).get(&address).cloned()
    }

    /// Unregisters `board`, but only if it is still the one registered
    /// at its address.
    pub(crate) fn remove(&self, board: &Arc<BoardShared>) -> bool {
        let mut boards = lock(&self.boards);
        match boards.get(&board.address) {
            Some(registered) if Arc::ptr_eq(registered, board) => {
                boards.remove(&board.address);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn addresses(&self) -> Vec<BusAddress> {
        let mut addresses: Vec<_> = lock(&self.boards).keys().copied().collect();
        addresses.sort_unstable();
        addresses
    }

    /// Hands a delimited chunk to the board it is addressed to.
    ///
    /// Frames with a bad checksum and frames for unknown addresses
    /// are expected on a shared bus. They are only counted.
    pub(crate) fn dispatch(&self, chunk: Bytes) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        let Some(frame) = decode_frame(chunk) else {
            debug!("Dropping truncated frame");
            self.crc_errors.fetch_add(1, Ordering::Relaxed);
            return;
        };
        if !frame.crc_valid {
            debug!("Dropping frame from {} with invalid CRC", frame.address);
            self.crc_errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let Some(board) = self.get(frame.address) else {
            debug!("Dropping frame for unknown board {}", frame.address);
            self.unrouted_frames.fetch_add(1, Ordering::Relaxed);
            return;
        };
        board.handle_response(frame.function, &frame.payload);
    }
}
