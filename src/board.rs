// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Relay/input boards

use std::{
    iter,
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use log::{debug, warn};
use tokio::{
    sync::{oneshot, Mutex as AsyncMutex},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    codec::{decode_response_pdu, rtu::ClientCodec},
    event::{BoardEvent, EventFeed, Subscription},
    frame::{
        Command, FunctionCode, Index, InputRelationship, InterlockMode, RelayState, RequestAdu,
        Response, WriteAck, DEFAULT_PULSE_WIDTH,
    },
    lock,
    transport::Shared as Link,
    BusAddress, Error, Result,
};

/// Extra poll period per bus address, so that boards sharing a bus
/// drift apart instead of polling in lockstep.
pub const POLL_STAGGER: Duration = Duration::from_millis(20);

/// Configuration of a single board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardConfig {
    pub address: BusAddress,

    /// Number of inputs kept in the cache. Readings are truncated
    /// or zero-padded to this length.
    pub input_count: usize,

    /// Base period for reading the inputs. No automatic polling if `None`
    /// or zero.
    pub poll_interval: Option<Duration>,

    /// Board-wide interlock mode, sent on registration.
    pub interlock: Option<InterlockMode>,

    /// Per-input relationships, sent on registration.
    pub input_relationships: Vec<(Index, InputRelationship)>,
}

impl BoardConfig {
    pub fn new(address: BusAddress, input_count: usize) -> Self {
        Self {
            address,
            input_count,
            poll_interval: None,
            interlock: None,
            input_relationships: Vec::new(),
        }
    }

    #[must_use]
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = Some(poll_interval);
        self
    }

    #[must_use]
    pub fn interlock(mut self, mode: InterlockMode) -> Self {
        self.interlock = Some(mode);
        self
    }

    #[must_use]
    pub fn input_relationship(mut self, index: Index, relationship: InputRelationship) -> Self {
        self.input_relationships.push((index, relationship));
        self
    }
}

/// State of a board shared between its handles and the router.
#[derive(Debug)]
pub(crate) struct BoardShared {
    pub(crate) address: BusAddress,
    input_count: usize,
    inputs: Mutex<Vec<u8>>,
    pending_ack: Mutex<Option<oneshot::Sender<WriteAck>>>,
    // Held while a write waits for its acknowledgement.
    write_gate: AsyncMutex<()>,
    pub(crate) events: EventFeed,
    polling: CancellationToken,
}

impl BoardShared {
    pub(crate) fn new(address: BusAddress, input_count: usize) -> Self {
        Self {
            address,
            input_count,
            inputs: Mutex::new(vec![0; input_count]),
            pending_ack: Mutex::new(None),
            write_gate: AsyncMutex::new(()),
            events: EventFeed::default(),
            polling: CancellationToken::new(),
        }
    }

    pub(crate) fn handle_response(&self, function: FunctionCode, payload: &[u8]) {
        match decode_response_pdu(function, payload) {
            Ok(Response::ReadInputs(values)) => self.update_inputs(values),
            Ok(Response::WriteAck(ack)) => self.acknowledge(ack),
            Err(err) => debug!(
                "Board {}: ignoring response with function {function}: {err}",
                self.address
            ),
        }
    }

    fn update_inputs(&self, mut values: Vec<u8>) {
        values.resize(self.input_count, 0);
        let changed: Vec<_> = {
            let mut inputs = lock(&self.inputs);
            let changed = inputs
                .iter()
                .zip(&values)
                .enumerate()
                .filter(|(_, (old, new))| old != new)
                .map(|(index, (_, new))| BoardEvent::InputChanged {
                    // At most 127 registers fit into a response
                    index: index as Index,
                    value: *new,
                })
                .collect();
            inputs.clone_from(&values);
            changed
        };
        self.events
            .publish(changed.into_iter().chain(iter::once(BoardEvent::InputsUpdated { values })));
    }

    fn acknowledge(&self, ack: WriteAck) {
        match lock(&self.pending_ack).take() {
            Some(tx) => {
                // The waiter may have timed out in the meantime.
                let _ = tx.send(ack);
            }
            None => debug!("Board {}: unsolicited write acknowledgement", self.address),
        }
        let WriteAck { register, value } = ack;
        self.events.publish([BoardEvent::WriteAcked { register, value }]);
    }

    fn read_input(&self, index: Index) -> Option<u8> {
        lock(&self.inputs).get(usize::from(index)).copied()
    }
}

/// Handle of a board registered with a [`crate::Transport`].
///
/// Handles are cheap to clone. They do not keep the transport alive:
/// once the transport is closed or dropped, commands fail with
/// [`Error::Closed`].
#[derive(Debug, Clone)]
pub struct RelayBoard {
    shared: Arc<BoardShared>,
    link: Weak<Link>,
    ack_timeout: Duration,
}

impl RelayBoard {
    pub(crate) fn new(shared: Arc<BoardShared>, link: Weak<Link>, ack_timeout: Duration) -> Self {
        Self {
            shared,
            link,
            ack_timeout,
        }
    }

    #[must_use]
    pub fn address(&self) -> BusAddress {
        self.shared.address
    }

    #[must_use]
    pub fn input_count(&self) -> usize {
        self.shared.input_count
    }

    /// Last known value of an input. Never touches the bus.
    #[must_use]
    pub fn read_input(&self, index: Index) -> Option<u8> {
        self.shared.read_input(index)
    }

    /// Last known values of all inputs.
    #[must_use]
    pub fn inputs(&self) -> Vec<u8> {
        lock(&self.shared.inputs).clone()
    }

    /// Queues a read of the inputs. The result arrives as events.
    pub fn request_read(&self) -> Result<()> {
        self.send(Command::ReadInputs)
    }

    /// Switches a relay and waits for the board to acknowledge it.
    ///
    /// `delay` is the pulse width for [`RelayState::Moment`]. Writes to
    /// the same board are serialized: a second call waits until the
    /// first one is acknowledged or has timed out. Any write-register
    /// echo of this board counts as acknowledgement.
    pub async fn set_relay(&self, index: Index, state: RelayState, delay: u8) -> Result<WriteAck> {
        let _gate = self.shared.write_gate.lock().await;
        let transport_closed = self.link()?.shutdown_token();
        let (tx, rx) = oneshot::channel();
        *lock(&self.shared.pending_ack) = Some(tx);
        if let Err(err) = self.send(Command::WriteRelay {
            index,
            state,
            delay,
        }) {
            lock(&self.shared.pending_ack).take();
            return Err(err);
        }
        let acked = tokio::select! {
            () = transport_closed.cancelled() => {
                lock(&self.shared.pending_ack).take();
                return Err(Error::Closed);
            }
            acked = time::timeout(self.ack_timeout, rx) => acked,
        };
        match acked {
            Ok(Ok(ack)) => Ok(ack),
            // Board closed while waiting
            Ok(Err(_)) => Err(Error::Closed),
            Err(_) => {
                lock(&self.shared.pending_ack).take();
                warn!(
                    "Board {}: relay {index} not acknowledged within {:?}",
                    self.shared.address, self.ack_timeout
                );
                Err(Error::WriteAckTimeout {
                    address: self.shared.address,
                    timeout: self.ack_timeout,
                })
            }
        }
    }

    pub async fn switch_on(&self, index: Index) -> Result<WriteAck> {
        self.set_relay(index, RelayState::On, 0).await
    }

    pub async fn switch_off(&self, index: Index) -> Result<WriteAck> {
        self.set_relay(index, RelayState::Off, 0).await
    }

    /// Closes a relay momentarily with [`DEFAULT_PULSE_WIDTH`].
    pub async fn pulse(&self, index: Index) -> Result<WriteAck> {
        self.set_relay(index, RelayState::Moment, DEFAULT_PULSE_WIDTH).await
    }

    /// Selects the board-wide interlock mode. Not acknowledged.
    pub fn set_interlock(&self, mode: InterlockMode) -> Result<()> {
        self.send(Command::SetInterlock(mode))
    }

    /// Selects the relationship of a single input. Not acknowledged.
    pub fn set_input_relationship(
        &self,
        index: Index,
        relationship: InputRelationship,
    ) -> Result<()> {
        self.send(Command::SetInputRelationship {
            index,
            relationship,
        })
    }

    /// Subscribes to all events of this board.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.shared.events.subscribe()
    }

    /// Invokes `callback` with index and new value of every changed input.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn on_input_change<F>(&self, mut callback: F) -> JoinHandle<()>
    where
        F: FnMut(Index, u8) + Send + 'static,
    {
        let mut events = self.subscribe();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let BoardEvent::InputChanged { index, value } = event {
                    callback(index, value);
                }
            }
        })
    }

    /// Invokes `callback` with all input values after every read.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn on_inputs_updated<F>(&self, mut callback: F) -> JoinHandle<()>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        let mut events = self.subscribe();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let BoardEvent::InputsUpdated { values } = event {
                    callback(&values);
                }
            }
        })
    }

    /// Stops polling, ends all subscriptions and unregisters the board.
    ///
    /// Other boards and the transport are not affected. A pending
    /// [`Self::set_relay`] fails with [`Error::Closed`].
    pub fn close(&self) {
        self.shared.polling.cancel();
        self.shared.events.detach_all();
        lock(&self.shared.pending_ack).take();
        if let Some(link) = self.link.upgrade() {
            link.router.remove(&self.shared);
        }
    }

    /// The transport, unless it or this board has been closed.
    fn link(&self) -> Result<Arc<Link>> {
        let link = self.link.upgrade().ok_or(Error::Closed)?;
        if link.is_closed() || self.shared.polling.is_cancelled() {
            return Err(Error::Closed);
        }
        Ok(link)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.link()?.enqueue(ClientCodec::encode_to_bytes(RequestAdu {
            address: self.shared.address,
            command,
        }));
        Ok(())
    }
}

/// Periodically queues a read of the inputs while the port is open.
pub(crate) fn spawn_poller(board: &RelayBoard, poll_interval: Duration) -> JoinHandle<()> {
    let address = board.address();
    let link = board.link.clone();
    let polling = board.shared.polling.clone();
    let period = poll_interval + POLL_STAGGER * u32::from(u8::from(address));
    let read_inputs = ClientCodec::encode_to_bytes(RequestAdu {
        address,
        command: Command::ReadInputs,
    });
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = polling.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let Some(link) = link.upgrade().filter(|link| !link.is_closed()) else {
                break;
            };
            if link.is_open() {
                link.enqueue(read_inputs.clone());
            }
        }
        debug!("Board {address}: polling stopped");
    })
}
