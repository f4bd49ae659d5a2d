// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Serial transport shared by all boards on one bus

use std::{
    io,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use log::{debug, error, info, trace, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt as _},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    board::{spawn_poller, BoardConfig, BoardShared, RelayBoard},
    bytes::Bytes,
    lock,
    router::Router,
    BusAddress, Error, Result,
};

mod delimiter;
mod stack;

#[cfg(feature = "serial")]
mod serial;

#[cfg(feature = "serial")]
pub use self::serial::SerialConnector;

use self::{delimiter::Delimiter, stack::SendStack};

/// Opens the byte stream to the bus.
///
/// Called again after every connection loss until the transport
/// is closed.
#[async_trait]
pub trait Connect: Send + Sync + 'static {
    type Port: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    async fn connect(&self) -> io::Result<Self::Port>;
}

/// Shortest accepted [`Config::send_interval`].
pub const MIN_SEND_INTERVAL: Duration = Duration::from_millis(1);

/// Timing of the transport and its boards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Line silence that terminates a received frame.
    pub quiet_window: Duration,

    /// Period of the send queue. At most one frame is written per period.
    /// Raised to [`MIN_SEND_INTERVAL`] if shorter.
    pub send_interval: Duration,

    /// Delay before reopening a lost or unopenable port.
    pub reconnect_delay: Duration,

    /// How long [`RelayBoard::set_relay`] waits for an acknowledgement.
    pub ack_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            quiet_window: Duration::from_millis(20),
            send_interval: Duration::from_millis(30),
            reconnect_delay: Duration::from_secs(2),
            ack_timeout: Duration::from_secs(1),
        }
    }
}

/// Counters of the transport since it was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Delimited chunks received, valid or not.
    pub frames_received: u64,
    /// Chunks dropped because of a bad checksum or truncation.
    pub crc_errors: u64,
    /// Valid frames for addresses without a registered board.
    pub unrouted_frames: u64,
    pub writes_ok: u64,
    pub write_errors: u64,
    /// Successful port openings.
    pub connects: u64,
}

/// State shared between the transport, its I/O task and the boards.
#[derive(Debug)]
pub(crate) struct Shared {
    config: Config,
    port_open: AtomicBool,
    retry: AtomicBool,
    queue: Mutex<SendStack>,
    pub(crate) router: Router,
    writes_ok: AtomicU64,
    write_errors: AtomicU64,
    connects: AtomicU64,
    shutdown: CancellationToken,
}

impl Shared {
    pub(crate) fn is_open(&self) -> bool {
        self.port_open.load(Ordering::Acquire)
    }

    /// Whether the transport has been closed for good.
    pub(crate) fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub(crate) fn enqueue(&self, frame: Bytes) {
        trace!("Queueing frame: {frame:02X?}");
        lock(&self.queue).push(frame);
    }
}

/// Owner of the serial port, the send queue and the board registry.
///
/// The port is opened in the background and reopened whenever it
/// is lost, until [`Transport::close`] is called or the transport
/// is dropped.
#[derive(Debug)]
pub struct Transport {
    shared: Arc<Shared>,
    io_task: JoinHandle<()>,
}

impl Transport {
    /// Starts connecting through `connector`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<C: Connect>(connector: C, mut config: Config) -> Self {
        if config.send_interval < MIN_SEND_INTERVAL {
            warn!(
                "Send interval {:?} raised to {MIN_SEND_INTERVAL:?}",
                config.send_interval
            );
            config.send_interval = MIN_SEND_INTERVAL;
        }
        let shared = Arc::new(Shared {
            config,
            port_open: AtomicBool::new(false),
            retry: AtomicBool::new(true),
            queue: Mutex::new(SendStack::default()),
            router: Router::default(),
            writes_ok: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            connects: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        });
        let io_task = tokio::spawn(run(connector, Arc::clone(&shared)));
        Self { shared, io_task }
    }

    /// Opens the serial port at `path` with default timing.
    ///
    /// Must be called from within a Tokio runtime.
    #[cfg(feature = "serial")]
    pub fn open(path: impl Into<String>, baud_rate: u32) -> Self {
        Self::new(SerialConnector::new(path, baud_rate), Config::default())
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Whether the port is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    /// Queues a complete frame, checksum included.
    ///
    /// Frames queued while the port is closed are kept until it opens.
    pub fn enqueue(&self, frame: Bytes) {
        self.shared.enqueue(frame);
    }

    /// Number of frames waiting to be written.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        lock(&self.shared.queue).len()
    }

    #[must_use]
    pub fn stats(&self) -> TransportStats {
        let Shared {
            router,
            writes_ok,
            write_errors,
            connects,
            ..
        } = &*self.shared;
        TransportStats {
            frames_received: router.frames_received.load(Ordering::Relaxed),
            crc_errors: router.crc_errors.load(Ordering::Relaxed),
            unrouted_frames: router.unrouted_frames.load(Ordering::Relaxed),
            writes_ok: writes_ok.load(Ordering::Relaxed),
            write_errors: write_errors.load(Ordering::Relaxed),
            connects: connects.load(Ordering::Relaxed),
        }
    }

    /// Registers a board and starts polling it.
    ///
    /// The configured interlock mode and input relationships are queued
    /// right away. Boards at the broadcast address never answer and are
    /// not polled.
    pub fn add_board(&self, config: BoardConfig) -> Result<RelayBoard> {
        let BoardConfig {
            address,
            input_count,
            poll_interval,
            interlock,
            input_relationships,
        } = config;
        if self.shared.is_closed() {
            return Err(Error::Closed);
        }
        if address.is_broadcast() {
            warn!("Board address {address} is the broadcast address, which is never polled");
        } else if !address.is_single_device() {
            warn!("Board address {address} is outside of the device range");
        }
        let shared = Arc::new(BoardShared::new(address, input_count));
        if self.shared.router.insert(Arc::clone(&shared)).is_err() {
            return Err(Error::BoardExists(address));
        }
        let board = RelayBoard::new(
            shared,
            Arc::downgrade(&self.shared),
            self.shared.config.ack_timeout,
        );
        if let Some(poll_interval) = poll_interval
            .filter(|interval| !interval.is_zero())
            .filter(|_| !address.is_broadcast())
        {
            spawn_poller(&board, poll_interval);
        }
        if let Some(mode) = interlock {
            board.set_interlock(mode)?;
        }
        for (index, relationship) in input_relationships {
            board.set_input_relationship(index, relationship)?;
        }
        info!("Registered board {address}");
        Ok(board)
    }

    /// Looks up the board registered at `address`.
    pub fn board(&self, address: BusAddress) -> Result<RelayBoard> {
        self.shared
            .router
            .get(address)
            .map(|shared| {
                RelayBoard::new(
                    shared,
                    Arc::downgrade(&self.shared),
                    self.shared.config.ack_timeout,
                )
            })
            .ok_or(Error::UnknownBoard(address))
    }

    /// Addresses of all registered boards in ascending order.
    #[must_use]
    pub fn board_addresses(&self) -> Vec<BusAddress> {
        self.shared.router.addresses()
    }

    /// Closes the port for good.
    ///
    /// Frames still queued are discarded. Calling this more than once
    /// has no further effect.
    pub fn close(&self) {
        if self.shared.retry.swap(false, Ordering::AcqRel) {
            info!("Closing transport");
        }
        self.shared.shutdown.cancel();
    }

    /// Closes the transport and waits for the port to be released.
    pub async fn shutdown(mut self) {
        self.close();
        if let Err(err) = (&mut self.io_task).await {
            error!("I/O task failed: {err}");
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens the port, serves it until it is lost and retries after the
/// reconnect delay.
async fn run<C: Connect>(connector: C, shared: Arc<Shared>) {
    loop {
        let connected = tokio::select! {
            () = shared.shutdown.cancelled() => break,
            connected = connector.connect() => connected,
        };
        match connected {
            Ok(port) => {
                shared.connects.fetch_add(1, Ordering::Relaxed);
                shared.port_open.store(true, Ordering::Release);
                info!("Port open");
                let served = serve(port, &shared).await;
                shared.port_open.store(false, Ordering::Release);
                match served {
                    Ok(()) => debug!("Port closed"),
                    Err(err) => warn!("Port closed: {err}"),
                }
            }
            Err(err) => error!("Failed to open port: {err}"),
        }
        if !shared.retry.load(Ordering::Acquire) {
            break;
        }
        tokio::select! {
            () = shared.shutdown.cancelled() => break,
            () = time::sleep(shared.config.reconnect_delay) => info!("Reopening port"),
        }
    }
}

/// Serves an open port until shutdown (`Ok`) or until it fails (`Err`).
async fn serve<P>(port: P, shared: &Shared) -> io::Result<()>
where
    P: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(port);
    let mut delimiter = Delimiter::new(reader, shared.config.quiet_window);
    tokio::select! {
        () = shared.shutdown.cancelled() => Ok(()),
        res = receive(&mut delimiter, &shared.router) => res,
        res = drain(&mut writer, shared) => res,
    }
}

async fn receive<R>(delimiter: &mut Delimiter<R>, router: &Router) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    while let Some(chunk) = delimiter.next_frame().await? {
        router.dispatch(chunk);
    }
    Err(io::Error::new(io::ErrorKind::UnexpectedEof, "end of stream"))
}

/// Writes one queued frame per tick.
async fn drain<W>(writer: &mut W, shared: &Shared) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut ticker = time::interval(shared.config.send_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let next = lock(&shared.queue).pop();
        let Some(frame) = next else {
            continue;
        };
        trace!("Sending frame: {frame:02X?}");
        let written = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        }
        .await;
        if let Err(err) = written {
            shared.write_errors.fetch_add(1, Ordering::Relaxed);
            return Err(err);
        }
        shared.writes_ok.fetch_add(1, Ordering::Relaxed);
    }
}
