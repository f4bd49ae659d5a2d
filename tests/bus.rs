// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Drives a transport against an in-memory device with paused time.

use std::{
    future, io,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _, DuplexStream, ReadBuf},
    sync::{mpsc, Mutex},
    time::{self, Instant},
};
use tokio_relay_bus::{
    bytes::{Bytes, BytesMut},
    crc,
    prelude::*,
    Error, MIN_SEND_INTERVAL,
};

/// Hands the device end of every connection to the test.
#[derive(Debug)]
struct MockConnector {
    devices: mpsc::UnboundedSender<DuplexStream>,
}

#[async_trait]
impl Connect for MockConnector {
    type Port = DuplexStream;

    async fn connect(&self) -> io::Result<DuplexStream> {
        let (host, device) = tokio::io::duplex(1024);
        self.devices
            .send(device)
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(host)
    }
}

/// Port that rejects every write if `broken`.
#[derive(Debug)]
struct TestPort {
    inner: DuplexStream,
    broken: bool,
}

impl AsyncRead for TestPort {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TestPort {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.broken {
            return Poll::Ready(Err(io::Error::from(io::ErrorKind::BrokenPipe)));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Returns prepared connection results in order and then never
/// connects again.
#[derive(Debug)]
struct ScriptedConnector {
    ports: Mutex<mpsc::UnboundedReceiver<io::Result<TestPort>>>,
}

#[async_trait]
impl Connect for ScriptedConnector {
    type Port = TestPort;

    async fn connect(&self) -> io::Result<TestPort> {
        match self.ports.lock().await.recv().await {
            Some(port) => port,
            None => future::pending().await,
        }
    }
}

fn scripted(results: Vec<io::Result<TestPort>>) -> Transport {
    let (tx, rx) = mpsc::unbounded_channel();
    for result in results {
        tx.send(result).unwrap();
    }
    let connector = ScriptedConnector {
        ports: Mutex::new(rx),
    };
    Transport::new(connector, Config::default())
}

fn setup() -> (Transport, mpsc::UnboundedReceiver<DuplexStream>) {
    let (devices, rx) = mpsc::unbounded_channel();
    let transport = Transport::new(MockConnector { devices }, Config::default());
    (transport, rx)
}

/// All commands are 8 bytes long.
async fn read_command(device: &mut DuplexStream) -> [u8; 8] {
    let mut buf = [0; 8];
    device.read_exact(&mut buf).await.unwrap();
    buf
}

/// Sends `data` with checksum and keeps the line quiet afterwards.
async fn reply(device: &mut DuplexStream, data: &[u8]) {
    let mut buf = BytesMut::from(data);
    crc::append(&mut buf);
    device.write_all(&buf).await.unwrap();
    time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test(start_paused = true)]
async fn write_last_queued_frame_first() {
    let (transport, mut devices) = setup();
    transport.enqueue(Bytes::from_static(b"AAAAAAAA"));
    transport.enqueue(Bytes::from_static(b"BBBBBBBB"));
    assert_eq!(transport.pending_writes(), 2);

    let mut device = devices.recv().await.unwrap();
    let start = Instant::now();
    assert_eq!(&read_command(&mut device).await, b"BBBBBBBB");
    assert_eq!(&read_command(&mut device).await, b"AAAAAAAA");
    assert!(start.elapsed() >= Config::default().send_interval);
    assert_eq!(transport.pending_writes(), 0);
}

#[tokio::test(start_paused = true)]
async fn acknowledge_relay_write() -> anyhow::Result<()> {
    let (transport, mut devices) = setup();
    let board = transport.add_board(BoardConfig::new(BusAddress(0x11), 4))?;
    let mut device = devices.recv().await.unwrap();

    let write = {
        let board = board.clone();
        tokio::spawn(async move { board.set_relay(3, RelayState::On, 0).await })
    };
    let request = read_command(&mut device).await;
    assert_eq!(&request[..6], &[0x11, 0x06, 0x00, 0x03, 0x01, 0x00]);
    assert!(crc::verify(&request));
    reply(&mut device, &request[..6]).await;

    let ack = write.await??;
    assert_eq!(
        ack,
        WriteAck {
            register: 0x0003,
            value: 0x0100
        }
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn fail_unacknowledged_write_after_timeout() -> anyhow::Result<()> {
    let (transport, mut devices) = setup();
    let board = transport.add_board(BoardConfig::new(BusAddress(0x11), 4))?;
    let _device = devices.recv().await.unwrap();

    let start = Instant::now();
    let res = board.set_relay(1, RelayState::Off, 0).await;
    assert!(start.elapsed() >= Config::default().ack_timeout);
    assert!(matches!(
        res,
        Err(Error::WriteAckTimeout { address, .. }) if address == BusAddress(0x11)
    ));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn serialize_writes_to_one_board() -> anyhow::Result<()> {
    let (transport, mut devices) = setup();
    let board = transport.add_board(BoardConfig::new(BusAddress(0x05), 4))?;
    let mut device = devices.recv().await.unwrap();

    let first = {
        let board = board.clone();
        tokio::spawn(async move { board.switch_on(1).await })
    };
    let second = {
        let board = board.clone();
        tokio::spawn(async move { board.pulse(2).await })
    };

    let request = read_command(&mut device).await;
    assert_eq!(&request[..6], &[0x05, 0x06, 0x00, 0x01, 0x01, 0x00]);
    // The second write is held back until the first one is acknowledged.
    assert!(
        time::timeout(Duration::from_millis(200), read_command(&mut device))
            .await
            .is_err()
    );
    reply(&mut device, &request[..6]).await;

    let request = read_command(&mut device).await;
    assert_eq!(&request[..6], &[0x05, 0x06, 0x00, 0x02, 0x05, 0x10]);
    reply(&mut device, &request[..6]).await;

    assert_eq!(first.await??.register, 0x0001);
    assert_eq!(second.await??.register, 0x0002);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn report_input_changes() -> anyhow::Result<()> {
    let (transport, mut devices) = setup();
    let board = transport.add_board(BoardConfig::new(BusAddress(0x02), 3))?;
    let mut events = board.subscribe();
    let mut device = devices.recv().await.unwrap();

    reply(
        &mut device,
        &[0x02, 0x03, 0x06, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01],
    )
    .await;
    assert_eq!(
        events.recv().await,
        Some(BoardEvent::InputChanged { index: 0, value: 1 })
    );
    assert_eq!(
        events.recv().await,
        Some(BoardEvent::InputChanged { index: 2, value: 1 })
    );
    assert_eq!(
        events.recv().await,
        Some(BoardEvent::InputsUpdated {
            values: vec![1, 0, 1]
        })
    );
    assert_eq!(board.read_input(2), Some(1));
    assert_eq!(board.inputs(), vec![1, 0, 1]);

    // Corrupted checksum
    let mut corrupted = BytesMut::from(&[0x02, 0x03, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00][..]);
    crc::append(&mut corrupted);
    corrupted[4] ^= 0x01;
    device.write_all(&corrupted).await?;
    time::sleep(Duration::from_millis(50)).await;

    // Unknown board
    reply(
        &mut device,
        &[0x09, 0x03, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
    )
    .await;

    reply(
        &mut device,
        &[0x02, 0x03, 0x06, 0x00, 0x01, 0x00, 0x01, 0x00, 0x01],
    )
    .await;
    assert_eq!(
        events.recv().await,
        Some(BoardEvent::InputChanged { index: 1, value: 1 })
    );
    assert_eq!(
        events.recv().await,
        Some(BoardEvent::InputsUpdated {
            values: vec![1, 1, 1]
        })
    );

    let stats = transport.stats();
    assert_eq!(stats.frames_received, 4);
    assert_eq!(stats.crc_errors, 1);
    assert_eq!(stats.unrouted_frames, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn invoke_callbacks() -> anyhow::Result<()> {
    let (transport, mut devices) = setup();
    let board = transport.add_board(BoardConfig::new(BusAddress(0x03), 2))?;
    let (changes_tx, mut changes) = mpsc::unbounded_channel();
    let (updates_tx, mut updates) = mpsc::unbounded_channel();
    board.on_input_change(move |index, value| {
        changes_tx.send((index, value)).unwrap();
    });
    board.on_inputs_updated(move |values| {
        updates_tx.send(values.to_vec()).unwrap();
    });
    let mut device = devices.recv().await.unwrap();

    reply(&mut device, &[0x03, 0x03, 0x04, 0x00, 0x00, 0x00, 0x01]).await;
    assert_eq!(changes.recv().await, Some((1, 1)));
    assert_eq!(updates.recv().await, Some(vec![0, 1]));

    board.close();
    assert_eq!(changes.recv().await, None);
    assert_eq!(updates.recv().await, None);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn poll_while_registered() -> anyhow::Result<()> {
    let (transport, mut devices) = setup();
    let mut device = devices.recv().await.unwrap();

    let start = Instant::now();
    let board = transport.add_board(
        BoardConfig::new(BusAddress(0x01), 4).poll_interval(Duration::from_millis(100)),
    )?;
    let request = read_command(&mut device).await;
    assert_eq!(&request[..6], &[0x01, 0x03, 0x00, 0x81, 0x00, 0x0C]);
    assert!(crc::verify(&request));
    // Base interval plus the stagger for address 1
    assert!(start.elapsed() >= Duration::from_millis(120));

    board.close();
    assert!(
        time::timeout(Duration::from_secs(1), read_command(&mut device))
            .await
            .is_err()
    );
    assert!(matches!(
        transport.board(BusAddress(0x01)),
        Err(Error::UnknownBoard(BusAddress(0x01)))
    ));
    assert!(matches!(board.request_read(), Err(Error::Closed)));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn send_interlock_configuration_on_registration() -> anyhow::Result<()> {
    let (transport, mut devices) = setup();
    transport.add_board(
        BoardConfig::new(BusAddress(0x04), 4)
            .interlock(InterlockMode::Momentary)
            .input_relationship(2, InputRelationship::Lockout),
    )?;
    let mut device = devices.recv().await.unwrap();

    let first = read_command(&mut device).await;
    assert_eq!(&first[..6], &[0x04, 0x06, 0x02, 0xFD, 0xFD, 0x02]);
    let second = read_command(&mut device).await;
    assert_eq!(&second[..6], &[0x04, 0x06, 0x00, 0xFD, 0x00, 0x03]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn register_boards_once() -> anyhow::Result<()> {
    let (transport, _devices) = setup();
    let board = transport.add_board(BoardConfig::new(BusAddress(0x07), 4))?;

    assert!(matches!(
        transport.add_board(BoardConfig::new(BusAddress(0x07), 2)),
        Err(Error::BoardExists(BusAddress(0x07)))
    ));
    assert!(matches!(
        transport.board(BusAddress(0x08)),
        Err(Error::UnknownBoard(BusAddress(0x08)))
    ));
    assert_eq!(transport.board(BusAddress(0x07))?.input_count(), 4);
    assert_eq!(transport.board_addresses(), vec![BusAddress(0x07)]);

    board.close();
    transport.add_board(BoardConfig::new(BusAddress(0x07), 2))?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn reopen_lost_port() {
    let (transport, mut devices) = setup();
    let device = devices.recv().await.unwrap();
    time::sleep(Duration::from_millis(10)).await;
    assert!(transport.is_open());

    drop(device);
    let start = Instant::now();
    let _device = devices.recv().await.unwrap();
    assert!(start.elapsed() >= Config::default().reconnect_delay);
    time::sleep(Duration::from_millis(10)).await;
    assert!(transport.is_open());
    assert_eq!(transport.stats().connects, 2);
}

#[tokio::test(start_paused = true)]
async fn close_without_reconnect() {
    let (transport, mut devices) = setup();
    let mut device = devices.recv().await.unwrap();

    transport.close();
    transport.close();

    let mut buf = [0; 1];
    assert_eq!(device.read(&mut buf).await.unwrap(), 0);
    assert!(devices.recv().await.is_none());
    assert!(!transport.is_open());
    assert!(matches!(
        transport.add_board(BoardConfig::new(BusAddress(0x01), 1)),
        Err(Error::Closed)
    ));
}

#[tokio::test(start_paused = true)]
async fn ignore_echoed_read_request() -> anyhow::Result<()> {
    let (transport, mut devices) = setup();
    let board = transport.add_board(BoardConfig::new(BusAddress(0x02), 3))?;
    let mut events = board.subscribe();
    let mut device = devices.recv().await.unwrap();

    reply(
        &mut device,
        &[0x02, 0x03, 0x06, 0x00, 0x01, 0x00, 0x01, 0x00, 0x01],
    )
    .await;
    while let Some(event) = events.try_recv() {
        if matches!(event, BoardEvent::InputsUpdated { .. }) {
            break;
        }
    }
    assert_eq!(board.inputs(), vec![1, 1, 1]);

    // A read request reflected by the line
    reply(&mut device, &[0x02, 0x03, 0x00, 0x81, 0x00, 0x0C]).await;

    assert_eq!(board.inputs(), vec![1, 1, 1]);
    assert_eq!(events.try_recv(), None);
    assert_eq!(transport.stats().frames_received, 2);
    assert_eq!(transport.stats().crc_errors, 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn reject_commands_after_transport_close() -> anyhow::Result<()> {
    let (transport, mut devices) = setup();
    let board = transport.add_board(
        BoardConfig::new(BusAddress(0x02), 4).poll_interval(Duration::from_millis(100)),
    )?;
    let _device = devices.recv().await.unwrap();

    let pending = {
        let board = board.clone();
        tokio::spawn(async move { board.set_relay(1, RelayState::On, 0).await })
    };
    time::sleep(Duration::from_millis(50)).await;

    let start = Instant::now();
    transport.close();
    assert!(matches!(pending.await?, Err(Error::Closed)));
    assert!(start.elapsed() < Config::default().ack_timeout);

    assert!(matches!(
        board.set_relay(1, RelayState::On, 0).await,
        Err(Error::Closed)
    ));
    assert!(start.elapsed() < Config::default().ack_timeout);
    assert!(matches!(board.request_read(), Err(Error::Closed)));
    assert!(matches!(
        board.set_interlock(InterlockMode::Momentary),
        Err(Error::Closed)
    ));

    time::sleep(Duration::from_secs(1)).await;
    assert_eq!(transport.pending_writes(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn retry_after_open_failure() {
    let (host, mut device) = tokio::io::duplex(1024);
    let transport = scripted(vec![
        Err(io::Error::from(io::ErrorKind::NotFound)),
        Ok(TestPort {
            inner: host,
            broken: false,
        }),
    ]);
    let start = Instant::now();
    transport.enqueue(Bytes::from_static(b"AAAAAAAA"));

    assert_eq!(&read_command(&mut device).await, b"AAAAAAAA");
    assert!(start.elapsed() >= Config::default().reconnect_delay);
    assert!(transport.is_open());
    assert_eq!(transport.stats().connects, 1);
}

#[tokio::test(start_paused = true)]
async fn reopen_after_write_error() {
    let (broken_host, _broken_device) = tokio::io::duplex(1024);
    let (host, mut device) = tokio::io::duplex(1024);
    let transport = scripted(vec![
        Ok(TestPort {
            inner: broken_host,
            broken: true,
        }),
        Ok(TestPort {
            inner: host,
            broken: false,
        }),
    ]);
    transport.enqueue(Bytes::from_static(b"AAAAAAAA"));

    time::sleep(Duration::from_millis(100)).await;
    let stats = transport.stats();
    assert_eq!(stats.write_errors, 1);
    assert_eq!(stats.writes_ok, 0);
    assert!(!transport.is_open());

    time::sleep(Config::default().reconnect_delay).await;
    assert!(transport.is_open());
    assert_eq!(transport.stats().connects, 2);

    transport.enqueue(Bytes::from_static(b"BBBBBBBB"));
    assert_eq!(&read_command(&mut device).await, b"BBBBBBBB");
    assert_eq!(transport.stats().writes_ok, 1);
}

#[tokio::test(start_paused = true)]
async fn raise_zero_send_interval() {
    let (devices, mut rx) = mpsc::unbounded_channel();
    let transport = Transport::new(
        MockConnector { devices },
        Config {
            send_interval: Duration::ZERO,
            ..Config::default()
        },
    );
    assert_eq!(transport.config().send_interval, MIN_SEND_INTERVAL);

    transport.enqueue(Bytes::from_static(b"AAAAAAAA"));
    let mut device = rx.recv().await.unwrap();
    assert_eq!(&read_command(&mut device).await, b"AAAAAAAA");
}

#[tokio::test(start_paused = true)]
async fn never_poll_broadcast_address() -> anyhow::Result<()> {
    let (transport, mut devices) = setup();
    let mut device = devices.recv().await.unwrap();
    transport.add_board(
        BoardConfig::new(BusAddress::broadcast(), 4).poll_interval(Duration::from_millis(100)),
    )?;
    assert!(
        time::timeout(Duration::from_secs(1), read_command(&mut device))
            .await
            .is_err()
    );
    Ok(())
}
