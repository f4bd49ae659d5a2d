// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Polls one relay board and mirrors input 0 onto relay 0

use std::time::Duration;

use tokio_relay_bus::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let tty_path = "/dev/ttyUSB0";
    let address = BusAddress(0x01);

    let transport = Transport::open(tty_path, 9600);
    let board = transport.add_board(
        BoardConfig::new(address, 8)
            .poll_interval(Duration::from_millis(500))
            .interlock(InterlockMode::Unrelated),
    )?;

    println!("Waiting for input changes on board {address}");
    let mut events = board.subscribe();
    while let Some(event) = events.recv().await {
        match event {
            BoardEvent::InputChanged { index: 0, value } => {
                let state = RelayState::from(value != 0);
                match board.set_relay(0, state, 0).await {
                    Ok(ack) => println!("Relay 0 switched: {ack:?}"),
                    Err(err) => eprintln!("Relay 0 not switched: {err}"),
                }
            }
            BoardEvent::InputsUpdated { values } => println!("Inputs: {values:?}"),
            _ => {}
        }
    }

    transport.shutdown().await;
    Ok(())
}
