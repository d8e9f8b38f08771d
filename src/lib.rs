// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Core of a USB-attached JTAG/SPI bridge.
//!
//! A host delivers opaque command packets over a vendor-class bulk pipe; the
//! device clocks the corresponding bit-serial traffic out to an attached FPGA
//! or SPI peripheral and, for the read variants, returns the sampled bytes
//! over the same pipe. The pieces:
//!
//! - [`hw`]: the register-level seam. Everything above it is portable; the
//!   firmware binary binds it to a real controller, tests bind it to an
//!   in-memory fake.
//! - [`endpoint`]: buffer ownership, a double-buffered bulk OUT ring filled
//!   from interrupt context and drained by the main loop, plus the
//!   single-outstanding-response transmit policy.
//! - [`control`]: the enumeration state machine for the standard-request
//!   subset a single-interface vendor device needs.
//! - [`engine`]: bit-banged JTAG and shift-register SPI clocking.
//! - [`dispatch`]: the vendor command decoder driving the engine and the
//!   board-control operations.
//!
//! Two execution contexts share exactly one thing: the OUT ring. Its slots
//! hand over through atomic ready flags, so the interrupt handler never
//! writes a buffer the main loop is still reading. Every busy-wait in here
//! polls a hardware condition with no timeout; a wedged peripheral hangs the
//! device, which is the documented contract of this class of adapter.

#![no_std]

#[cfg(test)]
extern crate std;

#[macro_use]
mod log;

pub mod board;
pub mod control;
pub mod descriptor;
pub mod dispatch;
pub mod endpoint;
pub mod engine;
pub mod hw;

#[cfg(test)]
pub(crate) mod testhw;

/// Packet size of every endpoint, in bytes.
pub const PACKET_SIZE: usize = 64;

/// Longest vendor-command payload: one bulk packet minus the two-byte
/// command header.
pub const MAX_PAYLOAD: usize = PACKET_SIZE - 2;

#[cfg(test)]
mod tests {
    use std::vec;

    use zerocopy::AsBytes;

    use crate::control::ControlStage;
    use crate::descriptor::{DEVICE_TABLES, SERIAL_STRING_INDEX};
    use crate::dispatch::Dispatcher;
    use crate::endpoint::Endpoints;
    use crate::testhw::{service, setup, FakeBoard, FakeUsb, LoopbackLink};

    /// Enumeration followed by vendor traffic, the way the firmware glue
    /// wires it: interrupt-side event servicing, main-side dispatch.
    #[test]
    fn full_pipeline() {
        let mut hw = FakeUsb::new();
        let ep = Endpoints::new();
        let mut control = ControlStage::new();
        let mut link = LoopbackLink::new();
        let mut board = FakeBoard::new();
        let mut dispatcher = Dispatcher::new();

        control.set_serial(board.serial_block());
        ep.init(&mut hw);

        // Device descriptor, full length.
        hw.host_control(setup(0x80, 0x06, 0x0100, 0, 64));
        service(&mut hw, &mut control, &ep);
        assert_eq!(
            hw.ctrl_data.last().unwrap().as_slice(),
            DEVICE_TABLES.device.as_bytes()
        );

        // Address assignment and configuration.
        hw.host_control(setup(0x00, 0x05, 7, 0, 0));
        service(&mut hw, &mut control, &ep);
        assert_eq!(hw.address, 7);
        hw.host_control(setup(0x00, 0x09, 1, 0, 0));
        service(&mut hw, &mut control, &ep);
        assert_eq!(control.configuration(), 1);

        // Serial number string, straight from the board's storage block.
        hw.host_control(setup(0x80, 0x06, 0x0300 | u16::from(SERIAL_STRING_INDEX), 0, 64));
        service(&mut hw, &mut control, &ep);
        let reply = hw.ctrl_data.last().unwrap().clone();
        assert_eq!(reply.len(), 34);
        assert_eq!(reply[2], board.serial_block()[0]);

        // A JTAG write-read on looped-back wiring echoes the TDI half.
        assert!(hw.host_send_bulk(&[0x01, 0x01, 0xff, 0x01]));
        service(&mut hw, &mut control, &ep);
        let packet = ep.poll_received().unwrap();
        dispatcher.handle(packet, &mut link, &mut board, &ep, &mut hw);
        ep.release_received(&mut hw);
        assert_eq!(hw.host_collect(), Some(vec![0x01]));

        // An odd-length JTAG payload produces no response, only the sticky
        // error, which the explicit read clears.
        assert!(hw.host_send_bulk(&[0x01, 0x00, 0x01]));
        service(&mut hw, &mut control, &ep);
        let packet = ep.poll_received().unwrap();
        dispatcher.handle(packet, &mut link, &mut board, &ep, &mut hw);
        ep.release_received(&mut hw);
        assert_eq!(hw.host_collect(), None);

        assert!(hw.host_send_bulk(&[0x00, 0x05]));
        service(&mut hw, &mut control, &ep);
        let packet = ep.poll_received().unwrap();
        dispatcher.handle(packet, &mut link, &mut board, &ep, &mut hw);
        ep.release_received(&mut hw);
        let status = hw.host_collect().unwrap();
        assert_eq!(status.len(), 1);
        assert_ne!(status[0], 0);

        // A bus reset snaps everything back to the initial state.
        hw.host_reset();
        service(&mut hw, &mut control, &ep);
        assert_eq!(hw.address, 0);
        assert_eq!(control.configuration(), 0);
        assert!(ep.poll_received().is_none());
    }
}
