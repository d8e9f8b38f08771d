// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The vendor command dispatcher.
//!
//! Each drained bulk OUT packet decodes to exactly one operation: byte 0
//! selects the group, byte 1 the sub-operation, and the rest is payload.
//! Every malformed packet resolves to either a silent drop (no room for a
//! header) or the sticky error byte; there is no fatal path. The error
//! byte persists until the host explicitly reads it back, so a failed
//! command can be diagnosed after the fact with a single follow-up request.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::board::{Board, SERIAL_LEN};
use crate::endpoint::Endpoints;
use crate::engine::Transactions;
use crate::hw::UsbHw;
use crate::PACKET_SIZE;

/// Sticky error values. Anything nonzero means a command was rejected since
/// the last explicit status read.
pub const ERR_NONE: u8 = 0x00;
/// Payload length or parity did not fit the selected operation.
pub const ERR_LENGTH: u8 = 0x01;
/// Unrecognized group or sub-operation byte.
pub const ERR_COMMAND: u8 = 0x02;

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
enum CommandGroup {
    Adapter = 0x00,
    Jtag = 0x01,
    Spi = 0x02,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
enum AdapterOp {
    ResetTarget = 0x00,
    ReadControl = 0x01,
    WriteControl = 0x02,
    ReadVoltage = 0x03,
    Delay = 0x04,
    ReadError = 0x05,
    ReadSerial = 0xfd,
    WriteSerial = 0xfe,
    EnterUpdate = 0xff,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
enum JtagOp {
    Write = 0x00,
    WriteRead = 0x01,
    /// SPI traffic to the device sharing the JTAG lines, select asserted.
    SpiWrite = 0x02,
    SpiWriteRead = 0x03,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
enum SpiOp {
    Write = 0x00,
    WriteRead = 0x01,
}

/// TMS bytes followed by an equal count of TDI bytes. `None` when the
/// payload is empty or odd.
fn split_halves(payload: &[u8]) -> Option<(&[u8], &[u8])> {
    if payload.is_empty() || payload.len() % 2 != 0 {
        return None;
    }
    Some(payload.split_at(payload.len() / 2))
}

pub struct Dispatcher {
    error: u8,
}

impl Dispatcher {
    pub const fn new() -> Self {
        Dispatcher { error: ERR_NONE }
    }

    /// The current sticky error byte. On the wire it is only observable
    /// through the read-error operation, which also clears it.
    pub fn error(&self) -> u8 {
        self.error
    }

    /// Decode one drained OUT packet and perform the operation it selects,
    /// answering through `ep` where the operation produces a response.
    pub fn handle<H, T, B>(
        &mut self,
        packet: &[u8],
        link: &mut T,
        board: &mut B,
        ep: &Endpoints,
        hw: &mut H,
    ) where
        H: UsbHw,
        T: Transactions,
        B: Board,
    {
        if packet.len() < 2 {
            // No room for a command header; not even worth an error.
            return;
        }
        let payload = &packet[2..];
        match CommandGroup::from_u8(packet[0]) {
            Some(CommandGroup::Adapter) => self.adapter(packet[1], payload, board, ep, hw),
            Some(CommandGroup::Jtag) => self.jtag(packet[1], payload, link, ep, hw),
            Some(CommandGroup::Spi) => self.spi(packet[1], payload, link, ep, hw),
            None => self.reject(ERR_COMMAND),
        }
    }

    fn reject(&mut self, error: u8) {
        warn!("vendor command rejected, error {}", error);
        self.error = error;
    }

    fn adapter<H: UsbHw, B: Board>(
        &mut self,
        op: u8,
        payload: &[u8],
        board: &mut B,
        ep: &Endpoints,
        hw: &mut H,
    ) {
        match AdapterOp::from_u8(op) {
            Some(AdapterOp::ResetTarget) if payload.is_empty() => board.reset_target(),
            Some(AdapterOp::ReadControl) if payload.len() == 1 => {
                // Index 0 is the live control byte; anything above it is the
                // backing store, so index 1 reads the persisted default.
                let value = match payload[0] {
                    0 => board.control(),
                    i => board.nvm_read(i - 1),
                };
                ep.send(hw, &[value]);
            }
            Some(AdapterOp::WriteControl) if payload.len() == 2 => match payload[0] {
                0 => board.set_control(payload[1]),
                i => board.nvm_write(i - 1, payload[1]),
            },
            Some(AdapterOp::ReadVoltage) if payload.is_empty() => {
                ep.send(hw, &[board.sense_voltage()]);
            }
            Some(AdapterOp::Delay) if payload.len() == 2 => board.delay(payload[0], payload[1]),
            Some(AdapterOp::ReadError) if payload.is_empty() => {
                // The one and only operation that clears the sticky byte.
                let error = self.error;
                self.error = ERR_NONE;
                ep.send(hw, &[error]);
            }
            Some(AdapterOp::ReadSerial) if payload.is_empty() => {
                let serial = board.serial();
                ep.send(hw, &serial);
            }
            Some(AdapterOp::WriteSerial) if payload.len() == SERIAL_LEN => {
                let mut block = [0; SERIAL_LEN];
                block.copy_from_slice(payload);
                board.set_serial(&block);
            }
            Some(AdapterOp::EnterUpdate) if payload.is_empty() => board.enter_update(),
            Some(_) => self.reject(ERR_LENGTH),
            None => self.reject(ERR_COMMAND),
        }
    }

    fn jtag<H: UsbHw, T: Transactions>(
        &mut self,
        op: u8,
        payload: &[u8],
        link: &mut T,
        ep: &Endpoints,
        hw: &mut H,
    ) {
        let mut out = [0u8; PACKET_SIZE];
        match JtagOp::from_u8(op) {
            Some(JtagOp::Write) => match split_halves(payload) {
                Some((tms, tdi)) => link.jtag_write(tms, tdi),
                None => self.reject(ERR_LENGTH),
            },
            Some(JtagOp::WriteRead) => match split_halves(payload) {
                Some((tms, tdi)) => {
                    let n = tms.len();
                    link.jtag_write_read(tms, tdi, &mut out[..n]);
                    ep.send(hw, &out[..n]);
                }
                None => self.reject(ERR_LENGTH),
            },
            Some(JtagOp::SpiWrite) if !payload.is_empty() => link.spi_write(payload, true),
            Some(JtagOp::SpiWriteRead) if !payload.is_empty() => {
                let n = payload.len();
                link.spi_write_read(payload, &mut out[..n], true);
                ep.send(hw, &out[..n]);
            }
            Some(JtagOp::SpiWrite) | Some(JtagOp::SpiWriteRead) => {
                self.reject(ERR_LENGTH)
            }
            None => self.reject(ERR_COMMAND),
        }
    }

    fn spi<H: UsbHw, T: Transactions>(
        &mut self,
        op: u8,
        payload: &[u8],
        link: &mut T,
        ep: &Endpoints,
        hw: &mut H,
    ) {
        let mut out = [0u8; PACKET_SIZE];
        match SpiOp::from_u8(op) {
            Some(SpiOp::Write) if !payload.is_empty() => link.spi_write(payload, false),
            Some(SpiOp::WriteRead) if !payload.is_empty() => {
                let n = payload.len();
                link.spi_write_read(payload, &mut out[..n], false);
                ep.send(hw, &out[..n]);
            }
            Some(_) => self.reject(ERR_LENGTH),
            None => self.reject(ERR_COMMAND),
        }
    }
}

#[cfg(test)]
mod test {
    use std::vec;

    use super::*;
    use crate::testhw::{FakeBoard, FakeUsb, LoopbackLink};

    struct Rig {
        hw: FakeUsb,
        ep: Endpoints,
        link: LoopbackLink,
        board: FakeBoard,
        dispatcher: Dispatcher,
    }

    impl Rig {
        fn new() -> Self {
            let mut hw = FakeUsb::new();
            let ep = Endpoints::new();
            ep.init(&mut hw);
            Rig {
                hw,
                ep,
                link: LoopbackLink::new(),
                board: FakeBoard::new(),
                dispatcher: Dispatcher::new(),
            }
        }

        fn run(&mut self, packet: &[u8]) -> Option<std::vec::Vec<u8>> {
            self.dispatcher.handle(
                packet,
                &mut self.link,
                &mut self.board,
                &self.ep,
                &mut self.hw,
            );
            self.hw.host_collect()
        }
    }

    #[test]
    fn sub_header_packets_are_dropped_silently() {
        let mut rig = Rig::new();
        assert_eq!(rig.run(&[]), None);
        assert_eq!(rig.run(&[0x01]), None);
        assert_eq!(rig.dispatcher.error(), ERR_NONE);
    }

    #[test]
    fn unknown_opcodes_set_the_sticky_error() {
        let mut rig = Rig::new();
        assert_eq!(rig.run(&[0x07, 0x00]), None);
        assert_eq!(rig.dispatcher.error(), ERR_COMMAND);

        let mut rig = Rig::new();
        assert_eq!(rig.run(&[0x01, 0x09, 0xaa, 0xbb]), None);
        assert_eq!(rig.dispatcher.error(), ERR_COMMAND);

        let mut rig = Rig::new();
        assert_eq!(rig.run(&[0x00, 0x42]), None);
        assert_eq!(rig.dispatcher.error(), ERR_COMMAND);
    }

    #[test]
    fn jtag_write_splits_payload_into_halves() {
        let mut rig = Rig::new();
        assert_eq!(rig.run(&[0x01, 0x00, 0x10, 0x20, 0x30, 0x40]), None);
        assert_eq!(
            rig.link.jtag_writes,
            [(vec![0x10, 0x20], vec![0x30, 0x40])]
        );
    }

    /// The §6 wire example: one group, TMS 0xFF, TDI 0x01, looped back.
    #[test]
    fn jtag_write_read_echoes_loopback() {
        let mut rig = Rig::new();
        assert_eq!(rig.run(&[0x01, 0x01, 0xff, 0x01]), Some(vec![0x01]));
        assert_eq!(rig.dispatcher.error(), ERR_NONE);
    }

    #[test]
    fn odd_jtag_payload_is_an_error_with_no_response() {
        let mut rig = Rig::new();
        assert_eq!(rig.run(&[0x01, 0x00, 0x01]), None);
        assert_eq!(rig.dispatcher.error(), ERR_LENGTH);
        assert!(rig.link.jtag_writes.is_empty());

        let mut rig = Rig::new();
        assert_eq!(rig.run(&[0x01, 0x01, 0x01, 0x02, 0x03]), None);
        assert_eq!(rig.dispatcher.error(), ERR_LENGTH);
    }

    #[test]
    fn empty_jtag_payload_is_an_error() {
        let mut rig = Rig::new();
        assert_eq!(rig.run(&[0x01, 0x00]), None);
        assert_eq!(rig.dispatcher.error(), ERR_LENGTH);
    }

    /// A failed command's error survives unrelated valid traffic and clears
    /// only on the explicit read.
    #[test]
    fn sticky_error_persists_until_read() {
        let mut rig = Rig::new();
        assert_eq!(rig.run(&[0x01, 0x00, 0x01]), None);
        assert_eq!(rig.dispatcher.error(), ERR_LENGTH);

        assert_eq!(rig.run(&[0x02, 0x01, 0x5a]), Some(vec![0x5a]));
        assert_eq!(rig.dispatcher.error(), ERR_LENGTH);

        assert_eq!(rig.run(&[0x00, 0x05]), Some(vec![ERR_LENGTH]));
        assert_eq!(rig.dispatcher.error(), ERR_NONE);
        assert_eq!(rig.run(&[0x00, 0x05]), Some(vec![ERR_NONE]));
    }

    #[test]
    fn muxed_spi_asserts_select_and_plain_spi_does_not() {
        let mut rig = Rig::new();
        assert_eq!(rig.run(&[0x01, 0x02, 1, 2, 3]), None);
        assert_eq!(rig.run(&[0x01, 0x03, 9]), Some(vec![9]));
        assert_eq!(rig.run(&[0x02, 0x00, 4]), None);
        assert_eq!(rig.run(&[0x02, 0x01, 7, 8]), Some(vec![7, 8]));
        assert_eq!(rig.link.spi_selects, [true, true, false, false]);
    }

    #[test]
    fn empty_spi_payload_is_an_error() {
        for packet in [[0x02u8, 0x00], [0x02, 0x01], [0x01, 0x02], [0x01, 0x03]] {
            let mut rig = Rig::new();
            assert_eq!(rig.run(&packet), None);
            assert_eq!(rig.dispatcher.error(), ERR_LENGTH);
        }
    }

    #[test]
    fn control_byte_and_nvm_round_trip() {
        let mut rig = Rig::new();
        assert_eq!(rig.run(&[0x00, 0x02, 0x00, 0x6f]), None);
        assert_eq!(rig.run(&[0x00, 0x01, 0x00]), Some(vec![0x6f]));
        assert_eq!(rig.board.control, 0x6f);

        // Index 1 is the persisted default, i.e. backing byte 0.
        assert_eq!(rig.run(&[0x00, 0x02, 0x01, 0x12]), None);
        assert_eq!(rig.run(&[0x00, 0x01, 0x01]), Some(vec![0x12]));
        assert_eq!(rig.board.nvm[0], 0x12);
    }

    #[test]
    fn voltage_delay_and_reset() {
        let mut rig = Rig::new();
        rig.board.voltage = 0x7b;
        assert_eq!(rig.run(&[0x00, 0x03]), Some(vec![0x7b]));

        assert_eq!(rig.run(&[0x00, 0x04, 10, 250]), None);
        assert_eq!(rig.board.delays, [(10, 250)]);

        assert_eq!(rig.run(&[0x00, 0x00]), None);
        assert_eq!(rig.board.resets, 1);
    }

    #[test]
    fn serial_round_trip() {
        let mut rig = Rig::new();
        let mut packet = vec![0x00, 0xfe];
        packet.extend_from_slice(b"JT49-00000000042");
        assert_eq!(rig.run(&packet), None);
        assert_eq!(
            rig.run(&[0x00, 0xfd]),
            Some(b"JT49-00000000042".to_vec())
        );
    }

    #[test]
    fn fixed_length_ops_reject_bad_payloads() {
        for packet in [
            &[0x00u8, 0x00, 0x01][..],
            &[0x00, 0x01][..],
            &[0x00, 0x02, 0x00][..],
            &[0x00, 0x03, 0x00][..],
            &[0x00, 0x04, 0x01][..],
            &[0x00, 0x05, 0x00][..],
            &[0x00, 0xfd, 0x00][..],
            &[0x00, 0xfe, 0x01, 0x02][..],
            &[0x00, 0xff, 0x00][..],
        ] {
            let mut rig = Rig::new();
            assert_eq!(rig.run(packet), None);
            assert_eq!(rig.dispatcher.error(), ERR_LENGTH, "packet {:?}", packet);
        }
    }

    #[test]
    #[should_panic(expected = "update mode")]
    fn enter_update_is_terminal() {
        let mut rig = Rig::new();
        let _ = rig.run(&[0x00, 0xff]);
    }
}
