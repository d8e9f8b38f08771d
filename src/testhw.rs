// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory peripherals for the test suite: a USB controller fake that
//! also plays the host side of the bus, a board fake, and a loopback
//! transaction link.

use std::collections::VecDeque;
use std::vec::Vec;

use crate::board::{nvm, Board, SERIAL_LEN};
use crate::control::ControlStage;
use crate::endpoint::Endpoints;
use crate::engine::Transactions;
use crate::hw::{BulkEp, UsbEvent, UsbHw};
use crate::PACKET_SIZE;

/// Builds the 8 bytes of a SETUP packet.
pub(crate) fn setup(request_type: u8, request: u8, value: u16, index: u16, length: u16) -> [u8; 8] {
    let mut p = [0; 8];
    p[0] = request_type;
    p[1] = request;
    p[2..4].copy_from_slice(&value.to_le_bytes());
    p[4..6].copy_from_slice(&index.to_le_bytes());
    p[6..8].copy_from_slice(&length.to_le_bytes());
    p
}

/// Drains pending controller events the way the firmware's interrupt
/// handler does.
pub(crate) fn service(hw: &mut FakeUsb, control: &mut ControlStage, ep: &Endpoints) {
    use crate::descriptor::DEVICE_TABLES;
    while let Some(event) = hw.poll_event() {
        match event {
            UsbEvent::BusReset => {
                ep.init(hw);
                control.bus_reset();
            }
            UsbEvent::Setup(p) => control.on_setup(hw, ep, &p, &DEVICE_TABLES),
            UsbEvent::ControlIn => control.on_control_in(hw),
            UsbEvent::ControlOut => control.on_control_out(hw),
            UsbEvent::RxReady => ep.rx_complete(hw),
            UsbEvent::TxDone => {}
        }
    }
}

pub(crate) struct FakeUsb {
    events: VecDeque<UsbEvent>,
    pub address: u8,
    /// OUT packet the host delivered, waiting for `take_rx`.
    rx: Option<(usize, [u8; PACKET_SIZE])>,
    rx_gate_open: bool,
    /// Committed bulk IN payload the host has not collected yet.
    tx: Option<Vec<u8>>,
    /// `tx_busy` polls to report busy before the host collects on its own;
    /// bounds the otherwise unbounded wait in `Endpoints::send`.
    tx_delay: usize,
    /// Busy polls observed since the last `hold_tx`.
    pub busy_polls: usize,
    /// IN payloads auto-collected while a send was waiting.
    pub collected: Vec<Vec<u8>>,
    /// Control-endpoint replies, oldest first.
    pub ctrl_data: Vec<Vec<u8>>,
    pub ctrl_stalled: bool,
    /// Halt flag and data toggle per bulk endpoint, OUT then IN.
    pub halts: [bool; 2],
    pub toggles: [bool; 2],
}

impl FakeUsb {
    pub fn new() -> Self {
        FakeUsb {
            events: VecDeque::new(),
            address: 0,
            rx: None,
            rx_gate_open: false,
            tx: None,
            tx_delay: 0,
            busy_polls: 0,
            collected: Vec::new(),
            ctrl_data: Vec::new(),
            ctrl_stalled: false,
            halts: [false; 2],
            toggles: [false; 2],
        }
    }

    /// Host side: deliver one bulk OUT packet. Returns false when the
    /// device is NAKing (gate shut), i.e. the packet would not go through.
    pub fn host_send_bulk(&mut self, bytes: &[u8]) -> bool {
        assert!(bytes.len() <= PACKET_SIZE);
        if !self.rx_gate_open || self.rx.is_some() {
            return false;
        }
        let mut buf = [0; PACKET_SIZE];
        buf[..bytes.len()].copy_from_slice(bytes);
        self.rx = Some((bytes.len(), buf));
        // One packet per arming.
        self.rx_gate_open = false;
        self.events.push_back(UsbEvent::RxReady);
        true
    }

    /// Host side: collect the committed bulk IN payload, if any.
    pub fn host_collect(&mut self) -> Option<Vec<u8>> {
        let payload = self.tx.take()?;
        self.events.push_back(UsbEvent::TxDone);
        Some(payload)
    }

    /// Host side: start a control transfer.
    pub fn host_control(&mut self, packet: [u8; 8]) {
        // A fresh SETUP clears a protocol stall.
        self.ctrl_stalled = false;
        self.events.push_back(UsbEvent::Setup(packet));
    }

    /// Host side: reset the bus.
    pub fn host_reset(&mut self) {
        self.events.push_back(UsbEvent::BusReset);
    }

    /// Keep `tx_busy` reporting busy for the next `polls` polls, emulating
    /// a host that is slow to read the previous response.
    pub fn hold_tx(&mut self, polls: usize) {
        self.tx_delay = polls;
        self.busy_polls = 0;
    }
}

impl UsbHw for FakeUsb {
    fn poll_event(&mut self) -> Option<UsbEvent> {
        self.events.pop_front()
    }

    fn reset_config(&mut self) {
        self.address = 0;
        self.rx = None;
        self.rx_gate_open = false;
        self.tx = None;
        self.tx_delay = 0;
        self.ctrl_stalled = false;
        self.halts = [false; 2];
        self.toggles = [false; 2];
    }

    fn set_address(&mut self, addr: u8) {
        self.address = addr;
    }

    fn ctrl_reply(&mut self, data: &[u8]) {
        assert!(data.len() <= PACKET_SIZE);
        self.ctrl_data.push(data.to_vec());
        // The host collects the reply (or the zero-length handshake)
        // immediately.
        self.events.push_back(UsbEvent::ControlIn);
    }

    fn ctrl_expect_status(&mut self) {
        self.events.push_back(UsbEvent::ControlOut);
    }

    fn ctrl_stall(&mut self) {
        self.ctrl_stalled = true;
    }

    fn take_rx(&mut self, dst: &mut [u8; PACKET_SIZE]) -> usize {
        let (len, buf) = self.rx.take().expect("take_rx without a completed packet");
        dst.copy_from_slice(&buf);
        len
    }

    fn rx_enable(&mut self) {
        self.rx_gate_open = true;
    }

    fn tx_busy(&mut self) -> bool {
        if self.tx.is_none() {
            return false;
        }
        if self.tx_delay > 0 {
            self.tx_delay -= 1;
            self.busy_polls += 1;
            return true;
        }
        // The host finally reads the outstanding payload.
        let payload = self.tx.take().unwrap();
        self.collected.push(payload);
        self.events.push_back(UsbEvent::TxDone);
        false
    }

    fn start_tx(&mut self, data: &[u8]) {
        assert!(data.len() <= PACKET_SIZE);
        assert!(
            self.tx.is_none(),
            "IN payload committed over an uncollected one"
        );
        self.tx = Some(data.to_vec());
    }

    fn set_halt(&mut self, ep: BulkEp, halt: bool) {
        let i = ep as usize;
        self.halts[i] = halt;
        if !halt {
            self.toggles[i] = false;
        }
    }

    fn halted(&mut self, ep: BulkEp) -> bool {
        self.halts[ep as usize]
    }
}

/// Board fake backed by plain arrays, with call counters for the
/// side-effect-only operations.
pub(crate) struct FakeBoard {
    pub control: u8,
    pub nvm: [u8; 32],
    pub voltage: u8,
    pub resets: usize,
    pub delays: Vec<(u8, u8)>,
}

impl FakeBoard {
    pub fn new() -> Self {
        let mut nvm = [0xff; 32];
        nvm[nvm::SERIAL as usize..nvm::SERIAL as usize + SERIAL_LEN]
            .copy_from_slice(b"TEST-SERIAL-0001");
        FakeBoard {
            control: 0,
            nvm,
            voltage: 0,
            resets: 0,
            delays: Vec::new(),
        }
    }

    pub fn serial_block(&mut self) -> [u8; SERIAL_LEN] {
        self.serial()
    }
}

impl Board for FakeBoard {
    fn reset_target(&mut self) {
        self.resets += 1;
    }

    fn control(&mut self) -> u8 {
        self.control
    }

    fn set_control(&mut self, value: u8) {
        self.control = value;
    }

    fn nvm_read(&mut self, index: u8) -> u8 {
        self.nvm[index as usize]
    }

    fn nvm_write(&mut self, index: u8, value: u8) {
        self.nvm[index as usize] = value;
    }

    fn sense_voltage(&mut self) -> u8 {
        self.voltage
    }

    fn delay(&mut self, ms: u8, us: u8) {
        self.delays.push((ms, us));
    }

    fn serial(&mut self) -> [u8; SERIAL_LEN] {
        let mut block = [0; SERIAL_LEN];
        block.copy_from_slice(&self.nvm[nvm::SERIAL as usize..nvm::SERIAL as usize + SERIAL_LEN]);
        block
    }

    fn set_serial(&mut self, serial: &[u8; SERIAL_LEN]) {
        self.nvm[nvm::SERIAL as usize..nvm::SERIAL as usize + SERIAL_LEN].copy_from_slice(serial);
    }

    fn enter_update(&mut self) -> ! {
        panic!("update mode");
    }
}

/// Transaction link with TDI wired back to TDO and the SPI data looped, so
/// read variants echo their stimulus. Records what it was asked to do.
pub(crate) struct LoopbackLink {
    pub jtag_writes: Vec<(Vec<u8>, Vec<u8>)>,
    pub spi_selects: Vec<bool>,
}

impl LoopbackLink {
    pub fn new() -> Self {
        LoopbackLink {
            jtag_writes: Vec::new(),
            spi_selects: Vec::new(),
        }
    }
}

impl Transactions for LoopbackLink {
    fn jtag_write(&mut self, tms: &[u8], tdi: &[u8]) {
        self.jtag_writes.push((tms.to_vec(), tdi.to_vec()));
    }

    fn jtag_write_read(&mut self, tms: &[u8], tdi: &[u8], out: &mut [u8]) {
        out.copy_from_slice(tdi);
        self.jtag_writes.push((tms.to_vec(), tdi.to_vec()));
    }

    fn spi_write(&mut self, _data: &[u8], assert_select: bool) {
        self.spi_selects.push(assert_select);
    }

    fn spi_write_read(&mut self, data: &[u8], out: &mut [u8], assert_select: bool) {
        out.copy_from_slice(data);
        self.spi_selects.push(assert_select);
    }
}
