// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The register-level seam between the portable core and a concrete USB
//! device controller.
//!
//! The firmware binary implements [`UsbHw`] directly over memory-mapped
//! registers; the test suite substitutes an in-memory fake that also plays
//! the host side of the bus. None of these operations can fail from the
//! caller's perspective; a misbehaving controller shows up only as a
//! busy-wait that never unblocks.

use crate::PACKET_SIZE;

/// One completed unit of controller activity, as reported by the transfer
/// and bus interrupts.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UsbEvent {
    /// The host reset the bus.
    BusReset,
    /// A SETUP packet arrived on the control endpoint.
    Setup([u8; 8]),
    /// The host collected the armed control IN payload.
    ControlIn,
    /// A control OUT stage (for us, always the zero-length status handshake)
    /// completed.
    ControlOut,
    /// A bulk OUT packet finished filling its hardware buffer.
    RxReady,
    /// The host collected the committed bulk IN payload.
    TxDone,
}

/// Selects one of the two bulk endpoints.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BulkEp {
    Out,
    In,
}

pub trait UsbHw {
    /// Pop the next pending event, if any. Called until it returns `None`
    /// whenever the transfer interrupt fires.
    fn poll_event(&mut self) -> Option<UsbEvent>;

    /// Return endpoints, data toggles, halt bits and the device address to
    /// their power-up defaults. Runs at startup and on every bus reset.
    fn reset_config(&mut self);

    /// Apply a device address. The enumeration machine calls this only once
    /// the status stage of the corresponding SET_ADDRESS has gone out.
    fn set_address(&mut self, addr: u8);

    /// Arm the control endpoint to answer the next IN with `data` (at most
    /// one packet). An empty slice is the zero-length handshake.
    fn ctrl_reply(&mut self, data: &[u8]);

    /// Arm the control endpoint for the zero-length OUT that closes an IN
    /// data stage.
    fn ctrl_expect_status(&mut self);

    /// Stall the control endpoint until the next SETUP packet.
    fn ctrl_stall(&mut self);

    /// Copy the completed bulk OUT packet into `dst` and return its length.
    /// Meaningful only directly after a [`UsbEvent::RxReady`].
    fn take_rx(&mut self, dst: &mut [u8; PACKET_SIZE]) -> usize;

    /// Reopen the bulk OUT gate so the host may deliver one more packet.
    /// While the gate is shut the controller NAKs, which is the adapter's
    /// only backpressure mechanism.
    fn rx_enable(&mut self);

    /// True while a committed bulk IN payload has not yet been collected by
    /// the host.
    fn tx_busy(&mut self) -> bool;

    /// Commit a bulk IN payload. The caller must have seen `tx_busy` go
    /// false; [`crate::endpoint::Endpoints::send`] wraps this with that
    /// busy-wait.
    fn start_tx(&mut self, data: &[u8]);

    /// Set or clear an endpoint halt. Clearing also resets the endpoint's
    /// data toggle, per the CLEAR_FEATURE(ENDPOINT_HALT) contract.
    fn set_halt(&mut self, ep: BulkEp, halt: bool);

    fn halted(&mut self, ep: BulkEp) -> bool;
}
