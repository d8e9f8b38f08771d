// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Endpoint buffer ownership.
//!
//! The bulk OUT side is double-buffered: two fixed 64-byte slots, one
//! hardware-owned (being filled) and at most one firmware-owned (being
//! drained) at any instant. The interrupt context fills, the main loop
//! drains, and a slot changes hands exactly when its `ready` flag flips.
//! The bulk IN side is single-buffered with a single-outstanding-response
//! policy: committing a new payload waits for the previous one to leave.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

use crate::hw::{BulkEp, UsbHw};
use crate::PACKET_SIZE;

/// One fixed receive slot. Allocated once, inside [`Endpoints`], and reused
/// for the device's lifetime.
struct OutSlot {
    bytes: UnsafeCell<[u8; PACKET_SIZE]>,
    len: AtomicU8,
    /// Set while the slot holds an unprocessed packet. The flag is the
    /// ownership token: clear means the interrupt context may fill the
    /// bytes, set means the main loop may read them.
    ready: AtomicBool,
}

impl OutSlot {
    const fn new() -> Self {
        OutSlot {
            bytes: UnsafeCell::new([0; PACKET_SIZE]),
            len: AtomicU8::new(0),
            ready: AtomicBool::new(false),
        }
    }
}

/// The endpoint manager: the OUT slot ring plus the IN transmit policy,
/// driven through a [`UsbHw`] handle supplied per call so both execution
/// contexts can use one `static` instance.
pub struct Endpoints {
    slots: [OutSlot; 2],
    /// Slot the hardware fills next. Written only from interrupt context.
    fill: AtomicUsize,
    /// Slot the main loop drains next. Written only from main context.
    drain: AtomicUsize,
    /// Set when both slots held packets and the receive gate was left shut;
    /// `release_received` reopens it.
    parked: AtomicBool,
}

// Safety: slot bytes are written by the interrupt context only while the
// slot's `ready` flag is clear and read by the main context only while it is
// set. The flag is published with release ordering and observed with acquire
// ordering, so the two contexts never hold the same slot at once. All other
// fields are atomics with a single writing context each.
unsafe impl Sync for Endpoints {}

impl Endpoints {
    pub const fn new() -> Self {
        Endpoints {
            slots: [OutSlot::new(), OutSlot::new()],
            fill: AtomicUsize::new(0),
            drain: AtomicUsize::new(0),
            parked: AtomicBool::new(false),
        }
    }

    /// Reset the controller's endpoint state and the slot ring, then open
    /// the receive gate. Runs at power-up and on every bus reset.
    pub fn init<H: UsbHw>(&self, hw: &mut H) {
        hw.reset_config();
        for slot in &self.slots {
            slot.ready.store(false, Ordering::Relaxed);
            slot.len.store(0, Ordering::Relaxed);
        }
        self.fill.store(0, Ordering::Relaxed);
        self.drain.store(0, Ordering::Relaxed);
        self.parked.store(false, Ordering::Relaxed);
        hw.rx_enable();
    }

    /// Interrupt side: a bulk OUT packet finished. Copy it into the fill
    /// slot, publish the slot, and swap roles. The gate reopens only if the
    /// other slot is free: with both slots full the controller keeps
    /// NAKing, so the host never outruns the main loop by more than one
    /// packet plus the one in flight.
    pub fn rx_complete<H: UsbHw>(&self, hw: &mut H) {
        let i = self.fill.load(Ordering::Relaxed);
        // Safety: `ready` is clear, so this context owns the bytes; the
        // main loop will not look at them until the store below.
        let bytes = unsafe { &mut *self.slots[i].bytes.get() };
        let len = hw.take_rx(bytes);
        self.slots[i].len.store(len as u8, Ordering::Relaxed);
        self.slots[i].ready.store(true, Ordering::Release);

        let next = i ^ 1;
        self.fill.store(next, Ordering::Relaxed);
        if self.slots[next].ready.load(Ordering::Relaxed) {
            self.parked.store(true, Ordering::Relaxed);
        } else {
            hw.rx_enable();
        }
    }

    /// Non-blocking check for a filled slot; returns the oldest one without
    /// copying. The borrow is valid until `release_received`, which recycles
    /// the slot; callers must not hold it past the dispatch call.
    pub fn poll_received(&self) -> Option<&[u8]> {
        let i = self.drain.load(Ordering::Relaxed);
        if !self.slots[i].ready.load(Ordering::Acquire) {
            return None;
        }
        let len = self.slots[i].len.load(Ordering::Relaxed) as usize;
        // Safety: `ready` is set, so the interrupt context will not write
        // these bytes until `release_received` clears it.
        let bytes = unsafe { &*self.slots[i].bytes.get() };
        Some(&bytes[..len])
    }

    /// Mark the drained slot empty and reopen the receive gate if it was
    /// left shut. Must run once per drained slot, inside a critical section,
    /// since it hands the slot back to the interrupt context.
    pub fn release_received<H: UsbHw>(&self, hw: &mut H) {
        let i = self.drain.load(Ordering::Relaxed);
        self.slots[i].ready.store(false, Ordering::Release);
        self.drain.store(i ^ 1, Ordering::Relaxed);
        if self.parked.load(Ordering::Relaxed) {
            self.parked.store(false, Ordering::Relaxed);
            hw.rx_enable();
        }
    }

    /// Commit a response packet. Busy-waits until the host has collected any
    /// previous payload, so nothing is ever overwritten mid-transmission.
    /// The wait has no timeout; that is the hardware contract.
    pub fn send<H: UsbHw>(&self, hw: &mut H, data: &[u8]) {
        while hw.tx_busy() {
            core::hint::spin_loop();
        }
        hw.start_tx(data);
    }

    /// Endpoint-halt plumbing for the SET_FEATURE / CLEAR_FEATURE /
    /// GET_STATUS requests. Clearing a halt also resets the data toggle.
    pub fn set_halt<H: UsbHw>(&self, hw: &mut H, ep: BulkEp, halt: bool) {
        hw.set_halt(ep, halt);
    }

    pub fn get_halt<H: UsbHw>(&self, hw: &mut H, ep: BulkEp) -> bool {
        hw.halted(ep)
    }
}
