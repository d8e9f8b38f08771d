// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The bit-serial transaction engine.
//!
//! JTAG is bit-banged in software: TMS, TDI and TDO have to move in per-bit
//! lockstep with TCK, which a byte-oriented shifter cannot express. SPI goes
//! through the hardware shift register instead, since its byte framing
//! matches, and busy-waits on the shift-complete flag between bytes. All
//! lengths are bounded by one bulk packet's payload; the engine buffers
//! nothing and never allocates.

use embedded_hal::digital::{InputPin, OutputPin, PinState};

/// Byte-wide shift register behind the SPI data path. `done` is the
/// is-ready predicate the engine polls between bytes, with no timeout on
/// real hardware, and with a bounded countdown in the test fakes.
pub trait Shifter {
    fn enable(&mut self);
    fn disable(&mut self);
    /// Begin shifting one byte out.
    fn load(&mut self, byte: u8);
    /// True once the loaded byte has fully shifted through.
    fn done(&mut self) -> bool;
    /// The byte clocked in during the last completed shift.
    fn take(&mut self) -> u8;
}

/// The operations the command dispatcher drives. Implemented by [`Engine`]
/// on real pins and by a loopback stand-in under test.
pub trait Transactions {
    /// Clock out `tms`/`tdi` byte groups, 8 bits each, least significant bit
    /// first. Write-only: nothing is sampled. The slices are the same
    /// length.
    fn jtag_write(&mut self, tms: &[u8], tdi: &[u8]);

    /// Identical clocking, additionally sampling TDO into `out` (LSB first,
    /// one result byte per group). `out` is as long as `tms`.
    fn jtag_write_read(&mut self, tms: &[u8], tdi: &[u8], out: &mut [u8]);

    /// Shift bytes through the hardware shifter. With `assert_select` the
    /// muxed device's select line is driven for the duration and released
    /// after; without it no select line is touched (the independent device
    /// is selected externally).
    fn spi_write(&mut self, data: &[u8], assert_select: bool);

    /// Same, capturing the byte received for each one sent.
    fn spi_write_read(&mut self, data: &[u8], out: &mut [u8], assert_select: bool);
}

/// Transaction engine over raw pins. `mux` routes the shared lines between
/// the bit-banged TAP (low) and the shifter (high); the TMS pin doubles as
/// the muxed device's active-low chip select, exactly as wired on the board.
pub struct Engine<Tck, Tms, Tdi, Tdo, Mux, Sh>
where
    Tck: OutputPin,
    Tms: OutputPin,
    Tdi: OutputPin,
    Tdo: InputPin,
    Mux: OutputPin,
    Sh: Shifter,
{
    tck: Tck,
    tms: Tms,
    tdi: Tdi,
    tdo: Tdo,
    mux: Mux,
    shifter: Sh,
}

impl<Tck, Tms, Tdi, Tdo, Mux, Sh> Engine<Tck, Tms, Tdi, Tdo, Mux, Sh>
where
    Tck: OutputPin,
    Tms: OutputPin,
    Tdi: OutputPin,
    Tdo: InputPin,
    Mux: OutputPin,
    Sh: Shifter,
{
    pub fn new(tck: Tck, tms: Tms, tdi: Tdi, tdo: Tdo, mux: Mux, shifter: Sh) -> Self {
        Engine {
            tck,
            tms,
            tdi,
            tdo,
            mux,
            shifter,
        }
    }

    /// Clock one 8-bit group. Mode and data lines are driven, and TDO
    /// sampled, before each rising TCK edge; the returned byte is only
    /// meaningful when `sample` was set.
    fn clock_group(&mut self, tms: u8, tdi: u8, sample: bool) -> u8 {
        let mut tdo = 0;
        let mut mask = 1u8;
        while mask != 0 {
            self.tms.set_state(PinState::from(tms & mask != 0)).unwrap();
            self.tdi.set_state(PinState::from(tdi & mask != 0)).unwrap();
            if sample && self.tdo.is_high().unwrap() {
                tdo |= mask;
            }
            self.tck.set_high().unwrap();
            self.tck.set_low().unwrap();
            mask <<= 1;
        }
        tdo
    }

    fn shift_bytes(&mut self, data: &[u8], mut out: Option<&mut [u8]>, assert_select: bool) {
        self.shifter.enable();
        if assert_select {
            self.mux.set_high().unwrap();
            self.tms.set_low().unwrap();
        }
        for (i, &byte) in data.iter().enumerate() {
            self.shifter.load(byte);
            while !self.shifter.done() {
                core::hint::spin_loop();
            }
            if let Some(out) = out.as_deref_mut() {
                out[i] = self.shifter.take();
            }
        }
        if assert_select {
            self.tms.set_high().unwrap();
        }
        self.shifter.disable();
    }
}

impl<Tck, Tms, Tdi, Tdo, Mux, Sh> Transactions for Engine<Tck, Tms, Tdi, Tdo, Mux, Sh>
where
    Tck: OutputPin,
    Tms: OutputPin,
    Tdi: OutputPin,
    Tdo: InputPin,
    Mux: OutputPin,
    Sh: Shifter,
{
    fn jtag_write(&mut self, tms: &[u8], tdi: &[u8]) {
        self.mux.set_low().unwrap();
        for i in 0..tms.len() {
            self.clock_group(tms[i], tdi[i], false);
        }
    }

    fn jtag_write_read(&mut self, tms: &[u8], tdi: &[u8], out: &mut [u8]) {
        self.mux.set_low().unwrap();
        for i in 0..tms.len() {
            out[i] = self.clock_group(tms[i], tdi[i], true);
        }
    }

    fn spi_write(&mut self, data: &[u8], assert_select: bool) {
        self.shift_bytes(data, None, assert_select);
    }

    fn spi_write_read(&mut self, data: &[u8], out: &mut [u8], assert_select: bool) {
        self.shift_bytes(data, Some(out), assert_select);
    }
}
