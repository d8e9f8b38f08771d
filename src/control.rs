// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The enumeration state machine: standard-request handling on the control
//! endpoint.
//!
//! Device state is two variables: the address (committed only at the status
//! stage of its transfer, as USB requires) and the active configuration,
//! plus the per-endpoint halt bits held by the hardware. A bus reset is the
//! only transition back to the initial state. Anything we do not recognize
//! is answered with a stall, which the host sees as a well-defined error.

use num_traits::FromPrimitive;
use zerocopy::{AsBytes, LayoutVerified};

use crate::descriptor::{
    DeviceTables, UsbDescType, UsbDir, UsbSetupPacket, UsbSetupRequest, BULK_IN_ADDR,
    BULK_OUT_ADDR, FEATURE_ENDPOINT_HALT, RECIPIENT_ENDPOINT, RECIPIENT_MASK, REQUEST_KIND_MASK,
    REQUEST_KIND_STANDARD, SERIAL_STRING_INDEX,
};
use crate::endpoint::Endpoints;
use crate::hw::{BulkEp, UsbHw};
use crate::PACKET_SIZE;

/// Maps an endpoint address from a setup packet onto one of our bulk
/// endpoints.
fn bulk_ep_for(addr: u8) -> Option<BulkEp> {
    match addr {
        BULK_OUT_ADDR => Some(BulkEp::Out),
        BULK_IN_ADDR => Some(BulkEp::In),
        _ => None,
    }
}

pub struct ControlStage {
    /// Address stored at the setup stage, applied at the status stage. The
    /// acknowledgement has to go out under the old address first.
    pending_address: Option<u8>,
    configuration: u8,
    /// Serial block reported through string descriptor 3; loaded out of
    /// nonvolatile storage once at power-up.
    serial: [u8; 16],
}

impl ControlStage {
    pub const fn new() -> Self {
        ControlStage {
            pending_address: None,
            configuration: 0,
            serial: [b'0'; 16],
        }
    }

    pub fn set_serial(&mut self, serial: [u8; 16]) {
        self.serial = serial;
    }

    pub fn configuration(&self) -> u8 {
        self.configuration
    }

    /// Back to address 0, configuration 0, nothing pending. The halt bits
    /// clear with the endpoint reset that accompanies every bus reset.
    pub fn bus_reset(&mut self) {
        self.pending_address = None;
        self.configuration = 0;
    }

    /// A SETUP packet arrived. `packet` must be exactly 8 bytes or the
    /// transfer is stalled outright.
    pub fn on_setup<H: UsbHw>(
        &mut self,
        hw: &mut H,
        ep: &Endpoints,
        packet: &[u8],
        tables: &DeviceTables,
    ) {
        // A new SETUP aborts whatever transfer was in flight.
        self.pending_address = None;

        let setup = match LayoutVerified::<_, UsbSetupPacket>::new(packet) {
            Some(lv) => lv.into_ref(),
            None => return self.stall(hw),
        };
        if setup.request_type & REQUEST_KIND_MASK != REQUEST_KIND_STANDARD {
            return self.stall(hw);
        }

        let dir = UsbDir::of_endpoint_addr(setup.request_type);
        let recipient = setup.request_type & RECIPIENT_MASK;
        let value = setup.value.get();
        let index = setup.index.get() as u8;
        let wanted = usize::from(setup.length.get());

        match (dir, UsbSetupRequest::from_u8(setup.request)) {
            (UsbDir::In, Some(UsbSetupRequest::GetDescriptor)) => {
                self.get_descriptor(hw, tables, value, wanted)
            }
            (UsbDir::Out, Some(UsbSetupRequest::SetAddress)) => {
                self.pending_address = Some(value as u8);
                hw.ctrl_reply(&[]);
            }
            (UsbDir::Out, Some(UsbSetupRequest::SetConfiguration)) => {
                self.configuration = value as u8;
                hw.ctrl_reply(&[]);
            }
            (UsbDir::In, Some(UsbSetupRequest::GetConfiguration)) => {
                hw.ctrl_reply(&[self.configuration][..wanted.min(1)]);
            }
            (UsbDir::In, Some(UsbSetupRequest::GetInterface)) => {
                // Single interface, no alternates.
                hw.ctrl_reply(&[0][..wanted.min(1)]);
            }
            (UsbDir::In, Some(UsbSetupRequest::GetStatus)) => {
                let halted = recipient == RECIPIENT_ENDPOINT
                    && match bulk_ep_for(index) {
                        Some(e) => ep.get_halt(hw, e),
                        None => false,
                    };
                hw.ctrl_reply(&[halted as u8, 0][..wanted.min(2)]);
            }
            (UsbDir::Out, Some(UsbSetupRequest::SetFeature)) => {
                self.endpoint_feature(hw, ep, recipient, value, index, true)
            }
            (UsbDir::Out, Some(UsbSetupRequest::ClearFeature)) => {
                self.endpoint_feature(hw, ep, recipient, value, index, false)
            }
            _ => self.stall(hw),
        }
    }

    /// The host collected an IN payload on the control endpoint. A deferred
    /// SET_ADDRESS commits here, now that the handshake has gone out under
    /// the old address; otherwise we arm the zero-length OUT that closes the
    /// transfer.
    pub fn on_control_in<H: UsbHw>(&mut self, hw: &mut H) {
        if let Some(addr) = self.pending_address.take() {
            hw.set_address(addr);
        } else {
            hw.ctrl_expect_status();
        }
    }

    /// Status-stage OUT received; the transfer is over and nothing pending
    /// survives it.
    pub fn on_control_out<H: UsbHw>(&mut self, _hw: &mut H) {}

    fn get_descriptor<H: UsbHw>(
        &mut self,
        hw: &mut H,
        tables: &DeviceTables,
        value: u16,
        wanted: usize,
    ) {
        let mut tmp = [0u8; PACKET_SIZE];
        let bytes: &[u8] = match UsbDescType::from_u16(value >> 8) {
            Some(UsbDescType::Device) => tables.device.as_bytes(),
            Some(UsbDescType::Config) => {
                // Configuration, interface and endpoint descriptors go out
                // concatenated; truncation below still serves hosts that ask
                // for the 9-byte header alone first.
                let mut used = 0;
                for part in [
                    tables.config.as_bytes(),
                    tables.interface.as_bytes(),
                    tables.endpoints[0].as_bytes(),
                    tables.endpoints[1].as_bytes(),
                ] {
                    tmp[used..used + part.len()].copy_from_slice(part);
                    used += part.len();
                }
                &tmp[..used]
            }
            Some(UsbDescType::String) => match (value & 0xff) as u8 {
                0 => tables.lang,
                SERIAL_STRING_INDEX => {
                    let len = 2 + 2 * self.serial.len();
                    tmp[0] = len as u8;
                    tmp[1] = UsbDescType::String as u8;
                    for (i, &b) in self.serial.iter().enumerate() {
                        tmp[2 + 2 * i] = b;
                    }
                    &tmp[..len]
                }
                i if usize::from(i) <= tables.strings.len() => {
                    let s = tables.strings[usize::from(i) - 1];
                    tmp[0] = (2 + s.len()) as u8;
                    tmp[1] = UsbDescType::String as u8;
                    tmp[2..2 + s.len()].copy_from_slice(s);
                    &tmp[..2 + s.len()]
                }
                _ => return self.stall(hw),
            },
            _ => return self.stall(hw),
        };
        hw.ctrl_reply(&bytes[..bytes.len().min(wanted)]);
    }

    fn endpoint_feature<H: UsbHw>(
        &mut self,
        hw: &mut H,
        ep: &Endpoints,
        recipient: u8,
        value: u16,
        index: u8,
        halt: bool,
    ) {
        if recipient != RECIPIENT_ENDPOINT || value != FEATURE_ENDPOINT_HALT {
            return self.stall(hw);
        }
        match bulk_ep_for(index) {
            Some(e) => {
                ep.set_halt(hw, e, halt);
                hw.ctrl_reply(&[]);
            }
            None => self.stall(hw),
        }
    }

    /// Signal a request we cannot serve and drop any pending side effect, so
    /// a racing status-stage event is a no-op.
    fn stall<H: UsbHw>(&mut self, hw: &mut H) {
        debug!("control request stalled");
        self.pending_address = None;
        hw.ctrl_stall();
    }
}
