// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! USB wire structures and this device's descriptor tables.
//!
//! The structs mirror the USB 2.0 byte layouts exactly, so they can be
//! handed to the controller with `zerocopy::AsBytes` and parsed back with
//! `FromBytes`, with no manual packing.

use byteorder::LittleEndian;
use num_derive::FromPrimitive;
use zerocopy::{AsBytes, FromBytes, Unaligned, U16};

/// Transfer direction, encoded in bit 7 of endpoint addresses and of the
/// `bmRequestType` field: OUT is host-to-device, IN is device-to-host.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum UsbDir {
    Out = 0,
    In = 0x80,
}

impl UsbDir {
    pub const fn endpoint(self, num: u8) -> u8 {
        num | self as u8
    }

    pub const fn of_endpoint_addr(addr: u8) -> Self {
        if addr & Self::In as u8 != 0 {
            Self::In
        } else {
            Self::Out
        }
    }
}

/// The 8-byte SETUP packet that opens every control transfer.
#[repr(C)]
#[derive(Debug, AsBytes, FromBytes, Unaligned)]
pub struct UsbSetupPacket {
    /// Direction, request kind (standard/class/vendor) and recipient bits.
    pub request_type: u8,
    /// Request code; the standard ones we answer are in [`UsbSetupRequest`].
    pub request: u8,
    /// Request argument. For GET_DESCRIPTOR the high byte is the descriptor
    /// type and the low byte the index; for SET_ADDRESS the low byte is the
    /// new address; for the feature requests it is the feature selector.
    pub value: U16<LittleEndian>,
    /// Second argument; carries the endpoint address for endpoint-recipient
    /// requests.
    pub index: U16<LittleEndian>,
    /// Byte count of the data stage: exact for OUT, an upper bound for IN.
    pub length: U16<LittleEndian>,
}

/// The standard request subset a single-configuration, single-interface
/// vendor device has to answer. Everything else gets a stall.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum UsbSetupRequest {
    GetStatus = 0x00,
    ClearFeature = 0x01,
    SetFeature = 0x03,
    SetAddress = 0x05,
    GetDescriptor = 0x06,
    GetConfiguration = 0x08,
    SetConfiguration = 0x09,
    GetInterface = 0x0a,
}

/// Request-kind bits of `bmRequestType`.
pub const REQUEST_KIND_MASK: u8 = 0x60;
pub const REQUEST_KIND_STANDARD: u8 = 0x00;

/// Recipient bits of `bmRequestType`.
pub const RECIPIENT_MASK: u8 = 0x1f;
pub const RECIPIENT_ENDPOINT: u8 = 0x02;

/// The only feature selector we implement: ENDPOINT_HALT.
pub const FEATURE_ENDPOINT_HALT: u16 = 0;

/// Descriptor type codes.
#[derive(Copy, Clone, Debug, FromPrimitive, AsBytes)]
#[repr(u8)]
pub enum UsbDescType {
    Device = 0x01,
    Config = 0x02,
    String = 0x03,
    Interface = 0x04,
    Endpoint = 0x05,
}

/// Transfer-type codes for the `attributes` field of endpoint descriptors.
#[derive(Copy, Clone, Debug, FromPrimitive, AsBytes)]
#[repr(u8)]
pub enum UsbTransferType {
    Control = 0,
    Bulk = 2,
}

/// Device descriptor, 18 bytes.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbDeviceDescriptor {
    pub length: u8,
    pub descriptor_type: UsbDescType,
    pub bcd_usb: U16<LittleEndian>,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub max_packet_size0: u8,
    pub vendor: U16<LittleEndian>,
    pub product: U16<LittleEndian>,
    pub bcd_device: U16<LittleEndian>,
    /// String table indices for manufacturer, product and serial number.
    pub manufacturer_s: u8,
    pub product_s: u8,
    pub serial_s: u8,
    pub num_configurations: u8,
}

/// Configuration descriptor, 9 bytes. `total_length` counts this descriptor
/// plus the interface and endpoint descriptors sent along with it.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbConfigurationDescriptor {
    pub length: u8,
    pub descriptor_type: UsbDescType,
    pub total_length: U16<LittleEndian>,
    pub num_interfaces: u8,
    pub configuration_value: u8,
    pub configuration_s: u8,
    pub attributes: u8,
    /// In units of 2 mA.
    pub max_power: u8,
}

/// Interface descriptor, 9 bytes.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbInterfaceDescriptor {
    pub length: u8,
    pub descriptor_type: UsbDescType,
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub num_endpoints: u8,
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
    pub interface_s: u8,
}

/// Endpoint descriptor, 7 bytes.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbEndpointDescriptor {
    pub length: u8,
    pub descriptor_type: UsbDescType,
    pub endpoint_address: u8,
    pub attributes: u8,
    pub max_packet_size: U16<LittleEndian>,
    pub interval: u8,
}

/// Bulk pipe addresses: commands arrive on 0x01, responses leave on 0x82.
pub const BULK_OUT_ADDR: u8 = UsbDir::Out.endpoint(1);
pub const BULK_IN_ADDR: u8 = UsbDir::In.endpoint(2);

/// String descriptor index the serial-number block is reported under. The
/// bytes come out of nonvolatile storage at power-up, not out of a static
/// table, so the enumeration machine builds this descriptor on the fly.
pub const SERIAL_STRING_INDEX: u8 = 3;

/// Everything the enumeration state machine serves: descriptor structs plus
/// the raw string tables (UTF-16LE payloads, indexed from 1).
pub struct DeviceTables {
    pub device: &'static UsbDeviceDescriptor,
    pub config: &'static UsbConfigurationDescriptor,
    pub interface: &'static UsbInterfaceDescriptor,
    pub endpoints: [&'static UsbEndpointDescriptor; 2],
    pub lang: &'static [u8],
    pub strings: &'static [&'static [u8]],
}

pub static DEVICE_TABLES: DeviceTables = DeviceTables {
    device: &UsbDeviceDescriptor {
        length: core::mem::size_of::<UsbDeviceDescriptor>() as u8,
        descriptor_type: UsbDescType::Device,
        bcd_usb: U16::from_bytes(u16::to_le_bytes(0x0200)),
        // Vendor-specific at the device level; the host binds a generic
        // driver and talks the bulk command protocol directly.
        device_class: 0xff,
        device_subclass: 0xff,
        device_protocol: 0xff,
        max_packet_size0: crate::PACKET_SIZE as u8,
        vendor: U16::from_bytes(u16::to_le_bytes(0x20a0)),
        product: U16::from_bytes(u16::to_le_bytes(0x4209)),
        bcd_device: U16::from_bytes(u16::to_le_bytes(0x0100)),
        manufacturer_s: 1,
        product_s: 2,
        serial_s: SERIAL_STRING_INDEX,
        num_configurations: 1,
    },
    config: &UsbConfigurationDescriptor {
        length: core::mem::size_of::<UsbConfigurationDescriptor>() as u8,
        descriptor_type: UsbDescType::Config,
        total_length: U16::from_bytes(u16::to_le_bytes(
            core::mem::size_of::<UsbConfigurationDescriptor>() as u16
                + core::mem::size_of::<UsbInterfaceDescriptor>() as u16
                + 2 * core::mem::size_of::<UsbEndpointDescriptor>() as u16,
        )),
        num_interfaces: 1,
        configuration_value: 1,
        configuration_s: 0,
        // Bus powered.
        attributes: 0x80,
        max_power: 0x32,
    },
    interface: &UsbInterfaceDescriptor {
        length: core::mem::size_of::<UsbInterfaceDescriptor>() as u8,
        descriptor_type: UsbDescType::Interface,
        interface_number: 0,
        alternate_setting: 0,
        num_endpoints: 2,
        interface_class: 0xff,
        interface_subclass: 0xff,
        interface_protocol: 0xff,
        interface_s: 0,
    },
    endpoints: [
        &UsbEndpointDescriptor {
            length: core::mem::size_of::<UsbEndpointDescriptor>() as u8,
            descriptor_type: UsbDescType::Endpoint,
            endpoint_address: BULK_OUT_ADDR,
            attributes: UsbTransferType::Bulk as u8,
            max_packet_size: U16::from_bytes(u16::to_le_bytes(crate::PACKET_SIZE as u16)),
            interval: 0,
        },
        &UsbEndpointDescriptor {
            length: core::mem::size_of::<UsbEndpointDescriptor>() as u8,
            descriptor_type: UsbDescType::Endpoint,
            endpoint_address: BULK_IN_ADDR,
            attributes: UsbTransferType::Bulk as u8,
            max_packet_size: U16::from_bytes(u16::to_le_bytes(crate::PACKET_SIZE as u16)),
            interval: 0,
        },
    ],
    // en-US.
    lang: &[4, 0x03, 0x09, 0x04],
    strings: &[
        b"B\0i\0t\0f\0o\0r\0g\0e\0",
        b"U\0S\0B\0-\0J\0T\0A\0G\0 \0B\0r\0i\0d\0g\0e\0",
    ],
};
