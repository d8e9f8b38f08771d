// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! RP2040 firmware image for the USB JTAG/SPI bridge.
//!
//! This file is the hardware half of the crate: clock and pin bring-up, the
//! `UsbHw` binding over the USBCTRL registers, the SIO pin and SSP shifter
//! bindings for the transaction engine, the board-control operations, and
//! the interrupt/main-loop glue. Everything protocol-shaped lives in the
//! library and is shared with the host-side test suite.
//!
//! Two execution contexts run here. The USB interrupt services controller
//! events (enumeration traffic and OUT-buffer completions) and hands
//! filled slots to the main loop through the endpoint manager's ring. The
//! main loop busy-waits on that ring, dispatches one command at a time, and
//! releases each slot inside a short interrupt-free section. Nothing else
//! crosses the boundary.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(all(feature = "firmware", target_os = "none"))]
mod firmware {
    use core::cell::RefCell;
    use core::sync::atomic::{AtomicBool, Ordering};

    use cortex_m::interrupt::{free, Mutex};
    use cortex_m_rt::entry;
    use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
    use panic_halt as _;
    use rp2040_pac::interrupt;

    use rp2040_usbjtag::board::{nvm, Board, SERIAL_LEN};
    use rp2040_usbjtag::control::ControlStage;
    use rp2040_usbjtag::descriptor::{UsbTransferType, DEVICE_TABLES};
    use rp2040_usbjtag::dispatch::Dispatcher;
    use rp2040_usbjtag::endpoint::Endpoints;
    use rp2040_usbjtag::engine::{Engine, Shifter};
    use rp2040_usbjtag::hw::{BulkEp, UsbEvent, UsbHw};
    use rp2040_usbjtag::PACKET_SIZE;

    // Board-specific pins.
    cfg_if::cfg_if! {
        if #[cfg(feature = "target-pico")] {
            const LED_PIN: u8 = 25;
        } else if #[cfg(feature = "target-feather")] {
            const LED_PIN: u8 = 13;
        } else {
            compile_error!("missing or unknown target-* feature");
        }
    }

    // The JTAG pins sit on an SPI0-capable group, so the shifter can take
    // them over by switching the pin function: TCK doubles as SCK, TDI as
    // TX, TDO as RX. TMS stays on SIO and doubles as the muxed device's
    // active-low chip select.
    const TCK_PIN: u8 = 2;
    const TDI_PIN: u8 = 3;
    const TDO_PIN: u8 = 4;
    const TMS_PIN: u8 = 5;
    /// Target-side JTAG/SPI routing select, low while the TAP is in use.
    const MUX_PIN: u8 = 6;
    /// Target reconfiguration line, active low.
    const RST_PIN: u8 = 7;
    /// Target power switch, driven from bit 0 of the control byte.
    const POWER_PIN: u8 = 8;
    /// ADC channel sampling the bus voltage (VSYS/3 on the Pico).
    const SENSE_CHANNEL: u8 = 3;

    const DEFAULT_CONTROL: u8 = 0x01;
    const DEFAULT_CLOCK: u8 = 0x03;

    /// System clock in MHz, for cycle-counted delays.
    const CYCLES_PER_US: u32 = 132;

    // Stage-2 flash loader, picked per board flash chip.
    cfg_if::cfg_if! {
        if #[cfg(feature = "target-feather")] {
            #[link_section = ".boot_loader"]
            #[used]
            static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_GD25Q64CS;
        } else {
            #[link_section = ".boot_loader"]
            #[used]
            static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_W25Q080;
        }
    }

    ////////////////////////////////////////////////////////////////////////
    // Shared state. The endpoint ring synchronizes itself with atomics; the
    // enumeration state machine is touched only with interrupts masked.

    static ENDPOINTS: Endpoints = Endpoints::new();
    static CONTROL: Mutex<RefCell<ControlStage>> = Mutex::new(RefCell::new(ControlStage::new()));

    #[entry]
    fn main() -> ! {
        let p = rp2040_pac::Peripherals::take().unwrap();

        ////////////////////////////////////////////////////////////////////
        // Clocks: crystal up, CPU on PLL_SYS at 132 MHz, 48 MHz on PLL_USB
        // for the controller and the ADC, clk_peri for the SSP.

        // Start XOSC and wait for it to stabilize.
        p.XOSC.ctrl.write(|w| unsafe { w.bits(0xfab_aa0) });
        while !p.XOSC.status.read().stable().bit() {}
        // Glitchlessly move refclk (and with it sysclk) onto the crystal,
        // then shut the ring oscillator down.
        p.CLOCKS.clk_ref_ctrl.write(|w| w.src().xosc_clksrc());
        while p.CLOCKS.clk_ref_selected.read().bits() != (1 << 2) {}
        p.ROSC.ctrl.write(|w| unsafe { w.bits(0xd1e_fa4) });

        // PLL_SYS: 12 MHz * 132 / (6 * 2) = 132 MHz.
        p.RESETS.reset.modify(|_, w| w.pll_sys().clear_bit());
        while !p.RESETS.reset_done.read().pll_sys().bit() {}
        p.PLL_SYS.cs.write(|w| unsafe { w.refdiv().bits(1) });
        p.PLL_SYS.fbdiv_int.write(|w| unsafe { w.fbdiv_int().bits(132) });
        p.PLL_SYS.pwr.write(|w| w.pd().clear_bit().vcopd().clear_bit());
        while !p.PLL_SYS.cs.read().lock().bit() {}
        p.PLL_SYS
            .prim
            .write(|w| unsafe { w.postdiv1().bits(6).postdiv2().bits(2) });
        p.PLL_SYS.pwr.modify(|_, w| w.postdivpd().clear_bit());
        p.CLOCKS.clk_sys_ctrl.write(|w| w.auxsrc().clksrc_pll_sys());
        p.CLOCKS
            .clk_sys_ctrl
            .modify(|_, w| w.src().clksrc_clk_sys_aux());
        while p.CLOCKS.clk_sys_selected.read().bits() != (1 << 1) {}

        // clk_peri tracks sysclk; the SSP divides it down from there.
        p.CLOCKS
            .clk_peri_ctrl
            .write(|w| w.auxsrc().clk_sys().enable().set_bit());

        // PLL_USB: 12 MHz * 100 / (5 * 5) = 48 MHz.
        p.RESETS.reset.modify(|_, w| w.pll_usb().clear_bit());
        while !p.RESETS.reset_done.read().pll_usb().bit() {}
        p.PLL_USB.cs.write(|w| unsafe { w.refdiv().bits(1) });
        p.PLL_USB.fbdiv_int.write(|w| unsafe { w.fbdiv_int().bits(100) });
        p.PLL_USB.pwr.write(|w| w.pd().clear_bit().vcopd().clear_bit());
        while !p.PLL_USB.cs.read().lock().bit() {}
        p.PLL_USB
            .prim
            .write(|w| unsafe { w.postdiv1().bits(5).postdiv2().bits(5) });
        p.PLL_USB.pwr.modify(|_, w| w.postdivpd().clear_bit());
        p.CLOCKS
            .clk_usb_ctrl
            .write(|w| w.auxsrc().clksrc_pll_usb().enable().set_bit());
        p.CLOCKS
            .clk_adc_ctrl
            .write(|w| w.auxsrc().clksrc_pll_usb().enable().set_bit());

        ////////////////////////////////////////////////////////////////////
        // Pins. Everything bit-banged runs through SIO; the SSP grabs the
        // TCK/TDI/TDO group only while a SPI transaction is in flight.

        p.RESETS.reset.modify(|_, w| w.io_bank0().clear_bit());
        while !p.RESETS.reset_done.read().io_bank0().bit() {}

        for pin in [
            TCK_PIN, TDI_PIN, TDO_PIN, TMS_PIN, MUX_PIN, RST_PIN, POWER_PIN, LED_PIN,
        ] {
            p.IO_BANK0.gpio[pin as usize]
                .gpio_ctrl
                .write(|w| w.funcsel().sio());
        }
        // Idle levels before the outputs turn on: clock low, TMS (and with
        // it the muxed chip select) released high, target out of reset.
        p.SIO
            .gpio_out_set
            .write(|w| unsafe { w.bits(1 << TMS_PIN | 1 << RST_PIN) });
        p.SIO.gpio_out_clr.write(|w| unsafe {
            w.bits(1 << TCK_PIN | 1 << TDI_PIN | 1 << MUX_PIN | 1 << POWER_PIN)
        });
        p.SIO.gpio_oe_set.write(|w| unsafe {
            w.bits(
                1 << TCK_PIN
                    | 1 << TDI_PIN
                    | 1 << TMS_PIN
                    | 1 << MUX_PIN
                    | 1 << RST_PIN
                    | 1 << POWER_PIN
                    | 1 << LED_PIN,
            )
        });

        ////////////////////////////////////////////////////////////////////
        // SSP (SPI0): 8-bit frames, mode 0, clk_peri / 12 = 11 MHz. Left
        // disabled; the shifter binding turns it on per transaction.

        p.RESETS.reset.modify(|_, w| w.spi0().clear_bit());
        while !p.RESETS.reset_done.read().spi0().bit() {}
        p.SPI0
            .sspcr0
            .write(|w| unsafe { w.dss().bits(7).scr().bits(0) });
        p.SPI0.sspcpsr.write(|w| unsafe { w.cpsdvsr().bits(12) });

        ////////////////////////////////////////////////////////////////////
        // ADC for the bus-voltage sense channel.

        p.RESETS.reset.modify(|_, w| w.adc().clear_bit());
        while !p.RESETS.reset_done.read().adc().bit() {}
        p.ADC.cs.write(|w| w.en().set_bit());
        while !p.ADC.cs.read().ready().bit() {}

        ////////////////////////////////////////////////////////////////////
        // USB controller bring-up, then hand the bus to the ISR.

        p.RESETS.reset.modify(|_, w| w.usbctrl().set_bit());
        p.RESETS.reset.modify(|_, w| w.usbctrl().clear_bit());
        while !p.RESETS.reset_done.read().usbctrl().bit() {}

        // Start DPRAM from a clean slate.
        p.USBCTRL_DPRAM
            .setup_packet_low
            .write(|w| unsafe { w.bits(0) });
        p.USBCTRL_DPRAM
            .setup_packet_high
            .write(|w| unsafe { w.bits(0) });
        for epc in &p.USBCTRL_DPRAM.ep_control {
            epc.write(|w| unsafe { w.bits(0) });
        }
        for epb in &p.USBCTRL_DPRAM.ep_buffer_control {
            epb.write(|w| unsafe { w.bits(0) });
        }

        p.USBCTRL_REGS
            .usb_muxing
            .write(|w| w.to_phy().set_bit().softcon().set_bit());
        // Pretend VBUS is always present; not every board wires the detect
        // pin.
        p.USBCTRL_REGS.usb_pwr.write(|w| {
            w.vbus_detect()
                .set_bit()
                .vbus_detect_override_en()
                .set_bit()
        });
        p.USBCTRL_REGS
            .main_ctrl
            .write(|w| w.controller_en().set_bit().host_ndevice().clear_bit());
        p.USBCTRL_REGS.sie_ctrl.write(|w| w.ep0_int_1buf().set_bit());
        p.USBCTRL_REGS.inte.write(|w| {
            w.buff_status()
                .set_bit()
                .bus_reset()
                .set_bit()
                .setup_req()
                .set_bit()
        });

        let mut hw = UsbRegs;
        let mut board = PicoBoard::new();
        free(|cs| {
            let mut control = CONTROL.borrow(cs).borrow_mut();
            control.set_serial(board.serial());
            ENDPOINTS.init(&mut hw);
        });

        // Present the full-speed pullup; enumeration runs in the ISR from
        // here on.
        p.USBCTRL_REGS
            .sie_ctrl
            .modify(|_, w| w.pullup_en().set_bit());
        unsafe { cortex_m::peripheral::NVIC::unmask(rp2040_pac::Interrupt::USBCTRL_IRQ) };

        p.SIO.gpio_out_set.write(|w| unsafe { w.bits(1 << LED_PIN) });

        ////////////////////////////////////////////////////////////////////
        // Main loop: drain the ring, one command per filled slot.

        let mut engine = Engine::new(
            SioOut::new(TCK_PIN),
            SioOut::new(TMS_PIN),
            SioOut::new(TDI_PIN),
            SioIn::new(TDO_PIN),
            SioOut::new(MUX_PIN),
            Ssp,
        );
        let mut dispatcher = Dispatcher::new();

        loop {
            // Busy-wait for the ISR to publish a slot.
            let packet = match ENDPOINTS.poll_received() {
                Some(packet) => packet,
                None => {
                    core::hint::spin_loop();
                    continue;
                }
            };
            dispatcher.handle(packet, &mut engine, &mut board, &ENDPOINTS, &mut hw);
            // The release hands the slot back to the ISR and may touch the
            // OUT gate, so it runs with interrupts masked.
            free(|_| ENDPOINTS.release_received(&mut hw));
        }
    }

    #[interrupt]
    fn USBCTRL_IRQ() {
        let mut hw = UsbRegs;
        free(|cs| {
            let mut control = CONTROL.borrow(cs).borrow_mut();
            while let Some(event) = hw.poll_event() {
                match event {
                    UsbEvent::BusReset => {
                        ENDPOINTS.init(&mut hw);
                        control.bus_reset();
                    }
                    UsbEvent::Setup(p) => {
                        control.on_setup(&mut hw, &ENDPOINTS, &p, &DEVICE_TABLES)
                    }
                    UsbEvent::ControlIn => control.on_control_in(&mut hw),
                    UsbEvent::ControlOut => control.on_control_out(&mut hw),
                    UsbEvent::RxReady => ENDPOINTS.rx_complete(&mut hw),
                    UsbEvent::TxDone => {}
                }
            }
        });
    }

    ////////////////////////////////////////////////////////////////////////
    // UsbHw over the USBCTRL register block.
    //
    // Fixed DPRAM layout: the hardware-defined EP0 buffer at 0x100, then one
    // 64-byte buffer per bulk endpoint. Buffer-control and endpoint-control
    // indices follow the register file's EP-pair ordering.

    const EP0_BUF: usize = 0x100;
    const RX_BUF: usize = 0x180;
    const TX_BUF: usize = 0x1c0;

    /// `ep_buffer_control` indices: EP0 IN, EP0 OUT, bulk OUT (EP1 OUT),
    /// bulk IN (EP2 IN).
    const EP0_IN_BC: usize = 0;
    const EP0_OUT_BC: usize = 1;
    const RX_BC: usize = 3;
    const TX_BC: usize = 4;

    /// `ep_control` indices for the bulk endpoints (EP0 has none).
    const RX_EPC: usize = 1;
    const TX_EPC: usize = 2;

    /// `buff_status` bit per buffer-control entry.
    const EP0_IN_BIT: u32 = 0;
    const EP0_OUT_BIT: u32 = 1;
    const RX_BIT: u32 = 3;
    const TX_BIT: u32 = 4;

    // Next expected DATA PID per endpoint; the controller does not track
    // these for us.
    static EP0_IN_PID: AtomicBool = AtomicBool::new(false);
    static RX_PID: AtomicBool = AtomicBool::new(false);
    static TX_PID: AtomicBool = AtomicBool::new(false);

    /// Register-level `UsbHw` binding. A unit type on purpose: both
    /// execution contexts need a handle and the register file is the only
    /// state. The ISR owns the control endpoint and the RX completions; the
    /// main context touches only the IN side and, inside critical sections,
    /// the OUT gate.
    struct UsbRegs;

    impl UsbRegs {
        fn regs() -> &'static rp2040_pac::usbctrl_regs::RegisterBlock {
            unsafe { &*rp2040_pac::USBCTRL_REGS::ptr() }
        }

        fn dpram() -> &'static rp2040_pac::usbctrl_dpram::RegisterBlock {
            unsafe { &*rp2040_pac::USBCTRL_DPRAM::ptr() }
        }

        fn buf(offset: usize) -> *mut u8 {
            (rp2040_pac::USBCTRL_DPRAM::ptr() as *mut u8).wrapping_add(offset)
        }

        /// Copy a payload into DPRAM and hand the buffer to the controller.
        fn start_in(bc: usize, buf: usize, pid: &AtomicBool, data: &[u8]) {
            // Safety: the available bit for this buffer is clear, so the
            // memory is ours, and `data` is at most one packet.
            unsafe {
                Self::buf(buf).copy_from_nonoverlapping(data.as_ptr(), data.len());
            }
            let np = pid.load(Ordering::Relaxed);
            Self::dpram().ep_buffer_control[bc].write(|w| unsafe {
                w.pid_0()
                    .bit(np)
                    .full_0()
                    .set_bit()
                    .available_0()
                    .set_bit()
                    .length_0()
                    .bits(data.len() as u16)
            });
            pid.store(!np, Ordering::Relaxed);
        }
    }

    impl UsbHw for UsbRegs {
        fn poll_event(&mut self) -> Option<UsbEvent> {
            let regs = Self::regs();
            let ints = regs.ints.read();

            if ints.setup_req().bit() {
                regs.sie_status.write(|w| w.setup_rec().set_bit());
                let dpram = Self::dpram();
                let mut packet = [0; 8];
                packet[..4].copy_from_slice(&dpram.setup_packet_low.read().bits().to_le_bytes());
                packet[4..].copy_from_slice(&dpram.setup_packet_high.read().bits().to_le_bytes());
                // Every EP0 reply to this request goes out as DATA1.
                EP0_IN_PID.store(true, Ordering::Relaxed);
                return Some(UsbEvent::Setup(packet));
            }

            if ints.buff_status().bit() {
                let bits = regs.buff_status.read().bits();
                let low = bits.trailing_zeros();
                regs.buff_status.write(|w| unsafe { w.bits(1 << low) });
                return match low {
                    EP0_IN_BIT => Some(UsbEvent::ControlIn),
                    EP0_OUT_BIT => Some(UsbEvent::ControlOut),
                    RX_BIT => Some(UsbEvent::RxReady),
                    TX_BIT => Some(UsbEvent::TxDone),
                    _ => None,
                };
            }

            if ints.bus_reset().bit() {
                regs.sie_status.write(|w| w.bus_reset().set_bit());
                return Some(UsbEvent::BusReset);
            }

            None
        }

        fn reset_config(&mut self) {
            let dpram = Self::dpram();
            Self::regs()
                .addr_endp
                .write(|w| unsafe { w.address().bits(0) });
            dpram.ep_control[RX_EPC].write(|w| unsafe {
                w.enable()
                    .set_bit()
                    .interrupt_per_buff()
                    .set_bit()
                    .endpoint_type()
                    .bits(UsbTransferType::Bulk as u8)
                    .buffer_address()
                    .bits(RX_BUF as u16)
            });
            dpram.ep_control[TX_EPC].write(|w| unsafe {
                w.enable()
                    .set_bit()
                    .interrupt_per_buff()
                    .set_bit()
                    .endpoint_type()
                    .bits(UsbTransferType::Bulk as u8)
                    .buffer_address()
                    .bits(TX_BUF as u16)
            });
            for bc in [EP0_IN_BC, EP0_OUT_BC, RX_BC, TX_BC] {
                dpram.ep_buffer_control[bc].write(|w| unsafe { w.bits(0) });
            }
            EP0_IN_PID.store(false, Ordering::Relaxed);
            RX_PID.store(false, Ordering::Relaxed);
            TX_PID.store(false, Ordering::Relaxed);
        }

        fn set_address(&mut self, addr: u8) {
            Self::regs()
                .addr_endp
                .write(|w| unsafe { w.address().bits(addr) });
        }

        fn ctrl_reply(&mut self, data: &[u8]) {
            Self::start_in(EP0_IN_BC, EP0_BUF, &EP0_IN_PID, data);
        }

        fn ctrl_expect_status(&mut self) {
            // The status OUT is always a DATA1 zero-length packet.
            Self::dpram().ep_buffer_control[EP0_OUT_BC].write(|w| unsafe {
                w.pid_0()
                    .set_bit()
                    .full_0()
                    .clear_bit()
                    .available_0()
                    .set_bit()
                    .length_0()
                    .bits(0)
            });
        }

        fn ctrl_stall(&mut self) {
            // EP0 stall bits are armed separately and self-clear at the
            // next SETUP.
            Self::regs()
                .ep_stall_arm
                .write(|w| w.ep0_in().set_bit().ep0_out().set_bit());
            Self::dpram().ep_buffer_control[EP0_IN_BC].modify(|_, w| w.stall().set_bit());
            Self::dpram().ep_buffer_control[EP0_OUT_BC].modify(|_, w| w.stall().set_bit());
        }

        fn take_rx(&mut self, dst: &mut [u8; PACKET_SIZE]) -> usize {
            let bc = Self::dpram().ep_buffer_control[RX_BC].read();
            let len = (bc.length_0().bits() as usize).min(PACKET_SIZE);
            // Safety: the controller cleared the available bit when it
            // finished this buffer, so it is ours to read.
            unsafe {
                dst.as_mut_ptr()
                    .copy_from_nonoverlapping(Self::buf(RX_BUF) as *const u8, len);
            }
            len
        }

        fn rx_enable(&mut self) {
            let np = RX_PID.load(Ordering::Relaxed);
            Self::dpram().ep_buffer_control[RX_BC].write(|w| unsafe {
                w.pid_0()
                    .bit(np)
                    .full_0()
                    .clear_bit()
                    .available_0()
                    .set_bit()
                    .length_0()
                    .bits(PACKET_SIZE as u16)
            });
            RX_PID.store(!np, Ordering::Relaxed);
        }

        fn tx_busy(&mut self) -> bool {
            // The controller drops the available bit once the host has
            // collected the buffer.
            Self::dpram().ep_buffer_control[TX_BC]
                .read()
                .available_0()
                .bit()
        }

        fn start_tx(&mut self, data: &[u8]) {
            Self::start_in(TX_BC, TX_BUF, &TX_PID, data);
        }

        fn set_halt(&mut self, ep: BulkEp, halt: bool) {
            let (bc, pid) = match ep {
                BulkEp::Out => (RX_BC, &RX_PID),
                BulkEp::In => (TX_BC, &TX_PID),
            };
            if halt {
                Self::dpram().ep_buffer_control[bc].modify(|_, w| w.stall().set_bit());
            } else {
                Self::dpram().ep_buffer_control[bc].modify(|_, w| w.stall().clear_bit());
                // Fresh toggle after a cleared halt.
                pid.store(false, Ordering::Relaxed);
            }
        }

        fn halted(&mut self, ep: BulkEp) -> bool {
            let bc = match ep {
                BulkEp::Out => RX_BC,
                BulkEp::In => TX_BC,
            };
            Self::dpram().ep_buffer_control[bc].read().stall().bit()
        }
    }

    ////////////////////////////////////////////////////////////////////////
    // SIO pin bindings for the transaction engine.

    /// Output pin driven through the SIO set/clear registers. The pin must
    /// already be configured as an SIO output.
    struct SioOut {
        pin: u8,
    }

    impl SioOut {
        fn new(pin: u8) -> Self {
            SioOut { pin }
        }
    }

    impl ErrorType for SioOut {
        type Error = core::convert::Infallible;
    }

    impl OutputPin for SioOut {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            let sio = unsafe { &*rp2040_pac::SIO::ptr() };
            sio.gpio_out_clr.write(|w| unsafe { w.bits(1 << self.pin) });
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            let sio = unsafe { &*rp2040_pac::SIO::ptr() };
            sio.gpio_out_set.write(|w| unsafe { w.bits(1 << self.pin) });
            Ok(())
        }
    }

    /// Input pin read through the SIO input register.
    struct SioIn {
        pin: u8,
    }

    impl SioIn {
        fn new(pin: u8) -> Self {
            SioIn { pin }
        }
    }

    impl ErrorType for SioIn {
        type Error = core::convert::Infallible;
    }

    impl InputPin for SioIn {
        fn is_high(&mut self) -> Result<bool, Self::Error> {
            let sio = unsafe { &*rp2040_pac::SIO::ptr() };
            Ok(sio.gpio_in.read().bits() & (1 << self.pin) != 0)
        }

        fn is_low(&mut self) -> Result<bool, Self::Error> {
            self.is_high().map(|high| !high)
        }
    }

    ////////////////////////////////////////////////////////////////////////
    // SSP shifter binding. Enabling hands the TCK/TDI/TDO pins to the SPI
    // function and starts the block; disabling returns them to SIO so the
    // bit-banged TAP can use them again.

    struct Ssp;

    impl Shifter for Ssp {
        fn enable(&mut self) {
            let io = unsafe { &*rp2040_pac::IO_BANK0::ptr() };
            let spi = unsafe { &*rp2040_pac::SPI0::ptr() };
            for pin in [TCK_PIN, TDI_PIN, TDO_PIN] {
                io.gpio[pin as usize].gpio_ctrl.write(|w| w.funcsel().spi());
            }
            // Drop anything a previous write-only transfer left in the
            // receive FIFO.
            while spi.sspsr.read().rne().bit() {
                let _ = spi.sspdr.read();
            }
            spi.sspcr1.modify(|_, w| w.sse().set_bit());
        }

        fn disable(&mut self) {
            let io = unsafe { &*rp2040_pac::IO_BANK0::ptr() };
            let spi = unsafe { &*rp2040_pac::SPI0::ptr() };
            spi.sspcr1.modify(|_, w| w.sse().clear_bit());
            for pin in [TCK_PIN, TDI_PIN, TDO_PIN] {
                io.gpio[pin as usize].gpio_ctrl.write(|w| w.funcsel().sio());
            }
        }

        fn load(&mut self, byte: u8) {
            let spi = unsafe { &*rp2040_pac::SPI0::ptr() };
            spi.sspdr.write(|w| unsafe { w.data().bits(byte.into()) });
        }

        fn done(&mut self) -> bool {
            let spi = unsafe { &*rp2040_pac::SPI0::ptr() };
            !spi.sspsr.read().bsy().bit()
        }

        fn take(&mut self) -> u8 {
            let spi = unsafe { &*rp2040_pac::SPI0::ptr() };
            spi.sspdr.read().data().bits() as u8
        }
    }

    ////////////////////////////////////////////////////////////////////////
    // Board-control operations.

    /// Board plumbing around the core: the power and reset lines, the
    /// configuration block, the sense ADC, delays, and the bootloader
    /// handoff.
    struct PicoBoard {
        control: u8,
        /// Configuration and serial block, at the layout defined in [`nvm`].
        /// Shadowed in RAM on this board.
        store: [u8; 32],
        rst: SioOut,
        power: SioOut,
    }

    impl PicoBoard {
        fn new() -> Self {
            let mut store = [0xff; 32];
            store[nvm::CONTROL as usize] = DEFAULT_CONTROL;
            store[nvm::CLOCK as usize] = DEFAULT_CLOCK;
            store[nvm::SERIAL as usize..nvm::SERIAL as usize + SERIAL_LEN]
                .copy_from_slice(b"RP2040JTAG-00001");
            let mut board = PicoBoard {
                control: 0,
                store,
                rst: SioOut::new(RST_PIN),
                power: SioOut::new(POWER_PIN),
            };
            // Apply the persisted power-up default.
            let control = board.nvm_read(nvm::CONTROL);
            board.set_control(control);
            board
        }
    }

    impl Board for PicoBoard {
        fn reset_target(&mut self) {
            // Reconfiguration line is active low; hold it a millisecond.
            self.rst.set_low().unwrap();
            self.delay(1, 0);
            self.rst.set_high().unwrap();
        }

        fn control(&mut self) -> u8 {
            self.control
        }

        fn set_control(&mut self, value: u8) {
            self.control = value;
            if value & 0x01 != 0 {
                self.power.set_high().unwrap();
            } else {
                self.power.set_low().unwrap();
            }
        }

        fn nvm_read(&mut self, index: u8) -> u8 {
            self.store[index as usize % self.store.len()]
        }

        fn nvm_write(&mut self, index: u8, value: u8) {
            let len = self.store.len();
            self.store[index as usize % len] = value;
        }

        fn sense_voltage(&mut self) -> u8 {
            let adc = unsafe { &*rp2040_pac::ADC::ptr() };
            adc.cs
                .modify(|_, w| unsafe { w.ainsel().bits(SENSE_CHANNEL) });
            adc.cs.modify(|_, w| w.start_once().set_bit());
            while !adc.cs.read().ready().bit() {}
            // Top 8 of the 12 conversion bits.
            (adc.result.read().result().bits() >> 4) as u8
        }

        fn delay(&mut self, ms: u8, us: u8) {
            cortex_m::asm::delay((u32::from(ms) * 1000 + u32::from(us)) * CYCLES_PER_US);
        }

        fn serial(&mut self) -> [u8; SERIAL_LEN] {
            let mut block = [0; SERIAL_LEN];
            block.copy_from_slice(
                &self.store[nvm::SERIAL as usize..nvm::SERIAL as usize + SERIAL_LEN],
            );
            block
        }

        fn set_serial(&mut self, serial: &[u8; SERIAL_LEN]) {
            self.store[nvm::SERIAL as usize..nvm::SERIAL as usize + SERIAL_LEN]
                .copy_from_slice(serial);
        }

        fn enter_update(&mut self) -> ! {
            cortex_m::interrupt::disable();
            // Drop off the bus so the host sees a clean detach before the
            // bootloader reappears as a different device.
            UsbRegs::regs()
                .sie_ctrl
                .modify(|_, w| w.pullup_en().clear_bit());
            self.delay(100, 0);
            // Mask-ROM lookup of the USB bootloader entry, then jump.
            unsafe {
                let table = usize::from(*(0x0000_0014 as *const u16)) as *const u16;
                let lookup: extern "C" fn(*const u16, u32) -> *const () =
                    core::mem::transmute(usize::from(*(0x0000_0018 as *const u16)));
                let code = u32::from(b'U') | u32::from(b'B') << 8;
                let entry: extern "C" fn(u32, u32) -> ! = core::mem::transmute(lookup(table, code));
                entry(0, 0)
            }
        }
    }
}

#[cfg(not(all(feature = "firmware", target_os = "none")))]
fn main() {}
