// Copyright 2019 Adam Greig
// Dual licensed under the Apache 2.0 and MIT licenses.

use stm32ral::spi;
use stm32ral::{modify_reg, read_reg, write_reg};

pub struct SPI {
    spi: spi::Instance,
}

/// Prescaler ladder matching the AVR original's SPCR/SPSR rate table
/// (`isp_attach_hardware`'s 128/64/32/16/8 stepping), narrowed to the
/// five dividers this driver ever selects between.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Prescaler {
    Div128 = 0b110,
    Div64 = 0b101,
    Div32 = 0b100,
    Div16 = 0b011,
    Div8 = 0b010,
}

impl Prescaler {
    pub const LADDER: [Prescaler; 5] = [
        Prescaler::Div128,
        Prescaler::Div64,
        Prescaler::Div32,
        Prescaler::Div16,
        Prescaler::Div8,
    ];
}

impl SPI {
    pub fn new(spi: spi::Instance) -> Self {
        SPI { spi }
    }

    /// Set up SPI peripheral for ISP mode 0 (CPOL=0, CPHA=0), MSB first,
    /// 8-bit full duplex transfers, software NSS (the target RESET line is
    /// driven separately and isn't wired to hardware NSS).
    pub fn setup_isp(&self, prescaler: Prescaler) {
        write_reg!(
            spi,
            self.spi,
            CR1,
            BIDIMODE: Unidirectional,
            CRCEN: Disabled,
            RXONLY: FullDuplex,
            SSM: Enabled,
            SSI: SlaveNotSelected,
            LSBFIRST: MSBFirst,
            BR: prescaler as u32,
            MSTR: Master,
            CPOL: IdleLow,
            CPHA: FirstEdge,
            SPE: Disabled
        );
        write_reg!(spi, self.spi, CR2, FRXTH: Quarter, DS: EightBit);
    }

    pub fn enable(&self) {
        modify_reg!(spi, self.spi, CR1, SPE: Enabled);
    }

    /// Wait for any pending operation then disable SPI
    pub fn disable(&self) {
        self.wait_busy();
        write_reg!(spi, self.spi, CR1, SPE: Disabled);
    }

    /// Exchange a single byte, full duplex. Blocks until the response byte
    /// has been clocked back in.
    pub fn exchange(&self, data: u8) -> u8 {
        self.write_dr_u8(data);
        self.wait_txe();
        self.wait_rxne();
        self.read_dr_u8()
    }

    /// Wait for current SPI operation to complete
    #[inline(always)]
    pub fn wait_busy(&self) {
        while read_reg!(spi, self.spi, SR, BSY == Busy) {}
    }

    /// Wait for RXNE
    #[inline(always)]
    fn wait_rxne(&self) {
        while read_reg!(spi, self.spi, SR, RXNE == Empty) {}
    }

    /// Wait for TXE
    #[inline(always)]
    fn wait_txe(&self) {
        while read_reg!(spi, self.spi, SR, TXE != Empty) {}
    }

    /// Perform an 8-bit read from DR
    #[inline(always)]
    fn read_dr_u8(&self) -> u8 {
        unsafe { core::ptr::read_volatile(&self.spi.DR as *const _ as *const u8) }
    }

    /// Perform an 8-bit write to DR
    #[inline(always)]
    fn write_dr_u8(&self, data: u8) {
        unsafe { core::ptr::write_volatile(&self.spi.DR as *const _ as *mut u8, data) };
    }
}
