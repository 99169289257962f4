use stm32ral::syst;
use stm32ral::{modify_reg, read_reg, write_reg};

const SYST_CSR_ENABLE: u32 = 1 << 0;
const SYST_CSR_TICKINT: u32 = 1 << 1;
const SYST_CSR_CLKSOURCE: u32 = 1 << 2;
const SYST_CSR_COUNTFLAG: u32 = 1 << 16;

pub struct Delay {
    systick: syst::Instance,
}

impl Delay {
    pub fn new(systick: syst::Instance) -> Self {
        // Set clock source to processor clock
        modify_reg!(syst, systick, CSR, |r| (r | SYST_CSR_CLKSOURCE));

        // Set reload and current values
        write_reg!(syst, systick, RVR, 0xffffff);
        write_reg!(syst, systick, CVR, 0);

        // Enable the counter
        modify_reg!(syst, systick, CSR, |r| (r | SYST_CSR_ENABLE));

        Delay { systick }
    }

    pub fn delay_ticks(&self, mut ticks: u32) {
        let mut last = self.get_current();
        loop {
            let now = self.get_current();
            let delta = last.wrapping_sub(now) & 0xffffff;

            if delta >= ticks {
                break;
            } else {
                ticks -= delta;
                last = now;
            }
        }
    }

    #[inline(always)]
    pub fn get_current(&self) -> u32 {
        read_reg!(syst, self.systick, CVR)
    }

    /// Busy-wait for `count` units of 4 core clock cycles.
    ///
    /// Mirrors the AVR `_delay_loop_2` primitive the software serial engine's
    /// bit-bang timing and the ISP driver's poll backoffs are expressed in, so
    /// a rate table tuned against the original can be reused unchanged.
    pub fn spin(&self, count: u16) {
        self.delay_ticks((count as u32) * 4);
    }
}
