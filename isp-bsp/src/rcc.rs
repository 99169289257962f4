use stm32ral::{flash, pwr, rcc};
use stm32ral::{modify_reg, read_reg, reset_reg};

pub struct RCC {
    rcc: rcc::Instance,
}

impl RCC {
    pub fn new(rcc: rcc::Instance) -> Self {
        RCC { rcc }
    }

    /// Bring the core up from the external crystal: HSE -> PLL -> 96MHz core clock,
    /// with the PLL's Q output fixed at the 48MHz OTG_FS requires.
    ///
    /// Unsafety: this function should be called from the main context.
    /// No other contexts should be active at the same time.
    pub unsafe fn setup(&self) -> Clocks {
        modify_reg!(rcc, self.rcc, CR, HSION: On);
        while read_reg!(rcc, self.rcc, CR, HSIRDY == NotReady) {}
        modify_reg!(rcc, self.rcc, CFGR, SW: HSI);
        while read_reg!(rcc, self.rcc, CFGR, SWS != HSI) {}

        modify_reg!(rcc, self.rcc, CR, HSEON: Off, CSSON: Off, PLLON: Off, PLLI2SON: Off);
        reset_reg!(rcc, self.rcc, RCC, AHB1ENR);
        reset_reg!(rcc, self.rcc, RCC, AHB2ENR);
        reset_reg!(rcc, self.rcc, RCC, APB1ENR);
        reset_reg!(rcc, self.rcc, RCC, APB2ENR);

        modify_reg!(rcc, self.rcc, CR, HSEBYP: Bypassed);
        modify_reg!(rcc, self.rcc, CR, HSEON: On);
        while read_reg!(rcc, self.rcc, CR, HSERDY == NotReady) {}

        // APB1 max 50MHz, APB2 max 100MHz at this core frequency.
        modify_reg!(rcc, self.rcc, CFGR, HPRE: Div1, PPRE1: Div2, PPRE2: Div1);

        // 25MHz HSE / 25 * 192 / 2 = 96MHz core, /4 = 48MHz USB.
        modify_reg!(
            rcc,
            self.rcc,
            PLLCFGR,
            PLLSRC: HSE,
            PLLM: 25,
            PLLN: 192,
            PLLP: Div2,
            PLLQ: 4
        );

        modify_reg!(rcc, self.rcc, APB1ENR, PWREN: Enabled);
        let pwr = &*pwr::PWR;
        modify_reg!(pwr, pwr, CR, VOS: Scale1);

        modify_reg!(rcc, self.rcc, CR, PLLON: On);
        while read_reg!(rcc, self.rcc, CR, PLLRDY == NotReady) {}

        // 3 wait states required at 96MHz core clock, 3.3V supply.
        modify_reg!(flash, &*flash::FLASH, ACR, LATENCY: 3);

        modify_reg!(rcc, self.rcc, CFGR, SW: PLL);
        while read_reg!(rcc, self.rcc, CFGR, SWS != PLL) {}

        modify_reg!(
            rcc,
            self.rcc,
            AHB1ENR,
            GPIOAEN: Enabled,
            GPIOBEN: Enabled,
            GPIOCEN: Enabled
        );
        // (GPIOB backs the ISP RESET line; GPIOC backs both LEDs.)
        modify_reg!(rcc, self.rcc, AHB2ENR, OTGFSEN: Enabled);
        modify_reg!(rcc, self.rcc, APB1ENR, SPI2EN: Enabled, USART2EN: Enabled);
        modify_reg!(rcc, self.rcc, APB2ENR, SPI1EN: Enabled);

        Clocks { sysclk: 96_000_000 }
    }
}

pub struct Clocks {
    sysclk: u32,
}

impl Clocks {
    pub fn hclk(&self) -> u32 {
        self.sysclk
    }

    pub fn pclk1(&self) -> u32 {
        self.sysclk / 2
    }

    pub fn pclk2(&self) -> u32 {
        self.sysclk
    }
}
