//! Supply voltage measurement through the internal reference.
//!
//! The clock runs straight from its cell, so VDD is the battery voltage.
//! VDD follows from the factory VREFINT calibration taken at 3.0 V:
//! `VDD = 3000 mV * VREFINT_CAL / VREFINT_DATA`.

use core::ptr;

use embassy_stm32::adc::{Adc, SampleTime, VrefInt};
use embassy_stm32::peripherals::ADC1;

/// Factory-programmed calibration constant sampled at 3.0 V.
const VREFINT_CAL_ADDR: *const u16 = 0x1FFF_75AA as *const u16;
const VREFINT_CAL_MV: u32 = 3_000;

fn read_vrefint_calibration() -> u16 {
    unsafe { ptr::read_volatile(VREFINT_CAL_ADDR) }
}

pub struct VddMonitor<'d> {
    adc: Adc<'d, ADC1>,
    channel: VrefInt,
    calibration: u16,
}

impl<'d> VddMonitor<'d> {
    pub fn new(mut adc: Adc<'d, ADC1>) -> Self {
        adc.set_sample_time(SampleTime::CYCLES160_5);
        let mut channel = adc.enable_vrefint();
        // First conversion after enabling the reference is unreliable.
        let _ = adc.blocking_read(&mut channel);
        Self {
            adc,
            channel,
            calibration: read_vrefint_calibration(),
        }
    }

    pub fn read_millivolts(&mut self) -> u16 {
        let reading = self.adc.blocking_read(&mut self.channel);
        vdd_millivolts(self.calibration, reading)
    }
}

fn vdd_millivolts(calibration: u16, reading: u16) -> u16 {
    if reading == 0 {
        return 0;
    }
    let millivolts = VREFINT_CAL_MV * u32::from(calibration) / u32::from(reading);
    u16::try_from(millivolts).unwrap_or(u16::MAX)
}
