use crate::cartridge::{Gpio, Slot2Input};
use crate::savestate::Savestate;

// Illumination offsets for the eleven sensor levels.
const LUX_LEVELS: [u8; 11] = [0, 5, 11, 18, 27, 42, 62, 84, 109, 139, 183];

/// Boktai solar sensor: a clocked serial counter compared against an
/// illumination sample latched at reset time. Wired to GPIO data bits
/// 0 (clock), 1 (reset), 2 (chip select, active low); the sensor answers
/// on bit 3.
#[derive(Clone, Debug)]
pub struct SolarSensor {
    light_edge: bool,
    light_counter: u8,
    light_sample: u8,
    light_level: u8,
}

impl Default for SolarSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl SolarSensor {
    pub fn new() -> Self {
        SolarSensor {
            light_edge: false,
            light_counter: 0,
            light_sample: 0xFF,
            light_level: 0,
        }
    }

    /// Runs after every GPIO data write.
    pub fn process_gpio(&mut self, gpio: &mut Gpio) {
        if gpio.data & 0x04 != 0 {
            // chip deselected
            return;
        }
        if gpio.data & 0x02 != 0 {
            // reset: latch a fresh illumination sample
            let prev = self.light_sample;
            self.light_counter = 0;
            self.light_sample = 0xFF - (0x16 + LUX_LEVELS[self.light_level as usize]);
            log::debug!(
                "solar sensor reset (sample {prev:#04X} -> {:#04X})",
                self.light_sample
            );
        }
        if gpio.data & 0x01 != 0 && self.light_edge {
            self.light_counter = self.light_counter.wrapping_add(1);
        }
        self.light_edge = gpio.data & 0x01 == 0;

        let send_bit = (self.light_counter >= self.light_sample) as u16;
        if gpio.control & 0x01 != 0 {
            // the sensor only drives pins the DS leaves as inputs
            gpio.data = (gpio.data & gpio.direction) | ((send_bit << 3) & !gpio.direction & 0xF);
        }
    }

    /// Sensor button routing. Release events are ignored; the return value
    /// is the new level.
    pub fn set_input(&mut self, input: Slot2Input, pressed: bool) -> i32 {
        if !pressed {
            return -1;
        }

        match input {
            Slot2Input::SolarSensorDown => {
                if self.light_level > 0 {
                    self.light_level -= 1;
                }
                self.light_level as i32
            }
            Slot2Input::SolarSensorUp => {
                if self.light_level < 10 {
                    self.light_level += 1;
                }
                self.light_level as i32
            }
            _ => -1,
        }
    }

    pub fn do_savestate(&mut self, file: &mut Savestate) {
        let mut edge = self.light_edge as u8;
        file.var_u8(&mut edge);
        self.light_edge = edge != 0;

        file.var_u8(&mut self.light_counter);
        file.var_u8(&mut self.light_sample);
        file.var_u8(&mut self.light_level);
    }
}
