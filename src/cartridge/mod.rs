pub mod addons;
pub mod backup;
pub mod solar;

use std::path::Path;

use crate::platform::Platform;
use crate::savestate::Savestate;

use addons::{GuitarGrip, MemExpansionPak, RumblePak};
use backup::Backup;
pub use backup::SaveType;
use solar::SolarSensor;

// GPIO registers overlay ROM space at these cart-relative offsets.
const GPIO_DATA: u32 = 0xC4;
const GPIO_DIRECTION: u32 = 0xC6;
const GPIO_CONTROL: u32 = 0xC8;

// Titles wired to the solar sensor; everything else gets a plain cart.
const SOLAR_SENSOR_GAMECODES: [&[u8; 4]; 8] = [
    b"U3IJ", // Bokura no Taiyou - Taiyou Action RPG (Japan)
    b"U3IE", // Boktai - The Sun Is in Your Hand (USA)
    b"U3IP", // Boktai - The Sun Is in Your Hand (Europe)
    b"U32J", // Zoku Bokura no Taiyou - Taiyou Shounen Django (Japan)
    b"U32E", // Boktai 2 - Solar Boy Django (USA)
    b"U32P", // Boktai 2 - Solar Boy Django (Europe)
    b"U33J", // Shin Bokura no Taiyou - Gyakushuu no Sabata (Japan)
    b"A3IJ", // Boktai - The Sun Is in Your Hand (USA) (Sample)
];

/// Inputs routed into the Slot-2 device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot2Input {
    SolarSensorDown,
    SolarSensorUp,
    GuitarGripGreen,
    GuitarGripRed,
    GuitarGripYellow,
    GuitarGripBlue,
}

/// The three GPIO registers overlaid on ROM space. `direction` is a
/// per-bit output enable seen from the DS side; the registers only answer
/// on the bus while `control` bit 0 is set.
#[derive(Clone, Copy, Debug, Default)]
pub struct Gpio {
    pub data: u16,
    pub direction: u16,
    pub control: u16,
}

/// A GBA game cartridge: the padded ROM image, the GPIO block and backup
/// memory.
pub struct GameCart {
    rom: Vec<u8>,
    gpio: Gpio,
    backup: Backup,
}

impl GameCart {
    pub fn new(rom: Vec<u8>) -> Self {
        GameCart {
            rom,
            gpio: Gpio::default(),
            backup: Backup::new(),
        }
    }

    pub fn rom(&self) -> &[u8] {
        &self.rom
    }

    pub(crate) fn rom_mut(&mut self) -> &mut Vec<u8> {
        &mut self.rom
    }

    pub fn gpio(&self) -> &Gpio {
        &self.gpio
    }

    pub fn backup(&self) -> &Backup {
        &self.backup
    }

    pub fn load_save(&mut self, path: &Path, platform: &mut dyn Platform) {
        self.backup.load(path, platform);
    }

    fn rom_read(&self, addr: u32) -> u16 {
        let addr = addr & 0x01FF_FFFF;

        if (GPIO_DATA..GPIO_DATA + 6).contains(&addr) {
            if self.gpio.control & 1 != 0 {
                match addr {
                    GPIO_DATA => return self.gpio.data,
                    GPIO_DIRECTION => return self.gpio.direction,
                    GPIO_CONTROL => return self.gpio.control,
                    _ => {}
                }
            } else {
                return 0;
            }
        }

        let addr = (addr & !1) as usize;
        if addr < self.rom.len() {
            return u16::from_le_bytes([self.rom[addr], self.rom[addr + 1]]);
        }
        0
    }

    /// ROM writes only ever reach the GPIO block. Returns whether the data
    /// register was written, so protocol hooks can run.
    fn rom_write(&mut self, addr: u32, val: u16) -> bool {
        let addr = addr & 0x01FF_FFFF;

        match addr {
            GPIO_DATA => {
                // only the pins the DS drives as outputs take the new value
                self.gpio.data =
                    (self.gpio.data & !self.gpio.direction) | (val & self.gpio.direction);
                true
            }
            GPIO_DIRECTION => {
                self.gpio.direction = val;
                false
            }
            GPIO_CONTROL => {
                self.gpio.control = val;
                false
            }
            _ => {
                log::warn!("unknown GBA GPIO write {val:#06X} @ {addr:#06X}");
                false
            }
        }
    }

    fn do_savestate(&mut self, file: &mut Savestate) {
        file.section(b"GBCS");

        file.var_u16(&mut self.gpio.control);
        file.var_u16(&mut self.gpio.data);
        file.var_u16(&mut self.gpio.direction);

        self.backup.do_savestate(file);
    }
}

/// Everything that can occupy Slot-2. Exactly one variant is inserted at a
/// time; an empty slot is the façade holding no device at all.
pub enum CartDevice {
    Game(GameCart),
    GameSolarSensor(GameCart, SolarSensor),
    RumblePak(RumblePak),
    GuitarGrip(GuitarGrip),
    MemExpansionPak(MemExpansionPak),
}

impl CartDevice {
    /// Builds the right cart variant for a padded ROM image.
    pub fn for_rom(rom: Vec<u8>) -> CartDevice {
        let solar = is_solar_sensor_title(&rom);
        let game = GameCart::new(rom);
        if solar {
            log::info!("GBA solar sensor support detected");
            CartDevice::GameSolarSensor(game, SolarSensor::new())
        } else {
            CartDevice::Game(game)
        }
    }

    pub fn is_addon(&self) -> bool {
        matches!(
            self,
            CartDevice::RumblePak(_) | CartDevice::GuitarGrip(_) | CartDevice::MemExpansionPak(_)
        )
    }

    pub fn game(&self) -> Option<&GameCart> {
        match self {
            CartDevice::Game(game) | CartDevice::GameSolarSensor(game, _) => Some(game),
            _ => None,
        }
    }

    pub(crate) fn game_mut(&mut self) -> Option<&mut GameCart> {
        match self {
            CartDevice::Game(game) | CartDevice::GameSolarSensor(game, _) => Some(game),
            _ => None,
        }
    }

    pub fn load_save(&mut self, path: &Path, platform: &mut dyn Platform) {
        if let Some(game) = self.game_mut() {
            game.load_save(path, platform);
        }
    }

    pub fn relocate_save(&mut self, path: &Path, write: bool, platform: &mut dyn Platform) {
        if let Some(game) = self.game_mut() {
            game.backup.relocate(path, write, platform);
        }
    }

    pub fn rom_read(&self, addr: u32) -> u16 {
        match self {
            CartDevice::Game(game) | CartDevice::GameSolarSensor(game, _) => game.rom_read(addr),
            CartDevice::RumblePak(pak) => pak.rom_read(addr),
            CartDevice::GuitarGrip(grip) => grip.rom_read(),
            CartDevice::MemExpansionPak(pak) => pak.rom_read(addr),
        }
    }

    pub fn rom_write(&mut self, addr: u32, val: u16, platform: &mut dyn Platform) {
        match self {
            CartDevice::Game(game) => {
                game.rom_write(addr, val);
            }
            CartDevice::GameSolarSensor(game, solar) => {
                if game.rom_write(addr, val) {
                    solar.process_gpio(&mut game.gpio);
                }
            }
            CartDevice::RumblePak(pak) => pak.rom_write(addr, val, platform),
            CartDevice::GuitarGrip(_) => {}
            CartDevice::MemExpansionPak(pak) => pak.rom_write(addr, val),
        }
    }

    pub fn sram_read(&mut self, addr: u32) -> u8 {
        match self {
            CartDevice::Game(game) | CartDevice::GameSolarSensor(game, _) => {
                game.backup.read(addr)
            }
            CartDevice::GuitarGrip(grip) => grip.sram_read(addr),
            CartDevice::MemExpansionPak(_) => 0xFF,
            CartDevice::RumblePak(_) => 0,
        }
    }

    pub fn sram_write(&mut self, addr: u32, val: u8) {
        if let CartDevice::Game(game) | CartDevice::GameSolarSensor(game, _) = self {
            game.backup.write(addr, val);
        }
    }

    pub fn set_input(&mut self, input: Slot2Input, pressed: bool) -> i32 {
        match self {
            CartDevice::GameSolarSensor(_, solar) => solar.set_input(input, pressed),
            CartDevice::GuitarGrip(grip) => grip.set_input(input, pressed),
            _ => -1,
        }
    }

    pub fn do_savestate(&mut self, file: &mut Savestate) {
        match self {
            CartDevice::Game(game) => game.do_savestate(file),
            CartDevice::GameSolarSensor(game, solar) => {
                game.do_savestate(file);
                solar.do_savestate(file);
            }
            CartDevice::RumblePak(_) | CartDevice::GuitarGrip(_) => {
                file.section(b"GBCS");
            }
            CartDevice::MemExpansionPak(pak) => {
                file.section(b"GBCS");
                pak.do_savestate(file);
            }
        }
    }

    /// Re-derives the game variant from the cart's own header. Used after
    /// a savestate restores a different title into the slot.
    pub(crate) fn redetect_variant(self) -> CartDevice {
        match self {
            CartDevice::Game(game) if is_solar_sensor_title(&game.rom) => {
                CartDevice::GameSolarSensor(game, SolarSensor::new())
            }
            CartDevice::GameSolarSensor(game, _) if !is_solar_sensor_title(&game.rom) => {
                CartDevice::Game(game)
            }
            other => other,
        }
    }
}

/// Checks the 4-byte game code at ROM offset 0xAC against the known
/// solar-sensor titles.
pub(crate) fn is_solar_sensor_title(rom: &[u8]) -> bool {
    if rom.len() < 0xB0 {
        return false;
    }
    let code = &rom[0xAC..0xB0];
    SOLAR_SENSOR_GAMECODES.iter().any(|c| code == &c[..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game_rom(code: &[u8; 4]) -> Vec<u8> {
        let mut rom = vec![0u8; 0x200];
        rom[0xAC..0xB0].copy_from_slice(code);
        rom
    }

    #[test]
    fn solar_titles_get_the_sensor_variant() {
        let cart = CartDevice::for_rom(game_rom(b"U3IJ"));
        assert!(matches!(cart, CartDevice::GameSolarSensor(..)));

        let cart = CartDevice::for_rom(game_rom(b"AXVE"));
        assert!(matches!(cart, CartDevice::Game(_)));
    }

    #[test]
    fn gpio_registers_hide_until_enabled() {
        let mut rom = game_rom(b"AXVE");
        rom[0xC4] = 0x34;
        rom[0xC5] = 0x12;
        let mut game = GameCart::new(rom);

        // control bit clear: the window reads as zero, not ROM
        assert_eq!(game.rom_read(0xC4), 0);

        game.rom_write(0xC8, 0x0001);
        game.rom_write(0xC6, 0x000F);
        game.rom_write(0xC4, 0xFFFF);
        assert_eq!(game.rom_read(0xC4), 0x000F);
        assert_eq!(game.rom_read(0xC6), 0x000F);
        assert_eq!(game.rom_read(0xC8), 0x0001);

        // odd offsets inside the window fall through to the ROM array
        assert_eq!(game.rom_read(0xC5), 0x1234);
    }

    #[test]
    fn rom_reads_are_little_endian_halfwords() {
        let mut rom = game_rom(b"AXVE");
        rom[0x100] = 0xCD;
        rom[0x101] = 0xAB;
        let game = GameCart::new(rom);

        assert_eq!(game.rom_read(0x100), 0xABCD);
        assert_eq!(game.rom_read(0x0800_0100 & 0x01FF_FFFF), 0xABCD);
        // past the image: zero
        assert_eq!(game.rom_read(0x1_0000), 0);
    }
}
