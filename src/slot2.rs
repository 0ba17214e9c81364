use std::io;
use std::io::Read;
use std::path::Path;

use crc::Crc;

use crate::cartridge::addons::{GuitarGrip, MemExpansionPak, RumblePak};
use crate::cartridge::{CartDevice, GameCart, Slot2Input};
use crate::platform::{FileMode, HostPlatform, Platform};
use crate::savestate::Savestate;

const CRC32: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

// Padded ROM images are at least this big.
const MIN_ROM_LEN: usize = 0x200;

// Only the header goes into savestates: DS software is only known to
// identify the inserted title and read save data through this slot, never
// the ROM body.
const ROM_HEADER_LEN: usize = 192;

/// Slot-2 addon selector for [`Slot2::load_slot2_addon`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddonKind {
    RumblePak = 1,
    GuitarGrip = 2,
    MemExpansionPak = 3,
}

/// The Slot-2 bus endpoint: owns whatever occupies the slot and routes
/// ROM/SRAM accesses to it. An empty slot answers with open-bus values.
pub struct Slot2 {
    cart_inserted: bool,
    cart_crc: u32,
    cart_id: u32,
    cart: Option<CartDevice>,
    platform: Box<dyn Platform>,
}

impl Default for Slot2 {
    fn default() -> Self {
        Self::new()
    }
}

impl Slot2 {
    pub fn new() -> Self {
        Self::with_platform(Box::new(HostPlatform))
    }

    pub fn with_platform(platform: Box<dyn Platform>) -> Self {
        Slot2 {
            cart_inserted: false,
            cart_crc: 0,
            cart_id: 0,
            cart: None,
            platform,
        }
    }

    pub fn inserted(&self) -> bool {
        self.cart_inserted
    }

    pub fn crc(&self) -> u32 {
        self.cart_crc
    }

    pub fn device(&self) -> Option<&CartDevice> {
        self.cart.as_ref()
    }

    pub fn rom(&self) -> Option<&[u8]> {
        self.cart.as_ref().and_then(|cart| cart.game()).map(GameCart::rom)
    }

    pub fn rom_size(&self) -> u32 {
        self.rom().map_or(0, |rom| rom.len() as u32)
    }

    /// Backup memory of the inserted game cart, if any.
    pub fn save_mem(&self) -> Option<&[u8]> {
        self.cart
            .as_ref()
            .and_then(|cart| cart.game())
            .map(|game| game.backup().mem())
    }

    /// A console reset deliberately leaves Slot-2 alone, so resetting a DS
    /// game keeps its GBA state and resetting to firmware keeps the slot
    /// occupied. `eject` is the real clear.
    pub fn reset(&mut self) {}

    pub fn eject(&mut self) {
        self.cart = None;
        self.cart_inserted = false;
        self.cart_crc = 0;
        self.cart_id = 0;
        self.reset();
    }

    /// Read a GBA ROM image from disk and insert the matching cart device.
    /// On open failure the slot is left untouched.
    pub fn load_rom(&mut self, path: &Path, sram_path: &Path) -> io::Result<()> {
        let Some(mut file) = self.platform.open_file(path, FileMode::Read) else {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("could not open {}", path.display()),
            ));
        };

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        self.load_rom_common(data, sram_path);
        Ok(())
    }

    /// Same as [`Slot2::load_rom`] with the image already in memory.
    pub fn load_rom_bytes(&mut self, data: &[u8], sram_path: &Path) {
        self.load_rom_common(data.to_vec(), sram_path);
    }

    fn load_rom_common(&mut self, mut rom: Vec<u8>, sram_path: &Path) {
        // pad up to the next power of two, 512 bytes at minimum
        let mut len = MIN_ROM_LEN;
        while len < rom.len() {
            len <<= 1;
        }
        rom.resize(len, 0);

        log::info!(
            "GBA game code: {}",
            String::from_utf8_lossy(&rom[0xAC..0xB0])
        );

        self.cart_crc = CRC32.checksum(&rom);
        log::info!("GBA ROM CRC32: {:08X}", self.cart_crc);
        self.cart_inserted = true;
        self.cart_id = 0;

        let mut cart = CartDevice::for_rom(rom);
        cart.load_save(sram_path, self.platform.as_mut());
        self.cart = Some(cart);
    }

    /// Eject whatever occupies the slot and insert a non-ROM addon.
    pub fn load_slot2_addon(&mut self, kind: AddonKind) {
        self.eject();
        self.cart = Some(match kind {
            AddonKind::RumblePak => CartDevice::RumblePak(RumblePak::default()),
            AddonKind::GuitarGrip => CartDevice::GuitarGrip(GuitarGrip::default()),
            AddonKind::MemExpansionPak => CartDevice::MemExpansionPak(MemExpansionPak::new()),
        });
    }

    /// Migrate save persistence to `path`; see [`Backup::relocate`].
    ///
    /// [`Backup::relocate`]: crate::cartridge::backup::Backup::relocate
    pub fn relocate_save(&mut self, path: &Path, write: bool) {
        if let Some(cart) = &mut self.cart {
            cart.relocate_save(path, write, self.platform.as_mut());
        }
    }

    pub fn set_input(&mut self, input: Slot2Input, pressed: bool) -> i32 {
        match &mut self.cart {
            Some(cart) => cart.set_input(input, pressed),
            None => -1,
        }
    }

    pub fn rom_read(&self, addr: u32) -> u16 {
        match &self.cart {
            Some(cart) => cart.rom_read(addr),
            // open bus: the halfword address lingers on the AD lines
            None => ((addr >> 1) & 0xFFFF) as u16,
        }
    }

    pub fn rom_write(&mut self, addr: u32, val: u16) {
        if let Some(cart) = &mut self.cart {
            cart.rom_write(addr, val, self.platform.as_mut());
        }
    }

    pub fn sram_read(&mut self, addr: u32) -> u8 {
        match &mut self.cart {
            Some(cart) => cart.sram_read(addr),
            None => 0xFF,
        }
    }

    pub fn sram_write(&mut self, addr: u32, val: u8) {
        if let Some(cart) = &mut self.cart {
            cart.sram_write(addr, val);
        }
    }

    pub fn do_savestate(&mut self, file: &mut Savestate) {
        file.section(b"GBAC");

        // addon state rides along without ever touching the ROM fields;
        // on load the addon must already be inserted
        if let Some(cart) = &mut self.cart {
            if cart.is_addon() {
                cart.do_savestate(file);
                return;
            }
        }

        let mut rom_size = self.rom_size();
        file.var_u32(&mut rom_size);
        if rom_size == 0 {
            // no GBA cartridge on the saving side; mirror that here
            self.eject();
            return;
        }

        let old_crc = self.cart_crc;
        file.var_u32(&mut self.cart_crc);
        let crc_changed = self.cart_crc != old_crc;

        let mut cart = match self.cart.take() {
            Some(mut cart) => {
                if crc_changed {
                    // a different title: reallocate so the image is
                    // zero-padded to its full length
                    if let Some(game) = cart.game_mut() {
                        *game.rom_mut() = vec![0; rom_size as usize];
                    }
                }
                cart
            }
            None => CartDevice::Game(GameCart::new(vec![0; rom_size as usize])),
        };

        // only the header is serialized; anything beyond it survives a
        // load only when the same ROM is already inserted (CRC match)
        if let Some(game) = cart.game_mut() {
            let rom = game.rom_mut();
            let len = rom.len().min(ROM_HEADER_LEN);
            file.var_bytes(&mut rom[..len]);
        }

        self.cart_inserted = true;
        file.var_u32(&mut self.cart_crc);
        file.var_u32(&mut self.cart_id);

        if !file.saving() {
            // the restored header decides whether the solar sensor is wired up
            cart = cart.redetect_variant();
        }

        cart.do_savestate(file);
        self.cart = Some(cart);
    }
}
