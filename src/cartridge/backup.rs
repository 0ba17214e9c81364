use std::fs::File;
use std::io;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::platform::{FileMode, Platform};
use crate::savestate::Savestate;

// A flash sector erase wipes this many bytes.
const FLASH_SECTOR_LEN: usize = 0x1000;

// On FLASH1M the bank bit selects one of two 64 KiB halves.
const FLASH_BANK_LEN: usize = 0x10000;

/// Backup technology, implied entirely by the length of the save file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveType {
    None = 0,
    Eeprom4k,
    Eeprom64k,
    Sram256k,
    Flash512k,
    Flash1m,
}

impl SaveType {
    fn from_len(len: usize) -> SaveType {
        match len {
            512 => SaveType::Eeprom4k,
            8192 => SaveType::Eeprom64k,
            32768 => SaveType::Sram256k,
            65536 => SaveType::Flash512k,
            0x20000 => SaveType::Flash1m,
            0 => SaveType::None,
            _ => {
                log::warn!("bad GBA save length {len}, treating as no backup");
                SaveType::None
            }
        }
    }

    fn from_u8(v: u8) -> SaveType {
        match v {
            1 => SaveType::Eeprom4k,
            2 => SaveType::Eeprom64k,
            3 => SaveType::Sram256k,
            4 => SaveType::Flash512k,
            5 => SaveType::Flash1m,
            0 => SaveType::None,
            _ => {
                log::warn!("bad save type {v} in savestate");
                SaveType::None
            }
        }
    }
}

/// Flash command-sequence state. `state` is the position inside the
/// unlock/command sequence, `cmd` the command latched once unlocked.
#[derive(Clone, Copy, Debug, Default)]
pub struct FlashState {
    pub state: u8,
    pub cmd: u8,
    pub bank: u8,
    pub manufacturer: u8,
    pub device: u8,
}

/// Backup-memory engine: one byte-addressed interface over EEPROM (stub),
/// battery SRAM and the two flash chip families. Owns the in-memory image
/// and the write-through handle to the save file.
pub struct Backup {
    mem: Vec<u8>,
    save_type: SaveType,
    flash: FlashState,
    path: Option<PathBuf>,
    file: Option<File>,
}

impl Default for Backup {
    fn default() -> Self {
        Self::new()
    }
}

impl Backup {
    pub fn new() -> Self {
        Backup {
            mem: Vec::new(),
            save_type: SaveType::None,
            flash: FlashState::default(),
            path: None,
            file: None,
        }
    }

    pub fn save_type(&self) -> SaveType {
        self.save_type
    }

    pub fn mem(&self) -> &[u8] {
        &self.mem
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Open `path` and size the buffer from it. A missing or unreadable
    /// file leaves the cart without backup memory; the technology is
    /// chosen purely from the file length.
    pub fn load(&mut self, path: &Path, platform: &mut dyn Platform) {
        self.mem = Vec::new();
        self.file = None;
        self.path = Some(path.to_path_buf());
        self.flash = FlashState::default();

        if let Some(mut file) = platform.open_file(path, FileMode::ReadWrite) {
            let mut data = Vec::new();
            if file.read_to_end(&mut data).is_ok() {
                self.mem = data;
                self.file = Some(file);
            }
        }

        self.save_type = SaveType::from_len(self.mem.len());
        match self.save_type {
            SaveType::Flash512k => {
                // Panasonic 64 KiB chip
                self.flash.manufacturer = 0x32;
                self.flash.device = 0x1B;
            }
            SaveType::Flash1m => {
                // Sanyo 128 KiB chip
                self.flash.manufacturer = 0x62;
                self.flash.device = 0x13;
            }
            _ => {}
        }

        log::info!(
            "GBA save file: {} ({:?}, {} bytes)",
            path.display(),
            self.save_type,
            self.mem.len()
        );
    }

    /// Move persistence to `path`. A plain rebind re-reads from the new
    /// location; with `write` set, the current buffer is pushed out to it
    /// and the live handle switched over.
    pub fn relocate(&mut self, path: &Path, write: bool, platform: &mut dyn Platform) {
        if !write {
            // lazy
            self.load(path, platform);
            return;
        }

        self.path = Some(path.to_path_buf());
        let Some(mut file) = platform.open_file(path, FileMode::ReadWriteCreate) else {
            log::warn!("failed to create relocated save file {}", path.display());
            return;
        };
        let _ = file.seek(SeekFrom::Start(0));
        let _ = file.write_all(&self.mem);
        self.file = Some(file);
    }

    pub fn read(&mut self, addr: u32) -> u8 {
        let addr = addr & 0xFFFF;

        match self.save_type {
            SaveType::Eeprom4k | SaveType::Eeprom64k => self.read_eeprom(addr),
            SaveType::Flash512k | SaveType::Flash1m => self.read_flash(addr),
            SaveType::Sram256k => self.read_sram(addr as usize),
            SaveType::None => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u32, val: u8) {
        let addr = addr & 0xFFFF;

        match self.save_type {
            SaveType::Eeprom4k | SaveType::Eeprom64k => self.write_eeprom(addr, val),
            SaveType::Flash512k | SaveType::Flash1m => self.write_flash(addr, val),
            SaveType::Sram256k => self.write_sram(addr as usize, val),
            SaveType::None => {}
        }
    }

    // EEPROM access needs DMA-paced serial signalling that no DS-side
    // software is known to rely on; both directions are stubbed.
    fn read_eeprom(&self, _addr: u32) -> u8 {
        0
    }

    fn write_eeprom(&mut self, _addr: u32, _val: u8) {}

    fn read_sram(&self, offset: usize) -> u8 {
        if offset >= self.mem.len() {
            return 0xFF;
        }
        self.mem[offset]
    }

    fn write_sram(&mut self, offset: usize, val: u8) {
        // persistence is best-effort; the bus write itself cannot fail
        let _ = self.write_sram_byte(offset, val);
    }

    /// Byte writes that change the stored value go straight out to the
    /// backing file, one byte at a time.
    fn write_sram_byte(&mut self, offset: usize, val: u8) -> io::Result<()> {
        if offset >= self.mem.len() {
            return Ok(());
        }
        if self.mem[offset] == val {
            return Ok(());
        }

        self.mem[offset] = val;
        if let Some(file) = self.file.as_mut() {
            file.seek(SeekFrom::Start(offset as u64))?;
            file.write_all(&[val])?;
            file.flush()?;
        }
        Ok(())
    }

    fn read_flash(&mut self, addr: u32) -> u8 {
        if self.flash.cmd == 0 {
            return self.read_sram(addr as usize + FLASH_BANK_LEN * self.flash.bank as usize);
        }

        match self.flash.cmd {
            0x90 => {
                // chip identification
                if addr == 0x0000 {
                    return self.flash.manufacturer;
                }
                if addr == 0x0001 {
                    return self.flash.device;
                }
            }
            0xF0 => {
                // terminate
                self.flash.state = 0;
                self.flash.cmd = 0;
            }
            // write and bank switch act on the write path only
            0xA0 | 0xB0 => {}
            cmd => {
                log::warn!("flash: read under unknown command {cmd:#04X} @ {addr:#06X}");
            }
        }

        0xFF
    }

    fn write_flash(&mut self, addr: u32, val: u8) {
        match self.flash.state {
            0x00 => {
                if addr == 0x5555 {
                    if val == 0xF0 {
                        // reset
                        self.flash.state = 0;
                        self.flash.cmd = 0;
                        return;
                    } else if val == 0xAA {
                        self.flash.state = 1;
                        return;
                    }
                }
                if addr == 0x0000 && self.flash.cmd == 0xB0 {
                    // bank switch (1 Mib chips only)
                    self.flash.bank = val;
                    self.flash.cmd = 0;
                    return;
                }
            }
            0x01 => {
                if addr == 0x2AAA && val == 0x55 {
                    self.flash.state = 2;
                    return;
                }
                self.flash.state = 0;
            }
            0x02 => {
                if addr == 0x5555 {
                    // unlock complete, latch the command
                    self.flash.state = match val {
                        0x80 => 0x80, // erase
                        0x90 => 0x90, // chip ID
                        _ => 0,       // 0xA0 write / 0xB0 bank switch arm for the next access
                    };
                    self.flash.cmd = val;
                    return;
                }
                self.flash.state = 0;
            }
            // sector erase: a second unlock pair, then 0x30 at the sector base
            0x80 => {
                if addr == 0x5555 && val == 0xAA {
                    self.flash.state = 0x81;
                    return;
                }
                self.flash.state = 0;
            }
            0x81 => {
                if addr == 0x2AAA && val == 0x55 {
                    self.flash.state = 0x82;
                    return;
                }
                self.flash.state = 0;
            }
            0x82 => {
                if val == 0x30 {
                    let start = addr as usize + FLASH_BANK_LEN * self.flash.bank as usize;
                    let _ = self.erase_sector(start);
                }
                self.flash.state = 0;
                self.flash.cmd = 0;
                return;
            }
            // chip ID: same unlock pair gates the ID reads
            0x90 => {
                if addr == 0x5555 && val == 0xAA {
                    self.flash.state = 0x91;
                    return;
                }
                self.flash.state = 0;
            }
            0x91 => {
                if addr == 0x2AAA && val == 0x55 {
                    self.flash.state = 0x92;
                    return;
                }
                self.flash.state = 0;
            }
            0x92 => {
                self.flash.state = 0;
                self.flash.cmd = 0;
                return;
            }
            _ => {}
        }

        if self.flash.cmd == 0xA0 {
            // single-byte program
            self.write_sram(addr as usize + FLASH_BANK_LEN * self.flash.bank as usize, val);
            self.flash.state = 0;
            self.flash.cmd = 0;
            return;
        }

        log::warn!(
            "flash: unhandled write {val:#04X} @ {addr:#06X} (state {:#04X})",
            self.flash.state
        );
    }

    /// Fill one 4 KiB sector with 0xFF and mirror the range to the file.
    fn erase_sector(&mut self, start: usize) -> io::Result<()> {
        if start >= self.mem.len() {
            return Ok(());
        }
        let end = (start + FLASH_SECTOR_LEN).min(self.mem.len());
        self.mem[start..end].fill(0xFF);

        if let Some(file) = self.file.as_mut() {
            file.seek(SeekFrom::Start(start as u64))?;
            file.write_all(&self.mem[start..end])?;
            file.flush()?;
        }
        Ok(())
    }

    pub fn do_savestate(&mut self, file: &mut Savestate) {
        let mut len = self.mem.len() as u32;
        file.var_u32(&mut len);

        if len as usize != self.mem.len() {
            // reallocate save memory
            self.mem = vec![0; len as usize];
        }
        if len == 0 {
            // no save data, clear the current state
            self.save_type = SaveType::None;
            self.file = None;
            return;
        }

        file.var_bytes(&mut self.mem);

        file.var_u8(&mut self.flash.bank);
        file.var_u8(&mut self.flash.cmd);
        file.var_u8(&mut self.flash.device);
        file.var_u8(&mut self.flash.manufacturer);
        file.var_u8(&mut self.flash.state);

        let mut save_type = self.save_type as u8;
        file.var_u8(&mut save_type);
        self.save_type = SaveType::from_u8(save_type);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::fs::OpenOptions;
    use std::sync::atomic::{AtomicU32, Ordering};

    static NEXT_FILE: AtomicU32 = AtomicU32::new(0);

    fn temp_path(tag: &str) -> PathBuf {
        let n = NEXT_FILE.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "slot2-backup-{}-{n}-{tag}.sav",
            std::process::id()
        ))
    }

    fn backup(len: usize, fill: u8) -> Backup {
        let mut backup = Backup::new();
        backup.mem = vec![fill; len];
        backup.save_type = SaveType::from_len(len);
        match backup.save_type {
            SaveType::Flash512k => {
                backup.flash.manufacturer = 0x32;
                backup.flash.device = 0x1B;
            }
            SaveType::Flash1m => {
                backup.flash.manufacturer = 0x62;
                backup.flash.device = 0x13;
            }
            _ => {}
        }
        backup
    }

    fn unlock(backup: &mut Backup) {
        backup.write(0x5555, 0xAA);
        backup.write(0x2AAA, 0x55);
    }

    #[test]
    fn save_type_follows_file_length() {
        assert_eq!(SaveType::from_len(0), SaveType::None);
        assert_eq!(SaveType::from_len(512), SaveType::Eeprom4k);
        assert_eq!(SaveType::from_len(8192), SaveType::Eeprom64k);
        assert_eq!(SaveType::from_len(32768), SaveType::Sram256k);
        assert_eq!(SaveType::from_len(65536), SaveType::Flash512k);
        assert_eq!(SaveType::from_len(0x20000), SaveType::Flash1m);
        assert_eq!(SaveType::from_len(12345), SaveType::None);
    }

    #[test]
    fn sram_round_trips_and_bounds() {
        let mut backup = backup(32768, 0x00);
        backup.write(0x1234, 0x5A);
        assert_eq!(backup.read(0x1234), 0x5A);
        // addresses are truncated to 16 bits before dispatch
        assert_eq!(backup.read(0x0003_1234), 0x5A);
        // SRAM256K is half the 16-bit window; the upper half is open
        assert_eq!(backup.read(0x9000), 0xFF);
        backup.write(0x9000, 0x11);
        assert_eq!(backup.read(0x9000), 0xFF);
    }

    #[test]
    fn flash_sector_erase() {
        let mut backup = backup(65536, 0xAB);
        unlock(&mut backup);
        backup.write(0x5555, 0x80);
        unlock(&mut backup);
        backup.write(0x1000, 0x30);

        assert!(backup.mem[0x1000..0x2000].iter().all(|&b| b == 0xFF));
        assert!(backup.mem[..0x1000].iter().all(|&b| b == 0xAB));
        assert!(backup.mem[0x2000..].iter().all(|&b| b == 0xAB));
        assert_eq!(backup.flash.state, 0);
        assert_eq!(backup.flash.cmd, 0);
    }

    #[test]
    fn flash_chip_id_and_terminate() {
        let mut backup = backup(0x20000, 0x42);
        unlock(&mut backup);
        backup.write(0x5555, 0x90);
        unlock(&mut backup);
        assert_eq!(backup.read(0x0000), 0x62);
        assert_eq!(backup.read(0x0001), 0x13);

        // the full terminate sequence drops back to array reads
        unlock(&mut backup);
        backup.write(0x5555, 0xF0);
        assert_eq!(backup.read(0x0000), 0x42);

        // a freshly latched 0xF0 answers 0xFF once, then terminates
        unlock(&mut backup);
        backup.write(0x5555, 0xF0);
        assert_eq!(backup.flash.cmd, 0xF0);
        assert_eq!(backup.read(0x0000), 0xFF);
        assert_eq!(backup.read(0x0000), 0x42);
    }

    #[test]
    fn flash_byte_program() {
        let mut backup = backup(65536, 0xFF);
        unlock(&mut backup);
        backup.write(0x5555, 0xA0);
        backup.write(0x0100, 0x5A);
        assert_eq!(backup.read(0x0100), 0x5A);
        assert_eq!(backup.flash.state, 0);
        assert_eq!(backup.flash.cmd, 0);
    }

    #[test]
    fn flash_bank_switch() {
        let mut backup = backup(0x20000, 0x00);
        backup.mem[0x10000 + 0x123] = 0x77;
        unlock(&mut backup);
        backup.write(0x5555, 0xB0);
        backup.write(0x0000, 0x01);
        assert_eq!(backup.flash.bank, 1);
        assert_eq!(backup.read(0x123), 0x77);

        // bank persists across a program command
        unlock(&mut backup);
        backup.write(0x5555, 0xA0);
        backup.write(0x0200, 0x99);
        assert_eq!(backup.mem[0x10000 + 0x200], 0x99);
    }

    #[test]
    fn interrupted_unlock_recovers() {
        let mut backup = backup(65536, 0x00);
        backup.write(0x5555, 0xAA);
        // wrong second write drops the sequence on the floor
        backup.write(0x1111, 0x22);
        assert_eq!(backup.flash.state, 0);
        unlock(&mut backup);
        backup.write(0x5555, 0xA0);
        backup.write(0x0000, 0x33);
        assert_eq!(backup.read(0x0000), 0x33);
    }

    #[test]
    fn writes_reach_the_backing_file() {
        let path = temp_path("writethrough");
        fs::write(&path, vec![0u8; 32768]).unwrap();
        let mut backup = backup(32768, 0x00);
        backup.file = Some(
            OpenOptions::new()
                .read(true)
                .write(true)
                .open(&path)
                .unwrap(),
        );

        backup.write(0x0040, 0xC3);
        let on_disk = fs::read(&path).unwrap();
        assert_eq!(on_disk[0x0040], 0xC3);
        assert_eq!(on_disk.len(), 32768);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn erase_reaches_the_backing_file() {
        let path = temp_path("erase");
        fs::write(&path, vec![0x55u8; 65536]).unwrap();
        let mut backup = backup(65536, 0x55);
        backup.file = Some(
            OpenOptions::new()
                .read(true)
                .write(true)
                .open(&path)
                .unwrap(),
        );

        unlock(&mut backup);
        backup.write(0x5555, 0x80);
        unlock(&mut backup);
        backup.write(0x3000, 0x30);

        let on_disk = fs::read(&path).unwrap();
        assert!(on_disk[0x3000..0x4000].iter().all(|&b| b == 0xFF));
        assert!(on_disk[..0x3000].iter().all(|&b| b == 0x55));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn savestate_round_trip() {
        let mut backup = backup(0x20000, 0x00);
        backup.mem[0x1_0042] = 0xEE;
        backup.flash.bank = 1;
        backup.flash.state = 0x82;
        backup.flash.cmd = 0x80;

        let mut file = Savestate::new_save();
        backup.do_savestate(&mut file);

        let mut restored = Backup::new();
        let mut file = Savestate::new_load(file.into_bytes());
        restored.do_savestate(&mut file);

        assert_eq!(restored.save_type, SaveType::Flash1m);
        assert_eq!(restored.mem, backup.mem);
        assert_eq!(restored.flash.bank, 1);
        assert_eq!(restored.flash.state, 0x82);
        assert_eq!(restored.flash.cmd, 0x80);
        assert_eq!(restored.flash.manufacturer, 0x62);
        assert!(restored.file.is_none());
    }

    #[test]
    fn savestate_with_no_save_clears_state() {
        let mut backup = backup(32768, 0x00);
        let mut empty = Backup::new();
        let mut file = Savestate::new_save();
        empty.do_savestate(&mut file);

        let mut file = Savestate::new_load(file.into_bytes());
        backup.do_savestate(&mut file);
        assert_eq!(backup.save_type, SaveType::None);
        assert!(backup.mem.is_empty());
    }
}
