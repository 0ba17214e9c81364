use std::fs::{File, OpenOptions};
use std::path::Path;

/// How the subsystem wants a backing file opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileMode {
    /// Read-only; the file must exist.
    Read,
    /// Read-write; the file must exist.
    ReadWrite,
    /// Read-write, creating the file when it does not exist yet.
    ReadWriteCreate,
}

/// Host services the cartridge subsystem calls out to.
///
/// Rumble is driven synchronously from the bus thread and must not block.
pub trait Platform {
    fn open_file(&mut self, path: &Path, mode: FileMode) -> Option<File>;
    fn start_rumble(&mut self);
    fn stop_rumble(&mut self);
}

/// Default host backend: plain filesystem access, no rumble hardware.
pub struct HostPlatform;

impl Platform for HostPlatform {
    fn open_file(&mut self, path: &Path, mode: FileMode) -> Option<File> {
        let result = match mode {
            FileMode::Read => File::open(path),
            FileMode::ReadWrite => OpenOptions::new().read(true).write(true).open(path),
            FileMode::ReadWriteCreate => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(path),
        };
        match result {
            Ok(file) => Some(file),
            Err(err) => {
                log::debug!("failed to open {} ({mode:?}): {err}", path.display());
                None
            }
        }
    }

    fn start_rumble(&mut self) {}

    fn stop_rumble(&mut self) {}
}
