#![warn(clippy::all)]
#![forbid(unsafe_code)]

//! Slot-2 (GBA cartridge) subsystem of a Nintendo DS emulator.
//!
//! DS software sees the GBA slot through two bus windows: 16-bit ROM
//! accesses and 8-bit SRAM accesses. Whatever occupies the slot — a game
//! cart with backup memory and maybe a GPIO block, or one of the non-ROM
//! addons (Rumble Pak, Guitar Grip, Memory Expansion Pak) — answers those
//! accesses. [`Slot2`] owns the inserted device and is the single entry
//! point for the CPU bus and the frontend.

pub mod cartridge;
pub mod platform;
pub mod savestate;
pub mod slot2;

pub use cartridge::{CartDevice, GameCart, Gpio, SaveType, Slot2Input};
pub use platform::{FileMode, HostPlatform, Platform};
pub use savestate::Savestate;
pub use slot2::{AddonKind, Slot2};
