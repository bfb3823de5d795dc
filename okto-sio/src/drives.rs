//! The 8-slot drive table: mount state, backing images, remote delegation.

use std::path::{Path, PathBuf};

use log::info;

use crate::atr::AtrImage;
use crate::error::{SioError, SioResult};
use crate::frame::DRIVE_COUNT;

/// Mount state of one drive slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    /// Slot disabled; does not answer on the bus at all
    Off,
    /// No local media; eligible for remote delegation
    Empty,
    MountedReadOnly,
    MountedReadWrite,
}

impl MountState {
    pub fn is_mounted(self) -> bool {
        matches!(self, MountState::MountedReadOnly | MountState::MountedReadWrite)
    }
}

/// One drive slot. The delegation flag is true only when no local media is
/// mounted; a local mount always overrides delegation.
#[derive(Debug)]
pub struct DriveSlot {
    state: MountState,
    image: Option<AtrImage>,
    path: Option<PathBuf>,
}

impl DriveSlot {
    fn empty() -> Self {
        DriveSlot {
            state: MountState::Empty,
            image: None,
            path: None,
        }
    }

    pub fn state(&self) -> MountState {
        self.state
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn remote_delegation(&self) -> bool {
        self.state == MountState::Empty
    }

    pub fn image_mut(&mut self) -> Option<&mut AtrImage> {
        self.image.as_mut()
    }
}

/// Consistent point-in-time view of the table, handed to arbitration
#[derive(Debug, Clone, Copy)]
pub struct MountSnapshot {
    states: [MountState; DRIVE_COUNT as usize],
}

impl MountSnapshot {
    /// Slots outside 1..=8 report `Off`: nothing answers there
    pub fn state(&self, slot: u8) -> MountState {
        usize::from(slot)
            .checked_sub(1)
            .and_then(|i| self.states.get(i))
            .copied()
            .unwrap_or(MountState::Off)
    }
}

/// All 8 drive slots, indexed 1..=8.
#[derive(Debug)]
pub struct DriveTable {
    slots: [DriveSlot; DRIVE_COUNT as usize],
}

impl DriveTable {
    pub fn new() -> Self {
        DriveTable {
            slots: std::array::from_fn(|_| DriveSlot::empty()),
        }
    }

    fn check_index(drive: u8) -> SioResult<usize> {
        if (1..=DRIVE_COUNT).contains(&drive) {
            Ok(usize::from(drive - 1))
        } else {
            Err(SioError::InvalidDrive(drive))
        }
    }

    pub fn slot(&self, drive: u8) -> SioResult<&DriveSlot> {
        Ok(&self.slots[Self::check_index(drive)?])
    }

    pub fn slot_mut(&mut self, drive: u8) -> SioResult<&mut DriveSlot> {
        let idx = Self::check_index(drive)?;
        Ok(&mut self.slots[idx])
    }

    /// Mount an ATR image into a slot, replacing whatever was there
    pub fn mount<P: AsRef<Path>>(&mut self, drive: u8, path: P, read_only: bool) -> SioResult<()> {
        let idx = Self::check_index(drive)?;
        let image = AtrImage::open(path.as_ref(), read_only)?;
        info!(
            "D{}: mounted {} ({}, {} sectors x {})",
            drive,
            path.as_ref().display(),
            if read_only { "ro" } else { "rw" },
            image.sector_count(),
            image.sector_size()
        );
        self.slots[idx] = DriveSlot {
            state: if read_only {
                MountState::MountedReadOnly
            } else {
                MountState::MountedReadWrite
            },
            image: Some(image),
            path: Some(path.as_ref().to_path_buf()),
        };
        Ok(())
    }

    /// Remove local media; the slot becomes eligible for remote delegation
    pub fn dismount(&mut self, drive: u8) -> SioResult<()> {
        let idx = Self::check_index(drive)?;
        if self.slots[idx].state.is_mounted() {
            info!("D{}: dismounted", drive);
        }
        self.slots[idx] = DriveSlot::empty();
        Ok(())
    }

    /// Turn the slot off entirely; it no longer answers on the bus
    pub fn disable(&mut self, drive: u8) -> SioResult<()> {
        let idx = Self::check_index(drive)?;
        self.slots[idx] = DriveSlot {
            state: MountState::Off,
            image: None,
            path: None,
        };
        info!("D{}: disabled", drive);
        Ok(())
    }

    /// Point-in-time snapshot for arbitration
    pub fn snapshot(&self) -> MountSnapshot {
        MountSnapshot {
            states: std::array::from_fn(|i| self.slots[i].state()),
        }
    }
}

impl Default for DriveTable {
    fn default() -> Self {
        Self::new()
    }
}
