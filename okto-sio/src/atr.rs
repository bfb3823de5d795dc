//! ATR disk image access for locally served drives.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{SioError, SioResult};

/// ATR header magic (little-endian on disk)
pub const ATR_MAGIC: u16 = 0x0296;

/// ATR header length in bytes
pub const ATR_HEADER_LEN: u64 = 16;

/// Boot sectors are always 128 bytes, even on 256-byte-sector images
const BOOT_SECTOR_LEN: usize = 128;
const BOOT_SECTOR_COUNT: u16 = 3;

/// An open ATR image with random-access sector I/O.
#[derive(Debug)]
pub struct AtrImage {
    file: File,
    sector_size: u16,
    sector_count: u16,
}

impl AtrImage {
    /// Open an image, parsing and validating its 16-byte header
    pub fn open<P: AsRef<Path>>(path: P, read_only: bool) -> SioResult<Self> {
        let path = path.as_ref();
        let mut file = File::options()
            .read(true)
            .write(!read_only)
            .open(path)?;

        let mut header = [0u8; ATR_HEADER_LEN as usize];
        file.read_exact(&mut header).map_err(|_| {
            SioError::BadImage(format!("{}: short header", path.display()))
        })?;

        let magic = u16::from_le_bytes([header[0], header[1]]);
        if magic != ATR_MAGIC {
            return Err(SioError::BadImage(format!(
                "{}: bad magic 0x{:04x}",
                path.display(),
                magic
            )));
        }

        // Image size is stored in 16-byte paragraphs: u16 low, u8 high
        let paragraphs =
            u32::from(u16::from_le_bytes([header[2], header[3]])) | (u32::from(header[6]) << 16);
        let sector_size = u16::from_le_bytes([header[4], header[5]]);
        if sector_size != 128 && sector_size != 256 {
            return Err(SioError::BadImage(format!(
                "{}: unsupported sector size {}",
                path.display(),
                sector_size
            )));
        }

        let data_len = paragraphs * 16;
        let sector_count = if sector_size == 256 {
            // First three sectors are short
            let boot_len = u32::from(BOOT_SECTOR_COUNT) * BOOT_SECTOR_LEN as u32;
            if data_len <= boot_len {
                (data_len / BOOT_SECTOR_LEN as u32) as u16
            } else {
                BOOT_SECTOR_COUNT + ((data_len - boot_len) / u32::from(sector_size)) as u16
            }
        } else {
            (data_len / u32::from(sector_size)) as u16
        };

        Ok(AtrImage {
            file,
            sector_size,
            sector_count,
        })
    }

    pub fn sector_size(&self) -> u16 {
        self.sector_size
    }

    pub fn sector_count(&self) -> u16 {
        self.sector_count
    }

    /// Length in bytes of the given sector (boot sectors are short)
    pub fn sector_len(&self, sector: u16) -> usize {
        if self.sector_size == 256 && sector <= BOOT_SECTOR_COUNT {
            BOOT_SECTOR_LEN
        } else {
            usize::from(self.sector_size)
        }
    }

    fn sector_offset(&self, sector: u16) -> SioResult<u64> {
        if sector == 0 || sector > self.sector_count {
            return Err(SioError::BadSector(sector));
        }
        let idx = u64::from(sector - 1);
        let offset = if self.sector_size == 256 {
            let boot = u64::from(BOOT_SECTOR_COUNT);
            if idx < boot {
                idx * BOOT_SECTOR_LEN as u64
            } else {
                boot * BOOT_SECTOR_LEN as u64 + (idx - boot) * u64::from(self.sector_size)
            }
        } else {
            idx * u64::from(self.sector_size)
        };
        Ok(ATR_HEADER_LEN + offset)
    }

    /// Read one sector; returns the bytes read
    pub fn read_sector(&mut self, sector: u16) -> SioResult<Vec<u8>> {
        let offset = self.sector_offset(sector)?;
        let mut buf = vec![0u8; self.sector_len(sector)];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Write one sector; `data` must match the sector length
    pub fn write_sector(&mut self, sector: u16, data: &[u8]) -> SioResult<()> {
        let offset = self.sector_offset(sector)?;
        if data.len() != self.sector_len(sector) {
            return Err(SioError::BadSector(sector));
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.file.flush()?;
        Ok(())
    }

    /// Fill every sector with the format pattern
    pub fn format(&mut self) -> SioResult<()> {
        for sector in 1..=self.sector_count {
            let fill = vec![0u8; self.sector_len(sector)];
            self.write_sector(sector, &fill)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;

    /// Create a blank single-density test image (128-byte sectors)
    pub(crate) fn make_test_atr(name: &str, sectors: u16) -> PathBuf {
        let path = std::env::temp_dir().join(format!("okto-sio-test-{}-{}", std::process::id(), name));
        let data_len = u32::from(sectors) * 128;
        let paragraphs = data_len / 16;

        let mut header = [0u8; ATR_HEADER_LEN as usize];
        header[0..2].copy_from_slice(&ATR_MAGIC.to_le_bytes());
        header[2..4].copy_from_slice(&((paragraphs & 0xFFFF) as u16).to_le_bytes());
        header[4..6].copy_from_slice(&128u16.to_le_bytes());
        header[6] = (paragraphs >> 16) as u8;

        let mut contents = header.to_vec();
        contents.extend(std::iter::repeat(0u8).take(data_len as usize));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_open_and_geometry() {
        let path = make_test_atr("geometry.atr", 720);
        let image = AtrImage::open(&path, true).unwrap();
        assert_eq!(image.sector_size(), 128);
        assert_eq!(image.sector_count(), 720);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_read_write_sector() {
        let path = make_test_atr("rw.atr", 16);
        let mut image = AtrImage::open(&path, false).unwrap();

        let data: Vec<u8> = (0..128).map(|i| i as u8).collect();
        image.write_sector(4, &data).unwrap();
        assert_eq!(image.read_sector(4).unwrap(), data);
        // Neighbors untouched
        assert_eq!(image.read_sector(3).unwrap(), vec![0u8; 128]);
        assert_eq!(image.read_sector(5).unwrap(), vec![0u8; 128]);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_sector_out_of_range() {
        let path = make_test_atr("range.atr", 8);
        let mut image = AtrImage::open(&path, true).unwrap();
        assert!(matches!(image.read_sector(0), Err(SioError::BadSector(0))));
        assert!(matches!(image.read_sector(9), Err(SioError::BadSector(9))));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_bad_magic_rejected() {
        let path = std::env::temp_dir().join(format!("okto-sio-test-{}-bad.atr", std::process::id()));
        std::fs::write(&path, [0u8; 32]).unwrap();
        assert!(matches!(
            AtrImage::open(&path, true),
            Err(SioError::BadImage(_))
        ));
        std::fs::remove_file(&path).ok();
    }
}
