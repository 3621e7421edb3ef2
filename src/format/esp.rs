use std::io::{self, Seek, Write};

use tracing::debug;

use crate::{clock::FatTimestamp, disk};

use super::{
    VolumeLabel,
    boot_sector::{BACKUP_BOOT_SECTOR, Fat32Geometry, FsInfo, Vbr, write_boot_region},
    dir::{skeleton, write_directories},
    fat::{DIRECTORY_CLUSTERS, write_fats},
};

/// The FAT32 file system of the EFI System Partition.
#[derive(Clone, Debug)]
pub struct EspVolume {
    geometry: Fat32Geometry,
    label: VolumeLabel,
    timestamp: FatTimestamp,
}

impl EspVolume {
    pub fn new(geometry: Fat32Geometry, label: VolumeLabel, timestamp: FatTimestamp) -> EspVolume {
        Self {
            geometry,
            label,
            timestamp,
        }
    }

    pub fn geometry(&self) -> &Fat32Geometry {
        &self.geometry
    }

    /// `BS_VolID`, derived from the format timestamp.
    pub fn volume_id(&self) -> u32 {
        self.timestamp.serial()
    }

    /// Writes the reserved region, both FATs and the directory clusters. Clusters past the
    /// directories are left untouched.
    pub fn write<T: Write + Seek>(&self, f: &mut T) -> io::Result<()> {
        let bytes_per_sector = self.geometry.bytes_per_sector() as u64;

        // clear metadata
        let metadata_sectors =
            self.geometry.data_offset() as u64 + DIRECTORY_CLUSTERS.len() as u64;
        disk::write_zeroes(
            f,
            metadata_sectors * bytes_per_sector,
            self.geometry.sector_lba(0) * bytes_per_sector,
        )?;

        let vbr = Vbr::new(&self.geometry, &self.label, self.volume_id());
        let fs_info = FsInfo::new();

        debug!(
            volume_id = self.volume_id(),
            label = %self.label,
            "writing FAT32 boot regions"
        );

        // main and backup boot region
        write_boot_region(f, &self.geometry, &vbr, &fs_info, 0)?;
        write_boot_region(f, &self.geometry, &vbr, &fs_info, BACKUP_BOOT_SECTOR)?;

        write_fats(f, &self.geometry)?;

        write_directories(f, &self.geometry, &skeleton(&self.label, self.timestamp))
    }
}

#[cfg(test)]
fn test_volume() -> (crate::layout::Layout, EspVolume) {
    use crate::layout::{ImageOptionsBuilder, Layout};

    let options = ImageOptionsBuilder::default().build().unwrap();
    let layout = Layout::try_from(&options).unwrap();
    let geometry = Fat32Geometry::try_new(&layout).unwrap();
    let volume = EspVolume::new(
        geometry,
        VolumeLabel::default(),
        FatTimestamp::new(2025, 2, 3, 4, 5, 6),
    );
    (layout, volume)
}

#[test]
fn backup_boot_region_matches() {
    use std::io::Cursor;

    let (layout, volume) = test_volume();
    let mut f = Cursor::new(vec![0u8; layout.image_size_bytes() as usize]);
    volume.write(&mut f).unwrap();
    let bytes = f.into_inner();

    let esp = layout.esp_lba() as usize * 512;
    let main = &bytes[esp..esp + 2 * 512];
    let backup = &bytes[esp + 6 * 512..esp + 8 * 512];
    assert_eq!(main, backup);
    assert_eq!(&main[510..512], &[0x55, 0xAA]);
    assert_eq!(&main[512..516], &0x41615252u32.to_le_bytes());

    // sectors 2..6 and 8..32 stay empty
    assert!(bytes[esp + 2 * 512..esp + 6 * 512].iter().all(|b| *b == 0));
    assert!(bytes[esp + 8 * 512..esp + 32 * 512].iter().all(|b| *b == 0));
}

#[test]
fn clears_stale_metadata() {
    use std::io::Cursor;

    let (layout, volume) = test_volume();
    let mut f = Cursor::new(vec![0xEEu8; layout.image_size_bytes() as usize]);
    volume.write(&mut f).unwrap();
    let bytes = f.into_inner();

    let geometry = volume.geometry();
    let fat = geometry.fat_lba(0) as usize * 512;
    assert!(bytes[fat + 20..geometry.fat_lba(1) as usize * 512].iter().all(|b| *b == 0));

    let boot = geometry.cluster_lba(4) as usize * 512;
    assert!(bytes[boot + 64..boot + 512].iter().all(|b| *b == 0));
    // first cluster past the directories is not ours to clear
    assert_eq!(bytes[boot + 512], 0xEE);
    // neither is the disk in front of the partition
    assert_eq!(bytes[layout.esp_lba() as usize * 512 - 1], 0xEE);
}
