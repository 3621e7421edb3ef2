use std::io::{self, Seek, Write};

use bytemuck::{Pod, Zeroable, bytes_of};
use tracing::{debug, warn};

use crate::{disk, error::ConfigError, layout::Layout};

use super::{
    VolumeLabel,
    util::{BOOT_RECORD_SIZE, BOOT_SIGNATURE, DRIVE_SELECT, put_u16, put_u32},
};

/// Sectors in front of the first FAT. Holds the main and the backup boot region.
pub const RESERVED_SECTORS: u16 = 32;
/// Number of mirrored FATs.
pub const NUMBER_OF_FATS: u8 = 2;
/// One sector per cluster.
pub const SECTORS_PER_CLUSTER: u8 = 1;
/// Fixed (non-removable) media.
pub const MEDIA_TYPE: u8 = 0xF8;
/// First cluster of the data region, holding the root directory.
pub const ROOT_CLUSTER: u32 = 2;
/// Sector of the FSInfo structure within the reserved region.
pub const FS_INFO_SECTOR: u16 = 1;
/// Sector of the backup boot region within the reserved region.
pub const BACKUP_BOOT_SECTOR: u16 = 6;
/// Strict drivers treat anything below this many clusters as FAT16.
pub const MIN_FAT32_CLUSTERS: u32 = 65525;
/// Largest cluster count a 28-bit FAT entry can address.
pub const MAX_FAT32_CLUSTERS: u32 = 0x0FFF_FFF5;
/// Clusters used by the root, `/EFI` and `/EFI/BOOT` directories.
const DIRECTORY_CLUSTERS: u32 = 3;

/// Sector geometry of the FAT32 volume inside the EFI System Partition. All sector numbers are
/// relative to the start of the partition.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Fat32Geometry {
    /// Bytes per sector. Equal to the logical block size and to the cluster size.
    bytes_per_sector: u16,
    /// First LBA of the partition.
    esp_lba: u64,
    /// Sectors preceding the volume on disk.
    hidden_sectors: u32,
    /// Sectors of the whole volume.
    total_sectors: u32,
    /// Sectors of one FAT.
    fat_size: u32,
    /// Sector offset of the data region.
    data_offset: u32,
    /// Number of clusters in the data region.
    cluster_count: u32,
}

impl Fat32Geometry {
    /// Sizes both FATs so that the data region starts on the partition alignment boundary.
    pub fn try_new(layout: &Layout) -> Result<Fat32Geometry, ConfigError> {
        let align_lbas = layout.align_lbas();
        let overhead = RESERVED_SECTORS as u64 + NUMBER_OF_FATS as u64;
        if align_lbas < overhead {
            return Err(ConfigError::FatRegionTooSmall(align_lbas));
        }

        let total_sectors: u32 = layout
            .esp_size_lbas()
            .try_into()
            .map_err(|_| ConfigError::EspTooLarge(layout.esp_size_lbas()))?;

        let hidden_sectors: u32 = layout
            .esp_lba()
            .try_into()
            .map_err(|_| ConfigError::HiddenSectorsOverflow(layout.esp_lba()))?;

        let fat_size = (align_lbas - RESERVED_SECTORS as u64) / NUMBER_OF_FATS as u64;
        let data_offset = RESERVED_SECTORS as u64 + fat_size * NUMBER_OF_FATS as u64;

        if data_offset + DIRECTORY_CLUSTERS as u64 > total_sectors as u64 {
            return Err(ConfigError::EspTooSmall(total_sectors as u64));
        }
        // both fit, they are below `total_sectors`
        let fat_size = fat_size as u32;
        let data_offset = data_offset as u32;
        let cluster_count = (total_sectors - data_offset) / SECTORS_PER_CLUSTER as u32;

        if cluster_count > MAX_FAT32_CLUSTERS {
            return Err(ConfigError::EspTooLarge(total_sectors as u64));
        }

        // entries 0 and 1 are reserved
        let fat_entries = fat_size as u64 * layout.lba_size() / 4;
        if fat_entries < cluster_count as u64 + 2 {
            return Err(ConfigError::FatTooSmall {
                fat_sectors: fat_size,
                cluster_count,
            });
        }

        if cluster_count < MIN_FAT32_CLUSTERS {
            warn!(
                cluster_count,
                "ESP has fewer clusters than FAT32 requires; strict drivers may detect it as FAT16"
            );
        }

        debug!(
            fat_size,
            data_offset, cluster_count, hidden_sectors, "FAT32 geometry"
        );

        Ok(Self {
            // block sizes are at most 4096
            bytes_per_sector: layout.lba_size() as u16,
            esp_lba: layout.esp_lba(),
            hidden_sectors,
            total_sectors,
            fat_size,
            data_offset,
            cluster_count,
        })
    }

    pub fn bytes_per_sector(&self) -> u16 {
        self.bytes_per_sector
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        self.bytes_per_sector as u32 * SECTORS_PER_CLUSTER as u32
    }

    pub fn total_sectors(&self) -> u32 {
        self.total_sectors
    }

    pub fn fat_size(&self) -> u32 {
        self.fat_size
    }

    pub fn data_offset(&self) -> u32 {
        self.data_offset
    }

    pub fn cluster_count(&self) -> u32 {
        self.cluster_count
    }

    /// Disk LBA of a sector of the volume.
    pub fn sector_lba(&self, sector: u64) -> u64 {
        self.esp_lba + sector
    }

    /// Disk LBA of the first sector of FAT number `index`.
    pub fn fat_lba(&self, index: u8) -> u64 {
        self.sector_lba(RESERVED_SECTORS as u64 + index as u64 * self.fat_size as u64)
    }

    /// Disk LBA of the first sector of `cluster`. Cluster numbering starts at 2.
    pub fn cluster_lba(&self, cluster: u32) -> u64 {
        self.sector_lba(
            self.data_offset as u64
                + (cluster - ROOT_CLUSTER) as u64 * SECTORS_PER_CLUSTER as u64,
        )
    }
}

/// The FAT32 volume boot record: boot sector plus BIOS parameter block.
#[derive(Copy, Clone, Debug)]
pub struct Vbr {
    /// Jump over the parameter block into `boot_code`.
    /// - `0xEB 0x58 0x90`.
    pub jump_boot: [u8; 3],
    /// - `"MSWIN4.1"` for the widest driver compatibility.
    pub oem_name: [u8; 8],
    /// - Equal to the logical block size: `512`, `1024`, `2048` or `4096`.
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    /// Sectors in front of the first FAT.
    /// - `32` for FAT32.
    pub reserved_sector_count: u16,
    pub number_of_fats: u8,
    /// - Must be `0` for FAT32.
    pub root_entry_count: u16,
    /// - Must be `0` for FAT32. `total_sectors_32` holds the count.
    pub total_sectors_16: u16,
    /// - `0xF8`, repeated in the low byte of FAT entry 0.
    pub media: u8,
    /// - Must be `0` for FAT32. `fat_size_32` holds the size.
    pub fat_size_16: u16,
    pub sectors_per_track: u16,
    pub number_of_heads: u16,
    /// Sectors preceding the partition on disk.
    pub hidden_sectors: u32,
    pub total_sectors_32: u32,
    /// Sectors occupied by one FAT.
    pub fat_size_32: u32,
    /// - Bit 7 clear: the FATs are mirrored at runtime.
    pub ext_flags: u16,
    /// - Version 0.0.
    pub fs_version: u16,
    /// - Cluster `2`.
    pub root_cluster: u32,
    /// Sector of the FSInfo structure within the reserved region.
    pub fs_info: u16,
    /// Sector of the backup boot region within the reserved region.
    pub backup_boot_sector: u16,
    /// Extended INT 13h drive number.
    /// - `0x80`.
    pub drive_number: u8,
    /// - `0x29` to mark the next three fields as present.
    pub boot_signature: u8,
    /// Derived from the date and time of formatting.
    pub volume_id: u32,
    pub volume_label: [u8; 11],
    /// Informational only. Drivers never look at it.
    /// - `"FAT32   "`.
    pub file_system_type: [u8; 8],
    /// Not bootable through BIOS. Filled with `0xF4` (halt).
    pub boot_code: [u8; 420],
    pub signature: u16,
}

impl Vbr {
    pub fn new(geometry: &Fat32Geometry, label: &VolumeLabel, volume_id: u32) -> Vbr {
        Self {
            jump_boot: [0xEB, 0x58, 0x90],
            oem_name: *b"MSWIN4.1",
            bytes_per_sector: geometry.bytes_per_sector,
            sectors_per_cluster: SECTORS_PER_CLUSTER,
            reserved_sector_count: RESERVED_SECTORS,
            number_of_fats: NUMBER_OF_FATS,
            root_entry_count: 0,
            total_sectors_16: 0,
            media: MEDIA_TYPE,
            fat_size_16: 0,
            sectors_per_track: 0,
            number_of_heads: 0,
            hidden_sectors: geometry.hidden_sectors,
            total_sectors_32: geometry.total_sectors,
            fat_size_32: geometry.fat_size,
            ext_flags: 0,
            fs_version: 0,
            root_cluster: ROOT_CLUSTER,
            fs_info: FS_INFO_SECTOR,
            backup_boot_sector: BACKUP_BOOT_SECTOR,
            drive_number: DRIVE_SELECT,
            boot_signature: 0x29,
            volume_id,
            volume_label: *label.as_bytes(),
            file_system_type: *b"FAT32   ",
            boot_code: [0xF4; 420],
            signature: BOOT_SIGNATURE,
        }
    }

    pub fn to_bytes(&self) -> [u8; BOOT_RECORD_SIZE] {
        let mut bytes = [0u8; BOOT_RECORD_SIZE];
        bytes[0..3].copy_from_slice(&self.jump_boot);
        bytes[3..11].copy_from_slice(&self.oem_name);
        put_u16(&mut bytes, 11, self.bytes_per_sector);
        bytes[13] = self.sectors_per_cluster;
        put_u16(&mut bytes, 14, self.reserved_sector_count);
        bytes[16] = self.number_of_fats;
        put_u16(&mut bytes, 17, self.root_entry_count);
        put_u16(&mut bytes, 19, self.total_sectors_16);
        bytes[21] = self.media;
        put_u16(&mut bytes, 22, self.fat_size_16);
        put_u16(&mut bytes, 24, self.sectors_per_track);
        put_u16(&mut bytes, 26, self.number_of_heads);
        put_u32(&mut bytes, 28, self.hidden_sectors);
        put_u32(&mut bytes, 32, self.total_sectors_32);
        put_u32(&mut bytes, 36, self.fat_size_32);
        put_u16(&mut bytes, 40, self.ext_flags);
        put_u16(&mut bytes, 42, self.fs_version);
        put_u32(&mut bytes, 44, self.root_cluster);
        put_u16(&mut bytes, 48, self.fs_info);
        put_u16(&mut bytes, 50, self.backup_boot_sector);
        // 52..64 reserved
        bytes[64] = self.drive_number;
        // 65 reserved
        bytes[66] = self.boot_signature;
        put_u32(&mut bytes, 67, self.volume_id);
        bytes[71..82].copy_from_slice(&self.volume_label);
        bytes[82..90].copy_from_slice(&self.file_system_type);
        bytes[90..510].copy_from_slice(&self.boot_code);
        put_u16(&mut bytes, 510, self.signature);
        bytes
    }
}

/// FAT32 FSInfo sector. Free cluster hints are left unknown.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct FsInfo {
    /// - `0x41615252` (`"RRaA"`).
    lead_signature: u32,
    _reserved1: [u8; 480],
    /// - `0x61417272` (`"rrAa"`).
    struct_signature: u32,
    /// Last known free cluster count. `0xFFFFFFFF` if unknown.
    free_count: u32,
    /// Hint where to start looking for free clusters. `0xFFFFFFFF` if unknown.
    next_free: u32,
    _reserved2: [u8; 12],
    /// - `0xAA550000`.
    trail_signature: u32,
}

impl FsInfo {
    pub fn new() -> FsInfo {
        Self {
            lead_signature: 0x41615252u32.to_le(),
            _reserved1: [0; 480],
            struct_signature: 0x61417272u32.to_le(),
            free_count: u32::MAX,
            next_free: u32::MAX,
            _reserved2: [0; 12],
            trail_signature: 0xAA550000u32.to_le(),
        }
    }
}

impl Default for FsInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes the VBR and the FSInfo sector of a boot region starting at volume sector `offset`.
pub(super) fn write_boot_region<T: Write + Seek>(
    f: &mut T,
    geometry: &Fat32Geometry,
    vbr: &Vbr,
    fs_info: &FsInfo,
    offset: u16,
) -> io::Result<()> {
    let lba_size = geometry.bytes_per_sector as u64;
    let vbr_lba = geometry.sector_lba(offset as u64);

    disk::write_lba(f, lba_size, vbr_lba, &vbr.to_bytes())?;
    disk::write_lba(
        f,
        lba_size,
        vbr_lba + vbr.fs_info as u64,
        bytes_of(fs_info),
    )
}

#[cfg(test)]
fn default_geometry() -> Fat32Geometry {
    use crate::layout::ImageOptionsBuilder;

    let options = ImageOptionsBuilder::default().build().unwrap();
    Fat32Geometry::try_new(&Layout::try_from(&options).unwrap()).unwrap()
}

#[test]
fn default_fat32_geometry() {
    let geometry = default_geometry();

    assert_eq!(geometry.bytes_per_sector(), 512);
    assert_eq!(geometry.bytes_per_cluster(), 512);
    assert_eq!(geometry.total_sectors(), 67584);
    assert_eq!(geometry.fat_size(), 1008);
    assert_eq!(geometry.data_offset(), 2048);
    assert_eq!(geometry.cluster_count(), 65536);
    assert_eq!(geometry.fat_lba(0), 2048 + 32);
    assert_eq!(geometry.fat_lba(1), 2048 + 32 + 1008);
    assert_eq!(geometry.cluster_lba(2), 4096);
    assert_eq!(geometry.cluster_lba(4), 4098);
}

#[test]
fn vbr_fields() {
    use super::util::{get_u16, get_u32};

    let geometry = default_geometry();
    let bytes = Vbr::new(&geometry, &VolumeLabel::default(), 0xDEADBEEF).to_bytes();

    assert_eq!(&bytes[0..3], &[0xEB, 0x58, 0x90]);
    assert_eq!(&bytes[3..11], b"MSWIN4.1");
    assert_eq!(get_u16(&bytes, 11), 512);
    assert_eq!(bytes[13], 1);
    assert_eq!(get_u16(&bytes, 14), 32);
    assert_eq!(bytes[16], 2);
    assert_eq!(get_u16(&bytes, 17), 0);
    assert_eq!(get_u16(&bytes, 19), 0);
    assert_eq!(bytes[21], 0xF8);
    assert_eq!(get_u16(&bytes, 22), 0);
    assert_eq!(get_u32(&bytes, 28), 2048);
    assert_eq!(get_u32(&bytes, 32), 67584);
    assert_eq!(get_u32(&bytes, 36), 1008);
    assert_eq!(get_u32(&bytes, 44), 2);
    assert_eq!(get_u16(&bytes, 48), 1);
    assert_eq!(get_u16(&bytes, 50), 6);
    assert!(bytes[52..64].iter().all(|b| *b == 0));
    assert_eq!(bytes[64], 0x80);
    assert_eq!(bytes[66], 0x29);
    assert_eq!(get_u32(&bytes, 67), 0xDEADBEEF);
    assert_eq!(&bytes[71..82], b"NO NAME    ");
    assert_eq!(&bytes[82..90], b"FAT32   ");
    assert!(bytes[90..510].iter().all(|b| *b == 0xF4));
    assert_eq!(get_u16(&bytes, 510), 0xAA55);
}

#[test]
fn fs_info_layout() {
    use super::util::get_u32;

    assert_eq!(size_of::<FsInfo>(), 512);

    let fs_info = FsInfo::new();
    let bytes = bytes_of(&fs_info);
    assert_eq!(get_u32(bytes, 0), 0x41615252);
    assert_eq!(get_u32(bytes, 484), 0x61417272);
    assert_eq!(get_u32(bytes, 488), 0xFFFFFFFF);
    assert_eq!(get_u32(bytes, 492), 0xFFFFFFFF);
    assert_eq!(get_u32(bytes, 508), 0xAA550000);
    assert_eq!(&bytes[510..], &[0x55, 0xAA]);
}

#[test]
fn large_blocks_use_fewer_clusters() {
    let layout = Layout::try_new(4096, 33 * crate::MB as u64, crate::MB as u64, crate::MB as u64)
        .unwrap();
    let geometry = Fat32Geometry::try_new(&layout).unwrap();

    assert_eq!(geometry.bytes_per_sector(), 4096);
    assert_eq!(geometry.bytes_per_cluster(), 4096);
    assert_eq!(geometry.fat_size(), 112);
    assert_eq!(geometry.data_offset(), 256);
    assert_eq!(geometry.cluster_count(), 8448 - 256);
}

#[test]
fn rejects_unbuildable_volumes() {
    // 34 * 512 bytes of alignment leaves one sector per FAT
    let layout = Layout::try_new(512, 64 * 512, crate::MB as u64, 33 * 512).unwrap();
    assert!(matches!(
        Fat32Geometry::try_new(&layout),
        Err(ConfigError::FatRegionTooSmall(33))
    ));

    // data region starts at sector 2048, leaving only two clusters
    let layout = Layout::try_new(512, 2050 * 512, crate::MB as u64, crate::MB as u64).unwrap();
    assert!(matches!(
        Fat32Geometry::try_new(&layout),
        Err(ConfigError::EspTooSmall(2050))
    ));

    // one FAT sector maps 126 clusters
    let layout = Layout::try_new(512, 200 * 512, crate::MB as u64, 34 * 512).unwrap();
    assert!(matches!(
        Fat32Geometry::try_new(&layout),
        Err(ConfigError::FatTooSmall {
            fat_sectors: 1,
            cluster_count: 166
        })
    ));
}
