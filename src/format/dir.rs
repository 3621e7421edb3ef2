use std::io::{self, Seek, Write};

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable, cast_slice};

use crate::{clock::FatTimestamp, disk};

use super::{
    VolumeLabel,
    boot_sector::{Fat32Geometry, ROOT_CLUSTER},
    fat::DIRECTORY_CLUSTERS,
};

/// Length of a space padded 8.3 short name.
pub const SHORT_NAME_LEN: usize = 11;

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct DirAttributes: u8 {
        const READ_ONLY = 1;
        const HIDDEN = 1 << 1;
        const SYSTEM = 1 << 2;
        /// The entry carries the volume label. Only valid in the root directory.
        const VOLUME_ID = 1 << 3;
        const DIRECTORY = 1 << 4;
        const ARCHIVE = 1 << 5;
        // remaining bits are reserved
    }
}

/// A FAT short (8.3) directory entry.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct DirEntry {
    /// Base name and extension, each space padded.
    name: [u8; SHORT_NAME_LEN],
    attributes: u8,
    /// Reserved for Windows NT. Must be zero.
    _nt_reserved: u8,
    /// Tenths of a second of the creation time. Always `0`.
    creation_time_tenth: u8,
    creation_time: u16,
    creation_date: u16,
    last_access_date: u16,
    /// High word of the first cluster.
    first_cluster_high: u16,
    write_time: u16,
    write_date: u16,
    /// Low word of the first cluster.
    first_cluster_low: u16,
    /// Always `0` for directories.
    file_size: u32,
}

impl DirEntry {
    /// Creates a subdirectory entry (including `.` and `..`) pointing at `cluster`.
    pub fn directory(name: &[u8], cluster: u32, timestamp: FatTimestamp) -> DirEntry {
        Self {
            name: short_name(name),
            attributes: DirAttributes::DIRECTORY.bits(),
            _nt_reserved: 0,
            creation_time_tenth: 0,
            creation_time: timestamp.time.to_le(),
            creation_date: timestamp.date.to_le(),
            last_access_date: 0,
            first_cluster_high: ((cluster >> 16) as u16).to_le(),
            write_time: timestamp.time.to_le(),
            write_date: timestamp.date.to_le(),
            first_cluster_low: (cluster as u16).to_le(),
            file_size: 0,
        }
    }

    /// Creates the volume label entry of the root directory.
    pub fn volume_label(label: &VolumeLabel, timestamp: FatTimestamp) -> DirEntry {
        Self {
            name: *label.as_bytes(),
            attributes: DirAttributes::VOLUME_ID.bits(),
            write_time: timestamp.time.to_le(),
            write_date: timestamp.date.to_le(),
            ..Self::zeroed()
        }
    }

    pub fn name(&self) -> &[u8; SHORT_NAME_LEN] {
        &self.name
    }

    pub fn attributes(&self) -> DirAttributes {
        DirAttributes::from_bits_retain(self.attributes)
    }

    pub fn first_cluster(&self) -> u32 {
        (u16::from_le(self.first_cluster_high) as u32) << 16
            | u16::from_le(self.first_cluster_low) as u32
    }
}

/// Space pads `name` to the 11 byte short name form. Longer names are truncated.
pub fn short_name(name: &[u8]) -> [u8; SHORT_NAME_LEN] {
    let mut padded = [b' '; SHORT_NAME_LEN];
    let len = name.len().min(SHORT_NAME_LEN);
    padded[..len].copy_from_slice(&name[..len]);
    padded
}

/// `..` of a directory whose parent is the root encodes cluster 0, not the root cluster.
fn parent_cluster(parent: u32) -> u32 {
    if parent == ROOT_CLUSTER { 0 } else { parent }
}

/// A single-cluster directory.
#[derive(Clone, Debug)]
pub struct Directory {
    pub cluster: u32,
    pub entries: Vec<DirEntry>,
}

impl Directory {
    /// A subdirectory at `cluster` holding only its `.` and `..` entries.
    fn new(cluster: u32, parent: u32, timestamp: FatTimestamp) -> Directory {
        Self {
            cluster,
            entries: vec![
                DirEntry::directory(b".", cluster, timestamp),
                DirEntry::directory(b"..", parent_cluster(parent), timestamp),
            ],
        }
    }
}

/// The root, `/EFI` and `/EFI/BOOT` directories.
pub fn skeleton(label: &VolumeLabel, timestamp: FatTimestamp) -> [Directory; 3] {
    let [root_cluster, efi_cluster, boot_cluster] = DIRECTORY_CLUSTERS;

    let mut root = Directory {
        cluster: root_cluster,
        entries: Vec::new(),
    };
    if !label.is_default() {
        root.entries.push(DirEntry::volume_label(label, timestamp));
    }
    root.entries.push(DirEntry::directory(b"EFI", efi_cluster, timestamp));

    let mut efi = Directory::new(efi_cluster, root_cluster, timestamp);
    efi.entries.push(DirEntry::directory(b"BOOT", boot_cluster, timestamp));

    let boot = Directory::new(boot_cluster, efi_cluster, timestamp);

    [root, efi, boot]
}

/// Writes every directory into its cluster, zero-padding the unused tail.
pub(super) fn write_directories<T: Write + Seek>(
    f: &mut T,
    geometry: &Fat32Geometry,
    directories: &[Directory],
) -> io::Result<()> {
    for directory in directories {
        disk::write_lba(
            f,
            geometry.bytes_per_sector() as u64,
            geometry.cluster_lba(directory.cluster),
            cast_slice(&directory.entries),
        )?;
    }
    Ok(())
}

#[cfg(test)]
fn test_timestamp() -> FatTimestamp {
    FatTimestamp::new(2024, 6, 1, 12, 30, 10)
}

#[test]
fn entry_layout() {
    use super::util::{get_u16, get_u32};

    assert_eq!(size_of::<DirEntry>(), 32);

    let ts = test_timestamp();
    let entry = DirEntry::directory(b"BOOT", 0x0012_0004, ts);
    let bytes: &[u8] = bytemuck::bytes_of(&entry);

    assert_eq!(&bytes[0..11], b"BOOT       ");
    assert_eq!(bytes[11], 0x10);
    assert_eq!(bytes[12], 0);
    assert_eq!(bytes[13], 0);
    assert_eq!(get_u16(bytes, 14), ts.time);
    assert_eq!(get_u16(bytes, 16), ts.date);
    assert_eq!(get_u16(bytes, 18), 0);
    assert_eq!(get_u16(bytes, 20), 0x0012);
    assert_eq!(get_u16(bytes, 22), ts.time);
    assert_eq!(get_u16(bytes, 24), ts.date);
    assert_eq!(get_u16(bytes, 26), 0x0004);
    assert_eq!(get_u32(bytes, 28), 0);
    assert_eq!(entry.first_cluster(), 0x0012_0004);
}

#[test]
fn skeleton_links() {
    let [root, efi, boot] = skeleton(&VolumeLabel::default(), test_timestamp());

    assert_eq!(root.cluster, 2);
    assert_eq!(root.entries.len(), 1);
    assert_eq!(root.entries[0].name(), b"EFI        ");
    assert_eq!(root.entries[0].first_cluster(), 3);
    assert_eq!(root.entries[0].attributes(), DirAttributes::DIRECTORY);

    assert_eq!(efi.cluster, 3);
    let names: Vec<_> = efi.entries.iter().map(|e| *e.name()).collect();
    assert_eq!(names, [*b".          ", *b"..         ", *b"BOOT       "]);
    assert_eq!(efi.entries[0].first_cluster(), 3);
    // parent is the root
    assert_eq!(efi.entries[1].first_cluster(), 0);
    assert_eq!(efi.entries[2].first_cluster(), 4);

    assert_eq!(boot.cluster, 4);
    assert_eq!(boot.entries.len(), 2);
    assert_eq!(boot.entries[0].first_cluster(), 4);
    assert_eq!(boot.entries[1].first_cluster(), 3);
}

#[test]
fn custom_label_entry() {
    let label = VolumeLabel::new("boot disk").unwrap();
    let [root, ..] = skeleton(&label, test_timestamp());

    assert_eq!(root.entries.len(), 2);
    assert_eq!(root.entries[0].name(), b"BOOT DISK  ");
    assert_eq!(root.entries[0].attributes(), DirAttributes::VOLUME_ID);
    assert_eq!(root.entries[0].first_cluster(), 0);
    assert_eq!(root.entries[1].name(), b"EFI        ");
}
