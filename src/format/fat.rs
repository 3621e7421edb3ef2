use std::io::{self, Seek, Write};

use bytemuck::{Pod, Zeroable, cast_slice};

use crate::disk;

use super::boot_sector::{Fat32Geometry, MEDIA_TYPE, NUMBER_OF_FATS, ROOT_CLUSTER};

/// Clusters of the root, `/EFI` and `/EFI/BOOT` directories, in that order.
pub const DIRECTORY_CLUSTERS: [u32; 3] = [ROOT_CLUSTER, ROOT_CLUSTER + 1, ROOT_CLUSTER + 2];
/// Entries written at the start of each FAT: two reserved ones plus one per directory.
const LEADING_ENTRIES: usize = 2 + DIRECTORY_CLUSTERS.len();

#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct FatEntry(u32);

impl FatEntry {
    /// The media type FAT entry. The media byte in the low byte, all remaining bits set.
    pub fn media_type(media: u8) -> FatEntry {
        Self((0xFFFFFF00 | media as u32).to_le())
    }

    /// Marks the end of a cluster chain.
    pub fn eoc() -> FatEntry {
        Self(0xFFFFFFFFu32.to_le())
    }

    pub fn value(&self) -> u32 {
        u32::from_le(self.0)
    }
}

/// The leading FAT entries: the two reserved ones and one single-cluster chain per directory.
/// Every other entry is free (zero).
pub fn fat_entries() -> [FatEntry; LEADING_ENTRIES] {
    let mut entries = [FatEntry::eoc(); LEADING_ENTRIES];
    // entry 1 is reserved and carries the EOC marker as well
    entries[0] = FatEntry::media_type(MEDIA_TYPE);
    entries
}

/// Writes the first sector of every FAT copy. The remainder of each FAT must already be zero.
pub(super) fn write_fats<T: Write + Seek>(f: &mut T, geometry: &Fat32Geometry) -> io::Result<()> {
    let entries = fat_entries();

    for index in 0..NUMBER_OF_FATS {
        disk::write_lba(
            f,
            geometry.bytes_per_sector() as u64,
            geometry.fat_lba(index),
            cast_slice(&entries),
        )?;
    }
    Ok(())
}

#[test]
fn reserved_and_directory_entries() {
    let entries = fat_entries();

    assert_eq!(entries[0].value(), 0xFFFFFFF8);
    assert_eq!(entries[0].value() & 0xFF, MEDIA_TYPE as u32);
    assert_eq!(entries[1].value(), 0xFFFFFFFF);
    for cluster in DIRECTORY_CLUSTERS {
        assert_eq!(entries[cluster as usize], FatEntry::eoc());
    }
}

#[test]
fn both_copies_written() {
    use crate::layout::{ImageOptionsBuilder, Layout};
    use std::io::Cursor;

    let options = ImageOptionsBuilder::default().build().unwrap();
    let layout = Layout::try_from(&options).unwrap();
    let geometry = Fat32Geometry::try_new(&layout).unwrap();

    let mut f = Cursor::new(vec![0u8; layout.image_size_bytes() as usize]);
    write_fats(&mut f, &geometry).unwrap();
    let bytes = f.into_inner();

    let entries = fat_entries();
    let expected: &[u8] = cast_slice(&entries);
    for index in 0..NUMBER_OF_FATS {
        let offset = geometry.fat_lba(index) as usize * 512;
        assert_eq!(&bytes[offset..offset + 20], expected);
        assert!(bytes[offset + 20..offset + 512].iter().all(|b| *b == 0));
    }
    assert_eq!(
        geometry.fat_lba(1) - geometry.fat_lba(0),
        geometry.fat_size() as u64
    );
}
