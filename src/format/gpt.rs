use std::io::{self, Seek, Write};

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable, cast_slice};
use tracing::debug;

use crate::{
    crc32, disk,
    guid::{BASIC_DATA_PARTITION, EFI_SYSTEM_PARTITION, Guid, RandomSource},
    layout::{GPT_ENTRY_COUNT, GPT_ENTRY_SIZE, Layout},
};

use super::util::{put_u32, put_u64};

/// Signature of a GPT header.
pub const GPT_SIGNATURE: [u8; 8] = *b"EFI PART";
/// GPT revision 1.0.
pub const GPT_REVISION: u32 = 0x0001_0000;
/// Number of header bytes covered by the header CRC.
pub const GPT_HEADER_SIZE: u32 = 92;
/// Partition names are UTF-16 and hold at most 36 code units.
const PARTITION_NAME_LEN: usize = 36;

bitflags! {
    /// GPT partition attribute bits.
    #[repr(transparent)]
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
    pub struct GptAttributes: u64 {
        /// Required for the platform to function.
        const REQUIRED_PARTITION = 1 << 0;
        /// Firmware must not produce a block I/O protocol for this partition.
        const NO_BLOCK_IO_PROTOCOL = 1 << 1;
        /// Legacy BIOS bootable.
        const LEGACY_BIOS_BOOTABLE = 1 << 2;
    }
}

/// GPT header. The primary copy lives at LBA 1, the secondary one in the last LBA of the disk.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GptHeader {
    /// - Must be `"EFI PART"`.
    pub signature: [u8; 8],
    /// - `0x00010000` for revision 1.0.
    pub revision: u32,
    /// Number of bytes covered by `header_crc32`. Always `92` here.
    pub header_size: u32,
    /// CRC32 over `header_size` bytes of the header, computed with this field set to zero.
    pub header_crc32: u32,
    /// Must be zero.
    pub reserved: u32,
    /// LBA holding this copy of the header.
    pub my_lba: u64,
    /// LBA holding the other copy of the header.
    pub alternate_lba: u64,
    /// First LBA a partition may use.
    pub first_usable_lba: u64,
    /// Last LBA a partition may use.
    pub last_usable_lba: u64,
    pub disk_guid: Guid,
    /// First LBA of the partition entry array belonging to this copy.
    pub partition_entry_lba: u64,
    pub number_of_partition_entries: u32,
    pub size_of_partition_entry: u32,
    /// CRC32 over the whole partition entry array.
    pub partition_entry_array_crc32: u32,
}

impl GptHeader {
    /// Creates the primary header for `layout`, both CRC fields filled in.
    pub fn primary(layout: &Layout, disk_guid: Guid, array: &PartitionArray) -> GptHeader {
        Self {
            signature: GPT_SIGNATURE,
            revision: GPT_REVISION,
            header_size: GPT_HEADER_SIZE,
            header_crc32: 0,
            reserved: 0,
            my_lba: layout.primary_header_lba(),
            alternate_lba: layout.secondary_header_lba(),
            first_usable_lba: layout.first_usable_lba(),
            last_usable_lba: layout.last_usable_lba(),
            disk_guid,
            partition_entry_lba: layout.primary_table_lba(),
            number_of_partition_entries: GPT_ENTRY_COUNT as u32,
            size_of_partition_entry: GPT_ENTRY_SIZE as u32,
            partition_entry_array_crc32: array.checksum(),
        }
        .with_checksum()
    }

    /// Mirrors this header for the other end of the disk. Both CRC fields are recomputed.
    pub fn secondary(&self, layout: &Layout, array: &PartitionArray) -> GptHeader {
        Self {
            my_lba: self.alternate_lba,
            alternate_lba: self.my_lba,
            partition_entry_lba: layout.secondary_table_lba(),
            partition_entry_array_crc32: array.checksum(),
            ..*self
        }
        .with_checksum()
    }

    /// Computes `header_crc32` over the first `header_size` bytes with the field itself zeroed.
    fn with_checksum(mut self) -> GptHeader {
        self.header_crc32 = 0;
        let bytes = self.to_bytes();
        self.header_crc32 = crc32::checksum(&bytes[..self.header_size as usize]);
        self
    }

    pub fn to_bytes(&self) -> [u8; GPT_HEADER_SIZE as usize] {
        let mut bytes = [0u8; GPT_HEADER_SIZE as usize];
        bytes[0..8].copy_from_slice(&self.signature);
        put_u32(&mut bytes, 8, self.revision);
        put_u32(&mut bytes, 12, self.header_size);
        put_u32(&mut bytes, 16, self.header_crc32);
        put_u32(&mut bytes, 20, self.reserved);
        put_u64(&mut bytes, 24, self.my_lba);
        put_u64(&mut bytes, 32, self.alternate_lba);
        put_u64(&mut bytes, 40, self.first_usable_lba);
        put_u64(&mut bytes, 48, self.last_usable_lba);
        bytes[56..72].copy_from_slice(&self.disk_guid.to_bytes());
        put_u64(&mut bytes, 72, self.partition_entry_lba);
        put_u32(&mut bytes, 80, self.number_of_partition_entries);
        put_u32(&mut bytes, 84, self.size_of_partition_entry);
        put_u32(&mut bytes, 88, self.partition_entry_array_crc32);
        bytes
    }
}

/// One 128-byte entry of the partition entry array.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct GptPartitionEntry {
    pub partition_type_guid: Guid,
    pub unique_partition_guid: Guid,
    pub starting_lba: u64,
    /// Inclusive.
    pub ending_lba: u64,
    pub attributes: GptAttributes,
    /// UTF-16LE, null-padded.
    pub partition_name: [u16; PARTITION_NAME_LEN],
}

impl GptPartitionEntry {
    pub fn new(
        partition_type_guid: Guid,
        unique_partition_guid: Guid,
        starting_lba: u64,
        ending_lba: u64,
        name: &str,
    ) -> GptPartitionEntry {
        let mut partition_name = [0u16; PARTITION_NAME_LEN];
        for (slot, unit) in partition_name.iter_mut().zip(name.encode_utf16()) {
            *slot = unit.to_le();
        }

        Self {
            partition_type_guid,
            unique_partition_guid,
            starting_lba: starting_lba.to_le(),
            ending_lba: ending_lba.to_le(),
            attributes: GptAttributes::empty(),
            partition_name,
        }
    }
}

/// The partition entry array: ESP, basic data, and 126 unused entries.
/// Both GPT copies carry it byte for byte.
#[derive(Clone, Debug)]
pub struct PartitionArray {
    entries: Vec<GptPartitionEntry>,
}

impl PartitionArray {
    pub fn new<R: RandomSource + ?Sized>(layout: &Layout, random: &mut R) -> PartitionArray {
        let mut entries = vec![GptPartitionEntry::zeroed(); GPT_ENTRY_COUNT as usize];

        entries[0] = GptPartitionEntry::new(
            EFI_SYSTEM_PARTITION,
            Guid::new_v4(random),
            layout.esp_lba(),
            layout.esp_end_lba(),
            "EFI SYSTEM",
        );
        entries[1] = GptPartitionEntry::new(
            BASIC_DATA_PARTITION,
            Guid::new_v4(random),
            layout.data_lba(),
            layout.data_end_lba(),
            "BASIC DATA",
        );

        Self { entries }
    }

    pub fn entries(&self) -> &[GptPartitionEntry] {
        &self.entries
    }

    /// The serialized array, `GPT_ENTRY_COUNT * GPT_ENTRY_SIZE` bytes.
    pub fn bytes(&self) -> &[u8] {
        cast_slice(&self.entries)
    }

    pub fn checksum(&self) -> u32 {
        crc32::checksum(self.bytes())
    }
}

/// Writes the primary header and array at the front of the disk and their mirrors at the back.
pub fn write_gpt<T, R>(f: &mut T, layout: &Layout, random: &mut R) -> io::Result<()>
where
    T: Write + Seek,
    R: RandomSource + ?Sized,
{
    let disk_guid = Guid::new_v4(random);
    let array = PartitionArray::new(layout, random);

    let primary = GptHeader::primary(layout, disk_guid, &array);
    let secondary = primary.secondary(layout, &array);

    debug!(
        %disk_guid,
        header_crc32 = primary.header_crc32,
        secondary_crc32 = secondary.header_crc32,
        array_crc32 = primary.partition_entry_array_crc32,
        "GPT headers"
    );

    let lba_size = layout.lba_size();
    disk::write_lba(f, lba_size, primary.my_lba, &primary.to_bytes())?;
    disk::write_lba(f, lba_size, primary.partition_entry_lba, array.bytes())?;
    disk::write_lba(f, lba_size, secondary.partition_entry_lba, array.bytes())?;
    disk::write_lba(f, lba_size, secondary.my_lba, &secondary.to_bytes())
}

#[cfg(test)]
fn test_layout() -> Layout {
    use crate::layout::ImageOptionsBuilder;

    let options = ImageOptionsBuilder::default().build().unwrap();
    Layout::try_from(&options).unwrap()
}

#[test]
fn entry_layout() {
    use crate::guid::FixedRandom;

    assert_eq!(size_of::<GptPartitionEntry>(), GPT_ENTRY_SIZE as usize);

    let layout = test_layout();
    let array = PartitionArray::new(&layout, &mut FixedRandom([7; 16]));
    let bytes = array.bytes();

    assert_eq!(bytes.len(), 16384);
    assert_eq!(&bytes[0..16], &EFI_SYSTEM_PARTITION.to_bytes());
    assert_eq!(super::util::get_u64(bytes, 32), 2048);
    assert_eq!(super::util::get_u64(bytes, 40), 2048 + 67584 - 1);
    assert_eq!(super::util::get_u64(bytes, 48), 0);
    // "EFI SYSTEM" in UTF-16LE followed by nulls
    assert_eq!(&bytes[56..60], &[b'E', 0, b'F', 0]);
    assert_eq!(&bytes[74..78], &[b'M', 0, 0, 0]);

    assert_eq!(&bytes[128..144], &BASIC_DATA_PARTITION.to_bytes());
    assert_eq!(super::util::get_u64(bytes, 160), 69632);
    assert_eq!(super::util::get_u64(bytes, 168), 69632 + 2048 - 1);

    assert!(bytes[256..].iter().all(|b| *b == 0));

    let entries = array.entries();
    assert_eq!(entries.len(), 128);
    assert_eq!(u64::from_le(entries[0].starting_lba), layout.esp_lba());
    assert_eq!(u64::from_le(entries[1].ending_lba), layout.data_end_lba());
    assert!(entries[..2].iter().all(|e| e.attributes.is_empty()));
    assert!(entries[2..].iter().all(|e| e.partition_type_guid == Guid::zeroed()));
}

#[test]
fn attribute_bits() {
    use super::util::get_u64;

    let mut entry = GptPartitionEntry::new(
        BASIC_DATA_PARTITION,
        Guid::zeroed(),
        34,
        2047,
        "BASIC DATA",
    );
    entry.attributes = GptAttributes::REQUIRED_PARTITION | GptAttributes::LEGACY_BIOS_BOOTABLE;
    assert_eq!(get_u64(bytemuck::bytes_of(&entry), 48), 0b101);

    entry.attributes |= GptAttributes::NO_BLOCK_IO_PROTOCOL;
    assert_eq!(get_u64(bytemuck::bytes_of(&entry), 48), 0b111);
}

#[test]
fn header_checksums() {
    use super::util::get_u32;
    use crate::guid::FixedRandom;

    let layout = test_layout();
    let mut random = FixedRandom([0x5A; 16]);
    let array = PartitionArray::new(&layout, &mut random);
    let primary = GptHeader::primary(&layout, Guid::new_v4(&mut random), &array);

    let mut bytes = primary.to_bytes();
    assert_eq!(&bytes[0..8], b"EFI PART");
    assert_eq!(get_u32(&bytes, 8), 0x00010000);
    assert_eq!(get_u32(&bytes, 12), 92);
    assert_eq!(get_u32(&bytes, 88), crc32fast::hash(array.bytes()));

    let stored = get_u32(&bytes, 16);
    bytes[16..20].fill(0);
    assert_eq!(stored, crc32fast::hash(&bytes));
}

#[test]
fn secondary_mirrors_primary() {
    use crate::guid::FixedRandom;

    let layout = test_layout();
    let mut random = FixedRandom([0x11; 16]);
    let array = PartitionArray::new(&layout, &mut random);
    let primary = GptHeader::primary(&layout, Guid::new_v4(&mut random), &array);
    let secondary = primary.secondary(&layout, &array);

    assert_eq!(primary.my_lba, 1);
    assert_eq!(primary.alternate_lba, layout.image_size_lbas() - 1);
    assert_eq!(secondary.my_lba, primary.alternate_lba);
    assert_eq!(secondary.alternate_lba, primary.my_lba);
    assert_eq!(primary.partition_entry_lba, 2);
    assert_eq!(
        secondary.partition_entry_lba,
        layout.image_size_lbas() - 1 - layout.gpt_table_lbas()
    );
    assert_eq!(
        secondary.partition_entry_array_crc32,
        primary.partition_entry_array_crc32
    );
    assert_ne!(secondary.header_crc32, primary.header_crc32);
    assert_eq!(secondary.first_usable_lba, primary.first_usable_lba);
    assert_eq!(secondary.last_usable_lba, primary.last_usable_lba);
    assert_eq!(secondary.disk_guid, primary.disk_guid);

    // recomputing must reproduce the stored value
    assert_eq!(secondary.with_checksum(), secondary);
}
