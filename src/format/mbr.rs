use std::io::{self, Seek, Write};

use tracing::debug;

use crate::{disk, layout::Layout};

use super::util::{BOOT_RECORD_SIZE, BOOT_SIGNATURE, put_u16, put_u32};

/// Legacy partition type claiming the whole disk for GPT.
pub const PROTECTIVE_GPT_TYPE: u8 = 0xEE;

/// Offset of the partition table within the MBR.
const PARTITION_TABLE_OFFSET: usize = 446;
/// Size of one legacy partition record.
const PARTITION_RECORD_SIZE: usize = 16;

/// One legacy partition record.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MbrPartitionRecord {
    /// `0x80` marks a bootable partition. Must be `0` for the protective record.
    pub boot_indicator: u8,
    /// Cylinder/head/sector address of the first sector.
    pub starting_chs: [u8; 3],
    pub os_type: u8,
    /// Cylinder/head/sector address of the last sector.
    pub ending_chs: [u8; 3],
    pub starting_lba: u32,
    pub size_in_lba: u32,
}

impl MbrPartitionRecord {
    /// The single record of a protective MBR: LBA 1 up to the end of the disk, or as much of it
    /// as 32 bits can describe. CHS addresses carry the "use LBA" sentinels.
    pub fn protective(layout: &Layout) -> MbrPartitionRecord {
        Self {
            boot_indicator: 0,
            starting_chs: [0x00, 0x02, 0x00],
            os_type: PROTECTIVE_GPT_TYPE,
            ending_chs: [0xFF, 0xFF, 0xFF],
            starting_lba: 1,
            // `mbr_size_lbas` is at most 2^32, so this always fits
            size_in_lba: (layout.mbr_size_lbas() - 1) as u32,
        }
    }

    fn to_bytes(self) -> [u8; PARTITION_RECORD_SIZE] {
        let mut bytes = [0u8; PARTITION_RECORD_SIZE];
        bytes[0] = self.boot_indicator;
        bytes[1..4].copy_from_slice(&self.starting_chs);
        bytes[4] = self.os_type;
        bytes[5..8].copy_from_slice(&self.ending_chs);
        put_u32(&mut bytes, 8, self.starting_lba);
        put_u32(&mut bytes, 12, self.size_in_lba);
        bytes
    }
}

/// Protective master boot record.
#[derive(Copy, Clone, Debug)]
pub struct ProtectiveMbr {
    /// Unused by UEFI. Left zeroed.
    pub boot_code: [u8; 440],
    pub unique_mbr_disk_signature: u32,
    pub unknown: u16,
    pub partition_records: [MbrPartitionRecord; 4],
    pub signature: u16,
}

impl ProtectiveMbr {
    pub fn new(layout: &Layout) -> ProtectiveMbr {
        let mut partition_records = [MbrPartitionRecord::default(); 4];
        partition_records[0] = MbrPartitionRecord::protective(layout);

        Self {
            boot_code: [0; 440],
            unique_mbr_disk_signature: 0,
            unknown: 0,
            partition_records,
            signature: BOOT_SIGNATURE,
        }
    }

    pub fn to_bytes(&self) -> [u8; BOOT_RECORD_SIZE] {
        let mut bytes = [0u8; BOOT_RECORD_SIZE];
        bytes[..440].copy_from_slice(&self.boot_code);
        put_u32(&mut bytes, 440, self.unique_mbr_disk_signature);
        put_u16(&mut bytes, 444, self.unknown);
        for (i, record) in self.partition_records.iter().enumerate() {
            let offset = PARTITION_TABLE_OFFSET + i * PARTITION_RECORD_SIZE;
            bytes[offset..offset + PARTITION_RECORD_SIZE].copy_from_slice(&record.to_bytes());
        }
        put_u16(&mut bytes, 510, self.signature);
        bytes
    }
}

/// Writes the protective MBR into LBA 0, zero-padding the rest of the block.
pub fn write_mbr<T: Write + Seek>(f: &mut T, layout: &Layout) -> io::Result<()> {
    let mbr = ProtectiveMbr::new(layout);
    debug!(
        size_in_lba = mbr.partition_records[0].size_in_lba,
        "protective MBR"
    );
    disk::write_lba(f, layout.lba_size(), 0, &mbr.to_bytes())
}

#[test]
fn protective_record() {
    use super::util::get_u32;
    use crate::layout::ImageOptionsBuilder;

    let options = ImageOptionsBuilder::default().build().unwrap();
    let layout = Layout::try_from(&options).unwrap();

    let bytes = ProtectiveMbr::new(&layout).to_bytes();

    assert!(bytes[..446].iter().all(|b| *b == 0));
    assert_eq!(&bytes[446..454], &[0x00, 0x00, 0x02, 0x00, 0xEE, 0xFF, 0xFF, 0xFF]);
    assert_eq!(get_u32(&bytes, 454), 1);
    assert_eq!(get_u32(&bytes, 458), layout.image_size_lbas() as u32 - 1);
    assert!(bytes[462..510].iter().all(|b| *b == 0));
    assert_eq!(&bytes[510..], &[0x55, 0xAA]);
}

#[test]
fn size_saturates() {
    use super::util::get_u32;

    let layout = Layout::try_new(
        512,
        33 * crate::MB as u64,
        3 * 1024 * crate::GB as u64,
        crate::MB as u64,
    )
    .unwrap();

    let bytes = ProtectiveMbr::new(&layout).to_bytes();
    assert_eq!(get_u32(&bytes, 458), 0xFFFFFFFF);
}

#[test]
fn pads_large_blocks() {
    use std::io::Cursor;

    let layout = Layout::try_new(4096, crate::MB as u64, crate::MB as u64, crate::MB as u64).unwrap();
    let mut f = Cursor::new(vec![0xCCu8; 8192]);

    write_mbr(&mut f, &layout).unwrap();

    let bytes = f.into_inner();
    assert_eq!(&bytes[510..512], &[0x55, 0xAA]);
    assert!(bytes[512..4096].iter().all(|b| *b == 0));
    assert_eq!(bytes[4096], 0xCC);
}
