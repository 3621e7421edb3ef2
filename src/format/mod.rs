use std::{
    fmt,
    io::{Seek, Write},
};

use tracing::info;

use crate::{
    clock::{Clock, FatTimestamp, LocalClock},
    disk,
    error::{ConfigError, ImageError, Stage, StageContext},
    guid::{RandomSource, SystemRandom},
    layout::{ImageOptions, Layout},
};

use boot_sector::Fat32Geometry;
use esp::EspVolume;

pub mod boot_sector;
pub mod dir;
pub mod esp;
pub mod fat;
pub mod gpt;
pub mod mbr;
mod util;

/// Characters a FAT volume label must not contain.
const INVALID_LABEL_CHARACTERS: &[u8] = b"\"*+,./:;<=>?[\\]|";

/// A FAT volume label: upper case, space padded to 11 bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct VolumeLabel([u8; 11]);

impl VolumeLabel {
    pub fn new(label: &str) -> Result<VolumeLabel, ConfigError> {
        let invalid = || ConfigError::InvalidVolumeLabel(label.to_owned());

        let bytes = label.as_bytes();
        if bytes.is_empty() || bytes.len() > 11 || bytes[0] == b' ' {
            return Err(invalid());
        }

        let mut padded = [b' '; 11];
        for (slot, b) in padded.iter_mut().zip(bytes) {
            if !(0x20..0x7F).contains(b) || INVALID_LABEL_CHARACTERS.contains(b) {
                return Err(invalid());
            }
            *slot = b.to_ascii_uppercase();
        }

        Ok(Self(padded))
    }

    pub fn as_bytes(&self) -> &[u8; 11] {
        &self.0
    }

    /// Whether this is the `NO NAME` placeholder, which gets no volume label directory entry.
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

impl Default for VolumeLabel {
    fn default() -> Self {
        Self(*b"NO NAME    ")
    }
}

impl fmt::Display for VolumeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // only printable ASCII gets in
        f.write_str(String::from_utf8_lossy(&self.0).trim_end())
    }
}

impl fmt::Debug for VolumeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VolumeLabel({:?})", self.to_string())
    }
}

impl std::str::FromStr for VolumeLabel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// A bootable disk image: protective MBR, mirrored GPT and a FAT32 EFI System Partition.
///
/// Every size and offset is planned in [`DiskImage::try_new`]. Writing never fails on
/// configuration, only on I/O.
#[derive(Clone, Debug)]
pub struct DiskImage<R = SystemRandom, C = LocalClock> {
    options: ImageOptions,
    layout: Layout,
    geometry: Fat32Geometry,
    random: R,
    clock: C,
}

impl DiskImage {
    /// Plans an image drawing GUIDs from the OS and timestamps from the local clock.
    pub fn try_new(options: &ImageOptions) -> Result<DiskImage, ConfigError> {
        Self::with_sources(options, SystemRandom, LocalClock)
    }
}

impl<R: RandomSource, C: Clock> DiskImage<R, C> {
    pub fn with_sources(
        options: &ImageOptions,
        random: R,
        clock: C,
    ) -> Result<DiskImage<R, C>, ConfigError> {
        let layout = Layout::try_from(options)?;
        let geometry = Fat32Geometry::try_new(&layout)?;

        Ok(Self {
            options: options.clone(),
            layout,
            geometry,
            random,
            clock,
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn geometry(&self) -> &Fat32Geometry {
        &self.geometry
    }

    /// Writes the whole image in the order MBR, GPT, ESP. The first failing stage aborts the
    /// write; whatever was written so far stays.
    pub fn write<T: Write + Seek>(&mut self, f: &mut T) -> Result<(), ImageError> {
        let timestamp = FatTimestamp::from_datetime(&self.clock.now());

        if self.options.full_format {
            info!(bytes = self.layout.image_size_bytes(), "zero-filling image");
            disk::write_zeroes(f, self.layout.image_size_bytes(), 0).stage(Stage::Clear)?;
        }

        info!(lba_size = self.layout.lba_size(), "writing protective MBR");
        mbr::write_mbr(f, &self.layout).stage(Stage::Mbr)?;

        info!(
            primary = self.layout.primary_header_lba(),
            secondary = self.layout.secondary_header_lba(),
            "writing GPT headers & tables"
        );
        gpt::write_gpt(f, &self.layout, &mut self.random).stage(Stage::Gpt)?;

        info!(
            esp_lba = self.layout.esp_lba(),
            clusters = self.geometry.cluster_count(),
            "writing EFI System Partition"
        );
        EspVolume::new(self.geometry, self.options.volume_label.clone(), timestamp)
            .write(f)
            .stage(Stage::Esp)?;

        Ok(())
    }
}

#[cfg(test)]
fn build(options: &ImageOptions) -> Vec<u8> {
    use chrono::NaiveDate;

    use crate::{clock::FixedClock, guid::SequenceRandom};

    let clock = FixedClock(
        NaiveDate::from_ymd_opt(2024, 7, 9)
            .unwrap()
            .and_hms_opt(10, 11, 12)
            .unwrap(),
    );
    let mut image = DiskImage::with_sources(options, SequenceRandom(0x42), clock).unwrap();
    let mut f = std::io::Cursor::new(Vec::new());
    image.write(&mut f).unwrap();
    f.into_inner()
}

/// Fails every write once `budget` bytes have gone through.
#[cfg(test)]
struct FailingWriter {
    inner: std::io::Cursor<Vec<u8>>,
    written: usize,
    budget: usize,
}

#[cfg(test)]
impl FailingWriter {
    fn new(budget: usize) -> FailingWriter {
        Self {
            inner: std::io::Cursor::new(Vec::new()),
            written: 0,
            budget,
        }
    }
}

#[cfg(test)]
impl Write for FailingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.written + buf.len() > self.budget {
            return Err(std::io::Error::other("disk full"));
        }
        self.written += buf.len();
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
impl Seek for FailingWriter {
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        self.inner.seek(pos)
    }
}

#[test]
fn default_image() {
    use util::{get_u16, get_u32, get_u64};
    use crate::layout::ImageOptionsBuilder;

    let options = ImageOptionsBuilder::default().build().unwrap();
    let bytes = build(&options);
    let lba = 512;

    assert_eq!(bytes.len(), 37 * crate::MB as usize);

    // protective MBR
    assert_eq!(bytes[450], 0xEE);
    assert_eq!(get_u32(&bytes, 458), 75775);
    assert_eq!(&bytes[510..512], &[0x55, 0xAA]);

    // primary header
    let primary = &bytes[lba..lba + 92];
    assert_eq!(&primary[..8], b"EFI PART");
    assert_eq!(get_u64(primary, 24), 1);
    assert_eq!(get_u64(primary, 32), 75775);
    assert_eq!(get_u64(primary, 40), 34);
    assert_eq!(get_u64(primary, 48), 75742);
    assert_eq!(get_u64(primary, 72), 2);
    assert_eq!(get_u32(primary, 80), 128);
    assert_eq!(get_u32(primary, 84), 128);

    let mut zeroed = primary.to_vec();
    zeroed[16..20].fill(0);
    assert_eq!(get_u32(primary, 16), crc32fast::hash(&zeroed));
    assert!(bytes[lba + 92..2 * lba].iter().all(|b| *b == 0));

    // partition entry arrays
    let primary_array = &bytes[2 * lba..2 * lba + 16384];
    let secondary_array = &bytes[75743 * lba..75743 * lba + 16384];
    assert_eq!(primary_array, secondary_array);
    assert_eq!(get_u32(primary, 88), crc32fast::hash(primary_array));

    // disk, ESP and data partition GUIDs are all distinct
    let disk_guid = &primary[56..72];
    let esp_guid = &primary_array[16..32];
    let data_guid = &primary_array[144..160];
    assert_ne!(disk_guid, esp_guid);
    assert_ne!(disk_guid, data_guid);
    assert_ne!(esp_guid, data_guid);

    // secondary header
    let secondary = &bytes[75775 * lba..75775 * lba + 92];
    assert_eq!(get_u64(secondary, 24), 75775);
    assert_eq!(get_u64(secondary, 32), 1);
    assert_eq!(get_u64(secondary, 72), 75743);
    assert_eq!(get_u32(secondary, 88), get_u32(primary, 88));
    assert_eq!(&secondary[56..72], &primary[56..72]);
    let mut zeroed = secondary.to_vec();
    zeroed[16..20].fill(0);
    assert_eq!(get_u32(secondary, 16), crc32fast::hash(&zeroed));

    // VBR
    let esp = 2048 * lba;
    let vbr = &bytes[esp..esp + 512];
    assert_eq!(get_u16(vbr, 11), 512);
    assert_eq!(get_u32(vbr, 44), 2);
    assert_eq!(get_u32(vbr, 28), 2048);
    assert_eq!(&vbr[510..], &[0x55, 0xAA]);
    let ts = FatTimestamp::new(2024, 7, 9, 10, 11, 12);
    assert_eq!(get_u32(vbr, 67), ts.serial());

    // both FATs
    for fat in [esp + 32 * lba, esp + (32 + 1008) * lba] {
        assert_eq!(get_u32(&bytes, fat), 0xFFFFFFF8);
        for cluster in 1..5 {
            assert_eq!(get_u32(&bytes, fat + cluster * 4), 0xFFFFFFFF);
        }
        assert_eq!(get_u32(&bytes, fat + 20), 0);
    }

    // root directory
    let root = esp + 2048 * lba;
    assert_eq!(&bytes[root..root + 11], b"EFI        ");
    assert_eq!(bytes[root + 11], 0x10);
    assert_eq!(get_u16(&bytes, root + 26), 3);
    assert_eq!(get_u16(&bytes, root + 22), ts.time);
    assert_eq!(get_u16(&bytes, root + 24), ts.date);
    assert_eq!(bytes[root + 32], 0);

    // /EFI/BOOT
    let boot = root + 2 * lba;
    assert_eq!(&bytes[boot..boot + 11], b".          ");
    assert_eq!(get_u16(&bytes, boot + 26), 4);
    assert_eq!(&bytes[boot + 32..boot + 43], b"..         ");
    assert_eq!(get_u16(&bytes, boot + 32 + 26), 3);
}

#[test]
fn every_block_size() {
    use util::get_u16;
    use crate::layout::{ImageOptionsBuilder, SUPPORTED_LBA_SIZES};

    for lba_size in SUPPORTED_LBA_SIZES {
        let options = ImageOptionsBuilder::default()
            .lba_size(lba_size)
            .build()
            .unwrap();
        let image = DiskImage::try_new(&options).unwrap();
        let layout = *image.layout();
        let bytes = build(&options);
        let lba = lba_size as usize;

        assert_eq!(bytes.len() as u64, layout.image_size_bytes());
        assert_eq!(&bytes[lba..lba + 8], b"EFI PART");

        let last = (layout.image_size_lbas() - 1) as usize * lba;
        assert_eq!(&bytes[last..last + 8], b"EFI PART");

        let vbr = layout.esp_lba() as usize * lba;
        assert_eq!(get_u16(&bytes, vbr + 11) as u64, lba_size);
        assert_eq!(&bytes[vbr + 510..vbr + 512], &[0x55, 0xAA]);
    }
}

#[test]
fn deterministic_with_fixed_sources() {
    use crate::layout::ImageOptionsBuilder;

    let options = ImageOptionsBuilder::default()
        .volume_label(VolumeLabel::new("esp").unwrap())
        .build()
        .unwrap();
    assert_eq!(build(&options), build(&options));
}

#[test]
fn full_format_clears_data_partition() {
    use std::io::Cursor;

    use chrono::NaiveDate;

    use crate::{clock::FixedClock, guid::FixedRandom, layout::ImageOptionsBuilder};

    let options = ImageOptionsBuilder::default()
        .full_format(true)
        .build()
        .unwrap();
    let clock = FixedClock(
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap(),
    );
    let mut image = DiskImage::with_sources(&options, FixedRandom([1; 16]), clock).unwrap();

    let size = image.layout().image_size_bytes() as usize;
    let mut f = Cursor::new(vec![0xEEu8; size]);
    image.write(&mut f).unwrap();
    let bytes = f.into_inner();

    let data = image.layout().data_lba() as usize * 512;
    assert!(bytes[data..data + crate::MB as usize].iter().all(|b| *b == 0));
}

#[test]
fn reports_failing_stage() {
    use crate::{clock::FixedClock, guid::FixedRandom, layout::ImageOptionsBuilder};

    let options = ImageOptionsBuilder::default().build().unwrap();
    // MBR, GPT header + array, GPT array + header
    let gpt_end = 512 + 2 * (512 + 16384);

    for (budget, full_format, stage) in [
        (0, true, Stage::Clear),
        (0, false, Stage::Mbr),
        (512, false, Stage::Gpt),
        (gpt_end, false, Stage::Esp),
    ] {
        let options = ImageOptions {
            full_format,
            ..options.clone()
        };
        let mut image =
            DiskImage::with_sources(&options, FixedRandom([9; 16]), FixedClock(Default::default()))
                .unwrap();
        let mut f = FailingWriter::new(budget);

        let err = image.write(&mut f).unwrap_err();
        assert_eq!(err.stage(), Some(stage));
    }
}

#[test]
fn rejects_unbuildable_esp() {
    use crate::layout::ImageOptionsBuilder;

    // 512 byte alignment leaves no room for the FAT32 reserved region
    let options = ImageOptionsBuilder::default()
        .alignment(512)
        .build()
        .unwrap();
    assert!(matches!(
        DiskImage::try_new(&options),
        Err(ConfigError::FatRegionTooSmall(1))
    ));
}

#[test]
fn volume_labels() {
    assert_eq!(VolumeLabel::new("efi").unwrap().as_bytes(), b"EFI        ");
    assert_eq!(VolumeLabel::new("EFI BOOT").unwrap().to_string(), "EFI BOOT");
    assert_eq!(
        VolumeLabel::new("ABCDEFGHIJK").unwrap().as_bytes(),
        b"ABCDEFGHIJK"
    );
    assert!(VolumeLabel::default().is_default());
    assert!(VolumeLabel::new("NO NAME").unwrap().is_default());

    for label in ["", "ABCDEFGHIJKL", " LEADING", "A.B", "WHAT?", "TAB\t", "ÄÖÜ"] {
        assert!(matches!(
            VolumeLabel::new(label),
            Err(ConfigError::InvalidVolumeLabel(_))
        ));
    }
}
