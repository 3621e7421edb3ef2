use checked_num::CheckedU64;
use derive_builder::Builder;

use crate::{DEFAULT_BOUNDARY_ALIGNMENT, error::ConfigError, format::VolumeLabel};

/// Logical block sizes an image can be built with.
pub const SUPPORTED_LBA_SIZES: [u64; 4] = [512, 1024, 2048, 4096];
/// Size of one GPT partition entry array (in bytes).
pub const GPT_TABLE_SIZE: u64 = 16384;
/// Size of one GPT partition entry (in bytes).
pub const GPT_ENTRY_SIZE: u64 = 128;
/// Number of entries in the GPT partition entry array.
pub const GPT_ENTRY_COUNT: u64 = GPT_TABLE_SIZE / GPT_ENTRY_SIZE;

/// User facing image parameters. All sizes are given in bytes.
#[derive(Builder, Clone, Debug)]
pub struct ImageOptions {
    /// Logical block size. One of [`SUPPORTED_LBA_SIZES`].
    #[builder(default = "512")]
    pub lba_size: u64,
    /// Requested size of the EFI System Partition.
    #[builder(default = "33 * crate::MB as u64")]
    pub esp_size: u64,
    /// Requested size of the basic data partition.
    #[builder(default = "crate::MB as u64")]
    pub data_size: u64,
    /// Partition start alignment. Defaults to 1 MiB or the block size, whichever is larger.
    #[builder(default, setter(strip_option))]
    pub alignment: Option<u64>,
    /// FAT volume label of the ESP.
    #[builder(default)]
    pub volume_label: VolumeLabel,
    /// Zero the whole image before writing any structure.
    #[builder(default)]
    pub full_format: bool,
}

impl ImageOptions {
    /// The alignment actually used for partition starts (in bytes).
    pub fn effective_alignment(&self) -> u64 {
        self.alignment
            .unwrap_or(DEFAULT_BOUNDARY_ALIGNMENT.max(self.lba_size))
    }
}

/// LBA geometry of the whole image. Computed once, never changed afterwards.
///
/// ```text
/// [MBR][GPT header][GPT table][pad][ESP][pad][data][pad][GPT table][GPT header]
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    lba_size: u64,
    image_size_lbas: u64,
    align_lbas: u64,
    gpt_table_lbas: u64,
    esp_lba: u64,
    esp_size_lbas: u64,
    data_lba: u64,
    data_size_lbas: u64,
}

impl Layout {
    pub fn try_new(
        lba_size: u64,
        esp_size: u64,
        data_size: u64,
        alignment: u64,
    ) -> Result<Layout, ConfigError> {
        if !SUPPORTED_LBA_SIZES.contains(&lba_size) {
            return Err(ConfigError::InvalidLbaSize(lba_size));
        }

        if alignment == 0 || alignment % lba_size != 0 {
            return Err(ConfigError::InvalidAlignment(alignment));
        }

        let align_lbas = alignment / lba_size;
        let gpt_table_lbas = GPT_TABLE_SIZE / lba_size;

        let esp_size_lbas = bytes_to_lbas(esp_size, lba_size);
        if esp_size_lbas == 0 {
            return Err(ConfigError::EmptyPartition("EFI SYSTEM"));
        }

        let data_size_lbas = bytes_to_lbas(data_size, lba_size);
        if data_size_lbas == 0 {
            return Err(ConfigError::EmptyPartition("BASIC DATA"));
        }

        // MBR + both GPT headers + both GPT tables
        let metadata_lbas = 3 + 2 * gpt_table_lbas;

        let esp_lba = next_aligned(2 + gpt_table_lbas, align_lbas)?;
        let data_lba = esp_lba
            .checked_add(esp_size_lbas)
            .ok_or(ConfigError::SizeOverflow)
            .and_then(|end| next_aligned(end, align_lbas))?;

        // one alignment unit of slack in front of each partition
        let image_size_lbas = (CheckedU64::new(esp_size_lbas)
            + data_size_lbas
            + metadata_lbas
            + align_lbas * 2)
            .ok_or(ConfigError::SizeOverflow)
            .and_then(|lbas| next_aligned(lbas, align_lbas))?;

        image_size_lbas
            .checked_mul(lba_size)
            .ok_or(ConfigError::SizeOverflow)?;

        let layout = Self {
            lba_size,
            image_size_lbas,
            align_lbas,
            gpt_table_lbas,
            esp_lba,
            esp_size_lbas,
            data_lba,
            data_size_lbas,
        };
        layout.validate()?;

        Ok(layout)
    }

    /// Checks that both partitions lie inside the usable range and do not overlap.
    fn validate(&self) -> Result<(), ConfigError> {
        let first_usable = self.first_usable_lba();
        let last_usable = self.last_usable_lba();

        for (name, start, end) in [
            ("EFI SYSTEM", self.esp_lba, self.esp_end_lba()),
            ("BASIC DATA", self.data_lba, self.data_end_lba()),
        ] {
            if start < first_usable || end > last_usable {
                return Err(ConfigError::OutsideUsableRange {
                    name,
                    start,
                    end,
                    first_usable,
                    last_usable,
                });
            }
        }

        if self.esp_end_lba() >= self.data_lba {
            return Err(ConfigError::PartitionOverlap {
                esp_end: self.esp_end_lba(),
                data_start: self.data_lba,
            });
        }

        Ok(())
    }

    pub fn lba_size(&self) -> u64 {
        self.lba_size
    }

    pub fn image_size_lbas(&self) -> u64 {
        self.image_size_lbas
    }

    pub fn image_size_bytes(&self) -> u64 {
        self.image_size_lbas * self.lba_size
    }

    pub fn align_lbas(&self) -> u64 {
        self.align_lbas
    }

    pub fn gpt_table_lbas(&self) -> u64 {
        self.gpt_table_lbas
    }

    pub fn esp_lba(&self) -> u64 {
        self.esp_lba
    }

    pub fn esp_size_lbas(&self) -> u64 {
        self.esp_size_lbas
    }

    /// Last LBA of the ESP (inclusive).
    pub fn esp_end_lba(&self) -> u64 {
        self.esp_lba + self.esp_size_lbas - 1
    }

    pub fn data_lba(&self) -> u64 {
        self.data_lba
    }

    pub fn data_size_lbas(&self) -> u64 {
        self.data_size_lbas
    }

    /// Last LBA of the basic data partition (inclusive).
    pub fn data_end_lba(&self) -> u64 {
        self.data_lba + self.data_size_lbas - 1
    }

    pub fn primary_header_lba(&self) -> u64 {
        1
    }

    pub fn primary_table_lba(&self) -> u64 {
        2
    }

    pub fn secondary_header_lba(&self) -> u64 {
        self.image_size_lbas - 1
    }

    pub fn secondary_table_lba(&self) -> u64 {
        self.image_size_lbas - 1 - self.gpt_table_lbas
    }

    /// First LBA after the MBR, the primary header and the primary table.
    pub fn first_usable_lba(&self) -> u64 {
        2 + self.gpt_table_lbas
    }

    /// Last LBA before the secondary table and the secondary header.
    pub fn last_usable_lba(&self) -> u64 {
        self.image_size_lbas - 2 - self.gpt_table_lbas
    }

    /// Disk size as the legacy MBR sees it: the true LBA count, capped to the 32-bit range.
    pub fn mbr_size_lbas(&self) -> u64 {
        self.image_size_lbas.min(1 << 32)
    }
}

impl TryFrom<&ImageOptions> for Layout {
    type Error = ConfigError;

    fn try_from(options: &ImageOptions) -> Result<Self, Self::Error> {
        Layout::try_new(
            options.lba_size,
            options.esp_size,
            options.data_size,
            options.effective_alignment(),
        )
    }
}

/// Number of logical blocks needed to hold `bytes`.
pub fn bytes_to_lbas(bytes: u64, lba_size: u64) -> u64 {
    bytes.div_ceil(lba_size)
}

/// First multiple of `align_lbas` at or after `lba`.
fn next_aligned(lba: u64, align_lbas: u64) -> Result<u64, ConfigError> {
    lba.checked_next_multiple_of(align_lbas)
        .ok_or(ConfigError::SizeOverflow)
}

#[test]
fn default_geometry() {
    let options = ImageOptionsBuilder::default().build().unwrap();
    let layout = Layout::try_from(&options).unwrap();

    assert_eq!(layout.lba_size(), 512);
    assert_eq!(layout.align_lbas(), 2048);
    assert_eq!(layout.gpt_table_lbas(), 32);
    assert_eq!(layout.esp_lba(), 2048);
    assert_eq!(layout.esp_size_lbas(), 67584);
    assert_eq!(layout.data_lba(), 69632);
    assert_eq!(layout.data_size_lbas(), 2048);
    // 67584 + 2048 + 67 + 4096 = 73795, rounded up to 2048
    assert_eq!(layout.image_size_lbas(), 75776);
    assert_eq!(layout.image_size_bytes(), 37 * crate::MB as u64);
    assert_eq!(layout.first_usable_lba(), 34);
    assert_eq!(layout.last_usable_lba(), 75742);
    assert_eq!(layout.secondary_table_lba(), 75743);
    assert_eq!(layout.secondary_header_lba(), 75775);
    assert_eq!(layout.mbr_size_lbas() - 1, 75775);
}

#[test]
fn partitions_aligned_for_all_block_sizes() {
    for lba_size in SUPPORTED_LBA_SIZES {
        for (esp, data) in [(33 * crate::MB as u64, crate::MB as u64), (1, 1), (100_000, 7_777)] {
            let options = ImageOptionsBuilder::default()
                .lba_size(lba_size)
                .esp_size(esp)
                .data_size(data)
                .build()
                .unwrap();
            let layout = Layout::try_from(&options).unwrap();

            assert_eq!(layout.esp_lba() % layout.align_lbas(), 0);
            assert_eq!(layout.data_lba() % layout.align_lbas(), 0);
            assert_eq!(layout.image_size_lbas() % layout.align_lbas(), 0);
            assert!(layout.esp_lba() >= layout.first_usable_lba());
            assert!(layout.esp_end_lba() < layout.data_lba());
            assert!(layout.data_end_lba() <= layout.last_usable_lba());
            assert_eq!(layout.esp_size_lbas(), esp.div_ceil(lba_size));
        }
    }
}

#[test]
fn small_alignment_stays_clear_of_gpt() {
    let layout = Layout::try_new(512, 4096, 4096, 512).unwrap();

    assert_eq!(layout.align_lbas(), 1);
    assert_eq!(layout.esp_lba(), 34);
    assert_eq!(layout.data_lba(), 42);
    assert_eq!(layout.image_size_lbas(), 8 + 8 + 67 + 2);
    assert!(layout.data_end_lba() <= layout.last_usable_lba());
}

#[test]
fn rejects_bad_input() {
    assert!(matches!(
        Layout::try_new(513, crate::MB as u64, crate::MB as u64, crate::MB as u64),
        Err(ConfigError::InvalidLbaSize(513))
    ));
    assert!(matches!(
        Layout::try_new(8192, crate::MB as u64, crate::MB as u64, crate::MB as u64),
        Err(ConfigError::InvalidLbaSize(8192))
    ));
    assert!(matches!(
        Layout::try_new(4096, crate::MB as u64, crate::MB as u64, 6144),
        Err(ConfigError::InvalidAlignment(6144))
    ));
    assert!(matches!(
        Layout::try_new(512, crate::MB as u64, crate::MB as u64, 0),
        Err(ConfigError::InvalidAlignment(0))
    ));
    assert!(matches!(
        Layout::try_new(512, 0, crate::MB as u64, crate::MB as u64),
        Err(ConfigError::EmptyPartition("EFI SYSTEM"))
    ));
    assert!(matches!(
        Layout::try_new(512, crate::MB as u64, 0, crate::MB as u64),
        Err(ConfigError::EmptyPartition("BASIC DATA"))
    ));
    assert!(matches!(
        Layout::try_new(512, u64::MAX - 10, crate::MB as u64, crate::MB as u64),
        Err(ConfigError::SizeOverflow)
    ));
}

#[test]
fn mbr_size_is_clamped_past_32_bits() {
    // 3 TiB of data at 512 byte blocks needs more than 2^32 LBAs
    let layout = Layout::try_new(
        512,
        33 * crate::MB as u64,
        3 * 1024 * crate::GB as u64,
        crate::MB as u64,
    )
    .unwrap();

    assert!(layout.image_size_lbas() > u32::MAX as u64);
    assert_eq!(layout.mbr_size_lbas(), 1 << 32);
    assert_eq!(layout.secondary_header_lba(), layout.image_size_lbas() - 1);
}
