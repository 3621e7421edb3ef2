use std::{fmt, io};

/// Configuration or geometry defects. These are detected before anything is written.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid logical block size. Must be `512`, `1024`, `2048` or `4096`: {0}.")]
    InvalidLbaSize(u64),
    #[error("Invalid alignment. Must be a non-zero multiple of the logical block size: {0}.")]
    InvalidAlignment(u64),
    #[error("Partition `{0}` is empty after rounding to logical blocks.")]
    EmptyPartition(&'static str),
    #[error("Image size overflows the addressable LBA range.")]
    SizeOverflow,
    #[error(
        "Partition `{name}` ({start}..={end}) lies outside the usable LBA range {first_usable}..={last_usable}."
    )]
    OutsideUsableRange {
        name: &'static str,
        start: u64,
        end: u64,
        first_usable: u64,
        last_usable: u64,
    },
    #[error("Partitions overlap: ESP ends at {esp_end}, data partition starts at {data_start}.")]
    PartitionOverlap { esp_end: u64, data_start: u64 },
    #[error(
        "Alignment of {0} blocks cannot hold the FAT32 reserved region and two FATs in front of the data region."
    )]
    FatRegionTooSmall(u64),
    #[error("ESP of {0} sectors has no room for the root, `/EFI` and `/EFI/BOOT` clusters.")]
    EspTooSmall(u64),
    #[error("ESP of {0} sectors exceeds the 32-bit FAT32 sector count.")]
    EspTooLarge(u64),
    #[error("ESP starts at LBA {0}, beyond the 32-bit hidden sector count.")]
    HiddenSectorsOverflow(u64),
    #[error("FAT of {fat_sectors} sectors cannot map {cluster_count} clusters.")]
    FatTooSmall { fat_sectors: u32, cluster_count: u32 },
    #[error("Invalid volume label: {0:?}.")]
    InvalidVolumeLabel(String),
}

/// Pipeline stage an I/O failure happened in.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Zero-filling the image ahead of a full format.
    Clear,
    Mbr,
    Gpt,
    Esp,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Clear => "image zero-fill",
            Stage::Mbr => "protective MBR",
            Stage::Gpt => "GPT headers & tables",
            Stage::Esp => "EFI System Partition",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("Could not write {stage}: {source}.")]
    Io {
        stage: Stage,
        #[source]
        source: io::Error,
    },
}

impl ImageError {
    /// The stage that failed, if the failure happened while writing.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ImageError::Config(_) => None,
            ImageError::Io { stage, .. } => Some(*stage),
        }
    }
}

/// Tags an I/O result with the pipeline stage it belongs to.
pub(crate) trait StageContext<T> {
    fn stage(self, stage: Stage) -> Result<T, ImageError>;
}

impl<T> StageContext<T> for io::Result<T> {
    fn stage(self, stage: Stage) -> Result<T, ImageError> {
        self.map_err(|source| ImageError::Io { stage, source })
    }
}
