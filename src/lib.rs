//! # esp-image
//!
//! Bootable GPT disk images with a FAT32 EFI System Partition, in Rust.
//!
//! The image consists of a protective MBR, primary and secondary GPT headers with their
//! partition entry arrays, an EFI System Partition formatted as FAT32 with an empty
//! `/EFI/BOOT` directory, and an unformatted basic data partition.
//!
//! ## Usage
//!
//! ```rust
//! use esp_image::{
//!     MB,
//!     format::DiskImage,
//!     layout::ImageOptionsBuilder,
//! };
//!
//! let options = ImageOptionsBuilder::default()
//!     .lba_size(512)
//!     .esp_size(33 * MB as u64)
//!     .data_size(MB as u64)
//!     .build()
//!     .unwrap();
//!
//! let mut image = DiskImage::try_new(&options).unwrap();
//!
//! # let mut file = std::io::Cursor::new(Vec::new());
//!
//! image.write(&mut file).unwrap();
//! ```
//!
//! ## Limitations
//! The image is write-only: nothing is ever read back or repaired, the partition scheme is
//! fixed to two entries and the ESP carries directories but no files.

/// Injectable wall-clock and FAT timestamp encoding
pub mod clock;
/// CRC32 checksum used by GPT headers and partition arrays
pub mod crc32;
/// Disk utility functions
pub mod disk;
pub mod error;
/// On-disk structure encoders
pub mod format;
/// Version 4 GUIDs for disks and partitions
pub mod guid;
/// LBA geometry planning
pub mod layout;

pub const GB: u32 = 1024 * 1024 * 1024;
pub const MB: u32 = 1024 * 1024;
pub const KB: u16 = 1024;

/// Partition boundary alignment used when none is configured.
pub const DEFAULT_BOUNDARY_ALIGNMENT: u64 = 1024 * 1024;
