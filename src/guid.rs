use std::fmt;

use bytemuck::{Pod, Zeroable};
use uuid::{Builder, Uuid};

/// EFI System Partition type, `C12A7328-F81F-11D2-BA4B-00A0C93EC93B`.
pub const EFI_SYSTEM_PARTITION: Guid = Guid::from_fields(
    0xC12A7328,
    0xF81F,
    0x11D2,
    [0xBA, 0x4B, 0x00, 0xA0, 0xC9, 0x3E, 0xC9, 0x3B],
);

/// Microsoft basic data partition type, `EBD0A0A2-B9E5-4433-87C0-68B6B72699C7`.
pub const BASIC_DATA_PARTITION: Guid = Guid::from_fields(
    0xEBD0A0A2,
    0xB9E5,
    0x4433,
    [0x87, 0xC0, 0x68, 0xB6, 0xB7, 0x26, 0x99, 0xC7],
);

/// A GUID in its on-disk (mixed-endian) form as used by the UEFI specification.
/// The first three fields are stored little-endian, the remaining eight bytes as-is.
#[repr(C)]
#[derive(Copy, Clone, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct Guid {
    /// Low 32 bits of the timestamp.
    time_low: u32,
    /// Middle 16 bits of the timestamp.
    time_mid: u16,
    /// High 12 bits of the timestamp; the top nibble holds the version.
    time_high_and_version: u16,
    /// The top bits hold the variant.
    clock_seq_high_and_reserved: u8,
    clock_seq_low: u8,
    /// Spatially unique node identifier.
    node: [u8; 6],
}

impl Guid {
    pub const fn from_fields(d1: u32, d2: u16, d3: u16, d4: [u8; 8]) -> Guid {
        Self {
            time_low: d1.to_le(),
            time_mid: d2.to_le(),
            time_high_and_version: d3.to_le(),
            clock_seq_high_and_reserved: d4[0],
            clock_seq_low: d4[1],
            node: [d4[2], d4[3], d4[4], d4[5], d4[6], d4[7]],
        }
    }

    /// Draws a random version 4, variant `10` GUID. The six version and variant bits are forced,
    /// all others come from `source`.
    pub fn new_v4<R: RandomSource + ?Sized>(source: &mut R) -> Guid {
        Builder::from_random_bytes(source.next_bytes())
            .into_uuid()
            .into()
    }

    pub fn time_low(&self) -> u32 {
        u32::from_le(self.time_low)
    }

    pub fn time_mid(&self) -> u16 {
        u16::from_le(self.time_mid)
    }

    pub fn time_high_and_version(&self) -> u16 {
        u16::from_le(self.time_high_and_version)
    }

    pub fn clock_seq_high_and_reserved(&self) -> u8 {
        self.clock_seq_high_and_reserved
    }

    pub fn clock_seq_low(&self) -> u8 {
        self.clock_seq_low
    }

    pub fn node(&self) -> [u8; 6] {
        self.node
    }

    /// Version number from the top nibble of `time_high_and_version`.
    pub fn version(&self) -> u8 {
        (self.time_high_and_version() >> 12) as u8
    }

    /// The on-disk bytes.
    pub fn to_bytes(self) -> [u8; 16] {
        bytemuck::cast(self)
    }

    pub fn to_uuid(self) -> Uuid {
        let mut d4 = [0u8; 8];
        d4[0] = self.clock_seq_high_and_reserved;
        d4[1] = self.clock_seq_low;
        d4[2..].copy_from_slice(&self.node);
        Uuid::from_fields(self.time_low(), self.time_mid(), self.time_high_and_version(), &d4)
    }
}

impl From<Uuid> for Guid {
    fn from(uuid: Uuid) -> Self {
        let (d1, d2, d3, d4) = uuid.as_fields();
        Guid::from_fields(d1, d2, d3, *d4)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}", self.to_uuid().hyphenated())
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({self})")
    }
}

/// Source of the random bits behind generated GUIDs.
pub trait RandomSource {
    fn next_bytes(&mut self) -> [u8; 16];
}

/// Operating system randomness, through `uuid`'s v4 generator.
#[derive(Copy, Clone, Debug, Default)]
pub struct SystemRandom;

impl RandomSource for SystemRandom {
    fn next_bytes(&mut self) -> [u8; 16] {
        Uuid::new_v4().into_bytes()
    }
}

/// Returns the same 16 bytes on every call, so every GUID it seeds is identical.
#[derive(Copy, Clone, Debug)]
pub struct FixedRandom(pub [u8; 16]);

impl RandomSource for FixedRandom {
    fn next_bytes(&mut self) -> [u8; 16] {
        self.0
    }
}

/// Counts up from a seed. Reproducible, and consecutive GUIDs differ.
#[derive(Copy, Clone, Debug)]
pub struct SequenceRandom(pub u128);

impl RandomSource for SequenceRandom {
    fn next_bytes(&mut self) -> [u8; 16] {
        let bytes = self.0.to_le_bytes();
        self.0 = self.0.wrapping_add(1);
        bytes
    }
}

#[test]
fn well_known_types() {
    let esp: Guid = uuid::uuid!("C12A7328-F81F-11D2-BA4B-00A0C93EC93B").into();
    assert_eq!(esp, EFI_SYSTEM_PARTITION);
    assert_eq!(
        EFI_SYSTEM_PARTITION.to_bytes(),
        [
            0x28, 0x73, 0x2A, 0xC1, 0x1F, 0xF8, 0xD2, 0x11, 0xBA, 0x4B, 0x00, 0xA0, 0xC9, 0x3E,
            0xC9, 0x3B
        ]
    );

    let data: Guid = uuid::uuid!("EBD0A0A2-B9E5-4433-87C0-68B6B72699C7").into();
    assert_eq!(data, BASIC_DATA_PARTITION);
    assert_eq!(
        BASIC_DATA_PARTITION.to_string(),
        "EBD0A0A2-B9E5-4433-87C0-68B6B72699C7"
    );
}

#[test]
fn version_and_variant_forced() {
    let guid = Guid::new_v4(&mut FixedRandom([0xFF; 16]));
    assert_eq!(guid.time_high_and_version(), 0x4FFF);
    assert_eq!(guid.clock_seq_high_and_reserved(), 0xBF);
    assert_eq!(guid.time_low(), 0xFFFFFFFF);
    assert_eq!(guid.node(), [0xFF; 6]);

    let guid = Guid::new_v4(&mut FixedRandom([0; 16]));
    assert_eq!(guid.time_high_and_version(), 0x4000);
    assert_eq!(guid.clock_seq_high_and_reserved(), 0x80);
    assert_eq!(guid.time_low(), 0);
}

#[test]
fn system_batch_is_v4_and_distinct() {
    use std::collections::HashSet;

    let mut source = SystemRandom;
    let guids: HashSet<Guid> = (0..2000)
        .map(|_| Guid::new_v4(&mut source))
        .inspect(|g| {
            assert_eq!(g.version(), 4);
            assert_eq!(g.clock_seq_high_and_reserved() >> 6, 0b10);
        })
        .collect();

    assert_eq!(guids.len(), 2000);
}

#[test]
fn uuid_round_trip_preserves_fields() {
    let guid = Guid::new_v4(&mut FixedRandom(*b"0123456789abcdef"));
    assert_eq!(Guid::from(guid.to_uuid()), guid);
    assert_eq!(guid.to_uuid().get_version_num(), 4);
}

#[test]
fn sequence_is_reproducible_and_distinct() {
    let mut a = SequenceRandom(0x42);
    let mut b = SequenceRandom(0x42);

    let first = Guid::new_v4(&mut a);
    let second = Guid::new_v4(&mut a);
    assert_ne!(first, second);
    assert_eq!(first, Guid::new_v4(&mut b));
    assert_eq!(second, Guid::new_v4(&mut b));

    let mut fixed = FixedRandom([0x42; 16]);
    assert_eq!(Guid::new_v4(&mut fixed), Guid::new_v4(&mut fixed));
}
