use once_cell::sync::Lazy;

/// Reflected polynomial of CRC-32/ISO-HDLC.
pub const POLYNOMIAL: u32 = 0xEDB88320;

static TABLE: Lazy<[u32; 256]> = Lazy::new(build_table);

/// Builds the 256-entry lookup table for [`POLYNOMIAL`].
pub fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    for (n, slot) in table.iter_mut().enumerate() {
        let mut c = n as u32;
        for _ in 0..8 {
            c = if c & 1 != 0 {
                POLYNOMIAL ^ (c >> 1)
            } else {
                c >> 1
            };
        }
        *slot = c;
    }
    table
}

/// The process-wide lookup table. Built on first access, shared afterwards.
pub fn table() -> &'static [u32; 256] {
    &TABLE
}

/// Incremental CRC-32 state.
#[derive(Copy, Clone, Debug)]
pub struct Crc32 {
    inner: u32,
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

impl Crc32 {
    pub fn new() -> Crc32 {
        Self { inner: 0xFFFFFFFF }
    }

    /// Feeds `bytes` into the checksum.
    pub fn update(&mut self, bytes: &[u8]) {
        let table = table();
        for b in bytes {
            self.inner = table[((self.inner ^ *b as u32) & 0xFF) as usize] ^ (self.inner >> 8);
        }
    }

    /// Returns the checksum of everything fed so far.
    pub fn get(&self) -> u32 {
        self.inner ^ 0xFFFFFFFF
    }
}

/// Standard CRC-32 of `bytes`.
pub fn checksum(bytes: &[u8]) -> u32 {
    let mut crc = Crc32::new();
    crc.update(bytes);
    crc.get()
}

#[test]
fn check_value() {
    // catalogue check value for CRC-32/ISO-HDLC
    assert_eq!(checksum(b"123456789"), 0xCBF43926);
    assert_eq!(checksum(&[]), 0);
}

#[test]
fn table_is_stable() {
    let first = table();
    let second = table();
    assert!(std::ptr::eq(first, second));
    assert_eq!(*first, build_table());
    assert_eq!(first[1], 0x77073096);
    assert_eq!(first[255], 0x2D02EF8D);
}

#[test]
fn incremental_matches_one_shot() {
    let data: Vec<u8> = (0..=255u8).cycle().take(16384).collect();

    let mut crc = Crc32::new();
    for chunk in data.chunks(92) {
        crc.update(chunk);
    }

    assert_eq!(crc.get(), checksum(&data));
    assert_eq!(crc.get(), crc32fast::hash(&data));
}

#[test]
fn matches_reference_on_zeroes() {
    let zeroes = [0u8; 16384];
    assert_eq!(checksum(&zeroes), crc32fast::hash(&zeroes));
}
