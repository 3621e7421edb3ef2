/// Signature closing every boot record (MBR, VBR).
pub(super) const BOOT_SIGNATURE: u16 = 0xAA55;
/// Size of the fixed part of boot records, independent of the logical block size.
pub(super) const BOOT_RECORD_SIZE: usize = 512;
/// Extended INT 13h drive number of the first hard disk.
pub(super) const DRIVE_SELECT: u8 = 0x80;

/// Little-endian field writers for explicitly laid out structures.
pub(super) fn put_u16(buffer: &mut [u8], offset: usize, value: u16) {
    buffer[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub(super) fn put_u32(buffer: &mut [u8], offset: usize, value: u32) {
    buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub(super) fn put_u64(buffer: &mut [u8], offset: usize, value: u64) {
    buffer[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
pub(crate) fn get_u16(buffer: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(buffer[offset..offset + 2].try_into().unwrap())
}

#[cfg(test)]
pub(crate) fn get_u32(buffer: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buffer[offset..offset + 4].try_into().unwrap())
}

#[cfg(test)]
pub(crate) fn get_u64(buffer: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(buffer[offset..offset + 8].try_into().unwrap())
}
