use std::io::{self, ErrorKind, Seek, SeekFrom, Write};

/// Writes zeroes to a file from the given absolute offset (in bytes), up to the given size.
pub fn write_zeroes<T>(f: &mut T, size: u64, offset: u64) -> io::Result<()>
where
    T: Write + Seek,
{
    let buffer = [0u8; 4 * crate::KB as usize];

    // seek to offset
    f.seek(SeekFrom::Start(offset))?;

    let mut remaining = size;
    while remaining > 0 {
        let iter_size = remaining.min(buffer.len() as u64);
        // `iter_size` is max 4KB so this cast is fine
        if f.write(&buffer[..iter_size as usize])? != iter_size as usize {
            return Err(io::Error::new(ErrorKind::WriteZero, "Failed to write 0s"));
        }
        remaining -= iter_size;
    }
    Ok(())
}

/// Writes `bytes` at the start of logical block `lba` and zero-pads up to the next block boundary.
pub fn write_lba<T>(f: &mut T, lba_size: u64, lba: u64, bytes: &[u8]) -> io::Result<()>
where
    T: Write + Seek,
{
    let offset = lba
        .checked_mul(lba_size)
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "LBA offset overflows"))?;

    f.seek(SeekFrom::Start(offset))?;
    f.write_all(bytes)?;

    let tail = (bytes.len() as u64).next_multiple_of(lba_size) - bytes.len() as u64;
    if tail > 0 {
        write_zeroes(f, tail, offset + bytes.len() as u64)?;
    }
    Ok(())
}

#[test]
fn write_lba_pads_to_block() {
    use std::io::Cursor;

    let mut f = Cursor::new(vec![0xAAu8; 4096]);
    write_lba(&mut f, 1024, 2, &[1, 2, 3]).unwrap();

    let bytes = f.into_inner();
    assert_eq!(&bytes[2048..2051], &[1, 2, 3]);
    assert!(bytes[2051..3072].iter().all(|b| *b == 0));
    assert_eq!(bytes[3072], 0xAA);
    assert_eq!(bytes[2047], 0xAA);
}

#[test]
fn write_zeroes_spans_buffers() {
    use std::io::Cursor;

    let mut f = Cursor::new(Vec::new());
    write_zeroes(&mut f, 10_000, 100).unwrap();

    let bytes = f.into_inner();
    assert_eq!(bytes.len(), 10_100);
    assert!(bytes.iter().all(|b| *b == 0));
}
