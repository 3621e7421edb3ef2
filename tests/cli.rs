use std::{
    fs::{self, File},
    io::{Read, Seek, SeekFrom},
    process::Command,
};

use esp_image::{MB, format::DiskImage, layout::ImageOptionsBuilder};

#[test]
fn library_writes_whole_image() {
    let file = tempfile::NamedTempFile::new().unwrap();

    let options = ImageOptionsBuilder::default()
        .lba_size(4096)
        .esp_size(40 * MB as u64)
        .data_size(3 * MB as u64)
        .build()
        .unwrap();
    let mut image = DiskImage::try_new(&options).unwrap();

    let mut f = file.reopen().unwrap();
    image.write(&mut f).unwrap();

    let layout = image.layout();
    assert_eq!(
        fs::metadata(file.path()).unwrap().len(),
        layout.image_size_bytes()
    );

    let mut header = [0u8; 8];
    f.seek(SeekFrom::Start(layout.secondary_header_lba() * 4096))
        .unwrap();
    f.read_exact(&mut header).unwrap();
    assert_eq!(&header, b"EFI PART");
}

#[test]
fn binary_builds_default_image() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("disk.img");

    let status = Command::new(env!("CARGO_BIN_EXE_esp-image"))
        .arg("--output")
        .arg(&path)
        .args(["--label", "esp"])
        .status()
        .unwrap();
    assert!(status.success());

    let mut bytes = Vec::new();
    File::open(&path).unwrap().read_to_end(&mut bytes).unwrap();
    assert_eq!(bytes.len(), 37 * MB as usize);
    assert_eq!(&bytes[510..512], &[0x55, 0xAA]);
    assert_eq!(&bytes[2048 * 512 + 71..2048 * 512 + 82], b"ESP        ");
}

#[test]
fn binary_rejects_bad_block_size() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("disk.img");

    let output = Command::new(env!("CARGO_BIN_EXE_esp-image"))
        .arg("--output")
        .arg(&path)
        .args(["--lba-size", "800"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(!path.exists());
}
