use std::{fs::OpenOptions, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use esp_image::{
    MB,
    format::{DiskImage, VolumeLabel},
    layout::ImageOptionsBuilder,
};

/// Build a bootable GPT disk image with an empty FAT32 EFI System Partition
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Image file to create (overwritten if it exists)
    #[clap(short, long, default_value = "test.img")]
    output: PathBuf,

    /// Logical block size in bytes: 512, 1024, 2048 or 4096
    #[clap(short = 'b', long, default_value = "512")]
    lba_size: u64,

    /// Size of the EFI System Partition in MiB
    #[clap(long, default_value = "33")]
    esp_size: u64,

    /// Size of the basic data partition in MiB
    #[clap(long, default_value = "1")]
    data_size: u64,

    /// Partition alignment in bytes (default: 1 MiB or the block size, whichever is larger)
    #[clap(long)]
    alignment: Option<u64>,

    /// FAT volume label of the EFI System Partition
    #[clap(long, default_value = "NO NAME")]
    label: VolumeLabel,

    /// Zero the whole image before writing
    #[clap(long)]
    full_format: bool,

    /// Show debug output
    #[clap(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .init();

    let esp_size = args
        .esp_size
        .checked_mul(MB as u64)
        .context("ESP size overflows")?;
    let data_size = args
        .data_size
        .checked_mul(MB as u64)
        .context("data partition size overflows")?;

    let mut builder = ImageOptionsBuilder::default();
    builder
        .lba_size(args.lba_size)
        .esp_size(esp_size)
        .data_size(data_size)
        .volume_label(args.label)
        .full_format(args.full_format);
    if let Some(alignment) = args.alignment {
        builder.alignment(alignment);
    }
    let options = builder.build().context("invalid image options")?;

    let mut image = DiskImage::try_new(&options).context("invalid image layout")?;

    let layout = image.layout();
    info!(
        image_lbas = layout.image_size_lbas(),
        esp = %format!("{}..={}", layout.esp_lba(), layout.esp_end_lba()),
        data = %format!("{}..={}", layout.data_lba(), layout.data_end_lba()),
        "planned layout"
    );

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&args.output)
        .with_context(|| format!("could not open {}", args.output.display()))?;

    image
        .write(&mut file)
        .with_context(|| format!("could not build image {}", args.output.display()))?;

    println!(
        "wrote {} ({} bytes, {} byte blocks)",
        args.output.display(),
        image.layout().image_size_bytes(),
        image.layout().lba_size()
    );
    Ok(())
}
