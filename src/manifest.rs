//! Manifest binding: parses `manifest.json` out of the update package
//! and resolves each declared image's `.dat`/`.bin` entries to byte
//! buffers via the archive.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use zip::ZipArchive;

use crate::{DfuError, Result};

/// The four image kinds the Nordic bootloader recognises. Order here is
/// declaration order only; transfer order is decided by the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    SoftDeviceBootloader,
    SoftDevice,
    Bootloader,
    Application,
}

/// One image ready for transfer: its init packet and firmware bytes,
/// already read out of the archive.
pub struct Image {
    pub kind: ImageKind,
    pub init_packet: Vec<u8>,
    pub firmware: Vec<u8>,
}

#[derive(Deserialize)]
struct ImageFiles {
    bin_file: String,
    dat_file: String,
}

#[derive(Deserialize)]
#[allow(dead_code)] // fields exist only to validate manifest structure
struct SdBlMetadata {
    bl_size: u64,
    sd_size: u64,
}

#[derive(Deserialize)]
struct SdBlFiles {
    bin_file: String,
    dat_file: String,
    info_read_only_metadata: SdBlMetadata,
}

#[derive(Deserialize)]
struct ManifestInner {
    #[serde(default)]
    application: Option<ImageFiles>,
    #[serde(default)]
    bootloader: Option<ImageFiles>,
    #[serde(default)]
    softdevice: Option<ImageFiles>,
    #[serde(default)]
    softdevice_bootloader: Option<SdBlFiles>,
}

#[derive(Deserialize)]
struct OuterManifest {
    manifest: ManifestInner,
}

/// Open the package at `path`, parse its manifest, and read every
/// declared image's init-packet and firmware bytes into memory.
pub fn load_package<P: AsRef<Path>>(path: P) -> Result<Vec<Image>> {
    let file = File::open(path).map_err(DfuError::Io)?;
    let mut archive =
        ZipArchive::new(file).map_err(|e| DfuError::InvalidPackage(e.to_string()))?;

    let manifest_json = read_entry_to_string(&mut archive, "manifest.json")?;
    let outer: OuterManifest = serde_json::from_str(&manifest_json)
        .map_err(|e| DfuError::InvalidPackage(format!("malformed manifest.json: {e}")))?;

    let mut images = Vec::with_capacity(2);

    if let Some(f) = outer.manifest.softdevice_bootloader {
        images.push(build_image(
            &mut archive,
            ImageKind::SoftDeviceBootloader,
            &f.bin_file,
            &f.dat_file,
        )?);
    }
    if let Some(f) = outer.manifest.softdevice {
        images.push(build_image(
            &mut archive,
            ImageKind::SoftDevice,
            &f.bin_file,
            &f.dat_file,
        )?);
    }
    if let Some(f) = outer.manifest.bootloader {
        images.push(build_image(
            &mut archive,
            ImageKind::Bootloader,
            &f.bin_file,
            &f.dat_file,
        )?);
    }
    if let Some(f) = outer.manifest.application {
        images.push(build_image(
            &mut archive,
            ImageKind::Application,
            &f.bin_file,
            &f.dat_file,
        )?);
    }

    if images.is_empty() {
        return Err(DfuError::InvalidPackage(
            "manifest names no recognised images".into(),
        ));
    }
    if images.len() > 2 {
        return Err(DfuError::InvalidPackage(format!(
            "manifest declares {} images, at most 2 are supported",
            images.len()
        )));
    }

    Ok(images)
}

fn build_image<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    kind: ImageKind,
    bin_file: &str,
    dat_file: &str,
) -> Result<Image> {
    let init_packet = read_entry_to_vec(archive, dat_file)?;
    let firmware = read_entry_to_vec(archive, bin_file)?;
    Ok(Image {
        kind,
        init_packet,
        firmware,
    })
}

fn read_entry_to_string<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<String> {
    let mut entry = archive
        .by_name(name)
        .map_err(|e| DfuError::InvalidPackage(format!("missing entry {name:?}: {e}")))?;
    let mut s = String::new();
    entry
        .read_to_string(&mut s)
        .map_err(|e| DfuError::InvalidPackage(format!("cannot read entry {name:?}: {e}")))?;
    Ok(s)
}

fn read_entry_to_vec<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Vec<u8>> {
    let mut entry = archive
        .by_name(name)
        .map_err(|e| DfuError::InvalidPackage(format!("missing entry {name:?}: {e}")))?;
    let mut buf = Vec::new();
    entry
        .read_to_end(&mut buf)
        .map_err(|e| DfuError::InvalidPackage(format!("cannot read entry {name:?}: {e}")))?;
    Ok(buf)
}
