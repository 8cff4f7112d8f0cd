//! Image sequencer: orders the images present in a package and inserts
//! a settle delay between images that trigger a device reboot.

use std::io::{Read, Write};
use std::thread::sleep;
use std::time::Duration;

use crate::client::Client;
use crate::manifest::{Image, ImageKind};
use crate::object;
use crate::Result;

fn transfer_order(kind: ImageKind) -> u8 {
    match kind {
        ImageKind::SoftDeviceBootloader => 0,
        ImageKind::SoftDevice => 1,
        ImageKind::Bootloader => 2,
        ImageKind::Application => 3,
    }
}

/// Send every image in `images` in the fixed order SD+BL, SD, BL, App
/// (skipping absent kinds), opening a session and transferring the init
/// packet then the firmware for each.
pub fn run<T: Read + Write>(
    client: &mut Client<T>,
    mut images: Vec<Image>,
    settle_delay: Duration,
) -> Result<()> {
    images.sort_by_key(|img| transfer_order(img.kind));

    let total = images.len();
    for (i, image) in images.into_iter().enumerate() {
        log::info!(
            "sending {:?} image ({} byte init packet, {} byte firmware)",
            image.kind,
            image.init_packet.len(),
            image.firmware.len()
        );

        client.open()?;
        object::transfer_init(client, &image.init_packet)?;
        object::transfer_firmware(client, &image.firmware)?;
        client.close();

        let is_last = i + 1 == total;
        if total > 1 && !is_last {
            log::debug!("waiting {settle_delay:?} for the device to settle before the next image");
            sleep(settle_delay);
        }
    }

    log::info!("update complete");
    Ok(())
}
