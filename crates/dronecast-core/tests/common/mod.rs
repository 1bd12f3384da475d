use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

pub const JPEG_QUALITY: u8 = 60;
pub const SEND_FPS: u32 = 30;

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;

/// Shade used for test image `index`; far enough apart to survive JPEG.
pub fn shade(index: usize) -> u8 {
    (20 + index * 22) as u8
}

/// A solid image whose red channel identifies it.
pub fn test_image(index: usize) -> RgbImage {
    RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([shade(index), 128, 64]))
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY)
        .encode_image(image)
        .context("failed to encode test jpeg")?;
    Ok(buf)
}

/// Which test image `image` was decoded from, if any.
pub fn identify(image: &RgbImage, count: usize) -> Option<usize> {
    let pixels = (image.width() * image.height()) as u64;
    if pixels == 0 {
        return None;
    }
    let mean_red = image.pixels().map(|p| p[0] as u64).sum::<u64>() / pixels;
    (0..count).find(|&i| (mean_red as i32 - shade(i) as i32).abs() <= 6)
}

/// Sends one JPEG per datagram to `target`, paced to `SEND_FPS`.
pub fn send_frames(target: SocketAddr, count: usize) -> Result<()> {
    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).context("failed to bind sender")?;
    let interval = Duration::from_secs(1) / SEND_FPS;
    let mut next = Instant::now();

    for i in 0..count {
        let payload = encode_jpeg(&test_image(i))?;
        socket
            .send_to(&payload, target)
            .with_context(|| format!("failed to send frame {i} to {target}"))?;
        next += interval;
        thread::sleep(next.saturating_duration_since(Instant::now()));
    }
    Ok(())
}

pub fn send_raw(target: SocketAddr, payload: &[u8]) -> Result<()> {
    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).context("failed to bind sender")?;
    socket
        .send_to(payload, target)
        .with_context(|| format!("failed to send to {target}"))?;
    Ok(())
}

pub fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}
