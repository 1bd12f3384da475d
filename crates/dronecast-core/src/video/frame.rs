use std::time::Instant;

use image::RgbImage;

/// A single decoded video frame with metadata.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// The frame's image data.
    pub image: RgbImage,
    /// Position of this frame among those decoded by its worker (0-based).
    pub sequence: u64,
    /// When the worker finished decoding the frame.
    pub received_at: Instant,
    /// Size of the encoded unit the frame was decoded from.
    pub encoded_len: usize,
}

impl DecodedFrame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}
