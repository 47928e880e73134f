//! Opaque image container exchanged across the boundary
//!
//! The bridge moves pixel data without interpreting it; only the shape
//! metadata travels alongside the raw bytes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw pixel blob with shape metadata
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageBlob {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub data: Vec<u8>,
}

impl ImageBlob {
    pub fn new(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Self {
        Self { width, height, channels, data }
    }

    /// Expected byte length for the declared shape
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }

    /// True when the payload length matches the declared shape
    pub fn is_consistent(&self) -> bool {
        self.data.len() == self.expected_len()
    }
}

impl fmt::Debug for ImageBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ImageBlob({}x{}x{}, {} bytes)",
            self.width,
            self.height,
            self.channels,
            self.data.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_consistency() {
        let img = ImageBlob::new(2, 2, 3, vec![0; 12]);
        assert!(img.is_consistent());

        let bad = ImageBlob::new(2, 2, 3, vec![0; 7]);
        assert!(!bad.is_consistent());
    }

    #[test]
    fn test_debug_omits_pixels() {
        let img = ImageBlob::new(4, 4, 1, vec![255; 16]);
        assert_eq!(format!("{:?}", img), "ImageBlob(4x4x1, 16 bytes)");
    }
}
