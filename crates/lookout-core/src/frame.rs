//! Captured frame type.

/// A captured RGB24 camera frame, owned by the frame loop.
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Driver sequence number, when the device reports one.
    pub sequence: u32,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        Self {
            data,
            width,
            height,
            sequence,
        }
    }

    /// Number of bytes a well-formed frame of these dimensions carries.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// Non-empty, with at least one full RGB24 image in the buffer.
    pub fn is_complete(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() >= self.expected_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_len() {
        let frame = Frame::new(vec![0; 12], 2, 2, 0);
        assert_eq!(frame.expected_len(), 12);
        assert!(frame.is_complete());
    }

    #[test]
    fn test_incomplete_frames() {
        assert!(!Frame::new(vec![0; 11], 2, 2, 0).is_complete());
        assert!(!Frame::new(Vec::new(), 0, 0, 0).is_complete());
    }
}
