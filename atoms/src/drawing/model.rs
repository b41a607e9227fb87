use serde::{Deserialize, Serialize};

/// Normalized `[x, y, w, h]` box, each component in `[0, 1]` relative to the image.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Pixel-space rectangle, inclusive of `left`/`top`, exclusive of `right`/`bottom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl PixelRect {
    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }
}

impl BoundingBox {
    /// Accepts exactly four finite numbers; anything else is "no localization".
    pub fn from_slice(values: &[f64]) -> Option<Self> {
        match values {
            [x, y, w, h] if values.iter().all(|v| v.is_finite()) && *w >= 0.0 && *h >= 0.0 => {
                Some(Self {
                    x: *x,
                    y: *y,
                    width: *w,
                    height: *h,
                })
            }
            _ => None,
        }
    }

    /// Denormalize against the image size, clamped to its bounds.
    /// Returns `None` when nothing of the box is left inside the image.
    pub fn to_pixels(&self, image_width: u32, image_height: u32) -> Option<PixelRect> {
        let w = image_width as f64;
        let h = image_height as f64;
        let clamp_x = |v: f64| (v * w).round().clamp(0.0, w) as u32;
        let clamp_y = |v: f64| (v * h).round().clamp(0.0, h) as u32;

        let rect = PixelRect {
            left: clamp_x(self.x),
            top: clamp_y(self.y),
            right: clamp_x(self.x + self.width),
            bottom: clamp_y(self.y + self.height),
        };

        (rect.right > rect.left && rect.bottom > rect.top).then_some(rect)
    }
}
