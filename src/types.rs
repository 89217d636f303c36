//! Core pixel-level types shared by the removal engine and its callers

use image::RgbaImage;
use std::collections::VecDeque;

/// Per-pixel flags marking background connected to the image border
///
/// Built once per removal call and discarded after alpha has been written
/// back into the output buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundMask {
    width: u32,
    height: u32,
    data: Vec<bool>,
}

impl BackgroundMask {
    /// Create an all-foreground mask
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![false; width as usize * height as usize],
        }
    }

    /// Flood-fill from every border pixel whose brightness is at or below `limit`
    ///
    /// Propagation is 4-connected and only passes through pixels that are
    /// themselves at or below `limit`. Dark regions enclosed by brighter
    /// pixels are never reached.
    #[must_use]
    pub fn flood_from_borders(brightness: &[f32], width: u32, height: u32, limit: f32) -> Self {
        let mut mask = Self::new(width, height);
        if width == 0 || height == 0 || brightness.len() != mask.data.len() {
            return mask;
        }

        let w = width as usize;
        let h = height as usize;
        let is_candidate = |idx: usize| brightness.get(idx).is_some_and(|b| *b <= limit);
        let mut queue = VecDeque::new();

        let seed = |idx: usize, mask: &mut Self, queue: &mut VecDeque<usize>| {
            if is_candidate(idx) {
                if let Some(flag) = mask.data.get_mut(idx) {
                    if !*flag {
                        *flag = true;
                        queue.push_back(idx);
                    }
                }
            }
        };

        for x in 0..w {
            seed(x, &mut mask, &mut queue);
            seed((h - 1) * w + x, &mut mask, &mut queue);
        }
        for y in 0..h {
            seed(y * w, &mut mask, &mut queue);
            seed(y * w + (w - 1), &mut mask, &mut queue);
        }

        while let Some(idx) = queue.pop_front() {
            let x = idx % w;
            let y = idx / w;

            let neighbors = [
                (x > 0).then(|| idx - 1),
                (x + 1 < w).then(|| idx + 1),
                (y > 0).then(|| idx - w),
                (y + 1 < h).then(|| idx + w),
            ];

            for next in neighbors.into_iter().flatten() {
                seed(next, &mut mask, &mut queue);
            }
        }

        mask
    }

    /// Mask dimensions as (width, height)
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Whether the pixel at (x, y) is confirmed background
    #[must_use]
    pub fn is_background(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let idx = y as usize * self.width as usize + x as usize;
        self.data.get(idx).copied().unwrap_or(false)
    }

    /// Whether the pixel at a flat index is confirmed background
    #[must_use]
    pub fn is_background_index(&self, idx: usize) -> bool {
        self.data.get(idx).copied().unwrap_or(false)
    }

    /// Number of confirmed background pixels
    #[must_use]
    pub fn background_count(&self) -> usize {
        self.data.iter().filter(|flag| **flag).count()
    }

    /// Fraction of the image confirmed as background
    #[must_use]
    pub fn coverage(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.background_count() as f32 / self.data.len() as f32
    }

    /// Render the mask as a grayscale-in-RGBA debug image (white = background)
    #[must_use]
    pub fn to_debug_image(&self) -> RgbaImage {
        RgbaImage::from_fn(self.width, self.height, |x, y| {
            if self.is_background(x, y) {
                image::Rgba([255, 255, 255, 255])
            } else {
                image::Rgba([0, 0, 0, 255])
            }
        })
    }
}
