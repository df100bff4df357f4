use crate::assets::ImageAsset;
use glam::Vec2;
use std::sync::Arc;

/// Coarse hit grid over an image, quantized from its packed pixel mask.
///
/// The grid keeps roughly one cell per mask bit while preserving the image
/// aspect ratio, so a point maps to `floor(y / ystep) * cols + floor(x / xstep)`.
#[derive(Debug, Clone)]
pub struct HitMap {
    size: Vec2,
    cols: u32,
    xstep: f32,
    ystep: f32,
    bits: Arc<[u8]>,
}

impl HitMap {
    /// `None` when the mask is too small to quantize.
    pub fn new(width: u32, height: u32, bits: Arc<[u8]>) -> Option<Self> {
        if width == 0 || height == 0 || bits.is_empty() {
            return None;
        }
        let mask_bits = (bits.len() * 8) as f64;
        let cols = ((mask_bits * width as f64) / height as f64).sqrt().floor();
        if cols < 1.0 {
            return None;
        }
        let rows = (mask_bits / cols).floor();
        if rows < 1.0 {
            return None;
        }
        Some(Self {
            size: Vec2::new(width as f32, height as f32),
            cols: cols as u32,
            xstep: (width as f64 / cols).ceil() as f32,
            ystep: (height as f64 / rows).ceil() as f32,
            bits,
        })
    }

    pub fn columns(&self) -> u32 {
        self.cols
    }

    pub fn cell_size(&self) -> Vec2 {
        Vec2::new(self.xstep, self.ystep)
    }

    pub fn contains(&self, point: Vec2) -> bool {
        if !rect_contains(self.size, point) {
            return false;
        }
        let index = (point.y / self.ystep).floor() as usize * self.cols as usize
            + (point.x / self.xstep).floor() as usize;
        match self.bits.get(index >> 3) {
            Some(byte) => byte & (1 << (index & 7)) != 0,
            None => false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum HitRegion {
    /// Never hit; used by placeholders.
    Empty,
    /// Axis-aligned box from the local origin.
    Rect(Vec2),
    Mask(HitMap),
    Quad([Vec2; 4]),
}

impl HitRegion {
    /// Pixel-mask region when the image has a usable mask, plain bounds otherwise.
    pub fn for_image(image: &ImageAsset) -> Self {
        let size = Vec2::new(image.width as f32, image.height as f32);
        match &image.hitmap {
            Some(bits) => match HitMap::new(image.width, image.height, bits.clone()) {
                Some(map) => HitRegion::Mask(map),
                None => HitRegion::Rect(size),
            },
            None => HitRegion::Rect(size),
        }
    }

    pub fn contains(&self, point: Vec2) -> bool {
        match self {
            HitRegion::Empty => false,
            HitRegion::Rect(size) => rect_contains(*size, point),
            HitRegion::Mask(map) => map.contains(point),
            HitRegion::Quad(points) => polygon_contains(points, point),
        }
    }
}

fn rect_contains(size: Vec2, point: Vec2) -> bool {
    point.x >= 0.0 && point.y >= 0.0 && point.x < size.x && point.y < size.y
}

fn polygon_contains(points: &[Vec2], point: Vec2) -> bool {
    let mut inside = false;
    let mut j = points.len() - 1;
    for i in 0..points.len() {
        let (a, b) = (points[i], points[j]);
        if (a.y > point.y) != (b.y > point.y) {
            let cross_x = (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x;
            if point.x < cross_x {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantizes_grid_from_mask_size() {
        // 2 bytes = 16 bits over a 4x4 image: 4 columns, 4 rows, 1px cells.
        let map = HitMap::new(4, 4, Arc::from(vec![0b0000_0001u8, 0b1000_0000])).expect("grid");
        assert_eq!(map.columns(), 4);
        assert_eq!(map.cell_size(), Vec2::new(1.0, 1.0));
        assert!(map.contains(Vec2::new(0.5, 0.5)));
        assert!(!map.contains(Vec2::new(1.5, 0.5)));
        assert!(map.contains(Vec2::new(3.5, 3.5)), "bit 15 is the last cell");
        assert!(!map.contains(Vec2::new(4.0, 0.0)), "outside the bounds");
    }

    #[test]
    fn coarse_mask_covers_larger_cells() {
        // 1 byte over a 100x50 image: cols = floor(sqrt(8 * 2)) = 4, rows = 2.
        let map = HitMap::new(100, 50, Arc::from(vec![0b0000_0010u8])).expect("grid");
        assert_eq!(map.columns(), 4);
        assert_eq!(map.cell_size(), Vec2::new(25.0, 25.0));
        assert!(map.contains(Vec2::new(30.0, 10.0)));
        assert!(!map.contains(Vec2::new(10.0, 10.0)));
        assert!(!map.contains(Vec2::new(30.0, 30.0)));
    }

    #[test]
    fn quad_region_is_polygon_test() {
        let quad = HitRegion::Quad([
            Vec2::new(0.0, 0.0),
            Vec2::new(10.0, 0.0),
            Vec2::new(10.0, 10.0),
            Vec2::new(0.0, 10.0),
        ]);
        assert!(quad.contains(Vec2::new(5.0, 5.0)));
        assert!(!quad.contains(Vec2::new(15.0, 5.0)));
        assert!(!HitRegion::Empty.contains(Vec2::ZERO));
    }
}
