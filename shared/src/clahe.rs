//! Contrast-limited adaptive histogram equalization over 8-bit grayscale.
//!
//! The image is divided into a grid of tiles; each tile gets its own
//! clipped-histogram lookup table, and pixels are mapped by bilinear
//! interpolation between the tables of the four surrounding tiles.

use image::{GrayImage, Luma};

/// Applies CLAHE with the given clip limit and tile grid.
///
/// `clip_limit` is expressed relative to a uniform histogram, as in the
/// usual formulation: the per-bin cap is `clip_limit * tile_area / 256`.
/// Tile counts larger than the image extent are clamped.
pub fn apply(image: &GrayImage, clip_limit: f32, tiles_x: u32, tiles_y: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    let tiles_x = tiles_x.clamp(1, width.max(1)) as usize;
    let tiles_y = tiles_y.clamp(1, height.max(1)) as usize;

    let x_bounds = tile_bounds(width, tiles_x);
    let y_bounds = tile_bounds(height, tiles_y);

    let mut luts = vec![[0u8; 256]; tiles_x * tiles_y];
    for ty in 0..tiles_y {
        let (y0, y1) = y_bounds[ty];
        for tx in 0..tiles_x {
            let (x0, x1) = x_bounds[tx];
            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[image.get_pixel(x, y)[0] as usize] += 1;
                }
            }
            let area = ((x1 - x0) * (y1 - y0)) as f32;
            clip_histogram(&mut hist, clip_limit, area);

            let scale = 255.0 / area;
            let mut cumulative = 0u32;
            let lut = &mut luts[ty * tiles_x + tx];
            for (value, bin) in hist.iter().enumerate() {
                cumulative += bin;
                lut[value] = (cumulative as f32 * scale).round().min(255.0) as u8;
            }
        }
    }

    let centers_x = tile_centers(&x_bounds);
    let centers_y = tile_centers(&y_bounds);

    let mut out = GrayImage::new(width, height);
    for y in 0..height {
        let (ty0, ty1, wy) = neighbors(&centers_y, y as f32);
        for x in 0..width {
            let (tx0, tx1, wx) = neighbors(&centers_x, x as f32);
            let v = image.get_pixel(x, y)[0] as usize;

            let top = lerp(
                luts[ty0 * tiles_x + tx0][v] as f32,
                luts[ty0 * tiles_x + tx1][v] as f32,
                wx,
            );
            let bottom = lerp(
                luts[ty1 * tiles_x + tx0][v] as f32,
                luts[ty1 * tiles_x + tx1][v] as f32,
                wx,
            );
            let mapped = lerp(top, bottom, wy).round().clamp(0.0, 255.0) as u8;
            out.put_pixel(x, y, Luma([mapped]));
        }
    }
    out
}

/// Splits `extent` into `tiles` contiguous half-open ranges.
fn tile_bounds(extent: u32, tiles: usize) -> Vec<(u32, u32)> {
    (0..tiles)
        .map(|i| {
            let start = (extent as u64 * i as u64 / tiles as u64) as u32;
            let end = (extent as u64 * (i as u64 + 1) / tiles as u64) as u32;
            (start, end)
        })
        .collect()
}

fn tile_centers(bounds: &[(u32, u32)]) -> Vec<f32> {
    bounds
        .iter()
        .map(|&(start, end)| (start + end) as f32 / 2.0 - 0.5)
        .collect()
}

/// Finds the two tile centers surrounding `pos` and the interpolation
/// weight towards the second one. Positions outside the outermost centers
/// clamp to the border tile.
fn neighbors(centers: &[f32], pos: f32) -> (usize, usize, f32) {
    let last = centers.len() - 1;
    if pos <= centers[0] {
        return (0, 0, 0.0);
    }
    if pos >= centers[last] {
        return (last, last, 0.0);
    }
    let mut i = 0;
    while centers[i + 1] < pos {
        i += 1;
    }
    let span = centers[i + 1] - centers[i];
    (i, i + 1, (pos - centers[i]) / span)
}

fn lerp(a: f32, b: f32, w: f32) -> f32 {
    a + (b - a) * w
}

/// Caps every bin at the clip limit and spreads the excess uniformly.
fn clip_histogram(hist: &mut [u32; 256], clip_limit: f32, area: f32) {
    let limit = (clip_limit * area / 256.0).max(1.0) as u32;

    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }

    let bonus = excess / 256;
    let mut remainder = excess % 256;
    for bin in hist.iter_mut() {
        *bin += bonus;
        if remainder > 0 {
            *bin += 1;
            remainder -= 1;
        }
    }
}
