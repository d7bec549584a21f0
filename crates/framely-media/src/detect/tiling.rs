//! Tile placement for the multi-scale object pass.

use framely_models::BoundingBox;

/// One tile placement in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub bbox: BoundingBox,
    pub col: u32,
    pub row: u32,
}

/// Compute the tile grid for a frame.
///
/// Placements step by `stride` and are clamped to the frame edge, so the
/// last column/row is anchored at `dim - size` and the union always covers
/// every pixel. A frame smaller than the tile degenerates to one tile.
pub fn tile_grid(frame_w: u32, frame_h: u32, size: u32, stride: u32) -> Vec<Tile> {
    if frame_w == 0 || frame_h == 0 {
        return Vec::new();
    }
    let size = size.max(1);
    let stride = stride.max(1).min(size);

    let xs = axis_offsets(frame_w, size, stride);
    let ys = axis_offsets(frame_h, size, stride);

    let mut tiles = Vec::with_capacity(xs.len() * ys.len());
    for (row, &y) in ys.iter().enumerate() {
        for (col, &x) in xs.iter().enumerate() {
            tiles.push(Tile {
                bbox: BoundingBox::new(x, y, size.min(frame_w - x), size.min(frame_h - y)),
                col: col as u32,
                row: row as u32,
            });
        }
    }
    tiles
}

fn axis_offsets(dim: u32, size: u32, stride: u32) -> Vec<u32> {
    if dim <= size {
        return vec![0];
    }
    let mut offsets = Vec::new();
    let mut pos = 0u32;
    loop {
        if pos + size >= dim {
            offsets.push(dim - size);
            break;
        }
        offsets.push(pos);
        pos += stride;
    }
    offsets
}

/// Fraction of frame pixels covered by the union of the given tiles, 0..1.
///
/// Computed exactly by row-interval union, so overlapping placements are
/// not double counted.
pub fn coverage_fraction(frame_w: u32, frame_h: u32, tiles: &[Tile]) -> f64 {
    if frame_w == 0 || frame_h == 0 {
        return 0.0;
    }
    if tiles.is_empty() {
        return 0.0;
    }

    // Tiles form a grid, so per-row coverage only depends on which tile
    // rows intersect that pixel row; collapse to x-interval unions per
    // distinct y-band.
    let mut y_edges: Vec<u32> = tiles
        .iter()
        .flat_map(|t| [t.bbox.y, t.bbox.bottom().min(frame_h)])
        .collect();
    y_edges.push(0);
    y_edges.push(frame_h);
    y_edges.sort_unstable();
    y_edges.dedup();

    let mut covered = 0u64;
    for band in y_edges.windows(2) {
        let (y0, y1) = (band[0], band[1]);
        if y1 <= y0 {
            continue;
        }
        let mut intervals: Vec<(u32, u32)> = tiles
            .iter()
            .filter(|t| t.bbox.y < y1 && t.bbox.bottom() > y0)
            .map(|t| (t.bbox.x, t.bbox.right().min(frame_w)))
            .collect();
        intervals.sort_unstable();

        let mut row_covered = 0u64;
        let mut reach = 0u32;
        for (x0, x1) in intervals {
            let x0 = x0.max(reach);
            if x1 > x0 {
                row_covered += (x1 - x0) as u64;
                reach = x1;
            } else {
                reach = reach.max(x1);
            }
        }
        covered += row_covered * (y1 - y0) as u64;
    }

    covered as f64 / (frame_w as u64 * frame_h as u64) as f64
}
