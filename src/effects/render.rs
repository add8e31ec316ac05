// SPDX-License-Identifier: GPL-3.0-only

use crate::color::Color;
use crate::intent::{KeyCoord, PerKeyMap};

/// A dense row-major grid of colors covering the whole matrix. Every
/// hardware write goes through one of these so backends never see a
/// sparse map with implicit "leave unchanged" semantics — missing cells
/// are always filled in before the backend sees them.
#[derive(Debug, Clone)]
pub struct ColorGrid {
    pub rows: u8,
    pub cols: u8,
    cells: Vec<Color>,
}

impl ColorGrid {
    pub fn filled(rows: u8, cols: u8, color: Color) -> ColorGrid {
        ColorGrid { rows, cols, cells: vec![color; usize::from(rows) * usize::from(cols)] }
    }

    fn index(&self, coord: KeyCoord) -> usize { usize::from(coord.row) * usize::from(self.cols) + usize::from(coord.col) }

    pub fn get(&self, coord: KeyCoord) -> Color { self.cells[self.index(coord)] }

    pub fn set(&mut self, coord: KeyCoord, color: Color) {
        if coord.in_bounds(self.rows, self.cols) {
            let idx = self.index(coord);
            self.cells[idx] = color;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (KeyCoord, Color)> + '_ {
        (0..self.rows).flat_map(move |row| (0..self.cols).map(move |col| KeyCoord::new(row, col))).map(move |coord| (coord, self.get(coord)))
    }

    pub fn into_per_key_map(self) -> PerKeyMap {
        let mut map = PerKeyMap::new();
        for (coord, color) in self.iter() {
            map.set(coord, color);
        }
        map
    }

    pub fn average(&self) -> Color {
        let (mut r, mut g, mut b) = (0u64, 0u64, 0u64);
        for color in &self.cells {
            r += u64::from(color.r);
            g += u64::from(color.g);
            b += u64::from(color.b);
        }
        let n = self.cells.len() as u64;
        if n == 0 {
            return Color::BLACK;
        }
        Color::new((r / n) as u8, (g / n) as u8, (b / n) as u8)
    }
}

/// Densifies a sparse per-key override map against a uniform base color,
/// producing a grid that covers every key.
pub fn densify(base: Color, overrides: &PerKeyMap, rows: u8, cols: u8) -> ColorGrid {
    let mut grid = ColorGrid::filled(rows, cols, base);
    for (coord, color) in &overrides.0 {
        grid.set(*coord, *color);
    }
    grid
}

/// Linearly mixes an overlay grid onto a base grid by `weight` (0 = all
/// base, 1 = all overlay) per cell. Used by reactive rendering to blend
/// pulse intensity onto the static backdrop.
pub fn mix(base: &ColorGrid, overlay: &ColorGrid, weight: f32) -> ColorGrid {
    let mut out = ColorGrid::filled(base.rows, base.cols, Color::BLACK);
    for (coord, base_color) in base.iter() {
        let overlay_color = overlay.get(coord);
        out.set(coord, base_color.lerp(overlay_color, weight));
    }
    out
}

/// Scales every non-zero channel of every key by `ratio`, applying the same
/// anti-black-blink promotion as `Color::scale`.
pub fn scale_grid_nonzero(grid: &ColorGrid, ratio: f32) -> ColorGrid {
    let mut out = ColorGrid::filled(grid.rows, grid.cols, Color::BLACK);
    for (coord, color) in grid.iter() {
        out.set(coord, color.scale(ratio, ratio > 0.0));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn densify_fills_missing_cells_with_base() {
        let mut overrides = PerKeyMap::new();
        overrides.set(KeyCoord::new(0, 0), Color::new(255, 0, 0));
        let grid = densify(Color::new(0, 0, 255), &overrides, 2, 2);
        assert_eq!(grid.get(KeyCoord::new(0, 0)), Color::new(255, 0, 0));
        assert_eq!(grid.get(KeyCoord::new(1, 1)), Color::new(0, 0, 255));
    }

    #[test]
    fn mix_at_zero_weight_is_base() {
        let base = ColorGrid::filled(2, 2, Color::new(10, 10, 10));
        let overlay = ColorGrid::filled(2, 2, Color::new(250, 250, 250));
        let mixed = mix(&base, &overlay, 0.0);
        assert_eq!(mixed.get(KeyCoord::new(0, 0)), Color::new(10, 10, 10));
    }

    #[test]
    fn mix_at_full_weight_is_overlay() {
        let base = ColorGrid::filled(2, 2, Color::new(10, 10, 10));
        let overlay = ColorGrid::filled(2, 2, Color::new(250, 250, 250));
        let mixed = mix(&base, &overlay, 1.0);
        assert_eq!(mixed.get(KeyCoord::new(0, 0)), Color::new(250, 250, 250));
    }

    #[test]
    fn scale_grid_never_fully_blanks_nonzero_source() {
        let grid = ColorGrid::filled(1, 1, Color::new(5, 0, 200));
        let scaled = scale_grid_nonzero(&grid, 0.001);
        let color = scaled.get(KeyCoord::new(0, 0));
        assert!(color.r >= 1);
        assert_eq!(color.g, 0);
        assert!(color.b >= 1);
    }

    #[test]
    fn grid_average_is_channelwise_mean() {
        let mut grid = ColorGrid::filled(1, 2, Color::new(0, 0, 0));
        grid.set(KeyCoord::new(0, 0), Color::new(100, 0, 0));
        grid.set(KeyCoord::new(0, 1), Color::new(0, 0, 0));
        assert_eq!(grid.average(), Color::new(50, 0, 0));
    }
}
