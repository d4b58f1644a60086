//! Tiled processing with read-only halos

use crate::types::{SarError, SarRealImage, SarResult};
use ndarray::{s, Array2};

/// A tile: a core region that is written plus a halo that is only read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    /// Row offset of the padded region in the source raster
    pub row_offset: usize,
    /// Column offset of the padded region in the source raster
    pub col_offset: usize,
    /// Padded rows
    pub rows: usize,
    /// Padded columns
    pub cols: usize,
    pub core_row_offset: usize,
    pub core_col_offset: usize,
    pub core_rows: usize,
    pub core_cols: usize,
}

impl Tile {
    /// Core bounds in tile-local coordinates (start_row, start_col, end_row, end_col)
    pub fn core_bounds(&self) -> (usize, usize, usize, usize) {
        let start_row = self.core_row_offset - self.row_offset;
        let start_col = self.core_col_offset - self.col_offset;
        (start_row, start_col, start_row + self.core_rows, start_col + self.core_cols)
    }

    /// Copy of the padded region of `array`
    pub fn extract<T: Clone>(&self, array: &Array2<T>) -> Array2<T> {
        array
            .slice(s![
                self.row_offset..self.row_offset + self.rows,
                self.col_offset..self.col_offset + self.cols
            ])
            .to_owned()
    }
}

/// Iterator over non-overlapping cores covering a raster, each padded by the halo
pub struct TileIterator {
    total_rows: usize,
    total_cols: usize,
    tile_size: usize,
    halo: usize,
    current_row: usize,
    current_col: usize,
}

impl TileIterator {
    pub fn new(total_rows: usize, total_cols: usize, tile_size: usize, halo: usize) -> Self {
        Self {
            total_rows,
            total_cols,
            tile_size: tile_size.max(1),
            halo,
            current_row: 0,
            current_col: 0,
        }
    }
}

impl Iterator for TileIterator {
    type Item = Tile;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_row >= self.total_rows || self.total_cols == 0 {
            return None;
        }

        let core_rows = self.tile_size.min(self.total_rows - self.current_row);
        let core_cols = self.tile_size.min(self.total_cols - self.current_col);

        let row_start = self.current_row.saturating_sub(self.halo);
        let col_start = self.current_col.saturating_sub(self.halo);
        let row_end = (self.current_row + core_rows + self.halo).min(self.total_rows);
        let col_end = (self.current_col + core_cols + self.halo).min(self.total_cols);

        let tile = Tile {
            row_offset: row_start,
            col_offset: col_start,
            rows: row_end - row_start,
            cols: col_end - col_start,
            core_row_offset: self.current_row,
            core_col_offset: self.current_col,
            core_rows,
            core_cols,
        };

        self.current_col += self.tile_size;
        if self.current_col >= self.total_cols {
            self.current_col = 0;
            self.current_row += self.tile_size;
        }

        Some(tile)
    }
}

/// Runs a per-tile band operation and stitches the cores back together
#[derive(Debug, Clone, Copy)]
pub struct TiledProcessor {
    tile_size: usize,
    halo: usize,
}

impl TiledProcessor {
    pub fn new(tile_size: usize, halo: usize) -> SarResult<Self> {
        if tile_size == 0 {
            return Err(SarError::Configuration("Tile size must be positive".to_string()));
        }
        Ok(Self { tile_size, halo })
    }

    pub fn halo(&self) -> usize {
        self.halo
    }

    pub fn tiles(&self, shape: (usize, usize)) -> Vec<Tile> {
        TileIterator::new(shape.0, shape.1, self.tile_size, self.halo).collect()
    }

    /// Apply `f` to every padded tile; `f` must return an array of the padded tile's shape
    pub fn process<F>(&self, shape: (usize, usize), f: F) -> SarResult<SarRealImage>
    where
        F: Fn(&Tile) -> SarResult<SarRealImage> + Sync + Send,
    {
        let tiles = self.tiles(shape);
        log::debug!(
            "Processing {} tiles of {}x{} with halo {}",
            tiles.len(),
            self.tile_size,
            self.tile_size,
            self.halo
        );

        #[cfg(feature = "parallel")]
        let results: Vec<(Tile, SarRealImage)> = {
            use rayon::prelude::*;
            tiles
                .into_par_iter()
                .map(|tile| f(&tile).map(|out| (tile, out)))
                .collect::<SarResult<Vec<_>>>()?
        };

        #[cfg(not(feature = "parallel"))]
        let results: Vec<(Tile, SarRealImage)> = tiles
            .into_iter()
            .map(|tile| f(&tile).map(|out| (tile, out)))
            .collect::<SarResult<Vec<_>>>()?;

        let mut output = Array2::<f32>::from_elem(shape, f32::NAN);
        for (tile, out) in results {
            if out.dim() != (tile.rows, tile.cols) {
                return Err(SarError::Processing(format!(
                    "Tile result shape {:?} differs from tile shape {:?}",
                    out.dim(),
                    (tile.rows, tile.cols)
                )));
            }
            let (r0, c0, r1, c1) = tile.core_bounds();
            output
                .slice_mut(s![
                    tile.core_row_offset..tile.core_row_offset + tile.core_rows,
                    tile.core_col_offset..tile.core_col_offset + tile.core_cols
                ])
                .assign(&out.slice(s![r0..r1, c0..c1]));
        }

        Ok(output)
    }
}
