//! Cell role classification from fill colors
//!
//! Producing applications mark cells with a small, fixed palette of fill
//! colors. The mapping is a closed lookup over exact RGB triples gathered from
//! Excel 2016 for Mac, Excel 2011 for Mac and Google Sheets; anything else,
//! including cells without a fill, classifies as [`CellRole::None`].

use crate::engine::{Cell, Rgb};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellRole {
    None,
    Input,
    Output,
    Aggregate,
    Action,
    Metadata,
}

const PALETTE: &[(Rgb, CellRole)] = &[
    // Input: Excel 2016 Mac, Excel 2011 Mac, Google Sheets
    (Rgb { r: 0, g: 176, b: 80 }, CellRole::Input),
    (Rgb { r: 0, g: 128, b: 0 }, CellRole::Input),
    (Rgb { r: 0, g: 255, b: 0 }, CellRole::Input),
    // Output: Excel 2016 Mac + Google Sheets
    (Rgb { r: 255, g: 0, b: 0 }, CellRole::Output),
    // Aggregate: Excel 2016 Mac, Excel 2011 Mac, Google Sheets
    (Rgb { r: 0, g: 112, b: 192 }, CellRole::Aggregate),
    (Rgb { r: 51, g: 102, b: 255 }, CellRole::Aggregate),
    (Rgb { r: 0, g: 0, b: 255 }, CellRole::Aggregate),
    // Metadata: Excel 2016 Mac, Excel 2011 Mac, Google Sheets (two shades)
    (Rgb { r: 112, g: 48, b: 160 }, CellRole::Metadata),
    (Rgb { r: 102, g: 0, b: 102 }, CellRole::Metadata),
    (Rgb { r: 153, g: 0, b: 255 }, CellRole::Metadata),
    (Rgb { r: 255, g: 0, b: 255 }, CellRole::Metadata),
    // Action: Excel 2016 Mac
    (Rgb { r: 255, g: 255, b: 0 }, CellRole::Action),
];

/// Classify a cell by its fill foreground color.
pub fn classify(cell: &Cell) -> CellRole {
    match cell.style.fill {
        Some(fill) => classify_fill(fill),
        None => CellRole::None,
    }
}

pub fn classify_fill(fill: Rgb) -> CellRole {
    PALETTE
        .iter()
        .find(|(rgb, _)| *rgb == fill)
        .map(|(_, role)| *role)
        .unwrap_or(CellRole::None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Style;
    use std::sync::Arc;

    #[test]
    fn test_full_palette() {
        for (rgb, role) in PALETTE {
            assert_eq!(classify_fill(*rgb), *role);
        }
    }

    #[test]
    fn test_unknown_fill_is_none() {
        assert_eq!(classify_fill(Rgb::new(1, 2, 3)), CellRole::None);
        assert_eq!(classify_fill(Rgb::new(254, 0, 0)), CellRole::None);
    }

    #[test]
    fn test_cell_without_fill_is_none() {
        let cell = Cell::default();
        assert_eq!(classify(&cell), CellRole::None);
    }

    #[test]
    fn test_cell_with_input_fill() {
        let mut cell = Cell::default();
        cell.style = Arc::new(Style {
            fill: Some(Rgb::new(0, 176, 80)),
            ..Default::default()
        });
        assert_eq!(classify(&cell), CellRole::Input);
    }
}
