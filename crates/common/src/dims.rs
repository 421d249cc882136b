//! Tile axis bookkeeping and physical pixel sizes
//!
//! Tiles arrive with a variable axis order (e.g. `TZCYX`, `CYX`, `XYZCT`).
//! [`DimensionUtils`] answers the questions the segmentation core needs:
//! where an axis lives, whether the tile is volumetric or a time series, and
//! how large a pixel is in physical units.

use crate::{Result, SegmentationError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Named tile axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TileAxis {
    T,
    Z,
    C,
    Y,
    X,
}

impl TileAxis {
    /// Parse a single axis letter (case-insensitive)
    #[must_use]
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'T' => Some(TileAxis::T),
            'Z' => Some(TileAxis::Z),
            'C' => Some(TileAxis::C),
            'Y' => Some(TileAxis::Y),
            'X' => Some(TileAxis::X),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_char(&self) -> char {
        match self {
            TileAxis::T => 'T',
            TileAxis::Z => 'Z',
            TileAxis::C => 'C',
            TileAxis::Y => 'Y',
            TileAxis::X => 'X',
        }
    }
}

impl fmt::Display for TileAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Unit of a physical pixel size. Micrometers are the implicit baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhysicalUnit {
    Nanometer,
    #[default]
    Micrometer,
    Millimeter,
}

impl PhysicalUnit {
    /// Parse a unit symbol as written in image metadata. Unknown symbols
    /// fall back to micrometers.
    #[must_use]
    pub fn from_symbol(symbol: &str) -> Self {
        match symbol.trim() {
            "mm" => PhysicalUnit::Millimeter,
            "nm" => PhysicalUnit::Nanometer,
            _ => PhysicalUnit::Micrometer,
        }
    }

    /// Multiplier converting a value in this unit to micrometers
    #[must_use]
    pub fn to_micrometers(&self) -> f64 {
        match self {
            PhysicalUnit::Nanometer => 0.001,
            PhysicalUnit::Micrometer => 1.0,
            PhysicalUnit::Millimeter => 1000.0,
        }
    }
}

/// Physical extent of one pixel along an axis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicalSize {
    pub value: f64,
    #[serde(default)]
    pub unit: PhysicalUnit,
}

impl PhysicalSize {
    #[must_use]
    pub fn new(value: f64, unit: PhysicalUnit) -> Self {
        Self { value, unit }
    }

    #[must_use]
    pub fn micrometers(value: f64) -> Self {
        Self::new(value, PhysicalUnit::Micrometer)
    }

    /// Size in micrometers
    #[must_use]
    pub fn in_micrometers(&self) -> f64 {
        self.value * self.unit.to_micrometers()
    }
}

/// Dimension queries over the current tile's axis order
pub trait DimensionUtils: Send + Sync {
    /// Position of `axis` in the tile's axis order
    fn dim_idx(&self, axis: TileAxis) -> Option<usize>;

    /// Number of axes in the tile
    fn rank(&self) -> usize;

    /// Whether the tile carries a Z axis
    fn is_volumetric(&self) -> bool {
        self.dim_idx(TileAxis::Z).is_some()
    }

    /// Whether the tile carries a T axis
    fn is_timeseries(&self) -> bool {
        self.dim_idx(TileAxis::T).is_some()
    }

    /// Physical pixel size along `axis`, if known
    fn physical_size(&self, axis: TileAxis) -> Option<PhysicalSize>;
}

/// Axis order and physical sizes of a tile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileDimensions {
    order: Vec<TileAxis>,
    #[serde(default)]
    physical_sizes: HashMap<TileAxis, PhysicalSize>,
}

impl TileDimensions {
    /// Create from an explicit axis order. Y and X are required, axes may
    /// not repeat.
    pub fn new(order: Vec<TileAxis>) -> Result<Self> {
        for (i, axis) in order.iter().enumerate() {
            if order[..i].contains(axis) {
                return Err(SegmentationError::InvalidDimensionOrder(format!(
                    "axis {axis} appears more than once"
                )));
            }
        }
        for required in [TileAxis::Y, TileAxis::X] {
            if !order.contains(&required) {
                return Err(SegmentationError::MissingAxis(required));
            }
        }

        Ok(Self {
            order,
            physical_sizes: HashMap::new(),
        })
    }

    /// Parse a dimension order string such as `"TZCYX"`
    pub fn from_order(order: &str) -> Result<Self> {
        let axes = order
            .chars()
            .map(|c| {
                TileAxis::from_char(c).ok_or_else(|| {
                    SegmentationError::InvalidDimensionOrder(format!(
                        "unknown axis '{c}' in '{order}'"
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(axes)
    }

    /// Attach a physical pixel size to an axis
    #[must_use]
    pub fn with_physical_size(mut self, axis: TileAxis, size: PhysicalSize) -> Self {
        self.physical_sizes.insert(axis, size);
        self
    }

    #[must_use]
    pub fn order(&self) -> &[TileAxis] {
        &self.order
    }

    /// Spatial axes (Z, Y, X) in tile order
    #[must_use]
    pub fn spatial_axes(&self) -> Vec<TileAxis> {
        self.order
            .iter()
            .copied()
            .filter(|a| matches!(a, TileAxis::Z | TileAxis::Y | TileAxis::X))
            .collect()
    }
}

impl DimensionUtils for TileDimensions {
    fn dim_idx(&self, axis: TileAxis) -> Option<usize> {
        self.order.iter().position(|a| *a == axis)
    }

    fn rank(&self) -> usize {
        self.order.len()
    }

    fn physical_size(&self, axis: TileAxis) -> Option<PhysicalSize> {
        self.physical_sizes.get(&axis).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_order() {
        let dims = TileDimensions::from_order("TZCYX").unwrap();
        assert_eq!(dims.rank(), 5);
        assert_eq!(dims.dim_idx(TileAxis::C), Some(2));
        assert_eq!(dims.dim_idx(TileAxis::X), Some(4));
        assert!(dims.is_volumetric());
        assert!(dims.is_timeseries());

        let dims = TileDimensions::from_order("cyx").unwrap();
        assert_eq!(dims.dim_idx(TileAxis::C), Some(0));
        assert!(!dims.is_volumetric());
        assert!(!dims.is_timeseries());
        assert_eq!(dims.spatial_axes(), vec![TileAxis::Y, TileAxis::X]);
    }

    #[test]
    fn test_invalid_orders() {
        assert!(matches!(
            TileDimensions::from_order("CYQ"),
            Err(SegmentationError::InvalidDimensionOrder(_))
        ));
        assert!(matches!(
            TileDimensions::from_order("CYYX"),
            Err(SegmentationError::InvalidDimensionOrder(_))
        ));
        assert!(matches!(
            TileDimensions::from_order("CZY"),
            Err(SegmentationError::MissingAxis(TileAxis::X))
        ));
    }

    #[test]
    fn test_physical_sizes() {
        let dims = TileDimensions::from_order("CYX")
            .unwrap()
            .with_physical_size(TileAxis::X, PhysicalSize::new(0.0005, PhysicalUnit::Millimeter));

        let size = dims.physical_size(TileAxis::X).unwrap();
        assert!((size.in_micrometers() - 0.5).abs() < 1e-12);
        assert!(dims.physical_size(TileAxis::Y).is_none());
    }

    #[test]
    fn test_unit_symbols() {
        assert_eq!(PhysicalUnit::from_symbol("mm"), PhysicalUnit::Millimeter);
        assert_eq!(PhysicalUnit::from_symbol("nm"), PhysicalUnit::Nanometer);
        assert_eq!(PhysicalUnit::from_symbol("µm"), PhysicalUnit::Micrometer);
        assert_eq!(PhysicalUnit::from_symbol(""), PhysicalUnit::Micrometer);
    }
}
