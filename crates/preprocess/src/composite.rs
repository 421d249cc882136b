//! Channel compositing
//!
//! A tile selection is reduced to a channel stack in canonical `(C, Z, Y, X)`
//! order. Each model then composites the channels it listens to by taking the
//! elementwise maximum.

use cellfuse_common::{DimensionUtils, Result, SegmentationError, TileAxis, Volume};
use ndarray::{ArrayD, ArrayView4, ArrayViewD, Axis, Ix3, Ix4, Slice, Zip};
use std::ops::Range;
use tracing::debug;

/// Region of a tile processed in one invocation, one range per tile axis
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileSelection {
    ranges: Vec<Range<usize>>,
}

impl TileSelection {
    #[must_use]
    pub fn new(ranges: Vec<Range<usize>>) -> Self {
        Self { ranges }
    }

    /// Select the whole tile
    #[must_use]
    pub fn full(shape: &[usize]) -> Self {
        Self {
            ranges: shape.iter().map(|&len| 0..len).collect(),
        }
    }

    #[must_use]
    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }
}

/// Selected tile region with time removed and axes in `(C, Z, Y, X)` order
#[derive(Debug, Clone)]
pub struct ChannelStack<'a> {
    data: ArrayView4<'a, f32>,
    volumetric: bool,
}

impl<'a> ChannelStack<'a> {
    /// Cut `selection` out of `tile` and bring it into canonical order.
    ///
    /// # Errors
    /// Returns an error when the tile, its dimension order and the selection
    /// disagree, when the tile has no channel axis, or when more than one
    /// time point is selected.
    pub fn select(
        tile: ArrayViewD<'a, f32>,
        dims: &dyn DimensionUtils,
        selection: &TileSelection,
    ) -> Result<Self> {
        if tile.ndim() != dims.rank() {
            return Err(SegmentationError::RankMismatch {
                expected: dims.rank(),
                actual: tile.ndim(),
            });
        }

        let ranges = selection.ranges();
        if ranges.len() != tile.ndim() {
            return Err(SegmentationError::InvalidSelection(format!(
                "{} ranges for a tile with {} axes",
                ranges.len(),
                tile.ndim()
            )));
        }
        for (axis, (range, &len)) in ranges.iter().zip(tile.shape()).enumerate() {
            if range.start >= range.end || range.end > len {
                return Err(SegmentationError::InvalidSelection(format!(
                    "range {range:?} on axis {axis} (length {len})"
                )));
            }
        }

        if dims.dim_idx(TileAxis::C).is_none() {
            return Err(SegmentationError::MissingAxis(TileAxis::C));
        }

        let mut view = tile;
        view.slice_each_axis_inplace(|desc| Slice::from(ranges[desc.axis.index()].clone()));

        // Axis order of `view` as it is reduced
        let mut axes: Vec<TileAxis> = (0..dims.rank())
            .map(|i| axis_at(dims, i))
            .collect::<Result<_>>()?;

        if let Some(time_idx) = dims.dim_idx(TileAxis::T) {
            if view.len_of(Axis(time_idx)) != 1 {
                return Err(SegmentationError::InvalidSelection(format!(
                    "{} time points selected, expected 1",
                    view.len_of(Axis(time_idx))
                )));
            }
            view = view.index_axis_move(Axis(time_idx), 0);
            axes.remove(time_idx);
        }

        let position = |axis: TileAxis| axes.iter().position(|a| *a == axis);
        let y_idx = position(TileAxis::Y).ok_or(SegmentationError::MissingAxis(TileAxis::Y))?;
        let x_idx = position(TileAxis::X).ok_or(SegmentationError::MissingAxis(TileAxis::X))?;
        let c_idx = position(TileAxis::C).ok_or(SegmentationError::MissingAxis(TileAxis::C))?;

        let view = match position(TileAxis::Z) {
            Some(z_idx) => view.permuted_axes(vec![c_idx, z_idx, y_idx, x_idx]),
            None => view
                .permuted_axes(vec![c_idx, y_idx, x_idx])
                .insert_axis(Axis(1)),
        };

        let data = view
            .into_dimensionality::<Ix4>()
            .map_err(|e| SegmentationError::Other(e.to_string()))?;
        let volumetric = dims.is_volumetric() && data.len_of(Axis(1)) > 1;

        debug!(
            "Selected channel stack {:?} (volumetric: {})",
            data.shape(),
            volumetric
        );

        Ok(Self { data, volumetric })
    }

    /// Number of channels in the stack
    #[must_use]
    pub fn channels(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    /// `(Z, Y, X)` shape of every volume and label mask derived from this stack
    #[must_use]
    pub fn spatial_shape(&self) -> (usize, usize, usize) {
        let shape = self.data.shape();
        (shape[1], shape[2], shape[3])
    }

    /// Whether more than one Z plane was selected from a volumetric tile
    #[must_use]
    pub fn is_volumetric(&self) -> bool {
        self.volumetric
    }

    #[must_use]
    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }

    /// Composite `channels` into one `(Z, Y, X)` volume.
    ///
    /// Returns `Ok(None)` when `channels` is empty.
    pub fn composite(&self, channels: &[usize]) -> Result<Option<Volume>> {
        composite_channels(&self.data.view().into_dyn(), channels, 0)?
            .map(|v| {
                v.into_dimensionality::<Ix3>()
                    .map_err(|e| SegmentationError::Other(e.to_string()))
            })
            .transpose()
    }
}

fn axis_at(dims: &dyn DimensionUtils, index: usize) -> Result<TileAxis> {
    [TileAxis::T, TileAxis::Z, TileAxis::C, TileAxis::Y, TileAxis::X]
        .into_iter()
        .find(|axis| dims.dim_idx(*axis) == Some(index))
        .ok_or_else(|| {
            SegmentationError::InvalidDimensionOrder(format!("no axis at position {index}"))
        })
}

/// Elementwise maximum over `channels` taken along `channel_axis`.
///
/// Returns `Ok(None)` for an empty channel list.
///
/// # Errors
/// Returns [`SegmentationError::ChannelOutOfRange`] for an index past the
/// channel axis.
pub fn composite_channels(
    view: &ArrayViewD<'_, f32>,
    channels: &[usize],
    channel_axis: usize,
) -> Result<Option<ArrayD<f32>>> {
    let available = view.len_of(Axis(channel_axis));
    if let Some(&channel) = channels.iter().find(|&&c| c >= available) {
        return Err(SegmentationError::ChannelOutOfRange { channel, available });
    }

    let Some((&first, rest)) = channels.split_first() else {
        return Ok(None);
    };

    let mut composite = view.index_axis(Axis(channel_axis), first).to_owned();
    for &channel in rest {
        Zip::from(&mut composite)
            .and(view.index_axis(Axis(channel_axis), channel))
            .for_each(|acc, &v| {
                if v > *acc {
                    *acc = v;
                }
            });
    }

    Ok(Some(composite))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellfuse_common::TileDimensions;
    use ndarray::{Array, IxDyn};

    fn tile_cyx() -> ArrayD<f32> {
        // 3 channels, 2x2 pixels
        Array::from_shape_vec(
            IxDyn(&[3, 2, 2]),
            vec![
                1.0, 5.0, 3.0, 0.0, //
                4.0, 2.0, 3.0, 1.0, //
                0.0, 0.0, 9.0, 0.5,
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_composite_is_elementwise_max() {
        let tile = tile_cyx();
        let out = composite_channels(&tile.view(), &[0, 1], 0)
            .unwrap()
            .unwrap();
        assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![4.0, 5.0, 3.0, 1.0]);

        let out = composite_channels(&tile.view(), &[2, 0, 1], 0)
            .unwrap()
            .unwrap();
        assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![4.0, 5.0, 9.0, 1.0]);
    }

    #[test]
    fn test_composite_empty_channels_is_none() {
        let tile = tile_cyx();
        assert!(composite_channels(&tile.view(), &[], 0).unwrap().is_none());
    }

    #[test]
    fn test_composite_out_of_range_channel() {
        let tile = tile_cyx();
        let err = composite_channels(&tile.view(), &[0, 3], 0).unwrap_err();
        assert!(matches!(
            err,
            SegmentationError::ChannelOutOfRange {
                channel: 3,
                available: 3
            }
        ));
    }

    #[test]
    fn test_select_2d_tile() {
        let tile = tile_cyx();
        let dims = TileDimensions::from_order("CYX").unwrap();
        let stack =
            ChannelStack::select(tile.view(), &dims, &TileSelection::full(tile.shape())).unwrap();

        assert_eq!(stack.channels(), 3);
        assert_eq!(stack.spatial_shape(), (1, 2, 2));
        assert!(!stack.is_volumetric());

        let vol = stack.composite(&[0, 2]).unwrap().unwrap();
        assert_eq!(vol[[0, 1, 0]], 9.0);
        assert_eq!(vol[[0, 0, 1]], 5.0);
    }

    #[test]
    fn test_select_reorders_axes_and_drops_time() {
        // XYZCT order: X=3, Y=2, Z=2, C=2, T=2
        let tile = Array::from_shape_fn(IxDyn(&[3, 2, 2, 2, 2]), |idx| {
            let (x, y, z, c, t) = (idx[0], idx[1], idx[2], idx[3], idx[4]);
            (t * 10000 + c * 1000 + z * 100 + y * 10 + x) as f32
        });
        let dims = TileDimensions::from_order("XYZCT").unwrap();
        let selection = TileSelection::new(vec![0..3, 0..2, 0..2, 0..2, 1..2]);
        let stack = ChannelStack::select(tile.view(), &dims, &selection).unwrap();

        assert_eq!(stack.channels(), 2);
        assert_eq!(stack.spatial_shape(), (2, 2, 3));
        assert!(stack.is_volumetric());
        assert_eq!(stack.view()[[1, 1, 0, 2]], 11102.0);
    }

    #[test]
    fn test_select_rejects_multiple_time_points() {
        let tile = ArrayD::<f32>::zeros(IxDyn(&[2, 1, 4, 4]));
        let dims = TileDimensions::from_order("TCYX").unwrap();
        let err = ChannelStack::select(tile.view(), &dims, &TileSelection::full(tile.shape()))
            .unwrap_err();
        assert!(matches!(err, SegmentationError::InvalidSelection(_)));
    }

    #[test]
    fn test_select_validates_shape() {
        let tile = ArrayD::<f32>::zeros(IxDyn(&[1, 4, 4]));
        let dims = TileDimensions::from_order("ZCYX").unwrap();
        assert!(matches!(
            ChannelStack::select(tile.view(), &dims, &TileSelection::full(&[1, 1, 4, 4])),
            Err(SegmentationError::RankMismatch { .. })
        ));

        let dims = TileDimensions::from_order("CYX").unwrap();
        let selection = TileSelection::new(vec![0..1, 0..5, 0..4]);
        assert!(matches!(
            ChannelStack::select(tile.view(), &dims, &selection),
            Err(SegmentationError::InvalidSelection(_))
        ));

        let dims = TileDimensions::from_order("ZYX").unwrap();
        assert!(matches!(
            ChannelStack::select(tile.view(), &dims, &TileSelection::full(tile.shape())),
            Err(SegmentationError::MissingAxis(TileAxis::C))
        ));
    }
}
