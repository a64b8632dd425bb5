//! Temporal block assembly.
//!
//! Face crops are grouped into non-overlapping blocks of [`BLOCK_LEN`]
//! consecutive crops in extraction order; a trailing partial group is
//! dropped. The classifier consumes all blocks as one `(N, H, W, 4, 3)`
//! float tensor scaled to [0, 1].

use rayon::prelude::*;

use crate::error::{MediaError, MediaResult};
use crate::frame::FaceCrop;

/// Crops per temporal block.
pub const BLOCK_LEN: usize = 4;

/// Number of complete blocks `crops` face crops form.
pub fn block_count(crops: usize) -> usize {
    crops / BLOCK_LEN
}

/// Dense `(blocks, size, size, BLOCK_LEN, 3)` classifier input.
#[derive(Clone, PartialEq)]
pub struct BlockTensor {
    data: Vec<f32>,
    blocks: usize,
    crop_size: u32,
}

impl BlockTensor {
    pub fn block_count(&self) -> usize {
        self.blocks
    }

    pub fn is_empty(&self) -> bool {
        self.blocks == 0
    }

    pub fn crop_size(&self) -> u32 {
        self.crop_size
    }

    /// Tensor shape, batch dimension first.
    pub fn shape(&self) -> [usize; 5] {
        let size = self.crop_size as usize;
        [self.blocks, size, size, BLOCK_LEN, 3]
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }
}

impl std::fmt::Debug for BlockTensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockTensor")
            .field("shape", &self.shape())
            .finish()
    }
}

/// Floats one block occupies.
fn block_len(crop_size: u32) -> MediaResult<usize> {
    let size = crop_size as usize;
    size.checked_mul(size)
        .and_then(|px| px.checked_mul(BLOCK_LEN * 3))
        .ok_or_else(|| MediaError::resource_exhausted(format!("Crop size {} overflows", crop_size)))
}

/// Build the classifier input from ordered crops.
///
/// Blocks are filled in parallel, each worker writing its own disjoint slab,
/// so block `b` always holds crops `4b..4b+4`.
pub fn build_block_tensor(crops: &[FaceCrop], crop_size: u32) -> MediaResult<BlockTensor> {
    if let Some(bad) = crops.iter().find(|c| c.size != crop_size) {
        return Err(MediaError::internal(format!(
            "Crop from frame {} is {}px, expected {}px",
            bad.frame_index, bad.size, crop_size
        )));
    }

    let blocks = block_count(crops.len());
    let slab = block_len(crop_size)?;
    let total = slab
        .checked_mul(blocks)
        .ok_or_else(|| MediaError::resource_exhausted("Block tensor size overflows"))?;

    let mut data: Vec<f32> = Vec::new();
    data.try_reserve_exact(total).map_err(|_| {
        MediaError::resource_exhausted(format!(
            "Cannot allocate block tensor of {} floats ({} blocks)",
            total, blocks
        ))
    })?;
    data.resize(total, 0.0);

    if slab > 0 {
        data.par_chunks_mut(slab)
            .zip(crops.par_chunks_exact(BLOCK_LEN))
            .for_each(|(out, group)| fill_block(out, group));
    }

    Ok(BlockTensor {
        data,
        blocks,
        crop_size,
    })
}

/// Interleave four crops into one `(H, W, 4, 3)` slab.
fn fill_block(out: &mut [f32], group: &[FaceCrop]) {
    for (t, crop) in group.iter().enumerate() {
        for (p, px) in crop.pixels().chunks_exact(3).enumerate() {
            let base = (p * BLOCK_LEN + t) * 3;
            out[base] = px[0] as f32 / 255.0;
            out[base + 1] = px[1] as f32 / 255.0;
            out[base + 2] = px[2] as f32 / 255.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dfd_models::ChannelOrder;

    /// Crop whose every byte is `value`.
    fn crop(index: u64, size: u32, value: u8) -> FaceCrop {
        let len = (size * size * 3) as usize;
        FaceCrop::new(index, size, ChannelOrder::Bgr, 0.9, vec![value; len]).unwrap()
    }

    #[test]
    fn test_block_count_drops_remainder() {
        assert_eq!(block_count(0), 0);
        assert_eq!(block_count(3), 0);
        assert_eq!(block_count(4), 1);
        assert_eq!(block_count(10), 2);
    }

    #[test]
    fn test_fewer_than_four_crops_is_empty() {
        let crops: Vec<_> = (0..3).map(|i| crop(i, 2, 10)).collect();
        let tensor = build_block_tensor(&crops, 2).unwrap();
        assert!(tensor.is_empty());
        assert!(tensor.data().is_empty());
        assert_eq!(tensor.shape(), [0, 2, 2, 4, 3]);
    }

    #[test]
    fn test_layout_is_block_height_width_time_channel() {
        // 9 crops: two full blocks, one dropped
        let crops: Vec<_> = (0..9).map(|i| crop(i, 2, (i * 10) as u8)).collect();
        let tensor = build_block_tensor(&crops, 2).unwrap();

        assert_eq!(tensor.shape(), [2, 2, 2, 4, 3]);
        assert_eq!(tensor.data().len(), 2 * 2 * 2 * 4 * 3);

        let [_, h, w, t_len, c_len] = tensor.shape();
        let at = |b: usize, y: usize, x: usize, t: usize, c: usize| {
            tensor.data()[(((b * h + y) * w + x) * t_len + t) * c_len + c]
        };

        for b in 0..2 {
            for t in 0..4 {
                let expected = ((b * 4 + t) * 10) as f32 / 255.0;
                assert!((at(b, 1, 0, t, 2) - expected).abs() < 1e-6);
                assert!((at(b, 0, 1, t, 0) - expected).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_channels_are_kept_in_crop_order() {
        let pixels = [255u8, 0, 51].repeat(1);
        let red = FaceCrop::new(0, 1, ChannelOrder::Rgb, 0.9, pixels).unwrap();
        let crops = vec![red.clone(), red.clone(), red.clone(), red];

        let tensor = build_block_tensor(&crops, 1).unwrap();
        assert_eq!(&tensor.data()[..3], &[1.0, 0.0, 0.2]);
    }

    #[test]
    fn test_default_config_feeds_decoded_bgr_bytes_unchanged() {
        use crate::detector::{extract_crop, CropSpec, SelectedFace};
        use crate::frame::RawFrame;
        use crate::geometry::PixelRect;
        use dfd_models::AnalysisConfig;

        // Decoded frames are BGR: b=10, g=20, r=30
        let frame = RawFrame::new(0, 1, 1, vec![10, 20, 30]).unwrap();
        let spec = CropSpec::from(&AnalysisConfig::default().with_crop_size(1));
        let face = SelectedFace {
            rect: PixelRect {
                x: 0,
                y: 0,
                width: 1,
                height: 1,
            },
            confidence: 0.9,
        };
        let crop = extract_crop(&frame, face, spec).unwrap();
        assert_eq!(crop.order, ChannelOrder::Bgr);

        let crops = vec![crop.clone(), crop.clone(), crop.clone(), crop];
        let tensor = build_block_tensor(&crops, 1).unwrap();
        assert!((tensor.data()[0] - 10.0 / 255.0).abs() < 1e-6);
        assert!((tensor.data()[1] - 20.0 / 255.0).abs() < 1e-6);
        assert!((tensor.data()[2] - 30.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_mismatched_crop_size_is_rejected() {
        let crops = vec![crop(0, 2, 0), crop(1, 3, 0), crop(2, 2, 0), crop(3, 2, 0)];
        assert!(build_block_tensor(&crops, 2).is_err());
    }
}
