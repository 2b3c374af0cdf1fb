//! 由 BraTS 标签图派生区域栈.

use ndarray::{Array4, ArrayView3, Axis};

use crate::consts::Region;

/// 由 `(D, H, W)` 标签图派生 `(R, D, H, W)` 的二值区域栈, 第 `i` 个通道对应 `regions[i]`.
///
/// 标签值可能已经过插值, 因此谓词直接作用于 `f32`.
pub fn label_stack(seg: ArrayView3<f32>, regions: &[Region]) -> Array4<f32> {
    let (d, h, w) = seg.dim();
    let mut out = Array4::<f32>::zeros((regions.len(), d, h, w));
    for (mut ch, region) in out.axis_iter_mut(Axis(0)).zip(regions) {
        let pred = region.predicate();
        ch.zip_mut_with(&seg, |o, &v| {
            if pred(v) {
                *o = 1.0;
            }
        });
    }
    out
}
