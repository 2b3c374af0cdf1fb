//! 形状规范化: 逐轴独立的中心裁剪 / 零填充.

use ndarray::{s, Array4, ArrayView4, ArrayViewD, Ix4};
use num::Zero;

use crate::{Idx3d, PipelineError, Result};

/// 单轴上的对齐方式: 从源的 `src` 处拷贝 `len` 个元素到目标的 `dst` 处.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct AxisPlan {
    src: usize,
    dst: usize,
    len: usize,
}

impl AxisPlan {
    /// `from >= to` 时从 `(from - to) / 2` 处开始裁剪, 否则在前端填充 `(to - from) / 2` 个零
    /// (奇数时多出的一个零位于末端).
    #[inline]
    fn new(from: usize, to: usize) -> Self {
        if from >= to {
            Self {
                src: (from - to) / 2,
                dst: 0,
                len: to,
            }
        } else {
            Self {
                src: 0,
                dst: (to - from) / 2,
                len: from,
            }
        }
    }
}

/// 将 `(C, D, H, W)` 数据的空间维度规范到 `target`, 通道维不变.
///
/// 每个空间轴独立处理: 过长的轴居中裁剪, 过短的轴居中零填充. 结果在已规范的输入上幂等.
pub fn center_crop_or_pad<A: Clone + Zero>(data: ArrayView4<A>, target: Idx3d) -> Array4<A> {
    let (c, d, h, w) = data.dim();
    let (td, th, tw) = target;
    let pd = AxisPlan::new(d, td);
    let ph = AxisPlan::new(h, th);
    let pw = AxisPlan::new(w, tw);

    let mut out = Array4::<A>::zeros((c, td, th, tw));
    out.slice_mut(s![
        ..,
        pd.dst..pd.dst + pd.len,
        ph.dst..ph.dst + ph.len,
        pw.dst..pw.dst + pw.len
    ])
    .assign(&data.slice(s![
        ..,
        pd.src..pd.src + pd.len,
        ph.src..ph.src + ph.len,
        pw.src..pw.src + pw.len
    ]));
    out
}

/// 同 [`center_crop_or_pad`], 但接受任意维度的输入. 输入不是 4 维时返回
/// [`PipelineError::ShapeMismatch`].
pub fn try_center_crop_or_pad(data: ArrayViewD<f32>, target: Idx3d) -> Result<Array4<f32>> {
    let shape = data.shape().to_vec();
    let data = data
        .into_dimensionality::<Ix4>()
        .map_err(|_| PipelineError::shape("a 4D (C, D, H, W) array", &shape))?;
    Ok(center_crop_or_pad(data, target))
}
