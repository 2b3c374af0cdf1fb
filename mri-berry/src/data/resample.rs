//! 体数据缩放重采样.
//!
//! 网格两端对齐: 输出第 `i` 个采样点对应输入坐标 `i * (in - 1) / (out - 1)`.
//! 线性插值是可分离的, 因此三线性插值按轴依次做一维插值即可.

use ndarray::{Array3, ArrayView3, Axis, Zip};

/// 插值方式.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Interpolation {
    /// 线性插值 (三维上即三线性插值).
    Linear,

    /// 最近邻插值.
    Nearest,
}

/// 单个输出采样点的插值系数: `out = in[i0] * (1 - t) + in[i1] * t`.
#[derive(Copy, Clone, Debug)]
struct Tap {
    i0: usize,
    i1: usize,
    t: f32,
}

/// 计算长度 `len_in -> len_out` 时所有输出采样点的插值系数.
fn taps(len_in: usize, len_out: usize, interp: Interpolation) -> Vec<Tap> {
    debug_assert_ne!(len_in, 0);
    let step = if len_out > 1 {
        (len_in - 1) as f64 / (len_out - 1) as f64
    } else {
        0.0
    };
    let last = len_in - 1;
    (0..len_out)
        .map(|i| {
            let c = (i as f64 * step).min(last as f64);
            match interp {
                Interpolation::Nearest => {
                    let i0 = (c.round() as usize).min(last);
                    Tap { i0, i1: i0, t: 0.0 }
                }
                Interpolation::Linear => {
                    let i0 = c.floor() as usize;
                    let i1 = (i0 + 1).min(last);
                    Tap {
                        i0,
                        i1,
                        t: (c - i0 as f64) as f32,
                    }
                }
            }
        })
        .collect()
}

/// 沿 `axis` 将 `src` 缩放到长度 `len_out`.
fn zoom_axis(src: ArrayView3<f32>, axis: usize, len_out: usize, interp: Interpolation) -> Array3<f32> {
    let mut shape = src.raw_dim();
    shape[axis] = len_out;
    let mut dst = Array3::<f32>::zeros(shape);
    let len_in = src.len_of(Axis(axis));
    if len_in == 0 || len_out == 0 {
        return dst;
    }

    let taps = taps(len_in, len_out, interp);
    let zip = Zip::from(dst.lanes_mut(Axis(axis))).and(src.lanes(Axis(axis)));
    let op = |mut out: ndarray::ArrayViewMut1<f32>, inp: ndarray::ArrayView1<f32>| {
        for (o, tap) in out.iter_mut().zip(taps.iter()) {
            *o = if tap.t == 0.0 {
                inp[tap.i0]
            } else {
                inp[tap.i0] * (1.0 - tap.t) + inp[tap.i1] * tap.t
            };
        }
    };

    #[cfg(feature = "rayon")]
    zip.par_for_each(op);
    #[cfg(not(feature = "rayon"))]
    zip.for_each(op);
    dst
}

/// 按每个轴的缩放系数 `factors` 对 `(D, H, W)` 数据重采样. 不修改输入.
///
/// 输出形状为 `round(shape[axis] * factors[axis])`. 缩放系数为 1 的轴保持原样,
/// 因此当所有系数均为 1 时输出与输入逐体素相同.
///
/// # 注意
///
/// 不对缩放系数做任何检查. 零、负数或非有限系数会产生空的或无意义的输出.
pub fn zoom(data: ArrayView3<f32>, factors: [f64; 3], interp: Interpolation) -> Array3<f32> {
    let (d, h, w) = data.dim();
    let out = [
        (d as f64 * factors[0]).round() as usize,
        (h as f64 * factors[1]).round() as usize,
        (w as f64 * factors[2]).round() as usize,
    ];
    log::debug!("zoom {:?} -> {out:?} ({interp:?})", (d, h, w));

    let mut cur = data.to_owned();
    for (axis, len_out) in out.into_iter().enumerate() {
        if cur.len_of(Axis(axis)) != len_out {
            cur = zoom_axis(cur.view(), axis, len_out, interp);
        }
    }
    cur
}
