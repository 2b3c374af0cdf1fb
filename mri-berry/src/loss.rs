//! 损失函数与评估指标.
//!
//! 所有函数接受 `(B, R, D, H, W)` 的 logits 和同形状的二值区域栈. 区域之间相互独立,
//! logits 经 sigmoid (而非 softmax) 解释为概率. 内部累加一律使用 `f64`.

use ndarray::{Array5, ArrayView3, ArrayView5, Zip};

use crate::consts::{DICE_EPS, DICE_SMOOTH};
use crate::{PipelineError, Result};

#[inline]
fn sigmoid_f64(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// 数值稳定的 sigmoid.
#[inline]
pub fn sigmoid(x: f32) -> f32 {
    sigmoid_f64(x as f64) as f32
}

/// 单个元素的 BCE with logits: `max(x, 0) - x * y + ln(1 + e^{-|x|})`.
#[inline]
fn bce_term(x: f64, y: f64) -> f64 {
    x.max(0.0) - x * y + (-x.abs()).exp().ln_1p()
}

fn check_shape(logits: &ArrayView5<f32>, targets: &ArrayView5<f32>) -> Result<()> {
    if logits.shape() != targets.shape() {
        return Err(PipelineError::shape(
            format!("targets shaped like logits {:?}", logits.shape()),
            targets.shape(),
        ));
    }
    Ok(())
}

/// 逐 `(b, r)` 的软 Dice 统计量: `(sum(p * y), sum(p) + sum(y))`.
fn soft_dice_sums(logits: &ArrayView5<f32>, targets: &ArrayView5<f32>) -> Vec<(f64, f64)> {
    let mut ans = Vec::with_capacity(logits.shape()[0] * logits.shape()[1]);
    for (lb, tb) in logits.outer_iter().zip(targets.outer_iter()) {
        for (l, t) in lb.outer_iter().zip(tb.outer_iter()) {
            let sums = Zip::from(&l).and(&t).fold((0.0, 0.0), |(i, s), &x, &y| {
                let p = sigmoid_f64(x as f64);
                let y = y as f64;
                (i + p * y, s + p + y)
            });
            ans.push(sums);
        }
    }
    ans
}

/// 所有元素上平均的 BCE with logits.
pub fn bce_with_logits(logits: ArrayView5<f32>, targets: ArrayView5<f32>) -> Result<f64> {
    check_shape(&logits, &targets)?;
    if logits.is_empty() {
        return Ok(0.0);
    }
    let sum = Zip::from(&logits)
        .and(&targets)
        .fold(0.0, |acc, &x, &y| acc + bce_term(x as f64, y as f64));
    Ok(sum / logits.len() as f64)
}

/// 软 Dice 损失: 对每个 `(b, r)` 计算 `1 - (2 * sum(p * y) + s) / (sum(p) + sum(y) + s)`,
/// 再在批与区域上取平均.
pub fn soft_dice_loss(logits: ArrayView5<f32>, targets: ArrayView5<f32>, smooth: f64) -> Result<f64> {
    check_shape(&logits, &targets)?;
    let sums = soft_dice_sums(&logits, &targets);
    if sums.is_empty() {
        return Ok(0.0);
    }
    let dice = sums.iter().map(|(i, s)| (2.0 * i + smooth) / (s + smooth)).sum::<f64>();
    Ok(1.0 - dice / sums.len() as f64)
}

/// BCE 与软 Dice 的加权组合损失.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BceDiceLoss {
    bce_weight: f32,
    smooth: f64,
}

impl Default for BceDiceLoss {
    #[inline]
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl BceDiceLoss {
    /// 组合损失 `w * bce + (1 - w) * dice`.
    ///
    /// # 注意
    ///
    /// `bce_weight` 必须位于 `[0, 1]`, 否则程序 panic.
    pub fn new(bce_weight: f32) -> Self {
        assert!((0.0..=1.0).contains(&bce_weight), "BCE 权重越界: {bce_weight}");
        Self {
            bce_weight,
            smooth: DICE_SMOOTH,
        }
    }

    /// BCE 项的权重.
    #[inline]
    pub fn bce_weight(&self) -> f32 {
        self.bce_weight
    }

    /// 计算损失值.
    pub fn loss(&self, logits: ArrayView5<f32>, targets: ArrayView5<f32>) -> Result<f64> {
        let w = self.bce_weight as f64;
        let bce = bce_with_logits(logits.view(), targets.view())?;
        let dice = soft_dice_loss(logits, targets, self.smooth)?;
        Ok(w * bce + (1.0 - w) * dice)
    }

    /// 计算损失值及其对 logits 的梯度.
    pub fn loss_and_grad(&self, logits: ArrayView5<f32>, targets: ArrayView5<f32>) -> Result<(f64, Array5<f32>)> {
        check_shape(&logits, &targets)?;
        let mut grad = Array5::<f32>::zeros(logits.raw_dim());
        if logits.is_empty() {
            return Ok((0.0, grad));
        }

        let w = self.bce_weight as f64;
        let s = self.smooth;
        let n = logits.len() as f64;
        let sums = soft_dice_sums(&logits, &targets);
        let n_dice = sums.len() as f64;

        let mut bce = 0.0;
        let mut dice = 0.0;
        let mut k = 0;
        for ((mut gb, lb), tb) in grad.outer_iter_mut().zip(logits.outer_iter()).zip(targets.outer_iter()) {
            for ((mut g, l), t) in gb.outer_iter_mut().zip(lb.outer_iter()).zip(tb.outer_iter()) {
                let (inter, total) = sums[k];
                k += 1;
                let den = total + s;
                let num = 2.0 * inter + s;
                dice += num / den;

                Zip::from(&mut g).and(&l).and(&t).for_each(|g, &x, &y| {
                    let (x, y) = (x as f64, y as f64);
                    let p = sigmoid_f64(x);
                    bce += bce_term(x, y);
                    let d_bce = (p - y) / n;
                    // d(1 - mean(D)) / dp.
                    let d_dice = -(2.0 * y * den - num) / (den * den) / n_dice;
                    *g = (w * d_bce + (1.0 - w) * d_dice * p * (1.0 - p)) as f32;
                });
            }
        }

        let loss = w * bce / n + (1.0 - w) * (1.0 - dice / n_dice);
        Ok((loss, grad))
    }
}

/// 阈值化后的 hard Dice: 对每个 `(b, r)` 计算 `2 * |P ∩ Y| / (|P| + |Y| + eps)`,
/// 再在批与区域上取平均. `P` 为 `sigmoid(logits) > threshold` 的体素.
pub fn dice_score(logits: ArrayView5<f32>, targets: ArrayView5<f32>, threshold: f32) -> Result<f64> {
    check_shape(&logits, &targets)?;
    let mut total = 0.0;
    let mut count = 0usize;
    for (lb, tb) in logits.outer_iter().zip(targets.outer_iter()) {
        for (l, t) in lb.outer_iter().zip(tb.outer_iter()) {
            let pred = l.mapv(|x| if sigmoid(x) > threshold { 1.0 } else { 0.0 });
            total += dice_coefficient(pred.view(), t);
            count += 1;
        }
    }
    Ok(if count == 0 { 0.0 } else { total / count as f64 })
}

/// 两个二值掩膜之间的 Dice 系数 (值 `> 0.5` 视为前景).
///
/// `eps` 只出现在分母中: 不相交的掩膜得分恰为 0, 两者皆空时得分同样为 0.
pub fn dice_coefficient(pred: ArrayView3<f32>, target: ArrayView3<f32>) -> f64 {
    let (inter, total) = Zip::from(&pred).and(&target).fold((0usize, 0usize), |(i, s), &p, &y| {
        let (p, y) = (p > 0.5, y > 0.5);
        (i + (p && y) as usize, s + p as usize + y as usize)
    });
    2.0 * inter as f64 / (total as f64 + DICE_EPS)
}
