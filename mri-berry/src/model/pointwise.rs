//! 逐体素线性模型及其 AdamW 优化器.

use ndarray::{Array1, Array2, Array5, ArrayView5, Axis, Zip};
use serde::{Deserialize, Serialize};

use super::{check_input, SegmentationModel, TrainableModel};
use crate::{PipelineError, Result};

/// AdamW 优化器的可持久化状态.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AdamWState {
    /// 已执行的步数.
    pub step: u64,

    /// 一阶矩估计.
    pub m: Vec<f32>,

    /// 二阶矩估计.
    pub v: Vec<f32>,
}

/// 解耦权重衰减的 Adam 优化器, 作用于扁平化的参数向量.
#[derive(Clone, Debug, PartialEq)]
pub struct AdamW {
    learning_rate: f64,
    weight_decay: f64,
    beta_1: f64,
    beta_2: f64,
    epsilon: f64,
    state: AdamWState,
}

impl AdamW {
    /// 以默认的 `beta = (0.9, 0.999)`, `epsilon = 1e-8` 创建.
    pub fn new(learning_rate: f64, weight_decay: f64) -> Self {
        Self {
            learning_rate,
            weight_decay,
            beta_1: 0.9,
            beta_2: 0.999,
            epsilon: 1e-8,
            state: AdamWState::default(),
        }
    }

    /// 学习率.
    #[inline]
    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// 设置学习率.
    #[inline]
    pub fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }

    /// 按梯度 `grads` 原地更新 `params`.
    ///
    /// # 注意
    ///
    /// `params` 与 `grads` 长度必须一致, 否则程序 panic.
    pub fn step(&mut self, params: &mut [f32], grads: &[f32]) {
        assert_eq!(params.len(), grads.len());
        let st = &mut self.state;
        if st.m.len() != params.len() {
            st.m = vec![0.0; params.len()];
            st.v = vec![0.0; params.len()];
        }
        st.step += 1;

        let (b1, b2) = (self.beta_1, self.beta_2);
        let bias_1 = 1.0 - b1.powi(st.step as i32);
        let bias_2 = 1.0 - b2.powi(st.step as i32);
        let lr = self.learning_rate;
        for (((p, &g), m), v) in params.iter_mut().zip(grads).zip(st.m.iter_mut()).zip(st.v.iter_mut()) {
            let g = g as f64;
            let mut x = *p as f64 * (1.0 - lr * self.weight_decay);
            let m_t = b1 * *m as f64 + (1.0 - b1) * g;
            let v_t = b2 * *v as f64 + (1.0 - b2) * g * g;
            x -= lr * (m_t / bias_1) / ((v_t / bias_2).sqrt() + self.epsilon);
            *m = m_t as f32;
            *v = v_t as f32;
            *p = x as f32;
        }
    }

    /// 导出优化器状态.
    #[inline]
    pub fn state(&self) -> &AdamWState {
        &self.state
    }

    /// 载入优化器状态.
    #[inline]
    pub fn load_state(&mut self, state: AdamWState) {
        self.state = state;
    }
}

/// [`PointwiseModel`] 的可持久化状态.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointwiseState {
    /// `(R, C)` 权重.
    pub weight: Array2<f32>,

    /// `(R,)` 偏置.
    pub bias: Array1<f32>,

    /// 优化器状态.
    pub optimizer: AdamWState,
}

/// 逐体素 (1×1×1) 线性模型: `logit[r] = bias[r] + sum_c weight[r, c] * x[c]`.
///
/// 作为最小的可训练基线, 用于端到端地驱动训练循环、检查点与推理.
/// 参数零初始化, 因此初始输出概率处处为 0.5.
#[derive(Clone, Debug)]
pub struct PointwiseModel {
    weight: Array2<f32>,
    bias: Array1<f32>,
    optim: AdamW,
}

impl PointwiseModel {
    /// 创建 `in_channels -> out_channels` 的模型.
    pub fn new(in_channels: usize, out_channels: usize, optim: AdamW) -> Self {
        Self {
            weight: Array2::zeros((out_channels, in_channels)),
            bias: Array1::zeros(out_channels),
            optim,
        }
    }

    /// 权重.
    #[inline]
    pub fn weight(&self) -> &Array2<f32> {
        &self.weight
    }

    /// 偏置.
    #[inline]
    pub fn bias(&self) -> &Array1<f32> {
        &self.bias
    }
}

impl SegmentationModel for PointwiseModel {
    #[inline]
    fn in_channels(&self) -> usize {
        self.weight.ncols()
    }

    #[inline]
    fn out_channels(&self) -> usize {
        self.weight.nrows()
    }

    fn forward(&self, images: ArrayView5<f32>) -> Result<Array5<f32>> {
        check_input(&images, self.in_channels())?;
        let (b, _, d, h, w) = images.dim();
        let mut out = Array5::<f32>::zeros((b, self.out_channels(), d, h, w));
        for (mut ob, xb) in out.outer_iter_mut().zip(images.outer_iter()) {
            for (r, mut o) in ob.outer_iter_mut().enumerate() {
                o.fill(self.bias[r]);
                for (c, x) in xb.outer_iter().enumerate() {
                    o.scaled_add(self.weight[(r, c)], &x);
                }
            }
        }
        Ok(out)
    }
}

impl TrainableModel for PointwiseModel {
    type State = PointwiseState;

    fn step(&mut self, images: ArrayView5<f32>, grad_logits: ArrayView5<f32>) -> Result<()> {
        check_input(&images, self.in_channels())?;
        let (b, _, d, h, w) = images.dim();
        let expected = [b, self.out_channels(), d, h, w];
        if grad_logits.shape() != expected {
            return Err(PipelineError::shape(format!("gradient shaped {expected:?}"), grad_logits.shape()));
        }

        let mut d_weight = Array2::<f64>::zeros(self.weight.raw_dim());
        let mut d_bias = Array1::<f64>::zeros(self.bias.raw_dim());
        for (gb, xb) in grad_logits.outer_iter().zip(images.outer_iter()) {
            for (r, g) in gb.outer_iter().enumerate() {
                d_bias[r] += g.iter().map(|&v| v as f64).sum::<f64>();
                for (c, x) in xb.outer_iter().enumerate() {
                    d_weight[(r, c)] += Zip::from(&g).and(&x).fold(0.0, |acc, &g, &x| acc + (g * x) as f64);
                }
            }
        }

        let mut params: Vec<f32> = self.weight.iter().chain(self.bias.iter()).copied().collect();
        let grads: Vec<f32> = d_weight.iter().chain(d_bias.iter()).map(|&v| v as f32).collect();
        self.optim.step(&mut params, &grads);

        let (wp, bp) = params.split_at(self.weight.len());
        self.weight.iter_mut().zip(wp).for_each(|(p, &v)| *p = v);
        self.bias.iter_mut().zip(bp).for_each(|(p, &v)| *p = v);
        Ok(())
    }

    fn state(&self) -> Self::State {
        PointwiseState {
            weight: self.weight.clone(),
            bias: self.bias.clone(),
            optimizer: self.optim.state().clone(),
        }
    }

    fn load_state(&mut self, state: Self::State) -> Result<()> {
        if state.weight.dim() != self.weight.dim() || state.bias.len_of(Axis(0)) != self.bias.len() {
            return Err(PipelineError::Model(format!(
                "state {:?} does not fit a {} -> {} pointwise model",
                state.weight.dim(),
                self.in_channels(),
                self.out_channels()
            )));
        }
        self.weight = state.weight;
        self.bias = state.bias;
        self.optim.load_state(state.optimizer);
        Ok(())
    }
}
