//! Linear and affine projection helpers.
//!
//! Linear layers expect inputs shaped `(batch, seq, in_dim)` or `(rows, in_dim)`
//! and return tensors with the same leading dimensions and `out_dim` features.
//! Multi-projection variants pack the weight as
//! `(num_projections * output_dim, input_dim)`; the whole block can be applied
//! at once with [`Linear::forward`] or a single shard with
//! [`Linear::forward_shard`]. Matmuls run in [`PrecisionPolicy::compute`] and
//! results are cast back with [`PrecisionPolicy::cast_to_storage`].
//!
//! Initialisation policies mirror common transformer recipes (Glorot, Kaiming,
//! scaled variants). Sampling always draws from a caller supplied [`StdRng`] so
//! that two models built from the same seed hold identical parameters.

use candle_core::{DType, Device, Tensor};
use rand::{rngs::StdRng, Rng};
use rand_distr::{Distribution, Normal};

use crate::{checks, dtypes::PrecisionPolicy, LayerError, Result};

/// Configuration shared by dense projection layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConfig {
    /// Incoming feature dimension.
    pub input_dim: usize,
    /// Output feature dimension per projection shard.
    pub output_dim: usize,
    /// Whether a learnable bias vector should be applied.
    pub bias: bool,
    /// Number of projections fused together (1 for standard linear).
    pub fused_projections: usize,
}

impl LinearConfig {
    /// Creates a configuration for a single projection layer.
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            bias: true,
            fused_projections: 1,
        }
    }

    /// Creates a configuration packing `projections` shards of `output_dim` each.
    pub fn fused(input_dim: usize, output_dim: usize, projections: usize) -> Self {
        Self {
            fused_projections: projections,
            ..Self::new(input_dim, output_dim)
        }
    }

    /// Indicates whether outputs are packed for multi-way projections.
    pub fn is_fused(&self) -> bool {
        self.fused_projections > 1
    }

    /// Total number of output features produced by the layer.
    pub fn total_output_dim(&self) -> usize {
        self.output_dim * self.fused_projections
    }

    fn validate(&self) -> Result<()> {
        if self.input_dim == 0 || self.output_dim == 0 {
            return Err(LayerError::config(format!(
                "linear dimensions must be non-zero, got {} -> {}",
                self.input_dim, self.output_dim
            )));
        }
        if self.fused_projections == 0 {
            return Err(LayerError::config(
                "linear requires at least one projection",
            ));
        }
        Ok(())
    }
}

/// Supported weight initialisation policies for transformer projections.
#[derive(Debug, Clone)]
pub enum LinearInit {
    /// Xavier/Glorot uniform initialisation.
    XavierUniform,
    /// Xavier/Glorot normal initialisation.
    XavierNormal,
    /// Kaiming/He uniform initialisation.
    KaimingUniform { negative_slope: f64 },
    /// Kaiming/He normal initialisation.
    KaimingNormal { negative_slope: f64 },
    /// Scales another policy to support deep network stabilisation.
    Scaled { base: Box<LinearInit>, scale: f64 },
}

impl LinearInit {
    /// Convenience helper to scale an existing policy.
    pub fn scaled(base: LinearInit, scale: f64) -> Self {
        Self::Scaled {
            base: Box::new(base),
            scale,
        }
    }

    /// Kaiming uniform with `a = sqrt(5)`, i.e. `U(-1/sqrt(fan_in), 1/sqrt(fan_in))`.
    pub fn fan_in_uniform() -> Self {
        Self::KaimingUniform {
            negative_slope: 5f64.sqrt(),
        }
    }

    /// Samples a row-major `(out_dim, in_dim)` weight matrix.
    pub fn sample(&self, shape: (usize, usize), rng: &mut StdRng) -> Result<Vec<f32>> {
        let (out_dim, in_dim) = shape;
        let (fan_in, fan_out) = (in_dim as f64, out_dim as f64);
        let total = out_dim * in_dim;
        let values = match self {
            LinearInit::XavierUniform => {
                let bound = (6.0f64 / (fan_in + fan_out)).sqrt();
                uniform(total, bound, rng)
            }
            LinearInit::XavierNormal => {
                let std = (2.0f64 / (fan_in + fan_out)).sqrt();
                normal(total, std, rng)?
            }
            LinearInit::KaimingUniform { negative_slope } => {
                let gain = (2.0f64 / (1.0 + negative_slope.powi(2))).sqrt();
                let bound = 3.0f64.sqrt() * gain / fan_in.sqrt();
                uniform(total, bound, rng)
            }
            LinearInit::KaimingNormal { negative_slope } => {
                let gain = (2.0f64 / (1.0 + negative_slope.powi(2))).sqrt();
                normal(total, gain / fan_in.sqrt(), rng)?
            }
            LinearInit::Scaled { base, scale } => {
                let mut sampled = base.sample(shape, rng)?;
                let scale = *scale as f32;
                sampled.iter_mut().for_each(|value| *value *= scale);
                sampled
            }
        };
        Ok(values)
    }
}

fn uniform(total: usize, bound: f64, rng: &mut StdRng) -> Vec<f32> {
    let bound = bound as f32;
    if bound <= 0.0 {
        return vec![0.0; total];
    }
    (0..total).map(|_| rng.gen_range(-bound..bound)).collect()
}

fn normal(total: usize, std: f64, rng: &mut StdRng) -> Result<Vec<f32>> {
    let dist = Normal::new(0f32, std as f32)
        .map_err(|err| LayerError::config(format!("invalid normal init: {err}")))?;
    Ok((0..total).map(|_| dist.sample(rng)).collect())
}

/// Dense affine projection with optional bias and mixed-precision aware forward pass.
#[derive(Debug, Clone)]
pub struct Linear {
    config: LinearConfig,
    weight: Tensor,
    bias: Option<Tensor>,
}

impl Linear {
    /// Constructs a linear layer from pre-existing parameters.
    pub fn new(config: LinearConfig, weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        config.validate()?;
        Self::validate_weight(&config, &weight)?;
        Self::validate_bias(&config, bias.as_ref())?;
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    /// Builds a linear layer with weights drawn from `init`; the bias starts at zero.
    pub fn with_init(
        config: LinearConfig,
        init: &LinearInit,
        rng: &mut StdRng,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        config.validate()?;
        let shape = (config.total_output_dim(), config.input_dim);
        log::trace!("initialising linear {shape:?} with {init:?} as {dtype:?}");
        let values = init.sample(shape, rng)?;
        let weight = Tensor::from_vec(values, shape, device)?.to_dtype(dtype)?;
        let bias = if config.bias {
            Some(Tensor::zeros(config.total_output_dim(), dtype, device)?)
        } else {
            None
        };
        Self::new(config, weight, bias)
    }

    /// Returns the static configuration used to validate inputs.
    pub fn config(&self) -> &LinearConfig {
        &self.config
    }

    /// Returns the weight tensor shaped `(total_output_dim, input_dim)`.
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Returns the bias tensor if present.
    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    /// Applies the full (possibly fused) projection.
    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        self.project(
            hidden,
            &self.weight,
            self.bias.as_ref(),
            self.config.total_output_dim(),
            policy,
        )
    }

    /// Applies only projection `shard` of a fused layer, producing `output_dim` features.
    pub fn forward_shard(
        &self,
        hidden: &Tensor,
        shard: usize,
        policy: &PrecisionPolicy,
    ) -> Result<Tensor> {
        if shard >= self.config.fused_projections {
            return Err(LayerError::config(format!(
                "shard {shard} out of range for {} fused projections",
                self.config.fused_projections
            )));
        }
        let out = self.config.output_dim;
        let weight = self.weight.narrow(0, shard * out, out)?;
        let bias = match &self.bias {
            Some(bias) => Some(bias.narrow(0, shard * out, out)?),
            None => None,
        };
        self.project(hidden, &weight, bias.as_ref(), out, policy)
    }

    fn project(
        &self,
        hidden: &Tensor,
        weight: &Tensor,
        bias: Option<&Tensor>,
        out_dim: usize,
        policy: &PrecisionPolicy,
    ) -> Result<Tensor> {
        self.validate_input(hidden)?;

        let input = policy.cast_for_matmul(hidden)?;
        let weight_t = policy.cast_for_matmul(weight)?.t()?;

        let mut output = match input.dims() {
            [batch, seq, _] => {
                let (batch, seq) = (*batch, *seq);
                input
                    .reshape((batch * seq, self.config.input_dim))?
                    .matmul(&weight_t)?
                    .reshape((batch, seq, out_dim))?
            }
            _ => input.matmul(&weight_t)?,
        };

        if let Some(bias) = bias {
            let bias = policy.cast_for_matmul(bias)?;
            output = output.broadcast_add(&bias)?;
        }

        policy.cast_to_storage(&output)
    }

    fn validate_weight(config: &LinearConfig, weight: &Tensor) -> Result<()> {
        checks::expect_rank("linear.weight", weight, 2)?;
        checks::expect_shape(
            "linear.weight",
            weight,
            &[config.total_output_dim(), config.input_dim],
        )?;
        checks::expect_dtype_in("linear.weight", weight, checks::FLOAT_DTYPES)
    }

    fn validate_bias(config: &LinearConfig, bias: Option<&Tensor>) -> Result<()> {
        match (config.bias, bias) {
            (true, Some(tensor)) => {
                checks::expect_shape("linear.bias", tensor, &[config.total_output_dim()])?;
                checks::expect_dtype_in("linear.bias", tensor, checks::FLOAT_DTYPES)
            }
            (false, Some(_)) => Err(LayerError::config("bias provided but config disables bias")),
            (true, None) => Err(LayerError::config("config expects bias but none supplied")),
            (false, None) => Ok(()),
        }
    }

    fn validate_input(&self, hidden: &Tensor) -> Result<()> {
        checks::expect_dtype_in("linear.input", hidden, checks::FLOAT_DTYPES)?;
        match hidden.dims() {
            [_, _, _] => {
                checks::expect_batch_seq_hidden("linear.input", hidden, self.config.input_dim)
            }
            [rows, hidden_dim] if *rows > 0 && *hidden_dim == self.config.input_dim => Ok(()),
            dims => Err(LayerError::Shape {
                context: "linear.input",
                expected: format!("[B, T, {0}] or [T, {0}]", self.config.input_dim),
                actual: dims.to_vec(),
            }),
        }
    }
}
