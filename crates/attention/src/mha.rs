//! Multi-head attention over `[batch, seq_len, emb_size]` hidden states.
//!
//! Queries, keys and values are produced by one fused projection whose weight
//! packs the three `[emb_size, emb_size]` matrices as `[3 * emb_size,
//! emb_size]` in Q, K, V order. Self-attention projects the shared input with a
//! single matmul and splits the result; cross-attention applies shard `i` of
//! the fused weight to source `i`. Heads are attended by [`ExactAttention`]
//! and recombined through the output projection.

use candle_core::{DType, Device, Tensor};
use rand::rngs::StdRng;

use layers::{checks, Linear, LinearConfig, LinearInit, PrecisionPolicy};

use crate::core::{Attention, AttentionError, Config};
use crate::reference::ExactAttention;

const QUERY: usize = 0;
const KEY: usize = 1;
const VALUE: usize = 2;

#[derive(Debug, Clone)]
pub struct MultiHeadAttention {
    emb_size: usize,
    n_heads: usize,
    head_dim: usize,
    qkv: Linear,
    out: Linear,
    kernel: ExactAttention,
    config: Config,
    policy: PrecisionPolicy,
}

impl MultiHeadAttention {
    /// Builds the block with `U(-1/sqrt(E), 1/sqrt(E))` weights and zero biases.
    pub fn new(
        emb_size: usize,
        n_heads: usize,
        config: Config,
        rng: &mut StdRng,
        device: &Device,
        dtype: DType,
    ) -> Result<Self, AttentionError> {
        Self::head_dim_for(emb_size, n_heads)?;
        let init = LinearInit::fan_in_uniform();
        let qkv = Linear::with_init(
            LinearConfig::fused(emb_size, emb_size, 3),
            &init,
            rng,
            device,
            dtype,
        )?;
        let out = Linear::with_init(
            LinearConfig::new(emb_size, emb_size),
            &init,
            rng,
            device,
            dtype,
        )?;
        Self::from_parts(n_heads, qkv, out, config)
    }

    /// Assembles the block from externally supplied projections.
    ///
    /// `qkv` must be a three-way fused `E -> E` projection and `out` a plain
    /// `E -> E` projection.
    pub fn from_parts(
        n_heads: usize,
        qkv: Linear,
        out: Linear,
        config: Config,
    ) -> Result<Self, AttentionError> {
        let emb_size = qkv.config().input_dim;
        let head_dim = Self::head_dim_for(emb_size, n_heads)?;
        let qkv_cfg = qkv.config();
        if qkv_cfg.fused_projections != 3 || qkv_cfg.output_dim != emb_size {
            return Err(AttentionError::Config(format!(
                "qkv projection must fuse three {emb_size} -> {emb_size} shards"
            )));
        }
        let out_cfg = out.config();
        if out_cfg.is_fused() || out_cfg.input_dim != emb_size || out_cfg.output_dim != emb_size {
            return Err(AttentionError::Config(format!(
                "output projection must map {emb_size} -> {emb_size}"
            )));
        }
        let policy = PrecisionPolicy::from_parameter_dtype(qkv.weight().dtype());
        Ok(Self {
            emb_size,
            n_heads,
            head_dim,
            qkv,
            out,
            kernel: ExactAttention::new(),
            config,
            policy,
        })
    }

    fn head_dim_for(emb_size: usize, n_heads: usize) -> Result<usize, AttentionError> {
        if emb_size == 0 || n_heads == 0 {
            return Err(AttentionError::Config(format!(
                "embedding size and head count must be non-zero, got {emb_size} and {n_heads}"
            )));
        }
        if emb_size % n_heads != 0 {
            return Err(AttentionError::Config(format!(
                "embedding size {emb_size} is not divisible by {n_heads} heads"
            )));
        }
        Ok(emb_size / n_heads)
    }

    pub fn emb_size(&self) -> usize {
        self.emb_size
    }

    pub fn n_heads(&self) -> usize {
        self.n_heads
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The fused `[3E, E]` input projection.
    pub fn qkv(&self) -> &Linear {
        &self.qkv
    }

    pub fn out_proj(&self) -> &Linear {
        &self.out
    }

    /// Attends `queries` over `keys`/`values` and returns `[batch, q_len, E]`.
    pub fn forward(
        &self,
        queries: &Tensor,
        keys: &Tensor,
        values: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<Tensor, AttentionError> {
        self.validate_sources(queries, keys, Some(values))?;
        let (batch, q_len, _) = queries.dims3()?;

        let (q, k, v) = if queries.id() == keys.id() && keys.id() == values.id() {
            let fused = self.qkv.forward(queries, &self.policy)?;
            let e = self.emb_size;
            (
                fused.narrow(2, QUERY * e, e)?,
                fused.narrow(2, KEY * e, e)?,
                fused.narrow(2, VALUE * e, e)?,
            )
        } else {
            (
                self.qkv.forward_shard(queries, QUERY, &self.policy)?,
                self.qkv.forward_shard(keys, KEY, &self.policy)?,
                self.qkv.forward_shard(values, VALUE, &self.policy)?,
            )
        };

        let context = self.kernel.attend(
            &self.split_heads(&q)?,
            &self.split_heads(&k)?,
            &self.split_heads(&v)?,
            mask,
            &self.config,
        )?;
        let merged = context
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, q_len, self.emb_size))?;

        Ok(self.out.forward(&merged, &self.policy)?)
    }

    /// Post-softmax weights `[batch, H, q_len, k_len]` in `f32`.
    pub fn attention_weights(
        &self,
        queries: &Tensor,
        keys: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<Tensor, AttentionError> {
        self.validate_sources(queries, keys, None)?;
        let q = self.qkv.forward_shard(queries, QUERY, &self.policy)?;
        let k = self.qkv.forward_shard(keys, KEY, &self.policy)?;
        self.kernel.weights(
            &self.split_heads(&q)?,
            &self.split_heads(&k)?,
            mask,
            &self.config,
        )
    }

    fn validate_sources(
        &self,
        queries: &Tensor,
        keys: &Tensor,
        values: Option<&Tensor>,
    ) -> Result<(), AttentionError> {
        checks::expect_batch_seq_hidden("attention.queries", queries, self.emb_size)?;
        checks::expect_batch_seq_hidden("attention.keys", keys, self.emb_size)?;
        if queries.dim(0)? != keys.dim(0)? {
            return Err(AttentionError::shape(format!(
                "query batch {} does not match key batch {}",
                queries.dim(0)?,
                keys.dim(0)?
            )));
        }
        if let Some(values) = values {
            checks::expect_shape("attention.values", values, keys.dims())?;
        }
        Ok(())
    }

    /// `[batch, seq, E]` -> `[batch, H, seq, head_dim]`.
    fn split_heads(&self, x: &Tensor) -> Result<Tensor, AttentionError> {
        let (batch, seq, _) = x.dims3()?;
        Ok(x.reshape((batch, seq, self.n_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?)
    }
}
