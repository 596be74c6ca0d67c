use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use seq2seq::{
    parse_token_ids, setup_device, token_batch, ModelOptions, ScoreScaling, Transformer,
    TransformerConfig, VocabConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Encoder-decoder transformer forward pass", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "PATH", help = "Model config file (TOML or JSON)")]
    config: Option<PathBuf>,

    #[arg(long, default_value = "1,2,3,0,0", help = "Comma separated source token ids")]
    src: String,

    #[arg(long, default_value = "1,2,0,0", help = "Comma separated target token ids")]
    trg: String,

    #[arg(long, default_value_t = 10_000)]
    src_vocab: usize,

    #[arg(long, default_value_t = 10_000)]
    trg_vocab: usize,

    #[arg(long, default_value_t = 0)]
    src_pad: usize,

    #[arg(long, default_value_t = 0)]
    trg_pad: usize,

    #[arg(long, default_value_t = 0, help = "Parameter initialisation seed")]
    seed: u64,

    #[arg(long)]
    emb_size: Option<usize>,

    #[arg(long)]
    heads: Option<usize>,

    #[arg(long)]
    encoder_layers: Option<usize>,

    #[arg(long)]
    decoder_layers: Option<usize>,

    #[arg(long, help = "Divide attention scores by sqrt(head_dim)")]
    scaled: bool,

    #[arg(long, help = "Force the CPU backend")]
    cpu: bool,
}

impl Args {
    fn model_config(&self) -> Result<TransformerConfig> {
        let mut config = match &self.config {
            Some(path) => TransformerConfig::from_path(path)?,
            None => TransformerConfig::default(),
        };
        if let Some(emb_size) = self.emb_size {
            config.emb_size = emb_size;
        }
        if let Some(heads) = self.heads {
            config.n_heads = heads;
        }
        if let Some(layers) = self.encoder_layers {
            config.num_encoder_layers = layers;
        }
        if let Some(layers) = self.decoder_layers {
            config.num_decoder_layers = layers;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let device = setup_device(args.cpu)?;

    let config = args.model_config()?;
    let vocab = VocabConfig::new(args.src_vocab, args.trg_vocab, args.src_pad, args.trg_pad);
    let scaling = if args.scaled {
        ScoreScaling::InvSqrtHeadDim
    } else {
        ScoreScaling::None
    };
    let options = ModelOptions::default()
        .with_seed(args.seed)
        .with_device(device.clone())
        .with_scaling(scaling);
    let model = Transformer::new(config, vocab, options)?;

    let src = token_batch(&parse_token_ids(&args.src)?, &device)?;
    let trg = token_batch(&parse_token_ids(&args.trg)?, &device)?;
    let logits = model.forward(&src, &trg)?;

    println!("logits shape: {:?}", logits.dims());
    println!("{logits}");
    Ok(())
}
