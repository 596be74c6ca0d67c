use candle_core::{Device, Tensor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use model::{ModelOptions, Transformer, TransformerConfig, VocabConfig};

fn token_ids(batch: usize, len: usize, vocab: usize, device: &Device) -> Tensor {
    let data: Vec<u32> = (0..batch * len)
        .map(|i| (1 + i % (vocab - 1)) as u32)
        .collect();
    Tensor::from_vec(data, (batch, len), device).expect("token ids")
}

fn bench_forward(c: &mut Criterion) {
    let device = Device::Cpu;
    let vocab = VocabConfig::new(1000, 1000, 0, 0);
    let batch = 2usize;

    let mut group = c.benchmark_group("transformer/forward");
    for &(emb_size, layers) in &[(64usize, 2usize), (128, 2), (256, 4)] {
        let config = TransformerConfig {
            emb_size,
            n_heads: 8,
            num_encoder_layers: layers,
            num_decoder_layers: layers,
            dropout: 0.1,
        };
        let model = Transformer::new(config, vocab, ModelOptions::default().with_seed(7))
            .expect("model init");
        let src = token_ids(batch, 32, vocab.src_vocab_size, &device);
        let trg = token_ids(batch, 24, vocab.trg_vocab_size, &device);

        group.throughput(Throughput::Elements((batch * 24) as u64));
        group.bench_with_input(
            BenchmarkId::new(format!("layers{layers}"), emb_size),
            &(model, src, trg),
            |b, (model, src, trg)| {
                b.iter(|| {
                    let logits = model
                        .forward(black_box(src), black_box(trg))
                        .expect("forward");
                    black_box(logits);
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_forward);
criterion_main!(benches);
