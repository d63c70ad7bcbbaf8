//! Minimal GRACE training loop on a synthetic ring graph.
//!
//! Two views are drawn each epoch by dropping edges and masking feature
//! columns. After contrastive training, a linear probe is fit on the frozen
//! encoder output to recover a parity label.
//!
//! Run:
//!   RUST_LOG=grace_nn=debug cargo run -p grace-nn --example grace_smoke

use anyhow::Result;
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use grace_nn::{
    EdgeIndex, EncoderConfig, Grace, GraceConfig, LogReg, LossConfig, NormConfig, NormType,
};
use tracing_subscriber::EnvFilter;

const NUM_NODES: usize = 32;
const NUM_FEATURES: usize = 12;
const HIDDEN: usize = 32;
const EPOCHS: usize = 50;

/// Keep each edge with probability `1 - p`.
fn drop_edges(edges: &EdgeIndex, p: f32, dev: &Device) -> Result<EdgeIndex> {
    let keep = Tensor::rand(0f32, 1f32, edges.num_edges(), dev)?.to_vec1::<f32>()?;
    let (sources, targets): (Vec<usize>, Vec<usize>) = edges
        .iter()
        .zip(keep)
        .filter(|(_, r)| *r >= p)
        .map(|(edge, _)| edge)
        .unzip();
    Ok(EdgeIndex::new(sources, targets)?)
}

/// Zero out each feature column with probability `p`.
fn mask_features(x: &Tensor, p: f32) -> Result<Tensor> {
    let (_, f) = x.dims2()?;
    let mask = Tensor::rand(0f32, 1f32, (1, f), x.device())?
        .ge(p)?
        .to_dtype(x.dtype())?;
    Ok(x.broadcast_mul(&mask)?)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let dev = &Device::Cpu;

    // Ring plus chords to every node four steps ahead.
    let mut sources = Vec::new();
    let mut targets = Vec::new();
    for i in 0..NUM_NODES {
        for step in [1, 4] {
            let j = (i + step) % NUM_NODES;
            sources.extend([i, j]);
            targets.extend([j, i]);
        }
    }
    let edges = EdgeIndex::new(sources, targets)?;

    // Parity shows up as a shift on the first feature.
    let labels: Vec<u32> = (0..NUM_NODES).map(|i| (i % 2) as u32).collect();
    let signal: Vec<f32> = labels
        .iter()
        .flat_map(|&y| {
            let mut row = vec![0f32; NUM_FEATURES];
            row[0] = if y == 1 { 2.0 } else { -2.0 };
            row
        })
        .collect();
    let x = (Tensor::from_vec(signal, (NUM_NODES, NUM_FEATURES), dev)?
        + Tensor::randn(0f32, 0.5f32, (NUM_NODES, NUM_FEATURES), dev)?)?;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, dev);
    let encoder = EncoderConfig::new(NUM_FEATURES, HIDDEN)
        .with_layers(2)
        .with_norm(NormConfig::new(NormType::Dcn, 0.2));
    let config = GraceConfig::new(encoder).with_proj_hidden(HIDDEN).with_tau(0.5);
    println!("config: {}", config.to_json()?);
    let model = Grace::from_config(&config, vb)?;

    let mut opt = AdamW::new(
        varmap.all_vars(),
        ParamsAdamW {
            lr: 5e-3,
            weight_decay: 1e-5,
            ..Default::default()
        },
    )?;
    let loss_cfg = LossConfig::default().with_batch_size(16);

    for epoch in 0..EPOCHS {
        let e1 = drop_edges(&edges, 0.2, dev)?;
        let e2 = drop_edges(&edges, 0.4, dev)?;
        let z1 = model.forward(&mask_features(&x, 0.3)?, &e1)?;
        let z2 = model.forward(&mask_features(&x, 0.4)?, &e2)?;

        let loss = model.loss(&z1, &z2, &loss_cfg)?;
        opt.backward_step(&loss)?;
        if epoch % 10 == 0 || epoch + 1 == EPOCHS {
            println!("epoch {epoch:>3}  loss {:.4}", loss.to_scalar::<f32>()?);
        }
    }

    // Linear evaluation on frozen embeddings.
    let embeddings = model.encoder().forward(&x, &edges)?.detach();
    let targets = Tensor::from_vec(labels, NUM_NODES, dev)?;

    let probe_vars = VarMap::new();
    let probe = LogReg::new(
        HIDDEN,
        2,
        VarBuilder::from_varmap(&probe_vars, DType::F32, dev),
    )?;
    let mut probe_opt = AdamW::new(
        probe_vars.all_vars(),
        ParamsAdamW {
            lr: 1e-2,
            weight_decay: 0.0,
            ..Default::default()
        },
    )?;
    for _ in 0..100 {
        let logits = probe.forward(&embeddings)?;
        let loss = candle_nn::loss::cross_entropy(&logits, &targets)?;
        probe_opt.backward_step(&loss)?;
    }

    let accuracy = probe
        .forward(&embeddings)?
        .argmax(D::Minus1)?
        .eq(&targets)?
        .to_dtype(DType::F32)?
        .mean_all()?
        .to_scalar::<f32>()?;
    println!("probe accuracy: {accuracy:.3}");

    Ok(())
}
