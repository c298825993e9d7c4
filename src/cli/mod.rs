// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Parses arguments with clap, picks the Burn backend and hands
// off to the use cases in Layer 2. Only this layer prints.
//
//   tlm-embed describe     --config cfg.json --tag tlm-words-embed
//   tlm-embed init-weights --config cfg.json --tag tlm-words-embed --out-dir ckpt
//   tlm-embed encode       --config cfg.json --weights ckpt/weights.safetensors --ids ids.txt
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use std::fs;

use anyhow::{Context, Result};
use burn::{
    backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice, NdArray, Wgpu},
    prelude::*,
};
use clap::Parser;
use commands::{BackendKind, Commands, DescribeArgs, EncodeArgs, InitWeightsArgs};

use tlm_embeddings::application::{
    describe_use_case::DescribeUseCase, encode_use_case::EncodeUseCase,
    init_weights_use_case::InitWeightsUseCase,
};

#[derive(Parser, Debug)]
#[command(
    name = "tlm-embed",
    version = "0.1.0",
    about = "Build, initialise and run transformer LM embeddings."
)]
pub struct Cli {
    /// Burn backend to run on
    #[arg(long, value_enum, global = true, default_value_t = BackendKind::Ndarray)]
    pub backend: BackendKind,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.backend {
            BackendKind::Ndarray => self.command.run::<NdArray>(NdArrayDevice::default()),
            BackendKind::Wgpu => self.command.run::<Wgpu>(WgpuDevice::default()),
        }
    }
}

impl Commands {
    fn run<B: Backend>(self, device: B::Device) -> Result<()> {
        match self {
            Commands::Describe(args) => run_describe::<B>(args, device),
            Commands::InitWeights(args) => run_init_weights::<B>(args, device),
            Commands::Encode(args) => run_encode::<B>(args, device),
        }
    }
}

fn run_describe<B: Backend>(args: DescribeArgs, device: B::Device) -> Result<()> {
    let d = DescribeUseCase::<B>::new(device).execute(&args.into())?;
    println!("{} ({} input)", d.class, d.input);
    println!("  vsz={}  dsz={}  tensors={}  params={}", d.vsz, d.dsz, d.num_tensors, d.num_params);
    println!("{}", serde_json::to_string_pretty(&d.config)?);
    Ok(())
}

fn run_init_weights<B: Backend>(args: InitWeightsArgs, device: B::Device) -> Result<()> {
    let outcome = InitWeightsUseCase::<B>::new(device).execute(&args.into())?;
    println!(
        "Wrote {} tensors ({} params) to {}",
        outcome.num_tensors,
        outcome.num_params,
        outcome.weights_path.display()
    );
    println!("Metadata: {}", outcome.metadata_path.display());
    Ok(())
}

fn run_encode<B: Backend>(args: EncodeArgs, device: B::Device) -> Result<()> {
    let output = EncodeUseCase::<B>::new(device).execute(&(&args).into())?;
    let json = serde_json::to_string(&output)?;
    match &args.output {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("Failed to write '{}'", path.display()))?;
            println!("Encoded {:?} → {}", output.shape, path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
