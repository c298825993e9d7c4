// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Three subcommands: `describe`, `init-weights` and `encode`,
// plus the global `--backend` switch.
//
// Reference: Rust Book §12 (Building a CLI Program)

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use tlm_embeddings::application::describe_use_case::DescribeRequest;
use tlm_embeddings::application::encode_use_case::EncodeRequest;
use tlm_embeddings::application::init_weights_use_case::InitWeightsRequest;

/// Which Burn backend runs the graph
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackendKind {
    /// CPU, pure Rust
    #[default]
    Ndarray,
    /// GPU via wgpu
    Wgpu,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build an embedding from a config and print its metadata record
    Describe(DescribeArgs),

    /// Build an embedding and write its weights and metadata
    InitWeights(InitWeightsArgs),

    /// Load a pretrained embedding and encode rows of token ids
    Encode(EncodeArgs),
}

#[derive(Args, Debug)]
pub struct DescribeArgs {
    /// JSON config or saved metadata record
    #[arg(long)]
    pub config: PathBuf,

    /// Registered type tag; when omitted the record's `class` is used
    #[arg(long)]
    pub tag: Option<String>,

    /// Embedding name
    #[arg(long, default_value = "x")]
    pub name: String,

    /// Also write the metadata record here
    #[arg(long)]
    pub save_md: Option<PathBuf>,
}

impl From<DescribeArgs> for DescribeRequest {
    fn from(a: DescribeArgs) -> Self {
        DescribeRequest {
            config_path: a.config,
            tag:         a.tag,
            name:        a.name,
            md_out:      a.save_md,
        }
    }
}

#[derive(Args, Debug)]
pub struct InitWeightsArgs {
    /// JSON config or saved metadata record
    #[arg(long)]
    pub config: PathBuf,

    /// Registered type tag; when omitted the record's `class` is used
    #[arg(long)]
    pub tag: Option<String>,

    /// Embedding name
    #[arg(long, default_value = "tlm-words-embed")]
    pub name: String,

    /// Directory for weights.safetensors and embeddings.json
    #[arg(long, default_value = "checkpoints")]
    pub out_dir: PathBuf,
}

impl From<InitWeightsArgs> for InitWeightsRequest {
    fn from(a: InitWeightsArgs) -> Self {
        InitWeightsRequest {
            config_path: a.config,
            tag:         a.tag,
            name:        a.name,
            out_dir:     a.out_dir,
        }
    }
}

#[derive(Args, Debug)]
pub struct EncodeArgs {
    /// JSON config or saved metadata record
    #[arg(long)]
    pub config: PathBuf,

    /// Registered type tag
    #[arg(long, default_value = "tlm-words-embed")]
    pub tag: String,

    /// safetensors weight archive
    #[arg(long)]
    pub weights: PathBuf,

    /// Text file, one row of whitespace-separated ids per line
    #[arg(long)]
    pub ids: PathBuf,

    /// Truncate rows longer than this
    #[arg(long)]
    pub max_len: Option<usize>,

    /// Write the JSON result here instead of stdout
    #[arg(long)]
    pub output: Option<PathBuf>,
}

impl From<&EncodeArgs> for EncodeRequest {
    fn from(a: &EncodeArgs) -> Self {
        EncodeRequest {
            config_path:  a.config.clone(),
            tag:          a.tag.clone(),
            weights_path: a.weights.clone(),
            ids_path:     a.ids.clone(),
            max_len:      a.max_len,
        }
    }
}
