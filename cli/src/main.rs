use std::{fs, path::PathBuf};

use aligner::decode::integer_durations;
use aligner::reference::{align_energy, expand_features};
use aligner::{Config, DirectionSet, MonotonicViterbi, SequenceLengths};
use anyhow::{bail, Context, Result};
use candle_core::{Device, Tensor};
use clap::Parser;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run() {
        eprintln!("alignment failed: {err:#}");
        std::process::exit(1);
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Monotonic boundary alignment CLI", long_about = None)]
struct Args {
    #[arg(
        short,
        long,
        value_name = "PATH",
        help = "JSON request with `energy`, `text_lengths`, `mel_lengths` and optional `text_embeddings`"
    )]
    input: Option<PathBuf>,

    #[arg(short, long, value_name = "PATH", help = "Aligner config file (TOML or JSON)")]
    config: Option<PathBuf>,

    #[arg(
        long,
        value_name = "LIST",
        value_parser = DirectionSet::parse_list,
        help = "Comma separated directions, e.g. `forward,backward`"
    )]
    direction: Option<DirectionSet>,

    #[arg(long, help = "Decode a hard monotonic path")]
    hard: bool,

    #[arg(long, help = "Run forward and backward passes one after the other")]
    sequential: bool,

    #[arg(long, default_value_t = 0, help = "Seed for the random demo batch")]
    seed: u64,

    #[arg(long, default_value_t = 2, help = "Batch size of the random demo batch")]
    batch: usize,

    #[arg(long, default_value_t = 4, help = "Padded token count of the random demo batch")]
    tokens: usize,

    #[arg(long, default_value_t = 10, help = "Padded frame count of the random demo batch")]
    frames: usize,

    #[arg(long, help = "Pretty-print the JSON report")]
    pretty: bool,
}

/// Precomputed energies plus per-row lengths.
#[derive(Debug, Deserialize)]
struct Request {
    energy: Vec<Vec<Vec<f32>>>,
    text_lengths: Vec<usize>,
    mel_lengths: Vec<usize>,
    #[serde(default)]
    text_embeddings: Option<Vec<Vec<Vec<f32>>>>,
}

#[derive(Debug, Serialize)]
struct Report {
    directions: String,
    rows: Vec<RowReport>,
}

#[derive(Debug, Serialize)]
struct RowReport {
    text_len: usize,
    mel_len: usize,
    /// Probability of each valid `(token, frame)` cell.
    soft: Vec<Vec<f32>>,
    expected_durations: Vec<f32>,
    integer_durations: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    owners: Option<Vec<usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    durations: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expanded: Option<Vec<Vec<f32>>>,
}

fn run() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_path(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };
    config.apply_env_overrides();
    if let Some(directions) = args.direction {
        config.directions = directions;
    }
    if args.hard {
        config.hard_alignment = true;
    }
    if args.sequential {
        config.parallel_directions = false;
    }

    let device = Device::Cpu;
    let request = match &args.input {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading request {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing request {}", path.display()))?
        }
        None => random_request(&args)?,
    };

    let (energy, lengths) = request_tensors(&request, &device)?;
    log::info!(
        "aligning batch={} tokens={} frames={} directions={} hard={}",
        lengths.batch(),
        lengths.text_capacity(),
        lengths.mel_capacity(),
        config.directions,
        config.hard_alignment
    );

    let (soft, hard) = align_energy(&energy, &lengths, &config, &MonotonicViterbi)?;
    let probs = soft.exp()?;
    let expected = probs.sum(candle_core::D::Minus1)?;
    let rounded = integer_durations(&expected, &lengths)?.to_vec2::<u32>()?;
    let expected = expected.to_vec2::<f32>()?;
    let probs = probs.to_vec3::<f32>()?;
    let hard = hard.map(|h| h.to_vec3::<u8>()).transpose()?;
    let expanded = match &request.text_embeddings {
        Some(embeddings) => {
            let text = nested_tensor(embeddings, &device).context("text_embeddings")?;
            Some(expand_features(&soft, &text, &lengths)?.to_vec3::<f32>()?)
        }
        None => None,
    };

    let rows = (0..lengths.batch())
        .map(|b| {
            let (text_len, mel_len) = (lengths.text()[b], lengths.mel()[b]);
            let owners = hard.as_ref().map(|hard| {
                (0..mel_len)
                    .map(|j| (0..text_len).find(|&i| hard[b][i][j] == 1).unwrap_or(0))
                    .collect::<Vec<_>>()
            });
            let durations = hard.as_ref().map(|hard| {
                (0..text_len)
                    .map(|i| hard[b][i][..mel_len].iter().map(|&v| v as u32).sum())
                    .collect()
            });
            RowReport {
                text_len,
                mel_len,
                soft: probs[b][..text_len]
                    .iter()
                    .map(|row| row[..mel_len].to_vec())
                    .collect(),
                expected_durations: expected[b][..text_len].to_vec(),
                integer_durations: rounded[b][..text_len].to_vec(),
                owners,
                durations,
                expanded: expanded.as_ref().map(|e| e[b][..mel_len].to_vec()),
            }
        })
        .collect();

    let report = Report {
        directions: config.directions.to_string(),
        rows,
    };
    let out = if args.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{out}");
    Ok(())
}

/// Random energies over random valid lengths, reproducible from `--seed`.
fn random_request(args: &Args) -> Result<Request> {
    if args.batch == 0 || args.tokens == 0 || args.tokens >= args.frames {
        bail!(
            "demo batch needs batch >= 1 and 1 <= tokens < frames, got batch={} tokens={} frames={}",
            args.batch,
            args.tokens,
            args.frames
        );
    }
    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut text_lengths = Vec::with_capacity(args.batch);
    let mut mel_lengths = Vec::with_capacity(args.batch);
    for b in 0..args.batch {
        // Keep the first row at full size so the padded extents are used.
        let (text, mel) = if b == 0 {
            (args.tokens, args.frames)
        } else {
            let text = rng.gen_range(1..=args.tokens);
            (text, rng.gen_range(text + 1..=args.frames))
        };
        text_lengths.push(text);
        mel_lengths.push(mel);
    }
    let energy = (0..args.batch)
        .map(|_| {
            (0..args.tokens)
                .map(|_| (0..args.frames).map(|_| rng.gen_range(-2.0f32..2.0)).collect())
                .collect()
        })
        .collect();
    Ok(Request {
        energy,
        text_lengths,
        mel_lengths,
        text_embeddings: None,
    })
}

fn request_tensors(request: &Request, device: &Device) -> Result<(Tensor, SequenceLengths)> {
    let energy = nested_tensor(&request.energy, device).context("energy")?;
    let (_, tokens, frames) = energy.dims3()?;
    let lengths = SequenceLengths::from_lengths(
        request.text_lengths.clone(),
        request.mel_lengths.clone(),
        tokens,
        frames,
    )?;
    Ok((energy, lengths))
}

/// Packs a rectangular `[batch][rows][cols]` array into a tensor.
fn nested_tensor(values: &[Vec<Vec<f32>>], device: &Device) -> Result<Tensor> {
    let batch = values.len();
    let rows = values.first().map_or(0, Vec::len);
    let cols = values
        .first()
        .and_then(|v| v.first())
        .map_or(0, Vec::len);
    if batch == 0 || rows == 0 || cols == 0 {
        bail!("expected a non-empty [batch][rows][cols] array");
    }
    let mut flat = Vec::with_capacity(batch * rows * cols);
    for (b, matrix) in values.iter().enumerate() {
        if matrix.len() != rows {
            bail!("row {b} has {} entries, expected {rows}", matrix.len());
        }
        for (i, row) in matrix.iter().enumerate() {
            if row.len() != cols {
                bail!("entry [{b}][{i}] has {} values, expected {cols}", row.len());
            }
            flat.extend_from_slice(row);
        }
    }
    Ok(Tensor::from_vec(flat, (batch, rows, cols), device)?)
}
