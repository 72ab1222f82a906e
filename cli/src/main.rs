use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use segmented_vlm::segments::SegmentRuntime;
use segmented_vlm::tokenizer::PromptFormat;
use segmented_vlm::{
    log_available_backends, setup_device, Engine, EngineConfig, GenerationRequest,
};

fn main() {
    if let Err(err) = run() {
        eprintln!("generation failed: {err:#}");
        std::process::exit(1);
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Segmented vision-language generation", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "PATH", help = "Engine config file (TOML or JSON)")]
    config: PathBuf,

    #[arg(short, long, default_value = "", help = "Prompt text; empty uses the template default")]
    prompt: String,

    #[arg(short, long, value_name = "PATH", help = "Image to describe")]
    image: Option<PathBuf>,

    #[arg(long, value_name = "N", help = "Maximum number of generated tokens")]
    max_tokens: Option<usize>,

    #[arg(long, help = "Tokenize the prompt as given, without the chat template")]
    raw: bool,
}

fn run() -> Result<()> {
    init_tracing()?;
    let args = Args::parse();

    let mut config = EngineConfig::from_path(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    if args.raw {
        config.prompt.format = PromptFormat::Raw;
    }

    log_available_backends();
    let device = setup_device()?;
    let mut engine = Engine::from_config_on(&config, runtime()?, &device)?;

    let mut request = GenerationRequest::new(args.prompt);
    if let Some(path) = &args.image {
        let image = image::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        request = request.with_image(image);
    }
    if let Some(max_tokens) = args.max_tokens {
        request = request.with_max_tokens(max_tokens);
    }

    let cancel = request.cancel_token();
    ctrlc::set_handler(move || cancel.cancel())
        .context("failed to install signal handler")?;

    let started = Instant::now();
    let mut generation = engine.stream(request)?;
    let mut stdout = io::stdout().lock();
    for chunk in generation.by_ref() {
        let chunk = chunk?;
        stdout.write_all(chunk.text.as_bytes())?;
        stdout.flush()?;
    }
    writeln!(stdout)?;
    let output = generation.into_output();

    let elapsed = started.elapsed().as_secs_f64();
    log::info!(
        "{} tokens in {:.2}s ({:.2} tokens/s), stop: {:?}",
        output.tokens.len(),
        elapsed,
        output.tokens.len() as f64 / elapsed.max(f64::EPSILON),
        output.stop_reason
    );
    engine.release();
    Ok(())
}

fn init_tracing() -> Result<()> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
        .context("failed to initialize logging")
}

#[cfg(feature = "onnx")]
fn runtime() -> Result<Box<dyn SegmentRuntime>> {
    Ok(Box::new(segmented_vlm::segments::OnnxRuntime))
}

#[cfg(not(feature = "onnx"))]
fn runtime() -> Result<Box<dyn SegmentRuntime>> {
    anyhow::bail!("built without a segment runtime; rebuild with `--features onnx`")
}
