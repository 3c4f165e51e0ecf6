use std::path::PathBuf;

use anyhow::{bail, Context};
use candle_core::Device;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use spec_decode::config::{LogFormat, RunConfig, TokenizerSource};
use spec_decode::model::{load_tiny_lm, CausalLmPort, TextCodec, TinyLm};
use spec_decode::speculative::{read_jsonl, MetricsReport};
use spec_decode::{logging, GenerationOutput, GenerationRequest, SpeculativeDecodingEngine};

#[derive(Parser, Debug)]
#[command(name = "spec-decode", version)]
#[command(about = "Speculative decoding with a draft and a target model")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// JSON run configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write the effective configuration (file + flags) to this path
    #[arg(long, global = true)]
    save_config: Option<PathBuf>,

    /// Log level or filter directive (RUST_LOG takes precedence)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format: pretty or json
    #[arg(long, global = true)]
    log_format: Option<String>,

    /// Also append logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate with speculative decoding
    Generate(GenerateArgs),
    /// Run target-only and speculative decoding on the same prompt
    Compare(GenerateArgs),
    /// List or show runs recorded in a metrics file
    Inspect(InspectArgs),
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Prompt text, or comma-separated token ids without a tokenizer
    #[arg(short, long)]
    prompt: String,

    /// Maximum tokens to generate
    #[arg(long)]
    max_new_tokens: Option<usize>,

    /// Initial number of speculative tokens per round
    #[arg(short = 'k', long)]
    num_speculative_tokens: Option<usize>,

    /// Sampling temperature for target-only decoding
    #[arg(long)]
    temperature: Option<f32>,

    /// Sampling seed
    #[arg(long)]
    seed: Option<u64>,

    /// Stop after this token id
    #[arg(long)]
    eos_token_id: Option<u32>,

    /// Do not take the free target token after a fully accepted round
    #[arg(long)]
    no_bonus_token: bool,

    /// tokenizer.json to use instead of the configured tokenizer
    #[arg(long)]
    tokenizer: Option<PathBuf>,

    /// Write the generated text to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Append metrics records to this JSONL file
    #[arg(long)]
    metrics: Option<PathBuf>,

    /// Label for the metrics record
    #[arg(long)]
    run_id: Option<String>,

    /// Print the metrics report
    #[arg(long)]
    show_metrics: bool,
}

#[derive(Args, Debug)]
struct InspectArgs {
    /// Metrics JSONL file
    path: PathBuf,

    /// Show one run in full, by run id or list index
    #[arg(long)]
    run: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.global.config {
        Some(path) => RunConfig::from_file(path)?,
        None => RunConfig::default(),
    };
    apply_global_overrides(&mut config, &cli.global)?;
    if let Command::Generate(args) | Command::Compare(args) = &cli.command {
        apply_generate_overrides(&mut config, args);
    }
    config.validate()?;

    if let Some(path) = &cli.global.save_config {
        config.save_to_file(path)?;
    }
    logging::init(&config.logging)?;

    match &cli.command {
        Command::Generate(args) => run_generate(&config, args),
        Command::Compare(args) => run_compare(&config, args),
        Command::Inspect(args) => run_inspect(args),
    }
}

fn apply_global_overrides(config: &mut RunConfig, global: &GlobalArgs) -> anyhow::Result<()> {
    if let Some(level) = &global.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = &global.log_format {
        config.logging.format = format.parse::<LogFormat>()?;
    }
    if let Some(file) = &global.log_file {
        config.logging.file = Some(file.clone());
    }
    Ok(())
}

fn apply_generate_overrides(config: &mut RunConfig, args: &GenerateArgs) {
    if let Some(n) = args.max_new_tokens {
        config.generation.max_new_tokens = n;
    }
    if let Some(k) = args.num_speculative_tokens {
        config.speculation.num_speculative_tokens = k;
        config.speculation.max_speculative_tokens = config.speculation.max_speculative_tokens.max(k);
    }
    if let Some(t) = args.temperature {
        config.generation.sampling.temperature = t;
    }
    if let Some(seed) = args.seed {
        config.generation.sampling.seed = Some(seed);
    }
    if args.eos_token_id.is_some() {
        config.generation.eos_token_id = args.eos_token_id;
    }
    if args.no_bonus_token {
        config.speculation.bonus_token = false;
    }
    if let Some(path) = &args.tokenizer {
        config.tokenizer = TokenizerSource::File { path: path.clone() };
    }
    if args.metrics.is_some() {
        config.metrics_path = args.metrics.clone();
    }
}

type CliEngine = SpeculativeDecodingEngine<CausalLmPort<TinyLm>, CausalLmPort<TinyLm>>;

/// Load models and tokenizer, and encode the prompt.
fn prepare(
    config: &RunConfig,
    prompt: &str,
) -> anyhow::Result<(CliEngine, TextCodec, GenerationRequest)> {
    let codec = TextCodec::load(&config.tokenizer)?;
    let prompt = codec.encode(prompt).context("failed to encode prompt")?;

    let device = Device::cuda_if_available(0)?;
    let draft = load_tiny_lm(&config.draft, &device).context("failed to load draft model")?;
    let target = load_tiny_lm(&config.target, &device).context("failed to load target model")?;
    if draft.config().vocab_size != target.config().vocab_size {
        bail!(
            "draft vocabulary ({}) differs from target vocabulary ({})",
            draft.config().vocab_size,
            target.config().vocab_size
        );
    }

    let mut speculation = config.speculation.clone();
    let max_positions = draft
        .config()
        .max_position_embeddings
        .min(target.config().max_position_embeddings);
    if speculation.max_context_len > max_positions {
        info!(
            from = speculation.max_context_len,
            to = max_positions,
            "clamping max context length to model positions"
        );
        speculation.max_context_len = max_positions;
    }

    let engine = SpeculativeDecodingEngine::new(
        CausalLmPort::new(draft),
        CausalLmPort::new(target),
        speculation,
    )?;
    let request = GenerationRequest::from_config(prompt, &config.generation)
        .eos_token_id(config.generation.eos_token_id.or(codec.eos_token_id()));

    Ok((engine, codec, request))
}

fn run_generate(config: &RunConfig, args: &GenerateArgs) -> anyhow::Result<()> {
    let (mut engine, codec, request) = prepare(config, &args.prompt)?;
    let output = engine.generate(&request)?;
    let text = codec.decode(&output.tokens)?;

    println!("{text}");
    if let Some(path) = &args.output {
        std::fs::write(path, &text)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    let report = labelled_report(&output, args.run_id.as_deref(), None);
    if args.show_metrics {
        print_report(&report);
    }
    if let Some(path) = &config.metrics_path {
        report.append_jsonl(path)?;
    }
    Ok(())
}

fn run_compare(config: &RunConfig, args: &GenerateArgs) -> anyhow::Result<()> {
    let (mut engine, codec, request) = prepare(config, &args.prompt)?;

    let standard = engine.generate_standard(&request)?;
    let speculative = engine.generate(&request)?;

    println!("target-only: {}", codec.decode(&standard.tokens)?);
    println!("speculative: {}", codec.decode(&speculative.tokens)?);
    println!();
    println!(
        "target calls: {} target-only, {} speculative",
        standard.metrics.target_calls, speculative.metrics.target_calls
    );
    println!(
        "wall time:    {:.3}s target-only, {:.3}s speculative",
        standard.metrics.total_time.as_secs_f64(),
        speculative.metrics.total_time.as_secs_f64()
    );
    println!(
        "acceptance:   {:.1}%",
        speculative.metrics.acceptance_rate() * 100.0
    );
    println!("fell back:    {}", speculative.metrics.fell_back());
    println!("identical:    {}", standard.tokens == speculative.tokens);

    let run_id = args.run_id.as_deref();
    let reports = [
        labelled_report(&standard, run_id, Some("standard")),
        labelled_report(&speculative, run_id, Some("speculative")),
    ];
    if args.show_metrics {
        reports.iter().for_each(print_report);
    }
    if let Some(path) = &config.metrics_path {
        for report in &reports {
            report.append_jsonl(path)?;
        }
    }
    Ok(())
}

fn run_inspect(args: &InspectArgs) -> anyhow::Result<()> {
    let reports = read_jsonl(&args.path)?;
    if reports.is_empty() {
        println!("no runs recorded in {}", args.path.display());
        return Ok(());
    }

    if let Some(wanted) = &args.run {
        let found = reports
            .iter()
            .find(|r| r.run_id.as_deref() == Some(wanted.as_str()))
            .or_else(|| wanted.parse::<usize>().ok().and_then(|i| reports.get(i)));
        match found {
            Some(report) => print_report(report),
            None => bail!("no run '{wanted}' in {}", args.path.display()),
        }
        return Ok(());
    }

    println!(
        "{:>4}  {:<28} {:<16} {:>7} {:>7} {:>7} {:>9}",
        "#", "run", "finish", "tokens", "calls", "accept", "tok/s"
    );
    for (i, report) in reports.iter().enumerate() {
        println!(
            "{:>4}  {:<28} {:<16} {:>7} {:>7} {:>6.1}% {:>9.1}",
            i,
            report.run_id.as_deref().unwrap_or("-"),
            report.finish_reason.as_str(),
            report.tokens_generated,
            report.target_calls,
            report.acceptance_rate * 100.0,
            report.tokens_per_second
        );
    }
    Ok(())
}

fn labelled_report(
    output: &GenerationOutput,
    run_id: Option<&str>,
    suffix: Option<&str>,
) -> MetricsReport {
    let report = output.report();
    let base = run_id
        .map(str::to_string)
        .unwrap_or_else(|| format!("run-{}", report.timestamp_ms));
    let id = match suffix {
        Some(suffix) => format!("{base}-{suffix}"),
        None => base,
    };
    report.with_run_id(id)
}

fn print_report(report: &MetricsReport) {
    match serde_json::to_string_pretty(report) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("failed to render metrics: {e}"),
    }
}
