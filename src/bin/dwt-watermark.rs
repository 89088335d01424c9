use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing::error;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use dwt_watermark::{
    default_output_path, open_image, DetailBand, PixelPlane, ProcessOptions, ProcessResult,
    QualityReport, WatermarkConfig, WatermarkEngine, WaveletBasis, DEFAULT_MAX_INPUT_BYTES,
};

#[derive(Parser)]
#[command(
    name = "dwt-watermark",
    about = "Embed and recover invisible text watermarks in the wavelet domain",
    version,
    after_help = "Extraction needs the unmodified original image and the same --level, \
                  --strength, --basis and --band used for embedding.\n\
                  Outputs are grayscale; PNG keeps the watermark intact, JPEG may not."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Print machine-readable JSON reports
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Embed text into an image, or into every image in a directory
    Embed {
        /// Input image file or directory
        input: PathBuf,

        /// Watermark text (printable ASCII)
        #[arg(short, long)]
        text: String,

        /// Output file or directory (default: {name}_watermarked.png)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Recover the text from a watermarked image and its original
    Extract {
        /// Watermarked image
        watermarked: PathBuf,

        /// Original, unwatermarked image
        original: PathBuf,

        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Compare two images (PSNR, SSIM, MSE)
    Metrics {
        /// Reference image
        original: PathBuf,

        /// Distorted image
        distorted: PathBuf,
    },
}

#[derive(Args, Clone, Copy)]
struct ConfigArgs {
    /// Decomposition level carrying the watermark (1-6)
    #[arg(short, long, default_value_t = 2)]
    level: usize,

    /// Embedding strength as a fraction of full scale (0-1]
    #[arg(short, long, default_value_t = 0.05)]
    strength: f32,

    /// Wavelet basis: haar or legall53
    #[arg(long, default_value_t = WaveletBasis::Haar)]
    basis: WaveletBasis,

    /// Detail band: horizontal, vertical or diagonal
    #[arg(long, default_value_t = DetailBand::Diagonal)]
    band: DetailBand,
}

impl From<ConfigArgs> for WatermarkConfig {
    fn from(args: ConfigArgs) -> Self {
        WatermarkConfig::default()
            .with_level(args.level)
            .with_strength(args.strength)
            .with_basis(args.basis)
            .with_band(args.band)
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let code = match cli.command {
        Command::Embed {
            ref input,
            ref text,
            ref output,
            config,
        } => embed(&cli, input, text, output.as_deref(), config.into()),
        Command::Extract {
            ref watermarked,
            ref original,
            config,
        } => extract(&cli, watermarked, original, config.into()),
        Command::Metrics {
            ref original,
            ref distorted,
        } => metrics(&cli, original, distorted),
    };
    process::exit(code);
}

fn init_logging(verbose: bool, quiet: bool) {
    let env_filter = if verbose {
        EnvFilter::new("debug")
    } else if quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_timer(fmt::time::uptime())
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn engine_for(config: WatermarkConfig) -> Option<WatermarkEngine> {
    match WatermarkEngine::new(config) {
        Ok(e) => Some(e),
        Err(e) => {
            error!("{e}");
            None
        }
    }
}

fn embed(
    cli: &Cli,
    input: &Path,
    text: &str,
    output: Option<&Path>,
    config: WatermarkConfig,
) -> i32 {
    let Some(engine) = engine_for(config) else {
        return 2;
    };
    if !input.exists() {
        error!("input path does not exist: {}", input.display());
        return 1;
    }

    let opts = ProcessOptions::default();
    let results = if input.is_dir() {
        let Some(output_dir) = output else {
            error!("an output directory (-o) is required for batch processing");
            return 1;
        };
        engine.process_directory(input, output_dir, text, &opts)
    } else {
        let output_path = output.map_or_else(|| default_output_path(input), Path::to_path_buf);
        vec![engine.process_file(input, &output_path, text, &opts)]
    };

    if cli.json {
        let reports: Vec<_> = results.iter().map(json_report).collect();
        if input.is_dir() {
            println!("{}", json!(reports));
        } else if let Some(report) = reports.first() {
            println!("{report}");
        }
    } else {
        for r in &results {
            print_result(r, cli.quiet);
        }
    }

    let failed = results.iter().filter(|r| !r.success).count();
    if results.len() > 1 && !cli.quiet && !cli.json {
        eprintln!();
        eprint!("[Summary] Processed: {}", results.len() - failed);
        if failed > 0 {
            eprint!(", Failed: {failed}");
        }
        eprintln!(" (Total: {})", results.len());
    }

    i32::from(failed > 0)
}

fn json_report(result: &ProcessResult) -> serde_json::Value {
    let filename = result
        .output
        .as_deref()
        .and_then(Path::file_name)
        .map(|f| f.to_string_lossy().to_string());
    match (&filename, &result.quality) {
        (Some(filename), Some(q)) => json!({
            "filename": filename,
            "psnr": q.psnr,
            "ssim": q.ssim,
            "mse": q.mse,
        }),
        _ => json!({
            "input": result.path.display().to_string(),
            "error": result.message,
        }),
    }
}

fn print_result(result: &ProcessResult, quiet: bool) {
    if quiet && result.success {
        return;
    }

    let filename = result.path.file_name().map_or_else(
        || result.path.display().to_string(),
        |f| f.to_string_lossy().to_string(),
    );

    match (&result.output, result.success) {
        (Some(output), true) => {
            eprintln!("[OK] {filename} -> {}: {}", output.display(), result.message);
        }
        _ => eprintln!("[FAIL] {filename}: {}", result.message),
    }
}

fn extract(cli: &Cli, watermarked: &Path, original: &Path, config: WatermarkConfig) -> i32 {
    let Some(engine) = engine_for(config) else {
        return 2;
    };
    let limit = Some(DEFAULT_MAX_INPUT_BYTES);
    let result = open_image(watermarked, limit).and_then(|marked| {
        let reference = open_image(original, limit)?;
        engine.extract(&marked, &reference)
    });

    match result {
        Ok(extraction) => {
            if cli.json {
                println!("{}", json!({ "extracted_text": extraction.text }));
            } else if extraction.is_empty() {
                if !cli.quiet {
                    eprintln!("No watermark found");
                }
            } else {
                println!("{}", extraction.text);
            }
            0
        }
        Err(e) => {
            error!("{e}");
            1
        }
    }
}

fn metrics(cli: &Cli, original: &Path, distorted: &Path) -> i32 {
    let limit = Some(DEFAULT_MAX_INPUT_BYTES);
    let plane =
        |path: &Path| open_image(path, limit).map(|img| PixelPlane::from_luma(&img.to_luma8()));
    let result = plane(original).and_then(|a| {
        let b = plane(distorted)?;
        QualityReport::compute(&a, &b)
    });

    match result {
        Ok(report) => {
            if cli.json {
                println!("{}", json!(report));
            } else {
                println!("PSNR: {:.4} dB", report.psnr);
                println!("SSIM: {:.6}", report.ssim);
                println!("MSE:  {:.6}", report.mse);
            }
            0
        }
        Err(e) => {
            error!("{e}");
            1
        }
    }
}
