//! Embed text into an image, then recover it again.
//!
//! Usage:
//! ```sh
//! cargo run --example embed_text -- input.png output.png "A1B2"
//! ```

use std::env;
use std::process;

use dwt_watermark::{
    open_image, save_image, WatermarkConfig, WatermarkEngine, DEFAULT_MAX_INPUT_BYTES,
};

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 4 {
        eprintln!("Usage: {} <input> <output> <text>", args[0]);
        process::exit(1);
    }

    let (input, output, text) = (&args[1], &args[2], &args[3]);

    let engine = WatermarkEngine::new(WatermarkConfig::default()).expect("default config is valid");
    let original =
        open_image(input.as_ref(), Some(DEFAULT_MAX_INPUT_BYTES)).expect("failed to load input");

    let outcome = match engine.embed(&original, text) {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };
    println!(
        "Embedded {text:?}: PSNR {:.2} dB, SSIM {:.4}, MSE {:.4}",
        outcome.quality.psnr, outcome.quality.ssim, outcome.quality.mse
    );
    save_image(&outcome.watermarked, output.as_ref()).expect("failed to save output");

    let marked = image::DynamicImage::ImageLuma8(outcome.watermarked);
    match engine.extract(&marked, &original) {
        Ok(found) if found.is_empty() => println!("Nothing recovered"),
        Ok(found) => println!(
            "Recovered {:?} ({:.0}% confidence)",
            found.text,
            found.confidence * 100.0
        ),
        Err(e) => eprintln!("Error: {e}"),
    }
}
