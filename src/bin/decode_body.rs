//! Decode a captured body file.
//!
//! Usage:
//! ```
//! cargo run --bin decode_body -- --input body.bin --encoding "deflate, gzip" --output body.txt
//! ```

use std::path::PathBuf;

use anyhow::Context;
use exchange_body_core::api::body_api::{decode_content, init_decoder, init_logging};
use exchange_body_core::decode::DispatcherConfig;
use tokio::io::AsyncWriteExt;

struct Args {
    input: PathBuf,
    output: Option<PathBuf>,
    encoding: Option<String>,
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging(None)?;
    let args = parse_args()?;

    let mut config = DispatcherConfig::from_env();
    if let Some(workers) = args.workers {
        config.worker_count = workers;
    }
    init_decoder(config)?;

    let body = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("reading {}", args.input.display()))?;
    let compressed_len = body.len();
    let decoded = decode_content(body, args.encoding.as_deref()).await?;
    tracing::info!(
        "Decoded {} bytes into {} bytes",
        compressed_len,
        decoded.len()
    );

    match args.output {
        Some(path) => tokio::fs::write(&path, &decoded)
            .await
            .with_context(|| format!("writing {}", path.display()))?,
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&decoded).await?;
            stdout.flush().await?;
        }
    }
    Ok(())
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = std::env::args().skip(1);
    let mut input = None;
    let mut output = None;
    let mut encoding = None;
    let mut workers = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--input" | "-i" => input = args.next().map(PathBuf::from),
            "--output" | "-o" => output = args.next().map(PathBuf::from),
            "--encoding" | "-e" => encoding = args.next(),
            "--workers" => {
                let value = args.next().context("--workers needs a value")?;
                workers = Some(value.parse().context("--workers must be a number")?);
            }
            "--help" | "-h" => {
                eprintln!("Decode a captured HTTP body");
                eprintln!();
                eprintln!("Usage: decode_body --input <PATH> [OPTIONS]");
                eprintln!();
                eprintln!("Options:");
                eprintln!("  --input, -i <PATH>      Encoded body file");
                eprintln!("  --output, -o <PATH>     Write decoded body here (default: stdout)");
                eprintln!("  --encoding, -e <VALUE>  Content-Encoding header value, e.g. \"gzip\"");
                eprintln!("  --workers <N>           Decode worker threads");
                eprintln!("  --help, -h              Show this help");
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {arg}");
            }
        }
    }

    Ok(Args {
        input: input.context("--input is required")?,
        output,
        encoding,
        workers,
    })
}
