use std::path::PathBuf;

use clap::Parser;
use mailwatch_core::{Config, convert_file};

/// Convert the cached credential into a googleapis-style `token.json`.
#[derive(Debug, Parser)]
#[command(name = "convert-token", version)]
struct Args {
    #[arg(long, env = "CONFIG_PATH", default_value = "config.toml")]
    config: PathBuf,

    /// Credential cache to read. Defaults to `paths.token_cache`.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Where to write the converted token. Defaults to `paths.converted_token`.
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;

    let input = args.input.unwrap_or(config.paths.token_cache);
    let output = args.output.unwrap_or(config.paths.converted_token);

    convert_file(&input, &output)?;
    println!("Token converted and saved to {}", output.display());
    Ok(())
}
