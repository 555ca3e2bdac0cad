//! CLI entry point for napigen.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

/// napigen — generate native API wrappers from annotated GDExtension headers.
#[derive(Parser, Debug)]
#[command(name = "napigen", version, about)]
struct Cli {
    /// Path to the napigen.toml configuration file.
    #[arg(default_value = "napigen.toml")]
    config: PathBuf,

    /// Extra global preprocessor define (repeatable).
    #[arg(short = 'D', long = "define", value_name = "NAME")]
    defines: Vec<String>,

    /// Do not generate the C# wrapper even when configured.
    #[arg(long)]
    skip_csharp: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("napigen=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut sources = Vec::new();
    let code = napigen::run(&cli.config, &cli.defines, cli.skip_csharp, &mut sources);
    for source in &sources {
        println!("{}", source.display());
    }
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
