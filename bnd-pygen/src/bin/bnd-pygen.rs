//! Command line front end of the CPython binding generator.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

/// Generate the C++ source of a CPython extension module wrapping the
/// classes, functions, enums and exceptions listed in a TOML file.
/// Declarations that cannot be wrapped are logged as warnings and left out.
#[derive(Parser, Debug)]
#[command(
    name = "bnd-pygen",
    version,
    about = "Generate CPython extension module source for C++ APIs described in TOML"
)]
struct Cli {
    /// Module description: classes, functions, enums, containers and
    /// exceptions to wrap.
    #[arg(default_value = "bnd-pygen.toml")]
    config: PathBuf,

    /// Where to write the generated .cc file instead of `output.file`.
    #[arg(short, long, conflicts_with = "stdout")]
    output: Option<PathBuf>,

    /// Print the generated source instead of writing a file.
    #[arg(long)]
    stdout: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("bnd_pygen=info")),
        )
        .init();

    let cli = Cli::parse();
    if cli.stdout {
        let generated = bnd_pygen::generate(&cli.config)?;
        std::io::stdout()
            .write_all(generated.text.as_bytes())
            .context("writing generated source to stdout")?;
    } else {
        bnd_pygen::run(&cli.config, cli.output.as_deref())?;
    }
    Ok(())
}
