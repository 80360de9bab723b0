//! bnd-pygen: C++ declarations → CPython extension module source.
//!
//! Reads a TOML description of C++ classes, functions, enums and containers
//! and emits the C++ source of a Python extension module wrapping them:
//! argument parsing, return value building, overload dispatch, C++
//! exception translation, attribute getters and setters, and virtual method
//! proxies for Python subclasses.
//!
//! # Quick start
//!
//! Generate the module source from a config (suitable for `build.rs`):
//!
//! ```no_run
//! use std::path::Path;
//!
//! // Reads config TOML, generates the wrappers, writes the .cc file.
//! bnd_pygen::run(Path::new("bnd-pygen.toml"), None).unwrap();
//! ```
//!
//! Or get the text without writing to disk:
//!
//! ```no_run
//! use std::path::Path;
//!
//! let generated = bnd_pygen::generate(Path::new("bnd-pygen.toml")).unwrap();
//! println!("{}", generated.text);
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

pub mod attribute;
pub mod block;
pub mod callback;
pub mod codesink;
pub mod config;
pub mod context;
pub mod ctype;
pub mod diagnostics;
pub mod emit;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod model;
pub mod overload;
pub mod registry;
pub mod wrapper;
pub mod wrapper_registry;

/// Generated module source plus everything that was left out of it.
#[derive(Debug)]
pub struct Generated {
    pub text: String,
    pub warnings: Vec<diagnostics::Warning>,
}

/// Run the full pipeline: load config, generate the module, and write the
/// output file.
///
/// `config_path` is the path to a `bnd-pygen.toml` configuration file.
/// `output` optionally overrides the output file path from the config.
///
/// Returns the path the source file was written to.
pub fn run(config_path: &Path, output: Option<&Path>) -> Result<PathBuf> {
    let cfg = config::load_config(config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));

    let generated = generate_from_config(&cfg)?;

    let output_path = match output {
        Some(p) => p.to_path_buf(),
        None => base_dir.join(cfg.output.file()),
    };
    std::fs::write(&output_path, &generated.text)
        .with_context(|| format!("writing output to {}", output_path.display()))?;

    info!(
        path = %output_path.display(),
        size = generated.text.len(),
        warnings = generated.warnings.len(),
        "wrote module source"
    );

    Ok(output_path)
}

/// Parse a `bnd-pygen.toml` config file and return the generated module
/// without writing to disk.
pub fn generate(config_path: &Path) -> Result<Generated> {
    let cfg = config::load_config(config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    generate_from_config(&cfg)
}

/// Generate the module from an already-loaded [`config::Config`].
pub fn generate_from_config(cfg: &config::Config) -> Result<Generated> {
    info!(
        module = %cfg.output.module,
        classes = cfg.classes.len(),
        functions = cfg.functions.len(),
        "loaded configuration"
    );

    let mut diags = diagnostics::Diagnostics::new();
    let mut module = extract::extract_module(cfg, &mut diags);
    let text = emit::emit_module(&mut module, &mut diags)
        .with_context(|| format!("emitting module {}", cfg.output.module))?;

    info!(size = text.len(), warnings = diags.warnings().len(), "generated module");

    Ok(Generated {
        text,
        warnings: diags.into_warnings(),
    })
}
