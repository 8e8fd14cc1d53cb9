//! Subcommands

pub mod compile;
pub mod inspect;

use std::path::Path;

use anyhow::Context;
use vesta_engine::image::ProgramImage;
use vesta_engine::{Isolate, IsolateOptions};

/// Read isolate options from a TOML file; missing keys take their defaults
pub fn load_options(path: Option<&Path>) -> anyhow::Result<IsolateOptions> {
    let Some(path) = path else {
        return Ok(IsolateOptions::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
}

/// Load an image and start an isolate over it
pub fn load_isolate(image: &Path, options: IsolateOptions) -> anyhow::Result<Isolate> {
    let image = ProgramImage::from_file(image)
        .with_context(|| format!("Failed to read image {}", image.display()))?;
    let program = image.load().context("Failed to load image")?;
    Ok(Isolate::new(program, options))
}
