//! Template bodies read from disk or stdin

use anyhow::{bail, Context, Result};
use stackpilot_core::TemplateSource;
use std::io::Read;

/// Reads templates by path; `-` reads standard input
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTemplateSource;

impl TemplateSource for FileTemplateSource {
    type Error = anyhow::Error;

    fn load(&self, id: &str) -> Result<String> {
        let body = if id == "-" {
            let mut body = String::new();
            std::io::stdin()
                .read_to_string(&mut body)
                .context("Failed to read template from stdin")?;
            body
        } else {
            std::fs::read_to_string(id)
                .with_context(|| format!("Failed to read template file: {}", id))?
        };

        if body.trim().is_empty() {
            bail!("Template '{}' is empty", id);
        }
        Ok(body)
    }
}
