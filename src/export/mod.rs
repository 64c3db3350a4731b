//! Output writers. CSV works from the sparse entries; the grid and HTML
//! writers work from the dense matrix.

pub mod csv;
pub mod grid;
pub mod html;

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use crate::logging::{self, v_num, v_str, Domain};

/// Write text to `path`, or to stdout when `path` is `-`.
pub fn write_output(path: &Path, contents: &str) -> Result<()> {
    if path.as_os_str() == "-" {
        let mut out = std::io::stdout().lock();
        out.write_all(contents.as_bytes())?;
        out.write_all(b"\n")?;
        out.flush()?;
    } else {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(path, contents).with_context(|| format!("writing {}", path.display()))?;
    }
    logging::info(
        Domain::Export,
        "export.written",
        &[
            ("path", v_str(&path.display().to_string())),
            ("bytes", v_num(contents.len() as f64)),
        ],
    );
    Ok(())
}
