// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Capture file decoding.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use prism_capture::Capture;
use tracing::debug;

/// Decodes the capture at `path`: JSON for `.json` files, CBOR otherwise.
pub fn capture(path: &Path) -> Result<Capture> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let capture: Capture = if is_json {
        serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to decode JSON capture {}", path.display()))?
    } else {
        ciborium::from_reader(bytes.as_slice())
            .with_context(|| format!("failed to decode CBOR capture {}", path.display()))?
    };
    debug!(
        path = %path.display(),
        name = %capture.name,
        commands = capture.commands.len(),
        "loaded capture"
    );
    Ok(capture)
}
