//! Common test utilities shared between integration tests

use std::fs;
use std::path::PathBuf;

use watlite::wat::{Immediate, Instruction, Opcode};

/// Path to a file under `tests/fixtures`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

/// Contents of a file under `tests/fixtures`.
pub fn fixture(name: &str) -> String {
    let path = fixture_path(name);
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("reading {}: {}", path.display(), e))
}

/// Opcode and immediate of each instruction, ignoring spans.
pub fn shape(body: &[Instruction]) -> Vec<(Opcode, Immediate)> {
    body.iter().map(|i| (i.opcode, i.immediate.clone())).collect()
}
