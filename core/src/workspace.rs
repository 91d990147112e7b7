//! Workspace utilities: the scratch directory created at startup and its writability probe.

use std::io;
use std::path::{Path, PathBuf};

const PROBE_FILE: &str = ".relay-write-test";

/// Create the scratch workspace (and parents) if missing. Returns the directory.
pub fn setup_workspace(dir: &Path) -> io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    Ok(dir.to_path_buf())
}

/// Ok when a file can be created and removed inside `dir`.
pub fn check_writable(dir: &Path) -> io::Result<()> {
    let probe = dir.join(PROBE_FILE);
    std::fs::write(&probe, b"ok")?;
    std::fs::remove_file(&probe)
}
