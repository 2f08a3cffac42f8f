//! Build script for tether-agent-bin.
//!
//! For each supported `{os}.{arch}` key, obtains a pre-built `tether-agent`
//! binary and gzip-compresses it into `OUT_DIR` so [`crate::agent_bin`] can
//! `include_bytes!` it at compile time.
//!
//! # Environment variables
//!
//! - `TETHER_AGENT_DIR` — path to a directory containing one pre-built,
//!   uncompressed binary per key, named `tether-agent.<key>` (e.g.
//!   `tether-agent.linux.amd64`). When set, skips downloading. Primary flow
//!   for local development and CI cross-compilation.
//!
//! - `TETHER_AGENT_VERSION` — overrides the release version to download.
//!   Defaults to the crate version from `Cargo.toml`.

// Build scripts legitimately use stderr for diagnostics, expect/panic for
// unrecoverable failures, and have internal-only helpers.
#![allow(clippy::expect_used, clippy::panic, clippy::print_stderr, clippy::unwrap_used, missing_docs)]

use std::env;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

/// GitHub repository for downloading pre-built agent releases.
const GITHUB_REPO: &str = "example/tether";

/// Every `{os}.{arch}` key the osArch lookup table must be able to serve.
const KEYS: &[&str] = &["linux.386", "linux.amd64", "linux.arm", "linux.arm64"];

fn main() {
    println!("cargo:rerun-if-env-changed=TETHER_AGENT_DIR");
    println!("cargo:rerun-if-env-changed=TETHER_AGENT_VERSION");
    println!("cargo:rerun-if-env-changed=DOCS_RS");

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR not set"));

    if env::var("DOCS_RS").is_ok() {
        for key in KEYS {
            write_placeholder(&out_dir, key);
        }
        return;
    }

    let version = env::var("TETHER_AGENT_VERSION").unwrap_or_else(|_| env::var("CARGO_PKG_VERSION").expect("CARGO_PKG_VERSION not set"));
    let local_dir = env::var("TETHER_AGENT_DIR").ok().map(PathBuf::from);

    for key in KEYS {
        obtain(&out_dir, key, local_dir.as_deref(), &version);
    }
}

/// Obtains one key's compressed binary, preferring a local directory, then a
/// GitHub release download, then an empty placeholder.
fn obtain(out_dir: &Path, key: &str, local_dir: Option<&Path>, version: &str) {
    let gz_path = out_dir.join(format!("{key}.gz"));

    if let Some(dir) = local_dir {
        let candidate = dir.join(format!("tether-agent.{key}"));
        if candidate.is_file() {
            eprintln!("tether-agent-bin: using local binary for {key}: {}", candidate.display());
            gzip_file(&candidate, &gz_path);
            emit_env(key, &gz_path);
            return;
        }
        eprintln!("tether-agent-bin: TETHER_AGENT_DIR set but no binary for {key}, trying download");
    }

    if download(key, version, &gz_path) {
        emit_env(key, &gz_path);
        return;
    }

    println!("cargo:warning=tether-agent-bin: no binary available for {key}; it will be reported as unsupported at runtime");
    write_placeholder(out_dir, key);
    emit_env(key, &gz_path);
}

/// Downloads and gzip-recompresses (to normalize on this crate's own framing)
/// the released binary for `key`. Returns `false` if the release does not exist.
fn download(key: &str, version: &str, gz_path: &Path) -> bool {
    let url = format!("https://github.com/{GITHUB_REPO}/releases/download/agent-v{version}/tether-agent.{key}.gz");
    eprintln!("tether-agent-bin: downloading {url}");

    let resp = match ureq::get(&url).call() {
        Ok(r) => r,
        Err(e) => {
            println!("cargo:warning=tether-agent-bin: download failed for {key} ({e})");
            return false;
        }
    };

    let mut reader = resp.into_body().into_reader();
    let mut file = fs::File::create(gz_path).expect("failed to create gz output file");
    std::io::copy(&mut reader, &mut file).expect("failed to write downloaded agent binary");
    true
}

/// Gzip-compresses `src` into `dest`.
fn gzip_file(src: &Path, dest: &Path) {
    let input = fs::read(src).expect("failed to read local agent binary");
    let mut encoder = flate2::write::GzEncoder::new(fs::File::create(dest).expect("failed to create gz output file"), flate2::Compression::best());
    encoder.write_all(&input).expect("failed to gzip agent binary");
    encoder.finish().expect("failed to finalize gzip stream");
}

/// Writes a zero-byte placeholder so `include_bytes!` still has a file to
/// embed; [`crate::agent_bin`] treats an empty entry as "unsupported".
fn write_placeholder(out_dir: &Path, key: &str) {
    let gz_path = out_dir.join(format!("{key}.gz"));
    fs::write(&gz_path, []).expect("failed to write placeholder agent binary");
}

/// Exposes the compressed binary's path to `lib.rs` via a per-key env var.
fn emit_env(key: &str, gz_path: &Path) {
    let var = format!("TETHER_AGENT_BIN_{}", key.to_uppercase().replace(['.', '-'], "_"));
    println!("cargo:rustc-env={var}={}", gz_path.display());
}
