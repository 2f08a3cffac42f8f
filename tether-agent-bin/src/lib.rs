//! Embeds one gzip-compressed `tether-agent` binary per supported
//! `{os}.{arch}` key, baked in at compile time by `build.rs`, and translates
//! `uname -o`/`uname -m` output into that key.

/// Keys this crate carries a binary for (even if, for a given build, the
/// binary turned out to be an empty placeholder — see [`agent_bin`]).
pub const SUPPORTED_KEYS: &[&str] = &["linux.386", "linux.amd64", "linux.arm", "linux.arm64"];

macro_rules! embed {
    ($key:literal, $env_var:literal) => {
        (($key), include_bytes!(env!($env_var)).as_slice())
    };
}

const EMBEDDED: &[(&str, &[u8])] = &[
    embed!("linux.386", "TETHER_AGENT_BIN_LINUX_386"),
    embed!("linux.amd64", "TETHER_AGENT_BIN_LINUX_AMD64"),
    embed!("linux.arm", "TETHER_AGENT_BIN_LINUX_ARM"),
    embed!("linux.arm64", "TETHER_AGENT_BIN_LINUX_ARM64"),
];

/// Returns the gzip-compressed agent binary for `key` (e.g. `"linux.amd64"`),
/// or `None` if the key is unknown or this build has no binary for it.
#[must_use]
pub fn agent_bin(key: &str) -> Option<&'static [u8]> {
    EMBEDDED.iter().find(|(k, _)| *k == key).map(|(_, bytes)| *bytes).filter(|bytes| !bytes.is_empty())
}

/// Error returned by [`os_arch_key`] when `uname`'s output does not map to
/// any key this crate carries a binary for.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unsupported target {os}.{arch}; supported keys: {}", SUPPORTED_KEYS.join(", "))]
pub struct UnsupportedTargetError {
    /// Raw `uname -o` output.
    pub os: String,
    /// Raw `uname -m` output.
    pub arch: String,
}

/// Translates raw `uname -o`/`uname -m` output into an `{os}.{arch}` key.
///
/// Architecture translation: `i[23456]86` -> `386`, `x86_64` -> `amd64`,
/// `armv6l`/`armv7l` -> `arm`, `aarch64` -> `arm64`.
///
/// # Errors
/// Returns [`UnsupportedTargetError`] if `os` is not `"GNU/Linux"`/`"Linux"`
/// or `arch` does not match any recognized pattern.
pub fn os_arch_key(os: &str, arch: &str) -> Result<String, UnsupportedTargetError> {
    let os_key = normalize_os(os).ok_or_else(|| UnsupportedTargetError { os: os.to_owned(), arch: arch.to_owned() })?;
    let arch_key = normalize_arch(arch).ok_or_else(|| UnsupportedTargetError { os: os.to_owned(), arch: arch.to_owned() })?;
    let key = format!("{os_key}.{arch_key}");
    if SUPPORTED_KEYS.contains(&key.as_str()) { Ok(key) } else { Err(UnsupportedTargetError { os: os.to_owned(), arch: arch.to_owned() }) }
}

fn normalize_os(os: &str) -> Option<&'static str> {
    let trimmed = os.trim();
    if trimmed.eq_ignore_ascii_case("linux") || trimmed.eq_ignore_ascii_case("gnu/linux") { Some("linux") } else { None }
}

fn normalize_arch(arch: &str) -> Option<&'static str> {
    let trimmed = arch.trim();
    match trimmed {
        "i286" | "i386" | "i486" | "i586" | "i686" => Some("386"),
        "x86_64" => Some("amd64"),
        "armv6l" | "armv7l" => Some("arm"),
        "aarch64" => Some("arm64"),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_architectures() {
        assert_eq!(os_arch_key("Linux", "x86_64").unwrap(), "linux.amd64");
        assert_eq!(os_arch_key("Linux", "aarch64").unwrap(), "linux.arm64");
        assert_eq!(os_arch_key("Linux", "armv7l").unwrap(), "linux.arm");
        assert_eq!(os_arch_key("Linux", "i686").unwrap(), "linux.386");
    }

    #[test]
    fn rejects_unknown_architecture() {
        assert!(os_arch_key("Linux", "riscv64").is_err());
    }

    #[test]
    fn rejects_non_linux_os() {
        assert!(os_arch_key("Darwin", "x86_64").is_err());
    }

    #[test]
    fn unknown_key_has_no_embedded_binary() {
        assert!(agent_bin("plan9.amd64").is_none());
    }
}
