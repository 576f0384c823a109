//! Host platform utility functions

use std::path::{Path, PathBuf};

/// Environment variable pointing at the root of the software checkout. Parameter files and
/// session directories are resolved relative to it.
pub const SW_ROOT_ENV_VAR: &str = "AUTOSTEER_SW_ROOT";

/// Get the software root directory from the environment.
pub fn get_sw_root() -> Result<PathBuf, std::env::VarError> {
    std::env::var(SW_ROOT_ENV_VAR).map(PathBuf::from)
}

/// Get the name of the machine we're running on, if the platform exposes it.
pub fn get_hostname() -> Option<String> {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|s| s.trim().to_string())
        })
}

/// Resolve a relative path against the software root.
///
/// Absolute paths are returned unchanged, as are relative ones if the software root isn't set.
pub fn resolve_path<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();

    if path.is_absolute() {
        return path.to_path_buf()
    }

    match get_sw_root() {
        Ok(root) => root.join(path),
        Err(_) => path.to_path_buf()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_resolve_path() {
        let abs = std::env::temp_dir().join("log.txt");
        assert_eq!(resolve_path(&abs), abs);

        let expected = match get_sw_root() {
            Ok(root) => root.join("data/ref_line.txt"),
            Err(_) => PathBuf::from("data/ref_line.txt"),
        };
        assert_eq!(resolve_path("data/ref_line.txt"), expected);
    }
}
