use std::path::{Path, PathBuf};

use dirs_next::home_dir;

/// Expands a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    let p = path.trim();
    if p == "~" {
        return home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = p.strip_prefix("~/") {
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    if let Some(rest) = p.strip_prefix("~\\") {
        // Windows-style
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    PathBuf::from(p)
}

/// Path flavour of [`expand_tilde`]; paths without a leading `~` are returned untouched.
pub fn expand_tilde_path(path: &Path) -> PathBuf {
    match path.components().next() {
        Some(first) if first.as_os_str() == "~" => expand_tilde(&path.to_string_lossy()),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_plain_paths_alone() {
        assert_eq!(expand_tilde("data/state.json"), PathBuf::from("data/state.json"));
        assert_eq!(expand_tilde_path(Path::new("/srv/run")), PathBuf::from("/srv/run"));
    }

    #[test]
    fn expands_home_prefix() {
        temp_env::with_var("HOME", Some("/home/tester"), || {
            assert_eq!(expand_tilde("~/runs"), PathBuf::from("/home/tester/runs"));
            assert_eq!(expand_tilde_path(Path::new("~/runs/state.json")), PathBuf::from("/home/tester/runs/state.json"));
        });
    }
}
