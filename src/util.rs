use std::path::{Path, PathBuf};

const DEPLOYVM_KEYPAIR: &str = "DEPLOYVM_KEYPAIR";

const DEFAULT_KEYPAIR: &str = "lab-key";

pub fn get_keypair() -> String {
    std::env::var(DEPLOYVM_KEYPAIR).unwrap_or_else(|_| DEFAULT_KEYPAIR.to_string())
}

const DEPLOYVM_PUBKEY: &str = "DEPLOYVM_PUBKEY";

pub fn get_pubkey_file() -> Option<PathBuf> {
    std::env::var(DEPLOYVM_PUBKEY).ok().map(PathBuf::from)
}

const DEFAULT_SSH_KEY: &str = "~/.ssh/lab-key";

pub fn get_default_ssh_key() -> PathBuf {
    PathBuf::from(DEFAULT_SSH_KEY)
}

/// Expand a leading `~` to the current user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };

    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}
