//! # depot-cli: Operator Tool for Depot Stores
//!
//! Works on the local store directory at the id level, without knowing the
//! artifact types stored in it. Every record is found through the `.meta`
//! sidecar written next to its bytes.
//!
//! ## Subcommands
//!
//! - `depot ls`: list stored records, optionally under one tag or kind.
//! - `depot show <id>`: print one record's metadata.
//! - `depot rm <id>`: delete one record.
//! - `depot stale`: list (and optionally delete) records past their
//!   maximum age.
//!
//! ```bash
//! depot --dir /var/depot ls --tag nlp --long
//! depot show nlp/File/local/lang=en/stopwords.txt
//! depot stale --max-age-days 7 --delete
//! ```

pub mod ls;
pub mod rm;
pub mod show;
pub mod stale;

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use depot::DepotConfig;
use depot_store::FileStore;

/// Defaults, then the YAML file if given, then environment overrides, then
/// the `--dir` flag.
pub fn load_config(config: Option<&Path>, dir: Option<&Path>) -> Result<DepotConfig> {
    let base = match config {
        Some(path) => DepotConfig::from_yaml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DepotConfig::default(),
    };
    let mut cfg = base.with_env()?;
    if let Some(dir) = dir {
        cfg.dir = dir.to_path_buf();
    }
    cfg.validate()?;
    Ok(cfg)
}

/// The configured store. Unlike [`FileStore::open`], a missing directory
/// is an error rather than created.
pub fn open_store(cfg: &DepotConfig) -> Result<FileStore> {
    if !cfg.dir.is_dir() {
        bail!("no depot store at {}", cfg.dir.display());
    }
    Ok(FileStore::open(&cfg.dir)?)
}

/// Compact human age: `45s`, `12m`, `5h 3m`, `9d 2h`.
pub fn format_age(age: Duration) -> String {
    let secs = age.as_secs();
    match secs {
        0..=59 => format!("{secs}s"),
        60..=3599 => format!("{}m", secs / 60),
        3600..=86_399 => format!("{}h {}m", secs / 3600, secs % 3600 / 60),
        _ => format!("{}d {}h", secs / 86_400, secs % 86_400 / 3600),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ages_are_compact() {
        assert_eq!(format_age(Duration::from_secs(45)), "45s");
        assert_eq!(format_age(Duration::from_secs(720)), "12m");
        assert_eq!(format_age(Duration::from_secs(5 * 3600 + 180)), "5h 3m");
        assert_eq!(format_age(Duration::from_secs(9 * 86_400 + 7200)), "9d 2h");
    }

    #[test]
    fn dir_flag_wins() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("depot.yaml");
        std::fs::write(&yaml, "dir: /from/yaml\nhost: box\n").unwrap();
        let cfg = load_config(Some(&yaml), Some(dir.path())).unwrap();
        assert_eq!(cfg.dir, dir.path());
    }

    #[test]
    fn missing_store_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = DepotConfig::local(dir.path().join("absent"));
        assert!(open_store(&cfg).is_err());
    }
}
