//! # stale Subcommand
//!
//! Finds records older than their maximum age: the descriptor's own
//! `max_age` if it has one, else `--max-age-days`, else the configured
//! default. Records with no applicable limit never go stale.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use depot::{DepotConfig, Store};
use depot_store::MetaData;

use crate::{format_age, open_store};

#[derive(Args, Debug)]
pub struct StaleArgs {
    /// Only records under this tag.
    #[arg(long)]
    pub tag: Option<String>,

    /// Limit for records without their own max age.
    #[arg(long)]
    pub max_age_days: Option<u64>,

    /// Delete the stale records.
    #[arg(long)]
    pub delete: bool,
}

/// The records in `records` that are past their limit at `now`.
pub fn stale_records(records: Vec<MetaData>, default_max_age: Option<Duration>, now: DateTime<Utc>) -> Vec<MetaData> {
    records
        .into_iter()
        .filter(|m| {
            let limit = m.desc.max_age().or(default_max_age);
            limit.is_some() && !m.is_fresh(limit, now)
        })
        .collect()
}

/// `--max-age-days` as a duration, `None` if it overflows.
pub fn days(d: u64) -> Option<Duration> {
    d.checked_mul(86_400).map(Duration::from_secs)
}

pub fn run_stale(args: &StaleArgs, cfg: &DepotConfig) -> Result<u8> {
    let default_max_age = match args.max_age_days {
        Some(d) => match days(d) {
            Some(limit) => Some(limit),
            None => {
                eprintln!("--max-age-days {d} is too large");
                return Ok(2);
            }
        },
        None => cfg.max_age(),
    };
    let store = open_store(cfg)?;
    let now = Utc::now();
    let stale = stale_records(store.records(args.tag.as_deref())?, default_max_age, now);
    for meta in &stale {
        println!("{:>8}  {}", format_age(meta.age(now)), meta.desc.id());
        if args.delete {
            store.remove(&meta.desc)?;
        }
    }
    println!();
    let verb = if args.delete { "Removed" } else { "Stale" };
    println!("{verb}: {} records", stale.len());
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot::{Blob, Desc};
    use depot_store::FileStore;

    fn meta(desc: depot::AnyDesc, stored_secs_ago: i64, now: DateTime<Utc>) -> MetaData {
        MetaData {
            desc,
            path: "x".into(),
            size: 1,
            stored_at: now - chrono::Duration::seconds(stored_secs_ago),
        }
    }

    #[test]
    fn own_limit_beats_default() {
        let now = Utc::now();
        let short = Desc::<Blob>::builder("short")
            .max_age(Duration::from_secs(60))
            .build()
            .erase();
        let plain = Desc::<Blob>::builder("plain").build().erase();
        let records = vec![meta(short.clone(), 120, now), meta(plain.clone(), 120, now)];

        let stale = stale_records(records.clone(), Some(Duration::from_secs(3600)), now);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].desc, short);

        let stale = stale_records(records.clone(), Some(Duration::from_secs(30)), now);
        assert_eq!(stale.len(), 2);

        let stale = stale_records(records, None, now);
        assert_eq!(stale.len(), 1);
    }

    #[test]
    fn oversized_day_count_is_a_usage_error() {
        assert_eq!(days(2), Some(Duration::from_secs(172_800)));
        assert_eq!(days(u64::MAX), None);

        let dir = tempfile::tempdir().unwrap();
        FileStore::open(dir.path()).unwrap();
        let args = StaleArgs {
            tag: None,
            max_age_days: Some(u64::MAX),
            delete: false,
        };
        assert_eq!(run_stale(&args, &DepotConfig::local(dir.path())).unwrap(), 2);
    }

    #[test]
    fn delete_removes_stale_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let old = Desc::<Blob>::builder("old").max_age(Duration::ZERO).build().erase();
        let keep = Desc::<Blob>::builder("keep").build().erase();
        store.put(&old, b"1").unwrap();
        store.put(&keep, b"2").unwrap();

        let args = StaleArgs {
            tag: None,
            max_age_days: None,
            delete: true,
        };
        assert_eq!(run_stale(&args, &DepotConfig::local(dir.path())).unwrap(), 0);
        assert!(!store.contains(&old).unwrap());
        assert!(store.contains(&keep).unwrap());
    }
}
