//! # ls Subcommand
//!
//! Lists stored records by id, optionally restricted to one tag and kind.

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use depot::DepotConfig;
use depot_store::MetaData;

use crate::{format_age, open_store};

#[derive(Args, Debug)]
pub struct LsArgs {
    /// Only records under this tag.
    #[arg(long)]
    pub tag: Option<String>,

    /// Only records of this kind (e.g. File).
    #[arg(long)]
    pub kind: Option<String>,

    /// Show size and age next to each id.
    #[arg(short, long)]
    pub long: bool,
}

/// Records under `args.tag` of kind `args.kind`, sorted by id.
pub fn select(args: &LsArgs, cfg: &DepotConfig) -> Result<Vec<MetaData>> {
    let store = open_store(cfg)?;
    let mut records = store.records(args.tag.as_deref())?;
    if let Some(kind) = &args.kind {
        records.retain(|m| m.desc.kind() == kind);
    }
    Ok(records)
}

pub fn run_ls(args: &LsArgs, cfg: &DepotConfig) -> Result<u8> {
    let records = select(args, cfg)?;
    let now = Utc::now();
    for meta in &records {
        if args.long {
            println!(
                "{:>10}  {:>8}  {}",
                meta.size,
                format_age(meta.age(now)),
                meta.desc.id()
            );
        } else {
            println!("{}", meta.desc.id());
        }
    }
    println!();
    println!("Total: {} records", records.len());
    Ok(0)
}
