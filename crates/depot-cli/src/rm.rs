//! # rm Subcommand
//!
//! Deletes one stored record and its metadata sidecar.

use anyhow::Result;
use clap::Args;
use depot::{DepotConfig, Store};

use crate::open_store;

#[derive(Args, Debug)]
pub struct RmArgs {
    /// Record id.
    pub id: String,

    /// Report what would be deleted without deleting it.
    #[arg(long)]
    pub dry_run: bool,
}

pub fn run_rm(args: &RmArgs, cfg: &DepotConfig) -> Result<u8> {
    let store = open_store(cfg)?;
    let Some(meta) = store.record(&args.id)? else {
        // Bytes copied in without a sidecar still have a path.
        let path = store.path_for_id(&args.id)?;
        if !path.is_file() {
            eprintln!("no record for {}", args.id);
            return Ok(1);
        }
        if args.dry_run {
            println!("would remove {}", path.display());
        } else {
            std::fs::remove_file(&path)?;
            println!("removed {}", args.id);
        }
        return Ok(0);
    };
    if args.dry_run {
        println!("would remove {} ({} bytes)", meta.desc.id(), meta.size);
        return Ok(0);
    }
    store.remove(&meta.desc)?;
    tracing::info!(id = %meta.desc, "removed record");
    println!("removed {}", meta.desc.id());
    Ok(0)
}
