//! # show Subcommand
//!
//! Prints one record's metadata as JSON.

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use depot::DepotConfig;

use crate::{format_age, open_store};

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Record id, e.g. `nlp/File/local/lang=en/stopwords.txt`.
    pub id: String,
}

pub fn run_show(args: &ShowArgs, cfg: &DepotConfig) -> Result<u8> {
    let store = open_store(cfg)?;
    let Some(meta) = store.record(&args.id)? else {
        eprintln!("no record for {}", args.id);
        return Ok(1);
    };
    println!("{}", serde_json::to_string_pretty(&meta)?);
    println!("age: {}", format_age(meta.age(Utc::now())));
    Ok(0)
}
