//! Artifact types shared by the depot integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use depot::{
    Artifact, Codec, CodecError, Depot, DepotConfig, Desc, JsonCodec, Module, ModuleRef, Resolver,
};
use serde::{Deserialize, Serialize};

pub fn open(dir: &Path) -> Depot {
    Depot::open(config(dir)).unwrap()
}

pub fn config(dir: &Path) -> DepotConfig {
    let mut cfg = DepotConfig::local(dir);
    cfg.host = "test-box".into();
    cfg
}

/// Word list, stored as a module of [`Model`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vocab {
    pub words: Vec<String>,
}

impl Artifact for Vocab {
    const KIND: &'static str = "Vocab";
    type Codec = JsonCodec;
}

/// Write-once artifact with an optional vocabulary module.
#[derive(Debug, Serialize, Deserialize)]
pub struct Model {
    pub weights: Vec<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vocab: Option<ModuleRef<Vocab>>,
}

impl Model {
    pub fn new(weights: Vec<i64>) -> Self {
        Self {
            weights,
            vocab: None,
        }
    }

    pub fn with_vocab(weights: Vec<i64>, desc: &Desc<Vocab>, vocab: Arc<Vocab>) -> Self {
        Self {
            weights,
            vocab: Some(ModuleRef::new(desc.clone(), vocab)),
        }
    }

    /// The attached vocabulary, if any.
    pub fn vocab(&self) -> Option<&Arc<Vocab>> {
        self.vocab.as_ref().and_then(ModuleRef::get)
    }
}

impl Artifact for Model {
    const KIND: &'static str = "Model";
    const OVERWRITABLE: bool = false;
    type Codec = JsonCodec;

    fn modules(&self) -> Vec<Module> {
        self.vocab.iter().filter_map(ModuleRef::module).collect()
    }

    fn relink<R: Resolver>(&mut self, modules: &R) -> Result<(), CodecError> {
        match &mut self.vocab {
            Some(vocab) => vocab.relink(modules),
            None => Ok(()),
        }
    }
}

/// Mutable in place; shared through the identity cache.
#[derive(Debug, Default)]
pub struct Counter(pub AtomicU64);

impl Counter {
    pub fn value(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Decimal text codec.
pub struct CounterCodec;

impl Codec<Counter> for CounterCodec {
    fn encode(value: &Counter) -> Result<Vec<u8>, CodecError> {
        Ok(value.value().to_string().into_bytes())
    }

    fn decode(bytes: &[u8]) -> Result<Counter, CodecError> {
        let text = String::from_utf8(bytes.to_vec())?;
        let n = text
            .trim()
            .parse()
            .map_err(|e| CodecError::Other(format!("bad counter {text:?}: {e}")))?;
        Ok(Counter(AtomicU64::new(n)))
    }
}

impl Artifact for Counter {
    const KIND: &'static str = "Counter";
    type Codec = CounterCodec;
}

/// Immutable count; updated by replacement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tally {
    pub n: u64,
}

impl Artifact for Tally {
    const KIND: &'static str = "Tally";
    type Codec = JsonCodec;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub visits: i64,
}

impl Artifact for Profile {
    const KIND: &'static str = "Profile";
    type Codec = JsonCodec;
}
