//! # Artifacts and Codecs
//!
//! Any value stored in a depot implements [`Artifact`]. The trait names the
//! artifact's kind (the type segment of its ids), its [`Codec`], and the
//! optional capabilities the depot consumes:
//!
//! - [`Artifact::self_desc`]: an artifact may know its own descriptor.
//! - [`Artifact::modules`]: sub-artifacts persisted under their own
//!   descriptors whenever the parent is put.
//! - [`Artifact::relink`]: reattach those sub-artifacts after a load. A
//!   parent stores each module as its descriptor (a [`ModuleRef`] field) and
//!   gets the value back from the depot, so parents sharing a module share
//!   one loaded instance.
//! - [`Artifact::join`] / [`Artifact::filter`]: splittable (ranged) data.
//!   Types that do not override them cannot be stored in slices.
//!
//! Storage and the write-behind queue work with the object-safe
//! [`DynArtifact`], which every `Artifact` gets for free.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::desc::{AnyDesc, Desc};
use crate::error::CodecError;
use crate::temporal::TimeRange;

/// Bytes <-> value conversion for one artifact type.
pub trait Codec<X>: 'static {
    /// Serialize `value`.
    fn encode(value: &X) -> Result<Vec<u8>, CodecError>;
    /// Deserialize a value.
    fn decode(bytes: &[u8]) -> Result<X, CodecError>;
}

/// The default codec: JSON via serde.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<X: Serialize + DeserializeOwned> Codec<X> for JsonCodec {
    fn encode(value: &X) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(bytes: &[u8]) -> Result<X, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// A value the depot can cache and persist.
pub trait Artifact: Send + Sync + Sized + 'static {
    /// Kind segment of this type's ids.
    const KIND: &'static str;

    /// Whether a bound value may be replaced by a different one without an
    /// explicit remove.
    const OVERWRITABLE: bool = true;

    /// Serialization for this type.
    type Codec: Codec<Self>;

    /// The artifact's own descriptor, if it can report one.
    fn self_desc(&self) -> Option<Desc<Self>> {
        None
    }

    /// Sub-artifacts to persist alongside this one.
    fn modules(&self) -> Vec<Module> {
        Vec::new()
    }

    /// Reattach sub-artifacts after decoding, loading each through
    /// `modules`.
    fn relink<R: Resolver>(&mut self, modules: &R) -> Result<(), CodecError> {
        let _ = modules;
        Ok(())
    }

    /// Concatenate chronologically ordered slices.
    fn join(parts: Vec<Self>) -> Result<Self, CodecError> {
        drop(parts);
        Err(CodecError::Unsupported {
            kind: Self::KIND,
            operation: "join",
        })
    }

    /// Keep only the part of `self` inside `range`.
    fn filter(self, range: &TimeRange) -> Result<Self, CodecError> {
        let _ = range;
        Err(CodecError::Unsupported {
            kind: Self::KIND,
            operation: "filter",
        })
    }

    /// Encode with [`Self::Codec`].
    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        <Self::Codec as Codec<Self>>::encode(self)
    }

    /// Decode with [`Self::Codec`].
    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        <Self::Codec as Codec<Self>>::decode(bytes)
    }
}

/// Loads modules by descriptor for [`Artifact::relink`].
pub trait Resolver {
    /// The value stored under `desc`, `None` if nothing is.
    fn resolve<X: Artifact>(&self, desc: &Desc<X>) -> Result<Option<Arc<X>>, CodecError>;
}

/// Object-safe view of an [`Artifact`].
pub trait DynArtifact: Send + Sync + 'static {
    /// The artifact kind.
    fn kind(&self) -> &'static str;
    /// Whether the type allows overwriting.
    fn overwritable(&self) -> bool;
    /// Encode with the type's codec.
    fn encode_dyn(&self) -> Result<Vec<u8>, CodecError>;
    /// Declared sub-artifacts.
    fn modules_dyn(&self) -> Vec<Module>;
    /// Upcast for downcasting back to the concrete type.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<X: Artifact> DynArtifact for X {
    fn kind(&self) -> &'static str {
        X::KIND
    }

    fn overwritable(&self) -> bool {
        X::OVERWRITABLE
    }

    fn encode_dyn(&self) -> Result<Vec<u8>, CodecError> {
        self.encode()
    }

    fn modules_dyn(&self) -> Vec<Module> {
        self.modules()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Address of the value behind an `Arc`, used as an identity key.
pub fn arc_addr<T: ?Sized>(value: &Arc<T>) -> usize {
    Arc::as_ptr(value) as *const () as usize
}

/// A sub-artifact and the descriptor it is persisted under.
#[derive(Clone)]
pub struct Module {
    desc: AnyDesc,
    value: Arc<dyn DynArtifact>,
}

impl Module {
    /// Pair a typed value with its descriptor.
    pub fn new<X: Artifact>(desc: &Desc<X>, value: Arc<X>) -> Self {
        Self {
            desc: desc.erase(),
            value,
        }
    }

    /// The module's descriptor.
    pub fn desc(&self) -> &AnyDesc {
        &self.desc
    }

    /// The module's value.
    pub fn value(&self) -> &Arc<dyn DynArtifact> {
        &self.value
    }

    /// Recover the typed pair when the kind matches.
    pub fn downcast<X: Artifact>(&self) -> Option<(Desc<X>, Arc<X>)> {
        let desc = self.desc.downcast::<X>()?;
        let value = Arc::clone(&self.value).into_any().downcast::<X>().ok()?;
        Some((desc, value))
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("desc", &self.desc)
            .field("kind", &self.value.kind())
            .finish()
    }
}

/// A module field persisted as its descriptor.
///
/// Serializes to the descriptor alone; a decoded `ModuleRef` stays detached
/// until [`relink`](Self::relink) loads its value.
pub struct ModuleRef<X> {
    desc: Desc<X>,
    value: Option<Arc<X>>,
}

impl<X: Artifact> ModuleRef<X> {
    pub fn new(desc: Desc<X>, value: Arc<X>) -> Self {
        Self {
            desc,
            value: Some(value),
        }
    }

    pub fn desc(&self) -> &Desc<X> {
        &self.desc
    }

    /// The attached value. `None` before relinking, or when nothing was
    /// stored under the descriptor.
    pub fn get(&self) -> Option<&Arc<X>> {
        self.value.as_ref()
    }

    /// This field as a [`Module`], if attached.
    pub fn module(&self) -> Option<Module> {
        self.value.as_ref().map(|v| Module::new(&self.desc, Arc::clone(v)))
    }

    pub fn relink<R: Resolver>(&mut self, modules: &R) -> Result<(), CodecError> {
        self.value = modules.resolve(&self.desc)?;
        Ok(())
    }
}

impl<X> Clone for ModuleRef<X> {
    fn clone(&self) -> Self {
        Self {
            desc: self.desc.clone(),
            value: self.value.clone(),
        }
    }
}

impl<X> fmt::Debug for ModuleRef<X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRef")
            .field("desc", &self.desc)
            .field("attached", &self.value.is_some())
            .finish()
    }
}

impl<X> Serialize for ModuleRef<X> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.desc.serialize(serializer)
    }
}

impl<'de, X: Artifact> Deserialize<'de> for ModuleRef<X> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let any = AnyDesc::deserialize(deserializer)?;
        let desc = any
            .downcast::<X>()
            .ok_or_else(|| D::Error::custom(format!("module {any} is not a {}", X::KIND)))?;
        Ok(Self { desc, value: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Vocab {
        words: Vec<String>,
    }

    impl Artifact for Vocab {
        const KIND: &'static str = "Vocab";
        type Codec = JsonCodec;
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Model {
        dim: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        vocab: Option<ModuleRef<Vocab>>,
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

    fn vocab_desc() -> Desc<Vocab> {
        Desc::<Vocab>::builder("vocab").build()
    }

    /// Hands out one shared vocabulary for every request.
    struct Shelf(Arc<Vocab>);

    impl Resolver for Shelf {
        fn resolve<X: Artifact>(&self, _desc: &Desc<X>) -> Result<Option<Arc<X>>, CodecError> {
            let any: Arc<dyn Any + Send + Sync> = self.0.clone();
            Ok(any.downcast::<X>().ok())
        }
    }

    #[test]
    fn json_codec_roundtrip() {
        let v = Vocab {
            words: vec!["a".into(), "b".into()],
        };
        let bytes = v.encode().unwrap();
        assert_eq!(Vocab::decode(&bytes).unwrap(), v);
    }

    #[test]
    fn json_codec_rejects_garbage() {
        assert!(matches!(Vocab::decode(b"not json"), Err(CodecError::Json(_))));
    }

    #[test]
    fn default_join_is_unsupported() {
        let err = Vocab::join(vec![]).unwrap_err();
        assert!(matches!(err, CodecError::Unsupported { kind: "Vocab", operation: "join" }));
    }

    #[test]
    fn dyn_view_reports_type_traits() {
        let m: Arc<dyn DynArtifact> = Arc::new(Model { dim: 3, vocab: None });
        assert_eq!(m.kind(), "Model");
        assert!(!m.overwritable());
        assert_eq!(m.encode_dyn().unwrap(), br#"{"dim":3}"#.to_vec());
    }

    #[test]
    fn module_downcast_preserves_identity() {
        let vocab = Arc::new(Vocab { words: vec![] });
        let model = Model {
            dim: 1,
            vocab: Some(ModuleRef::new(vocab_desc(), Arc::clone(&vocab))),
        };
        let modules = model.modules();
        assert_eq!(modules.len(), 1);
        let (desc, value) = modules[0].downcast::<Vocab>().unwrap();
        assert_eq!(desc.kind(), "Vocab");
        assert!(Arc::ptr_eq(&value, &vocab));
        assert!(modules[0].downcast::<Model>().is_none());
    }

    #[test]
    fn module_ref_persists_only_the_descriptor() {
        let model = Model {
            dim: 2,
            vocab: Some(ModuleRef::new(vocab_desc(), Arc::new(Vocab { words: vec!["w".into()] }))),
        };
        let json = String::from_utf8(model.encode().unwrap()).unwrap();
        assert!(json.contains("untagged/Vocab/local/vocab"), "{json}");
        assert!(!json.contains("\"w\""), "{json}");

        let back = Model::decode(json.as_bytes()).unwrap();
        let vocab = back.vocab.as_ref().unwrap();
        assert_eq!(vocab.desc(), &vocab_desc());
        assert!(vocab.get().is_none());
        assert!(back.modules().is_empty());
    }

    #[test]
    fn relink_attaches_the_resolved_instance() {
        let shared = Arc::new(Vocab { words: vec!["w".into()] });
        let bytes = Model {
            dim: 2,
            vocab: Some(ModuleRef::new(vocab_desc(), Arc::clone(&shared))),
        }
        .encode()
        .unwrap();
        let mut a = Model::decode(&bytes).unwrap();
        let mut b = Model::decode(&bytes).unwrap();
        a.relink(&Shelf(Arc::clone(&shared))).unwrap();
        b.relink(&Shelf(Arc::clone(&shared))).unwrap();
        let (va, vb) = (a.vocab.unwrap(), b.vocab.unwrap());
        assert!(Arc::ptr_eq(va.get().unwrap(), &shared));
        assert!(Arc::ptr_eq(va.get().unwrap(), vb.get().unwrap()));
    }

    #[test]
    fn module_ref_rejects_a_descriptor_of_another_kind() {
        let json = serde_json::to_vec(&Desc::<Model>::builder("m").build()).unwrap();
        assert!(serde_json::from_slice::<ModuleRef<Vocab>>(&json).is_err());
    }

    #[test]
    fn arc_addr_matches_across_upcast() {
        let v = Arc::new(Vocab { words: vec![] });
        let any: Arc<dyn Any + Send + Sync> = Arc::clone(&v) as Arc<dyn Any + Send + Sync>;
        assert_eq!(arc_addr(&v), arc_addr(&any));
    }
}
