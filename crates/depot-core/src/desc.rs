//! # Descriptors
//!
//! A [`Desc<X>`] names one artifact of type `X`. Its identity is a single
//! id string derived from its fields; equality, hashing and ordering are
//! defined by that string alone.
//!
//! ## Freezing
//!
//! Descriptors are assembled with a [`DescBuilder<X>`] and frozen by
//! [`DescBuilder::build`], which computes the id exactly once. A frozen
//! `Desc<X>` has no mutators, so an id can never drift after first use.
//! [`Desc::derive`] returns a fresh builder holding a copy of the fields.
//!
//! Properties are write-once even on the builder: setting a key again to an
//! equal value is a no-op, to a different value is a
//! [`DescError::ConflictingProperty`].
//!
//! ## Id Layout
//!
//! ```text
//! tag/kind/server/k1=v1_k2=v2/<sha256 of nested and h: props>/name.vVERSION_/start_end.gz
//! ```
//!
//! Properties appear sorted by key. Nested descriptors and keys starting
//! `h:` are folded into a single digest segment so that dependency chains
//! take a bounded amount of path. When the part before the name exceeds
//! [`MAX_PREFIX_LEN`] chars it is collapsed to its first
//! [`COLLAPSED_PREFIX_KEEP`] chars plus a digest of the whole.
//!
//! ## Typed and Erased
//!
//! The type parameter only carries the artifact kind. [`AnyDesc`] is the
//! erased form used by stores, metadata records and symlink targets;
//! [`AnyDesc::downcast`] recovers a typed descriptor when the kinds agree.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::artifact::Artifact;
use crate::digest::{collapse, sha256_hex};
use crate::error::DescError;
use crate::temporal::TimeRange;

/// Longest permitted property key.
pub const MAX_KEY_LEN: usize = 128;

/// Longest permitted exposed (non-hashed) property value.
pub const MAX_VALUE_LEN: usize = 254;

/// Id prefixes longer than this are collapsed.
pub const MAX_PREFIX_LEN: usize = 512;

/// Chars of a collapsed prefix kept verbatim.
pub const COLLAPSED_PREFIX_KEEP: usize = 140;

/// Keys with this prefix are hashed into the id rather than exposed.
pub const HASHED_KEY_PREFIX: &str = "h:";

/// Dependencies are stored as properties under `d:<role>`.
pub const DEPENDENCY_KEY_PREFIX: &str = "d:";

/// Tag segment used when no tag is set.
pub const UNTAGGED: &str = "untagged";

const VERSION_STAMP_KEY: &str = "h:version_stamp";

/// Placement hint: where an artifact is sought and stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Server {
    /// This machine only. Never pushed or fetched remotely.
    #[default]
    Local,
    /// Wherever it can be found; remote lookups go to the default host.
    Any,
    /// The configured central server.
    Central,
    /// A named host.
    Host(String),
}

impl Server {
    /// Id segment for this placement.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Local => "local",
            Self::Any => "any",
            Self::Central => "central",
            Self::Host(h) => h,
        }
    }

    /// True for [`Server::Local`].
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Server {
    fn from(s: String) -> Self {
        match s.as_str() {
            "local" => Self::Local,
            "any" => Self::Any,
            "central" => Self::Central,
            _ => Self::Host(s),
        }
    }
}

impl From<&str> for Server {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<Server> for String {
    fn from(s: Server) -> Self {
        s.as_str().to_string()
    }
}

/// A property value. Floats are deliberately absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    /// Boolean flag.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Text.
    Str(String),
    /// A nested descriptor; always hashed into the id.
    Desc(AnyDesc),
}

impl PropValue {
    /// The nested descriptor, if this is one.
    pub fn as_desc(&self) -> Option<&AnyDesc> {
        match self {
            Self::Desc(d) => Some(d),
            _ => None,
        }
    }
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => f.write_str(s),
            Self::Desc(d) => f.write_str(d.id()),
        }
    }
}

/// Conversion into a [`PropValue`], checked against the key it is stored under.
pub trait IntoPropValue {
    /// Convert, or reject the value for `key`.
    fn into_prop_value(self, key: &str) -> Result<PropValue, DescError>;
}

impl IntoPropValue for PropValue {
    fn into_prop_value(self, _key: &str) -> Result<PropValue, DescError> {
        Ok(self)
    }
}

impl IntoPropValue for &str {
    fn into_prop_value(self, _key: &str) -> Result<PropValue, DescError> {
        Ok(PropValue::Str(self.to_string()))
    }
}

impl IntoPropValue for String {
    fn into_prop_value(self, _key: &str) -> Result<PropValue, DescError> {
        Ok(PropValue::Str(self))
    }
}

impl IntoPropValue for bool {
    fn into_prop_value(self, _key: &str) -> Result<PropValue, DescError> {
        Ok(PropValue::Bool(self))
    }
}

macro_rules! int_prop_value {
    ($($t:ty),*) => {$(
        impl IntoPropValue for $t {
            fn into_prop_value(self, _key: &str) -> Result<PropValue, DescError> {
                Ok(PropValue::Int(i64::from(self)))
            }
        }
    )*};
}

int_prop_value!(i8, i16, i32, i64, u8, u16, u32);

macro_rules! float_prop_value {
    ($($t:ty),*) => {$(
        impl IntoPropValue for $t {
            fn into_prop_value(self, key: &str) -> Result<PropValue, DescError> {
                Err(DescError::FloatRejected {
                    key: key.to_string(),
                    value: self.to_string(),
                })
            }
        }
    )*};
}

float_prop_value!(f32, f64);

impl<X> IntoPropValue for &Desc<X> {
    fn into_prop_value(self, _key: &str) -> Result<PropValue, DescError> {
        Ok(PropValue::Desc(self.erase()))
    }
}

impl<X> IntoPropValue for Desc<X> {
    fn into_prop_value(self, _key: &str) -> Result<PropValue, DescError> {
        Ok(PropValue::Desc(self.erase()))
    }
}

/// Marker for erased descriptors. Uninhabited.
#[derive(Debug)]
pub enum Untyped {}

/// A descriptor whose artifact type is only known by its kind string.
pub type AnyDesc = Desc<Untyped>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct DescFields {
    name: Option<String>,
    tag: Option<String>,
    kind: String,
    server: Server,
    properties: BTreeMap<String, PropValue>,
    version: Option<String>,
    range: Option<TimeRange>,
    symlink: bool,
    read_only: bool,
    compressed: bool,
    max_age: Option<Duration>,
}

impl DescFields {
    fn new(kind: &str) -> Self {
        Self {
            name: None,
            tag: None,
            kind: kind.to_string(),
            server: Server::Local,
            properties: BTreeMap::new(),
            version: None,
            range: None,
            symlink: false,
            read_only: false,
            compressed: false,
            max_age: None,
        }
    }

    fn compute_id(&self) -> String {
        let mut prefix = String::new();
        prefix.push_str(&escape(self.tag.as_deref().unwrap_or(UNTAGGED)));
        prefix.push('/');
        prefix.push_str(&escape(&self.kind));
        prefix.push('/');
        prefix.push_str(&escape(self.server.as_str()));
        prefix.push('/');

        let mut exposed = String::new();
        let mut hashed = String::new();
        for (key, value) in &self.properties {
            if is_hashed(key, value) {
                hashed.push_str(key);
                hashed.push('=');
                hashed.push_str(&value.to_string());
            } else {
                exposed.push_str(&escape(key));
                exposed.push('=');
                exposed.push_str(&escape(&value.to_string()));
                exposed.push('_');
            }
        }
        if !exposed.is_empty() {
            exposed.pop();
            prefix.push_str(&exposed);
            prefix.push('/');
        }
        if !hashed.is_empty() {
            prefix.push_str(&sha256_hex(&hashed));
            prefix.push('/');
        }

        if prefix.len() > MAX_PREFIX_LEN {
            prefix = collapse(&prefix, COLLAPSED_PREFIX_KEEP);
            prefix.push('/');
        }

        let mut id = prefix;
        if let Some(name) = &self.name {
            id.push_str(&escape_label(name));
        }
        if let Some(v) = &self.version {
            id.push_str(".v");
            id.push_str(&escape_label(v));
        }
        if let Some(r) = &self.range {
            id.push_str("_/");
            id.push_str(&r.to_segment());
        }
        if self.compressed {
            id.push_str(".gz");
        }
        id
    }
}

fn is_hashed(key: &str, value: &PropValue) -> bool {
    key.starts_with(HASHED_KEY_PREFIX) || matches!(value, PropValue::Desc(_))
}

/// Keep `/` out of id components so segments map one-to-one onto paths.
fn escape(s: &str) -> String {
    if !s.contains(['/', '%']) {
        return s.to_string();
    }
    s.replace('%', "%25").replace('/', "%2F")
}

/// [`escape`] for names and versions, which must also not imitate the
/// `.v`, `_/` and `.gz` suffixes the id appends after them.
fn escape_label(s: &str) -> String {
    let mut out = escape(s).replace(".v", "%2Ev");
    if out.ends_with(".gz") {
        let dot = out.len() - 3;
        out.replace_range(dot..dot + 1, "%2E");
    }
    if out.ends_with('_') {
        out.pop();
        out.push_str("%5F");
    }
    out
}

struct DescData {
    fields: DescFields,
    id: String,
}

/// A frozen descriptor for an artifact of type `X`.
///
/// Cheap to clone; the fields live behind an `Arc`.
pub struct Desc<X> {
    inner: Arc<DescData>,
    _kind: PhantomData<fn() -> X>,
}

impl<X: Artifact> Desc<X> {
    /// Start building a descriptor named `name` for kind `X::KIND`.
    pub fn builder(name: impl Into<String>) -> DescBuilder<X> {
        DescBuilder::for_kind(X::KIND).name(name)
    }

    /// Start building a partial descriptor (no name) for queries.
    pub fn partial() -> DescBuilder<X> {
        DescBuilder::for_kind(X::KIND)
    }
}

impl AnyDesc {
    /// Start building an erased descriptor of the given kind.
    pub fn builder_for_kind(kind: &str) -> DescBuilder<Untyped> {
        DescBuilder::for_kind(kind)
    }

    /// Recover a typed descriptor if the kinds agree.
    pub fn downcast<X: Artifact>(&self) -> Option<Desc<X>> {
        (self.kind() == X::KIND).then(|| self.retype())
    }
}

impl<X> Desc<X> {
    /// The derived id.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Artifact name, unset on partial descriptors.
    pub fn name(&self) -> Option<&str> {
        self.inner.fields.name.as_deref()
    }

    /// Namespace tag.
    pub fn tag(&self) -> Option<&str> {
        self.inner.fields.tag.as_deref()
    }

    /// Artifact kind.
    pub fn kind(&self) -> &str {
        &self.inner.fields.kind
    }

    /// Placement hint.
    pub fn server(&self) -> &Server {
        &self.inner.fields.server
    }

    /// All properties, sorted by key.
    pub fn properties(&self) -> &BTreeMap<String, PropValue> {
        &self.inner.fields.properties
    }

    /// A single property.
    pub fn get(&self, key: &str) -> Option<&PropValue> {
        self.inner.fields.properties.get(key)
    }

    /// Version label.
    pub fn version(&self) -> Option<&str> {
        self.inner.fields.version.as_deref()
    }

    /// Time window for ranged artifacts.
    pub fn range(&self) -> Option<&TimeRange> {
        self.inner.fields.range.as_ref()
    }

    /// True for symlink (alias) descriptors.
    pub fn is_symlink(&self) -> bool {
        self.inner.fields.symlink
    }

    /// True if the artifact must never be pushed.
    pub fn is_read_only(&self) -> bool {
        self.inner.fields.read_only
    }

    /// True if the stored form is gzipped.
    pub fn is_compressed(&self) -> bool {
        self.inner.fields.compressed
    }

    /// Freshness TTL.
    pub fn max_age(&self) -> Option<Duration> {
        self.inner.fields.max_age
    }

    /// The erased form of this descriptor.
    pub fn erase(&self) -> AnyDesc {
        self.retype()
    }

    fn retype<Y>(&self) -> Desc<Y> {
        Desc {
            inner: Arc::clone(&self.inner),
            _kind: PhantomData,
        }
    }

    /// A fresh builder holding a copy of these fields.
    pub fn derive(&self) -> DescBuilder<X> {
        DescBuilder {
            fields: self.inner.fields.clone(),
            _kind: PhantomData,
        }
    }

    /// The same descriptor restricted to another window.
    pub fn with_range(&self, range: TimeRange) -> Desc<X> {
        self.derive().range(range).build()
    }

    /// The same descriptor with no window (the slice directory's owner).
    pub fn without_range(&self) -> Desc<X> {
        let mut b = self.derive();
        b.fields.range = None;
        b.build()
    }

    /// Nested descriptors, transitively, in first-seen order without repeats.
    pub fn dependencies(&self) -> Vec<AnyDesc> {
        let mut out: Vec<AnyDesc> = Vec::new();
        collect_dependencies(&self.erase(), &mut out);
        out
    }

    /// One-directional subset match.
    ///
    /// Every field set on `self` must agree with `other`; unset name, tag and
    /// version are unconstrained, as is `Server::Any`. Every property on
    /// `self` must be present and equal on `other`. A window on `self` matches
    /// any intersecting window on `other`.
    pub fn partial_match<Y>(&self, other: &Desc<Y>) -> bool {
        let a = &self.inner.fields;
        let b = &other.inner.fields;
        if a.kind != b.kind {
            return false;
        }
        if a.name.is_some() && a.name != b.name {
            return false;
        }
        if a.tag.is_some() && a.tag != b.tag {
            return false;
        }
        if a.version.is_some() && a.version != b.version {
            return false;
        }
        if a.server != Server::Any && a.server != b.server {
            return false;
        }
        if let Some(r) = &a.range {
            match &b.range {
                Some(other_range) if r.intersects(other_range) => {}
                _ => return false,
            }
        }
        a.properties
            .iter()
            .all(|(k, v)| b.properties.get(k) == Some(v))
    }
}

fn collect_dependencies(desc: &AnyDesc, out: &mut Vec<AnyDesc>) {
    for value in desc.properties().values() {
        if let PropValue::Desc(d) = value {
            if !out.contains(d) {
                out.push(d.clone());
                collect_dependencies(d, out);
            }
        }
    }
}

impl<X> Clone for Desc<X> {
    fn clone(&self) -> Self {
        self.retype()
    }
}

impl<X> PartialEq for Desc<X> {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl<X> Eq for Desc<X> {}

impl<X> Hash for Desc<X> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl<X> PartialOrd for Desc<X> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<X> Ord for Desc<X> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id().cmp(other.id())
    }
}

impl<X> fmt::Display for Desc<X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl<X> fmt::Debug for Desc<X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Desc").field(&self.id()).finish()
    }
}

impl<X> From<&Desc<X>> for AnyDesc {
    fn from(d: &Desc<X>) -> Self {
        d.erase()
    }
}

/// A descriptor under construction.
#[derive(Debug, Clone)]
pub struct DescBuilder<X> {
    fields: DescFields,
    _kind: PhantomData<fn() -> X>,
}

impl<X> DescBuilder<X> {
    fn for_kind(kind: &str) -> Self {
        Self {
            fields: DescFields::new(kind),
            _kind: PhantomData,
        }
    }

    /// Set the artifact name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.fields.name = Some(name.into());
        self
    }

    /// Set the namespace tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.fields.tag = Some(tag.into());
        self
    }

    /// Set the placement hint.
    pub fn server(mut self, server: impl Into<Server>) -> Self {
        let server = server.into();
        if let Server::Host(h) = &server {
            if h.is_empty() || h.contains(['/', ' ']) {
                tracing::warn!(server = %h, "dubious server name in descriptor");
            }
        }
        self.fields.server = server;
        self
    }

    /// Set the version label.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.fields.version = Some(version.into());
        self
    }

    /// Set the time window.
    pub fn range(mut self, range: TimeRange) -> Self {
        self.fields.range = Some(range);
        self
    }

    /// Mark as a symlink (alias) descriptor.
    pub fn symlink(mut self, symlink: bool) -> Self {
        self.fields.symlink = symlink;
        self
    }

    /// Mark as read-only (never pushed remotely).
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.fields.read_only = read_only;
        self
    }

    /// Store gzipped.
    pub fn compressed(mut self, compressed: bool) -> Self {
        self.fields.compressed = compressed;
        self
    }

    /// Freshness TTL.
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.fields.max_age = Some(max_age);
        self
    }

    /// Set a property.
    ///
    /// # Errors
    ///
    /// - [`DescError::KeyTooLong`] / [`DescError::ValueTooLong`] on limits.
    /// - [`DescError::FloatRejected`] for float values.
    /// - [`DescError::ConflictingProperty`] if `key` already holds a
    ///   different value. Setting an equal value is a no-op.
    pub fn put(mut self, key: impl Into<String>, value: impl IntoPropValue) -> Result<Self, DescError> {
        let key = key.into();
        if key.len() > MAX_KEY_LEN {
            return Err(DescError::KeyTooLong {
                len: key.len(),
                max: MAX_KEY_LEN,
                key,
            });
        }
        let value = value.into_prop_value(&key)?;
        if !is_hashed(&key, &value) {
            let len = value.to_string().len();
            if len > MAX_VALUE_LEN {
                return Err(DescError::ValueTooLong {
                    key,
                    len,
                    max: MAX_VALUE_LEN,
                });
            }
        }
        match self.fields.properties.get(&key).cloned() {
            Some(old) if old == value => Ok(self),
            Some(old) => {
                let name = self.fields.name.clone().unwrap_or_default();
                tracing::error!(
                    name = %name,
                    key = %key,
                    old = %old,
                    new = %value,
                    "refusing to overwrite descriptor property"
                );
                Err(DescError::ConflictingProperty {
                    name,
                    old: old.to_string(),
                    new: value.to_string(),
                    key,
                })
            }
            None => {
                self.fields.properties.insert(key, value);
                Ok(self)
            }
        }
    }

    /// Record a dependency on `dep` under the role `role`.
    pub fn depends_on<Y>(self, role: &str, dep: &Desc<Y>) -> Result<Self, DescError> {
        self.put(format!("{DEPENDENCY_KEY_PREFIX}{role}"), dep)
    }

    /// Hash a serializable configuration into the id.
    ///
    /// Two descriptors built with configurations that serialize identically
    /// share an id; any change in the configuration gives a new one.
    pub fn with_version_stamp<C: Serialize>(self, config: &C) -> Result<Self, DescError> {
        let json = serde_json::to_string(config).map_err(|e| DescError::VersionStamp(e.to_string()))?;
        self.put(VERSION_STAMP_KEY, json)
    }

    /// Freeze the descriptor and derive its id.
    pub fn build(self) -> Desc<X> {
        let id = self.fields.compute_id();
        Desc {
            inner: Arc::new(DescData {
                fields: self.fields,
                id,
            }),
            _kind: PhantomData,
        }
    }
}

/// Serialized form of a descriptor. The id is informational; it is
/// recomputed on load.
#[derive(Serialize, Deserialize)]
struct DescRecord {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tag: Option<String>,
    kind: String,
    #[serde(default)]
    server: Server,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    properties: BTreeMap<String, PropValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    range: Option<TimeRange>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    symlink: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    read_only: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    compressed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_age_secs: Option<u64>,
}

impl<X> Serialize for Desc<X> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let f = &self.inner.fields;
        DescRecord {
            id: self.inner.id.clone(),
            name: f.name.clone(),
            tag: f.tag.clone(),
            kind: f.kind.clone(),
            server: f.server.clone(),
            properties: f.properties.clone(),
            version: f.version.clone(),
            range: f.range,
            symlink: f.symlink,
            read_only: f.read_only,
            compressed: f.compressed,
            max_age_secs: f.max_age.map(|d| d.as_secs()),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AnyDesc {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let r = DescRecord::deserialize(deserializer)?;
        let fields = DescFields {
            name: r.name,
            tag: r.tag,
            kind: r.kind,
            server: r.server,
            properties: r.properties,
            version: r.version,
            range: r.range,
            symlink: r.symlink,
            read_only: r.read_only,
            compressed: r.compressed,
            max_age: r.max_age_secs.map(Duration::from_secs),
        };
        Ok(DescBuilder {
            fields,
            _kind: PhantomData,
        }
        .build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::Blob;

    fn stopwords() -> Desc<Blob> {
        Desc::<Blob>::builder("stopwords.txt")
            .tag("nlp")
            .put("lang", "en")
            .unwrap()
            .build()
    }

    #[test]
    fn id_layout() {
        assert_eq!(stopwords().id(), "nlp/File/local/lang=en/stopwords.txt");
    }

    #[test]
    fn untagged_and_no_properties() {
        let d = Desc::<Blob>::builder("x").build();
        assert_eq!(d.id(), "untagged/File/local/x");
    }

    #[test]
    fn properties_are_sorted() {
        let a = Desc::<Blob>::builder("n")
            .put("b", 2)
            .unwrap()
            .put("a", true)
            .unwrap()
            .build();
        assert_eq!(a.id(), "untagged/File/local/a=true_b=2/n");
    }

    #[test]
    fn version_range_and_compression_suffixes() {
        let range = TimeRange::from_epoch_secs(100, 200).unwrap();
        let d = Desc::<Blob>::builder("log")
            .tag("t")
            .server(Server::Central)
            .version("3")
            .range(range)
            .compressed(true)
            .build();
        assert_eq!(d.id(), "t/File/central/log.v3_/100_200.gz");
        assert_eq!(d.without_range().id(), "t/File/central/log.v3.gz");
    }

    #[test]
    fn names_cannot_forge_suffixes() {
        let named = |name: &str| Desc::<Blob>::builder(name).tag("t").build();
        let zipped = Desc::<Blob>::builder("x").tag("t").compressed(true).build();
        assert_ne!(named("x.gz"), zipped);
        assert_eq!(named("x.gz").id(), "t/File/local/x%2Egz");

        let versioned = Desc::<Blob>::builder("a").tag("t").version("1").build();
        assert_ne!(named("a.v1"), versioned);
        assert_eq!(named("a.v1").id(), "t/File/local/a%2Ev1");

        let sliced = Desc::<Blob>::builder("ev")
            .tag("t")
            .range(TimeRange::from_epoch_secs(0, 1).unwrap())
            .build();
        assert_eq!(named("ev_").id(), "t/File/local/ev%5F");
        assert!(!sliced.id().starts_with(named("ev_").id()));

        let odd_version = Desc::<Blob>::builder("a").tag("t").version("1.gz").build();
        let zipped_version = Desc::<Blob>::builder("a").tag("t").version("1").compressed(true).build();
        assert_ne!(odd_version, zipped_version);

        assert_eq!(named("notes.txt").id(), "t/File/local/notes.txt");
    }

    #[test]
    fn equal_fields_give_equal_descriptors() {
        let a = stopwords();
        let b = stopwords();
        assert_eq!(a, b);
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn equal_reput_is_noop() {
        let d = Desc::<Blob>::builder("n")
            .put("lang", "en")
            .unwrap()
            .put("lang", "en")
            .unwrap()
            .build();
        assert_eq!(d.properties().len(), 1);
    }

    #[test]
    fn conflicting_reput_errors() {
        let err = Desc::<Blob>::builder("n")
            .put("lang", "en")
            .unwrap()
            .put("lang", "fr")
            .unwrap_err();
        assert!(matches!(err, DescError::ConflictingProperty { ref old, ref new, .. } if old == "en" && new == "fr"));
    }

    #[test]
    fn floats_rejected() {
        let err = Desc::<Blob>::builder("n").put("price", 1.5_f64).unwrap_err();
        assert!(matches!(err, DescError::FloatRejected { .. }));
    }

    #[test]
    fn key_and_value_limits() {
        let long_key = "k".repeat(MAX_KEY_LEN + 1);
        assert!(matches!(
            Desc::<Blob>::builder("n").put(long_key, 1).unwrap_err(),
            DescError::KeyTooLong { .. }
        ));
        let long_value = "v".repeat(MAX_VALUE_LEN + 1);
        assert!(matches!(
            Desc::<Blob>::builder("n").put("k", long_value.clone()).unwrap_err(),
            DescError::ValueTooLong { .. }
        ));
        // Hashed keys have no value limit.
        assert!(Desc::<Blob>::builder("n").put("h:k", long_value).is_ok());
    }

    #[test]
    fn nested_descriptors_are_hashed() {
        let dep = stopwords();
        let d = Desc::<Blob>::builder("model")
            .tag("nlp")
            .depends_on("src", &dep)
            .unwrap()
            .put("dim", 50)
            .unwrap()
            .build();
        let expected_hash = sha256_hex(format!("d:src={}", dep.id()));
        assert_eq!(d.id(), format!("nlp/File/local/dim=50/{expected_hash}/model"));
        assert!(!d.id().contains("stopwords"));
    }

    #[test]
    fn slashes_in_values_do_not_add_segments() {
        let d = Desc::<Blob>::builder("a/b").put("path", "x/y").unwrap().build();
        assert_eq!(d.id(), "untagged/File/local/path=x%2Fy/a%2Fb");
    }

    #[test]
    fn long_prefix_collapses() {
        let mut b = Desc::<Blob>::builder("n");
        for i in 0..10 {
            b = b.put(format!("key{i}"), "v".repeat(60)).unwrap();
        }
        let d = b.build();
        let (prefix, name) = d.id().rsplit_once('/').unwrap();
        assert_eq!(name, "n");
        assert_eq!(prefix.len(), COLLAPSED_PREFIX_KEEP + crate::digest::DIGEST_HEX_LEN);
    }

    #[test]
    fn dependencies_are_transitive() {
        let a = Desc::<Blob>::builder("a").build();
        let b = Desc::<Blob>::builder("b").depends_on("x", &a).unwrap().build();
        let c = Desc::<Blob>::builder("c")
            .depends_on("y", &b)
            .unwrap()
            .depends_on("z", &a)
            .unwrap()
            .build();
        let deps = c.dependencies();
        assert_eq!(deps.len(), 2);
        assert!(deps.contains(&a.erase()));
        assert!(deps.contains(&b.erase()));
    }

    #[test]
    fn partial_match_is_one_directional() {
        let full = stopwords();
        let partial = Desc::<Blob>::partial().tag("nlp").build();
        assert!(partial.partial_match(&full));
        assert!(!full.partial_match(&partial));
        assert_ne!(partial, full);

        let other_lang = Desc::<Blob>::partial().put("lang", "de").unwrap().build();
        assert!(!other_lang.partial_match(&full));
    }

    #[test]
    fn partial_match_any_server_is_wildcard() {
        let full = Desc::<Blob>::builder("n").server(Server::Central).build();
        assert!(Desc::<Blob>::partial().server(Server::Any).build().partial_match(&full));
        assert!(!Desc::<Blob>::partial().build().partial_match(&full));
    }

    #[test]
    fn derive_copies_fields() {
        let d = stopwords();
        let copy = d.derive().version("2").build();
        assert_eq!(copy.get("lang"), d.get("lang"));
        assert_eq!(copy.tag(), Some("nlp"));
        assert_ne!(copy, d);
    }

    #[test]
    fn version_stamp_changes_id_with_config() {
        #[derive(Serialize)]
        struct Cfg {
            window: u32,
        }
        let a = stopwords().derive().with_version_stamp(&Cfg { window: 5 }).unwrap().build();
        let b = stopwords().derive().with_version_stamp(&Cfg { window: 5 }).unwrap().build();
        let c = stopwords().derive().with_version_stamp(&Cfg { window: 6 }).unwrap().build();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn erase_and_downcast() {
        let d = stopwords();
        let any = d.erase();
        assert_eq!(any.id(), d.id());
        assert_eq!(any.downcast::<Blob>(), Some(d));
    }

    #[test]
    fn serde_roundtrip_recomputes_id() {
        let dep = stopwords();
        let d = Desc::<Blob>::builder("model")
            .depends_on("src", &dep)
            .unwrap()
            .max_age(Duration::from_secs(60))
            .read_only(true)
            .build();
        let json = serde_json::to_string(&d).unwrap();
        let back: AnyDesc = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id(), d.id());
        assert!(back.is_read_only());
        assert_eq!(back.max_age(), Some(Duration::from_secs(60)));
        assert_eq!(back.dependencies(), vec![dep.erase()]);
    }

    #[test]
    fn server_parse() {
        assert_eq!(Server::from("local"), Server::Local);
        assert_eq!(Server::from("central"), Server::Central);
        assert_eq!(Server::from("box7"), Server::Host("box7".into()));
    }
}
