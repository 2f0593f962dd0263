//! Values: concrete data or pending computations over other nodes' outputs
//!
//! A [`Value`] is cheap to clone and immutable. Transformations such as
//! [`Value::map`] build a new derived value that records its upstream values
//! without resolving anything. Only the convergence executor resolves values,
//! once every node they reference has been applied.
//!
//! Resolution is memoized per value: a derived transform runs at most once no
//! matter how many nodes consume it. The executor clears the memos when a
//! run starts, so converging the same graph again recomputes every transform
//! from that run's outputs.
//!
//! ```ignore
//! let key = graph.add(service_account_key)?;
//! let credentials = key.output("privateKey").decode_base64();
//! // `credentials` can feed any number of nodes; the decode runs once.
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use base64::Engine;
use serde_json::Value as Json;

use crate::error::ResolveError;
use crate::node::{Fields, NodeId};

static NEXT_VALUE_ID: AtomicU64 = AtomicU64::new(1);

type Transform = Box<dyn Fn(&[Json]) -> Result<Json, String> + Send + Sync>;

/// Process-unique identity of a value
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(u64);

impl ValueId {
    fn next() -> Self {
        Self(NEXT_VALUE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Read access to outputs published by applied nodes
pub trait OutputLookup: Send + Sync {
    /// Output `field` of `node`, if the node has been applied and reported it
    fn lookup(&self, node: &NodeId, field: &str) -> Option<Json>;
}

impl OutputLookup for std::collections::BTreeMap<NodeId, Fields> {
    fn lookup(&self, node: &NodeId, field: &str) -> Option<Json> {
        self.get(node).and_then(|fields| fields.get(field)).cloned()
    }
}

enum Source {
    Ready(Json),
    Output { node: NodeId, field: String },
    Derived { upstream: Vec<Value>, transform: Transform },
}

struct Cell {
    id: ValueId,
    source: Source,
    memo: Mutex<Option<Result<Json, ResolveError>>>,
}

impl Cell {
    fn lock_memo(&self) -> MutexGuard<'_, Option<Result<Json, ResolveError>>> {
        // A panicking transform leaves the memo empty, never half-written.
        self.memo.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A concrete value or a pending computation with upstream dependencies
#[derive(Clone)]
pub struct Value {
    cell: Arc<Cell>,
}

impl Value {
    fn from_source(source: Source) -> Self {
        Self {
            cell: Arc::new(Cell {
                id: ValueId::next(),
                source,
                memo: Mutex::new(None),
            }),
        }
    }

    /// A value known at declaration time
    pub fn ready(value: impl Into<Json>) -> Self {
        Self::from_source(Source::Ready(value.into()))
    }

    /// Output `field` of `node`, known once the node is applied
    pub(crate) fn output(node: NodeId, field: impl Into<String>) -> Self {
        Self::from_source(Source::Output {
            node,
            field: field.into(),
        })
    }

    /// Derive a value from several upstream values.
    ///
    /// `transform` receives the resolved upstream values in order.
    pub fn combine<F>(upstream: Vec<Value>, transform: F) -> Self
    where
        F: Fn(&[Json]) -> Result<Json, String> + Send + Sync + 'static,
    {
        Self::from_source(Source::Derived {
            upstream,
            transform: Box::new(transform),
        })
    }

    /// Derive a new value from this one without resolving it
    pub fn map<F>(&self, transform: F) -> Self
    where
        F: Fn(&Json) -> Result<Json, String> + Send + Sync + 'static,
    {
        Self::combine(vec![self.clone()], move |inputs| transform(&inputs[0]))
    }

    /// Like [`Value::map`] for string values; fails if the input is not a string
    pub fn map_str<F>(&self, transform: F) -> Self
    where
        F: Fn(&str) -> Result<String, String> + Send + Sync + 'static,
    {
        self.map(move |input| match input {
            Json::String(s) => transform(s).map(Json::String),
            other => Err(format!("expected a string, got {other}")),
        })
    }

    /// Decode a standard base64 string into UTF-8 text
    pub fn decode_base64(&self) -> Self {
        self.map_str(|encoded| {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| format!("invalid base64: {e}"))?;
            String::from_utf8(bytes).map_err(|e| format!("decoded bytes are not UTF-8: {e}"))
        })
    }

    /// A JSON object whose entries may themselves be pending
    pub fn object<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let (keys, values): (Vec<String>, Vec<Value>) = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .unzip();
        if values.iter().all(Value::is_ready) {
            let map = keys
                .into_iter()
                .zip(values.iter().filter_map(|v| v.ready_value().cloned()))
                .collect::<serde_json::Map<_, _>>();
            return Self::ready(Json::Object(map));
        }
        Self::combine(values, move |resolved| {
            Ok(Json::Object(
                keys.iter().cloned().zip(resolved.iter().cloned()).collect(),
            ))
        })
    }

    /// A JSON array whose elements may themselves be pending
    pub fn list<V, I>(items: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        let values: Vec<Value> = items.into_iter().map(Into::into).collect();
        Self::combine(values, |resolved| Ok(Json::Array(resolved.to_vec())))
    }

    /// Identity of this value
    pub fn id(&self) -> ValueId {
        self.cell.id
    }

    /// Whether the value is known without resolving anything
    pub fn is_ready(&self) -> bool {
        matches!(self.cell.source, Source::Ready(_))
    }

    /// The concrete value, when known at declaration time
    pub fn ready_value(&self) -> Option<&Json> {
        match &self.cell.source {
            Source::Ready(v) => Some(v),
            _ => None,
        }
    }

    /// Identities of the values this one is derived from
    pub fn upstream(&self) -> Vec<ValueId> {
        match &self.cell.source {
            Source::Derived { upstream, .. } => upstream.iter().map(Value::id).collect(),
            _ => Vec::new(),
        }
    }

    /// Every node whose output this value transitively depends on
    pub fn references(&self) -> BTreeSet<NodeId> {
        let mut nodes = BTreeSet::new();
        let mut visited = BTreeSet::new();
        let mut stack = vec![self.clone()];

        while let Some(value) = stack.pop() {
            if !visited.insert(value.id()) {
                continue;
            }
            match &value.cell.source {
                Source::Ready(_) => {}
                Source::Output { node, .. } => {
                    nodes.insert(node.clone());
                }
                Source::Derived { upstream, .. } => stack.extend(upstream.iter().cloned()),
            }
        }
        nodes
    }

    /// Drop cached transform results here and upstream, so the next
    /// resolution reads the current outputs
    pub(crate) fn clear_memo(&self) {
        if let Source::Derived { upstream, .. } = &self.cell.source {
            *self.cell.lock_memo() = None;
            for value in upstream {
                value.clear_memo();
            }
        }
    }

    /// Resolve to a concrete value.
    ///
    /// Derived values apply their transform once and cache the result,
    /// including transform failures. A missing upstream output is not cached
    /// so the value can still be resolved after the node is applied.
    pub fn resolve(&self, outputs: &dyn OutputLookup) -> Result<Json, ResolveError> {
        match &self.cell.source {
            Source::Ready(v) => Ok(v.clone()),
            Source::Output { node, field } => {
                outputs
                    .lookup(node, field)
                    .ok_or_else(|| ResolveError::MissingOutput {
                        node: node.clone(),
                        field: field.clone(),
                    })
            }
            Source::Derived {
                upstream,
                transform,
            } => {
                let mut memo = self.cell.lock_memo();
                if let Some(cached) = memo.as_ref() {
                    return cached.clone();
                }

                let inputs = upstream
                    .iter()
                    .map(|v| v.resolve(outputs))
                    .collect::<Result<Vec<_>, _>>()?;

                let result = transform(&inputs).map_err(|message| ResolveError::Transform {
                    value: self.id(),
                    message,
                });
                *memo = Some(result.clone());
                result
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cell.source {
            Source::Ready(v) => write!(f, "Ready({v})"),
            Source::Output { node, field } => write!(f, "Output({node}.{field})"),
            Source::Derived { upstream, .. } => f
                .debug_struct("Derived")
                .field("id", &self.id())
                .field("upstream", upstream)
                .finish(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cell.source {
            Source::Ready(v) => write!(f, "{v}"),
            Source::Output { node, field } => write!(f, "<{node}.{field}>"),
            Source::Derived { .. } => {
                let refs: Vec<String> = self.references().iter().map(ToString::to_string).collect();
                if refs.is_empty() {
                    write!(f, "<computed>")
                } else {
                    write!(f, "<computed from {}>", refs.join(", "))
                }
            }
        }
    }
}

impl From<Json> for Value {
    fn from(value: Json) -> Self {
        Self::ready(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::ready(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::ready(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::ready(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::ready(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::ready(value)
    }
}

impl From<&Value> for Value {
    fn from(value: &Value) -> Self {
        value.clone()
    }
}
