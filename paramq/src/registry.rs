//! Parameter registration and storage.
//!
//! [`ParamRegistry`] is the parameter table of one configurable object:
//! every supported parameter, its committed payload, its field layout and
//! domains, and the optional live backing behind it. The protocol calls in
//! [`crate::protocol`] operate on this table.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use paramq_protocol::{
    FieldDomain, FieldId, ObjectIdentity, ParamDescriptor, ParamIndex, Scalar, ScalarKind,
};

use crate::Builder;
use crate::backing::ParamBacking;
use crate::identity::next_identity;
use crate::state::{RunState, StateCell};

/// Default bound on how long one call may wait overall.
pub const DEFAULT_BLOCK_BOUND: Duration = Duration::from_millis(500);

/// Default budget for reply bytes.
pub const DEFAULT_REPLY_BYTES: usize = 64 * 1024;

/// How a parameter treats values outside a field's domain.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum UpdatePolicy {
    /// Reject the update and report the acceptable values.
    #[default]
    #[strum(serialize = "strict")]
    Strict,
    /// Move the value to the nearest acceptable one and apply.
    #[strum(serialize = "adjust")]
    Adjust,
}

/// Where a field's domain comes from.
#[derive(Clone)]
pub enum DomainSource {
    /// Fixed at registration time.
    Fixed(FieldDomain),
    /// Computed against the current values of the parameter's dependencies.
    Dynamic(Arc<dyn Fn(&RegistryView<'_>) -> FieldDomain + Send + Sync>),
}

impl std::fmt::Debug for DomainSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed(domain) => f.debug_tuple("Fixed").field(domain).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// One field of a parameter's layout.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub field: FieldId,
    pub kind: ScalarKind,
    pub domain: DomainSource,
}

impl FieldSpec {
    /// Unconstrained field of `kind` at byte `offset`.
    pub fn new(offset: u32, kind: ScalarKind) -> Self {
        Self {
            field: FieldId::new(offset, kind.width()),
            kind,
            domain: DomainSource::Fixed(FieldDomain::Any),
        }
    }

    pub fn with_domain(mut self, domain: FieldDomain) -> Self {
        self.domain = DomainSource::Fixed(domain);
        self
    }

    /// Domain recomputed on every use from the parameter's dependencies.
    ///
    /// The view passed to `resolve` carries the dependency values the call
    /// settled on: staged updates during a configure call, freshly read
    /// ones during a supported-values call.
    pub fn with_dynamic_domain<F>(mut self, resolve: F) -> Self
    where
        F: Fn(&RegistryView<'_>) -> FieldDomain + Send + Sync + 'static,
    {
        self.domain = DomainSource::Dynamic(Arc::new(resolve));
        self
    }
}

/// Declaration of one parameter.
#[derive(Clone)]
pub struct ParamSpec {
    pub index: ParamIndex,
    pub name: String,
    pub initial: Vec<u8>,
    pub policy: UpdatePolicy,
    pub read_only: bool,
    pub depends_on: Vec<ParamIndex>,
    pub fields: Vec<FieldSpec>,
    pub backing: Option<Arc<dyn ParamBacking>>,
}

impl ParamSpec {
    pub fn new(index: impl Into<ParamIndex>, name: impl Into<String>, initial: Vec<u8>) -> Self {
        Self {
            index: index.into(),
            name: name.into(),
            initial,
            policy: UpdatePolicy::Strict,
            read_only: false,
            depends_on: Vec::new(),
            fields: Vec::new(),
            backing: None,
        }
    }

    pub fn with_policy(mut self, policy: UpdatePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Declares that this parameter's domains read `index`.
    pub fn with_dependency(mut self, index: impl Into<ParamIndex>) -> Self {
        self.depends_on.push(index.into());
        self
    }

    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// Routes reads and writes of this parameter through `backing`.
    pub fn with_backing(mut self, backing: Arc<dyn ParamBacking>) -> Self {
        self.backing = Some(backing);
        self
    }
}

/// Reasons a parameter declaration is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// The index is already registered.
    DuplicateIndex(ParamIndex),
    /// Two fields of one parameter overlap.
    OverlappingFields(ParamIndex),
    /// A field escapes the initial payload or its width mismatches its kind.
    FieldOutOfLayout(ParamIndex, FieldId),
    /// A fixed domain names a different kind than its field.
    DomainKindMismatch(ParamIndex, FieldId),
    /// The initial value of a field is outside its fixed domain.
    BadInitial(ParamIndex, FieldId),
    /// A declared dependency names no other registered parameter.
    UnknownDependency(ParamIndex, ParamIndex),
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateIndex(ix) => write!(f, "parameter {ix} is already registered"),
            Self::OverlappingFields(ix) => write!(f, "parameter {ix} declares overlapping fields"),
            Self::FieldOutOfLayout(ix, field) => {
                write!(f, "field {ix}{field} escapes the declared layout")
            }
            Self::DomainKindMismatch(ix, field) => {
                write!(f, "domain of {ix}{field} disagrees with the field kind")
            }
            Self::BadInitial(ix, field) => {
                write!(f, "initial value of {ix}{field} is outside its domain")
            }
            Self::UnknownDependency(ix, dep) => {
                write!(f, "parameter {ix} depends on unregistered {dep}")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Registered parameter with its committed payload.
pub(crate) struct Entry {
    pub(crate) spec: ParamSpec,
    pub(crate) payload: Vec<u8>,
}

impl Entry {
    pub(crate) fn descriptor(&self) -> ParamDescriptor {
        ParamDescriptor {
            index: self.spec.index,
            name: self.spec.name.clone(),
            depends_on: self.spec.depends_on.clone(),
        }
    }

    /// Bytes this descriptor occupies in a reply.
    pub(crate) fn descriptor_cost(&self) -> usize {
        12 + self.spec.name.len() + 4 * self.spec.depends_on.len()
    }
}

/// Read view over parameter payloads, used by dynamic domains.
///
/// During a configure call the staged overlay carries updates applied
/// earlier in the same call; during a supported-values call it carries
/// freshly materialized dependency values.
pub struct RegistryView<'a> {
    pub(crate) committed: Option<&'a BTreeMap<ParamIndex, Entry>>,
    pub(crate) staged: Option<&'a HashMap<ParamIndex, Vec<u8>>>,
}

impl RegistryView<'_> {
    /// Payload of `index` as this view sees it.
    pub fn payload(&self, index: ParamIndex) -> Option<&[u8]> {
        if let Some(staged) = self.staged
            && let Some(payload) = staged.get(&index)
        {
            return Some(payload.as_slice());
        }
        self.committed
            .and_then(|table| table.get(&index))
            .map(|entry| entry.payload.as_slice())
    }

    /// Scalar of `kind` at byte `offset` of `index`, as this view sees it.
    pub fn scalar(&self, index: ParamIndex, offset: u32, kind: ScalarKind) -> Option<Scalar> {
        Scalar::read(self.payload(index)?, FieldId::new(offset, kind.width()), kind)
    }
}

/// Parameter table of one configurable object.
pub struct ParamRegistry {
    pub(crate) identity: ObjectIdentity,
    pub(crate) state: Arc<StateCell>,
    pub(crate) table: RwLock<BTreeMap<ParamIndex, Entry>>,
    /// Serializes configure calls; the table lock stays free while a call
    /// waits on a backing.
    pub(crate) cfg_gate: Mutex<()>,
    pub(crate) block_bound: Duration,
    pub(crate) max_reply_bytes: usize,
}

impl ParamRegistry {
    pub fn identity(&self) -> &ObjectIdentity {
        &self.identity
    }

    pub fn run_state(&self) -> RunState {
        self.state.load()
    }

    /// Moves the object through its lifecycle. Released is terminal.
    pub fn set_run_state(&self, state: RunState) {
        if self.state.load() == RunState::Released {
            return;
        }
        debug!("[REG] {} -> {}", self.identity, state);
        self.state.store(state);
    }

    /// The lifecycle cell this registry follows. A host driving several
    /// objects can keep the handle and write it directly.
    pub fn state_cell(&self) -> Arc<StateCell> {
        self.state.clone()
    }

    /// Registers an additional parameter after construction.
    pub fn register(&self, spec: ParamSpec) -> Result<(), RegistryError> {
        let mut table = self.table.write();
        if table.contains_key(&spec.index) {
            return Err(RegistryError::DuplicateIndex(spec.index));
        }
        validate_spec(&spec, |ix| table.contains_key(&ix))?;
        debug!(
            "[REG] {} registered {} as {}",
            self.identity, spec.name, spec.index
        );
        let payload = spec.initial.clone();
        table.insert(spec.index, Entry { spec, payload });
        Ok(())
    }

    /// Number of registered parameters.
    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }
}

/// Builder for [`ParamRegistry`].
pub struct ParamRegistryBuilder {
    name: String,
    identity: Option<ObjectIdentity>,
    state: Option<Arc<StateCell>>,
    specs: Vec<ParamSpec>,
    block_bound: Duration,
    max_reply_bytes: usize,
}

impl ParamRegistryBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identity: None,
            state: None,
            specs: Vec::new(),
            block_bound: DEFAULT_BLOCK_BOUND,
            max_reply_bytes: DEFAULT_REPLY_BYTES,
        }
    }

    /// Identity assigned by the hosting lifecycle manager. Without one the
    /// registry mints its own from the process-wide counter.
    pub fn with_identity(mut self, identity: ObjectIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Lifecycle cell shared with the hosting lifecycle manager.
    pub fn with_state_cell(mut self, cell: Arc<StateCell>) -> Self {
        self.state = Some(cell);
        self
    }

    pub fn with_param(mut self, spec: ParamSpec) -> Self {
        self.specs.push(spec);
        self
    }

    /// Bound on how long one may-block call may wait overall.
    pub fn with_block_bound(mut self, bound: Duration) -> Self {
        self.block_bound = bound;
        self
    }

    /// Budget for reply bytes; replies that overrun it are trimmed and
    /// report `NO_MEMORY`.
    pub fn with_reply_budget(mut self, bytes: usize) -> Self {
        self.max_reply_bytes = bytes;
        self
    }
}

impl Builder for ParamRegistryBuilder {
    type Output = ParamRegistry;

    #[tracing::instrument(name = "registry_build", skip(self), fields(
        name = %self.name,
        params = self.specs.len(),
        id = tracing::field::Empty
    ))]
    fn build(self) -> Result<ParamRegistry, RegistryError> {
        let identity = self
            .identity
            .unwrap_or_else(|| next_identity(self.name.clone()));
        tracing::Span::current().record("id", identity.id);

        let batch: HashSet<ParamIndex> = self.specs.iter().map(|s| s.index).collect();
        let mut table = BTreeMap::new();
        for spec in self.specs {
            validate_spec(&spec, |ix| batch.contains(&ix))?;
            let index = spec.index;
            let payload = spec.initial.clone();
            if table.insert(index, Entry { spec, payload }).is_some() {
                return Err(RegistryError::DuplicateIndex(index));
            }
        }

        debug!("[REG] {} built with {} parameters", identity, table.len());

        Ok(ParamRegistry {
            identity,
            state: self.state.unwrap_or_default(),
            table: RwLock::new(table),
            cfg_gate: Mutex::new(()),
            block_bound: self.block_bound,
            max_reply_bytes: self.max_reply_bytes,
        })
    }
}

fn validate_spec<F>(spec: &ParamSpec, is_known: F) -> Result<(), RegistryError>
where
    F: Fn(ParamIndex) -> bool,
{
    let mut spans: Vec<(u32, u32)> = Vec::with_capacity(spec.fields.len());
    for fs in &spec.fields {
        if fs.field.is_whole() || fs.field.width != fs.kind.width() {
            return Err(RegistryError::FieldOutOfLayout(spec.index, fs.field));
        }
        let end = fs.field.offset as usize + fs.field.width as usize;
        if end > spec.initial.len() {
            return Err(RegistryError::FieldOutOfLayout(spec.index, fs.field));
        }
        spans.push((fs.field.offset, fs.field.offset + fs.field.width));

        if let DomainSource::Fixed(domain) = &fs.domain {
            if let Some(kind) = domain.kind()
                && kind != fs.kind
            {
                return Err(RegistryError::DomainKindMismatch(spec.index, fs.field));
            }
            if !matches!(domain, FieldDomain::Unsupported) {
                let initial = Scalar::read(&spec.initial, fs.field, fs.kind)
                    .ok_or(RegistryError::FieldOutOfLayout(spec.index, fs.field))?;
                if !domain.admits(&initial) {
                    return Err(RegistryError::BadInitial(spec.index, fs.field));
                }
            }
        }
    }

    spans.sort_unstable();
    for pair in spans.windows(2) {
        if pair[1].0 < pair[0].1 {
            return Err(RegistryError::OverlappingFields(spec.index));
        }
    }

    for dep in &spec.depends_on {
        if *dep == spec.index || !is_known(*dep) {
            return Err(RegistryError::UnknownDependency(spec.index, *dep));
        }
    }
    Ok(())
}
