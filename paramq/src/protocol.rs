//! The protocol engine: query, configure, and the two reflection calls.
//!
//! Every call is best-effort per item: unsupported indices are skipped,
//! bad values are recorded, and the reply status carries the most severe
//! condition met. Calls that may wait do so against the registry's block
//! bound and never while holding the table lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use paramq_protocol::{
    BlockMode, ConfigureReply, FailureReason, FieldDomain, FieldRef, FieldValues, ParamIndex,
    ParamValue, QueryReply, Scalar, SettingFailure, Status, SupportedParamsReply,
    SupportedValuesReply, ValuesOutcome,
};

use crate::backing::{ParamBacking, ReadAttempt, WriteAttempt};
use crate::registry::{DomainSource, ParamRegistry, RegistryView, UpdatePolicy};
use crate::state::RunState;

/// The four-operation protocol every configurable object speaks.
///
/// All operations return through their reply struct, never by aborting:
/// a caller always gets a status and whatever items could be served.
pub trait Configurable {
    /// Unique id of this object within the pipeline instance.
    fn id(&self) -> u32;
    /// Stable name of this object.
    fn name(&self) -> &str;

    /// Reads the current values of `indices`.
    fn query(&self, indices: &[ParamIndex], mode: BlockMode) -> QueryReply;
    /// Applies `updates` in order, as far as each one is acceptable.
    fn configure(&self, updates: &[ParamValue], mode: BlockMode) -> ConfigureReply;
    /// Lists descriptors of supported parameters with indices in
    /// `[start, start + count)`, ascending.
    fn supported_params(&self, start: ParamIndex, count: u32) -> SupportedParamsReply;
    /// Reports the values each of `fields` accepts right now.
    fn supported_values(&self, fields: &[FieldRef], mode: BlockMode) -> SupportedValuesReply;
}

/// Running byte budget for one reply.
struct ReplyBudget {
    remaining: usize,
}

impl ReplyBudget {
    fn new(limit: usize) -> Self {
        Self { remaining: limit }
    }

    /// Accounts `cost` bytes; false when they do not fit.
    fn admit(&mut self, cost: usize) -> bool {
        if cost > self.remaining {
            return false;
        }
        self.remaining -= cost;
        true
    }
}

fn param_cost(value: &ParamValue) -> usize {
    8 + value.payload.len()
}

fn domain_cost(domain: &FieldDomain) -> usize {
    match domain {
        FieldDomain::Any | FieldDomain::Unsupported => 4,
        FieldDomain::Range { .. } => 4 + 3 * 9,
        FieldDomain::Values(entries) => 8 + 9 * entries.len(),
    }
}

fn block_deadline(mode: BlockMode, bound: Duration) -> Option<Instant> {
    mode.may_block().then(|| Instant::now() + bound)
}

/// Deadline still worth sleeping toward, if any.
///
/// A spent deadline marks the call timed out and degrades the rest of it
/// to non-blocking attempts.
fn effective_deadline(
    mode: BlockMode,
    deadline: Option<Instant>,
    status: &mut Status,
) -> Option<Instant> {
    if !mode.may_block() {
        return None;
    }
    let deadline = deadline?;
    if Instant::now() >= deadline {
        status.raise(Status::TimedOut);
        return None;
    }
    Some(deadline)
}

fn backed_read(
    backing: &Arc<dyn ParamBacking>,
    mode: BlockMode,
    deadline: Option<Instant>,
    status: &mut Status,
) -> Option<Vec<u8>> {
    let attempt = match effective_deadline(mode, deadline, status) {
        Some(d) => backing.read_deadline(d),
        None => backing.try_read(),
    };
    match attempt {
        ReadAttempt::Ready(payload) => Some(payload),
        ReadAttempt::WouldBlock => {
            status.raise(Status::Blocking);
            None
        }
        ReadAttempt::TimedOut => {
            status.raise(Status::TimedOut);
            None
        }
        ReadAttempt::Fault => {
            status.raise(Status::Corrupted);
            None
        }
    }
}

enum ReadPlan {
    Missing(ParamIndex),
    Direct(ParamValue),
    Backed(ParamIndex, Arc<dyn ParamBacking>),
}

enum ValuesPlan {
    Done(ValuesOutcome),
    Dynamic {
        resolve: Arc<dyn Fn(&RegistryView<'_>) -> FieldDomain + Send + Sync>,
        deps: HashMap<ParamIndex, Vec<u8>>,
        refresh: Vec<(ParamIndex, Arc<dyn ParamBacking>)>,
    },
}

impl Configurable for ParamRegistry {
    fn id(&self) -> u32 {
        self.identity.id
    }

    fn name(&self) -> &str {
        &self.identity.name
    }

    fn query(&self, indices: &[ParamIndex], mode: BlockMode) -> QueryReply {
        let state = self.state.load();
        if state == RunState::Released {
            warn!("[QRY] {} queried after release", self.identity);
            return QueryReply {
                status: Status::Corrupted,
                params: Vec::new(),
            };
        }
        let mode = state.effective_mode(mode);
        let deadline = block_deadline(mode, self.block_bound);
        let mut status = Status::Ok;

        // Snapshot under the read lock; live reads happen after it drops.
        let plans: Vec<ReadPlan> = {
            let table = self.table.read();
            indices
                .iter()
                .map(|ix| match table.get(ix) {
                    None => ReadPlan::Missing(*ix),
                    Some(entry) => match &entry.spec.backing {
                        Some(backing) => ReadPlan::Backed(*ix, backing.clone()),
                        None => ReadPlan::Direct(ParamValue::new(*ix, entry.payload.clone())),
                    },
                })
                .collect()
        };

        let mut budget = ReplyBudget::new(self.max_reply_bytes);
        let mut params = Vec::new();
        for plan in plans {
            let value = match plan {
                ReadPlan::Missing(ix) => {
                    debug!("[QRY] {} has no parameter {}", self.identity, ix);
                    status.raise(Status::BadIndex);
                    continue;
                }
                ReadPlan::Direct(value) => value,
                ReadPlan::Backed(ix, backing) => {
                    match backed_read(&backing, mode, deadline, &mut status) {
                        Some(payload) => ParamValue::new(ix, payload),
                        None => continue,
                    }
                }
            };
            if budget.admit(param_cost(&value)) {
                params.push(value);
            } else {
                status.raise(Status::NoMemory);
            }
        }

        debug!(
            "[QRY] {} served {}/{} values, status {}",
            self.identity,
            params.len(),
            indices.len(),
            status
        );
        QueryReply { status, params }
    }

    #[tracing::instrument(name = "configure", skip(self, updates), fields(
        obj = %self.identity,
        updates = updates.len(),
        status = tracing::field::Empty
    ))]
    fn configure(&self, updates: &[ParamValue], mode: BlockMode) -> ConfigureReply {
        let state = self.state.load();
        if state == RunState::Released {
            warn!("[CFG] {} configured after release", self.identity);
            return ConfigureReply {
                status: Status::Corrupted,
                ..Default::default()
            };
        }
        let _gate = self.cfg_gate.lock();
        let mode = state.effective_mode(mode);
        let deadline = block_deadline(mode, self.block_bound);

        let mut status = Status::Ok;
        let mut failures = Vec::new();
        let mut overlay: HashMap<ParamIndex, Vec<u8>> = HashMap::new();
        let mut touched: Vec<ParamIndex> = Vec::new();
        let mut applied: HashSet<ParamIndex> = HashSet::new();
        let mut writes: Vec<(ParamIndex, Arc<dyn ParamBacking>)> = Vec::new();

        // Validate and stage in request order. Updates staged earlier in
        // the call are visible to the domains of later ones. An update is
        // staged whole or not at all.
        {
            let table = self.table.read();
            for update in updates {
                let Some(entry) = table.get(&update.index) else {
                    debug!("[CFG] {} has no parameter {}", self.identity, update.index);
                    status.raise(Status::BadIndex);
                    continue;
                };
                if !touched.contains(&update.index) {
                    touched.push(update.index);
                }
                let whole = FieldRef::whole(update.index);
                if entry.spec.read_only {
                    failures.push(SettingFailure::read_only(whole));
                    status.raise(Status::NoMemory);
                    continue;
                }
                if update.payload.len() != entry.payload.len() {
                    failures.push(SettingFailure::bad_size(whole));
                    status.raise(Status::NoMemory);
                    continue;
                }

                let mut staged = update.payload.clone();
                let mut update_ok = true;

                for fs in &entry.spec.fields {
                    let fref = FieldRef::new(update.index, fs.field);
                    let Some(incoming) = Scalar::read(&staged, fs.field, fs.kind) else {
                        failures.push(SettingFailure::new(fref, FailureReason::Internal));
                        status.raise(Status::Corrupted);
                        update_ok = false;
                        continue;
                    };
                    let domain = match &fs.domain {
                        DomainSource::Fixed(domain) => domain.clone(),
                        DomainSource::Dynamic(resolve) => resolve(&RegistryView {
                            committed: Some(&table),
                            staged: Some(&overlay),
                        }),
                    };
                    if domain.admits(&incoming) {
                        continue;
                    }
                    let adjusted = match entry.spec.policy {
                        UpdatePolicy::Adjust => domain.nearest(&incoming),
                        UpdatePolicy::Strict => None,
                    };
                    match adjusted {
                        Some(value) => {
                            debug!(
                                "[CFG] {} adjusted {} from {} to {}",
                                self.identity, fref, incoming, value
                            );
                            value.write(&mut staged, fs.field);
                        }
                        None => {
                            failures.push(SettingFailure::rejected(fref, domain));
                            status.raise(Status::NoMemory);
                            update_ok = false;
                        }
                    }
                }

                // A rejected field voids the whole update; the value the
                // parameter held before it stays in force.
                if !update_ok {
                    continue;
                }
                if let Some(backing) = &entry.spec.backing
                    && !writes.iter().any(|(ix, _)| *ix == update.index)
                {
                    writes.push((update.index, backing.clone()));
                }
                overlay.insert(update.index, staged);
                applied.insert(update.index);
            }
        }

        // Push staged values to their workers with the table lock released.
        let mut dropped: Vec<ParamIndex> = Vec::new();
        for (index, backing) in &writes {
            let payload = &overlay[index];
            let attempt = match effective_deadline(mode, deadline, &mut status) {
                Some(d) => backing.write_deadline(payload, d),
                None => backing.try_write(payload),
            };
            let whole = FieldRef::whole(*index);
            match attempt {
                WriteAttempt::Done => {}
                WriteAttempt::WouldBlock => {
                    failures.push(SettingFailure::blocked(whole));
                    status.raise(Status::Blocking);
                    dropped.push(*index);
                }
                WriteAttempt::TimedOut => {
                    failures.push(SettingFailure::blocked(whole));
                    status.raise(Status::TimedOut);
                    dropped.push(*index);
                }
                WriteAttempt::Fault => {
                    failures.push(SettingFailure::new(whole, FailureReason::Internal));
                    status.raise(Status::Corrupted);
                    dropped.push(*index);
                }
            }
        }
        for index in &dropped {
            overlay.remove(index);
            applied.remove(index);
        }

        // Commit every surviving staged payload in one write-lock hold, then
        // read the applied values back for the reply. Updates that changed
        // nothing are not echoed.
        let mut params = Vec::new();
        {
            let mut table = self.table.write();
            for (index, staged) in overlay {
                if let Some(entry) = table.get_mut(&index) {
                    entry.payload = staged;
                }
            }
            let mut budget = ReplyBudget::new(self.max_reply_bytes);
            for index in touched {
                if !applied.contains(&index) {
                    continue;
                }
                let Some(entry) = table.get(&index) else {
                    continue;
                };
                let value = ParamValue::new(index, entry.payload.clone());
                if budget.admit(param_cost(&value)) {
                    params.push(value);
                } else {
                    status.raise(Status::NoMemory);
                }
            }
        }

        tracing::Span::current().record("status", tracing::field::display(status));
        debug!(
            "[CFG] {} applied {} params, {} failures, status {}",
            self.identity,
            params.len(),
            failures.len(),
            status
        );
        ConfigureReply {
            status,
            params,
            failures,
        }
    }

    fn supported_params(&self, start: ParamIndex, count: u32) -> SupportedParamsReply {
        if self.state.load() == RunState::Released {
            warn!("[DSC] {} described after release", self.identity);
            return SupportedParamsReply {
                status: Status::Corrupted,
                descriptors: Vec::new(),
            };
        }
        let table = self.table.read();
        let mut status = Status::Ok;
        let mut budget = ReplyBudget::new(self.max_reply_bytes);
        let mut descriptors = Vec::new();
        let window_end = start.raw() as u64 + count as u64;
        for (index, entry) in table.range(start..) {
            if (index.raw() as u64) >= window_end {
                break;
            }
            if !budget.admit(entry.descriptor_cost()) {
                status.raise(Status::NoMemory);
                break;
            }
            descriptors.push(entry.descriptor());
        }

        debug!(
            "[DSC] {} listed {} descriptors from {}",
            self.identity,
            descriptors.len(),
            start
        );
        SupportedParamsReply {
            status,
            descriptors,
        }
    }

    fn supported_values(&self, fields: &[FieldRef], mode: BlockMode) -> SupportedValuesReply {
        let state = self.state.load();
        if state == RunState::Released {
            warn!("[SVQ] {} asked for values after release", self.identity);
            return SupportedValuesReply {
                status: Status::Corrupted,
                fields: Vec::new(),
            };
        }
        let mode = state.effective_mode(mode);
        let deadline = block_deadline(mode, self.block_bound);
        let mut status = Status::Ok;

        // Resolve fixed domains under the read lock and collect the
        // dependency snapshots dynamic ones need.
        let plans: Vec<(FieldRef, ValuesPlan)> = {
            let table = self.table.read();
            fields
                .iter()
                .map(|fr| {
                    let Some(entry) = table.get(&fr.index) else {
                        debug!("[SVQ] {} has no parameter {}", self.identity, fr.index);
                        status.raise(Status::BadIndex);
                        return (*fr, ValuesPlan::Done(ValuesOutcome::NoSuchParam));
                    };
                    let Some(fs) = entry.spec.fields.iter().find(|fs| fs.field == fr.field)
                    else {
                        debug!("[SVQ] {} has no field {}", self.identity, fr);
                        status.raise(Status::BadIndex);
                        return (*fr, ValuesPlan::Done(ValuesOutcome::NoSuchField));
                    };
                    match &fs.domain {
                        DomainSource::Fixed(domain) => {
                            (*fr, ValuesPlan::Done(ValuesOutcome::Resolved(domain.clone())))
                        }
                        DomainSource::Dynamic(resolve) => {
                            let mut deps = HashMap::new();
                            let mut refresh = Vec::new();
                            for dep in &entry.spec.depends_on {
                                if let Some(dep_entry) = table.get(dep) {
                                    deps.insert(*dep, dep_entry.payload.clone());
                                    if let Some(backing) = &dep_entry.spec.backing {
                                        refresh.push((*dep, backing.clone()));
                                    }
                                }
                            }
                            (
                                *fr,
                                ValuesPlan::Dynamic {
                                    resolve: resolve.clone(),
                                    deps,
                                    refresh,
                                },
                            )
                        }
                    }
                })
                .collect()
        };

        // Refresh backed dependencies and evaluate, without the lock.
        let mut budget = ReplyBudget::new(self.max_reply_bytes);
        let mut resolved = Vec::new();
        for (fr, plan) in plans {
            let outcome = match plan {
                ValuesPlan::Done(outcome) => outcome,
                ValuesPlan::Dynamic {
                    resolve,
                    mut deps,
                    refresh,
                } => {
                    let mut blocked = false;
                    for (dep, backing) in refresh {
                        match backed_read(&backing, mode, deadline, &mut status) {
                            Some(payload) => {
                                deps.insert(dep, payload);
                            }
                            None => {
                                blocked = true;
                                break;
                            }
                        }
                    }
                    if blocked {
                        ValuesOutcome::Blocked
                    } else {
                        let view = RegistryView {
                            committed: None,
                            staged: Some(&deps),
                        };
                        ValuesOutcome::Resolved(resolve(&view))
                    }
                }
            };
            let cost = match outcome.domain() {
                Some(domain) => 12 + domain_cost(domain),
                None => 12,
            };
            if !budget.admit(cost) {
                status.raise(Status::NoMemory);
                break;
            }
            resolved.push(FieldValues::new(fr, outcome));
        }

        debug!(
            "[SVQ] {} resolved {}/{} fields, status {}",
            self.identity,
            resolved.len(),
            fields.len(),
            status
        );
        SupportedValuesReply {
            status,
            fields: resolved,
        }
    }
}
