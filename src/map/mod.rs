//! The map engine: slots, histories, modes, and the transformation hot path
//!
//! A `Map` owns an ordered list of source slots, one destination slot, the
//! optional compiled expression with its per-instance variable storage, and
//! the boundary policy. Source samples enter through [`Map::ingest`]; the
//! produced destination sample is fetched as wire arguments through
//! [`Map::emit`]. The admin control plane mutates the map through
//! [`Map::set_from_message`], which gates mode commits on slot readiness.
//!
//! All calls on one map are serialized by the owning device's poll loop;
//! nothing here blocks and the only hot-path allocations happen on
//! control-plane events (mode commits and first-seen instances).

pub mod boundary;
pub mod mode;
pub mod range;
pub mod slot;

pub use boundary::{BoundaryAction, BoundaryOutcome};
pub use mode::Mode;
pub use slot::{Direction, LocalSignal, Slot};

use std::collections::BTreeMap;

use tracing::{debug, trace, warn};

use crate::config::EngineConfig;
use crate::constants::{MAX_HISTORY_SIZE, MAX_NUM_SOURCES};
use crate::error::{Result, SigmapError};
use crate::expr::{ExprCompiler, Expression, Typestring};
use crate::history::HistoryBuffer;
use crate::message::admin::AdminMessage;
use crate::message::builder::{build_update, IdMap};
use crate::message::wire::{Transport, WireArg, WireFrame};
use crate::value::{Timetag, Value, ValueType};

/// Result of one ingest on the data plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A destination sample was produced and may be emitted
    Emitted,
    /// A boundary action muted the sample; nothing to emit
    Muted,
    /// The sample was absorbed without producing an output
    Silent,
}

/// Lifecycle actions reported through the map hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapAction {
    /// The map committed its first active mode
    Established,
    /// An attribute of an established map changed
    Modified,
    /// The map was torn down
    Destroyed,
}

/// Lifecycle event delivered to the registered hook
#[derive(Debug, Clone)]
pub struct MapEvent {
    /// What happened
    pub action: MapAction,
    /// Name of the involved local signal, if any
    pub signal: Option<String>,
    /// Destination slot index assigned by the remote peer, if any
    pub slot: Option<i32>,
}

/// Hook invoked on map lifecycle events
pub type MapHook = Box<dyn FnMut(&MapEvent)>;

/// The last produced destination sample for one instance
#[derive(Debug, Clone)]
struct OutputSample {
    values: Vec<Value>,
    typestring: Typestring,
}

/// A directed transformation from source signals to a destination signal
pub struct Map {
    pub(crate) sources: Vec<Slot>,
    pub(crate) destination: Slot,
    pub(crate) mode: Mode,
    pub(crate) muted: bool,
    pub(crate) calibrating: bool,
    pub(crate) bound_min: BoundaryAction,
    pub(crate) bound_max: BoundaryAction,
    pub(crate) send_as_instance: bool,
    pub(crate) expression_str: Option<String>,
    pub(crate) expr: Option<Box<dyn Expression>>,
    /// Expression variable histories, indexed `[instance][variable]`
    pub(crate) var_tables: Vec<Vec<HistoryBuffer>>,
    pub(crate) scope: Vec<String>,
    pub(crate) extra: BTreeMap<String, Vec<WireArg>>,
    pub(crate) compiler: Box<dyn ExprCompiler>,
    revision: u64,
    ready: bool,
    established: bool,
    hook: Option<MapHook>,
    /// Instances allocated so far across all slots
    instances: usize,
    default_instances: usize,
    last_output: Vec<Option<OutputSample>>,
}

impl std::fmt::Debug for Map {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Map")
            .field("sources", &self.sources.len())
            .field("mode", &self.mode)
            .field("muted", &self.muted)
            .field("ready", &self.ready)
            .field("revision", &self.revision)
            .finish_non_exhaustive()
    }
}

impl Map {
    /// Create a map in the undefined state
    ///
    /// Remote slot shapes stay unknown until admin messages declare them;
    /// mode commits are gated on that discovery.
    pub fn new(
        sources: Vec<Slot>,
        destination: Slot,
        compiler: Box<dyn ExprCompiler>,
        config: &EngineConfig,
    ) -> Result<Self> {
        if sources.is_empty() {
            return Err(SigmapError::config("a map needs at least one source"));
        }
        if sources.len() > MAX_NUM_SOURCES {
            return Err(SigmapError::config(format!(
                "a map supports at most {MAX_NUM_SOURCES} sources"
            )));
        }
        if sources.iter().any(|s| s.direction() != Direction::Source) {
            return Err(SigmapError::config("source slots must face the source direction"));
        }
        if destination.direction() != Direction::Destination {
            return Err(SigmapError::config(
                "destination slot must face the destination direction",
            ));
        }
        let mut map = Self {
            sources,
            destination,
            mode: Mode::Undefined,
            muted: false,
            calibrating: false,
            bound_min: BoundaryAction::None,
            bound_max: BoundaryAction::None,
            send_as_instance: false,
            expression_str: None,
            expr: None,
            var_tables: Vec::new(),
            scope: Vec::new(),
            extra: BTreeMap::new(),
            compiler,
            revision: 0,
            ready: false,
            established: false,
            hook: None,
            instances: 0,
            default_instances: config.instance_count.max(1),
            last_output: Vec::new(),
        };
        for s in &mut map.sources {
            s.history_size = config.history_size.max(1);
        }
        map.destination.history_size = config.history_size.max(1);
        map.check_status()?;
        Ok(map)
    }

    /// Number of source slots
    pub fn num_sources(&self) -> usize {
        self.sources.len()
    }

    /// One source slot
    pub fn source(&self, index: usize) -> Option<&Slot> {
        self.sources.get(index)
    }

    /// The destination slot
    pub fn destination(&self) -> &Slot {
        &self.destination
    }

    /// Committed transformation mode
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Whether the whole map is muted
    pub fn muted(&self) -> bool {
        self.muted
    }

    /// Whether calibration is running
    pub fn calibrating(&self) -> bool {
        self.calibrating
    }

    /// Installed expression string, if any
    pub fn expression(&self) -> Option<&str> {
        self.expression_str.as_deref()
    }

    /// Device identifiers whose instance events propagate along this map
    pub fn scope(&self) -> &[String] {
        &self.scope
    }

    /// Free-form property bag
    pub fn extra(&self) -> &BTreeMap<String, Vec<WireArg>> {
        &self.extra
    }

    /// Revision counter, bumped by every differing attribute update
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// All slots know their type, length, and link
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Ready with a committed output-producing mode
    ///
    /// A linear request recorded before its ranges resolve leaves the map
    /// inactive until calibration or a later message completes it.
    pub fn is_active(&self) -> bool {
        self.ready
            && match self.mode {
                Mode::Raw => true,
                Mode::Linear | Mode::Expression => self.expr.is_some(),
                Mode::Undefined | Mode::None => false,
            }
    }

    /// Register the lifecycle hook
    pub fn set_hook(&mut self, hook: MapHook) {
        self.hook = Some(hook);
    }

    /// Mark a source slot's transport link as established
    pub fn set_source_link(&mut self, index: usize) -> Result<()> {
        let limit = self.sources.len();
        let slot = self
            .sources
            .get_mut(index)
            .ok_or(SigmapError::OutOfBounds { index, limit })?;
        slot.link_known = true;
        self.check_status()?;
        Ok(())
    }

    /// Mark the destination slot's transport link as established
    pub fn set_destination_link(&mut self) -> Result<()> {
        self.destination.link_known = true;
        self.check_status()?;
        Ok(())
    }

    /// Record the destination slot index assigned by the remote peer
    pub fn set_destination_slot_index(&mut self, index: i32) {
        self.destination.remote_slot = Some(index);
    }

    /// Mute or unmute a single source slot
    ///
    /// A muted slot still records samples and feeds calibration, but
    /// ingesting into it no longer triggers an emit.
    pub fn mute_slot(&mut self, index: usize, muted: bool) {
        if let Some(slot) = self.sources.get_mut(index) {
            slot.cause_update = !muted;
        }
    }

    /// Recompute readiness; allocates per-instance histories on first ready
    pub(crate) fn check_status(&mut self) -> Result<bool> {
        let ready = self.sources.iter().all(Slot::ready) && self.destination.ready();
        if ready && !self.ready {
            self.ready = true;
            self.grow_instances(self.default_instances)?;
            debug!(sources = self.sources.len(), "map ready, histories allocated");
        }
        Ok(self.ready)
    }

    /// Grow per-instance storage across all slots to hold `count` instances
    fn grow_instances(&mut self, count: usize) -> Result<()> {
        if count <= self.instances {
            return Ok(());
        }
        for slot in &mut self.sources {
            slot.init_instances(count)?;
        }
        self.destination.init_instances(count)?;
        while self.var_tables.len() < count {
            let table = self.build_var_table()?;
            self.var_tables.push(table);
        }
        self.last_output.resize_with(count, || None);
        self.instances = count;
        Ok(())
    }

    /// Variable histories for one fresh instance, shaped by the expression
    fn build_var_table(&self) -> Result<Vec<HistoryBuffer>> {
        let Some(expr) = self.expr.as_deref() else {
            return Ok(Vec::new());
        };
        (0..expr.num_variables())
            .map(|v| {
                HistoryBuffer::new(
                    ValueType::Float64,
                    expr.variable_vector_length(v).max(1),
                    expr.variable_history_size(v).clamp(1, MAX_HISTORY_SIZE),
                )
            })
            .collect()
    }

    /// Ingest one source sample for one instance
    ///
    /// Writes into the slot's history and feeds calibration. When the map
    /// is active, unmuted, and the slot causes updates, the transformation
    /// and boundary pass run. On `Emitted` the produced sample is
    /// available through [`Map::emit`].
    pub fn ingest(
        &mut self,
        slot_index: usize,
        instance: usize,
        sample: &[Value],
        timetag: Timetag,
    ) -> Result<IngestOutcome> {
        if slot_index >= self.sources.len() {
            return Err(SigmapError::OutOfBounds {
                index: slot_index,
                limit: self.sources.len(),
            });
        }
        if !self.ready {
            trace!(slot_index, "ingest before readiness, dropped");
            return Ok(IngestOutcome::Silent);
        }
        self.grow_instances(instance + 1)?;

        self.sources[slot_index]
            .history_mut(instance)?
            .write(sample, timetag)?;

        if self.calibrating {
            let observed: Vec<Value> = self.sources[slot_index]
                .history(instance)?
                .read(0)?
                .0
                .to_vec();
            let widened = self.sources[slot_index].calibrate(&observed);
            if widened && self.mode == Mode::Linear {
                if let Err(e) = self.set_mode_linear() {
                    debug!(error = %e, "linear re-derivation after calibration deferred");
                }
            }
        }

        if !self.is_active() || self.muted || !self.sources[slot_index].cause_update {
            return Ok(IngestOutcome::Silent);
        }

        match self.mode {
            Mode::Raw => self.perform_raw(slot_index, instance),
            Mode::Linear | Mode::Expression => self.perform_expression(instance, timetag),
            Mode::Undefined | Mode::None => Ok(IngestOutcome::Silent),
        }
    }

    /// Raw mode: forward the source prefix, typed as the source
    fn perform_raw(&mut self, slot_index: usize, instance: usize) -> Result<IngestOutcome> {
        let slot = &self.sources[slot_index];
        let (Some(src_ty), Some(src_len), Some(dst_len)) =
            (slot.ty, slot.length, self.destination.length)
        else {
            return Ok(IngestOutcome::Silent);
        };
        let n = src_len.min(dst_len);
        let (sample, _) = slot.history(instance)?.read(0)?;
        self.last_output[instance] = Some(OutputSample {
            values: sample[..n].to_vec(),
            typestring: vec![Some(src_ty); n],
        });
        Ok(IngestOutcome::Emitted)
    }

    /// Linear and expression modes: evaluate, then apply boundary actions
    fn perform_expression(&mut self, instance: usize, timetag: Timetag) -> Result<IngestOutcome> {
        let Some(expr) = self.expr.as_deref() else {
            return Err(SigmapError::config("active expression mode without expression"));
        };
        let source_refs: Vec<&HistoryBuffer> = self
            .sources
            .iter()
            .map(|s| &s.histories[instance])
            .collect();
        let mut typestring = Typestring::new();
        let produced = expr.evaluate(
            &source_refs,
            timetag,
            &mut self.destination.histories[instance],
            &mut self.var_tables[instance],
            instance,
            &mut typestring,
        )?;
        if !produced {
            return Ok(IngestOutcome::Silent);
        }

        let Some(dst_ty) = self.destination.ty else {
            return Ok(IngestOutcome::Silent);
        };
        let outcome = boundary::process(
            self.destination.histories[instance].recent_mut()?,
            dst_ty,
            self.destination.minimum.as_deref(),
            self.destination.maximum.as_deref(),
            self.bound_min,
            self.bound_max,
        );
        if outcome == BoundaryOutcome::Muted {
            self.last_output[instance] = None;
            return Ok(IngestOutcome::Muted);
        }

        let (values, _) = self.destination.histories[instance].read(0)?;
        self.last_output[instance] = Some(OutputSample {
            values: values.to_vec(),
            typestring,
        });
        Ok(IngestOutcome::Emitted)
    }

    /// Wire arguments for the last produced sample of one instance
    pub fn emit(&self, instance: usize, id_map: Option<IdMap>) -> Option<Vec<WireArg>> {
        let output = self.last_output.get(instance)?.as_ref()?;
        Some(build_update(
            Some(&output.values),
            1,
            &output.typestring,
            self.destination.length.unwrap_or(0),
            id_map,
            self.send_as_instance,
            self.destination.remote_slot,
        ))
    }

    /// Build and send the last produced sample of one instance
    ///
    /// Returns whether a frame was sent.
    pub fn emit_to(
        &self,
        transport: &mut dyn Transport,
        path: &str,
        instance: usize,
        id_map: Option<IdMap>,
    ) -> Result<bool> {
        let Some(args) = self.emit(instance, id_map) else {
            return Ok(false);
        };
        let frame = WireFrame {
            path: path.to_string(),
            args,
        };
        transport.send(&frame)?;
        Ok(true)
    }

    /// Wire arguments announcing an instance release (all-nil value)
    pub fn emit_release(&self, id_map: IdMap) -> Vec<WireArg> {
        build_update(
            None,
            1,
            &Typestring::new(),
            self.destination.length.unwrap_or(0),
            Some(id_map),
            self.send_as_instance,
            self.destination.remote_slot,
        )
    }

    /// Apply one admin message; returns the count of updated fields
    ///
    /// Field updates are idempotent: a value equal to the current one does
    /// not count. A slot index outside the source range rejects the whole
    /// message without mutating anything.
    pub fn set_from_message(&mut self, msg: &AdminMessage) -> Result<usize> {
        let slot_index = msg.slot.unwrap_or(0);
        if slot_index < 0 || slot_index as usize >= self.sources.len() {
            warn!(
                slot = slot_index,
                sources = self.sources.len(),
                "slot index outside bounds of map sources"
            );
            return Err(SigmapError::OutOfBounds {
                index: slot_index.max(0) as usize,
                limit: self.sources.len(),
            });
        }
        let slot_index = slot_index as usize;
        let mut updated = 0;

        // declared shapes latch once
        if let Some(ty) = msg.src_type {
            if self.sources[slot_index].set_type(ty) {
                updated += 1;
            }
        }
        if let Some(ty) = msg.dst_type {
            if self.destination.set_type(ty) {
                updated += 1;
            }
        }
        if let Some(len) = msg.src_length {
            if self.sources[slot_index].set_length(len) {
                updated += 1;
            }
        }
        if let Some(len) = msg.dst_length {
            if self.destination.set_length(len) {
                updated += 1;
            }
        }

        if !self.ready {
            self.check_status()?;
        }

        // range resolution; linear coefficients follow any movement
        updated += range::resolve_range(
            &mut self.sources[slot_index],
            msg.src_min.as_deref(),
            msg.src_max.as_deref(),
        );
        updated += range::resolve_range(
            &mut self.destination,
            msg.dst_min.as_deref(),
            msg.dst_max.as_deref(),
        );
        if self.mode == Mode::Linear {
            if let Err(e) = self.set_mode_linear() {
                debug!(error = %e, "linear re-derivation deferred");
            }
        }

        if let Some(mute) = msg.mute {
            if self.muted != mute {
                self.muted = mute;
                updated += 1;
            }
        }
        if let Some(calibrating) = msg.calibrating {
            if self.calibrating != calibrating {
                self.calibrating = calibrating;
                updated += 1;
            }
        }
        if let Some(action) = msg.bound_min {
            if self.bound_min != action {
                self.bound_min = action;
                updated += 1;
            }
        }
        if let Some(action) = msg.bound_max {
            if self.bound_max != action {
                self.bound_max = action;
                updated += 1;
            }
        }

        if let Some(expression) = &msg.expression {
            if self.expression_str.as_deref() != Some(expression.as_str()) {
                if self.mode == Mode::Expression {
                    match self.replace_expression(expression) {
                        Ok(()) => {
                            self.reallocate_histories()?;
                            updated += 1;
                        }
                        Err(e) => warn!(error = %e, "expression update rejected"),
                    }
                } else {
                    self.expression_str = Some(expression.clone());
                    updated += 1;
                }
            }
        }

        if let Some(flag) = msg.send_as_instance {
            if self.send_as_instance != flag {
                self.send_as_instance = flag;
                updated += 1;
            }
        }
        if let Some(scope) = &msg.scope {
            if &self.scope != scope {
                self.scope = scope.clone();
                updated += 1;
            }
        }
        for (key, values) in &msg.extra {
            if self.extra.get(key) != Some(values) {
                self.extra.insert(key.clone(), values.clone());
                updated += 1;
            }
        }

        // mode selection, gated on discovery
        let prior_mode = self.mode;
        let request = match msg.mode {
            None if self.mode != Mode::Undefined => {
                self.finish_update(updated);
                return Ok(updated);
            }
            None => Mode::Undefined,
            Some(mode) => mode,
        };
        let attempt = updated > 0 || request != self.mode;
        if !attempt || !self.shapes_known() {
            self.finish_update(updated);
            return Ok(updated);
        }

        match request {
            Mode::Raw => {
                if let Err(e) = self.set_mode_raw() {
                    debug!(error = %e, "raw mode request rejected");
                }
            }
            Mode::Linear => {
                if let Err(e) = self.set_mode_linear() {
                    debug!(error = %e, "linear mode request deferred");
                    // record the request: calibration or a later range
                    // message completes the derivation
                    self.mode = Mode::Linear;
                    self.expr = None;
                }
            }
            Mode::Expression => {
                let source = msg
                    .expression
                    .clone()
                    .or_else(|| self.expression_str.clone())
                    .or_else(|| self.synthesize_default_expression());
                if let Some(source) = source {
                    if let Err(e) = self.set_mode_expression(&source) {
                        warn!(error = %e, "expression mode request rejected");
                    }
                }
            }
            Mode::None => self.set_mode_none(),
            Mode::Undefined => {
                // no explicit request: prefer linear when ranges allow it
                if self.set_mode_linear().is_err() {
                    let source = self
                        .expression_str
                        .clone()
                        .or_else(|| self.synthesize_default_expression());
                    if let Some(source) = source {
                        if let Err(e) = self.set_mode_expression(&source) {
                            debug!(error = %e, "default expression rejected");
                        }
                    }
                }
            }
        }
        if self.mode != prior_mode {
            updated += 1;
        }

        self.finish_update(updated);
        Ok(updated)
    }

    /// Bump the revision and fire lifecycle hooks after an admin pass
    fn finish_update(&mut self, updated: usize) {
        self.revision += updated as u64;
        if self.is_active() && !self.established {
            self.established = true;
            self.fire(MapAction::Established);
        } else if updated > 0 && self.established {
            self.fire(MapAction::Modified);
        }
    }

    fn fire(&mut self, action: MapAction) {
        let event = MapEvent {
            action,
            signal: self
                .destination
                .signal
                .as_ref()
                .or(self.sources[0].signal.as_ref())
                .map(|s| s.name.clone()),
            slot: self.destination.remote_slot,
        };
        if let Some(hook) = self.hook.as_mut() {
            hook(&event);
        }
    }

    /// Tear the map down, firing the destroyed lifecycle event
    pub fn destroy(mut self) {
        self.fire(MapAction::Destroyed);
    }

    /// Type and length known on every slot
    pub(crate) fn shapes_known(&self) -> bool {
        self.sources
            .iter()
            .all(|s| s.type_known() && s.length_known())
            && self.destination.type_known()
            && self.destination.length_known()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{AffineCompiler, VectorSpec};
    use std::cell::Cell;
    use std::rc::Rc;

    fn shaped_slot(direction: Direction, ty: ValueType, length: usize) -> Slot {
        let mut slot = Slot::new(direction);
        slot.set_type(ty);
        slot.set_length(length);
        slot.link_known = true;
        slot
    }

    fn simple_map(src_len: usize, dst_len: usize) -> Map {
        Map::new(
            vec![shaped_slot(Direction::Source, ValueType::Int32, src_len)],
            shaped_slot(Direction::Destination, ValueType::Float64, dst_len),
            Box::new(AffineCompiler),
            &EngineConfig::default(),
        )
        .unwrap()
    }

    fn samples(values: &[i32]) -> Vec<Value> {
        values.iter().map(|v| Value::Int32(*v)).collect()
    }

    #[test]
    fn test_readiness_gates_on_slot_discovery() {
        let mut map = Map::new(
            vec![Slot::new(Direction::Source)],
            shaped_slot(Direction::Destination, ValueType::Float64, 1),
            Box::new(AffineCompiler),
            &EngineConfig::default(),
        )
        .unwrap();
        assert!(!map.is_ready());
        assert_eq!(
            map.ingest(0, 0, &samples(&[1]), Timetag::ZERO).unwrap(),
            IngestOutcome::Silent
        );

        let mut msg = AdminMessage::default();
        msg.src_type = Some(ValueType::Int32);
        msg.src_length = Some(1);
        map.set_from_message(&msg).unwrap();
        assert!(!map.is_ready()); // link still unknown
        map.set_source_link(0).unwrap();
        assert!(map.is_ready());
        assert_eq!(map.sources[0].histories.len(), 1);
        assert_eq!(map.destination.histories.len(), 1);
    }

    #[test]
    fn test_ingest_rejects_bad_slot_index() {
        let mut map = simple_map(1, 1);
        let err = map.ingest(3, 0, &samples(&[1]), Timetag::ZERO);
        assert!(matches!(err, Err(SigmapError::OutOfBounds { .. })));
    }

    #[test]
    fn test_raw_mode_truncates_to_shorter_vector() {
        let mut map = simple_map(4, 2);
        map.set_mode_raw().unwrap();
        let outcome = map
            .ingest(0, 0, &samples(&[1, 2, 3, 4]), Timetag::ZERO)
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Emitted);
        let args = map.emit(0, None).unwrap();
        assert_eq!(args, vec![WireArg::Int32(1), WireArg::Int32(2)]);
    }

    #[test]
    fn test_muted_map_stays_silent() {
        let mut map = simple_map(1, 1);
        map.set_mode_raw().unwrap();
        map.muted = true;
        let outcome = map.ingest(0, 0, &samples(&[5]), Timetag::ZERO).unwrap();
        assert_eq!(outcome, IngestOutcome::Silent);
        assert!(map.emit(0, None).is_none());
    }

    #[test]
    fn test_muted_slot_absorbs_without_emitting() {
        let mut map = simple_map(1, 1);
        map.set_mode_raw().unwrap();
        map.mute_slot(0, true);
        let outcome = map.ingest(0, 0, &samples(&[5]), Timetag::ZERO).unwrap();
        assert_eq!(outcome, IngestOutcome::Silent);
        // the sample still landed in the slot history
        assert_eq!(
            map.sources[0].histories[0].read(0).unwrap().0,
            &[Value::Int32(5)]
        );
        map.mute_slot(0, false);
        let outcome = map.ingest(0, 0, &samples(&[6]), Timetag::ZERO).unwrap();
        assert_eq!(outcome, IngestOutcome::Emitted);
    }

    #[test]
    fn test_instances_allocated_on_first_use() {
        let mut map = simple_map(1, 1);
        map.set_mode_raw().unwrap();
        assert_eq!(map.sources[0].histories.len(), 1);
        map.ingest(0, 3, &samples(&[7]), Timetag::ZERO).unwrap();
        assert_eq!(map.sources[0].histories.len(), 4);
        assert_eq!(map.destination.histories.len(), 4);
        // earlier instances untouched
        assert!(map.sources[0].histories[0].is_empty());
    }

    #[test]
    fn test_set_from_message_is_idempotent() {
        let mut map = simple_map(1, 1);
        let mut msg = AdminMessage::default();
        msg.mute = Some(true);
        msg.bound_max = Some(BoundaryAction::Clamp);
        msg.send_as_instance = Some(true);
        let first = map.set_from_message(&msg).unwrap();
        assert!(first >= 3);
        let revision = map.revision();
        let second = map.set_from_message(&msg).unwrap();
        assert_eq!(second, 0);
        assert_eq!(map.revision(), revision);
    }

    #[test]
    fn test_out_of_bounds_slot_rejects_whole_message() {
        let mut map = simple_map(1, 1);
        let mut msg = AdminMessage::default();
        msg.slot = Some(5);
        msg.mute = Some(true);
        assert!(matches!(
            map.set_from_message(&msg),
            Err(SigmapError::OutOfBounds { .. })
        ));
        assert!(!map.muted());
    }

    #[test]
    fn test_lifecycle_hook_fires_in_order() {
        let events: Rc<Cell<(usize, usize, usize)>> = Rc::default();
        let seen = events.clone();
        let mut map = simple_map(1, 1);
        map.set_hook(Box::new(move |event: &MapEvent| {
            let (mut est, mut modi, mut dest) = seen.get();
            match event.action {
                MapAction::Established => est += 1,
                MapAction::Modified => modi += 1,
                MapAction::Destroyed => dest += 1,
            }
            seen.set((est, modi, dest));
        }));

        let mut msg = AdminMessage::default();
        msg.mode = Some(Mode::Raw);
        map.set_from_message(&msg).unwrap();
        assert_eq!(events.get(), (1, 0, 0));

        let mut msg = AdminMessage::default();
        msg.mute = Some(true);
        map.set_from_message(&msg).unwrap();
        assert_eq!(events.get(), (1, 1, 0));

        map.destroy();
        assert_eq!(events.get(), (1, 1, 1));
    }

    #[test]
    fn test_instance_tag_on_emit() {
        let mut map = simple_map(1, 1);
        map.set_mode_raw().unwrap();
        map.send_as_instance = true;
        map.ingest(0, 0, &samples(&[3]), Timetag::ZERO).unwrap();
        let args = map
            .emit(0, Some(IdMap { origin: 4, public: 8 }))
            .unwrap();
        assert_eq!(
            args,
            vec![
                WireArg::Int32(3),
                WireArg::Str("@instance".into()),
                WireArg::Int32(4),
                WireArg::Int32(8),
            ]
        );
    }

    #[test]
    fn test_release_announcement() {
        let mut map = simple_map(1, 2);
        map.send_as_instance = true;
        map.set_destination_slot_index(1);
        let args = map.emit_release(IdMap { origin: 2, public: 5 });
        assert_eq!(
            args,
            vec![
                WireArg::Nil,
                WireArg::Nil,
                WireArg::Str("@instance".into()),
                WireArg::Int32(2),
                WireArg::Int32(5),
                WireArg::Str("@slot".into()),
                WireArg::Int32(1),
            ]
        );
    }

    /// Expression mock that demands deep histories and one state variable
    #[derive(Debug)]
    struct MockExpr {
        destination: VectorSpec,
    }

    impl Expression for MockExpr {
        fn input_history_size(&self, _index: usize) -> usize {
            3
        }

        fn output_history_size(&self) -> usize {
            2
        }

        fn num_variables(&self) -> usize {
            1
        }

        fn variable_history_size(&self, _index: usize) -> usize {
            2
        }

        fn variable_vector_length(&self, _index: usize) -> usize {
            1
        }

        fn evaluate(
            &self,
            sources: &[&HistoryBuffer],
            timetag: Timetag,
            output: &mut HistoryBuffer,
            variables: &mut [HistoryBuffer],
            _instance: usize,
            typestring: &mut Typestring,
        ) -> Result<bool> {
            // sum of the most recent sample plus the previous one
            let recent = sources[0].read(0)?.0[0].as_f64();
            let prior = sources[0]
                .read(1)
                .map(|(s, _)| s[0].as_f64())
                .unwrap_or(0.0);
            // count evaluations in the state variable
            let count = variables[0]
                .read(0)
                .map(|(s, _)| s[0].as_f64())
                .unwrap_or(0.0);
            variables[0].write_f64(&[count + 1.0], timetag)?;

            output.write_f64(&vec![recent + prior; self.destination.length], timetag)?;
            typestring.clear();
            typestring.resize(self.destination.length, Some(self.destination.ty));
            Ok(true)
        }
    }

    #[derive(Debug)]
    struct MockCompiler;

    impl ExprCompiler for MockCompiler {
        fn compile(
            &self,
            _source: &str,
            _sources: &[VectorSpec],
            destination: VectorSpec,
        ) -> Result<Box<dyn Expression>> {
            Ok(Box::new(MockExpr { destination }))
        }
    }

    #[test]
    fn test_mock_expression_drives_reallocation_and_variables() {
        let mut map = Map::new(
            vec![shaped_slot(Direction::Source, ValueType::Int32, 1)],
            shaped_slot(Direction::Destination, ValueType::Float64, 1),
            Box::new(MockCompiler),
            &EngineConfig::default(),
        )
        .unwrap();

        let mut msg = AdminMessage::default();
        msg.mode = Some(Mode::Expression);
        msg.expression = Some("y=x+x{-1}".into());
        map.set_from_message(&msg).unwrap();

        assert_eq!(map.mode(), Mode::Expression);
        assert_eq!(map.sources[0].history_size, 3);
        assert_eq!(map.sources[0].histories[0].capacity(), 3);
        assert_eq!(map.destination.history_size, 2);
        assert_eq!(map.var_tables[0].len(), 1);

        map.ingest(0, 0, &samples(&[10]), Timetag::ZERO).unwrap();
        map.ingest(0, 0, &samples(&[4]), Timetag::ZERO).unwrap();
        let args = map.emit(0, None).unwrap();
        assert_eq!(args, vec![WireArg::Float64(14.0)]);
        // the state variable survived across evaluations
        assert_eq!(map.var_tables[0][0].read(0).unwrap().0[0].as_f64(), 2.0);
    }
}
