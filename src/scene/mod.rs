//! Stage synchronization: keeps each stage's node list in step with the host graph.

pub mod materialize;
pub mod node;

pub use materialize::Materializer;
pub use node::{AnimationCursor, NodeArena, VisualNode};

use crate::animation::AnimationScheduler;
use crate::config::RuntimeConfig;
use crate::events::{EventBus, HostEvent};
use crate::host::{HostState, HostType, ObjectId, PropertyKeys};
use crate::registry::ObjectRegistry;
use crate::renderer::{NodeHandle, RenderBackend};
use anyhow::{anyhow, bail, Result};
use glam::Vec2;
use std::iter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub object: ObjectId,
    pub node: Option<NodeHandle>,
}

#[derive(Debug)]
struct StageRecord {
    id: ObjectId,
    path: String,
    location: Option<ObjectId>,
    shown: bool,
    interactive: bool,
    render_dirty: bool,
    /// Slot 0 holds the location, slot `i + 1` its child `i` in z order.
    slots: Vec<Slot>,
}

#[derive(Debug)]
struct CursorSlot {
    object: ObjectId,
    node: Option<NodeHandle>,
    pointer: Vec2,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub rebuilt_stages: usize,
    pub materialized: usize,
    /// Objects of locations a stage moved away from.
    pub departed: Vec<ObjectId>,
}

/// Borrowed collaborators of one synchronization pass.
pub struct SyncContext<'a> {
    pub registry: &'a ObjectRegistry,
    pub host: &'a mut dyn HostState,
    pub renderer: &'a mut dyn RenderBackend,
    pub events: &'a mut EventBus,
    pub config: &'a RuntimeConfig,
    pub now: f64,
}

#[derive(Debug)]
pub struct SceneSynchronizer {
    stages: Vec<StageRecord>,
    cursor: Option<CursorSlot>,
    arena: NodeArena,
    animations: AnimationScheduler,
    full_redraw: bool,
}

impl SceneSynchronizer {
    /// Bind the configured stage descriptors and cursor object.
    pub fn new(config: &RuntimeConfig, host: &dyn HostState) -> Result<Self> {
        let mut stages = Vec::with_capacity(config.stages.len());
        for path in &config.stages {
            let id = match host.resolve_path(path, None) {
                Some((id, HostType::Hashmap | HostType::Object)) => id,
                Some((_, found)) => {
                    bail!("could not resolve stage {path}: got type '{found}', expected 'hashmap'")
                }
                None => bail!("could not resolve stage {path}: path does not exist"),
            };
            stages.push(StageRecord {
                id,
                path: path.clone(),
                location: None,
                shown: false,
                interactive: true,
                render_dirty: false,
                slots: Vec::new(),
            });
        }
        let cursor = match &config.cursor {
            Some(path) => match host.resolve_path(path, None) {
                Some((object, HostType::Object)) => {
                    Some(CursorSlot { object, node: None, pointer: Vec2::ZERO })
                }
                Some((_, found)) => {
                    bail!("could not resolve cursor {path}: got type '{found}', expected 'object'")
                }
                None => bail!("could not resolve cursor {path}: path does not exist"),
            },
            None => None,
        };
        Ok(Self {
            stages,
            cursor,
            arena: NodeArena::default(),
            animations: AnimationScheduler::new(),
            full_redraw: true,
        })
    }

    /// Reconcile every stage with the host graph.
    ///
    /// Dirty flags are cleared only after every stage has seen the object, so an object shown
    /// by two stages is redrawn in both.
    pub fn sync(&mut self, cx: SyncContext<'_>) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let mut processed = Vec::new();
        let force_all = std::mem::take(&mut self.full_redraw);
        let registry = cx.registry;
        let mut mat = Materializer {
            registry,
            host: cx.host,
            renderer: cx.renderer,
            arena: &mut self.arena,
            animations: &mut self.animations,
            events: cx.events,
            text: &cx.config.text,
            reuse_nodes: cx.config.scene.reuse_nodes,
            now: cx.now,
        };
        for stage in &mut self.stages {
            sync_stage(stage, &mut mat, force_all, &mut report, &mut processed)?;
        }
        if let Some(cursor) = &mut self.cursor {
            if force_all || cursor.node.is_none() || needs_redraw(&mat, cursor.object, cursor.node) {
                processed.extend(proxy_source(&mat, cursor.object, cursor.node));
                cursor.node = Some(mat.materialize(cursor.object, cursor.node, cursor.pointer, false));
                processed.push(cursor.object);
                report.materialized += 1;
            }
        }
        for object in processed {
            mat.host.clear_dirty(object);
        }
        if report.rebuilt_stages > 0 || report.materialized > 0 {
            log::debug!(
                "[scene] sync: {} stage rebuilds, {} nodes materialized",
                report.rebuilt_stages,
                report.materialized
            );
        }
        Ok(report)
    }

    /// Move the cursor node along with the pointer.
    pub fn track_pointer(&mut self, pointer: Vec2, renderer: &mut dyn RenderBackend) {
        let Some(cursor) = &mut self.cursor else {
            return;
        };
        let shift = pointer - cursor.pointer;
        cursor.pointer = pointer;
        if let Some(node) = cursor.node.and_then(|handle| self.arena.get_mut(handle)) {
            node.state.position += shift;
            renderer.update_node(node.handle, &node.state);
        }
    }

    /// Topmost visible, interactive node under `point`, with the point in its local space.
    pub fn hit_test(&self, point: Vec2) -> Option<(ObjectId, Vec2)> {
        for stage in self.stages.iter().rev().filter(|stage| stage.shown && stage.interactive) {
            for slot in stage.slots.iter().rev() {
                let Some(node) = slot.node.and_then(|handle| self.arena.get(handle)) else {
                    continue;
                };
                if !node.state.visible || !node.state.interactive {
                    continue;
                }
                if let Some(local) = node.hit_test(point) {
                    return Some((node.object, local));
                }
            }
        }
        None
    }

    pub fn advance_animations(
        &mut self,
        now: f64,
        renderer: &mut dyn RenderBackend,
        events: &mut EventBus,
    ) -> bool {
        self.animations.advance(now, &mut self.arena, renderer, events)
    }

    pub fn next_animation_due(&self) -> Option<f64> {
        self.animations.next_due(&self.arena)
    }

    pub fn request_full_redraw(&mut self) {
        self.full_redraw = true;
    }

    /// Schedule a rebuild of every shown stage bound to `location`. False when none is.
    pub fn request_location_redraw(&mut self, location: ObjectId) -> bool {
        let mut bound = false;
        for stage in self.stages.iter_mut().filter(|stage| stage.shown && stage.location == Some(location)) {
            stage.render_dirty = true;
            bound = true;
        }
        bound
    }

    pub fn needs_redraw(&self) -> bool {
        self.full_redraw || self.stages.iter().any(|stage| stage.render_dirty)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn stage_id(&self, index: usize) -> Option<ObjectId> {
        self.stages.get(index).map(|stage| stage.id)
    }

    /// Location currently shown by stage `index`.
    pub fn stage_location(&self, index: usize) -> Option<ObjectId> {
        self.stages.get(index).filter(|stage| stage.shown).and_then(|stage| stage.location)
    }

    pub fn stage_slots(&self, index: usize) -> &[Slot] {
        self.stages.get(index).map_or(&[], |stage| stage.slots.as_slice())
    }

    /// Node shown for `object` in the first stage that holds it.
    pub fn node_for(&self, object: ObjectId) -> Option<&VisualNode> {
        self.stages
            .iter()
            .flat_map(|stage| stage.slots.iter())
            .filter(|slot| slot.object == object)
            .find_map(|slot| slot.node.and_then(|handle| self.arena.get(handle)))
    }

    pub fn cursor_node(&self) -> Option<&VisualNode> {
        self.cursor.as_ref().and_then(|cursor| cursor.node).and_then(|handle| self.arena.get(handle))
    }

    pub fn node(&self, handle: NodeHandle) -> Option<&VisualNode> {
        self.arena.get(handle)
    }

    pub fn animating_nodes(&self) -> usize {
        self.animations.len()
    }
}

/// The object, or the object a proxy node draws from, changed since the last pass.
fn needs_redraw(mat: &Materializer<'_>, object: ObjectId, node: Option<NodeHandle>) -> bool {
    if mat.host.is_dirty(object) {
        return true;
    }
    node.and_then(|handle| mat.arena.get(handle))
        .map_or(false, |node| node.source != object && mat.host.is_dirty(node.source))
}

/// Object a proxy node currently draws from, when that is not the node's own object.
fn proxy_source(
    mat: &Materializer<'_>,
    object: ObjectId,
    node: Option<NodeHandle>,
) -> Option<ObjectId> {
    node.and_then(|handle| mat.arena.get(handle))
        .map(|node| node.source)
        .filter(|source| *source != object)
}

fn sync_stage(
    stage: &mut StageRecord,
    mat: &mut Materializer<'_>,
    force_all: bool,
    report: &mut SyncReport,
    processed: &mut Vec<ObjectId>,
) -> Result<()> {
    let props = mat.host.read_properties(stage.id, PropertyKeys::STAGE);
    mat.host.clear_dirty(stage.id);
    let location = match props.location {
        Some(location) if props.hidden != Some(true) => location,
        _ => {
            if stage.shown {
                log::debug!("[scene] stage {} hidden", stage.path);
                let animated = teardown(stage, mat);
                notify_stopped(mat, &animated, &[]);
            }
            return Ok(());
        }
    };
    let registry = mat.registry;
    let record = registry.get(location).filter(|record| record.is_location()).ok_or_else(|| {
        anyhow!(
            "stage {} binds location {} which has no resource definition",
            stage.path,
            mat.host.object_path(location)
        )
    })?;
    stage.interactive = props.disabled != Some(true);

    let rebuild = force_all || stage.render_dirty || !stage.shown || stage.location != Some(location);
    let mut animated = Vec::new();
    if rebuild {
        if let Some(previous) = stage.location.filter(|previous| *previous != location) {
            if let Some(old) = registry.get(previous) {
                let kept = |object: &ObjectId| *object == location || record.children.contains(object);
                let departed = iter::once(previous).chain(old.children.iter().copied());
                report.departed.extend(departed.filter(|object| !kept(object)));
            }
        }
        animated = teardown(stage, mat);
        stage.slots = iter::once(location)
            .chain(record.children.iter().copied())
            .map(|object| Slot { object, node: None })
            .collect();
        stage.location = Some(location);
        stage.shown = true;
        stage.render_dirty = false;
        report.rebuilt_stages += 1;
        log::debug!("[scene] stage {} rebuilt for {}", stage.path, record.path);
    }

    for (index, slot) in stage.slots.iter_mut().enumerate() {
        if !rebuild && !needs_redraw(mat, slot.object, slot.node) {
            continue;
        }
        processed.extend(proxy_source(mat, slot.object, slot.node));
        // The location backdrop never takes pointer input.
        slot.node = Some(mat.materialize(slot.object, slot.node, Vec2::ZERO, index > 0));
        processed.push(slot.object);
        report.materialized += 1;
    }
    notify_stopped(mat, &animated, &stage.slots);
    Ok(())
}

/// Release every slot node. Returns the objects whose node was animating; their
/// `animation_destroyed` notification waits until the replacement is known.
fn teardown(stage: &mut StageRecord, mat: &mut Materializer<'_>) -> Vec<ObjectId> {
    let mut animated = Vec::new();
    for slot in stage.slots.drain(..) {
        if let Some(handle) = slot.node {
            if mat.animations.contains(handle) {
                animated.push(slot.object);
            }
            mat.release(handle, true);
        }
    }
    stage.shown = false;
    animated
}

/// Notify objects that lost an animation and did not get one back in `slots`.
fn notify_stopped(mat: &mut Materializer<'_>, animated: &[ObjectId], slots: &[Slot]) {
    for object in animated {
        let animating_again = slots
            .iter()
            .filter(|slot| slot.object == *object)
            .filter_map(|slot| slot.node.and_then(|handle| mat.arena.get(handle)))
            .any(|node| node.is_animating());
        if !animating_again {
            mat.events.push(HostEvent::AnimationDestroyed { object: *object });
        }
    }
}
