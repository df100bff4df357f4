//! Frame pipeline: timers, animations, tweens, host run, synchronization, hover.

use crate::assets::{CatalogFile, ResourceIndex};
use crate::config::RuntimeConfig;
use crate::events::EventBus;
use crate::host::{HostBridge, HostCallError, HostServices, HostValue, ObjectId, OpOutcome, ThreadHandle};
use crate::ops::OperationDesk;
use crate::path::PathBridge;
use crate::pointer::PointerDispatcher;
use crate::registry::ObjectRegistry;
use crate::renderer::RenderBackend;
use crate::scene::{SceneSynchronizer, SyncContext};
use crate::timers::ThreadScheduler;
use crate::tween::{TweenDescriptor, TweenInterpolator};
use anyhow::{Context, Result};
use glam::Vec2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickState {
    Idle,
    Ticking,
    PendingRetick,
}

/// Guards against overlapping ticks. Requests made while a tick runs become one retick.
#[derive(Debug)]
pub struct TickController {
    state: TickState,
    requested: bool,
}

impl Default for TickController {
    fn default() -> Self {
        Self { state: TickState::Idle, requested: false }
    }
}

impl TickController {
    pub fn state(&self) -> TickState {
        self.state
    }

    pub fn is_requested(&self) -> bool {
        self.requested || self.state == TickState::PendingRetick
    }

    pub fn request(&mut self) {
        match self.state {
            TickState::Idle => self.requested = true,
            TickState::Ticking | TickState::PendingRetick => self.state = TickState::PendingRetick,
        }
    }

    /// Enter `Ticking`. Returns whether a pass was requested, or `None` if a tick is already running.
    pub fn begin(&mut self) -> Option<bool> {
        if self.state != TickState::Idle {
            self.request();
            return None;
        }
        self.state = TickState::Ticking;
        Some(std::mem::take(&mut self.requested))
    }

    /// Leave the current tick. True when a retick is pending.
    pub fn finish(&mut self) -> bool {
        let again = self.state == TickState::PendingRetick;
        self.state = TickState::Idle;
        again
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub passes: u32,
    pub resumed_threads: usize,
    pub discarded_threads: usize,
    pub delivered_events: usize,
    pub rebuilt_stages: usize,
    pub materialized: usize,
    /// Retick budget ran out; the rest runs next frame.
    pub deferred: bool,
}

pub struct Engine<H: HostBridge, R: RenderBackend> {
    host: H,
    renderer: R,
    config: RuntimeConfig,
    resources: ResourceIndex,
    registry: ObjectRegistry,
    scene: SceneSynchronizer,
    timers: ThreadScheduler,
    tweens: TweenInterpolator,
    paths: PathBridge,
    pointer: PointerDispatcher,
    events: EventBus,
    ticks: TickController,
    console: Vec<String>,
    now: f64,
}

impl<H: HostBridge, R: RenderBackend> Engine<H, R> {
    /// Index the catalog, bind it against the host graph and the configured stages.
    pub fn load(mut host: H, renderer: R, config: RuntimeConfig, catalog: &CatalogFile) -> Result<Self> {
        let resources = ResourceIndex::from_catalog(catalog).context("indexing resource catalog")?;
        let registry =
            ObjectRegistry::bind(catalog, &resources, &mut host).context("binding resources to host graph")?;
        let scene = SceneSynchronizer::new(&config, &host)?;
        let paths = PathBridge::new(config.path.heuristic_weight);
        log::info!(
            "[engine] loaded {} images, {} objects, {} stages",
            resources.image_count(),
            registry.len(),
            scene.stage_count()
        );
        let mut ticks = TickController::default();
        ticks.request();
        Ok(Self {
            host,
            renderer,
            config,
            resources,
            registry,
            scene,
            timers: ThreadScheduler::new(),
            tweens: TweenInterpolator::new(),
            paths,
            pointer: PointerDispatcher::new(),
            events: EventBus::default(),
            ticks,
            console: Vec::new(),
            now: 0.0,
        })
    }

    /// Run one display frame at `now` milliseconds.
    pub fn frame(&mut self, now: f64) -> Result<FrameReport> {
        self.now = self.now.max(now);
        let mut report = FrameReport::default();
        loop {
            let Some(requested) = self.ticks.begin() else {
                return Ok(report);
            };
            if let Err(err) = self.tick(requested, &mut report) {
                self.ticks.finish();
                return Err(err);
            }
            report.passes += 1;
            if !self.ticks.finish() {
                break;
            }
            if report.passes > self.config.scene.max_reticks {
                log::warn!(
                    "[engine] retick limit of {} reached, deferring to next frame",
                    self.config.scene.max_reticks
                );
                self.ticks.request();
                report.deferred = true;
                break;
            }
        }
        Ok(report)
    }

    fn tick(&mut self, requested: bool, report: &mut FrameReport) -> Result<()> {
        let drained = self.timers.drain_due(&mut self.host, self.now);
        report.resumed_threads += drained.resumed;
        report.discarded_threads += drained.discarded;
        let animated = self.scene.advance_animations(self.now, &mut self.renderer, &mut self.events);
        let tweened = self.tweens.advance(self.now, &mut self.host, &mut self.events);

        let dirty = requested
            || drained.processed() > 0
            || animated
            || tweened
            || !self.events.is_empty()
            || self.host.has_pending_work()
            || self.scene.needs_redraw();
        if dirty {
            for event in self.events.drain() {
                report.delivered_events += 1;
                if !self.host.call_handler(event.target(), event.handler(), event.args()) {
                    log::debug!("[engine] no handler for {event}");
                }
            }
            self.run_host();
            let sync = self.scene.sync(SyncContext {
                registry: &self.registry,
                host: &mut self.host,
                renderer: &mut self.renderer,
                events: &mut self.events,
                config: &self.config,
                now: self.now,
            })?;
            report.rebuilt_stages += sync.rebuilt_stages;
            report.materialized += sync.materialized;
            for object in sync.departed {
                self.tweens.delete(object, &mut self.events);
            }
        }

        self.pointer.refresh(&self.scene, &mut self.events);
        if !self.events.is_empty() || self.host.has_pending_work() {
            self.ticks.request();
        }
        Ok(())
    }

    fn run_host(&mut self) {
        let mut desk = OperationDesk {
            registry: &self.registry,
            scene: &mut self.scene,
            timers: &mut self.timers,
            tweens: &mut self.tweens,
            paths: &mut self.paths,
            events: &mut self.events,
            console: &mut self.console,
            text: &self.config.text,
            now: self.now,
        };
        self.host.run(&mut desk);
    }

    /// Call an exposed operation from outside any host thread.
    pub fn invoke(&mut self, op: &str, args: &[HostValue]) -> Result<OpOutcome, HostCallError> {
        let mut desk = OperationDesk {
            registry: &self.registry,
            scene: &mut self.scene,
            timers: &mut self.timers,
            tweens: &mut self.tweens,
            paths: &mut self.paths,
            events: &mut self.events,
            console: &mut self.console,
            text: &self.config.text,
            now: self.now,
        };
        let outcome = desk.invoke(&mut self.host, None, op, args);
        self.ticks.request();
        outcome
    }

    pub fn pointer_move(&mut self, point: Vec2) {
        self.pointer.move_to(point);
        self.scene.track_pointer(point, &mut self.renderer);
        if self.pointer.refresh(&self.scene, &mut self.events) {
            self.ticks.request();
        }
    }

    /// Click at the current pointer position. Returns the object that received `use`.
    pub fn pointer_click(&mut self) -> Option<ObjectId> {
        let target = self.pointer.click(&self.scene, &mut self.events);
        self.ticks.request();
        target
    }

    pub fn push_thread(&mut self, thread: ThreadHandle, delay_ms: f64) {
        self.timers.push_thread(&mut self.host, thread, delay_ms, self.now);
        self.ticks.request();
    }

    pub fn push_tween(&mut self, object: ObjectId, descriptor: TweenDescriptor) -> bool {
        let replaced = self.tweens.push(object, descriptor, self.now);
        self.ticks.request();
        replaced
    }

    pub fn delete_tween(&mut self, object: ObjectId) -> bool {
        let deleted = self.tweens.delete(object, &mut self.events);
        self.ticks.request();
        deleted
    }

    pub fn request_redraw(&mut self) {
        self.scene.request_full_redraw();
        self.ticks.request();
    }

    /// Earliest time the next frame has work to do.
    pub fn next_wakeup(&self) -> Option<f64> {
        if self.ticks.is_requested()
            || !self.tweens.is_empty()
            || !self.events.is_empty()
            || self.host.has_pending_work()
            || self.scene.needs_redraw()
        {
            return Some(self.now);
        }
        match (self.timers.next_expiry(), self.scene.next_animation_due()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Direct access to the host graph. Changes are picked up on the next frame.
    pub fn host_mut(&mut self) -> &mut H {
        self.ticks.request();
        &mut self.host
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn scene(&self) -> &SceneSynchronizer {
        &self.scene
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    pub fn resources(&self) -> &ResourceIndex {
        &self.resources
    }

    pub fn timers(&self) -> &ThreadScheduler {
        &self.timers
    }

    pub fn tweens(&self) -> &TweenInterpolator {
        &self.tweens
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn hovered(&self) -> Option<ObjectId> {
        self.pointer.hovered()
    }

    pub fn tick_state(&self) -> TickState {
        self.ticks.state()
    }

    /// Lines written by the host `print` operation.
    pub fn console(&self) -> &[String] {
        &self.console
    }

    pub fn now(&self) -> f64 {
        self.now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_while_idle_is_consumed_by_begin() {
        let mut ticks = TickController::default();
        ticks.request();
        assert_eq!(ticks.begin(), Some(true));
        assert_eq!(ticks.state(), TickState::Ticking);
        assert!(!ticks.finish());
        assert_eq!(ticks.begin(), Some(false));
    }

    #[test]
    fn request_while_ticking_becomes_single_retick() {
        let mut ticks = TickController::default();
        assert_eq!(ticks.begin(), Some(false));
        ticks.request();
        ticks.request();
        assert_eq!(ticks.state(), TickState::PendingRetick);
        assert!(ticks.finish());
        assert_eq!(ticks.state(), TickState::Idle);
        assert_eq!(ticks.begin(), Some(false));
        assert!(!ticks.finish());
    }

    #[test]
    fn nested_begin_is_refused_and_deferred() {
        let mut ticks = TickController::default();
        assert!(ticks.begin().is_some());
        assert_eq!(ticks.begin(), None);
        assert!(ticks.finish());
    }
}
