use crate::events::{EventBus, HostEvent};
use crate::host::ObjectId;
use crate::scene::SceneSynchronizer;
use glam::Vec2;

/// Cursor position plus hover edge detection.
#[derive(Debug, Default)]
pub struct PointerDispatcher {
    cursor: Vec2,
    hovered: Option<ObjectId>,
}

impl PointerDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> Vec2 {
        self.cursor
    }

    pub fn hovered(&self) -> Option<ObjectId> {
        self.hovered
    }

    pub fn move_to(&mut self, point: Vec2) {
        self.cursor = point;
    }

    /// Re-evaluate the hover target. A change queues `leave` for the old target, then `enter`
    /// for the new one. Returns whether the target changed.
    pub fn refresh(&mut self, scene: &SceneSynchronizer, events: &mut EventBus) -> bool {
        let target = scene.hit_test(self.cursor).map(|(object, _)| object);
        if target == self.hovered {
            return false;
        }
        if let Some(previous) = self.hovered {
            events.push(HostEvent::Leave { object: previous });
        }
        if let Some(object) = target {
            events.push(HostEvent::Enter { object });
        }
        log::debug!("[pointer] hover {:?} -> {:?}", self.hovered, target);
        self.hovered = target;
        true
    }

    /// Click at the cursor. Queues `use` with the node-local point when something is hit.
    pub fn click(&mut self, scene: &SceneSynchronizer, events: &mut EventBus) -> Option<ObjectId> {
        self.refresh(scene, events);
        let (object, point) = scene.hit_test(self.cursor)?;
        events.push(HostEvent::Use { object, point });
        Some(object)
    }
}
