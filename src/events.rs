use crate::host::{HostValue, ObjectId};
use glam::Vec2;
use std::fmt;

/// Notification delivered to the host as `__on_<handler>` of the target object.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Use { object: ObjectId, point: Vec2 },
    Enter { object: ObjectId },
    Leave { object: ObjectId },
    Loop { object: ObjectId },
    AnimationDestroyed { object: ObjectId },
    TweenEnded { object: ObjectId },
    TweenDestroyed { object: ObjectId },
}

impl HostEvent {
    pub fn target(&self) -> ObjectId {
        match self {
            HostEvent::Use { object, .. }
            | HostEvent::Enter { object }
            | HostEvent::Leave { object }
            | HostEvent::Loop { object }
            | HostEvent::AnimationDestroyed { object }
            | HostEvent::TweenEnded { object }
            | HostEvent::TweenDestroyed { object } => *object,
        }
    }

    pub fn handler(&self) -> &'static str {
        match self {
            HostEvent::Use { .. } => "use",
            HostEvent::Enter { .. } => "enter",
            HostEvent::Leave { .. } => "leave",
            HostEvent::Loop { .. } => "loop",
            HostEvent::AnimationDestroyed { .. } => "animation_destroyed",
            HostEvent::TweenEnded { .. } => "tween_end",
            HostEvent::TweenDestroyed { .. } => "tween_destroyed",
        }
    }

    pub fn args(&self) -> Vec<HostValue> {
        match self {
            HostEvent::Use { point, .. } => {
                vec![HostValue::Float(point.x as f64), HostValue::Float(point.y as f64)]
            }
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for HostEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostEvent::Use { object, point } => {
                write!(f, "Use object={} x={:.1} y={:.1}", object.0, point.x, point.y)
            }
            other => write!(f, "{} object={}", other.handler(), other.target().0),
        }
    }
}

#[derive(Debug, Default)]
pub struct EventBus {
    events: Vec<HostEvent>,
}

impl EventBus {
    pub fn push(&mut self, event: HostEvent) {
        log::debug!("[events] {event}");
        self.events.push(event);
    }

    pub fn drain(&mut self) -> Vec<HostEvent> {
        self.events.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}
