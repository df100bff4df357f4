use crate::events::{EventBus, HostEvent};
use crate::host::{HostState, HostValue, ObjectId, PropertyKey};
use std::collections::BTreeMap;

const SETTLE_EPSILON: f64 = 1e-9;

/// One interpolated property: `start` moves by at most `delta`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisTween {
    pub start: f64,
    pub delta: f64,
    /// Units per second.
    pub speed: f64,
    /// Units per second squared.
    pub acceleration: f64,
}

impl AxisTween {
    /// Signed displacement after `t` seconds, clamped to `delta`, and whether the axis has settled.
    pub fn displacement(&self, t: f64) -> (f64, bool) {
        if self.speed <= 0.0 && self.acceleration <= 0.0 {
            return (self.delta, true);
        }
        let span = self.delta.abs();
        let travelled = (self.speed * t + self.acceleration * t * t / 2.0).max(0.0);
        if travelled >= span - SETTLE_EPSILON {
            (self.delta, true)
        } else {
            (travelled.copysign(self.delta), false)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TweenAxis {
    X,
    Y,
    Scale,
    Angle,
}

impl TweenAxis {
    pub const ALL: [TweenAxis; 4] = [TweenAxis::X, TweenAxis::Y, TweenAxis::Scale, TweenAxis::Angle];

    pub fn property(self) -> PropertyKey {
        match self {
            TweenAxis::X => PropertyKey::Left,
            TweenAxis::Y => PropertyKey::Top,
            TweenAxis::Scale => PropertyKey::Scale,
            TweenAxis::Angle => PropertyKey::Rotation,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "x" => Some(TweenAxis::X),
            "y" => Some(TweenAxis::Y),
            "scale" => Some(TweenAxis::Scale),
            "angle" => Some(TweenAxis::Angle),
            _ => None,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TweenDescriptor {
    axes: [Option<AxisTween>; 4],
}

impl TweenDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, axis: TweenAxis, tween: AxisTween) -> Self {
        self.set(axis, tween);
        self
    }

    pub fn set(&mut self, axis: TweenAxis, tween: AxisTween) {
        self.axes[axis.index()] = Some(tween);
    }

    pub fn axis(&self, axis: TweenAxis) -> Option<&AxisTween> {
        self.axes[axis.index()].as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.axes.iter().all(Option::is_none)
    }
}

#[derive(Debug)]
struct TweenEntry {
    descriptor: TweenDescriptor,
    started_at: f64,
    written: [Option<f64>; 4],
}

/// Active tweens, at most one per object.
#[derive(Debug, Default)]
pub struct TweenInterpolator {
    entries: BTreeMap<ObjectId, TweenEntry>,
}

impl TweenInterpolator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a tween at `now`. An existing tween on the object is replaced without notification.
    pub fn push(&mut self, object: ObjectId, descriptor: TweenDescriptor, now: f64) -> bool {
        let entry = TweenEntry { descriptor, started_at: now, written: [None; 4] };
        let replaced = self.entries.insert(object, entry).is_some();
        if replaced {
            log::debug!("[tween] replaced active tween on {object}");
        }
        replaced
    }

    /// Cancel the tween on `object`, notifying the host if one was active.
    pub fn delete(&mut self, object: ObjectId, events: &mut EventBus) -> bool {
        if self.entries.remove(&object).is_none() {
            return false;
        }
        events.push(HostEvent::TweenDestroyed { object });
        true
    }

    pub fn contains(&self, object: ObjectId) -> bool {
        self.entries.contains_key(&object)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write every tween's current values into the host. Returns whether any property changed.
    pub fn advance(&mut self, now: f64, host: &mut dyn HostState, events: &mut EventBus) -> bool {
        let mut changed = false;
        let mut finished = Vec::new();
        for (object, entry) in self.entries.iter_mut() {
            let t = ((now - entry.started_at) / 1000.0).max(0.0);
            let mut settled = true;
            for axis in TweenAxis::ALL {
                let Some(tween) = entry.descriptor.axis(axis) else {
                    continue;
                };
                let (offset, done) = tween.displacement(t);
                settled &= done;
                let mut value = tween.start + offset;
                if axis == TweenAxis::Angle {
                    value = value.rem_euclid(360.0);
                }
                let slot = &mut entry.written[axis.index()];
                if *slot != Some(value) {
                    *slot = Some(value);
                    host.write_property(*object, axis.property(), HostValue::Float(value));
                    changed = true;
                }
            }
            if settled {
                finished.push(*object);
            }
        }
        for object in finished {
            self.entries.remove(&object);
            log::debug!("[tween] finished on {object}");
            events.push(HostEvent::TweenEnded { object });
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::ObjectStore;
    use crate::host::PropertyKeys;

    fn linear(start: f64, delta: f64, speed: f64) -> AxisTween {
        AxisTween { start, delta, speed, acceleration: 0.0 }
    }

    #[test]
    fn displacement_clamps_to_delta() {
        let tween = linear(0.0, -30.0, 20.0);
        assert_eq!(tween.displacement(0.5), (-10.0, false));
        assert_eq!(tween.displacement(1.5), (-30.0, true));
        assert_eq!(tween.displacement(10.0), (-30.0, true));
    }

    #[test]
    fn acceleration_adds_half_t_squared() {
        let tween = AxisTween { start: 0.0, delta: 100.0, speed: 0.0, acceleration: 20.0 };
        let (moved, done) = tween.displacement(2.0);
        assert!((moved - 40.0).abs() < 1e-9);
        assert!(!done);
    }

    #[test]
    fn writes_through_host_and_notifies_once() {
        let mut store = ObjectStore::new();
        let town = store.add_location("town");
        let cart = store.add_object(town, "cart");
        let mut events = EventBus::default();
        let mut tweens = TweenInterpolator::new();
        tweens.push(cart, TweenDescriptor::new().with(TweenAxis::X, linear(10.0, 100.0, 50.0)), 0.0);

        assert!(tweens.advance(1000.0, &mut store, &mut events));
        assert_eq!(store.read_properties(cart, PropertyKeys::LEFT).left, Some(60.0));
        assert!(events.is_empty());

        assert!(tweens.advance(2000.0, &mut store, &mut events));
        assert_eq!(store.read_properties(cart, PropertyKeys::LEFT).left, Some(110.0));
        assert_eq!(events.drain(), vec![HostEvent::TweenEnded { object: cart }]);
        assert!(tweens.is_empty());
        assert!(!tweens.advance(3000.0, &mut store, &mut events));
        assert!(events.is_empty());
    }

    #[test]
    fn angle_wraps_into_full_turn() {
        let mut store = ObjectStore::new();
        let town = store.add_location("town");
        let wheel = store.add_object(town, "wheel");
        let mut events = EventBus::default();
        let mut tweens = TweenInterpolator::new();
        tweens.push(wheel, TweenDescriptor::new().with(TweenAxis::Angle, linear(350.0, 20.0, 10.0)), 0.0);
        tweens.advance(1500.0, &mut store, &mut events);
        assert_eq!(store.read_properties(wheel, PropertyKeys::ROTATION).rotation, Some(5.0));
    }

    #[test]
    fn replacement_is_silent_but_delete_notifies() {
        let mut events = EventBus::default();
        let mut tweens = TweenInterpolator::new();
        let object = ObjectId(3);
        assert!(!tweens.push(object, TweenDescriptor::new().with(TweenAxis::Y, linear(0.0, 1.0, 1.0)), 0.0));
        assert!(tweens.push(object, TweenDescriptor::new().with(TweenAxis::Y, linear(0.0, 2.0, 1.0)), 5.0));
        assert!(events.is_empty());
        assert!(tweens.delete(object, &mut events));
        assert!(!tweens.delete(object, &mut events));
        assert_eq!(events.drain(), vec![HostEvent::TweenDestroyed { object }]);
    }
}
