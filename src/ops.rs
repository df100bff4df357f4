//! Operations exposed to running host code.
//!
//! Every operation checks its arguments and reports contract violations back to the caller as a
//! [`HostCallError`]; nothing here can fail the frame.

use crate::assets::SpriteDefinition;
use crate::config::TextConfig;
use crate::events::EventBus;
use crate::host::{
    HostCallError, HostServices, HostState, HostType, HostValue, ObjectId, OpOutcome, PropertyKeys,
    ThreadHandle,
};
use crate::path::PathBridge;
use crate::registry::ObjectRegistry;
use crate::scene::SceneSynchronizer;
use crate::text::{measure_blocks, TextStyle};
use crate::timers::ThreadScheduler;
use crate::tween::{AxisTween, TweenAxis, TweenDescriptor, TweenInterpolator};
use glam::Vec2;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOp {
    Print,
    Delay,
    PushTween,
    DeleteTween,
    MeasureText,
    FindPath,
    Render,
}

impl HostOp {
    pub const ALL: [HostOp; 7] = [
        HostOp::Print,
        HostOp::Delay,
        HostOp::PushTween,
        HostOp::DeleteTween,
        HostOp::MeasureText,
        HostOp::FindPath,
        HostOp::Render,
    ];

    pub fn name(self) -> &'static str {
        match self {
            HostOp::Print => "print",
            HostOp::Delay => "delay",
            HostOp::PushTween => "push_tween",
            HostOp::DeleteTween => "delete_tween",
            HostOp::MeasureText => "measure_text",
            HostOp::FindPath => "find_path",
            HostOp::Render => "render",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }
}

/// Engine state reachable from host operations during one host run.
pub struct OperationDesk<'a> {
    pub registry: &'a ObjectRegistry,
    pub scene: &'a mut SceneSynchronizer,
    pub timers: &'a mut ThreadScheduler,
    pub tweens: &'a mut TweenInterpolator,
    pub paths: &'a mut PathBridge,
    pub events: &'a mut EventBus,
    pub console: &'a mut Vec<String>,
    pub text: &'a TextConfig,
    pub now: f64,
}

fn arity(args: &[HostValue], expected: usize) -> Result<(), HostCallError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(HostCallError::Arity { expected: expected.to_string(), got: args.len() })
    }
}

fn type_error(args: &[HostValue], index: usize, expected: HostType) -> HostCallError {
    let got = args.get(index).map_or(HostType::Nil, HostValue::host_type);
    HostCallError::Type { index: index + 1, expected, got }
}

fn arg_text(host: &dyn HostState, args: &[HostValue], index: usize) -> Result<String, HostCallError> {
    args.get(index)
        .and_then(HostValue::as_symbol)
        .and_then(|symbol| host.symbol_text(symbol))
        .ok_or_else(|| type_error(args, index, HostType::String))
}

fn arg_object(args: &[HostValue], index: usize) -> Result<ObjectId, HostCallError> {
    args.get(index).and_then(HostValue::as_object).ok_or_else(|| type_error(args, index, HostType::Object))
}

fn arg_number(args: &[HostValue], index: usize) -> Result<f64, HostCallError> {
    args.get(index).and_then(HostValue::as_number).ok_or_else(|| type_error(args, index, HostType::Float))
}

type OpResult = Result<OpOutcome, HostCallError>;

fn done() -> OpResult {
    Ok(OpOutcome::Value(HostValue::Nil))
}

impl<'a> OperationDesk<'a> {
    fn print(&mut self, host: &mut dyn HostState, args: &[HostValue]) -> OpResult {
        arity(args, 1)?;
        let text = arg_text(host, args, 0)?;
        log::info!("[script] {text}");
        self.console.push(text);
        done()
    }

    fn delay(
        &mut self,
        host: &mut dyn HostState,
        thread: Option<ThreadHandle>,
        args: &[HostValue],
    ) -> OpResult {
        arity(args, 1)?;
        let HostValue::Int(ms) = args[0] else {
            return Err(type_error(args, 0, HostType::Integer));
        };
        let thread =
            thread.ok_or_else(|| HostCallError::User("delay called outside of a thread".to_string()))?;
        self.timers.push_thread(host, thread, ms.max(0) as f64, self.now);
        Ok(OpOutcome::Yield)
    }

    /// `push_tween(object, {x, y, scale, angle}, speed[, acceleration])`; map values are deltas.
    fn push_tween(&mut self, host: &mut dyn HostState, args: &[HostValue]) -> OpResult {
        if !(3..=4).contains(&args.len()) {
            return Err(HostCallError::Arity { expected: "3 or 4".to_string(), got: args.len() });
        }
        let object = arg_object(args, 0)?;
        let HostValue::Map(targets) = &args[1] else {
            return Err(type_error(args, 1, HostType::Hashmap));
        };
        let speed = arg_number(args, 2)?;
        let acceleration = if args.len() == 4 { arg_number(args, 3)? } else { 0.0 };
        if speed < 0.0 || acceleration < 0.0 {
            return Err(HostCallError::User("tween speed and acceleration must not be negative".to_string()));
        }
        let current = host.read_properties(object, PropertyKeys::TRANSFORM);
        let mut descriptor = TweenDescriptor::new();
        for (key, value) in targets {
            let axis = TweenAxis::from_name(key)
                .ok_or_else(|| HostCallError::User(format!("unknown tween axis '{key}'")))?;
            let delta = value
                .as_number()
                .ok_or_else(|| HostCallError::User(format!("tween axis '{key}' must be a number")))?;
            let start = match axis {
                TweenAxis::X => current.left.unwrap_or(0.0),
                TweenAxis::Y => current.top.unwrap_or(0.0),
                TweenAxis::Scale => current.scale.unwrap_or(1.0),
                TweenAxis::Angle => current.rotation.unwrap_or(0.0),
            };
            descriptor.set(axis, AxisTween { start, delta, speed, acceleration });
        }
        if descriptor.is_empty() {
            return Err(HostCallError::User("tween has no axes".to_string()));
        }
        self.tweens.push(object, descriptor, self.now);
        done()
    }

    fn delete_tween(&mut self, args: &[HostValue]) -> OpResult {
        arity(args, 1)?;
        let object = arg_object(args, 0)?;
        Ok(OpOutcome::Value(HostValue::Bool(self.tweens.delete(object, self.events))))
    }

    /// `measure_text(text, object, sprite)`: the text wrapped into blocks that fit the sprite box.
    fn measure_text(&mut self, host: &mut dyn HostState, args: &[HostValue]) -> OpResult {
        arity(args, 3)?;
        let text = arg_text(host, args, 0)?;
        let object = arg_object(args, 1)?;
        let sprite_name = arg_text(host, args, 2)?;
        let sprite = host.intern(&sprite_name);
        let size = match self.registry.sprite(object, sprite).map(|def| def.as_ref()) {
            Some(SpriteDefinition::Text { size, .. }) => *size,
            _ => {
                return Err(HostCallError::User(format!(
                    "sprite '{sprite_name}' of '{}' is not a text sprite",
                    host.object_path(object)
                )))
            }
        };
        let font = host.read_properties(object, PropertyKeys::FONT).font;
        let style = TextStyle::parse_or(font.as_deref(), &self.text.fallback);
        let blocks = measure_blocks(&text, &style, size, self.text)
            .into_iter()
            .map(|block| HostValue::Str(host.intern(&block.text)))
            .collect();
        Ok(OpOutcome::Value(HostValue::List(blocks)))
    }

    /// `find_path(object, sprite, x0, y0, x1, y1)`: list of `[x, y]` points or nil.
    fn find_path(&mut self, host: &mut dyn HostState, args: &[HostValue]) -> OpResult {
        arity(args, 6)?;
        let object = arg_object(args, 0)?;
        let sprite_name = arg_text(host, args, 1)?;
        let from = Vec2::new(arg_number(args, 2)? as f32, arg_number(args, 3)? as f32);
        let to = Vec2::new(arg_number(args, 4)? as f32, arg_number(args, 5)? as f32);
        let sprite = host.intern(&sprite_name);
        let definition = self.registry.sprite(object, sprite).map(|def| def.as_ref());
        let Some(SpriteDefinition::Walkmap(walkmap)) = definition else {
            return Err(HostCallError::User(format!(
                "sprite '{sprite_name}' of '{}' is not a walkmap",
                host.object_path(object)
            )));
        };
        let value = match self.paths.find_path(walkmap, from, to) {
            Some(points) => HostValue::List(
                points
                    .into_iter()
                    .map(|point| HostValue::List(vec![point.x.into(), point.y.into()]))
                    .collect(),
            ),
            None => HostValue::Nil,
        };
        Ok(OpOutcome::Value(value))
    }

    /// `render()` redraws everything, `render(location)` rebuilds the stages showing it,
    /// `render(object)` redraws one object.
    fn render(&mut self, host: &mut dyn HostState, args: &[HostValue]) -> OpResult {
        match args {
            [] => {
                self.scene.request_full_redraw();
                done()
            }
            [HostValue::Object(id)] => {
                let name = host.object_path(*id);
                match self.registry.get(*id) {
                    Some(record) if record.is_location() => {
                        if self.scene.request_location_redraw(*id) {
                            done()
                        } else {
                            Err(HostCallError::User(format!("location '{name}' is not shown by any stage")))
                        }
                    }
                    Some(_) => {
                        host.mark_dirty(*id);
                        done()
                    }
                    None if matches!(host.resolve_path(&name, None), Some((_, HostType::Location))) => Err(
                        HostCallError::User(format!("location '{name}' does not have a resource definition")),
                    ),
                    None => Err(HostCallError::User(format!(
                        "object '{name}' is not present in current location or does not have a resource \
                         definition"
                    ))),
                }
            }
            [_] => Err(type_error(args, 0, HostType::Hashmap)),
            _ => Err(HostCallError::Arity { expected: "0 or 1".to_string(), got: args.len() }),
        }
    }
}

impl<'a> HostServices for OperationDesk<'a> {
    fn invoke(
        &mut self,
        host: &mut dyn HostState,
        thread: Option<ThreadHandle>,
        op: &str,
        args: &[HostValue],
    ) -> OpResult {
        let Some(known) = HostOp::from_name(op) else {
            return Err(HostCallError::User(format!("unknown operation '{op}'")));
        };
        match known {
            HostOp::Print => self.print(host, args),
            HostOp::Delay => self.delay(host, thread, args),
            HostOp::PushTween => self.push_tween(host, args),
            HostOp::DeleteTween => self.delete_tween(args),
            HostOp::MeasureText => self.measure_text(host, args),
            HostOp::FindPath => self.find_path(host, args),
            HostOp::Render => self.render(host, args),
        }
    }
}

/// Build the map argument of `push_tween` from `(axis, delta)` pairs.
pub fn tween_targets<'k>(pairs: impl IntoIterator<Item = (&'k str, f64)>) -> HostValue {
    let targets: BTreeMap<_, _> =
        pairs.into_iter().map(|(key, delta)| (key.to_string(), HostValue::Float(delta))).collect();
    HostValue::Map(targets)
}
