//! Seam between the presentation core and the script host.
//!
//! The host owns the canonical object graph. Everything the core learns about
//! an object (visibility, placement, the sprite it wants to show) is read
//! through [`HostState`], and everything it writes back (tween output) goes
//! through [`HostState::write_property`]. Nothing in the core keeps a shadow
//! copy of mutable host properties.

use bitflags::bitflags;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub mod memory;

/// Stable identity of a host-owned record (location, object, hashmap).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u32);

/// Reference-counted host thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadHandle(pub u32);

/// Interned host string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(pub u32);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostType {
    Nil,
    Boolean,
    Integer,
    Float,
    String,
    Object,
    Location,
    Hashmap,
    Array,
    Callable,
    Thread,
}

impl HostType {
    pub fn label(self) -> &'static str {
        match self {
            HostType::Nil => "nil",
            HostType::Boolean => "boolean",
            HostType::Integer => "integer",
            HostType::Float => "float",
            HostType::String => "string",
            HostType::Object => "object",
            HostType::Location => "location",
            HostType::Hashmap => "hashmap",
            HostType::Array => "array",
            HostType::Callable => "callable",
            HostType::Thread => "thread",
        }
    }
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A typed value crossing the seam. Strings are interned by the host.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Symbol),
    Object(ObjectId),
    Thread(ThreadHandle),
    List(Vec<HostValue>),
    Map(BTreeMap<String, HostValue>),
}

impl HostValue {
    pub fn host_type(&self) -> HostType {
        match self {
            HostValue::Nil => HostType::Nil,
            HostValue::Bool(_) => HostType::Boolean,
            HostValue::Int(_) => HostType::Integer,
            HostValue::Float(_) => HostType::Float,
            HostValue::Str(_) => HostType::String,
            HostValue::Object(_) => HostType::Object,
            HostValue::Thread(_) => HostType::Thread,
            HostValue::List(_) => HostType::Array,
            HostValue::Map(_) => HostType::Hashmap,
        }
    }

    /// Integers widen to floats; anything else is absent.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            HostValue::Int(v) => Some(*v as f64),
            HostValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            HostValue::Bool(v) => Some(*v),
            HostValue::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<Symbol> {
        match self {
            HostValue::Str(sym) => Some(*sym),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            HostValue::Object(id) => Some(*id),
            _ => None,
        }
    }
}

impl From<f32> for HostValue {
    fn from(value: f32) -> Self {
        HostValue::Float(value as f64)
    }
}

impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        HostValue::Float(value)
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        HostValue::Bool(value)
    }
}

impl From<ObjectId> for HostValue {
    fn from(value: ObjectId) -> Self {
        HostValue::Object(value)
    }
}

/// Named property read or written by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    Hidden,
    Disabled,
    Top,
    Left,
    Scale,
    Rotation,
    Sprite,
    Text,
    Font,
    Proxy,
    ProxySprite,
    Location,
}

impl PropertyKey {
    pub const ALL: [PropertyKey; 12] = [
        PropertyKey::Hidden,
        PropertyKey::Disabled,
        PropertyKey::Top,
        PropertyKey::Left,
        PropertyKey::Scale,
        PropertyKey::Rotation,
        PropertyKey::Sprite,
        PropertyKey::Text,
        PropertyKey::Font,
        PropertyKey::Proxy,
        PropertyKey::ProxySprite,
        PropertyKey::Location,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PropertyKey::Hidden => "hidden",
            PropertyKey::Disabled => "disabled",
            PropertyKey::Top => "top",
            PropertyKey::Left => "left",
            PropertyKey::Scale => "scale",
            PropertyKey::Rotation => "rotation",
            PropertyKey::Sprite => "sprite",
            PropertyKey::Text => "text",
            PropertyKey::Font => "font",
            PropertyKey::Proxy => "proxy",
            PropertyKey::ProxySprite => "proxy_sprite",
            PropertyKey::Location => "location",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.name() == name)
    }

    pub fn flag(self) -> PropertyKeys {
        match self {
            PropertyKey::Hidden => PropertyKeys::HIDDEN,
            PropertyKey::Disabled => PropertyKeys::DISABLED,
            PropertyKey::Top => PropertyKeys::TOP,
            PropertyKey::Left => PropertyKeys::LEFT,
            PropertyKey::Scale => PropertyKeys::SCALE,
            PropertyKey::Rotation => PropertyKeys::ROTATION,
            PropertyKey::Sprite => PropertyKeys::SPRITE,
            PropertyKey::Text => PropertyKeys::TEXT,
            PropertyKey::Font => PropertyKeys::FONT,
            PropertyKey::Proxy => PropertyKeys::PROXY,
            PropertyKey::ProxySprite => PropertyKeys::PROXY_SPRITE,
            PropertyKey::Location => PropertyKeys::LOCATION,
        }
    }
}

bitflags! {
    /// Fixed key-set passed to a batch read.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PropertyKeys: u16 {
        const HIDDEN = 1 << 0;
        const DISABLED = 1 << 1;
        const TOP = 1 << 2;
        const LEFT = 1 << 3;
        const SCALE = 1 << 4;
        const ROTATION = 1 << 5;
        const SPRITE = 1 << 6;
        const TEXT = 1 << 7;
        const FONT = 1 << 8;
        const PROXY = 1 << 9;
        const PROXY_SPRITE = 1 << 10;
        const LOCATION = 1 << 11;

        const BASE = Self::HIDDEN.bits() | Self::DISABLED.bits() | Self::TOP.bits()
            | Self::LEFT.bits() | Self::SCALE.bits() | Self::ROTATION.bits() | Self::SPRITE.bits();
        const PROXY_REF = Self::PROXY.bits() | Self::PROXY_SPRITE.bits();
        const TEXT_STYLE = Self::TEXT.bits() | Self::FONT.bits();
        const STAGE = Self::LOCATION.bits() | Self::HIDDEN.bits() | Self::DISABLED.bits();
        const TRANSFORM = Self::LEFT.bits() | Self::TOP.bits() | Self::SCALE.bits() | Self::ROTATION.bits();
    }
}

impl PropertyKeys {
    pub fn keys(self) -> impl Iterator<Item = PropertyKey> {
        PropertyKey::ALL.into_iter().filter(move |key| self.contains(key.flag()))
    }
}

/// Structured result of a batch read. Unset or mistyped properties are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyRecord {
    pub hidden: Option<bool>,
    pub disabled: Option<bool>,
    pub top: Option<f64>,
    pub left: Option<f64>,
    pub scale: Option<f64>,
    pub rotation: Option<f64>,
    pub sprite: Option<Symbol>,
    pub text: Option<String>,
    pub font: Option<String>,
    pub proxy: Option<ObjectId>,
    pub proxy_sprite: Option<Symbol>,
    pub location: Option<ObjectId>,
}

impl PropertyRecord {
    /// Fill the record field for `key` from a raw host value, dropping type mismatches.
    pub fn absorb(&mut self, key: PropertyKey, value: &HostValue, text: impl Fn(Symbol) -> Option<String>) {
        match key {
            PropertyKey::Hidden => self.hidden = value.as_flag(),
            PropertyKey::Disabled => self.disabled = value.as_flag(),
            PropertyKey::Top => self.top = value.as_number(),
            PropertyKey::Left => self.left = value.as_number(),
            PropertyKey::Scale => self.scale = value.as_number(),
            PropertyKey::Rotation => self.rotation = value.as_number(),
            PropertyKey::Sprite => self.sprite = value.as_symbol(),
            PropertyKey::Text => self.text = value.as_symbol().and_then(text),
            PropertyKey::Font => self.font = value.as_symbol().and_then(text),
            PropertyKey::Proxy => self.proxy = value.as_object(),
            PropertyKey::ProxySprite => self.proxy_sprite = value.as_symbol(),
            PropertyKey::Location => self.location = value.as_object(),
        }
    }
}

/// Exception-like signal returned to the host by an exposed operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HostCallError {
    #[error("arity mismatch: expected {expected}, got {got}")]
    Arity { expected: String, got: usize },
    #[error("type mismatch at argument {index}: expected {expected}, got {got}")]
    Type { index: usize, expected: HostType, got: HostType },
    #[error("{0}")]
    User(String),
}

/// Result of an exposed operation that did not raise.
#[derive(Debug, Clone, PartialEq)]
pub enum OpOutcome {
    Value(HostValue),
    /// The calling thread must suspend; something else will resume it.
    Yield,
}

/// The object graph and thread table of the host.
pub trait HostState {
    fn read_properties(&self, id: ObjectId, keys: PropertyKeys) -> PropertyRecord;
    fn is_dirty(&self, id: ObjectId) -> bool;
    fn clear_dirty(&mut self, id: ObjectId);
    /// Force a redraw of `id` on the next synchronization.
    fn mark_dirty(&mut self, id: ObjectId);
    /// Writes mark the object dirty.
    fn write_property(&mut self, id: ObjectId, key: PropertyKey, value: HostValue);
    fn resolve_path(&self, dotted: &str, parent: Option<ObjectId>) -> Option<(ObjectId, HostType)>;
    /// Dotted path used in diagnostics.
    fn object_path(&self, id: ObjectId) -> String;
    fn intern(&mut self, text: &str) -> Symbol;
    fn symbol_text(&self, symbol: Symbol) -> Option<String>;

    fn retain_thread(&mut self, thread: ThreadHandle);
    fn release_thread(&mut self, thread: ThreadHandle);
    fn thread_ref_count(&self, thread: ThreadHandle) -> u32;
    fn schedule_runnable(&mut self, thread: ThreadHandle);
}

/// Operations the core exposes to running host code.
pub trait HostServices {
    fn invoke(
        &mut self,
        host: &mut dyn HostState,
        thread: Option<ThreadHandle>,
        op: &str,
        args: &[HostValue],
    ) -> Result<OpOutcome, HostCallError>;
}

/// Full host surface consumed by the engine.
pub trait HostBridge: HostState {
    /// Queue `__on_<event>` of `target` as a runnable task. Returns false when no handler exists.
    fn call_handler(&mut self, target: ObjectId, event: &str, args: Vec<HostValue>) -> bool;
    /// Runnable tasks are queued or some object was dirtied since the last run.
    fn has_pending_work(&self) -> bool;
    /// Run every runnable task to completion or suspension.
    fn run(&mut self, services: &mut dyn HostServices);
}
