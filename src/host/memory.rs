//! In-memory host: an object graph plus a cooperative thread table driven by
//! Rust closures. Used by the integration tests and as the storage layer of
//! the Rhai script host.

use super::{
    HostBridge, HostCallError, HostServices, HostState, HostType, HostValue, ObjectId, OpOutcome,
    PropertyKey, PropertyKeys, PropertyRecord, Symbol, ThreadHandle,
};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

struct ObjectEntry {
    name: String,
    parent: Option<ObjectId>,
    kind: HostType,
    value: HostValue,
    fields: HashMap<String, HostValue>,
    dirty: bool,
}

/// Object graph, symbol table and thread reference counts.
#[derive(Default)]
pub struct ObjectStore {
    objects: Vec<ObjectEntry>,
    globals: HashMap<String, HostValue>,
    symbols: Vec<String>,
    symbol_ids: HashMap<String, Symbol>,
    threads: HashMap<ThreadHandle, u32>,
    next_thread: u32,
    runnable: VecDeque<ThreadHandle>,
    touched: bool,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(
        &mut self,
        parent: Option<ObjectId>,
        name: &str,
        kind: HostType,
        value: Option<HostValue>,
    ) -> ObjectId {
        if value.is_none() {
            if let Some(existing) = self.existing(parent, name, kind) {
                return existing;
            }
        }
        let id = ObjectId(self.objects.len() as u32);
        let value = value.unwrap_or(HostValue::Object(id));
        self.objects.push(ObjectEntry {
            name: name.to_string(),
            parent,
            kind,
            value: value.clone(),
            fields: HashMap::new(),
            dirty: false,
        });
        let slot = match parent {
            Some(parent) => &mut self.objects[parent.0 as usize].fields,
            None => &mut self.globals,
        };
        slot.insert(name.to_string(), value);
        id
    }

    /// Hashmap member already declared under `name` with the same kind.
    fn existing(&self, parent: Option<ObjectId>, name: &str, kind: HostType) -> Option<ObjectId> {
        let fields = match parent {
            Some(parent) => &self.objects.get(parent.0 as usize)?.fields,
            None => &self.globals,
        };
        match fields.get(name)? {
            HostValue::Object(id) if self.kind(*id) == Some(kind) => Some(*id),
            _ => None,
        }
    }

    pub fn add_location(&mut self, name: &str) -> ObjectId {
        self.insert(None, name, HostType::Location, None)
    }

    pub fn add_object(&mut self, parent: ObjectId, name: &str) -> ObjectId {
        self.insert(Some(parent), name, HostType::Object, None)
    }

    /// Plain hashmap, used for stage descriptors and namespaces.
    pub fn add_group(&mut self, parent: Option<ObjectId>, name: &str) -> ObjectId {
        self.insert(parent, name, HostType::Hashmap, None)
    }

    /// Named non-hashmap member, e.g. a counter the script keeps beside its objects.
    pub fn add_value(&mut self, parent: Option<ObjectId>, name: &str, value: HostValue) -> ObjectId {
        let kind = value.host_type();
        self.insert(parent, name, kind, Some(value))
    }

    pub fn kind(&self, id: ObjectId) -> Option<HostType> {
        self.objects.get(id.0 as usize).map(|entry| entry.kind)
    }

    pub fn field(&self, id: ObjectId, name: &str) -> Option<&HostValue> {
        self.objects.get(id.0 as usize).and_then(|entry| entry.fields.get(name))
    }

    pub fn set_field(&mut self, id: ObjectId, name: &str, value: HostValue) {
        if let Some(entry) = self.objects.get_mut(id.0 as usize) {
            entry.fields.insert(name.to_string(), value);
            entry.dirty = true;
            self.touched = true;
        }
    }

    pub fn property(&self, id: ObjectId, key: PropertyKey) -> Option<&HostValue> {
        self.field(id, key.name())
    }

    pub fn set_str(&mut self, id: ObjectId, key: PropertyKey, text: &str) {
        let symbol = self.intern(text);
        self.write_property(id, key, HostValue::Str(symbol));
    }

    pub fn any_dirty(&self) -> bool {
        self.objects.iter().any(|entry| entry.dirty)
    }

    pub fn spawn_thread(&mut self) -> ThreadHandle {
        self.next_thread += 1;
        let handle = ThreadHandle(self.next_thread);
        self.threads.insert(handle, 1);
        handle
    }

    pub fn thread_alive(&self, thread: ThreadHandle) -> bool {
        self.threads.contains_key(&thread)
    }

    pub fn pop_runnable(&mut self) -> Option<ThreadHandle> {
        self.runnable.pop_front()
    }

    pub fn has_runnable(&self) -> bool {
        !self.runnable.is_empty()
    }

    /// Returns whether anything was dirtied since the previous call.
    pub fn take_touched(&mut self) -> bool {
        std::mem::take(&mut self.touched)
    }

    pub fn touched(&self) -> bool {
        self.touched
    }
}

impl HostState for ObjectStore {
    fn read_properties(&self, id: ObjectId, keys: PropertyKeys) -> PropertyRecord {
        let mut record = PropertyRecord::default();
        let Some(entry) = self.objects.get(id.0 as usize) else {
            return record;
        };
        for key in keys.keys() {
            if let Some(value) = entry.fields.get(key.name()) {
                record.absorb(key, value, |symbol| self.symbol_text(symbol));
            }
        }
        record
    }

    fn is_dirty(&self, id: ObjectId) -> bool {
        self.objects.get(id.0 as usize).map_or(false, |entry| entry.dirty)
    }

    fn clear_dirty(&mut self, id: ObjectId) {
        if let Some(entry) = self.objects.get_mut(id.0 as usize) {
            entry.dirty = false;
        }
    }

    fn mark_dirty(&mut self, id: ObjectId) {
        if let Some(entry) = self.objects.get_mut(id.0 as usize) {
            entry.dirty = true;
            self.touched = true;
        }
    }

    fn write_property(&mut self, id: ObjectId, key: PropertyKey, value: HostValue) {
        self.set_field(id, key.name(), value);
    }

    fn resolve_path(&self, dotted: &str, parent: Option<ObjectId>) -> Option<(ObjectId, HostType)> {
        let mut scope = parent;
        let mut found = None;
        for segment in dotted.split('.') {
            let fields = match scope {
                Some(id) => &self.objects.get(id.0 as usize)?.fields,
                None => &self.globals,
            };
            let value = fields.get(segment)?;
            let id = match value {
                HostValue::Object(id) => *id,
                _ => self
                    .objects
                    .iter()
                    .position(|entry| entry.name == segment && entry.parent == scope && &entry.value == value)
                    .map(|index| ObjectId(index as u32))?,
            };
            let kind = self.objects.get(id.0 as usize)?.kind;
            found = Some((id, kind));
            scope = Some(id);
        }
        found
    }

    fn object_path(&self, id: ObjectId) -> String {
        let mut parts = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            match self.objects.get(current.0 as usize) {
                Some(entry) => {
                    parts.push(entry.name.as_str());
                    cursor = entry.parent;
                }
                None => break,
            }
        }
        if parts.is_empty() {
            return format!("{id}");
        }
        parts.reverse();
        parts.join(".")
    }

    fn intern(&mut self, text: &str) -> Symbol {
        if let Some(symbol) = self.symbol_ids.get(text) {
            return *symbol;
        }
        let symbol = Symbol(self.symbols.len() as u32);
        self.symbols.push(text.to_string());
        self.symbol_ids.insert(text.to_string(), symbol);
        symbol
    }

    fn symbol_text(&self, symbol: Symbol) -> Option<String> {
        self.symbols.get(symbol.0 as usize).cloned()
    }

    fn retain_thread(&mut self, thread: ThreadHandle) {
        if let Some(count) = self.threads.get_mut(&thread) {
            *count += 1;
        }
    }

    fn release_thread(&mut self, thread: ThreadHandle) {
        if let Some(count) = self.threads.get_mut(&thread) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.threads.remove(&thread);
            }
        }
    }

    fn thread_ref_count(&self, thread: ThreadHandle) -> u32 {
        self.threads.get(&thread).copied().unwrap_or(0)
    }

    fn schedule_runnable(&mut self, thread: ThreadHandle) {
        if self.threads.contains_key(&thread) {
            self.runnable.push_back(thread);
        }
    }
}

/// One cooperative step of a host thread.
pub type Step = Rc<RefCell<dyn FnMut(&mut TaskContext<'_>) -> Result<(), HostCallError>>>;

pub fn step<F>(f: F) -> Step
where
    F: FnMut(&mut TaskContext<'_>) -> Result<(), HostCallError> + 'static,
{
    Rc::new(RefCell::new(f))
}

/// What a running step can see: the graph, its arguments, and the exposed operations.
pub struct TaskContext<'a> {
    pub host: &'a mut ObjectStore,
    services: &'a mut dyn HostServices,
    thread: ThreadHandle,
    args: &'a [HostValue],
    yielded: bool,
}

impl<'a> TaskContext<'a> {
    pub fn thread(&self) -> ThreadHandle {
        self.thread
    }

    pub fn args(&self) -> &[HostValue] {
        self.args
    }

    /// Call an exposed operation. A yielding operation suspends the thread after this step.
    pub fn call(&mut self, op: &str, args: &[HostValue]) -> Result<HostValue, HostCallError> {
        match self.services.invoke(&mut *self.host, Some(self.thread), op, args)? {
            OpOutcome::Value(value) => Ok(value),
            OpOutcome::Yield => {
                self.yielded = true;
                Ok(HostValue::Nil)
            }
        }
    }
}

struct ThreadBody {
    steps: VecDeque<Step>,
    args: Vec<HostValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub target: ObjectId,
    pub event: String,
    pub args: Vec<HostValue>,
}

#[derive(Default)]
pub struct MemoryHost {
    pub store: ObjectStore,
    handlers: HashMap<(ObjectId, String), Step>,
    bodies: HashMap<ThreadHandle, ThreadBody>,
    dispatched: Vec<Dispatch>,
    failures: Vec<(ThreadHandle, HostCallError)>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the `__on_<event>` handler of `target`.
    pub fn on<F>(&mut self, target: ObjectId, event: &str, handler: F)
    where
        F: FnMut(&mut TaskContext<'_>) -> Result<(), HostCallError> + 'static,
    {
        self.handlers.insert((target, event.to_string()), step(handler));
    }

    /// Start a runnable thread made of `steps`. The host keeps one reference until it finishes.
    pub fn spawn(&mut self, steps: Vec<Step>) -> ThreadHandle {
        self.spawn_with_args(steps, Vec::new())
    }

    fn spawn_with_args(&mut self, steps: Vec<Step>, args: Vec<HostValue>) -> ThreadHandle {
        let handle = self.store.spawn_thread();
        self.bodies.insert(handle, ThreadBody { steps: steps.into(), args });
        self.store.schedule_runnable(handle);
        handle
    }

    /// Drop the host's own interest in a suspended thread.
    pub fn abandon(&mut self, thread: ThreadHandle) {
        self.store.release_thread(thread);
    }

    pub fn thread_finished(&self, thread: ThreadHandle) -> bool {
        !self.store.thread_alive(thread)
    }

    /// Every notification the core attempted, with or without a handler.
    pub fn dispatched(&self) -> &[Dispatch] {
        &self.dispatched
    }

    pub fn dispatched_events(&self, event: &str) -> Vec<&Dispatch> {
        self.dispatched.iter().filter(|dispatch| dispatch.event == event).collect()
    }

    pub fn clear_dispatched(&mut self) {
        self.dispatched.clear();
    }

    pub fn failures(&self) -> &[(ThreadHandle, HostCallError)] {
        &self.failures
    }

    fn finish(&mut self, thread: ThreadHandle) {
        self.bodies.remove(&thread);
        self.store.release_thread(thread);
    }
}

impl HostState for MemoryHost {
    fn read_properties(&self, id: ObjectId, keys: PropertyKeys) -> PropertyRecord {
        self.store.read_properties(id, keys)
    }

    fn is_dirty(&self, id: ObjectId) -> bool {
        self.store.is_dirty(id)
    }

    fn clear_dirty(&mut self, id: ObjectId) {
        self.store.clear_dirty(id)
    }

    fn mark_dirty(&mut self, id: ObjectId) {
        self.store.mark_dirty(id)
    }

    fn write_property(&mut self, id: ObjectId, key: PropertyKey, value: HostValue) {
        self.store.write_property(id, key, value)
    }

    fn resolve_path(&self, dotted: &str, parent: Option<ObjectId>) -> Option<(ObjectId, HostType)> {
        self.store.resolve_path(dotted, parent)
    }

    fn object_path(&self, id: ObjectId) -> String {
        self.store.object_path(id)
    }

    fn intern(&mut self, text: &str) -> Symbol {
        self.store.intern(text)
    }

    fn symbol_text(&self, symbol: Symbol) -> Option<String> {
        self.store.symbol_text(symbol)
    }

    fn retain_thread(&mut self, thread: ThreadHandle) {
        self.store.retain_thread(thread)
    }

    fn release_thread(&mut self, thread: ThreadHandle) {
        self.store.release_thread(thread)
    }

    fn thread_ref_count(&self, thread: ThreadHandle) -> u32 {
        self.store.thread_ref_count(thread)
    }

    fn schedule_runnable(&mut self, thread: ThreadHandle) {
        self.store.schedule_runnable(thread)
    }
}

impl HostBridge for MemoryHost {
    fn call_handler(&mut self, target: ObjectId, event: &str, args: Vec<HostValue>) -> bool {
        self.dispatched.push(Dispatch { target, event: event.to_string(), args: args.clone() });
        let Some(handler) = self.handlers.get(&(target, event.to_string())).cloned() else {
            return false;
        };
        self.spawn_with_args(vec![handler], args);
        true
    }

    fn has_pending_work(&self) -> bool {
        self.store.has_runnable() || self.store.touched()
    }

    fn run(&mut self, services: &mut dyn HostServices) {
        while let Some(thread) = self.store.pop_runnable() {
            if !self.store.thread_alive(thread) {
                self.bodies.remove(&thread);
                continue;
            }
            let Some(mut body) = self.bodies.remove(&thread) else {
                continue;
            };
            let mut suspended = false;
            while let Some(current) = body.steps.pop_front() {
                let mut cx = TaskContext {
                    host: &mut self.store,
                    services: &mut *services,
                    thread,
                    args: &body.args,
                    yielded: false,
                };
                let result = {
                    let mut run_step = current.borrow_mut();
                    (&mut *run_step)(&mut cx)
                };
                let yielded = cx.yielded;
                if let Err(err) = result {
                    log::warn!("[script] uncaught exception in thread {}: {err}", thread.0);
                    self.failures.push((thread, err));
                    body.steps.clear();
                    break;
                }
                if yielded && !body.steps.is_empty() {
                    suspended = true;
                    break;
                }
            }
            if suspended {
                self.bodies.insert(thread, body);
            } else {
                self.finish(thread);
            }
        }
        let store = &self.store;
        self.bodies.retain(|thread, _| store.thread_alive(*thread));
        self.store.take_touched();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_dotted_paths_through_members() {
        let mut store = ObjectStore::new();
        let town = store.add_location("town");
        let door = store.add_object(town, "door");
        store.add_value(Some(town), "visits", HostValue::Int(3));
        assert_eq!(store.resolve_path("town", None), Some((town, HostType::Location)));
        assert_eq!(store.resolve_path("town.door", None), Some((door, HostType::Object)));
        assert_eq!(store.resolve_path("door", Some(town)), Some((door, HostType::Object)));
        let (_, kind) = store.resolve_path("town.visits", None).expect("scalar member resolves");
        assert_eq!(kind, HostType::Integer);
        assert!(store.resolve_path("town.window", None).is_none());
        assert_eq!(store.object_path(door), "town.door");
    }

    #[test]
    fn redeclaring_returns_the_existing_object() {
        let mut store = ObjectStore::new();
        let town = store.add_location("town");
        let door = store.add_object(town, "door");
        assert_eq!(store.add_location("town"), town);
        assert_eq!(store.add_object(town, "door"), door);
        let group = store.add_group(Some(town), "door");
        assert_ne!(group, door, "a different kind replaces the member");
        assert_eq!(store.resolve_path("town.door", None), Some((group, HostType::Hashmap)));
    }

    #[test]
    fn batch_read_drops_mismatched_types() {
        let mut store = ObjectStore::new();
        let town = store.add_location("town");
        store.write_property(town, PropertyKey::Left, HostValue::Int(12));
        store.write_property(town, PropertyKey::Top, HostValue::Bool(true));
        store.set_str(town, PropertyKey::Sprite, "night");
        let record = store.read_properties(town, PropertyKeys::BASE);
        assert_eq!(record.left, Some(12.0));
        assert_eq!(record.top, None);
        assert_eq!(record.sprite, Some(store.intern("night")));
        assert!(store.is_dirty(town));
    }

    #[test]
    fn thread_reference_counts_free_at_zero() {
        let mut store = ObjectStore::new();
        let thread = store.spawn_thread();
        store.retain_thread(thread);
        assert_eq!(store.thread_ref_count(thread), 2);
        store.release_thread(thread);
        store.release_thread(thread);
        assert!(!store.thread_alive(thread));
        store.schedule_runnable(thread);
        assert!(!store.has_runnable(), "dead threads are never scheduled");
    }
}
