use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{anyhow, Context, Result};
use rhai::{Dynamic, Engine, EvalAltResult, Scope, AST, INT};

use crate::host::memory::ObjectStore;
use crate::host::{
    HostBridge, HostServices, HostState, HostType, HostValue, ObjectId, OpOutcome, PropertyKey, PropertyKeys,
    PropertyRecord, Symbol, ThreadHandle,
};

/// Function invocation waiting to run as a host thread.
struct ScriptCall {
    function: String,
    args: Vec<Dynamic>,
}

/// Exposed operation requested by a script, executed once the calling function returns.
struct PendingOp {
    thread: Option<ThreadHandle>,
    op: &'static str,
    args: Vec<HostValue>,
    reply: Option<String>,
}

#[derive(Default)]
struct WorldState {
    store: ObjectStore,
    handlers: HashMap<(ObjectId, String), String>,
    bodies: HashMap<ThreadHandle, ScriptCall>,
    ops: VecDeque<PendingOp>,
}

/// The `world` handle scripts receive. Cloning shares the same graph.
#[derive(Clone, Default)]
pub struct ScriptWorld {
    state: Rc<RefCell<WorldState>>,
}

type ScriptResult<T> = Result<T, Box<EvalAltResult>>;

impl ScriptWorld {
    fn location(&mut self, path: &str) -> ObjectId {
        self.state.borrow_mut().store.add_location(path)
    }

    fn object(&mut self, parent: ObjectId, name: &str) -> ScriptResult<ObjectId> {
        let mut state = self.state.borrow_mut();
        match state.store.kind(parent) {
            Some(HostType::Location | HostType::Hashmap | HostType::Object) => {
                Ok(state.store.add_object(parent, name))
            }
            _ => Err(format!("cannot add object '{name}' under {parent}").into()),
        }
    }

    fn group(&mut self, path: &str) -> ObjectId {
        self.state.borrow_mut().store.add_group(None, path)
    }

    fn child_group(&mut self, parent: ObjectId, name: &str) -> ObjectId {
        self.state.borrow_mut().store.add_group(Some(parent), name)
    }

    fn set(&mut self, object: ObjectId, key: &str, value: Dynamic) {
        let mut state = self.state.borrow_mut();
        let value = to_host(&mut state.store, &value);
        state.store.set_field(object, key, value);
    }

    fn get(&mut self, object: ObjectId, key: &str) -> Dynamic {
        let state = self.state.borrow();
        state.store.field(object, key).map_or(Dynamic::UNIT, |value| to_dynamic(&state.store, value))
    }

    fn on(&mut self, object: ObjectId, event: &str, function: &str) {
        let event = event.strip_prefix("__on_").unwrap_or(event);
        self.state.borrow_mut().handlers.insert((object, event.to_string()), function.to_string());
    }

    fn queue(
        &mut self,
        thread: Option<ThreadHandle>,
        op: &'static str,
        args: &[Dynamic],
        reply: Option<&str>,
    ) {
        let mut state = self.state.borrow_mut();
        let args = args.iter().map(|arg| to_host(&mut state.store, arg)).collect();
        state.ops.push_back(PendingOp { thread, op, args, reply: reply.map(str::to_string) });
    }

    /// Run `function` after `ms`. The returned thread can be cancelled.
    fn delay(&mut self, ms: INT, function: &str) -> ThreadHandle {
        let thread = {
            let mut state = self.state.borrow_mut();
            let thread = state.store.spawn_thread();
            state.bodies.insert(thread, ScriptCall { function: function.to_string(), args: Vec::new() });
            thread
        };
        self.queue(Some(thread), "delay", &[Dynamic::from(ms)], None);
        thread
    }

    fn cancel(&mut self, thread: ThreadHandle) {
        let mut state = self.state.borrow_mut();
        if state.store.thread_alive(thread) {
            state.store.release_thread(thread);
            log::debug!("[script] cancelled thread {}", thread.0);
        }
    }
}

fn to_host(store: &mut ObjectStore, value: &Dynamic) -> HostValue {
    if value.is_unit() {
        return HostValue::Nil;
    }
    if let Ok(flag) = value.as_bool() {
        return HostValue::Bool(flag);
    }
    if let Ok(number) = value.as_int() {
        return HostValue::Int(number);
    }
    if let Ok(number) = value.as_float() {
        return HostValue::Float(number);
    }
    if value.is_string() {
        let text = value.clone().into_string().unwrap_or_default();
        return HostValue::Str(store.intern(&text));
    }
    if value.is_array() {
        let items = value.clone().into_array().unwrap_or_default();
        return HostValue::List(items.iter().map(|item| to_host(store, item)).collect());
    }
    if let Some(map) = value.clone().try_cast::<rhai::Map>() {
        let entries = map.iter().map(|(key, item)| (key.to_string(), to_host(store, item)));
        return HostValue::Map(entries.collect());
    }
    if let Some(id) = value.clone().try_cast::<ObjectId>() {
        return HostValue::Object(id);
    }
    if let Some(thread) = value.clone().try_cast::<ThreadHandle>() {
        return HostValue::Thread(thread);
    }
    HostValue::Nil
}

fn to_dynamic(store: &ObjectStore, value: &HostValue) -> Dynamic {
    match value {
        HostValue::Nil => Dynamic::UNIT,
        HostValue::Bool(flag) => Dynamic::from(*flag),
        HostValue::Int(number) => Dynamic::from(*number),
        HostValue::Float(number) => Dynamic::from(*number),
        HostValue::Str(symbol) => Dynamic::from(store.symbol_text(*symbol).unwrap_or_default()),
        HostValue::Object(id) => Dynamic::from(*id),
        HostValue::Thread(thread) => Dynamic::from(*thread),
        HostValue::List(items) => {
            Dynamic::from_array(items.iter().map(|item| to_dynamic(store, item)).collect())
        }
        HostValue::Map(map) => {
            let entries = map.iter().map(|(key, item)| (key.as_str().into(), to_dynamic(store, item)));
            Dynamic::from_map(entries.collect::<rhai::Map>())
        }
    }
}

/// Rhai-backed host. `init(world)` declares the graph; handlers run as host threads.
pub struct ScriptHost {
    engine: Engine,
    ast: AST,
    scope: Scope<'static>,
    world: ScriptWorld,
    script_path: Option<PathBuf>,
    failures: Vec<String>,
}

impl ScriptHost {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
        let mut host =
            Self::from_source(&source).with_context(|| format!("Loading script {}", path.display()))?;
        host.script_path = Some(path.to_path_buf());
        Ok(host)
    }

    /// Compile `source` and run its `init(world)`.
    pub fn from_source(source: &str) -> Result<Self> {
        let world = ScriptWorld::default();
        let mut engine = Engine::new();
        engine.set_fast_operators(true);
        register_api(&mut engine);
        let console = world.clone();
        engine.on_print(move |text| {
            console.clone().queue(None, "print", &[Dynamic::from(text.to_string())], None);
        });
        engine.on_debug(|text, _source, pos| log::debug!("[script] {pos:?}: {text}"));
        let ast = engine.compile(source).context("Compiling Rhai script")?;
        let mut scope = Scope::new();
        match engine.call_fn::<Dynamic>(&mut scope, &ast, "init", (world.clone(),)) {
            Ok(_) => {}
            Err(err) if matches!(err.as_ref(), EvalAltResult::ErrorFunctionNotFound(..)) => {
                log::warn!("[script] no init(world) function, starting with an empty graph");
            }
            Err(err) => return Err(anyhow!("Script init failed: {err}")),
        }
        Ok(Self { engine, ast, scope, world, script_path: None, failures: Vec::new() })
    }

    pub fn script_path(&self) -> Option<&Path> {
        self.script_path.as_deref()
    }

    /// Uncaught script errors, oldest first.
    pub fn failures(&self) -> &[String] {
        &self.failures
    }

    pub fn world(&self) -> ScriptWorld {
        self.world.clone()
    }

    pub fn with_store<T>(&self, f: impl FnOnce(&ObjectStore) -> T) -> T {
        f(&self.world.state.borrow().store)
    }

    fn spawn_call(state: &mut WorldState, function: String, args: Vec<Dynamic>) -> ThreadHandle {
        let thread = state.store.spawn_thread();
        state.bodies.insert(thread, ScriptCall { function, args });
        state.store.schedule_runnable(thread);
        thread
    }

    fn flush_ops(&mut self, services: &mut dyn HostServices) {
        loop {
            let mut state = self.world.state.borrow_mut();
            let Some(pending) = state.ops.pop_front() else {
                break;
            };
            if let Some(thread) = pending.thread {
                if !state.store.thread_alive(thread) {
                    state.bodies.remove(&thread);
                    continue;
                }
            }
            match services.invoke(&mut state.store, pending.thread, pending.op, &pending.args) {
                Ok(OpOutcome::Value(value)) => {
                    if let Some(reply) = pending.reply {
                        let arg = to_dynamic(&state.store, &value);
                        Self::spawn_call(&mut state, reply, vec![arg]);
                    }
                }
                Ok(OpOutcome::Yield) => {}
                Err(err) => {
                    log::warn!("[script] {}: {err}", pending.op);
                    self.failures.push(format!("{}: {err}", pending.op));
                    if let Some(thread) = pending.thread {
                        state.store.release_thread(thread);
                        state.bodies.remove(&thread);
                    }
                }
            }
        }
    }
}

impl HostState for ScriptHost {
    fn read_properties(&self, id: ObjectId, keys: PropertyKeys) -> PropertyRecord {
        self.world.state.borrow().store.read_properties(id, keys)
    }

    fn is_dirty(&self, id: ObjectId) -> bool {
        self.world.state.borrow().store.is_dirty(id)
    }

    fn clear_dirty(&mut self, id: ObjectId) {
        self.world.state.borrow_mut().store.clear_dirty(id)
    }

    fn mark_dirty(&mut self, id: ObjectId) {
        self.world.state.borrow_mut().store.mark_dirty(id)
    }

    fn write_property(&mut self, id: ObjectId, key: PropertyKey, value: HostValue) {
        self.world.state.borrow_mut().store.write_property(id, key, value)
    }

    fn resolve_path(&self, dotted: &str, parent: Option<ObjectId>) -> Option<(ObjectId, HostType)> {
        self.world.state.borrow().store.resolve_path(dotted, parent)
    }

    fn object_path(&self, id: ObjectId) -> String {
        self.world.state.borrow().store.object_path(id)
    }

    fn intern(&mut self, text: &str) -> Symbol {
        self.world.state.borrow_mut().store.intern(text)
    }

    fn symbol_text(&self, symbol: Symbol) -> Option<String> {
        self.world.state.borrow().store.symbol_text(symbol)
    }

    fn retain_thread(&mut self, thread: ThreadHandle) {
        self.world.state.borrow_mut().store.retain_thread(thread)
    }

    fn release_thread(&mut self, thread: ThreadHandle) {
        self.world.state.borrow_mut().store.release_thread(thread)
    }

    fn thread_ref_count(&self, thread: ThreadHandle) -> u32 {
        self.world.state.borrow().store.thread_ref_count(thread)
    }

    fn schedule_runnable(&mut self, thread: ThreadHandle) {
        self.world.state.borrow_mut().store.schedule_runnable(thread)
    }
}

impl HostBridge for ScriptHost {
    fn call_handler(&mut self, target: ObjectId, event: &str, args: Vec<HostValue>) -> bool {
        let mut state = self.world.state.borrow_mut();
        let Some(function) = state.handlers.get(&(target, event.to_string())).cloned() else {
            return false;
        };
        let mut call_args = vec![Dynamic::from(target)];
        call_args.extend(args.iter().map(|arg| to_dynamic(&state.store, arg)));
        Self::spawn_call(&mut state, function, call_args);
        true
    }

    fn has_pending_work(&self) -> bool {
        let state = self.world.state.borrow();
        state.store.has_runnable() || state.store.touched() || !state.ops.is_empty()
    }

    fn run(&mut self, services: &mut dyn HostServices) {
        loop {
            self.flush_ops(services);
            let next = self.world.state.borrow_mut().store.pop_runnable();
            let Some(thread) = next else {
                break;
            };
            let call = {
                let mut state = self.world.state.borrow_mut();
                let call = state.bodies.remove(&thread);
                if !state.store.thread_alive(thread) {
                    continue;
                }
                call
            };
            let Some(call) = call else {
                continue;
            };
            let mut args = Vec::with_capacity(call.args.len() + 1);
            args.push(Dynamic::from(self.world.clone()));
            args.extend(call.args);
            let result = self.engine.call_fn::<Dynamic>(&mut self.scope, &self.ast, &call.function, args);
            if let Err(err) = result {
                log::warn!("[script] uncaught exception in {}: {err}", call.function);
                self.failures.push(format!("{}: {err}", call.function));
            }
            self.world.state.borrow_mut().store.release_thread(thread);
        }
        let mut state = self.world.state.borrow_mut();
        let WorldState { store, bodies, .. } = &mut *state;
        // Timers may have released threads without resuming them.
        bodies.retain(|thread, _| store.thread_alive(*thread));
        store.take_touched();
    }
}

fn register_api(engine: &mut Engine) {
    engine.register_type_with_name::<ScriptWorld>("World");
    engine.register_type_with_name::<ObjectId>("Object");
    engine.register_type_with_name::<ThreadHandle>("Thread");
    engine.register_fn("==", |a: ObjectId, b: ObjectId| a == b);
    engine.register_fn("!=", |a: ObjectId, b: ObjectId| a != b);
    engine.register_fn("to_string", |id: &mut ObjectId| id.to_string());
    engine.register_fn("to_debug", |id: &mut ObjectId| id.to_string());

    engine.register_fn("location", ScriptWorld::location);
    engine.register_fn("object", ScriptWorld::object);
    engine.register_fn("group", ScriptWorld::group);
    engine.register_fn("group", ScriptWorld::child_group);
    engine.register_fn("stage", ScriptWorld::group);
    engine.register_fn("set", ScriptWorld::set);
    engine.register_fn("get", ScriptWorld::get);
    engine.register_fn("on", ScriptWorld::on);
    engine.register_fn("delay", ScriptWorld::delay);
    engine.register_fn("cancel", ScriptWorld::cancel);

    engine.register_fn(
        "push_tween",
        |world: &mut ScriptWorld, object: Dynamic, targets: Dynamic, speed: Dynamic| {
            world.queue(None, "push_tween", &[object, targets, speed], None);
        },
    );
    engine.register_fn(
        "push_tween",
        |world: &mut ScriptWorld, object: Dynamic, targets: Dynamic, speed: Dynamic, acceleration: Dynamic| {
            world.queue(None, "push_tween", &[object, targets, speed, acceleration], None);
        },
    );
    engine.register_fn("delete_tween", |world: &mut ScriptWorld, object: Dynamic| {
        world.queue(None, "delete_tween", &[object], None);
    });
    engine.register_fn("render", |world: &mut ScriptWorld| world.queue(None, "render", &[], None));
    engine.register_fn("render", |world: &mut ScriptWorld, target: Dynamic| {
        world.queue(None, "render", &[target], None);
    });
    engine.register_fn(
        "measure_text",
        |world: &mut ScriptWorld, text: Dynamic, object: Dynamic, sprite: Dynamic, reply: &str| {
            world.queue(None, "measure_text", &[text, object, sprite], Some(reply));
        },
    );
    engine.register_fn(
        "find_path",
        |world: &mut ScriptWorld,
         object: Dynamic,
         sprite: Dynamic,
         x0: Dynamic,
         y0: Dynamic,
         x1: Dynamic,
         y1: Dynamic,
         reply: &str| {
            world.queue(None, "find_path", &[object, sprite, x0, y0, x1, y1], Some(reply));
        },
    );
}
