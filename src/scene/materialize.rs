use super::node::{AnimationCursor, NodeArena, VisualNode};
use crate::animation::AnimationScheduler;
use crate::assets::SpriteDefinition;
use crate::config::TextConfig;
use crate::events::{EventBus, HostEvent};
use crate::hit_region::HitRegion;
use crate::host::{HostState, ObjectId, PropertyKeys, PropertyRecord, Symbol};
use crate::registry::ObjectRegistry;
use crate::renderer::{NodeContent, NodeHandle, NodeState, RenderBackend};
use crate::text::TextStyle;
use glam::Vec2;
use std::collections::HashSet;
use std::sync::Arc;

/// Definition reached after following proxies.
struct Resolved {
    source: ObjectId,
    definition: Arc<SpriteDefinition>,
    /// Sum of the proxy offsets crossed on the way.
    proxy_offset: Vec2,
}

/// Fresh visual derived from a definition, before base properties are applied.
struct Visual {
    content: NodeContent,
    hit: HitRegion,
    pivot: Vec2,
    offset: Vec2,
    animation: Option<AnimationCursor>,
}

/// Turns host object state into nodes. Borrowed for the length of one synchronization pass.
pub struct Materializer<'a> {
    pub registry: &'a ObjectRegistry,
    pub host: &'a mut dyn HostState,
    pub renderer: &'a mut dyn RenderBackend,
    pub arena: &'a mut NodeArena,
    pub animations: &'a mut AnimationScheduler,
    pub events: &'a mut EventBus,
    pub text: &'a TextConfig,
    pub reuse_nodes: bool,
    pub now: f64,
}

impl<'a> Materializer<'a> {
    /// Bring the node for `object` up to date, replacing `current` when the sprite changed.
    ///
    /// `origin` is added to the node position; stage slots pass zero, the cursor passes the pointer.
    /// Never fails: unresolvable sprites degrade to an invisible placeholder.
    pub fn materialize(
        &mut self,
        object: ObjectId,
        current: Option<NodeHandle>,
        origin: Vec2,
        interactive: bool,
    ) -> NodeHandle {
        let base = self.host.read_properties(object, PropertyKeys::BASE);
        if base.hidden == Some(true) {
            return self.hide(object, current);
        }
        let sprite = base.sprite.unwrap_or(self.registry.default_sprite());
        match self.resolve(object, sprite) {
            Ok(resolved) => self.apply(object, current, resolved, &base, origin, interactive),
            Err(reason) => {
                log::warn!("[scene] {}: {reason}", self.host.object_path(object));
                self.placeholder(object, current)
            }
        }
    }

    fn symbol(&self, symbol: Symbol) -> String {
        self.host.symbol_text(symbol).unwrap_or_else(|| format!("<symbol {}>", symbol.0))
    }

    fn resolve(&self, object: ObjectId, sprite: Symbol) -> Result<Resolved, String> {
        let mut visited = HashSet::new();
        let (mut owner, mut name) = (object, sprite);
        let mut proxy_offset = Vec2::ZERO;
        loop {
            if !visited.insert((owner, name)) {
                return Err(format!(
                    "proxy chain loops at sprite '{}' of '{}'",
                    self.symbol(name),
                    self.host.object_path(owner)
                ));
            }
            let definition = self.registry.sprite(owner, name).ok_or_else(|| {
                let path = self.host.object_path(owner);
                format!("sprite '{}' not found in object '{path}'", self.symbol(name))
            })?;
            let SpriteDefinition::Proxy { target, sprite, offset } = definition.as_ref() else {
                return Ok(Resolved { source: owner, definition: definition.clone(), proxy_offset });
            };
            let live = self.host.read_properties(owner, PropertyKeys::PROXY_REF);
            let next = live.proxy.or(*target).unwrap_or(owner);
            if !self.registry.contains(next) {
                let target = self.host.object_path(next);
                return Err(format!("proxy target '{target}' has no resource definition"));
            }
            proxy_offset += *offset;
            name = live.proxy_sprite.or(*sprite).unwrap_or(self.registry.default_sprite());
            owner = next;
        }
    }

    fn apply(
        &mut self,
        object: ObjectId,
        current: Option<NodeHandle>,
        resolved: Resolved,
        base: &PropertyRecord,
        origin: Vec2,
        interactive: bool,
    ) -> NodeHandle {
        let reusable = current.filter(|handle| {
            self.reuse_nodes
                && self.arena.get(*handle).map_or(false, |node| node.renders(&resolved.definition))
        });
        if let Some(handle) = reusable {
            let text = self.text_content(resolved.source, &resolved.definition);
            if let Some(node) = self.arena.get_mut(handle) {
                if let Some(content) = text {
                    node.state.content = content;
                }
                node.object = object;
                node.source = resolved.source;
                node.offset = resting_offset(&resolved, node.animation.map_or(0, |cursor| cursor.frame));
                apply_base(node, base, origin, interactive);
                self.renderer.update_node(handle, &node.state);
                return handle;
            }
        }

        let visual = self.visual(&resolved);
        let mut node = VisualNode {
            handle: NodeHandle(0),
            object,
            source: resolved.source,
            definition: Some(resolved.definition.clone()),
            offset: visual.offset,
            state: NodeState { content: visual.content, pivot: visual.pivot, ..NodeState::default() },
            hit: visual.hit,
            animation: visual.animation,
        };
        apply_base(&mut node, base, origin, interactive);
        let is_animation = node.animation.is_some();
        if let Some(previous) = current {
            self.release(previous, is_animation);
        }
        node.handle = self.renderer.create_node(&node.state);
        if is_animation {
            self.animations.register(node.handle);
        }
        self.arena.insert(node)
    }

    fn visual(&self, resolved: &Resolved) -> Visual {
        let extra = resolved.proxy_offset;
        match resolved.definition.as_ref() {
            SpriteDefinition::Frame { image, offset } => Visual {
                content: NodeContent::Image(image.clone()),
                hit: HitRegion::for_image(image),
                pivot: image.size() * 0.5,
                offset: *offset + extra,
                animation: None,
            },
            SpriteDefinition::Text { size, offset } => Visual {
                content: self
                    .text_content(resolved.source, &resolved.definition)
                    .unwrap_or(NodeContent::Empty),
                hit: HitRegion::Rect(*size),
                pivot: *size * 0.5,
                offset: *offset + extra,
                animation: None,
            },
            SpriteDefinition::Animation { frames } => match frames.first() {
                Some(first) => Visual {
                    content: NodeContent::Image(first.image.clone()),
                    hit: HitRegion::for_image(&first.image),
                    pivot: first.image.size() * 0.5,
                    offset: first.offset + extra,
                    animation: Some(AnimationCursor { frame: 0, next_at: self.now + first.delay_ms }),
                },
                None => empty_visual(extra),
            },
            SpriteDefinition::Point(point) => empty_visual(*point + extra),
            SpriteDefinition::Quad(points) => Visual { hit: HitRegion::Quad(*points), ..empty_visual(extra) },
            // Walkmaps only feed path queries; proxies are resolved away before this point.
            SpriteDefinition::Walkmap(_) | SpriteDefinition::Proxy { .. } => empty_visual(extra),
        }
    }

    fn text_content(&self, source: ObjectId, definition: &SpriteDefinition) -> Option<NodeContent> {
        let SpriteDefinition::Text { size, .. } = definition else {
            return None;
        };
        let props = self.host.read_properties(source, PropertyKeys::TEXT_STYLE);
        Some(NodeContent::Text {
            text: props.text.unwrap_or_default(),
            style: TextStyle::parse_or(props.font.as_deref(), &self.text.fallback),
            size: *size,
        })
    }

    fn hide(&mut self, object: ObjectId, current: Option<NodeHandle>) -> NodeHandle {
        if let Some(handle) = current {
            if let Some(node) = self.arena.get_mut(handle) {
                node.object = object;
                node.state.visible = false;
                node.state.interactive = false;
                self.renderer.update_node(handle, &node.state);
                return handle;
            }
        }
        self.create_placeholder(object)
    }

    /// Invisible stand-in for an object that cannot be drawn.
    pub fn placeholder(&mut self, object: ObjectId, current: Option<NodeHandle>) -> NodeHandle {
        if let Some(handle) = current {
            if let Some(node) = self.arena.get_mut(handle) {
                if node.definition.is_none() {
                    node.object = object;
                    node.state.visible = false;
                    self.renderer.update_node(handle, &node.state);
                    return handle;
                }
            }
            self.release(handle, false);
        }
        self.create_placeholder(object)
    }

    fn create_placeholder(&mut self, object: ObjectId) -> NodeHandle {
        let state = NodeState::default();
        let handle = self.renderer.create_node(&state);
        self.arena.insert(VisualNode::placeholder(handle, object, state))
    }

    /// Destroy a node. An animation replaced by something that does not animate notifies its owner.
    pub fn release(&mut self, handle: NodeHandle, replaced_by_animation: bool) {
        let Some(node) = self.arena.remove(handle) else {
            return;
        };
        if self.animations.unregister(handle) && !replaced_by_animation {
            self.events.push(HostEvent::AnimationDestroyed { object: node.object });
        }
        self.renderer.destroy_node(handle);
    }
}

/// Offset of a reused node; animations keep the offset of the frame they are on.
fn resting_offset(resolved: &Resolved, frame: usize) -> Vec2 {
    let extra = resolved.proxy_offset;
    match resolved.definition.as_ref() {
        SpriteDefinition::Frame { offset, .. } | SpriteDefinition::Text { offset, .. } => *offset + extra,
        SpriteDefinition::Animation { frames } => {
            frames.get(frame).map_or(extra, |frame| frame.offset + extra)
        }
        SpriteDefinition::Point(point) => *point + extra,
        _ => extra,
    }
}

fn empty_visual(offset: Vec2) -> Visual {
    Visual { content: NodeContent::Empty, hit: HitRegion::Empty, pivot: Vec2::ZERO, offset, animation: None }
}

/// Visibility, interactivity and transform from the base property set.
///
/// Horizontal scale keeps its sign (mirroring); vertical scale is forced non-negative.
/// A missing or zero scale draws at 1.
fn apply_base(node: &mut VisualNode, base: &PropertyRecord, origin: Vec2, interactive: bool) {
    let scale = base.scale.filter(|scale| *scale != 0.0).unwrap_or(1.0) as f32;
    let placement = Vec2::new(base.left.unwrap_or(0.0) as f32, base.top.unwrap_or(0.0) as f32);
    node.state.visible = true;
    node.state.interactive = interactive && base.disabled != Some(true);
    node.state.position = origin + node.offset + placement;
    node.state.scale = Vec2::new(scale, scale.abs());
    node.state.rotation_deg = base.rotation.unwrap_or(0.0) as f32;
}
