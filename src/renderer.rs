use crate::assets::ImageAsset;
use crate::text::TextStyle;
use glam::Vec2;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub enum NodeContent {
    Empty,
    Image(Arc<ImageAsset>),
    Text { text: String, style: TextStyle, size: Vec2 },
}

impl PartialEq for ImageAsset {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.width == other.width && self.height == other.height
    }
}

/// Everything the backend needs to draw one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeState {
    pub content: NodeContent,
    /// Top-left corner in stage space.
    pub position: Vec2,
    /// Rotation and scale origin, relative to `position`.
    pub pivot: Vec2,
    pub scale: Vec2,
    pub rotation_deg: f32,
    pub visible: bool,
    pub interactive: bool,
}

impl Default for NodeState {
    fn default() -> Self {
        Self {
            content: NodeContent::Empty,
            position: Vec2::ZERO,
            pivot: Vec2::ZERO,
            scale: Vec2::ONE,
            rotation_deg: 0.0,
            visible: false,
            interactive: false,
        }
    }
}

/// Retained display-list capability: positioned, scaled, rotated nodes.
pub trait RenderBackend {
    fn create_node(&mut self, state: &NodeState) -> NodeHandle;
    fn update_node(&mut self, handle: NodeHandle, state: &NodeState);
    fn destroy_node(&mut self, handle: NodeHandle);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub created: u64,
    pub updated: u64,
    pub destroyed: u64,
}

/// Backend that only records the display list. Drives the binary and the tests.
#[derive(Debug, Default)]
pub struct HeadlessRenderer {
    nodes: BTreeMap<NodeHandle, NodeState>,
    next_handle: u64,
    stats: RenderStats,
}

impl HeadlessRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, handle: NodeHandle) -> Option<&NodeState> {
        self.nodes.get(&handle)
    }

    pub fn live_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn visible_nodes(&self) -> impl Iterator<Item = (NodeHandle, &NodeState)> {
        self.nodes.iter().filter(|(_, state)| state.visible).map(|(handle, state)| (*handle, state))
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = RenderStats::default();
    }
}

impl RenderBackend for HeadlessRenderer {
    fn create_node(&mut self, state: &NodeState) -> NodeHandle {
        self.next_handle += 1;
        let handle = NodeHandle(self.next_handle);
        self.nodes.insert(handle, state.clone());
        self.stats.created += 1;
        handle
    }

    fn update_node(&mut self, handle: NodeHandle, state: &NodeState) {
        if let Some(slot) = self.nodes.get_mut(&handle) {
            if *slot != *state {
                *slot = state.clone();
                self.stats.updated += 1;
            }
        } else {
            log::warn!("[render] update of unknown node {}", handle.0);
        }
    }

    fn destroy_node(&mut self, handle: NodeHandle) {
        if self.nodes.remove(&handle).is_some() {
            self.stats.destroyed += 1;
        }
    }
}
