use crate::host::{HostState, HostType, ObjectId, Symbol};
use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use glam::Vec2;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Resource catalog as written by the asset pipeline.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub images: Vec<ImageFile>,
    #[serde(default)]
    pub groups: Vec<GroupFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageFile {
    pub hash: String,
    pub width: u32,
    pub height: u32,
    /// Base64 of the packed pixel mask, 8 pixels per byte, row-major.
    #[serde(default)]
    pub hitmap: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    Location,
    Object,
    Group,
}

impl GroupKind {
    pub fn host_type(self) -> HostType {
        match self {
            GroupKind::Location => HostType::Location,
            GroupKind::Object => HostType::Object,
            GroupKind::Group => HostType::Hashmap,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupFile {
    /// Dotted path for top-level groups, member name for children.
    pub name: String,
    /// Defaults to `location` at top level and `object` below.
    #[serde(default)]
    pub kind: Option<GroupKind>,
    #[serde(default)]
    pub sprites: Vec<SpriteFile>,
    #[serde(default)]
    pub children: Vec<GroupFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpriteFile {
    pub name: String,
    #[serde(flatten)]
    pub kind: SpriteFileKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnimationFrameFile {
    pub image: String,
    #[serde(default)]
    pub left: f32,
    #[serde(default)]
    pub top: f32,
    /// Milliseconds this frame stays up.
    pub delay: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpriteFileKind {
    Frame {
        image: String,
        #[serde(default)]
        left: f32,
        #[serde(default)]
        top: f32,
    },
    Proxy {
        #[serde(default)]
        object: Option<String>,
        #[serde(default)]
        sprite: Option<String>,
        #[serde(default)]
        left: f32,
        #[serde(default)]
        top: f32,
    },
    Text {
        width: f32,
        height: f32,
        #[serde(default)]
        left: f32,
        #[serde(default)]
        top: f32,
    },
    Animation {
        frames: Vec<AnimationFrameFile>,
    },
    Point {
        x: f32,
        y: f32,
    },
    Quad {
        points: [[f32; 2]; 4],
    },
    Walkmap {
        bitmap: String,
        width: u32,
        height: u32,
        #[serde(default = "default_walkmap_scale")]
        scale: f32,
        #[serde(default)]
        left: f32,
        #[serde(default)]
        top: f32,
    },
}

fn default_walkmap_scale() -> f32 {
    1.0
}

impl CatalogFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).with_context(|| format!("Failed to read catalog {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("Failed to parse catalog {}", path.display()))
    }
}

#[derive(Debug)]
pub struct ImageAsset {
    pub hash: String,
    pub width: u32,
    pub height: u32,
    pub hitmap: Option<Arc<[u8]>>,
}

impl ImageAsset {
    pub fn size(&self) -> Vec2 {
        Vec2::new(self.width as f32, self.height as f32)
    }
}

#[derive(Debug, Clone)]
pub struct AnimationFrame {
    pub image: Arc<ImageAsset>,
    pub offset: Vec2,
    pub delay_ms: f64,
}

#[derive(Debug)]
pub struct Walkmap {
    pub bitmap: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    pub scale: f32,
    pub offset: Vec2,
}

#[derive(Debug)]
pub enum SpriteDefinition {
    Frame { image: Arc<ImageAsset>, offset: Vec2 },
    /// Another object's sprite. `target` falls back to the owning object, `sprite` to `default`.
    Proxy { target: Option<ObjectId>, sprite: Option<Symbol>, offset: Vec2 },
    Text { size: Vec2, offset: Vec2 },
    Animation { frames: Vec<AnimationFrame> },
    Point(Vec2),
    Quad([Vec2; 4]),
    Walkmap(Walkmap),
}

impl SpriteDefinition {
    pub fn kind_label(&self) -> &'static str {
        match self {
            SpriteDefinition::Frame { .. } => "frame",
            SpriteDefinition::Proxy { .. } => "proxy",
            SpriteDefinition::Text { .. } => "text",
            SpriteDefinition::Animation { .. } => "animation",
            SpriteDefinition::Point(_) => "point",
            SpriteDefinition::Quad(_) => "quad",
            SpriteDefinition::Walkmap(_) => "walkmap",
        }
    }

    pub fn is_animation(&self) -> bool {
        matches!(self, SpriteDefinition::Animation { .. })
    }
}

/// Named sprites of one object. Entries share definitions by `Arc` identity.
#[derive(Debug, Default)]
pub struct SpriteSet {
    entries: HashMap<Symbol, Arc<SpriteDefinition>>,
}

impl SpriteSet {
    pub fn get(&self, name: Symbol) -> Option<&Arc<SpriteDefinition>> {
        self.entries.get(&name)
    }

    pub fn names(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Image metadata by catalog hash.
#[derive(Debug, Default)]
pub struct ResourceIndex {
    images: HashMap<String, Arc<ImageAsset>>,
}

impl ResourceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_catalog(catalog: &CatalogFile) -> Result<Self> {
        let mut index = Self::new();
        for image in &catalog.images {
            index.insert_image(image)?;
        }
        Ok(index)
    }

    pub fn insert_image(&mut self, file: &ImageFile) -> Result<Arc<ImageAsset>> {
        let hitmap = match &file.hitmap {
            Some(encoded) => Some(Arc::from(
                BASE64
                    .decode(encoded.as_bytes())
                    .with_context(|| format!("Invalid hitmap for image {}", file.hash))?,
            )),
            None => None,
        };
        let asset =
            Arc::new(ImageAsset { hash: file.hash.clone(), width: file.width, height: file.height, hitmap });
        self.images.insert(file.hash.clone(), asset.clone());
        Ok(asset)
    }

    pub fn image(&self, hash: &str) -> Option<&Arc<ImageAsset>> {
        self.images.get(hash)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    fn require_image(&self, hash: &str, owner: &str) -> Result<Arc<ImageAsset>> {
        self.images
            .get(hash)
            .cloned()
            .ok_or_else(|| anyhow!("image '{hash}' referenced by {owner} is not in the catalog"))
    }

    /// Build the sprite set of `owner`, interning names through the host.
    ///
    /// The first declared sprite doubles as `default` when none is named so.
    pub fn build_sprite_set(
        &self,
        sprites: &[SpriteFile],
        owner: &str,
        host: &mut dyn HostState,
    ) -> Result<SpriteSet> {
        let mut set = SpriteSet::default();
        let mut first = None;
        for sprite in sprites {
            let definition = Arc::new(self.build_definition(sprite, owner, host)?);
            let name = host.intern(&sprite.name);
            if set.entries.insert(name, definition.clone()).is_some() {
                bail!("sprite '{}' is declared twice in {owner}", sprite.name);
            }
            first.get_or_insert(definition);
        }
        let default_key = host.intern("default");
        if let Some(first) = first {
            set.entries.entry(default_key).or_insert(first);
        }
        Ok(set)
    }

    fn build_definition(
        &self,
        sprite: &SpriteFile,
        owner: &str,
        host: &mut dyn HostState,
    ) -> Result<SpriteDefinition> {
        let label = format!("{owner}:{}", sprite.name);
        let definition = match &sprite.kind {
            SpriteFileKind::Frame { image, left, top } => SpriteDefinition::Frame {
                image: self.require_image(image, &label)?,
                offset: Vec2::new(*left, *top),
            },
            SpriteFileKind::Proxy { object, sprite: target_sprite, left, top } => {
                let target = match object {
                    Some(path) => match host.resolve_path(path, None) {
                        Some((id, HostType::Object)) => Some(id),
                        Some((_, other)) => bail!(
                            "could not resolve proxy target {path} of {label}: \
                             got type '{other}', expected 'object'"
                        ),
                        None => {
                            bail!("could not resolve proxy target {path} of {label}: path does not exist")
                        }
                    },
                    None => None,
                };
                SpriteDefinition::Proxy {
                    target,
                    sprite: target_sprite.as_deref().map(|name| host.intern(name)),
                    offset: Vec2::new(*left, *top),
                }
            }
            SpriteFileKind::Text { width, height, left, top } => {
                SpriteDefinition::Text { size: Vec2::new(*width, *height), offset: Vec2::new(*left, *top) }
            }
            SpriteFileKind::Animation { frames } => {
                if frames.is_empty() {
                    bail!("animation {label} has no frames");
                }
                let frames = frames
                    .iter()
                    .map(|frame| {
                        Ok(AnimationFrame {
                            image: self.require_image(&frame.image, &label)?,
                            offset: Vec2::new(frame.left, frame.top),
                            delay_ms: frame.delay.max(0.0),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                SpriteDefinition::Animation { frames }
            }
            SpriteFileKind::Point { x, y } => SpriteDefinition::Point(Vec2::new(*x, *y)),
            SpriteFileKind::Quad { points } => SpriteDefinition::Quad(points.map(|[x, y]| Vec2::new(x, y))),
            SpriteFileKind::Walkmap { bitmap, width, height, scale, left, top } => {
                let bytes = BASE64
                    .decode(bitmap.as_bytes())
                    .with_context(|| format!("Invalid walkmap bitmap in {label}"))?;
                let cells = (*width as usize) * (*height as usize);
                if bytes.len() * 8 < cells {
                    bail!("walkmap {label} holds {} bits but needs {cells}", bytes.len() * 8);
                }
                if !(*scale > 0.0) {
                    bail!("walkmap {label} has non-positive scale {scale}");
                }
                SpriteDefinition::Walkmap(Walkmap {
                    bitmap: Arc::from(bytes),
                    width: *width,
                    height: *height,
                    scale: *scale,
                    offset: Vec2::new(*left, *top),
                })
            }
        };
        Ok(definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::ObjectStore;

    fn frame(name: &str, image: &str) -> SpriteFile {
        let kind = SpriteFileKind::Frame { image: image.to_string(), left: 0.0, top: 0.0 };
        SpriteFile { name: name.to_string(), kind }
    }

    fn index() -> ResourceIndex {
        let catalog: CatalogFile = serde_json::from_str(
            r#"{"images":[{"hash":"a","width":4,"height":4,"hitmap":"AYA="},{"hash":"b","width":2,"height":2}]}"#,
        )
        .expect("catalog");
        ResourceIndex::from_catalog(&catalog).expect("index")
    }

    #[test]
    fn decodes_hitmaps() {
        let index = index();
        let image = index.image("a").expect("image a");
        assert_eq!(image.hitmap.as_deref(), Some(&[0x01u8, 0x80][..]));
        assert!(index.image("b").expect("image b").hitmap.is_none());
    }

    #[test]
    fn default_is_synthesized_from_first_sprite() {
        let index = index();
        let mut host = ObjectStore::new();
        let sprites = [frame("idle", "a"), frame("walk", "b")];
        let set = index.build_sprite_set(&sprites, "hero", &mut host).expect("set");
        let default = set.get(host.intern("default")).expect("default resolves");
        let idle = set.get(host.intern("idle")).expect("idle");
        assert!(Arc::ptr_eq(default, idle), "default shares the first definition");
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn explicit_default_is_kept() {
        let index = index();
        let mut host = ObjectStore::new();
        let sprites = [frame("idle", "a"), frame("default", "b")];
        let set = index.build_sprite_set(&sprites, "hero", &mut host).expect("set");
        match set.get(host.intern("default")).map(|def| def.as_ref()) {
            Some(SpriteDefinition::Frame { image, .. }) => assert_eq!(image.hash, "b"),
            other => panic!("unexpected default {other:?}"),
        }
    }

    #[test]
    fn empty_set_has_no_default() {
        let index = index();
        let mut host = ObjectStore::new();
        let set = index.build_sprite_set(&[], "hero", &mut host).expect("set");
        assert!(set.is_empty());
        assert!(set.get(host.intern("default")).is_none());
    }

    #[test]
    fn unknown_image_is_fatal() {
        let index = index();
        let mut host = ObjectStore::new();
        let err = index.build_sprite_set(&[frame("idle", "zzz")], "hero", &mut host).unwrap_err();
        assert!(err.to_string().contains("image 'zzz'"), "{err}");
    }

    #[test]
    fn sprite_kinds_deserialize_by_tag() {
        let sprite: SpriteFile =
            serde_json::from_str(r#"{"name":"grid","kind":"walkmap","bitmap":"/w==","width":4,"height":4}"#)
                .expect("walkmap sprite");
        assert!(matches!(sprite.kind, SpriteFileKind::Walkmap { scale, .. } if scale == 1.0));
        let sprite: SpriteFile =
            serde_json::from_str(r#"{"name":"look","kind":"proxy","sprite":"idle","left":3}"#).expect("proxy");
        assert!(matches!(sprite.kind, SpriteFileKind::Proxy { object: None, left, .. } if left == 3.0));
    }
}
