use crate::assets::{CatalogFile, GroupFile, GroupKind, ResourceIndex, SpriteDefinition, SpriteSet};
use crate::host::{HostState, ObjectId, Symbol};
use anyhow::{bail, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Resource metadata bound to one host record. Immutable after load.
#[derive(Debug)]
pub struct ObjectRecord {
    pub id: ObjectId,
    pub path: String,
    pub kind: GroupKind,
    /// Position among the parent's children.
    pub z: usize,
    pub parent: Option<ObjectId>,
    pub sprites: SpriteSet,
    /// Children in z order.
    pub children: Vec<ObjectId>,
}

impl ObjectRecord {
    pub fn is_location(&self) -> bool {
        self.kind == GroupKind::Location
    }
}

#[derive(Debug)]
pub struct ObjectRegistry {
    records: HashMap<ObjectId, ObjectRecord>,
    roots: Vec<ObjectId>,
    default_sprite: Symbol,
}

impl ObjectRegistry {
    /// Resolve every catalog group against the host graph and build its sprite set.
    ///
    /// Any path that does not resolve to the declared host type aborts the load.
    pub fn bind(catalog: &CatalogFile, resources: &ResourceIndex, host: &mut dyn HostState) -> Result<Self> {
        let default_sprite = host.intern("default");
        let mut registry = Self { records: HashMap::new(), roots: Vec::new(), default_sprite };
        for group in &catalog.groups {
            let kind = group.kind.unwrap_or(GroupKind::Location);
            let id = registry.bind_group(group, kind, None, resources, host, 0)?;
            registry.roots.push(id);
        }
        registry.validate_proxy_chains(host)?;
        log::info!(
            "[registry] bound {} resource records ({} roots)",
            registry.records.len(),
            registry.roots.len()
        );
        Ok(registry)
    }

    fn bind_group(
        &mut self,
        group: &GroupFile,
        kind: GroupKind,
        parent: Option<(ObjectId, &str)>,
        resources: &ResourceIndex,
        host: &mut dyn HostState,
        z: usize,
    ) -> Result<ObjectId> {
        let path = match parent {
            Some((_, parent_path)) => format!("{parent_path}.{}", group.name),
            None => group.name.clone(),
        };
        let expected = kind.host_type();
        let id = match host.resolve_path(&group.name, parent.map(|(id, _)| id)) {
            Some((id, found)) if found == expected => id,
            Some((_, found)) => bail!(
                "could not resolve {expected} resource {path}: got type '{found}', expected '{expected}'"
            ),
            None => bail!("could not resolve {expected} resource {path}: path does not exist"),
        };
        if self.records.contains_key(&id) {
            bail!("resource {path} is declared twice");
        }
        let sprites = resources.build_sprite_set(&group.sprites, &path, host)?;
        let mut children = Vec::with_capacity(group.children.len());
        for (index, child) in group.children.iter().enumerate() {
            let child_kind = child.kind.unwrap_or(GroupKind::Object);
            if child_kind == GroupKind::Location {
                bail!("location resource {path}.{} cannot be nested", child.name);
            }
            children.push(self.bind_group(child, child_kind, Some((id, &path)), resources, host, index)?);
        }
        self.records.insert(
            id,
            ObjectRecord { id, path, kind, z, parent: parent.map(|(id, _)| id), sprites, children },
        );
        Ok(id)
    }

    /// Follow every declared proxy through the catalog and reject chains that loop.
    fn validate_proxy_chains(&self, host: &dyn HostState) -> Result<()> {
        for record in self.records.values() {
            let mut names: Vec<Symbol> = record.sprites.names().collect();
            names.sort();
            for name in names {
                let mut visited = HashSet::new();
                let mut cursor = (record.id, name);
                while let Some(SpriteDefinition::Proxy { target, sprite, .. }) =
                    self.sprite(cursor.0, cursor.1).map(|def| def.as_ref())
                {
                    if !visited.insert(cursor) {
                        let sprite_name = host.symbol_text(name).unwrap_or_default();
                        bail!("proxy sprite {}:{sprite_name} refers back to itself", record.path);
                    }
                    cursor = (target.unwrap_or(cursor.0), sprite.unwrap_or(self.default_sprite));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, id: ObjectId) -> Option<&ObjectRecord> {
        self.records.get(&id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.records.contains_key(&id)
    }

    pub fn sprite(&self, id: ObjectId, name: Symbol) -> Option<&Arc<SpriteDefinition>> {
        self.records.get(&id).and_then(|record| record.sprites.get(name))
    }

    pub fn default_sprite(&self) -> Symbol {
        self.default_sprite
    }

    /// Top-level groups in catalog order.
    pub fn roots(&self) -> &[ObjectId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::ObjectStore;
    use crate::host::HostValue;

    fn catalog(json: &str) -> CatalogFile {
        serde_json::from_str(json).expect("catalog json")
    }

    const IMAGES: &str = r#""images":[{"hash":"bg","width":64,"height":32},{"hash":"door","width":8,"height":16}]"#;

    #[test]
    fn binds_children_in_z_order() {
        let mut store = ObjectStore::new();
        let town = store.add_location("town");
        let door = store.add_object(town, "door");
        let lamp = store.add_object(town, "lamp");
        let catalog = catalog(&format!(
            r#"{{{IMAGES},"groups":[{{"name":"town","sprites":[{{"name":"day","kind":"frame","image":"bg"}}],
            "children":[{{"name":"lamp"}},{{"name":"door","sprites":[{{"name":"shut","kind":"frame","image":"door"}}]}}]}}]}}"#
        ));
        let resources = ResourceIndex::from_catalog(&catalog).expect("resources");
        let registry = ObjectRegistry::bind(&catalog, &resources, &mut store).expect("bind");
        let record = registry.get(town).expect("town record");
        assert!(record.is_location());
        assert_eq!(record.children, vec![lamp, door]);
        assert_eq!(registry.get(door).expect("door").z, 1);
        assert_eq!(registry.get(door).expect("door").path, "town.door");
        assert!(registry.sprite(door, registry.default_sprite()).is_some());
        assert!(registry.get(lamp).expect("lamp").sprites.is_empty());
    }

    #[test]
    fn type_mismatch_names_full_path() {
        let mut store = ObjectStore::new();
        let town = store.add_location("town");
        store.add_value(Some(town), "door", HostValue::Int(4));
        let catalog = catalog(&format!(r#"{{{IMAGES},"groups":[{{"name":"town","children":[{{"name":"door"}}]}}]}}"#));
        let resources = ResourceIndex::from_catalog(&catalog).expect("resources");
        let err = ObjectRegistry::bind(&catalog, &resources, &mut store).unwrap_err();
        assert_eq!(
            err.to_string(),
            "could not resolve object resource town.door: got type 'integer', expected 'object'"
        );
    }

    #[test]
    fn missing_location_is_fatal() {
        let mut store = ObjectStore::new();
        let catalog = catalog(&format!(r#"{{{IMAGES},"groups":[{{"name":"nowhere"}}]}}"#));
        let resources = ResourceIndex::from_catalog(&catalog).expect("resources");
        let err = ObjectRegistry::bind(&catalog, &resources, &mut store).unwrap_err();
        assert!(err.to_string().contains("location resource nowhere"), "{err}");
    }

    #[test]
    fn self_referencing_proxy_is_rejected() {
        let mut store = ObjectStore::new();
        let town = store.add_location("town");
        store.add_object(town, "ghost");
        let catalog = catalog(&format!(
            r#"{{{IMAGES},"groups":[{{"name":"town","children":[{{"name":"ghost",
            "sprites":[{{"name":"haunt","kind":"proxy"}}]}}]}}]}}"#
        ));
        let resources = ResourceIndex::from_catalog(&catalog).expect("resources");
        let err = ObjectRegistry::bind(&catalog, &resources, &mut store).unwrap_err();
        assert!(err.to_string().contains("refers back to itself"), "{err}");
    }

    #[test]
    fn proxy_to_other_object_is_accepted() {
        let mut store = ObjectStore::new();
        let town = store.add_location("town");
        store.add_object(town, "hero");
        store.add_object(town, "shadow");
        let catalog = catalog(&format!(
            r#"{{{IMAGES},"groups":[{{"name":"town","children":[
            {{"name":"hero","sprites":[{{"name":"idle","kind":"frame","image":"door"}}]}},
            {{"name":"shadow","sprites":[{{"name":"follow","kind":"proxy","object":"town.hero","sprite":"idle"}}]}}]}}]}}"#
        ));
        let resources = ResourceIndex::from_catalog(&catalog).expect("resources");
        assert!(ObjectRegistry::bind(&catalog, &resources, &mut store).is_ok());
    }
}
