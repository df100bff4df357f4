use glam::Vec2;
use kestrel_stage::assets::CatalogFile;
use kestrel_stage::config::RuntimeConfig;
use kestrel_stage::engine::Engine;
use kestrel_stage::host::memory::MemoryHost;
use kestrel_stage::host::{HostCallError, HostState, HostType, HostValue, ObjectId, OpOutcome};
use kestrel_stage::renderer::HeadlessRenderer;

/// 10x10 cells, a wall down column 5 with a gap in the bottom row.
const GAP: &str = "33///ffff//999//Dw==";
/// Same wall with no gap.
const SEALED: &str = "33///ffff//9999/Dw==";

fn field(bitmap: &str) -> (Engine<MemoryHost, HeadlessRenderer>, ObjectId) {
    let catalog = format!(
        r#"{{
            "images": [],
            "groups": [{{
                "name": "field",
                "sprites": [
                    {{"name": "walk", "kind": "walkmap", "bitmap": "{bitmap}", "width": 10, "height": 10, "scale": 10}},
                    {{"name": "marker", "kind": "point", "x": 5, "y": 5}}
                ]
            }}]
        }}"#
    );
    let catalog: CatalogFile = serde_json::from_str(&catalog).expect("catalog json");
    let mut host = MemoryHost::new();
    let field = host.store.add_location("field");
    let stage = host.store.add_group(None, "stage");
    host.store.set_field(stage, "location", HostValue::Object(field));
    let config = RuntimeConfig::default();
    let mut engine = Engine::load(host, HeadlessRenderer::new(), config, &catalog).expect("engine loads");
    engine.frame(0.0).expect("first frame");
    (engine, field)
}

fn query(
    engine: &mut Engine<MemoryHost, HeadlessRenderer>,
    object: ObjectId,
    sprite: &str,
    from: Vec2,
    to: Vec2,
) -> Result<OpOutcome, HostCallError> {
    let sprite = engine.host_mut().intern(sprite);
    let args = [
        HostValue::Object(object),
        HostValue::Str(sprite),
        from.x.into(),
        from.y.into(),
        to.x.into(),
        to.y.into(),
    ];
    engine.invoke("find_path", &args)
}

fn points(outcome: OpOutcome) -> Vec<Vec2> {
    let OpOutcome::Value(HostValue::List(items)) = outcome else {
        panic!("expected a point list, got {outcome:?}");
    };
    items
        .iter()
        .map(|item| match item {
            HostValue::List(pair) => match pair.as_slice() {
                [x, y] => Vec2::new(
                    x.as_number().expect("x is a number") as f32,
                    y.as_number().expect("y is a number") as f32,
                ),
                other => panic!("point should have two coordinates, got {other:?}"),
            },
            other => panic!("point should be a list, got {other:?}"),
        })
        .collect()
}

#[test]
fn path_detours_through_the_gap_with_exact_endpoints() {
    let (mut engine, field) = field(GAP);
    let outcome =
        query(&mut engine, field, "walk", Vec2::new(15.0, 15.0), Vec2::new(85.0, 15.0)).expect("query");
    let path = points(outcome);
    assert!(path.len() >= 3, "a wall forces at least one turn: {path:?}");
    assert_eq!(path.first(), Some(&Vec2::new(15.0, 15.0)));
    assert_eq!(path.last(), Some(&Vec2::new(85.0, 15.0)));
    assert!(path.iter().any(|point| point.y >= 90.0), "path must pass the bottom row: {path:?}");
}

#[test]
fn unreachable_goal_yields_nil() {
    let (mut engine, field) = field(SEALED);
    let outcome =
        query(&mut engine, field, "walk", Vec2::new(15.0, 15.0), Vec2::new(85.0, 15.0)).expect("query");
    assert_eq!(outcome, OpOutcome::Value(HostValue::Nil));
}

#[test]
fn goal_inside_a_wall_snaps_to_a_neighbouring_cell() {
    let (mut engine, field) = field(GAP);
    let outcome =
        query(&mut engine, field, "walk", Vec2::new(15.0, 15.0), Vec2::new(55.0, 15.0)).expect("query");
    let path = points(outcome);
    let last = *path.last().expect("non-empty path");
    assert_ne!(last, Vec2::new(55.0, 15.0));
    assert!(last == Vec2::new(45.0, 15.0) || last == Vec2::new(65.0, 15.0), "snapped to {last}");
}

#[test]
fn same_cell_query_returns_both_endpoints() {
    let (mut engine, field) = field(GAP);
    let outcome =
        query(&mut engine, field, "walk", Vec2::new(11.0, 12.0), Vec2::new(18.0, 17.0)).expect("query");
    assert_eq!(points(outcome), vec![Vec2::new(11.0, 12.0), Vec2::new(18.0, 17.0)]);
}

#[test]
fn non_walkmap_sprites_are_rejected() {
    let (mut engine, field) = field(GAP);
    for sprite in ["marker", "missing"] {
        match query(&mut engine, field, sprite, Vec2::ZERO, Vec2::ONE) {
            Err(HostCallError::User(message)) => {
                assert_eq!(message, format!("sprite '{sprite}' of 'field' is not a walkmap"))
            }
            other => panic!("expected a user error, got {other:?}"),
        }
    }

    let walk = engine.host_mut().intern("walk");
    let args = [
        HostValue::Object(field),
        HostValue::Str(walk),
        HostValue::Bool(true),
        HostValue::Int(0),
        HostValue::Int(1),
        HostValue::Int(1),
    ];
    let err = engine.invoke("find_path", &args).unwrap_err();
    assert_eq!(err, HostCallError::Type { index: 3, expected: HostType::Float, got: HostType::Boolean });
}
