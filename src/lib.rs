pub mod animation;
pub mod assets;
pub mod cli;
pub mod config;
pub mod engine;
pub mod events;
pub mod hit_region;
pub mod host;
pub mod ops;
pub mod path;
pub mod pointer;
pub mod registry;
pub mod renderer;
pub mod scene;
pub mod scripts;
pub mod text;
pub mod time;
pub mod timers;
pub mod tween;

pub use engine::{Engine, FrameReport, TickState};

use anyhow::{Context, Result};
use assets::CatalogFile;
use cli::CliOptions;
use config::RuntimeConfig;
use host::HostState as _;
use renderer::HeadlessRenderer;
use scripts::ScriptHost;
use time::FrameClock;

/// Load config, catalog and script, then drive a headless scene for the requested frames.
pub fn run(options: &CliOptions) -> Result<()> {
    let mut config = RuntimeConfig::load_or_default(&options.config);
    let overrides = options.config_overrides();
    if !overrides.is_empty() {
        log::info!("[config] CLI overrides: {}", overrides.applied_fields().join(", "));
        config.apply_overrides(&overrides);
    }
    let catalog = CatalogFile::load(&options.catalog)?;
    let host = ScriptHost::load(&options.script)?;
    let mut engine = Engine::load(host, HeadlessRenderer::new(), config, &catalog).context("starting scene")?;

    let mut clock = FrameClock::fixed(options.frame_ms);
    let mut clicks = options.clicks.iter();
    let mut ticked = 0u32;
    for _ in 0..options.frames {
        let now = clock.tick();
        if let Some(point) = clicks.next() {
            engine.pointer_move(*point);
            match engine.pointer_click() {
                Some(object) => {
                    log::info!("[pointer] click at {point} hit {}", engine.host().object_path(object))
                }
                None => log::info!("[pointer] click at {point} hit nothing"),
            }
        }
        if engine.next_wakeup().map_or(true, |due| due > now) {
            continue;
        }
        let report = engine.frame(now)?;
        ticked += 1;
        log::debug!("[engine] frame at {now:.0}ms: {report:?}");
    }

    let renderer = engine.renderer();
    log::info!(
        "[engine] ran {ticked} of {} frames; {} live nodes, {} visible; {} script errors",
        options.frames,
        renderer.live_nodes(),
        renderer.visible_nodes().count(),
        engine.host().failures().len()
    );
    Ok(())
}
