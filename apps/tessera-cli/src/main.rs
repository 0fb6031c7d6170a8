use anyhow::Context;
use clap::{Parser, Subcommand};
use glam::{UVec2, Vec2};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tessera_common::{CameraView, GroupSet, GroupTag};
use tessera_grid::{
    CellCoord, CellSize, Grid, GridConfig, GridContext, Platform, TerrainSamples, TextureHandle,
    TextureUploader, WorldRegistry, largest_footprint,
};
use tessera_kernel::{EntityData, World, WorldParams, splitmix64};
use tessera_persist::GridStore;
use tracing_subscriber::EnvFilter;

/// Sprite footprints the demo worlds are populated with.
const SPRITE_CATALOG: [UVec2; 4] = [
    UVec2::new(16, 16),
    UVec2::new(32, 48),
    UVec2::new(64, 64),
    UVec2::new(80, 96),
];

/// Simulated frame time between camera steps.
const FRAME: Duration = Duration::from_millis(16);

#[derive(Parser)]
#[command(name = "tessera-cli", about = "CLI tool for tessera grid operations")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Grid config JSON (defaults apply to missing fields)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and the effective grid config
    Info,
    /// Build a world, optionally saving it
    Build {
        #[arg(short, long, default_value = "42")]
        seed: u64,
        #[arg(long, default_value = "4000")]
        width: u32,
        #[arg(long, default_value = "4000")]
        height: u32,
        /// Number of entities to scatter over the world
        #[arg(short, long, default_value = "500")]
        entities: usize,
        /// Save directory
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Verify and restore a saved world
    Load {
        /// Save directory
        path: PathBuf,
    },
    /// Build a world and pan a camera across it, streaming textures
    Stream {
        #[arg(short, long, default_value = "42")]
        seed: u64,
        #[arg(long, default_value = "4000")]
        width: u32,
        #[arg(long, default_value = "4000")]
        height: u32,
        /// Camera steps
        #[arg(long, default_value = "200")]
        steps: u32,
    },
}

/// Stand-in for a renderer: hands out sequential handles and counts live ones.
#[derive(Default)]
struct CountingUploader {
    next: u64,
    live: usize,
}

impl TextureUploader for CountingUploader {
    fn upload(&mut self, _coord: CellCoord, _terrain: Option<&TerrainSamples>) -> TextureHandle {
        self.next += 1;
        self.live += 1;
        TextureHandle(self.next)
    }

    fn release(&mut self, _handle: TextureHandle) {
        self.live -= 1;
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<GridConfig> {
    let Some(path) = path else {
        return Ok(GridConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    GridConfig::from_json(&text).with_context(|| format!("parsing config {}", path.display()))
}

fn populate(world: &mut World, count: usize) {
    let params = *world.params();
    let groups: GroupSet = [GroupTag::All, GroupTag::Visible].into_iter().collect();
    let mut state = params.seed;
    for i in 0..count {
        state = splitmix64(state);
        let x = (state >> 32) as f32 / u32::MAX as f32 * params.width as f32;
        let y = (state & 0xffff_ffff) as f32 / u32::MAX as f32 * params.height as f32;
        let mut data = EntityData::new(Vec2::new(x, y), groups);
        data.footprint = SPRITE_CATALOG[i % SPRITE_CATALOG.len()];
        world.spawn(data);
    }
}

fn build(
    params: WorldParams,
    entities: usize,
    ctx: GridContext,
    gpu: &mut CountingUploader,
) -> anyhow::Result<(World, Grid)> {
    let mut world = World::new(params);
    populate(&mut world, entities);
    world.drain_events();

    let mut grid = Grid::new(&params, CellSize::FitSprites(largest_footprint(SPRITE_CATALOG)), ctx)?;
    while let Some(progress) = grid.run_next_stage(gpu) {
        if let Some(message) = progress.message {
            println!("{message}\n");
        }
    }
    grid.ensure_whole_map_resident(gpu);
    grid.sync_world(&world);
    Ok((world, grid))
}

#[derive(Debug, Default)]
struct PanReport {
    bulk_loaded: usize,
    stepped: usize,
    evicted: usize,
    fog_changes: usize,
}

/// Pan a camera diagonally across the world. The first frame loads the whole
/// view at once; later frames stream one texture at a time.
fn pan_camera(grid: &mut Grid, gpu: &mut CountingUploader, steps: u32, frame: Duration) -> PanReport {
    let mut report = PanReport::default();
    let world = *grid.world();
    let platform = grid.config().textures.platform;
    for step in 0..steps {
        let t = step as f32 / steps.max(1) as f32;
        let center = Vec2::new(t * world.width as f32, t * world.height as f32);
        let camera = CameraView::centered(world.clamp_position(center), 1280, 720);
        if step == 0 {
            report.bulk_loaded += grid.load_all_in_view(&camera, gpu);
        } else if grid.step_toward_camera_view(&camera, gpu).is_some() {
            report.stepped += 1;
        }
        if grid.background_pass(&camera).fog_changed {
            report.fog_changes += 1;
        }
        let low_memory = platform == Platform::Desktop && gpu.live > 64;
        report.evicted += grid.evict_if_under_pressure(&camera, &low_memory, gpu);
        std::thread::sleep(frame);
    }
    report
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let config = load_config(cli.config.as_ref())?;
    let registry = Arc::new(WorldRegistry::new());
    let ctx = GridContext::new(config.clone(), Arc::clone(&registry))?;

    match cli.command {
        Commands::Info => {
            println!("tessera-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Build {
            seed,
            width,
            height,
            entities,
            save,
        } => {
            let mut gpu = CountingUploader::default();
            let (world, grid) = build(WorldParams::new(seed, width, height), entities, ctx, &mut gpu)?;
            println!(
                "Built {}: {}x{} cells of {}x{}, {} entities tracked",
                grid.template_key(),
                grid.cells_x(),
                grid.cells_y(),
                grid.cell_width(),
                grid.cell_height(),
                grid.tracked_count()
            );
            if let Some(path) = save {
                let mut store = GridStore::open(&path)?;
                store.save(&world, &grid)?;
                println!("Saved to {} (snapshot {})", path.display(), store.meta().snapshot_count);
            }
        }
        Commands::Load { path } => {
            let store = GridStore::open(&path)?;
            store.verify_integrity().context("save integrity check")?;
            let (world, mut grid) = store.restore(ctx)?;
            let remaining = grid.run_to_completion(&mut CountingUploader::default());
            println!(
                "Loaded {}: {} entities, {} of {} cells visited, {remaining} construction ticks",
                grid.template_key(),
                world.entity_count(),
                grid.cells_visited().len(),
                grid.all_cells().len()
            );
        }
        Commands::Stream {
            seed,
            width,
            height,
            steps,
        } => {
            let mut gpu = CountingUploader::default();
            let (_world, mut grid) = build(WorldParams::new(seed, width, height), 0, ctx, &mut gpu)?;
            let report = pan_camera(&mut grid, &mut gpu, steps, FRAME);
            println!(
                "Streamed {steps} steps: {} loaded at once, {} streamed, {} resident, {} evicted, fog changed on {} steps, {} cells visited",
                report.bulk_loaded,
                report.stepped,
                grid.loaded_textures(),
                report.evicted,
                report.fog_changes,
                grid.cells_visited().len()
            );
            grid.release_all_textures(&mut gpu);
            tracing::debug!(live = gpu.live, "textures released");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(config: GridConfig) -> GridContext {
        GridContext::new(config, Arc::new(WorldRegistry::new())).unwrap()
    }

    #[test]
    fn pan_streams_after_the_first_frame() {
        let config = GridConfig {
            max_threads: 1,
            ..GridConfig::default()
        };
        let mut gpu = CountingUploader::default();
        let (_world, mut grid) = build(WorldParams::new(5, 4000, 4000), 0, ctx(config), &mut gpu).unwrap();

        let report = pan_camera(&mut grid, &mut gpu, 5, FRAME);
        assert!(report.bulk_loaded > 1);
        // Every later frame waits out the rate limit and loads exactly one cell.
        assert_eq!(report.stepped, 4);
        assert_eq!(grid.loaded_textures(), gpu.live);
    }

    #[test]
    fn whole_map_uploads_are_released_by_the_same_uploader() {
        let mut config = GridConfig {
            max_threads: 1,
            ..GridConfig::default()
        };
        config.textures.load_whole_map = true;
        let mut gpu = CountingUploader::default();
        let (_world, mut grid) = build(WorldParams::new(5, 600, 600), 0, ctx(config), &mut gpu).unwrap();
        assert_eq!(gpu.live, grid.all_cells().len());

        let report = pan_camera(&mut grid, &mut gpu, 2, Duration::ZERO);
        // Everything is resident already: nothing to stream or evict.
        assert_eq!((report.bulk_loaded, report.stepped, report.evicted), (0, 0, 0));
        grid.release_all_textures(&mut gpu);
        assert_eq!(gpu.live, 0);
    }
}
