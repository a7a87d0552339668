//! Demo showing a simulation thread and a render thread sharing textures

use std::io::Cursor;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

use resource_core::assets::MemoryAssetSource;
use resource_core::prelude::*;
use resource_core::resources::PathManager;

/// Number of simulated frames
const FRAMES: u32 = 12;

/// Textures the simulation streams in and out
const LEVEL_TEXTURES: [&str; 3] = ["brick.png", "tree.png", "grass.png"];

/// Build an in-memory asset bundle with a few solid-colour textures
fn demo_assets() -> Result<MemoryAssetSource, image::ImageError> {
    let mut source = MemoryAssetSource::new();
    for (index, name) in LEVEL_TEXTURES.iter().enumerate() {
        let shade = 60 * (index as u8 + 1);
        let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([shade, shade, shade, 255]));
        let mut bytes = Cursor::new(Vec::new());
        img.write_to(&mut bytes, image::ImageFormat::Png)?;
        source.insert(*name, bytes.into_inner());
    }
    Ok(source)
}

/// Acquire every texture in `wanted`, loading the ones not already resident
fn load_window(
    textures: &PathManager<TextureData>,
    source: &Arc<dyn AssetSource>,
    wanted: &[&str],
) -> Result<Vec<Handle<TextureData>>, LoadError<AssetError>> {
    wanted
        .iter()
        .map(|&path| {
            let source = Arc::clone(source);
            textures.get_or_load(path, move || TextureData::load(source.as_ref(), path))
        })
        .collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => ResourceConfig::load(&path)?,
        None => ResourceConfig::default().with_purge_interval(4),
    };
    if !Registry::init_global(config.registry.clone()) {
        log::warn!("Global registry already initialized, ignoring registry config");
    }

    let source: Arc<dyn AssetSource> = Arc::new(demo_assets()?);
    let render_queue = DeferredQueue::new();
    let mut server = ResourceServer::with_registry(Arc::clone(Registry::global()), &config);

    // GPU-side teardown must happen on the render thread
    let teardown_queue = Arc::clone(&render_queue);
    let textures = server.manager_with(move |registry| {
        ResourceManager::with_destroy(registry, move |texture: TextureData| {
            teardown_queue.defer(move || {
                log::info!("Render thread released {}x{} texture", texture.width, texture.height);
            });
        })
    });

    let (frame_tx, frame_rx) = mpsc::channel::<Vec<Handle<TextureData>>>();
    let render_thread = {
        let render_queue = Arc::clone(&render_queue);
        thread::spawn(move || {
            let mut drawn = 0_usize;
            for frame in frame_rx {
                for texture in &frame {
                    drawn += texture.byte_len();
                }
                drop(frame);
                render_queue.drain();
            }
            render_queue.drain();
            drawn
        })
    };

    // Textures the current window keeps resident between frames
    let mut resident: Vec<Handle<TextureData>> = Vec::new();
    for frame in 0..FRAMES {
        // Each frame the level needs a sliding window of textures
        let wanted = &LEVEL_TEXTURES[(frame as usize / 4) % LEVEL_TEXTURES.len()..];
        // Textures that left the window are released here
        resident = load_window(&textures, &source, wanted)?;
        if frame_tx.send(resident.clone()).is_err() {
            log::error!("Render thread hung up");
            break;
        }
        server.end_frame();
    }
    // Last releases must land before the render thread's final drain
    drop(resident);
    drop(frame_tx);

    let drawn = render_thread
        .join()
        .map_err(|_| "render thread panicked")?;
    server.purge_expired();

    let stats = textures.stats();
    log::info!(
        "Drew {drawn} bytes of texels | hits: {} | loads: {} | {}",
        stats.hits,
        stats.loads,
        server.registry().stats()
    );
    Ok(())
}
