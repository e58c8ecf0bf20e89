//! Demo entry point: shadowed scene with a GPU particle cloud and an egui
//! overlay for runtime tuning.

use clap::Parser;
use render_engine::{window, DebugOptions, Engine, EngineConfig, ValidationMode};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Parser, Debug)]
#[command(about = "Shadow-mapped scene with a GPU particle simulation")]
struct Args {
    /// Window width in pixels
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Window height in pixels
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Disable vsync (use mailbox presentation when available)
    #[arg(long)]
    no_vsync: bool,

    /// Number of simulated particles
    #[arg(long, default_value_t = render_engine::particles::DEFAULT_PARTICLE_COUNT)]
    particles: u32,

    /// Validation layer verbosity: off, warn or full
    #[arg(long, default_value = "off")]
    validation: String,

    /// Terminate on the first validation error
    #[arg(long)]
    exit_on_error: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let validation = match args.validation.as_str() {
        "off" => ValidationMode::Off,
        "warn" => ValidationMode::WarningsOnly,
        "full" => ValidationMode::Full,
        other => {
            log::error!("Unknown validation mode '{other}', expected off, warn or full");
            std::process::exit(2);
        }
    };

    let config = EngineConfig {
        width: args.width,
        height: args.height,
        vsync: !args.no_vsync,
        particle_count: args.particles,
        debug: DebugOptions {
            validation,
            exit_on_error: args.exit_on_error,
        },
    };

    let engine: Rc<RefCell<Option<Engine>>> = Rc::new(RefCell::new(None));
    let engine_for_events = Rc::clone(&engine);
    let engine_for_frames = Rc::clone(&engine);

    window::run(
        "render-engine demo",
        config.width,
        config.height,
        move |window, event| {
            if let Some(engine) = engine_for_events.borrow_mut().as_mut() {
                engine.on_window_event(window, event);
            }
        },
        move |window| {
            let mut slot = engine_for_frames.borrow_mut();
            let engine = match slot.as_mut() {
                Some(engine) => engine,
                None => match Engine::new(window, &config) {
                    Ok(engine) => slot.insert(engine),
                    Err(e) => {
                        log::error!("Engine initialization failed: {e}");
                        std::process::exit(1);
                    }
                },
            };

            if window.should_close() {
                return;
            }
            if let Err(e) = engine.draw_frame(window) {
                log::error!("Fatal render error: {e}");
                std::process::exit(1);
            }
        },
    );
}
