//! Trigon, an explicit-API triangle renderer.
//!
//! The binary owns the event loop and the exit protocol: every distinct
//! setup failure terminates the process with its stage's exit code, and
//! closing the window is the only way the loop ends normally.

use anyhow::Result;
use tracing::{debug, error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use trigon_core::FrameTimer;
use trigon_platform::Window;
use trigon_renderer::Renderer;

const WINDOW_WIDTH: u32 = 1280;
const WINDOW_HEIGHT: u32 = 720;
const WINDOW_TITLE: &str = "trigon";

/// Frames between frame-rate log lines.
const FRAME_LOG_INTERVAL: u64 = 300;

struct App {
    window: Option<Window>,
    renderer: Option<Renderer>,
    timer: FrameTimer,
}

impl App {
    fn new() -> Self {
        Self {
            window: None,
            renderer: None,
            timer: FrameTimer::new(),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window = match Window::new(event_loop, WINDOW_WIDTH, WINDOW_HEIGHT, WINDOW_TITLE) {
            Ok(window) => window,
            Err(e) => {
                error!("window creation failed: {}", e);
                event_loop.exit();
                return;
            }
        };

        match Renderer::new(&window) {
            Ok(renderer) => {
                info!("setup complete, entering render loop");
                self.renderer = Some(renderer);
                self.window = Some(window);
            }
            Err(e) => {
                // Each setup stage owns a stable exit code; report it
                // directly rather than unwinding through the event loop.
                error!("{}", e);
                std::process::exit(e.exit_code());
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(ref mut window) = self.window {
                    window.resize(size.width, size.height);
                }
                if let Some(ref mut renderer) = self.renderer {
                    renderer.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                let delta = self.timer.tick();

                if let Some(ref mut renderer) = self.renderer {
                    if let Err(e) = renderer.render_frame() {
                        error!("frame failed: {:?}", e);
                    }
                }

                if self.timer.frame_count() % FRAME_LOG_INTERVAL == 0 {
                    debug!(
                        "frame {} ({:.2} ms)",
                        self.timer.frame_count(),
                        delta.as_secs_f64() * 1000.0
                    );
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    trigon_core::init_logging();
    info!("starting trigon");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new();
    event_loop.run_app(&mut app)?;

    Ok(())
}
