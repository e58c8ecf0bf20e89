//! Window management using winit.
//!
//! The engine never creates the native window itself; this wrapper owns it and
//! exposes the three things the orchestrator needs: a framebuffer-size query,
//! a resize flag polled once per loop iteration, and a close flag.

use std::sync::Arc;
use winit::{
    dpi::PhysicalSize,
    event::{Event, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
    window::{Window as WinitWindow, WindowBuilder},
};

/// Wrapper around a winit window with resize/close bookkeeping.
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
    resized: bool,
    close_requested: bool,
}

impl Window {
    pub fn new(event_loop: &EventLoop<()>, title: &str, width: u32, height: u32) -> Self {
        let window = Arc::new(
            WindowBuilder::new()
                .with_title(title)
                .with_inner_size(PhysicalSize::new(width, height))
                .build(event_loop)
                .expect("Failed to create window"),
        );

        Self {
            window,
            width,
            height,
            resized: false,
            close_requested: false,
        }
    }

    pub fn window(&self) -> &WinitWindow {
        &self.window
    }

    /// Current framebuffer size as last reported by the windowing system.
    pub fn framebuffer_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// True while either dimension is zero (minimized); rendering must pause.
    pub fn is_zero_sized(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Check if the window was resized since the flag was last cleared.
    pub fn was_resized(&self) -> bool {
        self.resized
    }

    pub fn clear_resize_flag(&mut self) {
        self.resized = false;
    }

    pub fn should_close(&self) -> bool {
        self.close_requested
    }

    pub fn handle_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::Resized(size) => {
                self.width = size.width;
                self.height = size.height;
                self.resized = true;
            }
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            _ => {}
        }
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

/// Run the event loop, invoking `callback` once per iteration.
///
/// The window-event callback fires first so overlay input handling can observe
/// events before the per-frame callback runs.
pub fn run<F, E>(title: &str, width: u32, height: u32, mut on_event: E, mut callback: F)
where
    F: FnMut(&mut Window) + 'static,
    E: FnMut(&WinitWindow, &WindowEvent) + 'static,
{
    let event_loop = EventLoop::new().expect("Failed to create event loop");
    let mut window = Window::new(&event_loop, title, width, height);

    event_loop
        .run(move |event, elwt: &EventLoopWindowTarget<()>| {
            elwt.set_control_flow(ControlFlow::Poll);

            match event {
                Event::WindowEvent { event, .. } => {
                    on_event(window.window(), &event);
                    window.handle_event(&event);

                    if let WindowEvent::CloseRequested = event {
                        elwt.exit();
                    }
                }
                Event::AboutToWait => {
                    callback(&mut window);
                    window.request_redraw();
                }
                _ => {}
            }
        })
        .expect("Event loop failed");
}
