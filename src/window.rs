// Window collaborator
//
// The renderer only needs raw handles for surface creation, the framebuffer
// size, an event pump and an edge-triggered resize flag. `WinitWindow`
// adapts a winit 0.30 window; with winit the event loop owns the pump, so
// the pump methods only yield.

use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::cell::Cell;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{RenderError, Result};

pub trait Window {
    fn raw_handles(&self) -> Result<(RawDisplayHandle, RawWindowHandle)>;
    /// Drawable size in pixels; zero in either dimension while minimized.
    fn framebuffer_size(&self) -> (u32, u32);
    fn poll_events(&self);
    /// Block until something happens to the window.
    fn wait_events(&self);
    fn should_close(&self) -> bool;
    /// True once per resize notification.
    fn take_resized(&self) -> bool;
}

pub struct WinitWindow {
    window: Arc<winit::window::Window>,
    resized: Cell<bool>,
    close_requested: Cell<bool>,
}

impl WinitWindow {
    pub fn new(window: Arc<winit::window::Window>) -> Self {
        Self {
            window,
            resized: Cell::new(false),
            close_requested: Cell::new(false),
        }
    }

    pub fn inner(&self) -> &winit::window::Window {
        &self.window
    }

    /// Called from the `Resized` window event.
    pub fn mark_resized(&self) {
        self.resized.set(true);
    }

    /// Called from the `CloseRequested` window event.
    pub fn request_close(&self) {
        self.close_requested.set(true);
    }

    pub fn is_minimized(&self) -> bool {
        let (width, height) = self.framebuffer_size();
        width == 0 || height == 0
    }
}

impl Window for WinitWindow {
    fn raw_handles(&self) -> Result<(RawDisplayHandle, RawWindowHandle)> {
        let display = self
            .window
            .display_handle()
            .map_err(|e| RenderError::Window(format!("no display handle: {}", e)))?
            .as_raw();
        let window = self
            .window
            .window_handle()
            .map_err(|e| RenderError::Window(format!("no window handle: {}", e)))?
            .as_raw();
        Ok((display, window))
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    fn poll_events(&self) {}

    fn wait_events(&self) {
        std::thread::sleep(Duration::from_millis(16));
    }

    fn should_close(&self) -> bool {
        self.close_requested.get()
    }

    fn take_resized(&self) -> bool {
        self.resized.replace(false)
    }
}
