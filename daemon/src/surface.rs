//! Native surfaces that zone video is rendered into
//!
//! The windowing shell that owns the application window is outside this
//! crate. It is represented by a [`SurfaceProvider`], constructed once at
//! startup and shared by every zone.

use thiserror::Error;

/// Opaque platform window handle (X11 window id, etc.)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub u64);

/// Screen rectangle in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("no parent window available")]
    NoParent,
}

/// A child surface positioned inside the application window
pub trait ChildSurface: Send {
    fn handle(&self) -> WindowHandle;

    /// Window this surface was created under
    fn parent(&self) -> WindowHandle;

    fn set_geometry(&mut self, rect: Rect);

    fn show(&mut self);

    fn hide(&mut self);

    fn raise(&mut self);

    fn lower(&mut self);
}

/// Process-wide access to the windowing shell
pub trait SurfaceProvider: Send + Sync {
    /// Handle of the application window, if one exists
    fn parent_window(&self) -> Option<WindowHandle>;

    fn create_child(
        &self,
        parent: WindowHandle,
        rect: Rect,
    ) -> Result<Box<dyn ChildSurface>, SurfaceError>;
}

/// Provider used when no windowing shell is attached.
///
/// There is no application window, so zones never get an embedded surface
/// and the media backend shows video in its own output window.
#[derive(Debug, Default)]
pub struct HeadlessSurfaceProvider;

impl SurfaceProvider for HeadlessSurfaceProvider {
    fn parent_window(&self) -> Option<WindowHandle> {
        None
    }

    fn create_child(
        &self,
        _parent: WindowHandle,
        _rect: Rect,
    ) -> Result<Box<dyn ChildSurface>, SurfaceError> {
        Err(SurfaceError::NoParent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_validity() {
        assert!(
            Rect {
                x: 0,
                y: 0,
                width: 10,
                height: 10
            }
            .is_valid()
        );
        assert!(!Rect::default().is_valid());
    }

    #[test]
    fn test_headless_provider_has_no_parent() {
        let provider = HeadlessSurfaceProvider;
        assert!(provider.parent_window().is_none());
        assert!(matches!(
            provider.create_child(WindowHandle(1), Rect::default()),
            Err(SurfaceError::NoParent)
        ));
    }
}
