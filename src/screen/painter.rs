//! Frame compositing hooks.
//!
//! Painters draw under or over the visible page's content, ordered by
//! z within their place. The fader is a built-in foreground painter the
//! screen uses for blocking fade-to-blank effects.

use crate::types::{self, Canvas, Rect, Rgb};

// =============================================================================
// PAINTER
// =============================================================================

/// Whether a painter runs under or over the page content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PainterPlace {
    Background,
    Foreground,
}

/// A hook into frame composition. Painters of the same place run in
/// ascending z order.
pub trait Painter: Send {
    fn place(&self) -> PainterPlace;

    fn z_order(&self) -> i32 {
        0
    }

    fn paint(&mut self, canvas: &mut Canvas);
}

// =============================================================================
// FADER
// =============================================================================

/// Built-in painter that dims the whole frame toward blank.
///
/// Monochrome displays fade to white (their blank state); everything else
/// fades to black.
pub struct Fader {
    color: Rgb,
    opacity: f32,
}

impl Fader {
    pub fn new(bpp: u32) -> Self {
        Self {
            color: if bpp == 1 { Rgb::WHITE } else { Rgb::BLACK },
            opacity: 0.0,
        }
    }

    /// Current opacity in `0.0..=1.0`.
    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = opacity.clamp(0.0, 1.0);
    }

    /// Whether the fader currently changes the frame at all.
    pub fn is_active(&self) -> bool {
        self.opacity > 0.0
    }
}

impl Painter for Fader {
    fn place(&self) -> PainterPlace {
        PainterPlace::Foreground
    }

    // Above every other foreground painter.
    fn z_order(&self) -> i32 {
        9999
    }

    fn paint(&mut self, canvas: &mut Canvas) {
        if !self.is_active() {
            return;
        }
        let alpha = (self.opacity * 255.0).round() as u8;
        let rect = Rect::new(0.0, 0.0, canvas.width() as f32, canvas.height() as f32);
        types::fill_rect(canvas, rect, self.color, alpha);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fader_blank_color_tracks_depth() {
        assert_eq!(Fader::new(1).color, Rgb::WHITE);
        assert_eq!(Fader::new(16).color, Rgb::BLACK);
    }

    #[test]
    fn test_fader_opacity_clamped() {
        let mut fader = Fader::new(16);
        assert!(!fader.is_active());
        fader.set_opacity(1.5);
        assert_eq!(fader.opacity(), 1.0);
        fader.set_opacity(-0.5);
        assert_eq!(fader.opacity(), 0.0);
    }

    #[test]
    fn test_fader_darkens_frame() {
        let mut canvas = Canvas::new(4, 4).unwrap();
        types::clear(&mut canvas, Rgb::WHITE);
        let mut fader = Fader::new(16);
        fader.set_opacity(1.0);
        fader.paint(&mut canvas);
        let px = canvas.pixel(0, 0).unwrap();
        assert_eq!((px.red(), px.green(), px.blue()), (0, 0, 0));
    }

    #[test]
    fn test_inactive_fader_leaves_frame_alone() {
        let mut canvas = Canvas::new(4, 4).unwrap();
        types::clear(&mut canvas, Rgb::WHITE);
        Fader::new(16).paint(&mut canvas);
        let px = canvas.pixel(0, 0).unwrap();
        assert_eq!((px.red(), px.green(), px.blue()), (255, 255, 255));
    }
}
