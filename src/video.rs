//! Palette-indexed screen to RGBA8888 conversion.
//!
//! The engine hands over its indexed screen once per displayed tic. The
//! bridge converts it through the palette active at that moment into a
//! staging frame; the lifecycle commits the staging frame only when the
//! whole step succeeded, so a faulting step never tears the published frame.

use std::fmt;

use crate::engine::{VideoDriver, PALETTE_BYTES, SCREEN_HEIGHT, SCREEN_PIXELS, SCREEN_WIDTH};

pub const BYTES_PER_PIXEL: usize = 4;
pub const FRAME_BYTES: usize = SCREEN_PIXELS * BYTES_PER_PIXEL;

/// A full screen in R, G, B, A byte order. Alpha is always 255.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    pixels: Box<[u8]>,
}

impl Frame {
    pub const WIDTH: usize = SCREEN_WIDTH;
    pub const HEIGHT: usize = SCREEN_HEIGHT;

    /// Opaque black.
    pub fn blank() -> Self {
        let mut pixels = vec![0u8; FRAME_BYTES].into_boxed_slice();
        for px in pixels.chunks_exact_mut(BYTES_PER_PIXEL) {
            px[3] = 0xff;
        }
        Self { pixels }
    }

    pub fn width(&self) -> usize {
        Self::WIDTH
    }

    pub fn height(&self) -> usize {
        Self::HEIGHT
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pitch(&self) -> usize {
        Self::WIDTH * BYTES_PER_PIXEL
    }

    pub fn pixel(&self, x: usize, y: usize) -> [u8; 4] {
        let i = (y * Self::WIDTH + x) * BYTES_PER_PIXEL;
        [
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ]
    }

    pub fn copy_from(&mut self, other: &Frame) {
        self.pixels.copy_from_slice(&other.pixels);
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({}x{} rgba)", Self::WIDTH, Self::HEIGHT)
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::blank()
    }
}

pub struct FrameBridge {
    palette: [[u8; 4]; 256],
    staging: Frame,
    staged: bool,
    front: Option<Frame>,
}

impl FrameBridge {
    pub fn new() -> Self {
        Self {
            palette: [[0, 0, 0, 0xff]; 256],
            staging: Frame::blank(),
            staged: false,
            front: None,
        }
    }

    /// Publishes the frame converted during this step, if any.
    pub fn commit(&mut self) -> bool {
        if !self.staged {
            return false;
        }
        self.staged = false;
        match &mut self.front {
            Some(front) => std::mem::swap(front, &mut self.staging),
            None => self.front = Some(self.staging.clone()),
        }
        true
    }

    /// Drops a half-built step's output.
    pub fn discard(&mut self) {
        self.staged = false;
    }

    /// The last committed frame; `None` until a step has displayed one.
    pub fn frame(&self) -> Option<&Frame> {
        self.front.as_ref()
    }

    pub fn palette_entry(&self, index: u8) -> [u8; 4] {
        self.palette[index as usize]
    }
}

impl Default for FrameBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoDriver for FrameBridge {
    fn set_palette(&mut self, palette: &[u8; PALETTE_BYTES]) {
        for (entry, rgb) in self.palette.iter_mut().zip(palette.chunks_exact(3)) {
            *entry = [rgb[0], rgb[1], rgb[2], 0xff];
        }
    }

    fn finish_update(&mut self, screen: &[u8; SCREEN_PIXELS]) {
        for (out, &index) in self
            .staging
            .pixels
            .chunks_exact_mut(BYTES_PER_PIXEL)
            .zip(screen.iter())
        {
            out.copy_from_slice(&self.palette[index as usize]);
        }
        self.staged = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_palette() -> [u8; PALETTE_BYTES] {
        let mut p = [0u8; PALETTE_BYTES];
        for (i, rgb) in p.chunks_exact_mut(3).enumerate() {
            rgb[0] = i as u8;
            rgb[1] = 255 - i as u8;
            rgb[2] = (i as u8).wrapping_mul(3);
        }
        p
    }

    #[test]
    fn nothing_published_before_a_commit() {
        let mut bridge = FrameBridge::new();
        assert!(bridge.frame().is_none());
        assert!(!bridge.commit());
        bridge.finish_update(&[0u8; SCREEN_PIXELS]);
        assert!(bridge.frame().is_none());
        assert!(bridge.commit());
        assert!(bridge.frame().is_some());
    }

    #[test]
    fn converts_through_active_palette_with_full_alpha() {
        let mut bridge = FrameBridge::new();
        bridge.set_palette(&ramp_palette());
        let mut screen = [0u8; SCREEN_PIXELS];
        screen[0] = 10;
        screen[SCREEN_PIXELS - 1] = 200;
        bridge.finish_update(&screen);
        bridge.commit();

        let frame = bridge.frame().unwrap();
        assert_eq!(frame.as_bytes().len(), 320 * 200 * 4);
        assert_eq!(frame.pixel(0, 0), [10, 245, 30, 255]);
        assert_eq!(frame.pixel(319, 199), [200, 55, 200u8.wrapping_mul(3), 255]);
        assert!(frame.as_bytes().chunks_exact(4).all(|px| px[3] == 255));
    }

    #[test]
    fn palette_change_applies_to_the_same_step() {
        let mut bridge = FrameBridge::new();
        bridge.set_palette(&ramp_palette());
        let mut red = [0u8; PALETTE_BYTES];
        red[3 * 4] = 0xff;
        bridge.set_palette(&red);
        bridge.finish_update(&[4u8; SCREEN_PIXELS]);
        bridge.commit();
        assert_eq!(bridge.frame().unwrap().pixel(5, 5), [0xff, 0, 0, 0xff]);
    }

    #[test]
    fn discarded_step_keeps_previous_frame() {
        let mut bridge = FrameBridge::new();
        bridge.set_palette(&ramp_palette());
        bridge.finish_update(&[1u8; SCREEN_PIXELS]);
        bridge.commit();
        let before = bridge.frame().unwrap().clone();

        bridge.finish_update(&[99u8; SCREEN_PIXELS]);
        bridge.discard();
        assert!(!bridge.commit());
        assert_eq!(bridge.frame().unwrap(), &before);
    }

    #[test]
    fn blank_frame_is_opaque_black() {
        let frame = Frame::blank();
        assert_eq!(frame.pixel(100, 100), [0, 0, 0, 255]);
        assert_eq!(frame.pitch(), 1280);
    }
}
