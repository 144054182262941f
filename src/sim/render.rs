// Palette-indexed drawing for the reference engine. Everything lands in the
// 320x200 screen buffer; colours are palette indices.

use crate::engine::{SCREEN_HEIGHT, SCREEN_PIXELS, SCREEN_WIDTH};

pub type Screen = [u8; SCREEN_PIXELS];

pub const STATUS_BAR_HEIGHT: usize = 32;
const VIEW_HEIGHT: usize = SCREEN_HEIGHT - STATUS_BAR_HEIGHT;

const SKY: u8 = 96;
const FLOOR: u8 = 112;
const WALL_BASE: u8 = 64;
const BAR: u8 = 104;
const TEXT: u8 = 176;
const HIGHLIGHT: u8 = 231;
const MENU_BACK: u8 = 0;

pub fn fill_rect(screen: &mut Screen, x: usize, y: usize, w: usize, h: usize, color: u8) {
    let x1 = (x + w).min(SCREEN_WIDTH);
    let y1 = (y + h).min(SCREEN_HEIGHT);
    for row in y.min(y1)..y1 {
        let start = row * SCREEN_WIDTH;
        screen[start + x.min(x1)..start + x1].fill(color);
    }
}

pub fn title(screen: &mut Screen, tic: u64) {
    let shift = (tic / 2) as usize;
    for y in 0..SCREEN_HEIGHT {
        for x in 0..SCREEN_WIDTH {
            let band = ((x + y + shift) / 16) % 8;
            screen[y * SCREEN_WIDTH + x] = 32 + band as u8 * 4;
        }
    }
    fill_rect(screen, 80, 70, 160, 40, MENU_BACK);
    fill_rect(screen, 84, 74, 152, 32, TEXT);
}

/// First-person view: sky, floor and a band of wall columns that slide with
/// the view angle.
pub fn level(screen: &mut Screen, angle: u32, distance: i64, map: u32, health: i32) {
    let horizon = VIEW_HEIGHT / 2;
    fill_rect(screen, 0, 0, SCREEN_WIDTH, horizon, SKY);
    fill_rect(screen, 0, horizon, SCREEN_WIDTH, VIEW_HEIGHT - horizon, FLOOR);

    let pan = (angle >> 23) as usize;
    let depth = (distance.rem_euclid(256) / 32) as usize;
    for x in 0..SCREEN_WIDTH {
        let column = pan + x;
        let height = 24 + ((column / 20 * 7 + map as usize * 13 + depth) % 48);
        let shade = WALL_BASE + ((column / 20) % 16) as u8;
        let top = horizon.saturating_sub(height / 2);
        for y in top..(top + height).min(VIEW_HEIGHT) {
            screen[y * SCREEN_WIDTH + x] = shade;
        }
    }
    status_bar(screen, health, map);
}

fn status_bar(screen: &mut Screen, health: i32, map: u32) {
    fill_rect(screen, 0, VIEW_HEIGHT, SCREEN_WIDTH, STATUS_BAR_HEIGHT, BAR);
    let filled = health.clamp(0, 100) as usize;
    fill_rect(screen, 10, VIEW_HEIGHT + 10, 100, 12, MENU_BACK);
    fill_rect(screen, 10, VIEW_HEIGHT + 10, filled, 12, HIGHLIGHT);
    for m in 0..map as usize {
        fill_rect(screen, 280 + m * 10, VIEW_HEIGHT + 12, 6, 8, TEXT);
    }
}

/// Menu overlay drawn on top of whatever is already on screen.
pub fn menu(screen: &mut Screen, items: usize, cursor: usize) {
    let h = 16 + items * 14;
    let y0 = (SCREEN_HEIGHT - h) / 2;
    fill_rect(screen, 90, y0, 140, h, MENU_BACK);
    for i in 0..items {
        let color = if i == cursor { HIGHLIGHT } else { TEXT };
        fill_rect(screen, 110, y0 + 8 + i * 14, 100, 10, color);
    }
}

pub fn intermission(screen: &mut Screen, map: u32, tics: u32) {
    fill_rect(screen, 0, 0, SCREEN_WIDTH, SCREEN_HEIGHT, 8);
    let shown = (tics as usize).min(100);
    fill_rect(screen, 60, 80, shown * 2, 10, TEXT);
    fill_rect(screen, 60, 100, map as usize * 20, 10, HIGHLIGHT);
}

pub fn finale(screen: &mut Screen, tics: u32) {
    let rows = (tics as usize / 2).min(SCREEN_HEIGHT);
    fill_rect(screen, 0, 0, SCREEN_WIDTH, SCREEN_HEIGHT, 0);
    fill_rect(screen, 0, SCREEN_HEIGHT - rows, SCREEN_WIDTH, rows, 160);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_rect_clips_to_screen() {
        let mut s = [0u8; SCREEN_PIXELS];
        fill_rect(&mut s, 310, 195, 50, 50, 7);
        assert_eq!(s[199 * SCREEN_WIDTH + 319], 7);
        assert_eq!(s[195 * SCREEN_WIDTH + 309], 0);
        assert_eq!(s.iter().filter(|&&p| p == 7).count(), 10 * 5);
    }

    #[test]
    fn menu_highlights_cursor_row() {
        let mut s = [1u8; SCREEN_PIXELS];
        menu(&mut s, 3, 1);
        let h = 16 + 3 * 14;
        let y0 = (SCREEN_HEIGHT - h) / 2;
        assert_eq!(s[(y0 + 8) * SCREEN_WIDTH + 150], TEXT);
        assert_eq!(s[(y0 + 8 + 14) * SCREEN_WIDTH + 150], HIGHLIGHT);
    }

    #[test]
    fn turning_changes_the_view() {
        let mut a = [0u8; SCREEN_PIXELS];
        let mut b = [0u8; SCREEN_PIXELS];
        level(&mut a, 0, 0, 1, 100);
        level(&mut b, 1 << 29, 0, 1, 100);
        assert_ne!(a[..], b[..]);
    }
}
