//! COCO-17 skeleton topology and colours.
//!
//! Keypoint order: nose, left/right eye, left/right ear, left/right shoulder,
//! left/right elbow, left/right wrist, left/right hip, left/right knee,
//! left/right ankle.

use image::Rgba;

pub const CYAN: Rgba<u8> = rgb(0x00, 0xff, 0xff);
pub const YELLOW: Rgba<u8> = rgb(0xff, 0xff, 0x00);
pub const MAGENTA: Rgba<u8> = rgb(0xff, 0x00, 0xff);
pub const ORANGE: Rgba<u8> = rgb(0xff, 0x88, 0x00);
pub const GREEN: Rgba<u8> = rgb(0x00, 0xff, 0x00);
pub const LIME: Rgba<u8> = rgb(0x88, 0xff, 0x00);
pub const WHITE: Rgba<u8> = rgb(0xff, 0xff, 0xff);
pub const BLACK: Rgba<u8> = rgb(0x00, 0x00, 0x00);

/// Anatomical keypoint pairs joined by a limb segment.
pub const CONNECTIONS: [Connection; 16] = [
    // head
    Connection::new(0, 1, CYAN),
    Connection::new(0, 2, CYAN),
    Connection::new(1, 3, CYAN),
    Connection::new(2, 4, CYAN),
    // torso
    Connection::new(5, 6, YELLOW),
    Connection::new(5, 11, YELLOW),
    Connection::new(6, 12, YELLOW),
    Connection::new(11, 12, YELLOW),
    // arms
    Connection::new(5, 7, MAGENTA),
    Connection::new(7, 9, MAGENTA),
    Connection::new(6, 8, ORANGE),
    Connection::new(8, 10, ORANGE),
    // legs
    Connection::new(11, 13, GREEN),
    Connection::new(13, 15, GREEN),
    Connection::new(12, 14, LIME),
    Connection::new(14, 16, LIME),
];

const KEYPOINT_COLORS: [Rgba<u8>; 17] = [
    CYAN, CYAN, CYAN, CYAN, CYAN, // head
    MAGENTA, ORANGE, // shoulders
    MAGENTA, ORANGE, // elbows
    MAGENTA, ORANGE, // wrists
    GREEN, LIME, // hips
    GREEN, LIME, // knees
    GREEN, LIME, // ankles
];

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Connection {
    pub from: usize,
    pub to: usize,
    pub color: Rgba<u8>,
}

impl Connection {
    const fn new(from: usize, to: usize, color: Rgba<u8>) -> Self {
        Self { from, to, color }
    }
}

/// Marker colour for a keypoint index; white past the COCO range.
pub fn keypoint_color(index: usize) -> Rgba<u8> {
    KEYPOINT_COLORS.get(index).copied().unwrap_or(WHITE)
}

pub const fn rgb(r: u8, g: u8, b: u8) -> Rgba<u8> {
    Rgba([r, g, b, 0xff])
}
