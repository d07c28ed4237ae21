/// Geometry shared by every backend's smoke-test triangle

use glam::{Vec2, Vec4};

/// Clip-space positions of the test triangle
pub const TEST_TRIANGLE_VERTICES: [Vec2; 3] = [
    Vec2::new(0.0, 0.5),
    Vec2::new(0.5, -0.5),
    Vec2::new(-0.5, -0.5),
];

/// 16-bit indices of the test triangle
pub const TEST_TRIANGLE_INDICES: [u16; 3] = [0, 1, 2];

/// Color the test triangle is shaded with
pub const TEST_TRIANGLE_COLOR: Vec4 = Vec4::new(1.0, 0.0, 0.0, 1.0);
