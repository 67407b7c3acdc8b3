use std::{
    f32::consts::{FRAC_PI_2, PI},
    str::FromStr,
};

use glam::Vec2;

use crate::{
    error::ConfigError,
    particle::{Particle, ParticleSet},
};

/// Angle of the bite taken out of each ball.
pub const NOTCH_SPAN: f32 = FRAC_PI_2;
/// Per-frame change of the green and blue channels.
pub const COLOR_STEP: u8 = 1;
const WEDGE_SEGMENTS: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const RED: Color = Color::rgb(255, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl FromStr for Color {
    type Err = ConfigError;

    /// Parses `#RRGGBB`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidColor(s.to_string());

        let hex = s.strip_prefix('#').ok_or_else(invalid)?;
        if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
        Ok(Color::rgb(channel(0)?, channel(2)?, channel(4)?))
    }
}

impl From<Color> for egui::Color32 {
    fn from(color: Color) -> Self {
        egui::Color32::from_rgb(color.r, color.g, color.b)
    }
}

impl From<Color> for wgpu::Color {
    fn from(color: Color) -> Self {
        let channel = |c: u8| c as f64 / 255.0;
        wgpu::Color {
            r: channel(color.r),
            g: channel(color.g),
            b: channel(color.b),
            a: 1.0,
        }
    }
}

/// Red stays put; green and blue each bounce between 0 and 255.
#[derive(Clone, Debug)]
pub struct ColorCycle {
    color: Color,
    green_rising: bool,
    blue_rising: bool,
}

impl Default for ColorCycle {
    fn default() -> Self {
        Self::new(Color::RED)
    }
}

impl ColorCycle {
    pub fn new(start: Color) -> Self {
        Self {
            color: start,
            green_rising: start.g < u8::MAX,
            blue_rising: start.b < u8::MAX,
        }
    }

    pub fn current(&self) -> Color {
        self.color
    }

    pub fn advance(&mut self) {
        (self.color.g, self.green_rising) = bounce(self.color.g, self.green_rising);
        (self.color.b, self.blue_rising) = bounce(self.color.b, self.blue_rising);
    }
}

fn bounce(value: u8, rising: bool) -> (u8, bool) {
    if rising {
        match value.checked_add(COLOR_STEP) {
            Some(next) if next < u8::MAX => (next, true),
            _ => (u8::MAX, false),
        }
    } else {
        match value.checked_sub(COLOR_STEP) {
            Some(next) if next > 0 => (next, false),
            _ => (0, true),
        }
    }
}

/// Heading of `velocity` in radians, in `(-π/2, 3π/2]`.
///
/// A zero x component is replaced by `f32::EPSILON` so the slope stays finite.
pub fn heading_angle(velocity: Vec2) -> f32 {
    let vx = if velocity.x == 0.0 {
        f32::EPSILON
    } else {
        velocity.x
    };

    let angle = (velocity.y / vx).atan();
    if velocity.x < 0.0 {
        angle + PI
    } else {
        angle
    }
}

/// The 2D drawing primitives the renderer needs.
pub trait DrawSurface {
    fn size(&self) -> Vec2;

    fn clear(&mut self, color: Color);

    fn fill_disc(&mut self, center: Vec2, radius: f32, color: Color);

    /// Fills the circular sector between `start` and `end` (radians, `end - start <= π`).
    fn fill_wedge(&mut self, center: Vec2, radius: f32, start: f32, end: f32, color: Color);
}

pub struct Renderer {
    background: Color,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new(Color::BLACK)
    }
}

impl Renderer {
    pub fn new(background: Color) -> Self {
        Self { background }
    }

    pub fn background(&self) -> Color {
        self.background
    }

    pub fn draw_frame(&self, surface: &mut impl DrawSurface, particles: &ParticleSet, color: Color) {
        surface.clear(self.background);
        for particle in particles.iter() {
            self.draw_particle(surface, particle, color);
        }
    }

    fn draw_particle(&self, surface: &mut impl DrawSurface, particle: &Particle, color: Color) {
        let heading = heading_angle(particle.velocity);

        surface.fill_disc(particle.position, particle.radius, color);
        surface.fill_wedge(
            particle.position,
            particle.radius,
            heading - NOTCH_SPAN * 0.5,
            heading + NOTCH_SPAN * 0.5,
            self.background,
        );
    }
}

/// Outline of a circular sector as a convex fan: the center followed by
/// `segments + 1` points along the arc.
pub fn wedge_points(center: Vec2, radius: f32, start: f32, end: f32, segments: usize) -> Vec<Vec2> {
    let segments = segments.max(1);
    let step = (end - start) / segments as f32;

    std::iter::once(center)
        .chain((0..=segments).map(|i| center + Vec2::from_angle(start + step * i as f32) * radius))
        .collect()
}

/// Draws onto an egui painter, in window pixels.
pub struct PainterSurface<'a> {
    painter: &'a egui::Painter,
}

impl<'a> PainterSurface<'a> {
    pub fn new(painter: &'a egui::Painter) -> Self {
        Self { painter }
    }
}

impl DrawSurface for PainterSurface<'_> {
    fn size(&self) -> Vec2 {
        let size = self.painter.clip_rect().size();
        Vec2::new(size.x, size.y)
    }

    fn clear(&mut self, color: Color) {
        self.painter
            .rect_filled(self.painter.clip_rect(), 0.0, color);
    }

    fn fill_disc(&mut self, center: Vec2, radius: f32, color: Color) {
        self.painter
            .circle_filled(egui::pos2(center.x, center.y), radius, color);
    }

    fn fill_wedge(&mut self, center: Vec2, radius: f32, start: f32, end: f32, color: Color) {
        let points = wedge_points(center, radius, start, end, WEDGE_SEGMENTS)
            .into_iter()
            .map(|p| egui::pos2(p.x, p.y))
            .collect();

        self.painter.add(egui::Shape::convex_polygon(
            points,
            color,
            egui::Stroke::NONE,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Op {
        Clear(Color),
        Disc(Vec2, f32, Color),
        Wedge(Vec2, f32, f32, f32, Color),
    }

    #[derive(Default)]
    struct Recording {
        ops: Vec<Op>,
    }

    impl DrawSurface for Recording {
        fn size(&self) -> Vec2 {
            Vec2::new(100.0, 100.0)
        }

        fn clear(&mut self, color: Color) {
            self.ops.push(Op::Clear(color));
        }

        fn fill_disc(&mut self, center: Vec2, radius: f32, color: Color) {
            self.ops.push(Op::Disc(center, radius, color));
        }

        fn fill_wedge(&mut self, center: Vec2, radius: f32, start: f32, end: f32, color: Color) {
            self.ops.push(Op::Wedge(center, radius, start, end, color));
        }
    }

    #[test]
    fn vertical_velocity_points_up() {
        let angle = heading_angle(Vec2::new(0.0, 5.0));
        assert!(angle.is_finite());
        assert!((angle - FRAC_PI_2).abs() < 1e-6);

        let angle = heading_angle(Vec2::new(0.0, -5.0));
        assert!((angle + FRAC_PI_2).abs() < 1e-6);
    }

    #[test]
    fn leftward_velocity_adds_pi() {
        assert!((heading_angle(Vec2::new(-5.0, 0.0)) - PI).abs() < 1e-6);
        assert_eq!(heading_angle(Vec2::new(5.0, 0.0)), 0.0);
        assert!((heading_angle(Vec2::new(-1.0, -1.0)) - 1.25 * PI).abs() < 1e-6);
    }

    #[test]
    fn frame_clears_then_draws_each_particle() {
        let particles = ParticleSet::from_vec(vec![
            Particle::new(4.0, Vec2::new(10.0, 20.0), Vec2::new(3.0, 0.0)),
            Particle::new(6.0, Vec2::new(50.0, 60.0), Vec2::new(-3.0, 0.0)),
        ]);
        let color = Color::rgb(255, 10, 20);
        let mut surface = Recording::default();

        Renderer::default().draw_frame(&mut surface, &particles, color);

        assert_eq!(surface.ops.len(), 5);
        assert_eq!(surface.ops[0], Op::Clear(Color::BLACK));
        assert_eq!(surface.ops[1], Op::Disc(Vec2::new(10.0, 20.0), 4.0, color));
        assert_eq!(
            surface.ops[2],
            Op::Wedge(Vec2::new(10.0, 20.0), 4.0, -NOTCH_SPAN / 2.0, NOTCH_SPAN / 2.0, Color::BLACK)
        );
        match surface.ops[4] {
            Op::Wedge(center, radius, start, end, fill) => {
                assert_eq!((center, radius, fill), (Vec2::new(50.0, 60.0), 6.0, Color::BLACK));
                assert!(((start + end) / 2.0 - PI).abs() < 1e-6);
                assert!((end - start - NOTCH_SPAN).abs() < 1e-6);
            }
            ref other => panic!("expected a wedge, got {other:?}"),
        }
    }

    #[test]
    fn wedge_fan_spans_the_arc() {
        let points = wedge_points(Vec2::new(1.0, 1.0), 2.0, 0.0, FRAC_PI_2, 4);

        assert_eq!(points.len(), 6);
        assert_eq!(points[0], Vec2::new(1.0, 1.0));
        assert!(points[1].abs_diff_eq(Vec2::new(3.0, 1.0), 1e-5));
        assert!(points[5].abs_diff_eq(Vec2::new(1.0, 3.0), 1e-5));
        for p in &points[1..] {
            assert!(((*p - Vec2::ONE).length() - 2.0).abs() < 1e-5);
        }
    }

    #[test]
    fn color_bounces_between_bounds() {
        let mut cycle = ColorCycle::new(Color::rgb(200, 253, 2));

        cycle.advance();
        assert_eq!(cycle.current(), Color::rgb(200, 254, 3));
        cycle.advance();
        assert_eq!(cycle.current(), Color::rgb(200, 255, 4));
        cycle.advance();
        assert_eq!(cycle.current(), Color::rgb(200, 254, 5));
    }

    #[test]
    fn color_turns_at_zero() {
        let mut cycle = ColorCycle::new(Color::rgb(0, 255, 255));

        cycle.advance();
        assert_eq!(cycle.current(), Color::rgb(0, 254, 254));
        for _ in 0..254 {
            cycle.advance();
        }
        assert_eq!(cycle.current(), Color::rgb(0, 0, 0));
        cycle.advance();
        assert_eq!(cycle.current(), Color::rgb(0, 1, 1));
    }

    #[test]
    fn red_is_held() {
        let mut cycle = ColorCycle::new(Color::rgb(17, 0, 0));
        for _ in 0..1000 {
            cycle.advance();
            assert_eq!(cycle.current().r, 17);
        }
    }

    #[test]
    fn parses_hex_colors() {
        assert_eq!("#ff8000".parse(), Ok(Color::rgb(255, 128, 0)));
        assert_eq!("#00FF7f".parse(), Ok(Color::rgb(0, 255, 127)));
    }

    #[test]
    fn rejects_malformed_colors_by_name() {
        for bad in ["ff8000", "#ff80", "#ff80000", "#gg0000", "", "#ff 000"] {
            assert_eq!(
                bad.parse::<Color>(),
                Err(ConfigError::InvalidColor(bad.to_string()))
            );
        }

        let message = "#12345z".parse::<Color>().unwrap_err().to_string();
        assert!(message.contains("#12345z"));
    }
}
