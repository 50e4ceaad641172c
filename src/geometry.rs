//! Shape boundaries as line / quadratic / cubic segments, with exact ray
//! intersection, arc-length queries and SVG path conversion.

use crate::error::GeometryError;
use crate::ir::NodeShape;
use std::f64::consts::PI;
use std::fmt::Write as _;

pub type Point = (f32, f32);

const ROOT_EPS: f64 = 1e-9;
const PARAM_EPS: f64 = 1e-6;
const CENTROID_SAMPLES: usize = 8;
/// Control-point distance for a quarter ellipse drawn as one cubic.
const KAPPA: f32 = 0.552_284_8;

// 5-point Gauss-Legendre on [-1, 1].
const GAUSS_NODES: [f64; 5] = [
    0.0,
    -0.538_469_310_105_683_1,
    0.538_469_310_105_683_1,
    -0.906_179_845_938_664,
    0.906_179_845_938_664,
];
const GAUSS_WEIGHTS: [f64; 5] = [
    0.568_888_888_888_888_9,
    0.478_628_670_499_366_5,
    0.478_628_670_499_366_5,
    0.236_926_885_056_189_1,
    0.236_926_885_056_189_1,
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathSegment {
    Line(Point, Point),
    Quad(Point, Point, Point),
    Cubic(Point, Point, Point, Point),
}

impl PathSegment {
    pub fn start(&self) -> Point {
        match *self {
            PathSegment::Line(p0, _) | PathSegment::Quad(p0, _, _) | PathSegment::Cubic(p0, _, _, _) => p0,
        }
    }

    pub fn end(&self) -> Point {
        match *self {
            PathSegment::Line(_, p1) => p1,
            PathSegment::Quad(_, _, p2) => p2,
            PathSegment::Cubic(_, _, _, p3) => p3,
        }
    }

    fn control_points(&self) -> Vec<Point> {
        match *self {
            PathSegment::Line(p0, p1) => vec![p0, p1],
            PathSegment::Quad(p0, p1, p2) => vec![p0, p1, p2],
            PathSegment::Cubic(p0, p1, p2, p3) => vec![p0, p1, p2, p3],
        }
    }

    pub fn point_at(&self, t: f32) -> Point {
        let t = t as f64;
        let mt = 1.0 - t;
        let pts = self.control_points();
        let weights: Vec<f64> = match pts.len() {
            2 => vec![mt, t],
            3 => vec![mt * mt, 2.0 * mt * t, t * t],
            _ => vec![mt * mt * mt, 3.0 * mt * mt * t, 3.0 * mt * t * t, t * t * t],
        };
        let mut x = 0.0f64;
        let mut y = 0.0f64;
        for (p, w) in pts.iter().zip(weights) {
            x += p.0 as f64 * w;
            y += p.1 as f64 * w;
        }
        (x as f32, y as f32)
    }

    fn derivative_at(&self, t: f64) -> (f64, f64) {
        let mt = 1.0 - t;
        let d = |a: Point, b: Point| ((b.0 - a.0) as f64, (b.1 - a.1) as f64);
        match *self {
            PathSegment::Line(p0, p1) => d(p0, p1),
            PathSegment::Quad(p0, p1, p2) => {
                let a = d(p0, p1);
                let b = d(p1, p2);
                (2.0 * (mt * a.0 + t * b.0), 2.0 * (mt * a.1 + t * b.1))
            }
            PathSegment::Cubic(p0, p1, p2, p3) => {
                let a = d(p0, p1);
                let b = d(p1, p2);
                let c = d(p2, p3);
                (
                    3.0 * (mt * mt * a.0 + 2.0 * mt * t * b.0 + t * t * c.0),
                    3.0 * (mt * mt * a.1 + 2.0 * mt * t * b.1 + t * t * c.1),
                )
            }
        }
    }

    /// Arc length over `[0, t]` by Gauss-Legendre quadrature.
    pub fn length_to(&self, t: f32) -> f32 {
        if let PathSegment::Line(p0, p1) = *self {
            return distance(p0, p1) * t;
        }
        let t = t as f64;
        let half = t / 2.0;
        let mut sum = 0.0;
        for (x, w) in GAUSS_NODES.iter().zip(GAUSS_WEIGHTS.iter()) {
            let (dx, dy) = self.derivative_at(half * (x + 1.0));
            sum += w * (dx * dx + dy * dy).sqrt();
        }
        (half * sum) as f32
    }

    pub fn length(&self) -> f32 {
        self.length_to(1.0)
    }

    pub fn map_points(&self, f: impl Fn(Point) -> Point) -> PathSegment {
        match *self {
            PathSegment::Line(p0, p1) => PathSegment::Line(f(p0), f(p1)),
            PathSegment::Quad(p0, p1, p2) => PathSegment::Quad(f(p0), f(p1), f(p2)),
            PathSegment::Cubic(p0, p1, p2, p3) => PathSegment::Cubic(f(p0), f(p1), f(p2), f(p3)),
        }
    }

    /// Curve parameters where the segment crosses the infinite line through
    /// `origin` along `dir`.
    fn line_crossings(&self, origin: Point, dir: (f64, f64)) -> Vec<f64> {
        // Signed distance of each control point from the ray line; the curve
        // crosses where the Bernstein combination of these is zero.
        let g: Vec<f64> = self
            .control_points()
            .iter()
            .map(|p| cross(dir, ((p.0 - origin.0) as f64, (p.1 - origin.1) as f64)))
            .collect();
        match g.len() {
            2 => {
                let denom = g[0] - g[1];
                if denom.abs() < ROOT_EPS {
                    Vec::new()
                } else {
                    vec![g[0] / denom]
                }
            }
            3 => solve_quadratic(g[0] - 2.0 * g[1] + g[2], 2.0 * (g[1] - g[0]), g[0]),
            _ => solve_cubic(
                -g[0] + 3.0 * g[1] - 3.0 * g[2] + g[3],
                3.0 * g[0] - 6.0 * g[1] + 3.0 * g[2],
                3.0 * (g[1] - g[0]),
                g[0],
            ),
        }
    }
}

fn cross(a: (f64, f64), b: (f64, f64)) -> f64 {
    a.0 * b.1 - a.1 * b.0
}

pub fn distance(a: Point, b: Point) -> f32 {
    ((b.0 - a.0).powi(2) + (b.1 - a.1).powi(2)).sqrt()
}

/// Real roots of `a t^2 + b t + c`.
pub fn solve_quadratic(a: f64, b: f64, c: f64) -> Vec<f64> {
    if a.abs() < ROOT_EPS {
        if b.abs() < ROOT_EPS {
            return Vec::new();
        }
        return vec![-c / b];
    }
    let disc = b * b - 4.0 * a * c;
    if disc < -ROOT_EPS {
        return Vec::new();
    }
    if disc.abs() <= ROOT_EPS {
        return vec![-b / (2.0 * a)];
    }
    let sqrt_disc = disc.sqrt();
    // Citardauq form avoids cancellation when b^2 >> 4ac.
    let q = -0.5 * (b + b.signum() * sqrt_disc);
    let mut roots = vec![q / a];
    if q.abs() > ROOT_EPS {
        roots.push(c / q);
    } else {
        roots.push(-b / a - q / a);
    }
    roots
}

/// Real roots of `a t^3 + b t^2 + c t + d`, closed form (Cardano for one real
/// root, trigonometric identity for three).
pub fn solve_cubic(a: f64, b: f64, c: f64, d: f64) -> Vec<f64> {
    if a.abs() < ROOT_EPS {
        return solve_quadratic(b, c, d);
    }
    let (b, c, d) = (b / a, c / a, d / a);
    // Depressed cubic s^3 + p s + q with t = s - b/3.
    let shift = b / 3.0;
    let p = c - b * b / 3.0;
    let q = 2.0 * b * b * b / 27.0 - b * c / 3.0 + d;
    let disc = (q / 2.0).powi(2) + (p / 3.0).powi(3);

    if disc > ROOT_EPS {
        let sqrt_disc = disc.sqrt();
        let u = (-q / 2.0 + sqrt_disc).cbrt();
        let v = (-q / 2.0 - sqrt_disc).cbrt();
        vec![u + v - shift]
    } else if disc.abs() <= ROOT_EPS {
        if q.abs() <= ROOT_EPS {
            vec![-shift]
        } else {
            let u = (-q / 2.0).cbrt();
            vec![2.0 * u - shift, -u - shift]
        }
    } else {
        let r = (-p / 3.0).sqrt();
        let cos_arg = (-q / (2.0 * r * r * r)).clamp(-1.0, 1.0);
        let phi = cos_arg.acos();
        (0..3)
            .map(|k| 2.0 * r * ((phi + 2.0 * PI * k as f64) / 3.0).cos() - shift)
            .collect()
    }
}

fn normalize_direction(dir: Point) -> (f64, f64) {
    let (dx, dy) = (dir.0 as f64, dir.1 as f64);
    let len = (dx * dx + dy * dy).sqrt();
    if len < ROOT_EPS {
        (0.0, 1.0)
    } else {
        (dx / len, dy / len)
    }
}

/// Nearest boundary crossing strictly ahead of `origin` along `dir`. A zero
/// direction is treated as pointing down.
pub fn ray_intersection(segments: &[PathSegment], origin: Point, dir: Point) -> Option<Point> {
    let dir = normalize_direction(dir);
    let mut best: Option<(f64, Point)> = None;
    for segment in segments {
        for t in segment.line_crossings(origin, dir) {
            if !(-PARAM_EPS..=1.0 + PARAM_EPS).contains(&t) {
                continue;
            }
            let point = segment.point_at(t.clamp(0.0, 1.0) as f32);
            let along = dir.0 * (point.0 - origin.0) as f64 + dir.1 * (point.1 - origin.1) as f64;
            if along <= PARAM_EPS {
                continue;
            }
            if best.is_none_or(|(best_along, _)| along < best_along) {
                best = Some((along, point));
            }
        }
    }
    best.map(|(_, point)| point)
}

/// Axis-aligned bounds `(min_x, min_y, max_x, max_y)` of the control hull.
pub fn bounding_box(segments: &[PathSegment]) -> Option<(f32, f32, f32, f32)> {
    let mut bounds: Option<(f32, f32, f32, f32)> = None;
    for point in segments.iter().flat_map(|s| s.control_points()) {
        bounds = Some(match bounds {
            None => (point.0, point.1, point.0, point.1),
            Some((x0, y0, x1, y1)) => (
                x0.min(point.0),
                y0.min(point.1),
                x1.max(point.0),
                y1.max(point.1),
            ),
        });
    }
    bounds
}

fn polygon_approximation(segments: &[PathSegment]) -> Vec<Point> {
    let mut points = Vec::new();
    for segment in segments {
        match segment {
            PathSegment::Line(p0, _) => points.push(*p0),
            _ => {
                for i in 0..CENTROID_SAMPLES {
                    points.push(segment.point_at(i as f32 / CENTROID_SAMPLES as f32));
                }
            }
        }
    }
    points
}

/// Area centroid via the shoelace formula; falls back to the bounding-box
/// center when the contour has no area.
pub fn centroid(segments: &[PathSegment]) -> Point {
    let polygon = polygon_approximation(segments);
    let mut area2 = 0.0f64;
    let mut cx = 0.0f64;
    let mut cy = 0.0f64;
    for i in 0..polygon.len() {
        let (x0, y0) = (polygon[i].0 as f64, polygon[i].1 as f64);
        let next = polygon[(i + 1) % polygon.len()];
        let (x1, y1) = (next.0 as f64, next.1 as f64);
        let f = x0 * y1 - x1 * y0;
        area2 += f;
        cx += (x0 + x1) * f;
        cy += (y0 + y1) * f;
    }
    if area2.abs() < 1e-6 {
        return match bounding_box(segments) {
            Some((x0, y0, x1, y1)) => ((x0 + x1) / 2.0, (y0 + y1) / 2.0),
            None => (0.0, 0.0),
        };
    }
    ((cx / (3.0 * area2)) as f32, (cy / (3.0 * area2)) as f32)
}

/// Cumulative arc-length table over a segment list.
#[derive(Debug, Clone)]
pub struct ArcLengthTable {
    segments: Vec<PathSegment>,
    /// `prefix[i]` is the length of segments `0..i`.
    prefix: Vec<f32>,
}

impl ArcLengthTable {
    pub fn new(segments: Vec<PathSegment>) -> Self {
        let mut prefix = Vec::with_capacity(segments.len() + 1);
        let mut total = 0.0f32;
        prefix.push(0.0);
        for segment in &segments {
            total += segment.length();
            prefix.push(total);
        }
        Self { segments, prefix }
    }

    pub fn total_length(&self) -> f32 {
        self.prefix.last().copied().unwrap_or(0.0)
    }

    pub fn point_at_length(&self, s: f32) -> Option<Point> {
        let first = self.segments.first()?;
        if s <= 0.0 {
            return Some(first.start());
        }
        let total = self.total_length();
        if s >= total {
            return self.segments.last().map(PathSegment::end);
        }
        let idx = self.prefix.partition_point(|len| *len <= s).saturating_sub(1);
        let idx = idx.min(self.segments.len() - 1);
        let segment = &self.segments[idx];
        let local = s - self.prefix[idx];
        let seg_len = self.prefix[idx + 1] - self.prefix[idx];
        if seg_len <= f32::EPSILON {
            return Some(segment.start());
        }
        Some(segment.point_at(invert_length(segment, local, seg_len)))
    }

    pub fn point_at_fraction(&self, fraction: f32) -> Option<Point> {
        self.point_at_length(fraction.clamp(0.0, 1.0) * self.total_length())
    }
}

/// Curve parameter whose partial length equals `target`: Newton steps guarded
/// by a bisection bracket.
fn invert_length(segment: &PathSegment, target: f32, seg_len: f32) -> f32 {
    let mut lo = 0.0f32;
    let mut hi = 1.0f32;
    let mut t = target / seg_len;
    for _ in 0..16 {
        let err = segment.length_to(t) - target;
        if err.abs() < 1e-3 {
            break;
        }
        if err > 0.0 {
            hi = t;
        } else {
            lo = t;
        }
        let (dx, dy) = segment.derivative_at(t as f64);
        let speed = (dx * dx + dy * dy).sqrt() as f32;
        let newton = if speed > 1e-6 { t - err / speed } else { f32::NAN };
        t = if newton > lo && newton < hi {
            newton
        } else {
            (lo + hi) / 2.0
        };
    }
    t
}

/// Outline of a built-in node shape scaled to the box at top-left `(x, y)`.
pub fn shape_outline(shape: NodeShape, x: f32, y: f32, w: f32, h: f32) -> Vec<PathSegment> {
    let cx = x + w / 2.0;
    let cy = y + h / 2.0;
    match shape {
        NodeShape::Rectangle | NodeShape::Subroutine => {
            polygon(&[(x, y), (x + w, y), (x + w, y + h), (x, y + h)])
        }
        NodeShape::RoundRect => rounded_rect(x, y, w, h, 5.0f32.min(w / 2.0).min(h / 2.0)),
        NodeShape::Stadium => rounded_rect(x, y, w, h, (h / 2.0).min(w / 2.0)),
        NodeShape::Circle | NodeShape::DoubleCircle => ellipse(cx, cy, w / 2.0, h / 2.0),
        NodeShape::Diamond => polygon(&[(cx, y), (x + w, cy), (cx, y + h), (x, cy)]),
        NodeShape::Hexagon => {
            let x1 = x + w * 0.25;
            let x2 = x + w * 0.75;
            polygon(&[(x1, y), (x2, y), (x + w, cy), (x2, y + h), (x1, y + h), (x, cy)])
        }
        NodeShape::Parallelogram => {
            let offset = w * 0.18;
            polygon(&[(x + offset, y), (x + w, y), (x + w - offset, y + h), (x, y + h)])
        }
        NodeShape::ParallelogramAlt => {
            let offset = w * 0.18;
            polygon(&[(x, y), (x + w - offset, y), (x + w, y + h), (x + offset, y + h)])
        }
        NodeShape::Trapezoid => {
            let offset = w * 0.18;
            polygon(&[(x + offset, y), (x + w - offset, y), (x + w, y + h), (x, y + h)])
        }
        NodeShape::TrapezoidAlt => {
            let offset = w * 0.18;
            polygon(&[(x, y), (x + w, y), (x + w - offset, y + h), (x + offset, y + h)])
        }
        NodeShape::Asymmetric => {
            let slant = w * 0.22;
            polygon(&[
                (x, y),
                (x + w - slant, y),
                (x + w, cy),
                (x + w - slant, y + h),
                (x, y + h),
            ])
        }
        NodeShape::Cylinder => parse_svg_path(&cylinder_path(x, y, w, h))
            .unwrap_or_else(|_| polygon(&[(x, y), (x + w, y), (x + w, y + h), (x, y + h)])),
    }
}

/// Cylinder silhouette as path data: lid arc, right wall, base arc, left wall.
fn cylinder_path(x: f32, y: f32, w: f32, h: f32) -> String {
    let rx = w / 2.0;
    let ry = (h * 0.1).min(rx);
    let (top, bottom) = (y + ry, y + h - ry);
    format!(
        "M{x},{top} A{rx},{ry} 0 0,1 {},{top} L{},{bottom} A{rx},{ry} 0 0,1 {x},{bottom} Z",
        x + w,
        x + w
    )
}

fn polygon(points: &[Point]) -> Vec<PathSegment> {
    (0..points.len())
        .map(|i| PathSegment::Line(points[i], points[(i + 1) % points.len()]))
        .collect()
}

/// Quarter arc from `from` to `to` around the corner point `corner`.
fn quarter_arc(from: Point, corner: Point, to: Point) -> PathSegment {
    let c1 = (
        from.0 + (corner.0 - from.0) * KAPPA,
        from.1 + (corner.1 - from.1) * KAPPA,
    );
    let c2 = (
        to.0 + (corner.0 - to.0) * KAPPA,
        to.1 + (corner.1 - to.1) * KAPPA,
    );
    PathSegment::Cubic(from, c1, c2, to)
}

fn rounded_rect(x: f32, y: f32, w: f32, h: f32, r: f32) -> Vec<PathSegment> {
    if r <= 0.0 {
        return polygon(&[(x, y), (x + w, y), (x + w, y + h), (x, y + h)]);
    }
    let (x1, y1) = (x + w, y + h);
    let mut out = Vec::with_capacity(8);
    out.push(PathSegment::Line((x + r, y), (x1 - r, y)));
    out.push(quarter_arc((x1 - r, y), (x1, y), (x1, y + r)));
    out.push(PathSegment::Line((x1, y + r), (x1, y1 - r)));
    out.push(quarter_arc((x1, y1 - r), (x1, y1), (x1 - r, y1)));
    out.push(PathSegment::Line((x1 - r, y1), (x + r, y1)));
    out.push(quarter_arc((x + r, y1), (x, y1), (x, y1 - r)));
    out.push(PathSegment::Line((x, y1 - r), (x, y + r)));
    out.push(quarter_arc((x, y + r), (x, y), (x + r, y)));
    out.retain(|s| distance(s.start(), s.end()) > 1e-6);
    out
}

pub fn ellipse(cx: f32, cy: f32, rx: f32, ry: f32) -> Vec<PathSegment> {
    let right = (cx + rx, cy);
    let bottom = (cx, cy + ry);
    let left = (cx - rx, cy);
    let top = (cx, cy - ry);
    vec![
        quarter_arc(right, (cx + rx, cy + ry), bottom),
        quarter_arc(bottom, (cx - rx, cy + ry), left),
        quarter_arc(left, (cx - rx, cy - ry), top),
        quarter_arc(top, (cx + rx, cy - ry), right),
    ]
}

/// Smooth curve through `points` (Catmull-Rom, converted to cubics).
pub fn catmull_rom(points: &[Point]) -> Vec<PathSegment> {
    if points.len() < 2 {
        return Vec::new();
    }
    if points.len() == 2 {
        return vec![PathSegment::Line(points[0], points[1])];
    }
    let last = points.len() - 1;
    (0..last)
        .map(|i| {
            let p0 = points[i.saturating_sub(1)];
            let p1 = points[i];
            let p2 = points[i + 1];
            let p3 = points[(i + 2).min(last)];
            let c1 = (p1.0 + (p2.0 - p0.0) / 6.0, p1.1 + (p2.1 - p0.1) / 6.0);
            let c2 = (p2.0 - (p3.0 - p1.0) / 6.0, p2.1 - (p3.1 - p1.1) / 6.0);
            PathSegment::Cubic(p1, c1, c2, p2)
        })
        .collect()
}

fn fmt_num(value: f32) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded == rounded.trunc() {
        format!("{}", rounded as i64)
    } else {
        format!("{rounded}")
    }
}

/// Serialises segments with absolute commands, starting a new subpath only
/// where consecutive segments are disconnected.
pub fn to_svg_path(segments: &[PathSegment]) -> String {
    let mut out = String::new();
    let mut cursor: Option<Point> = None;
    for segment in segments {
        let start = segment.start();
        if cursor.is_none_or(|c| distance(c, start) > 1e-3) {
            let _ = write!(out, "M{},{} ", fmt_num(start.0), fmt_num(start.1));
        }
        match *segment {
            PathSegment::Line(_, p1) => {
                let _ = write!(out, "L{},{} ", fmt_num(p1.0), fmt_num(p1.1));
            }
            PathSegment::Quad(_, p1, p2) => {
                let _ = write!(
                    out,
                    "Q{},{} {},{} ",
                    fmt_num(p1.0),
                    fmt_num(p1.1),
                    fmt_num(p2.0),
                    fmt_num(p2.1)
                );
            }
            PathSegment::Cubic(_, p1, p2, p3) => {
                let _ = write!(
                    out,
                    "C{},{} {},{} {},{} ",
                    fmt_num(p1.0),
                    fmt_num(p1.1),
                    fmt_num(p2.0),
                    fmt_num(p2.1),
                    fmt_num(p3.0),
                    fmt_num(p3.1)
                );
            }
        }
        cursor = Some(segment.end());
    }
    out.trim_end().to_string()
}

struct PathLexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> PathLexer<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn skip_separators(&mut self) {
        let bytes = self.src.as_bytes();
        while self.pos < bytes.len() && (bytes[self.pos].is_ascii_whitespace() || bytes[self.pos] == b',') {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_separators();
        self.src.as_bytes().get(self.pos).copied()
    }

    fn error(&self, message: impl Into<String>) -> GeometryError {
        GeometryError::InvalidPath {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn at_number(&mut self) -> bool {
        matches!(self.peek(), Some(b'0'..=b'9' | b'-' | b'+' | b'.'))
    }

    fn number(&mut self) -> Result<f32, GeometryError> {
        self.skip_separators();
        let bytes = self.src.as_bytes();
        let start = self.pos;
        let mut end = start;
        if matches!(bytes.get(end), Some(b'-' | b'+')) {
            end += 1;
        }
        let mut seen_dot = false;
        while let Some(&b) = bytes.get(end) {
            match b {
                b'0'..=b'9' => end += 1,
                b'.' if !seen_dot => {
                    seen_dot = true;
                    end += 1;
                }
                b'e' | b'E' if end > start => {
                    let mut exp_end = end + 1;
                    if matches!(bytes.get(exp_end), Some(b'-' | b'+')) {
                        exp_end += 1;
                    }
                    if matches!(bytes.get(exp_end), Some(b'0'..=b'9')) {
                        end = exp_end;
                        while matches!(bytes.get(end), Some(b'0'..=b'9')) {
                            end += 1;
                        }
                    }
                    break;
                }
                _ => break,
            }
        }
        let text = &self.src[start..end];
        let value = text
            .parse::<f32>()
            .map_err(|_| self.error(format!("expected number, found `{text}`")))?;
        self.pos = end;
        Ok(value)
    }

    fn flag(&mut self) -> Result<bool, GeometryError> {
        match self.peek() {
            Some(b'0') => {
                self.pos += 1;
                Ok(false)
            }
            Some(b'1') => {
                self.pos += 1;
                Ok(true)
            }
            _ => Err(self.error("expected arc flag 0 or 1")),
        }
    }

    fn point(&mut self) -> Result<Point, GeometryError> {
        Ok((self.number()?, self.number()?))
    }
}

/// Parses SVG path data (`M L H V Q C A Z`, absolute and relative).
/// Elliptical arcs become cubic segments.
pub fn parse_svg_path(data: &str) -> Result<Vec<PathSegment>, GeometryError> {
    let mut lexer = PathLexer::new(data);
    let mut segments = Vec::new();
    let mut current: Point = (0.0, 0.0);
    let mut subpath_start: Point = (0.0, 0.0);
    let mut command: Option<u8> = None;

    while let Some(next) = lexer.peek() {
        let cmd = if next.is_ascii_alphabetic() {
            lexer.pos += 1;
            next
        } else {
            match command {
                // Extra coordinate pairs after a moveto are implicit linetos.
                Some(b'M') => b'L',
                Some(b'm') => b'l',
                Some(b'Z' | b'z') | None => return Err(lexer.error("expected path command")),
                Some(prev) => prev,
            }
        };
        let relative = cmd.is_ascii_lowercase();
        let offset = |p: Point, base: Point| if relative { (p.0 + base.0, p.1 + base.1) } else { p };

        match cmd.to_ascii_uppercase() {
            b'M' => {
                current = offset(lexer.point()?, current);
                subpath_start = current;
            }
            b'L' => {
                let p = offset(lexer.point()?, current);
                segments.push(PathSegment::Line(current, p));
                current = p;
            }
            b'H' => {
                let v = lexer.number()?;
                let p = (if relative { current.0 + v } else { v }, current.1);
                segments.push(PathSegment::Line(current, p));
                current = p;
            }
            b'V' => {
                let v = lexer.number()?;
                let p = (current.0, if relative { current.1 + v } else { v });
                segments.push(PathSegment::Line(current, p));
                current = p;
            }
            b'Q' => {
                let c = offset(lexer.point()?, current);
                let p = offset(lexer.point()?, current);
                segments.push(PathSegment::Quad(current, c, p));
                current = p;
            }
            b'C' => {
                let c1 = offset(lexer.point()?, current);
                let c2 = offset(lexer.point()?, current);
                let p = offset(lexer.point()?, current);
                segments.push(PathSegment::Cubic(current, c1, c2, p));
                current = p;
            }
            b'A' => {
                let rx = lexer.number()?;
                let ry = lexer.number()?;
                let rotation = lexer.number()?;
                let large_arc = lexer.flag()?;
                let sweep = lexer.flag()?;
                let p = offset(lexer.point()?, current);
                segments.extend(arc_to_cubics(current, rx, ry, rotation, large_arc, sweep, p));
                current = p;
            }
            b'Z' => {
                if distance(current, subpath_start) > 1e-6 {
                    segments.push(PathSegment::Line(current, subpath_start));
                }
                current = subpath_start;
            }
            _ => {
                return Err(GeometryError::InvalidPath {
                    offset: lexer.pos - 1,
                    message: format!("unsupported command `{}`", cmd as char),
                });
            }
        }
        command = Some(cmd);
        if matches!(cmd, b'Z' | b'z') && lexer.at_number() {
            return Err(lexer.error("unexpected number after closepath"));
        }
    }
    Ok(segments)
}

/// Endpoint-parameterised elliptical arc to cubic segments of at most 90°.
fn arc_to_cubics(
    from: Point,
    rx: f32,
    ry: f32,
    rotation_deg: f32,
    large_arc: bool,
    sweep: bool,
    to: Point,
) -> Vec<PathSegment> {
    if distance(from, to) < 1e-6 {
        return Vec::new();
    }
    let (mut rx, mut ry) = (rx.abs() as f64, ry.abs() as f64);
    if rx < ROOT_EPS || ry < ROOT_EPS {
        return vec![PathSegment::Line(from, to)];
    }
    let phi = (rotation_deg as f64).to_radians();
    let (sin_phi, cos_phi) = phi.sin_cos();
    let (x1, y1) = (from.0 as f64, from.1 as f64);
    let (x2, y2) = (to.0 as f64, to.1 as f64);

    let dx = (x1 - x2) / 2.0;
    let dy = (y1 - y2) / 2.0;
    let x1p = cos_phi * dx + sin_phi * dy;
    let y1p = -sin_phi * dx + cos_phi * dy;

    let lambda = (x1p * x1p) / (rx * rx) + (y1p * y1p) / (ry * ry);
    if lambda > 1.0 {
        let scale = lambda.sqrt();
        rx *= scale;
        ry *= scale;
    }

    let num = rx * rx * ry * ry - rx * rx * y1p * y1p - ry * ry * x1p * x1p;
    let den = rx * rx * y1p * y1p + ry * ry * x1p * x1p;
    let mut coef = if den.abs() < ROOT_EPS { 0.0 } else { (num / den).max(0.0).sqrt() };
    if large_arc == sweep {
        coef = -coef;
    }
    let cxp = coef * rx * y1p / ry;
    let cyp = -coef * ry * x1p / rx;
    let cx = cos_phi * cxp - sin_phi * cyp + (x1 + x2) / 2.0;
    let cy = sin_phi * cxp + cos_phi * cyp + (y1 + y2) / 2.0;

    let angle = |ux: f64, uy: f64, vx: f64, vy: f64| {
        let dot = ux * vx + uy * vy;
        let len = (ux * ux + uy * uy).sqrt() * (vx * vx + vy * vy).sqrt();
        let mut a = (dot / len).clamp(-1.0, 1.0).acos();
        if ux * vy - uy * vx < 0.0 {
            a = -a;
        }
        a
    };
    let ux = (x1p - cxp) / rx;
    let uy = (y1p - cyp) / ry;
    let vx = (-x1p - cxp) / rx;
    let vy = (-y1p - cyp) / ry;
    let theta1 = angle(1.0, 0.0, ux, uy);
    let mut delta = angle(ux, uy, vx, vy);
    if !sweep && delta > 0.0 {
        delta -= 2.0 * PI;
    } else if sweep && delta < 0.0 {
        delta += 2.0 * PI;
    }

    let chunks = (delta.abs() / (PI / 2.0) - 1e-9).ceil().max(1.0) as usize;
    let step = delta / chunks as f64;
    let k = 4.0 / 3.0 * (step / 4.0).tan();
    let map = |ex: f64, ey: f64| -> Point {
        let x = rx * ex;
        let y = ry * ey;
        (
            (cos_phi * x - sin_phi * y + cx) as f32,
            (sin_phi * x + cos_phi * y + cy) as f32,
        )
    };

    let mut out = Vec::with_capacity(chunks);
    let mut start = from;
    for i in 0..chunks {
        let a0 = theta1 + step * i as f64;
        let a1 = a0 + step;
        let (s0, c0) = a0.sin_cos();
        let (s1, c1) = a1.sin_cos();
        let ctrl1 = map(c0 - k * s0, s0 + k * c0);
        let ctrl2 = map(c1 + k * s1, s1 - k * c1);
        let end = if i + 1 == chunks { to } else { map(c1, s1) };
        out.push(PathSegment::Cubic(start, ctrl1, ctrl2, end));
        start = end;
    }
    out
}
