use fontdb::{Database, Family, Query, Stretch, Style, Weight};
use ttf_parser::Face;

const DEFAULT_LINE_HEIGHT: f32 = 1.5;
const FALLBACK_CHAR_WIDTH: f32 = 0.56;

/// Text measurement supplied by the host. Layout only ever asks for the width
/// of a single line; `measure` is the multi-line convenience on top of it.
pub trait TextMeasurer {
    fn line_width(&self, line: &str, font_size: f32) -> f32;

    fn measure(&self, text: &str, font_size: f32) -> (f32, f32) {
        let lines = split_lines(text);
        let width = lines
            .iter()
            .map(|line| self.line_width(line, font_size))
            .fold(0.0, f32::max);
        let height = lines.len().max(1) as f32 * font_size * DEFAULT_LINE_HEIGHT;
        (width, height)
    }
}

/// Per-character width table calibrated for the default sans-serif stack.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicMeasurer;

impl TextMeasurer for HeuristicMeasurer {
    fn line_width(&self, line: &str, font_size: f32) -> f32 {
        line.chars().map(char_width_factor).sum::<f32>() * font_size
    }
}

pub fn char_width_factor(ch: char) -> f32 {
    match ch {
        ' ' => 0.306,
        '\\' | '.' | ',' | ':' | ';' | '|' | '!' | '(' | ')' | '[' | ']' | '{' | '}' => 0.321,
        'A' => 0.652,
        'B' => 0.648,
        'C' => 0.734,
        'D' => 0.723,
        'E' => 0.594,
        'F' => 0.575,
        'G' | 'H' => 0.742,
        'I' => 0.272,
        'J' => 0.557,
        'K' => 0.648,
        'L' => 0.559,
        'M' => 0.903,
        'N' => 0.763,
        'O' => 0.754,
        'P' => 0.623,
        'Q' => 0.755,
        'R' => 0.637,
        'S' => 0.633,
        'T' => 0.599,
        'U' => 0.746,
        'V' => 0.661,
        'W' => 0.958,
        'X' => 0.655,
        'Y' => 0.646,
        'Z' => 0.621,
        'a' | 'z' => 0.550,
        'b' => 0.603,
        'c' => 0.547,
        'd' => 0.609,
        'e' => 0.570,
        'f' => 0.340,
        'g' | 'h' => 0.600,
        'i' => 0.235,
        'j' => 0.227,
        'k' => 0.522,
        'l' => 0.239,
        'm' => 0.867,
        'n' | 'q' | 'u' => 0.585,
        'o' => 0.574,
        'p' => 0.595,
        'r' => 0.364,
        's' => 0.523,
        't' => 0.305,
        'v' => 0.545,
        'w' => 0.811,
        'x' => 0.538,
        'y' => 0.556,
        '0' => 0.613,
        '1' => 0.396,
        '2' => 0.609,
        '3' => 0.597,
        '4' => 0.614,
        '5' => 0.586,
        '6' => 0.608,
        '7' => 0.559,
        '8' => 0.611,
        '9' => 0.595,
        '@' | '#' | '%' | '&' => 0.946,
        _ => 0.568,
    }
}

/// Font-backed measurer. Owns the face bytes; nothing is shared between
/// instances, so concurrent layouts each bring their own.
#[derive(Debug, Clone)]
pub struct FontMeasurer {
    data: Vec<u8>,
    index: u32,
    units_per_em: u16,
    ascii_advances: [u16; 128],
}

impl FontMeasurer {
    /// Resolves a CSS-style family list (`"Inter", sans-serif`) against the
    /// system font database.
    pub fn from_family(font_family: &str) -> Option<Self> {
        let names: Vec<String> = font_family
            .split(',')
            .map(|part| part.trim().trim_matches('"').trim_matches('\'').to_string())
            .filter(|part| !part.is_empty())
            .collect();
        let mut families: Vec<Family<'_>> = names
            .iter()
            .map(|name| match name.to_ascii_lowercase().as_str() {
                "serif" => Family::Serif,
                "sans-serif" | "system-ui" | "-apple-system" | "ui-sans-serif" => {
                    Family::SansSerif
                }
                "monospace" | "ui-monospace" => Family::Monospace,
                "cursive" => Family::Cursive,
                "fantasy" => Family::Fantasy,
                _ => Family::Name(name.as_str()),
            })
            .collect();
        if families.is_empty() {
            families.push(Family::SansSerif);
        }

        let mut db = Database::new();
        db.load_system_fonts();
        let query = Query {
            families: &families,
            weight: Weight::NORMAL,
            stretch: Stretch::Normal,
            style: Style::Normal,
        };
        let id = db.query(&query)?;
        let (data, index) = db.with_face_data(id, |data, index| (data.to_vec(), index))?;
        Self::from_bytes(data, index)
    }

    pub fn from_bytes(data: Vec<u8>, index: u32) -> Option<Self> {
        let face = Face::parse(&data, index).ok()?;
        let units_per_em = face.units_per_em().max(1);
        let mut ascii_advances = [0u16; 128];
        for byte in 0u8..=127 {
            if let Some(glyph) = face.glyph_index(byte as char) {
                ascii_advances[byte as usize] = face.glyph_hor_advance(glyph).unwrap_or(0);
            }
        }
        Some(Self {
            data,
            index,
            units_per_em,
            ascii_advances,
        })
    }
}

impl TextMeasurer for FontMeasurer {
    fn line_width(&self, line: &str, font_size: f32) -> f32 {
        let scale = font_size / self.units_per_em as f32;
        let fallback = |ch: char| char_width_factor(ch) * font_size;

        if line.is_ascii() {
            return line
                .chars()
                .map(|ch| match self.ascii_advances[ch as usize] {
                    0 => fallback(ch),
                    advance => advance as f32 * scale,
                })
                .sum();
        }

        let Ok(face) = Face::parse(&self.data, self.index) else {
            return HeuristicMeasurer.line_width(line, font_size);
        };
        line.chars()
            .map(|ch| {
                face.glyph_index(ch)
                    .and_then(|glyph| face.glyph_hor_advance(glyph))
                    .map(|advance| advance as f32 * scale)
                    .unwrap_or_else(|| fallback(ch))
            })
            .sum()
    }
}

/// Splits a label on `\n`, literal `\n` escapes and `<br>` tags.
pub fn split_lines(text: &str) -> Vec<String> {
    let normalized = text
        .replace("<br/>", "\n")
        .replace("<br />", "\n")
        .replace("<br>", "\n")
        .replace("\\n", "\n");
    normalized
        .split('\n')
        .map(|line| line.trim().to_string())
        .collect()
}

/// Greedy word wrap. A single word wider than `max_width` keeps its own line.
pub fn wrap_line(
    line: &str,
    max_width: f32,
    font_size: f32,
    measurer: &dyn TextMeasurer,
) -> Vec<String> {
    if measurer.line_width(line, font_size) <= max_width {
        return vec![line.to_string()];
    }
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in line.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{current} {word}")
        };
        if measurer.line_width(&candidate, font_size) > max_width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        } else {
            current = candidate;
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

pub fn average_char_width(font_size: f32) -> f32 {
    font_size * FALLBACK_CHAR_WIDTH
}
