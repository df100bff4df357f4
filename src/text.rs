use crate::config::TextConfig;
use glam::Vec2;
use serde::Deserialize;

/// Style of a text node, parsed from the host's `font` property (a JSON object).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TextStyle {
    #[serde(default = "TextStyle::default_family")]
    pub family: String,
    #[serde(default = "TextStyle::default_size")]
    pub size: f32,
    #[serde(default = "TextStyle::default_fill")]
    pub fill: String,
    #[serde(default = "TextStyle::default_stroke")]
    pub stroke: Option<String>,
    #[serde(default = "TextStyle::default_stroke_thickness")]
    pub stroke_thickness: f32,
}

impl TextStyle {
    fn default_family() -> String {
        "sans-serif".to_string()
    }

    const fn default_size() -> f32 {
        16.0
    }

    fn default_fill() -> String {
        "#ffffff".to_string()
    }

    fn default_stroke() -> Option<String> {
        Some("#000000".to_string())
    }

    const fn default_stroke_thickness() -> f32 {
        2.0
    }

    /// Parse `raw`; absent or malformed input yields `fallback`.
    pub fn parse_or(raw: Option<&str>, fallback: &TextStyle) -> TextStyle {
        let Some(raw) = raw else {
            return fallback.clone();
        };
        match serde_json::from_str::<TextStyle>(raw) {
            Ok(style) if style.size.is_finite() && style.size > 0.0 => style,
            Ok(style) => {
                log::warn!("[text] font size {} is not usable, using fallback style", style.size);
                fallback.clone()
            }
            Err(err) => {
                log::warn!("[text] malformed font style '{raw}': {err}");
                fallback.clone()
            }
        }
    }
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            family: Self::default_family(),
            size: Self::default_size(),
            fill: Self::default_fill(),
            stroke: Self::default_stroke(),
            stroke_thickness: Self::default_stroke_thickness(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    pub text: String,
    pub size: Vec2,
}

fn glyph_width(style: &TextStyle, config: &TextConfig) -> f32 {
    (style.size * config.glyph_advance).max(f32::EPSILON)
}

fn line_height(style: &TextStyle, config: &TextConfig) -> f32 {
    (style.size * config.line_height).max(f32::EPSILON)
}

/// Greedy word wrap into lines no wider than `width`. Words that do not fit on
/// an empty line are split by character.
pub fn wrap_lines(text: &str, style: &TextStyle, width: f32, config: &TextConfig) -> Vec<String> {
    let per_line = ((width / glyph_width(style, config)).floor() as usize).max(1);
    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut line = String::new();
        let mut line_len = 0usize;
        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            let needed = if line_len == 0 { word.len() } else { line_len + 1 + word.len() };
            if needed <= per_line {
                if line_len > 0 {
                    line.push(' ');
                    line_len += 1;
                }
                line.extend(word.iter());
                line_len += word.len();
                continue;
            }
            if line_len > 0 {
                lines.push(std::mem::take(&mut line));
            }
            while word.len() > per_line {
                let rest = word.split_off(per_line);
                lines.push(word.into_iter().collect());
                word = rest;
            }
            line_len = word.len();
            line = word.into_iter().collect();
        }
        lines.push(line);
    }
    lines
}

/// Wrap `text` to the box width and split the lines into blocks that each fit the box height.
pub fn measure_blocks(text: &str, style: &TextStyle, bounds: Vec2, config: &TextConfig) -> Vec<TextBlock> {
    let lines = wrap_lines(text, style, bounds.x, config);
    let height = line_height(style, config);
    let per_block = ((bounds.y / height).floor() as usize).max(1);
    let glyph = glyph_width(style, config);
    lines
        .chunks(per_block)
        .map(|chunk| {
            let widest = chunk.iter().map(|line| line.chars().count()).max().unwrap_or(0);
            TextBlock {
                text: chunk.join("\n"),
                size: Vec2::new(widest as f32 * glyph, chunk.len() as f32 * height),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TextConfig {
        TextConfig::default()
    }

    #[test]
    fn malformed_style_falls_back() {
        let fallback = TextStyle::default();
        assert_eq!(TextStyle::parse_or(Some("{not json"), &fallback), fallback);
        assert_eq!(TextStyle::parse_or(Some(r#"{"size":-3}"#), &fallback), fallback);
        let parsed = TextStyle::parse_or(Some(r##"{"size":20,"fill":"#ff0000"}"##), &fallback);
        assert_eq!(parsed.size, 20.0);
        assert_eq!(parsed.fill, "#ff0000");
        assert_eq!(parsed.stroke.as_deref(), Some("#000000"));
    }

    #[test]
    fn wraps_on_word_boundaries() {
        // 10px glyphs, 50px box: five characters per line.
        let config = TextConfig { glyph_advance: 1.0, ..TextConfig::default() };
        let style = TextStyle { size: 10.0, ..TextStyle::default() };
        let lines = wrap_lines("aa bb cc dddddddd", &style, 50.0, &config);
        assert_eq!(lines, vec!["aa bb", "cc", "ddddd", "ddd"]);
    }

    #[test]
    fn keeps_explicit_line_breaks() {
        let style = TextStyle::default();
        let lines = wrap_lines("one\n\ntwo", &style, 500.0, &config());
        assert_eq!(lines, vec!["one", "", "two"]);
    }

    #[test]
    fn blocks_fit_box_height() {
        let style = TextStyle { size: 10.0, ..TextStyle::default() };
        // line height 12, box of 30 holds two lines
        let blocks = measure_blocks("a b c d e", &style, Vec2::new(6.0, 30.0), &config());
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].text, "a\nb");
        assert_eq!(blocks[2].text, "e");
        assert!((blocks[0].size.y - 24.0).abs() < 1e-4);
    }
}
