//! Colors: CSS color values and the semantic color scheme used at paint time.

use core::fmt::Write as _;

/// Style name used by text that carries no color override.
pub const REGULAR_TEXT: &str = "regular";
/// Style name for links into the same book.
pub const INTERNAL_HYPERLINK: &str = "internal";
/// Style name for links leaving the book.
pub const EXTERNAL_HYPERLINK: &str = "external";
/// Style name for links into another book.
pub const BOOK_HYPERLINK: &str = "book";
/// Style name for the selection background.
pub const SELECTION_BACKGROUND: &str = "selectionBackground";
/// Style name for highlighted search hits.
pub const HIGHLIGHTED_TEXT: &str = "highlightedText";

/// Opaque RGB color as written by a stylesheet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Color {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
}

impl Color {
    /// Build from separate channels.
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Build from a `0xRRGGBB` integer. The top byte is ignored.
    pub const fn from_rgb(rgb: u32) -> Self {
        Self {
            r: (rgb >> 16) as u8,
            g: (rgb >> 8) as u8,
            b: rgb as u8,
        }
    }

    /// Pack into a `0xRRGGBB` integer.
    pub const fn rgb(self) -> u32 {
        ((self.r as u32) << 16) | ((self.g as u32) << 8) | self.b as u32
    }

    /// Opaque ARGB value.
    pub const fn argb(self) -> u32 {
        0xff00_0000 | self.rgb()
    }

    /// Complement of every channel.
    pub const fn inverted(self) -> Self {
        Self::new(255 - self.r, 255 - self.g, 255 - self.b)
    }
}

/// Format a color as the `#rrggbb` style name understood by [`ColorScheme::resolve`].
pub fn color_style(color: Color) -> String {
    let mut out = String::with_capacity(7);
    let _ = write!(out, "#{:02x}{:02x}{:02x}", color.r, color.g, color.b);
    out
}

/// Parse a CSS color value: a basic named color, `#rgb`, `#rrggbb` or `rgb(...)`.
///
/// Returns `None` for anything unrecognized or out of range so the property
/// stays unset.
pub fn parse_css_color(value: &str) -> Option<Color> {
    let value = value.trim();
    if let Some(hex) = value.strip_prefix('#') {
        return match hex.len() {
            3 | 6 => parse_hex_digits(hex).map(|(rgb, _)| Color::from_rgb(rgb)),
            _ => None,
        };
    }
    let lower = value.to_ascii_lowercase();
    if let Some(args) = lower
        .strip_prefix("rgb(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        return parse_rgb_function(args);
    }
    named_color(&lower)
}

fn parse_rgb_function(args: &str) -> Option<Color> {
    let parts: Vec<&str> = if args.contains(',') {
        args.split(',').map(str::trim).collect()
    } else {
        args.split_whitespace().collect()
    };
    if parts.len() != 3 {
        return None;
    }
    let r = parse_rgb_component(parts[0])?;
    let g = parse_rgb_component(parts[1])?;
    let b = parse_rgb_component(parts[2])?;
    Some(Color::new(r, g, b))
}

fn parse_rgb_component(raw: &str) -> Option<u8> {
    if let Some(pct) = raw.strip_suffix('%') {
        let pct: u32 = pct.trim().parse().ok()?;
        if pct > 100 {
            return None;
        }
        return Some((pct * 255 / 100) as u8);
    }
    let value: u32 = raw.parse().ok()?;
    u8::try_from(value).ok()
}

fn named_color(name: &str) -> Option<Color> {
    let rgb = match name {
        "black" => 0x000000,
        "white" => 0xffffff,
        "red" => 0xff0000,
        "green" => 0x008000,
        "lime" => 0x00ff00,
        "blue" => 0x0000ff,
        "yellow" => 0xffff00,
        "orange" => 0xffa500,
        "purple" => 0x800080,
        "gray" | "grey" => 0x808080,
        "silver" => 0xc0c0c0,
        "aqua" | "cyan" => 0x00ffff,
        "fuchsia" | "magenta" => 0xff00ff,
        "maroon" => 0x800000,
        "navy" => 0x000080,
        "olive" => 0x808000,
        "teal" => 0x008080,
        "brown" => 0xa52a2a,
        "darkgray" | "darkgrey" => 0xa9a9a9,
        "lightgray" | "lightgrey" => 0xd3d3d3,
        _ => return None,
    };
    Some(Color::from_rgb(rgb))
}

/// Parse 3, 6 or 8 hex digits into `(rgb, alpha)`. Short form is expanded.
fn parse_hex_digits(hex: &str) -> Option<(u32, u8)> {
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    match hex.len() {
        3 => {
            let mut rgb = 0u32;
            for b in hex.bytes() {
                let nibble = (b as char).to_digit(16)?;
                rgb = (rgb << 8) | (nibble << 4) | nibble;
            }
            Some((rgb, 0xff))
        }
        6 => Some((u32::from_str_radix(hex, 16).ok()?, 0xff)),
        8 => {
            let rgba = u32::from_str_radix(hex, 16).ok()?;
            Some((rgba >> 8, rgba as u8))
        }
        _ => None,
    }
}

/// Paint-time palette resolving semantic color style names to ARGB values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColorScheme {
    pub background: Color,
    pub foreground: Color,
    pub selection_background: Color,
    pub highlighted_text: Color,
    pub internal_hyperlink: Color,
    pub external_hyperlink: Color,
    inverted: bool,
}

impl Default for ColorScheme {
    fn default() -> Self {
        Self {
            background: Color::from_rgb(0xffffff),
            foreground: Color::from_rgb(0x000000),
            selection_background: Color::from_rgb(0x3c8bff),
            highlighted_text: Color::from_rgb(0x3c8bff),
            internal_hyperlink: Color::from_rgb(0x2160b4),
            external_hyperlink: Color::from_rgb(0x2160b4),
            inverted: false,
        }
    }
}

impl ColorScheme {
    /// Parse a `key=rrggbb:key=rrggbb` scheme spec over the defaults.
    ///
    /// Keys: `bg`, `fg`, `sb`, `ht`, `ih`, `eh`. Unknown keys and malformed
    /// values are ignored.
    pub fn from_spec(spec: &str) -> Self {
        let mut scheme = Self::default();
        for pair in spec.split(':').filter(|p| !p.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let Some(color) = parse_scheme_value(value) else {
                log::debug!("ignoring color scheme value {}={}", key, value);
                continue;
            };
            match key {
                "bg" => scheme.background = color,
                "fg" => scheme.foreground = color,
                "sb" => scheme.selection_background = color,
                "ht" => scheme.highlighted_text = color,
                "ih" => scheme.internal_hyperlink = color,
                "eh" => scheme.external_hyperlink = color,
                _ => {}
            }
        }
        scheme
    }

    /// Night-mode variant: every color replaced by its complement.
    pub fn inverted(self) -> Self {
        Self {
            background: self.background.inverted(),
            foreground: self.foreground.inverted(),
            selection_background: self.selection_background.inverted(),
            highlighted_text: self.highlighted_text.inverted(),
            internal_hyperlink: self.internal_hyperlink.inverted(),
            external_hyperlink: self.external_hyperlink.inverted(),
            inverted: !self.inverted,
        }
    }

    pub fn is_inverted(&self) -> bool {
        self.inverted
    }

    /// Resolve a color style name (or `#` literal) to ARGB.
    ///
    /// Literal colors are inverted together with the scheme. Names this
    /// scheme does not know fall back to the foreground.
    pub fn resolve(&self, style: &str) -> u32 {
        if let Some(hex) = style.strip_prefix('#') {
            if let Some((rgb, alpha)) = parse_hex_digits(hex) {
                let mut color = Color::from_rgb(rgb);
                if self.inverted {
                    color = color.inverted();
                }
                return ((alpha as u32) << 24) | color.rgb();
            }
            return self.foreground.argb();
        }
        let color = match style {
            INTERNAL_HYPERLINK => self.internal_hyperlink,
            EXTERNAL_HYPERLINK | BOOK_HYPERLINK => self.external_hyperlink,
            SELECTION_BACKGROUND => self.selection_background,
            HIGHLIGHTED_TEXT => self.highlighted_text,
            _ => self.foreground,
        };
        color.argb()
    }
}

fn parse_scheme_value(value: &str) -> Option<Color> {
    let value = value.trim_start_matches('#');
    if value.is_empty() || value.len() > 8 {
        return None;
    }
    let rgb = u32::from_str_radix(value, 16).ok()?;
    Some(Color::from_rgb(rgb))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_and_hex_colors() {
        assert_eq!(parse_css_color("red"), Some(Color::new(255, 0, 0)));
        assert_eq!(parse_css_color("#0f0"), Some(Color::new(0, 255, 0)));
        assert_eq!(parse_css_color("#123456"), Some(Color::new(0x12, 0x34, 0x56)));
        assert_eq!(parse_css_color(" Navy "), Some(Color::new(0, 0, 0x80)));
    }

    #[test]
    fn rgb_function_keeps_spaces_and_rejects_out_of_range() {
        assert_eq!(parse_css_color("rgb(0, 128, 255)"), Some(Color::new(0, 128, 255)));
        assert_eq!(parse_css_color("rgb(100%, 0%, 50%)"), Some(Color::new(255, 0, 127)));
        assert_eq!(parse_css_color("rgb(0, 300, 0)"), None);
        assert_eq!(parse_css_color("rgb(0, 0)"), None);
    }

    #[test]
    fn rejects_bad_hex() {
        assert_eq!(parse_css_color("#12"), None);
        assert_eq!(parse_css_color("#ggg"), None);
        assert_eq!(parse_css_color("blurple"), None);
    }

    #[test]
    fn packs_and_inverts_channels() {
        let color = Color::new(0x12, 0x34, 0x56);
        assert_eq!(color.rgb(), 0x12_3456);
        assert_eq!(Color::from_rgb(color.rgb()), color);
        assert_eq!(color.inverted(), Color::new(0xed, 0xcb, 0xa9));
        assert_eq!(color.inverted().inverted(), color);
    }

    #[test]
    fn color_style_formats_lowercase_hex() {
        assert_eq!(color_style(Color::new(0xab, 0x01, 0xff)), "#ab01ff");
    }

    #[test]
    fn scheme_resolves_semantic_names_and_literals() {
        let scheme = ColorScheme::default();
        assert_eq!(scheme.resolve(INTERNAL_HYPERLINK), 0xff2160b4);
        assert_eq!(scheme.resolve(BOOK_HYPERLINK), 0xff2160b4);
        assert_eq!(scheme.resolve(SELECTION_BACKGROUND), 0xff3c8bff);
        assert_eq!(scheme.resolve("#fff"), 0xffffffff);
        assert_eq!(scheme.resolve("#11223380"), 0x80112233);
        assert_eq!(scheme.resolve("no-such-style"), 0xff000000);
        assert_eq!(scheme.resolve(REGULAR_TEXT), 0xff000000);
    }

    #[test]
    fn scheme_spec_overrides_defaults() {
        let scheme = ColorScheme::from_spec("fg=333333:bg=fafafa:zz=000000:ih=nothex");
        assert_eq!(scheme.foreground, Color::from_rgb(0x333333));
        assert_eq!(scheme.background, Color::from_rgb(0xfafafa));
        assert_eq!(scheme.internal_hyperlink, Color::from_rgb(0x2160b4));
    }

    #[test]
    fn inverted_scheme_inverts_literals() {
        let scheme = ColorScheme::default().inverted();
        assert!(scheme.is_inverted());
        assert_eq!(scheme.resolve("#000000"), 0xffffffff);
        assert_eq!(scheme.resolve(REGULAR_TEXT), 0xffffffff);
    }
}
