//! JSON reading themes for `epub-cascade`.
//!
//! A theme overrides the base font family and line spacing, replaces the
//! decorations of individual text kinds and picks a color scheme. Kinds the
//! theme does not mention keep their built-in decoration.
//!
//! ```
//! let theme = epub_cascade_theme::load_theme(r#"{
//!     "base": { "family": "Georgia", "line_space_percent": 150 },
//!     "color_scheme": "night",
//!     "decorations": [ { "kind": "h1", "font_size_delta": 14, "bold": true } ]
//! }"#).unwrap();
//! let env = theme.into_environment(Default::default());
//! assert!(env.color_scheme().is_inverted());
//! ```

use std::fmt;
use std::sync::Arc;

use epub_cascade::color::ColorScheme;
use epub_cascade::decoration::{
    DecorationTable, DefaultTextStyle, FullDecoration, StyleDecoration, StyleEnvironment,
    TextKind,
};
use epub_cascade::style_entry::{parse_margin, Alignment, Length};
use epub_cascade::CascadeConfig;
use serde::{Deserialize, Serialize};

/// Scheme name selecting the inverted default palette.
pub const NIGHT_SCHEME: &str = "night";

/// On-disk theme document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThemeFile {
    pub base: BaseSpec,
    /// [`NIGHT_SCHEME`] or a `key=rrggbb:...` spec.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_scheme: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub decorations: Vec<DecorationSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_space_percent: Option<u16>,
}

/// Decoration of one text kind. Lengths are CSS strings such as `"1.5em"`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecorationSpec {
    /// Kebab-case kind name, e.g. `h1` or `internal-hyperlink`.
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    pub font_size_delta: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub italic: Option<bool>,
    pub vertical_shift: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_hyphenations: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_line_indent: Option<String>,
    /// Present for block-level decorations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full: Option<FullSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FullSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub space_before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub space_after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_start_indent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_end_indent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_line_indent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alignment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_space_percent: Option<u16>,
}

#[derive(Debug)]
pub enum ThemeError {
    Json(serde_json::Error),
    Invalid { field: String, message: String },
}

impl ThemeError {
    fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ThemeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(err) => write!(f, "theme json: {}", err),
            Self::Invalid { field, message } => write!(f, "theme field {}: {}", field, message),
        }
    }
}

impl std::error::Error for ThemeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(err) => Some(err),
            Self::Invalid { .. } => None,
        }
    }
}

impl From<serde_json::Error> for ThemeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

/// A validated theme, ready to build a [`StyleEnvironment`].
#[derive(Clone, Debug)]
pub struct Theme {
    family: Option<String>,
    line_space: Option<f64>,
    decorations: DecorationTable,
    colors: ColorScheme,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            family: None,
            line_space: None,
            decorations: DecorationTable::builtin(),
            colors: ColorScheme::default(),
        }
    }
}

impl Theme {
    pub fn decorations(&self) -> &DecorationTable {
        &self.decorations
    }

    pub fn color_scheme(&self) -> &ColorScheme {
        &self.colors
    }

    pub fn into_environment(self, config: CascadeConfig) -> StyleEnvironment {
        let mut base = DefaultTextStyle::new(config.ppi);
        if let Some(family) = self.family {
            base = base.with_family(family);
        }
        if let Some(line_space) = self.line_space {
            base = base.with_line_space(line_space);
        }
        StyleEnvironment::new(config)
            .with_base(Arc::new(base))
            .with_decorations(self.decorations)
            .with_color_scheme(self.colors)
    }
}

impl TryFrom<ThemeFile> for Theme {
    type Error = ThemeError;

    fn try_from(file: ThemeFile) -> Result<Self, Self::Error> {
        let mut theme = Theme {
            family: file.base.family.filter(|f| !f.trim().is_empty()),
            ..Theme::default()
        };
        if let Some(percent) = file.base.line_space_percent {
            let percent = line_space_percent(percent, "base.line_space_percent")?;
            theme.line_space = Some(f64::from(percent) / 100.0);
        }
        if let Some(spec) = file.color_scheme.as_deref() {
            theme.colors = color_scheme(spec);
        }
        for (index, spec) in file.decorations.iter().enumerate() {
            let field = format!("decorations[{}]", index);
            let (kind, decoration) = decoration(spec, &field)?;
            log::debug!("theme overrides decoration {}", kind);
            theme.decorations.insert(kind, decoration);
        }
        Ok(theme)
    }
}

/// Parse and validate a theme document.
pub fn load_theme(json: &str) -> Result<Theme, ThemeError> {
    let file: ThemeFile = serde_json::from_str(json)?;
    Theme::try_from(file)
}

fn color_scheme(spec: &str) -> ColorScheme {
    let spec = spec.trim();
    if spec.eq_ignore_ascii_case(NIGHT_SCHEME) {
        ColorScheme::default().inverted()
    } else {
        ColorScheme::from_spec(spec)
    }
}

fn line_space_percent(percent: u16, field: &str) -> Result<u16, ThemeError> {
    if (50..=400).contains(&percent) {
        Ok(percent)
    } else {
        Err(ThemeError::invalid(
            field,
            format!("{} is outside 50..=400", percent),
        ))
    }
}

fn length(value: &str, field: String) -> Result<Length, ThemeError> {
    parse_margin(value)
        .ok_or_else(|| ThemeError::invalid(field, format!("bad length {:?}", value)))
}

fn alignment(value: &str, field: String) -> Result<Alignment, ThemeError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "undefined" | "inherit" => Ok(Alignment::Undefined),
        "left" => Ok(Alignment::Left),
        "right" => Ok(Alignment::Right),
        "center" => Ok(Alignment::Center),
        "justify" => Ok(Alignment::Justify),
        other => Err(ThemeError::invalid(field, format!("bad alignment {:?}", other))),
    }
}

fn decoration(
    spec: &DecorationSpec,
    field: &str,
) -> Result<(TextKind, StyleDecoration), ThemeError> {
    let kind = TextKind::from_name(spec.kind.trim()).ok_or_else(|| {
        ThemeError::invalid(
            format!("{}.kind", field),
            format!("unknown kind {:?}", spec.kind),
        )
    })?;
    let name = spec.name.clone().unwrap_or_else(|| kind.name().to_string());
    let mut decoration = match spec.full {
        Some(_) => StyleDecoration::full(name),
        None => StyleDecoration::partial(name),
    };
    decoration.font_family = spec.family.clone();
    decoration.font_size_delta = spec.font_size_delta;
    decoration.vertical_shift = spec.vertical_shift;
    decoration.color_style = spec.color_style.clone();
    if let Some(bold) = spec.bold {
        decoration.bold = bold.into();
    }
    if let Some(italic) = spec.italic {
        decoration.italic = italic.into();
    }
    if let Some(allow) = spec.allow_hyphenations {
        decoration.allow_hyphenations = allow.into();
    }
    if let Some(indent) = spec.first_line_indent.as_deref() {
        let indent = length(indent, format!("{}.first_line_indent", field))?;
        decoration.first_line_indent = Some(indent);
    }
    if let Some(full) = spec.full.as_ref() {
        decoration.full = Some(full_decoration(full, &format!("{}.full", field))?);
    }
    Ok((kind, decoration))
}

fn full_decoration(spec: &FullSpec, field: &str) -> Result<FullDecoration, ThemeError> {
    let mut full = FullDecoration::default();
    let lengths = [
        ("space_before", &spec.space_before, &mut full.space_before),
        ("space_after", &spec.space_after, &mut full.space_after),
        (
            "line_start_indent",
            &spec.line_start_indent,
            &mut full.line_start_indent,
        ),
        (
            "line_end_indent",
            &spec.line_end_indent,
            &mut full.line_end_indent,
        ),
        (
            "first_line_indent",
            &spec.first_line_indent,
            &mut full.first_line_indent,
        ),
    ];
    for (name, value, slot) in lengths {
        if let Some(value) = value.as_deref() {
            *slot = length(value, format!("{}.{}", field, name))?;
        }
    }
    if let Some(value) = spec.alignment.as_deref() {
        full.alignment = alignment(value, format!("{}.alignment", field))?;
    }
    if let Some(percent) = spec.line_space_percent {
        let field = format!("{}.line_space_percent", field);
        full.line_space_percent = Some(line_space_percent(percent, &field)?);
    }
    Ok(full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use epub_cascade::decoration::TextStyle;
    use epub_cascade::style_entry::SizeUnit;

    #[test]
    fn empty_theme_keeps_builtin_decorations() {
        let theme = load_theme("{}").expect("empty theme is valid");
        assert_eq!(theme.decorations().len(), DecorationTable::builtin().len());
        assert!(!theme.color_scheme().is_inverted());
    }

    #[test]
    fn base_family_and_line_space_reach_the_environment() {
        let json = r#"{ "base": { "family": "Georgia", "line_space_percent": 150 } }"#;
        let theme = load_theme(json).expect("theme should load");
        let env = theme.into_environment(CascadeConfig::default());
        assert_eq!(env.base().font_families(), &["Georgia".to_string()][..]);
        assert!((env.base().line_space() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn decoration_override_replaces_builtin() {
        let json = r#"{ "decorations": [ {
            "kind": "blockquote",
            "italic": true,
            "full": { "line_start_indent": "2em", "space_after": "6px", "alignment": "justify" }
        } ] }"#;
        let theme = load_theme(json).expect("theme should load");
        let quote = theme
            .decorations()
            .get(TextKind::Blockquote)
            .expect("blockquote decoration");
        assert_eq!(quote.name, "blockquote");
        let full = quote.full.as_ref().expect("full decoration");
        assert_eq!(full.line_start_indent, Length::new(200, SizeUnit::Em100));
        assert_eq!(full.space_after, Length::px(6));
        assert_eq!(full.alignment, Alignment::Justify);
        assert_eq!(full.line_end_indent, Length::px(0));
    }

    #[test]
    fn night_scheme_inverts_palette() {
        let theme = load_theme(r#"{ "color_scheme": "night" }"#).expect("theme should load");
        assert!(theme.color_scheme().is_inverted());
        let custom = load_theme(r#"{ "color_scheme": "bg=101010:fg=e0e0e0" }"#)
            .expect("theme should load");
        assert_eq!(custom.color_scheme().background.rgb(), 0x101010);
    }

    #[test]
    fn unknown_kind_is_invalid() {
        let err = load_theme(r#"{ "decorations": [ { "kind": "marquee" } ] }"#)
            .expect_err("kind is unknown");
        match err {
            ThemeError::Invalid { field, .. } => assert_eq!(field, "decorations[0].kind"),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn bad_length_names_the_field() {
        let json = r#"{ "decorations": [ { "kind": "h2", "full": { "space_before": "wide" } } ] }"#;
        let err = load_theme(json).expect_err("length is malformed");
        assert!(err.to_string().contains("decorations[0].full.space_before"));
    }

    #[test]
    fn malformed_json_is_a_json_error() {
        let err = load_theme("{ \"base\": ").expect_err("json is truncated");
        assert!(matches!(err, ThemeError::Json(_)));
    }

    #[test]
    fn theme_file_serializes_sparse() {
        let file = ThemeFile {
            color_scheme: Some(NIGHT_SCHEME.to_string()),
            ..ThemeFile::default()
        };
        let json = serde_json::to_string(&file).expect("serializes");
        assert_eq!(json, r#"{"base":{},"color_scheme":"night"}"#);
        let back: ThemeFile = serde_json::from_str(&json).expect("parses back");
        assert_eq!(back, file);
    }
}
