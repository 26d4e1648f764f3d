//! Layered text style resolution.
//!
//! A resolved style is a chain: a [`ForcedStyle`] built from a paragraph
//! style entry sits on top of decorated styles built from the
//! [`DecorationTable`], which sit on top of the [`DefaultTextStyle`]. Each
//! layer answers the properties it sets and defers everything else to its
//! base.

use core::fmt;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cascade::CascadeConfig;
use crate::color::{
    color_style, ColorScheme, BOOK_HYPERLINK, EXTERNAL_HYPERLINK, INTERNAL_HYPERLINK,
    REGULAR_TEXT,
};
use crate::paragraph::ParagraphEntry;
use crate::style_entry::{
    clamp_i16, scale_font_size, Alignment, FontModifier, Length, LengthKind, Metrics, SizeUnit,
    StyleEntry,
};
use crate::stylesheet::Boolean3;

/// Resolved text style as seen by layout.
pub trait TextStyle: fmt::Debug + Send + Sync {
    /// The style this one decorates, if any.
    fn base(&self) -> Option<&Arc<dyn TextStyle>> {
        None
    }

    fn is_decorated(&self) -> bool {
        self.base().is_some()
    }

    fn font_families(&self) -> &[String];
    /// Font size in pixels.
    fn font_size(&self) -> i32;
    fn bold(&self) -> bool;
    fn italic(&self) -> bool;
    /// Color style name, resolved through a [`ColorScheme`].
    fn color_style(&self) -> &str;
    fn space_before(&self, metrics: &Metrics) -> i16;
    fn space_after(&self, metrics: &Metrics) -> i16;
    fn line_start_indent(&self, metrics: &Metrics, rtl: bool) -> i16;
    fn line_end_indent(&self, metrics: &Metrics, rtl: bool) -> i16;
    fn first_line_indent_delta(&self, metrics: &Metrics) -> i16;
    fn vertical_shift(&self) -> i32;
    fn alignment(&self) -> Alignment;
    /// Line height as a multiple of the font size.
    fn line_space(&self) -> f64;
    fn allow_hyphenations(&self) -> bool;
}

/// The undecorated style at the bottom of every chain.
pub fn root_style(style: &dyn TextStyle) -> &dyn TextStyle {
    let mut current = style;
    while let Some(base) = current.base() {
        current = base.as_ref();
    }
    current
}

/// Two styles lay text out identically.
pub fn equal_layout(a: &dyn TextStyle, b: &dyn TextStyle) -> bool {
    a.font_size() == b.font_size()
}

/// Font size of the default style at a given screen density. Always even.
pub fn default_font_size(ppi: u32) -> i32 {
    let size = i64::from(ppi) * 26 / 330;
    (size.min(i64::from(i32::MAX)) as i32) & !1
}

#[derive(Clone, Debug, PartialEq)]
pub struct DefaultTextStyle {
    families: Vec<String>,
    font_size: i32,
    line_space: f64,
}

impl DefaultTextStyle {
    pub const FONT_FAMILY: &'static str = "Times";
    pub const LINE_SPACE: f64 = 1.4;

    pub fn new(ppi: u32) -> Self {
        Self {
            families: vec![Self::FONT_FAMILY.to_string()],
            font_size: default_font_size(ppi),
            line_space: Self::LINE_SPACE,
        }
    }

    pub fn with_family(mut self, family: impl Into<String>) -> Self {
        self.families = vec![family.into()];
        self
    }

    pub fn with_line_space(mut self, line_space: f64) -> Self {
        self.line_space = line_space;
        self
    }
}

impl TextStyle for DefaultTextStyle {
    fn font_families(&self) -> &[String] {
        &self.families
    }

    fn font_size(&self) -> i32 {
        self.font_size
    }

    fn bold(&self) -> bool {
        false
    }

    fn italic(&self) -> bool {
        false
    }

    fn color_style(&self) -> &str {
        REGULAR_TEXT
    }

    fn space_before(&self, _metrics: &Metrics) -> i16 {
        0
    }

    fn space_after(&self, _metrics: &Metrics) -> i16 {
        0
    }

    fn line_start_indent(&self, _metrics: &Metrics, _rtl: bool) -> i16 {
        0
    }

    fn line_end_indent(&self, _metrics: &Metrics, _rtl: bool) -> i16 {
        0
    }

    fn first_line_indent_delta(&self, _metrics: &Metrics) -> i16 {
        0
    }

    fn vertical_shift(&self) -> i32 {
        0
    }

    fn alignment(&self) -> Alignment {
        Alignment::Left
    }

    fn line_space(&self) -> f64 {
        self.line_space
    }

    fn allow_hyphenations(&self) -> bool {
        true
    }
}

/// Semantic kind of a text run or paragraph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TextKind {
    Regular = 0,
    Title = 1,
    SectionTitle = 2,
    H1 = 3,
    H2 = 4,
    H3 = 5,
    H4 = 6,
    H5 = 7,
    H6 = 8,
    Emphasis = 9,
    Strong = 10,
    Bold = 11,
    Italic = 12,
    Code = 13,
    Cite = 14,
    Sub = 15,
    Sup = 16,
    Strikethrough = 17,
    Preformatted = 18,
    Blockquote = 19,
    Definition = 20,
    DefinitionDescription = 21,
    InternalHyperlink = 22,
    ExternalHyperlink = 23,
    BookHyperlink = 24,
    Footnote = 25,
    Image = 26,
}

impl TextKind {
    pub const ALL: [TextKind; 27] = [
        Self::Regular,
        Self::Title,
        Self::SectionTitle,
        Self::H1,
        Self::H2,
        Self::H3,
        Self::H4,
        Self::H5,
        Self::H6,
        Self::Emphasis,
        Self::Strong,
        Self::Bold,
        Self::Italic,
        Self::Code,
        Self::Cite,
        Self::Sub,
        Self::Sup,
        Self::Strikethrough,
        Self::Preformatted,
        Self::Blockquote,
        Self::Definition,
        Self::DefinitionDescription,
        Self::InternalHyperlink,
        Self::ExternalHyperlink,
        Self::BookHyperlink,
        Self::Footnote,
        Self::Image,
    ];

    pub fn from_u8(raw: u8) -> Option<Self> {
        Self::ALL.get(usize::from(raw)).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Title => "title",
            Self::SectionTitle => "section-title",
            Self::H1 => "h1",
            Self::H2 => "h2",
            Self::H3 => "h3",
            Self::H4 => "h4",
            Self::H5 => "h5",
            Self::H6 => "h6",
            Self::Emphasis => "emphasis",
            Self::Strong => "strong",
            Self::Bold => "bold",
            Self::Italic => "italic",
            Self::Code => "code",
            Self::Cite => "cite",
            Self::Sub => "sub",
            Self::Sup => "sup",
            Self::Strikethrough => "strikethrough",
            Self::Preformatted => "preformatted",
            Self::Blockquote => "blockquote",
            Self::Definition => "definition",
            Self::DefinitionDescription => "definition-description",
            Self::InternalHyperlink => "internal-hyperlink",
            Self::ExternalHyperlink => "external-hyperlink",
            Self::BookHyperlink => "book-hyperlink",
            Self::Footnote => "footnote",
            Self::Image => "image",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.name() == name)
    }

    /// Heading kind for `h1`..`h6`; levels outside 1..=6 clamp.
    pub fn heading(level: u8) -> Self {
        match level {
            0 | 1 => Self::H1,
            2 => Self::H2,
            3 => Self::H3,
            4 => Self::H4,
            5 => Self::H5,
            _ => Self::H6,
        }
    }

    pub fn is_hyperlink(self) -> bool {
        matches!(
            self,
            Self::InternalHyperlink | Self::ExternalHyperlink | Self::BookHyperlink | Self::Footnote
        )
    }
}

impl fmt::Display for TextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Block-level overrides carried by a full decoration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FullDecoration {
    pub space_before: Length,
    pub space_after: Length,
    pub line_start_indent: Length,
    pub line_end_indent: Length,
    pub first_line_indent: Length,
    /// `Undefined` keeps the base alignment.
    pub alignment: Alignment,
    /// `None` keeps the base line spacing.
    pub line_space_percent: Option<u16>,
}

impl Default for FullDecoration {
    fn default() -> Self {
        Self {
            space_before: Length::px(0),
            space_after: Length::px(0),
            line_start_indent: Length::px(0),
            line_end_indent: Length::px(0),
            first_line_indent: Length::px(0),
            alignment: Alignment::Undefined,
            line_space_percent: None,
        }
    }
}

/// Per-kind style overrides.
///
/// Without [`FullDecoration`] only character-level properties change;
/// with it, spacing, indents, alignment and line spacing are replaced too.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StyleDecoration {
    pub name: String,
    pub font_family: Option<String>,
    /// Added to the base font size, in pixels.
    pub font_size_delta: i32,
    pub bold: Boolean3,
    pub italic: Boolean3,
    /// Added to the base vertical shift.
    pub vertical_shift: i32,
    pub allow_hyphenations: Boolean3,
    pub color_style: Option<String>,
    /// Overrides the first-line indent of both partial and full decorations.
    pub first_line_indent: Option<Length>,
    pub full: Option<FullDecoration>,
}

impl StyleDecoration {
    pub fn partial(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn full(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            full: Some(FullDecoration::default()),
            ..Self::default()
        }
    }

    pub fn with_font_family(mut self, family: impl Into<String>) -> Self {
        self.font_family = Some(family.into());
        self
    }

    pub fn with_font_size_delta(mut self, delta: i32) -> Self {
        self.font_size_delta = delta;
        self
    }

    pub fn with_bold(mut self, bold: bool) -> Self {
        self.bold = bold.into();
        self
    }

    pub fn with_italic(mut self, italic: bool) -> Self {
        self.italic = italic.into();
        self
    }

    pub fn with_vertical_shift(mut self, shift: i32) -> Self {
        self.vertical_shift = shift;
        self
    }

    pub fn with_allow_hyphenations(mut self, allow: bool) -> Self {
        self.allow_hyphenations = allow.into();
        self
    }

    pub fn with_color_style(mut self, style: impl Into<String>) -> Self {
        self.color_style = Some(style.into());
        self
    }

    pub fn with_first_line_indent(mut self, indent: Length) -> Self {
        self.first_line_indent = Some(indent);
        self
    }

    /// Edit the block-level part, turning this into a full decoration.
    pub fn with_full(mut self, edit: impl FnOnce(&mut FullDecoration)) -> Self {
        edit(self.full.get_or_insert_with(FullDecoration::default));
        self
    }

    /// Wrap `base` in the decorated style this decoration describes.
    pub fn decorate(self: &Arc<Self>, base: Arc<dyn TextStyle>) -> Arc<dyn TextStyle> {
        if self.full.is_some() {
            Arc::new(FullDecoratedStyle::new(base, Arc::clone(self)))
        } else {
            Arc::new(PartialDecoratedStyle::new(base, Arc::clone(self)))
        }
    }

    fn families(&self) -> Vec<String> {
        self.font_family
            .iter()
            .filter(|family| !family.is_empty())
            .cloned()
            .collect()
    }
}

fn pick(flag: Boolean3, fallback: impl FnOnce() -> bool) -> bool {
    flag.value().unwrap_or_else(fallback)
}

#[derive(Debug)]
pub struct PartialDecoratedStyle {
    base: Arc<dyn TextStyle>,
    decoration: Arc<StyleDecoration>,
    families: Vec<String>,
}

impl PartialDecoratedStyle {
    pub fn new(base: Arc<dyn TextStyle>, decoration: Arc<StyleDecoration>) -> Self {
        let families = decoration.families();
        Self {
            base,
            decoration,
            families,
        }
    }
}

impl TextStyle for PartialDecoratedStyle {
    fn base(&self) -> Option<&Arc<dyn TextStyle>> {
        Some(&self.base)
    }

    fn font_families(&self) -> &[String] {
        if self.families.is_empty() {
            self.base.font_families()
        } else {
            &self.families
        }
    }

    fn font_size(&self) -> i32 {
        self.base.font_size() + self.decoration.font_size_delta
    }

    fn bold(&self) -> bool {
        pick(self.decoration.bold, || self.base.bold())
    }

    fn italic(&self) -> bool {
        pick(self.decoration.italic, || self.base.italic())
    }

    fn color_style(&self) -> &str {
        self.decoration
            .color_style
            .as_deref()
            .filter(|style| !style.is_empty())
            .unwrap_or_else(|| self.base.color_style())
    }

    fn space_before(&self, metrics: &Metrics) -> i16 {
        self.base.space_before(metrics)
    }

    fn space_after(&self, metrics: &Metrics) -> i16 {
        self.base.space_after(metrics)
    }

    fn line_start_indent(&self, metrics: &Metrics, rtl: bool) -> i16 {
        self.base.line_start_indent(metrics, rtl)
    }

    fn line_end_indent(&self, metrics: &Metrics, rtl: bool) -> i16 {
        self.base.line_end_indent(metrics, rtl)
    }

    fn first_line_indent_delta(&self, metrics: &Metrics) -> i16 {
        match self.decoration.first_line_indent {
            Some(indent) => clamp_i16(indent.hlength(metrics)),
            None => self.base.first_line_indent_delta(metrics),
        }
    }

    fn vertical_shift(&self) -> i32 {
        self.base.vertical_shift() + self.decoration.vertical_shift
    }

    fn alignment(&self) -> Alignment {
        self.base.alignment()
    }

    fn line_space(&self) -> f64 {
        self.base.line_space()
    }

    fn allow_hyphenations(&self) -> bool {
        pick(self.decoration.allow_hyphenations, || {
            self.base.allow_hyphenations()
        })
    }
}

#[derive(Debug)]
pub struct FullDecoratedStyle {
    base: Arc<dyn TextStyle>,
    decoration: Arc<StyleDecoration>,
    full: FullDecoration,
    families: Vec<String>,
}

impl FullDecoratedStyle {
    pub fn new(base: Arc<dyn TextStyle>, decoration: Arc<StyleDecoration>) -> Self {
        let families = decoration.families();
        let full = decoration.full.clone().unwrap_or_default();
        Self {
            base,
            decoration,
            full,
            families,
        }
    }
}

impl TextStyle for FullDecoratedStyle {
    fn base(&self) -> Option<&Arc<dyn TextStyle>> {
        Some(&self.base)
    }

    fn font_families(&self) -> &[String] {
        if self.families.is_empty() {
            self.base.font_families()
        } else {
            &self.families
        }
    }

    fn font_size(&self) -> i32 {
        self.base.font_size() + self.decoration.font_size_delta
    }

    fn bold(&self) -> bool {
        pick(self.decoration.bold, || self.base.bold())
    }

    fn italic(&self) -> bool {
        pick(self.decoration.italic, || self.base.italic())
    }

    fn color_style(&self) -> &str {
        self.decoration
            .color_style
            .as_deref()
            .filter(|style| !style.is_empty())
            .unwrap_or_else(|| self.base.color_style())
    }

    fn space_before(&self, metrics: &Metrics) -> i16 {
        clamp_i16(self.full.space_before.vlength(metrics))
    }

    fn space_after(&self, metrics: &Metrics) -> i16 {
        clamp_i16(self.full.space_after.vlength(metrics))
    }

    fn line_start_indent(&self, metrics: &Metrics, rtl: bool) -> i16 {
        let own = if rtl {
            self.full.line_end_indent
        } else {
            self.full.line_start_indent
        };
        clamp_i16(i32::from(self.base.line_start_indent(metrics, rtl)) + own.hlength(metrics))
    }

    fn line_end_indent(&self, metrics: &Metrics, rtl: bool) -> i16 {
        let own = if rtl {
            self.full.line_start_indent
        } else {
            self.full.line_end_indent
        };
        clamp_i16(i32::from(self.base.line_end_indent(metrics, rtl)) + own.hlength(metrics))
    }

    fn first_line_indent_delta(&self, metrics: &Metrics) -> i16 {
        if self.alignment() == Alignment::Center {
            return 0;
        }
        let indent = self
            .decoration
            .first_line_indent
            .unwrap_or(self.full.first_line_indent);
        clamp_i16(indent.hlength(metrics))
    }

    fn vertical_shift(&self) -> i32 {
        self.base.vertical_shift() + self.decoration.vertical_shift
    }

    fn alignment(&self) -> Alignment {
        match self.full.alignment {
            Alignment::Undefined => self.base.alignment(),
            alignment => alignment,
        }
    }

    fn line_space(&self) -> f64 {
        match self.full.line_space_percent {
            Some(percent) => f64::from(percent) / 100.0,
            None => self.base.line_space(),
        }
    }

    fn allow_hyphenations(&self) -> bool {
        pick(self.decoration.allow_hyphenations, || {
            self.base.allow_hyphenations()
        })
    }
}

/// Style entry from the paragraph stream applied over a base style.
#[derive(Debug)]
pub struct ForcedStyle {
    base: Arc<dyn TextStyle>,
    entry: StyleEntry,
    color_style: Option<String>,
    override_specified_fonts: bool,
}

impl ForcedStyle {
    pub fn new(base: Arc<dyn TextStyle>, entry: StyleEntry) -> Self {
        let color_style = entry.color().map(color_style);
        Self {
            base,
            entry,
            color_style,
            override_specified_fonts: false,
        }
    }

    /// Ignore the entry's font families in favor of the base's.
    pub fn with_override_specified_fonts(mut self, value: bool) -> Self {
        self.override_specified_fonts = value;
        self
    }

    pub fn entry(&self) -> &StyleEntry {
        &self.entry
    }

    /// One horizontal indent. `own` is the base value on this side and
    /// `opposite` the base value on the other side.
    fn indent(&self, kind: LengthKind, own: i16, opposite: i16, metrics: &Metrics) -> i16 {
        let Some(length) = self.entry.length(kind) else {
            return own;
        };
        let mut adjusted = *metrics;
        adjusted.full_width =
            (metrics.full_width - i32::from(own) - i32::from(opposite)).max(0);
        if length.unit != SizeUnit::Auto {
            return clamp_i16(i32::from(own) + length.hlength(&adjusted));
        }
        if self.entry.auto_left_right_margins() {
            if let Some(width) = self.entry.length(LengthKind::Width) {
                let free = (adjusted.full_width - width.hlength(&adjusted)).max(0);
                return clamp_i16(free / 2);
            }
        }
        own
    }

    fn modifier(&self, modifier: FontModifier, fallback: impl FnOnce() -> bool) -> bool {
        self.entry.font_modifier(modifier).unwrap_or_else(fallback)
    }
}

impl TextStyle for ForcedStyle {
    fn base(&self) -> Option<&Arc<dyn TextStyle>> {
        Some(&self.base)
    }

    fn font_families(&self) -> &[String] {
        match self.entry.font_families() {
            Some(families) if !self.override_specified_fonts => families,
            _ => self.base.font_families(),
        }
    }

    /// Magnitudes scale the root size, not the decorated one.
    fn font_size(&self) -> i32 {
        match self.entry.font_size_mag() {
            Some(mag) => scale_font_size(root_style(self).font_size(), mag),
            None => self.base.font_size(),
        }
    }

    fn bold(&self) -> bool {
        self.modifier(FontModifier::Bold, || self.base.bold())
    }

    fn italic(&self) -> bool {
        self.modifier(FontModifier::Italic, || self.base.italic())
    }

    fn color_style(&self) -> &str {
        self.color_style
            .as_deref()
            .unwrap_or_else(|| self.base.color_style())
    }

    fn space_before(&self, metrics: &Metrics) -> i16 {
        self.entry
            .length_px(LengthKind::SpaceBefore, metrics)
            .unwrap_or_else(|| self.base.space_before(metrics))
    }

    fn space_after(&self, metrics: &Metrics) -> i16 {
        self.entry
            .length_px(LengthKind::SpaceAfter, metrics)
            .unwrap_or_else(|| self.base.space_after(metrics))
    }

    fn line_start_indent(&self, metrics: &Metrics, rtl: bool) -> i16 {
        let kind = if rtl {
            LengthKind::RightIndent
        } else {
            LengthKind::LeftIndent
        };
        let own = self.base.line_start_indent(metrics, rtl);
        if !self.entry.length_supported(kind) {
            return own;
        }
        let opposite = self.base.line_end_indent(metrics, rtl);
        self.indent(kind, own, opposite, metrics)
    }

    fn line_end_indent(&self, metrics: &Metrics, rtl: bool) -> i16 {
        let kind = if rtl {
            LengthKind::LeftIndent
        } else {
            LengthKind::RightIndent
        };
        let own = self.base.line_end_indent(metrics, rtl);
        if !self.entry.length_supported(kind) {
            return own;
        }
        let opposite = self.base.line_start_indent(metrics, rtl);
        self.indent(kind, own, opposite, metrics)
    }

    fn first_line_indent_delta(&self, metrics: &Metrics) -> i16 {
        self.entry
            .length_px(LengthKind::FirstLineIndentDelta, metrics)
            .unwrap_or_else(|| self.base.first_line_indent_delta(metrics))
    }

    fn vertical_shift(&self) -> i32 {
        self.base.vertical_shift()
    }

    fn alignment(&self) -> Alignment {
        match self.entry.alignment() {
            Some(alignment) if alignment != Alignment::Undefined => alignment,
            _ => self.base.alignment(),
        }
    }

    fn line_space(&self) -> f64 {
        self.base.line_space()
    }

    fn allow_hyphenations(&self) -> bool {
        self.base.allow_hyphenations()
    }
}

/// Decorations keyed by text kind.
#[derive(Clone, Debug, Default)]
pub struct DecorationTable {
    decorations: BTreeMap<TextKind, Arc<StyleDecoration>>,
}

impl DecorationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stock reading theme.
    pub fn builtin() -> Self {
        let mut table = Self::new();
        let heading = |name: &str, delta: i32, space: i16| {
            StyleDecoration::full(name)
                .with_font_size_delta(delta)
                .with_bold(true)
                .with_allow_hyphenations(false)
                .with_full(|full| {
                    full.space_before = Length::px(space);
                    full.space_after = Length::px(space);
                    full.alignment = Alignment::Center;
                })
        };
        table.insert(TextKind::Title, heading("Title", 10, 0));
        table.insert(TextKind::SectionTitle, heading("Section Title", 6, 0));
        table.insert(TextKind::H1, heading("Header 1", 10, 12));
        table.insert(TextKind::H2, heading("Header 2", 8, 10));
        table.insert(TextKind::H3, heading("Header 3", 6, 8));
        table.insert(TextKind::H4, heading("Header 4", 4, 6));
        table.insert(TextKind::H5, heading("Header 5", 2, 6));
        table.insert(TextKind::H6, heading("Header 6", 0, 6));
        table.insert(
            TextKind::Emphasis,
            StyleDecoration::partial("Emphasis").with_italic(true),
        );
        table.insert(
            TextKind::Strong,
            StyleDecoration::partial("Strong").with_bold(true),
        );
        table.insert(TextKind::Bold, StyleDecoration::partial("Bold").with_bold(true));
        table.insert(
            TextKind::Italic,
            StyleDecoration::partial("Italic").with_italic(true),
        );
        table.insert(
            TextKind::Code,
            StyleDecoration::partial("Code")
                .with_font_family("Monospace")
                .with_allow_hyphenations(false),
        );
        table.insert(
            TextKind::Cite,
            StyleDecoration::partial("Cite").with_italic(true),
        );
        table.insert(
            TextKind::Sub,
            StyleDecoration::partial("Subscript")
                .with_font_size_delta(-4)
                .with_vertical_shift(-4)
                .with_allow_hyphenations(false),
        );
        table.insert(
            TextKind::Sup,
            StyleDecoration::partial("Superscript")
                .with_font_size_delta(-4)
                .with_vertical_shift(6)
                .with_allow_hyphenations(false),
        );
        table.insert(
            TextKind::Preformatted,
            StyleDecoration::full("Preformatted text")
                .with_font_family("Monospace")
                .with_allow_hyphenations(false)
                .with_full(|full| full.alignment = Alignment::Left),
        );
        table.insert(
            TextKind::Blockquote,
            StyleDecoration::full("Blockquote").with_full(|full| {
                full.line_start_indent = Length::px(20);
                full.line_end_indent = Length::px(20);
            }),
        );
        table.insert(
            TextKind::Definition,
            StyleDecoration::full("Definition")
                .with_bold(true)
                .with_full(|full| full.space_before = Length::px(4)),
        );
        table.insert(
            TextKind::DefinitionDescription,
            StyleDecoration::full("Definition description")
                .with_full(|full| full.line_start_indent = Length::px(20)),
        );
        table.insert(
            TextKind::InternalHyperlink,
            StyleDecoration::partial("Internal hyperlink")
                .with_color_style(INTERNAL_HYPERLINK)
                .with_allow_hyphenations(false),
        );
        table.insert(
            TextKind::ExternalHyperlink,
            StyleDecoration::partial("External hyperlink")
                .with_color_style(EXTERNAL_HYPERLINK)
                .with_allow_hyphenations(false),
        );
        table.insert(
            TextKind::BookHyperlink,
            StyleDecoration::partial("Book hyperlink")
                .with_color_style(BOOK_HYPERLINK)
                .with_allow_hyphenations(false),
        );
        table.insert(
            TextKind::Footnote,
            StyleDecoration::partial("Footnote")
                .with_font_size_delta(-6)
                .with_vertical_shift(10)
                .with_color_style(INTERNAL_HYPERLINK)
                .with_allow_hyphenations(false),
        );
        table.insert(
            TextKind::Image,
            StyleDecoration::full("Image").with_full(|full| full.alignment = Alignment::Center),
        );
        table
    }

    /// Add or replace the decoration for `kind`.
    pub fn insert(&mut self, kind: TextKind, decoration: StyleDecoration) {
        self.decorations.insert(kind, Arc::new(decoration));
    }

    pub fn get(&self, kind: TextKind) -> Option<&Arc<StyleDecoration>> {
        self.decorations.get(&kind)
    }

    pub fn len(&self) -> usize {
        self.decorations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decorations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TextKind, &Arc<StyleDecoration>)> {
        self.decorations.iter().map(|(kind, deco)| (*kind, deco))
    }

    /// Decorate `base` for `kind`. Kinds without a decoration reuse `base`.
    pub fn decorate(&self, base: &Arc<dyn TextStyle>, kind: TextKind) -> Arc<dyn TextStyle> {
        match self.get(kind) {
            Some(decoration) => decoration.decorate(Arc::clone(base)),
            None => Arc::clone(base),
        }
    }
}

/// Everything style resolution needs for one document.
#[derive(Clone, Debug)]
pub struct StyleEnvironment {
    base: Arc<dyn TextStyle>,
    decorations: DecorationTable,
    colors: ColorScheme,
    config: CascadeConfig,
}

impl Default for StyleEnvironment {
    fn default() -> Self {
        Self::new(CascadeConfig::default())
    }
}

impl StyleEnvironment {
    pub fn new(config: CascadeConfig) -> Self {
        Self {
            base: Arc::new(DefaultTextStyle::new(config.ppi)),
            decorations: DecorationTable::builtin(),
            colors: ColorScheme::default(),
            config,
        }
    }

    pub fn with_base(mut self, base: Arc<dyn TextStyle>) -> Self {
        self.base = base;
        self
    }

    pub fn with_decorations(mut self, decorations: DecorationTable) -> Self {
        self.decorations = decorations;
        self
    }

    pub fn with_color_scheme(mut self, colors: ColorScheme) -> Self {
        self.colors = colors;
        self
    }

    pub fn base(&self) -> &Arc<dyn TextStyle> {
        &self.base
    }

    pub fn decorations(&self) -> &DecorationTable {
        &self.decorations
    }

    pub fn color_scheme(&self) -> &ColorScheme {
        &self.colors
    }

    pub fn config(&self) -> &CascadeConfig {
        &self.config
    }

    /// Apply a paragraph style entry over `base`.
    pub fn forced(&self, base: &Arc<dyn TextStyle>, entry: StyleEntry) -> Arc<dyn TextStyle> {
        Arc::new(
            ForcedStyle::new(Arc::clone(base), entry)
                .with_override_specified_fonts(self.config.override_specified_fonts),
        )
    }

    /// ARGB color of a resolved style.
    pub fn color_of(&self, style: &dyn TextStyle) -> u32 {
        self.colors.resolve(style.color_style())
    }
}

/// Style stack driven by decoded paragraph entries.
///
/// Start controls push a decorated style and style entries push a forced
/// style; every end control pops one level. The environment base is never
/// popped.
#[derive(Debug)]
pub struct StyleCursor<'e> {
    env: &'e StyleEnvironment,
    stack: Vec<Arc<dyn TextStyle>>,
}

impl<'e> StyleCursor<'e> {
    pub fn new(env: &'e StyleEnvironment) -> Self {
        Self {
            env,
            stack: vec![Arc::clone(env.base())],
        }
    }

    pub fn current(&self) -> &Arc<dyn TextStyle> {
        // The stack always holds the base.
        &self.stack[self.stack.len() - 1]
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn apply(&mut self, entry: &ParagraphEntry<'_>) {
        match entry {
            ParagraphEntry::Control { kind, start: true }
            | ParagraphEntry::HyperlinkControl { kind, .. } => {
                let next = self.env.decorations().decorate(self.current(), *kind);
                self.stack.push(next);
            }
            ParagraphEntry::Control { start: false, .. } => {
                if self.stack.len() > 1 {
                    self.stack.pop();
                }
            }
            ParagraphEntry::Style(style) => {
                let next = self.env.forced(self.current(), style.clone());
                self.stack.push(next);
            }
            _ => {}
        }
    }

    /// Back to the base style, for the start of a new paragraph.
    pub fn reset(&mut self) {
        self.stack.truncate(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use crate::style_entry::FontModifier;

    fn metrics() -> Metrics {
        Metrics::new(20, 10, 600, 800)
    }

    fn base() -> Arc<dyn TextStyle> {
        Arc::new(DefaultTextStyle::new(330))
    }

    #[test]
    fn default_style_values() {
        let style = DefaultTextStyle::new(330);
        assert_eq!(style.font_families(), ["Times".to_string()]);
        assert_eq!(style.font_size(), 26);
        assert_eq!(style.alignment(), Alignment::Left);
        assert!(style.allow_hyphenations());
        assert_eq!(style.color_style(), REGULAR_TEXT);
        assert!(!style.is_decorated());
        assert_eq!(default_font_size(160), 12);
        assert_eq!(default_font_size(250), 18);
    }

    #[test]
    fn unset_family_falls_through_to_times() {
        let mut entry = StyleEntry::new();
        entry.set_font_modifier(FontModifier::Bold, true);
        let forced = ForcedStyle::new(base(), entry);
        assert_eq!(forced.font_families(), ["Times".to_string()]);
        assert!(forced.bold());
        assert!(!forced.italic());
    }

    #[test]
    fn forced_families_respect_override_flag() {
        let mut entry = StyleEntry::new();
        entry.set_font_families(vec!["Georgia".into()]);
        let forced = ForcedStyle::new(base(), entry.clone());
        assert_eq!(forced.font_families(), ["Georgia".to_string()]);
        let overridden = ForcedStyle::new(base(), entry).with_override_specified_fonts(true);
        assert_eq!(overridden.font_families(), ["Times".to_string()]);
    }

    #[test]
    fn forced_font_size_scales_the_root_size() {
        let table = DecorationTable::builtin();
        let heading = table.decorate(&base(), TextKind::H1);
        assert_eq!(heading.font_size(), 36);
        let mut entry = StyleEntry::new();
        entry.set_font_size_mag(1);
        let forced = ForcedStyle::new(heading, entry);
        // 26 * 6 / 5, ignoring the heading delta.
        assert_eq!(forced.font_size(), 31);
        assert_eq!(root_style(&forced).font_size(), 26);
    }

    #[test]
    fn mag_up_then_down_returns_near_original() {
        let size = 26;
        let up = scale_font_size(size, 1);
        let back = scale_font_size(up, -1);
        assert!((back - size).abs() <= 1);
    }

    #[test]
    fn decoded_extreme_mag_stays_in_range() {
        use crate::paragraph::{Paragraph, ParagraphKind};

        let env = StyleEnvironment::default();
        for mag in [i8::MAX, i8::MIN] {
            let mut entry = StyleEntry::new();
            entry.set_font_size_mag(mag);
            let mut paragraph = Paragraph::new(ParagraphKind::Text);
            paragraph.add_style_entry(&entry).expect("entry should encode");
            let decoded =
                Paragraph::from_bytes(ParagraphKind::Text, paragraph.as_bytes().to_vec())
                    .expect("paragraph should validate");

            let mut cursor = StyleCursor::new(&env);
            for item in decoded.iter() {
                let item = item.expect("entry should be well-formed");
                cursor.apply(&item.decode().expect("entry should decode"));
            }
            let current = cursor.current();
            let root = root_style(current.as_ref()).font_size();
            let size = current.font_size();
            assert_eq!(size, scale_font_size(root, mag.signum() * 16), "mag {mag}");
            assert!(size > 0);
        }
    }

    #[test]
    fn forced_indents_add_to_base_and_swap_for_rtl() {
        let mut entry = StyleEntry::new();
        entry.set_length(LengthKind::LeftIndent, 10, SizeUnit::Pixel);
        entry.set_length(LengthKind::RightIndent, 50, SizeUnit::Percent);
        let blockquote = DecorationTable::builtin().decorate(&base(), TextKind::Blockquote);
        let forced = ForcedStyle::new(blockquote, entry);
        let m = metrics();
        assert_eq!(forced.line_start_indent(&m, false), 30);
        // 20 + 50% of (600 - 20 - 20).
        assert_eq!(forced.line_end_indent(&m, false), 300);
        assert_eq!(forced.line_start_indent(&m, true), 300);
        assert_eq!(forced.line_end_indent(&m, true), 30);
    }

    #[test]
    fn unsupported_end_indent_uses_base_end_indent() {
        let mut entry = StyleEntry::new();
        entry.set_length(LengthKind::LeftIndent, 5, SizeUnit::Pixel);
        let blockquote = DecorationTable::builtin().decorate(&base(), TextKind::Blockquote);
        let forced = ForcedStyle::new(blockquote, entry);
        assert_eq!(forced.line_end_indent(&metrics(), false), 20);
    }

    #[test]
    fn auto_margins_center_fixed_width() {
        let mut entry = StyleEntry::new();
        entry.set_length(LengthKind::LeftIndent, 0, SizeUnit::Auto);
        entry.set_length(LengthKind::RightIndent, 0, SizeUnit::Auto);
        entry.set_length(LengthKind::Width, 200, SizeUnit::Pixel);
        let forced = ForcedStyle::new(base(), entry);
        let m = metrics();
        assert_eq!(forced.line_start_indent(&m, false), 200);
        assert_eq!(forced.line_end_indent(&m, false), 200);

        let mut wide = StyleEntry::new();
        wide.set_length(LengthKind::LeftIndent, 0, SizeUnit::Auto);
        wide.set_length(LengthKind::RightIndent, 0, SizeUnit::Auto);
        wide.set_length(LengthKind::Width, 900, SizeUnit::Pixel);
        let forced = ForcedStyle::new(base(), wide);
        assert_eq!(forced.line_start_indent(&m, false), 0);
    }

    #[test]
    fn auto_margin_without_width_keeps_base() {
        let mut entry = StyleEntry::new();
        entry.set_length(LengthKind::LeftIndent, 0, SizeUnit::Auto);
        let forced = ForcedStyle::new(base(), entry);
        assert_eq!(forced.line_start_indent(&metrics(), false), 0);
    }

    #[test]
    fn forced_spacing_and_color() {
        let mut entry = StyleEntry::new();
        entry.set_length(LengthKind::SpaceBefore, 150, SizeUnit::Em100);
        entry.set_color(Color::new(0x12, 0x34, 0x56));
        entry.set_alignment(Alignment::Justify);
        let forced = ForcedStyle::new(base(), entry);
        let m = metrics();
        assert_eq!(forced.space_before(&m), 30);
        assert_eq!(forced.space_after(&m), 0);
        assert_eq!(forced.color_style(), "#123456");
        assert_eq!(forced.alignment(), Alignment::Justify);
        assert!((forced.line_space() - 1.4).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_decoration_overrides_character_properties_only() {
        let deco = Arc::new(
            StyleDecoration::partial("x")
                .with_font_size_delta(-4)
                .with_italic(true)
                .with_vertical_shift(3)
                .with_color_style(EXTERNAL_HYPERLINK),
        );
        let style = deco.decorate(base());
        let m = metrics();
        assert_eq!(style.font_size(), 22);
        assert!(style.italic());
        assert!(!style.bold());
        assert_eq!(style.vertical_shift(), 3);
        assert_eq!(style.color_style(), EXTERNAL_HYPERLINK);
        assert_eq!(style.alignment(), Alignment::Left);
        assert_eq!(style.space_before(&m), 0);
        assert!(style.is_decorated());
    }

    #[test]
    fn full_decoration_centered_has_no_first_line_indent() {
        let deco = Arc::new(
            StyleDecoration::full("x")
                .with_first_line_indent(Length::px(15))
                .with_full(|full| {
                    full.alignment = Alignment::Center;
                    full.line_space_percent = Some(120);
                }),
        );
        let style = deco.decorate(base());
        assert_eq!(style.first_line_indent_delta(&metrics()), 0);
        assert!((style.line_space() - 1.2).abs() < 1e-9);

        let left = Arc::new(
            StyleDecoration::full("y").with_full(|full| full.first_line_indent = Length::px(8)),
        );
        let style = left.decorate(base());
        assert_eq!(style.first_line_indent_delta(&metrics()), 8);
        assert_eq!(style.alignment(), Alignment::Left);
    }

    #[test]
    fn text_kind_names_and_bytes_round_trip() {
        for kind in TextKind::ALL {
            assert_eq!(TextKind::from_u8(kind as u8), Some(kind));
            assert_eq!(TextKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(TextKind::from_u8(200), None);
        assert_eq!(TextKind::heading(9), TextKind::H6);
    }

    #[test]
    fn equal_layout_compares_font_size() {
        let a = base();
        let b: Arc<dyn TextStyle> = Arc::new(DefaultTextStyle::new(330).with_family("Serif"));
        assert!(equal_layout(a.as_ref(), b.as_ref()));
        let big = DecorationTable::builtin().decorate(&a, TextKind::H2);
        assert!(!equal_layout(a.as_ref(), big.as_ref()));
    }

    #[test]
    fn cursor_pushes_and_pops_with_controls() {
        let env = StyleEnvironment::default();
        let mut cursor = StyleCursor::new(&env);
        cursor.apply(&ParagraphEntry::Control {
            kind: TextKind::Strong,
            start: true,
        });
        assert!(cursor.current().bold());
        let mut entry = StyleEntry::new();
        entry.set_font_modifier(FontModifier::Italic, true);
        cursor.apply(&ParagraphEntry::Style(entry));
        assert!(cursor.current().italic());
        assert!(cursor.current().bold());
        assert_eq!(cursor.depth(), 3);
        for _ in 0..5 {
            cursor.apply(&ParagraphEntry::Control {
                kind: TextKind::Regular,
                start: false,
            });
        }
        assert_eq!(cursor.depth(), 1);
        assert!(!cursor.current().bold());
    }

    #[test]
    fn environment_resolves_colors_through_scheme() {
        let env = StyleEnvironment::default()
            .with_color_scheme(ColorScheme::from_spec("ih=ff0000"));
        let link = env
            .decorations()
            .decorate(env.base(), TextKind::InternalHyperlink);
        assert_eq!(env.color_of(link.as_ref()), 0xffff0000);
        assert_eq!(env.color_of(env.base().as_ref()), 0xff000000);
    }
}
