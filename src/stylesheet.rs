//! Selectors, rules and the cascade table.
//!
//! A [`StyleSheetTable`] is filled once from stylesheet text and then
//! queried for every element the markup reader opens. Matching uses the
//! ancestor path of the element, target last.

use core::fmt;
use std::collections::BTreeMap;

use smallvec::SmallVec;

use crate::color::{color_style, parse_css_color};
use crate::style_entry::{
    font_size_mag_from_percent, font_size_percent, leading_float_opt, parse_length,
    parse_margin, Alignment, FontModifier, Length, LengthKind, SizeUnit, StyleEntry,
};

/// Declarations of one rule body: property name to collected values.
pub type AttributeMap = BTreeMap<String, Vec<String>>;

/// One open element as seen by selector matching.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Element {
    /// Lowercased tag name without namespace prefix.
    pub name: String,
    pub classes: SmallVec<[String; 2]>,
    pub id: String,
}

impl Element {
    /// Build from a tag name and the raw `class` / `id` attribute values.
    pub fn new(name: impl Into<String>, class: Option<&str>, id: Option<&str>) -> Self {
        Self {
            name: name.into(),
            classes: class
                .map(|c| c.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            id: id.unwrap_or_default().to_string(),
        }
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }
}

/// One compound simple selector: `type.class#id`.
///
/// An empty or `*` component matches anything. Several classes (`.a.b`)
/// must all be present on the element.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector {
    pub type_name: String,
    pub classes: SmallVec<[String; 1]>,
    pub id: String,
}

impl Selector {
    /// Parse one compound selector token.
    ///
    /// Returns `None` for syntax the cascade cannot evaluate: attribute
    /// selectors, pseudo-classes and pseudo-elements.
    pub fn parse(token: &str) -> Option<Self> {
        if token.is_empty() || token.contains([':', '[', ']', '(', ')']) {
            return None;
        }
        let mut selector = Selector::default();
        let mut rest = token;
        let type_end = rest.find(['.', '#']).unwrap_or(rest.len());
        selector.type_name = rest[..type_end].to_ascii_lowercase();
        rest = &rest[type_end..];
        while let Some(marker) = rest.chars().next() {
            let body = &rest[1..];
            let end = body.find(['.', '#']).unwrap_or(body.len());
            let name = &body[..end];
            if name.is_empty() {
                return None;
            }
            if marker == '.' {
                if name != "*" {
                    selector.classes.push(name.to_string());
                }
            } else {
                selector.id = name.to_string();
            }
            rest = &body[end..];
        }
        Some(selector)
    }

    /// 1 when an id component is present.
    pub fn a(&self) -> u32 {
        u32::from(!is_wildcard(&self.id))
    }

    /// 1 when at least one class is present.
    pub fn b(&self) -> u32 {
        u32::from(!self.classes.is_empty())
    }

    /// 1 when a type component is present.
    pub fn c(&self) -> u32 {
        u32::from(!is_wildcard(&self.type_name))
    }

    pub fn matches(&self, element: &Element) -> bool {
        (is_wildcard(&self.type_name) || self.type_name == element.name)
            && self.classes.iter().all(|class| element.has_class(class))
            && (is_wildcard(&self.id) || self.id == element.id)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.type_name)?;
        for class in &self.classes {
            write!(f, ".{}", class)?;
        }
        if !self.id.is_empty() {
            write!(f, "#{}", self.id)?;
        }
        Ok(())
    }
}

fn is_wildcard(component: &str) -> bool {
    component.is_empty() || component == "*"
}

/// Parse a descendant chain such as `div.note p`.
///
/// `>` is read as a plain descendant combinator. Sibling combinators and
/// any token [`Selector::parse`] rejects make the whole chain unusable.
pub fn parse_selector_chain(chain: &str) -> Option<Vec<Selector>> {
    let mut selectors = Vec::new();
    let spaced = chain.replace('>', " ");
    for token in spaced.split_whitespace() {
        if token.contains(['+', '~']) {
            return None;
        }
        selectors.push(Selector::parse(token)?);
    }
    if selectors.is_empty() {
        None
    } else {
        Some(selectors)
    }
}

/// Three-valued flag for properties that can be explicitly switched off.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Boolean3 {
    #[default]
    Undefined,
    True,
    False,
}

impl Boolean3 {
    pub fn is_defined(self) -> bool {
        self != Self::Undefined
    }

    /// The defined value, if any.
    pub fn value(self) -> Option<bool> {
        match self {
            Self::Undefined => None,
            Self::True => Some(true),
            Self::False => Some(false),
        }
    }
}

impl From<bool> for Boolean3 {
    fn from(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }
}

/// CSS `white-space`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum WhiteSpace {
    #[default]
    Undefined,
    Normal,
    NoWrap,
    Pre,
    PreWrap,
    PreLine,
}

impl WhiteSpace {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "normal" => Some(Self::Normal),
            "nowrap" => Some(Self::NoWrap),
            "pre" => Some(Self::Pre),
            "pre-wrap" => Some(Self::PreWrap),
            "pre-line" => Some(Self::PreLine),
            _ => None,
        }
    }

    pub fn as_css(self) -> Option<&'static str> {
        match self {
            Self::Undefined => None,
            Self::Normal => Some("normal"),
            Self::NoWrap => Some("nowrap"),
            Self::Pre => Some("pre"),
            Self::PreWrap => Some("pre-wrap"),
            Self::PreLine => Some("pre-line"),
        }
    }

    /// Whitespace runs are kept verbatim.
    pub fn preserves_spaces(self) -> bool {
        matches!(self, Self::Pre | Self::PreWrap)
    }

    /// Newlines in text become line breaks.
    pub fn preserves_newlines(self) -> bool {
        matches!(self, Self::Pre | Self::PreWrap | Self::PreLine)
    }
}

/// Resolved style of one element or one rule.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Style {
    pub text_style: StyleEntry,
    pub page_break_before: Boolean3,
    pub page_break_after: Boolean3,
    pub white_space: WhiteSpace,
    pub display_none: bool,
}

impl Style {
    /// Convert collected declarations into a style.
    ///
    /// Unknown properties and unparseable values are ignored.
    pub fn from_declarations(map: &AttributeMap) -> Self {
        let mut style = Style::default();
        for (name, raw_values) in map {
            let values = strip_important(raw_values);
            if values.is_empty() {
                continue;
            }
            style.apply_declaration(name, &values);
        }
        style
    }

    fn apply_declaration(&mut self, name: &str, values: &[&str]) {
        let first = values[0];
        let lower = first.to_ascii_lowercase();
        let entry = &mut self.text_style;
        match name {
            "text-align" => {
                let alignment = match lower.as_str() {
                    "justify" => Alignment::Justify,
                    "left" | "start" => Alignment::Left,
                    "right" | "end" => Alignment::Right,
                    "center" => Alignment::Center,
                    _ => return,
                };
                entry.set_alignment(alignment);
            }
            "font-weight" => {
                let weight = match lower.as_str() {
                    "bold" => 700,
                    "normal" => 400,
                    "bolder" | "lighter" => return,
                    digits => match digits.parse::<i32>() {
                        Ok(v) if (1..=1000).contains(&v) => v,
                        _ => return,
                    },
                };
                entry.set_font_modifier(FontModifier::Bold, weight >= 600);
            }
            "font-style" => {
                let italic = matches!(lower.as_str(), "italic" | "oblique");
                entry.set_font_modifier(FontModifier::Italic, italic);
            }
            "font-variant" => {
                entry.set_font_modifier(FontModifier::SmallCaps, lower == "small-caps");
            }
            "font-family" => {
                let families: Vec<String> = values
                    .iter()
                    .map(|v| v.trim().trim_matches(['"', '\'']).trim().to_string())
                    .filter(|v| !v.is_empty())
                    .collect();
                if !families.is_empty() {
                    entry.set_font_families(families);
                }
            }
            "font-size" => {
                if let Some(mag) = font_size_mag(&lower) {
                    entry.set_font_size_mag(mag);
                }
            }
            "margin" => {
                let parsed: SmallVec<[Option<Length>; 4]> =
                    values.iter().take(4).map(|v| parse_margin(v)).collect();
                // top right bottom left, with the usual CSS fill-in rules.
                let (top, right, bottom, left) = match parsed.as_slice() {
                    [all] => (*all, *all, *all, *all),
                    [v, h] => (*v, *h, *v, *h),
                    [t, h, b] => (*t, *h, *b, *h),
                    [t, r, b, l, ..] => (*t, *r, *b, *l),
                    [] => return,
                };
                set_length(entry, LengthKind::SpaceBefore, top);
                set_length(entry, LengthKind::RightIndent, right);
                set_length(entry, LengthKind::SpaceAfter, bottom);
                set_length(entry, LengthKind::LeftIndent, left);
            }
            "margin-left" => set_length(entry, LengthKind::LeftIndent, parse_margin(first)),
            "margin-right" => set_length(entry, LengthKind::RightIndent, parse_margin(first)),
            "margin-top" | "padding-top" => {
                set_length(entry, LengthKind::SpaceBefore, parse_margin(first))
            }
            "margin-bottom" | "padding-bottom" => {
                set_length(entry, LengthKind::SpaceAfter, parse_margin(first))
            }
            "text-indent" => {
                set_length(entry, LengthKind::FirstLineIndentDelta, parse_length(first))
            }
            "width" => set_length(entry, LengthKind::Width, parse_length(first)),
            "opacity" => {
                if let Some(opacity) = leading_float_opt(first) {
                    entry.set_opacity((opacity.clamp(0.0, 1.0) * 255.0).round() as u8);
                }
            }
            "color" => {
                if let Some(color) = parse_css_color(first) {
                    entry.set_color(color);
                }
            }
            "page-break-before" => {
                if let Some(value) = page_break(&lower) {
                    self.page_break_before = value;
                }
            }
            "page-break-after" => {
                if let Some(value) = page_break(&lower) {
                    self.page_break_after = value;
                }
            }
            "white-space" => {
                if let Some(value) = WhiteSpace::parse(&lower) {
                    self.white_space = value;
                }
            }
            "display" => {
                if lower == "none" {
                    self.display_none = true;
                }
            }
            _ => {}
        }
    }

    /// Overwrite with everything `other` specifies.
    pub fn apply(&mut self, other: &Style) {
        self.text_style.apply(&other.text_style);
        if other.page_break_before.is_defined() {
            self.page_break_before = other.page_break_before;
        }
        if other.page_break_after.is_defined() {
            self.page_break_after = other.page_break_after;
        }
        if other.white_space != WhiteSpace::Undefined {
            self.white_space = other.white_space;
        }
        if other.display_none {
            self.display_none = true;
        }
    }

    /// Take over the inheritable part of a parent style.
    pub fn inherit(&mut self, parent: &Style) {
        self.text_style.inherit(&parent.text_style);
        if parent.white_space != WhiteSpace::Undefined {
            self.white_space = parent.white_space;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text_style.is_empty()
            && !self.page_break_before.is_defined()
            && !self.page_break_after.is_defined()
            && self.white_space == WhiteSpace::Undefined
            && !self.display_none
    }
}

fn strip_important(values: &[String]) -> SmallVec<[&str; 4]> {
    values
        .iter()
        .map(|v| {
            let v = v.trim();
            v.strip_suffix("!important").map_or(v, str::trim_end)
        })
        .filter(|v| !v.is_empty())
        .collect()
}

fn set_length(entry: &mut StyleEntry, kind: LengthKind, length: Option<Length>) {
    if let Some(length) = length {
        entry.set_length_value(kind, length);
    }
}

fn page_break(value: &str) -> Option<Boolean3> {
    match value {
        "always" | "left" | "right" => Some(Boolean3::True),
        "avoid" => Some(Boolean3::False),
        _ => None,
    }
}

fn font_size_mag(value: &str) -> Option<i8> {
    let mag = match value {
        "xx-small" => -3,
        "x-small" => -2,
        "small" | "smaller" => -1,
        "medium" => 0,
        "large" | "larger" => 1,
        "x-large" => 2,
        "xx-large" => 3,
        _ => {
            let length = parse_length(value)?;
            let percent = match length.unit {
                SizeUnit::Percent | SizeUnit::Em100 | SizeUnit::Ex100 => i32::from(length.size),
                SizeUnit::Pixel | SizeUnit::Auto => return None,
            };
            return Some(font_size_mag_from_percent(percent));
        }
    };
    Some(mag)
}

/// One stylesheet rule: a descendant chain plus its resolved style.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rule {
    pub selectors: Vec<Selector>,
    pub style: Style,
    specificity: u32,
}

impl Rule {
    pub fn new(selectors: Vec<Selector>, style: Style) -> Self {
        let sum = |f: fn(&Selector) -> u32| selectors.iter().map(f).sum::<u32>().min(255);
        let specificity = (sum(Selector::a) << 16) | (sum(Selector::b) << 8) | sum(Selector::c);
        Self {
            selectors,
            style,
            specificity,
        }
    }

    /// Packed `(a << 16) | (b << 8) | c`, each component clamped to 255.
    pub fn specificity(&self) -> u32 {
        self.specificity
    }

    /// Match against an ancestor path, root first and target last.
    ///
    /// The last selector must match the target itself; every earlier one
    /// must match some strictly earlier ancestor, in order.
    pub fn matches(&self, path: &[Element]) -> bool {
        let (Some((last_selector, ancestors_selectors)), Some((target, mut ancestors))) =
            (self.selectors.split_last(), path.split_last())
        else {
            return false;
        };
        if !last_selector.matches(target) {
            return false;
        }
        for selector in ancestors_selectors.iter().rev() {
            match ancestors.iter().rposition(|el| selector.matches(el)) {
                Some(pos) => ancestors = &ancestors[..pos],
                None => return false,
            }
        }
        true
    }
}

/// Append-only list of parsed rules.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StyleSheetTable {
    rules: Vec<Rule>,
}

impl StyleSheetTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Rule> {
        self.rules.iter()
    }

    /// Add a rule for one selector chain. Returns whether it was stored.
    ///
    /// Chains the cascade cannot evaluate and bodies that set nothing are
    /// dropped.
    pub fn add_rule(&mut self, selector_chain: &str, map: &AttributeMap) -> bool {
        let Some(selectors) = parse_selector_chain(selector_chain) else {
            log::debug!("dropping unsupported selector {:?}", selector_chain);
            return false;
        };
        let style = Style::from_declarations(map);
        if style.is_empty() {
            return false;
        }
        self.rules.push(Rule::new(selectors, style));
        true
    }

    /// Apply every rule matching `path` to `style`, lowest specificity first.
    ///
    /// Equal specificity keeps declaration order, so later rules win.
    pub fn apply_styles(&self, path: &[Element], style: &mut Style) {
        let mut matched: SmallVec<[&Rule; 8]> =
            self.rules.iter().filter(|rule| rule.matches(path)).collect();
        matched.sort_by_key(|rule| rule.specificity());
        for rule in matched {
            style.apply(&rule.style);
        }
    }
}

impl<'a> IntoIterator for &'a StyleSheetTable {
    type Item = &'a Rule;
    type IntoIter = core::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

/// Dump format: one block per rule, declarations in a fixed order.
impl fmt::Display for StyleSheetTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for rule in &self.rules {
            for selector in &rule.selectors {
                write!(f, "{} ", selector)?;
            }
            f.write_str("{\n")?;
            write_style(f, &rule.style)?;
            f.write_str("}\n")?;
        }
        Ok(())
    }
}

fn write_style(f: &mut fmt::Formatter<'_>, style: &Style) -> fmt::Result {
    let entry = &style.text_style;
    let lengths = [
        (LengthKind::Width, "width"),
        (LengthKind::LeftIndent, "margin-left"),
        (LengthKind::SpaceAfter, "margin-bottom"),
        (LengthKind::SpaceBefore, "margin-top"),
        (LengthKind::RightIndent, "margin-right"),
        (LengthKind::FirstLineIndentDelta, "text-indent"),
    ];
    for (kind, name) in lengths {
        if let Some(length) = entry.length(kind) {
            writeln!(f, "    {}: {};", name, length)?;
        }
    }
    let breaks = [
        ("page-break-before", style.page_break_before),
        ("page-break-after", style.page_break_after),
    ];
    for (name, value) in breaks {
        if let Some(value) = value.value() {
            writeln!(f, "    {}: {};", name, if value { "always" } else { "avoid" })?;
        }
    }
    if let Some(ws) = style.white_space.as_css() {
        writeln!(f, "    white-space: {};", ws)?;
    }
    if style.display_none {
        writeln!(f, "    display: none;")?;
    }
    if let Some(align) = entry.alignment().and_then(Alignment::as_css) {
        writeln!(f, "    text-align: {};", align)?;
    }
    let modifiers = [
        (FontModifier::Bold, "font-weight", "bold"),
        (FontModifier::Italic, "font-style", "italic"),
        (FontModifier::SmallCaps, "font-variant", "small-caps"),
    ];
    for (modifier, name, on) in modifiers {
        if let Some(value) = entry.font_modifier(modifier) {
            writeln!(f, "    {}: {};", name, if value { on } else { "normal" })?;
        }
    }
    if let Some(families) = entry.font_families().filter(|fams| !fams.is_empty()) {
        f.write_str("    font-family: ")?;
        for (i, family) in families.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "\"{}\"", family)?;
        }
        f.write_str(";\n")?;
    }
    if let Some(mag) = entry.font_size_mag() {
        writeln!(f, "    font-size: {}%; /* {} */", font_size_percent(mag), mag)?;
    }
    if let Some(color) = entry.color() {
        writeln!(f, "    color: {};", color_style(color))?;
    }
    Ok(())
}
