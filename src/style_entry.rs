//! Style entries: sparse bags of explicitly-set text style properties.
//!
//! Every property is optional. An unset property is never authoritative;
//! consumers fall through to whatever style sits underneath.

use core::fmt;

use crate::color::Color;

/// Unit attached to a [`Length`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SizeUnit {
    /// Device pixels.
    Pixel = 0,
    /// Hundredths of the font size.
    Em100 = 1,
    /// Hundredths of the x-height.
    Ex100 = 2,
    /// Percent of the available width or height.
    Percent = 3,
    /// `auto`: half of the available space.
    Auto = 4,
}

impl SizeUnit {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Pixel),
            1 => Some(Self::Em100),
            2 => Some(Self::Ex100),
            3 => Some(Self::Percent),
            4 => Some(Self::Auto),
            _ => None,
        }
    }
}

/// Length-valued properties of a [`StyleEntry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LengthKind {
    LeftIndent = 0,
    RightIndent = 1,
    FirstLineIndentDelta = 2,
    SpaceBefore = 3,
    SpaceAfter = 4,
    Width = 5,
}

impl LengthKind {
    /// Number of length properties.
    pub const COUNT: usize = 6;

    /// All kinds, in storage order.
    pub const ALL: [LengthKind; Self::COUNT] = [
        Self::LeftIndent,
        Self::RightIndent,
        Self::FirstLineIndentDelta,
        Self::SpaceBefore,
        Self::SpaceAfter,
        Self::Width,
    ];

    /// Vertical lengths resolve against font height and page height.
    pub fn is_vertical(self) -> bool {
        matches!(self, Self::SpaceBefore | Self::SpaceAfter)
    }
}

/// A signed magnitude with a unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Length {
    pub size: i16,
    pub unit: SizeUnit,
}

impl Length {
    pub const fn new(size: i16, unit: SizeUnit) -> Self {
        Self { size, unit }
    }

    pub const fn px(size: i16) -> Self {
        Self::new(size, SizeUnit::Pixel)
    }

    /// Resolve to pixels along the horizontal axis.
    pub fn hlength(self, metrics: &Metrics) -> i32 {
        hlength(self.size, self.unit, metrics)
    }

    /// Resolve to pixels along the vertical axis.
    pub fn vlength(self, metrics: &Metrics) -> i32 {
        vlength(self.size, self.unit, metrics)
    }
}

impl fmt::Display for Length {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unit == SizeUnit::Auto {
            return f.write_str("auto");
        }
        if self.size == 0 {
            return f.write_str("0");
        }
        match self.unit {
            SizeUnit::Pixel => write!(f, "{}px", self.size),
            SizeUnit::Em100 => write!(f, "{}em", f64::from(self.size) / 100.0),
            SizeUnit::Ex100 => write!(f, "{}ex", f64::from(self.size) / 100.0),
            SizeUnit::Percent => write!(f, "{}%", self.size),
            SizeUnit::Auto => Ok(()),
        }
    }
}

/// Inputs needed to turn relative lengths into pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Metrics {
    pub font_size: i32,
    pub font_x_height: i32,
    pub full_width: i32,
    pub full_height: i32,
}

impl Metrics {
    pub fn new(font_size: i32, font_x_height: i32, full_width: i32, full_height: i32) -> Self {
        Self {
            font_size,
            font_x_height,
            full_width,
            full_height,
        }
    }
}

/// Resolve a horizontal length to pixels.
pub fn hlength(size: i16, unit: SizeUnit, metrics: &Metrics) -> i32 {
    resolve_length(size, unit, metrics, metrics.full_width)
}

/// Resolve a vertical length to pixels.
pub fn vlength(size: i16, unit: SizeUnit, metrics: &Metrics) -> i32 {
    resolve_length(size, unit, metrics, metrics.full_height)
}

fn resolve_length(size: i16, unit: SizeUnit, metrics: &Metrics, full: i32) -> i32 {
    let size = i32::from(size);
    match unit {
        SizeUnit::Pixel => size,
        SizeUnit::Em100 => (size * metrics.font_size + 50) / 100,
        SizeUnit::Ex100 => (size * metrics.font_x_height + 50) / 100,
        SizeUnit::Percent => (size * full + 50) / 100,
        SizeUnit::Auto => full / 2,
    }
}

/// Paragraph alignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Alignment {
    #[default]
    Undefined = 0,
    Left = 1,
    Right = 2,
    Center = 3,
    Justify = 4,
}

impl Alignment {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Undefined),
            1 => Some(Self::Left),
            2 => Some(Self::Right),
            3 => Some(Self::Center),
            4 => Some(Self::Justify),
            _ => None,
        }
    }

    pub fn as_css(self) -> Option<&'static str> {
        match self {
            Self::Undefined => None,
            Self::Left => Some("left"),
            Self::Right => Some("right"),
            Self::Center => Some("center"),
            Self::Justify => Some("justify"),
        }
    }
}

/// Boolean font modifiers, tracked as bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FontModifier {
    Bold = 1 << 0,
    Italic = 1 << 1,
    SmallCaps = 1 << 2,
}

impl FontModifier {
    pub const fn bit(self) -> u8 {
        self as u8
    }
}

/// Sparse set of explicitly specified text style properties.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StyleEntry {
    lengths: [Option<Length>; LengthKind::COUNT],
    opacity: Option<u8>,
    alignment: Option<Alignment>,
    font_modifiers: u8,
    supported_font_modifiers: u8,
    font_size_mag: Option<i8>,
    font_families: Option<Vec<String>>,
    color: Option<Color>,
}

impl StyleEntry {
    pub fn new() -> Self {
        Self::default()
    }

    /// No property is set.
    pub fn is_empty(&self) -> bool {
        self.lengths.iter().all(Option::is_none)
            && self.opacity.is_none()
            && self.alignment.is_none()
            && self.supported_font_modifiers == 0
            && self.font_size_mag.is_none()
            && self.font_families.is_none()
            && self.color.is_none()
    }

    /// Unset every property.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn length_supported(&self, kind: LengthKind) -> bool {
        self.lengths[kind as usize].is_some()
    }

    pub fn length(&self, kind: LengthKind) -> Option<Length> {
        self.lengths[kind as usize]
    }

    pub fn set_length(&mut self, kind: LengthKind, size: i16, unit: SizeUnit) {
        self.lengths[kind as usize] = Some(Length::new(size, unit));
    }

    pub fn set_length_value(&mut self, kind: LengthKind, length: Length) {
        self.lengths[kind as usize] = Some(length);
    }

    pub fn clear_length(&mut self, kind: LengthKind) {
        self.lengths[kind as usize] = None;
    }

    /// Resolve a length to pixels, or `None` when it is not set.
    ///
    /// Vertical kinds resolve against the page height, the rest against the
    /// page width.
    pub fn length_px(&self, kind: LengthKind, metrics: &Metrics) -> Option<i16> {
        let length = self.length(kind)?;
        let px = if kind.is_vertical() {
            length.vlength(metrics)
        } else {
            length.hlength(metrics)
        };
        Some(clamp_i16(px))
    }

    /// Both horizontal margins are `auto`.
    pub fn auto_left_right_margins(&self) -> bool {
        let auto = |kind| matches!(self.length(kind), Some(l) if l.unit == SizeUnit::Auto);
        auto(LengthKind::LeftIndent) && auto(LengthKind::RightIndent)
    }

    pub fn opacity(&self) -> Option<u8> {
        self.opacity
    }

    pub fn set_opacity(&mut self, opacity: u8) {
        self.opacity = Some(opacity);
    }

    pub fn alignment(&self) -> Option<Alignment> {
        self.alignment
    }

    pub fn set_alignment(&mut self, alignment: Alignment) {
        self.alignment = Some(alignment);
    }

    /// Value of one modifier, or `None` when it was never specified.
    pub fn font_modifier(&self, modifier: FontModifier) -> Option<bool> {
        let bit = modifier.bit();
        (self.supported_font_modifiers & bit != 0).then_some(self.font_modifiers & bit != 0)
    }

    pub fn set_font_modifier(&mut self, modifier: FontModifier, on: bool) {
        let bit = modifier.bit();
        self.supported_font_modifiers |= bit;
        if on {
            self.font_modifiers |= bit;
        } else {
            self.font_modifiers &= !bit;
        }
    }

    /// Raw modifier value bits. Only bits in [`Self::supported_font_modifiers`] mean anything.
    pub fn font_modifiers(&self) -> u8 {
        self.font_modifiers
    }

    pub fn supported_font_modifiers(&self) -> u8 {
        self.supported_font_modifiers
    }

    pub(crate) fn set_font_modifier_bits(&mut self, supported: u8, value: u8) {
        self.supported_font_modifiers = supported;
        self.font_modifiers = value & supported;
    }

    /// Font size as a number of 6/5 steps away from the base size.
    pub fn font_size_mag(&self) -> Option<i8> {
        self.font_size_mag
    }

    pub fn set_font_size_mag(&mut self, mag: i8) {
        self.font_size_mag = Some(mag);
    }

    pub fn font_families(&self) -> Option<&[String]> {
        self.font_families.as_deref()
    }

    pub fn set_font_families(&mut self, families: Vec<String>) {
        self.font_families = Some(families);
    }

    pub fn color(&self) -> Option<Color> {
        self.color
    }

    pub fn set_color(&mut self, color: Color) {
        self.color = Some(color);
    }

    /// Overwrite every property that `other` sets. Unset properties in `other` leave `self` alone.
    pub fn apply(&mut self, other: &StyleEntry) {
        for (mine, theirs) in self.lengths.iter_mut().zip(other.lengths.iter()) {
            if theirs.is_some() {
                *mine = *theirs;
            }
        }
        if other.opacity.is_some() {
            self.opacity = other.opacity;
        }
        if other.alignment.is_some() {
            self.alignment = other.alignment;
        }
        let sup = other.supported_font_modifiers;
        self.font_modifiers = (self.font_modifiers & !sup) | (other.font_modifiers & sup);
        self.supported_font_modifiers |= sup;
        if other.font_size_mag.is_some() {
            self.font_size_mag = other.font_size_mag;
        }
        if other.font_families.is_some() {
            self.font_families.clone_from(&other.font_families);
        }
        if other.color.is_some() {
            self.color = other.color;
        }
    }

    /// Copy the inheritable properties of a parent entry.
    ///
    /// Only first-line indent, alignment, font modifiers, font size, font
    /// families and color are inherited. Margins, width and opacity are not.
    pub fn inherit(&mut self, parent: &StyleEntry) {
        let indent = LengthKind::FirstLineIndentDelta as usize;
        if parent.lengths[indent].is_some() {
            self.lengths[indent] = parent.lengths[indent];
        }
        if parent.alignment.is_some() {
            self.alignment = parent.alignment;
        }
        let sup = parent.supported_font_modifiers;
        self.font_modifiers = (self.font_modifiers & !sup) | (parent.font_modifiers & sup);
        self.supported_font_modifiers |= sup;
        if parent.font_size_mag.is_some() {
            self.font_size_mag = parent.font_size_mag;
        }
        if parent.font_families.is_some() {
            self.font_families.clone_from(&parent.font_families);
        }
        if parent.color.is_some() {
            self.color = parent.color;
        }
    }
}

pub(crate) fn clamp_i16(value: i32) -> i16 {
    value.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}

/// Leading integer of `s`, C `atoi` style: optional sign, digits, stop at the first other byte.
pub(crate) fn leading_int(s: &str) -> i32 {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let (negative, start) = match bytes.first() {
        Some(b'-') => (true, 1),
        Some(b'+') => (false, 1),
        _ => (false, 0),
    };
    let mut value: i64 = 0;
    for &b in &bytes[start..] {
        if !b.is_ascii_digit() {
            break;
        }
        value = (value * 10 + i64::from(b - b'0')).min(i64::from(i32::MAX));
    }
    if negative {
        -value as i32
    } else {
        value as i32
    }
}

/// Leading decimal number of `s`; 0 when there is none.
pub(crate) fn leading_float(s: &str) -> f64 {
    leading_float_opt(s).unwrap_or(0.0)
}

/// Leading decimal number of `s`, or `None` when no digit was read.
pub(crate) fn leading_float_opt(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'-' | b'+')) {
        end = 1;
    }
    let mut seen_dot = false;
    while let Some(&b) = bytes.get(end) {
        if b.is_ascii_digit() {
            end += 1;
        } else if b == b'.' && !seen_dot {
            seen_dot = true;
            end += 1;
        } else {
            break;
        }
    }
    s[..end].parse().ok()
}

/// Parse a CSS length.
///
/// `%`, `em`, `ex`, `px`, `pt` and `pc` suffixes are understood, as is a
/// bare `0`. Points and picas are taken as pixels. Anything else yields
/// `None`.
pub fn parse_length(value: &str) -> Option<Length> {
    let value = value.trim();
    if let Some(number) = value.strip_suffix('%') {
        return Some(Length::new(clamp_i16(leading_int(number)), SizeUnit::Percent));
    }
    if let Some(number) = value.strip_suffix("em") {
        return Some(Length::new(hundredths(number), SizeUnit::Em100));
    }
    if let Some(number) = value.strip_suffix("ex") {
        return Some(Length::new(hundredths(number), SizeUnit::Ex100));
    }
    for suffix in ["px", "pt", "pc"] {
        if let Some(number) = value.strip_suffix(suffix) {
            return Some(Length::px(clamp_i16(leading_int(number))));
        }
    }
    if value == "0" {
        return Some(Length::px(0));
    }
    None
}

/// Like [`parse_length`], additionally accepting `auto`.
pub fn parse_margin(value: &str) -> Option<Length> {
    if value.trim().eq_ignore_ascii_case("auto") {
        return Some(Length::new(0, SizeUnit::Auto));
    }
    parse_length(value)
}

fn hundredths(number: &str) -> i16 {
    let scaled = (100.0 * leading_float(number)).round();
    scaled.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
}

const MAX_MAG_STEPS: u32 = 16;

/// Scale `size` by `mag` steps of 6/5.
///
/// All multiplications happen before the divisions so small sizes keep
/// their precision. Steps beyond `MAX_MAG_STEPS` are ignored.
pub fn scale_font_size(size: i32, mag: i8) -> i32 {
    let steps = u32::from(mag.unsigned_abs()).min(MAX_MAG_STEPS);
    let (num, den): (i128, i128) = if mag >= 0 { (6, 5) } else { (5, 6) };
    let mut value = i128::from(size);
    for _ in 0..steps {
        value *= num;
    }
    for _ in 0..steps {
        value /= den;
    }
    value.clamp(i128::from(i32::MIN), i128::from(i32::MAX)) as i32
}

/// Convert a percentage font size into a step count.
///
/// 100% is 0. Anything from 80% up to (not including) 100% is one step
/// down, anything above 100% and below 120% is one step up. Outside that
/// band the count is the smallest number of steps whose scaled size of 100
/// reaches the target.
pub fn font_size_mag_from_percent(percent: i32) -> i8 {
    if percent == 100 {
        return 0;
    }
    if percent < 100 {
        if percent >= 80 {
            return -1;
        }
        let mut steps = 1;
        while steps < MAX_MAG_STEPS && scale_font_size(100, -(steps as i8)) > percent {
            steps += 1;
        }
        return -(steps as i8);
    }
    if percent < 120 {
        return 1;
    }
    let mut steps = 1;
    while steps < MAX_MAG_STEPS && scale_font_size(100, steps as i8) < percent {
        steps += 1;
    }
    steps as i8
}

/// Inverse of the magnitude: the percentage a step count scales 100 to.
pub fn font_size_percent(mag: i8) -> i32 {
    scale_font_size(100, mag)
}
