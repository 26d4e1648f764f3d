//! Append-only binary paragraph buffers.
//!
//! Every entry is a one-byte [`EntryKind`] followed by a kind-specific
//! payload. Multi-byte integers are little-endian. Entry boundaries are not
//! stored: the iterator recomputes each entry length from its kind and,
//! for style entries, from the mask bytes, so the codec in this module is
//! the only place that reads or writes raw bytes.
//!
//! Style entry payload:
//!
//! | field | size | present when |
//! |---|---|---|
//! | supported modifiers | 1 | always |
//! | mask | 4 | always |
//! | unit + size, per length | 3 each | length bit set |
//! | opacity | 1 | [`MASK_OPACITY`] |
//! | alignment | 1 | [`MASK_ALIGNMENT`] |
//! | modifiers | 1 | supported modifiers non-zero |
//! | size magnitude | 1 | [`MASK_FONT_SIZE`] |
//! | family count + NUL-terminated names | 1 + n | [`MASK_FONT_FAMILIES`] |
//! | r, g, b | 3 | [`MASK_COLOR`] |

use core::fmt;
use std::collections::BTreeMap;

use crate::color::{color_style, Color};
use crate::decoration::TextKind;
use crate::error::{CascadeError, ErrorPhase};
use crate::style_entry::{Alignment, Length, LengthKind, SizeUnit, StyleEntry};

pub const MASK_OPACITY: u32 = 1 << 6;
pub const MASK_ALIGNMENT: u32 = 1 << 7;
pub const MASK_FONT_SIZE: u32 = 1 << 8;
pub const MASK_FONT_FAMILIES: u32 = 1 << 9;
pub const MASK_COLOR: u32 = 1 << 10;

const LENGTH_MASK: u32 = (1 << LengthKind::COUNT) - 1;

/// Entry discriminator byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EntryKind {
    Text = 1,
    Image = 2,
    Control = 3,
    HyperlinkControl = 4,
    Style = 5,
    FixedHSpace = 6,
    ResetBidi = 7,
    LineBreak = 8,
    Empty = 9,
}

impl EntryKind {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::Text),
            2 => Some(Self::Image),
            3 => Some(Self::Control),
            4 => Some(Self::HyperlinkControl),
            5 => Some(Self::Style),
            6 => Some(Self::FixedHSpace),
            7 => Some(Self::ResetBidi),
            8 => Some(Self::LineBreak),
            9 => Some(Self::Empty),
            _ => None,
        }
    }
}

/// Target class of a hyperlink control.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HyperlinkType {
    Internal = 0,
    External = 1,
    Book = 2,
}

impl HyperlinkType {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Internal),
            1 => Some(Self::External),
            2 => Some(Self::Book),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::External => "external",
            Self::Book => "book",
        }
    }
}

/// A decoded entry. Strings borrow from the paragraph buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParagraphEntry<'a> {
    Text(&'a str),
    Image {
        id: &'a str,
        v_offset: i16,
    },
    Control {
        kind: TextKind,
        start: bool,
    },
    HyperlinkControl {
        kind: TextKind,
        hyperlink_type: HyperlinkType,
        label: &'a str,
    },
    Style(StyleEntry),
    FixedHSpace(u8),
    ResetBidi,
    LineBreak,
    Empty,
}

impl ParagraphEntry<'_> {
    pub fn kind(&self) -> EntryKind {
        match self {
            Self::Text(_) => EntryKind::Text,
            Self::Image { .. } => EntryKind::Image,
            Self::Control { .. } => EntryKind::Control,
            Self::HyperlinkControl { .. } => EntryKind::HyperlinkControl,
            Self::Style(_) => EntryKind::Style,
            Self::FixedHSpace(_) => EntryKind::FixedHSpace,
            Self::ResetBidi => EntryKind::ResetBidi,
            Self::LineBreak => EntryKind::LineBreak,
            Self::Empty => EntryKind::Empty,
        }
    }
}

impl fmt::Display for ParagraphEntry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => write!(f, "text {:?}", text),
            Self::Image { id, v_offset } => write!(f, "image {} {}", id, v_offset),
            Self::Control { kind, start } => {
                write!(f, "control {} {}", kind, if *start { "start" } else { "end" })
            }
            Self::HyperlinkControl {
                kind,
                hyperlink_type,
                label,
            } => write!(f, "hyperlink {} {} {}", kind, hyperlink_type.name(), label),
            Self::Style(entry) => {
                f.write_str("style")?;
                write_style_entry(f, entry)
            }
            Self::FixedHSpace(count) => write!(f, "hspace {}", count),
            Self::ResetBidi => f.write_str("reset-bidi"),
            Self::LineBreak => f.write_str("line-break"),
            Self::Empty => f.write_str("empty"),
        }
    }
}

fn write_style_entry(f: &mut fmt::Formatter<'_>, entry: &StyleEntry) -> fmt::Result {
    const NAMES: [&str; LengthKind::COUNT] = [
        "margin-left",
        "margin-right",
        "text-indent",
        "margin-top",
        "margin-bottom",
        "width",
    ];
    for kind in LengthKind::ALL {
        if let Some(length) = entry.length(kind) {
            write!(f, " {}={}", NAMES[kind as usize], length)?;
        }
    }
    if let Some(opacity) = entry.opacity() {
        write!(f, " opacity={}", opacity)?;
    }
    if let Some(align) = entry.alignment().and_then(Alignment::as_css) {
        write!(f, " text-align={}", align)?;
    }
    if entry.supported_font_modifiers() != 0 {
        write!(
            f,
            " modifiers={:#04x}/{:#04x}",
            entry.font_modifiers(),
            entry.supported_font_modifiers()
        )?;
    }
    if let Some(mag) = entry.font_size_mag() {
        write!(f, " font-size-mag={}", mag)?;
    }
    if let Some(families) = entry.font_families() {
        write!(f, " font-family={}", families.join(","))?;
    }
    if let Some(color) = entry.color() {
        write!(f, " color={}", color_style(color))?;
    }
    Ok(())
}

fn truncated(offset: usize) -> CascadeError {
    CascadeError::decode("PARAGRAPH_TRUNCATED", "paragraph entry runs past end of buffer")
        .with_token_offset(offset)
}

fn too_large(what: &str, actual: usize, limit: usize) -> CascadeError {
    CascadeError::new(
        ErrorPhase::Encode,
        "PARAGRAPH_ENTRY_TOO_LARGE",
        format!("{} does not fit in a paragraph entry", what),
    )
    .with_limit("entry_field", actual, limit)
}

fn bad_text(message: &str) -> CascadeError {
    CascadeError::new(ErrorPhase::Encode, "PARAGRAPH_BAD_TEXT", message)
}

/// Cursor over a byte slice with bounds-checked reads.
struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8], base: usize) -> Self {
        Self {
            bytes,
            pos: 0,
            base,
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CascadeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| truncated(self.base + self.pos))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CascadeError> {
        Ok(self.take(1)?[0])
    }

    fn i16(&mut self) -> Result<i16, CascadeError> {
        let b = self.take(2)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, CascadeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// NUL-terminated bytes, terminator consumed but not returned.
    fn cstr(&mut self) -> Result<&'a [u8], CascadeError> {
        let rest = &self.bytes[self.pos..];
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| truncated(self.base + self.bytes.len()))?;
        let value = &rest[..len];
        self.pos += len + 1;
        Ok(value)
    }

    fn utf8(&self, raw: &'a [u8]) -> Result<&'a str, CascadeError> {
        core::str::from_utf8(raw).map_err(|_| {
            CascadeError::decode("PARAGRAPH_BAD_TEXT", "entry text is not UTF-8")
                .with_token_offset(self.base + self.pos)
        })
    }
}

fn push_cstr(out: &mut Vec<u8>, value: &str) -> Result<(), CascadeError> {
    if value.as_bytes().contains(&0) {
        return Err(bad_text("embedded NUL in entry string"));
    }
    out.extend_from_slice(value.as_bytes());
    out.push(0);
    Ok(())
}

/// Mask of the properties `entry` sets.
pub fn style_entry_mask(entry: &StyleEntry) -> u32 {
    let mut mask = 0;
    for kind in LengthKind::ALL {
        if entry.length_supported(kind) {
            mask |= 1 << kind as u32;
        }
    }
    if entry.opacity().is_some() {
        mask |= MASK_OPACITY;
    }
    if entry.alignment().is_some() {
        mask |= MASK_ALIGNMENT;
    }
    if entry.font_size_mag().is_some() {
        mask |= MASK_FONT_SIZE;
    }
    if entry.font_families().is_some() {
        mask |= MASK_FONT_FAMILIES;
    }
    if entry.color().is_some() {
        mask |= MASK_COLOR;
    }
    mask
}

/// Append the payload of a style entry (without the kind byte).
pub fn encode_style_entry(entry: &StyleEntry, out: &mut Vec<u8>) -> Result<(), CascadeError> {
    let mask = style_entry_mask(entry);
    let supported = entry.supported_font_modifiers();
    let start = out.len();
    out.push(supported);
    out.extend_from_slice(&mask.to_le_bytes());
    for kind in LengthKind::ALL {
        if let Some(length) = entry.length(kind) {
            out.push(length.unit as u8);
            out.extend_from_slice(&length.size.to_le_bytes());
        }
    }
    if let Some(opacity) = entry.opacity() {
        out.push(opacity);
    }
    if let Some(alignment) = entry.alignment() {
        out.push(alignment as u8);
    }
    if supported != 0 {
        out.push(entry.font_modifiers());
    }
    if let Some(mag) = entry.font_size_mag() {
        out.push(mag as u8);
    }
    if let Some(families) = entry.font_families() {
        let count = match u8::try_from(families.len()) {
            Ok(count) => count,
            Err(_) => {
                out.truncate(start);
                return Err(too_large("font family list", families.len(), 255));
            }
        };
        out.push(count);
        for family in families {
            if let Err(err) = push_cstr(out, family) {
                out.truncate(start);
                return Err(err);
            }
        }
    }
    if let Some(Color { r, g, b }) = entry.color() {
        out.extend_from_slice(&[r, g, b]);
    }
    Ok(())
}

/// Decode a style entry payload. Returns the entry and the bytes consumed.
pub fn decode_style_entry(bytes: &[u8]) -> Result<(StyleEntry, usize), CascadeError> {
    decode_style_at(bytes, 0)
}

fn decode_style_at(bytes: &[u8], base: usize) -> Result<(StyleEntry, usize), CascadeError> {
    let mut reader = ByteReader::new(bytes, base);
    let mut entry = StyleEntry::new();
    let supported = reader.u8()?;
    let mask = reader.u32()?;
    for kind in LengthKind::ALL {
        if mask & (1 << kind as u32) == 0 {
            continue;
        }
        let raw_unit = reader.u8()?;
        let unit = SizeUnit::from_u8(raw_unit).ok_or_else(|| {
            CascadeError::decode("PARAGRAPH_BAD_UNIT", format!("unknown size unit {}", raw_unit))
                .with_token_offset(base + reader.pos - 1)
        })?;
        let size = reader.i16()?;
        entry.set_length_value(kind, Length::new(size, unit));
    }
    if mask & MASK_OPACITY != 0 {
        entry.set_opacity(reader.u8()?);
    }
    if mask & MASK_ALIGNMENT != 0 {
        let raw = reader.u8()?;
        let alignment = Alignment::from_u8(raw).ok_or_else(|| {
            CascadeError::decode("PARAGRAPH_BAD_ALIGNMENT", format!("unknown alignment {}", raw))
                .with_token_offset(base + reader.pos - 1)
        })?;
        entry.set_alignment(alignment);
    }
    if supported != 0 {
        let value = reader.u8()?;
        entry.set_font_modifier_bits(supported, value);
    }
    if mask & MASK_FONT_SIZE != 0 {
        entry.set_font_size_mag(reader.u8()? as i8);
    }
    if mask & MASK_FONT_FAMILIES != 0 {
        let count = reader.u8()?;
        let mut families = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let raw = reader.cstr()?;
            families.push(reader.utf8(raw)?.to_string());
        }
        entry.set_font_families(families);
    }
    if mask & MASK_COLOR != 0 {
        let rgb = reader.take(3)?;
        entry.set_color(Color::new(rgb[0], rgb[1], rgb[2]));
    }
    Ok((entry, reader.pos))
}

/// Byte length of a style entry payload, computed from its mask bytes alone.
pub fn style_entry_len(bytes: &[u8]) -> Result<usize, CascadeError> {
    style_len_at(bytes, 0)
}

fn style_len_at(bytes: &[u8], base: usize) -> Result<usize, CascadeError> {
    let mut reader = ByteReader::new(bytes, base);
    let supported = reader.u8()?;
    let mask = reader.u32()?;
    let mut fixed = 3 * (mask & LENGTH_MASK).count_ones() as usize;
    fixed += usize::from(mask & MASK_OPACITY != 0);
    fixed += usize::from(mask & MASK_ALIGNMENT != 0);
    fixed += usize::from(supported != 0);
    fixed += usize::from(mask & MASK_FONT_SIZE != 0);
    reader.take(fixed)?;
    if mask & MASK_FONT_FAMILIES != 0 {
        let count = reader.u8()?;
        for _ in 0..count {
            reader.cstr()?;
        }
    }
    if mask & MASK_COLOR != 0 {
        reader.take(3)?;
    }
    Ok(reader.pos)
}

/// Paragraph role in the text model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParagraphKind {
    Text,
    EmptyLine,
    /// Forced page break.
    EndOfSection,
    EndOfText,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Paragraph {
    kind: ParagraphKind,
    data: Vec<u8>,
    entry_count: usize,
    /// Offset of the length field of a trailing text entry.
    open_text: Option<usize>,
}

impl Paragraph {
    pub fn new(kind: ParagraphKind) -> Self {
        Self {
            kind,
            data: Vec::new(),
            entry_count: 0,
            open_text: None,
        }
    }

    pub fn kind(&self) -> ParagraphKind {
        self.kind
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Rebuild from raw bytes, e.g. ones read back from a cache.
    ///
    /// The buffer is walked once; any malformed entry is an error.
    pub fn from_bytes(kind: ParagraphKind, data: Vec<u8>) -> Result<Self, CascadeError> {
        let mut paragraph = Self::new(kind);
        paragraph.data = data;
        let mut count = 0;
        for entry in paragraph.iter() {
            entry?;
            count += 1;
        }
        paragraph.entry_count = count;
        Ok(paragraph)
    }

    fn begin_entry(&mut self, kind: EntryKind) {
        self.open_text = None;
        self.data.push(kind as u8);
        self.entry_count += 1;
    }

    /// Append text. Consecutive text is merged into one entry.
    pub fn add_text(&mut self, text: &str) -> Result<(), CascadeError> {
        if text.is_empty() {
            return Ok(());
        }
        if let Some(len_at) = self.open_text {
            let field = &self.data[len_at..len_at + 4];
            let old = u32::from_le_bytes([field[0], field[1], field[2], field[3]]) as usize;
            let total = old + text.len();
            let total32 = u32::try_from(total)
                .map_err(|_| too_large("text", total, u32::MAX as usize))?;
            self.data[len_at..len_at + 4].copy_from_slice(&total32.to_le_bytes());
            self.data.extend_from_slice(text.as_bytes());
            return Ok(());
        }
        let len = u32::try_from(text.len())
            .map_err(|_| too_large("text", text.len(), u32::MAX as usize))?;
        self.begin_entry(EntryKind::Text);
        let len_at = self.data.len();
        self.data.extend_from_slice(&len.to_le_bytes());
        self.data.extend_from_slice(text.as_bytes());
        self.open_text = Some(len_at);
        Ok(())
    }

    pub fn add_control(&mut self, kind: TextKind, start: bool) {
        self.begin_entry(EntryKind::Control);
        self.data.push(((kind as u8) << 1) | u8::from(start));
    }

    pub fn add_hyperlink_control(
        &mut self,
        kind: TextKind,
        hyperlink_type: HyperlinkType,
        label: &str,
    ) -> Result<(), CascadeError> {
        if label.as_bytes().contains(&0) {
            return Err(bad_text("embedded NUL in hyperlink label"));
        }
        self.begin_entry(EntryKind::HyperlinkControl);
        self.data.push(kind as u8);
        self.data.push(hyperlink_type as u8);
        push_cstr(&mut self.data, label)
    }

    pub fn add_image(&mut self, id: &str, v_offset: i16) -> Result<(), CascadeError> {
        if id.as_bytes().contains(&0) {
            return Err(bad_text("embedded NUL in image id"));
        }
        self.begin_entry(EntryKind::Image);
        self.data.extend_from_slice(&v_offset.to_le_bytes());
        push_cstr(&mut self.data, id)
    }

    pub fn add_style_entry(&mut self, entry: &StyleEntry) -> Result<(), CascadeError> {
        let mut payload = Vec::with_capacity(16);
        encode_style_entry(entry, &mut payload)?;
        self.begin_entry(EntryKind::Style);
        self.data.extend_from_slice(&payload);
        Ok(())
    }

    pub fn add_fixed_hspace(&mut self, count: u8) {
        self.begin_entry(EntryKind::FixedHSpace);
        self.data.push(count);
    }

    pub fn add_reset_bidi(&mut self) {
        self.begin_entry(EntryKind::ResetBidi);
    }

    pub fn add_line_break(&mut self) {
        self.begin_entry(EntryKind::LineBreak);
    }

    pub fn add_empty(&mut self) {
        self.begin_entry(EntryKind::Empty);
    }

    pub fn iter(&self) -> EntryIter<'_> {
        EntryIter {
            data: &self.data,
            pos: 0,
            failed: false,
        }
    }

    /// Concatenated text of all text entries.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for entry in self.iter().flatten() {
            if let Ok(ParagraphEntry::Text(text)) = entry.decode() {
                out.push_str(text);
            }
        }
        out
    }
}

impl<'a> IntoIterator for &'a Paragraph {
    type Item = Result<EntryRef<'a>, CascadeError>;
    type IntoIter = EntryIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One raw entry located in a paragraph buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryRef<'a> {
    kind: EntryKind,
    offset: usize,
    bytes: &'a [u8],
}

impl<'a> EntryRef<'a> {
    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    /// Offset of the kind byte in the paragraph buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Entry bytes including the kind byte.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn decode(&self) -> Result<ParagraphEntry<'a>, CascadeError> {
        let payload_at = self.offset + 1;
        let mut reader = ByteReader::new(&self.bytes[1..], payload_at);
        let entry = match self.kind {
            EntryKind::Text => {
                let len = reader.u32()? as usize;
                let raw = reader.take(len)?;
                ParagraphEntry::Text(reader.utf8(raw)?)
            }
            EntryKind::Image => {
                let v_offset = reader.i16()?;
                let raw = reader.cstr()?;
                ParagraphEntry::Image {
                    id: reader.utf8(raw)?,
                    v_offset,
                }
            }
            EntryKind::Control => {
                let raw = reader.u8()?;
                ParagraphEntry::Control {
                    kind: text_kind(raw >> 1, payload_at)?,
                    start: raw & 1 != 0,
                }
            }
            EntryKind::HyperlinkControl => {
                let kind = text_kind(reader.u8()?, payload_at)?;
                let raw_type = reader.u8()?;
                let hyperlink_type = HyperlinkType::from_u8(raw_type).ok_or_else(|| {
                    CascadeError::decode(
                        "PARAGRAPH_BAD_KIND",
                        format!("unknown hyperlink type {}", raw_type),
                    )
                    .with_token_offset(payload_at + 1)
                })?;
                let raw = reader.cstr()?;
                ParagraphEntry::HyperlinkControl {
                    kind,
                    hyperlink_type,
                    label: reader.utf8(raw)?,
                }
            }
            EntryKind::Style => {
                let (entry, _) = decode_style_at(&self.bytes[1..], payload_at)?;
                ParagraphEntry::Style(entry)
            }
            EntryKind::FixedHSpace => ParagraphEntry::FixedHSpace(reader.u8()?),
            EntryKind::ResetBidi => ParagraphEntry::ResetBidi,
            EntryKind::LineBreak => ParagraphEntry::LineBreak,
            EntryKind::Empty => ParagraphEntry::Empty,
        };
        Ok(entry)
    }
}

fn text_kind(raw: u8, offset: usize) -> Result<TextKind, CascadeError> {
    TextKind::from_u8(raw).ok_or_else(|| {
        CascadeError::decode("PARAGRAPH_BAD_KIND", format!("unknown text kind {}", raw))
            .with_token_offset(offset)
    })
}

/// Payload length of the entry starting at `payload`.
fn payload_len(kind: EntryKind, payload: &[u8], base: usize) -> Result<usize, CascadeError> {
    let mut reader = ByteReader::new(payload, base);
    match kind {
        EntryKind::Text => {
            let len = reader.u32()? as usize;
            reader.take(len)?;
        }
        EntryKind::Image => {
            reader.take(2)?;
            reader.cstr()?;
        }
        EntryKind::Control | EntryKind::FixedHSpace => {
            reader.take(1)?;
        }
        EntryKind::HyperlinkControl => {
            reader.take(2)?;
            reader.cstr()?;
        }
        EntryKind::Style => return style_len_at(payload, base),
        EntryKind::ResetBidi | EntryKind::LineBreak | EntryKind::Empty => {}
    }
    Ok(reader.pos)
}

/// Walks a paragraph buffer entry by entry.
///
/// After the first error the iterator is exhausted: entry boundaries past a
/// malformed entry cannot be trusted.
#[derive(Clone, Debug)]
pub struct EntryIter<'a> {
    data: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> Iterator for EntryIter<'a> {
    type Item = Result<EntryRef<'a>, CascadeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.data.len() {
            return None;
        }
        let offset = self.pos;
        let raw = self.data[offset];
        let Some(kind) = EntryKind::from_u8(raw) else {
            self.failed = true;
            return Some(Err(CascadeError::decode(
                "PARAGRAPH_BAD_KIND",
                format!("unknown entry kind {}", raw),
            )
            .with_token_offset(offset)));
        };
        match payload_len(kind, &self.data[offset + 1..], offset + 1) {
            Ok(len) => {
                let end = offset + 1 + len;
                self.pos = end;
                Some(Ok(EntryRef {
                    kind,
                    offset,
                    bytes: &self.data[offset..end],
                }))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

impl core::iter::FusedIterator for EntryIter<'_> {}

/// Paragraphs of one document plus the labels pointing into them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextModel {
    paragraphs: Vec<Paragraph>,
    labels: BTreeMap<String, usize>,
}

impl TextModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a paragraph and return its index.
    pub fn push(&mut self, paragraph: Paragraph) -> usize {
        self.paragraphs.push(paragraph);
        self.paragraphs.len() - 1
    }

    pub fn paragraphs(&self) -> &[Paragraph] {
        &self.paragraphs
    }

    pub fn get(&self, index: usize) -> Option<&Paragraph> {
        self.paragraphs.get(index)
    }

    pub fn last_mut(&mut self) -> Option<&mut Paragraph> {
        self.paragraphs.last_mut()
    }

    pub fn len(&self) -> usize {
        self.paragraphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paragraphs.is_empty()
    }

    /// Point `name` at a paragraph index. The first definition wins.
    pub fn add_label(&mut self, name: impl Into<String>, paragraph: usize) {
        self.labels.entry(name.into()).or_insert(paragraph);
    }

    pub fn label(&self, name: &str) -> Option<usize> {
        self.labels.get(name).copied()
    }

    pub fn labels(&self) -> impl Iterator<Item = (&str, usize)> {
        self.labels.iter().map(|(name, index)| (name.as_str(), *index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style_entry::FontModifier;

    fn rich_entry() -> StyleEntry {
        let mut entry = StyleEntry::new();
        entry.set_length(LengthKind::LeftIndent, 150, SizeUnit::Em100);
        entry.set_length(LengthKind::Width, 50, SizeUnit::Percent);
        entry.set_opacity(128);
        entry.set_alignment(Alignment::Center);
        entry.set_font_modifier(FontModifier::Italic, true);
        entry.set_font_modifier(FontModifier::Bold, false);
        entry.set_font_size_mag(-2);
        entry.set_font_families(vec!["Times New Roman".into(), "serif".into()]);
        entry.set_color(Color::new(1, 2, 3));
        entry
    }

    fn entries(paragraph: &Paragraph) -> Vec<ParagraphEntry<'_>> {
        paragraph
            .iter()
            .map(|e| {
                e.expect("entry should be well-formed")
                    .decode()
                    .expect("entry should decode")
            })
            .collect()
    }

    #[test]
    fn style_entry_layout_matches_mask() {
        let mut entry = StyleEntry::new();
        entry.set_length(LengthKind::SpaceAfter, -3, SizeUnit::Pixel);
        entry.set_color(Color::new(0xaa, 0xbb, 0xcc));
        let mut out = Vec::new();
        encode_style_entry(&entry, &mut out).expect("entry should encode");
        assert_eq!(
            out,
            [0, 0x10, 0x04, 0, 0, 0, 0xfd, 0xff, 0xaa, 0xbb, 0xcc]
        );
        assert_eq!(style_entry_len(&out).expect("length"), out.len());
    }

    #[test]
    fn style_entry_decodes_to_equal_entry() {
        let entry = rich_entry();
        let mut out = Vec::new();
        encode_style_entry(&entry, &mut out).expect("entry should encode");
        out.extend_from_slice(&[9, 9, 9]);
        let (decoded, used) = decode_style_entry(&out).expect("entry should decode");
        assert_eq!(decoded, entry);
        assert_eq!(used, out.len() - 3);
        assert_eq!(style_entry_len(&out).expect("length"), used);
    }

    #[test]
    fn modifier_byte_only_present_when_supported() {
        let mut entry = StyleEntry::new();
        entry.set_opacity(7);
        let mut out = Vec::new();
        encode_style_entry(&entry, &mut out).expect("entry should encode");
        assert_eq!(out.len(), 1 + 4 + 1);
    }

    #[test]
    fn truncated_style_entry_is_reported() {
        let mut out = Vec::new();
        encode_style_entry(&rich_entry(), &mut out).expect("entry should encode");
        out.truncate(out.len() - 1);
        let err = decode_style_entry(&out).expect_err("short buffer should fail");
        assert_eq!(err.code, "PARAGRAPH_TRUNCATED");
        let err = style_entry_len(&out[..3]).expect_err("short header should fail");
        assert_eq!(err.code, "PARAGRAPH_TRUNCATED");
    }

    #[test]
    fn bad_unit_and_alignment_are_rejected() {
        let bad_unit = [0u8, 1, 0, 0, 0, 9, 0, 0];
        let err = decode_style_entry(&bad_unit).expect_err("unit 9 is invalid");
        assert_eq!(err.code, "PARAGRAPH_BAD_UNIT");
        let bad_align = [0u8, 0x80, 0, 0, 0, 42];
        let err = decode_style_entry(&bad_align).expect_err("alignment 42 is invalid");
        assert_eq!(err.code, "PARAGRAPH_BAD_ALIGNMENT");
    }

    #[test]
    fn iterator_walks_every_entry_kind() {
        let mut p = Paragraph::new(ParagraphKind::Text);
        p.add_control(TextKind::H2, true);
        p.add_style_entry(&rich_entry()).expect("style");
        p.add_text("Hello, ").expect("text");
        p.add_text("world").expect("text");
        p.add_hyperlink_control(TextKind::InternalHyperlink, HyperlinkType::Internal, "ch1.xhtml#a")
            .expect("link");
        p.add_image("img/cover.png", -2).expect("image");
        p.add_fixed_hspace(4);
        p.add_line_break();
        p.add_reset_bidi();
        p.add_empty();
        p.add_control(TextKind::H2, false);

        assert_eq!(p.entry_count(), 10);
        let decoded = entries(&p);
        assert_eq!(decoded.len(), 10);
        assert_eq!(
            decoded[0],
            ParagraphEntry::Control {
                kind: TextKind::H2,
                start: true
            }
        );
        assert_eq!(decoded[1], ParagraphEntry::Style(rich_entry()));
        assert_eq!(decoded[2], ParagraphEntry::Text("Hello, world"));
        assert_eq!(
            decoded[3],
            ParagraphEntry::HyperlinkControl {
                kind: TextKind::InternalHyperlink,
                hyperlink_type: HyperlinkType::Internal,
                label: "ch1.xhtml#a"
            }
        );
        assert_eq!(
            decoded[4],
            ParagraphEntry::Image {
                id: "img/cover.png",
                v_offset: -2
            }
        );
        assert_eq!(decoded[5], ParagraphEntry::FixedHSpace(4));
        assert_eq!(decoded[9].kind(), EntryKind::Control);
        assert_eq!(p.text(), "Hello, world");
    }

    #[test]
    fn text_after_other_entry_starts_new_entry() {
        let mut p = Paragraph::new(ParagraphKind::Text);
        p.add_text("a").expect("text");
        p.add_line_break();
        p.add_text("b").expect("text");
        assert_eq!(p.entry_count(), 3);
        assert_eq!(p.text(), "ab");
    }

    #[test]
    fn corrupt_buffer_stops_iteration() {
        let mut p = Paragraph::new(ParagraphKind::Text);
        p.add_text("ok").expect("text");
        let mut bytes = p.as_bytes().to_vec();
        bytes.push(0x7f);
        bytes.push(EntryKind::LineBreak as u8);
        let err = Paragraph::from_bytes(ParagraphKind::Text, bytes.clone())
            .expect_err("unknown kind should fail");
        assert_eq!(err.code, "PARAGRAPH_BAD_KIND");
        assert_eq!(err.context.and_then(|c| c.token_offset), Some(7));

        let mut iter = EntryIter {
            data: &bytes,
            pos: 0,
            failed: false,
        };
        assert!(iter.next().is_some_and(|e| e.is_ok()));
        assert!(iter.next().is_some_and(|e| e.is_err()));
        assert!(iter.next().is_none());
    }

    #[test]
    fn invalid_utf8_text_is_bad_text() {
        let bytes = vec![EntryKind::Text as u8, 2, 0, 0, 0, 0xff, 0xfe];
        let p = Paragraph::from_bytes(ParagraphKind::Text, bytes).expect("structure is fine");
        let entry = p.iter().next().expect("one entry").expect("well-formed");
        let err = entry.decode().expect_err("bytes are not UTF-8");
        assert_eq!(err.code, "PARAGRAPH_BAD_TEXT");
    }

    #[test]
    fn nul_in_strings_is_rejected_on_encode() {
        let mut p = Paragraph::new(ParagraphKind::Text);
        let err = p.add_image("a\0b", 0).expect_err("NUL should be rejected");
        assert_eq!(err.code, "PARAGRAPH_BAD_TEXT");
        assert!(p.is_empty());

        let mut entry = StyleEntry::new();
        entry.set_font_families(vec!["bad\0name".into()]);
        let err = p.add_style_entry(&entry).expect_err("NUL should be rejected");
        assert_eq!(err.phase, ErrorPhase::Encode);
        assert!(p.is_empty());
    }

    #[test]
    fn display_is_readable() {
        let mut entry = StyleEntry::new();
        entry.set_length(LengthKind::FirstLineIndentDelta, 150, SizeUnit::Em100);
        entry.set_alignment(Alignment::Justify);
        let style = ParagraphEntry::Style(entry);
        assert_eq!(style.to_string(), "style text-indent=1.5em text-align=justify");
        let control = ParagraphEntry::Control {
            kind: TextKind::Emphasis,
            start: false,
        };
        assert_eq!(control.to_string(), "control emphasis end");
    }

    #[test]
    fn model_labels_keep_first_definition() {
        let mut model = TextModel::new();
        let first = model.push(Paragraph::new(ParagraphKind::Text));
        let second = model.push(Paragraph::new(ParagraphKind::EndOfSection));
        model.add_label("ch.xhtml#a", first);
        model.add_label("ch.xhtml#a", second);
        assert_eq!(model.label("ch.xhtml#a"), Some(0));
        assert_eq!(model.len(), 2);
        assert_eq!(model.labels().count(), 1);
    }
}
