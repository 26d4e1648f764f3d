//! XHTML content-document reader.
//!
//! [`XhtmlReader`] walks a document with quick-xml, keeps a
//! [`StyleCascade`] in step with the element nesting and writes the result
//! into a [`TextModel`]: paragraphs of text, control entries for text kinds,
//! style entries for resolved CSS and hyperlink labels for every `id`.
//!
//! Stylesheets come from `<style>` blocks and from `<link rel="stylesheet">`
//! references opened through a [`StylesheetLoader`].

use std::collections::BTreeMap;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use smallvec::SmallVec;

use crate::cascade::{CascadeLimits, StyleCascade};
use crate::css_parser::{RuleSink, StyleSheetParser, READ_CHUNK_SIZE};
use crate::decoration::{DecorationTable, FullDecoration, StyleEnvironment, TextKind};
use crate::error::{CascadeError, ErrorPhase};
use crate::paragraph::{HyperlinkType, Paragraph, ParagraphKind, TextModel};
use crate::style_entry::{Length, LengthKind, StyleEntry};
use crate::stylesheet::{AttributeMap, Boolean3, Style, StyleSheetTable};

const LIST_BULLET: &str = "\u{2022}\u{a0}";

/// Opens stylesheets referenced from a document.
///
/// `path` is already resolved against the document and percent-decoded.
pub trait StylesheetLoader {
    fn open(&mut self, path: &str) -> io::Result<Box<dyn Read + '_>>;
}

/// Loader that never finds anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoStylesheets;

impl StylesheetLoader for NoStylesheets {
    fn open(&mut self, path: &str) -> io::Result<Box<dyn Read + '_>> {
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no stylesheet loader for {}", path),
        ))
    }
}

/// Loads stylesheets from files below a root directory.
#[derive(Clone, Debug)]
pub struct DirStylesheets {
    root: PathBuf,
}

impl DirStylesheets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl StylesheetLoader for DirStylesheets {
    fn open(&mut self, path: &str) -> io::Result<Box<dyn Read + '_>> {
        let file = std::fs::File::open(self.root.join(path))?;
        Ok(Box::new(io::BufReader::new(file)))
    }
}

/// In-memory stylesheets keyed by resolved path.
impl StylesheetLoader for BTreeMap<String, Vec<u8>> {
    fn open(&mut self, path: &str) -> io::Result<Box<dyn Read + '_>> {
        match self.get(path) {
            Some(bytes) => Ok(Box::new(bytes.as_slice())),
            None => Err(io::Error::new(io::ErrorKind::NotFound, path.to_string())),
        }
    }
}

/// Builds a [`TextModel`] from XHTML documents.
pub struct XhtmlReader<'e, L = NoStylesheets> {
    env: &'e StyleEnvironment,
    loader: L,
    table: Arc<StyleSheetTable>,
}

impl<'e> XhtmlReader<'e, NoStylesheets> {
    pub fn new(env: &'e StyleEnvironment) -> Self {
        Self::with_loader(env, NoStylesheets)
    }
}

impl<'e, L: StylesheetLoader> XhtmlReader<'e, L> {
    pub fn with_loader(env: &'e StyleEnvironment, loader: L) -> Self {
        Self {
            env,
            loader,
            table: Arc::new(StyleSheetTable::new()),
        }
    }

    /// Rules every document starts from, e.g. a user stylesheet.
    ///
    /// Rules found inside a document are added to a private copy.
    pub fn with_table(mut self, table: Arc<StyleSheetTable>) -> Self {
        self.table = table;
        self
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    /// Read one document into a fresh model.
    ///
    /// `reference` is the document path inside the book; hyperlinks,
    /// labels and stylesheet paths are resolved against it.
    pub fn read(&mut self, reference: &str, bytes: &[u8]) -> Result<TextModel, CascadeError> {
        let mut model = TextModel::new();
        self.read_into(reference, bytes, &mut model)?;
        Ok(model)
    }

    /// Append one document to an existing model.
    pub fn read_into(
        &mut self,
        reference: &str,
        bytes: &[u8],
        model: &mut TextModel,
    ) -> Result<(), CascadeError> {
        let limits = self.env.config().limits;
        let mut session = Session {
            decorations: self.env.decorations(),
            limits,
            loader: &mut self.loader,
            model,
            reference,
            cascade: StyleCascade::new(Arc::clone(&self.table), limits),
            contexts: vec![ParseContext::root()],
            flattened: 0,
            paragraph: None,
            bottom_margins: Vec::new(),
            read_state: ReadState::Nothing,
            style_block: None,
            preformatted: 0,
            hyperlinks: Vec::new(),
        };
        session.add_label(reference.to_string());
        session.run(bytes).map_err(|err| {
            let has_source = err.context.as_ref().is_some_and(|ctx| ctx.source.is_some());
            if has_source {
                err
            } else {
                err.with_source(reference)
            }
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReadState {
    Nothing,
    Style,
    Body,
}

/// Per-element reader state, parallel to the cascade stack.
#[derive(Clone, Debug)]
struct ParseContext {
    kind: Option<TextKind>,
    /// Resolved style, only kept when non-empty.
    style: Option<Style>,
    opacity: u8,
    styles_applied: bool,
    have_content: bool,
    bottom_margin_applied: bool,
}

impl ParseContext {
    fn root() -> Self {
        Self {
            kind: None,
            style: None,
            opacity: 255,
            styles_applied: false,
            have_content: false,
            bottom_margin_applied: false,
        }
    }

    fn text_style(&self) -> Option<&StyleEntry> {
        self.style
            .as_ref()
            .map(|style| &style.text_style)
            .filter(|entry| !entry.is_empty())
    }

    fn style_length(&self, kind: LengthKind) -> Option<Length> {
        self.style.as_ref().and_then(|s| s.text_style.length(kind))
    }
}

#[derive(Clone, Debug)]
struct OpenHyperlink {
    kind: TextKind,
    hyperlink_type: HyperlinkType,
    label: String,
}

/// Rule sink that stops accepting rules at `max_rules`.
struct LimitedTable<'t> {
    table: &'t mut StyleSheetTable,
    max_rules: usize,
    rejected: usize,
}

impl<'t> LimitedTable<'t> {
    fn new(table: &'t mut StyleSheetTable, max_rules: usize) -> Self {
        Self {
            table,
            max_rules,
            rejected: 0,
        }
    }

    fn check(self, source: &str) -> Result<(), CascadeError> {
        if self.rejected == 0 {
            return Ok(());
        }
        Err(CascadeError::new(
            ErrorPhase::Parse,
            "CASCADE_RULE_LIMIT",
            "stylesheet rule count exceeds limit",
        )
        .with_source(source)
        .with_limit(
            "max_rules",
            self.table.len() + self.rejected,
            self.max_rules,
        ))
    }
}

impl RuleSink for LimitedTable<'_> {
    fn store_rule(&mut self, selector: &str, declarations: &AttributeMap) {
        if self.table.len() >= self.max_rules {
            self.rejected += 1;
            return;
        }
        self.table.add_rule(selector, declarations);
    }
}

struct StyleBlock {
    parser: StyleSheetParser,
    bytes: usize,
}

#[derive(Debug, Default)]
struct StartTag {
    name: String,
    attributes: SmallVec<[(String, String); 4]>,
}

impl StartTag {
    fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

struct Session<'a, L> {
    decorations: &'a DecorationTable,
    limits: CascadeLimits,
    loader: &'a mut L,
    model: &'a mut TextModel,
    reference: &'a str,
    cascade: StyleCascade,
    contexts: Vec<ParseContext>,
    flattened: usize,
    paragraph: Option<Paragraph>,
    bottom_margins: Vec<StyleEntry>,
    read_state: ReadState,
    style_block: Option<StyleBlock>,
    preformatted: usize,
    hyperlinks: Vec<Option<OpenHyperlink>>,
}

impl<L: StylesheetLoader> Session<'_, L> {
    fn run(&mut self, bytes: &[u8]) -> Result<(), CascadeError> {
        let mut reader = Reader::from_reader(bytes);
        reader.config_mut().trim_text(false);
        let mut buf = Vec::with_capacity(64);
        let mut entity_buf = String::with_capacity(16);

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    let tag = start_tag(&reader, &e, self.limits.max_inline_style_bytes)?;
                    self.start_element(&tag)?;
                }
                Ok(Event::Empty(e)) => {
                    let tag = start_tag(&reader, &e, self.limits.max_inline_style_bytes)?;
                    self.start_element(&tag)?;
                    self.end_element(&tag.name)?;
                }
                Ok(Event::End(e)) => {
                    let name = decode_tag_name(&reader, e.name().as_ref())?;
                    self.end_element(&name)?;
                }
                Ok(Event::Text(e)) => {
                    let text = e
                        .decode()
                        .map_err(|err| decode_error(&reader, "text node decode", err))?;
                    self.character_data(&text)?;
                }
                Ok(Event::CData(e)) => {
                    let text = reader
                        .decoder()
                        .decode(&e)
                        .map_err(|err| decode_error(&reader, "cdata decode", err))?;
                    self.character_data(&text)?;
                }
                Ok(Event::GeneralRef(e)) => {
                    let name = e
                        .decode()
                        .map_err(|err| decode_error(&reader, "entity decode", err))?;
                    entity_buf.clear();
                    entity_buf.push('&');
                    entity_buf.push_str(&name);
                    entity_buf.push(';');
                    match quick_xml::escape::unescape(&entity_buf) {
                        Ok(resolved) => self.character_data(&resolved)?,
                        Err(err) => {
                            log::debug!(
                                "keeping unknown entity {} literally: {:?}",
                                entity_buf,
                                err
                            );
                            self.character_data(&entity_buf)?;
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(err) => {
                    return Err(CascadeError::from(err)
                        .with_source(self.reference)
                        .with_token_offset(reader_token_offset(&reader)));
                }
            }
            buf.clear();
        }

        self.finish_style_block()?;
        self.end_paragraph()
    }

    fn start_element(&mut self, tag: &StartTag) -> Result<(), CascadeError> {
        let id = tag.attr("id");
        if let Some(id) = id {
            self.add_label(format!("{}#{}", self.reference, id));
        }

        let before = self.cascade.elements().len();
        let style = self
            .cascade
            .element_open(&tag.name, tag.attr("class"), id, tag.attr("style"))
            .clone();
        if self.cascade.elements().len() == before {
            self.flattened += 1;
            return Ok(());
        }

        let parent_opacity = self.contexts.last().map_or(255, |ctx| ctx.opacity);
        let opacity = match style.text_style.opacity() {
            Some(own) => (u32::from(parent_opacity) * u32::from(own) / 255) as u8,
            None => parent_opacity,
        };
        let page_break = style.page_break_before == Boolean3::True;
        self.contexts.push(ParseContext {
            style: (!style.is_empty()).then_some(style),
            opacity,
            ..ParseContext::root()
        });
        if page_break {
            self.add_page_break()?;
        }

        self.tag_start(tag)?;

        if self.paragraph.is_some() {
            self.apply_styles(self.contexts.len() - 1)?;
        }
        Ok(())
    }

    fn end_element(&mut self, name: &str) -> Result<(), CascadeError> {
        if self.flattened > 0 {
            self.flattened -= 1;
            self.cascade.element_close()?;
            return Ok(());
        }
        if self.contexts.len() <= 1 {
            return Err(CascadeError::new(
                ErrorPhase::Cascade,
                "CASCADE_STACK_UNDERFLOW",
                format!("</{}> closes no open element", name),
            ));
        }

        let page_break = self
            .contexts
            .last()
            .and_then(|ctx| ctx.style.as_ref())
            .is_some_and(|style| style.page_break_after == Boolean3::True);
        if page_break {
            self.bottom_margins.clear();
        }

        self.tag_end(name)?;

        if page_break {
            self.add_page_break()?;
        }

        let last = self.contexts.len() - 1;
        if let Some(paragraph) = self.paragraph.as_mut() {
            let ctx = &self.contexts[last];
            if ctx.text_style().is_some() {
                paragraph.add_control(TextKind::Regular, false);
            }
            if let Some(kind) = ctx.kind {
                paragraph.add_control(kind, false);
            }
        }

        let ctx = &self.contexts[last];
        if !ctx.bottom_margin_applied && self.has_bottom_margin(ctx) {
            let margin = ctx
                .style_length(LengthKind::SpaceAfter)
                .or_else(|| full_decoration(self.decorations, ctx.kind).map(|d| d.space_after));
            if let Some(margin) = margin.filter(|m| m.size > 0) {
                self.add_bottom_margin(margin);
            }
        }

        if self.paragraph.is_none() {
            self.apply_bottom_margins()?;
        }

        self.contexts.pop();
        self.cascade.element_close()?;
        Ok(())
    }

    fn tag_start(&mut self, tag: &StartTag) -> Result<(), CascadeError> {
        match tag.name.as_str() {
            "body" => self.read_state = ReadState::Body,
            "style" => {
                if is_css_type(tag.attr("type")) && self.read_state == ReadState::Nothing {
                    self.read_state = ReadState::Style;
                    self.style_block = Some(StyleBlock {
                        parser: StyleSheetParser::new(),
                        bytes: 0,
                    });
                }
            }
            "link" => self.load_linked_stylesheet(tag)?,
            "p" | "div" | "td" | "th" => self.end_paragraph()?,
            "li" => {
                self.end_paragraph()?;
                self.begin_paragraph()?;
                self.add_text(LIST_BULLET)?;
            }
            "pre" => {
                self.end_paragraph()?;
                self.set_kind(TextKind::Preformatted);
                self.preformatted += 1;
                if self.preformatted == 1 {
                    self.begin_paragraph()?;
                }
            }
            "a" => self.hyperlink_start(tag)?,
            "img" => self.image(tag, &["src"])?,
            "object" => self.image(tag, &["data"])?,
            "image" => self.image(tag, &["xlink:href", "href"])?,
            name => {
                if let Some(kind) = block_kind(name) {
                    self.end_paragraph()?;
                    self.set_kind(kind);
                } else if let Some(kind) = inline_kind(name) {
                    self.set_kind(kind);
                }
            }
        }
        Ok(())
    }

    fn tag_end(&mut self, name: &str) -> Result<(), CascadeError> {
        match name {
            "body" => {
                self.end_paragraph()?;
                self.read_state = ReadState::Nothing;
            }
            "style" => self.finish_style_block()?,
            "p" | "div" | "td" | "th" | "li" => self.end_paragraph()?,
            "pre" => {
                self.preformatted = self.preformatted.saturating_sub(1);
                if self.preformatted == 0 {
                    self.end_paragraph()?;
                }
            }
            "a" => {
                if let Some(Some(link)) = self.hyperlinks.pop() {
                    if let Some(paragraph) = self.paragraph.as_mut() {
                        paragraph.add_control(link.kind, false);
                    }
                }
            }
            "br" => {
                if let Some(paragraph) = self.paragraph.as_mut() {
                    paragraph.add_line_break();
                } else {
                    self.begin_paragraph()?;
                    self.add_line_break();
                    self.end_paragraph()?;
                }
            }
            name if block_kind(name).is_some() => self.end_paragraph()?,
            _ => {}
        }
        Ok(())
    }

    fn set_kind(&mut self, kind: TextKind) {
        if let Some(ctx) = self.contexts.last_mut() {
            ctx.kind = Some(kind);
        }
    }

    fn hyperlink_start(&mut self, tag: &StartTag) -> Result<(), CascadeError> {
        let link = match tag.attr("href").filter(|href| !href.is_empty()) {
            Some(href) if tag.attr("epub:type") == Some("noteref") => Some(OpenHyperlink {
                kind: TextKind::Footnote,
                hyperlink_type: HyperlinkType::Internal,
                label: href.to_string(),
            }),
            Some(href) => {
                let decoded = percent_decode(href);
                if is_external_reference(&decoded) {
                    Some(OpenHyperlink {
                        kind: TextKind::ExternalHyperlink,
                        hyperlink_type: HyperlinkType::External,
                        label: decoded,
                    })
                } else {
                    let label = if decoded.starts_with('#') {
                        normalize_path(&format!("{}{}", self.reference, decoded))
                    } else {
                        resolve_relative(self.reference, &decoded)
                    };
                    Some(OpenHyperlink {
                        kind: TextKind::InternalHyperlink,
                        hyperlink_type: HyperlinkType::Internal,
                        label,
                    })
                }
            }
            None => None,
        };
        if let (Some(link), Some(paragraph)) = (link.as_ref(), self.paragraph.as_mut()) {
            paragraph.add_hyperlink_control(link.kind, link.hyperlink_type, &link.label)?;
        }
        self.hyperlinks.push(link);

        if let Some(name) = tag.attr("name") {
            self.add_label(format!("{}#{}", self.reference, percent_decode(name)));
        }
        Ok(())
    }

    fn image(&mut self, tag: &StartTag, keys: &[&str]) -> Result<(), CascadeError> {
        let transparent = self.contexts.last().is_some_and(|ctx| ctx.opacity == 0);
        if transparent || self.cascade.hidden() {
            return Ok(());
        }
        let Some(src) = keys
            .iter()
            .find_map(|key| tag.attr(key))
            .filter(|src| !src.is_empty())
        else {
            return Ok(());
        };
        let id = resolve_relative(self.reference, &percent_decode(src));
        self.set_kind(TextKind::Image);
        self.have_content()?;
        if let Some(paragraph) = self.paragraph.as_mut() {
            paragraph.add_image(&id, 0)?;
        }
        Ok(())
    }

    fn load_linked_stylesheet(&mut self, tag: &StartTag) -> Result<(), CascadeError> {
        let is_stylesheet = tag.attr("rel").is_some_and(|rel| {
            rel.split_whitespace()
                .any(|v| v.eq_ignore_ascii_case("stylesheet"))
        });
        if !is_stylesheet || !is_css_type(tag.attr("type")) {
            return Ok(());
        }
        let Some(href) = tag.attr("href").filter(|href| !href.is_empty()) else {
            return Ok(());
        };
        let path = resolve_relative(self.reference, &percent_decode(href));
        let mut stream = match self.loader.open(&path) {
            Ok(stream) => stream,
            Err(err) => {
                log::warn!("cannot open stylesheet {}: {}", path, err);
                return Ok(());
            }
        };

        let max_bytes = self.limits.max_css_bytes;
        let max_rules = self.limits.max_rules;
        let mut parser = StyleSheetParser::new();
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let mut total = 0usize;
        loop {
            let n = match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(CascadeError::from(e).with_source(path)),
            };
            total += n;
            if total > max_bytes {
                return Err(css_too_large(&path, total, max_bytes));
            }
            let mut sink = LimitedTable::new(self.cascade.table_mut(), max_rules);
            parser.parse(&chunk[..n], &mut sink);
            sink.check(&path)?;
        }
        let mut sink = LimitedTable::new(self.cascade.table_mut(), max_rules);
        parser.finish(&mut sink);
        sink.check(&path)?;
        log::debug!("loaded stylesheet {} ({} bytes)", path, total);
        Ok(())
    }

    fn feed_style_block(&mut self, text: &str) -> Result<(), CascadeError> {
        let Some(block) = self.style_block.as_mut() else {
            return Ok(());
        };
        block.bytes += text.len();
        if block.bytes > self.limits.max_css_bytes {
            return Err(css_too_large(
                "<style>",
                block.bytes,
                self.limits.max_css_bytes,
            ));
        }
        let mut sink = LimitedTable::new(self.cascade.table_mut(), self.limits.max_rules);
        block.parser.parse(text.as_bytes(), &mut sink);
        sink.check("<style>")
    }

    fn finish_style_block(&mut self) -> Result<(), CascadeError> {
        if self.read_state == ReadState::Style {
            self.read_state = ReadState::Nothing;
        }
        let Some(mut block) = self.style_block.take() else {
            return Ok(());
        };
        let mut sink = LimitedTable::new(self.cascade.table_mut(), self.limits.max_rules);
        block.parser.finish(&mut sink);
        sink.check("<style>")
    }

    fn character_data(&mut self, text: &str) -> Result<(), CascadeError> {
        match self.read_state {
            ReadState::Nothing => Ok(()),
            ReadState::Style => self.feed_style_block(text),
            ReadState::Body => self.body_text(text),
        }
    }

    fn body_text(&mut self, text: &str) -> Result<(), CascadeError> {
        let transparent = self.contexts.last().is_some_and(|ctx| ctx.opacity == 0);
        if transparent || self.cascade.hidden() {
            return Ok(());
        }
        let white_space = self.cascade.current_style().white_space;

        if self.preformatted > 0 || white_space.preserves_spaces() {
            return self.preformatted_text(text);
        }

        let mut rest = text;
        if self.paragraph.is_none() {
            let trimmed = rest.trim_start_matches(|c: char| c.is_ascii_whitespace());
            if white_space.preserves_newlines() {
                let newlines = rest[..rest.len() - trimmed.len()]
                    .bytes()
                    .filter(|b| *b == b'\n')
                    .count();
                for _ in 0..newlines {
                    self.have_content()?;
                    self.add_line_break();
                }
            }
            rest = trimmed;
        }
        if !rest.is_empty() {
            self.have_content()?;
            self.add_text(rest)?;
        }
        Ok(())
    }

    /// Whitespace runs become fixed spaces and line breaks.
    fn preformatted_text(&mut self, text: &str) -> Result<(), CascadeError> {
        let mut spaces = 0usize;
        let mut run_start = None;
        for (i, c) in text.char_indices() {
            if c.is_ascii_whitespace() {
                if let Some(start) = run_start.take() {
                    self.have_content()?;
                    self.add_text(&text[start..i])?;
                }
                if c == '\n' {
                    self.have_content()?;
                    self.add_fixed_spaces(spaces);
                    spaces = 0;
                    self.add_line_break();
                } else if c != '\r' {
                    spaces += 1;
                }
            } else if run_start.is_none() {
                if spaces > 0 {
                    self.have_content()?;
                    self.add_fixed_spaces(spaces);
                    spaces = 0;
                }
                run_start = Some(i);
            }
        }
        if let Some(start) = run_start {
            self.have_content()?;
            self.add_text(&text[start..])?;
        }
        if spaces > 0 {
            self.have_content()?;
            self.add_fixed_spaces(spaces);
        }
        Ok(())
    }

    fn add_text(&mut self, text: &str) -> Result<(), CascadeError> {
        match self.paragraph.as_mut() {
            Some(paragraph) => paragraph.add_text(text),
            None => Ok(()),
        }
    }

    fn add_line_break(&mut self) {
        if let Some(paragraph) = self.paragraph.as_mut() {
            paragraph.add_line_break();
        }
    }

    fn add_fixed_spaces(&mut self, mut count: usize) {
        let Some(paragraph) = self.paragraph.as_mut() else {
            return;
        };
        while count > 0 {
            let step = count.min(u8::MAX as usize);
            paragraph.add_fixed_hspace(step as u8);
            count -= step;
        }
    }

    fn add_label(&mut self, name: String) {
        let index = self.model.len();
        self.model.add_label(name, index);
    }

    fn has_top_margin(&self, ctx: &ParseContext) -> bool {
        ctx.style
            .as_ref()
            .is_some_and(|s| s.text_style.length_supported(LengthKind::SpaceBefore))
            || full_decoration(self.decorations, ctx.kind).is_some()
    }

    fn has_bottom_margin(&self, ctx: &ParseContext) -> bool {
        ctx.style
            .as_ref()
            .is_some_and(|s| s.text_style.length_supported(LengthKind::SpaceAfter))
            || full_decoration(self.decorations, ctx.kind).is_some()
    }

    fn add_bottom_margin(&mut self, margin: Length) {
        for entry in &mut self.bottom_margins {
            if let Some(existing) = entry.length(LengthKind::SpaceAfter) {
                if existing.unit == margin.unit {
                    entry.set_length(
                        LengthKind::SpaceAfter,
                        existing.size.saturating_add(margin.size),
                        margin.unit,
                    );
                    return;
                }
            }
        }
        let mut entry = StyleEntry::new();
        entry.set_length_value(LengthKind::SpaceAfter, margin);
        self.bottom_margins.push(entry);
    }

    fn apply_bottom_margins(&mut self) -> Result<(), CascadeError> {
        if self.bottom_margins.is_empty() {
            return Ok(());
        }
        self.flush_paragraph();
        for entry in std::mem::take(&mut self.bottom_margins) {
            self.add_style_paragraph(&entry)?;
        }
        Ok(())
    }

    /// Close the open paragraph without touching margin bookkeeping.
    fn flush_paragraph(&mut self) {
        if let Some(paragraph) = self.paragraph.take() {
            self.model.push(paragraph);
            for ctx in &mut self.contexts {
                ctx.styles_applied = false;
            }
        }
    }

    fn add_style_paragraph(&mut self, entry: &StyleEntry) -> Result<(), CascadeError> {
        self.flush_paragraph();
        let mut paragraph = Paragraph::new(ParagraphKind::Text);
        paragraph.add_style_entry(entry)?;
        paragraph.add_empty();
        self.model.push(paragraph);
        Ok(())
    }

    fn add_page_break(&mut self) -> Result<(), CascadeError> {
        self.bottom_margins.clear();
        self.end_paragraph()?;
        let needs_break = self
            .model
            .paragraphs()
            .last()
            .is_some_and(|p| p.kind() != ParagraphKind::EndOfSection);
        if needs_break {
            self.model.push(Paragraph::new(ParagraphKind::EndOfSection));
        }
        Ok(())
    }

    fn apply_styles(&mut self, index: usize) -> Result<(), CascadeError> {
        let Some(paragraph) = self.paragraph.as_mut() else {
            return Ok(());
        };
        let ctx = &mut self.contexts[index];
        if ctx.styles_applied {
            return Ok(());
        }
        ctx.styles_applied = true;
        if let Some(kind) = ctx.kind {
            paragraph.add_control(kind, true);
        }
        if let Some(entry) = ctx.text_style() {
            paragraph.add_style_entry(entry)?;
        }
        Ok(())
    }

    fn begin_paragraph(&mut self) -> Result<(), CascadeError> {
        if self.paragraph.is_some() {
            return Ok(());
        }
        self.paragraph = Some(Paragraph::new(ParagraphKind::Text));
        for index in 0..self.contexts.len() {
            self.apply_styles(index)?;
        }
        let open_link = self.hyperlinks.iter().rev().find_map(Option::as_ref);
        if let (Some(link), Some(paragraph)) = (open_link, self.paragraph.as_mut()) {
            paragraph.add_hyperlink_control(link.kind, link.hyperlink_type, &link.label)?;
        }
        Ok(())
    }

    fn end_paragraph(&mut self) -> Result<(), CascadeError> {
        let Some(paragraph) = self.paragraph.take() else {
            return Ok(());
        };
        self.model.push(paragraph);

        let mut marked = false;
        for index in (0..self.contexts.len()).rev() {
            let has_margin = !marked && self.has_bottom_margin(&self.contexts[index]);
            let ctx = &mut self.contexts[index];
            ctx.styles_applied = false;
            if has_margin {
                ctx.bottom_margin_applied = true;
                marked = true;
            }
        }

        self.apply_bottom_margins()
    }

    /// Emit top margins of ancestors that had no content yet, then open a
    /// paragraph. The innermost margin rides on that paragraph.
    fn have_content(&mut self) -> Result<(), CascadeError> {
        let innermost_has_content = self.contexts.last().is_some_and(|ctx| ctx.have_content);
        if !innermost_has_content {
            let mut skipped_innermost = false;
            for index in (0..self.contexts.len()).rev() {
                if self.contexts[index].have_content {
                    break;
                }
                self.contexts[index].have_content = true;
                let ctx = &self.contexts[index];
                if !self.has_top_margin(ctx) {
                    continue;
                }
                if !skipped_innermost {
                    skipped_innermost = true;
                    continue;
                }
                let margin = ctx
                    .style_length(LengthKind::SpaceBefore)
                    .or_else(|| {
                        full_decoration(self.decorations, ctx.kind).map(|d| d.space_before)
                    });
                if let Some(margin) = margin.filter(|m| m.size > 0) {
                    let mut entry = StyleEntry::new();
                    entry.set_length_value(LengthKind::SpaceBefore, margin);
                    self.add_style_paragraph(&entry)?;
                }
            }
        }
        self.bottom_margins.clear();
        self.begin_paragraph()
    }
}

fn full_decoration(
    decorations: &DecorationTable,
    kind: Option<TextKind>,
) -> Option<&FullDecoration> {
    decorations.get(kind?)?.full.as_ref()
}

fn block_kind(tag: &str) -> Option<TextKind> {
    let kind = match tag {
        "h1" => TextKind::H1,
        "h2" => TextKind::H2,
        "h3" => TextKind::H3,
        "h4" => TextKind::H4,
        "h5" => TextKind::H5,
        "h6" => TextKind::H6,
        "blockquote" => TextKind::Blockquote,
        "dt" | "dfn" => TextKind::Definition,
        "dd" => TextKind::DefinitionDescription,
        _ => return None,
    };
    Some(kind)
}

fn inline_kind(tag: &str) -> Option<TextKind> {
    let kind = match tag {
        "strong" => TextKind::Strong,
        "b" => TextKind::Bold,
        "em" => TextKind::Emphasis,
        "i" => TextKind::Italic,
        "code" | "tt" | "kbd" | "var" | "samp" => TextKind::Code,
        "cite" => TextKind::Cite,
        "sub" => TextKind::Sub,
        "sup" => TextKind::Sup,
        "strike" => TextKind::Strikethrough,
        _ => return None,
    };
    Some(kind)
}

/// `type` attribute of `<style>` and `<link>`; absent means CSS.
fn is_css_type(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().eq_ignore_ascii_case("text/css"))
}

fn css_too_large(source: &str, actual: usize, limit: usize) -> CascadeError {
    CascadeError::new(
        ErrorPhase::Parse,
        "CASCADE_CSS_TOO_LARGE",
        "stylesheet exceeds byte limit",
    )
    .with_source(source)
    .with_limit("max_css_bytes", actual, limit)
}

fn reader_token_offset(reader: &Reader<&[u8]>) -> usize {
    usize::try_from(reader.buffer_position()).unwrap_or(usize::MAX)
}

fn decode_error(reader: &Reader<&[u8]>, source: &str, err: impl core::fmt::Debug) -> CascadeError {
    CascadeError::new(
        ErrorPhase::Parse,
        "CASCADE_UTF8_ERROR",
        format!("Decode error: {:?}", err),
    )
    .with_source(source)
    .with_token_offset(reader_token_offset(reader))
}

fn decode_tag_name(reader: &Reader<&[u8]>, raw: &[u8]) -> Result<String, CascadeError> {
    let decoded = reader
        .decoder()
        .decode(raw)
        .map_err(|err| decode_error(reader, "tag name decode", err))?;
    let local_name = decoded.rsplit(':').next().unwrap_or(decoded.as_ref());
    Ok(local_name.to_ascii_lowercase())
}

fn start_tag(
    reader: &Reader<&[u8]>,
    e: &BytesStart<'_>,
    max_inline_style_bytes: usize,
) -> Result<StartTag, CascadeError> {
    let mut tag = StartTag {
        name: decode_tag_name(reader, e.name().as_ref())?,
        attributes: SmallVec::new(),
    };
    for attr in e.attributes().flatten() {
        let key = match reader.decoder().decode(attr.key.as_ref()) {
            Ok(v) => v.to_ascii_lowercase(),
            Err(_) => continue,
        };
        let raw = match reader.decoder().decode(&attr.value) {
            Ok(v) => v,
            Err(_) => continue,
        };
        let value = match quick_xml::escape::unescape(&raw) {
            Ok(v) => v.into_owned(),
            Err(_) => raw.to_string(),
        };
        if key == "style" && value.len() > max_inline_style_bytes {
            return Err(CascadeError::new(
                ErrorPhase::Parse,
                "CASCADE_INLINE_STYLE_TOO_LARGE",
                format!("style attribute on <{}> exceeds byte limit", tag.name),
            )
            .with_token_offset(reader_token_offset(reader))
            .with_limit("max_inline_style_bytes", value.len(), max_inline_style_bytes));
        }
        tag.attributes.push((key, value));
    }
    Ok(tag)
}

/// Whether a link leaves the book: it carries a URI scheme.
pub fn is_external_reference(link: &str) -> bool {
    let Some((scheme, _)) = link.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Decode `%XX` escapes. Malformed escapes are kept as they are.
pub fn percent_decode(value: &str) -> String {
    if !value.contains('%') {
        return value.to_string();
    }
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = (hex_digit(bytes[i + 1]), hex_digit(bytes[i + 2]));
            if let (Some(hi), Some(lo)) = hex {
                out.push((hi << 4) | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Collapse `.` and `..` segments and empty components.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(8);
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }
    parts.join("/")
}

/// Resolve `rel` against the directory of `base_path`.
pub fn resolve_relative(base_path: &str, rel: &str) -> String {
    if rel.contains("://") {
        return rel.to_string();
    }
    if rel.starts_with('/') {
        return normalize_path(rel.trim_start_matches('/'));
    }
    let base_dir = base_path.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
    if base_dir.is_empty() {
        normalize_path(rel)
    } else {
        normalize_path(&format!("{}/{}", base_dir, rel))
    }
}
