//! Character-at-a-time CSS tokenizer.
//!
//! Input passes through four stages per byte:
//!
//! 1. CRLF is folded into LF.
//! 2. Backslash-newline continuations are dropped.
//! 3. `/* ... */` comments are removed, except inside string literals.
//! 4. The state machine proper, driven by a stack of [`ReadState`]s.
//!
//! Every completed rule is handed to a [`RuleSink`] once per selector chain
//! in its header. Nothing here fails: malformed input is dropped locally and
//! the tokenizer carries on with the next declaration or rule.
//!
//! ```
//! use epub_cascade::css_parser::parse_stylesheet;
//!
//! let table = parse_stylesheet("@media print { p { color: red } } p { color: blue }");
//! assert_eq!(table.len(), 1);
//! ```

use std::io::Read;

use smallvec::{smallvec, SmallVec};

use crate::stylesheet::{AttributeMap, Style, StyleSheetTable};

/// Bytes pulled per read when parsing from a stream.
pub const READ_CHUNK_SIZE: usize = 1024;

/// Tokenizer states. The parser keeps them on a stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReadState {
    /// Collecting a rule header.
    Selector,
    /// Inside a rule body, before `:`.
    AttributeName,
    /// Collecting a value where whitespace is part of the value (`color`).
    AttributeValue,
    /// Collecting whitespace-separated values.
    AttributeValueSpace,
    /// Collecting comma-separated values (`font-family`).
    AttributeValueComma,
    /// Discarding the rest of a broken declaration.
    AttributeIgnore,
    StringLiteralSingle,
    StringLiteralDouble,
    /// Discarding a `{ ... }` block.
    SkipBlockCurly,
    /// Discarding a `[ ... ]` block.
    SkipBlockSquare,
    Comment,
}

impl ReadState {
    fn is_value(self) -> bool {
        matches!(
            self,
            Self::AttributeValue | Self::AttributeValueSpace | Self::AttributeValueComma
        )
    }

    fn is_string(self) -> bool {
        matches!(self, Self::StringLiteralSingle | Self::StringLiteralDouble)
    }

    fn value_state_for(property: &str) -> Self {
        match property {
            "color" => Self::AttributeValue,
            "font-family" => Self::AttributeValueComma,
            _ => Self::AttributeValueSpace,
        }
    }
}

/// Receiver of parsed rules.
pub trait RuleSink {
    /// Called once per selector chain of a closed rule. All chains of one
    /// rule header share the same declarations.
    fn store_rule(&mut self, selector: &str, declarations: &AttributeMap);
}

impl RuleSink for StyleSheetTable {
    fn store_rule(&mut self, selector: &str, declarations: &AttributeMap) {
        self.add_rule(selector, declarations);
    }
}

impl<F> RuleSink for F
where
    F: FnMut(&str, &AttributeMap),
{
    fn store_rule(&mut self, selector: &str, declarations: &AttributeMap) {
        self(selector, declarations)
    }
}

/// Sink for declaration-only input, where no rule is ever closed.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoRules;

impl RuleSink for NoRules {
    fn store_rule(&mut self, _selector: &str, _declarations: &AttributeMap) {}
}

/// Streaming CSS tokenizer.
#[derive(Clone, Debug)]
pub struct StyleSheetParser {
    states: SmallVec<[ReadState; 8]>,
    word: Vec<u8>,
    attribute_name: String,
    selectors: Vec<String>,
    declarations: AttributeMap,
    header_is_at_rule: bool,
    selector_broken: bool,
    pending_cr: bool,
    pending_backslash: bool,
    pending_slash: bool,
    comment_star: bool,
    string_escape: bool,
    offset: usize,
}

impl Default for StyleSheetParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StyleSheetParser {
    /// Parser for full stylesheets.
    pub fn new() -> Self {
        Self::with_base(ReadState::Selector)
    }

    /// Parser for a bare declaration list, as found in `style` attributes.
    pub fn for_declarations() -> Self {
        Self::with_base(ReadState::AttributeName)
    }

    fn with_base(base: ReadState) -> Self {
        Self {
            states: smallvec![base],
            word: Vec::with_capacity(32),
            attribute_name: String::new(),
            selectors: Vec::new(),
            declarations: AttributeMap::new(),
            header_is_at_rule: false,
            selector_broken: false,
            pending_cr: false,
            pending_backslash: false,
            pending_slash: false,
            comment_star: false,
            string_escape: false,
            offset: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> ReadState {
        *self.states.last().unwrap_or(&self.states[0])
    }

    /// Depth of the state stack. The base state counts as 1.
    pub fn depth(&self) -> usize {
        self.states.len()
    }

    /// Total bytes fed so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Feed one chunk. Chunks may split anywhere, including inside a
    /// comment, a string or a multi-byte character.
    pub fn parse<S: RuleSink + ?Sized>(&mut self, data: &[u8], sink: &mut S) {
        for &byte in data {
            self.fold_crlf(byte, sink);
            self.offset += 1;
        }
    }

    /// Flush bytes held back by the pipeline and close whatever is open.
    ///
    /// A pending declaration is committed; in stylesheet mode an unclosed
    /// rule is dropped. The parser is left ready for new input.
    pub fn finish<S: RuleSink + ?Sized>(&mut self, sink: &mut S) {
        if self.pending_cr {
            self.pending_cr = false;
            self.glue_continuation(b'\r', sink);
        }
        if self.pending_backslash {
            self.pending_backslash = false;
            self.strip_comments(b'\\', sink);
        }
        if self.pending_slash {
            self.pending_slash = false;
            self.tokenize(b'/', sink);
        }
        if self.state() == ReadState::Comment {
            self.pop_state();
        }
        while self.state().is_string() {
            self.pop_state();
            self.unterminated_string();
        }
        if self.state().is_value() {
            self.finish_value();
            self.pop_state();
        }
        self.states.truncate(1);
        self.word.clear();
        self.comment_star = false;
        self.string_escape = false;
        if self.states[0] == ReadState::Selector {
            self.selectors.clear();
            self.declarations.clear();
            self.header_is_at_rule = false;
            self.selector_broken = false;
        }
    }

    /// Take the declarations collected in declaration mode.
    pub fn take_declarations(&mut self) -> AttributeMap {
        core::mem::take(&mut self.declarations)
    }

    fn push_state(&mut self, state: ReadState) {
        self.states.push(state);
    }

    /// The base state is never popped.
    fn pop_state(&mut self) {
        if self.states.len() > 1 {
            self.states.pop();
        }
    }

    fn replace_state(&mut self, state: ReadState) {
        if self.states.len() > 1 {
            if let Some(top) = self.states.last_mut() {
                *top = state;
            }
        }
    }

    fn state_below_top(&self) -> ReadState {
        let len = self.states.len();
        if len >= 2 {
            self.states[len - 2]
        } else {
            self.states[0]
        }
    }

    fn fold_crlf<S: RuleSink + ?Sized>(&mut self, c: u8, sink: &mut S) {
        if self.pending_cr {
            self.pending_cr = false;
            if c == b'\n' {
                self.glue_continuation(b'\n', sink);
                return;
            }
            self.glue_continuation(b'\r', sink);
        }
        if c == b'\r' {
            self.pending_cr = true;
            return;
        }
        self.glue_continuation(c, sink);
    }

    fn glue_continuation<S: RuleSink + ?Sized>(&mut self, c: u8, sink: &mut S) {
        if self.pending_backslash {
            self.pending_backslash = false;
            if c == b'\n' {
                return;
            }
            self.strip_comments(b'\\', sink);
        }
        if c == b'\\' {
            self.pending_backslash = true;
            return;
        }
        self.strip_comments(c, sink);
    }

    fn strip_comments<S: RuleSink + ?Sized>(&mut self, c: u8, sink: &mut S) {
        if self.state() == ReadState::Comment {
            if self.comment_star && c == b'/' {
                self.comment_star = false;
                self.pop_state();
            } else {
                self.comment_star = c == b'*';
            }
            return;
        }
        if self.pending_slash {
            self.pending_slash = false;
            if c == b'*' {
                self.comment_star = false;
                self.push_state(ReadState::Comment);
                return;
            }
            self.tokenize(b'/', sink);
        }
        if c == b'/' && !self.state().is_string() {
            self.pending_slash = true;
            return;
        }
        self.tokenize(c, sink);
    }

    fn tokenize<S: RuleSink + ?Sized>(&mut self, c: u8, sink: &mut S) {
        match self.state() {
            ReadState::Selector => self.selector_byte(c),
            ReadState::AttributeName => self.name_byte(c, sink),
            state @ (ReadState::AttributeValue
            | ReadState::AttributeValueSpace
            | ReadState::AttributeValueComma) => self.value_byte(state, c, sink),
            ReadState::AttributeIgnore => self.ignore_byte(c, sink),
            state @ (ReadState::StringLiteralSingle | ReadState::StringLiteralDouble) => {
                self.string_byte(state, c)
            }
            state @ (ReadState::SkipBlockCurly | ReadState::SkipBlockSquare) => {
                self.skip_byte(state, c)
            }
            // Comment bytes never get past the stripping stage.
            ReadState::Comment => {}
        }
    }

    fn push_space(&mut self) {
        if self.word.last().is_some_and(|&b| b != b' ') {
            self.word.push(b' ');
        }
    }

    fn take_word(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.word).trim().to_string();
        self.word.clear();
        text
    }

    fn selector_byte(&mut self, c: u8) {
        match c {
            b'{' => {
                self.finish_selector();
                if self.header_is_at_rule || self.selectors.is_empty() {
                    log::debug!(
                        "skipping block at byte {} (header {:?})",
                        self.offset,
                        self.selectors
                    );
                    self.selectors.clear();
                    self.push_state(ReadState::SkipBlockCurly);
                } else {
                    self.declarations.clear();
                    self.push_state(ReadState::AttributeName);
                }
                self.header_is_at_rule = false;
            }
            b',' => self.finish_selector(),
            b';' | b'}' => self.reset_header(),
            b'"' => {
                self.selector_broken = true;
                self.push_state(ReadState::StringLiteralDouble);
            }
            b'\'' => {
                self.selector_broken = true;
                self.push_state(ReadState::StringLiteralSingle);
            }
            b'[' => {
                self.selector_broken = true;
                self.push_state(ReadState::SkipBlockSquare);
            }
            c if c.is_ascii_whitespace() => self.push_space(),
            b'@' if self.word.is_empty() && self.selectors.is_empty() => {
                self.header_is_at_rule = true;
                self.word.push(c);
            }
            _ => self.word.push(c),
        }
    }

    fn finish_selector(&mut self) {
        let text = self.take_word();
        if self.selector_broken {
            log::debug!("dropping selector with unsupported syntax: {:?}", text);
        } else if !text.is_empty() {
            self.selectors.push(text);
        }
        self.selector_broken = false;
    }

    fn reset_header(&mut self) {
        self.word.clear();
        self.selectors.clear();
        self.selector_broken = false;
        self.header_is_at_rule = false;
    }

    fn name_byte<S: RuleSink + ?Sized>(&mut self, c: u8, sink: &mut S) {
        match c {
            b':' => {
                let name = self.take_word().to_ascii_lowercase();
                if name.is_empty() {
                    self.push_state(ReadState::AttributeIgnore);
                    return;
                }
                let next = ReadState::value_state_for(&name);
                // A repeated property replaces the earlier declaration.
                self.declarations.insert(name.clone(), Vec::new());
                self.attribute_name = name;
                self.push_state(next);
            }
            b';' => self.word.clear(),
            b'}' => {
                self.word.clear();
                self.finish_rule(sink);
            }
            b'{' => {
                self.word.clear();
                self.push_state(ReadState::SkipBlockCurly);
            }
            b'"' => self.push_state(ReadState::StringLiteralDouble),
            b'\'' => self.push_state(ReadState::StringLiteralSingle),
            _ => self.word.push(c),
        }
    }

    fn finish_rule<S: RuleSink + ?Sized>(&mut self, sink: &mut S) {
        if self.states.len() < 2 {
            // Stray brace in declaration mode.
            return;
        }
        self.pop_state();
        for selector in &self.selectors {
            sink.store_rule(selector, &self.declarations);
        }
        self.selectors.clear();
        self.declarations.clear();
    }

    fn value_byte<S: RuleSink + ?Sized>(&mut self, state: ReadState, c: u8, sink: &mut S) {
        match c {
            b';' => {
                self.finish_value();
                self.pop_state();
            }
            b'}' => {
                self.finish_value();
                self.pop_state();
                self.name_byte(b'}', sink);
            }
            b'{' => {
                self.abort_declaration();
                self.push_state(ReadState::SkipBlockCurly);
            }
            b'"' => self.push_state(ReadState::StringLiteralDouble),
            b'\'' => self.push_state(ReadState::StringLiteralSingle),
            b',' if state == ReadState::AttributeValueComma => self.finish_value(),
            c if c.is_ascii_whitespace() => {
                if state == ReadState::AttributeValueSpace {
                    self.finish_value();
                } else {
                    self.push_space();
                }
            }
            _ => self.word.push(c),
        }
    }

    fn finish_value(&mut self) {
        let value = self.take_word();
        if value.is_empty() {
            return;
        }
        self.declarations
            .entry(self.attribute_name.clone())
            .or_default()
            .push(value);
    }

    /// Drop the declaration being collected and ignore the rest of it.
    fn abort_declaration(&mut self) {
        log::debug!(
            "dropping declaration {:?} at byte {}",
            self.attribute_name,
            self.offset
        );
        self.declarations.remove(&self.attribute_name);
        self.word.clear();
        self.replace_state(ReadState::AttributeIgnore);
    }

    fn ignore_byte<S: RuleSink + ?Sized>(&mut self, c: u8, sink: &mut S) {
        match c {
            b';' => self.pop_state(),
            b'}' => {
                self.pop_state();
                self.name_byte(b'}', sink);
            }
            b'{' => self.push_state(ReadState::SkipBlockCurly),
            b'"' => self.push_state(ReadState::StringLiteralDouble),
            b'\'' => self.push_state(ReadState::StringLiteralSingle),
            _ => {}
        }
    }

    fn string_byte(&mut self, state: ReadState, c: u8) {
        if self.string_escape {
            self.string_escape = false;
            self.append_string_byte(c);
            return;
        }
        let closing = if state == ReadState::StringLiteralSingle {
            b'\''
        } else {
            b'"'
        };
        match c {
            b'\\' => self.string_escape = true,
            b'\n' => {
                self.pop_state();
                self.unterminated_string();
            }
            c if c == closing => self.pop_state(),
            _ => self.append_string_byte(c),
        }
    }

    fn append_string_byte(&mut self, c: u8) {
        if self.state_below_top().is_value() {
            self.word.push(c);
        }
    }

    /// A string ran into end of line. The string state is already popped.
    fn unterminated_string(&mut self) {
        self.string_escape = false;
        if self.state().is_value() {
            self.abort_declaration();
        }
    }

    fn skip_byte(&mut self, state: ReadState, c: u8) {
        match c {
            b'{' => self.push_state(ReadState::SkipBlockCurly),
            b'[' => self.push_state(ReadState::SkipBlockSquare),
            b'}' if state == ReadState::SkipBlockCurly => self.pop_state(),
            b']' if state == ReadState::SkipBlockSquare => self.pop_state(),
            b'"' => self.push_state(ReadState::StringLiteralDouble),
            b'\'' => self.push_state(ReadState::StringLiteralSingle),
            _ => {}
        }
    }
}

/// Parser writing straight into a [`StyleSheetTable`].
#[derive(Debug)]
pub struct StyleSheetTableParser<'t> {
    table: &'t mut StyleSheetTable,
    parser: StyleSheetParser,
}

impl<'t> StyleSheetTableParser<'t> {
    pub fn new(table: &'t mut StyleSheetTable) -> Self {
        Self {
            table,
            parser: StyleSheetParser::new(),
        }
    }

    /// Feed one chunk of stylesheet bytes.
    pub fn parse(&mut self, data: &[u8]) {
        self.parser.parse(data, &mut *self.table);
    }

    pub fn finish(&mut self) {
        self.parser.finish(&mut *self.table);
    }

    /// Read a whole stream in fixed-size chunks, then finish.
    ///
    /// Returns the number of bytes read.
    pub fn parse_reader<R: Read>(&mut self, mut reader: R) -> std::io::Result<usize> {
        let mut buf = [0u8; READ_CHUNK_SIZE];
        let mut total = 0;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            self.parse(&buf[..n]);
            total += n;
        }
        self.finish();
        Ok(total)
    }
}

/// Parse a complete stylesheet into a fresh table.
pub fn parse_stylesheet(css: &str) -> StyleSheetTable {
    let mut table = StyleSheetTable::new();
    let mut parser = StyleSheetTableParser::new(&mut table);
    parser.parse(css.as_bytes());
    parser.finish();
    table
}

/// Parse the contents of a `style` attribute.
pub fn parse_inline_style(declarations: &str) -> Style {
    let mut parser = StyleSheetParser::for_declarations();
    parser.parse(declarations.as_bytes(), &mut NoRules);
    parser.finish(&mut NoRules);
    Style::from_declarations(&parser.take_declarations())
}
