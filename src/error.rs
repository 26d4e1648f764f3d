//! Error types for cascade, reader and paragraph-codec operations.
//!
//! The CSS tokenizer never fails: malformed input is discarded locally and
//! parsing continues. Errors only surface at the boundaries around it, when
//! a configured limit is exceeded, when the element stack is closed more
//! often than it was opened, or when a paragraph buffer cannot be decoded.

use core::fmt;

/// Processing phase in which an error originated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorPhase {
    /// Reading markup or stylesheet bytes.
    Parse,
    /// Resolving styles against the element stack.
    Cascade,
    /// Writing paragraph entries.
    Encode,
    /// Walking or decoding paragraph entries.
    Decode,
}

impl fmt::Display for ErrorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Parse => "parse",
            Self::Cascade => "cascade",
            Self::Encode => "encode",
            Self::Decode => "decode",
        };
        f.write_str(name)
    }
}

/// Typed actual-vs-limit context attached to limit errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorLimitContext {
    /// Which limit was hit (`max_css_bytes`, `max_rules`, ...).
    pub kind: &'static str,
    /// Observed value.
    pub actual: usize,
    /// Configured ceiling.
    pub limit: usize,
}

impl ErrorLimitContext {
    /// Create a limit context.
    pub fn new(kind: &'static str, actual: usize, limit: usize) -> Self {
        Self {
            kind,
            actual,
            limit,
        }
    }
}

/// Optional context carried by [`CascadeError`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Document or stylesheet path.
    pub source: Option<Box<str>>,
    /// Selector text involved in the failure.
    pub selector: Option<Box<str>>,
    /// Byte offset into the input being read.
    pub token_offset: Option<usize>,
    /// Actual-vs-limit details.
    pub limit: Option<ErrorLimitContext>,
}

/// Structured error for everything around the cascade engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CascadeError {
    /// Processing phase where this error originated.
    pub phase: ErrorPhase,
    /// Stable machine-readable code.
    pub code: &'static str,
    /// Human-readable message.
    pub message: Box<str>,
    /// Optional additional context.
    pub context: Option<Box<ErrorContext>>,
}

impl CascadeError {
    pub(crate) fn new(phase: ErrorPhase, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            phase,
            code,
            message: message.into().into_boxed_str(),
            context: None,
        }
    }

    pub(crate) fn decode(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorPhase::Decode, code, message)
    }

    fn context_mut(&mut self) -> &mut ErrorContext {
        self.context
            .get_or_insert_with(|| Box::new(ErrorContext::default()))
    }

    /// Attach the path of the document or stylesheet being read.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.context_mut().source = Some(source.into().into_boxed_str());
        self
    }

    /// Attach selector text.
    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.context_mut().selector = Some(selector.into().into_boxed_str());
        self
    }

    /// Attach a byte offset into the input.
    pub fn with_token_offset(mut self, token_offset: usize) -> Self {
        self.context_mut().token_offset = Some(token_offset);
        self
    }

    /// Attach actual-vs-limit details.
    pub fn with_limit(mut self, kind: &'static str, actual: usize, limit: usize) -> Self {
        self.context_mut().limit = Some(ErrorLimitContext::new(kind, actual, limit));
        self
    }

    /// Limit details, if this error was caused by a configured ceiling.
    pub fn limit(&self) -> Option<&ErrorLimitContext> {
        self.context.as_ref().and_then(|ctx| ctx.limit.as_ref())
    }
}

impl fmt::Display for CascadeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.phase, self.code, self.message)?;
        if let Some(ctx) = &self.context {
            if let Some(source) = ctx.source.as_deref() {
                write!(f, " [source={}]", source)?;
            }
            if let Some(selector) = ctx.selector.as_deref() {
                write!(f, " [selector={}]", selector)?;
            }
            if let Some(token_offset) = ctx.token_offset {
                write!(f, " [token_offset={}]", token_offset)?;
            }
            if let Some(limit) = &ctx.limit {
                write!(
                    f,
                    " [limit_kind={} actual={} limit={}]",
                    limit.kind, limit.actual, limit.limit
                )?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for CascadeError {}

impl From<quick_xml::Error> for CascadeError {
    fn from(err: quick_xml::Error) -> Self {
        CascadeError::new(ErrorPhase::Parse, "CASCADE_XML_ERROR", err.to_string())
    }
}

impl From<std::io::Error> for CascadeError {
    fn from(err: std::io::Error) -> Self {
        CascadeError::new(ErrorPhase::Parse, "CASCADE_IO_ERROR", err.to_string())
    }
}
