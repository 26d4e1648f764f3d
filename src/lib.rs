//! CSS cascade and styled-paragraph engine for reflowable e-book text.
//!
//! The pipeline, bottom to top:
//!
//! - [`css_parser`] tokenizes stylesheets and `style` attributes without
//!   ever failing;
//! - [`stylesheet`] turns declarations into [`StyleEntry`] values and keeps
//!   rules in a specificity-ordered [`StyleSheetTable`];
//! - [`cascade`] resolves the style of each open element;
//! - [`xhtml`] drives the cascade from a document and writes
//!   [`Paragraph`]s into a [`TextModel`];
//! - [`decoration`] layers per-kind decorations and forced CSS styles over
//!   a base [`TextStyle`] when those paragraphs are laid out.
//!
//! ```
//! use epub_cascade::{StyleEnvironment, XhtmlReader};
//!
//! let env = StyleEnvironment::default();
//! let html = br#"<html><head><style>p { text-align: center }</style></head>
//! <body><p>Hello</p></body></html>"#;
//! let model = XhtmlReader::new(&env).read("ch1.xhtml", html).unwrap();
//! assert_eq!(model.paragraphs()[0].text(), "Hello");
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(feature = "std")]
pub mod cascade;
#[cfg(feature = "std")]
pub mod color;
#[cfg(feature = "std")]
pub mod css_parser;
#[cfg(feature = "std")]
pub mod decoration;
#[cfg(feature = "std")]
pub mod error;
#[cfg(feature = "std")]
pub mod paragraph;
#[cfg(feature = "std")]
pub mod style_entry;
#[cfg(feature = "std")]
pub mod stylesheet;
#[cfg(feature = "std")]
pub mod xhtml;

#[cfg(feature = "std")]
pub use cascade::{CascadeConfig, CascadeLimits, StyleCascade};
#[cfg(feature = "std")]
pub use color::{Color, ColorScheme};
#[cfg(feature = "std")]
pub use css_parser::{
    parse_inline_style, parse_stylesheet, StyleSheetParser, StyleSheetTableParser,
};
#[cfg(feature = "std")]
pub use decoration::{
    DecorationTable, StyleCursor, StyleDecoration, StyleEnvironment, TextKind, TextStyle,
};
#[cfg(feature = "std")]
pub use error::{CascadeError, ErrorPhase};
#[cfg(feature = "std")]
pub use paragraph::{Paragraph, ParagraphEntry, ParagraphKind, TextModel};
#[cfg(feature = "std")]
pub use style_entry::{Alignment, Length, LengthKind, SizeUnit, StyleEntry};
#[cfg(feature = "std")]
pub use stylesheet::{Style, StyleSheetTable};
#[cfg(feature = "std")]
pub use xhtml::{DirStylesheets, NoStylesheets, StylesheetLoader, XhtmlReader};
