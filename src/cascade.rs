//! Element-path cascade driver and engine configuration.
//!
//! [`StyleCascade`] mirrors the markup nesting: the reader calls
//! [`StyleCascade::element_open`] for every start tag and
//! [`StyleCascade::element_close`] for every end tag, and reads the resolved
//! [`Style`] of the innermost open element in between.

use std::sync::Arc;

use crate::css_parser::parse_inline_style;
use crate::error::{CascadeError, ErrorPhase};
use crate::stylesheet::{Element, Style, StyleSheetTable};

/// Hard ceilings for stylesheet input and element nesting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CascadeLimits {
    /// Maximum bytes read for any one stylesheet.
    pub max_css_bytes: usize,
    /// Maximum rules kept in a table.
    pub max_rules: usize,
    /// Deeper elements are flattened into their parent.
    pub max_nesting: usize,
    /// Maximum bytes of a single `style="..."` attribute.
    pub max_inline_style_bytes: usize,
}

impl Default for CascadeLimits {
    fn default() -> Self {
        Self {
            max_css_bytes: 512 * 1024,
            max_rules: 4096,
            max_nesting: 256,
            max_inline_style_bytes: 16 * 1024,
        }
    }
}

impl CascadeLimits {
    /// Tighter preset for small-RAM devices.
    pub fn embedded() -> Self {
        Self {
            max_css_bytes: 64 * 1024,
            max_rules: 1024,
            max_nesting: 64,
            max_inline_style_bytes: 4 * 1024,
        }
    }
}

/// Engine options shared by the reader and the style environment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CascadeConfig {
    pub limits: CascadeLimits,
    /// Screen density used for the default font size.
    pub ppi: u32,
    /// Ignore `font-family` coming from book stylesheets.
    pub override_specified_fonts: bool,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            limits: CascadeLimits::default(),
            ppi: 330,
            override_specified_fonts: false,
        }
    }
}

impl CascadeConfig {
    pub fn with_limits(mut self, limits: CascadeLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_ppi(mut self, ppi: u32) -> Self {
        self.ppi = ppi;
        self
    }

    pub fn with_override_specified_fonts(mut self, value: bool) -> Self {
        self.override_specified_fonts = value;
        self
    }
}

/// Strip a namespace prefix and lowercase a tag name.
pub fn local_tag_name(tag: &str) -> String {
    let local = tag.rsplit_once(':').map_or(tag, |(_, local)| local);
    local.to_ascii_lowercase()
}

/// Ancestor stack with the resolved style of every open element.
#[derive(Clone, Debug)]
pub struct StyleCascade {
    table: Arc<StyleSheetTable>,
    limits: CascadeLimits,
    elements: Vec<Element>,
    styles: Vec<Style>,
    flattened: usize,
    root: Style,
}

impl StyleCascade {
    pub fn new(table: Arc<StyleSheetTable>, limits: CascadeLimits) -> Self {
        Self {
            table,
            limits,
            elements: Vec::new(),
            styles: Vec::new(),
            flattened: 0,
            root: Style::default(),
        }
    }

    pub fn table(&self) -> &Arc<StyleSheetTable> {
        &self.table
    }

    /// Mutable access for adding rules mid-document. Clones the table if it
    /// is shared.
    pub fn table_mut(&mut self) -> &mut StyleSheetTable {
        Arc::make_mut(&mut self.table)
    }

    /// Replace the rule table. Styles of already open elements are kept.
    pub fn set_table(&mut self, table: Arc<StyleSheetTable>) {
        self.table = table;
    }

    pub fn limits(&self) -> &CascadeLimits {
        &self.limits
    }

    /// Open an element and resolve its style.
    ///
    /// The parent style is inherited first, then matching rules are applied
    /// in specificity order, then the inline declarations win over both.
    pub fn element_open(
        &mut self,
        tag: &str,
        class: Option<&str>,
        id: Option<&str>,
        inline_style: Option<&str>,
    ) -> &Style {
        if self.elements.len() >= self.limits.max_nesting {
            if self.flattened == 0 {
                log::warn!(
                    "element nesting exceeds {}; flattening <{}> into its parent",
                    self.limits.max_nesting,
                    tag
                );
            }
            self.flattened += 1;
            return self.current_style();
        }

        self.elements.push(Element::new(local_tag_name(tag), class, id));
        let mut style = Style::default();
        if let Some(parent) = self.styles.last() {
            style.inherit(parent);
        }
        self.table.apply_styles(&self.elements, &mut style);
        if let Some(inline) = inline_style.filter(|s| !s.trim().is_empty()) {
            style.apply(&parse_inline_style(inline));
        }
        self.styles.push(style);
        self.current_style()
    }

    /// Close the innermost element and return its style.
    pub fn element_close(&mut self) -> Result<Style, CascadeError> {
        if self.flattened > 0 {
            self.flattened -= 1;
            return Ok(self.current_style().clone());
        }
        match (self.elements.pop(), self.styles.pop()) {
            (Some(_), Some(style)) => Ok(style),
            _ => Err(CascadeError::new(
                ErrorPhase::Cascade,
                "CASCADE_STACK_UNDERFLOW",
                "element closed with no open element",
            )),
        }
    }

    /// Style of the innermost open element, or an empty style at the root.
    pub fn current_style(&self) -> &Style {
        self.styles.last().unwrap_or(&self.root)
    }

    /// Open elements, root first.
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Number of open elements, including flattened ones.
    pub fn depth(&self) -> usize {
        self.elements.len() + self.flattened
    }

    /// Whether any open element has `display: none`.
    pub fn hidden(&self) -> bool {
        self.styles.iter().any(|style| style.display_none)
    }
}
