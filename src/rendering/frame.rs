//! The isolated render target of the preview.
//!
//! A [`Frame`] is a standalone HTML document sized to the layout's pixel
//! dimensions. Layout components write their markup into its mount root and
//! their styles into its own [`StyleRoot`]; nothing from the host document
//! ever reaches it, and nothing it holds is ever written back to the host.

use scraper::{Html, Node, Selector};

use crate::layout::LayoutComponent;
use crate::{Dimensions, Error, LayoutData, Result};

/// Id of the element the layout markup is mounted into
pub const FRAME_ROOT_ID: &str = "generator-frame-root";

/// Elements never allowed inside a frame
const STRIPPED_ELEMENTS: &str = "script, style, link, iframe, object, embed, meta, base";

/// Style root of a frame. Rules injected here apply to that frame only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StyleRoot {
    rules: Vec<String>,
}

impl StyleRoot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stylesheet. Empty sheets are ignored.
    pub fn inject(&mut self, css: impl Into<String>) {
        let css = css.into();
        if !css.trim().is_empty() {
            self.rules.push(css);
        }
    }

    pub fn sheets(&self) -> &[String] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Snapshot of the preview surface for one data revision
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    dimensions: Dimensions,
    head: StyleRoot,
    markup: String,
    detached: bool,
}

impl Frame {
    /// Frame with nothing mounted yet
    pub fn empty(dimensions: Dimensions) -> Self {
        Self {
            dimensions,
            head: StyleRoot::new(),
            markup: String::new(),
            detached: false,
        }
    }

    /// Render `component` with `data` into a fresh frame.
    ///
    /// `<style>` blocks found in the markup are moved into the frame's style
    /// root; scripts and other external-loading elements are dropped.
    pub fn mount(component: &dyn LayoutComponent, data: &LayoutData, dimensions: Dimensions) -> Result<Self> {
        let mut head = StyleRoot::new();
        let markup = component.render(data, &mut head)?;
        let (markup, inline_sheets) = sanitize_markup(&markup)?;
        for sheet in inline_sheets {
            head.inject(sheet);
        }
        Ok(Self {
            dimensions,
            head,
            markup,
            detached: false,
        })
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    pub fn style_root(&self) -> &StyleRoot {
        &self.head
    }

    /// Markup mounted under the frame root
    pub fn markup(&self) -> &str {
        &self.markup
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    /// Unmount the surface; captures of a detached frame fail.
    pub fn detach(&mut self) {
        self.detached = true;
    }

    /// Base styles of every frame: no margins, everything sized to the frame.
    pub fn reset_css(&self) -> String {
        let Dimensions { width, height } = self.dimensions;
        format!(
            "html, body, #{root} {{ margin: 0; padding: 0; width: {width}px; height: {height}px; box-sizing: border-box; }}\n\
             body {{ font-size: 16px; color: #000000; line-height: 1.2; }}\n\
             h1 {{ font-size: 2em; }}\n\
             h2 {{ font-size: 1.5em; }}\n\
             h3 {{ font-size: 1.17em; }}\n",
            root = FRAME_ROOT_ID,
        )
    }

    /// All stylesheets of the frame in cascade order: reset first.
    pub fn stylesheets(&self) -> Vec<String> {
        let mut sheets = Vec::with_capacity(self.head.rules.len() + 1);
        sheets.push(self.reset_css());
        sheets.extend(self.head.rules.iter().cloned());
        sheets
    }

    /// Serialize the frame as a complete HTML document
    pub fn to_html(&self) -> String {
        let mut html = String::from("<!DOCTYPE html><html><head>");
        for sheet in self.stylesheets() {
            html.push_str("<style>");
            html.push_str(&sheet.replace("</style", "<\\/style"));
            html.push_str("</style>");
        }
        html.push_str("</head><body><div id=\"");
        html.push_str(FRAME_ROOT_ID);
        html.push_str("\">");
        html.push_str(&self.markup);
        html.push_str("</div></body></html>");
        html
    }

    /// Parse the frame into a DOM for layout
    pub fn document(&self) -> Html {
        Html::parse_document(&self.to_html())
    }
}

/// The `src` of an `<img>` as loaded and looked up during capture.
///
/// Surrounding whitespace is dropped; an empty source is no source.
pub fn image_source(element: &scraper::node::Element) -> Option<&str> {
    element.attr("src").map(str::trim).filter(|src| !src.is_empty())
}

pub(crate) fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| Error::RenderError(format!("bad selector {:?}: {:?}", css, e)))
}

/// Drop disallowed elements and pull out inline stylesheets.
fn sanitize_markup(markup: &str) -> Result<(String, Vec<String>)> {
    let mut fragment = Html::parse_fragment(markup);
    let stripped = selector(STRIPPED_ELEMENTS)?;

    let mut sheets = Vec::new();
    let mut doomed = Vec::new();
    for element in fragment.select(&stripped) {
        if element.value().name() == "style" {
            sheets.push(element.text().collect::<String>());
        } else {
            log::debug!("dropping <{}> from layout markup", element.value().name());
        }
        doomed.push(element.id());
    }
    for id in doomed {
        if let Some(mut node) = fragment.tree.get_mut(id) {
            node.detach();
        }
    }

    // inline event handlers
    let elements: Vec<_> = fragment
        .tree
        .nodes()
        .filter(|n| n.value().is_element())
        .map(|n| n.id())
        .collect();
    for id in elements {
        if let Some(mut node) = fragment.tree.get_mut(id) {
            if let Node::Element(element) = node.value() {
                element.attrs.retain(|name, _| !name.local.to_ascii_lowercase().starts_with("on"));
            }
        }
    }

    Ok((fragment.root_element().inner_html(), sheets))
}
