//! Box layout for frame documents.
//!
//! Blocks stack vertically inside their parent's content box; absolutely
//! positioned elements are placed against their parent's content box and do
//! not take up flow space. Widths are border-box widths. Inline content is
//! flattened into text runs that wrap at the content width.

use std::collections::HashMap;

use scraper::{ElementRef, Html, Node};

use crate::rendering::font::TextMeasure;
use crate::rendering::frame::{image_source, selector};
use crate::rendering::style::{ComputedStyle, Display, Position, Stylesheet, TextAlign};
use crate::{Dimensions, Result};

/// Elements whose text joins the surrounding run instead of forming a block
const INLINE_ELEMENTS: &[&str] = &[
    "a", "abbr", "b", "bdi", "cite", "code", "em", "i", "kbd", "mark", "q", "s", "small",
    "span", "strong", "sub", "sup", "time", "u",
];

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

/// One wrapped line of a text run
#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub x: f32,
    pub baseline: f32,
    pub width: f32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeContent {
    Block,
    Text(Vec<TextLine>),
    Image { src: String },
}

/// A laid-out box with its style and content
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutNode {
    pub rect: Rect,
    pub style: ComputedStyle,
    pub content: NodeContent,
    pub children: Vec<LayoutNode>,
}

impl LayoutNode {
    fn translate(&mut self, dx: f32, dy: f32) {
        self.rect.x += dx;
        self.rect.y += dy;
        if let NodeContent::Text(lines) = &mut self.content {
            for line in lines {
                line.x += dx;
                line.baseline += dy;
            }
        }
        for child in &mut self.children {
            child.translate(dx, dy);
        }
    }

    /// Depth-first search for the first node matching `pred`
    pub fn find(&self, pred: &impl Fn(&LayoutNode) -> bool) -> Option<&LayoutNode> {
        if pred(self) {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(pred))
    }
}

/// Inputs shared by the whole layout pass
pub struct LayoutContext<'a> {
    pub sheet: &'a Stylesheet,
    pub measure: &'a dyn TextMeasure,
    /// Natural pixel size of every loaded image by source URL
    pub image_sizes: &'a HashMap<String, (u32, u32)>,
}

/// Lay out the frame's `<body>` inside a viewport of `dimensions`.
pub fn layout_document(document: &Html, dimensions: Dimensions, ctx: &LayoutContext) -> Result<LayoutNode> {
    let viewport = Rect::new(0.0, 0.0, dimensions.width as f32, dimensions.height as f32);
    let html_style = ctx.sheet.compute(&document.root_element(), &ComputedStyle::default());

    let body_selector = selector("body")?;
    let Some(body) = document.select(&body_selector).next() else {
        return Ok(LayoutNode {
            rect: viewport,
            style: html_style,
            content: NodeContent::Block,
            children: Vec::new(),
        });
    };

    let mut root = ctx
        .layout_element(body, &html_style, viewport, 0.0)
        .map(|(node, _)| node)
        .unwrap_or(LayoutNode {
            rect: viewport,
            style: html_style.clone(),
            content: NodeContent::Block,
            children: Vec::new(),
        });
    // the frame canvas always covers the viewport
    root.rect = viewport;
    if !root.style.background.is_visible() {
        root.style.background = html_style.background;
    }
    Ok(root)
}

impl LayoutContext<'_> {
    /// Lay out `element` within `containing`, starting at `cursor_y` when in
    /// flow. Returns the node and the vertical space it takes in flow.
    fn layout_element(
        &self,
        element: ElementRef,
        parent: &ComputedStyle,
        containing: Rect,
        cursor_y: f32,
    ) -> Option<(LayoutNode, f32)> {
        let style = self.sheet.compute(&element, parent);
        if style.display == Display::None {
            return None;
        }
        if element.value().name() == "img" {
            return Some(self.layout_image(element, style, containing, cursor_y));
        }

        let absolute = style.position == Position::Absolute;
        let margin = style.margin;
        let left = style.left.map(|l| l.resolve(containing.width));
        let right = style.right.map(|l| l.resolve(containing.width));
        let top = style.top.map(|l| l.resolve(containing.height));
        let bottom = style.bottom.map(|l| l.resolve(containing.height));

        let width = match style.width {
            Some(w) => w.resolve(containing.width),
            None if absolute => containing.width - left.unwrap_or(0.0) - right.unwrap_or(0.0) - margin.horizontal(),
            None => containing.width - margin.horizontal(),
        }
        .max(0.0);

        let x = if absolute {
            match (left, right) {
                (Some(l), _) => containing.x + l + margin.left,
                (None, Some(r)) => containing.right() - r - margin.right - width,
                (None, None) => containing.x + margin.left,
            }
        } else {
            containing.x + margin.left
        };
        let y = if absolute {
            containing.y + top.unwrap_or(0.0) + margin.top
        } else {
            cursor_y + margin.top
        };

        let fixed_height = style.height.map(|h| h.resolve(containing.height).max(0.0));
        let padding = style.padding;
        let content = Rect::new(
            x + padding.left,
            y + padding.top,
            (width - padding.horizontal()).max(0.0),
            match fixed_height {
                Some(h) => (h - padding.vertical()).max(0.0),
                None => (containing.bottom() - y - padding.vertical()).max(0.0),
            },
        );

        let mut children = Vec::new();
        let mut child_y = content.y;
        let mut run = String::new();
        for child in element.children() {
            match child.value() {
                Node::Text(text) => run.push_str(text),
                Node::Element(el) => {
                    let Some(child_el) = ElementRef::wrap(child) else { continue };
                    if el.name() == "br" {
                        run.push('\n');
                    } else if INLINE_ELEMENTS.contains(&el.name()) {
                        collect_inline_text(child_el, &mut run);
                    } else {
                        if let Some(text) = self.text_node(&run, &style, content, child_y) {
                            child_y = text.rect.bottom();
                            children.push(text);
                        }
                        run.clear();
                        if let Some((node, advance)) = self.layout_element(child_el, &style, content, child_y) {
                            child_y += advance;
                            children.push(node);
                        }
                    }
                }
                _ => {}
            }
        }
        if let Some(text) = self.text_node(&run, &style, content, child_y) {
            child_y = text.rect.bottom();
            children.push(text);
        }

        let height = fixed_height.unwrap_or(child_y - content.y + padding.vertical());
        let mut node = LayoutNode {
            rect: Rect::new(x, y, width, height),
            style,
            content: NodeContent::Block,
            children,
        };

        if absolute && top.is_none() {
            if let Some(b) = bottom {
                let target_y = containing.bottom() - b - margin.bottom - height;
                node.translate(0.0, target_y - y);
            }
        }

        let advance = if absolute { 0.0 } else { margin.vertical() + height };
        Some((node, advance))
    }

    fn layout_image(&self, element: ElementRef, style: ComputedStyle, containing: Rect, cursor_y: f32) -> (LayoutNode, f32) {
        let src = image_source(element.value()).unwrap_or_default().to_string();
        let natural = self.image_sizes.get(&src).copied();
        let attr_len = |name: &str| element.value().attr(name).and_then(|v| v.trim().parse::<f32>().ok());

        let mut width = style.width.map(|w| w.resolve(containing.width)).or_else(|| attr_len("width"));
        let mut height = style.height.map(|h| h.resolve(containing.height)).or_else(|| attr_len("height"));
        if let Some((nw, nh)) = natural.filter(|(w, h)| *w > 0 && *h > 0) {
            let (nw, nh) = (nw as f32, nh as f32);
            match (width, height) {
                (Some(w), None) => height = Some(w * nh / nw),
                (None, Some(h)) => width = Some(h * nw / nh),
                (None, None) => {
                    width = Some(nw);
                    height = Some(nh);
                }
                _ => {}
            }
        }
        let width = width.unwrap_or(0.0).max(0.0);
        let height = height.unwrap_or(0.0).max(0.0);

        let margin = style.margin;
        let absolute = style.position == Position::Absolute;
        let (x, y) = if absolute {
            let x = match (style.left, style.right) {
                (Some(l), _) => containing.x + l.resolve(containing.width),
                (None, Some(r)) => containing.right() - r.resolve(containing.width) - width,
                (None, None) => containing.x,
            };
            let y = match (style.top, style.bottom) {
                (Some(t), _) => containing.y + t.resolve(containing.height),
                (None, Some(b)) => containing.bottom() - b.resolve(containing.height) - height,
                (None, None) => containing.y,
            };
            (x + margin.left, y + margin.top)
        } else {
            (containing.x + margin.left, cursor_y + margin.top)
        };

        let node = LayoutNode {
            rect: Rect::new(x, y, width, height),
            style,
            content: NodeContent::Image { src },
            children: Vec::new(),
        };
        let advance = if absolute { 0.0 } else { margin.vertical() + height };
        (node, advance)
    }

    /// Wrap a text run into lines; `None` for whitespace-only runs.
    fn text_node(&self, run: &str, style: &ComputedStyle, content: Rect, y: f32) -> Option<LayoutNode> {
        if run.trim().is_empty() {
            return None;
        }
        let family = style.font_family.as_str();
        let size = style.font_size;
        let line_box = style.line_box();
        let ascent = self.measure.ascent(family, size);
        let space = self.measure.advance(family, size, " ");

        let mut wrapped: Vec<(String, f32)> = Vec::new();
        for paragraph in run.split('\n') {
            let mut line = String::new();
            let mut line_width = 0.0;
            for word in paragraph.split_whitespace() {
                let word_width = self.measure.advance(family, size, word);
                if !line.is_empty() && line_width + space + word_width > content.width {
                    wrapped.push((std::mem::take(&mut line), line_width));
                    line_width = 0.0;
                }
                if !line.is_empty() {
                    line.push(' ');
                    line_width += space;
                }
                line.push_str(word);
                line_width += word_width;
            }
            if !line.is_empty() {
                wrapped.push((line, line_width));
            }
        }
        if wrapped.is_empty() {
            return None;
        }

        let half_leading = (line_box - size) / 2.0;
        let lines = wrapped
            .into_iter()
            .enumerate()
            .map(|(i, (text, width))| {
                let x = match style.text_align {
                    TextAlign::Left => content.x,
                    TextAlign::Center => content.x + (content.width - width) / 2.0,
                    TextAlign::Right => content.right() - width,
                };
                TextLine {
                    x,
                    baseline: y + i as f32 * line_box + half_leading + ascent,
                    width,
                    text,
                }
            })
            .collect::<Vec<_>>();

        let height = lines.len() as f32 * line_box;
        Some(LayoutNode {
            rect: Rect::new(content.x, y, content.width, height),
            style: ComputedStyle::inherit_from(style),
            content: NodeContent::Text(lines),
            children: Vec::new(),
        })
    }
}

fn collect_inline_text(element: ElementRef, run: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => run.push_str(text),
            Node::Element(el) if el.name() == "br" => run.push('\n'),
            Node::Element(_) => {
                if let Some(el) = ElementRef::wrap(child) {
                    collect_inline_text(el, run);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::font::FontBook;
    use crate::rendering::style::Rgba;

    fn layout(html: &str, css: &str, width: u32, height: u32) -> LayoutNode {
        let doc = Html::parse_document(html);
        let sheet = Stylesheet::parse_all(["body { margin: 0 }", css]);
        let fonts = FontBook::new(0.5);
        let sizes = HashMap::from([("cover.png".to_string(), (400u32, 200u32))]);
        let ctx = LayoutContext { sheet: &sheet, measure: &fonts, image_sizes: &sizes };
        layout_document(&doc, Dimensions { width, height }, &ctx).unwrap()
    }

    fn by_background<'a>(root: &'a LayoutNode, bg: Rgba) -> &'a LayoutNode {
        root.find(&|n| n.style.background == bg).unwrap()
    }

    #[test]
    fn blocks_stack_vertically() {
        let root = layout(
            "<body><div class=a></div><div class=b></div></body>",
            ".a { height: 50px; background: #ff0000; margin-bottom: 10px } .b { height: 20px; background: #00ff00 }",
            200,
            200,
        );
        let b = by_background(&root, Rgba::parse("#00ff00").unwrap());
        assert_eq!(b.rect, Rect::new(0.0, 60.0, 200.0, 20.0));
    }

    #[test]
    fn absolute_boxes_leave_flow_and_honour_bottom_right() {
        let root = layout(
            "<body><div class=badge></div><div class=flow></div></body>",
            ".badge { position: absolute; right: 10px; bottom: 20px; width: 50px; height: 30px; background: #0000ff }\
             .flow { height: 10px; background: #00ff00 }",
            300,
            200,
        );
        let badge = by_background(&root, Rgba::parse("#0000ff").unwrap());
        assert_eq!(badge.rect, Rect::new(240.0, 150.0, 50.0, 30.0));
        let flow = by_background(&root, Rgba::parse("#00ff00").unwrap());
        assert_eq!(flow.rect.y, 0.0);
    }

    #[test]
    fn text_wraps_at_content_width() {
        // fallback advance: 0.5em at 10px -> 5px per char
        let root = layout(
            "<body><p>aaaa bbbb cccc</p></body>",
            "p { font-size: 10px; line-height: 2; width: 50px }",
            200,
            200,
        );
        let text = root.find(&|n| matches!(n.content, NodeContent::Text(_))).unwrap();
        let NodeContent::Text(lines) = &text.content else { unreachable!() };
        assert_eq!(lines.iter().map(|l| l.text.as_str()).collect::<Vec<_>>(), ["aaaa bbbb", "cccc"]);
        assert_eq!(text.rect.height, 40.0);
    }

    #[test]
    fn inline_elements_join_the_text_run() {
        let root = layout("<body><p>Hello <strong>big</strong> world</p></body>", "", 500, 100);
        let text = root.find(&|n| matches!(n.content, NodeContent::Text(_))).unwrap();
        let NodeContent::Text(lines) = &text.content else { unreachable!() };
        assert_eq!(lines[0].text, "Hello big world");
    }

    #[test]
    fn centred_text_is_offset() {
        let root = layout("<body><p>ab</p></body>", "p { font-size: 10px; text-align: center }", 100, 100);
        let text = root.find(&|n| matches!(n.content, NodeContent::Text(_))).unwrap();
        let NodeContent::Text(lines) = &text.content else { unreachable!() };
        assert_eq!(lines[0].x, 45.0);
    }

    #[test]
    fn images_use_natural_aspect_ratio() {
        let root = layout("<body><img src=\"cover.png\" style=\"width: 100px\"></body>", "", 300, 300);
        let img = root.find(&|n| matches!(n.content, NodeContent::Image { .. })).unwrap();
        assert_eq!((img.rect.width, img.rect.height), (100.0, 50.0));
    }

    #[test]
    fn display_none_is_skipped() {
        let root = layout("<body><div style=\"display:none; background:#ff0000; height:5px\"></div></body>", "", 10, 10);
        assert!(root.find(&|n| n.style.background == Rgba::parse("#ff0000").unwrap()).is_none());
    }

    #[test]
    fn root_always_covers_viewport() {
        let root = layout("<body></body>", "body { background: #123456; height: 10px }", 1200, 630);
        assert_eq!(root.rect, Rect::new(0.0, 0.0, 1200.0, 630.0));
        assert_eq!(root.style.background, Rgba::parse("#123456").unwrap());
    }
}
