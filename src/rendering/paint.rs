//! Display list built from a layout tree.

use crate::rendering::layout::{LayoutNode, NodeContent, Rect};
use crate::rendering::style::Rgba;

#[derive(Debug, Clone, PartialEq)]
pub enum PaintCommand {
    SolidRect {
        rect: Rect,
        radius: f32,
        rgba: Rgba,
        opacity: f32,
    },
    Image {
        rect: Rect,
        radius: f32,
        src: String,
        opacity: f32,
    },
    Text {
        x: f32,
        baseline: f32,
        text: String,
        family: String,
        size: f32,
        rgba: Rgba,
        opacity: f32,
    },
}

/// Flatten a layout tree into paint order: parent before children,
/// siblings in document order.
pub fn build_display_list(root: &LayoutNode) -> Vec<PaintCommand> {
    let mut commands = Vec::new();
    paint_node(root, 1.0, &mut commands);
    commands
}

fn paint_node(node: &LayoutNode, inherited_opacity: f32, out: &mut Vec<PaintCommand>) {
    let opacity = inherited_opacity * node.style.opacity;
    if opacity <= 0.0 {
        return;
    }
    let style = &node.style;

    if style.background.is_visible() && node.rect.width > 0.0 && node.rect.height > 0.0 {
        out.push(PaintCommand::SolidRect {
            rect: node.rect,
            radius: style.border_radius,
            rgba: style.background,
            opacity,
        });
    }

    match &node.content {
        NodeContent::Block => {}
        NodeContent::Image { src } => {
            if node.rect.width > 0.0 && node.rect.height > 0.0 && !src.is_empty() {
                out.push(PaintCommand::Image {
                    rect: node.rect,
                    radius: style.border_radius,
                    src: src.clone(),
                    opacity,
                });
            }
        }
        NodeContent::Text(lines) => {
            if style.color.is_visible() {
                for line in lines {
                    out.push(PaintCommand::Text {
                        x: line.x,
                        baseline: line.baseline,
                        text: line.text.clone(),
                        family: style.font_family.clone(),
                        size: style.font_size,
                        rgba: style.color,
                        opacity,
                    });
                }
            }
        }
    }

    for child in &node.children {
        paint_node(child, opacity, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::layout::TextLine;
    use crate::rendering::style::ComputedStyle;

    fn block(background: Rgba, opacity: f32, children: Vec<LayoutNode>) -> LayoutNode {
        LayoutNode {
            rect: Rect::new(0.0, 0.0, 10.0, 10.0),
            style: ComputedStyle { background, opacity, ..ComputedStyle::default() },
            content: NodeContent::Block,
            children,
        }
    }

    #[test]
    fn parents_paint_before_children() {
        let child = block(Rgba::WHITE, 1.0, vec![]);
        let root = block(Rgba::BLACK, 1.0, vec![child]);
        let list = build_display_list(&root);
        assert_eq!(list.len(), 2);
        match &list[0] {
            PaintCommand::SolidRect { rgba, .. } => assert_eq!(*rgba, Rgba::BLACK),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn transparent_backgrounds_are_skipped() {
        let root = block(Rgba::TRANSPARENT, 1.0, vec![]);
        assert!(build_display_list(&root).is_empty());
    }

    #[test]
    fn opacity_multiplies_and_zero_hides_subtree() {
        let leaf = block(Rgba::WHITE, 0.5, vec![]);
        let root = block(Rgba::BLACK, 0.5, vec![leaf]);
        let list = build_display_list(&root);
        match &list[1] {
            PaintCommand::SolidRect { opacity, .. } => assert_eq!(*opacity, 0.25),
            other => panic!("unexpected {:?}", other),
        }

        let hidden = block(Rgba::BLACK, 0.0, vec![block(Rgba::WHITE, 1.0, vec![])]);
        assert!(build_display_list(&hidden).is_empty());
    }

    #[test]
    fn text_lines_become_text_commands() {
        let text = LayoutNode {
            rect: Rect::new(0.0, 0.0, 100.0, 20.0),
            style: ComputedStyle::default(),
            content: NodeContent::Text(vec![
                TextLine { x: 0.0, baseline: 12.0, width: 30.0, text: "one".into() },
                TextLine { x: 0.0, baseline: 32.0, width: 30.0, text: "two".into() },
            ]),
            children: vec![],
        };
        let list = build_display_list(&text);
        assert_eq!(list.len(), 2);
        assert!(matches!(&list[1], PaintCommand::Text { text, .. } if text == "two"));
    }
}
