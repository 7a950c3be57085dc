//! Stylesheets and computed styles for frame content.
//!
//! Supports the subset of CSS preview cards need: full selectors (matched by
//! `scraper`), block and absolute positioning, box edges, colours, font
//! family/size, line height, text alignment, radius, opacity and
//! `@font-face`. Unknown properties and at-rules are ignored.
//!
//! Sheets, declarations and values are tokenized with `cssparser`.

use cssparser::{
    parse_important, AtRuleParser, AtRuleType, CowRcStr, DeclarationListParser, DeclarationParser, Delimiter,
    ParseError, Parser, ParserInput, QualifiedRuleParser, RuleListParser, SourceLocation, Token,
};
use log::debug;
use scraper::{ElementRef, Selector};

/// Font size `rem` units resolve against
const ROOT_FONT_SIZE: f32 = 16.0;

/// Straight (non-premultiplied) RGBA colour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const BLACK: Rgba = Rgba { r: 0, g: 0, b: 0, a: 255 };
    pub const WHITE: Rgba = Rgba { r: 255, g: 255, b: 255, a: 255 };
    pub const TRANSPARENT: Rgba = Rgba { r: 0, g: 0, b: 0, a: 0 };

    pub fn parse(value: &str) -> Option<Rgba> {
        let [r, g, b, a] = csscolorparser::parse(value.trim()).ok()?.to_rgba8();
        Some(Rgba { r, g, b, a })
    }

    pub fn is_visible(&self) -> bool {
        self.a > 0
    }
}

/// Run `parse` over all of `value`. `None` if it fails or leaves input behind.
fn parse_entirely<T>(
    value: &str,
    parse: impl for<'i, 't> FnOnce(&mut Parser<'i, 't>) -> Result<T, ParseError<'i, ()>>,
) -> Option<T> {
    let mut input = ParserInput::new(value);
    let mut parser = Parser::new(&mut input);
    parser.parse_entirely(parse).ok()
}

/// A CSS length before resolution
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Length {
    Px(f32),
    Percent(f32),
}

impl Length {
    /// Parse `12px`, `12`, `50%`; `auto` and junk give `None`.
    pub fn parse(value: &str) -> Option<Length> {
        parse_entirely(value, parse_length)
    }

    pub fn resolve(self, reference: f32) -> f32 {
        match self {
            Length::Px(px) => px,
            Length::Percent(pct) => reference * pct / 100.0,
        }
    }
}

fn parse_length<'i, 't>(input: &mut Parser<'i, 't>) -> Result<Length, ParseError<'i, ()>> {
    let location = input.current_source_location();
    match input.next()?.clone() {
        Token::Dimension { value, ref unit, .. } if unit.eq_ignore_ascii_case("px") => Ok(Length::Px(value)),
        Token::Number { value, .. } => Ok(Length::Px(value)),
        Token::Percentage { unit_value, .. } => Ok(Length::Percent(unit_value * 100.0)),
        token => Err(location.new_unexpected_token_error(token)),
    }
}

/// Four box edges in pixels
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Edges {
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub left: f32,
}

impl Edges {
    /// Parse the 1-4 value shorthand. Percentages resolve against `reference`.
    pub fn parse(value: &str, reference: f32) -> Option<Edges> {
        let parts = parse_entirely(value, |input| {
            let mut parts = Vec::new();
            while !input.is_exhausted() {
                if input.try_parse(|i| i.expect_ident_matching("auto")).is_ok() {
                    parts.push(0.0);
                } else {
                    parts.push(parse_length(input)?.resolve(reference));
                }
            }
            Ok(parts)
        })?;
        let edges = match parts.as_slice() {
            [all] => Edges { top: *all, right: *all, bottom: *all, left: *all },
            [v, h] => Edges { top: *v, right: *h, bottom: *v, left: *h },
            [t, h, b] => Edges { top: *t, right: *h, bottom: *b, left: *h },
            [t, r, b, l] => Edges { top: *t, right: *r, bottom: *b, left: *l },
            _ => return None,
        };
        Some(edges)
    }

    pub fn horizontal(&self) -> f32 {
        self.left + self.right
    }

    pub fn vertical(&self) -> f32 {
        self.top + self.bottom
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Display {
    Block,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Static,
    Absolute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAlign {
    Left,
    Center,
    Right,
}

/// Style of one element after the cascade
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedStyle {
    pub display: Display,
    pub position: Position,
    pub left: Option<Length>,
    pub top: Option<Length>,
    pub right: Option<Length>,
    pub bottom: Option<Length>,
    pub width: Option<Length>,
    pub height: Option<Length>,
    pub margin: Edges,
    pub padding: Edges,
    pub background: Rgba,
    pub border_radius: f32,
    pub opacity: f32,
    // inherited
    pub color: Rgba,
    pub font_family: String,
    pub font_size: f32,
    pub line_height: f32,
    pub text_align: TextAlign,
}

impl Default for ComputedStyle {
    fn default() -> Self {
        Self {
            display: Display::Block,
            position: Position::Static,
            left: None,
            top: None,
            right: None,
            bottom: None,
            width: None,
            height: None,
            margin: Edges::default(),
            padding: Edges::default(),
            background: Rgba::TRANSPARENT,
            border_radius: 0.0,
            opacity: 1.0,
            color: Rgba::BLACK,
            font_family: String::new(),
            font_size: 16.0,
            line_height: 1.2,
            text_align: TextAlign::Left,
        }
    }
}

impl ComputedStyle {
    /// Fresh style for a child: inherited properties copied, the rest reset.
    pub fn inherit_from(parent: &ComputedStyle) -> Self {
        Self {
            color: parent.color,
            font_family: parent.font_family.clone(),
            font_size: parent.font_size,
            line_height: parent.line_height,
            text_align: parent.text_align,
            ..Self::default()
        }
    }

    /// Line box height in pixels
    pub fn line_box(&self) -> f32 {
        self.font_size * self.line_height
    }

    fn apply(&mut self, decl: &Declaration, parent: &ComputedStyle) {
        let value = decl.value.as_str();
        match decl.name.as_str() {
            "display" => {
                self.display = if value == "none" { Display::None } else { Display::Block };
            }
            "position" => {
                self.position = match value {
                    "absolute" | "fixed" => Position::Absolute,
                    _ => Position::Static,
                };
            }
            "left" => self.left = Length::parse(value),
            "top" => self.top = Length::parse(value),
            "right" => self.right = Length::parse(value),
            "bottom" => self.bottom = Length::parse(value),
            "inset" => {
                let v = Length::parse(value);
                self.left = v;
                self.top = v;
                self.right = v;
                self.bottom = v;
            }
            "width" => self.width = Length::parse(value),
            "height" => self.height = Length::parse(value),
            "margin" => apply_edges(&mut self.margin, value),
            "margin-top" => apply_edge(&mut self.margin.top, value),
            "margin-right" => apply_edge(&mut self.margin.right, value),
            "margin-bottom" => apply_edge(&mut self.margin.bottom, value),
            "margin-left" => apply_edge(&mut self.margin.left, value),
            "padding" => apply_edges(&mut self.padding, value),
            "padding-top" => apply_edge(&mut self.padding.top, value),
            "padding-right" => apply_edge(&mut self.padding.right, value),
            "padding-bottom" => apply_edge(&mut self.padding.bottom, value),
            "padding-left" => apply_edge(&mut self.padding.left, value),
            "background" | "background-color" => {
                let color = Rgba::parse(value)
                    .or_else(|| value.split_whitespace().find_map(Rgba::parse));
                if let Some(color) = color {
                    self.background = color;
                }
            }
            "color" => {
                if let Some(color) = Rgba::parse(value) {
                    self.color = color;
                }
            }
            "border-radius" => {
                let first = parse_entirely(value, |input| {
                    let radius = parse_length(input)?;
                    while input.next().is_ok() {}
                    Ok(radius)
                });
                if let Some(radius) = first {
                    self.border_radius = radius.resolve(0.0);
                }
            }
            "opacity" => {
                if let Some(opacity) = parse_entirely(value, |input| Ok(input.expect_number()?)) {
                    self.opacity = opacity.clamp(0.0, 1.0);
                }
            }
            "font-family" => self.font_family = first_family(value),
            "font-size" => {
                if let Some(size) = font_size(value, parent.font_size) {
                    self.font_size = size;
                }
            }
            "line-height" => {
                if let Some(factor) = line_height(value, self.font_size) {
                    self.line_height = factor;
                }
            }
            "text-align" => {
                self.text_align = match value {
                    "center" => TextAlign::Center,
                    "right" | "end" => TextAlign::Right,
                    _ => TextAlign::Left,
                };
            }
            _ => {}
        }
    }
}

fn apply_edges(edges: &mut Edges, value: &str) {
    if let Some(parsed) = Edges::parse(value, 0.0) {
        *edges = parsed;
    }
}

fn apply_edge(edge: &mut f32, value: &str) {
    if let Some(len) = Length::parse(value) {
        *edge = len.resolve(0.0);
    }
}

fn font_size(value: &str, parent: f32) -> Option<f32> {
    parse_entirely(value, |input| {
        let location = input.current_source_location();
        match input.next()?.clone() {
            Token::Dimension { value, ref unit, .. } if unit.eq_ignore_ascii_case("px") => Ok(value),
            Token::Dimension { value, ref unit, .. } if unit.eq_ignore_ascii_case("em") => Ok(value * parent),
            Token::Dimension { value, ref unit, .. } if unit.eq_ignore_ascii_case("rem") => Ok(value * ROOT_FONT_SIZE),
            Token::Percentage { unit_value, .. } => Ok(unit_value * parent),
            Token::Number { value, .. } => Ok(value),
            token => Err(location.new_unexpected_token_error(token)),
        }
    })
}

/// Line height as a multiple of `font_size`
fn line_height(value: &str, font_size: f32) -> Option<f32> {
    parse_entirely(value, |input| {
        let location = input.current_source_location();
        match input.next()?.clone() {
            Token::Ident(ref name) if name.eq_ignore_ascii_case("normal") => Ok(1.2),
            Token::Number { value, .. } => Ok(value),
            Token::Percentage { unit_value, .. } => Ok(unit_value),
            Token::Dimension { value, ref unit, .. } if unit.eq_ignore_ascii_case("px") => {
                Ok(value / font_size.max(1.0))
            }
            Token::Dimension { value, ref unit, .. } if unit.eq_ignore_ascii_case("em") => Ok(value),
            token => Err(location.new_unexpected_token_error(token)),
        }
    })
}

/// First entry of a font family list, lowercased
fn first_family(value: &str) -> String {
    let mut input = ParserInput::new(value);
    let mut parser = Parser::new(&mut input);
    parser
        .parse_until_before(Delimiter::Comma, family_name)
        .unwrap_or_default()
        .to_ascii_lowercase()
}

fn family_name<'i, 't>(input: &mut Parser<'i, 't>) -> Result<String, ParseError<'i, ()>> {
    if let Ok(quoted) = input.try_parse(|i| i.expect_string_cloned()) {
        return Ok(quoted.to_string());
    }
    let mut words = Vec::new();
    while let Ok(word) = input.try_parse(|i| i.expect_ident_cloned()) {
        words.push(word.to_string());
    }
    Ok(words.join(" "))
}

/// First `url(...)` of a `src` descriptor
fn first_url(value: &str) -> Option<String> {
    let mut input = ParserInput::new(value);
    let mut parser = Parser::new(&mut input);
    while !parser.is_exhausted() {
        if let Ok(url) = parser.try_parse(|i| i.expect_url()) {
            return (!url.is_empty()).then(|| url.to_string());
        }
        parser.next().ok()?;
    }
    None
}

/// Consume the rest of `input` and return its source text.
fn remaining_text<'i, 't>(input: &mut Parser<'i, 't>) -> &'i str {
    let start = input.position();
    while input.next().is_ok() {}
    input.slice_from(start).trim()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub name: String,
    pub value: String,
    pub important: bool,
}

/// Parse a declaration block body (`a: b; c: d`)
pub fn parse_declarations(body: &str) -> Vec<Declaration> {
    let mut input = ParserInput::new(body);
    let mut parser = Parser::new(&mut input);
    collect_declarations(&mut parser)
}

fn collect_declarations(input: &mut Parser) -> Vec<Declaration> {
    DeclarationListParser::new(input, DeclarationCollector)
        .filter_map(|result| match result {
            Ok(decl) => Some(decl),
            Err((_, text)) => {
                debug!("skipping declaration {:?}", text);
                None
            }
        })
        .collect()
}

struct DeclarationCollector;

impl<'i> DeclarationParser<'i> for DeclarationCollector {
    type Declaration = Declaration;
    type Error = ();

    fn parse_value<'t>(
        &mut self,
        name: CowRcStr<'i>,
        input: &mut Parser<'i, 't>,
    ) -> Result<Declaration, ParseError<'i, ()>> {
        let value = input.parse_until_before(Delimiter::Bang, |input| {
            Ok::<_, ParseError<'i, ()>>(remaining_text(input).to_string())
        })?;
        let important = input.try_parse(parse_important).is_ok();
        input.expect_exhausted()?;
        if value.is_empty() {
            return Err(input.new_custom_error(()));
        }
        Ok(Declaration {
            name: name.to_ascii_lowercase(),
            value,
            important,
        })
    }
}

impl<'i> AtRuleParser<'i> for DeclarationCollector {
    type PreludeNoBlock = ();
    type PreludeBlock = ();
    type AtRule = Declaration;
    type Error = ();
}

/// Top-level rule of a sheet
enum CssRule {
    Style {
        selectors: String,
        declarations: Vec<Declaration>,
    },
    FontFace(Vec<Declaration>),
    Skipped,
}

struct RuleCollector;

impl<'i> QualifiedRuleParser<'i> for RuleCollector {
    type Prelude = String;
    type QualifiedRule = CssRule;
    type Error = ();

    fn parse_prelude<'t>(&mut self, input: &mut Parser<'i, 't>) -> Result<String, ParseError<'i, ()>> {
        Ok(remaining_text(input).to_string())
    }

    fn parse_block<'t>(
        &mut self,
        selectors: String,
        _location: SourceLocation,
        input: &mut Parser<'i, 't>,
    ) -> Result<CssRule, ParseError<'i, ()>> {
        Ok(CssRule::Style {
            selectors,
            declarations: collect_declarations(input),
        })
    }
}

impl<'i> AtRuleParser<'i> for RuleCollector {
    type PreludeNoBlock = ();
    /// Lowercased at-rule name
    type PreludeBlock = String;
    type AtRule = CssRule;
    type Error = ();

    fn parse_prelude<'t>(
        &mut self,
        name: CowRcStr<'i>,
        input: &mut Parser<'i, 't>,
    ) -> Result<AtRuleType<(), String>, ParseError<'i, ()>> {
        remaining_text(input);
        Ok(AtRuleType::WithBlock(name.to_ascii_lowercase()))
    }

    fn parse_block<'t>(
        &mut self,
        name: String,
        _location: SourceLocation,
        input: &mut Parser<'i, 't>,
    ) -> Result<CssRule, ParseError<'i, ()>> {
        if name == "font-face" {
            return Ok(CssRule::FontFace(collect_declarations(input)));
        }
        debug!("skipping @{} rule", name);
        remaining_text(input);
        Ok(CssRule::Skipped)
    }
}

/// A font declared with `@font-face`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontFace {
    /// Lowercased family name
    pub family: String,
    pub src: String,
}

#[derive(Debug)]
pub struct Rule {
    /// A single complex selector
    selector: Selector,
    specificity: u32,
    order: usize,
    declarations: Vec<Declaration>,
}

/// All rules of a frame, in source order
#[derive(Debug, Default)]
pub struct Stylesheet {
    rules: Vec<Rule>,
    font_faces: Vec<FontFace>,
}

impl Stylesheet {
    /// Parse several sheets; later sheets win ties.
    pub fn parse_all<'a>(sheets: impl IntoIterator<Item = &'a str>) -> Self {
        let mut sheet = Stylesheet::default();
        for css in sheets {
            sheet.append(css);
        }
        sheet
    }

    pub fn parse(css: &str) -> Self {
        Self::parse_all([css])
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn font_faces(&self) -> &[FontFace] {
        &self.font_faces
    }

    fn append(&mut self, css: &str) {
        let mut input = ParserInput::new(css);
        let mut parser = Parser::new(&mut input);
        for rule in RuleListParser::new_for_stylesheet(&mut parser, RuleCollector) {
            match rule {
                Ok(CssRule::Style { selectors, declarations }) => self.push_style_rule(&selectors, declarations),
                Ok(CssRule::FontFace(declarations)) => self.push_font_face(declarations),
                Ok(CssRule::Skipped) => {}
                Err((_, text)) => debug!("skipping invalid rule {:?}", text),
            }
        }
    }

    /// One rule per selector in the list, each with its own specificity.
    fn push_style_rule(&mut self, selectors: &str, declarations: Vec<Declaration>) {
        let Ok(list) = Selector::parse(selectors) else {
            debug!("skipping unsupported selector {:?}", selectors);
            return;
        };
        for complex in list.selectors.iter() {
            self.rules.push(Rule {
                selector: Selector {
                    selectors: std::iter::once(complex.clone()).collect(),
                },
                specificity: complex.specificity(),
                order: self.rules.len(),
                declarations: declarations.clone(),
            });
        }
    }

    fn push_font_face(&mut self, declarations: Vec<Declaration>) {
        let mut family = None;
        let mut src = None;
        for decl in declarations {
            match decl.name.as_str() {
                "font-family" => family = Some(first_family(&decl.value)).filter(|f| !f.is_empty()),
                "src" => src = first_url(&decl.value),
                _ => {}
            }
        }
        match (family, src) {
            (Some(family), Some(src)) => self.font_faces.push(FontFace { family, src }),
            _ => debug!("ignoring @font-face without family or src"),
        }
    }

    /// Cascade the style for `element`, inheriting from `parent`.
    pub fn compute(&self, element: &ElementRef, parent: &ComputedStyle) -> ComputedStyle {
        let mut matched: Vec<&Rule> = self
            .rules
            .iter()
            .filter(|rule| rule.selector.matches(element))
            .collect();
        matched.sort_by_key(|rule| (rule.specificity, rule.order));

        let inline = element
            .value()
            .attr("style")
            .map(parse_declarations)
            .unwrap_or_default();

        let mut style = ComputedStyle::inherit_from(parent);
        for important in [false, true] {
            for rule in &matched {
                for decl in rule.declarations.iter().filter(|d| d.important == important) {
                    style.apply(decl, parent);
                }
            }
            for decl in inline.iter().filter(|d| d.important == important) {
                style.apply(decl, parent);
            }
        }
        style
    }
}
