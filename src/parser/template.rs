// ========================================
// テンプレートパーサーモジュール
// ========================================
//
// HTMLテンプレート文字列を切り離されたDOMフラグメントに実体化します。
// 同じ文字列からは毎回同じ構造のツリーが得られます。

use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;

use crate::dom_renderer::dom::VOID_ELEMENTS;
use crate::dom_renderer::{Node, NodeType};
use crate::error::ParseError;
use crate::parser::utils::decode_entities;

/// テンプレート（HTMLサブセット）のパーサー
#[derive(Parser)]
#[grammar = "parser/template.pest"]
pub struct TemplateParser;

/// テンプレート文字列を解析してフラグメントを生成する
pub fn parse_template(source: &str) -> Result<Node, ParseError> {
    let template = TemplateParser::parse(Rule::template, source)
        .map_err(|e| ParseError::template(e.to_string()))?
        .next()
        .ok_or_else(|| ParseError::template("empty parse result"))?;

    let fragment = Node::fragment();
    // 開いている要素のスタック（先頭はフラグメント）
    let mut open: Vec<Node> = vec![fragment.clone()];

    for token in template.into_inner() {
        let Some(top) = open.last().cloned() else {
            return Err(ParseError::template("element stack underflow"));
        };

        match token.as_rule() {
            Rule::text => append_text(&top, &decode_entities(token.as_str())),
            Rule::comment => {
                let body = token.into_inner().next().map(|p| p.as_str()).unwrap_or("");
                top.append_child(&Node::comment(body));
            }
            Rule::open_tag => {
                let (element, self_closing) = build_element(token)?;
                top.append_child(&element);
                let is_void = element
                    .tag_name()
                    .is_some_and(|tag| VOID_ELEMENTS.contains(&tag));
                if !self_closing && !is_void {
                    open.push(element);
                }
            }
            Rule::close_tag => {
                let name = token
                    .into_inner()
                    .next()
                    .map(|p| p.as_str().to_ascii_lowercase())
                    .unwrap_or_default();

                if VOID_ELEMENTS.contains(&name.as_str()) {
                    // `</input>` などは無視する
                    continue;
                }

                match top.tag_name() {
                    Some(tag) if tag == name => {
                        open.pop();
                    }
                    Some(tag) => {
                        return Err(ParseError::template(format!(
                            "unexpected closing tag </{}> while <{}> is open",
                            name, tag
                        )));
                    }
                    None => {
                        return Err(ParseError::template(format!(
                            "unexpected closing tag </{}>",
                            name
                        )));
                    }
                }
            }
            // doctype は捨てる
            Rule::doctype | Rule::EOI => {}
            rule => {
                return Err(ParseError::template(format!("unexpected token {:?}", rule)));
            }
        }
    }

    if open.len() > 1 {
        log::debug!(
            "template ended with {} unclosed element(s); closing implicitly",
            open.len() - 1
        );
    }

    Ok(fragment)
}

fn build_element(pair: Pair<Rule>) -> Result<(Node, bool), ParseError> {
    let mut inner = pair.into_inner();
    let tag = inner
        .next()
        .ok_or_else(|| ParseError::template("missing tag name"))?;
    let element = Node::element(tag.as_str());
    let mut self_closing = false;

    for part in inner {
        match part.as_rule() {
            Rule::attribute => {
                let mut attr = part.into_inner();
                let name = attr
                    .next()
                    .map(|p| p.as_str().to_ascii_lowercase())
                    .ok_or_else(|| ParseError::template("missing attribute name"))?;
                let value = attr.next().map(|p| decode_entities(p.as_str())).unwrap_or_default();
                // 重複した属性は最初のものを優先する
                if !element.has_attribute(&name) {
                    element.set_attribute(&name, &value);
                }
            }
            Rule::self_closing => self_closing = true,
            _ => {}
        }
    }

    Ok((element, self_closing))
}

/// 直前の兄弟がテキストなら連結する
fn append_text(parent: &Node, text: &str) {
    if let Some(last) = parent.children().last() {
        if last.node_type() == NodeType::Text {
            let merged = format!("{}{}", last.text_content(), text);
            last.set_text_content(&merged);
            return;
        }
    }
    parent.append_child(&Node::text(text));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_markup() {
        let fragment = parse_template(r#"<div id="app"><p class='x'>Hi <b>there</b></p></div>"#).unwrap();
        assert_eq!(
            fragment.inner_html(),
            r#"<div id="app"><p class="x">Hi <b>there</b></p></div>"#
        );
        let p = fragment.query_selector("p").unwrap();
        assert_eq!(p.text_content(), "Hi there");
    }

    #[test]
    fn test_directive_attributes_keep_source_order() {
        let fragment =
            parse_template(r#"<input type=range v-model="count" v-on:input="log()" />"#).unwrap();
        let input = fragment.first_child().unwrap();
        let names: Vec<String> = input.attributes().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["type", "v-model", "v-on:input"]);
        assert!(input.children().is_empty());
    }

    #[test]
    fn test_void_elements_do_not_nest() {
        let fragment = parse_template("<p>a<br>b<input>c</p>").unwrap();
        let p = fragment.first_child().unwrap();
        assert_eq!(p.children().len(), 5);
        assert_eq!(p.text_content(), "abc");
    }

    #[test]
    fn test_interpolation_text_is_preserved() {
        let fragment = parse_template("<p>Double: {{ count * 2 }} and {{ a < b }}</p>").unwrap();
        assert_eq!(
            fragment.text_content(),
            "Double: {{ count * 2 }} and {{ a < b }}"
        );
    }

    #[test]
    fn test_entities_and_comments() {
        let fragment = parse_template("<!-- note --><span title=\"a &amp; b\">&lt;ok&gt;</span>").unwrap();
        let children = fragment.children();
        assert_eq!(children[0].node_type(), NodeType::Comment);
        assert_eq!(children[1].get_attribute("title").as_deref(), Some("a & b"));
        assert_eq!(children[1].text_content(), "<ok>");
    }

    #[test]
    fn test_mismatched_closing_tag_is_an_error() {
        assert!(matches!(
            parse_template("<div><span></div>"),
            Err(ParseError::Template { .. })
        ));
        assert!(parse_template("</p>").is_err());
    }

    #[test]
    fn test_materialization_is_repeatable() {
        let source = "<ul><li>{{ a }}</li><li v-text=\"b\"></li></ul>";
        let first = parse_template(source).unwrap();
        let second = parse_template(source).unwrap();
        assert_eq!(first.inner_html(), second.inner_html());
        assert!(!first.first_child().unwrap().ptr_eq(&second.first_child().unwrap()));
    }
}
