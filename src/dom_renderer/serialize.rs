// ========================================
// HTMLシリアライズ
// ========================================

use super::dom::{Node, NodeType, VOID_ELEMENTS};

impl Node {
    /// 子ノードのマークアップ（`innerHTML` 相当）
    pub fn inner_html(&self) -> String {
        let mut out = String::new();
        for child in self.children() {
            write_node(&child, &mut out);
        }
        out
    }

    /// 自身を含むマークアップ（`outerHTML` 相当）
    pub fn outer_html(&self) -> String {
        let mut out = String::new();
        write_node(self, &mut out);
        out
    }
}

fn write_node(node: &Node, out: &mut String) {
    match node.node_type() {
        NodeType::Text => {
            if let Some(text) = node.text_data() {
                out.push_str(&escape_text(&text));
            }
        }
        NodeType::Comment => {
            out.push_str("<!--");
            out.push_str(node.comment_data().unwrap_or_default());
            out.push_str("-->");
        }
        NodeType::Fragment => {
            for child in node.children() {
                write_node(&child, out);
            }
        }
        NodeType::Element => {
            let tag = node.tag_name().unwrap_or_default();
            out.push('<');
            out.push_str(tag);
            for (name, value) in node.attributes() {
                out.push(' ');
                out.push_str(&name);
                if !value.is_empty() {
                    out.push_str("=\"");
                    out.push_str(&escape_attribute(&value));
                    out.push('"');
                }
            }
            out.push('>');

            if VOID_ELEMENTS.contains(&tag) {
                return;
            }

            for child in node.children() {
                write_node(&child, out);
            }
            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
    }
}

pub fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn escape_attribute(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outer_html() {
        let div = Node::element("div");
        div.set_attribute("class", "box");
        div.set_attribute("hidden", "");
        let input = Node::element("input");
        input.set_attribute("value", "a\"b");
        div.append_child(&input);
        div.append_child(&Node::text("1 < 2 & 3"));

        assert_eq!(
            div.outer_html(),
            r#"<div class="box" hidden><input value="a&quot;b">1 &lt; 2 &amp; 3</div>"#
        );
    }

    #[test]
    fn test_value_property_is_not_serialized() {
        let input = Node::element("input");
        input.set_value("typed");
        assert_eq!(input.outer_html(), "<input>");
    }
}
