// ========================================
// ディレクティブコンパイラ
// ========================================
//
// 具体化されたテンプレートのDOMを文書順に一度だけ走査し、
// 見つけたバインディングごとにエフェクトやリスナーを登録します。
//
// - テキストノードの `{{ 式 }}` 補間
// - `v-text="式"`
// - `v-model="キー"`（値を持つ要素のみ）
// - `v-on:<イベント名>="式"`
//
// ディレクティブ属性は処理後に取り除かれます。

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde_json::Value;

use crate::dom_renderer::{Node, NodeType};
use crate::engine::eval::{evaluate, evaluate_to_string};
use crate::engine::reactive::{Effect, run_named_effect, untracked};
use crate::engine::state::{State, WeakState};
use crate::engine::value;

pub const V_TEXT: &str = "v-text";
pub const V_MODEL: &str = "v-model";
pub const V_ON_PREFIX: &str = "v-on:";

lazy_static! {
    static ref MUSTACHE_RE: Regex =
        Regex::new(r"\{\{\s*(.+?)\s*\}\}").expect("interpolation pattern is valid");
}

/// 一回の `bind` で作られたバインディング
///
/// ドロップしてもエフェクトは解除されない。再描画で捨てるときは
/// [`Bindings::dispose`] を呼ぶ。
#[derive(Debug, Default)]
pub struct Bindings {
    effects: Vec<Effect>,
    listeners: usize,
}

impl Bindings {
    /// 登録したエフェクトの数
    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty() && self.listeners == 0
    }

    /// 追加したイベントリスナーの数
    pub fn listener_count(&self) -> usize {
        self.listeners
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    /// 全てのエフェクトを購読から外す
    pub fn dispose(&mut self) {
        let count = self.effects.len();
        for effect in self.effects.drain(..) {
            effect.dispose();
        }
        self.listeners = 0;
        if count > 0 {
            log::debug!("disposed {} binding effect(s)", count);
        }
    }
}

/// `root` とその子孫を文書順に走査し、バインディングを登録する
///
/// 評価エラーはそのバインディングだけを空にし、走査は続行する。
pub fn bind(root: &Node, state: &State) -> Bindings {
    let mut bindings = Bindings::default();
    let mut current = Some(root.clone());

    while let Some(node) = current {
        let owns_children = match node.node_type() {
            NodeType::Text => {
                bind_interpolation(&node, state, &mut bindings);
                false
            }
            NodeType::Element => bind_element(&node, state, &mut bindings),
            NodeType::Comment | NodeType::Fragment => false,
        };

        // v-text が子ノードを管理する要素は中身を走査しない
        current = if owns_children {
            node.next_skipping_children(root)
        } else {
            node.next_in_document_order(root)
        };
    }

    log::debug!(
        "bound {} effect(s) and {} listener(s)",
        bindings.effects.len(),
        bindings.listeners
    );
    bindings
}

/// テキスト中の補間を全て評価して置き換える
pub fn interpolate(template: &str, state: &State) -> String {
    MUSTACHE_RE
        .replace_all(template, |caps: &Captures| evaluate_to_string(state, &caps[1]))
        .into_owned()
}

pub fn has_interpolation(text: &str) -> bool {
    MUSTACHE_RE.is_match(text)
}

fn bind_interpolation(node: &Node, state: &State, bindings: &mut Bindings) {
    let original = node.text_content();
    if !has_interpolation(&original) {
        return;
    }

    let weak = state.downgrade();
    let target = node.clone();
    let label = format!("{{{{ }}}} in {:?}", original.trim());
    bindings.effects.push(run_named_effect(label, move || {
        let Some(state) = weak.upgrade() else {
            return;
        };
        target.set_text_content(&interpolate(&original, &state));
    }));
}

/// 要素のディレクティブを処理する。v-text で子ノードを管理する場合は true
fn bind_element(el: &Node, state: &State, bindings: &mut Bindings) -> bool {
    let mut owns_children = false;

    // 処理中に属性を取り除くのでスナップショットを回す
    for (name, expr) in el.attributes() {
        if name == V_TEXT {
            bind_text(el, &expr, state, bindings);
            el.remove_attribute(&name);
            owns_children = true;
        } else if name == V_MODEL {
            if bind_model(el, &expr, state, bindings) {
                el.remove_attribute(&name);
            }
        } else if let Some(event) = name.strip_prefix(V_ON_PREFIX) {
            if event.is_empty() {
                log::warn!("`{}` is missing an event name; ignoring", name);
                continue;
            }
            bind_event(el, event, &expr, state, bindings);
            el.remove_attribute(&name);
        }
    }

    owns_children
}

fn bind_text(el: &Node, expr: &str, state: &State, bindings: &mut Bindings) {
    let weak = state.downgrade();
    let target = el.clone();
    let expr = expr.to_string();
    let label = format!("{}=\"{}\"", V_TEXT, expr);
    bindings.effects.push(run_named_effect(label, move || {
        let Some(state) = weak.upgrade() else {
            return;
        };
        target.set_text_content(&evaluate_to_string(&state, &expr));
    }));
}

/// 値を持たない要素には適用しない。適用した場合は true
fn bind_model(el: &Node, key: &str, state: &State, bindings: &mut Bindings) -> bool {
    if !el.is_value_bearing() {
        log::warn!(
            "`{}=\"{}\"` on <{}> has no effect; only input, textarea and select carry a value",
            V_MODEL,
            key,
            el.tag_name().unwrap_or_default()
        );
        return false;
    }

    let key = key.trim().to_string();

    // モデル → ビュー
    let weak = state.downgrade();
    let target = el.clone();
    let expr = key.clone();
    let label = format!("{}=\"{}\"", V_MODEL, key);
    bindings.effects.push(run_named_effect(label, move || {
        let Some(state) = weak.upgrade() else {
            return;
        };
        let next = evaluate_to_string(&state, &expr);
        // 同じ値は書き戻さない（カーソル位置を保つ）
        if target.value() != next {
            target.set_value(&next);
        }
    }));

    // ビュー → モデル
    let numeric = matches!(
        el.get_attribute("type").as_deref().map(str::to_ascii_lowercase).as_deref(),
        Some("number" | "range")
    );
    let weak = state.downgrade();
    el.add_event_listener("input", move |event| {
        let Some(state) = weak.upgrade() else {
            return;
        };
        let raw = event.current_target().value();
        // 数値入力は生の文字列ではなく数値として書き込む
        let value = if numeric { coerce_number(raw) } else { Value::String(raw) };
        untracked(|| state.set(&key, value));
    });
    bindings.listeners += 1;

    true
}

fn bind_event(el: &Node, event: &str, expr: &str, state: &State, bindings: &mut Bindings) {
    let weak: WeakState = state.downgrade();
    let expr = expr.to_string();
    el.add_event_listener(event, move |_| {
        let Some(state) = weak.upgrade() else {
            return;
        };
        // 結果は捨てる。リスナーはリアクティブではない
        untracked(|| {
            let _ = evaluate(&state, &expr);
        });
    });
    bindings.listeners += 1;
}

/// 数値入力の値。数値にできなければ文字列のまま
fn coerce_number(raw: String) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::String(raw);
    }
    match trimmed.parse::<f64>().ok().map(value::number) {
        Some(Ok(n)) => n,
        _ => Value::String(raw),
    }
}
