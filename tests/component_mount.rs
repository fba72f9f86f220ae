// ========================================
// コンポーネントの結合テスト
// ========================================
//
// マウント後の描画、バインディング、ライフサイクルフックを確認する。

use std::cell::RefCell;
use std::rc::Rc;

use mizu::{Component, ComponentHost, Hook, HookEmitter, MountError, Node, State, parse_template};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

struct Counter {
    initial: i64,
}

impl Component for Counter {
    fn init_state(&self) -> State {
        State::new()
            .with("count", self.initial)
            .with("label", "clicks")
            .with_method("bump", |state, _| {
                state.update("count", |v| json!(v.and_then(|v| v.as_i64()).unwrap_or(0) + 1));
                Ok(Value::Null)
            })
    }

    fn template(&self) -> String {
        concat!(
            r#"<p class="count">Count: <span v-text="count"></span></p>"#,
            r#"<input type="number" v-model="count">"#,
            r#"<button v-on:click="bump()">{{ label }}</button>"#,
            r#"<i>{{ count * 2 }}</i>"#,
        )
        .to_string()
    }
}

fn document() -> Node {
    parse_template(r#"<body><div id="app"></div></body>"#).unwrap()
}

fn mounted(initial: i64) -> ComponentHost<Counter> {
    let host = ComponentHost::new(Counter { initial }, &document(), "#app").unwrap();
    host.mount().unwrap();
    host
}

#[test]
fn test_mount_renders_bound_markup() {
    let host = mounted(3);

    assert_eq!(
        host.container().inner_html(),
        concat!(
            r#"<p class="count">Count: <span>3</span></p>"#,
            r#"<input type="number">"#,
            r#"<button>clicks</button>"#,
            r#"<i>6</i>"#,
        )
    );
    let input = host.container().query_selector("input").unwrap();
    assert_eq!(input.value(), "3");
}

#[test]
fn test_event_directive_rerenders_component() {
    let host = mounted(1);

    host.container().query_selector("button").unwrap().click();
    assert_eq!(host.state().peek("count"), Some(json!(2)));
    assert_eq!(host.container().query_selector("i").unwrap().text_content(), "4");

    // 再描画後の新しいボタンにもバインドされている
    host.container().query_selector("button").unwrap().click();
    assert_eq!(host.state().peek("count"), Some(json!(3)));
}

#[test]
fn test_v_model_updates_state_and_view() {
    let host = mounted(0);

    let input = host.container().query_selector("input").unwrap();
    input.set_input_value("12");
    assert_eq!(host.state().peek("count"), Some(json!(12)));
    assert_eq!(host.container().query_selector("span").unwrap().text_content(), "12");

    host.state().set("count", 7);
    let input = host.container().query_selector("input").unwrap();
    assert_eq!(input.value(), "7");
}

#[test]
fn test_render_is_idempotent() {
    let host = mounted(5);
    let once = host.container().inner_html();

    host.render().unwrap();
    host.render().unwrap();
    assert_eq!(host.container().inner_html(), once);
    assert_eq!(host.render_count(), 3);
}

#[test]
fn test_bindings_do_not_accumulate_across_renders() {
    let host = mounted(0);
    let per_render = host.binding_count();

    for n in 1..=10 {
        host.state().set("count", n);
    }
    assert_eq!(host.binding_count(), per_render);
    assert_eq!(host.render_count(), 11);
}

#[test]
fn test_missing_mount_point_is_fatal() {
    let err = ComponentHost::new(Counter { initial: 0 }, &document(), "#missing").unwrap_err();
    assert!(matches!(err, MountError::MountPointNotFound(_)));
    assert_eq!(err.to_string(), "mount point \"#missing\" not found");
}

#[test]
fn test_broken_template_fails_mount() {
    struct Broken;
    impl Component for Broken {
        fn init_state(&self) -> State {
            State::new()
        }
        fn template(&self) -> String {
            "<div><span></div>".to_string()
        }
    }

    let host = ComponentHost::new(Broken, &document(), "#app").unwrap();
    assert!(matches!(host.mount(), Err(MountError::Template(_))));
    assert!(!host.is_mounted());
}

struct Traced {
    events: Rc<RefCell<Vec<String>>>,
}

impl Component for Traced {
    fn init_state(&self) -> State {
        State::new().with("n", 0)
    }

    fn template(&self) -> String {
        "<b>{{ n }}</b>".to_string()
    }

    fn setup_hooks(&self, hooks: &mut HookEmitter, _state: &State) {
        for hook in [Hook::Init, Hook::Mount, Hook::Update, Hook::Destroy] {
            let events = Rc::clone(&self.events);
            hooks.on(hook, move || {
                events.borrow_mut().push(hook.to_string());
                Ok(())
            });
        }
        // 失敗するフックがあっても後続は呼ばれる
        hooks.on(Hook::Mount, || Err("mount hook failed".into()));
        let events = Rc::clone(&self.events);
        hooks.on(Hook::Mount, move || {
            events.borrow_mut().push("after failure".to_string());
            Ok(())
        });
    }

    fn rendered(&self, root: &Node, _state: &State) {
        self.events.borrow_mut().push(format!("rendered {}", root.text_content()));
    }
}

#[test]
fn test_lifecycle_order() {
    let events = Rc::new(RefCell::new(Vec::new()));
    let host = ComponentHost::new(
        Traced {
            events: Rc::clone(&events),
        },
        &document(),
        "#app",
    )
    .unwrap();
    host.mount().unwrap();
    host.state().set("n", 1);
    host.destroy();

    assert_eq!(
        *events.borrow(),
        vec![
            "onInit",
            "rendered 0",
            "onMount",
            "after failure",
            "rendered 1",
            "onUpdate",
            "onDestroy",
        ]
    );
    assert!(host.container().children().is_empty());
}
