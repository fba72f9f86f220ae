// ========================================
// コンポーネントと描画ドライバー
// ========================================
//
// 描画は毎回フルで行う：テンプレートを切り離されたフラグメントに実体化し、
// バインドしてからコンテナの中身と入れ替える。差分パッチはしない。
// 前回の描画のバインディングは新しいものを登録する前に解除する。

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::dom_renderer::Node;
use crate::engine::compiler::{self, Bindings};
use crate::engine::lifecycle::{Hook, HookEmitter, HookResult};
use crate::engine::reactive::{Effect, run_named_effect};
use crate::engine::state::State;
use crate::error::MountError;
use crate::parser::parse_template;

/// 状態とテンプレートを持つUI部品
pub trait Component: 'static {
    /// 初期状態（メソッドもここで登録する）
    fn init_state(&self) -> State;

    /// HTMLテンプレート。描画のたびに呼ばれる
    fn template(&self) -> String;

    /// 初期化フックの前に呼ばれる。フックを登録する
    fn setup_hooks(&self, _hooks: &mut HookEmitter, _state: &State) {}

    /// 描画が終わるたびに呼ばれる。バインディング以外のリスナーをここで付ける
    fn rendered(&self, _root: &Node, _state: &State) {}
}

/// コンポーネントをコンテナにマウントして描画を駆動する
pub struct ComponentHost<C: Component> {
    inner: Rc<HostInner<C>>,
}

struct HostInner<C: Component> {
    component: C,
    state: State,
    container: Node,
    selector: String,
    hooks: RefCell<HookEmitter>,
    mounted: Cell<bool>,
    bindings: RefCell<Bindings>,
    render_effect: RefCell<Option<Effect>>,
    renders: Cell<usize>,
}

impl<C: Component> ComponentHost<C> {
    /// `document` から `selector` でマウント先を探し、状態と描画エフェクトを用意する
    ///
    /// マウント先が見つからない場合はエラー。描画は [`ComponentHost::mount`] まで行わない。
    pub fn new(component: C, document: &Node, selector: &str) -> Result<Self, MountError> {
        let container = document
            .query_selector(selector)
            .ok_or_else(|| MountError::MountPointNotFound(selector.to_string()))?;

        let state = component.init_state();
        let mut hooks = HookEmitter::new();
        component.setup_hooks(&mut hooks, &state);

        let inner = Rc::new(HostInner {
            component,
            state,
            container,
            selector: selector.to_string(),
            hooks: RefCell::new(hooks),
            mounted: Cell::new(false),
            bindings: RefCell::new(Bindings::default()),
            render_effect: RefCell::new(None),
            renders: Cell::new(0),
        });

        inner.emit(Hook::Init);

        // 状態への全ての書き込みで再描画する。マウント前は何もしない
        let weak: Weak<HostInner<C>> = Rc::downgrade(&inner);
        let effect = run_named_effect(format!("render {}", selector), move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.state.track_all();
            if !inner.mounted.get() {
                return;
            }
            match inner.render() {
                Ok(()) => {
                    inner.emit(Hook::Update);
                }
                Err(err) => log::error!("re-render of {} failed: {}", inner.selector, err),
            }
        });
        *inner.render_effect.borrow_mut() = Some(effect);

        log::debug!("component created at {}", selector);
        Ok(ComponentHost { inner })
    }

    /// 初回描画を行い、マウント済みにして `onMount` を発火する
    pub fn mount(&self) -> Result<(), MountError> {
        self.inner.render()?;
        self.inner.mounted.set(true);
        log::info!("mounted component at {}", self.inner.selector);
        self.inner.emit(Hook::Mount);
        Ok(())
    }

    /// `onDestroy` を発火し、バインディングを解除してコンテナを空にする
    pub fn destroy(&self) {
        self.inner.emit(Hook::Destroy);
        self.inner.bindings.borrow_mut().dispose();
        self.inner.container.clear_children();
        self.inner.mounted.set(false);
        log::info!("destroyed component at {}", self.inner.selector);
    }

    /// フル描画を一回行う（フックは発火しない）
    pub fn render(&self) -> Result<(), MountError> {
        self.inner.render()
    }

    pub fn on(&self, hook: Hook, f: impl Fn() -> HookResult + 'static) {
        self.inner.hooks.borrow_mut().on(hook, f);
    }

    pub fn state(&self) -> &State {
        &self.inner.state
    }

    pub fn container(&self) -> &Node {
        &self.inner.container
    }

    pub fn component(&self) -> &C {
        &self.inner.component
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.get()
    }

    /// これまでの描画回数
    pub fn render_count(&self) -> usize {
        self.inner.renders.get()
    }

    /// 現在の描画が持つバインディングエフェクトの数
    pub fn binding_count(&self) -> usize {
        self.inner.bindings.borrow().len()
    }
}

impl<C: Component> HostInner<C> {
    fn render(&self) -> Result<(), MountError> {
        let fragment = parse_template(&self.component.template())?;

        // 前回の描画の購読を外してから新しいバインディングを登録する
        let mut previous = self.bindings.replace(Bindings::default());
        previous.dispose();

        let bindings = compiler::bind(&fragment, &self.state);
        self.container.clear_children();
        self.container.append_child(&fragment);
        *self.bindings.borrow_mut() = bindings;

        let count = self.renders.get() + 1;
        self.renders.set(count);
        log::debug!("render #{} of {}", count, self.selector);

        self.component.rendered(&self.container, &self.state);
        Ok(())
    }

    fn emit(&self, hook: Hook) {
        // フック内から `on` を呼べるよう借用の外で発火する
        let hooks = self.hooks.borrow().clone();
        let failures = hooks.emit(hook);
        if failures > 0 {
            log::warn!("{} {} hook(s) failed at {}", failures, hook, self.selector);
        }
    }
}

impl<C: Component> Drop for HostInner<C> {
    fn drop(&mut self) {
        if let Some(effect) = self.render_effect.get_mut().take() {
            effect.dispose();
        }
        self.bindings.get_mut().dispose();
    }
}

impl<C: Component> fmt::Debug for ComponentHost<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentHost")
            .field("selector", &self.inner.selector)
            .field("mounted", &self.inner.mounted.get())
            .field("renders", &self.inner.renders.get())
            .field("bindings", &self.inner.bindings.borrow().len())
            .finish()
    }
}
