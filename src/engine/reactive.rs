// ========================================
// 依存追跡とエフェクトの再実行
// ========================================
//
// 依存テーブルは `ターゲットID → (キー → エフェクト集合)` の形をとる。
// ターゲットはリアクティブ状態オブジェクトで、IDで識別される。
// 状態オブジェクトが破棄されると `release_target` でエントリが消える。
//
// 不変条件:
// 1. 書き込みは購読中のエフェクトを同期的に、登録順（エフェクトID順）に再実行する。
// 2. 実行中のエフェクトはスタックで管理する。入れ子の実行は内側のエフェクトに
//    依存が記録され、外側の収集を壊さない。
// 3. 購読は追加のみ。再実行で読まなくなったキーの購読も残る。
// 4. 破棄されたエフェクトは全ての購読集合から取り除かれ、二度と実行されない。
// 5. 実行中のエフェクトを再入させない。
//
// 全ての状態はスレッドローカルで、単一スレッドでの利用を前提とする。

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use indexmap::IndexMap;

/// 状態オブジェクトの識別子
pub type TargetId = usize;

static NEXT_TARGET_ID: AtomicUsize = AtomicUsize::new(1);
static NEXT_EFFECT_ID: AtomicUsize = AtomicUsize::new(1);

/// 新しいターゲットIDを払い出す
pub fn next_target_id() -> TargetId {
    NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed)
}

/// 購読キー。`Any` はターゲットへの全ての書き込みを購読する
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DepKey {
    Key(String),
    Any,
}

type Subscribers = IndexMap<usize, Effect>;

#[derive(Default)]
struct TargetDeps {
    keys: HashMap<String, Subscribers>,
    any: Subscribers,
}

thread_local! {
    static BUCKET: RefCell<HashMap<TargetId, TargetDeps>> = RefCell::new(HashMap::new());
    // None は追跡を止めるフレーム（untracked）
    static EFFECT_STACK: RefCell<Vec<Option<Effect>>> = const { RefCell::new(Vec::new()) };
}

// ========================================
// エフェクト
// ========================================

/// 再計算の単位。同一性は生成時のIDで決まる
#[derive(Clone)]
pub struct Effect(Rc<EffectInner>);

struct EffectInner {
    id: usize,
    label: String,
    run: Box<dyn Fn()>,
    disposed: Cell<bool>,
    runs: Cell<usize>,
    deps: RefCell<Vec<(TargetId, DepKey)>>,
}

impl Effect {
    /// 実行せずにエフェクトを作る
    pub fn new(label: impl Into<String>, f: impl Fn() + 'static) -> Self {
        Effect(Rc::new(EffectInner {
            id: NEXT_EFFECT_ID.fetch_add(1, Ordering::Relaxed),
            label: label.into(),
            run: Box::new(f),
            disposed: Cell::new(false),
            runs: Cell::new(0),
            deps: RefCell::new(Vec::new()),
        }))
    }

    pub fn id(&self) -> usize {
        self.0.id
    }

    pub fn label(&self) -> &str {
        &self.0.label
    }

    pub fn run_count(&self) -> usize {
        self.0.runs.get()
    }

    pub fn is_disposed(&self) -> bool {
        self.0.disposed.get()
    }

    /// これまでに購読した (ターゲット, キー) の組
    pub fn dependencies(&self) -> Vec<(TargetId, DepKey)> {
        self.0.deps.borrow().clone()
    }

    /// エフェクトを実行し、その間の読み取りを自身の依存として記録する
    ///
    /// パニックした場合もスタックは必ず元に戻る。
    pub fn run(&self) {
        if self.is_disposed() {
            return;
        }
        if self.is_running() {
            log::debug!(
                "effect #{} ({}) is already running; skipping re-entrant trigger",
                self.id(),
                self.label()
            );
            return;
        }

        let _frame = StackFrame::push(Some(self.clone()));
        self.0.runs.set(self.0.runs.get() + 1);
        (self.0.run)();
    }

    fn is_running(&self) -> bool {
        EFFECT_STACK.with(|stack| {
            stack
                .borrow()
                .iter()
                .flatten()
                .any(|e| Rc::ptr_eq(&e.0, &self.0))
        })
    }

    /// 全ての購読集合から外し、以後実行されないようにする
    pub fn dispose(&self) {
        if self.0.disposed.replace(true) {
            return;
        }

        let deps = std::mem::take(&mut *self.0.deps.borrow_mut());
        let id = self.id();

        // 取り外したハンドルの破棄は借用の外で行う（Drop が状態を解放しうる）
        let removed: Vec<Effect> = BUCKET.with(|bucket| {
            let mut bucket = bucket.borrow_mut();
            let mut removed = Vec::new();
            for (target, key) in deps {
                let Some(target_deps) = bucket.get_mut(&target) else {
                    continue;
                };
                match key {
                    DepKey::Key(key) => {
                        if let Some(subs) = target_deps.keys.get_mut(&key) {
                            removed.extend(subs.shift_remove(&id));
                            if subs.is_empty() {
                                target_deps.keys.remove(&key);
                            }
                        }
                    }
                    DepKey::Any => removed.extend(target_deps.any.shift_remove(&id)),
                }
            }
            removed
        });

        log::trace!(
            "disposed effect #{} ({}); released {} subscription(s)",
            id,
            self.label(),
            removed.len()
        );
        drop(removed);
    }
}

impl PartialEq for Effect {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.0.id)
            .field("label", &self.0.label)
            .field("runs", &self.0.runs.get())
            .field("disposed", &self.0.disposed.get())
            .finish()
    }
}

/// スタックへの push/pop を対にするガード
struct StackFrame;

impl StackFrame {
    fn push(effect: Option<Effect>) -> Self {
        EFFECT_STACK.with(|stack| stack.borrow_mut().push(effect));
        StackFrame
    }
}

impl Drop for StackFrame {
    fn drop(&mut self) {
        let popped = EFFECT_STACK.with(|stack| stack.borrow_mut().pop());
        drop(popped);
    }
}

// ========================================
// 公開操作
// ========================================

/// エフェクトを登録して一度実行する
///
/// 実行中の読み取りが購読として記録され、以後の書き込みで再実行される。
/// クロージャには `State::downgrade()` の弱参照を渡すこと。強参照を捕まえると
/// 依存テーブル経由で循環し、状態が解放されなくなる。
pub fn run_effect(f: impl Fn() + 'static) -> Effect {
    run_named_effect("effect", f)
}

/// ラベル付きでエフェクトを登録して一度実行する
pub fn run_named_effect(label: impl Into<String>, f: impl Fn() + 'static) -> Effect {
    let effect = Effect::new(label, f);
    log::trace!("registering effect #{} ({})", effect.id(), effect.label());
    effect.run();
    effect
}

/// 現在依存を収集しているエフェクト
pub fn active_effect() -> Option<Effect> {
    EFFECT_STACK.with(|stack| stack.borrow().last().cloned().flatten())
}

/// 依存を記録せずに `f` を実行する
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _frame = StackFrame::push(None);
    f()
}

/// 読み取りを記録する。実行中のエフェクトがなければ何もしない
pub fn track(target: TargetId, key: DepKey) {
    let Some(effect) = active_effect() else {
        return;
    };
    if effect.is_disposed() {
        return;
    }

    let (inserted, previous) = BUCKET.with(|bucket| {
        let mut bucket = bucket.borrow_mut();
        let target_deps = bucket.entry(target).or_default();
        let subs = match &key {
            DepKey::Key(k) => target_deps.keys.entry(k.clone()).or_default(),
            DepKey::Any => &mut target_deps.any,
        };
        // 既存のキーは元の位置を保つ
        let previous = subs.insert(effect.id(), effect.clone());
        (previous.is_none(), previous)
    });
    drop(previous);

    if inserted {
        effect.0.deps.borrow_mut().push((target, key));
    }
}

/// 書き込みを通知する。購読中のエフェクトを同期的に再実行する
///
/// キーの購読者と `Any` の購読者をまとめ、エフェクトID順（登録順）に実行する。
/// 通知中の購読変更に影響されないようスナップショットを取って回す。
pub fn trigger(target: TargetId, key: &str) {
    let effects: Vec<Effect> = BUCKET.with(|bucket| {
        let bucket = bucket.borrow();
        let Some(target_deps) = bucket.get(&target) else {
            return Vec::new();
        };

        let mut effects: Vec<Effect> = target_deps
            .keys
            .get(key)
            .map(|subs| subs.values().cloned().collect())
            .unwrap_or_default();
        for effect in target_deps.any.values() {
            if !effects.contains(effect) {
                effects.push(effect.clone());
            }
        }
        effects.sort_by_key(Effect::id);
        effects
    });

    if !effects.is_empty() {
        log::trace!("`{}` changed on #{}; running {} effect(s)", key, target, effects.len());
    }

    for effect in effects {
        effect.run();
    }
}

/// ターゲットの依存テーブルを解放する（状態オブジェクトの破棄時）
pub fn release_target(target: TargetId) {
    let removed = BUCKET
        .try_with(|bucket| {
            bucket
                .try_borrow_mut()
                .ok()
                .and_then(|mut bucket| bucket.remove(&target))
        })
        .ok()
        .flatten();

    if let Some(target_deps) = removed {
        // エフェクト側の記録からも外す
        let effects = target_deps
            .keys
            .values()
            .chain(std::iter::once(&target_deps.any))
            .flat_map(|subs| subs.values())
            .cloned()
            .collect::<Vec<_>>();
        for effect in &effects {
            if let Ok(mut deps) = effect.0.deps.try_borrow_mut() {
                deps.retain(|(t, _)| *t != target);
            }
        }
        drop(effects);
        drop(target_deps);
    }
}

/// ターゲット・キーの購読者数
pub fn subscriber_count(target: TargetId, key: &DepKey) -> usize {
    BUCKET.with(|bucket| {
        let bucket = bucket.borrow();
        let Some(target_deps) = bucket.get(&target) else {
            return 0;
        };
        match key {
            DepKey::Key(k) => target_deps.keys.get(k).map_or(0, |subs| subs.len()),
            DepKey::Any => target_deps.any.len(),
        }
    })
}

/// 依存テーブルにエントリを持つターゲットがあるか
pub fn has_target(target: TargetId) -> bool {
    BUCKET.with(|bucket| bucket.borrow().contains_key(&target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn key(k: &str) -> DepKey {
        DepKey::Key(k.to_string())
    }

    #[test]
    fn test_read_inside_effect_subscribes() {
        let target = next_target_id();
        let hits = Rc::new(Cell::new(0));

        let h = Rc::clone(&hits);
        let effect = run_effect(move || {
            track(target, key("count"));
            h.set(h.get() + 1);
        });

        assert_eq!(hits.get(), 1);
        assert_eq!(subscriber_count(target, &key("count")), 1);

        trigger(target, "count");
        assert_eq!(hits.get(), 2);
        assert_eq!(effect.run_count(), 2);

        // 別のキーは影響しない
        trigger(target, "other");
        assert_eq!(hits.get(), 2);
        release_target(target);
    }

    #[test]
    fn test_read_outside_effect_does_not_subscribe() {
        let target = next_target_id();
        track(target, key("count"));
        assert!(!has_target(target));
    }

    #[test]
    fn test_nested_effects_attribute_to_innermost() {
        let target = next_target_id();
        let inner_slot: Rc<RefCell<Option<Effect>>> = Rc::new(RefCell::new(None));

        let slot = Rc::clone(&inner_slot);
        let outer = run_effect(move || {
            track(target, key("outer"));
            if slot.borrow().is_none() {
                let inner = run_effect(move || track(target, key("inner")));
                *slot.borrow_mut() = Some(inner);
            }
            track(target, key("after"));
        });

        let inner = inner_slot.borrow().clone().unwrap();
        let outer_keys: Vec<DepKey> = outer.dependencies().into_iter().map(|(_, k)| k).collect();
        let inner_keys: Vec<DepKey> = inner.dependencies().into_iter().map(|(_, k)| k).collect();
        assert_eq!(outer_keys, vec![key("outer"), key("after")]);
        assert_eq!(inner_keys, vec![key("inner")]);
        release_target(target);
    }

    #[test]
    fn test_effect_is_not_reentered() {
        let target = next_target_id();
        let effect = run_effect(move || {
            track(target, key("count"));
            // 自身を再トリガーしても再帰しない
            trigger(target, "count");
        });
        assert_eq!(effect.run_count(), 1);
        trigger(target, "count");
        assert_eq!(effect.run_count(), 2);
        release_target(target);
    }

    #[test]
    fn test_stack_is_restored_after_panic() {
        let target = next_target_id();
        let result = std::panic::catch_unwind(|| {
            run_effect(move || {
                track(target, key("boom"));
                panic!("effect failed");
            });
        });
        assert!(result.is_err());
        assert!(active_effect().is_none());
        release_target(target);
    }

    #[test]
    fn test_dispose_removes_subscriptions() {
        let target = next_target_id();
        let effect = run_effect(move || {
            track(target, key("a"));
            track(target, DepKey::Any);
        });
        assert_eq!(subscriber_count(target, &key("a")), 1);
        assert_eq!(subscriber_count(target, &DepKey::Any), 1);

        effect.dispose();
        assert!(effect.is_disposed());
        assert_eq!(subscriber_count(target, &key("a")), 0);
        assert_eq!(subscriber_count(target, &DepKey::Any), 0);

        trigger(target, "a");
        assert_eq!(effect.run_count(), 1);
        release_target(target);
    }

    #[test]
    fn test_untracked_reads_do_not_subscribe() {
        let target = next_target_id();
        let effect = run_effect(move || {
            untracked(|| track(target, key("hidden")));
            track(target, key("seen"));
        });
        let keys: Vec<DepKey> = effect.dependencies().into_iter().map(|(_, k)| k).collect();
        assert_eq!(keys, vec![key("seen")]);
        release_target(target);
    }

    #[test]
    fn test_trigger_runs_in_registration_order() {
        let target = next_target_id();
        let order = Rc::new(RefCell::new(Vec::new()));
        let reads_a = Rc::new(Cell::new(false));

        let o = Rc::clone(&order);
        let _wildcard = run_effect(move || {
            track(target, DepKey::Any);
            o.borrow_mut().push("any");
        });
        // 二番目に登録するが、キーを購読するのは二回目の実行から
        let o = Rc::clone(&order);
        let flag = Rc::clone(&reads_a);
        let early = run_effect(move || {
            if flag.get() {
                track(target, key("a"));
            }
            o.borrow_mut().push("early");
        });
        let o = Rc::clone(&order);
        let _late = run_effect(move || {
            track(target, key("a"));
            o.borrow_mut().push("late");
        });

        reads_a.set(true);
        early.run();
        order.borrow_mut().clear();

        trigger(target, "a");
        assert_eq!(*order.borrow(), vec!["any", "early", "late"]);
        release_target(target);
    }

    #[test]
    fn test_release_target_drops_table_entry() {
        let target = next_target_id();
        let effect = run_effect(move || track(target, key("a")));
        assert!(has_target(target));
        release_target(target);
        assert!(!has_target(target));
        assert!(effect.dependencies().is_empty());
    }
}
