use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::engine::reactive::{self, DepKey, TargetId};
use crate::error::EvalError;

/// 予約キー。メソッドの登録先
pub const METHODS_KEY: &str = "methods";

/// 式から呼び出せるメソッド。所有者の状態を受け取るので書き込みもできる
pub type Method = Rc<dyn Fn(&State, &[Value]) -> Result<Value, EvalError>>;

/// リアクティブ状態オブジェクト
///
/// 読み取りは実行中のエフェクトの依存として記録され、書き込みは購読中の
/// エフェクトを同期的に再実行する。クローンは同じ状態を指す。
#[derive(Clone)]
pub struct State {
    inner: Rc<StateInner>,
}

/// 依存テーブルのエントリを生かし続けない弱参照
#[derive(Clone)]
pub struct WeakState {
    inner: Weak<StateInner>,
}

struct StateInner {
    id: TargetId,
    values: RefCell<Map<String, Value>>,
    methods: RefCell<HashMap<String, Method>>,
}

impl Drop for StateInner {
    fn drop(&mut self) {
        reactive::release_target(self.id);
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    pub fn new() -> Self {
        Self::from_map(Map::new())
    }

    pub fn from_map(mut values: Map<String, Value>) -> Self {
        if values.remove(METHODS_KEY).is_some() {
            log::warn!("`{}` is reserved for methods; dropping the plain value", METHODS_KEY);
        }
        State {
            inner: Rc::new(StateInner {
                id: reactive::next_target_id(),
                values: RefCell::new(values),
                methods: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// JSONオブジェクトから状態を作る
    pub fn from_value(value: Value) -> Result<Self, EvalError> {
        match value {
            Value::Object(map) => Ok(Self::from_map(map)),
            other => Err(EvalError::type_error(format!(
                "state initializer must be an object, got {}",
                crate::engine::value::type_name(&other)
            ))),
        }
    }

    /// シリアライズ可能な構造体から状態を作る
    pub fn from_serialize<T: Serialize>(initial: &T) -> Result<Self, EvalError> {
        let value = serde_json::to_value(initial).map_err(|e| EvalError::type_error(e.to_string()))?;
        Self::from_value(value)
    }

    /// ビルダー形式で初期値を追加する（通知はしない）
    pub fn with(self, key: &str, value: impl Into<Value>) -> Self {
        if key == METHODS_KEY {
            log::warn!("`{}` is reserved for methods; ignoring value", METHODS_KEY);
        } else {
            self.inner.values.borrow_mut().insert(key.to_string(), value.into());
        }
        self
    }

    pub fn with_method<F>(self, name: &str, method: F) -> Self
    where
        F: Fn(&State, &[Value]) -> Result<Value, EvalError> + 'static,
    {
        self.register_method(name, method);
        self
    }

    pub fn register_method<F>(&self, name: &str, method: F)
    where
        F: Fn(&State, &[Value]) -> Result<Value, EvalError> + 'static,
    {
        self.inner
            .methods
            .borrow_mut()
            .insert(name.to_string(), Rc::new(method));
    }

    pub fn id(&self) -> TargetId {
        self.inner.id
    }

    /// エフェクトやリスナーが捕まえるのはこちら。強参照は依存テーブル経由で循環する
    pub fn downgrade(&self) -> WeakState {
        WeakState {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn ptr_eq(&self, other: &State) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ========================================
    // 読み取り
    // ========================================

    /// 値を読む。実行中のエフェクトがあればこのキーを購読させる
    ///
    /// 存在しないキーでも購読は記録される（後から追加されたときに再実行される）。
    pub fn get(&self, key: &str) -> Option<Value> {
        reactive::track(self.inner.id, DepKey::Key(key.to_string()));
        self.peek(key)
    }

    /// 購読せずに値を読む
    pub fn peek(&self, key: &str) -> Option<Value> {
        self.inner.values.borrow().get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.values.borrow().contains_key(key)
    }

    /// 実行中のエフェクトを全てのキーへの書き込みに購読させる
    pub fn track_all(&self) {
        reactive::track(self.inner.id, DepKey::Any);
    }

    /// 現在の値のコピー（購読しない）
    pub fn snapshot(&self) -> Map<String, Value> {
        self.inner.values.borrow().clone()
    }

    /// 現在の値を構造体として取り出す
    pub fn to_struct<T: DeserializeOwned>(&self) -> Result<T, EvalError> {
        serde_json::from_value(Value::Object(self.snapshot()))
            .map_err(|e| EvalError::type_error(e.to_string()))
    }

    pub fn method(&self, name: &str) -> Option<Method> {
        self.inner.methods.borrow().get(name).cloned()
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.inner.methods.borrow().contains_key(name)
    }

    // ========================================
    // 書き込み
    // ========================================

    /// 値を書き込み、購読中のエフェクトを同期的に再実行する
    ///
    /// 同じ値の書き込みでも購読者は再実行される。
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        if key == METHODS_KEY {
            log::warn!("`{}` is reserved for methods; ignoring write", METHODS_KEY);
            return;
        }

        self.inner
            .values
            .borrow_mut()
            .insert(key.to_string(), value.into());
        reactive::trigger(self.inner.id, key);
    }

    /// 現在の値（購読しない）から新しい値を計算して書き込む
    pub fn update(&self, key: &str, f: impl FnOnce(Option<Value>) -> Value) {
        let next = f(self.peek(key));
        self.set(key, next);
    }
}

impl WeakState {
    pub fn upgrade(&self) -> Option<State> {
        self.inner.upgrade().map(|inner| State { inner })
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<String> = self.inner.methods.borrow().keys().cloned().collect();
        methods.sort();
        f.debug_struct("State")
            .field("id", &self.inner.id)
            .field("values", &self.inner.values.borrow())
            .field("methods", &methods)
            .finish()
    }
}
