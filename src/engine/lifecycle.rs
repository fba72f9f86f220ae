use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

/// ライフサイクルフック
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    Init,
    Mount,
    Update,
    Destroy,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Hook::Init => "onInit",
            Hook::Mount => "onMount",
            Hook::Update => "onUpdate",
            Hook::Destroy => "onDestroy",
        };
        f.write_str(name)
    }
}

pub type HookResult = Result<(), Box<dyn std::error::Error>>;
pub type HookFn = Rc<dyn Fn() -> HookResult>;

/// フックの登録と発火
///
/// 登録順に呼び出す。失敗（エラーまたはパニック）はフックごとにログへ出し、
/// 残りのフックは続けて呼ばれる。
#[derive(Clone, Default)]
pub struct HookEmitter {
    hooks: HashMap<Hook, Vec<HookFn>>,
}

impl HookEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&mut self, hook: Hook, f: impl Fn() -> HookResult + 'static) {
        self.hooks.entry(hook).or_default().push(Rc::new(f));
    }

    pub fn count(&self, hook: Hook) -> usize {
        self.hooks.get(&hook).map_or(0, Vec::len)
    }

    /// フックを発火し、失敗した数を返す
    pub fn emit(&self, hook: Hook) -> usize {
        let Some(fns) = self.hooks.get(&hook) else {
            return 0;
        };

        log::trace!("emitting {} to {} hook(s)", hook, fns.len());
        let mut failures = 0;
        for f in fns {
            match catch_unwind(AssertUnwindSafe(|| f())) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    failures += 1;
                    log::error!("Error in {}: {}", hook, err);
                }
                Err(payload) => {
                    failures += 1;
                    log::error!("Panic in {}: {}", hook, panic_message(payload.as_ref()));
                }
            }
        }
        failures
    }
}

impl fmt::Debug for HookEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut counts: Vec<(String, usize)> = self
            .hooks
            .iter()
            .map(|(hook, fns)| (hook.to_string(), fns.len()))
            .collect();
        counts.sort();
        f.debug_struct("HookEmitter").field("hooks", &counts).finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_hooks_run_in_registration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut emitter = HookEmitter::new();
        for i in 0..3 {
            let log = Rc::clone(&log);
            emitter.on(Hook::Mount, move || {
                log.borrow_mut().push(i);
                Ok(())
            });
        }

        assert_eq!(emitter.emit(Hook::Mount), 0);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert_eq!(emitter.emit(Hook::Destroy), 0);
    }

    #[test]
    fn test_failures_do_not_stop_remaining_hooks() {
        let reached = Rc::new(RefCell::new(false));
        let mut emitter = HookEmitter::new();
        emitter.on(Hook::Update, || Err("boom".into()));
        emitter.on(Hook::Update, || panic!("hook panicked"));
        let r = Rc::clone(&reached);
        emitter.on(Hook::Update, move || {
            *r.borrow_mut() = true;
            Ok(())
        });

        assert_eq!(emitter.emit(Hook::Update), 2);
        assert!(*reached.borrow());
    }

    #[test]
    fn test_hook_names() {
        assert_eq!(Hook::Init.to_string(), "onInit");
        assert_eq!(Hook::Destroy.to_string(), "onDestroy");
        let mut emitter = HookEmitter::new();
        emitter.on(Hook::Init, || Ok(()));
        assert_eq!(emitter.count(Hook::Init), 1);
        assert_eq!(emitter.count(Hook::Mount), 0);
    }
}
