use log::{error, info, warn};
use serde_json::{Value, json};

use mizu::{CliArgs, Component, ComponentHost, Hook, HookEmitter, MountError, Node, State};

const APP_TEMPLATE: &str = r#"
    <div style="font-family:sans-serif; text-align:center; margin-top:2rem;">
      <h2>Count: <span v-text="count"></span></h2>
      <button id="dec">-</button>
      <button id="inc" v-on:click="greet()">+</button>
      <p>
        <label>Set directly:
          <input type="range" min="0" max="100" v-model="count" />
        </label>
      </p>
      <p>Double: {{ count * 2 }}</p>
    </div>
"#;

struct Counter {
    initial: i64,
}

impl Component for Counter {
    fn init_state(&self) -> State {
        State::new()
            .with("count", self.initial)
            .with_method("greet", |_, _| {
                info!("hi");
                Ok(Value::Null)
            })
    }

    fn template(&self) -> String {
        APP_TEMPLATE.to_string()
    }

    fn setup_hooks(&self, hooks: &mut HookEmitter, state: &State) {
        let weak = state.downgrade();
        hooks.on(Hook::Init, move || {
            if let Some(state) = weak.upgrade() {
                info!("counter initialised with {:?}", state.peek("count"));
            }
            Ok(())
        });
        hooks.on(Hook::Mount, || {
            info!("counter mounted");
            Ok(())
        });
        hooks.on(Hook::Destroy, || {
            info!("counter destroyed");
            Ok(())
        });
    }

    // 描画のたびにボタンを付け直す（DOMは丸ごと置き換わる）
    fn rendered(&self, root: &Node, state: &State) {
        wire_step(root, "#inc", state, 1);
        wire_step(root, "#dec", state, -1);
    }
}

fn wire_step(root: &Node, selector: &str, state: &State, delta: i64) {
    let Some(button) = root.query_selector(selector) else {
        warn!("button {} not found", selector);
        return;
    };
    let weak = state.downgrade();
    button.add_event_listener("click", move |_| {
        if let Some(state) = weak.upgrade() {
            state.update("count", |v| {
                json!(v.and_then(|v| v.as_i64()).unwrap_or(0) + delta)
            });
        }
    });
}

fn compact(markup: &str) -> String {
    markup.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn click(host: &ComponentHost<Counter>, selector: &str) {
    match host.container().query_selector(selector) {
        Some(button) => button.click(),
        None => warn!("nothing to click at {}", selector),
    }
}

fn run(cli_args: &CliArgs) -> Result<(), MountError> {
    let document = mizu::parse_template(r#"<body><div id="app"></div></body>"#)?;
    let host = ComponentHost::new(Counter { initial: 10 }, &document, "#app")?;

    host.on(Hook::Update, || {
        log::debug!("counter re-rendered");
        Ok(())
    });
    host.mount()?;
    info!("mounted: {}", compact(&host.container().inner_html()));

    for tick in 0..cli_args.ticks {
        click(&host, "#inc");
        info!("tick {}: {}", tick + 1, compact(&host.container().inner_html()));
    }

    click(&host, "#dec");
    info!("after decrement: {}", compact(&host.container().inner_html()));

    if let Some(input) = host.container().query_selector("input") {
        input.set_input_value("42");
        info!("after input: {}", compact(&host.container().inner_html()));
    }

    info!(
        "final count {:?} after {} render(s)",
        host.state().peek("count"),
        host.render_count()
    );
    host.destroy();
    Ok(())
}

fn main() {
    let cli_args = mizu::parse_args();
    mizu::init_logger(&cli_args.log_level);

    if let Err(err) = run(&cli_args) {
        error!("{}", err);
        std::process::exit(1);
    }
}
