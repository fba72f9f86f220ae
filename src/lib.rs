pub mod error;
pub mod parser;
pub mod dom_renderer;
pub mod engine;

use std::env;
use log::info;

pub use dom_renderer::{Event, Node, NodeType};
pub use engine::compiler::{Bindings, bind};
pub use engine::component::{Component, ComponentHost};
pub use engine::eval::{EvalContext, evaluate, evaluate_expression};
pub use engine::lifecycle::{Hook, HookEmitter, HookResult};
pub use engine::reactive::{Effect, run_effect, untracked};
pub use engine::state::{State, WeakState};
pub use error::{EvalError, MountError, ParseError};
pub use parser::parse_template;

// ========================================
// コマンドライン引数構造体
// ========================================

/// コマンドライン引数の設定
#[derive(Debug)]
pub struct CliArgs {
    pub quiet: bool,  // panic以外のログを抑制
    pub log_level: LogLevel,
    pub ticks: u32,   // デモでクリックを何回シミュレートするか
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogLevel {
    Off,      // ログを一切表示しない（panicは除く）
    Error,    // エラーレベルのみ
    Warn,     // 警告レベル以上
    Info,     // 情報レベル以上
    Debug,    // デバッグレベル以上
    Trace,    // 全てのログ
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            quiet: false,
            log_level: LogLevel::Info,
            ticks: 3,
        }
    }
}

pub fn parse_args() -> CliArgs {
    let args: Vec<String> = env::args().collect();
    parse_args_from(args.iter().skip(1).map(String::as_str))
}

/// 引数列から設定を組み立てる（プログラム名は含めない）
pub fn parse_args_from<'a>(args: impl IntoIterator<Item = &'a str>) -> CliArgs {
    let mut cli_args = CliArgs::default();

    for arg in args {
        match arg {
            "--quiet" | "-q" => {
                cli_args.quiet = true;
                cli_args.log_level = LogLevel::Off;
            }
            "--log-level=off" => cli_args.log_level = LogLevel::Off,
            "--log-level=error" => cli_args.log_level = LogLevel::Error,
            "--log-level=warn" => cli_args.log_level = LogLevel::Warn,
            "--log-level=info" => cli_args.log_level = LogLevel::Info,
            "--log-level=debug" => cli_args.log_level = LogLevel::Debug,
            "--log-level=trace" => cli_args.log_level = LogLevel::Trace,
            "--help" | "-h" => {
                show_help();
                std::process::exit(0);
            }
            other => {
                if let Some(n) = other.strip_prefix("--ticks=") {
                    match n.parse() {
                        Ok(n) => cli_args.ticks = n,
                        Err(_) => eprintln!("ignoring invalid --ticks value: {}", n),
                    }
                }
            }
        }
    }
    cli_args
}

pub fn show_help() {
    info!("Mizu Counter Demo

USAGE:
    mizu [OPTIONS]

OPTIONS:
    --ticks=N                Number of simulated button clicks (default: 3)
    --quiet, -q              Suppress all logs except panics
    --log-level=LEVEL        Set log level (off/error/warn/info/debug/trace)
    --help, -h               Show this help");
}

/// ログレベルを初期化する関数
pub fn init_logger(log_level: &LogLevel) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::sync::Once;

    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let level = match log_level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        };

        let mut builder = Builder::from_default_env();

        if matches!(log_level, LogLevel::Off) {
            // quietモードの場合、何も出力しない（panicは別途処理される）
            builder
                .filter_level(LevelFilter::Off)
                .format(|_, _| Ok(()))
                .try_init()
                .ok(); // エラーを無視
        } else {
            builder
                .filter_level(level)
                // pest の内部ログは抑制
                .filter_module("pest", LevelFilter::Warn)
                .format_timestamp_secs()
                .try_init()
                .ok(); // エラーを無視
        }
    });
}
