// ========================================
// インメモリDOM
// ========================================
//
// テンプレートを実体化したノードツリーとHTMLシリアライズ。

pub mod dom;
pub mod serialize;

pub use dom::{Event, Listener, Node, NodeType};
