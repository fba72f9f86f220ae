pub mod reactive;
pub mod value;
pub mod state;
pub mod eval;
pub mod compiler;
pub mod lifecycle;
pub mod component;
