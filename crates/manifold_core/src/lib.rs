pub mod adverbs;
pub mod analysis;
pub mod args;
pub mod backend;
pub mod copy_elimination;
pub mod interpreter;
pub mod registry;
pub mod rewrite_typed;
pub mod shape_codegen;
pub mod shape_infer;
pub mod specialize;
pub mod type_infer;
pub mod typecheck;
