pub mod prims;
pub mod shape_ast;
pub mod syntax;
pub mod typed_ast;
pub mod types;
pub mod untyped_ast;
