//! Per-function dataflow facts consumed by copy elimination.

use manifold_common::data::typed_ast::TypedFn;

pub mod escape;
pub mod local_allocs;
pub mod use_def;

use escape::Escape;
use local_allocs::LocalAllocs;
use use_def::UseDef;

#[derive(Clone, Debug)]
pub struct Dataflow {
    pub use_def: UseDef,
    pub escape: Escape,
    pub local_allocs: LocalAllocs,
}

impl Dataflow {
    pub fn compute(func: &TypedFn) -> Dataflow {
        let use_def = UseDef::compute(func);
        let escape = Escape::compute(func);
        let local_allocs = LocalAllocs::compute(func, &use_def);
        Dataflow {
            use_def,
            escape,
            local_allocs,
        }
    }
}
