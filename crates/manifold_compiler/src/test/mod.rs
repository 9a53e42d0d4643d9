#[macro_use]
mod run_case;

mod test_artifacts;
mod test_fallback;
mod test_indexing;
