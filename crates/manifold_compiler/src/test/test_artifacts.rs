use super::run_case::{func, session_with};
use crate::RunConfig;
use manifold_common::config as cfg;
use manifold_common::data::prims::Prim;
use manifold_common::data::syntax::{Expr, Stmt};
use manifold_core::interpreter::value::Value;
use std::fs;

#[test]
fn typed_ir_is_dumped_before_and_after_optimization() {
    let dir = tempfile::tempdir().expect("Could not create temporary directory");
    let config = RunConfig {
        artifact_dir: Some(cfg::ArtifactDir {
            dir_path: dir.path().to_owned(),
            filename_prefix: "scale".into(),
        }),
        ..Default::default()
    };
    let mut session = session_with(&[func(
        "scale",
        &["xs", "k"],
        vec![Stmt::ret(Expr::prim(
            Prim::Multiply,
            vec![Expr::var("xs"), Expr::var("k")],
        ))],
    )]);

    crate::run(
        &mut session,
        "scale",
        vec![Value::floats(&[1.0, 2.0]), Value::float(3.0)],
        &config,
    )
    .expect("Run failed");

    for extension in ["typed", "optimized"] {
        let path = dir.path().join(format!("scale.{}", extension));
        let contents = fs::read_to_string(&path).expect("Artifact should exist");
        assert!(
            contents.starts_with("fn scale[array1<float64>,float64](xs: array1<float64>"),
            "unexpected {} artifact:\n{}",
            extension,
            contents
        );
    }
}
