use super::run_case::{checked_config, float_array, func, int_array, session_with};
use manifold_common::data::syntax::{Expr, Stmt};
use manifold_common::data::types::{ScalarType, Type};
use manifold_common::data::untyped_ast::UntypedFn;
use manifold_core::interpreter::value::Value;

fn create_const() -> UntypedFn {
    let x = || Expr::var("x");
    func(
        "create_const",
        &["x"],
        vec![Stmt::ret(Expr::array(vec![x(), x(), x(), x()]))],
    )
}

// `x[idx...] = v; return x`
fn set_idx(name: &str, index_names: &[&str]) -> UntypedFn {
    let mut params = vec!["x"];
    params.extend(index_names);
    params.push("v");
    let index = match index_names {
        [single] => Expr::var(*single),
        many => Expr::tuple(many.iter().map(|name| Expr::var(*name)).collect()),
    };
    func(
        name,
        &params,
        vec![
            Stmt::assign(Expr::index(Expr::var("x"), index), Expr::var("v")),
            Stmt::ret(Expr::var("x")),
        ],
    )
}

case! { create_const_int;
    "create_const"(Value::int(3));
    funcs = [create_const()];
    expect = Value::ints(&[3, 3, 3, 3]);
}

case! { create_const_float;
    "create_const"(Value::float(2.5));
    funcs = [create_const()];
    expect = Value::floats(&[2.5, 2.5, 2.5, 2.5]);
}

#[test]
fn create_const_specializes_per_element_type() {
    let mut session = session_with(&[create_const()]);
    let config = checked_config(true);
    crate::run(&mut session, "create_const", vec![Value::int(1)], &config).expect("Run failed");
    crate::run(&mut session, "create_const", vec![Value::float(1.0)], &config)
        .expect("Run failed");

    let int_version = session
        .typed("create_const[int64]")
        .expect("int specialization should be cached");
    let float_version = session
        .typed("create_const[float64]")
        .expect("float specialization should be cached");
    assert_eq!(int_version.return_type, Type::Array(ScalarType::Int64, 1));
    assert_eq!(float_version.return_type, Type::Array(ScalarType::Float64, 1));
}

case! { set_idx_1d;
    "set_idx_1d"(Value::ints(&[1, 2, 3]), Value::int(1), Value::int(9));
    funcs = [set_idx("set_idx_1d", &["i"])];
    expect = Value::ints(&[1, 9, 3]);
}

case! { set_idx_1d_negative;
    "set_idx_1d"(Value::ints(&[1, 2, 3]), Value::int(-1), Value::int(9));
    funcs = [set_idx("set_idx_1d", &["i"])];
    expect = Value::ints(&[1, 2, 9]);
}

case! { set_idx_2d_coerces_value;
    "set_idx_2d"(
        float_array(&[2, 3], &[0.0; 6]),
        Value::int(1),
        Value::int(2),
        Value::int(7),
    );
    funcs = [set_idx("set_idx_2d", &["i", "j"])];
    expect = float_array(&[2, 3], &[0.0, 0.0, 0.0, 0.0, 0.0, 7.0]);
}

case! { set_idx_3d;
    "set_idx_3d"(
        int_array(&[2, 2, 2], &[0; 8]),
        Value::int(1),
        Value::int(0),
        Value::int(1),
        Value::int(5),
    );
    funcs = [set_idx("set_idx_3d", &["i", "j", "k"])];
    expect = int_array(&[2, 2, 2], &[0, 0, 0, 0, 0, 5, 0, 0]);
}

case! { set_idx_row;
    "set_idx_row"(
        int_array(&[2, 2], &[1, 2, 3, 4]),
        Value::int(0),
        Value::ints(&[8, 9]),
    );
    funcs = [set_idx("set_idx_row", &["i"])];
    expect = int_array(&[2, 2], &[8, 9, 3, 4]);
}
