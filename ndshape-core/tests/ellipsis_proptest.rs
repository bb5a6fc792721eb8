use ndshape_core::{Entry, SymbolTable, match_types, match_with, typecheck};
use ndshape_parse::parse_type;
use proptest::{
    prelude::prop,
    test_runner::{Config, TestCaseError, TestRunner},
};

const DTYPES: &[&str] = &[
    "int8",
    "?int32",
    "float64",
    "complex128",
    "string",
    "bytes(align=4)",
    "fixed_string(3, 'utf16')",
    "categorical('x', 'y', NA)",
    "ref(int64)",
    "{a : int16, b : ?float32}",
    "(uint8, char('ascii'), fixed_bytes(size=8, align=4))",
];

fn dims_prefix(shapes: &[i64]) -> String {
    shapes.iter().map(|s| format!("{s} * ")).collect()
}

fn fail(e: impl std::fmt::Debug) -> TestCaseError {
    TestCaseError::fail(format!("{e:?}"))
}

#[test]
fn concrete_types_match_themselves() {
    let mut runner = TestRunner::new(Config {
        cases: 128,
        ..Config::default()
    });
    let strat = (
        prop::collection::vec(1i64..6, 0..5),
        0..DTYPES.len(),
    );

    runner
        .run(&strat, |(shapes, d)| {
            let src = format!("{}{}", dims_prefix(&shapes), DTYPES[d]);
            let t = parse_type(&src).map_err(fail)?;
            let before = t.clone();
            if !match_types(&t, &t).map_err(fail)? {
                return Err(TestCaseError::fail(format!("'{src}' does not match itself")));
            }
            if t != before {
                return Err(TestCaseError::fail("matching mutated the type"));
            }
            Ok(())
        })
        .expect("reflexivity");
}

#[test]
fn ellipsis_at_any_position_captures_the_middle() {
    let mut runner = TestRunner::new(Config {
        cases: 128,
        ..Config::default()
    });
    let strat = (prop::collection::vec(1i64..6, 0..7), 0usize..8, 0usize..8);

    runner
        .run(&strat, |(shapes, a, b)| {
            let n = shapes.len();
            let a = a.min(n);
            let b = b.min(n - a);
            let pattern = format!(
                "{}Dims... * {}int32",
                dims_prefix(&shapes[..a]),
                dims_prefix(&shapes[n - b..])
            );
            let concrete = parse_type(&format!("{}int32", dims_prefix(&shapes))).map_err(fail)?;
            let pattern = parse_type(&pattern).map_err(fail)?;

            let mut table = SymbolTable::new();
            if !match_with(&pattern, &concrete, &mut table).map_err(fail)? {
                return Err(TestCaseError::fail(format!("'{pattern}' rejects '{concrete}'")));
            }
            match table.find("Dims") {
                Entry::DimList(dims) if dims.len() == n - a - b => Ok(()),
                other => Err(TestCaseError::fail(format!(
                    "expected {} captured dims, got {other:?}",
                    n - a - b
                ))),
            }
        })
        .expect("ellipsis capture");
}

#[test]
fn ellipsis_never_matches_when_fixed_dims_overhang() {
    let mut runner = TestRunner::new(Config {
        cases: 64,
        ..Config::default()
    });
    let strat = (
        prop::collection::vec(1i64..6, 0..4),
        prop::collection::vec(1i64..6, 1..4),
    );

    runner
        .run(&strat, |(shapes, extra)| {
            let mut all = shapes.clone();
            all.extend(&extra);
            // The pattern fixes more trailing dims than the concrete type has.
            let pattern = parse_type(&format!("... * {}int8", dims_prefix(&all)))
                .map_err(fail)?;
            let concrete =
                parse_type(&format!("{}int8", dims_prefix(&shapes))).map_err(fail)?;
            if match_types(&pattern, &concrete).map_err(fail)? {
                return Err(TestCaseError::fail(format!("'{pattern}' accepts '{concrete}'")));
            }
            Ok(())
        })
        .expect("overhang");
}

#[test]
fn typecheck_outer_dims_equal_captured_rank() {
    let mut runner = TestRunner::new(Config {
        cases: 64,
        ..Config::default()
    });
    let strat = prop::collection::vec(1i64..6, 0..6);
    let sig = parse_type("(... * float64) -> ... * float64").expect("signature");

    runner
        .run(&strat, |shapes| {
            let arg = format!("{}float64", dims_prefix(&shapes));
            let args = parse_type(&format!("({arg})")).map_err(fail)?;
            let (result, outer) = typecheck(&sig, &args).map_err(fail)?;
            if outer != shapes.len() || result.to_string() != arg {
                return Err(TestCaseError::fail(format!(
                    "typecheck of '{arg}' gave '{result}' with {outer} outer dims"
                )));
            }
            Ok(())
        })
        .expect("outer dims");
}
