use ndshape_ast::NdtError;
use ndshape_rt_native::{Flags, MasterBuffer};
use proptest::{
    prelude::prop,
    test_runner::{Config, TestCaseError, TestRunner},
};

#[test]
fn fixed_dim_addresses_are_row_major() {
    let mut runner = TestRunner::new(Config {
        cases: 64,
        ..Config::default()
    });
    let strat = (
        prop::collection::vec(1i64..5, 1..4),
        prop::collection::vec(0i64..64, 4),
    );

    runner
        .run(&strat, |(shapes, picks)| {
            let src: String = shapes.iter().map(|s| format!("{s} * ")).collect::<String>() + "int16";
            let buf = MasterBuffer::from_type_string(&src, Flags::OWN_ALL)
                .map_err(|e| TestCaseError::fail(format!("{e:?}")))?;
            if buf.nbytes() as i64 != shapes.iter().product::<i64>() * 2 {
                return Err(TestCaseError::fail(format!("wrong size for '{src}'")));
            }

            let path: Vec<i64> = shapes.iter().zip(&picks).map(|(s, p)| p % s).collect();
            let linear = path
                .iter()
                .zip(&shapes)
                .fold(0i64, |acc, (i, s)| acc * s + i);
            let h = buf
                .subtree(&path)
                .map_err(|e| TestCaseError::fail(format!("{e:?}")))?;
            let addr = h
                .address()
                .map_err(|e| TestCaseError::fail(format!("{e:?}")))?;
            if addr != buf.as_ptr().wrapping_add(linear as usize * 2) {
                return Err(TestCaseError::fail(format!("bad address for {path:?} in '{src}'")));
            }

            let mut past = path.clone();
            past[0] = shapes[0];
            if buf.subtree(&past).is_ok() {
                return Err(TestCaseError::fail(format!("{past:?} accepted in '{src}'")));
            }
            Ok(())
        })
        .expect("row-major addressing");
}

fn offset_of(buf: &MasterBuffer<'_>, path: &[i64]) -> usize {
    let h = buf.subtree(path).expect("path should resolve");
    h.address().expect("address").addr() - buf.as_ptr().addr()
}

#[test]
fn wrapped_fixed_dims_start_at_their_element() {
    let mut buf = MasterBuffer::from_type_string("2 * Foo(3 * int8)", Flags::OWN_ALL)
        .expect("buffer");
    assert_eq!(buf.nbytes(), 6);
    for i in 0..2i64 {
        for j in 0..3i64 {
            assert_eq!(offset_of(&buf, &[i, j]), (i * 3 + j) as usize, "[{i}, {j}]");
        }
    }
    assert!(buf.subtree(&[1, 3]).is_err());

    buf.write(&[1, 2], 7i8).unwrap();
    assert_eq!(buf.as_bytes(), &[0, 0, 0, 0, 0, 7]);
}

#[test]
fn wrapped_var_dims_use_their_own_offsets() {
    let mut buf = MasterBuffer::from_type_string(
        "var(offsets=[0, 2]) * Foo(var(offsets=[0, 3]) * int8)",
        Flags::OWN_ALL,
    )
    .expect("buffer");
    assert_eq!(buf.nbytes(), 6);
    assert_eq!(buf.subtree(&[1]).unwrap().resolve().unwrap().len().unwrap(), 3);
    assert_eq!(offset_of(&buf, &[1, 0]), 3);
    assert_eq!(offset_of(&buf, &[1, 2]), 5);

    buf.write(&[1, 2], -1i8).unwrap();
    assert_eq!(buf.subtree(&[1, 2]).unwrap().read::<i8>().unwrap(), -1);
    assert_eq!(buf.as_bytes()[5], 0xff);
}

#[test]
fn wrapped_optional_dims_keep_presence_per_element() {
    let mut buf =
        MasterBuffer::from_type_string("2 * M::3 * ?int8", Flags::OWN_ALL).expect("buffer");
    assert_eq!(buf.nbytes(), 6);
    assert_eq!(offset_of(&buf, &[1, 2]), 5);

    buf.write(&[1, 2], 9i8).unwrap();
    assert!(buf.subtree(&[1, 2]).unwrap().is_valid().unwrap());
    assert!(buf.subtree(&[1, 1]).unwrap().is_na().unwrap());
    assert!(buf.subtree(&[0, 2]).unwrap().is_na().unwrap());
    assert_eq!(buf.as_bytes()[5], 9);
}

#[test]
fn presence_bitmaps_too_large_to_count_are_rejected() {
    let err = MasterBuffer::from_type_string("4611686018427387904 * 4 * ?void", Flags::OWN_ALL)
        .unwrap_err();
    assert!(matches!(err, NdtError::Value(_) | NdtError::Memory(_)));
}
