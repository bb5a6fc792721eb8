use ndshape_ast::NdtError;
use ndshape_parse::ParseConfig;
use ndshape_rt_native::{CountingAllocator, Flags, MasterBuffer};

fn buffer<'a>(
    src: &str,
    flags: Flags,
    alloc: &'a CountingAllocator,
) -> Result<MasterBuffer<'static, &'a CountingAllocator>, NdtError> {
    MasterBuffer::from_type_string_in(src, &ParseConfig::default(), flags, alloc)
}

#[test]
fn ref_to_bytes_frees_target_and_payload_once() {
    let alloc = CountingAllocator::new();
    {
        let mut buf = buffer("ref(bytes(align=4))", Flags::OWN_ALL, &alloc).expect("buffer");
        buf.set_bytes(&[], b"abcdef").expect("set bytes");
        let target = buf.root().ref_target().expect("ref target");
        assert_eq!(target.get_bytes().expect("bytes"), Some(&b"abcdef"[..]));
        assert_eq!(alloc.live_blocks(), 3);
    }
    let t = alloc.telemetry();
    assert_eq!(t.aligned_alloc_calls, 3);
    assert_eq!(t.aligned_free_calls, 3);
    assert_eq!(t.invalid_frees, 0);
    assert_eq!(t.outstanding_bytes(), 0);
}

#[test]
fn failed_tuple_init_releases_initialized_siblings() {
    let alloc = CountingAllocator::new();
    alloc.fail_after(2);
    let err = buffer("(ref(int64), ref(int64), ref(int64))", Flags::OWN_ALL, &alloc)
        .expect_err("third allocation should fail");
    assert!(matches!(err, NdtError::Memory(_)));

    let t = alloc.telemetry();
    assert_eq!(t.aligned_alloc_calls, 2);
    assert_eq!(t.failed_allocs, 1);
    assert_eq!(t.outstanding_blocks(), 0);
    assert_eq!(alloc.live_blocks(), 0);
}

#[test]
fn failure_at_every_allocation_leaves_nothing_behind() {
    let src = "2 * {a : ref(string), b : ref(3 * ref(int8)), c : (ref(int16), bytes)}";
    let mut n = 0;
    loop {
        let alloc = CountingAllocator::new();
        alloc.fail_after(n);
        match buffer(src, Flags::OWN_ALL, &alloc) {
            Ok(buf) => {
                drop(buf);
                assert_eq!(alloc.live_blocks(), 0);
                break;
            }
            Err(e) => {
                assert!(matches!(e, NdtError::Memory(_)), "unexpected error {e:?}");
                assert_eq!(alloc.live_blocks(), 0, "leak with failure after {n} allocations");
                assert_eq!(alloc.telemetry().invalid_frees, 0);
            }
        }
        n += 1;
    }
    // root + 2 * (a + b + 3 inner refs + c.0)
    assert_eq!(n, 13);
}

#[test]
fn borrowed_pointers_are_left_alone() {
    let alloc = CountingAllocator::new();
    {
        let buf = buffer("ref(int8)", Flags::OWN_TYPE | Flags::OWN_DATA, &alloc).expect("buffer");
        assert!(matches!(
            buf.root().ref_target(),
            Err(NdtError::Value(_))
        ));
        assert!(matches!(buf.subtree(&[0]), Err(NdtError::Value(_))));
    }
    let t = alloc.telemetry();
    assert_eq!(t.aligned_alloc_calls, 1);
    assert_eq!(t.aligned_free_calls, 1);
}

#[test]
fn strings_use_the_plain_allocator() {
    let alloc = CountingAllocator::new();
    {
        let mut buf =
            buffer("{name : string, tags : 2 * ?string}", Flags::OWN_ALL, &alloc).expect("buffer");
        buf.set_string(&[0], "hello").expect("set name");
        buf.set_string(&[1, 1], "x").expect("set tag");
        buf.set_string(&[0], "world").expect("replace name");

        let name = buf.subtree(&[0]).unwrap().get_string().unwrap();
        assert_eq!(name, Some("world"));
        let tags = buf.root().field("tags").unwrap();
        assert_eq!(tags.subtree(&[0]).unwrap().get_string().unwrap(), None);
        assert!(tags.subtree(&[0]).unwrap().is_na().unwrap());
        assert!(tags.subtree(&[1]).unwrap().is_valid().unwrap());
        assert!(buf.set_string(&[1], "x").is_err());
    }
    let t = alloc.telemetry();
    assert_eq!(t.alloc_calls, 3);
    assert_eq!(t.free_calls, 3);
    assert_eq!(t.alloc_bytes, 6 + 2 + 6);
    assert_eq!(t.outstanding_bytes(), 0);
}

#[test]
fn payload_setters_require_ownership() {
    let alloc = CountingAllocator::new();
    let mut buf = buffer("(string, bytes)", Flags::OWN_TYPE | Flags::OWN_DATA, &alloc)
        .expect("buffer");
    assert!(matches!(
        buf.set_string(&[0], "x"),
        Err(NdtError::Value(_))
    ));
    assert!(matches!(
        buf.set_bytes(&[1], b"x"),
        Err(NdtError::Value(_))
    ));
}

#[test]
fn var_dims_navigate_through_offsets() {
    let mut buf = MasterBuffer::from_type_string(
        "var(offsets=[0, 2]) * var(offsets=[0, 1, 3]) * int32",
        Flags::OWN_ALL,
    )
    .expect("buffer");
    assert_eq!(buf.nbytes(), 12);

    let h = buf.subtree(&[1, 1]).unwrap();
    assert_eq!(h.address().unwrap(), buf.as_ptr().wrapping_add(8));
    assert_eq!(buf.subtree(&[1]).unwrap().len().unwrap(), 2);
    assert_eq!(buf.subtree(&[0]).unwrap().len().unwrap(), 1);
    assert!(matches!(buf.subtree(&[1, 2]), Err(NdtError::Value(_))));
    assert!(matches!(buf.subtree(&[0, 1]), Err(NdtError::Value(_))));
    assert!(matches!(buf.subtree(&[2]), Err(NdtError::Value(_))));

    buf.write(&[1, 0], 11i32).unwrap();
    assert_eq!(buf.subtree(&[1, 0]).unwrap().read::<i32>().unwrap(), 11);
    let row = buf.subtree(&[1]).unwrap();
    assert_eq!(row.address().unwrap(), buf.as_ptr().wrapping_add(4));
}

#[test]
fn optional_values_start_missing() {
    let mut buf = MasterBuffer::from_type_string("3 * ?int64", Flags::OWN_ALL).expect("buffer");
    assert!(buf.subtree(&[1]).unwrap().is_na().unwrap());

    buf.write(&[1], 5i64).unwrap();
    assert!(buf.subtree(&[1]).unwrap().is_valid().unwrap());
    assert!(buf.subtree(&[0]).unwrap().is_na().unwrap());

    buf.set_na(&[1]).unwrap();
    assert!(buf.subtree(&[1]).unwrap().is_na().unwrap());
    buf.set_valid(&[2]).unwrap();
    assert!(buf.subtree(&[2]).unwrap().is_valid().unwrap());

    let mut plain = MasterBuffer::from_type_string("3 * int64", Flags::OWN_ALL).expect("buffer");
    assert!(plain.subtree(&[0]).unwrap().is_valid().unwrap());
    assert!(matches!(plain.set_na(&[0]), Err(NdtError::Value(_))));
}

#[test]
fn optional_record_fields_use_their_own_blocks() {
    let mut buf =
        MasterBuffer::from_type_string("2 * {a : ?int8, b : ?float32}", Flags::OWN_ALL)
            .expect("buffer");
    buf.write(&[1, 1], 1.5f32).unwrap();
    assert!(buf.subtree(&[1, 1]).unwrap().is_valid().unwrap());
    assert!(buf.subtree(&[1, 0]).unwrap().is_na().unwrap());
    assert!(buf.subtree(&[0, 1]).unwrap().is_na().unwrap());
}

#[test]
fn presence_behind_a_ref_lives_in_the_target_block() {
    let alloc = CountingAllocator::new();
    let mut buf = buffer("ref(?int8)", Flags::OWN_ALL, &alloc).expect("buffer");
    let target = buf.root().ref_target().unwrap();
    assert!(target.is_na().unwrap());

    buf.write(&[], 4i8).unwrap();
    let target = buf.root().ref_target().unwrap();
    assert!(target.is_valid().unwrap());
    assert_eq!(target.read::<i8>().unwrap(), 4);

    buf.set_na(&[]).unwrap();
    assert!(buf.root().resolve().unwrap().is_na().unwrap());
    buf.set_valid(&[]).unwrap();
    assert!(buf.root().presence_holder().unwrap().is_valid().unwrap());
}

#[test]
fn each_ref_item_gets_its_own_presence_block() {
    let alloc = CountingAllocator::new();
    let mut buf = buffer("2 * ref({a : ?int8})", Flags::OWN_ALL, &alloc).expect("buffer");
    assert!(buf.subtree(&[0, 0]).unwrap().is_na().unwrap());
    assert!(buf.subtree(&[1, 0]).unwrap().is_na().unwrap());

    buf.write(&[1, 0], 3i8).unwrap();
    assert!(buf.subtree(&[1, 0]).unwrap().is_valid().unwrap());
    assert!(buf.subtree(&[0, 0]).unwrap().is_na().unwrap());
    assert_eq!(buf.subtree(&[1, 0]).unwrap().read::<i8>().unwrap(), 3);
    assert_eq!(buf.subtree(&[0, 0]).unwrap().read::<i8>().unwrap(), 0);

    buf.set_na(&[1, 0]).unwrap();
    assert!(buf.subtree(&[1, 0]).unwrap().is_na().unwrap());
    drop(buf);
    assert_eq!(alloc.telemetry().outstanding_blocks(), 0);
}

#[test]
fn named_wrappers_over_dims_track_each_element() {
    let mut buf =
        MasterBuffer::from_type_string("Foo(3 * ?int8)", Flags::OWN_ALL).expect("buffer");
    for i in 0..3 {
        assert!(buf.subtree(&[i]).unwrap().is_na().unwrap());
    }
    buf.write(&[2], 8i8).unwrap();
    assert!(buf.subtree(&[2]).unwrap().is_valid().unwrap());
    assert!(buf.subtree(&[1]).unwrap().is_na().unwrap());
    assert_eq!(buf.as_bytes(), &[0, 0, 8]);

    buf.set_valid(&[0]).unwrap();
    assert!(buf.subtree(&[0]).unwrap().is_valid().unwrap());
    buf.set_na(&[2]).unwrap();
    assert!(buf.subtree(&[2]).unwrap().is_na().unwrap());
}
