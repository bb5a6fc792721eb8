#![forbid(unsafe_code)]

mod error;
mod layout;
mod types;

use miette::SourceSpan;

pub use error::NdtError;
pub use layout::{POINTER_ALIGN, POINTER_SIZE, round_up};
pub use types::{Access, Encoding, Kind, Literal, MAX_DIM, Primitive, Type, TypeKind};

pub type Span = SourceSpan;

pub fn span(start: usize, len: usize) -> Span {
    SourceSpan::new(start.into(), len)
}

pub fn span_between(start: usize, end: usize) -> Span {
    debug_assert!(end >= start);
    span(start, end - start)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int32() -> Type {
        Type::primitive(Primitive::Int32)
    }

    #[test]
    fn fixed_dims_compute_c_contiguous_steps() {
        let inner = Type::fixed_dim(int32(), 3, None).unwrap();
        let outer = Type::fixed_dim(inner, 2, None).unwrap();
        assert_eq!(outer.datasize(), 24);
        assert_eq!(outer.align(), 4);
        assert_eq!(outer.ndim(), 2);
        match outer.kind() {
            TypeKind::FixedDim { shape, step, elem } => {
                assert_eq!((*shape, *step), (2, 3));
                assert!(matches!(elem.kind(), TypeKind::FixedDim { step: 1, .. }));
            }
            other => panic!("unexpected kind {other:?}"),
        }
        assert_eq!(outer.to_string(), "2 * 3 * int32");
    }

    #[test]
    fn record_layout_pads_fields_to_their_alignment() {
        let rec = Type::record(vec![
            ("a".to_string(), Type::primitive(Primitive::Int8)),
            ("b".to_string(), Type::primitive(Primitive::Float64)),
            ("c".to_string(), Type::primitive(Primitive::Int16)),
        ])
        .unwrap();
        let TypeKind::Record { offsets, .. } = rec.kind() else {
            panic!("expected record");
        };
        assert_eq!(offsets, &vec![0, 8, 16]);
        assert_eq!(rec.datasize(), 24);
        assert_eq!(rec.align(), 8);
    }

    #[test]
    fn duplicate_record_fields_are_rejected() {
        let err = Type::record(vec![("a".to_string(), int32()), ("a".to_string(), int32())])
            .unwrap_err();
        assert!(matches!(err, NdtError::Value(_)));
    }

    #[test]
    fn fixed_and_var_dims_do_not_mix() {
        let var = Type::var_dim(int32(), Some(vec![0, 2])).unwrap();
        assert!(Type::fixed_dim(var, 2, None).is_err());
        let fixed = Type::fixed_dim(int32(), 2, None).unwrap();
        assert!(Type::var_dim(fixed, None).is_err());
    }

    #[test]
    fn nested_var_dims_must_agree_on_item_counts() {
        let inner = Type::var_dim(int32(), Some(vec![0, 3, 5])).unwrap();
        let outer = Type::var_dim(inner.clone(), Some(vec![0, 2])).unwrap();
        assert!(outer.is_concrete());
        assert_eq!(outer.datasize(), 20);
        assert!(Type::var_dim(inner, Some(vec![0, 3])).is_err());
    }

    #[test]
    fn second_ellipsis_is_rejected() {
        let e = Type::ellipsis_dim(None, int32()).unwrap();
        let two = Type::fixed_dim(e, 2, None).unwrap();
        assert!(Type::ellipsis_dim(Some("Dims".to_string()), two).is_err());
    }

    #[test]
    fn explicit_steps_must_stay_inside_the_dimension() {
        assert!(Type::fixed_dim(int32(), 2, Some(100)).is_err());
        assert!(Type::fixed_dim(int32(), 2, Some(-1)).is_err());
        assert!(Type::fixed_dim(int32(), 2, Some(1)).is_ok());
        assert!(Type::fixed_dim(int32(), 0, Some(7)).is_ok());

        let rows = Type::fixed_dim(int32(), 3, None).unwrap();
        let t = Type::fixed_dim(rows.clone(), 2, Some(3)).unwrap();
        assert_eq!(t.datasize(), 24);
        assert!(Type::fixed_dim(rows, 2, Some(4)).is_err());
        assert!(Type::fixed_dim(int32(), 3, Some(i64::MAX)).is_err());
    }

    #[test]
    fn dims_dtype_splits_outermost_first() {
        let t = Type::fixed_dim(Type::fixed_dim(int32(), 3, None).unwrap(), 2, None).unwrap();
        let (dims, dtype) = t.dims_dtype();
        assert_eq!(dims.len(), 2);
        assert!(matches!(dims[0].kind(), TypeKind::FixedDim { shape: 2, .. }));
        assert_eq!(dtype, &int32());
    }

    #[test]
    fn dimensions_can_not_be_optional() {
        let t = Type::fixed_dim(int32(), 2, None).unwrap();
        assert!(t.into_optional().is_err());
        assert!(int32().into_optional().unwrap().is_optional());
    }

    #[test]
    fn abstract_types_have_no_layout() {
        let t = Type::symbolic_dim("N", int32()).unwrap();
        assert!(t.is_abstract());
        assert_eq!(t.datasize(), 0);
        let f = Type::function(
            int32(),
            Type::tuple(vec![int32()]).unwrap(),
            Type::record(vec![]).unwrap(),
        )
        .unwrap();
        assert!(f.is_abstract());
        assert_eq!(f.to_string(), "(int32) -> int32");
    }

    #[test]
    fn kind_families_contain_their_members() {
        assert!(Kind::Signed.contains(int32().kind()));
        assert!(!Kind::Unsigned.contains(int32().kind()));
        assert!(Kind::Scalar.contains(Type::string().kind()));
        assert!(!Kind::Scalar.contains(Type::any().kind()));
    }
}
