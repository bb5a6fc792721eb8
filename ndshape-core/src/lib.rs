#![forbid(unsafe_code)]

mod dims;
mod matcher;
mod subst;
mod symtable;

use ndshape_ast::Type;

pub use matcher::match_with;
pub use subst::{substitute, typecheck};
pub use symtable::{Entry, MatchResult, SymbolTable, UNNAMED_ELLIPSIS};

/// Match `pattern` against `concrete` with a fresh symbol table.
pub fn match_types(pattern: &Type, concrete: &Type) -> MatchResult {
    let mut table = SymbolTable::new();
    match_with(pattern, concrete, &mut table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndshape_ast::{NdtError, Primitive, TypeKind};
    use ndshape_parse::parse_type;

    fn ty(src: &str) -> Type {
        parse_type(src).expect("fixture should parse")
    }

    #[test]
    fn symbolic_dims_bind_on_first_sight() {
        let concrete = ty("5 * int64");
        let other = ty("7 * int64");
        let mut table = SymbolTable::new();
        assert!(match_with(&ty("N * int64"), &concrete, &mut table).unwrap());
        assert_eq!(table.find("N"), &Entry::Shape(5));
        assert!(!match_with(&ty("N * int64"), &other, &mut table).unwrap());
    }

    #[test]
    fn repeated_symbol_must_agree_within_one_pattern() {
        let p = ty("(N * int8, N * int8)");
        assert!(match_types(&p, &ty("(3 * int8, 3 * int8)")).unwrap());
        assert!(!match_types(&p, &ty("(3 * int8, 4 * int8)")).unwrap());
    }

    #[test]
    fn symbolic_dim_binds_symbol_against_symbolic_concrete() {
        let c = ty("M * int8");
        let mut table = SymbolTable::new();
        assert!(match_with(&ty("N * int8"), &c, &mut table).unwrap());
        assert_eq!(table.find("N"), &Entry::Symbol("M"));
    }

    #[test]
    fn trailing_ellipsis_captures_leading_dims() {
        let c = ty("2 * 3 * float64");
        let mut table = SymbolTable::new();
        assert!(match_with(&ty("Dims... * float64"), &c, &mut table).unwrap());
        let Entry::DimList(dims) = table.find("Dims") else {
            panic!("expected a dimension list");
        };
        let shapes: Vec<i64> = dims
            .iter()
            .map(|d| match d.kind() {
                TypeKind::FixedDim { shape, .. } => *shape,
                other => panic!("unexpected dimension {other:?}"),
            })
            .collect();
        assert_eq!(shapes, vec![2, 3]);
    }

    #[test]
    fn leading_ellipsis_matches_suffix_backward() {
        let c = ty("4 * 2 * 3 * int32");
        let mut table = SymbolTable::new();
        assert!(match_with(&ty("Batch... * N * 3 * int32"), &c, &mut table).unwrap());
        assert_eq!(table.find("N"), &Entry::Shape(2));
        assert!(matches!(table.find("Batch"), Entry::DimList(d) if d.len() == 1));

        assert!(!match_types(&ty("... * 5 * int32"), &c).unwrap());
    }

    #[test]
    fn middle_ellipsis_may_be_empty() {
        let p = ty("2 * ... * 3 * int32");
        assert!(match_types(&p, &ty("2 * 3 * int32")).unwrap());
        assert!(match_types(&p, &ty("2 * 7 * 7 * 3 * int32")).unwrap());
        assert!(!match_types(&p, &ty("2 * int32")).unwrap());
    }

    #[test]
    fn ellipsis_matches_scalars() {
        let mut table = SymbolTable::new();
        let c = ty("float64");
        assert!(match_with(&ty("Dims... * float64"), &c, &mut table).unwrap());
        assert_eq!(table.find("Dims"), &Entry::DimList(vec![]));
    }

    #[test]
    fn named_ellipsis_aliases_unnamed_concrete_ellipsis() {
        let c = ty("... * int8");
        let mut table = SymbolTable::new();
        assert!(match_with(&ty("Dims... * int8"), &c, &mut table).unwrap());
        assert_eq!(table.find("Dims"), &Entry::Symbol(UNNAMED_ELLIPSIS));
    }

    #[test]
    fn named_ellipsis_rejects_symbolic_captures() {
        assert!(!match_types(&ty("Dims... * int8"), &ty("N * int8")).unwrap());
    }

    #[test]
    fn var_dims_match_without_binding() {
        let p = ty("var * var * int16");
        let c = ty("var(offsets=[0, 2]) * var(offsets=[0, 1, 3]) * int16");
        let mut table = SymbolTable::new();
        assert!(match_with(&p, &c, &mut table).unwrap());
        assert!(table.is_empty());
        assert!(!match_types(&p, &ty("2 * 3 * int16")).unwrap());
    }

    #[test]
    fn records_are_name_sensitive() {
        assert!(!match_types(&ty("{a : int32}"), &ty("{b : int32}")).unwrap());
        assert!(match_types(&ty("{a : int32}"), &ty("{a : int32}")).unwrap());
    }

    #[test]
    fn optionality_must_agree() {
        assert!(!match_types(&ty("?int32"), &ty("int32")).unwrap());
        assert!(!match_types(&ty("int32"), &ty("?int32")).unwrap());
        assert!(match_types(&ty("3 * ?int32"), &ty("3 * ?int32")).unwrap());
    }

    #[test]
    fn kinds_match_their_members() {
        assert!(match_types(&ty("SignedKind"), &ty("int16")).unwrap());
        assert!(!match_types(&ty("SignedKind"), &ty("uint16")).unwrap());
        assert!(match_types(&ty("ScalarKind"), &ty("string")).unwrap());
        assert!(match_types(&ty("FixedStringKind"), &ty("fixed_string(3)")).unwrap());
        assert!(match_types(&ty("FloatKind"), &ty("FloatKind")).unwrap());
    }

    #[test]
    fn typevars_bind_whole_types() {
        let p = ty("(T, T)");
        assert!(match_types(&p, &ty("(int8, int8)")).unwrap());
        assert!(!match_types(&p, &ty("(int8, {a : int8})")).unwrap());
        assert!(match_types(&ty("(T, T)"), &ty("(U, U)")).unwrap());
    }

    #[test]
    fn named_wrappers_compare_by_name_and_inner() {
        assert!(match_types(&ty("Celsius(float64)"), &ty("Celsius(float64)")).unwrap());
        assert!(!match_types(&ty("Celsius(float64)"), &ty("Kelvin(float64)")).unwrap());
        assert!(!match_types(&ty("Celsius(float64)"), &ty("Celsius(float32)")).unwrap());
    }

    #[test]
    fn typecheck_reports_outer_dims() {
        let sig = ty("(... * float64) -> ... * float64");
        let (result, outer) = typecheck(&sig, &ty("(2 * 3 * float64)")).unwrap();
        assert_eq!(result, ty("2 * 3 * float64"));
        assert_eq!(outer, 2);
    }

    #[test]
    fn typecheck_substitutes_symbols() {
        let sig = ty("(N * M * float32, M * P * float32) -> N * P * float32");
        let (result, outer) = typecheck(&sig, &ty("(2 * 3 * float32, 3 * 4 * float32)")).unwrap();
        assert_eq!(result, ty("2 * 4 * float32"));
        assert_eq!(outer, 0);

        let err = typecheck(&sig, &ty("(2 * 3 * float32, 5 * 4 * float32)")).unwrap_err();
        assert!(matches!(err, NdtError::Type(_)));
    }

    #[test]
    fn typecheck_through_typevars_and_refs() {
        let sig = ty("(Dims... * T) -> ref(Dims... * T)");
        let (result, outer) = typecheck(&sig, &ty("(5 * int64)")).unwrap();
        assert_eq!(result, ty("ref(5 * int64)"));
        assert_eq!(outer, 1);
    }

    #[test]
    fn typecheck_rejects_unsupported_inputs() {
        let kw = ty("(int64, axis : int64) -> int64");
        assert!(matches!(
            typecheck(&kw, &ty("(int64)")),
            Err(NdtError::NotImplemented(_))
        ));

        let sig = ty("(N * int64) -> N * int64");
        assert!(matches!(
            typecheck(&sig, &ty("(M * int64)")),
            Err(NdtError::Value(_))
        ));

        let int8 = ty("(T) -> T");
        assert!(matches!(
            typecheck(&int8, &ty("(int8)")),
            Err(NdtError::NotImplemented(_))
        ));

        let var = ty("(... * float64) -> ... * float64");
        assert!(matches!(
            typecheck(&var, &ty("(var(offsets=[0, 2]) * float64)")),
            Err(NdtError::NotImplemented(_))
        ));

        assert!(matches!(
            typecheck(&Type::primitive(Primitive::Int64), &ty("(int64)")),
            Err(NdtError::Value(_))
        ));
    }
}
