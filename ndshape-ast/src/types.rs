#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

/// Maximum number of dimensions in one dimension chain.
pub const MAX_DIM: u32 = 128;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Access {
    Abstract,
    Concrete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Primitive {
    Void,
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float16,
    Float32,
    Float64,
    Complex32,
    Complex64,
    Complex128,
}

impl Primitive {
    pub const ALL: [Primitive; 16] = [
        Primitive::Void,
        Primitive::Bool,
        Primitive::Int8,
        Primitive::Int16,
        Primitive::Int32,
        Primitive::Int64,
        Primitive::Uint8,
        Primitive::Uint16,
        Primitive::Uint32,
        Primitive::Uint64,
        Primitive::Float16,
        Primitive::Float32,
        Primitive::Float64,
        Primitive::Complex32,
        Primitive::Complex64,
        Primitive::Complex128,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Primitive::Void => "void",
            Primitive::Bool => "bool",
            Primitive::Int8 => "int8",
            Primitive::Int16 => "int16",
            Primitive::Int32 => "int32",
            Primitive::Int64 => "int64",
            Primitive::Uint8 => "uint8",
            Primitive::Uint16 => "uint16",
            Primitive::Uint32 => "uint32",
            Primitive::Uint64 => "uint64",
            Primitive::Float16 => "float16",
            Primitive::Float32 => "float32",
            Primitive::Float64 => "float64",
            Primitive::Complex32 => "complex32",
            Primitive::Complex64 => "complex64",
            Primitive::Complex128 => "complex128",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.name() == name)
    }

    pub fn size(self) -> i64 {
        match self {
            Primitive::Void => 0,
            Primitive::Bool | Primitive::Int8 | Primitive::Uint8 => 1,
            Primitive::Int16 | Primitive::Uint16 | Primitive::Float16 => 2,
            Primitive::Int32 | Primitive::Uint32 | Primitive::Float32 | Primitive::Complex32 => 4,
            Primitive::Int64 | Primitive::Uint64 | Primitive::Float64 | Primitive::Complex64 => 8,
            Primitive::Complex128 => 16,
        }
    }

    pub fn align(self) -> u16 {
        match self {
            Primitive::Void => 1,
            Primitive::Complex32 => 2,
            Primitive::Complex64 => 4,
            Primitive::Complex128 => 8,
            other => other.size() as u16,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            Primitive::Int8 | Primitive::Int16 | Primitive::Int32 | Primitive::Int64
        )
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            Primitive::Uint8 | Primitive::Uint16 | Primitive::Uint32 | Primitive::Uint64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            Primitive::Float16 | Primitive::Float32 | Primitive::Float64
        )
    }

    pub fn is_complex(self) -> bool {
        matches!(
            self,
            Primitive::Complex32 | Primitive::Complex64 | Primitive::Complex128
        )
    }
}

/// Kind supertypes: abstract members that stand for a whole family of concrete types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Signed,
    Unsigned,
    Float,
    Complex,
    Scalar,
    FixedString,
    FixedBytes,
}

impl Kind {
    pub fn name(self) -> &'static str {
        match self {
            Kind::Signed => "SignedKind",
            Kind::Unsigned => "UnsignedKind",
            Kind::Float => "FloatKind",
            Kind::Complex => "ComplexKind",
            Kind::Scalar => "ScalarKind",
            Kind::FixedString => "FixedStringKind",
            Kind::FixedBytes => "FixedBytesKind",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [
            Kind::Signed,
            Kind::Unsigned,
            Kind::Float,
            Kind::Complex,
            Kind::Scalar,
            Kind::FixedString,
            Kind::FixedBytes,
        ]
        .into_iter()
        .find(|k| k.name() == name)
    }

    /// Whether a concrete `kind` is a member of this family.
    pub fn contains(self, kind: &TypeKind) -> bool {
        match (self, kind) {
            (Kind::Signed, TypeKind::Primitive(p)) => p.is_signed(),
            (Kind::Unsigned, TypeKind::Primitive(p)) => p.is_unsigned(),
            (Kind::Float, TypeKind::Primitive(p)) => p.is_float(),
            (Kind::Complex, TypeKind::Primitive(p)) => p.is_complex(),
            (Kind::Scalar, TypeKind::Primitive(p)) => *p != Primitive::Void,
            (
                Kind::Scalar,
                TypeKind::Char(_)
                | TypeKind::String
                | TypeKind::FixedString { .. }
                | TypeKind::FixedBytes { .. }
                | TypeKind::Bytes { .. },
            ) => true,
            (Kind::FixedString, TypeKind::FixedString { .. }) => true,
            (Kind::FixedBytes, TypeKind::FixedBytes { .. }) => true,
            _ => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Encoding {
    Ascii,
    Utf8,
    Utf16,
    Utf32,
    Ucs2,
}

impl Encoding {
    pub fn name(self) -> &'static str {
        match self {
            Encoding::Ascii => "ascii",
            Encoding::Utf8 => "utf8",
            Encoding::Utf16 => "utf16",
            Encoding::Utf32 => "utf32",
            Encoding::Ucs2 => "ucs2",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().replace('-', "").as_str() {
            "ascii" | "a" => Some(Encoding::Ascii),
            "utf8" | "u8" => Some(Encoding::Utf8),
            "utf16" | "u16" => Some(Encoding::Utf16),
            "utf32" | "u32" => Some(Encoding::Utf32),
            "ucs2" => Some(Encoding::Ucs2),
            _ => None,
        }
    }

    /// Size in bytes of one code unit.
    pub fn unit_size(self) -> i64 {
        match self {
            Encoding::Ascii | Encoding::Utf8 => 1,
            Encoding::Utf16 | Encoding::Ucs2 => 2,
            Encoding::Utf32 => 4,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Na,
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Int(n) => write!(f, "{n}"),
            Literal::Float(x) => write!(f, "{x:?}"),
            Literal::Str(s) => write!(f, "'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Literal::Na => write!(f, "NA"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TypeKind {
    Any,

    // Dimensions.
    FixedDim {
        shape: i64,
        step: i64,
        elem: Box<Type>,
    },
    SymbolicDim {
        name: String,
        elem: Box<Type>,
    },
    VarDim {
        offsets: Option<Arc<[i32]>>,
        elem: Box<Type>,
    },
    EllipsisDim {
        name: Option<String>,
        elem: Box<Type>,
    },

    // Scalars.
    Primitive(Primitive),
    Kind(Kind),
    Char(Encoding),
    String,
    FixedString {
        size: i64,
        encoding: Encoding,
    },
    FixedBytes {
        size: i64,
        align: u16,
    },
    Bytes {
        target_align: u16,
    },
    Categorical(Vec<Literal>),

    // Containers.
    Ref(Box<Type>),
    Tuple {
        fields: Vec<Type>,
        offsets: Vec<i64>,
    },
    Record {
        names: Vec<String>,
        fields: Vec<Type>,
        offsets: Vec<i64>,
    },
    Function {
        ret: Box<Type>,
        pos: Box<Type>,
        kwds: Box<Type>,
    },

    Typevar(String),
    Nominal {
        name: String,
        inner: Box<Type>,
    },
    Module {
        name: String,
        inner: Box<Type>,
    },
    Constr {
        name: String,
        inner: Box<Type>,
    },
}

/// An immutable, structurally comparable type descriptor.
///
/// Concrete descriptors carry their physical layout (`datasize`, `align`);
/// abstract ones report zero size. Build them through the constructors in
/// this crate so the layout fields always agree with `kind`.
#[derive(Clone, Debug, PartialEq)]
pub struct Type {
    pub(crate) kind: TypeKind,
    pub(crate) optional: bool,
    pub(crate) access: Access,
    pub(crate) datasize: i64,
    pub(crate) align: u16,
    pub(crate) ndim: u32,
}

impl Type {
    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn is_concrete(&self) -> bool {
        self.access == Access::Concrete
    }

    pub fn is_abstract(&self) -> bool {
        self.access == Access::Abstract
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn datasize(&self) -> i64 {
        self.datasize
    }

    pub fn align(&self) -> u16 {
        self.align
    }

    pub fn ndim(&self) -> u32 {
        self.ndim
    }

    pub fn is_dim(&self) -> bool {
        self.dim_elem().is_some()
    }

    /// Element type of a dimension node.
    pub fn dim_elem(&self) -> Option<&Type> {
        match &self.kind {
            TypeKind::FixedDim { elem, .. }
            | TypeKind::SymbolicDim { elem, .. }
            | TypeKind::VarDim { elem, .. }
            | TypeKind::EllipsisDim { elem, .. } => Some(elem),
            _ => None,
        }
    }

    /// Split an array type into its dimension nodes (outermost first) and element dtype.
    pub fn dims_dtype(&self) -> (Vec<&Type>, &Type) {
        let mut dims = Vec::new();
        let mut t = self;
        while let Some(elem) = t.dim_elem() {
            dims.push(t);
            t = elem;
        }
        (dims, t)
    }

    pub fn dtype(&self) -> &Type {
        let mut t = self;
        while let Some(elem) = t.dim_elem() {
            t = elem;
        }
        t
    }

    pub fn var_offsets(&self) -> Option<&[i32]> {
        match &self.kind {
            TypeKind::VarDim { offsets, .. } => offsets.as_deref(),
            _ => None,
        }
    }

    /// Whether this node or anything below it is optional.
    pub fn subtree_is_optional(&self) -> bool {
        if self.optional {
            return true;
        }
        match &self.kind {
            TypeKind::FixedDim { elem, .. }
            | TypeKind::SymbolicDim { elem, .. }
            | TypeKind::VarDim { elem, .. }
            | TypeKind::EllipsisDim { elem, .. } => elem.subtree_is_optional(),
            TypeKind::Tuple { fields, .. } | TypeKind::Record { fields, .. } => {
                fields.iter().any(Type::subtree_is_optional)
            }
            TypeKind::Ref(inner)
            | TypeKind::Constr { inner, .. }
            | TypeKind::Module { inner, .. } => inner.subtree_is_optional(),
            _ => false,
        }
    }

    /// Number of ellipsis dimensions in this dimension chain.
    pub fn ellipsis_count(&self) -> usize {
        self.dims_dtype()
            .0
            .iter()
            .filter(|d| matches!(d.kind, TypeKind::EllipsisDim { .. }))
            .count()
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.optional {
            write!(f, "?")?;
        }
        match &self.kind {
            TypeKind::Any => write!(f, "Any"),
            TypeKind::FixedDim { shape, elem, .. } => write!(f, "{shape} * {elem}"),
            TypeKind::SymbolicDim { name, elem } => write!(f, "{name} * {elem}"),
            TypeKind::VarDim { offsets, elem } => match offsets {
                Some(off) => {
                    let off_s = off
                        .iter()
                        .map(|o| o.to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    write!(f, "var(offsets=[{off_s}]) * {elem}")
                }
                None => write!(f, "var * {elem}"),
            },
            TypeKind::EllipsisDim { name, elem } => match name {
                Some(n) => write!(f, "{n}... * {elem}"),
                None => write!(f, "... * {elem}"),
            },
            TypeKind::Primitive(p) => write!(f, "{}", p.name()),
            TypeKind::Kind(k) => write!(f, "{}", k.name()),
            TypeKind::Char(enc) => write!(f, "char('{}')", enc.name()),
            TypeKind::String => write!(f, "string"),
            TypeKind::FixedString { size, encoding } => {
                write!(f, "fixed_string({size}, '{}')", encoding.name())
            }
            TypeKind::FixedBytes { size, align } => {
                write!(f, "fixed_bytes(size={size}, align={align})")
            }
            TypeKind::Bytes { target_align } => {
                if *target_align == 1 {
                    write!(f, "bytes")
                } else {
                    write!(f, "bytes(align={target_align})")
                }
            }
            TypeKind::Categorical(lits) => {
                let lits_s = lits
                    .iter()
                    .map(|l| l.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "categorical({lits_s})")
            }
            TypeKind::Ref(inner) => write!(f, "ref({inner})"),
            TypeKind::Tuple { fields, .. } => {
                let fields_s = fields
                    .iter()
                    .map(|t| t.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "({fields_s})")
            }
            TypeKind::Record { names, fields, .. } => {
                let fields_s = names
                    .iter()
                    .zip(fields)
                    .map(|(n, t)| format!("{n} : {t}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{{{fields_s}}}")
            }
            TypeKind::Function { ret, pos, kwds } => {
                let mut args: Vec<String> = Vec::new();
                if let TypeKind::Tuple { fields, .. } = &pos.kind {
                    args.extend(fields.iter().map(|t| t.to_string()));
                }
                if let TypeKind::Record { names, fields, .. } = &kwds.kind {
                    args.extend(names.iter().zip(fields).map(|(n, t)| format!("{n} : {t}")));
                }
                write!(f, "({}) -> {ret}", args.join(", "))
            }
            TypeKind::Typevar(name) => write!(f, "{name}"),
            TypeKind::Nominal { name, .. } => write!(f, "{name}"),
            TypeKind::Module { name, inner } => write!(f, "{name}::{inner}"),
            TypeKind::Constr { name, inner } => write!(f, "{name}({inner})"),
        }
    }
}
