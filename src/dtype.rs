use std::convert::TryInto;
use std::fmt;

use crate::{
    error::{DbError, ErrorKind},
    types::{DbResult, TSize},
};

/// Primitive element types. Sizes are fixed and storage is
/// little-endian; f16/f128 and the complex variants are stored-size
/// types validated through f64 parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prim {
    Bool,
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F16,
    F32,
    F64,
    F128,
    Cf64,
    Cf128,
}

impl Prim {
    pub fn byte_size(self) -> TSize {
        match self {
            Prim::Bool | Prim::U8 | Prim::I8 => 1,
            Prim::U16 | Prim::I16 | Prim::F16 => 2,
            Prim::U32 | Prim::I32 | Prim::F32 => 4,
            Prim::U64 | Prim::I64 | Prim::F64 | Prim::Cf64 => 8,
            Prim::F128 | Prim::Cf128 => 16,
        }
    }

    fn code(self) -> u8 {
        match self {
            Prim::Bool => 0,
            Prim::U8 => 1,
            Prim::U16 => 2,
            Prim::U32 => 3,
            Prim::U64 => 4,
            Prim::I8 => 5,
            Prim::I16 => 6,
            Prim::I32 => 7,
            Prim::I64 => 8,
            Prim::F16 => 9,
            Prim::F32 => 10,
            Prim::F64 => 11,
            Prim::F128 => 12,
            Prim::Cf64 => 13,
            Prim::Cf128 => 14,
        }
    }

    fn from_code(c: u8) -> Option<Prim> {
        Some(match c {
            0 => Prim::Bool,
            1 => Prim::U8,
            2 => Prim::U16,
            3 => Prim::U32,
            4 => Prim::U64,
            5 => Prim::I8,
            6 => Prim::I16,
            7 => Prim::I32,
            8 => Prim::I64,
            9 => Prim::F16,
            10 => Prim::F32,
            11 => Prim::F64,
            12 => Prim::F128,
            13 => Prim::Cf64,
            14 => Prim::Cf128,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Prim::Bool => "bool",
            Prim::U8 => "u8",
            Prim::U16 => "u16",
            Prim::U32 => "u32",
            Prim::U64 => "u64",
            Prim::I8 => "i8",
            Prim::I16 => "i16",
            Prim::I32 => "i32",
            Prim::I64 => "i64",
            Prim::F16 => "f16",
            Prim::F32 => "f32",
            Prim::F64 => "f64",
            Prim::F128 => "f128",
            Prim::Cf64 => "cf64",
            Prim::Cf128 => "cf128",
        }
    }

    pub fn from_name(s: &str) -> Option<Prim> {
        Some(match s {
            "bool" => Prim::Bool,
            "u8" => Prim::U8,
            "u16" => Prim::U16,
            "u32" => Prim::U32,
            "u64" => Prim::U64,
            "i8" => Prim::I8,
            "i16" => Prim::I16,
            "i32" => Prim::I32,
            "i64" => Prim::I64,
            "f16" => Prim::F16,
            "f32" => Prim::F32,
            "f64" => Prim::F64,
            "f128" => Prim::F128,
            "cf64" => Prim::Cf64,
            "cf128" => Prim::Cf128,
            _ => return None,
        })
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Prim::U8
                | Prim::U16
                | Prim::U32
                | Prim::U64
                | Prim::I8
                | Prim::I16
                | Prim::I32
                | Prim::I64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, Prim::F16 | Prim::F32 | Prim::F64 | Prim::F128)
    }

    pub fn is_complex(self) -> bool {
        matches!(self, Prim::Cf64 | Prim::Cf128)
    }
}

const TAG_PRIM: u8 = 1;
const TAG_ARRAY: u8 = 2;
const TAG_STRUCT: u8 = 3;
const TAG_UNION: u8 = 4;
const TAG_ENUM: u8 = 5;

/// A user-declared element type: primitive, fixed-size array, struct,
/// union, or enum. Serializes to a byte string that round-trips.
#[derive(Debug, Clone, PartialEq)]
pub enum Ty {
    Prim(Prim),
    Array { dims: Vec<u32>, elem: Box<Ty> },
    Struct(Vec<(String, Ty)>),
    Union(Vec<(String, Ty)>),
    Enum(Vec<String>),
}

impl Ty {
    /// Element byte size, saturating at u32::MAX on absurd shapes (the
    /// cursor rejects oversized elements before any storage happens).
    pub fn byte_size(&self) -> TSize {
        let wide = match self {
            Ty::Prim(p) => p.byte_size() as u64,
            Ty::Array { dims, elem } => dims
                .iter()
                .fold(elem.byte_size() as u64, |acc, d| {
                    acc.saturating_mul(*d as u64)
                }),
            Ty::Struct(fields) => fields
                .iter()
                .fold(0u64, |acc, (_, t)| acc.saturating_add(t.byte_size() as u64)),
            Ty::Union(fields) => fields
                .iter()
                .map(|(_, t)| t.byte_size() as u64)
                .max()
                .unwrap_or(0),
            Ty::Enum(_) => 1,
        };
        wide.min(u32::max_value() as u64) as TSize
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.serialize_into(&mut out);
        out
    }

    fn serialize_into(&self, out: &mut Vec<u8>) {
        match self {
            Ty::Prim(p) => {
                out.push(TAG_PRIM);
                out.push(p.code());
            }
            Ty::Array { dims, elem } => {
                out.push(TAG_ARRAY);
                out.push(dims.len() as u8);
                for d in dims {
                    out.extend_from_slice(&d.to_le_bytes());
                }
                elem.serialize_into(out);
            }
            Ty::Struct(fields) => {
                out.push(TAG_STRUCT);
                serialize_fields(fields, out);
            }
            Ty::Union(fields) => {
                out.push(TAG_UNION);
                serialize_fields(fields, out);
            }
            Ty::Enum(names) => {
                out.push(TAG_ENUM);
                out.extend_from_slice(&(names.len() as u16).to_le_bytes());
                for n in names {
                    serialize_name(n, out);
                }
            }
        }
    }

    pub fn deserialize(bytes: &[u8]) -> DbResult<Ty> {
        let mut at = 0;
        let ty = Self::deserialize_at(bytes, &mut at)?;
        if at != bytes.len() {
            return Err(deser_err("trailing bytes after type"));
        }
        Ok(ty)
    }

    fn deserialize_at(bytes: &[u8], at: &mut usize) -> DbResult<Ty> {
        let tag = take(bytes, at, 1)?[0];
        match tag {
            TAG_PRIM => {
                let code = take(bytes, at, 1)?[0];
                let p = Prim::from_code(code)
                    .ok_or_else(|| deser_err(&format!("bad primitive code {}", code)))?;
                Ok(Ty::Prim(p))
            }
            TAG_ARRAY => {
                let rank = take(bytes, at, 1)?[0] as usize;
                if rank == 0 {
                    return Err(deser_err("array rank of zero"));
                }
                let mut dims = Vec::with_capacity(rank);
                for _ in 0..rank {
                    let raw = take(bytes, at, 4)?;
                    dims.push(u32::from_le_bytes(raw.try_into().unwrap()));
                }
                let elem = Self::deserialize_at(bytes, at)?;
                Ok(Ty::Array {
                    dims,
                    elem: Box::new(elem),
                })
            }
            TAG_STRUCT => Ok(Ty::Struct(deserialize_fields(bytes, at)?)),
            TAG_UNION => Ok(Ty::Union(deserialize_fields(bytes, at)?)),
            TAG_ENUM => {
                let raw = take(bytes, at, 2)?;
                let count = u16::from_le_bytes(raw.try_into().unwrap()) as usize;
                if count == 0 {
                    return Err(deser_err("enum with no variants"));
                }
                let mut names = Vec::with_capacity(count);
                for _ in 0..count {
                    names.push(deserialize_name(bytes, at)?);
                }
                Ok(Ty::Enum(names))
            }
            other => Err(deser_err(&format!("unknown type tag {}", other))),
        }
    }
}

fn serialize_fields(fields: &[(String, Ty)], out: &mut Vec<u8>) {
    out.extend_from_slice(&(fields.len() as u16).to_le_bytes());
    for (name, ty) in fields {
        serialize_name(name, out);
        ty.serialize_into(out);
    }
}

fn deserialize_fields(bytes: &[u8], at: &mut usize) -> DbResult<Vec<(String, Ty)>> {
    let raw = take(bytes, at, 2)?;
    let count = u16::from_le_bytes(raw.try_into().unwrap()) as usize;
    if count == 0 {
        return Err(deser_err("aggregate with no fields"));
    }
    let mut fields = Vec::with_capacity(count);
    for _ in 0..count {
        let name = deserialize_name(bytes, at)?;
        let ty = Ty::deserialize_at(bytes, at)?;
        fields.push((name, ty));
    }
    Ok(fields)
}

fn serialize_name(name: &str, out: &mut Vec<u8>) {
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(name.as_bytes());
}

fn deserialize_name(bytes: &[u8], at: &mut usize) -> DbResult<String> {
    let raw = take(bytes, at, 2)?;
    let len = u16::from_le_bytes(raw.try_into().unwrap()) as usize;
    let raw = take(bytes, at, len)?;
    String::from_utf8(raw.to_vec()).map_err(|_| deser_err("field name is not utf-8"))
}

fn take<'a>(bytes: &'a [u8], at: &mut usize, n: usize) -> DbResult<&'a [u8]> {
    if *at + n > bytes.len() {
        return Err(deser_err("type string cut short"));
    }
    let out = &bytes[*at..*at + n];
    *at += n;
    Ok(out)
}

fn deser_err(msg: &str) -> DbError {
    DbError::new(ErrorKind::TypeDeser, msg.to_string())
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Ty::Prim(p) => write!(f, "{}", p.name()),
            Ty::Array { dims, elem } => {
                for d in dims {
                    write!(f, "[{}]", d)?;
                }
                write!(f, "{}", elem)
            }
            Ty::Struct(fields) => {
                write!(f, "struct {{ ")?;
                for (i, (n, t)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {}", n, t)?;
                }
                write!(f, " }}")
            }
            Ty::Union(fields) => {
                write!(f, "union {{ ")?;
                for (i, (n, t)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {}", n, t)?;
                }
                write!(f, " }}")
            }
            Ty::Enum(names) => {
                write!(f, "enum {{ ")?;
                for (i, n) in names.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", n)?;
                }
                write!(f, " }}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_byte_sizes() {
        assert_eq!(Ty::Prim(Prim::U32).byte_size(), 4);
        assert_eq!(
            Ty::Array {
                dims: vec![3, 4],
                elem: Box::new(Ty::Prim(Prim::F64)),
            }
            .byte_size(),
            3 * 4 * 8
        );
        assert_eq!(
            Ty::Struct(vec![
                ("a".into(), Ty::Prim(Prim::U8)),
                ("b".into(), Ty::Prim(Prim::U64)),
            ])
            .byte_size(),
            9
        );
        assert_eq!(
            Ty::Union(vec![
                ("a".into(), Ty::Prim(Prim::U8)),
                ("b".into(), Ty::Prim(Prim::U64)),
            ])
            .byte_size(),
            8
        );
        assert_eq!(Ty::Enum(vec!["on".into(), "off".into()]).byte_size(), 1);
    }

    fn random_ty<R: Rng>(rng: &mut R, depth: u32) -> Ty {
        let pick = if depth == 0 { 0 } else { rng.gen_range(0, 5) };
        match pick {
            1 => {
                let rank = rng.gen_range(1, 4);
                Ty::Array {
                    dims: (0..rank).map(|_| rng.gen_range(1, 16)).collect(),
                    elem: Box::new(random_ty(rng, depth - 1)),
                }
            }
            2 | 3 => {
                let n = rng.gen_range(1, 4);
                let fields = (0..n)
                    .map(|i| (format!("f{}", i), random_ty(rng, depth - 1)))
                    .collect();
                if pick == 2 {
                    Ty::Struct(fields)
                } else {
                    Ty::Union(fields)
                }
            }
            4 => {
                let n = rng.gen_range(1, 6);
                Ty::Enum((0..n).map(|i| format!("v{}", i)).collect())
            }
            _ => Ty::Prim(Prim::from_code(rng.gen_range(0, 15)).unwrap()),
        }
    }

    #[test]
    fn test_serialize_round_trip_is_bijective() {
        let mut rng = rand::thread_rng();
        for _ in 0..500 {
            let ty = random_ty(&mut rng, 3);
            let bytes = ty.serialize();
            let back = Ty::deserialize(&bytes).unwrap();
            assert_eq!(ty, back);

            // Same bytes again: serialization is a function
            assert_eq!(back.serialize(), bytes);
        }
    }

    #[test]
    fn test_deserialize_garbage_is_type_deser() {
        let got = Ty::deserialize(&[99, 1, 2]);
        assert_eq!(got.unwrap_err().kind(), ErrorKind::TypeDeser);

        let got = Ty::deserialize(&[TAG_PRIM]);
        assert_eq!(got.unwrap_err().kind(), ErrorKind::TypeDeser);
    }
}
