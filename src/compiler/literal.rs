use crate::{
    compiler::{Expr, Literal},
    dtype::{Prim, Ty},
    error::DbError,
    types::DbResult,
};

/// Validate an expression against the element type and produce the
/// little-endian bytes for `count` elements. Out-of-range numerics are
/// arithmetic errors; shape mismatches are syntax errors.
pub fn fill_bytes(ty: &Ty, expr: &Expr, count: u64) -> DbResult<Vec<u8>> {
    match expr {
        Expr::Scalar(lit) => {
            let one = encode_element(ty, lit)?;
            let mut out = Vec::with_capacity(one.len() * count as usize);
            for _ in 0..count {
                out.extend_from_slice(&one);
            }
            Ok(out)
        }
        Expr::Str(s) => {
            // A string over plain u8 spreads one byte per element;
            // over a byte array it fills a single element per element
            // slot.
            if let Ty::Prim(Prim::U8) = ty {
                if s.len() as u64 != count {
                    return Err(DbError::syntax(format!(
                        "string literal has {} bytes but the range selects {} elements",
                        s.len(),
                        count
                    )));
                }
                return Ok(s.as_bytes().to_vec());
            }
            let one = encode_element(ty, &Literal::Str(s.clone()))?;
            let mut out = Vec::with_capacity(one.len() * count as usize);
            for _ in 0..count {
                out.extend_from_slice(&one);
            }
            Ok(out)
        }
        Expr::List(lits) => {
            // Struct elements flatten to one literal per field.
            if let Ty::Struct(fields) = ty {
                let nf = fields.len() as u64;
                if lits.len() as u64 != count * nf {
                    return Err(DbError::syntax(format!(
                        "struct fill needs {} literals ({} elements x {} fields), got {}",
                        count * nf,
                        count,
                        nf,
                        lits.len()
                    )));
                }
                let mut out = Vec::new();
                for chunk in lits.chunks(fields.len()) {
                    out.extend_from_slice(&encode_struct_element(fields, chunk)?);
                }
                return Ok(out);
            }

            if lits.len() as u64 != count {
                return Err(DbError::syntax(format!(
                    "literal list has {} elements but the range selects {}",
                    lits.len(),
                    count
                )));
            }
            let mut out = Vec::new();
            for lit in lits {
                out.extend_from_slice(&encode_element(ty, lit)?);
            }
            Ok(out)
        }
        Expr::Range(a, b) => {
            if (b - a) as u64 != count {
                return Err(DbError::syntax(format!(
                    "range(..) yields {} elements but the range selects {}",
                    b - a,
                    count
                )));
            }
            let mut out = Vec::new();
            for v in *a..*b {
                let lit = Literal::Int {
                    mag: v.abs() as u128,
                    neg: v < 0,
                };
                out.extend_from_slice(&encode_element(ty, &lit)?);
            }
            Ok(out)
        }
    }
}

/// Encode one element of `ty` from a literal.
pub fn encode_element(ty: &Ty, lit: &Literal) -> DbResult<Vec<u8>> {
    match ty {
        Ty::Prim(p) => encode_prim(*p, lit),
        Ty::Enum(names) => match lit {
            Literal::Name(s) => {
                let idx = names.iter().position(|n| n == s).ok_or_else(|| {
                    DbError::syntax(format!("unknown enum variant: {}", s))
                })?;
                Ok(vec![idx as u8])
            }
            other => Err(DbError::syntax(format!(
                "enum element needs a variant name, got {:?}",
                other
            ))),
        },
        Ty::Array { dims, elem } => {
            let n: u64 = dims.iter().map(|d| *d as u64).product();
            match (lit, elem.as_ref()) {
                (Literal::Str(s), Ty::Prim(Prim::U8)) => {
                    if s.len() as u64 > n {
                        return Err(DbError::arith(format!(
                            "string of {} bytes does not fit in a {}-byte array",
                            s.len(),
                            n
                        )));
                    }
                    let mut out = s.as_bytes().to_vec();
                    out.resize(n as usize, 0);
                    Ok(out)
                }
                _ => Err(DbError::syntax(
                    "array elements are filled from string literals",
                )),
            }
        }
        Ty::Struct(_) => Err(DbError::syntax(
            "struct elements are filled from bracketed literal lists",
        )),
        Ty::Union(fields) => {
            let (_, first) = &fields[0];
            let mut out = encode_element(first, lit)?;
            out.resize(ty.byte_size() as usize, 0);
            Ok(out)
        }
    }
}

/// Struct elements arrive as one flat literal list per element.
pub fn encode_struct_element(fields: &[(String, Ty)], lits: &[Literal]) -> DbResult<Vec<u8>> {
    if fields.len() != lits.len() {
        return Err(DbError::syntax(format!(
            "struct has {} fields but the literal list has {}",
            fields.len(),
            lits.len()
        )));
    }
    let mut out = Vec::new();
    for ((_, ty), lit) in fields.iter().zip(lits) {
        out.extend_from_slice(&encode_element(ty, lit)?);
    }
    Ok(out)
}

fn encode_prim(p: Prim, lit: &Literal) -> DbResult<Vec<u8>> {
    match p {
        Prim::Bool => match lit {
            Literal::Bool(b) => Ok(vec![*b as u8]),
            Literal::Int { mag: 0, neg: false } => Ok(vec![0]),
            Literal::Int { mag: 1, neg: false } => Ok(vec![1]),
            other => Err(DbError::syntax(format!(
                "bool element from {:?}",
                other
            ))),
        },

        _ if p.is_integer() => {
            let (mag, neg) = match lit {
                Literal::Int { mag, neg } => (*mag, *neg),
                other => {
                    return Err(DbError::syntax(format!(
                        "integer element from {:?}",
                        other
                    )))
                }
            };
            encode_int(p, mag, neg)
        }

        _ if p.is_float() => {
            let v = float_of(lit)?;
            encode_float(p, v)
        }

        _ => {
            // complex variants
            let (re, im) = match lit {
                Literal::Complex(re, im) => (*re, *im),
                Literal::Float(f) => (*f, 0.0),
                Literal::Int { mag, neg } => {
                    let v = *mag as f64;
                    (if *neg { -v } else { v }, 0.0)
                }
                other => {
                    return Err(DbError::syntax(format!(
                        "complex element from {:?}",
                        other
                    )))
                }
            };
            match p {
                Prim::Cf64 => {
                    check_f32_range(re)?;
                    check_f32_range(im)?;
                    let mut out = (re as f32).to_le_bytes().to_vec();
                    out.extend_from_slice(&(im as f32).to_le_bytes());
                    Ok(out)
                }
                Prim::Cf128 => {
                    let mut out = re.to_le_bytes().to_vec();
                    out.extend_from_slice(&im.to_le_bytes());
                    Ok(out)
                }
                _ => unreachable!(),
            }
        }
    }
}

fn float_of(lit: &Literal) -> DbResult<f64> {
    match lit {
        Literal::Float(f) => Ok(*f),
        Literal::Int { mag, neg } => {
            let v = *mag as f64;
            Ok(if *neg { -v } else { v })
        }
        other => Err(DbError::syntax(format!("float element from {:?}", other))),
    }
}

fn encode_int(p: Prim, mag: u128, neg: bool) -> DbResult<Vec<u8>> {
    let val: i128 = if neg {
        if mag > 1u128 << 127 {
            return Err(DbError::arith(format!(
                "literal -{} is out of range for {}",
                mag,
                p.name()
            )));
        }
        (mag as i128).wrapping_neg()
    } else {
        if mag > i128::max_value() as u128 {
            return Err(DbError::arith(format!(
                "literal {} is out of range for {}",
                mag,
                p.name()
            )));
        }
        mag as i128
    };

    macro_rules! check_and_encode {
        ($t:ty) => {{
            if val < <$t>::min_value() as i128 || val > <$t>::max_value() as i128 {
                return Err(DbError::arith(format!(
                    "literal {} is out of range for {}",
                    val,
                    p.name()
                )));
            }
            Ok((val as $t).to_le_bytes().to_vec())
        }};
    }

    match p {
        Prim::U8 => check_and_encode!(u8),
        Prim::U16 => check_and_encode!(u16),
        Prim::U32 => check_and_encode!(u32),
        Prim::U64 => {
            if neg || mag > u64::max_value() as u128 {
                return Err(DbError::arith(format!(
                    "literal is out of range for u64"
                )));
            }
            Ok((mag as u64).to_le_bytes().to_vec())
        }
        Prim::I8 => check_and_encode!(i8),
        Prim::I16 => check_and_encode!(i16),
        Prim::I32 => check_and_encode!(i32),
        Prim::I64 => check_and_encode!(i64),
        _ => unreachable!(),
    }
}

fn check_f32_range(v: f64) -> DbResult {
    if v.is_finite() && v.abs() > f32::MAX as f64 {
        return Err(DbError::arith(format!(
            "literal {} is out of range for a 32-bit float",
            v
        )));
    }
    Ok(())
}

fn encode_float(p: Prim, v: f64) -> DbResult<Vec<u8>> {
    match p {
        Prim::F16 => {
            const F16_MAX: f64 = 65504.0;
            if v.is_finite() && v.abs() > F16_MAX {
                return Err(DbError::arith(format!(
                    "literal {} is out of range for f16",
                    v
                )));
            }
            Ok(f16_bits(v).to_le_bytes().to_vec())
        }
        Prim::F32 => {
            check_f32_range(v)?;
            Ok((v as f32).to_le_bytes().to_vec())
        }
        Prim::F64 => Ok(v.to_le_bytes().to_vec()),
        Prim::F128 => Ok(f128_bits(v).to_vec()),
        _ => unreachable!(),
    }
}

/// Narrow an f64 to IEEE 754 binary16 bits (round toward zero).
fn f16_bits(v: f64) -> u16 {
    let bits = (v as f32).to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exp = ((bits >> 23) & 0xff) as i32;
    let mant = bits & 0x007f_ffff;

    if exp == 0xff {
        // inf / nan
        let payload = if mant != 0 { 0x0200 } else { 0 };
        return sign | 0x7c00 | payload;
    }

    let e = exp - 127 + 15;
    if e >= 0x1f {
        return sign | 0x7c00; // overflow to inf
    }
    if e <= 0 {
        if e < -10 {
            return sign; // underflow to zero
        }
        let mant = mant | 0x0080_0000;
        return sign | (mant >> (14 - e)) as u16;
    }

    sign | ((e as u16) << 10) | (mant >> 13) as u16
}

/// Widen an f64 to IEEE 754 binary128 bits, little-endian.
fn f128_bits(v: f64) -> [u8; 16] {
    let bits = v.to_bits();
    let sign = (bits >> 63) as u128;
    let exp = ((bits >> 52) & 0x7ff) as i64;
    let mant = (bits & 0x000f_ffff_ffff_ffff) as u128;

    let out: u128 = if exp == 0 && mant == 0 {
        sign << 127
    } else if exp == 0x7ff {
        // inf / nan; keep a nonzero payload for nan
        (sign << 127) | (0x7fffu128 << 112) | (mant << 60)
    } else if exp == 0 {
        // f64 subnormal: normal in binary128. The top set bit of the
        // mantissa fixes the exponent.
        let p = 127 - mant.leading_zeros() as i64; // bit position, 0-based
        let e128 = (p - 1074 + 16383) as u128;
        let frac = mant ^ (1u128 << p); // drop the leading bit
        (sign << 127) | (e128 << 112) | (frac << (112 - p))
    } else {
        let e128 = (exp - 1023 + 16383) as u128;
        (sign << 127) | (e128 << 112) | (mant << 60)
    };

    out.to_le_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_range_fill_u32_le() {
        let bytes = fill_bytes(&Ty::Prim(Prim::U32), &Expr::Range(0, 4), 4).unwrap();
        assert_eq!(
            bytes,
            vec![0, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0]
        );
    }

    #[test]
    fn test_int_out_of_range_is_arith() {
        let got = fill_bytes(
            &Ty::Prim(Prim::U8),
            &Expr::Scalar(Literal::Int {
                mag: 256,
                neg: false,
            }),
            1,
        );
        assert_eq!(got.unwrap_err().kind(), ErrorKind::Arith);

        let got = fill_bytes(
            &Ty::Prim(Prim::U16),
            &Expr::Scalar(Literal::Int { mag: 1, neg: true }),
            1,
        );
        assert_eq!(got.unwrap_err().kind(), ErrorKind::Arith);
    }

    #[test]
    fn test_string_into_byte_array() {
        let ty = Ty::Array {
            dims: vec![8],
            elem: Box::new(Ty::Prim(Prim::U8)),
        };
        let bytes =
            fill_bytes(&ty, &Expr::Str("hello".into()), 1).unwrap();
        assert_eq!(bytes, b"hello\0\0\0".to_vec());

        // Longer than the array: arithmetic/overflow error
        let got = fill_bytes(&ty, &Expr::Str("123456789".into()), 1);
        assert_eq!(got.unwrap_err().kind(), ErrorKind::Arith);
    }

    #[test]
    fn test_scalar_broadcast() {
        let bytes = fill_bytes(
            &Ty::Prim(Prim::I16),
            &Expr::Scalar(Literal::Int { mag: 7, neg: true }),
            3,
        )
        .unwrap();
        assert_eq!(bytes, vec![0xf9, 0xff, 0xf9, 0xff, 0xf9, 0xff]);
    }

    #[test]
    fn test_enum_variants() {
        let ty = Ty::Enum(vec!["on".into(), "off".into()]);
        let bytes = fill_bytes(
            &ty,
            &Expr::List(vec![
                Literal::Name("off".into()),
                Literal::Name("on".into()),
            ]),
            2,
        )
        .unwrap();
        assert_eq!(bytes, vec![1, 0]);

        let got = fill_bytes(&ty, &Expr::Scalar(Literal::Name("maybe".into())), 1);
        assert_eq!(got.unwrap_err().kind(), ErrorKind::Syntax);
    }

    #[test]
    fn test_f16_bits() {
        assert_eq!(f16_bits(0.0), 0);
        assert_eq!(f16_bits(1.0), 0x3c00);
        assert_eq!(f16_bits(-2.0), 0xc000);
        assert_eq!(f16_bits(65504.0), 0x7bff);
        assert_eq!(f16_bits(f64::INFINITY), 0x7c00);
    }

    #[test]
    fn test_f128_bits() {
        // 1.0 -> sign 0, exponent 16383, zero mantissa
        let one = u128::from_le_bytes(f128_bits(1.0));
        assert_eq!(one, 0x3fffu128 << 112);

        let neg = u128::from_le_bytes(f128_bits(-1.0));
        assert_eq!(neg, (1u128 << 127) | (0x3fffu128 << 112));

        assert_eq!(u128::from_le_bytes(f128_bits(0.0)), 0);
    }
}
