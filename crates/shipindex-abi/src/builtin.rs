//! Built-in ABI types: everything a type expression can bottom out in besides
//! user structs and variants.

use chrono::{DateTime, NaiveDateTime};

use crate::error::CodecError;
use crate::keys::{
    public_key_to_string, signature_to_string, string_to_public_key, string_to_signature,
    KeyType, PUBLIC_KEY_LEN, SIGNATURE_LEN,
};
use crate::name::{name_to_string, string_to_name, string_to_symbol_code, symbol_code_to_string, Asset, Symbol};
use crate::serializer::{Reader, Writer};
use crate::value::AbiValue;

/// Milliseconds between the Unix epoch and the block timestamp epoch (2000-01-01).
const BLOCK_TIMESTAMP_EPOCH_MS: i64 = 946_684_800_000;
const BLOCK_INTERVAL_MS: i64 = 500;

pub const BUILTIN_TYPES: &[&str] = &[
    "bool",
    "int8",
    "uint8",
    "int16",
    "uint16",
    "int32",
    "uint32",
    "int64",
    "uint64",
    "int128",
    "uint128",
    "varint32",
    "varuint32",
    "float32",
    "float64",
    "float128",
    "time_point",
    "time_point_sec",
    "block_timestamp_type",
    "name",
    "bytes",
    "string",
    "checksum160",
    "checksum256",
    "checksum512",
    "public_key",
    "signature",
    "symbol",
    "symbol_code",
    "asset",
    "extended_asset",
];

pub fn is_builtin(ty: &str) -> bool {
    BUILTIN_TYPES.contains(&ty)
}

fn checksum_len(ty: &str) -> Option<usize> {
    match ty {
        "checksum160" => Some(20),
        "checksum256" => Some(32),
        "checksum512" => Some(64),
        "float128" => Some(16),
        _ => None,
    }
}

// ─── Time ─────────────────────────────────────────────────────────────────────

fn format_micros(us: i64) -> Result<String, CodecError> {
    let dt = DateTime::from_timestamp(us.div_euclid(1_000_000), (us.rem_euclid(1_000_000) * 1000) as u32)
        .ok_or_else(|| CodecError::invalid("time_point", format!("{us} is out of range")))?;
    let fmt = if us % 1000 == 0 { "%Y-%m-%dT%H:%M:%S%.3f" } else { "%Y-%m-%dT%H:%M:%S%.6f" };
    Ok(dt.naive_utc().format(fmt).to_string())
}

fn parse_micros(ty: &str, s: &str) -> Result<i64, CodecError> {
    let trimmed = s.trim_end_matches('Z');
    let dt = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|e| CodecError::invalid(ty, format!("'{s}': {e}")))?;
    Ok(dt.and_utc().timestamp_micros())
}

/// Format a `time_point` (microseconds since the Unix epoch).
pub fn time_point_to_string(us: i64) -> Result<String, CodecError> {
    format_micros(us)
}

/// Format a `block_timestamp_type` slot.
pub fn block_timestamp_to_string(slot: u32) -> Result<String, CodecError> {
    format_micros((i64::from(slot) * BLOCK_INTERVAL_MS + BLOCK_TIMESTAMP_EPOCH_MS) * 1000)
}

// ─── Argument coercion ────────────────────────────────────────────────────────

fn mismatch(ty: &str, got: &AbiValue) -> CodecError {
    CodecError::TypeMismatch {
        expected: ty.to_string(),
        got: got.kind().to_string(),
    }
}

fn int_arg(ty: &str, v: &AbiValue) -> Result<i128, CodecError> {
    match v {
        AbiValue::Int(x) => Ok(i128::from(*x)),
        AbiValue::Uint(x) => Ok(i128::from(*x)),
        AbiValue::Int128(x) => Ok(*x),
        AbiValue::Uint128(x) => {
            i128::try_from(*x).map_err(|_| CodecError::invalid(ty, "out of range"))
        }
        AbiValue::String(s) => s
            .parse::<i128>()
            .map_err(|_| CodecError::invalid(ty, format!("'{s}' is not an integer"))),
        other => Err(mismatch(ty, other)),
    }
}

fn ranged<T: TryFrom<i128>>(ty: &str, v: &AbiValue) -> Result<T, CodecError> {
    let raw = int_arg(ty, v)?;
    T::try_from(raw).map_err(|_| CodecError::invalid(ty, format!("{raw} is out of range")))
}

fn u128_arg(v: &AbiValue) -> Result<u128, CodecError> {
    match v {
        AbiValue::Uint128(x) => Ok(*x),
        AbiValue::String(s) => s
            .parse::<u128>()
            .map_err(|_| CodecError::invalid("uint128", format!("'{s}' is not an integer"))),
        other => ranged("uint128", other),
    }
}

fn float_arg(ty: &str, v: &AbiValue) -> Result<f64, CodecError> {
    match v {
        AbiValue::Float(f) => Ok(*f),
        AbiValue::Int(i) => Ok(*i as f64),
        AbiValue::Uint(u) => Ok(*u as f64),
        AbiValue::String(s) => s
            .parse::<f64>()
            .map_err(|_| CodecError::invalid(ty, format!("'{s}' is not a number"))),
        other => Err(mismatch(ty, other)),
    }
}

fn str_arg<'v>(ty: &str, v: &'v AbiValue) -> Result<&'v str, CodecError> {
    v.as_str().ok_or_else(|| mismatch(ty, v))
}

fn bytes_arg(ty: &str, v: &AbiValue) -> Result<Vec<u8>, CodecError> {
    match v {
        AbiValue::Bytes(b) => Ok(b.clone()),
        AbiValue::String(s) => {
            hex::decode(s).map_err(|e| CodecError::invalid(ty, format!("'{s}': {e}")))
        }
        other => Err(mismatch(ty, other)),
    }
}

fn name_arg(ty: &str, v: &AbiValue) -> Result<u64, CodecError> {
    match v {
        AbiValue::String(s) => string_to_name(s),
        AbiValue::Uint(raw) => Ok(*raw),
        other => Err(mismatch(ty, other)),
    }
}

fn asset_arg(v: &AbiValue) -> Result<Asset, CodecError> {
    Asset::parse(str_arg("asset", v)?)
}

// ─── Read / write ─────────────────────────────────────────────────────────────

/// Decode one built-in value.
pub fn read_builtin(ty: &str, r: &mut Reader<'_>) -> Result<AbiValue, CodecError> {
    if let Some(len) = checksum_len(ty) {
        return Ok(AbiValue::String(hex::encode(r.read_bytes(len)?)));
    }
    Ok(match ty {
        "bool" => AbiValue::Bool(r.read_bool()?),
        "int8" => AbiValue::Int(i64::from(r.read_i8()?)),
        "uint8" => AbiValue::Uint(u64::from(r.read_u8()?)),
        "int16" => AbiValue::Int(i64::from(r.read_i16()?)),
        "uint16" => AbiValue::Uint(u64::from(r.read_u16()?)),
        "int32" => AbiValue::Int(i64::from(r.read_i32()?)),
        "uint32" => AbiValue::Uint(u64::from(r.read_u32()?)),
        "int64" => AbiValue::Int(r.read_i64()?),
        "uint64" => AbiValue::Uint(r.read_u64()?),
        "int128" => AbiValue::Int128(r.read_i128()?),
        "uint128" => AbiValue::Uint128(r.read_u128()?),
        "varint32" => AbiValue::Int(i64::from(r.read_varint32()?)),
        "varuint32" => AbiValue::Uint(u64::from(r.read_varuint32()?)),
        "float32" => AbiValue::Float(f64::from(r.read_f32()?)),
        "float64" => AbiValue::Float(r.read_f64()?),
        "time_point" => AbiValue::String(time_point_to_string(r.read_i64()?)?),
        "time_point_sec" => {
            AbiValue::String(format_micros(i64::from(r.read_u32()?) * 1_000_000)?
                .trim_end_matches(".000")
                .to_string())
        }
        "block_timestamp_type" => AbiValue::String(block_timestamp_to_string(r.read_u32()?)?),
        "name" => AbiValue::String(name_to_string(r.read_u64()?)),
        "bytes" => AbiValue::Bytes(r.read_blob()?),
        "string" => AbiValue::String(r.read_string()?),
        "public_key" => {
            let kind = KeyType::from_byte(r.read_u8()?, ty)?;
            AbiValue::String(public_key_to_string(kind, r.read_bytes(PUBLIC_KEY_LEN)?))
        }
        "signature" => {
            let kind = KeyType::from_byte(r.read_u8()?, ty)?;
            AbiValue::String(signature_to_string(kind, r.read_bytes(SIGNATURE_LEN)?))
        }
        "symbol" => AbiValue::String(Symbol::from_u64(r.read_u64()?).to_string()),
        "symbol_code" => AbiValue::String(symbol_code_to_string(r.read_u64()?)),
        "asset" => AbiValue::String(read_asset(r)?.to_string()),
        "extended_asset" => {
            let quantity = read_asset(r)?;
            AbiValue::record([
                ("quantity", AbiValue::String(quantity.to_string())),
                ("contract", AbiValue::String(name_to_string(r.read_u64()?))),
            ])
        }
        other => return Err(CodecError::UnknownType(other.to_string())),
    })
}

fn read_asset(r: &mut Reader<'_>) -> Result<Asset, CodecError> {
    let amount = r.read_i64()?;
    Ok(Asset {
        amount,
        symbol: Symbol::from_u64(r.read_u64()?),
    })
}

fn write_asset(w: &mut Writer, asset: Asset) {
    w.write_i64(asset.amount);
    w.write_u64(asset.symbol.to_u64());
}

/// Encode one built-in value.
pub fn write_builtin(ty: &str, v: &AbiValue, w: &mut Writer) -> Result<(), CodecError> {
    if let Some(len) = checksum_len(ty) {
        let bytes = bytes_arg(ty, v)?;
        if bytes.len() != len {
            return Err(CodecError::invalid(ty, format!("expected {len} bytes, got {}", bytes.len())));
        }
        w.write_bytes(&bytes);
        return Ok(());
    }
    match ty {
        "bool" => w.write_bool(v.as_bool().ok_or_else(|| mismatch(ty, v))?),
        "int8" => w.write_i8(ranged(ty, v)?),
        "uint8" => w.write_u8(ranged(ty, v)?),
        "int16" => w.write_i16(ranged(ty, v)?),
        "uint16" => w.write_u16(ranged(ty, v)?),
        "int32" => w.write_i32(ranged(ty, v)?),
        "uint32" => w.write_u32(ranged(ty, v)?),
        "int64" => w.write_i64(ranged(ty, v)?),
        "uint64" => w.write_u64(ranged(ty, v)?),
        "int128" => w.write_i128(int_arg(ty, v)?),
        "uint128" => w.write_u128(u128_arg(v)?),
        "varint32" => w.write_varint32(ranged(ty, v)?),
        "varuint32" => w.write_varuint32(ranged(ty, v)?),
        "float32" => w.write_f32(float_arg(ty, v)? as f32),
        "float64" => w.write_f64(float_arg(ty, v)?),
        "time_point" => match v {
            AbiValue::String(s) => w.write_i64(parse_micros(ty, s)?),
            other => w.write_i64(ranged(ty, other)?),
        },
        "time_point_sec" => match v {
            AbiValue::String(s) => {
                let secs = parse_micros(ty, s)? / 1_000_000;
                w.write_u32(ranged(ty, &AbiValue::Int(secs))?);
            }
            other => w.write_u32(ranged(ty, other)?),
        },
        "block_timestamp_type" => match v {
            AbiValue::String(s) => {
                let ms = parse_micros(ty, s)? / 1000;
                let slot = (ms - BLOCK_TIMESTAMP_EPOCH_MS) / BLOCK_INTERVAL_MS;
                w.write_u32(ranged(ty, &AbiValue::Int(slot))?);
            }
            other => w.write_u32(ranged(ty, other)?),
        },
        "name" => w.write_u64(name_arg(ty, v)?),
        "bytes" => w.write_blob(&bytes_arg(ty, v)?)?,
        "string" => w.write_string(str_arg(ty, v)?)?,
        "public_key" => {
            let (kind, data) = string_to_public_key(str_arg(ty, v)?)?;
            w.write_u8(kind.as_byte());
            w.write_bytes(&data);
        }
        "signature" => {
            let (kind, data) = string_to_signature(str_arg(ty, v)?)?;
            w.write_u8(kind.as_byte());
            w.write_bytes(&data);
        }
        "symbol" => w.write_u64(Symbol::parse(str_arg(ty, v)?)?.to_u64()),
        "symbol_code" => w.write_u64(string_to_symbol_code(str_arg(ty, v)?)?),
        "asset" => write_asset(w, asset_arg(v)?),
        "extended_asset" => {
            let field = |name: &str| {
                v.field(name).ok_or_else(|| CodecError::MissingField {
                    struct_name: ty.to_string(),
                    field: name.to_string(),
                })
            };
            write_asset(w, asset_arg(field("quantity")?)?);
            w.write_u64(name_arg("name", field("contract")?)?);
        }
        other => return Err(CodecError::UnknownType(other.to_string())),
    }
    Ok(())
}
