//! The `abi_def` document: JSON form via serde, binary form by hand.
//!
//! The binary layout is what `setabi` actions and the `get_raw_abi` endpoint
//! carry. `variants` and `action_results` are binary extensions: older ABIs
//! simply end before them.

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::name::{name_to_string, string_to_name};
use crate::serializer::{Reader, Writer};

/// Hex encoding of the length-prefixed `eosio::abi` version string every
/// binary ABI starts with.
pub const BINARY_ABI_HEX_PREFIX: &str = "0e656f73696f3a3a616269";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDef {
    pub new_type_name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructDef {
    pub name: String,
    #[serde(default)]
    pub base: String,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub ricardian_contract: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    #[serde(default)]
    pub index_type: String,
    #[serde(default)]
    pub key_names: Vec<String>,
    #[serde(default)]
    pub key_types: Vec<String>,
    #[serde(rename = "type")]
    pub ty: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClausePair {
    pub id: String,
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub error_code: u64,
    pub error_msg: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionEntry {
    pub tag: u16,
    /// Hex-encoded payload.
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantDef {
    pub name: String,
    pub types: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResultDef {
    pub name: String,
    pub result_type: String,
}

/// A contract or protocol ABI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbiDef {
    pub version: String,
    pub types: Vec<TypeDef>,
    pub structs: Vec<StructDef>,
    pub actions: Vec<ActionDef>,
    pub tables: Vec<TableDef>,
    pub ricardian_clauses: Vec<ClausePair>,
    pub error_messages: Vec<ErrorMessage>,
    pub abi_extensions: Vec<ExtensionEntry>,
    pub variants: Vec<VariantDef>,
    pub action_results: Vec<ActionResultDef>,
}

fn read_vec<'a, T>(
    r: &mut Reader<'a>,
    mut item: impl FnMut(&mut Reader<'a>) -> Result<T, CodecError>,
) -> Result<Vec<T>, CodecError> {
    let n = r.read_varuint32()? as usize;
    // every element is at least one byte
    if n > r.remaining() {
        return Err(CodecError::UnexpectedEof {
            needed: n,
            remaining: r.remaining(),
        });
    }
    (0..n).map(|_| item(r)).collect()
}

fn write_vec<T>(
    w: &mut Writer,
    items: &[T],
    mut item: impl FnMut(&mut Writer, &T) -> Result<(), CodecError>,
) -> Result<(), CodecError> {
    w.write_length(items.len())?;
    items.iter().try_for_each(|i| item(w, i))
}

fn read_name(r: &mut Reader<'_>) -> Result<String, CodecError> {
    Ok(name_to_string(r.read_u64()?))
}

impl AbiDef {
    /// Parse the JSON form.
    pub fn from_json(text: &str) -> Result<Self, CodecError> {
        serde_json::from_str(text).map_err(|e| CodecError::invalid("abi_def", e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, CodecError> {
        serde_json::to_string(self).map_err(|e| CodecError::invalid("abi_def", e.to_string()))
    }

    /// Parse the binary form. The whole buffer must be consumed.
    pub fn from_bin(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let mut abi = AbiDef {
            version: r.read_string()?,
            ..Default::default()
        };
        if !abi.version.starts_with("eosio::abi/1.") {
            return Err(CodecError::invalid(
                "abi_def",
                format!("unsupported version '{}'", abi.version),
            ));
        }
        abi.types = read_vec(&mut r, |r| {
            Ok(TypeDef {
                new_type_name: r.read_string()?,
                ty: r.read_string()?,
            })
        })?;
        abi.structs = read_vec(&mut r, |r| {
            Ok(StructDef {
                name: r.read_string()?,
                base: r.read_string()?,
                fields: read_vec(r, |r| {
                    Ok(FieldDef {
                        name: r.read_string()?,
                        ty: r.read_string()?,
                    })
                })?,
            })
        })?;
        abi.actions = read_vec(&mut r, |r| {
            Ok(ActionDef {
                name: read_name(r)?,
                ty: r.read_string()?,
                ricardian_contract: r.read_string()?,
            })
        })?;
        abi.tables = read_vec(&mut r, |r| {
            Ok(TableDef {
                name: read_name(r)?,
                index_type: r.read_string()?,
                key_names: read_vec(r, Reader::read_string)?,
                key_types: read_vec(r, Reader::read_string)?,
                ty: r.read_string()?,
            })
        })?;
        abi.ricardian_clauses = read_vec(&mut r, |r| {
            Ok(ClausePair {
                id: r.read_string()?,
                body: r.read_string()?,
            })
        })?;
        abi.error_messages = read_vec(&mut r, |r| {
            Ok(ErrorMessage {
                error_code: r.read_u64()?,
                error_msg: r.read_string()?,
            })
        })?;
        abi.abi_extensions = read_vec(&mut r, |r| {
            Ok(ExtensionEntry {
                tag: r.read_u16()?,
                value: hex::encode(r.read_blob()?),
            })
        })?;
        if !r.is_empty() {
            abi.variants = read_vec(&mut r, |r| {
                Ok(VariantDef {
                    name: r.read_string()?,
                    types: read_vec(r, Reader::read_string)?,
                })
            })?;
        }
        if !r.is_empty() {
            abi.action_results = read_vec(&mut r, |r| {
                Ok(ActionResultDef {
                    name: read_name(r)?,
                    result_type: r.read_string()?,
                })
            })?;
        }
        if !r.is_empty() {
            return Err(CodecError::TrailingBytes {
                type_name: "abi_def".into(),
                remaining: r.remaining(),
                len: bytes.len(),
            });
        }
        Ok(abi)
    }

    /// Serialize to the binary form. Extensions are written only when needed.
    pub fn to_bin(&self) -> Result<Vec<u8>, CodecError> {
        let mut w = Writer::new();
        w.write_string(&self.version)?;
        write_vec(&mut w, &self.types, |w, t| {
            w.write_string(&t.new_type_name)?;
            w.write_string(&t.ty)
        })?;
        write_vec(&mut w, &self.structs, |w, s| {
            w.write_string(&s.name)?;
            w.write_string(&s.base)?;
            write_vec(w, &s.fields, |w, f| {
                w.write_string(&f.name)?;
                w.write_string(&f.ty)
            })
        })?;
        write_vec(&mut w, &self.actions, |w, a| {
            w.write_u64(string_to_name(&a.name)?);
            w.write_string(&a.ty)?;
            w.write_string(&a.ricardian_contract)
        })?;
        write_vec(&mut w, &self.tables, |w, t| {
            w.write_u64(string_to_name(&t.name)?);
            w.write_string(&t.index_type)?;
            write_vec(w, &t.key_names, |w, k| w.write_string(k))?;
            write_vec(w, &t.key_types, |w, k| w.write_string(k))?;
            w.write_string(&t.ty)
        })?;
        write_vec(&mut w, &self.ricardian_clauses, |w, c| {
            w.write_string(&c.id)?;
            w.write_string(&c.body)
        })?;
        write_vec(&mut w, &self.error_messages, |w, e| {
            w.write_u64(e.error_code);
            w.write_string(&e.error_msg)
        })?;
        write_vec(&mut w, &self.abi_extensions, |w, e| {
            w.write_u16(e.tag);
            let value = hex::decode(&e.value)
                .map_err(|err| CodecError::invalid("abi_extension", err.to_string()))?;
            w.write_blob(&value)
        })?;
        if !self.variants.is_empty() || !self.action_results.is_empty() {
            write_vec(&mut w, &self.variants, |w, v| {
                w.write_string(&v.name)?;
                write_vec(w, &v.types, |w, t| w.write_string(t))
            })?;
        }
        if !self.action_results.is_empty() {
            write_vec(&mut w, &self.action_results, |w, a| {
                w.write_u64(string_to_name(&a.name)?);
                w.write_string(&a.result_type)
            })?;
        }
        Ok(w.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_abi() -> AbiDef {
        AbiDef::from_json(
            r#"{
                "version": "eosio::abi/1.1",
                "types": [{"new_type_name": "account_name", "type": "name"}],
                "structs": [{
                    "name": "transfer",
                    "base": "",
                    "fields": [
                        {"name": "from", "type": "account_name"},
                        {"name": "to", "type": "name"},
                        {"name": "quantity", "type": "asset"},
                        {"name": "memo", "type": "string"}
                    ]
                }],
                "actions": [{"name": "transfer", "type": "transfer", "ricardian_contract": ""}],
                "variants": [{"name": "any", "types": ["name", "string"]}]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn json_defaults_missing_sections() {
        let abi = token_abi();
        assert!(abi.tables.is_empty());
        assert!(abi.action_results.is_empty());
        assert_eq!(abi.structs[0].fields.len(), 4);
    }

    #[test]
    fn binary_form_starts_with_version_prefix() {
        let bin = token_abi().to_bin().unwrap();
        assert!(hex::encode(&bin).starts_with(BINARY_ABI_HEX_PREFIX));
    }

    #[test]
    fn binary_round_trip_with_extensions() {
        let abi = token_abi();
        let back = AbiDef::from_bin(&abi.to_bin().unwrap()).unwrap();
        assert_eq!(back, abi);
    }

    #[test]
    fn binary_without_extensions_is_accepted() {
        let mut abi = token_abi();
        abi.variants.clear();
        let bin = abi.to_bin().unwrap();
        let back = AbiDef::from_bin(&bin).unwrap();
        assert!(back.variants.is_empty());
        assert_eq!(back.actions[0].name, "transfer");
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bin = token_abi().to_bin().unwrap();
        bin.extend_from_slice(&[0, 0, 0]);
        assert!(AbiDef::from_bin(&bin).is_err());
    }
}
