//! Schema-driven binary codec.
//!
//! A [`TypeRegistry`] is built from one [`AbiDef`] and maps every type name the
//! ABI can reach to a serialization rule. The protocol registry is built once
//! per session from the handshake; contract registries are built by the ABI
//! cache whenever an account's ABI changes.
//!
//! Type expressions may carry suffixes, applied outermost-last:
//! `T[]` (array), `T?` (optional), `T$` (binary extension).

use std::collections::HashMap;

use tracing::trace;

use crate::abi::AbiDef;
use crate::builtin::{is_builtin, read_builtin, write_builtin};
use crate::error::CodecError;
use crate::serializer::{Reader, Writer};
use crate::value::AbiValue;

/// Nesting bound for type resolution and value recursion.
const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone)]
struct FieldRule {
    name: String,
    ty: String,
}

#[derive(Debug, Clone)]
struct StructRule {
    /// Base fields first.
    fields: Vec<FieldRule>,
}

/// Compiled type table for one ABI.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    aliases: HashMap<String, String>,
    structs: HashMap<String, StructRule>,
    variants: HashMap<String, Vec<String>>,
    actions: HashMap<String, String>,
    tables: HashMap<String, String>,
    action_results: HashMap<String, String>,
}

enum Shape<'a> {
    Extension(&'a str),
    Optional(&'a str),
    Array(&'a str),
    Plain(&'a str),
}

fn shape(ty: &str) -> Shape<'_> {
    if let Some(inner) = ty.strip_suffix('$') {
        Shape::Extension(inner)
    } else if let Some(inner) = ty.strip_suffix('?') {
        Shape::Optional(inner)
    } else if let Some(inner) = ty.strip_suffix("[]") {
        Shape::Array(inner)
    } else {
        Shape::Plain(ty)
    }
}

impl TypeRegistry {
    /// Compile an ABI. Fails if any referenced type is undefined, an alias
    /// or base chain is cyclic, or a name is declared twice.
    pub fn new(abi: &AbiDef) -> Result<Self, CodecError> {
        let mut reg = TypeRegistry::default();

        for t in &abi.types {
            if reg.aliases.insert(t.new_type_name.clone(), t.ty.clone()).is_some() {
                return Err(CodecError::invalid("abi", format!("duplicate type '{}'", t.new_type_name)));
            }
        }
        for v in &abi.variants {
            if reg.variants.insert(v.name.clone(), v.types.clone()).is_some() {
                return Err(CodecError::invalid("abi", format!("duplicate variant '{}'", v.name)));
            }
        }

        let raw: HashMap<&str, _> = abi.structs.iter().map(|s| (s.name.as_str(), s)).collect();
        if raw.len() != abi.structs.len() {
            return Err(CodecError::invalid("abi", "duplicate struct name"));
        }
        for s in &abi.structs {
            let mut chain = vec![s];
            let mut base = s.base.as_str();
            while !base.is_empty() {
                if chain.len() > MAX_DEPTH {
                    return Err(CodecError::RecursionLimit(s.name.clone()));
                }
                let resolved = reg.resolve_alias(base)?;
                let parent = raw
                    .get(resolved)
                    .copied()
                    .ok_or_else(|| CodecError::UnknownType(base.to_string()))?;
                chain.push(parent);
                base = parent.base.as_str();
            }
            let fields = chain
                .iter()
                .rev()
                .flat_map(|def| def.fields.iter())
                .map(|f| FieldRule {
                    name: f.name.clone(),
                    ty: f.ty.clone(),
                })
                .collect();
            reg.structs.insert(s.name.clone(), StructRule { fields });
        }

        for a in &abi.actions {
            reg.actions.insert(a.name.clone(), a.ty.clone());
        }
        for t in &abi.tables {
            reg.tables.insert(t.name.clone(), t.ty.clone());
        }
        for r in &abi.action_results {
            reg.action_results.insert(r.name.clone(), r.result_type.clone());
        }

        reg.validate()?;
        trace!(
            structs = reg.structs.len(),
            variants = reg.variants.len(),
            actions = reg.actions.len(),
            "type registry built"
        );
        Ok(reg)
    }

    fn validate(&self) -> Result<(), CodecError> {
        let referenced = self
            .aliases
            .values()
            .chain(self.variants.values().flatten())
            .chain(self.structs.values().flat_map(|s| s.fields.iter().map(|f| &f.ty)))
            .chain(self.actions.values())
            .chain(self.tables.values())
            .chain(self.action_results.values());
        for ty in referenced {
            self.check_known(ty, 0)?;
        }
        Ok(())
    }

    fn check_known(&self, ty: &str, depth: usize) -> Result<(), CodecError> {
        if depth > MAX_DEPTH {
            return Err(CodecError::RecursionLimit(ty.to_string()));
        }
        match shape(ty) {
            Shape::Extension(inner) | Shape::Optional(inner) | Shape::Array(inner) => {
                self.check_known(inner, depth + 1)
            }
            Shape::Plain(name) => {
                let resolved = self.resolve_alias(name)?;
                if resolved != name {
                    return self.check_known(resolved, depth + 1);
                }
                if is_builtin(name) || self.structs.contains_key(name) || self.variants.contains_key(name) {
                    Ok(())
                } else {
                    Err(CodecError::UnknownType(name.to_string()))
                }
            }
        }
    }

    /// Follow `types` aliases to the underlying expression.
    fn resolve_alias<'a>(&'a self, mut name: &'a str) -> Result<&'a str, CodecError> {
        for _ in 0..MAX_DEPTH {
            match self.aliases.get(name) {
                Some(target) if target != name => name = target,
                _ => return Ok(name),
            }
        }
        Err(CodecError::RecursionLimit(name.to_string()))
    }

    /// Whether `ty` can be encoded by this registry.
    pub fn is_known(&self, ty: &str) -> bool {
        self.check_known(ty, 0).is_ok()
    }

    /// The payload type of an action.
    pub fn action_type(&self, action: &str) -> Option<&str> {
        self.actions.get(action).map(String::as_str)
    }

    /// The row type of a table.
    pub fn table_type(&self, table: &str) -> Option<&str> {
        self.tables.get(table).map(String::as_str)
    }

    pub fn action_result_type(&self, action: &str) -> Option<&str> {
        self.action_results.get(action).map(String::as_str)
    }

    /// The ordered alternatives of a variant type.
    pub fn variant_types(&self, variant: &str) -> Option<&[String]> {
        self.variants.get(variant).map(Vec::as_slice)
    }

    // ─── Decoding ─────────────────────────────────────────────────────────────

    /// Decode a value of `ty`. The buffer must be consumed exactly.
    pub fn deserialize(&self, ty: &str, bytes: &[u8]) -> Result<AbiValue, CodecError> {
        let mut r = Reader::new(bytes);
        let value = self.read(ty, &mut r, 0)?;
        if !r.is_empty() {
            return Err(CodecError::TrailingBytes {
                type_name: ty.to_string(),
                remaining: r.remaining(),
                len: bytes.len(),
            });
        }
        Ok(value)
    }

    /// Decode a value of `ty` from the reader's current position, leaving the
    /// rest of the buffer for the caller.
    pub fn read(&self, ty: &str, r: &mut Reader<'_>, depth: usize) -> Result<AbiValue, CodecError> {
        if depth > MAX_DEPTH {
            return Err(CodecError::RecursionLimit(ty.to_string()));
        }
        match shape(ty) {
            Shape::Extension(inner) => self.read(inner, r, depth + 1),
            Shape::Optional(inner) => {
                if r.read_bool()? {
                    self.read(inner, r, depth + 1)
                } else {
                    Ok(AbiValue::Null)
                }
            }
            Shape::Array(inner) => {
                let count = r.read_varuint32()? as usize;
                let mut items = Vec::with_capacity(count.min(r.remaining()));
                for _ in 0..count {
                    items.push(self.read(inner, r, depth + 1)?);
                }
                Ok(AbiValue::Array(items))
            }
            Shape::Plain(name) => {
                let name = self.resolve_alias(name)?;
                if let Some(rule) = self.structs.get(name) {
                    let mut fields = indexmap::IndexMap::with_capacity(rule.fields.len());
                    for field in &rule.fields {
                        if field.ty.ends_with('$') && r.is_empty() {
                            break;
                        }
                        fields.insert(field.name.clone(), self.read(&field.ty, r, depth + 1)?);
                    }
                    Ok(AbiValue::Struct(fields))
                } else if let Some(alternatives) = self.variants.get(name) {
                    let index = r.read_varuint32()?;
                    let alt = alternatives.get(index as usize).ok_or_else(|| {
                        CodecError::UnknownVariantIndex {
                            variant: name.to_string(),
                            index,
                        }
                    })?;
                    Ok(AbiValue::variant(alt.clone(), self.read(alt, r, depth + 1)?))
                } else if name != ty {
                    // alias to a suffixed expression
                    self.read(name, r, depth + 1)
                } else {
                    read_builtin(name, r)
                }
            }
        }
    }

    // ─── Encoding ─────────────────────────────────────────────────────────────

    /// Encode `value` as `ty`.
    pub fn serialize(&self, ty: &str, value: &AbiValue) -> Result<Vec<u8>, CodecError> {
        let mut w = Writer::new();
        self.write(ty, value, &mut w, 0)?;
        Ok(w.into_bytes())
    }

    pub fn write(
        &self,
        ty: &str,
        value: &AbiValue,
        w: &mut Writer,
        depth: usize,
    ) -> Result<(), CodecError> {
        if depth > MAX_DEPTH {
            return Err(CodecError::RecursionLimit(ty.to_string()));
        }
        match shape(ty) {
            Shape::Extension(inner) => self.write(inner, value, w, depth + 1),
            Shape::Optional(inner) => {
                if value.is_null() {
                    w.write_bool(false);
                    Ok(())
                } else {
                    w.write_bool(true);
                    self.write(inner, value, w, depth + 1)
                }
            }
            Shape::Array(inner) => {
                let items = value.as_array().ok_or_else(|| CodecError::TypeMismatch {
                    expected: ty.to_string(),
                    got: value.kind().to_string(),
                })?;
                w.write_length(items.len())?;
                items.iter().try_for_each(|item| self.write(inner, item, w, depth + 1))
            }
            Shape::Plain(name) => {
                let name = self.resolve_alias(name)?;
                if let Some(rule) = self.structs.get(name) {
                    self.write_struct(name, rule, value, w, depth)
                } else if let Some(alternatives) = self.variants.get(name) {
                    let AbiValue::Variant(tag, inner) = value else {
                        return Err(CodecError::TypeMismatch {
                            expected: name.to_string(),
                            got: value.kind().to_string(),
                        });
                    };
                    let index = alternatives.iter().position(|a| a == tag).ok_or_else(|| {
                        CodecError::UnknownVariant {
                            variant: name.to_string(),
                            tag: tag.clone(),
                        }
                    })?;
                    w.write_length(index)?;
                    self.write(tag, inner, w, depth + 1)
                } else if name != ty {
                    self.write(name, value, w, depth + 1)
                } else {
                    write_builtin(name, value, w)
                }
            }
        }
    }

    fn write_struct(
        &self,
        name: &str,
        rule: &StructRule,
        value: &AbiValue,
        w: &mut Writer,
        depth: usize,
    ) -> Result<(), CodecError> {
        let AbiValue::Struct(fields) = value else {
            return Err(CodecError::TypeMismatch {
                expected: name.to_string(),
                got: value.kind().to_string(),
            });
        };
        let mut absent_extension: Option<&str> = None;
        for field in &rule.fields {
            match fields.get(&field.name) {
                Some(v) => {
                    if let Some(missing) = absent_extension {
                        return Err(CodecError::MissingField {
                            struct_name: name.to_string(),
                            field: missing.to_string(),
                        });
                    }
                    self.write(&field.ty, v, w, depth + 1)?;
                }
                None if field.ty.ends_with('$') => {
                    absent_extension.get_or_insert(field.name.as_str());
                }
                None => {
                    return Err(CodecError::MissingField {
                        struct_name: name.to_string(),
                        field: field.name.clone(),
                    })
                }
            }
        }
        Ok(())
    }

    // ─── Actions ──────────────────────────────────────────────────────────────

    /// Decode an action payload by action name.
    pub fn decode_action(&self, action: &str, data: &[u8]) -> Result<AbiValue, CodecError> {
        let ty = self
            .action_type(action)
            .ok_or_else(|| CodecError::UnknownAction(action.to_string()))?;
        self.deserialize(ty, data)
    }

    pub fn encode_action(&self, action: &str, value: &AbiValue) -> Result<Vec<u8>, CodecError> {
        let ty = self
            .action_type(action)
            .ok_or_else(|| CodecError::UnknownAction(action.to_string()))?;
        self.serialize(ty, value)
    }
}
