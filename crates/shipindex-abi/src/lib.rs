//! # shipindex-abi
//!
//! Runtime-ABI binary codec for the EOSIO state-history feed.
//!
//! Nothing here is generated from contract sources: an [`AbiDef`] arrives at
//! runtime (the session handshake, a `setabi` action, or the chain API), is
//! compiled into a [`TypeRegistry`], and values move through it as
//! [`AbiValue`] trees.
//!
//! ```rust
//! use shipindex_abi::{AbiDef, AbiValue, TypeRegistry};
//!
//! let abi = AbiDef::from_json(r#"{
//!     "version": "eosio::abi/1.1",
//!     "structs": [{"name": "hi", "base": "", "fields": [{"name": "user", "type": "name"}]}],
//!     "actions": [{"name": "hi", "type": "hi", "ricardian_contract": ""}]
//! }"#).unwrap();
//! let registry = TypeRegistry::new(&abi).unwrap();
//!
//! let value = AbiValue::record([("user", AbiValue::from("alice"))]);
//! let bytes = registry.encode_action("hi", &value).unwrap();
//! assert_eq!(registry.decode_action("hi", &bytes).unwrap(), value);
//! ```

pub mod abi;
pub mod builtin;
pub mod error;
pub mod keys;
pub mod name;
pub mod registry;
pub mod remote;
pub mod serializer;
pub mod value;

pub use abi::AbiDef;
pub use error::CodecError;
pub use name::{name_to_string, string_to_name, Asset, Symbol};
pub use registry::TypeRegistry;
pub use remote::{AbiProvider, RemoteError, StaticAbiProvider};
pub use serializer::{Reader, Writer};
pub use value::AbiValue;

#[cfg(feature = "remote")]
pub use remote::{decode_abi_blob, HttpAbiProvider};
