//! Interface extraction and content-addressed interface identifiers.
//!
//! A compilation unit's *public interface* is everything a downstream unit
//! can observe: exported modules, types, constants, and functions, with their
//! structural details. The extractor orders elements deterministically and
//! the CID is a BLAKE3 digest over a canonical byte serialization, so
//! identical public interfaces always produce identical CIDs, and nothing
//! else (bodies, private declarations, comments, debug info) can move the
//! digest.

use crate::types::UnitId;
use core::fmt;
use serde::{Deserialize, Serialize};

/// A parameter in a function's interface signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSig {
    /// Parameter name.
    pub name: String,
    /// Rendered type signature.
    pub type_signature: String,
    /// Whether the parameter is optional.
    pub optional: bool,
}

/// A struct field in a type's interface.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSig {
    /// Field name.
    pub name: String,
    /// Rendered type signature.
    pub type_signature: String,
}

/// Structural detail of a declared type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeDeclKind {
    /// A struct with fields in declared order.
    Struct {
        /// Fields in declared order.
        fields: Vec<FieldSig>,
    },
    /// An enum with variants in declared order.
    Enum {
        /// Variant names in declared order.
        variants: Vec<String>,
    },
    /// A type without observable structure.
    Opaque,
}

/// One declaration inside a compilation unit, as the front-end reports it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declaration {
    /// Declaration id, unique within the unit; orders interface elements.
    pub decl_id: u32,
    /// Whether the declaration is exported.
    pub exported: bool,
    /// The declaration payload.
    pub kind: DeclarationKind,
}

/// Declaration payloads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeclarationKind {
    /// A module declaration.
    Module {
        /// Module name.
        name: String,
        /// Exported symbol names (sorted during extraction).
        exports: Vec<String>,
    },
    /// A type declaration.
    Type {
        /// Type name.
        name: String,
        /// Structural detail.
        detail: TypeDeclKind,
    },
    /// A constant declaration.
    Constant {
        /// Constant name.
        name: String,
        /// Rendered type signature.
        type_signature: String,
        /// Rendered value, when the front-end has one.
        value: Option<String>,
        /// Whether the value can affect a consumer's type inference.
        ///
        /// Only then does the value participate in the CID.
        affects_inference: bool,
    },
    /// A function declaration.
    Function {
        /// Function name.
        name: String,
        /// Parameters in declared order.
        params: Vec<ParamSig>,
        /// Rendered return type.
        return_type: String,
        /// Fingerprint of the body; never part of the CID.
        body_fingerprint: Option<u64>,
    },
}

/// A compilation unit as seen by the core: an external collaborator's view,
/// reduced to what interface extraction and dependency tracking consume.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationUnit {
    /// The unit's id.
    pub id: UnitId,
    /// The unit's name (usually its module path).
    pub name: String,
    /// All declarations, public and private.
    pub declarations: Vec<Declaration>,
    /// Direct imports.
    pub imports: Vec<UnitId>,
}

/// One element of a unit's public interface, in canonical order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterfaceElement {
    /// An exported module and its sorted export list.
    Module {
        /// Module name.
        name: String,
        /// Exported symbol names, sorted.
        exports: Vec<String>,
    },
    /// An exported type with structural details.
    Type {
        /// Type name.
        name: String,
        /// Structural detail; field and variant order is declaration order.
        detail: TypeDeclKind,
    },
    /// An exported constant.
    Constant {
        /// Constant name.
        name: String,
        /// Rendered type signature.
        type_signature: String,
        /// The value, present only when it affects consumer inference.
        inference_value: Option<String>,
    },
    /// An exported function signature.
    Function {
        /// Function name.
        name: String,
        /// Parameters in declared order.
        params: Vec<ParamSig>,
        /// Rendered return type.
        return_type: String,
    },
}

impl InterfaceElement {
    /// Canonical class rank: modules, then types, then constants, then
    /// functions.
    const fn class_rank(&self) -> u8 {
        match self {
            Self::Module { .. } => 0,
            Self::Type { .. } => 1,
            Self::Constant { .. } => 2,
            Self::Function { .. } => 3,
        }
    }
}

/// A 32-byte BLAKE3 digest of a unit's public interface.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InterfaceCid(pub [u8; 32]);

impl InterfaceCid {
    /// The digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering of the full digest.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for InterfaceCid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InterfaceCid({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for InterfaceCid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Extracts a unit's public interface elements in canonical order:
/// class rank first, then declaration id.
#[must_use]
pub fn extract_interface(unit: &CompilationUnit) -> Vec<InterfaceElement> {
    let mut indexed: Vec<(u8, u32, InterfaceElement)> = unit
        .declarations
        .iter()
        .filter(|decl| decl.exported)
        .map(|decl| {
            let element = match &decl.kind {
                DeclarationKind::Module { name, exports } => {
                    let mut exports = exports.clone();
                    exports.sort_unstable();
                    InterfaceElement::Module {
                        name: name.clone(),
                        exports,
                    }
                }
                DeclarationKind::Type { name, detail } => InterfaceElement::Type {
                    name: name.clone(),
                    detail: detail.clone(),
                },
                DeclarationKind::Constant {
                    name,
                    type_signature,
                    value,
                    affects_inference,
                } => InterfaceElement::Constant {
                    name: name.clone(),
                    type_signature: type_signature.clone(),
                    inference_value: if *affects_inference {
                        value.clone()
                    } else {
                        None
                    },
                },
                DeclarationKind::Function {
                    name,
                    params,
                    return_type,
                    ..
                } => InterfaceElement::Function {
                    name: name.clone(),
                    params: params.clone(),
                    return_type: return_type.clone(),
                },
            };
            (element.class_rank(), decl.decl_id, element)
        })
        .collect();
    indexed.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
    indexed.into_iter().map(|(_, _, e)| e).collect()
}

/// Canonical byte serialization of interface elements.
///
/// Per element: a kind tag, then the fields in interface order, `:` between
/// fields, `;` terminating the element. Names are UTF-8 bytes.
#[must_use]
pub fn canonical_bytes(elements: &[InterfaceElement]) -> Vec<u8> {
    let mut out = Vec::new();
    for element in elements {
        match element {
            InterfaceElement::Module { name, exports } => {
                out.push(b'M');
                push_field(&mut out, name);
                for export in exports {
                    push_field(&mut out, export);
                }
            }
            InterfaceElement::Type { name, detail } => {
                out.push(b'T');
                push_field(&mut out, name);
                match detail {
                    TypeDeclKind::Struct { fields } => {
                        out.push(b's');
                        for field in fields {
                            push_field(&mut out, &field.name);
                            push_field(&mut out, &field.type_signature);
                        }
                    }
                    TypeDeclKind::Enum { variants } => {
                        out.push(b'e');
                        for variant in variants {
                            push_field(&mut out, variant);
                        }
                    }
                    TypeDeclKind::Opaque => out.push(b'o'),
                }
            }
            InterfaceElement::Constant {
                name,
                type_signature,
                inference_value,
            } => {
                out.push(b'C');
                push_field(&mut out, name);
                push_field(&mut out, type_signature);
                if let Some(value) = inference_value {
                    push_field(&mut out, value);
                }
            }
            InterfaceElement::Function {
                name,
                params,
                return_type,
            } => {
                out.push(b'F');
                push_field(&mut out, name);
                for param in params {
                    push_field(&mut out, &param.name);
                    push_field(&mut out, &param.type_signature);
                    out.push(if param.optional { b'1' } else { b'0' });
                }
                push_field(&mut out, return_type);
            }
        }
        out.push(b';');
    }
    out
}

fn push_field(out: &mut Vec<u8>, field: &str) {
    out.push(b':');
    out.extend_from_slice(field.as_bytes());
}

/// Computes the interface CID of a compilation unit.
#[must_use]
pub fn compute_interface_cid(unit: &CompilationUnit) -> InterfaceCid {
    let elements = extract_interface(unit);
    let bytes = canonical_bytes(&elements);
    InterfaceCid(*blake3::hash(&bytes).as_bytes())
}

/// Aggregates dependency CIDs: sort byte-lexicographically, hash the
/// concatenation.
#[must_use]
pub fn aggregate_cids(cids: &[InterfaceCid]) -> InterfaceCid {
    let mut sorted: Vec<&InterfaceCid> = cids.iter().collect();
    sorted.sort();
    let mut hasher = blake3::Hasher::new();
    for cid in sorted {
        hasher.update(cid.as_bytes());
    }
    InterfaceCid(*hasher.finalize().as_bytes())
}
