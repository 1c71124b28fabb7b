//! Decoded module definitions.
//!
//! A [`Module`] is the static, already-decoded description of a program unit:
//! function signatures, declared functions with their code bodies, memory
//! limits, imports, exports and optional debug names. It is immutable input to
//! the [`Store`](crate::Store). Decoding the binary format is left to an
//! external decoder; definitions can also be deserialized with `serde`.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use wasmrt_common::RuntimeError;

/// Index into one of the module's index spaces.
pub type Index = u32;

/// Name assigned to functions that have no entry in the name section.
pub const UNKNOWN_NAME: &str = "unknown";

/// Numeric value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    I32,
    I64,
    F32,
    F64,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::I32 => write!(f, "i32"),
            ValueType::I64 => write!(f, "i64"),
            ValueType::F32 => write!(f, "f32"),
            ValueType::F64 => write!(f, "f64"),
        }
    }
}

/// A function signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionType {
    #[serde(default)]
    pub params: Vec<ValueType>,
    #[serde(default)]
    pub results: Vec<ValueType>,
}

impl FunctionType {
    pub fn new(params: impl Into<Vec<ValueType>>, results: impl Into<Vec<ValueType>>) -> Self {
        Self {
            params: params.into(),
            results: results.into(),
        }
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |types: &[ValueType]| {
            types
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(f, "({}) -> ({})", join(&self.params), join(&self.results))
    }
}

/// The body of a declared function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Code {
    /// Locals declared in addition to the parameters.
    #[serde(default)]
    pub locals: Vec<ValueType>,

    /// Instruction bytes in the WebAssembly encoding, terminated by `end`.
    pub body: Vec<u8>,
}

impl Code {
    pub fn new(locals: impl Into<Vec<ValueType>>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            locals: locals.into(),
            body: body.into(),
        }
    }
}

/// Memory limits in pages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsType {
    pub min: u32,
    #[serde(default)]
    pub max: Option<u32>,
}

impl LimitsType {
    /// Check the limits are consistent and within `limit_pages`.
    pub fn check(&self, limit_pages: u32) -> Result<(), RuntimeError> {
        if let Some(max) = self.max {
            if self.min > max {
                return Err(RuntimeError::invalid_module(format!(
                    "memory min {} pages exceeds max {max} pages",
                    self.min
                )));
            }
            if max > limit_pages {
                return Err(RuntimeError::MemoryLimitExceeded {
                    requested_pages: u64::from(max),
                    limit_pages,
                });
            }
        }
        if self.min > limit_pages {
            return Err(RuntimeError::MemoryLimitExceeded {
                requested_pages: u64::from(self.min),
                limit_pages,
            });
        }
        Ok(())
    }
}

/// A function imported from another module in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub type_index: Index,
}

/// Kind of an exported item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternKind {
    Func,
    Memory,
}

/// An exported item, referenced by index into its index space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Export {
    pub name: String,
    pub kind: ExternKind,
    pub index: Index,
}

/// Sparse index to name mapping.
///
/// Lookups of absent indices resolve to [`UNKNOWN_NAME`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<NameAssoc>", into = "Vec<NameAssoc>")]
pub struct NameMap(BTreeMap<Index, String>);

/// Serialized form of one [`NameMap`] entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameAssoc {
    pub index: Index,
    pub name: String,
}

impl NameMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: Index, name: impl Into<String>) {
        self.0.insert(index, name.into());
    }

    pub fn get(&self, index: Index) -> Option<&str> {
        self.0.get(&index).map(String::as_str)
    }

    /// Name for `index`, or [`UNKNOWN_NAME`] when there is none.
    pub fn name(&self, index: Index) -> &str {
        self.get(index).unwrap_or(UNKNOWN_NAME)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(Index, S)> for NameMap {
    fn from_iter<I: IntoIterator<Item = (Index, S)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(i, n)| (i, n.into())).collect())
    }
}

impl From<Vec<NameAssoc>> for NameMap {
    fn from(entries: Vec<NameAssoc>) -> Self {
        entries.into_iter().map(|e| (e.index, e.name)).collect()
    }
}

impl From<NameMap> for Vec<NameAssoc> {
    fn from(map: NameMap) -> Self {
        map.0
            .into_iter()
            .map(|(index, name)| NameAssoc { index, name })
            .collect()
    }
}

/// Optional debug names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameSection {
    #[serde(default)]
    pub module_name: Option<String>,

    /// Names keyed by index in the function index space.
    #[serde(default)]
    pub function_names: NameMap,
}

/// A decoded module definition.
///
/// `function_section[i]` is the type index of the i-th declared function and
/// `code_section[i]` its body. Function indices cover imports first, then
/// declared functions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Module {
    pub type_section: Vec<FunctionType>,
    pub import_section: Vec<Import>,
    pub function_section: Vec<Index>,
    pub code_section: Vec<Code>,
    pub memory_section: Vec<LimitsType>,
    pub export_section: Vec<Export>,
    pub name_section: Option<NameSection>,
}

impl Module {
    /// Number of imported functions, which precede declared ones.
    pub fn imported_function_count(&self) -> usize {
        self.import_section.len()
    }

    /// Total size of the function index space.
    pub fn function_count(&self) -> usize {
        self.import_section.len() + self.function_section.len()
    }

    /// Signature of the function at `index` in the function index space.
    pub fn function_type(&self, index: Index) -> Option<&FunctionType> {
        let index = index as usize;
        let type_index = match self.import_section.get(index) {
            Some(import) => import.type_index,
            None => *self
                .function_section
                .get(index - self.import_section.len())?,
        };
        self.type_section.get(type_index as usize)
    }

    /// The single memory declaration, if any.
    pub fn memory(&self) -> Option<&LimitsType> {
        self.memory_section.first()
    }

    /// Debug name for a function index, [`UNKNOWN_NAME`] when absent.
    pub fn function_name(&self, index: Index) -> &str {
        self.name_section
            .as_ref()
            .map_or(UNKNOWN_NAME, |names| names.function_names.name(index))
    }

    /// Check the structural invariants the store relies on.
    ///
    /// Definitions normally come from an external validator; this catches
    /// hand-built or deserialized definitions that would otherwise fail
    /// halfway through instantiation.
    pub fn validate(&self, max_memory_pages: u32) -> Result<(), RuntimeError> {
        if self.function_section.len() != self.code_section.len() {
            return Err(RuntimeError::invalid_module(format!(
                "function and code section have inconsistent lengths: {} != {}",
                self.function_section.len(),
                self.code_section.len()
            )));
        }

        let type_count = self.type_section.len();
        for (i, import) in self.import_section.iter().enumerate() {
            if import.type_index as usize >= type_count {
                return Err(RuntimeError::invalid_module(format!(
                    "import[{i}] {}.{} type index {} out of range (len={type_count})",
                    import.module, import.name, import.type_index
                )));
            }
        }
        for (i, &type_index) in self.function_section.iter().enumerate() {
            if type_index as usize >= type_count {
                return Err(RuntimeError::invalid_module(format!(
                    "function[{i}] type index {type_index} out of range (len={type_count})"
                )));
            }
        }

        if self.memory_section.len() > 1 {
            return Err(RuntimeError::invalid_module(format!(
                "at most one memory is allowed, found {}",
                self.memory_section.len()
            )));
        }
        if let Some(limits) = self.memory() {
            limits.check(max_memory_pages)?;
        }

        let mut names = HashSet::new();
        for export in &self.export_section {
            if !names.insert(export.name.as_str()) {
                return Err(RuntimeError::invalid_module(format!(
                    "duplicate export name {}",
                    export.name
                )));
            }
            let bound = match export.kind {
                ExternKind::Func => self.function_count(),
                ExternKind::Memory => self.memory_section.len(),
            };
            if export.index as usize >= bound {
                return Err(RuntimeError::invalid_module(format!(
                    "export {} index {} out of range (len={bound})",
                    export.name, export.index
                )));
            }
        }

        Ok(())
    }
}
