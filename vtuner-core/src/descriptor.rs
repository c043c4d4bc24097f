//! Deferred construction recipes for capture devices.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::InstantiationError;

/// Kind of a single constructor argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgKind {
    Str,
    Int,
    Bool,
    Addr,
}

impl ArgKind {
    pub fn name(self) -> &'static str {
        match self {
            ArgKind::Str => "str",
            ArgKind::Int => "int",
            ArgKind::Bool => "bool",
            ArgKind::Addr => "addr",
        }
    }
}

/// A constructor argument value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RecipeArg {
    Str(String),
    Int(i64),
    Bool(bool),
    Addr(IpAddr),
}

impl RecipeArg {
    pub fn kind(&self) -> ArgKind {
        match self {
            RecipeArg::Str(_) => ArgKind::Str,
            RecipeArg::Int(_) => ArgKind::Int,
            RecipeArg::Bool(_) => ArgKind::Bool,
            RecipeArg::Addr(_) => ArgKind::Addr,
        }
    }
}

impl From<&str> for RecipeArg {
    fn from(value: &str) -> Self {
        RecipeArg::Str(value.to_string())
    }
}

impl From<String> for RecipeArg {
    fn from(value: String) -> Self {
        RecipeArg::Str(value)
    }
}

impl From<i64> for RecipeArg {
    fn from(value: i64) -> Self {
        RecipeArg::Int(value)
    }
}

impl From<bool> for RecipeArg {
    fn from(value: bool) -> Self {
        RecipeArg::Bool(value)
    }
}

impl From<IpAddr> for RecipeArg {
    fn from(value: IpAddr) -> Self {
        RecipeArg::Addr(value)
    }
}

/// Implementation tag plus the ordered argument list handed to its constructor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstructionRecipe {
    pub implementation: String,
    pub args: Vec<RecipeArg>,
}

impl ConstructionRecipe {
    pub fn new(implementation: impl Into<String>, args: Vec<RecipeArg>) -> Self {
        Self {
            implementation: implementation.into(),
            args,
        }
    }
}

/// Typed read access to a recipe's arguments from inside a constructor.
///
/// The factory checks kinds against the declared parameter list before a
/// constructor runs, so these accessors only fail when a constructor reads a
/// position it did not declare.
#[derive(Debug, Clone, Copy)]
pub struct RecipeArgs<'a> {
    implementation: &'a str,
    args: &'a [RecipeArg],
}

impl<'a> RecipeArgs<'a> {
    pub fn new(implementation: &'a str, args: &'a [RecipeArg]) -> Self {
        Self {
            implementation,
            args,
        }
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn str(&self, index: usize) -> Result<&'a str, InstantiationError> {
        match self.args.get(index) {
            Some(RecipeArg::Str(value)) => Ok(value),
            other => Err(self.mismatch(index, ArgKind::Str, other)),
        }
    }

    pub fn int(&self, index: usize) -> Result<i64, InstantiationError> {
        match self.args.get(index) {
            Some(RecipeArg::Int(value)) => Ok(*value),
            other => Err(self.mismatch(index, ArgKind::Int, other)),
        }
    }

    pub fn bool(&self, index: usize) -> Result<bool, InstantiationError> {
        match self.args.get(index) {
            Some(RecipeArg::Bool(value)) => Ok(*value),
            other => Err(self.mismatch(index, ArgKind::Bool, other)),
        }
    }

    pub fn addr(&self, index: usize) -> Result<IpAddr, InstantiationError> {
        match self.args.get(index) {
            Some(RecipeArg::Addr(value)) => Ok(*value),
            other => Err(self.mismatch(index, ArgKind::Addr, other)),
        }
    }

    fn mismatch(
        &self,
        index: usize,
        expected: ArgKind,
        actual: Option<&RecipeArg>,
    ) -> InstantiationError {
        InstantiationError::ArgumentType {
            implementation: self.implementation.to_string(),
            index,
            expected: expected.name(),
            actual: actual.map(|a| a.kind().name()).unwrap_or("missing"),
        }
    }
}

/// A not-yet-instantiated capture device.
///
/// Identity is the name alone. Descriptors order **descending** by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureDeviceDescriptor {
    pub name: String,
    pub recipe: ConstructionRecipe,
    /// Retain the recipe after instantiation (software devices that never go away).
    pub persistent: bool,
}

impl CaptureDeviceDescriptor {
    pub fn new(name: impl Into<String>, recipe: ConstructionRecipe, persistent: bool) -> Self {
        Self {
            name: name.into(),
            recipe,
            persistent,
        }
    }
}

impl PartialEq for CaptureDeviceDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for CaptureDeviceDescriptor {}

impl Hash for CaptureDeviceDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialOrd for CaptureDeviceDescriptor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CaptureDeviceDescriptor {
    // Inverted on purpose: descriptor lists are consumed highest name first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.name.cmp(&self.name)
    }
}
