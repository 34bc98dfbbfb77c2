//! Solver variable allocation.
//!
//! Variables are integers allocated in steps of four, with the low two
//! bits carrying the category, so a raw solver answer decodes back to a
//! semantic statement without a side table. The name map is kept for
//! the explanation pass.

use std::collections::BTreeMap;

/// Category step; variable numbers are multiples of this plus the
/// category offset. Zero is never used as a variable.
const STEP: i32 = 4;
const CATEGORY_REAL: i32 = 0;
const CATEGORY_VIRTUAL: i32 = 1;
const CATEGORY_SHLIB: i32 = 2;

/// What a variable asserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    /// This exact pkgver is published.
    Real,
    /// The pkgver's name is published, directly or via a provider.
    Virtual,
    /// Some published package provides this soname.
    Shlib,
}

/// Allocator and decoder for solver variables.
#[derive(Debug, Default)]
pub struct VarPool {
    by_name: BTreeMap<String, i32>,
    names: Vec<String>,
}

impl VarPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    fn base(&mut self, name: &str) -> i32 {
        if let Some(&base) = self.by_name.get(name) {
            return base;
        }
        let base = (self.names.len() as i32 + 1) * STEP;
        self.by_name.insert(name.to_string(), base);
        self.names.push(name.to_string());
        base
    }

    /// Variable asserting the exact pkgver is published.
    pub fn real(&mut self, pkgver: &str) -> i32 {
        self.base(pkgver) + CATEGORY_REAL
    }

    /// Variable asserting the pkgver's name is published.
    pub fn virtual_pkg(&mut self, pkgver: &str) -> i32 {
        self.base(pkgver) + CATEGORY_VIRTUAL
    }

    /// The virtual variable paired with a real one.
    pub fn virtual_from_real(variable: i32) -> i32 {
        variable - CATEGORY_REAL + CATEGORY_VIRTUAL
    }

    /// Variable asserting the soname is provided.
    pub fn shlib(&mut self, soname: &str) -> i32 {
        self.base(soname) + CATEGORY_SHLIB
    }

    /// Decode a variable's category.
    pub fn kind(variable: i32) -> VarKind {
        match variable.abs() % STEP {
            CATEGORY_VIRTUAL => VarKind::Virtual,
            CATEGORY_SHLIB => VarKind::Shlib,
            _ => VarKind::Real,
        }
    }

    /// Decode a variable back to its name.
    pub fn name(&self, variable: i32) -> Option<&str> {
        let base = variable.abs() - variable.abs() % STEP;
        let slot = base / STEP - 1;
        self.names.get(slot as usize).map(String::as_str)
    }

    /// Human-readable form of a literal, for diagnostics.
    pub fn text(&self, literal: i32) -> String {
        let name = self.name(literal).unwrap_or("?");
        let body = match Self::kind(literal) {
            VarKind::Real => name.to_string(),
            VarKind::Virtual => format!("virt({name})"),
            VarKind::Shlib => format!("shlib({name})"),
        };
        if literal < 0 {
            format!("!{body}")
        } else {
            body
        }
    }
}
