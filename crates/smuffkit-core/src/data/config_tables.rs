//! Per-tool configuration tables pulled from the controller
//!
//! Each table is replaced wholesale when its configuration block arrives.
//! Callers build the complete replacement first and only then swap it in, so
//! a block that fails to parse leaves the previous table untouched.

use serde::{Deserialize, Serialize};

/// Material loaded on one tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Material {
    pub material: String,
    pub color: String,
    /// Purge factor in percent
    pub purge_factor: u32,
}

impl Material {
    pub fn new(material: impl Into<String>, color: impl Into<String>, purge_factor: u32) -> Self {
        Self {
            material: material.into(),
            color: color.into(),
            purge_factor,
        }
    }
}

/// The configuration tables, all indexed by tool
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfigTables {
    pub materials: Vec<Material>,
    /// Tray assignment per tool
    pub swaps: Vec<i64>,
    /// Lid servo close angle per tool
    pub servo_map: Vec<i64>,
    /// Feeder state per tool
    pub feed_states: Vec<i64>,
}

impl ConfigTables {
    pub fn replace_materials(&mut self, materials: Vec<Material>) {
        self.materials = materials;
    }

    pub fn replace_swaps(&mut self, swaps: Vec<i64>) {
        self.swaps = swaps;
    }

    pub fn replace_servo_map(&mut self, servo_map: Vec<i64>) {
        self.servo_map = servo_map;
    }

    pub fn replace_feed_states(&mut self, feed_states: Vec<i64>) {
        self.feed_states = feed_states;
    }

    /// Material of a tool, if known
    pub fn material_for(&self, tool: i32) -> Option<&Material> {
        usize::try_from(tool).ok().and_then(|i| self.materials.get(i))
    }
}
