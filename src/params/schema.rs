// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Declarative parameter schemas
//!
//! Schemas are plain `const` data so each action's table can be read on its
//! own, without any code that interprets it.

use serde_json::{Map, Value};

use crate::pipeline::Software;

/// Whether a key holds one value or accepts a scalar-or-list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Exactly one value
    One,
    /// One value or an ordered, non-empty array of values of the same kind
    ScalarOrList,
}

/// Value type or domain accepted by a key
#[derive(Debug, Clone, Copy)]
pub enum ValueKind {
    Bool,
    /// Whole number; integral floats such as `1e7` are accepted
    Integer { min: Option<i64>, max: Option<i64> },
    Number { min: Option<f64>, max: Option<f64> },
    Text,
    /// One string out of a fixed set
    OneOf(&'static [&'static str]),
    /// One whole number out of a fixed set
    IntegerOneOf(&'static [i64]),
    /// Nested object with its own keys
    Object(&'static [ParamSpec]),
}

/// Default applied when an optional key is omitted
#[derive(Debug, Clone, Copy)]
pub enum DefaultValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(&'static str),
    /// An empty object, itself filled with the nested defaults
    EmptyObject,
}

impl DefaultValue {
    pub fn to_value(self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(b),
            Self::Int(i) => Value::from(i),
            Self::Float(f) => Value::from(f),
            Self::Text(s) => Value::String(s.to_string()),
            Self::EmptyObject => Value::Object(Map::new()),
        }
    }
}

/// One recognized parameter key
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ValueKind,
    pub shape: Shape,
    pub required: bool,
    pub default: Option<DefaultValue>,
}

impl ParamSpec {
    /// A key that must be present
    pub const fn required(name: &'static str, kind: ValueKind) -> Self {
        Self {
            name,
            kind,
            shape: Shape::One,
            required: true,
            default: None,
        }
    }

    /// An optional key with no default
    pub const fn optional(name: &'static str, kind: ValueKind) -> Self {
        Self {
            name,
            kind,
            shape: Shape::One,
            required: false,
            default: None,
        }
    }

    /// An optional key filled in with `default` when omitted
    pub const fn defaulted(name: &'static str, kind: ValueKind, default: DefaultValue) -> Self {
        Self {
            name,
            kind,
            shape: Shape::One,
            required: false,
            default: Some(default),
        }
    }

    /// Accept either one value or a list of values for this key
    pub const fn or_list(self) -> Self {
        Self {
            shape: Shape::ScalarOrList,
            ..self
        }
    }
}

/// Broad category of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionClass {
    Reconstruction,
    Export,
    Tractography,
    /// Builds connectivity matrices; expanded over atlases and measures
    Connectivity,
    Utility,
}

/// Schema for one `(software, action)` pair
#[derive(Debug, Clone, Copy)]
pub struct ActionSchema {
    pub software: Software,
    pub action: &'static str,
    pub class: ActionClass,
    pub params: &'static [ParamSpec],
    /// Scalar-or-list key whose entries each define one connectivity measure
    pub measure_key: Option<&'static str>,
}

impl ActionSchema {
    pub fn is_connectivity(&self) -> bool {
        self.class == ActionClass::Connectivity
    }

    /// Whether a top-level key is recognized
    pub fn accepts(&self, key: &str) -> bool {
        self.params.iter().any(|p| p.name == key)
    }
}

// Shorthands for the registry tables.

pub(crate) const fn int_min(min: i64) -> ValueKind {
    ValueKind::Integer {
        min: Some(min),
        max: None,
    }
}

pub(crate) const fn num_min(min: f64) -> ValueKind {
    ValueKind::Number {
        min: Some(min),
        max: None,
    }
}

pub(crate) const fn num_range(min: f64, max: f64) -> ValueKind {
    ValueKind::Number {
        min: Some(min),
        max: Some(max),
    }
}

pub(crate) const ANY_NUMBER: ValueKind = ValueKind::Number {
    min: None,
    max: None,
};
