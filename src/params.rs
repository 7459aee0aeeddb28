//! Request-level transformation parameters.
//!
//! These arrive pre-parsed from the request layer. The only parsing done
//! here is the small `name(arg, arg)` filter syntax and `x,y` focal
//! points, used by the CLI.

use crate::imaging::{Crop, Size};
use std::fmt;
use std::str::FromStr;

/// What to do with an image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    /// Target width; 0 leaves the width unconstrained.
    pub width: u32,
    /// Target height; 0 leaves the height unconstrained.
    pub height: u32,
    /// Scale to fit inside the box, never crop.
    pub fit_in: bool,
    pub flip_h: bool,
    pub flip_v: bool,
    pub crop: Crop,
    pub size: Size,
    /// Fractional focal point in `[0, 1]`; overrides the crop anchor.
    pub focal: Option<(f64, f64)>,
    pub filters: Vec<Filter>,
    /// Return image metadata as JSON instead of pixels.
    pub meta: bool,
}

impl Params {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }
}

/// A named filter with string arguments, e.g. `blur(2.5)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub name: String,
    pub args: Vec<String>,
}

impl Filter {
    pub fn new(name: impl Into<String>, args: &[&str]) -> Self {
        Self {
            name: name.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.args.join(","))
    }
}

impl FromStr for Filter {
    type Err = String;

    /// Parses `name`, `name()` or `name(a,b,...)`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (name, args) = match s.split_once('(') {
            Some((name, rest)) => {
                let inner = rest
                    .strip_suffix(')')
                    .ok_or_else(|| format!("filter '{s}' is missing ')'"))?;
                let args = if inner.trim().is_empty() {
                    Vec::new()
                } else {
                    inner.split(',').map(|a| a.trim().to_string()).collect()
                };
                (name.trim(), args)
            }
            None => (s, Vec::new()),
        };

        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(format!("invalid filter name '{name}'"));
        }
        Ok(Self {
            name: name.to_string(),
            args,
        })
    }
}

/// Parse an `x,y` focal point with both coordinates in `[0, 1]`.
pub fn parse_focal(s: &str) -> Result<(f64, f64), String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("focal point '{s}' must be 'x,y'"))?;
    let parse = |v: &str| -> Result<f64, String> {
        let v: f64 = v
            .trim()
            .parse()
            .map_err(|_| format!("invalid focal coordinate '{}'", v.trim()))?;
        if (0.0..=1.0).contains(&v) {
            Ok(v)
        } else {
            Err(format!("focal coordinate {v} outside [0, 1]"))
        }
    };
    Ok((parse(x)?, parse(y)?))
}
